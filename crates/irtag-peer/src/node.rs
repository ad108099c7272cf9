use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use irtag_core::clock::{Clock, Millis, SystemClock};
use irtag_core::peer::{Peer, PeerStatus};
use irtag_core::protocol::{MAX_DATAGRAM_SIZE, Message, decode_message, encode_message};
use irtag_core::weapon::FireRejection;

use crate::config::{ConfigError, PeerConfig};

#[derive(Debug)]
pub enum PeerCommand {
    Fire {
        reply: oneshot::Sender<Result<Vec<u32>, FireRejection>>,
    },
    CheckMove {
        reply: oneshot::Sender<Result<(), FireRejection>>,
    },
    SetReady(bool),
    /// A complete frame from the IR receiver. Replies whether it was
    /// reported as a hit.
    Frame {
        bursts: Vec<u32>,
        reply: oneshot::Sender<bool>,
    },
    /// A single burst from a receiver that reports edges one at a time.
    Burst { duration_us: u32 },
    Status {
        reply: oneshot::Sender<PeerNodeStatus>,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PeerStats {
    pub received: u64,
    pub rejected: u64,
    pub sent: u64,
    pub send_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerNodeStatus {
    pub peer: PeerStatus,
    pub authority: SocketAddr,
    pub stats: PeerStats,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("node loop has stopped")]
    Stopped,
}

pub struct PeerHandle {
    pub local_addr: SocketAddr,
    commands: mpsc::UnboundedSender<PeerCommand>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PeerCommand,
    ) -> Result<T, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    fn send(&self, cmd: PeerCommand) -> Result<(), NodeError> {
        self.commands.send(cmd).map_err(|_| NodeError::Stopped)
    }

    pub async fn fire(&self) -> Result<Result<Vec<u32>, FireRejection>, NodeError> {
        self.request(|reply| PeerCommand::Fire { reply }).await
    }

    pub async fn check_move(&self) -> Result<Result<(), FireRejection>, NodeError> {
        self.request(|reply| PeerCommand::CheckMove { reply }).await
    }

    pub fn set_ready(&self, ready: bool) -> Result<(), NodeError> {
        self.send(PeerCommand::SetReady(ready))
    }

    pub async fn receive_frame(&self, bursts: Vec<u32>) -> Result<bool, NodeError> {
        self.request(|reply| PeerCommand::Frame { bursts, reply })
            .await
    }

    pub fn receive_burst(&self, duration_us: u32) -> Result<(), NodeError> {
        self.send(PeerCommand::Burst { duration_us })
    }

    pub async fn status(&self) -> Result<PeerNodeStatus, NodeError> {
        self.request(|reply| PeerCommand::Status { reply }).await
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(PeerCommand::Shutdown);
        let _ = self.task.await;
    }
}

pub async fn spawn(config: PeerConfig) -> Result<PeerHandle, NodeError> {
    spawn_with(config, Arc::new(SystemClock)).await
}

pub async fn spawn_with(config: PeerConfig, clock: Arc<dyn Clock>) -> Result<PeerHandle, NodeError> {
    config.validate()?;
    let addr = config.listen_socket_addr()?;
    let authority = config.authority_socket_addr()?;
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { addr, source })?;
    let local_addr = socket.local_addr()?;

    let peer = Peer::new(
        config.registration(local_addr.port()),
        config.rules.clone(),
        config.settings(),
    );
    let (commands, cmd_rx) = mpsc::unbounded_channel();

    tracing::info!(
        id = peer.id(),
        %local_addr,
        %authority,
        "Robot node listening"
    );

    let node = Node {
        socket,
        peer,
        authority,
        heartbeat_ms: config.timing.heartbeat_interval_ms,
        poll_ms: config.timing.poll_interval_ms,
        clock,
        stats: PeerStats::default(),
        was_stale: false,
    };
    let task = tokio::spawn(node.run(cmd_rx));

    Ok(PeerHandle {
        local_addr,
        commands,
        task,
    })
}

struct Node {
    socket: UdpSocket,
    peer: Peer,
    authority: SocketAddr,
    heartbeat_ms: Millis,
    poll_ms: Millis,
    clock: Arc<dyn Clock>,
    stats: PeerStats,
    was_stale: bool,
}

fn interval(ms: Millis) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}

impl Node {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<PeerCommand>) {
        let mut heartbeat = interval(self.heartbeat_ms);
        let mut poll = interval(self.poll_ms);
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE + 1];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.on_datagram(&buf[..len], from).await,
                        Err(e) => tracing::warn!(error = %e, "UDP receive failed"),
                    }
                }
                _ = heartbeat.tick() => {
                    let msg = self.peer.heartbeat(self.clock.now_ms());
                    self.send(&msg).await;
                }
                _ = poll.tick() => {
                    let now = self.clock.now_ms();
                    let out = self.peer.poll(now);
                    self.send_all(out).await;
                    self.check_link(now);
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PeerCommand::Shutdown) | None => break,
                        Some(cmd) => self.on_command(cmd).await,
                    }
                }
            }
        }
        tracing::info!(id = self.peer.id(), "Robot node stopped");
    }

    async fn on_datagram(&mut self, data: &[u8], from: SocketAddr) {
        self.stats.received += 1;
        let msg = match decode_message(data) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.rejected += 1;
                tracing::debug!(%from, error = %e, "Dropping malformed datagram");
                return;
            },
        };
        if let Message::Discovery { authority_port, .. } = msg {
            let found = SocketAddr::new(from.ip(), authority_port);
            if found != self.authority {
                tracing::info!(authority = %found, "Authority discovered");
                self.authority = found;
            }
        }
        let out = self.peer.handle(msg, self.clock.now_ms());
        self.send_all(out).await;
    }

    fn check_link(&mut self, now: Millis) {
        let stale = self.peer.status(now).authority_stale;
        if stale && !self.was_stale {
            tracing::warn!(authority = %self.authority, "Lost contact with authority");
        } else if !stale && self.was_stale {
            tracing::info!(authority = %self.authority, "Authority contact restored");
        }
        self.was_stale = stale;
    }

    async fn send_all(&mut self, out: Vec<Message>) {
        for msg in out {
            self.send(&msg).await;
        }
    }

    async fn send(&mut self, msg: &Message) {
        let bytes = match encode_message(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(kind = msg.kind(), error = %e, "Failed to encode message");
                return;
            },
        };
        match self.socket.send_to(&bytes, self.authority).await {
            Ok(_) => self.stats.sent += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::debug!(to = %self.authority, kind = msg.kind(), error = %e, "Send failed");
            },
        }
    }

    async fn on_command(&mut self, cmd: PeerCommand) {
        let now = self.clock.now_ms();
        match cmd {
            PeerCommand::Fire { reply } => {
                let _ = reply.send(self.peer.fire(now));
            },
            PeerCommand::CheckMove { reply } => {
                let _ = reply.send(self.peer.check_move(now));
            },
            PeerCommand::SetReady(ready) => {
                let msg = self.peer.set_ready(ready);
                self.send(&msg).await;
            },
            PeerCommand::Frame { bursts, reply } => {
                let report = self.peer.on_frame(&bursts, now);
                let hit = report.is_some();
                if let Some(report) = report {
                    self.send(&report).await;
                }
                let _ = reply.send(hit);
            },
            PeerCommand::Burst { duration_us } => {
                if let Some(report) = self.peer.on_burst(duration_us, now) {
                    self.send(&report).await;
                }
            },
            PeerCommand::Status { reply } => {
                let _ = reply.send(PeerNodeStatus {
                    peer: self.peer.status(now),
                    authority: self.authority,
                    stats: self.stats,
                });
            },
            PeerCommand::Shutdown => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> PeerConfig {
        PeerConfig {
            listen_addr: Some("127.0.0.1:0".to_string()),
            ..PeerConfig::default()
        }
    }

    #[tokio::test]
    async fn fresh_robot_is_idle_and_free_to_move() {
        let handle = spawn(loopback_config()).await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.peer.phase, irtag_core::match_state::MirrorPhase::Idle);
        assert!(status.peer.can_move);
        assert_eq!(handle.check_move().await.unwrap(), Ok(()));
        assert!(handle.fire().await.unwrap().is_ok());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn frames_outside_a_match_are_ignored() {
        let handle = spawn(loopback_config()).await.unwrap();
        let bursts = irtag_core::signal::encode(2);
        assert!(!handle.receive_frame(bursts).await.unwrap());
        assert!(!handle.receive_frame(vec![1, 2, 3]).await.unwrap());
        let status = handle.status().await.unwrap();
        assert_eq!(status.peer.rejected_frames, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn id_zero_is_refused() {
        let mut config = loopback_config();
        config.identity.id = 0;
        assert!(matches!(
            spawn(config).await,
            Err(NodeError::Config(ConfigError::InvalidId))
        ));
    }
}
