use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use irtag_core::authority::{Authority, AuthoritySnapshot, Outbound, Target};
use irtag_core::clock::{Clock, Millis, SystemClock};
use irtag_core::ledger::{ScoreCategory, ScoreRejection};
use irtag_core::match_state::{MatchPhase, StartError};
use irtag_core::participant::ParticipantId;
use irtag_core::protocol::{MAX_DATAGRAM_SIZE, Message, decode_message, encode_message};
use irtag_core::report::{JsonFileSink, MatchReport, ReportError, ReportSink};

use crate::config::{AuthorityConfig, ConfigError};

/// Commands sent from the operator console to the node loop.
#[derive(Debug)]
pub enum AuthorityCommand {
    Start {
        participants: Vec<ParticipantId>,
        duration_ms: Option<Millis>,
        reply: oneshot::Sender<Result<Uuid, StartError>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    ReadyCheck {
        reply: oneshot::Sender<Result<(), StartError>>,
    },
    Reset,
    Award {
        participant: ParticipantId,
        category: ScoreCategory,
        delta: i32,
        note: Option<String>,
        reply: oneshot::Sender<Result<(), ScoreRejection>>,
    },
    Remove {
        participant: ParticipantId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    Export {
        reply: oneshot::Sender<Result<(MatchReport, String), ReportError>>,
    },
    Shutdown,
}

/// Datagram counters kept by the loop.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NodeStats {
    pub received: u64,
    pub rejected: u64,
    pub sent: u64,
    pub send_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub snapshot: AuthoritySnapshot,
    pub stats: NodeStats,
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

/// Handle to a running authority node.
pub struct AuthorityHandle {
    pub local_addr: SocketAddr,
    commands: mpsc::UnboundedSender<AuthorityCommand>,
    task: JoinHandle<()>,
}

impl AuthorityHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AuthorityCommand,
    ) -> Result<T, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    pub async fn start_match(
        &self,
        participants: Vec<ParticipantId>,
        duration_ms: Option<Millis>,
    ) -> Result<Result<Uuid, StartError>, NodeError> {
        self.request(|reply| AuthorityCommand::Start {
            participants,
            duration_ms,
            reply,
        })
        .await
    }

    pub async fn stop_match(&self) -> Result<bool, NodeError> {
        self.request(|reply| AuthorityCommand::Stop { reply }).await
    }

    pub async fn ready_check(&self) -> Result<Result<(), StartError>, NodeError> {
        self.request(|reply| AuthorityCommand::ReadyCheck { reply })
            .await
    }

    pub fn reset_match(&self) -> Result<(), NodeError> {
        self.commands
            .send(AuthorityCommand::Reset)
            .map_err(|_| NodeError::Stopped)
    }

    pub async fn award(
        &self,
        participant: ParticipantId,
        category: ScoreCategory,
        delta: i32,
        note: Option<String>,
    ) -> Result<Result<(), ScoreRejection>, NodeError> {
        self.request(|reply| AuthorityCommand::Award {
            participant,
            category,
            delta,
            note,
            reply,
        })
        .await
    }

    pub async fn remove(&self, participant: ParticipantId) -> Result<bool, NodeError> {
        self.request(|reply| AuthorityCommand::Remove { participant, reply })
            .await
    }

    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        self.request(|reply| AuthorityCommand::Status { reply })
            .await
    }

    pub async fn export(&self) -> Result<Result<(MatchReport, String), ReportError>, NodeError> {
        self.request(|reply| AuthorityCommand::Export { reply })
            .await
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(AuthorityCommand::Shutdown);
        let _ = self.task.await;
    }
}

/// Bind the socket and spawn the node loop with the system clock and a
/// JSON report sink in `report_dir`.
pub async fn spawn(config: AuthorityConfig) -> Result<AuthorityHandle, NodeError> {
    let sink = Arc::new(JsonFileSink::new(&config.report_dir));
    spawn_with(config, Arc::new(SystemClock), sink).await
}

pub async fn spawn_with(
    config: AuthorityConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
) -> Result<AuthorityHandle, NodeError> {
    config.validate()?;
    let addr = config.listen_socket_addr()?;
    let discovery_targets = config.discovery_socket_addrs()?;
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| NodeError::Bind { addr, source })?;
    socket.set_broadcast(true)?;
    let local_addr = socket.local_addr()?;

    let authority = Authority::new(config.rules.clone(), config.settings(local_addr.port()));
    let (commands, cmd_rx) = mpsc::unbounded_channel();

    tracing::info!(%local_addr, targets = discovery_targets.len(), "Scoring authority listening");

    let node = Node {
        socket,
        authority,
        config,
        discovery_targets,
        clock,
        sink,
        stats: NodeStats::default(),
    };
    let task = tokio::spawn(node.run(cmd_rx));

    Ok(AuthorityHandle {
        local_addr,
        commands,
        task,
    })
}

struct Node {
    socket: UdpSocket,
    authority: Authority,
    config: AuthorityConfig,
    discovery_targets: Vec<SocketAddr>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ReportSink>,
    stats: NodeStats,
}

fn interval(ms: Millis) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}

impl Node {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<AuthorityCommand>) {
        let mut heartbeat = interval(self.config.timing.heartbeat_interval_ms);
        let mut discovery = interval(self.config.timing.discovery_interval_ms);
        let mut tick = interval(self.config.timing.tick_interval_ms);
        // One extra byte so an oversize datagram shows up as oversize
        // instead of being silently truncated to a valid length.
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
                    let out = self.authority.heartbeat(self.clock.now_ms());
                    self.send_all(out).await;
                }
                _ = discovery.tick() => {
                    let out = self.authority.discovery(self.clock.now_ms());
                    self.send_all(out).await;
                }
                _ = tick.tick() => {
                    let before = self.authority.phase();
                    let now = self.clock.now_ms();
                    let out = self.authority.tick(now);
                    self.send_all(out).await;
                    if before == MatchPhase::Active && self.authority.phase() == MatchPhase::Ended {
                        self.on_match_ended(now);
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(AuthorityCommand::Shutdown) | None => break,
                        Some(cmd) => self.on_command(cmd).await,
                    }
                }
            }
        }
        tracing::info!("Scoring authority stopped");
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
        tracing::trace!(%from, kind = msg.kind(), "Received");
        let out = self.authority.handle(msg, from, self.clock.now_ms());
        self.send_all(out).await;
    }

    async fn send_all(&mut self, out: Vec<Outbound>) {
        for o in out {
            match o.target {
                Target::Endpoint(addr) => self.send(&o.message, addr).await,
                Target::Discovery => {
                    for addr in self.discovery_targets.clone() {
                        self.send(&o.message, addr).await;
                    }
                },
            }
        }
    }

    async fn send(&mut self, msg: &Message, to: SocketAddr) {
        let bytes = match encode_message(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(kind = msg.kind(), error = %e, "Failed to encode message");
                return;
            },
        };
        match self.socket.send_to(&bytes, to).await {
            Ok(_) => self.stats.sent += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::debug!(%to, kind = msg.kind(), error = %e, "Send failed");
            },
        }
    }

    fn on_match_ended(&self, now: Millis) {
        let report = match self.authority.report(now) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "No report for ended match");
                return;
            },
        };
        tracing::info!("\n{}", report.render_text());
        if self.config.auto_export
            && let Err(e) = self.sink.write(&report)
        {
            tracing::error!(error = %e, "Failed to export match report");
        }
    }

    async fn on_command(&mut self, cmd: AuthorityCommand) {
        let now = self.clock.now_ms();
        match cmd {
            AuthorityCommand::Start {
                participants,
                duration_ms,
                reply,
            } => {
                let result = self.authority.start_match(&participants, duration_ms, now);
                let result = match result {
                    Ok(out) => {
                        self.send_all(out).await;
                        self.authority
                            .current_match()
                            .map(|m| m.id)
                            .ok_or(StartError::NoParticipants)
                    },
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            },
            AuthorityCommand::Stop { reply } => {
                let stopped = match self.authority.stop_match(now) {
                    Some(out) => {
                        self.send_all(out).await;
                        self.on_match_ended(now);
                        true
                    },
                    None => false,
                };
                let _ = reply.send(stopped);
            },
            AuthorityCommand::ReadyCheck { reply } => {
                let result = match self.authority.ready_check() {
                    Ok(out) => {
                        self.send_all(out).await;
                        Ok(())
                    },
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            },
            AuthorityCommand::Reset => {
                let was_active = self.authority.phase() == MatchPhase::Active;
                let out = self.authority.reset_match(now);
                self.send_all(out).await;
                if was_active {
                    self.on_match_ended(now);
                }
            },
            AuthorityCommand::Award {
                participant,
                category,
                delta,
                note,
                reply,
            } => {
                let result = match self
                    .authority
                    .manual_award(participant, category, delta, note, now)
                {
                    Ok(out) => {
                        self.send_all(out).await;
                        Ok(())
                    },
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            },
            AuthorityCommand::Remove { participant, reply } => {
                let _ = reply.send(self.authority.remove_participant(participant).is_some());
            },
            AuthorityCommand::Status { reply } => {
                let _ = reply.send(NodeStatus {
                    snapshot: self.authority.snapshot(now),
                    stats: self.stats,
                });
            },
            AuthorityCommand::Export { reply } => {
                let result = self
                    .authority
                    .report(now)
                    .and_then(|report| self.sink.write(&report).map(|location| (report, location)));
                let _ = reply.send(result);
            },
            AuthorityCommand::Shutdown => {},
        }
    }
}
