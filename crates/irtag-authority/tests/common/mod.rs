use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use irtag_authority::config::{AuthorityConfig, TimingConfig};
use irtag_authority::node::{self, AuthorityHandle};
use irtag_core::clock::{Clock, Millis, SystemClock};
use irtag_core::participant::{ParticipantId, Registration};
use irtag_core::protocol::{Message, decode_message, encode_message};
use irtag_core::report::JsonFileSink;

pub struct TestAuthority {
    pub handle: AuthorityHandle,
    pub report_dir: PathBuf,
}

impl TestAuthority {
    /// Authority on an ephemeral loopback port with fast timers and no
    /// discovery broadcast.
    pub async fn new() -> Self {
        Self::with_timing(TimingConfig {
            heartbeat_interval_ms: 200,
            tick_interval_ms: 20,
            ..TimingConfig::default()
        })
        .await
    }

    pub async fn with_timing(timing: TimingConfig) -> Self {
        Self::with_clock(timing, Arc::new(SystemClock)).await
    }

    pub async fn with_clock(timing: TimingConfig, clock: Arc<dyn Clock>) -> Self {
        let report_dir = std::env::temp_dir().join(format!("irtag-it-{}", uuid::Uuid::new_v4()));
        let config = AuthorityConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            discovery_targets: Vec::new(),
            report_dir: report_dir.display().to_string(),
            timing,
            ..AuthorityConfig::default()
        };
        let sink = Arc::new(JsonFileSink::new(&report_dir));
        let handle = node::spawn_with(config, clock, sink)
            .await
            .unwrap();
        Self { handle, report_dir }
    }

    pub fn addr(&self) -> SocketAddr {
        self.handle.local_addr
    }
}

impl Drop for TestAuthority {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.report_dir);
    }
}

/// A fake robot speaking the wire protocol from a loopback socket.
pub struct TestRobot {
    pub id: ParticipantId,
    pub socket: UdpSocket,
    pub authority: SocketAddr,
}

impl TestRobot {
    pub async fn new(id: ParticipantId, authority: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            id,
            socket,
            authority,
        }
    }

    pub fn registration(&self) -> Registration {
        Registration {
            id: self.id,
            name: format!("Team {}", self.id),
            robot_name: format!("Robot {}", self.id),
            reply_port: self.socket.local_addr().unwrap().port(),
        }
    }

    pub async fn send(&self, msg: &Message) {
        let bytes = encode_message(msg).unwrap();
        self.socket.send_to(&bytes, self.authority).await.unwrap();
    }

    pub async fn send_raw(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.authority).await.unwrap();
    }

    /// Next decodable message (5s timeout).
    pub async fn recv(&self) -> Message {
        let mut buf = vec![0u8; 8192];
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (len, _) = self.socket.recv_from(&mut buf).await.unwrap();
                if let Ok(msg) = decode_message(&buf[..len]) {
                    return msg;
                }
            }
        })
        .await
        .expect("Timed out waiting for a message")
    }

    /// Skip messages until one matches `pred`.
    pub async fn recv_until(&self, pred: impl Fn(&Message) -> bool) -> Message {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = self.recv().await;
                if pred(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("Timed out waiting for the expected message")
    }

    /// Register and wait for the acknowledgement.
    pub async fn register(&self) {
        self.send(&Message::Register(self.registration())).await;
        let id = self.id;
        self.recv_until(|m| matches!(m, Message::RegisterAck { id: ack } if *ack == id))
            .await;
    }
}

pub fn now_ms() -> Millis {
    SystemClock.now_ms()
}
