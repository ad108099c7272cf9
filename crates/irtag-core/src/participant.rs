use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// Team/robot identifier. Valid ids are 1..=255; 0 is reserved.
pub type ParticipantId = u8;

pub fn is_valid_id(id: ParticipantId) -> bool {
    id != 0
}

/// What a robot says about itself when it registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub id: ParticipantId,
    pub name: String,
    pub robot_name: String,
    /// UDP port the robot listens on for authority traffic.
    pub reply_port: u16,
}

/// A competing unit as tracked by the scoring authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub robot_name: String,
    pub endpoint: SocketAddr,
    pub last_seen: Millis,
    pub online: bool,
    pub ready: bool,
    pub disabled_until: Millis,
}

impl Participant {
    pub fn new(registration: &Registration, endpoint: SocketAddr, now: Millis) -> Self {
        Self {
            id: registration.id,
            name: registration.name.clone(),
            robot_name: registration.robot_name.clone(),
            endpoint,
            last_seen: now,
            online: true,
            ready: false,
            disabled_until: 0,
        }
    }

    pub fn is_disabled(&self, now: Millis) -> bool {
        now < self.disabled_until
    }

    /// Move the disabled deadline forward; never backward.
    pub fn extend_disabled(&mut self, until: Millis) {
        self.disabled_until = self.disabled_until.max(until);
    }
}

/// Read-only view of a participant for rendering and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub name: String,
    pub robot_name: String,
    pub endpoint: String,
    pub online: bool,
    pub ready: bool,
    pub disabled: bool,
    pub score: i64,
    pub kills: u32,
    pub deaths: u32,
}
