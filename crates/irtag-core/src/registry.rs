use std::collections::BTreeMap;
use std::net::SocketAddr;

use crate::clock::Millis;
use crate::participant::{Participant, ParticipantId, Registration};

/// Result of a REGISTER or DISCOVERY_RESPONSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First time this id has been seen.
    New,
    /// Already known and online; details refreshed.
    Refreshed,
    /// Known but marked offline; now back online.
    Reconnected,
}

/// Roster of known participants on the scoring authority.
///
/// Participants are never dropped for going quiet. The liveness sweep only
/// flips them offline so their history survives a reconnect.
#[derive(Debug)]
pub struct SessionRegistry {
    participants: BTreeMap<ParticipantId, Participant>,
    liveness_timeout_ms: Millis,
}

impl SessionRegistry {
    pub fn new(liveness_timeout_ms: Millis) -> Self {
        Self {
            participants: BTreeMap::new(),
            liveness_timeout_ms,
        }
    }

    pub fn liveness_timeout_ms(&self) -> Millis {
        self.liveness_timeout_ms
    }

    pub fn register(
        &mut self,
        registration: &Registration,
        endpoint: SocketAddr,
        now: Millis,
    ) -> RegisterOutcome {
        match self.participants.get_mut(&registration.id) {
            Some(existing) => {
                let outcome = if existing.online {
                    RegisterOutcome::Refreshed
                } else {
                    RegisterOutcome::Reconnected
                };
                existing.name = registration.name.clone();
                existing.robot_name = registration.robot_name.clone();
                existing.endpoint = endpoint;
                existing.last_seen = now;
                existing.online = true;
                outcome
            },
            None => {
                self.participants.insert(
                    registration.id,
                    Participant::new(registration, endpoint, now),
                );
                RegisterOutcome::New
            },
        }
    }

    /// Record traffic from a known participant. Any message counts as proof
    /// of life. Returns `false` for unknown ids.
    pub fn touch(&mut self, id: ParticipantId, endpoint: SocketAddr, now: Millis) -> bool {
        let Some(p) = self.participants.get_mut(&id) else {
            return false;
        };
        if !p.online {
            tracing::info!(participant = id, %endpoint, "Participant back online");
        }
        p.last_seen = p.last_seen.max(now);
        p.online = true;
        p.endpoint = endpoint;
        true
    }

    /// Record traffic from an endpoint that did not name itself.
    pub fn touch_endpoint(&mut self, endpoint: SocketAddr, now: Millis) -> Option<ParticipantId> {
        let p = self
            .participants
            .values_mut()
            .find(|p| p.endpoint == endpoint)?;
        p.last_seen = p.last_seen.max(now);
        p.online = true;
        Some(p.id)
    }

    /// Flip quiet participants offline. Returns the ids that changed.
    pub fn sweep(&mut self, now: Millis) -> Vec<ParticipantId> {
        let mut lapsed = Vec::new();
        for p in self.participants.values_mut() {
            if p.online && now.saturating_sub(p.last_seen) > self.liveness_timeout_ms {
                p.online = false;
                lapsed.push(p.id);
            }
        }
        lapsed
    }

    pub fn set_ready(&mut self, id: ParticipantId, ready: bool) -> bool {
        match self.participants.get_mut(&id) {
            Some(p) => {
                p.ready = ready;
                true
            },
            None => false,
        }
    }

    pub fn clear_ready(&mut self) {
        for p in self.participants.values_mut() {
            p.ready = false;
        }
    }

    /// Administrative removal. The only way a participant leaves the roster.
    pub fn remove(&mut self, id: ParticipantId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn get_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    pub fn is_online(&self, id: ParticipantId) -> bool {
        self.participants.get(&id).is_some_and(|p| p.online)
    }

    pub fn online_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| p.online)
            .map(|p| p.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
