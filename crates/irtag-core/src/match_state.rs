use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Millis;
use crate::participant::{ParticipantId, is_valid_id};

const NAME_ADJECTIVES: &[&str] = &[
    "Amber", "Brisk", "Copper", "Dusty", "Electric", "Frosty", "Golden", "Hidden", "Iron", "Lunar",
    "Neon", "Rapid", "Silent", "Violet",
];

const NAME_NOUNS: &[&str] = &[
    "Arena", "Beacon", "Circuit", "Delta", "Falcon", "Gambit", "Harbor", "Lantern", "Meridian",
    "Orbit", "Quarry", "Spark", "Vector",
];

fn generate_match_name() -> String {
    let mut rng = rand::rng();
    let adjective = NAME_ADJECTIVES[rng.random_range(0..NAME_ADJECTIVES.len())];
    let noun = NAME_NOUNS[rng.random_range(0..NAME_NOUNS.len())];
    format!("{adjective} {noun}")
}

/// Lifecycle phase of a match on the scoring authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Idle,
    ReadyCheck,
    Active,
    Ended,
}

/// One bounded round of play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub name: String,
    pub participants: BTreeSet<ParticipantId>,
    pub duration_ms: Millis,
    pub started_at: Millis,
    /// Scheduled deadline while active; actual end once ended.
    pub ended_at: Millis,
    /// Set once the match ends.
    pub grace_until: Option<Millis>,
}

impl Match {
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains(&id)
    }

    /// Milliseconds since start, clamped to the match length.
    pub fn elapsed(&self, now: Millis) -> Millis {
        now.saturating_sub(self.started_at)
            .min(self.ended_at.saturating_sub(self.started_at))
    }

    pub fn remaining(&self, now: Millis) -> Millis {
        self.ended_at.saturating_sub(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("a match is already active")]
    AlreadyActive,
    #[error("no participants named")]
    NoParticipants,
    #[error("{count} participants exceeds the maximum of {max}")]
    TooManyParticipants { count: usize, max: usize },
    #[error("match duration must be positive")]
    ZeroDuration,
    #[error("participant id {0} is not valid")]
    InvalidParticipant(ParticipantId),
    #[error("participant {0} is not online")]
    ParticipantOffline(ParticipantId),
}

/// Authoritative match lifecycle: Idle, optional ReadyCheck, Active, Ended.
///
/// Only one match exists at a time. Starting a new match replaces the ended
/// one; its ledger entries stay behind under the old match id.
#[derive(Debug)]
pub struct MatchStateMachine {
    phase: MatchPhase,
    current: Option<Match>,
    grace_period_ms: Millis,
    max_participants: usize,
}

impl MatchStateMachine {
    pub fn new(grace_period_ms: Millis, max_participants: usize) -> Self {
        Self {
            phase: MatchPhase::Idle,
            current: None,
            grace_period_ms,
            max_participants,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn current(&self) -> Option<&Match> {
        self.current.as_ref()
    }

    /// Enter the ready check. Allowed from any phase except Active.
    pub fn begin_ready_check(&mut self) -> Result<(), StartError> {
        if self.phase == MatchPhase::Active {
            return Err(StartError::AlreadyActive);
        }
        self.phase = MatchPhase::ReadyCheck;
        Ok(())
    }

    /// Start a match over `participants`. Every named participant must be
    /// online according to `is_online`.
    pub fn start(
        &mut self,
        participants: &[ParticipantId],
        duration_ms: Millis,
        now: Millis,
        is_online: impl Fn(ParticipantId) -> bool,
    ) -> Result<&Match, StartError> {
        if self.phase == MatchPhase::Active {
            return Err(StartError::AlreadyActive);
        }
        let set: BTreeSet<ParticipantId> = participants.iter().copied().collect();
        if set.is_empty() {
            return Err(StartError::NoParticipants);
        }
        if set.len() > self.max_participants {
            return Err(StartError::TooManyParticipants {
                count: set.len(),
                max: self.max_participants,
            });
        }
        if duration_ms == 0 {
            return Err(StartError::ZeroDuration);
        }
        for &id in &set {
            if !is_valid_id(id) {
                return Err(StartError::InvalidParticipant(id));
            }
            if !is_online(id) {
                return Err(StartError::ParticipantOffline(id));
            }
        }

        let started = Match {
            id: Uuid::new_v4(),
            name: generate_match_name(),
            participants: set,
            duration_ms,
            started_at: now,
            ended_at: now.saturating_add(duration_ms),
            grace_until: None,
        };
        tracing::info!(
            match_id = %started.id,
            name = %started.name,
            participants = started.participants.len(),
            duration_ms,
            "Match started"
        );
        self.phase = MatchPhase::Active;
        Ok(self.current.insert(started))
    }

    /// Advance the match timer. Returns the id of a match that ended on this
    /// tick.
    pub fn tick(&mut self, now: Millis) -> Option<Uuid> {
        if self.phase != MatchPhase::Active {
            return None;
        }
        let deadline = self.current.as_ref()?.ended_at;
        if now < deadline {
            return None;
        }
        self.finish(deadline)
    }

    /// End the active match early.
    pub fn stop(&mut self, now: Millis) -> Option<Uuid> {
        if self.phase != MatchPhase::Active {
            return None;
        }
        let deadline = self.current.as_ref()?.ended_at;
        self.finish(now.min(deadline))
    }

    fn finish(&mut self, at: Millis) -> Option<Uuid> {
        let grace_period_ms = self.grace_period_ms;
        let m = self.current.as_mut()?;
        m.ended_at = at;
        m.grace_until = Some(at.saturating_add(grace_period_ms));
        self.phase = MatchPhase::Ended;
        tracing::info!(match_id = %m.id, ended_at = at, "Match ended");
        Some(m.id)
    }

    /// Return to Idle. The last match stays readable until the next start.
    pub fn reset(&mut self, now: Millis) {
        if self.phase == MatchPhase::Active {
            self.stop(now);
        }
        self.phase = MatchPhase::Idle;
    }

    pub fn accepts_hits(&self, now: Millis) -> bool {
        self.phase == MatchPhase::Active && self.current.as_ref().is_some_and(|m| now < m.ended_at)
    }

    /// Manual awards are accepted while active and until the grace deadline.
    pub fn accepts_awards(&self, at: Millis) -> bool {
        match (self.phase, self.current.as_ref()) {
            (MatchPhase::Active, Some(_)) => true,
            (MatchPhase::Ended, Some(m)) => m.grace_until.is_some_and(|grace| at < grace),
            _ => false,
        }
    }
}

/// Phase a robot believes the match is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorPhase {
    Idle,
    Active,
    Ended,
}

/// A robot's local copy of the match lifecycle.
///
/// Driven only by authority messages, except that its own timer may demote
/// it from Active to Ended. It never promotes itself to Active.
#[derive(Debug, Clone)]
pub struct MatchMirror {
    phase: MirrorPhase,
    match_id: Option<Uuid>,
    started_at: Millis,
    ends_at: Millis,
}

impl Default for MatchMirror {
    fn default() -> Self {
        Self {
            phase: MirrorPhase::Idle,
            match_id: None,
            started_at: 0,
            ends_at: 0,
        }
    }
}

impl MatchMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> MirrorPhase {
        self.phase
    }

    pub fn match_id(&self) -> Option<Uuid> {
        self.match_id
    }

    /// Returns `true` if this MATCH_START began a new match locally. A repeat
    /// of the current match's start is ignored.
    pub fn on_start(&mut self, match_id: Uuid, duration_ms: Millis, now: Millis) -> bool {
        if self.match_id == Some(match_id) {
            return false;
        }
        self.phase = MirrorPhase::Active;
        self.match_id = Some(match_id);
        self.started_at = now;
        self.ends_at = now.saturating_add(duration_ms);
        true
    }

    /// Returns `true` if the mirror moved to Ended.
    pub fn on_end(&mut self, match_id: Uuid, now: Millis) -> bool {
        if self.match_id != Some(match_id) || self.phase != MirrorPhase::Active {
            return false;
        }
        self.phase = MirrorPhase::Ended;
        self.ends_at = self.ends_at.min(now);
        true
    }

    pub fn on_reset(&mut self) {
        self.phase = MirrorPhase::Idle;
    }

    /// Demote to Ended when the local timer runs out.
    pub fn poll(&mut self, now: Millis) -> bool {
        if self.phase == MirrorPhase::Active && now >= self.ends_at {
            self.phase = MirrorPhase::Ended;
            return true;
        }
        false
    }

    pub fn is_active(&self, now: Millis) -> bool {
        self.phase == MirrorPhase::Active && now < self.ends_at
    }

    /// Milliseconds into the current match.
    pub fn match_time(&self, now: Millis) -> Millis {
        now.saturating_sub(self.started_at)
    }

    pub fn remaining(&self, now: Millis) -> Millis {
        match self.phase {
            MirrorPhase::Active => self.ends_at.saturating_sub(now),
            _ => 0,
        }
    }
}
