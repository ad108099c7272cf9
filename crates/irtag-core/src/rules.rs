use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// Competition constants shared by the authority and every robot.
///
/// Loaded once at node start-up and never changed while a node runs, so
/// every match on that node is played under the same numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitionRules {
    /// Points credited to the attacker for one accepted hit.
    pub points_per_hit: i32,
    /// How long a robot stays disabled after being hit.
    pub hit_disable_ms: Millis,
    /// Minimum spacing between two shots from the same robot.
    pub weapon_cooldown_ms: Millis,
    /// Window after match end during which manual awards are still accepted.
    pub grace_period_ms: Millis,
    /// Upper bound on the size of a match's participant set.
    pub max_participants: usize,
    /// Duration used when the operator starts a match without naming one.
    pub default_match_duration_ms: Millis,
    /// Score hits where attacker and victim are the same robot.
    pub allow_self_hits: bool,
}

impl Default for CompetitionRules {
    fn default() -> Self {
        Self {
            points_per_hit: 100,
            hit_disable_ms: 10_000,
            weapon_cooldown_ms: 500,
            grace_period_ms: 60_000,
            max_participants: 8,
            default_match_duration_ms: 120_000,
            allow_self_hits: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    #[error("rules.{0} must be > 0")]
    NotPositive(&'static str),
    #[error("rules.max_participants must be between 1 and 255, got {0}")]
    ParticipantLimit(usize),
}

impl CompetitionRules {
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.points_per_hit <= 0 {
            return Err(RulesError::NotPositive("points_per_hit"));
        }
        if self.hit_disable_ms == 0 {
            return Err(RulesError::NotPositive("hit_disable_ms"));
        }
        if self.default_match_duration_ms == 0 {
            return Err(RulesError::NotPositive("default_match_duration_ms"));
        }
        if !(1..=255).contains(&self.max_participants) {
            return Err(RulesError::ParticipantLimit(self.max_participants));
        }
        Ok(())
    }

    pub fn weapon(&self) -> WeaponRules {
        WeaponRules {
            cooldown_ms: self.weapon_cooldown_ms,
            disable_ms: self.hit_disable_ms,
        }
    }
}

/// The two timer lengths a robot's weapon needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeaponRules {
    pub cooldown_ms: Millis,
    pub disable_ms: Millis,
}

impl Default for WeaponRules {
    fn default() -> Self {
        CompetitionRules::default().weapon()
    }
}
