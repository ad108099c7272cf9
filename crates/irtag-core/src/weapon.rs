use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::rules::WeaponRules;

/// Why a shot (or movement) was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FireRejection {
    #[error("robot is disabled for another {remaining_ms}ms")]
    Disabled { remaining_ms: Millis },
    #[error("weapon cooling down for another {remaining_ms}ms")]
    CoolingDown { remaining_ms: Millis },
    #[error("match is over")]
    MatchOver,
}

/// Flags actuation reads before honoring a fire or drive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WeaponStatus {
    pub disabled: bool,
    pub disabled_remaining_ms: Millis,
    pub cooling_down: bool,
    pub hits_taken: u32,
}

/// Per-robot cooldown and hit-disable timers.
#[derive(Debug, Clone)]
pub struct WeaponState {
    rules: WeaponRules,
    last_fired: Option<Millis>,
    disabled_until: Millis,
    hits_taken: u32,
}

impl WeaponState {
    pub fn new(rules: WeaponRules) -> Self {
        Self {
            rules,
            last_fired: None,
            disabled_until: 0,
            hits_taken: 0,
        }
    }

    pub fn rules(&self) -> WeaponRules {
        self.rules
    }

    pub fn disabled_until(&self) -> Millis {
        self.disabled_until
    }

    pub fn is_disabled(&self, now: Millis) -> bool {
        now < self.disabled_until
    }

    fn cooldown_remaining(&self, now: Millis) -> Millis {
        match self.last_fired {
            Some(fired) => fired.saturating_add(self.rules.cooldown_ms).saturating_sub(now),
            None => 0,
        }
    }

    /// Attempt a shot at `now`. A refused shot leaves the state untouched.
    pub fn try_fire(&mut self, now: Millis) -> Result<(), FireRejection> {
        if self.is_disabled(now) {
            return Err(FireRejection::Disabled {
                remaining_ms: self.disabled_until - now,
            });
        }
        let remaining_ms = self.cooldown_remaining(now);
        if remaining_ms > 0 {
            return Err(FireRejection::CoolingDown { remaining_ms });
        }
        self.last_fired = Some(now);
        Ok(())
    }

    /// Movement is refused only while disabled.
    pub fn check_move(&self, now: Millis) -> Result<(), FireRejection> {
        if self.is_disabled(now) {
            return Err(FireRejection::Disabled {
                remaining_ms: self.disabled_until - now,
            });
        }
        Ok(())
    }

    /// Apply a hit that landed at `hit_at`. Returns the resulting deadline,
    /// which is the later of the current one and `hit_at + disable`.
    pub fn record_hit(&mut self, hit_at: Millis) -> Millis {
        self.hits_taken += 1;
        self.disabled_until = self.disabled_until.max(hit_at.saturating_add(self.rules.disable_ms));
        self.disabled_until
    }

    /// Clear both timers, e.g. when a new match starts.
    pub fn reset(&mut self) {
        self.last_fired = None;
        self.disabled_until = 0;
        self.hits_taken = 0;
    }

    pub fn status(&self, now: Millis) -> WeaponStatus {
        WeaponStatus {
            disabled: self.is_disabled(now),
            disabled_remaining_ms: self.disabled_until.saturating_sub(now),
            cooling_down: self.cooldown_remaining(now) > 0,
            hits_taken: self.hits_taken,
        }
    }
}
