use crate::clock::Millis;

/// A robot's view of its connection to the scoring authority.
///
/// Decides when the robot should (re-)send REGISTER: once at start-up, on a
/// fixed interval afterwards, and immediately when the authority has gone
/// quiet. The immediate re-register fires once per quiet episode; the next
/// one waits for either fresh contact or the periodic interval.
#[derive(Debug, Clone)]
pub struct AuthorityLink {
    reregister_interval_ms: Millis,
    stale_timeout_ms: Millis,
    last_contact: Option<Millis>,
    last_register: Option<Millis>,
    stale_handled: bool,
    acknowledged: bool,
}

impl AuthorityLink {
    pub fn new(reregister_interval_ms: Millis, stale_timeout_ms: Millis) -> Self {
        Self {
            reregister_interval_ms,
            stale_timeout_ms,
            last_contact: None,
            last_register: None,
            stale_handled: false,
            acknowledged: false,
        }
    }

    /// Any datagram from the authority.
    pub fn on_contact(&mut self, now: Millis) {
        self.last_contact = Some(self.last_contact.map_or(now, |t| t.max(now)));
        self.stale_handled = false;
    }

    pub fn on_ack(&mut self, now: Millis) {
        self.acknowledged = true;
        self.on_contact(now);
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn last_contact(&self) -> Option<Millis> {
        self.last_contact
    }

    /// No authority traffic within the stale timeout. A link that has never
    /// heard from the authority is stale once it has registered and waited.
    pub fn is_stale(&self, now: Millis) -> bool {
        let reference = match (self.last_contact, self.last_register) {
            (Some(contact), _) => contact,
            (None, Some(register)) => register,
            (None, None) => return true,
        };
        now.saturating_sub(reference) > self.stale_timeout_ms
    }

    /// Whether a REGISTER should go out at `now`. Records the send when it
    /// returns `true`.
    pub fn should_register(&mut self, now: Millis) -> bool {
        let due = match self.last_register {
            None => true,
            Some(last) => {
                if now.saturating_sub(last) >= self.reregister_interval_ms {
                    true
                } else if self.is_stale(now) && !self.stale_handled {
                    tracing::info!("Authority silent, re-registering early");
                    self.stale_handled = true;
                    true
                } else {
                    false
                }
            },
        };
        if due {
            self.last_register = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_immediately_then_on_interval() {
        let mut link = AuthorityLink::new(30_000, 10_000);
        assert!(link.should_register(0));
        link.on_contact(100);
        assert!(!link.should_register(5_000));
        link.on_contact(9_000);
        link.on_contact(18_000);
        link.on_contact(27_000);
        assert!(!link.should_register(29_999));
        assert!(link.should_register(30_000));
    }

    #[test]
    fn stale_link_reregisters_once_per_episode() {
        let mut link = AuthorityLink::new(30_000, 10_000);
        assert!(link.should_register(0));
        link.on_contact(1_000);
        assert!(!link.should_register(11_000));
        assert!(link.should_register(11_001));
        // Still silent: no storm of registrations.
        assert!(!link.should_register(15_000));
        assert!(!link.should_register(25_000));

        // Contact resumes, then lapses again: a new episode.
        link.on_contact(26_000);
        assert!(!link.should_register(30_000));
        assert!(link.should_register(36_001));
    }

    #[test]
    fn periodic_register_still_fires_while_stale() {
        let mut link = AuthorityLink::new(30_000, 10_000);
        assert!(link.should_register(0));
        assert!(link.should_register(10_001));
        assert!(!link.should_register(20_000));
        assert!(link.should_register(40_001));
    }

    #[test]
    fn staleness() {
        let mut link = AuthorityLink::new(30_000, 10_000);
        assert!(link.is_stale(0));
        link.on_ack(500);
        assert!(link.is_acknowledged());
        assert!(!link.is_stale(10_500));
        assert!(link.is_stale(10_501));
    }

    #[test]
    fn late_contact_does_not_rewind() {
        let mut link = AuthorityLink::new(30_000, 10_000);
        link.on_contact(5_000);
        link.on_contact(1_000);
        assert_eq!(link.last_contact(), Some(5_000));
    }
}
