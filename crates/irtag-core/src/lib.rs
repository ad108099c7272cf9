pub mod authority;
pub mod clock;
pub mod ledger;
pub mod link;
pub mod match_state;
pub mod participant;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod report;
pub mod retry;
pub mod rules;
pub mod signal;
pub mod weapon;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use crate::authority::{Authority, AuthoritySettings};
    use crate::clock::Millis;
    use crate::participant::{ParticipantId, Registration};
    use crate::protocol::Message;
    use crate::rules::CompetitionRules;

    pub use crate::clock::ManualClock;

    /// Registration for a test robot: "Team N" driving "Robot N", replying on
    /// port 6000 + N.
    pub fn registration(id: ParticipantId) -> Registration {
        Registration {
            id,
            name: format!("Team {id}"),
            robot_name: format!("Robot {id}"),
            reply_port: 6000 + u16::from(id),
        }
    }

    /// Loopback endpoint matching [`registration`].
    pub fn addr_for(id: ParticipantId) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6000 + u16::from(id))
    }

    /// An authority with default rules and the given robots registered at
    /// `now`.
    pub fn authority_with(ids: &[ParticipantId], now: Millis) -> Authority {
        let mut authority = Authority::new(CompetitionRules::default(), AuthoritySettings::default());
        for &id in ids {
            authority.handle(Message::Register(registration(id)), addr_for(id), now);
        }
        authority
    }
}
