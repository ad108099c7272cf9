//! Coordination state for one robot.
//!
//! Owns the robot's weapon timers, its mirror of the match lifecycle and its
//! link to the authority. Every method takes the current time and returns
//! the messages to send to the authority; the caller does the sending.

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::ledger::HitEvent;
use crate::link::AuthorityLink;
use crate::match_state::{MatchMirror, MirrorPhase};
use crate::participant::{ParticipantId, Registration};
use crate::protocol::Message;
use crate::rules::CompetitionRules;
use crate::signal::{self, BurstAssembler};
use crate::weapon::{FireRejection, WeaponState, WeaponStatus};

/// Robot-side timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    pub reregister_interval_ms: Millis,
    pub stale_timeout_ms: Millis,
    pub hit_retry_interval_ms: Millis,
    /// Extra copies of a HIT_REPORT sent until the authority's score update
    /// shows it landed.
    pub hit_resends: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            reregister_interval_ms: 30_000,
            stale_timeout_ms: 10_000,
            hit_retry_interval_ms: 250,
            hit_resends: 4,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingHit {
    event: HitEvent,
    /// Deaths the authority reports once this hit is scored.
    expected_deaths: u32,
    remaining: u32,
    next_at: Millis,
}

/// Latest totals pushed by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreView {
    pub total: i64,
    pub kills: u32,
    pub deaths: u32,
}

/// Read-only flags for actuation and the robot's display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub id: ParticipantId,
    pub name: String,
    pub phase: MirrorPhase,
    pub remaining_ms: Millis,
    pub can_move: bool,
    pub ready: bool,
    pub weapon: WeaponStatus,
    pub score: ScoreView,
    pub authority_stale: bool,
    pub registered: bool,
    pub rejected_frames: u64,
    pub pending_hits: usize,
}

#[derive(Debug)]
pub struct Peer {
    identity: Registration,
    rules: CompetitionRules,
    settings: PeerSettings,
    weapon: WeaponState,
    mirror: MatchMirror,
    link: AuthorityLink,
    assembler: BurstAssembler,
    ready: bool,
    score: ScoreView,
    rejected_frames: u64,
    pending_hits: Vec<PendingHit>,
}

impl Peer {
    pub fn new(identity: Registration, rules: CompetitionRules, settings: PeerSettings) -> Self {
        Self {
            weapon: WeaponState::new(rules.weapon()),
            mirror: MatchMirror::new(),
            link: AuthorityLink::new(settings.reregister_interval_ms, settings.stale_timeout_ms),
            assembler: BurstAssembler::new(),
            ready: false,
            score: ScoreView::default(),
            rejected_frames: 0,
            pending_hits: Vec::new(),
            identity,
            rules,
            settings,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.identity.id
    }

    pub fn identity(&self) -> &Registration {
        &self.identity
    }

    pub fn mirror(&self) -> &MatchMirror {
        &self.mirror
    }

    pub fn score(&self) -> ScoreView {
        self.score
    }

    /// Apply one message from the authority.
    pub fn handle(&mut self, msg: Message, now: Millis) -> Vec<Message> {
        self.link.on_contact(now);
        match msg {
            Message::Discovery { .. } => {
                vec![Message::DiscoveryResponse(self.identity.clone())]
            },
            Message::RegisterAck { id } => {
                if id == self.identity.id {
                    if !self.link.is_acknowledged() {
                        tracing::info!(id, "Registered with authority");
                    }
                    self.link.on_ack(now);
                }
                Vec::new()
            },
            Message::Heartbeat { .. } => vec![self.heartbeat(now)],
            Message::ReadyCheck => vec![Message::ReadyStatus {
                id: self.identity.id,
                ready: self.ready,
            }],
            Message::MatchStart {
                match_id,
                duration_ms,
            } => {
                if self.mirror.on_start(match_id, duration_ms, now) {
                    tracing::info!(%match_id, duration_ms, "Match started");
                    self.weapon.reset();
                    self.score = ScoreView::default();
                    self.pending_hits.clear();
                    self.ready = false;
                }
                Vec::new()
            },
            Message::MatchEnd { match_id } => {
                if self.mirror.on_end(match_id, now) {
                    tracing::info!(%match_id, "Match ended");
                }
                Vec::new()
            },
            Message::MatchReset => {
                if self.mirror.phase() != MirrorPhase::Idle {
                    tracing::info!("Match reset, free movement");
                }
                self.mirror.on_reset();
                self.weapon.reset();
                self.pending_hits.clear();
                Vec::new()
            },
            Message::ScoreUpdate {
                total,
                kills,
                deaths,
            } => {
                self.score = ScoreView {
                    total,
                    kills,
                    deaths,
                };
                self.pending_hits.retain(|p| p.expected_deaths > deaths);
                Vec::new()
            },
            Message::Ping { timestamp_ms, .. } => vec![Message::Pong {
                id: self.identity.id,
                timestamp_ms,
            }],
            Message::Pong { .. } => Vec::new(),
            other => {
                tracing::debug!(kind = other.kind(), "Ignoring unexpected message");
                Vec::new()
            },
        }
    }

    fn check_phase(&self) -> Result<(), FireRejection> {
        if self.mirror.phase() == MirrorPhase::Ended {
            return Err(FireRejection::MatchOver);
        }
        Ok(())
    }

    /// Request a shot. On success returns the burst durations to emit.
    pub fn fire(&mut self, now: Millis) -> Result<Vec<u32>, FireRejection> {
        self.mirror.poll(now);
        self.check_phase()?;
        self.weapon.try_fire(now)?;
        Ok(signal::encode(self.identity.id))
    }

    /// Whether the drive may move at `now`. Free in Idle, gated by the
    /// disable window while active, locked after the match until reset.
    pub fn check_move(&self, now: Millis) -> Result<(), FireRejection> {
        self.check_phase()?;
        self.weapon.check_move(now)
    }

    /// A complete frame of burst durations seen by this robot's receiver.
    pub fn on_frame(&mut self, bursts: &[u32], now: Millis) -> Option<Message> {
        match signal::decode(bursts) {
            Ok(attacker) => self.on_decoded(attacker, now),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected IR frame");
                self.rejected_frames += 1;
                None
            },
        }
    }

    /// One raw burst observation, grouped into frames by silence gaps.
    pub fn on_burst(&mut self, duration_us: u32, at: Millis) -> Option<Message> {
        let attacker = self.assembler.push(duration_us, at)?;
        self.on_decoded(attacker, at)
    }

    fn on_decoded(&mut self, attacker: ParticipantId, now: Millis) -> Option<Message> {
        let victim = self.identity.id;
        if attacker == victim && !self.rules.allow_self_hits {
            tracing::debug!(attacker, "Ignoring own signal");
            return None;
        }
        self.mirror.poll(now);
        if !self.mirror.is_active(now) {
            tracing::debug!(attacker, "Hit outside an active match");
            return None;
        }
        let disabled_until = self.weapon.record_hit(now);
        tracing::info!(attacker, disabled_until, "Hit taken");
        let event = HitEvent {
            attacker,
            victim,
            match_time_ms: self.mirror.match_time(now),
            timestamp_ms: now,
        };
        if self.settings.hit_resends > 0 {
            let expected_deaths = self
                .pending_hits
                .last()
                .map_or(self.score.deaths, |p| p.expected_deaths)
                .saturating_add(1);
            self.pending_hits.push(PendingHit {
                event,
                expected_deaths,
                remaining: self.settings.hit_resends,
                next_at: now.saturating_add(self.settings.hit_retry_interval_ms),
            });
        }
        Some(Message::HitReport(event))
    }

    /// Copies of unconfirmed hit reports due at `now`. The authority drops
    /// the duplicates.
    fn resend_hits(&mut self, now: Millis, out: &mut Vec<Message>) {
        let interval_ms = self.settings.hit_retry_interval_ms;
        self.pending_hits.retain_mut(|pending| {
            if now < pending.next_at {
                return true;
            }
            out.push(Message::HitReport(pending.event));
            pending.remaining -= 1;
            pending.next_at = now.saturating_add(interval_ms);
            if pending.remaining == 0 {
                tracing::debug!(
                    attacker = pending.event.attacker,
                    "Giving up on unconfirmed hit report"
                );
            }
            pending.remaining > 0
        });
    }

    pub fn set_ready(&mut self, ready: bool) -> Message {
        self.ready = ready;
        Message::ReadyStatus {
            id: self.identity.id,
            ready,
        }
    }

    pub fn heartbeat(&self, now: Millis) -> Message {
        Message::Heartbeat {
            id: Some(self.identity.id),
            timestamp_ms: now,
        }
    }

    /// Periodic housekeeping: local match timer, (re-)registration and hit
    /// report resends.
    pub fn poll(&mut self, now: Millis) -> Vec<Message> {
        if self.mirror.poll(now) {
            tracing::info!("Local match timer expired");
        }
        let mut out = Vec::new();
        if self.link.should_register(now) {
            tracing::debug!(id = self.identity.id, "Sending registration");
            out.push(Message::Register(self.identity.clone()));
        }
        self.resend_hits(now, &mut out);
        out
    }

    pub fn status(&self, now: Millis) -> PeerStatus {
        PeerStatus {
            id: self.identity.id,
            name: self.identity.name.clone(),
            phase: self.mirror.phase(),
            remaining_ms: self.mirror.remaining(now),
            can_move: self.check_move(now).is_ok(),
            ready: self.ready,
            weapon: self.weapon.status(now),
            score: self.score,
            authority_stale: self.link.is_stale(now),
            registered: self.link.is_acknowledged(),
            rejected_frames: self.rejected_frames + self.assembler.rejected_frames(),
            pending_hits: self.pending_hits.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn peer(id: ParticipantId) -> Peer {
        Peer::new(
            Registration {
                id,
                name: format!("Team {id}"),
                robot_name: format!("Bot {id}"),
                reply_port: 6000 + id as u16,
            },
            CompetitionRules::default(),
            PeerSettings::default(),
        )
    }

    fn started(id: ParticipantId, now: Millis) -> (Peer, Uuid) {
        let mut p = peer(id);
        let match_id = Uuid::new_v4();
        p.handle(
            Message::MatchStart {
                match_id,
                duration_ms: 120_000,
            },
            now,
        );
        (p, match_id)
    }

    #[test]
    fn registers_on_first_poll() {
        let mut p = peer(2);
        let out = p.poll(0);
        assert!(matches!(out.as_slice(), [Message::Register(r)] if r.id == 2));
        assert!(p.poll(1).is_empty());
    }

    #[test]
    fn answers_discovery_and_ping() {
        let mut p = peer(2);
        let out = p.handle(
            Message::Discovery {
                authority_port: 6000,
                timestamp_ms: 0,
            },
            0,
        );
        assert!(matches!(out.as_slice(), [Message::DiscoveryResponse(r)] if r.id == 2));
        let out = p.handle(
            Message::Ping {
                id: 9,
                timestamp_ms: 42,
            },
            0,
        );
        assert_eq!(
            out,
            vec![Message::Pong {
                id: 2,
                timestamp_ms: 42
            }]
        );
    }

    #[test]
    fn ready_check_reports_flag() {
        let mut p = peer(4);
        p.set_ready(true);
        let out = p.handle(Message::ReadyCheck, 0);
        assert_eq!(out, vec![Message::ReadyStatus { id: 4, ready: true }]);
    }

    #[test]
    fn hit_disables_and_reports() {
        let (mut p, _) = started(2, 1_000);
        let report = p.on_frame(&signal::encode(1), 6_000).unwrap();
        assert_eq!(
            report,
            Message::HitReport(HitEvent {
                attacker: 1,
                victim: 2,
                match_time_ms: 5_000,
                timestamp_ms: 6_000,
            })
        );
        assert!(p.status(6_000).weapon.disabled);
        assert!(!p.status(6_000).can_move);
        assert!(matches!(
            p.fire(7_000),
            Err(FireRejection::Disabled { .. })
        ));
        assert!(p.fire(16_000).is_ok());
    }

    #[test]
    fn hit_report_is_resent_until_scored() {
        let (mut p, _) = started(2, 0);
        p.poll(0);
        let report = p.on_frame(&signal::encode(1), 1_000).unwrap();
        assert!(p.poll(1_100).is_empty());
        assert_eq!(p.poll(1_250), vec![report]);
        p.handle(
            Message::ScoreUpdate {
                total: 0,
                kills: 0,
                deaths: 1,
            },
            1_300,
        );
        assert!(p.poll(1_500).is_empty());
        assert_eq!(p.status(1_500).pending_hits, 0);
    }

    #[test]
    fn score_update_confirms_only_landed_hits() {
        let (mut p, _) = started(2, 0);
        p.poll(0);
        p.on_frame(&signal::encode(1), 1_000);
        p.on_frame(&signal::encode(3), 1_100);
        p.handle(
            Message::ScoreUpdate {
                total: 0,
                kills: 0,
                deaths: 1,
            },
            1_200,
        );
        let resent = p.poll(1_400);
        assert!(matches!(resent.as_slice(), [Message::HitReport(h)] if h.attacker == 3));
    }

    #[test]
    fn unanswered_hit_report_gives_up() {
        let (mut p, _) = started(2, 0);
        p.poll(0);
        p.on_frame(&signal::encode(1), 1_000);
        let resent: usize = (1..=10).map(|i| p.poll(1_000 + i * 250).len()).sum();
        assert_eq!(resent, 4);
        assert_eq!(p.status(4_000).pending_hits, 0);
    }

    #[test]
    fn own_signal_is_ignored() {
        let (mut p, _) = started(3, 0);
        assert!(p.on_frame(&signal::encode(3), 10).is_none());
        assert!(!p.status(10).weapon.disabled);
    }

    #[test]
    fn hits_outside_match_are_ignored() {
        let mut p = peer(3);
        assert!(p.on_frame(&signal::encode(1), 10).is_none());
        assert!(p.check_move(10).is_ok());
    }

    #[test]
    fn invalid_frame_counted() {
        let (mut p, _) = started(3, 0);
        let mut bursts = signal::encode(1);
        bursts[9] = 600;
        assert!(p.on_frame(&bursts, 10).is_none());
        assert_eq!(p.status(10).rejected_frames, 1);
    }

    #[test]
    fn bursts_assemble_into_hit() {
        let (mut p, _) = started(3, 0);
        let mut report = None;
        for (i, b) in signal::encode(5).into_iter().enumerate() {
            report = p.on_burst(b, 100 + i as Millis);
        }
        assert!(matches!(report, Some(Message::HitReport(h)) if h.attacker == 5));
    }

    #[test]
    fn fire_emits_own_frame_and_respects_cooldown() {
        let mut p = peer(6);
        assert_eq!(p.fire(0).unwrap(), signal::encode(6));
        assert!(matches!(
            p.fire(100),
            Err(FireRejection::CoolingDown { .. })
        ));
    }

    #[test]
    fn ended_match_locks_until_reset() {
        let (mut p, match_id) = started(2, 0);
        p.handle(Message::MatchEnd { match_id }, 50_000);
        assert_eq!(p.fire(50_001), Err(FireRejection::MatchOver));
        assert_eq!(p.check_move(50_001), Err(FireRejection::MatchOver));
        p.handle(Message::MatchReset, 60_000);
        assert!(p.check_move(60_001).is_ok());
    }

    #[test]
    fn local_timer_ends_match() {
        let (mut p, _) = started(2, 0);
        p.poll(120_000);
        assert_eq!(p.status(120_000).phase, MirrorPhase::Ended);
        assert!(p.on_frame(&signal::encode(1), 120_001).is_none());
    }

    #[test]
    fn duplicate_start_keeps_disable_window() {
        let (mut p, match_id) = started(2, 0);
        p.on_frame(&signal::encode(1), 1_000);
        p.handle(
            Message::MatchStart {
                match_id,
                duration_ms: 120_000,
            },
            1_500,
        );
        assert!(p.status(2_000).weapon.disabled);
    }

    #[test]
    fn score_update_is_stored() {
        let mut p = peer(2);
        p.handle(
            Message::ScoreUpdate {
                total: 300,
                kills: 3,
                deaths: 0,
            },
            0,
        );
        assert_eq!(p.score().total, 300);
    }
}
