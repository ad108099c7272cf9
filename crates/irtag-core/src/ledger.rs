use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Millis;
use crate::match_state::{Match, MatchPhase, MatchStateMachine};
use crate::participant::ParticipantId;

/// Why points were credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    Hit,
    ObjectiveRetrieval,
    ObjectiveSteal,
    PossessionBonus,
    Manual,
}

impl ScoreCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::ObjectiveRetrieval => "objective_retrieval",
            Self::ObjectiveSteal => "objective_steal",
            Self::PossessionBonus => "possession_bonus",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ScoreCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown score category: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for ScoreCategory {
    type Err = UnknownCategory;

    /// Accepts the wire names plus the short forms operators type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hit" => Ok(Self::Hit),
            "objective_retrieval" | "retrieval" => Ok(Self::ObjectiveRetrieval),
            "objective_steal" | "steal" => Ok(Self::ObjectiveSteal),
            "possession_bonus" | "possession" | "bonus" => Ok(Self::PossessionBonus),
            "manual" => Ok(Self::Manual),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// One credited (or, for corrections, debited) amount. Never retracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreAward {
    pub match_id: Uuid,
    pub participant: ParticipantId,
    pub category: ScoreCategory,
    pub delta: i32,
    pub timestamp: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A confirmed tag of one robot by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HitEvent {
    pub attacker: ParticipantId,
    pub victim: ParticipantId,
    /// Milliseconds into the match, as seen by the victim.
    pub match_time_ms: Millis,
    /// Victim's wall clock when the frame decoded.
    pub timestamp_ms: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreRejection {
    #[error("no match has been started")]
    NoMatch,
    #[error("match is not active")]
    NotActive,
    #[error("grace period has expired")]
    GraceExpired,
    #[error("participant {0} is not in the match")]
    NotParticipant(ParticipantId),
    #[error("self-hit by participant {0}")]
    SelfHit(ParticipantId),
    #[error("duplicate hit report")]
    Duplicate,
}

/// Result of an accepted hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    pub attacker: ParticipantId,
    pub victim: ParticipantId,
    pub points: i32,
}

/// Derived totals for one participant in one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub score: i64,
    pub kills: u32,
    pub deaths: u32,
}

/// Ranked row of a match's standings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub participant: ParticipantId,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct HitKey {
    match_id: Uuid,
    attacker: ParticipantId,
    victim: ParticipantId,
    timestamp_ms: Millis,
}

/// Append-only record of awards and hits, keyed by match id.
///
/// Totals are never stored; they are folded from the entries on demand, so
/// the order entries arrive in does not affect any total.
#[derive(Debug)]
pub struct ScoringLedger {
    points_per_hit: i32,
    allow_self_hits: bool,
    awards: Vec<ScoreAward>,
    hits: Vec<(Uuid, HitEvent)>,
    seen_hits: HashSet<HitKey>,
}

impl ScoringLedger {
    pub fn new(points_per_hit: i32, allow_self_hits: bool) -> Self {
        Self {
            points_per_hit,
            allow_self_hits,
            awards: Vec::new(),
            hits: Vec::new(),
            seen_hits: HashSet::new(),
        }
    }

    fn award_window<'a>(
        machine: &'a MatchStateMachine,
        at: Millis,
    ) -> Result<&'a Match, ScoreRejection> {
        let current = machine.current().ok_or(ScoreRejection::NoMatch)?;
        match machine.phase() {
            MatchPhase::Active => Ok(current),
            MatchPhase::Ended if machine.accepts_awards(at) => Ok(current),
            MatchPhase::Ended => Err(ScoreRejection::GraceExpired),
            MatchPhase::Idle | MatchPhase::ReadyCheck => Err(ScoreRejection::NotActive),
        }
    }

    /// Append a manual or objective award to the current match.
    pub fn award(
        &mut self,
        machine: &MatchStateMachine,
        participant: ParticipantId,
        category: ScoreCategory,
        delta: i32,
        timestamp: Millis,
        note: Option<String>,
    ) -> Result<&ScoreAward, ScoreRejection> {
        let current = Self::award_window(machine, timestamp)?;
        if !current.contains(participant) {
            return Err(ScoreRejection::NotParticipant(participant));
        }
        let award = ScoreAward {
            match_id: current.id,
            participant,
            category,
            delta,
            timestamp,
            note,
        };
        tracing::info!(
            participant,
            category = %category,
            delta,
            "Score award recorded"
        );
        self.awards.push(award);
        Ok(&self.awards[self.awards.len() - 1])
    }

    /// Score a hit received at `now`. Only an active match accepts hits.
    pub fn record_hit(
        &mut self,
        machine: &MatchStateMachine,
        hit: HitEvent,
        now: Millis,
    ) -> Result<HitOutcome, ScoreRejection> {
        let current = machine.current().ok_or(ScoreRejection::NoMatch)?;
        if !machine.accepts_hits(now) {
            return Err(ScoreRejection::NotActive);
        }
        if hit.attacker == hit.victim && !self.allow_self_hits {
            return Err(ScoreRejection::SelfHit(hit.attacker));
        }
        for id in [hit.attacker, hit.victim] {
            if !current.contains(id) {
                return Err(ScoreRejection::NotParticipant(id));
            }
        }
        let key = HitKey {
            match_id: current.id,
            attacker: hit.attacker,
            victim: hit.victim,
            timestamp_ms: hit.timestamp_ms,
        };
        if !self.seen_hits.insert(key) {
            return Err(ScoreRejection::Duplicate);
        }

        self.hits.push((current.id, hit));
        self.awards.push(ScoreAward {
            match_id: current.id,
            participant: hit.attacker,
            category: ScoreCategory::Hit,
            delta: self.points_per_hit,
            timestamp: hit.timestamp_ms,
            note: None,
        });
        tracing::info!(
            attacker = hit.attacker,
            victim = hit.victim,
            match_time_ms = hit.match_time_ms,
            "Hit scored"
        );
        Ok(HitOutcome {
            attacker: hit.attacker,
            victim: hit.victim,
            points: self.points_per_hit,
        })
    }

    pub fn tally(&self, match_id: Uuid, participant: ParticipantId) -> Tally {
        fold(
            self.awards
                .iter()
                .filter(|a| a.match_id == match_id && a.participant == participant),
            self.hits
                .iter()
                .filter(|(m, _)| *m == match_id)
                .map(|(_, h)| h),
            participant,
        )
    }

    /// Totals for every match participant plus anyone holding an award,
    /// best score first, ties broken by id.
    pub fn standings(&self, current: &Match) -> Vec<Standing> {
        let mut ids: Vec<ParticipantId> = current.participants.iter().copied().collect();
        for award in self.awards.iter().filter(|a| a.match_id == current.id) {
            if !ids.contains(&award.participant) {
                ids.push(award.participant);
            }
        }
        let mut standings: Vec<Standing> = ids
            .into_iter()
            .map(|participant| Standing {
                participant,
                tally: self.tally(current.id, participant),
            })
            .collect();
        standings.sort_by(|a, b| {
            b.tally
                .score
                .cmp(&a.tally.score)
                .then(a.participant.cmp(&b.participant))
        });
        standings
    }

    pub fn awards(&self, match_id: Uuid) -> impl Iterator<Item = &ScoreAward> {
        self.awards.iter().filter(move |a| a.match_id == match_id)
    }

    pub fn hits(&self, match_id: Uuid) -> impl Iterator<Item = &HitEvent> {
        self.hits
            .iter()
            .filter(move |(m, _)| *m == match_id)
            .map(|(_, h)| h)
    }
}

/// Sum awards and count hits for one participant, flooring the score at zero
/// after the whole sum.
pub fn fold<'a>(
    awards: impl Iterator<Item = &'a ScoreAward>,
    hits: impl Iterator<Item = &'a HitEvent>,
    participant: ParticipantId,
) -> Tally {
    let raw: i64 = awards.map(|a| i64::from(a.delta)).sum();
    let mut tally = Tally {
        score: raw.max(0),
        ..Tally::default()
    };
    for hit in hits {
        if hit.attacker == participant {
            tally.kills += 1;
        }
        if hit.victim == participant {
            tally.deaths += 1;
        }
    }
    tally
}

/// Per-participant totals across an arbitrary set of awards.
pub fn fold_all<'a>(
    awards: impl Iterator<Item = &'a ScoreAward>,
) -> BTreeMap<ParticipantId, i64> {
    let mut raw: BTreeMap<ParticipantId, i64> = BTreeMap::new();
    for award in awards {
        *raw.entry(award.participant).or_default() += i64::from(award.delta);
    }
    raw.into_iter().map(|(id, sum)| (id, sum.max(0))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(participants: &[ParticipantId]) -> MatchStateMachine {
        let mut machine = MatchStateMachine::new(60_000, 8);
        machine.start(participants, 120_000, 0, |_| true).unwrap();
        machine
    }

    fn hit(attacker: ParticipantId, victim: ParticipantId, at: Millis) -> HitEvent {
        HitEvent {
            attacker,
            victim,
            match_time_ms: at,
            timestamp_ms: at,
        }
    }

    #[test]
    fn hit_credits_attacker() {
        let machine = active(&[1, 2]);
        let mut ledger = ScoringLedger::new(100, false);
        let outcome = ledger.record_hit(&machine, hit(1, 2, 500), 500).unwrap();
        assert_eq!(outcome.points, 100);

        let id = machine.current().unwrap().id;
        assert_eq!(
            ledger.tally(id, 1),
            Tally {
                score: 100,
                kills: 1,
                deaths: 0
            }
        );
        assert_eq!(
            ledger.tally(id, 2),
            Tally {
                score: 0,
                kills: 0,
                deaths: 1
            }
        );
    }

    #[test]
    fn self_hit_never_scores() {
        let machine = active(&[1, 2]);
        let mut ledger = ScoringLedger::new(100, false);
        assert_eq!(
            ledger.record_hit(&machine, hit(2, 2, 10), 10),
            Err(ScoreRejection::SelfHit(2))
        );
        let id = machine.current().unwrap().id;
        assert_eq!(ledger.awards(id).count(), 0);
        assert_eq!(ledger.hits(id).count(), 0);
    }

    #[test]
    fn self_hit_allowed_by_rules() {
        let machine = active(&[1]);
        let mut ledger = ScoringLedger::new(10, true);
        assert!(ledger.record_hit(&machine, hit(1, 1, 10), 10).is_ok());
    }

    #[test]
    fn duplicate_hit_is_suppressed() {
        let machine = active(&[1, 2]);
        let mut ledger = ScoringLedger::new(100, false);
        ledger.record_hit(&machine, hit(1, 2, 700), 700).unwrap();
        assert_eq!(
            ledger.record_hit(&machine, hit(1, 2, 700), 900),
            Err(ScoreRejection::Duplicate)
        );
        // Same pair, later frame: a distinct hit.
        assert!(ledger.record_hit(&machine, hit(1, 2, 701), 901).is_ok());
        let id = machine.current().unwrap().id;
        assert_eq!(ledger.tally(id, 1).score, 200);
    }

    #[test]
    fn non_participants_rejected() {
        let machine = active(&[1, 2]);
        let mut ledger = ScoringLedger::new(100, false);
        assert_eq!(
            ledger.record_hit(&machine, hit(1, 3, 10), 10),
            Err(ScoreRejection::NotParticipant(3))
        );
        assert_eq!(
            ledger
                .award(&machine, 4, ScoreCategory::Manual, 5, 10, None)
                .unwrap_err(),
            ScoreRejection::NotParticipant(4)
        );
    }

    #[test]
    fn hits_rejected_outside_active_match() {
        let mut ledger = ScoringLedger::new(100, false);
        let mut machine = MatchStateMachine::new(60_000, 8);
        assert_eq!(
            ledger.record_hit(&machine, hit(1, 2, 0), 0),
            Err(ScoreRejection::NoMatch)
        );
        machine.start(&[1, 2], 1_000, 0, |_| true).unwrap();
        machine.tick(1_000);
        assert_eq!(
            ledger.record_hit(&machine, hit(1, 2, 999), 1_001),
            Err(ScoreRejection::NotActive)
        );
    }

    #[test]
    fn grace_boundary() {
        let mut ledger = ScoringLedger::new(100, false);
        let mut machine = MatchStateMachine::new(60_000, 8);
        machine.start(&[1, 2], 120_000, 0, |_| true).unwrap();
        machine.tick(120_000);
        let grace = machine.current().unwrap().grace_until.unwrap();
        assert_eq!(grace, 180_000);

        assert!(
            ledger
                .award(
                    &machine,
                    2,
                    ScoreCategory::ObjectiveRetrieval,
                    50,
                    grace - 1,
                    None
                )
                .is_ok()
        );
        assert_eq!(
            ledger
                .award(&machine, 2, ScoreCategory::ObjectiveRetrieval, 50, grace + 1, None)
                .unwrap_err(),
            ScoreRejection::GraceExpired
        );
    }

    #[test]
    fn corrections_floor_at_zero() {
        let machine = active(&[1]);
        let mut ledger = ScoringLedger::new(100, false);
        ledger
            .award(&machine, 1, ScoreCategory::PossessionBonus, 30, 1, None)
            .unwrap();
        ledger
            .award(
                &machine,
                1,
                ScoreCategory::Manual,
                -50,
                2,
                Some("penalty".into()),
            )
            .unwrap();
        let id = machine.current().unwrap().id;
        assert_eq!(ledger.tally(id, 1).score, 0);
        // Later credit folds over the full history, not the floored total.
        ledger
            .award(&machine, 1, ScoreCategory::Manual, 40, 3, None)
            .unwrap();
        assert_eq!(ledger.tally(id, 1).score, 20);
    }

    #[test]
    fn new_match_starts_from_zero() {
        let mut machine = active(&[1, 2]);
        let mut ledger = ScoringLedger::new(100, false);
        ledger.record_hit(&machine, hit(1, 2, 5), 5).unwrap();
        let first = machine.current().unwrap().id;
        machine.stop(10);
        machine.start(&[1, 2], 1_000, 20, |_| true).unwrap();
        let second = machine.current().unwrap().id;
        assert_eq!(ledger.tally(second, 1), Tally::default());
        assert_eq!(ledger.tally(first, 1).score, 100);
    }

    #[test]
    fn standings_ranked_by_score() {
        let machine = active(&[1, 2, 3]);
        let mut ledger = ScoringLedger::new(100, false);
        ledger.record_hit(&machine, hit(3, 1, 1), 1).unwrap();
        ledger.record_hit(&machine, hit(3, 2, 2), 2).unwrap();
        ledger.record_hit(&machine, hit(2, 1, 3), 3).unwrap();
        let standings = ledger.standings(machine.current().unwrap());
        let order: Vec<_> = standings.iter().map(|s| s.participant).collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert_eq!(standings[0].tally.kills, 2);
        assert_eq!(standings[2].tally.deaths, 2);
    }

    #[test]
    fn category_parsing() {
        assert_eq!(
            "retrieval".parse::<ScoreCategory>().unwrap(),
            ScoreCategory::ObjectiveRetrieval
        );
        assert_eq!(
            "STEAL".parse::<ScoreCategory>().unwrap(),
            ScoreCategory::ObjectiveSteal
        );
        assert!("bogus".parse::<ScoreCategory>().is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_award() -> impl Strategy<Value = ScoreAward> {
            (1u8..=4, -200i32..=300, 0u64..100_000).prop_map(|(participant, delta, timestamp)| {
                ScoreAward {
                    match_id: Uuid::nil(),
                    participant,
                    category: ScoreCategory::Manual,
                    delta,
                    timestamp,
                    note: None,
                }
            })
        }

        proptest! {
            #[test]
            fn fold_is_order_independent(
                (original, shuffled) in prop::collection::vec(arb_award(), 0..40)
                    .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
            ) {
                prop_assert_eq!(fold_all(original.iter()), fold_all(shuffled.iter()));
                for id in 1u8..=4 {
                    let a = fold(original.iter().filter(|x| x.participant == id), std::iter::empty(), id);
                    let b = fold(shuffled.iter().filter(|x| x.participant == id), std::iter::empty(), id);
                    prop_assert_eq!(a, b);
                }
            }

            #[test]
            fn hit_order_does_not_change_standings(
                hits in prop::collection::vec((1u8..=3, 1u8..=3, 0u64..50_000), 0..30)
                    .prop_shuffle()
            ) {
                let machine = active(&[1, 2, 3]);
                let mut forward = ScoringLedger::new(100, false);
                let mut backward = ScoringLedger::new(100, false);
                for &(a, v, t) in &hits {
                    let _ = forward.record_hit(&machine, hit(a, v, t), 1);
                }
                for &(a, v, t) in hits.iter().rev() {
                    let _ = backward.record_hit(&machine, hit(a, v, t), 1);
                }
                let current = machine.current().unwrap();
                prop_assert_eq!(forward.standings(current), backward.standings(current));
            }
        }
    }
}
