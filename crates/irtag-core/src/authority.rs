//! Coordination state for the scoring authority.
//!
//! [`Authority`] owns the roster, the match lifecycle, the ledger and the
//! control-message retries. It never touches a socket: every entry point
//! takes the current time and returns the datagrams the caller should send.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Millis;
use crate::ledger::{HitEvent, ScoreCategory, ScoreRejection, ScoringLedger, Tally};
use crate::match_state::{Match, MatchPhase, MatchStateMachine, StartError};
use crate::participant::{Participant, ParticipantId, ParticipantView, Registration};
use crate::protocol::Message;
use crate::registry::{RegisterOutcome, SessionRegistry};
use crate::report::{MatchReport, ReportError, ReportRow};
use crate::retry::RetryQueue;
use crate::rules::CompetitionRules;

/// Where an outbound datagram goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Endpoint(SocketAddr),
    /// Every configured discovery address.
    Discovery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: Target,
    pub message: Message,
}

impl Outbound {
    pub fn to(endpoint: SocketAddr, message: Message) -> Self {
        Self {
            target: Target::Endpoint(endpoint),
            message,
        }
    }
}

/// Authority-side timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthoritySettings {
    /// Port advertised in DISCOVERY.
    pub authority_port: u16,
    pub liveness_timeout_ms: Millis,
    pub retry_interval_ms: Millis,
    pub retry_resends: u32,
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        Self {
            authority_port: 6000,
            liveness_timeout_ms: 10_000,
            retry_interval_ms: 250,
            retry_resends: 4,
        }
    }
}

/// Read-only state for the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySnapshot {
    pub phase: MatchPhase,
    pub match_id: Option<Uuid>,
    pub match_name: Option<String>,
    pub remaining_ms: Millis,
    pub grace_remaining_ms: Millis,
    pub participants: Vec<ParticipantView>,
    pub hits: usize,
}

#[derive(Debug)]
pub struct Authority {
    rules: CompetitionRules,
    settings: AuthoritySettings,
    registry: SessionRegistry,
    machine: MatchStateMachine,
    ledger: ScoringLedger,
    retries: RetryQueue,
}

impl Authority {
    pub fn new(rules: CompetitionRules, settings: AuthoritySettings) -> Self {
        Self {
            registry: SessionRegistry::new(settings.liveness_timeout_ms),
            machine: MatchStateMachine::new(rules.grace_period_ms, rules.max_participants),
            ledger: ScoringLedger::new(rules.points_per_hit, rules.allow_self_hits),
            retries: RetryQueue::new(settings.retry_interval_ms, settings.retry_resends),
            rules,
            settings,
        }
    }

    pub fn rules(&self) -> &CompetitionRules {
        &self.rules
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn phase(&self) -> MatchPhase {
        self.machine.phase()
    }

    pub fn current_match(&self) -> Option<&Match> {
        self.machine.current()
    }

    /// Totals for `id` in the current (or last) match.
    pub fn tally(&self, id: ParticipantId) -> Tally {
        self.machine
            .current()
            .map(|m| self.ledger.tally(m.id, id))
            .unwrap_or_default()
    }

    fn send_to(&self, id: ParticipantId, message: Message) -> Option<Outbound> {
        let endpoint = self.registry.get(id)?.endpoint;
        Some(Outbound::to(endpoint, message))
    }

    fn send_control(
        &mut self,
        id: ParticipantId,
        message: Message,
        now: Millis,
        out: &mut Vec<Outbound>,
    ) {
        self.retries.schedule(id, message.clone(), now);
        out.extend(self.send_to(id, message));
    }

    fn score_update(&self, id: ParticipantId) -> Option<Outbound> {
        let tally = self.tally(id);
        self.send_to(
            id,
            Message::ScoreUpdate {
                total: tally.score,
                kills: tally.kills,
                deaths: tally.deaths,
            },
        )
    }

    /// Endpoint a robot should be answered on: the datagram's source address
    /// with the reply port it registered.
    fn reply_endpoint(&self, id: ParticipantId, from: SocketAddr) -> SocketAddr {
        match self.registry.get(id) {
            Some(p) => SocketAddr::new(from.ip(), p.endpoint.port()),
            None => from,
        }
    }

    /// Process one decoded datagram received from `from` at `now`.
    pub fn handle(&mut self, msg: Message, from: SocketAddr, now: Millis) -> Vec<Outbound> {
        let registers = matches!(msg, Message::Register(_) | Message::DiscoveryResponse(_));
        if !registers {
            match msg.sender_id() {
                Some(id) => {
                    let endpoint = self.reply_endpoint(id, from);
                    if !self.registry.touch(id, endpoint, now) {
                        tracing::debug!(
                            participant = id,
                            kind = msg.kind(),
                            "Message from unregistered participant"
                        );
                    }
                },
                None => {
                    self.registry.touch_endpoint(from, now);
                },
            }
        }

        match msg {
            Message::Register(reg) | Message::DiscoveryResponse(reg) => {
                self.on_register(&reg, from, now)
            },
            Message::Heartbeat { .. } | Message::Pong { .. } => Vec::new(),
            Message::ReadyStatus { id, ready } => {
                if self.registry.set_ready(id, ready) {
                    tracing::info!(participant = id, ready, "Ready status");
                }
                Vec::new()
            },
            Message::HitReport(hit) => self.on_hit(hit, now),
            Message::ManualAward {
                participant,
                category,
                delta,
                note,
            } => match self.manual_award(participant, category, delta, note, now) {
                Ok(out) => out,
                Err(e) => {
                    tracing::debug!(participant, error = %e, "Manual award rejected");
                    Vec::new()
                },
            },
            Message::Ping { id, timestamp_ms } => {
                let endpoint = self.reply_endpoint(id, from);
                vec![Outbound::to(endpoint, Message::Pong { id, timestamp_ms })]
            },
            other => {
                tracing::debug!(kind = other.kind(), %from, "Ignoring unexpected message");
                Vec::new()
            },
        }
    }

    fn on_register(&mut self, reg: &Registration, from: SocketAddr, now: Millis) -> Vec<Outbound> {
        let endpoint = SocketAddr::new(from.ip(), reg.reply_port);
        let outcome = self.registry.register(reg, endpoint, now);
        match outcome {
            RegisterOutcome::New => {
                tracing::info!(participant = reg.id, name = %reg.name, %endpoint, "Participant registered")
            },
            RegisterOutcome::Reconnected => {
                tracing::info!(participant = reg.id, %endpoint, "Participant reconnected")
            },
            RegisterOutcome::Refreshed => {},
        }

        let mut out = vec![Outbound::to(endpoint, Message::RegisterAck { id: reg.id })];
        // A rebooted robot may re-register before the sweep marks it offline.
        // Peers ignore MATCH_START for a match they already mirror.
        let catch_up = match (self.machine.phase(), self.machine.current()) {
            (MatchPhase::Active, Some(m)) if m.contains(reg.id) => Some(Message::MatchStart {
                match_id: m.id,
                duration_ms: m.remaining(now),
            }),
            _ => None,
        };
        if let Some(catch_up) = catch_up {
            if outcome == RegisterOutcome::Refreshed {
                out.push(Outbound::to(endpoint, catch_up));
            } else {
                self.send_control(reg.id, catch_up, now, &mut out);
            }
        }
        out.extend(self.score_update(reg.id));
        out
    }

    fn on_hit(&mut self, hit: HitEvent, now: Millis) -> Vec<Outbound> {
        match self.ledger.record_hit(&self.machine, hit, now) {
            Ok(outcome) => {
                let disabled_until = hit.timestamp_ms.saturating_add(self.rules.hit_disable_ms);
                if let Some(victim) = self.registry.get_mut(outcome.victim) {
                    victim.extend_disabled(disabled_until);
                }
                let mut out = Vec::new();
                out.extend(self.score_update(outcome.attacker));
                if outcome.victim != outcome.attacker {
                    out.extend(self.score_update(outcome.victim));
                }
                out
            },
            Err(e) => {
                tracing::debug!(
                    attacker = hit.attacker,
                    victim = hit.victim,
                    error = %e,
                    "Hit report rejected"
                );
                Vec::new()
            },
        }
    }

    /// DISCOVERY broadcast prompting every live robot to answer.
    pub fn discovery(&self, now: Millis) -> Vec<Outbound> {
        vec![Outbound {
            target: Target::Discovery,
            message: Message::Discovery {
                authority_port: self.settings.authority_port,
                timestamp_ms: now,
            },
        }]
    }

    /// Heartbeat to every online participant.
    pub fn heartbeat(&self, now: Millis) -> Vec<Outbound> {
        self.registry
            .iter()
            .filter(|p| p.online)
            .map(|p| {
                Outbound::to(
                    p.endpoint,
                    Message::Heartbeat {
                        id: None,
                        timestamp_ms: now,
                    },
                )
            })
            .collect()
    }

    /// Match timer, liveness sweep and due control retries.
    pub fn tick(&mut self, now: Millis) -> Vec<Outbound> {
        let mut out = Vec::new();
        if let Some(match_id) = self.machine.tick(now) {
            self.announce_end(match_id, now, &mut out);
        }
        for id in self.registry.sweep(now) {
            tracing::info!(participant = id, "Participant went offline");
        }
        for (id, message) in self.retries.due(now) {
            let message = self.refresh_start(message, now);
            out.extend(self.send_to(id, message));
        }
        out
    }

    /// A resent MATCH_START carries the time left, not the original length.
    fn refresh_start(&self, message: Message, now: Millis) -> Message {
        match (message, self.machine.current()) {
            (Message::MatchStart { match_id, .. }, Some(m))
                if m.id == match_id && self.machine.phase() == MatchPhase::Active =>
            {
                Message::MatchStart {
                    match_id,
                    duration_ms: m.remaining(now),
                }
            },
            (message, _) => message,
        }
    }

    fn announce_end(&mut self, match_id: Uuid, now: Millis, out: &mut Vec<Outbound>) {
        let participants: Vec<ParticipantId> = self
            .machine
            .current()
            .map(|m| m.participants.iter().copied().collect())
            .unwrap_or_default();
        for id in participants {
            self.send_control(id, Message::MatchEnd { match_id }, now, out);
            out.extend(self.score_update(id));
        }
    }

    /// Start a match over `participants`. `duration_ms` falls back to the
    /// configured default.
    pub fn start_match(
        &mut self,
        participants: &[ParticipantId],
        duration_ms: Option<Millis>,
        now: Millis,
    ) -> Result<Vec<Outbound>, StartError> {
        let duration_ms = duration_ms.unwrap_or(self.rules.default_match_duration_ms);
        let registry = &self.registry;
        let started = self
            .machine
            .start(participants, duration_ms, now, |id| registry.is_online(id))?;
        let match_id = started.id;
        let ids: Vec<ParticipantId> = started.participants.iter().copied().collect();

        self.registry.clear_ready();
        let mut out = Vec::new();
        for id in ids {
            self.send_control(
                id,
                Message::MatchStart {
                    match_id,
                    duration_ms,
                },
                now,
                &mut out,
            );
            out.extend(self.score_update(id));
        }
        Ok(out)
    }

    /// End the active match early. Returns `None` if no match is active.
    pub fn stop_match(&mut self, now: Millis) -> Option<Vec<Outbound>> {
        let match_id = self.machine.stop(now)?;
        let mut out = Vec::new();
        self.announce_end(match_id, now, &mut out);
        Some(out)
    }

    /// Ask every online robot whether it is ready.
    pub fn ready_check(&mut self) -> Result<Vec<Outbound>, StartError> {
        self.machine.begin_ready_check()?;
        self.registry.clear_ready();
        tracing::info!("Ready check started");
        let ids = self.registry.online_ids();
        Ok(ids
            .into_iter()
            .filter_map(|id| self.send_to(id, Message::ReadyCheck))
            .collect())
    }

    /// Return to Idle and release every robot to free movement.
    pub fn reset_match(&mut self, now: Millis) -> Vec<Outbound> {
        self.machine.reset(now);
        tracing::info!("Match reset");
        let ids: Vec<ParticipantId> = self.registry.iter().map(|p| p.id).collect();
        let mut out = Vec::new();
        for id in ids {
            self.send_control(id, Message::MatchReset, now, &mut out);
        }
        out
    }

    /// Administrative removal from the roster. Ledger entries are kept.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<Participant> {
        self.retries.cancel(id);
        let removed = self.registry.remove(id);
        if removed.is_some() {
            tracing::info!(participant = id, "Participant removed");
        }
        removed
    }

    pub fn manual_award(
        &mut self,
        participant: ParticipantId,
        category: ScoreCategory,
        delta: i32,
        note: Option<String>,
        now: Millis,
    ) -> Result<Vec<Outbound>, ScoreRejection> {
        self.ledger
            .award(&self.machine, participant, category, delta, now, note)?;
        Ok(self.score_update(participant).into_iter().collect())
    }

    pub fn snapshot(&self, now: Millis) -> AuthoritySnapshot {
        let current = self.machine.current();
        let phase = self.machine.phase();
        let participants = self
            .registry
            .iter()
            .map(|p| {
                let tally = self.tally(p.id);
                ParticipantView {
                    id: p.id,
                    name: p.name.clone(),
                    robot_name: p.robot_name.clone(),
                    endpoint: p.endpoint.to_string(),
                    online: p.online,
                    ready: p.ready,
                    disabled: p.is_disabled(now),
                    score: tally.score,
                    kills: tally.kills,
                    deaths: tally.deaths,
                }
            })
            .collect();
        AuthoritySnapshot {
            phase,
            match_id: current.map(|m| m.id),
            match_name: current.map(|m| m.name.clone()),
            remaining_ms: match (phase, current) {
                (MatchPhase::Active, Some(m)) => m.remaining(now),
                _ => 0,
            },
            grace_remaining_ms: match (phase, current) {
                (MatchPhase::Ended, Some(m)) => m
                    .grace_until
                    .map_or(0, |grace| grace.saturating_sub(now)),
                _ => 0,
            },
            participants,
            hits: current.map_or(0, |m| self.ledger.hits(m.id).count()),
        }
    }

    /// Export of the current (or last) match.
    pub fn report(&self, now: Millis) -> Result<MatchReport, ReportError> {
        let current = self.machine.current().ok_or(ReportError::NoMatch)?;
        let standings = self
            .ledger
            .standings(current)
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let (name, robot_name) = match self.registry.get(s.participant) {
                    Some(p) => (p.name.clone(), p.robot_name.clone()),
                    None => (format!("Team {}", s.participant), String::new()),
                };
                ReportRow {
                    rank: i + 1,
                    id: s.participant,
                    name,
                    robot_name,
                    score: s.tally.score,
                    kills: s.tally.kills,
                    deaths: s.tally.deaths,
                }
            })
            .collect();
        Ok(MatchReport {
            generated_at: now,
            match_id: current.id,
            match_name: current.name.clone(),
            phase: self.machine.phase(),
            duration_ms: current.duration_ms,
            started_at: current.started_at,
            ended_at: current.ended_at,
            standings,
            hit_log: self.ledger.hits(current.id).copied().collect(),
            awards: self.ledger.awards(current.id).cloned().collect(),
        })
    }
}
