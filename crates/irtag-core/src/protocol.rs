use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Millis;
use crate::ledger::{HitEvent, ScoreCategory};
use crate::participant::{ParticipantId, Registration};

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Every message exchanged between the authority and the robots.
///
/// On the wire each message is one JSON object in one datagram, with the
/// variant name in a `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Register(Registration),
    RegisterAck {
        id: ParticipantId,
    },
    Discovery {
        authority_port: u16,
        timestamp_ms: Millis,
    },
    DiscoveryResponse(Registration),
    /// `id` is present on robot heartbeats and absent on the authority's.
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<ParticipantId>,
        timestamp_ms: Millis,
    },
    ReadyCheck,
    ReadyStatus {
        id: ParticipantId,
        ready: bool,
    },
    MatchStart {
        match_id: Uuid,
        duration_ms: Millis,
    },
    MatchEnd {
        match_id: Uuid,
    },
    MatchReset,
    HitReport(HitEvent),
    ScoreUpdate {
        total: i64,
        kills: u32,
        deaths: u32,
    },
    ManualAward {
        participant: ParticipantId,
        category: ScoreCategory,
        delta: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Ping {
        id: ParticipantId,
        timestamp_ms: Millis,
    },
    Pong {
        id: ParticipantId,
        timestamp_ms: Millis,
    },
}

const MESSAGE_TYPES: &[&str] = &[
    "REGISTER",
    "REGISTER_ACK",
    "DISCOVERY",
    "DISCOVERY_RESPONSE",
    "HEARTBEAT",
    "READY_CHECK",
    "READY_STATUS",
    "MATCH_START",
    "MATCH_END",
    "MATCH_RESET",
    "HIT_REPORT",
    "SCORE_UPDATE",
    "MANUAL_AWARD",
    "PING",
    "PONG",
];

impl Message {
    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "REGISTER",
            Self::RegisterAck { .. } => "REGISTER_ACK",
            Self::Discovery { .. } => "DISCOVERY",
            Self::DiscoveryResponse(_) => "DISCOVERY_RESPONSE",
            Self::Heartbeat { .. } => "HEARTBEAT",
            Self::ReadyCheck => "READY_CHECK",
            Self::ReadyStatus { .. } => "READY_STATUS",
            Self::MatchStart { .. } => "MATCH_START",
            Self::MatchEnd { .. } => "MATCH_END",
            Self::MatchReset => "MATCH_RESET",
            Self::HitReport(_) => "HIT_REPORT",
            Self::ScoreUpdate { .. } => "SCORE_UPDATE",
            Self::ManualAward { .. } => "MANUAL_AWARD",
            Self::Ping { .. } => "PING",
            Self::Pong { .. } => "PONG",
        }
    }

    /// The participant a robot-originated message speaks for, if it names
    /// one. Used to refresh liveness before dispatch.
    pub fn sender_id(&self) -> Option<ParticipantId> {
        match self {
            Self::Register(reg) | Self::DiscoveryResponse(reg) => Some(reg.id),
            Self::Heartbeat { id, .. } => *id,
            Self::ReadyStatus { id, .. } | Self::Ping { id, .. } | Self::Pong { id, .. } => {
                Some(*id)
            },
            Self::HitReport(hit) => Some(hit.victim),
            _ => None,
        }
    }

    /// Control messages are retried until superseded.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::MatchStart { .. } | Self::MatchEnd { .. } | Self::MatchReset
        )
    }

    fn carried_ids(&self) -> Vec<ParticipantId> {
        match self {
            Self::Register(reg) | Self::DiscoveryResponse(reg) => vec![reg.id],
            Self::RegisterAck { id }
            | Self::ReadyStatus { id, .. }
            | Self::Ping { id, .. }
            | Self::Pong { id, .. } => vec![*id],
            Self::Heartbeat { id, .. } => id.iter().copied().collect(),
            Self::HitReport(hit) => vec![hit.attacker, hit.victim],
            Self::ManualAward { participant, .. } => vec![*participant],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram too large: {0} bytes (max {MAX_DATAGRAM_SIZE})")]
    TooLarge(usize),
    #[error("datagram is not a JSON object: {0}")]
    Unparseable(String),
    #[error("missing message type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("participant id 0 is reserved")]
    ReservedId,
    #[error("serialize error: {0}")]
    Serialize(String),
}

/// Serialize a message into one datagram.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(msg).map_err(|e| ProtocolError::Serialize(e.to_string()))?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Parse and validate one received datagram.
pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }

    let value: serde_json::Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::Unparseable(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(ProtocolError::Unparseable("expected an object".to_string()));
    };
    let kind = object
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?;
    if !MESSAGE_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }
    let kind = kind.to_string();

    let msg: Message = serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        kind,
        reason: e.to_string(),
    })?;
    if msg.carried_ids().contains(&0) {
        return Err(ProtocolError::ReservedId);
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration {
            id: 3,
            name: "Team Three".to_string(),
            robot_name: "Tank".to_string(),
            reply_port: 6003,
        }
    }

    #[test]
    fn wire_shape_uses_type_tag() {
        let bytes = encode_message(&Message::Register(registration())).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "REGISTER");
        assert_eq!(value["id"], 3);
        assert_eq!(value["reply_port"], 6003);

        let bytes = encode_message(&Message::MatchReset).unwrap();
        assert_eq!(bytes, br#"{"type":"MATCH_RESET"}"#);
    }

    #[test]
    fn authority_heartbeat_omits_id() {
        let bytes = encode_message(&Message::Heartbeat {
            id: None,
            timestamp_ms: 5,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(
            decode_message(&bytes).unwrap(),
            Message::Heartbeat {
                id: None,
                timestamp_ms: 5
            }
        );
    }

    #[test]
    fn decodes_hand_written_datagrams() {
        let msg = decode_message(
            br#"{"type":"HIT_REPORT","attacker":1,"victim":2,"match_time_ms":1500,"timestamp_ms":99}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::HitReport(HitEvent {
                attacker: 1,
                victim: 2,
                match_time_ms: 1500,
                timestamp_ms: 99,
            })
        );
        assert_eq!(msg.sender_id(), Some(2));

        let msg = decode_message(
            br#"{"type":"MANUAL_AWARD","participant":2,"category":"objective_retrieval","delta":50}"#,
        )
        .unwrap();
        assert!(matches!(msg, Message::ManualAward { note: None, .. }));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(decode_message(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn rejects_oversize() {
        let data = vec![b' '; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            decode_message(&data),
            Err(ProtocolError::TooLarge(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_message(b"\xff\x00garbage"),
            Err(ProtocolError::Unparseable(_))
        ));
        assert!(matches!(
            decode_message(b"[1,2,3]"),
            Err(ProtocolError::Unparseable(_))
        ));
        assert!(matches!(
            decode_message(br#"{"id":1}"#),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = decode_message(br#"{"type":"SELF_DESTRUCT"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "SELF_DESTRUCT"));
    }

    #[test]
    fn rejects_missing_field() {
        let err = decode_message(br#"{"type":"READY_STATUS","id":2}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { ref kind, .. } if kind == "READY_STATUS"));
    }

    #[test]
    fn rejects_reserved_id() {
        let err = decode_message(br#"{"type":"PING","id":0,"timestamp_ms":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::ReservedId));
        let err = decode_message(
            br#"{"type":"HIT_REPORT","attacker":0,"victim":2,"match_time_ms":1,"timestamp_ms":1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::ReservedId));
    }

    #[test]
    fn rejects_id_out_of_range() {
        let err = decode_message(br#"{"type":"REGISTER_ACK","id":300}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn control_messages() {
        assert!(
            Message::MatchStart {
                match_id: Uuid::nil(),
                duration_ms: 1
            }
            .is_control()
        );
        assert!(Message::MatchReset.is_control());
        assert!(!Message::ReadyCheck.is_control());
    }

    #[test]
    fn kind_matches_wire_tag() {
        let messages = [
            Message::DiscoveryResponse(registration()),
            Message::ReadyCheck,
            Message::ScoreUpdate {
                total: 300,
                kills: 3,
                deaths: 1,
            },
        ];
        for msg in messages {
            let bytes = encode_message(&msg).unwrap();
            let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value["type"], msg.kind());
            assert!(MESSAGE_TYPES.contains(&msg.kind()));
        }
    }
}
