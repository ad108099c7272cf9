//! Operator commands typed at the scoring station.

use irtag_core::clock::Millis;
use irtag_core::ledger::ScoreCategory;
use irtag_core::participant::ParticipantId;

pub const HELP: &str = "\
commands:
  start <ids> [secs]              start a match, e.g. `start 1,2 120`
  stop                            end the match early
  ready                           send a ready check
  reset                           return to idle and free all robots
  award <id> <category> <delta> [note...]
                                  categories: retrieval, steal, possession, manual
  remove <id>                     drop a participant from the roster
  status                          show the scoreboard
  export                          write the match report
  quit                            shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Start {
        participants: Vec<ParticipantId>,
        duration_ms: Option<Millis>,
    },
    Stop,
    ReadyCheck,
    Reset,
    Award {
        participant: ParticipantId,
        category: ScoreCategory,
        delta: i32,
        note: Option<String>,
    },
    Remove(ParticipantId),
    Status,
    Export,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command: {0} (try `help`)")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid participant id: {0}")]
    InvalidId(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("unknown score category: {0}")]
    InvalidCategory(String),
}

fn parse_id(s: &str) -> Result<ParticipantId, ConsoleError> {
    match s.trim().parse::<ParticipantId>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(ConsoleError::InvalidId(s.to_string())),
    }
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<OperatorCommand>, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let cmd = match head.to_ascii_lowercase().as_str() {
        "start" => {
            let ids = words.next().ok_or(ConsoleError::Usage("start <ids> [secs]"))?;
            let participants = ids
                .split(',')
                .filter(|s| !s.is_empty())
                .map(parse_id)
                .collect::<Result<Vec<_>, _>>()?;
            let duration_ms = match words.next() {
                Some(secs) => Some(
                    secs.parse::<Millis>()
                        .ok()
                        .and_then(|s| s.checked_mul(1_000))
                        .ok_or_else(|| ConsoleError::InvalidNumber(secs.to_string()))?,
                ),
                None => None,
            };
            OperatorCommand::Start {
                participants,
                duration_ms,
            }
        },
        "stop" | "end" => OperatorCommand::Stop,
        "ready" => OperatorCommand::ReadyCheck,
        "reset" => OperatorCommand::Reset,
        "award" => {
            const USAGE: &str = "award <id> <category> <delta> [note...]";
            let participant = parse_id(words.next().ok_or(ConsoleError::Usage(USAGE))?)?;
            let category = words.next().ok_or(ConsoleError::Usage(USAGE))?;
            let category = category
                .parse::<ScoreCategory>()
                .map_err(|_| ConsoleError::InvalidCategory(category.to_string()))?;
            let delta = words.next().ok_or(ConsoleError::Usage(USAGE))?;
            let delta = delta
                .parse::<i32>()
                .map_err(|_| ConsoleError::InvalidNumber(delta.to_string()))?;
            let note = words.collect::<Vec<_>>().join(" ");
            OperatorCommand::Award {
                participant,
                category,
                delta,
                note: (!note.is_empty()).then_some(note),
            }
        },
        "remove" => {
            let id = words.next().ok_or(ConsoleError::Usage("remove <id>"))?;
            OperatorCommand::Remove(parse_id(id)?)
        },
        "status" | "s" => OperatorCommand::Status,
        "export" => OperatorCommand::Export,
        "help" | "?" => OperatorCommand::Help,
        "quit" | "exit" => OperatorCommand::Quit,
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(cmd))
}
