//! Bench console for a robot without its IR hardware attached.

pub const HELP: &str = "\
commands:
  fire                 request a shot and print the burst train
  move                 ask whether the drive may move
  ready | unready      answer the next ready check
  rx <us,us,...>       feed a received frame of burst durations
  rxb <us,us,...>      feed bursts one at a time, as a raw receiver does
  status               show match, weapon and score state
  quit                 shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotCommand {
    Fire,
    Move,
    Ready(bool),
    Receive(Vec<u32>),
    Bursts(Vec<u32>),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("unknown command: {0} (try `help`)")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid burst duration: {0}")]
    InvalidBurst(String),
}

fn parse_bursts<'a>(
    words: impl Iterator<Item = &'a str>,
    usage: &'static str,
) -> Result<Vec<u32>, ConsoleError> {
    let rest: Vec<&str> = words.collect();
    if rest.is_empty() {
        return Err(ConsoleError::Usage(usage));
    }
    rest.join(",")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| ConsoleError::InvalidBurst(s.to_string()))
        })
        .collect()
}

pub fn parse(line: &str) -> Result<Option<RobotCommand>, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let cmd = match head.to_ascii_lowercase().as_str() {
        "fire" | "f" => RobotCommand::Fire,
        "move" => RobotCommand::Move,
        "ready" => RobotCommand::Ready(true),
        "unready" => RobotCommand::Ready(false),
        "rx" => RobotCommand::Receive(parse_bursts(words, "rx <us,us,...>")?),
        "rxb" => RobotCommand::Bursts(parse_bursts(words, "rxb <us,us,...>")?),
        "status" | "s" => RobotCommand::Status,
        "help" | "?" => RobotCommand::Help,
        "quit" | "exit" => RobotCommand::Quit,
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(cmd))
}
