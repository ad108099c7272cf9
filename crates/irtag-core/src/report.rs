use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Millis;
use crate::ledger::{HitEvent, ScoreAward};
use crate::match_state::MatchPhase;
use crate::participant::ParticipantId;

/// One ranked line of the final standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub rank: usize,
    pub id: ParticipantId,
    pub name: String,
    pub robot_name: String,
    pub score: i64,
    pub kills: u32,
    pub deaths: u32,
}

/// Everything recorded about one match, for export after play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub generated_at: Millis,
    pub match_id: Uuid,
    pub match_name: String,
    pub phase: MatchPhase,
    pub duration_ms: Millis,
    pub started_at: Millis,
    pub ended_at: Millis,
    pub standings: Vec<ReportRow>,
    pub hit_log: Vec<HitEvent>,
    pub awards: Vec<ScoreAward>,
}

impl MatchReport {
    /// Plain-text standings table.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "FINAL RESULTS: {} ({})", self.match_name, self.match_id);
        let _ = writeln!(out, "{:<5} {:<24} {:>8}  {:>7}", "RANK", "TEAM", "POINTS", "K/D");
        for row in &self.standings {
            let _ = writeln!(
                out,
                "{:<5} {:<24} {:>8}  {:>7}",
                format!("{}.", row.rank),
                row.name,
                row.score,
                format!("{}/{}", row.kills, row.deaths),
            );
        }
        let _ = writeln!(out, "{} hits recorded", self.hit_log.len());
        out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("no match to report")]
    NoMatch,
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Destination for finished match reports.
pub trait ReportSink: Send + Sync {
    /// Persist `report`, returning a description of where it went.
    fn write(&self, report: &MatchReport) -> Result<String, ReportError>;
}

/// Writes each report as pretty JSON into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(report: &MatchReport) -> String {
        format!("match_{}_{}.json", report.generated_at, report.match_id.simple())
    }
}

impl ReportSink for JsonFileSink {
    fn write(&self, report: &MatchReport) -> Result<String, ReportError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ReportError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(Self::file_name(report));
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Match report written");
        Ok(path.display().to_string())
    }
}
