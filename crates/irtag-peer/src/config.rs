use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use irtag_core::clock::Millis;
use irtag_core::participant::{ParticipantId, Registration, is_valid_id};
use irtag_core::peer::PeerSettings;
use irtag_core::rules::{CompetitionRules, RulesError};

pub const DEFAULT_CONFIG_FILE: &str = "irtag-peer.toml";

/// Top-level robot configuration, loaded from `irtag-peer.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub identity: IdentityConfig,
    /// Initial authority address. Replaced by whatever answers DISCOVERY.
    pub authority_addr: String,
    /// Defaults to `0.0.0.0:{6000 + id}`.
    pub listen_addr: Option<String>,
    pub timing: PeerTimingConfig,
    /// Must match the authority's rules for local disable windows to agree.
    pub rules: CompetitionRules,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            authority_addr: "127.0.0.1:6000".to_string(),
            listen_addr: None,
            timing: PeerTimingConfig::default(),
            rules: CompetitionRules::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub id: ParticipantId,
    pub name: String,
    pub robot_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Team 1".to_string(),
            robot_name: "Robot 1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerTimingConfig {
    pub heartbeat_interval_ms: Millis,
    /// Local match timer and registration checks.
    pub poll_interval_ms: Millis,
    pub reregister_interval_ms: Millis,
    /// Silence from the authority after which the link counts as stale.
    pub stale_timeout_ms: Millis,
    pub hit_retry_interval_ms: Millis,
    /// Resends of an unconfirmed HIT_REPORT. Zero sends each report once.
    pub hit_resends: u32,
}

impl Default for PeerTimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            poll_interval_ms: 100,
            reregister_interval_ms: 30_000,
            stale_timeout_ms: 10_000,
            hit_retry_interval_ms: 250,
            hit_resends: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddr { field: &'static str, value: String },
    #[error("participant id must be 1-255")]
    InvalidId,
    #[error("{0} must be > 0")]
    NotPositive(&'static str),
    #[error(transparent)]
    Rules(#[from] RulesError),
}

impl PeerConfig {
    /// Load from `IRTAG_PEER_CONFIG` or the default file, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("IRTAG_PEER_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str::<PeerConfig>(&content).map_err(|source| {
                    ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                tracing::info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Ok(Self::default())
            },
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(val) = get("IRTAG_PEER_ID")
            && let Ok(id) = val.parse::<ParticipantId>()
        {
            self.identity.id = id;
        }
        if let Some(name) = get("IRTAG_PEER_NAME") {
            self.identity.name = name;
        }
        if let Some(name) = get("IRTAG_ROBOT_NAME") {
            self.identity.robot_name = name;
        }
        if let Some(addr) = get("IRTAG_AUTHORITY_ADDR") {
            self.authority_addr = addr;
        }
        if let Some(addr) = get("IRTAG_PEER_LISTEN_ADDR") {
            self.listen_addr = Some(addr);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_id(self.identity.id) {
            return Err(ConfigError::InvalidId);
        }
        self.listen_socket_addr()?;
        self.authority_socket_addr()?;
        let timing = &self.timing;
        for (name, value) in [
            ("timing.heartbeat_interval_ms", timing.heartbeat_interval_ms),
            ("timing.poll_interval_ms", timing.poll_interval_ms),
            ("timing.reregister_interval_ms", timing.reregister_interval_ms),
            ("timing.stale_timeout_ms", timing.stale_timeout_ms),
            ("timing.hit_retry_interval_ms", timing.hit_retry_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        self.rules.validate()?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = match &self.listen_addr {
            Some(addr) => addr.clone(),
            None => format!("0.0.0.0:{}", 6000 + u16::from(self.identity.id)),
        };
        addr.parse().map_err(|_| ConfigError::InvalidAddr {
            field: "listen_addr",
            value: addr,
        })
    }

    pub fn authority_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.authority_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddr {
                field: "authority_addr",
                value: self.authority_addr.clone(),
            })
    }

    /// What this robot announces. `reply_port` is the port actually bound.
    pub fn registration(&self, reply_port: u16) -> Registration {
        Registration {
            id: self.identity.id,
            name: self.identity.name.clone(),
            robot_name: self.identity.robot_name.clone(),
            reply_port,
        }
    }

    pub fn settings(&self) -> PeerSettings {
        PeerSettings {
            reregister_interval_ms: self.timing.reregister_interval_ms,
            stale_timeout_ms: self.timing.stale_timeout_ms,
            hit_retry_interval_ms: self.timing.hit_retry_interval_ms,
            hit_resends: self.timing.hit_resends,
        }
    }
}
