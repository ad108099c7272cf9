use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use irtag_core::authority::AuthoritySettings;
use irtag_core::clock::Millis;
use irtag_core::rules::{CompetitionRules, RulesError};

/// Default config file, read from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "irtag-authority.toml";

/// Top-level authority configuration, loaded from `irtag-authority.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    pub listen_addr: String,
    /// Where DISCOVERY goes. Robots listen on 6000 + their id.
    pub discovery_targets: Vec<String>,
    pub report_dir: String,
    /// Write a report automatically whenever a match ends.
    pub auto_export: bool,
    pub timing: TimingConfig,
    pub rules: CompetitionRules,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6000".to_string(),
            discovery_targets: (1..=8)
                .map(|id| format!("255.255.255.255:{}", 6000 + id))
                .collect(),
            report_dir: "reports".to_string(),
            auto_export: true,
            timing: TimingConfig::default(),
            rules: CompetitionRules::default(),
        }
    }
}

/// Periodic work and liveness thresholds, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval_ms: Millis,
    pub discovery_interval_ms: Millis,
    /// Match timer, liveness sweep and retries run on this tick.
    pub tick_interval_ms: Millis,
    pub liveness_timeout_ms: Millis,
    pub retry_interval_ms: Millis,
    pub retry_resends: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_000,
            discovery_interval_ms: 5_000,
            tick_interval_ms: 100,
            liveness_timeout_ms: 10_000,
            retry_interval_ms: 250,
            retry_resends: 4,
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
    #[error("{0} must be > 0")]
    NotPositive(&'static str),
    #[error(transparent)]
    Rules(#[from] RulesError),
}

impl AuthorityConfig {
    /// Load from `IRTAG_AUTHORITY_CONFIG` or the default file, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("IRTAG_AUTHORITY_CONFIG")
            .ok()
            .filter(|p| !p.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a TOML file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str::<AuthorityConfig>(&content).map_err(|source| {
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

    /// Apply `IRTAG_*` overrides from `lookup`. Empty or unparseable values
    /// are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(addr) = get("IRTAG_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(targets) = get("IRTAG_DISCOVERY_TARGETS") {
            self.discovery_targets = targets
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(dir) = get("IRTAG_REPORT_DIR") {
            self.report_dir = dir;
        }
        if let Some(val) = get("IRTAG_POINTS_PER_HIT")
            && let Ok(n) = val.parse::<i32>()
        {
            self.rules.points_per_hit = n;
        }
        if let Some(val) = get("IRTAG_HIT_DISABLE_MS")
            && let Ok(n) = val.parse::<Millis>()
        {
            self.rules.hit_disable_ms = n;
        }
        if let Some(val) = get("IRTAG_MATCH_DURATION_MS")
            && let Ok(n) = val.parse::<Millis>()
        {
            self.rules.default_match_duration_ms = n;
        }
        if let Some(val) = get("IRTAG_LIVENESS_TIMEOUT_MS")
            && let Ok(n) = val.parse::<Millis>()
        {
            self.timing.liveness_timeout_ms = n;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_socket_addr()?;
        self.discovery_socket_addrs()?;
        let timing = &self.timing;
        for (name, value) in [
            ("timing.heartbeat_interval_ms", timing.heartbeat_interval_ms),
            ("timing.discovery_interval_ms", timing.discovery_interval_ms),
            ("timing.tick_interval_ms", timing.tick_interval_ms),
            ("timing.liveness_timeout_ms", timing.liveness_timeout_ms),
            ("timing.retry_interval_ms", timing.retry_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        if timing.liveness_timeout_ms <= timing.heartbeat_interval_ms {
            tracing::warn!(
                liveness_timeout_ms = timing.liveness_timeout_ms,
                heartbeat_interval_ms = timing.heartbeat_interval_ms,
                "Liveness timeout is not longer than the heartbeat interval"
            );
        }
        if self.discovery_targets.is_empty() {
            tracing::warn!("No discovery targets configured, robots must register on their own");
        }
        self.rules.validate()?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddr {
                field: "listen_addr",
                value: self.listen_addr.clone(),
            })
    }

    pub fn discovery_socket_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.discovery_targets
            .iter()
            .map(|t| {
                t.parse().map_err(|_| ConfigError::InvalidAddr {
                    field: "discovery_targets",
                    value: t.clone(),
                })
            })
            .collect()
    }

    /// Settings for the coordination context. `bound_port` is the port the
    /// socket actually bound, advertised in DISCOVERY.
    pub fn settings(&self, bound_port: u16) -> AuthoritySettings {
        AuthoritySettings {
            authority_port: bound_port,
            liveness_timeout_ms: self.timing.liveness_timeout_ms,
            retry_interval_ms: self.timing.retry_interval_ms,
            retry_resends: self.timing.retry_resends,
        }
    }
}
