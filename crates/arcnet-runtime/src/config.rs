// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mesh configuration: typed TOML with semantic validation and advisory
//! warnings.
//!
//! A configuration that parses but cannot run (zero partitions, a
//! transfer section without credentials) fails validation at startup;
//! anything merely suspicious comes back as a warning for the operator
//! log.

use arcnet_bridge::{BridgeConfig, TransferCredentials};
use arcnet_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Semantic validation failed.
    #[error("config validation failed: {reasons:?}")]
    Validation {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// The transfer section is present but a credential is missing.
    /// Fatal at startup.
    #[error("missing transfer credential: {field}")]
    MissingCredential {
        /// Which credential field is empty.
        field: &'static str,
    },
}

/// Advisory issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The sweeper interval is long enough that crashed holders may
    /// pin nodes for a while.
    LongSweepInterval {
        /// Interval in seconds.
        secs: u64,
    },
    /// The extended classifier is enabled; routing is stricter.
    ExtendedClassifierEnabled,
    /// No journal directory: node history will not survive restart.
    NoJournal,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::LongSweepInterval { secs } => {
                write!(f, "sweep interval of {secs}s may pin crashed reservations")
            }
            ConfigWarning::ExtendedClassifierEnabled => {
                write!(f, "extended classifier factors are enabled")
            }
            ConfigWarning::NoJournal => {
                write!(f, "no journal path configured; history is in-memory only")
            }
        }
    }
}

/// Bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSection {
    /// Partitions per auto-created topic.
    pub partitions: u32,
}

impl Default for BusSection {
    fn default() -> Self {
        Self { partitions: 4 }
    }
}

/// State-tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSection {
    /// Journal file for the bitemporal store; in-memory when absent.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    /// Reservation sweeper interval in seconds.
    #[serde(default = "StateSection::default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl StateSection {
    fn default_sweep_secs() -> u64 {
        10
    }
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            journal_path: None,
            sweep_interval_secs: Self::default_sweep_secs(),
        }
    }
}

/// Transfer service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSection {
    /// Service base URL.
    pub base_url: String,
    /// Credentials for the client-credentials exchange.
    #[serde(flatten)]
    pub credentials: TransferCredentials,
}

/// Aggregator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorSection {
    /// Tick interval in seconds.
    pub interval_secs: u64,
}

impl Default for AggregatorSection {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

/// Top-level mesh configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Bus settings.
    #[serde(default)]
    pub bus: BusSection,
    /// State-tier settings.
    #[serde(default)]
    pub state: StateSection,
    /// Scheduler policy.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Bridge policy.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Transfer service connection; the bridge runs against a test
    /// double when absent.
    #[serde(default)]
    pub transfer: Option<TransferSection>,
    /// Aggregator settings.
    #[serde(default)]
    pub aggregator: AggregatorSection,
}

impl MeshConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<(Self, Vec<ConfigWarning>), ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        let warnings = config.validate()?;
        Ok((config, warnings))
    }

    /// Semantic validation. Returns advisory warnings on success.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        if self.bus.partitions == 0 {
            reasons.push("bus.partitions must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.scheduler.min_battery) {
            reasons.push(format!(
                "scheduler.min_battery {} outside [0, 1]",
                self.scheduler.min_battery
            ));
        }
        if self.scheduler.max_reserve_attempts == 0 {
            reasons.push("scheduler.max_reserve_attempts must be at least 1".to_string());
        }
        if self.bridge.initiate_attempts == 0 {
            reasons.push("bridge.initiate_attempts must be at least 1".to_string());
        }
        if self.aggregator.interval_secs == 0 {
            reasons.push("aggregator.interval_secs must be at least 1".to_string());
        }
        if self.state.sweep_interval_secs == 0 {
            reasons.push("state.sweep_interval_secs must be at least 1".to_string());
        }
        if !reasons.is_empty() {
            return Err(ConfigError::Validation { reasons });
        }

        if let Some(transfer) = &self.transfer {
            if transfer.base_url.is_empty() {
                return Err(ConfigError::MissingCredential { field: "base_url" });
            }
            if transfer.credentials.token_url.is_empty() {
                return Err(ConfigError::MissingCredential { field: "token_url" });
            }
            if transfer.credentials.client_id.is_empty() {
                return Err(ConfigError::MissingCredential { field: "client_id" });
            }
            if transfer.credentials.client_secret.is_empty() {
                return Err(ConfigError::MissingCredential {
                    field: "client_secret",
                });
            }
        }

        let mut warnings = Vec::new();
        if self.state.sweep_interval_secs > 60 {
            warnings.push(ConfigWarning::LongSweepInterval {
                secs: self.state.sweep_interval_secs,
            });
        }
        if self.bridge.classifier.extended {
            warnings.push(ConfigWarning::ExtendedClassifierEnabled);
        }
        if self.state.journal_path.is_none() {
            warnings.push(ConfigWarning::NoJournal);
        }
        Ok(warnings)
    }
}
