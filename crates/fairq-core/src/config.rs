//! fairq.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::duration::parse_duration_secs;

/// Errors raised while loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("bad duration value: {0:?}")]
    BadDuration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which priority backend the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Full five-factor engine with the background decay loop.
    Multifactor,
    /// Trivial decrementing priority, no accounting.
    Decrement,
    /// One-shot assignment, no decay loop.
    Basic,
}

/// Accounting storage backend. Fairshare requires a queryable account
/// hierarchy, so it is disabled unless this is `State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountingStorage {
    /// The embedded state store holds the account hierarchy.
    State,
    /// No accounting backend; fairshare yields 0.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairqConfig {
    pub cluster: ClusterConfig,
    pub priority: PriorityConfig,
    pub accounting: AccountingConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    /// Total node count, used by the job-size factor.
    pub nodes: u32,
    /// Total processor count, used to size the cluster usage ceiling.
    pub procs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(rename = "type")]
    pub backend: BackendKind,
    /// Half-life of past usage, e.g. "7d". "0" disables decay.
    #[serde(default = "default_half_life")]
    pub decay_half_life: String,
    /// Interval between decay ticks, e.g. "5m".
    #[serde(default = "default_calc_period")]
    pub calc_period: String,
    /// Period between hard usage resets. "0" disables.
    #[serde(default = "default_zero")]
    pub usage_reset_period: String,
    /// Cap for the age factor, e.g. "7d".
    #[serde(default = "default_max_age")]
    pub max_age: String,
    /// Reward small jobs instead of large ones in the job-size factor.
    #[serde(default)]
    pub favor_small: bool,
    #[serde(default)]
    pub weight_age: u32,
    #[serde(default)]
    pub weight_fairshare: u32,
    #[serde(default)]
    pub weight_job_size: u32,
    #[serde(default)]
    pub weight_partition: u32,
    #[serde(default)]
    pub weight_qos: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    pub storage: AccountingStorage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for the state database and the decay clock file.
    pub save_location: PathBuf,
}

fn default_half_life() -> String {
    "7d".to_string()
}

fn default_calc_period() -> String {
    "5m".to_string()
}

fn default_max_age() -> String {
    "7d".to_string()
}

fn default_zero() -> String {
    "0".to_string()
}

impl FairqConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FairqConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the durations parse and the topology is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_duration_secs(&self.priority.decay_half_life)?;
        parse_duration_secs(&self.priority.usage_reset_period)?;
        parse_duration_secs(&self.priority.max_age)?;
        let period = parse_duration_secs(&self.priority.calc_period)?;
        if period == 0 {
            return Err(ConfigError::Invalid(
                "priority.calc_period must be non-zero".to_string(),
            ));
        }
        if self.cluster.nodes == 0 {
            return Err(ConfigError::Invalid(
                "cluster.nodes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether fairshare is usable: an accounting backend must be present.
    pub fn fairshare_enabled(&self) -> bool {
        self.accounting.storage == AccountingStorage::State
    }

    /// Effective fairshare weight: forced to 0 when fairshare is disabled.
    pub fn effective_weight_fairshare(&self) -> u32 {
        if self.fairshare_enabled() {
            self.priority.weight_fairshare
        } else {
            0
        }
    }

    pub fn half_life_secs(&self) -> u64 {
        parse_duration_secs(&self.priority.decay_half_life).unwrap_or(0)
    }

    pub fn calc_period_secs(&self) -> u64 {
        parse_duration_secs(&self.priority.calc_period).unwrap_or(300)
    }

    pub fn usage_reset_period_secs(&self) -> u64 {
        parse_duration_secs(&self.priority.usage_reset_period).unwrap_or(0)
    }

    pub fn max_age_secs(&self) -> u64 {
        parse_duration_secs(&self.priority.max_age).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[cluster]
name = "tide"
nodes = 12
procs = 96

[priority]
type = "multifactor"
decay_half_life = "1h"
calc_period = "5m"
usage_reset_period = "0"
max_age = "7d"
favor_small = false
weight_age = 1000
weight_fairshare = 10000
weight_job_size = 0
weight_partition = 1000
weight_qos = 1000

[accounting]
storage = "state"

[state]
save_location = "/var/lib/fairq"
"#;

    #[test]
    fn parse_full_config() {
        let config = FairqConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.priority.backend, BackendKind::Multifactor);
        assert_eq!(config.half_life_secs(), 3600);
        assert_eq!(config.calc_period_secs(), 300);
        assert_eq!(config.max_age_secs(), 604_800);
        assert_eq!(config.priority.weight_fairshare, 10_000);
        assert!(config.fairshare_enabled());
    }

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[cluster]
name = "mini"
nodes = 1
procs = 4

[priority]
type = "decrement"

[accounting]
storage = "none"

[state]
save_location = "/tmp/fairq"
"#;
        let config = FairqConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.priority.backend, BackendKind::Decrement);
        // Defaults kick in for the unspecified tuning keys.
        assert_eq!(config.half_life_secs(), 604_800);
        assert_eq!(config.priority.weight_age, 0);
        assert!(!config.fairshare_enabled());
    }

    #[test]
    fn no_accounting_forces_fairshare_weight_to_zero() {
        let mut config = FairqConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.effective_weight_fairshare(), 10_000);
        config.accounting.storage = AccountingStorage::None;
        assert_eq!(config.effective_weight_fairshare(), 0);
    }

    #[test]
    fn zero_calc_period_is_rejected() {
        let mut config = FairqConfig::from_toml_str(FULL).unwrap();
        config.priority.calc_period = "0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_nodes_is_rejected() {
        let mut config = FairqConfig::from_toml_str(FULL).unwrap();
        config.cluster.nodes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_duration_is_rejected() {
        let mut config = FairqConfig::from_toml_str(FULL).unwrap();
        config.priority.max_age = "sideways".to_string();
        assert!(config.validate().is_err());
    }
}
