use std::path::{Path, PathBuf};

use plan_fabric::ChannelConfig;
use plan_records::{RecordConfig, WriteMode};
use plan_types::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Service configuration, usually loaded from TOML. Every section is optional.
///
/// ```toml
/// [records]
/// write_mode = "check-then-set"
///
/// [retry]
/// max_attempts = 3
///
/// [projector]
/// workers = 4
///
/// [store]
/// data_dir = "/var/lib/plans"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub records: RecordsConfig,
    pub retry: RetryPolicy,
    pub channel: ChannelConfig,
    pub projector: ProjectorConfig,
    pub dead_letter: DeadLetterConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    pub write_mode: WriteMode,
    pub enforce_unique_nested_ids: bool,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        let defaults = RecordConfig::default();
        Self {
            write_mode: defaults.write_mode,
            enforce_unique_nested_ids: defaults.enforce_unique_nested_ids,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Number of concurrent projection workers.
    pub workers: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Durable dead-letter log. Letters are kept in memory only when unset.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// One file per record under this directory. In-memory when unset.
    pub data_dir: Option<PathBuf>,
}

impl PlanConfig {
    pub fn from_file(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Settings handed to the record manager.
    pub fn record_config(&self) -> RecordConfig {
        RecordConfig {
            write_mode: self.records.write_mode,
            enforce_unique_nested_ids: self.records.enforce_unique_nested_ids,
            retry: self.retry,
        }
    }

    pub(crate) fn check(&self) -> SdkResult<()> {
        if self.projector.workers == 0 {
            return Err(SdkError::Config("projector.workers must be at least 1".into()));
        }
        if self.channel.max_delivery_attempts == 0 {
            return Err(SdkError::Config(
                "channel.max_delivery_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
