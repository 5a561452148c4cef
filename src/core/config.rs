use crate::core::amount::Epoch;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid engine config: {0}")]
    Invalid(String),
}

/// Tunables for a [`RailLedger`](crate::ledger::engine::RailLedger).
///
/// Every field has a default, so a JSON document only needs to name the
/// values it overrides:
///
/// ```
/// use rail_engine::core::config::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "arbiter_timeout_ms": 500 }"#).unwrap();
/// assert_eq!(config.arbiter_timeout_ms, 500);
/// assert_eq!(config.arbiter_retries, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single arbiter call.
    pub arbiter_timeout_ms: u64,
    /// Additional attempts after a failed or timed-out arbiter call.
    pub arbiter_retries: u32,
    /// Longest lockup period any rail may carry.
    pub max_lockup_period: Epoch,
    /// Number of rail events retained by the in-memory journal.
    pub journal_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arbiter_timeout_ms: 2_000,
            arbiter_retries: 1,
            // One year of 30-second epochs.
            max_lockup_period: 2_880 * 365,
            journal_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arbiter_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "arbiter_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.journal_capacity == 0 {
            return Err(ConfigError::Invalid(
                "journal_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn arbiter_timeout(&self) -> Duration {
        Duration::from_millis(self.arbiter_timeout_ms)
    }
}
