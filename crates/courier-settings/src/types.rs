//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file format
//! and `#[serde(default)]` so partial files only override what they name.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "database": { "path": "/var/lib/courier/courier.db" },
///   "runner": { "pollIntervalMs": 500, "maxAttempts": 20 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Event log and outbox database.
    pub database: DatabaseSettings,
    /// Event processing (agent invocation) settings.
    pub processor: ProcessorSettings,
    /// Outbox delivery worker settings.
    pub runner: RunnerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Reject values that would stall or break the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(SettingsError::InvalidValue("database.poolSize must be positive".into()));
        }
        if self.processor.agent_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "processor.agentTimeoutMs must be positive".into(),
            ));
        }
        if self.processor.stream_buffer_size == 0 {
            return Err(SettingsError::InvalidValue(
                "processor.streamBufferSize must be positive".into(),
            ));
        }
        if self.runner.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue("runner.pollIntervalMs must be positive".into()));
        }
        if self.runner.batch_size == 0 {
            return Err(SettingsError::InvalidValue("runner.batchSize must be positive".into()));
        }
        if self.runner.max_attempts == Some(0) {
            return Err(SettingsError::InvalidValue("runner.maxAttempts must be positive".into()));
        }
        Ok(())
    }
}

/// `SQLite` database settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file path. Empty means `~/.courier/courier.db`.
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: String::new(),
            pool_size: 8,
            busy_timeout_ms: 30_000,
        }
    }
}

/// Session processor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorSettings {
    /// Deadline for one agent invocation, in milliseconds.
    pub agent_timeout_ms: u64,
    /// Capacity of the agent output channel.
    pub stream_buffer_size: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            agent_timeout_ms: 30_000,
            stream_buffer_size: 64,
        }
    }
}

/// Effect runner settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerSettings {
    /// Interval between global outbox sweeps, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum effects fetched per sweep.
    pub batch_size: u32,
    /// Attempts before an undeliverable effect is failed. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 50,
            max_attempts: None,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = CourierSettings::default();
        assert_eq!(settings.database.pool_size, 8);
        assert_eq!(settings.processor.agent_timeout_ms, 30_000);
        assert_eq!(settings.runner.poll_interval_ms, 1_000);
        assert_eq!(settings.runner.batch_size, 50);
        assert!(settings.runner.max_attempts.is_none());
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(CourierSettings::default()).unwrap();
        assert!(json["processor"].get("agentTimeoutMs").is_some());
        assert!(json["runner"].get("pollIntervalMs").is_some());
        assert!(json["runner"]["maxAttempts"].is_null());
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let settings: CourierSettings =
            serde_json::from_str(r#"{"runner": {"batchSize": 5}}"#).unwrap();
        assert_eq!(settings.runner.batch_size, 5);
        assert_eq!(settings.runner.poll_interval_ms, 1_000);
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let mut settings = CourierSettings::default();
        settings.runner.batch_size = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_zero_max_attempts() {
        let mut settings = CourierSettings::default();
        settings.runner.max_attempts = Some(0);
        assert!(settings.validate().is_err());
    }
}
