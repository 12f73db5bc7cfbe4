//! Audit store configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Environment variable naming the SQLite database file.
pub const ENV_DATABASE_PATH: &str = "RECURRENT_AUDIT_DB";
/// Environment variable for the busy timeout in milliseconds.
pub const ENV_BUSY_TIMEOUT_MS: &str = "RECURRENT_AUDIT_BUSY_TIMEOUT_MS";
/// Environment variable toggling WAL journaling.
pub const ENV_WAL: &str = "RECURRENT_AUDIT_WAL";

/// Where and how the SQLite audit log is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditStoreConfig {
    pub database_path: PathBuf,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    pub wal: bool,
}

impl Default for AuditStoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("recurrent-audit.db"),
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

impl AuditStoreConfig {
    /// Defaults overridden by any `RECURRENT_AUDIT_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            if path.trim().is_empty() {
                return Err(invalid(ENV_DATABASE_PATH, "path is empty"));
            }
            config.database_path = PathBuf::from(path);
        }
        if let Some(timeout) = lookup(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|e| invalid(ENV_BUSY_TIMEOUT_MS, &format!("{e}")))?;
        }
        if let Some(wal) = lookup(ENV_WAL) {
            config.wal = parse_bool(&wal).map_err(|reason| invalid(ENV_WAL, &reason))?;
        }

        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Truthy: 1, true, yes, on. Falsy: 0, false, no, off, or empty.
fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("{other:?} is not a boolean switch")),
    }
}
