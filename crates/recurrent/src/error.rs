//! Error types for registration, the engine seam, and the audit log.

use thiserror::Error;

/// Error code carried by every parameter-abnormal configuration error.
pub const PARAMETER_ABNORMAL: i32 = -1001;

/// Top-level errors surfaced to callers of the registrar and executor.
///
/// Audit log failures are not represented here: the executor logs them and
/// direct store access returns [`AuditError`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid interval or setting.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The scheduler engine rejected a lookup, teardown or registration.
    #[error("scheduler engine error: {0}")]
    Engine(#[from] EngineError),

    /// A job body failed. Returned after the audit write has been attempted.
    #[error("job {job_key} failed: {message}")]
    JobExecution { job_key: String, message: String },
}

/// Parameter-abnormal configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Interval unit is not one of seconds, minutes, hours.
    #[error("the interval type is abnormal: {0:?}")]
    InvalidUnit(String),

    /// Interval magnitude is zero or overflows milliseconds.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// A configuration value could not be parsed.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl ConfigError {
    /// Numeric error code, shared by all variants.
    pub fn code(&self) -> i32 {
        PARAMETER_ABNORMAL
    }
}

/// Errors from a [`SchedulerEngine`](crate::SchedulerEngine) implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A job or trigger with this key is already registered.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No job or trigger with this key.
    #[error("not found: {0}")]
    NotFound(String),

    /// The trigger is paused and cannot fire.
    #[error("trigger is paused: {0}")]
    Paused(String),

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

/// Errors writing to or reading from the execution audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An insert or update touched a row count other than one.
    #[error("{operation} log error: expected 1 affected row, got {rows}")]
    UnexpectedRowCount { operation: &'static str, rows: usize },

    /// A stored execution state code has no matching variant.
    #[error("unknown execute status, {0}")]
    UnknownExecState(i64),

    /// A stored timestamp could not be parsed.
    #[error("invalid execute time {0:?}")]
    InvalidTimestamp(String),

    /// The store's connection lock was poisoned by a panicking writer.
    #[error("audit store lock poisoned")]
    LockPoisoned,

    /// Store-specific failure.
    #[error("{0}")]
    Store(String),
}
