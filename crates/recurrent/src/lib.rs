//! Recurring interval jobs with a transactional execution audit log.
//!
//! This crate provides:
//! - Idempotent registration of fixed-interval jobs against a scheduler engine
//! - Teardown and re-registration when a job's interval changes
//! - An execution wrapper that records each run's latest outcome per
//!   (job, trigger) pair without letting audit failures hide job failures

mod audit;
mod config;
mod engine;
mod error;
mod executor;
mod identity;
mod interval;
mod registrar;
mod types;

pub use audit::{AuditEntry, AuditStore, AuditTransaction, MemoryAuditStore, SqliteAuditStore};
pub use config::AuditStoreConfig;
pub use engine::{Job, JobContext, JobListener, JobResult, MemoryEngine, SchedulerEngine};
pub use error::{AuditError, ConfigError, EngineError, PARAMETER_ABNORMAL, SchedulerError};
pub use executor::{AuditedExecutor, ExecutionPhase, ExecutionReport};
pub use identity::{DEFAULT_GROUP, JOB_KEY_PREFIX, JobKey, TRIGGER_KEY_PREFIX, TriggerKey};
pub use interval::{IntervalSpec, IntervalUnit};
pub use registrar::{Registrar, Registration};
pub use types::{
    ExecState, ExecutionAuditRecord, JobDataMap, JobDefinition, JobPolicy, JobPolicyBuilder,
    MisfirePolicy, RepeatCount, Trigger,
};
