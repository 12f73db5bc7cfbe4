//! Transactional execution wrapper.
//!
//! Every firing runs the job body, then records the outcome for its
//! (job key, trigger key) pair inside an audit transaction. A failing audit
//! write is rolled back and logged; it never replaces or hides the job's own
//! result, and a failing job is always reported back to the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::{
    AuditEntry, AuditError, AuditStore, AuditTransaction, ExecState, Job, JobContext,
    SchedulerError,
};

/// Where a single execution ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Start,
    Running,
    Succeeded,
    Failed,
    Logged,
    Committed,
    RolledBack,
}

/// What happened during one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub state: ExecState,
    pub error_message: Option<String>,
    /// `Committed` if the audit write landed, `RolledBack` otherwise.
    pub audit: ExecutionPhase,
}

/// Runs jobs and records their latest outcome in an [`AuditStore`].
#[derive(Clone)]
pub struct AuditedExecutor {
    store: Arc<dyn AuditStore>,
}

impl AuditedExecutor {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Run `job` for one firing.
    ///
    /// Returns [`SchedulerError::JobExecution`] if the body failed or
    /// panicked, after the audit write has been attempted. Audit failures
    /// are only logged.
    pub async fn execute(&self, job: &dyn Job, ctx: &JobContext) -> Result<(), SchedulerError> {
        let report = self.run_and_record(job, ctx).await;
        match report.error_message {
            Some(message) => Err(SchedulerError::JobExecution {
                job_key: ctx.job_key.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    /// Like [`execute`](Self::execute) but returns the full report instead of
    /// turning a job failure into an error.
    #[tracing::instrument(
        skip(self, job, ctx),
        fields(job = job.name(), job_key = %ctx.job_key, trigger_key = %ctx.trigger_key)
    )]
    pub async fn run_and_record(&self, job: &dyn Job, ctx: &JobContext) -> ExecutionReport {
        debug!(phase = ?ExecutionPhase::Start, "execution started");
        debug!(phase = ?ExecutionPhase::Running, "running job");

        let (state, error_message) = match AssertUnwindSafe(job.run(ctx)).catch_unwind().await {
            Ok(Ok(())) => (ExecState::Success, None),
            Ok(Err(e)) => (ExecState::Fail, Some(e.to_string())),
            Err(panic) => (ExecState::Fail, Some(panic_message(panic.as_ref()))),
        };

        match &error_message {
            None => debug!(phase = ?ExecutionPhase::Succeeded, "job succeeded"),
            Some(message) => warn!(phase = ?ExecutionPhase::Failed, error = %message, "job failed"),
        }

        let entry = AuditEntry {
            state,
            error_message: error_message.clone(),
            executed_at: Utc::now(),
        };
        let audit = self.record(
            &ctx.job_key.to_string(),
            &ctx.trigger_key.to_string(),
            &entry,
        );

        ExecutionReport {
            state,
            error_message,
            audit,
        }
    }

    /// Write the outcome in its own transaction. Never fails outward.
    fn record(&self, job_key: &str, trigger_key: &str, entry: &AuditEntry) -> ExecutionPhase {
        let mut tx = match self.store.begin() {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "failed to open audit transaction");
                return ExecutionPhase::RolledBack;
            }
        };

        if let Err(e) = write_entry(tx.as_mut(), job_key, trigger_key, entry) {
            if let Err(rollback) = tx.rollback() {
                error!(error = %rollback, "audit rollback failed");
            }
            error!(error = %e, "audit transaction rolled back due to an error");
            return ExecutionPhase::RolledBack;
        }
        debug!(phase = ?ExecutionPhase::Logged, "audit entry written");

        match tx.commit() {
            Ok(()) => ExecutionPhase::Committed,
            Err(e) => {
                error!(error = %e, "audit commit failed");
                ExecutionPhase::RolledBack
            }
        }
    }
}

/// Update the pair's row if it exists, insert otherwise. Exactly one row
/// must change either way.
fn write_entry(
    tx: &mut (dyn AuditTransaction + '_),
    job_key: &str,
    trigger_key: &str,
    entry: &AuditEntry,
) -> Result<(), AuditError> {
    let (operation, rows) = match tx.find_record_id(job_key, trigger_key)? {
        Some(id) => ("update", tx.update_record(id, entry)?),
        None => ("insert", tx.insert_record(job_key, trigger_key, entry)?),
    };
    if rows != 1 {
        return Err(AuditError::UnexpectedRowCount { operation, rows });
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}
