//! The scheduler engine seam and an in-process registry behind it.
//!
//! [`SchedulerEngine`] is the narrow capability set the registrar needs from
//! whatever actually fires triggers. [`MemoryEngine`] keeps jobs and triggers
//! in memory and fires only when asked; it has no clock of its own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    AuditedExecutor, EngineError, JobDataMap, JobDefinition, JobKey, SchedulerError, Trigger,
    TriggerKey,
};

/// Result of one job body run.
pub type JobResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Everything a job sees about the firing that started it.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub fire_time: DateTime<Utc>,
    pub data: JobDataMap,
}

/// A unit of work run on every firing of its trigger.
#[async_trait]
pub trait Job: Send + Sync {
    /// Type name used in logs.
    fn name(&self) -> &str;

    async fn run(&self, ctx: &JobContext) -> JobResult;
}

/// Observer notified around every job execution.
#[async_trait]
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    async fn job_to_be_executed(&self, _ctx: &JobContext) {}

    /// `error` carries the job failure message, if any.
    async fn job_was_executed(&self, _ctx: &JobContext, _error: Option<&str>) {}
}

/// Capabilities consumed from the engine that fires jobs.
#[async_trait]
pub trait SchedulerEngine: Send + Sync {
    async fn get_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>, EngineError>;

    async fn check_exists(&self, key: &JobKey) -> Result<bool, EngineError>;

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<(), EngineError>;

    /// Remove a trigger. Returns whether it existed.
    async fn unschedule_job(&self, key: &TriggerKey) -> Result<bool, EngineError>;

    /// Remove a job and every trigger attached to it. Returns whether it existed.
    async fn delete_job(&self, key: &JobKey) -> Result<bool, EngineError>;

    /// Register a job and its trigger in one step.
    async fn schedule_job(&self, job: JobDefinition, trigger: Trigger) -> Result<(), EngineError>;

    async fn add_job_listener(&self, listener: Arc<dyn JobListener>) -> Result<(), EngineError>;
}

struct TriggerEntry {
    trigger: Trigger,
    paused: bool,
    previous_fire: Option<DateTime<Utc>>,
    next_fire: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EngineState {
    jobs: HashMap<JobKey, JobDefinition>,
    triggers: HashMap<TriggerKey, TriggerEntry>,
    listeners: Vec<Arc<dyn JobListener>>,
}

impl EngineState {
    fn has_triggers_for(&self, job_key: &JobKey) -> bool {
        self.triggers.values().any(|e| &e.trigger.job_key == job_key)
    }
}

/// In-memory [`SchedulerEngine`].
#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resume_trigger(&self, key: &TriggerKey) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let entry = state
            .triggers
            .get_mut(key)
            .ok_or_else(|| EngineError::NotFound(key.to_string()))?;
        entry.paused = false;
        Ok(())
    }

    pub async fn is_paused(&self, key: &TriggerKey) -> bool {
        self.state
            .read()
            .await
            .triggers
            .get(key)
            .is_some_and(|e| e.paused)
    }

    pub async fn job_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<_> = self.state.read().await.jobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn trigger_keys(&self) -> Vec<TriggerKey> {
        let mut keys: Vec<_> = self.state.read().await.triggers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn listener_count(&self) -> usize {
        self.state.read().await.listeners.len()
    }

    /// When the trigger fired last and when it fires next.
    pub async fn fire_times(
        &self,
        key: &TriggerKey,
    ) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        self.state
            .read()
            .await
            .triggers
            .get(key)
            .map(|e| (e.previous_fire, e.next_fire))
    }

    /// Fire a trigger now, running its job through `executor`.
    ///
    /// Returns the job's own failure, if any. Audit log problems are handled
    /// inside the executor and never show up here.
    #[tracing::instrument(skip(self, executor), fields(trigger_key = %key))]
    pub async fn fire(
        &self,
        key: &TriggerKey,
        executor: &AuditedExecutor,
    ) -> Result<(), SchedulerError> {
        let (definition, listeners) = {
            let state = self.state.read().await;
            let entry = state
                .triggers
                .get(key)
                .ok_or_else(|| EngineError::NotFound(key.to_string()))?;
            if entry.paused {
                return Err(EngineError::Paused(key.to_string()).into());
            }
            let definition = state
                .jobs
                .get(&entry.trigger.job_key)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(entry.trigger.job_key.to_string()))?;
            (definition, state.listeners.clone())
        };

        let fire_time = Utc::now();
        let ctx = JobContext {
            job_key: definition.key.clone(),
            trigger_key: key.clone(),
            fire_time,
            data: definition.data.clone(),
        };

        for listener in &listeners {
            listener.job_to_be_executed(&ctx).await;
        }

        let result = executor.execute(definition.job.as_ref(), &ctx).await;

        let message = result.as_ref().err().map(|e| e.to_string());
        for listener in &listeners {
            listener.job_was_executed(&ctx, message.as_deref()).await;
        }

        // The trigger may have been torn down while the job ran.
        if let Some(entry) = self.state.write().await.triggers.get_mut(key) {
            entry.previous_fire = Some(fire_time);
            entry.next_fire = entry.trigger.next_fire_after(fire_time);
            debug!(next_fire = ?entry.next_fire, "trigger fired");
        }

        result
    }
}

#[async_trait]
impl SchedulerEngine for MemoryEngine {
    async fn get_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>, EngineError> {
        Ok(self
            .state
            .read()
            .await
            .triggers
            .get(key)
            .map(|e| e.trigger.clone()))
    }

    async fn check_exists(&self, key: &JobKey) -> Result<bool, EngineError> {
        Ok(self.state.read().await.jobs.contains_key(key))
    }

    async fn pause_trigger(&self, key: &TriggerKey) -> Result<(), EngineError> {
        // Pausing an unknown trigger is a no-op.
        if let Some(entry) = self.state.write().await.triggers.get_mut(key) {
            entry.paused = true;
        }
        Ok(())
    }

    async fn unschedule_job(&self, key: &TriggerKey) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        let Some(entry) = state.triggers.remove(key) else {
            return Ok(false);
        };

        let job_key = entry.trigger.job_key;
        let orphaned = state
            .jobs
            .get(&job_key)
            .is_some_and(|job| !job.durable)
            && !state.has_triggers_for(&job_key);
        if orphaned {
            state.jobs.remove(&job_key);
            debug!(job_key = %job_key, "removed non-durable job with no triggers");
        }
        Ok(true)
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        state.triggers.retain(|_, e| &e.trigger.job_key != key);
        Ok(state.jobs.remove(key).is_some())
    }

    async fn schedule_job(&self, job: JobDefinition, trigger: Trigger) -> Result<(), EngineError> {
        if trigger.job_key != job.key {
            return Err(EngineError::Other(format!(
                "trigger {} points at {}, not {}",
                trigger.key, trigger.job_key, job.key
            )));
        }

        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.key) {
            return Err(EngineError::AlreadyExists(job.key.to_string()));
        }
        if state.triggers.contains_key(&trigger.key) {
            return Err(EngineError::AlreadyExists(trigger.key.to_string()));
        }

        info!(
            job_key = %job.key,
            trigger_key = %trigger.key,
            interval_ms = trigger.repeat_interval_ms,
            "scheduled job"
        );
        let next_fire = Some(trigger.start_at);
        state.jobs.insert(job.key.clone(), job);
        state.triggers.insert(
            trigger.key.clone(),
            TriggerEntry {
                trigger,
                paused: false,
                previous_fire: None,
                next_fire,
            },
        );
        Ok(())
    }

    async fn add_job_listener(&self, listener: Arc<dyn JobListener>) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        // Listener names are unique; re-adding replaces.
        state.listeners.retain(|l| l.name() != listener.name());
        state.listeners.push(listener);
        Ok(())
    }
}
