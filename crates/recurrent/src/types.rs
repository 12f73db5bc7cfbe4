//! Job policies, definitions, triggers, and audit records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditError, ConfigError, IntervalSpec, IntervalUnit, Job, JobKey, TriggerKey};

/// Payload handed to a job on every firing.
pub type JobDataMap = serde_json::Map<String, serde_json::Value>;

/// Scheduling policy for one registration call.
///
/// Built once via [`JobPolicy::builder`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPolicy {
    description: String,
    should_recover: bool,
    durable: bool,
    interval: IntervalSpec,
}

impl JobPolicy {
    pub fn builder() -> JobPolicyBuilder {
        JobPolicyBuilder::default()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Re-fire the job if the engine crashed while it was running.
    pub fn should_recover(&self) -> bool {
        self.should_recover
    }

    /// Keep the job definition even when no trigger points at it.
    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn interval(&self) -> IntervalSpec {
        self.interval
    }
}

/// Builder for [`JobPolicy`].
#[derive(Debug, Clone)]
pub struct JobPolicyBuilder {
    description: String,
    should_recover: bool,
    durable: bool,
    interval: IntervalSpec,
}

impl Default for JobPolicyBuilder {
    fn default() -> Self {
        Self {
            description: "Default description".to_string(),
            should_recover: false,
            durable: true,
            interval: IntervalSpec::new(5, IntervalUnit::Hours),
        }
    }
}

impl JobPolicyBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn should_recover(mut self, should_recover: bool) -> Self {
        self.should_recover = should_recover;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn interval(mut self, interval: IntervalSpec) -> Self {
        self.interval = interval;
        self
    }

    /// Validate the interval and freeze the policy.
    pub fn build(self) -> Result<JobPolicy, ConfigError> {
        self.interval.to_millis()?;
        Ok(JobPolicy {
            description: self.description,
            should_recover: self.should_recover,
            durable: self.durable,
            interval: self.interval,
        })
    }
}

/// A job as registered with the engine.
#[derive(Clone)]
pub struct JobDefinition {
    pub key: JobKey,
    pub job: Arc<dyn Job>,
    pub description: String,
    pub should_recover: bool,
    pub durable: bool,
    pub data: JobDataMap,
}

impl JobDefinition {
    /// Assemble a definition from a policy. Does not touch any engine.
    pub fn from_policy(
        job: Arc<dyn Job>,
        key: JobKey,
        data: Option<JobDataMap>,
        policy: &JobPolicy,
    ) -> Self {
        Self {
            key,
            job,
            description: policy.description().to_string(),
            should_recover: policy.should_recover(),
            durable: policy.durable(),
            data: data.unwrap_or_default(),
        }
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("key", &self.key)
            .field("job", &self.job.name())
            .field("description", &self.description)
            .field("should_recover", &self.should_recover)
            .field("durable", &self.durable)
            .field("data", &self.data)
            .finish()
    }
}

/// How many times a trigger repeats after its first firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatCount {
    Forever,
    Times(u32),
}

/// What to do with firings missed while the engine was down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Skip to the next scheduled occurrence and keep the remaining repeat
    /// count. Missed firings are not backfilled.
    #[default]
    RescheduleNextWithRemainingCount,
}

/// A fixed-interval firing schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub start_at: DateTime<Utc>,
    pub repeat_interval_ms: u64,
    pub repeat: RepeatCount,
    pub misfire: MisfirePolicy,
}

impl Trigger {
    /// Trigger that starts now and repeats forever every `repeat_interval_ms`,
    /// skipping missed firings.
    pub fn repeat_forever(key: TriggerKey, job_key: JobKey, repeat_interval_ms: u64) -> Self {
        Self {
            key,
            job_key,
            start_at: Utc::now(),
            repeat_interval_ms,
            repeat: RepeatCount::Forever,
            misfire: MisfirePolicy::RescheduleNextWithRemainingCount,
        }
    }

    /// One-shot trigger that starts now and never repeats.
    pub fn once(key: TriggerKey, job_key: JobKey) -> Self {
        Self {
            key,
            job_key,
            start_at: Utc::now(),
            repeat_interval_ms: 0,
            repeat: RepeatCount::Times(0),
            misfire: MisfirePolicy::RescheduleNextWithRemainingCount,
        }
    }

    pub fn repeat_interval_ms(&self) -> u64 {
        self.repeat_interval_ms
    }

    /// First scheduled occurrence strictly after `after`.
    ///
    /// Occurrences sit on the grid `start_at + k * interval`; anything missed
    /// between the last firing and `after` is skipped. Returns `None` once a
    /// bounded trigger has used up its repeats, or when the next occurrence
    /// lies beyond the range of `DateTime<Utc>`.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if after < self.start_at {
            return Some(self.start_at);
        }
        let interval = i64::try_from(self.repeat_interval_ms).ok()?;
        if interval <= 0 {
            return None;
        }
        let elapsed = (after - self.start_at).num_milliseconds();
        let k = elapsed / interval + 1;
        if let RepeatCount::Times(times) = self.repeat {
            if k > i64::from(times) {
                return None;
            }
        }
        // Occurrences past the representable calendar never fire.
        let offset = Duration::try_milliseconds(k.checked_mul(interval)?)?;
        self.start_at.checked_add_signed(offset)
    }
}

/// Outcome of one job execution as stored in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecState {
    Fail,
    Success,
    /// Reserved; never written by the executor.
    Unknown,
}

impl ExecState {
    pub const fn code(self) -> i64 {
        match self {
            ExecState::Fail => 0,
            ExecState::Success => 1,
            ExecState::Unknown => -99,
        }
    }

    /// Decode a stored code. Unrecognized codes are an error, not `Unknown`.
    pub fn from_code(code: i64) -> Result<Self, AuditError> {
        match code {
            0 => Ok(ExecState::Fail),
            1 => Ok(ExecState::Success),
            -99 => Ok(ExecState::Unknown),
            other => Err(AuditError::UnknownExecState(other)),
        }
    }
}

/// Most recent outcome for one (job, trigger) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAuditRecord {
    pub id: i64,
    pub job_key: String,
    pub trigger_key: String,
    pub state: ExecState,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}
