//! Job and trigger identities.
//!
//! Jobs and triggers live in separate namespaces: a [`JobKey`] and a
//! [`TriggerKey`] with the same name and group never collide.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Group used when the caller does not supply one.
pub const DEFAULT_GROUP: &str = "recurrent";

/// Name prefix for derived job keys.
pub const JOB_KEY_PREFIX: &str = "job_";

/// Name prefix for derived trigger keys.
pub const TRIGGER_KEY_PREFIX: &str = "trigger_";

/// Unique key of a schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    name: String,
    group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Key derived from a task name: `job_<task>` in the default group.
    pub fn for_task(task: &str) -> Self {
        Self::new(format!("{JOB_KEY_PREFIX}{task}"), DEFAULT_GROUP)
    }

    /// Key used when a caller registers without naming the job.
    pub fn default_key() -> Self {
        Self::new(JOB_KEY_PREFIX, DEFAULT_GROUP)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Unique key of a firing schedule attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    name: String,
    group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Key derived from a task name: `trigger_<task>` in the default group.
    pub fn for_task(task: &str) -> Self {
        Self::new(format!("{TRIGGER_KEY_PREFIX}{task}"), DEFAULT_GROUP)
    }

    /// Key used when a caller registers without naming the trigger.
    pub fn default_key() -> Self {
        Self::new(TRIGGER_KEY_PREFIX, DEFAULT_GROUP)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}
