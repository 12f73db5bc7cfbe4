//! Idempotent job registration.
//!
//! [`Registrar::ensure_scheduled`] makes the engine hold exactly one job and
//! one repeat-forever trigger at the requested interval. Triggers are never
//! edited in place: an interval change tears the old pair down and registers
//! a fresh one.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    Job, JobDataMap, JobDefinition, JobKey, JobListener, JobPolicy, SchedulerEngine,
    SchedulerError, Trigger, TriggerKey,
};

/// What [`Registrar::ensure_scheduled`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Nothing was registered before; job and trigger were created.
    Created,
    /// The existing trigger ran at a different interval and was replaced.
    Replaced { previous_interval_ms: u64 },
    /// Already registered at this interval; the engine was not touched.
    Unchanged,
}

/// Reconciles requested job schedules against a [`SchedulerEngine`].
///
/// Calls for the same job key must be serialized by the caller.
pub struct Registrar {
    engine: Arc<dyn SchedulerEngine>,
}

impl Registrar {
    pub fn new(engine: Arc<dyn SchedulerEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn SchedulerEngine> {
        &self.engine
    }

    /// Register `job` with the default job and trigger keys.
    pub async fn ensure_scheduled_default(
        &self,
        job: Arc<dyn Job>,
        data: Option<JobDataMap>,
        policy: &JobPolicy,
    ) -> Result<Registration, SchedulerError> {
        self.ensure_scheduled(
            job,
            &JobKey::default_key(),
            &TriggerKey::default_key(),
            data,
            None,
            policy,
        )
        .await
    }

    /// Make sure `job` runs every `policy.interval()` under the given keys.
    ///
    /// Engine errors are returned as-is and not retried.
    #[tracing::instrument(
        skip(self, job, data, listener, policy),
        fields(job = job.name(), interval = %policy.interval())
    )]
    pub async fn ensure_scheduled(
        &self,
        job: Arc<dyn Job>,
        job_key: &JobKey,
        trigger_key: &TriggerKey,
        data: Option<JobDataMap>,
        listener: Option<Arc<dyn JobListener>>,
        policy: &JobPolicy,
    ) -> Result<Registration, SchedulerError> {
        let desired_ms = policy.interval().to_millis()?;
        let definition = JobDefinition::from_policy(job, job_key.clone(), data, policy);

        let mut replaced = None;
        if let Some(existing) = self.engine.get_trigger(trigger_key).await? {
            let current_ms = existing.repeat_interval_ms();
            if current_ms != desired_ms {
                info!(
                    job_key = %job_key,
                    trigger_key = %trigger_key,
                    current_ms,
                    desired_ms,
                    "interval changed, tearing down existing schedule"
                );
                self.engine.pause_trigger(trigger_key).await?;
                self.engine.unschedule_job(trigger_key).await?;
                self.engine.delete_job(job_key).await?;
                replaced = Some(current_ms);
            }
        }

        if self.engine.check_exists(job_key).await? {
            debug!(job_key = %job_key, "job already scheduled at requested interval");
            return Ok(Registration::Unchanged);
        }

        let trigger = Trigger::repeat_forever(trigger_key.clone(), job_key.clone(), desired_ms);
        if let Some(listener) = listener {
            self.engine.add_job_listener(listener).await?;
        }
        self.engine.schedule_job(definition, trigger).await?;

        Ok(match replaced {
            Some(previous_interval_ms) => Registration::Replaced {
                previous_interval_ms,
            },
            None => Registration::Created,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{ConfigError, EngineError, IntervalSpec, JobContext, JobResult, MemoryEngine};

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn run(&self, _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    struct NamedListener;

    #[async_trait]
    impl JobListener for NamedListener {
        fn name(&self) -> &str {
            "named"
        }
    }

    /// Engine wrapper recording every call made through the trait.
    #[derive(Default)]
    struct RecordingEngine {
        inner: MemoryEngine,
        calls: Mutex<Vec<&'static str>>,
        fail_schedule: bool,
    }

    impl RecordingEngine {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn mutations(&self) -> Vec<&'static str> {
            self.calls()
                .into_iter()
                .filter(|c| !matches!(*c, "get_trigger" | "check_exists"))
                .collect()
        }

        fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl SchedulerEngine for RecordingEngine {
        async fn get_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>, EngineError> {
            self.record("get_trigger");
            self.inner.get_trigger(key).await
        }

        async fn check_exists(&self, key: &JobKey) -> Result<bool, EngineError> {
            self.record("check_exists");
            self.inner.check_exists(key).await
        }

        async fn pause_trigger(&self, key: &TriggerKey) -> Result<(), EngineError> {
            self.record("pause_trigger");
            self.inner.pause_trigger(key).await
        }

        async fn unschedule_job(&self, key: &TriggerKey) -> Result<bool, EngineError> {
            self.record("unschedule_job");
            self.inner.unschedule_job(key).await
        }

        async fn delete_job(&self, key: &JobKey) -> Result<bool, EngineError> {
            self.record("delete_job");
            self.inner.delete_job(key).await
        }

        async fn schedule_job(
            &self,
            job: JobDefinition,
            trigger: Trigger,
        ) -> Result<(), EngineError> {
            self.record("schedule_job");
            if self.fail_schedule {
                return Err(EngineError::Other("job store unavailable".into()));
            }
            self.inner.schedule_job(job, trigger).await
        }

        async fn add_job_listener(
            &self,
            listener: Arc<dyn JobListener>,
        ) -> Result<(), EngineError> {
            self.record("add_job_listener");
            self.inner.add_job_listener(listener).await
        }
    }

    fn policy(interval: IntervalSpec) -> JobPolicy {
        JobPolicy::builder()
            .description("sync feeds")
            .interval(interval)
            .build()
            .unwrap()
    }

    fn keys() -> (JobKey, TriggerKey) {
        (JobKey::new("jobA", "grpA"), TriggerKey::new("trigA", "grpA"))
    }

    #[tokio::test]
    async fn test_first_registration_creates() {
        let engine = Arc::new(RecordingEngine::default());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();

        let outcome = registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                None,
                &policy(IntervalSpec::minutes(5)),
            )
            .await
            .unwrap();

        assert_eq!(outcome, Registration::Created);
        assert_eq!(
            engine.calls(),
            vec!["get_trigger", "check_exists", "schedule_job"]
        );
        let trigger = engine.inner.get_trigger(&trigger_key).await.unwrap().unwrap();
        assert_eq!(trigger.repeat_interval_ms(), 300_000);
        assert_eq!(trigger.job_key, job_key);
    }

    #[tokio::test]
    async fn test_same_interval_is_idempotent() {
        let engine = Arc::new(RecordingEngine::default());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();
        let policy = policy(IntervalSpec::minutes(5));

        registrar
            .ensure_scheduled(Arc::new(Noop), &job_key, &trigger_key, None, None, &policy)
            .await
            .unwrap();
        engine.clear();

        let outcome = registrar
            .ensure_scheduled(Arc::new(Noop), &job_key, &trigger_key, None, None, &policy)
            .await
            .unwrap();

        assert_eq!(outcome, Registration::Unchanged);
        assert!(engine.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_changed_interval_tears_down_once_and_reschedules() {
        let engine = Arc::new(RecordingEngine::default());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();

        registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                None,
                &policy(IntervalSpec::minutes(5)),
            )
            .await
            .unwrap();
        engine.clear();

        let outcome = registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                None,
                &policy(IntervalSpec::hours(2)),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Registration::Replaced {
                previous_interval_ms: 300_000
            }
        );
        assert_eq!(
            engine.mutations(),
            vec!["pause_trigger", "unschedule_job", "delete_job", "schedule_job"]
        );
        let trigger = engine.inner.get_trigger(&trigger_key).await.unwrap().unwrap();
        assert_eq!(trigger.repeat_interval_ms(), 7_200_000);
        assert!(!engine.inner.is_paused(&trigger_key).await);
    }

    #[tokio::test]
    async fn test_equivalent_interval_in_other_unit_is_unchanged() {
        let engine = Arc::new(RecordingEngine::default());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();

        registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                None,
                &policy(IntervalSpec::minutes(60)),
            )
            .await
            .unwrap();

        let outcome = registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                None,
                &policy(IntervalSpec::hours(1)),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Registration::Unchanged);
    }

    #[tokio::test]
    async fn test_listener_attached_on_registration() {
        let engine = Arc::new(RecordingEngine::default());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();

        registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                Some(Arc::new(NamedListener)),
                &policy(IntervalSpec::seconds(30)),
            )
            .await
            .unwrap();

        assert_eq!(engine.inner.listener_count().await, 1);
        assert_eq!(
            engine.mutations(),
            vec!["add_job_listener", "schedule_job"]
        );
    }

    #[tokio::test]
    async fn test_payload_and_flags_reach_definition() {
        let engine = Arc::new(MemoryEngine::new());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();
        let mut data = JobDataMap::new();
        data.insert("endpoint".into(), serde_json::json!("https://example.test"));

        let policy = JobPolicy::builder()
            .should_recover(true)
            .durable(false)
            .interval(IntervalSpec::seconds(10))
            .build()
            .unwrap();
        registrar
            .ensure_scheduled(Arc::new(Noop), &job_key, &trigger_key, Some(data), None, &policy)
            .await
            .unwrap();

        assert_eq!(engine.job_keys().await, vec![job_key]);
        assert_eq!(engine.trigger_keys().await, vec![trigger_key]);
    }

    #[tokio::test]
    async fn test_invalid_interval_fails_before_engine_calls() {
        let engine = Arc::new(RecordingEngine::default());
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();

        // Bypass the builder's validation to reach the registrar's own check.
        let policy: JobPolicy = serde_json::from_value(serde_json::json!({
            "description": "broken",
            "should_recover": false,
            "durable": true,
            "interval": { "magnitude": 0, "unit": "seconds" }
        }))
        .unwrap();

        let err = registrar
            .ensure_scheduled(Arc::new(Noop), &job_key, &trigger_key, None, None, &policy)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::Configuration(ConfigError::InvalidInterval(_))
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_propagates() {
        let engine = Arc::new(RecordingEngine {
            fail_schedule: true,
            ..RecordingEngine::default()
        });
        let registrar = Registrar::new(engine.clone());
        let (job_key, trigger_key) = keys();

        let err = registrar
            .ensure_scheduled(
                Arc::new(Noop),
                &job_key,
                &trigger_key,
                None,
                None,
                &policy(IntervalSpec::seconds(30)),
            )
            .await
            .unwrap_err();

        match err {
            SchedulerError::Engine(EngineError::Other(message)) => {
                assert_eq!(message, "job store unavailable")
            }
            other => panic!("expected engine error, got {other:?}"),
        }
        // No local retry.
        assert_eq!(
            engine.calls().iter().filter(|c| **c == "schedule_job").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_default_keys() {
        let engine = Arc::new(MemoryEngine::new());
        let registrar = Registrar::new(engine.clone());

        let outcome = registrar
            .ensure_scheduled_default(Arc::new(Noop), None, &policy(IntervalSpec::hours(1)))
            .await
            .unwrap();

        assert_eq!(outcome, Registration::Created);
        assert!(engine.check_exists(&JobKey::default_key()).await.unwrap());
        assert!(
            engine
                .get_trigger(&TriggerKey::default_key())
                .await
                .unwrap()
                .is_some()
        );
    }
}
