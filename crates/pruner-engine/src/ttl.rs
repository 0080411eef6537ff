//! TTL engine: schedule-then-delete for one finished run.
//!
//! The state machine is observable entirely on the object:
//!
//! 1. **Unmarked**: no `ttl-schedule-at` annotation. The effective TTL is
//!    resolved (annotation override first when the enforced level allows,
//!    then the policy store); absence or `-1` means the run is ignored.
//!    Otherwise `due_at = completed_at + ttl` is stamped on the run.
//! 2. **Scheduled**: stamp present. Before `due_at` the engine returns the
//!    typed requeue signal; the host re-enqueues after the delay. The stamp
//!    is never recomputed while present, so a policy change cannot move an
//!    existing deadline.
//! 3. **Expiring**: at or past `due_at` the run is deleted. A 404 means
//!    someone else won the race; both outcomes count as done.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;

use pruner_core::annotations::{self, TTL_SCHEDULE_AT, TTL_SECONDS_AFTER_FINISHED};
use pruner_core::{Clock, Error, Result, RunObject};
use pruner_policy::{EnforcedConfigLevel, PolicyStore};

use crate::adapter::{AnnotationPatch, RunApi};
use crate::reporter::Reporter;

/// Terminal outcome of one TTL pass over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlOutcome {
    /// No TTL policy applies; the run is left alone.
    Ignored,
    /// The run was deleted by this pass.
    Deleted,
    /// The run was already gone when this pass acted.
    AlreadyGone,
}

/// Applies the TTL rule to finished runs of one kind.
pub struct TtlEngine {
    api: Arc<dyn RunApi>,
    policy: Arc<PolicyStore>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
}

impl TtlEngine {
    /// Creates a TTL engine over one run kind.
    #[must_use]
    pub fn new(
        api: Arc<dyn RunApi>,
        policy: Arc<PolicyStore>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            api,
            policy,
            clock,
            reporter,
        }
    }

    /// Runs the TTL state machine once for a completed run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Requeue`] when the run is scheduled but not yet
    /// due; the host re-enqueues after the carried delay. Transient API
    /// errors are returned as retryable; the stamp stays in place and the
    /// next event retries the delete.
    pub async fn process(&self, run: &RunObject) -> Result<TtlOutcome> {
        let start = Instant::now();
        let result = self.step(run).await;
        self.reporter.ttl_processing_duration(
            &run.namespace,
            run.kind.metric_label(),
            start.elapsed(),
        );
        result
    }

    async fn step(&self, run: &RunObject) -> Result<TtlOutcome> {
        let kind = run.kind.metric_label();
        let now = self.clock.now();

        let due_at = match run.annotations.get(TTL_SCHEDULE_AT) {
            Some(raw) => match annotations::parse_rfc3339(TTL_SCHEDULE_AT, raw) {
                Ok(at) => Some(at),
                Err(err) => {
                    tracing::warn!(
                        namespace = %run.namespace,
                        name = %run.name,
                        error = %err,
                        "stripping malformed ttl schedule annotation"
                    );
                    self.strip(run, TTL_SCHEDULE_AT).await?;
                    self.reporter
                        .resource_error(&run.namespace, kind, err.metric_reason());
                    None
                }
            },
            None => None,
        };

        let due_at = match due_at {
            Some(at) => at,
            None => match self.schedule(run).await? {
                Scheduled::At(at) => at,
                Scheduled::Ignored => return Ok(TtlOutcome::Ignored),
                Scheduled::AlreadyGone => return Ok(TtlOutcome::AlreadyGone),
            },
        };

        if now < due_at {
            let delay = (due_at - now).to_std().unwrap_or_default();
            tracing::debug!(
                namespace = %run.namespace,
                name = %run.name,
                due_at = %due_at,
                "run not yet due, requesting requeue"
            );
            return Err(Error::requeue(delay));
        }

        self.expire(run).await
    }

    /// Stamps `ttl-schedule-at` on an unmarked run.
    async fn schedule(&self, run: &RunObject) -> Result<Scheduled> {
        let kind = run.kind.metric_label();

        let Some(ttl_seconds) = self.effective_ttl(run).await? else {
            self.reporter
                .resource_processed(&run.namespace, kind, "ignored");
            return Ok(Scheduled::Ignored);
        };
        if ttl_seconds < 0 {
            self.reporter
                .resource_processed(&run.namespace, kind, "ignored");
            return Ok(Scheduled::Ignored);
        }

        let due_at = run.completed_at()? + Duration::seconds(i64::from(ttl_seconds));
        let patch = AnnotationPatch::add(TTL_SCHEDULE_AT, annotations::format_rfc3339(due_at));

        match self
            .api
            .patch_annotations(&run.namespace, &run.name, &patch)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    namespace = %run.namespace,
                    name = %run.name,
                    due_at = %due_at,
                    ttl_seconds,
                    "scheduled run for ttl deletion"
                );
                self.reporter
                    .resource_processed(&run.namespace, kind, "scheduled");
                Ok(Scheduled::At(due_at))
            }
            Err(err) if err.is_not_found() => {
                self.reporter
                    .resource_deleted(&run.namespace, kind, "already_gone");
                Ok(Scheduled::AlreadyGone)
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes a run whose deadline has passed.
    async fn expire(&self, run: &RunObject) -> Result<TtlOutcome> {
        let kind = run.kind.metric_label();

        match self.api.delete(&run.namespace, &run.name).await {
            Ok(()) => {
                tracing::info!(
                    namespace = %run.namespace,
                    name = %run.name,
                    kind,
                    "deleted run past its ttl"
                );
                self.reporter
                    .resource_deleted(&run.namespace, kind, "ttl_expired");
                if let Ok(completed_at) = run.completed_at() {
                    let age = (completed_at - run.created_at).to_std().unwrap_or_default();
                    self.reporter
                        .resource_age_at_deletion(&run.namespace, kind, age);
                }
                Ok(TtlOutcome::Deleted)
            }
            Err(err) if err.is_not_found() => {
                self.reporter
                    .resource_deleted(&run.namespace, kind, "already_gone");
                Ok(TtlOutcome::AlreadyGone)
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) if err.is_retryable() => {
                tracing::debug!(
                    namespace = %run.namespace,
                    name = %run.name,
                    error = %err,
                    "transient error deleting run, host will retry"
                );
                Err(err)
            }
            Err(err) => {
                self.reporter
                    .resource_error(&run.namespace, kind, err.metric_reason());
                Err(err)
            }
        }
    }

    /// Resolves the effective TTL for a run.
    ///
    /// The run's own annotation participates only when the enforced config
    /// level allows resource-level overrides; a malformed annotation is
    /// stripped and the policy store value stands.
    async fn effective_ttl(&self, run: &RunObject) -> Result<Option<i32>> {
        let level =
            self.policy
                .enforced_config_level(run.kind, &run.namespace, run.policy_name())?;

        if level == EnforcedConfigLevel::Resource {
            if let Some(raw) = run.annotations.get(TTL_SECONDS_AFTER_FINISHED) {
                match annotations::parse_i32(TTL_SECONDS_AFTER_FINISHED, raw) {
                    Ok(seconds) => return Ok(Some(seconds)),
                    Err(err) => {
                        self.strip(run, TTL_SECONDS_AFTER_FINISHED).await?;
                        self.reporter.resource_error(
                            &run.namespace,
                            run.kind.metric_label(),
                            err.metric_reason(),
                        );
                    }
                }
            }
        }

        self.policy
            .ttl_seconds(run.kind, &run.namespace, run.policy_name())
    }

    /// Removes one annotation, tolerating an already-deleted run.
    async fn strip(&self, run: &RunObject, key: &str) -> Result<()> {
        match self
            .api
            .patch_annotations(&run.namespace, &run.name, &AnnotationPatch::remove(key))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

enum Scheduled {
    At(chrono::DateTime<chrono::Utc>),
    Ignored,
    AlreadyGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Utc};

    use pruner_core::{FixedClock, RunKind};

    use crate::adapter::memory::InMemoryCluster;
    use crate::reporter::RecordingReporter;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("timestamp")
    }

    struct Rig {
        cluster: Arc<InMemoryCluster>,
        clock: Arc<FixedClock>,
        reporter: Arc<RecordingReporter>,
        policy: Arc<PolicyStore>,
        engine: TtlEngine,
    }

    fn rig(policy_yaml: &str, kind: RunKind) -> Rig {
        let cluster = Arc::new(InMemoryCluster::new());
        let clock = Arc::new(FixedClock::new(ts("2025-01-01T00:00:00Z")));
        let reporter = Arc::new(RecordingReporter::new());
        let policy = Arc::new(PolicyStore::new());
        policy
            .load_global(policy_yaml, ts("2025-01-01T00:00:00Z"))
            .expect("load policy");

        let engine = TtlEngine::new(
            Arc::new(cluster.client(kind)),
            Arc::clone(&policy),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&reporter) as Arc<dyn Reporter>,
        );
        Rig {
            cluster,
            clock,
            reporter,
            policy,
            engine,
        }
    }

    fn completed_run() -> RunObject {
        RunObject::new(RunKind::TaskRun, "ns-1", "tr-a")
            .created(ts("2024-12-31T23:50:00Z"))
            .completed(ts("2025-01-01T00:00:00Z"), true)
    }

    #[tokio::test]
    async fn no_policy_means_ignored() {
        let rig = rig("", RunKind::TaskRun);
        let run = completed_run();
        rig.cluster.put(run.clone());

        let outcome = rig.engine.process(&run).await.expect("process");
        assert_eq!(outcome, TtlOutcome::Ignored);
        assert!(rig.cluster.patches().is_empty());
        assert_eq!(rig.reporter.events_of("processed")[0].reason, "ignored");
    }

    #[tokio::test]
    async fn unlimited_ttl_means_ignored() {
        let rig = rig("ttlSecondsAfterFinished: -1", RunKind::TaskRun);
        let run = completed_run();
        rig.cluster.put(run.clone());

        assert_eq!(
            rig.engine.process(&run).await.expect("process"),
            TtlOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn unmarked_run_is_stamped_then_requeued() {
        let rig = rig("ttlSecondsAfterFinished: 300", RunKind::TaskRun);
        let run = completed_run();
        rig.cluster.put(run.clone());

        let err = rig.engine.process(&run).await.unwrap_err();
        assert_eq!(
            err.requeue_after(),
            Some(std::time::Duration::from_secs(300))
        );

        let stored = rig
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        assert_eq!(
            stored.annotations.get(TTL_SCHEDULE_AT).map(String::as_str),
            Some("2025-01-01T00:05:00Z")
        );
    }

    #[tokio::test]
    async fn stamped_run_is_not_restamped() {
        let rig = rig("ttlSecondsAfterFinished: 300", RunKind::TaskRun);
        let mut run = completed_run();
        rig.cluster.put(run.clone());

        let _ = rig.engine.process(&run).await;
        let writes_after_first = rig.cluster.patches().len();
        assert_eq!(writes_after_first, 1);

        // Reconcile again with the stamp in place and an unchanged clock:
        // no further writes, same requeue.
        run = rig
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        let err = rig.engine.process(&run).await.unwrap_err();
        assert!(err.is_requeue());
        assert_eq!(rig.cluster.patches().len(), writes_after_first);
    }

    #[tokio::test]
    async fn stamp_respected_even_if_policy_shrinks() {
        let rig = rig("ttlSecondsAfterFinished: 300", RunKind::TaskRun);
        let run = completed_run();
        rig.cluster.put(run.clone());
        let _ = rig.engine.process(&run).await;

        // Policy drops to 10 seconds after the stamp was written.
        // The existing deadline stands.
        rig.policy
            .load_global("ttlSecondsAfterFinished: 10", ts("2025-01-01T00:00:30Z"))
            .expect("reload");
        rig.clock.set(ts("2025-01-01T00:01:00Z"));

        let run = rig
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        let err = rig.engine.process(&run).await.unwrap_err();
        assert_eq!(
            err.requeue_after(),
            Some(std::time::Duration::from_secs(240))
        );
    }

    #[tokio::test]
    async fn due_run_is_deleted() {
        let rig = rig("ttlSecondsAfterFinished: 60", RunKind::TaskRun);
        let run = completed_run();
        rig.cluster.put(run.clone());

        let _ = rig.engine.process(&run).await;
        rig.clock.set(ts("2025-01-01T00:01:30Z"));

        let run = rig
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        let outcome = rig.engine.process(&run).await.expect("process");
        assert_eq!(outcome, TtlOutcome::Deleted);
        assert!(rig.cluster.run(RunKind::TaskRun, "ns-1", "tr-a").is_none());
        assert_eq!(rig.reporter.deleted_with_reason("ttl_expired"), 1);
        assert_eq!(rig.reporter.events_of("age_at_deletion").len(), 1);
    }

    #[tokio::test]
    async fn externally_deleted_run_is_already_gone() {
        let rig = rig("ttlSecondsAfterFinished: 0", RunKind::TaskRun);
        let run = completed_run().with_annotation(TTL_SCHEDULE_AT, "2025-01-01T00:00:00Z");
        // Never stored in the cluster: the delete will 404.

        let outcome = rig.engine.process(&run).await.expect("process");
        assert_eq!(outcome, TtlOutcome::AlreadyGone);
        assert_eq!(rig.reporter.deleted_with_reason("already_gone"), 1);
    }

    #[tokio::test]
    async fn transient_delete_failure_is_retryable() {
        let rig = rig("ttlSecondsAfterFinished: 0", RunKind::TaskRun);
        let run = completed_run();
        rig.cluster.put(run.clone());
        rig.cluster.fail_next_delete(Error::TooManyRequests {
            message: "throttled".into(),
        });

        // Due immediately: the pass stamps, then the delete is throttled.
        let err = rig.engine.process(&run).await.unwrap_err();
        assert!(err.is_retryable());

        // Stamp still present; the retry succeeds.
        let run = rig
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        assert!(run.annotations.contains_key(TTL_SCHEDULE_AT));
        assert_eq!(
            rig.engine.process(&run).await.expect("retry"),
            TtlOutcome::Deleted
        );
    }

    #[tokio::test]
    async fn malformed_stamp_is_stripped_and_recomputed() {
        let rig = rig("ttlSecondsAfterFinished: 300", RunKind::TaskRun);
        let run = completed_run().with_annotation(TTL_SCHEDULE_AT, "not-a-timestamp");
        rig.cluster.put(run.clone());

        let err = rig.engine.process(&run).await.unwrap_err();
        assert!(err.is_requeue());

        let stored = rig
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        assert_eq!(
            stored.annotations.get(TTL_SCHEDULE_AT).map(String::as_str),
            Some("2025-01-01T00:05:00Z")
        );
        assert_eq!(rig.reporter.events_of("error")[0].reason, "validation_error");
    }

    #[tokio::test]
    async fn annotation_override_beats_policy_at_resource_level() {
        let rig = rig("ttlSecondsAfterFinished: 300", RunKind::TaskRun);
        let run = completed_run().with_annotation(TTL_SECONDS_AFTER_FINISHED, "60");
        rig.cluster.put(run.clone());

        let err = rig.engine.process(&run).await.unwrap_err();
        assert_eq!(err.requeue_after(), Some(std::time::Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn annotation_override_ignored_under_global_enforcement() {
        let rig = rig(
            "enforcedConfigLevel: global\nttlSecondsAfterFinished: 600",
            RunKind::TaskRun,
        );
        let run = completed_run().with_annotation(TTL_SECONDS_AFTER_FINISHED, "10");
        rig.cluster.put(run.clone());

        let err = rig.engine.process(&run).await.unwrap_err();
        assert_eq!(
            err.requeue_after(),
            Some(std::time::Duration::from_secs(600))
        );
    }
}
