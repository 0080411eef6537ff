//! History limiter: bound the number of completed runs kept per family.
//!
//! A family is the set of runs in one namespace sharing the same owning
//! definition label (Pipeline name for PipelineRuns, Task name for
//! TaskRuns). Successful and failed runs are bounded independently;
//! within each class the newest runs survive and the overflow is deleted
//! oldest-first with a deterministic name tie-break.
//!
//! The pass is memoized on the input run via `history-checked-at`; the
//! sweeper strips the stamp after every policy reload so limits are
//! re-applied under the new configuration.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use pruner_core::annotations::{
    self, FAILED_HISTORY_LIMIT, HISTORY_CHECKED_AT, SUCCESSFUL_HISTORY_LIMIT,
};
use pruner_core::{Clock, Error, Result, RunObject};
use pruner_policy::{EnforcedConfigLevel, PolicyStore};

use crate::adapter::{AnnotationPatch, LabelSelector, RunApi};
use crate::reporter::Reporter;

/// Outcome of one history-limit pass over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// The run already carries a fresh `history-checked-at` stamp.
    Memoized,
    /// No family label or no history policy; nothing to enforce.
    Skipped,
    /// Limits were enforced over the family.
    Enforced {
        /// Number of delete calls that removed a run.
        deleted: usize,
        /// False when the input run itself fell into the overflow.
        input_survived: bool,
    },
}

/// Enforces per-family history limits for one run kind.
pub struct HistoryLimiter {
    api: Arc<dyn RunApi>,
    policy: Arc<PolicyStore>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
}

impl HistoryLimiter {
    /// Creates a history limiter over one run kind.
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

    /// Runs the history-limit pass once for a completed run.
    ///
    /// # Errors
    ///
    /// Transient API errors abort the pass and are returned as retryable;
    /// the idempotent deletes make a replay safe. Cancellation is
    /// propagated without metric emission.
    pub async fn process(&self, run: &RunObject) -> Result<HistoryOutcome> {
        let start = Instant::now();
        let result = self.step(run).await;
        self.reporter.history_processing_duration(
            &run.namespace,
            run.kind.metric_label(),
            start.elapsed(),
        );
        result
    }

    async fn step(&self, run: &RunObject) -> Result<HistoryOutcome> {
        let kind = run.kind.metric_label();

        if let Some(raw) = run.annotations.get(HISTORY_CHECKED_AT) {
            match annotations::parse_rfc3339(HISTORY_CHECKED_AT, raw) {
                Ok(_) => {
                    self.reporter
                        .resource_skipped(&run.namespace, kind, "already_checked");
                    return Ok(HistoryOutcome::Memoized);
                }
                Err(err) => {
                    tracing::warn!(
                        namespace = %run.namespace,
                        name = %run.name,
                        error = %err,
                        "stripping malformed history stamp"
                    );
                    self.strip(run, HISTORY_CHECKED_AT).await?;
                    self.reporter
                        .resource_error(&run.namespace, kind, err.metric_reason());
                }
            }
        }

        let success_limit = self
            .effective_limit(run, SUCCESSFUL_HISTORY_LIMIT, |policy, r| {
                policy.successful_history_limit(r.kind, &r.namespace, r.policy_name())
            })
            .await?;
        let failed_limit = self
            .effective_limit(run, FAILED_HISTORY_LIMIT, |policy, r| {
                policy.failed_history_limit(r.kind, &r.namespace, r.policy_name())
            })
            .await?;

        if success_limit.is_none() && failed_limit.is_none() {
            self.reporter
                .resource_skipped(&run.namespace, kind, "no_history_policy");
            return Ok(HistoryOutcome::Skipped);
        }

        let Some(family) = run.family() else {
            self.reporter
                .resource_skipped(&run.namespace, kind, "no_family_label");
            return Ok(HistoryOutcome::Skipped);
        };

        let selector = LabelSelector::equals(run.kind.family_label_key(), family);
        let siblings: Vec<RunObject> = self
            .api
            .list(&run.namespace, Some(&selector))
            .await?
            .into_iter()
            .filter(|r| r.is_completed() && !r.owned_by_pipeline_run())
            .collect();

        let mut deleted = 0;
        let mut input_survived = true;

        for (limit, successful) in [(success_limit, true), (failed_limit, false)] {
            let Some(limit) = limit else { continue };
            if limit < 0 {
                // -1: unlimited history for this class.
                continue;
            }
            let victims = overflow(&siblings, usize::try_from(limit).unwrap_or_default(), successful);
            for victim in victims {
                if victim.name == run.name {
                    input_survived = false;
                }
                self.delete_victim(victim).await?;
                deleted += 1;
            }
        }

        if input_survived {
            self.stamp(run, self.clock.now()).await?;
        }

        tracing::debug!(
            namespace = %run.namespace,
            name = %run.name,
            family,
            deleted,
            "history limits enforced"
        );
        Ok(HistoryOutcome::Enforced {
            deleted,
            input_survived,
        })
    }

    /// Deletes one overflow run, absorbing the already-gone race.
    async fn delete_victim(&self, victim: &RunObject) -> Result<()> {
        let kind = victim.kind.metric_label();
        match self.api.delete(&victim.namespace, &victim.name).await {
            Ok(()) => {
                tracing::info!(
                    namespace = %victim.namespace,
                    name = %victim.name,
                    kind,
                    "deleted run over history limit"
                );
                self.reporter
                    .resource_deleted(&victim.namespace, kind, "history_limit");
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                self.reporter
                    .resource_deleted(&victim.namespace, kind, "already_gone");
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) if err.is_retryable() => Err(err),
            Err(err) => {
                self.reporter
                    .resource_error(&victim.namespace, kind, err.metric_reason());
                Err(err)
            }
        }
    }

    /// Resolves one history limit: annotation override when the enforced
    /// level allows it, else the policy store.
    async fn effective_limit(
        &self,
        run: &RunObject,
        annotation_key: &str,
        from_policy: impl Fn(&PolicyStore, &RunObject) -> Result<Option<i32>>,
    ) -> Result<Option<i32>> {
        let level =
            self.policy
                .enforced_config_level(run.kind, &run.namespace, run.policy_name())?;

        if level == EnforcedConfigLevel::Resource {
            if let Some(raw) = run.annotations.get(annotation_key) {
                match annotations::parse_i32(annotation_key, raw) {
                    Ok(limit) => return Ok(Some(limit)),
                    Err(err) => {
                        self.strip(run, annotation_key).await?;
                        self.reporter.resource_error(
                            &run.namespace,
                            run.kind.metric_label(),
                            err.metric_reason(),
                        );
                    }
                }
            }
        }

        from_policy(&self.policy, run)
    }

    /// Writes the memoization stamp, tolerating an already-deleted run.
    async fn stamp(&self, run: &RunObject, now: DateTime<Utc>) -> Result<()> {
        let patch = AnnotationPatch::add(HISTORY_CHECKED_AT, annotations::format_rfc3339(now));
        match self
            .api
            .patch_annotations(&run.namespace, &run.name, &patch)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
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

/// Picks the overflow of one class: completed runs beyond `limit`, oldest
/// first, out of the newest-first ranking with a name tie-break.
fn overflow(siblings: &[RunObject], limit: usize, successful: bool) -> Vec<&RunObject> {
    let mut ranked: Vec<(&RunObject, DateTime<Utc>)> = siblings
        .iter()
        .filter(|r| {
            if successful {
                r.is_successful()
            } else {
                r.is_failed()
            }
        })
        .filter_map(|r| r.completed_at().ok().map(|at| (r, at)))
        .collect();

    ranked.sort_by(|(a, at_a), (b, at_b)| match at_b.cmp(at_a) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });

    if ranked.len() <= limit {
        return Vec::new();
    }
    // Delete the oldest first so an interrupted pass has removed the
    // least recent runs.
    ranked[limit..].iter().rev().map(|(r, _)| *r).collect()
}
