//! Event reconciler: the per-event entry point.
//!
//! The host calls [`EventReconciler::reconcile`] for every add/update of a
//! run. After the fast-path exits, the history limiter runs first and the
//! TTL engine second; if history already deleted the run, TTL observes a
//! 404 and exits cleanly. Requeue signals from the TTL engine pass through
//! untouched for the host's delayed re-enqueue.
//!
//! Panics from either engine are caught at this boundary, reported, and
//! converted to an error so one poisoned object cannot take down the
//! worker.

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use pruner_core::annotations::TTL_SECONDS_AFTER_FINISHED;
use pruner_core::observability::reconcile_span;
use pruner_core::{Clock, Error, Result, RunObject};
use pruner_policy::PolicyStore;
use tracing::Instrument;

use crate::adapter::RunApi;
use crate::history::HistoryLimiter;
use crate::reporter::Reporter;
use crate::ttl::TtlEngine;

/// Reconciles single run events: history limits, then TTL.
pub struct EventReconciler {
    history: HistoryLimiter,
    ttl: TtlEngine,
    reporter: Arc<dyn Reporter>,
}

impl EventReconciler {
    /// Creates a reconciler over one run kind.
    #[must_use]
    pub fn new(
        api: Arc<dyn RunApi>,
        policy: Arc<PolicyStore>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            history: HistoryLimiter::new(
                Arc::clone(&api),
                Arc::clone(&policy),
                Arc::clone(&clock),
                Arc::clone(&reporter),
            ),
            ttl: TtlEngine::new(api, policy, clock, Arc::clone(&reporter)),
            reporter,
        }
    }

    /// Handles one informer event for a run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Requeue`] when the run's TTL has not elapsed;
    /// retryable errors when the API had a transient failure; and
    /// [`Error::Panic`] when an engine panicked.
    pub async fn reconcile(&self, run: &RunObject) -> Result<()> {
        let span = reconcile_span(run.kind, &run.namespace, &run.name);
        self.reconcile_inner(run).instrument(span).await
    }

    async fn reconcile_inner(&self, run: &RunObject) -> Result<()> {
        let kind = run.kind.metric_label();

        // Labels and the pruner annotation both absent: the object was
        // observed before its metadata materialized. The next update
        // carries them.
        if run.labels.is_empty() && !run.annotations.contains_key(TTL_SECONDS_AFTER_FINISHED) {
            tracing::debug!(
                namespace = %run.namespace,
                name = %run.name,
                "skipping run without labels or pruner annotation"
            );
            self.reporter
                .resource_skipped(&run.namespace, kind, "metadata_not_ready");
            return Ok(());
        }

        if run.owned_by_pipeline_run() {
            self.reporter
                .resource_skipped(&run.namespace, kind, "owned_by_pipeline_run");
            return Ok(());
        }

        if !run.is_completed() {
            self.reporter
                .resource_skipped(&run.namespace, kind, "not_completed");
            return Ok(());
        }

        let start = Instant::now();
        let result = std::panic::AssertUnwindSafe(self.run_engines(run))
            .catch_unwind()
            .await;
        self.reporter
            .reconciliation_duration(&run.namespace, kind, start.elapsed());

        match result {
            Ok(engine_result) => {
                if let Err(err) = &engine_result {
                    if err.is_requeue() {
                        tracing::debug!(
                            namespace = %run.namespace,
                            name = %run.name,
                            delay = ?err.requeue_after(),
                            "reconcile requeued"
                        );
                    } else if !err.is_retryable() {
                        tracing::error!(
                            namespace = %run.namespace,
                            name = %run.name,
                            error = %err,
                            "reconcile failed"
                        );
                    }
                }
                engine_result
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    namespace = %run.namespace,
                    name = %run.name,
                    message,
                    "panic recovered during reconcile"
                );
                self.reporter.resource_error(&run.namespace, kind, "panic");
                Err(Error::Panic { message })
            }
        }
    }

    async fn run_engines(&self, run: &RunObject) -> Result<()> {
        self.history.process(run).await?;
        self.ttl.process(run).await?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
