//! Periodic sweeper: replay retention over every watched namespace.
//!
//! A sweep is driven by configuration change, not by a timer. The trigger
//! reloads the policy store, lists namespaces (skipping the platform ones),
//! and fans them out to a bounded pool of workers; each worker replays the
//! history-then-TTL pass over every completed run, first stripping
//! `history-checked-at` stamps that predate the reload so limits are
//! re-evaluated under the new configuration.
//!
//! Sweeps are serialized: a trigger arriving while one is in progress is
//! coalesced into a single follow-up run against the latest configuration.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use pruner_core::annotations::{self, HISTORY_CHECKED_AT};
use pruner_core::observability::sweep_span;
use pruner_core::{Clock, Error, Result, RunObject};
use pruner_policy::PolicyStore;

use crate::adapter::{AnnotationPatch, NamespaceApi, RunApi};
use crate::history::{HistoryLimiter, HistoryOutcome};
use crate::reporter::Reporter;
use crate::ttl::{TtlEngine, TtlOutcome};

/// Namespace name prefixes the sweeper never touches.
pub const SKIPPED_NAMESPACE_PREFIXES: [&str; 3] = ["kube", "openshift", "tekton"];

/// One per-run failure recorded during a sweep.
#[derive(Debug, Clone)]
pub struct SweepError {
    /// Namespace of the failing run.
    pub namespace: String,
    /// Kind label of the failing run.
    pub kind: String,
    /// Name of the failing run, or empty for namespace-level failures.
    pub name: String,
    /// Rendered error.
    pub message: String,
}

/// Aggregate result of one sweep (or of a coalesced series of sweeps).
#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    /// Namespaces selected for the sweep.
    pub namespaces: usize,
    /// Completed runs replayed through the engines.
    pub runs_processed: usize,
    /// Runs deleted by this sweep.
    pub runs_deleted: usize,
    /// Per-run failures; the sweep continued past every one of them.
    pub errors: Vec<SweepError>,
}

impl SweepSummary {
    /// Merges another summary into this one.
    pub fn merge(&mut self, other: Self) {
        self.namespaces += other.namespaces;
        self.runs_processed += other.runs_processed;
        self.runs_deleted += other.runs_deleted;
        self.errors.extend(other.errors);
    }

    /// Returns true if any per-run failure was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The engines serving one run kind during a sweep.
struct KindEngines {
    api: Arc<dyn RunApi>,
    history: HistoryLimiter,
    ttl: TtlEngine,
}

impl KindEngines {
    fn new(
        api: Arc<dyn RunApi>,
        policy: &Arc<PolicyStore>,
        clock: &Arc<dyn Clock>,
        reporter: &Arc<dyn Reporter>,
    ) -> Self {
        Self {
            history: HistoryLimiter::new(
                Arc::clone(&api),
                Arc::clone(policy),
                Arc::clone(clock),
                Arc::clone(reporter),
            ),
            ttl: TtlEngine::new(
                Arc::clone(&api),
                Arc::clone(policy),
                Arc::clone(clock),
                Arc::clone(reporter),
            ),
            api,
        }
    }
}

/// Shared state the sweep workers operate on.
struct SweepContext {
    pipeline_runs: KindEngines,
    task_runs: KindEngines,
    reporter: Arc<dyn Reporter>,
}

/// Configuration-driven garbage collection over all watched namespaces.
pub struct Sweeper {
    policy: Arc<PolicyStore>,
    namespaces: Arc<dyn NamespaceApi>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
    ctx: Arc<SweepContext>,
    gate: tokio::sync::Mutex<()>,
    pending: AtomicBool,
    latest_config: Mutex<String>,
}

impl Sweeper {
    /// Creates a sweeper over both run kinds.
    #[must_use]
    pub fn new(
        policy: Arc<PolicyStore>,
        pipeline_runs: Arc<dyn RunApi>,
        task_runs: Arc<dyn RunApi>,
        namespaces: Arc<dyn NamespaceApi>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let ctx = SweepContext {
            pipeline_runs: KindEngines::new(pipeline_runs, &policy, &clock, &reporter),
            task_runs: KindEngines::new(task_runs, &policy, &clock, &reporter),
            reporter: Arc::clone(&reporter),
        };
        Self {
            policy,
            namespaces,
            clock,
            reporter,
            ctx: Arc::new(ctx),
            gate: tokio::sync::Mutex::new(()),
            pending: AtomicBool::new(false),
            latest_config: Mutex::new(String::new()),
        }
    }

    /// Handles one configuration-map change.
    ///
    /// Returns `None` when a sweep is already in progress; the trigger is
    /// coalesced and the running sweep follows up once with the latest
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] when the new document is malformed
    /// (the previous policy stays live and no sweep runs) and propagates
    /// namespace-listing failures. Per-run failures never surface here;
    /// they are aggregated in the summary.
    pub async fn on_config_change(
        &self,
        config: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SweepSummary>> {
        {
            let mut slot = self
                .latest_config
                .lock()
                .map_err(|_| Error::internal("sweeper config slot poisoned"))?;
            config.clone_into(&mut slot);
        }

        let Ok(_guard) = self.gate.try_lock() else {
            self.pending.store(true, Ordering::SeqCst);
            tracing::debug!("sweep already in progress, coalescing trigger");
            return Ok(None);
        };

        let mut total = SweepSummary::default();
        loop {
            let config = {
                let slot = self
                    .latest_config
                    .lock()
                    .map_err(|_| Error::internal("sweeper config slot poisoned"))?;
                slot.clone()
            };
            total.merge(self.sweep(&config, cancel).await?);
            if !self.pending.swap(false, Ordering::SeqCst) {
                break;
            }
            tracing::debug!("running coalesced follow-up sweep");
        }
        Ok(Some(total))
    }

    /// Runs one full sweep against `config`.
    async fn sweep(&self, config: &str, cancel: &CancellationToken) -> Result<SweepSummary> {
        let started = Instant::now();
        let now = self.clock.now();

        if let Err(err) = self.policy.load_global(config, now) {
            tracing::error!(error = %err, "failed to load pruner global config, keeping previous");
            self.reporter.configuration_error("global_config");
            return Err(err);
        }
        self.reporter.configuration_reload("global");
        let loaded_at = now;

        let selected = match self.namespaces.list_namespaces().await {
            Ok(all) => {
                let selected: Vec<String> = all
                    .into_iter()
                    .filter(|ns| {
                        !SKIPPED_NAMESPACE_PREFIXES
                            .iter()
                            .any(|prefix| ns.starts_with(prefix))
                    })
                    .collect();
                selected
            }
            Err(err) => {
                self.reporter.configuration_error("namespace_filter");
                return Err(err);
            }
        };

        let worker_count = self.policy.worker_count()?;
        tracing::info!(
            namespaces = selected.len(),
            worker_count,
            "starting garbage collection sweep"
        );
        self.reporter.queue_depth(selected.len());
        self.reporter
            .active_resources("", "namespace", i64::try_from(worker_count).unwrap_or(0));

        let summary = self
            .fan_out(&selected, worker_count, loaded_at, cancel)
            .await;

        self.reporter
            .garbage_collection_duration(started.elapsed(), selected.len());
        self.reporter.queue_depth(0);
        self.reporter.active_resources("", "namespace", 0);
        tracing::info!(
            namespaces = summary.namespaces,
            runs_processed = summary.runs_processed,
            runs_deleted = summary.runs_deleted,
            errors = summary.errors.len(),
            "garbage collection sweep completed"
        );
        Ok(summary)
    }

    /// Distributes namespaces over the worker pool and merges the results.
    async fn fan_out(
        &self,
        namespaces: &[String],
        worker_count: usize,
        loaded_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> SweepSummary {
        let (tx, rx) = mpsc::channel::<String>(worker_count.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let ctx = Arc::clone(&self.ctx);
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let mut summary = SweepSummary::default();
                loop {
                    let namespace = { rx.lock().await.recv().await };
                    let Some(namespace) = namespace else { break };
                    // Keep draining after cancellation so the bounded
                    // channel never wedges a sender mid-push; drained
                    // namespaces are simply not processed.
                    if cancel.is_cancelled() {
                        continue;
                    }
                    tracing::debug!(worker_id, namespace = %namespace, "worker processing namespace");
                    process_namespace(&ctx, &namespace, loaded_at, &cancel, &mut summary)
                        .instrument(sweep_span(&namespace))
                        .await;
                }
                summary
            }));
        }
        // The workers hold the only receiver handles from here on, so a
        // blocked send can resolve with a closed-channel error once they
        // all exit.
        drop(rx);

        for namespace in namespaces {
            if cancel.is_cancelled() {
                break;
            }
            if tx.send(namespace.clone()).await.is_err() {
                break;
            }
        }
        drop(tx);

        let mut summary = SweepSummary {
            namespaces: namespaces.len(),
            ..SweepSummary::default()
        };
        for handle in handles {
            match handle.await {
                Ok(worker_summary) => summary.merge(worker_summary),
                Err(err) => summary.errors.push(SweepError {
                    namespace: String::new(),
                    kind: "namespace".to_string(),
                    name: String::new(),
                    message: format!("sweep worker aborted: {err}"),
                }),
            }
        }
        summary
    }
}

/// Processes one namespace: PipelineRuns first, then TaskRuns.
async fn process_namespace(
    ctx: &SweepContext,
    namespace: &str,
    loaded_at: DateTime<Utc>,
    cancel: &CancellationToken,
    summary: &mut SweepSummary,
) {
    ctx.reporter.active_resources(namespace, "namespace", 1);

    for engines in [&ctx.pipeline_runs, &ctx.task_runs] {
        if cancel.is_cancelled() {
            break;
        }
        let kind = engines.api.kind().metric_label();

        let runs = match engines.api.list(namespace, None).await {
            Ok(runs) => runs,
            Err(Error::Cancelled) => break,
            Err(err) => {
                tracing::warn!(namespace, kind, error = %err, "failed to list runs for sweep");
                ctx.reporter.resource_error(namespace, kind, "gc_list");
                summary.errors.push(SweepError {
                    namespace: namespace.to_string(),
                    kind: kind.to_string(),
                    name: String::new(),
                    message: err.to_string(),
                });
                continue;
            }
        };

        for run in runs {
            if cancel.is_cancelled() {
                break;
            }
            process_run(ctx, engines, run, loaded_at, summary).await;
        }
    }

    ctx.reporter.active_resources(namespace, "namespace", 0);
}

/// Replays retention for one run, stripping a stale history stamp first.
async fn process_run(
    ctx: &SweepContext,
    engines: &KindEngines,
    mut run: RunObject,
    loaded_at: DateTime<Utc>,
    summary: &mut SweepSummary,
) {
    if !run.is_completed() || run.owned_by_pipeline_run() {
        return;
    }
    let kind = run.kind.metric_label();

    // A stamp written before this sweep's config load is stale: strip it
    // so the limiter re-evaluates under the new policy.
    let stale = run
        .annotations
        .get(HISTORY_CHECKED_AT)
        .is_some_and(|raw| match annotations::parse_rfc3339(HISTORY_CHECKED_AT, raw) {
            Ok(at) => at < loaded_at,
            Err(_) => true,
        });
    if stale {
        let patch = AnnotationPatch::remove(HISTORY_CHECKED_AT);
        match engines
            .api
            .patch_annotations(&run.namespace, &run.name, &patch)
            .await
        {
            Ok(()) => {
                run.annotations.remove(HISTORY_CHECKED_AT);
            }
            Err(err) if err.is_not_found() => return,
            Err(Error::Cancelled) => return,
            Err(err) => {
                record_run_error(ctx, summary, &run, kind, &err);
                return;
            }
        }
    }

    summary.runs_processed += 1;

    match engines.history.process(&run).await {
        Ok(HistoryOutcome::Enforced { deleted, .. }) => {
            summary.runs_deleted += deleted;
        }
        Ok(_) => {}
        Err(Error::Cancelled) => return,
        Err(err) => {
            record_run_error(ctx, summary, &run, kind, &err);
            return;
        }
    }

    match engines.ttl.process(&run).await {
        Ok(TtlOutcome::Deleted) => summary.runs_deleted += 1,
        Ok(_) => {}
        Err(Error::Cancelled) => {}
        Err(err) if err.is_requeue() => {
            // Not yet due; the event path or a later sweep picks it up.
        }
        Err(err) => record_run_error(ctx, summary, &run, kind, &err),
    }
}

fn record_run_error(
    ctx: &SweepContext,
    summary: &mut SweepSummary,
    run: &RunObject,
    kind: &str,
    err: &Error,
) {
    tracing::warn!(
        namespace = %run.namespace,
        name = %run.name,
        kind,
        error = %err,
        "sweep failed for run, continuing"
    );
    // Non-retryable failures were already counted inside the engines.
    if err.is_retryable() {
        ctx.reporter
            .resource_error(&run.namespace, kind, err.metric_reason());
    }
    summary.errors.push(SweepError {
        namespace: run.namespace.clone(),
        kind: kind.to_string(),
        name: run.name.clone(),
        message: err.to_string(),
    });
}
