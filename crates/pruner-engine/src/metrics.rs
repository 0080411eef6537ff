//! Prometheus-compatible reporter implementation.
//!
//! Exposes the [`Reporter`] port over the `metrics` crate facade. Install
//! an exporter (e.g. `metrics_exporter_prometheus::PrometheusBuilder`) in
//! the host binary to scrape these.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `pruner_resources_processed_total` | Counter | `namespace`, `kind`, `status` |
//! | `pruner_resources_deleted_total` | Counter | `namespace`, `kind`, `reason` |
//! | `pruner_resource_errors_total` | Counter | `namespace`, `kind`, `reason` |
//! | `pruner_resources_skipped_total` | Counter | `namespace`, `kind`, `reason` |
//! | `pruner_reconciliation_duration_seconds` | Histogram | `namespace`, `kind` |
//! | `pruner_ttl_processing_duration_seconds` | Histogram | `namespace`, `kind` |
//! | `pruner_history_processing_duration_seconds` | Histogram | `namespace`, `kind` |
//! | `pruner_resource_age_at_deletion_seconds` | Histogram | `namespace`, `kind` |
//! | `pruner_configuration_reloads_total` | Counter | `level` |
//! | `pruner_configuration_errors_total` | Counter | `level` |
//! | `pruner_gc_duration_seconds` | Histogram | - |
//! | `pruner_gc_namespaces` | Gauge | - |
//! | `pruner_queue_depth` | Gauge | - |
//! | `pruner_active_resources` | Gauge | `namespace`, `kind` |

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::reporter::Reporter;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: runs processed by an engine, labelled by outcome status.
    pub const RESOURCES_PROCESSED_TOTAL: &str = "pruner_resources_processed_total";
    /// Counter: runs deleted, labelled by reason.
    pub const RESOURCES_DELETED_TOTAL: &str = "pruner_resources_deleted_total";
    /// Counter: failed run operations, labelled by reason.
    pub const RESOURCE_ERRORS_TOTAL: &str = "pruner_resource_errors_total";
    /// Counter: runs skipped before any engine ran.
    pub const RESOURCES_SKIPPED_TOTAL: &str = "pruner_resources_skipped_total";
    /// Histogram: full reconcile wall time in seconds.
    pub const RECONCILIATION_DURATION_SECONDS: &str = "pruner_reconciliation_duration_seconds";
    /// Histogram: TTL engine wall time in seconds.
    pub const TTL_PROCESSING_DURATION_SECONDS: &str = "pruner_ttl_processing_duration_seconds";
    /// Histogram: history limiter wall time in seconds.
    pub const HISTORY_PROCESSING_DURATION_SECONDS: &str =
        "pruner_history_processing_duration_seconds";
    /// Histogram: run age at deletion in seconds.
    pub const RESOURCE_AGE_AT_DELETION_SECONDS: &str = "pruner_resource_age_at_deletion_seconds";
    /// Counter: configuration reloads by level.
    pub const CONFIGURATION_RELOADS_TOTAL: &str = "pruner_configuration_reloads_total";
    /// Counter: configuration load failures by level.
    pub const CONFIGURATION_ERRORS_TOTAL: &str = "pruner_configuration_errors_total";
    /// Histogram: full sweep wall time in seconds.
    pub const GC_DURATION_SECONDS: &str = "pruner_gc_duration_seconds";
    /// Gauge: namespaces covered by the last sweep.
    pub const GC_NAMESPACES: &str = "pruner_gc_namespaces";
    /// Gauge: sweep work queue depth.
    pub const QUEUE_DEPTH: &str = "pruner_queue_depth";
    /// Gauge: resources actively being processed.
    pub const ACTIVE_RESOURCES: &str = "pruner_active_resources";
}

/// Label keys used across metrics.
pub mod labels {
    /// Namespace of the run.
    pub const NAMESPACE: &str = "namespace";
    /// Resource kind (`pipelinerun`, `taskrun`, `namespace`).
    pub const KIND: &str = "kind";
    /// Outcome status (`scheduled`, `ignored`, `deleted`, ...).
    pub const STATUS: &str = "status";
    /// Deletion/error/skip reason.
    pub const REASON: &str = "reason";
    /// Configuration level (`global`, `namespace`).
    pub const LEVEL: &str = "level";
}

/// [`Reporter`] implementation over the `metrics` facade.
///
/// Set-semantics gauges (`active_resources`) go through a per-key
/// last-value table so repeated sets of the same value do not touch the
/// recorder; the table mutex is never held across any await point because
/// the reporter is fully synchronous.
#[derive(Debug, Default)]
pub struct PrometheusReporter {
    active_last: Mutex<HashMap<(String, String), i64>>,
}

impl PrometheusReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[allow(clippy::cast_precision_loss)] // Gauge values are small counts.
impl Reporter for PrometheusReporter {
    fn resource_processed(&self, namespace: &str, kind: &str, status: &str) {
        counter!(
            names::RESOURCES_PROCESSED_TOTAL,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    fn resource_deleted(&self, namespace: &str, kind: &str, reason: &str) {
        counter!(
            names::RESOURCES_DELETED_TOTAL,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    fn resource_error(&self, namespace: &str, kind: &str, reason: &str) {
        counter!(
            names::RESOURCE_ERRORS_TOTAL,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    fn resource_skipped(&self, namespace: &str, kind: &str, reason: &str) {
        counter!(
            names::RESOURCES_SKIPPED_TOTAL,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
            labels::REASON => reason.to_string(),
        )
        .increment(1);
    }

    fn reconciliation_duration(&self, namespace: &str, kind: &str, duration: Duration) {
        histogram!(
            names::RECONCILIATION_DURATION_SECONDS,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    fn ttl_processing_duration(&self, namespace: &str, kind: &str, duration: Duration) {
        histogram!(
            names::TTL_PROCESSING_DURATION_SECONDS,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    fn history_processing_duration(&self, namespace: &str, kind: &str, duration: Duration) {
        histogram!(
            names::HISTORY_PROCESSING_DURATION_SECONDS,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    fn resource_age_at_deletion(&self, namespace: &str, kind: &str, age: Duration) {
        histogram!(
            names::RESOURCE_AGE_AT_DELETION_SECONDS,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
        )
        .record(age.as_secs_f64());
    }

    fn configuration_reload(&self, level: &str) {
        counter!(
            names::CONFIGURATION_RELOADS_TOTAL,
            labels::LEVEL => level.to_string(),
        )
        .increment(1);
    }

    fn configuration_error(&self, level: &str) {
        counter!(
            names::CONFIGURATION_ERRORS_TOTAL,
            labels::LEVEL => level.to_string(),
        )
        .increment(1);
    }

    fn garbage_collection_duration(&self, duration: Duration, namespace_count: usize) {
        histogram!(names::GC_DURATION_SECONDS).record(duration.as_secs_f64());
        gauge!(names::GC_NAMESPACES).set(namespace_count as f64);
    }

    fn queue_depth(&self, depth: usize) {
        gauge!(names::QUEUE_DEPTH).set(depth as f64);
    }

    fn active_resources(&self, namespace: &str, kind: &str, count: i64) {
        let key = (namespace.to_string(), kind.to_string());
        {
            let mut last = self.active_last.lock().expect("gauge table lock poisoned");
            if last.get(&key) == Some(&count) {
                return;
            }
            last.insert(key, count);
        }
        gauge!(
            names::ACTIVE_RESOURCES,
            labels::NAMESPACE => namespace.to_string(),
            labels::KIND => kind.to_string(),
        )
        .set(count as f64);
    }
}
