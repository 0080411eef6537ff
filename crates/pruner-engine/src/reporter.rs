//! The reporter port.
//!
//! A narrow observability interface the engines call unconditionally. The
//! production implementation lives in [`crate::metrics`]; [`NoopReporter`]
//! is for hosts that do not care, and [`RecordingReporter`] captures calls
//! for test assertions.

use std::sync::Mutex;
use std::time::Duration;

/// Observability callbacks emitted by the retention engines.
///
/// `kind` is the lowercase resource label (`pipelinerun`, `taskrun`, or
/// `namespace` for sweeper worker accounting). Implementations must be
/// cheap: these are called on every reconcile.
pub trait Reporter: Send + Sync {
    /// A run went through an engine with the given outcome status.
    fn resource_processed(&self, namespace: &str, kind: &str, status: &str);

    /// A run was deleted (or found already gone) for the given reason.
    fn resource_deleted(&self, namespace: &str, kind: &str, reason: &str);

    /// An operation on a run failed.
    fn resource_error(&self, namespace: &str, kind: &str, reason: &str);

    /// A run was skipped before any engine ran.
    fn resource_skipped(&self, namespace: &str, kind: &str, reason: &str);

    /// Wall time of one full reconcile (history + TTL).
    fn reconciliation_duration(&self, namespace: &str, kind: &str, duration: Duration);

    /// Wall time of one TTL engine pass.
    fn ttl_processing_duration(&self, namespace: &str, kind: &str, duration: Duration);

    /// Wall time of one history limiter pass.
    fn history_processing_duration(&self, namespace: &str, kind: &str, duration: Duration);

    /// Age of a run at deletion, completion minus creation.
    fn resource_age_at_deletion(&self, namespace: &str, kind: &str, age: Duration);

    /// The configuration was reloaded at the given level.
    fn configuration_reload(&self, level: &str);

    /// The configuration failed to load at the given level.
    fn configuration_error(&self, level: &str);

    /// Wall time and namespace count of one full garbage-collection sweep.
    fn garbage_collection_duration(&self, duration: Duration, namespace_count: usize);

    /// Current depth of the sweep work queue.
    fn queue_depth(&self, depth: usize);

    /// Set-semantics gauge of resources being actively processed.
    fn active_resources(&self, namespace: &str, kind: &str, count: i64);
}

/// Reporter that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn resource_processed(&self, _: &str, _: &str, _: &str) {}
    fn resource_deleted(&self, _: &str, _: &str, _: &str) {}
    fn resource_error(&self, _: &str, _: &str, _: &str) {}
    fn resource_skipped(&self, _: &str, _: &str, _: &str) {}
    fn reconciliation_duration(&self, _: &str, _: &str, _: Duration) {}
    fn ttl_processing_duration(&self, _: &str, _: &str, _: Duration) {}
    fn history_processing_duration(&self, _: &str, _: &str, _: Duration) {}
    fn resource_age_at_deletion(&self, _: &str, _: &str, _: Duration) {}
    fn configuration_reload(&self, _: &str) {}
    fn configuration_error(&self, _: &str) {}
    fn garbage_collection_duration(&self, _: Duration, _: usize) {}
    fn queue_depth(&self, _: usize) {}
    fn active_resources(&self, _: &str, _: &str, _: i64) {}
}

/// One recorded counter-style reporter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Which callback fired: `processed`, `deleted`, `error`, or `skipped`.
    pub event: &'static str,
    /// Namespace label.
    pub namespace: String,
    /// Kind label.
    pub kind: String,
    /// Status or reason label.
    pub reason: String,
}

/// Reporter that records counter-style calls for test assertions.
///
/// Durations and gauges are counted but not stored; tests assert on the
/// discrete events that drive behavior.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<RecordedEvent>>,
    config_events: Mutex<Vec<(String, String)>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: &'static str, namespace: &str, kind: &str, reason: &str) {
        let mut events = self.events.lock().expect("recorder lock poisoned");
        events.push(RecordedEvent {
            event,
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            reason: reason.to_string(),
        });
    }

    /// All recorded events, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().expect("recorder lock poisoned").clone()
    }

    /// Recorded events of one callback, in call order.
    #[must_use]
    pub fn events_of(&self, event: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }

    /// Count of deletion events with the given reason.
    #[must_use]
    pub fn deleted_with_reason(&self, reason: &str) -> usize {
        self.events_of("deleted")
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }

    /// Recorded configuration reloads and errors as `(event, level)`.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    #[must_use]
    pub fn config_events(&self) -> Vec<(String, String)> {
        self.config_events
            .lock()
            .expect("recorder lock poisoned")
            .clone()
    }
}

impl Reporter for RecordingReporter {
    fn resource_processed(&self, namespace: &str, kind: &str, status: &str) {
        self.record("processed", namespace, kind, status);
    }

    fn resource_deleted(&self, namespace: &str, kind: &str, reason: &str) {
        self.record("deleted", namespace, kind, reason);
    }

    fn resource_error(&self, namespace: &str, kind: &str, reason: &str) {
        self.record("error", namespace, kind, reason);
    }

    fn resource_skipped(&self, namespace: &str, kind: &str, reason: &str) {
        self.record("skipped", namespace, kind, reason);
    }

    fn reconciliation_duration(&self, _: &str, _: &str, _: Duration) {}
    fn ttl_processing_duration(&self, _: &str, _: &str, _: Duration) {}
    fn history_processing_duration(&self, _: &str, _: &str, _: Duration) {}

    fn resource_age_at_deletion(&self, namespace: &str, kind: &str, _: Duration) {
        self.record("age_at_deletion", namespace, kind, "");
    }

    fn configuration_reload(&self, level: &str) {
        let mut events = self.config_events.lock().expect("recorder lock poisoned");
        events.push(("reload".to_string(), level.to_string()));
    }

    fn configuration_error(&self, level: &str) {
        let mut events = self.config_events.lock().expect("recorder lock poisoned");
        events.push(("error".to_string(), level.to_string()));
    }

    fn garbage_collection_duration(&self, _: Duration, _: usize) {}
    fn queue_depth(&self, _: usize) {}
    fn active_resources(&self, _: &str, _: &str, _: i64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_preserves_call_order() {
        let reporter = RecordingReporter::new();
        reporter.resource_processed("ns-1", "taskrun", "scheduled");
        reporter.resource_deleted("ns-1", "taskrun", "ttl_expired");
        reporter.resource_deleted("ns-1", "taskrun", "already_gone");

        let events = reporter.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "processed");
        assert_eq!(reporter.deleted_with_reason("ttl_expired"), 1);
        assert_eq!(reporter.deleted_with_reason("already_gone"), 1);
    }

    #[test]
    fn noop_reporter_accepts_everything() {
        let reporter = NoopReporter;
        reporter.resource_processed("ns", "pipelinerun", "ignored");
        reporter.garbage_collection_duration(Duration::from_secs(1), 3);
        reporter.active_resources("", "namespace", 5);
    }
}
