//! End-to-end retention scenarios over the event reconciler.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pruner_core::annotations::{TTL_SCHEDULE_AT, TTL_SECONDS_AFTER_FINISHED};
use pruner_core::run::{LABEL_PIPELINE_NAME, LABEL_PIPELINE_RUN_NAME, LABEL_TASK_NAME};
use pruner_core::{Clock, FixedClock, RunKind, RunObject};
use pruner_engine::prelude::*;
use pruner_policy::PolicyStore;

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().expect("timestamp")
}

struct Harness {
    cluster: Arc<InMemoryCluster>,
    clock: Arc<FixedClock>,
    reporter: Arc<RecordingReporter>,
    policy: Arc<PolicyStore>,
    pipeline_runs: EventReconciler,
    task_runs: EventReconciler,
}

fn harness(policy_yaml: &str, now: &str) -> Harness {
    let cluster = Arc::new(InMemoryCluster::new());
    let clock = Arc::new(FixedClock::new(ts(now)));
    let reporter = Arc::new(RecordingReporter::new());
    let policy = Arc::new(PolicyStore::new());
    policy.load_global(policy_yaml, ts(now)).expect("load policy");

    let pipeline_runs = EventReconciler::new(
        Arc::new(cluster.client(RunKind::PipelineRun)),
        Arc::clone(&policy),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&reporter) as Arc<dyn Reporter>,
    );
    let task_runs = EventReconciler::new(
        Arc::new(cluster.client(RunKind::TaskRun)),
        Arc::clone(&policy),
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&reporter) as Arc<dyn Reporter>,
    );

    Harness {
        cluster,
        clock,
        reporter,
        policy,
        pipeline_runs,
        task_runs,
    }
}

/// A run-level TTL annotation beats the namespace default, and nothing is
/// deleted before the schedule elapses.
#[tokio::test]
async fn resource_ttl_beats_namespace_default() {
    let h = harness(
        r"
ttlSecondsAfterFinished: 300
namespaces:
  ns-1:
    ttlSecondsAfterFinished: 120
",
        "2025-01-01T00:00:30Z",
    );
    let run = RunObject::new(RunKind::PipelineRun, "ns-1", "pr-a")
        .with_label(LABEL_PIPELINE_NAME, "deploy")
        .with_annotation(TTL_SECONDS_AFTER_FINISHED, "60")
        .created(ts("2024-12-31T23:59:00Z"))
        .completed(ts("2025-01-01T00:00:00Z"), true);
    h.cluster.put(run.clone());

    // 30 seconds in: scheduled for completion + 60s, not deleted.
    let err = h.pipeline_runs.reconcile(&run).await.unwrap_err();
    assert_eq!(err.requeue_after(), Some(std::time::Duration::from_secs(30)));
    assert!(h.cluster.run(RunKind::PipelineRun, "ns-1", "pr-a").is_some());
    assert_eq!(h.reporter.deleted_with_reason("ttl_expired"), 0);

    // 90 seconds in: past the annotation TTL, deleted.
    h.clock.set(ts("2025-01-01T00:01:30Z"));
    let run = h
        .cluster
        .run(RunKind::PipelineRun, "ns-1", "pr-a")
        .expect("run");
    h.pipeline_runs.reconcile(&run).await.expect("reconcile");

    assert!(h.cluster.run(RunKind::PipelineRun, "ns-1", "pr-a").is_none());
    assert_eq!(h.reporter.deleted_with_reason("ttl_expired"), 1);
}

/// With `enforcedConfigLevel: global` the run's annotation is ignored and
/// the global TTL stands.
#[tokio::test]
async fn enforced_global_pin_ignores_annotation() {
    let h = harness(
        "enforcedConfigLevel: global\nttlSecondsAfterFinished: 600",
        "2025-01-01T00:00:00Z",
    );
    let run = RunObject::new(RunKind::PipelineRun, "ns-1", "pr-a")
        .with_label(LABEL_PIPELINE_NAME, "deploy")
        .with_annotation(TTL_SECONDS_AFTER_FINISHED, "10")
        .completed(ts("2025-01-01T00:00:00Z"), true);
    h.cluster.put(run.clone());

    let err = h.pipeline_runs.reconcile(&run).await.unwrap_err();
    assert_eq!(
        err.requeue_after(),
        Some(std::time::Duration::from_secs(600))
    );

    let stored = h
        .cluster
        .run(RunKind::PipelineRun, "ns-1", "pr-a")
        .expect("run");
    assert_eq!(
        stored.annotations.get(TTL_SCHEDULE_AT).map(String::as_str),
        Some("2025-01-01T00:10:00Z")
    );
}

/// Five successful siblings with a limit of two: the three oldest go, in
/// exactly three delete calls.
#[tokio::test]
async fn history_overflow_is_deterministic() {
    let h = harness("successfulHistoryLimit: 2", "2025-01-01T01:00:00Z");
    let finishes = [
        ("a", "2025-01-01T00:10:00Z"),
        ("b", "2025-01-01T00:20:00Z"),
        ("c", "2025-01-01T00:30:00Z"),
        ("d", "2025-01-01T00:40:00Z"),
        ("e", "2025-01-01T00:50:00Z"),
    ];
    for (name, finished) in finishes {
        h.cluster.put(
            RunObject::new(RunKind::TaskRun, "ns-1", name)
                .with_label(LABEL_TASK_NAME, "build")
                .completed(ts(finished), true),
        );
    }

    let input = h.cluster.run(RunKind::TaskRun, "ns-1", "e").expect("e");
    h.task_runs.reconcile(&input).await.expect("reconcile");

    let deleted: Vec<String> = h.cluster.deleted().into_iter().map(|(_, _, n)| n).collect();
    assert_eq!(deleted, vec!["a", "b", "c"]);
    assert!(h.cluster.run(RunKind::TaskRun, "ns-1", "d").is_some());
    assert!(h.cluster.run(RunKind::TaskRun, "ns-1", "e").is_some());
    assert_eq!(h.reporter.deleted_with_reason("history_limit"), 3);
}

/// A TaskRun owned by a PipelineRun is invisible to both engines.
#[tokio::test]
async fn pipeline_owned_task_run_is_left_alone() {
    let h = harness(
        "ttlSecondsAfterFinished: 0\nsuccessfulHistoryLimit: 1",
        "2025-01-01T01:00:00Z",
    );
    let child = RunObject::new(RunKind::TaskRun, "ns-1", "tr-child")
        .with_label(LABEL_TASK_NAME, "build")
        .with_label(LABEL_PIPELINE_RUN_NAME, "foo")
        .owned_by("PipelineRun", "foo")
        .completed(ts("2025-01-01T00:00:00Z"), true);
    h.cluster.put(child.clone());

    h.task_runs.reconcile(&child).await.expect("reconcile");

    assert!(h.cluster.run(RunKind::TaskRun, "ns-1", "tr-child").is_some());
    assert!(h.cluster.deleted().is_empty());
    assert!(h.cluster.patches().is_empty());

    // Nor does it count against a standalone sibling's family: the solo
    // run is under the limit of one and is collected by TTL alone.
    let standalone = RunObject::new(RunKind::TaskRun, "ns-1", "tr-solo")
        .with_label(LABEL_TASK_NAME, "build")
        .completed(ts("2025-01-01T00:30:00Z"), true);
    h.cluster.put(standalone.clone());
    h.task_runs.reconcile(&standalone).await.expect("reconcile");

    assert!(h.cluster.run(RunKind::TaskRun, "ns-1", "tr-child").is_some());
    let deleted: Vec<String> = h.cluster.deleted().into_iter().map(|(_, _, n)| n).collect();
    assert_eq!(deleted, vec!["tr-solo"]);
    assert_eq!(h.reporter.deleted_with_reason("history_limit"), 0);
    assert_eq!(h.reporter.deleted_with_reason("ttl_expired"), 1);
}

/// Limits of `-1` disable history pruning entirely.
#[tokio::test]
async fn unlimited_history_never_deletes() {
    let h = harness(
        "successfulHistoryLimit: -1\nfailedHistoryLimit: -1",
        "2025-01-01T01:00:00Z",
    );
    for i in 0..25 {
        h.cluster.put(
            RunObject::new(RunKind::TaskRun, "ns-1", format!("run-{i:02}"))
                .with_label(LABEL_TASK_NAME, "build")
                .completed(ts("2025-01-01T00:30:00Z"), i % 3 == 0),
        );
    }

    let input = h
        .cluster
        .run(RunKind::TaskRun, "ns-1", "run-00")
        .expect("run");
    h.task_runs.reconcile(&input).await.expect("reconcile");
    assert!(h.cluster.deleted().is_empty());
}

/// Re-reconciling an already-scheduled run with an unchanged clock issues
/// no further writes.
#[tokio::test]
async fn repeated_reconcile_is_write_free() {
    let h = harness(
        "ttlSecondsAfterFinished: 300\nsuccessfulHistoryLimit: 5",
        "2025-01-01T00:00:00Z",
    );
    let run = RunObject::new(RunKind::TaskRun, "ns-1", "tr-a")
        .with_label(LABEL_TASK_NAME, "build")
        .completed(ts("2025-01-01T00:00:00Z"), true);
    h.cluster.put(run.clone());

    let err = h.task_runs.reconcile(&run).await.unwrap_err();
    assert!(err.is_requeue());
    let writes = h.cluster.patches().len(); // history stamp + ttl stamp
    assert_eq!(writes, 2);

    for _ in 0..3 {
        let run = h
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        let err = h.task_runs.reconcile(&run).await.unwrap_err();
        assert!(err.is_requeue());
        assert_eq!(h.cluster.patches().len(), writes);
    }
}

/// Event-path and sweep-path deletes racing on the same run: one delete
/// succeeds, the other sees 404 as success, and neither surfaces an error.
#[tokio::test]
async fn concurrent_deletes_are_idempotent() {
    let h = harness("ttlSecondsAfterFinished: 60", "2025-01-01T01:00:00Z");
    let run = RunObject::new(RunKind::TaskRun, "ns-1", "tr-a")
        .with_label(LABEL_TASK_NAME, "build")
        .with_annotation(TTL_SCHEDULE_AT, "2025-01-01T00:01:00Z")
        .completed(ts("2025-01-01T00:00:00Z"), true);
    h.cluster.put(run.clone());

    let engine_a = TtlEngine::new(
        Arc::new(h.cluster.client(RunKind::TaskRun)),
        Arc::clone(&h.policy),
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        Arc::clone(&h.reporter) as Arc<dyn Reporter>,
    );
    let engine_b = TtlEngine::new(
        Arc::new(h.cluster.client(RunKind::TaskRun)),
        Arc::clone(&h.policy),
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        Arc::clone(&h.reporter) as Arc<dyn Reporter>,
    );

    let (a, b) = tokio::join!(engine_a.process(&run), engine_b.process(&run));
    let outcomes = [a.expect("first caller"), b.expect("second caller")];

    assert!(outcomes.contains(&TtlOutcome::Deleted));
    assert!(outcomes.contains(&TtlOutcome::AlreadyGone));
    assert_eq!(h.reporter.deleted_with_reason("ttl_expired"), 1);
    assert_eq!(h.reporter.deleted_with_reason("already_gone"), 1);
    assert!(h.reporter.events_of("error").is_empty());
}

/// No delete is ever issued while the clock sits before the stamped
/// deadline, however often the run is reconciled.
#[tokio::test]
async fn no_delete_before_schedule() {
    let h = harness("ttlSecondsAfterFinished: 3600", "2025-01-01T00:00:00Z");
    let run = RunObject::new(RunKind::TaskRun, "ns-1", "tr-a")
        .with_label(LABEL_TASK_NAME, "build")
        .completed(ts("2025-01-01T00:00:00Z"), true);
    h.cluster.put(run.clone());

    for minutes in [0_i64, 10, 30, 59] {
        h.clock
            .set(ts("2025-01-01T00:00:00Z") + chrono::Duration::minutes(minutes));
        let run = h
            .cluster
            .run(RunKind::TaskRun, "ns-1", "tr-a")
            .expect("run");
        let err = h.task_runs.reconcile(&run).await.unwrap_err();
        assert!(err.is_requeue(), "minute {minutes} must requeue");
        assert!(h.cluster.deleted().is_empty());
    }

    h.clock.set(ts("2025-01-01T01:00:00Z"));
    let run = h
        .cluster
        .run(RunKind::TaskRun, "ns-1", "tr-a")
        .expect("run");
    h.task_runs.reconcile(&run).await.expect("due now");
    assert_eq!(h.cluster.deleted().len(), 1);
}
