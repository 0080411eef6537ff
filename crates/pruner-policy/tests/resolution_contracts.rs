//! Contract tests pinning the policy resolution table.
//!
//! A single fixture document is resolved against a hand-written reference
//! table; any drift in tier precedence or enforcement capping shows up as
//! a row mismatch here.

use chrono::{DateTime, Utc};

use pruner_core::RunKind;
use pruner_policy::{EnforcedConfigLevel, NamespacePolicy, PolicyStore, ResourcePolicy};

const FIXTURE: &str = r"
ttlSecondsAfterFinished: 300
historyLimit: 15
workerCount: 4
namespaces:
  team-a:
    ttlSecondsAfterFinished: 120
    successfulHistoryLimit: 8
    pipelineRuns:
      - name: build
        ttlSecondsAfterFinished: 60
        failedHistoryLimit: 2
    taskRuns:
      - name: lint
        ttlSecondsAfterFinished: 30
  team-b:
    enforcedConfigLevel: global
    ttlSecondsAfterFinished: 90
  team-c:
    historyLimit: 6
";

fn fixture_store() -> PolicyStore {
    let now: DateTime<Utc> = "2025-03-01T12:00:00Z".parse().expect("timestamp");
    let store = PolicyStore::new();
    store.load_global(FIXTURE, now).expect("load fixture");

    // team-a also carries a namespaced overlay from its custom resource.
    store
        .update_namespace(
            "team-a",
            NamespacePolicy {
                failed_history_limit: Some(4),
                task_runs: vec![ResourcePolicy {
                    name: "lint".to_string(),
                    successful_history_limit: Some(1),
                    ..ResourcePolicy::default()
                }],
                ..NamespacePolicy::default()
            },
        )
        .expect("overlay");
    store
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Ttl,
    Success,
    Failed,
}

#[test]
fn twelve_row_reference_table() {
    let store = fixture_store();

    // (namespace, kind, name, field, expected)
    let rows: [(&str, RunKind, &str, Field, Option<i32>); 12] = [
        // Global resource entry for team-a/build wins for TTL.
        ("team-a", RunKind::PipelineRun, "build", Field::Ttl, Some(60)),
        // No entry for deploy: namespace root applies.
        ("team-a", RunKind::PipelineRun, "deploy", Field::Ttl, Some(120)),
        // TaskRun entry is in its own list.
        ("team-a", RunKind::TaskRun, "lint", Field::Ttl, Some(30)),
        ("team-a", RunKind::TaskRun, "unit", Field::Ttl, Some(120)),
        // Namespaced overlay beats the global namespace root.
        ("team-a", RunKind::TaskRun, "lint", Field::Success, Some(1)),
        ("team-a", RunKind::PipelineRun, "build", Field::Success, Some(8)),
        // Overlay root beats the global resource entry for failed limits.
        ("team-a", RunKind::PipelineRun, "build", Field::Failed, Some(4)),
        // team-b is pinned to the global tiers; its namespace TTL of 90
        // still applies because it lives in the global document.
        ("team-b", RunKind::PipelineRun, "anything", Field::Ttl, Some(90)),
        // No class limit anywhere in the global tiers: the root
        // historyLimit shorthand stands, even under the global pin.
        ("team-b", RunKind::TaskRun, "anything", Field::Success, Some(15)),
        // team-c: class limits absent at every tier fall back to the
        // namespace historyLimit shorthand.
        ("team-c", RunKind::TaskRun, "unit", Field::Success, Some(6)),
        ("team-c", RunKind::TaskRun, "unit", Field::Failed, Some(6)),
        // Unknown namespace inherits the global root.
        ("team-z", RunKind::PipelineRun, "build", Field::Ttl, Some(300)),
    ];

    for (namespace, kind, name, field, expected) in rows {
        let got = match field {
            Field::Ttl => store.ttl_seconds(kind, namespace, name),
            Field::Success => store.successful_history_limit(kind, namespace, name),
            Field::Failed => store.failed_history_limit(kind, namespace, name),
        }
        .expect("resolve");
        assert_eq!(
            got, expected,
            "row ({namespace}, {kind}, {name}, {field:?}) resolved to {got:?}, want {expected:?}"
        );
    }
}

#[test]
fn resolution_is_deterministic() {
    let store = fixture_store();
    let first = store
        .ttl_seconds(RunKind::PipelineRun, "team-a", "build")
        .expect("resolve");
    for _ in 0..100 {
        assert_eq!(
            store
                .ttl_seconds(RunKind::PipelineRun, "team-a", "build")
                .expect("resolve"),
            first
        );
    }
}

#[test]
fn enforced_global_pin_freezes_overlay_and_annotations_tier() {
    let now: DateTime<Utc> = "2025-03-01T12:00:00Z".parse().expect("timestamp");
    let store = PolicyStore::new();
    store
        .load_global(
            "enforcedConfigLevel: global\nttlSecondsAfterFinished: 600",
            now,
        )
        .expect("load");
    store
        .update_namespace(
            "ns-1",
            NamespacePolicy {
                ttl_seconds_after_finished: Some(10),
                ..NamespacePolicy::default()
            },
        )
        .expect("overlay");

    assert_eq!(
        store
            .enforced_config_level(RunKind::PipelineRun, "ns-1", "build")
            .expect("level"),
        EnforcedConfigLevel::Global
    );
    assert_eq!(
        store
            .ttl_seconds(RunKind::PipelineRun, "ns-1", "build")
            .expect("resolve"),
        Some(600)
    );
}

#[test]
fn worker_count_from_fixture() {
    let store = fixture_store();
    assert_eq!(store.worker_count().expect("count"), 4);
}
