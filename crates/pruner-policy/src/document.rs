//! Retention policy document types.
//!
//! The policy document is the single text field of the pruner's
//! configuration map: a tree of optional values keyed
//! `namespace -> (pipelineRuns|taskRuns) -> name`, plus namespace-root and
//! global-root defaults. Absence at any tier means "inherit"; a limit of
//! `-1` means unlimited.
//!
//! The same per-namespace shape is also the spec of the namespaced custom
//! resource, where the resource lists go by the `pipelines:`/`tasks:`
//! aliases.

use serde::{Deserialize, Serialize};

use pruner_core::{Error, Result, RunKind};

/// Sweeper worker pool size when the document does not set `workerCount`.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Cap on which precedence tier may override a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcedConfigLevel {
    /// Only the global document may supply the value.
    Global,
    /// Namespace policies may override the global document.
    Namespace,
    /// Per-resource entries and run annotations may override everything.
    #[default]
    Resource,
}

impl EnforcedConfigLevel {
    /// The level name as reported on metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Namespace => "namespace",
            Self::Resource => "resource",
        }
    }
}

/// The per-field selector used by the resolution walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyField {
    /// Seconds after finish before a run may be deleted.
    TtlSecondsAfterFinished,
    /// Maximum retained successful runs per family.
    SuccessfulHistoryLimit,
    /// Maximum retained failed runs per family.
    FailedHistoryLimit,
    /// Fallback limit applied to both history classes.
    HistoryLimit,
}

/// Policy entry for one named Pipeline or Task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourcePolicy {
    /// The Pipeline or Task name this entry applies to.
    pub name: String,
    /// Override cap at this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced_config_level: Option<EnforcedConfigLevel>,
    /// TTL seconds after finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    /// Successful history limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<i32>,
    /// Failed history limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<i32>,
    /// Fallback for both history classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<i32>,
}

impl ResourcePolicy {
    fn field(&self, field: PolicyField) -> Option<i32> {
        match field {
            PolicyField::TtlSecondsAfterFinished => self.ttl_seconds_after_finished,
            PolicyField::SuccessfulHistoryLimit => self.successful_history_limit,
            PolicyField::FailedHistoryLimit => self.failed_history_limit,
            PolicyField::HistoryLimit => self.history_limit,
        }
    }
}

/// Policy for one namespace: root defaults plus per-resource entries.
///
/// Doubles as the spec of the namespaced custom resource, which spells the
/// lists `pipelines:` and `tasks:`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NamespacePolicy {
    /// Override cap at this namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced_config_level: Option<EnforcedConfigLevel>,
    /// Namespace-root TTL seconds after finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    /// Namespace-root successful history limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<i32>,
    /// Namespace-root failed history limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<i32>,
    /// Namespace-root fallback for both history classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<i32>,
    /// Per-Pipeline entries.
    #[serde(default, alias = "pipelines", skip_serializing_if = "Vec::is_empty")]
    pub pipeline_runs: Vec<ResourcePolicy>,
    /// Per-Task entries.
    #[serde(default, alias = "tasks", skip_serializing_if = "Vec::is_empty")]
    pub task_runs: Vec<ResourcePolicy>,
}

impl NamespacePolicy {
    /// Returns the per-resource entries for a run kind.
    #[must_use]
    pub fn resources(&self, kind: RunKind) -> &[ResourcePolicy] {
        match kind {
            RunKind::PipelineRun => &self.pipeline_runs,
            RunKind::TaskRun => &self.task_runs,
        }
    }

    /// Looks up the entry for a named resource.
    #[must_use]
    pub fn resource(&self, kind: RunKind, name: &str) -> Option<&ResourcePolicy> {
        self.resources(kind).iter().find(|r| r.name == name)
    }

    pub(crate) fn root_field(&self, field: PolicyField) -> Option<i32> {
        match field {
            PolicyField::TtlSecondsAfterFinished => self.ttl_seconds_after_finished,
            PolicyField::SuccessfulHistoryLimit => self.successful_history_limit,
            PolicyField::FailedHistoryLimit => self.failed_history_limit,
            PolicyField::HistoryLimit => self.history_limit,
        }
    }

    pub(crate) fn resource_field(
        &self,
        kind: RunKind,
        name: &str,
        field: PolicyField,
    ) -> Option<i32> {
        self.resource(kind, name).and_then(|r| r.field(field))
    }
}

/// The global policy document: root defaults plus per-namespace trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyDocument {
    /// Global override cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced_config_level: Option<EnforcedConfigLevel>,
    /// Global-root TTL seconds after finish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i32>,
    /// Global-root successful history limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_history_limit: Option<i32>,
    /// Global-root failed history limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_history_limit: Option<i32>,
    /// Global-root fallback for both history classes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<i32>,
    /// Sweeper worker pool size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    /// Per-namespace policy trees.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub namespaces: std::collections::BTreeMap<String, NamespacePolicy>,
}

impl PolicyDocument {
    /// Parses a policy document from the configuration map's YAML text.
    ///
    /// An empty or whitespace-only document parses to the default
    /// (everything inherits, nothing prunes).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] on malformed YAML; the caller keeps
    /// the previously loaded document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|err| Error::config_parse(err.to_string()))
    }

    pub(crate) fn root_field(&self, field: PolicyField) -> Option<i32> {
        match field {
            PolicyField::TtlSecondsAfterFinished => self.ttl_seconds_after_finished,
            PolicyField::SuccessfulHistoryLimit => self.successful_history_limit,
            PolicyField::FailedHistoryLimit => self.failed_history_limit,
            PolicyField::HistoryLimit => self.history_limit,
        }
    }
}
