//! The abstract run model.
//!
//! A [`RunObject`] is the uniform view the engine takes of a PipelineRun or
//! TaskRun: identity, labels, annotations, owner references, and the slice
//! of status the retention rules need. Completion predicates live here as
//! pure functions of the object; API operations live behind the adapter
//! traits in the engine crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Label carrying the owning Pipeline name on a PipelineRun.
pub const LABEL_PIPELINE_NAME: &str = "tekton.dev/pipeline";

/// Label carrying the owning Task name on a TaskRun.
pub const LABEL_TASK_NAME: &str = "tekton.dev/task";

/// Label linking a TaskRun to the PipelineRun that created it.
pub const LABEL_PIPELINE_RUN_NAME: &str = "tekton.dev/pipelineRun";

/// The two run kinds the pruner manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunKind {
    /// A Tekton PipelineRun.
    PipelineRun,
    /// A Tekton TaskRun.
    TaskRun,
}

impl RunKind {
    /// The kind name as it appears in configuration documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PipelineRun => "pipelineRun",
            Self::TaskRun => "taskRun",
        }
    }

    /// The lowercase label value used on metrics.
    #[must_use]
    pub const fn metric_label(self) -> &'static str {
        match self {
            Self::PipelineRun => "pipelinerun",
            Self::TaskRun => "taskrun",
        }
    }

    /// The API kind string, as used in owner references.
    #[must_use]
    pub const fn api_kind(self) -> &'static str {
        match self {
            Self::PipelineRun => "PipelineRun",
            Self::TaskRun => "TaskRun",
        }
    }

    /// The label key whose value groups runs into a family.
    ///
    /// PipelineRuns group by their Pipeline name, TaskRuns by their Task
    /// name; the label value is the unit of history-limit accounting.
    #[must_use]
    pub const fn family_label_key(self) -> &'static str {
        match self {
            Self::PipelineRun => LABEL_PIPELINE_NAME,
            Self::TaskRun => LABEL_TASK_NAME,
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_kind())
    }
}

/// Status of the terminal `Succeeded` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The run succeeded.
    True,
    /// The run failed.
    False,
    /// The run has not reached a terminal state.
    #[default]
    Unknown,
}

/// The slice of run status the retention rules consume.
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    /// When the run started executing.
    pub start_time: Option<DateTime<Utc>>,
    /// When the run finished, if the controller recorded it.
    pub completion_time: Option<DateTime<Utc>>,
    /// Terminal condition status.
    pub succeeded: ConditionStatus,
    /// Last transition time of the terminal condition; stands in for
    /// `completion_time` when that field was never set.
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// A reference to the object that owns a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerReference {
    /// Kind of the owner, e.g. `PipelineRun`.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
}

/// Uniform view over a PipelineRun or TaskRun.
#[derive(Debug, Clone)]
pub struct RunObject {
    /// Which kind of run this is.
    pub kind: RunKind,
    /// Namespace the run lives in.
    pub namespace: String,
    /// Object name.
    pub name: String,
    /// Object labels.
    pub labels: BTreeMap<String, String>,
    /// Object annotations, including pruner-managed state.
    pub annotations: BTreeMap<String, String>,
    /// Owner references.
    pub owner_references: Vec<OwnerReference>,
    /// Object creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Run status.
    pub status: RunStatus,
}

impl RunObject {
    /// Creates a bare run with empty metadata and an unknown status.
    #[must_use]
    pub fn new(kind: RunKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: Vec::new(),
            created_at: DateTime::<Utc>::MIN_UTC,
            status: RunStatus::default(),
        }
    }

    /// Sets a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Marks the run as completed with the given outcome.
    #[must_use]
    pub fn completed(mut self, at: DateTime<Utc>, successful: bool) -> Self {
        self.status.start_time.get_or_insert(at);
        self.status.completion_time = Some(at);
        self.status.succeeded = if successful {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        self.status.last_transition_time = Some(at);
        self
    }

    /// Marks the run as started but not finished.
    #[must_use]
    pub fn running(mut self, since: DateTime<Utc>) -> Self {
        self.status.start_time = Some(since);
        self.status.completion_time = None;
        self.status.succeeded = ConditionStatus::Unknown;
        self
    }

    /// Adds an owner reference.
    #[must_use]
    pub fn owned_by(mut self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.owner_references.push(OwnerReference {
            kind: kind.into(),
            name: name.into(),
        });
        self
    }

    /// Returns true if the run reached a terminal state.
    ///
    /// A run is completed when it started and either carries a completion
    /// time or a non-Unknown terminal condition.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        if self.status.start_time.is_none() {
            return false;
        }
        if self.status.completion_time.is_some() {
            return true;
        }
        self.status.succeeded != ConditionStatus::Unknown
    }

    /// Returns true if the run completed successfully.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status.succeeded == ConditionStatus::True
    }

    /// Returns true if the run completed and did not succeed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.is_completed() && !self.is_successful()
    }

    /// Returns the instant the run finished.
    ///
    /// Falls back to the terminal condition's last transition time when the
    /// status has no completion time.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the run carries no usable finish
    /// time, which should not happen for a completed run.
    pub fn completed_at(&self) -> Result<DateTime<Utc>> {
        if let Some(at) = self.status.completion_time {
            return Ok(at);
        }
        if self.status.succeeded != ConditionStatus::Unknown {
            if let Some(at) = self.status.last_transition_time {
                return Ok(at);
            }
        }
        Err(Error::validation(format!(
            "unable to find the time when {}/{} finished",
            self.namespace, self.name
        )))
    }

    /// Returns true if this run is a TaskRun created by a PipelineRun.
    ///
    /// Such TaskRuns are pruned through their parent and are never
    /// processed standalone.
    #[must_use]
    pub fn owned_by_pipeline_run(&self) -> bool {
        self.kind == RunKind::TaskRun
            && self
                .owner_references
                .iter()
                .any(|owner| owner.kind == RunKind::PipelineRun.api_kind())
    }

    /// Returns the family value this run groups under, if labelled.
    #[must_use]
    pub fn family(&self) -> Option<&str> {
        self.labels
            .get(self.kind.family_label_key())
            .map(String::as_str)
    }

    /// The name used for policy lookups: the owning definition when
    /// labelled, else the run's own name.
    #[must_use]
    pub fn policy_name(&self) -> &str {
        self.family().unwrap_or(&self.name)
    }
}
