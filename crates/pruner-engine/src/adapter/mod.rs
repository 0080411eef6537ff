//! Resource adapter seam.
//!
//! The engine talks to the cluster through two narrow async traits:
//! [`RunApi`], one value per run kind, and [`NamespaceApi`] for the
//! sweeper's namespace listing. Production adapters wrap the generated
//! Tekton clients; tests use the in-memory cluster in [`memory`].
//!
//! Annotation edits are expressed as removals plus additions and rendered
//! as a JSON-Patch document so concurrent patches to unrelated annotations
//! cannot clobber one another.

pub mod memory;

use async_trait::async_trait;

use pruner_core::annotations::json_patch_escape;
use pruner_core::{Result, RunKind, RunObject};

/// An equality label selector, rendered `key=value` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    /// Label key.
    pub key: String,
    /// Required label value.
    pub value: String,
}

impl LabelSelector {
    /// Creates a selector requiring `key=value`.
    #[must_use]
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns true if the run's labels satisfy this selector.
    #[must_use]
    pub fn matches(&self, run: &RunObject) -> bool {
        run.labels.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An annotation edit: keys to remove and key/value pairs to add or
/// replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationPatch {
    /// Annotation keys to remove.
    pub removals: Vec<String>,
    /// Annotations to add or replace.
    pub additions: Vec<(String, String)>,
}

impl AnnotationPatch {
    /// A patch that removes a single annotation.
    #[must_use]
    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            removals: vec![key.into()],
            additions: Vec::new(),
        }
    }

    /// A patch that adds or replaces a single annotation.
    #[must_use]
    pub fn add(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            removals: Vec::new(),
            additions: vec![(key.into(), value.into())],
        }
    }

    /// Returns true if the patch carries no edits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }

    /// Renders the edit as a JSON-Patch document.
    ///
    /// Annotation keys contain `/`, which JSON-Patch reserves as the path
    /// separator, so keys are RFC 6901-escaped.
    #[must_use]
    pub fn to_json_patch(&self) -> serde_json::Value {
        let mut ops = Vec::with_capacity(self.removals.len() + self.additions.len());
        for key in &self.removals {
            ops.push(serde_json::json!({
                "op": "remove",
                "path": format!("/metadata/annotations/{}", json_patch_escape(key)),
            }));
        }
        for (key, value) in &self.additions {
            ops.push(serde_json::json!({
                "op": "add",
                "path": format!("/metadata/annotations/{}", json_patch_escape(key)),
                "value": value,
            }));
        }
        serde_json::Value::Array(ops)
    }
}

/// API operations over one run kind.
///
/// One adapter value exists per kind; the engines hold it as a trait
/// object so PipelineRuns and TaskRuns flow through the same code.
#[async_trait]
pub trait RunApi: Send + Sync {
    /// The kind this adapter serves.
    fn kind(&self) -> RunKind;

    /// Lists runs in a namespace, optionally filtered by a label selector.
    async fn list(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RunObject>>;

    /// Fetches one run.
    async fn get(&self, namespace: &str, name: &str) -> Result<RunObject>;

    /// Deletes one run.
    ///
    /// Returns [`pruner_core::Error::NotFound`] when the run is already
    /// gone; callers treat that as success.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Applies an annotation edit to one run.
    ///
    /// Returns [`pruner_core::Error::NotFound`] when the run is already
    /// gone; callers treat that as success.
    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
    ) -> Result<()>;
}

/// Namespace listing for the sweeper.
#[async_trait]
pub trait NamespaceApi: Send + Sync {
    /// Lists all namespace names in the cluster.
    async fn list_namespaces(&self) -> Result<Vec<String>>;
}
