//! In-memory cluster implementation for testing.
//!
//! [`InMemoryCluster`] holds runs and namespaces behind an `RwLock` and
//! records every delete and annotation patch so tests can assert exactly
//! which writes the engine issued. Deleting an absent run returns the same
//! not-found error a real API server would, which is how the idempotent
//! 404 paths get exercised.
//!
//! Not suitable for anything but tests: no watch semantics, no resource
//! versions, no persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use pruner_core::{Error, Result, RunKind, RunObject};

use super::{AnnotationPatch, LabelSelector, NamespaceApi, RunApi};

/// A recorded annotation patch, kept for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedPatch {
    /// Kind the patch targeted.
    pub kind: RunKind,
    /// Namespace of the patched run.
    pub namespace: String,
    /// Name of the patched run.
    pub name: String,
    /// The edit that was applied.
    pub patch: AnnotationPatch,
}

#[derive(Debug, Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    runs: BTreeMap<(String, RunKind, String), RunObject>,
    deletes: Vec<(RunKind, String, String)>,
    patches: Vec<RecordedPatch>,
}

/// Converts a lock poison error to an internal error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("in-memory cluster lock poisoned")
}

/// In-memory stand-in for the cluster, shared by both kind clients and the
/// namespace lister.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    fail_next_delete: Mutex<Option<Error>>,
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a [`RunApi`] handle for one kind, backed by this cluster.
    #[must_use]
    pub fn client(self: &Arc<Self>, kind: RunKind) -> KindClient {
        KindClient {
            cluster: Arc::clone(self),
            kind,
        }
    }

    /// Registers a namespace.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    pub fn add_namespace(&self, namespace: impl Into<String>) {
        let mut state = self.state.write().expect("cluster lock poisoned");
        state.namespaces.insert(namespace.into());
    }

    /// Inserts or replaces a run, registering its namespace as a side
    /// effect.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    pub fn put(&self, run: RunObject) {
        let mut state = self.state.write().expect("cluster lock poisoned");
        state.namespaces.insert(run.namespace.clone());
        state
            .runs
            .insert((run.namespace.clone(), run.kind, run.name.clone()), run);
    }

    /// Returns a copy of a stored run, if present.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    #[must_use]
    pub fn run(&self, kind: RunKind, namespace: &str, name: &str) -> Option<RunObject> {
        let state = self.state.read().expect("cluster lock poisoned");
        state
            .runs
            .get(&(namespace.to_string(), kind, name.to_string()))
            .cloned()
    }

    /// Names of runs deleted so far, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    #[must_use]
    pub fn deleted(&self) -> Vec<(RunKind, String, String)> {
        let state = self.state.read().expect("cluster lock poisoned");
        state.deletes.clone()
    }

    /// Annotation patches applied so far, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    #[must_use]
    pub fn patches(&self) -> Vec<RecordedPatch> {
        let state = self.state.read().expect("cluster lock poisoned");
        state.patches.clone()
    }

    /// Arranges for the next delete to fail with `err` instead.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned; test-only type.
    pub fn fail_next_delete(&self, err: Error) {
        let mut slot = self.fail_next_delete.lock().expect("cluster lock poisoned");
        *slot = Some(err);
    }

    fn take_injected_delete_failure(&self) -> Result<Option<Error>> {
        let mut slot = self.fail_next_delete.lock().map_err(poison_err)?;
        Ok(slot.take())
    }
}

#[async_trait]
impl NamespaceApi for InMemoryCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.namespaces.iter().cloned().collect())
    }
}

/// [`RunApi`] view over one kind of an [`InMemoryCluster`].
#[derive(Debug, Clone)]
pub struct KindClient {
    cluster: Arc<InMemoryCluster>,
    kind: RunKind,
}

#[async_trait]
impl RunApi for KindClient {
    fn kind(&self) -> RunKind {
        self.kind
    }

    async fn list(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> Result<Vec<RunObject>> {
        let state = self.cluster.state.read().map_err(poison_err)?;
        Ok(state
            .runs
            .values()
            .filter(|run| run.kind == self.kind && run.namespace == namespace)
            .filter(|run| selector.map_or(true, |s| s.matches(run)))
            .cloned()
            .collect())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<RunObject> {
        let state = self.cluster.state.read().map_err(poison_err)?;
        state
            .runs
            .get(&(namespace.to_string(), self.kind, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(self.kind.api_kind(), namespace, name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        if let Some(err) = self.cluster.take_injected_delete_failure()? {
            return Err(err);
        }

        let mut state = self.cluster.state.write().map_err(poison_err)?;
        let removed = state
            .runs
            .remove(&(namespace.to_string(), self.kind, name.to_string()));
        if removed.is_none() {
            return Err(Error::not_found(self.kind.api_kind(), namespace, name));
        }
        state
            .deletes
            .push((self.kind, namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
    ) -> Result<()> {
        let mut state = self.cluster.state.write().map_err(poison_err)?;
        let Some(run) = state
            .runs
            .get_mut(&(namespace.to_string(), self.kind, name.to_string()))
        else {
            return Err(Error::not_found(self.kind.api_kind(), namespace, name));
        };

        for key in &patch.removals {
            run.annotations.remove(key);
        }
        for (key, value) in &patch.additions {
            run.annotations.insert(key.clone(), value.clone());
        }

        state.patches.push(RecordedPatch {
            kind: self.kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }
}
