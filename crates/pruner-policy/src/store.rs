//! The policy store: thread-safe holder of the global document and the
//! namespaced overlay, with layered value resolution.
//!
//! Resolution picks a single effective value per
//! `(namespace, kind, name, field)` from the precedence tiers, highest
//! first: namespaced resource entry, namespaced root, global resource
//! entry, global namespace root, global root. The resolved
//! `enforcedConfigLevel` caps which tiers participate: `global` restricts
//! the walk to the global document's tiers, `namespace` skips the
//! namespaced resource entries, `resource` allows everything. Run
//! annotations sit above all of these but are resolved by the engines,
//! which consult them only when the cap allows resource-level overrides.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use pruner_core::{Error, Result, RunKind};

use crate::document::{
    DEFAULT_WORKER_COUNT, EnforcedConfigLevel, NamespacePolicy, PolicyDocument, PolicyField,
};

/// Thread-safe policy lookup.
///
/// Reads take a shared lock; writes happen only on configuration reload or
/// namespace policy change and atomically replace the affected document.
#[derive(Debug, Default)]
pub struct PolicyStore {
    inner: RwLock<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    global: PolicyDocument,
    namespaced: BTreeMap<String, NamespacePolicy>,
    loaded_at: Option<DateTime<Utc>>,
}

/// Converts a lock poison error to an internal error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("policy store lock poisoned")
}

impl PolicyStore {
    /// Creates an empty store; everything inherits, nothing prunes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the global document from the configuration map's YAML text.
    ///
    /// `now` becomes the store's `loaded_at` stamp, which dependent caches
    /// (the `history-checked-at` annotations) compare against.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] on malformed YAML; the previous
    /// document is retained and `loaded_at` does not move.
    pub fn load_global(&self, yaml: &str, now: DateTime<Utc>) -> Result<()> {
        let document = PolicyDocument::from_yaml(yaml)?;
        let mut state = self.inner.write().map_err(poison_err)?;
        tracing::debug!(
            namespaces = document.namespaces.len(),
            worker_count = ?document.worker_count,
            "loaded global pruner config"
        );
        state.global = document;
        state.loaded_at = Some(now);
        Ok(())
    }

    /// Installs or replaces the namespaced policy overlay for `namespace`.
    ///
    /// Fed by the per-namespace custom resource.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn update_namespace(&self, namespace: &str, policy: NamespacePolicy) -> Result<()> {
        let mut state = self.inner.write().map_err(poison_err)?;
        state.namespaced.insert(namespace.to_string(), policy);
        Ok(())
    }

    /// Clears the namespaced policy overlay for `namespace` only.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.inner.write().map_err(poison_err)?;
        state.namespaced.remove(namespace);
        Ok(())
    }

    /// Returns when the global document was last loaded successfully.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn loaded_at(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.inner.read().map_err(poison_err)?;
        Ok(state.loaded_at)
    }

    /// Returns the sweeper worker pool size.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn worker_count(&self) -> Result<usize> {
        let state = self.inner.read().map_err(poison_err)?;
        Ok(state
            .global
            .worker_count
            .filter(|count| *count > 0)
            .unwrap_or(DEFAULT_WORKER_COUNT))
    }

    /// Resolves the enforced config level for a resource.
    ///
    /// Fixed resolution order, independent of the level itself: global
    /// resource entry, global namespace root, global root, namespaced
    /// resource entry, namespaced root, then the `resource` default.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn enforced_config_level(
        &self,
        kind: RunKind,
        namespace: &str,
        name: &str,
    ) -> Result<EnforcedConfigLevel> {
        let state = self.inner.read().map_err(poison_err)?;
        Ok(resolve_enforced_level(&state, kind, namespace, name))
    }

    /// Resolves the effective TTL seconds for a resource.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn ttl_seconds(&self, kind: RunKind, namespace: &str, name: &str) -> Result<Option<i32>> {
        self.resolve(kind, namespace, name, PolicyField::TtlSecondsAfterFinished)
    }

    /// Resolves the effective successful history limit for a resource.
    ///
    /// Falls back to the `historyLimit` shorthand when no tier defines the
    /// class-specific limit.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn successful_history_limit(
        &self,
        kind: RunKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        self.resolve_history(kind, namespace, name, PolicyField::SuccessfulHistoryLimit)
    }

    /// Resolves the effective failed history limit for a resource.
    ///
    /// Falls back to the `historyLimit` shorthand when no tier defines the
    /// class-specific limit.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the store lock is poisoned.
    pub fn failed_history_limit(
        &self,
        kind: RunKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        self.resolve_history(kind, namespace, name, PolicyField::FailedHistoryLimit)
    }

    fn resolve_history(
        &self,
        kind: RunKind,
        namespace: &str,
        name: &str,
        field: PolicyField,
    ) -> Result<Option<i32>> {
        let state = self.inner.read().map_err(poison_err)?;
        let level = resolve_enforced_level(&state, kind, namespace, name);
        let value = resolve_field(&state, kind, namespace, name, field, level)
            .or_else(|| {
                resolve_field(&state, kind, namespace, name, PolicyField::HistoryLimit, level)
            });
        Ok(value)
    }

    fn resolve(
        &self,
        kind: RunKind,
        namespace: &str,
        name: &str,
        field: PolicyField,
    ) -> Result<Option<i32>> {
        let state = self.inner.read().map_err(poison_err)?;
        let level = resolve_enforced_level(&state, kind, namespace, name);
        Ok(resolve_field(&state, kind, namespace, name, field, level))
    }
}

/// Finds an enforced level in a namespace tree: resource entry first, then
/// the namespace root.
fn enforced_level_in(
    namespaces: &BTreeMap<String, NamespacePolicy>,
    kind: RunKind,
    namespace: &str,
    name: &str,
) -> Option<EnforcedConfigLevel> {
    let ns = namespaces.get(namespace)?;
    if let Some(level) = ns.resource(kind, name).and_then(|r| r.enforced_config_level) {
        return Some(level);
    }
    ns.enforced_config_level
}

fn resolve_enforced_level(
    state: &StoreState,
    kind: RunKind,
    namespace: &str,
    name: &str,
) -> EnforcedConfigLevel {
    enforced_level_in(&state.global.namespaces, kind, namespace, name)
        .or(state.global.enforced_config_level)
        .or_else(|| enforced_level_in(&state.namespaced, kind, namespace, name))
        .unwrap_or_default()
}

/// Walks the precedence tiers for one field, starting at the tier the
/// enforced level allows.
fn resolve_field(
    state: &StoreState,
    kind: RunKind,
    namespace: &str,
    name: &str,
    field: PolicyField,
    level: EnforcedConfigLevel,
) -> Option<i32> {
    let mut value = None;

    if level == EnforcedConfigLevel::Resource {
        value = state
            .namespaced
            .get(namespace)
            .and_then(|ns| ns.resource_field(kind, name, field));
    }

    if level != EnforcedConfigLevel::Global && value.is_none() {
        value = state
            .namespaced
            .get(namespace)
            .and_then(|ns| ns.root_field(field));
    }

    if value.is_none() {
        value = state
            .global
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.resource_field(kind, name, field));
    }
    if value.is_none() {
        value = state
            .global
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.root_field(field));
    }
    if value.is_none() {
        value = state.global.root_field(field);
    }

    value
}
