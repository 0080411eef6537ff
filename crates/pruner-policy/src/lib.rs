//! # pruner-policy
//!
//! Layered retention policy for the Tekton run retention engine.
//!
//! Two pieces:
//!
//! - [`document`]: the serde types of the YAML policy document carried in
//!   the pruner configuration map, and of the per-namespace custom
//!   resource spec that mirrors one namespace entry
//! - [`store`]: the thread-safe [`PolicyStore`] that holds the global
//!   document plus the namespaced overlay and resolves effective values by
//!   precedence, honouring the `enforcedConfigLevel` cap
//!
//! Resolution is pure: for a fixed pair of documents, a fixed
//! `(namespace, kind, name, field)` always yields the same value.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod document;
pub mod store;

pub use document::{
    DEFAULT_WORKER_COUNT, EnforcedConfigLevel, NamespacePolicy, PolicyDocument, PolicyField,
    ResourcePolicy,
};
pub use store::PolicyStore;
