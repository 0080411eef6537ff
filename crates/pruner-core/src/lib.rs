//! # pruner-core
//!
//! Shared leaves of the Tekton run retention engine.
//!
//! This crate carries the types every other pruner crate builds on:
//!
//! - **Run model**: a uniform view over PipelineRun and TaskRun with the
//!   completion predicates the retention rules need
//! - **Error taxonomy**: one classified error per API disposition, including
//!   the typed requeue signal
//! - **Clock**: injected wall-clock so TTL logic is testable without sleeping
//! - **Annotations**: the pruner's persisted state keys and value codecs
//! - **Observability**: logging bootstrap and span constructors
//!
//! ## Guarantees
//!
//! - No Kubernetes client types leak into this crate; adapters live in
//!   `pruner-engine`
//! - All persisted state is annotation-shaped; nothing here owns storage

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod annotations;
pub mod clock;
pub mod error;
pub mod observability;
pub mod run;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use run::{ConditionStatus, OwnerReference, RunKind, RunObject, RunStatus};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::annotations;
    pub use crate::clock::{Clock, FixedClock, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::observability::{LogFormat, init_logging};
    pub use crate::run::{ConditionStatus, OwnerReference, RunKind, RunObject, RunStatus};
}
