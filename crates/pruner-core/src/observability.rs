//! Observability infrastructure for the pruner.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors shared by the reconcilers
//! and the sweeper.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::run::RunKind;

static INIT: Once = Once::new();

/// Directives applied when `RUST_LOG` is unset: the pruner crates log at
/// info (deletions, sweep summaries, config reloads), everything the host
/// links in stays at warn.
const DEFAULT_FILTER: &str = "warn,pruner_core=info,pruner_policy=info,pruner_engine=info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at host startup. Safe to call multiple times; subsequent
/// calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Overrides the default filter, which keeps the pruner
///   crates at info and the rest of the process at warn
///   (e.g. `pruner_engine=debug` to watch individual reconciles)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| install_subscriber(format));
}

fn install_subscriber(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        // Flattened events keep one key space per log line, which is what
        // log-to-metrics pipelines scraping deletion reasons expect.
        LogFormat::Json => registry.with(fmt::layer().json().flatten_event(true)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

/// Creates a span for one run reconciliation.
#[must_use]
pub fn reconcile_span(kind: RunKind, namespace: &str, name: &str) -> Span {
    tracing::info_span!(
        "reconcile",
        kind = kind.metric_label(),
        namespace = namespace,
        name = name,
    )
}

/// Creates a span for one sweep of a namespace.
#[must_use]
pub fn sweep_span(namespace: &str) -> Span {
    tracing::info_span!("sweep", namespace = namespace)
}
