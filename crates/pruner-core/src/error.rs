//! Error types and result aliases for the retention engine.
//!
//! Every API failure the engine can observe is classified into one of the
//! variants below, and the classification drives disposition: retryable
//! errors are returned to the host for re-enqueue, `NotFound` is absorbed as
//! success by the callers that tolerate it, and `Requeue` is not an error at
//! all but a typed "not yet due" signal carried on the error channel so the
//! host can re-enqueue with a delay.

use std::time::Duration;

/// The result type used throughout the retention engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while pruning runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The object no longer exists on the API server (HTTP 404).
    #[error("not found: {kind} {namespace}/{name}")]
    NotFound {
        /// Resource kind that was looked up.
        kind: String,
        /// Namespace of the missing object.
        namespace: String,
        /// Name of the missing object.
        name: String,
    },

    /// A write conflicted with a concurrent update (HTTP 409).
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting write.
        message: String,
    },

    /// The API server timed out serving the request.
    #[error("server timeout: {message}")]
    ServerTimeout {
        /// Description of the timeout.
        message: String,
    },

    /// The API server is throttling the client (HTTP 429).
    #[error("too many requests: {message}")]
    TooManyRequests {
        /// Description of the throttled request.
        message: String,
    },

    /// The client lacks RBAC permission for the operation (HTTP 403).
    #[error("forbidden: {message}")]
    Forbidden {
        /// Description of the denied operation.
        message: String,
    },

    /// A pruner annotation or status field failed to parse.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the malformed value.
        message: String,
    },

    /// The run is not yet due; the host should re-enqueue after `after`.
    ///
    /// Never logged at error severity.
    #[error("requeue after {after:?}")]
    Requeue {
        /// Delay until the run becomes eligible.
        after: Duration,
    },

    /// The configuration document failed to parse; the previous policy
    /// document is retained.
    #[error("config parse error: {message}")]
    ConfigParse {
        /// Description of the parse failure.
        message: String,
    },

    /// The operation was aborted by a cancelled context.
    #[error("operation cancelled")]
    Cancelled,

    /// A panic was recovered at the reconcile boundary.
    #[error("panic recovered: {message}")]
    Panic {
        /// Captured panic payload, if printable.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a not-found error for a run.
    #[must_use]
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a config-parse error.
    #[must_use]
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a requeue signal with the given delay.
    #[must_use]
    pub const fn requeue(after: Duration) -> Self {
        Self::Requeue { after }
    }

    /// Returns true if the host should re-enqueue and retry the key.
    ///
    /// Covers transient API failures only; `Requeue` is a scheduling signal,
    /// not a retryable failure, and `Cancelled` must never be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::ServerTimeout { .. } | Self::TooManyRequests { .. }
        )
    }

    /// Returns true for the typed "not yet due" signal.
    #[must_use]
    pub const fn is_requeue(&self) -> bool {
        matches!(self, Self::Requeue { .. })
    }

    /// Returns the requeue delay, if this is a requeue signal.
    #[must_use]
    pub const fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Requeue { after } => Some(*after),
            _ => None,
        }
    }

    /// Returns true if the object was already gone (HTTP 404).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the metric reason label for this error.
    pub fn metric_reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "already_gone",
            Self::Conflict { .. } => "conflict",
            Self::ServerTimeout { .. } => "server_timeout",
            Self::TooManyRequests { .. } => "rate_limited",
            Self::Forbidden { .. } => "permission_denied",
            Self::Validation { .. } => "validation_error",
            Self::Requeue { .. } => "requeue",
            Self::ConfigParse { .. } => "config_parse",
            Self::Cancelled => "cancelled",
            Self::Panic { .. } => "panic",
            Self::Internal { .. } => "internal",
        }
    }
}
