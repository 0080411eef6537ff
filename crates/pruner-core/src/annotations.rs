//! Pruner annotation keys and value codecs.
//!
//! Annotations are the only state the engine persists: per-resource policy
//! overrides written by users, and the two memoization stamps written by the
//! controller. Timestamps are RFC3339 at second precision so a stamp
//! round-trips through the API server unchanged.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Per-resource TTL override, seconds after finish.
pub const TTL_SECONDS_AFTER_FINISHED: &str = "pruner.tekton.dev/ttlSecondsAfterFinished";

/// Per-resource successful history limit override.
pub const SUCCESSFUL_HISTORY_LIMIT: &str = "pruner.tekton.dev/successfulHistoryLimit";

/// Per-resource failed history limit override.
pub const FAILED_HISTORY_LIMIT: &str = "pruner.tekton.dev/failedHistoryLimit";

/// Wall-clock time at which the run becomes eligible for TTL deletion.
///
/// Written once after completion; presence means "already scheduled".
pub const TTL_SCHEDULE_AT: &str = "pruner.tekton.dev/ttl-schedule-at";

/// Timestamp of the last history-limit evaluation for this run.
///
/// Cleared by the sweeper when the policy document is reloaded after the
/// stamp was written.
pub const HISTORY_CHECKED_AT: &str = "pruner.tekton.dev/history-checked-at";

/// Parses an integer annotation value.
///
/// # Errors
///
/// Returns a validation error naming the key when the value is not an
/// `i32`; callers strip the offending annotation and continue.
pub fn parse_i32(key: &str, value: &str) -> Result<i32> {
    value.trim().parse().map_err(|_| {
        Error::validation(format!("annotation {key}: {value:?} is not an integer"))
    })
}

/// Parses an RFC3339 timestamp annotation value.
///
/// # Errors
///
/// Returns a validation error naming the key when the value is not
/// RFC3339; callers strip the offending annotation and continue.
pub fn parse_rfc3339(key: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| Error::validation(format!("annotation {key}: {value:?} is not RFC3339")))
}

/// Formats a timestamp for annotation storage.
#[must_use]
pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Escapes an annotation key for use in a JSON-Patch path.
///
/// JSON-Patch reserves `/` as the path separator; RFC 6901 escapes it as
/// `~1` (and `~` as `~0`).
#[must_use]
pub fn json_patch_escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_annotation_round_trip() {
        assert_eq!(
            parse_i32(TTL_SECONDS_AFTER_FINISHED, "300").expect("parse"),
            300
        );
        assert_eq!(parse_i32(SUCCESSFUL_HISTORY_LIMIT, "-1").expect("parse"), -1);
        assert_eq!(parse_i32(FAILED_HISTORY_LIMIT, " 5 ").expect("parse"), 5);
    }

    #[test]
    fn malformed_integer_is_validation_error() {
        let err = parse_i32(TTL_SECONDS_AFTER_FINISHED, "five minutes").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains(TTL_SECONDS_AFTER_FINISHED));
    }

    #[test]
    fn timestamp_round_trip() {
        let at: DateTime<Utc> = "2025-01-01T00:01:30Z".parse().expect("timestamp");
        let formatted = format_rfc3339(at);
        assert_eq!(formatted, "2025-01-01T00:01:30Z");
        assert_eq!(parse_rfc3339(TTL_SCHEDULE_AT, &formatted).expect("parse"), at);
    }

    #[test]
    fn malformed_timestamp_is_validation_error() {
        let err = parse_rfc3339(HISTORY_CHECKED_AT, "yesterday").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn patch_path_escaping() {
        assert_eq!(
            json_patch_escape(TTL_SCHEDULE_AT),
            "pruner.tekton.dev~1ttl-schedule-at"
        );
        assert_eq!(json_patch_escape("a~b/c"), "a~0b~1c");
    }
}
