//! The tri-level error taxonomy from §7: every fallible boundary a stage
//! worker crosses (blob store, container, event log) is classified into one
//! of these, and the classification — not the concrete error — drives
//! retry/ack behavior in the worker loop.

use std::fmt;

/// Outcome of a fallible call a stage worker makes. `Invariant` is reserved
/// for coordinator-detected inconsistencies (§7); workers only ever produce
/// the first two.
#[derive(Debug)]
pub enum StageError {
    /// Blob not yet readable, container socket error, container 5xx, or a
    /// per-call deadline expiring. Retried at the queue level.
    TransientExternal(anyhow::Error),
    /// Container 4xx (other than a not-ready 404) or a malformed response.
    /// The job is still acked and the sheet's slot reported done so the
    /// pipeline advances; layout failures are always of this kind.
    PermanentExternal(anyhow::Error),
    /// A coordinator-detected inconsistency, e.g. a report for an unknown
    /// sheetId. Logged; no state change.
    Invariant(anyhow::Error),
}

impl StageError {
    pub fn transient(e: impl Into<anyhow::Error>) -> Self {
        StageError::TransientExternal(e.into())
    }

    pub fn permanent(e: impl Into<anyhow::Error>) -> Self {
        StageError::PermanentExternal(e.into())
    }

    /// Whether the queue message should be left unacked for redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::TransientExternal(_))
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            StageError::TransientExternal(e) => e,
            StageError::PermanentExternal(e) => e,
            StageError::Invariant(e) => e,
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::TransientExternal(e) => write!(f, "transient: {e}"),
            StageError::PermanentExternal(e) => write!(f, "permanent: {e}"),
            StageError::Invariant(e) => write!(f, "invariant: {e}"),
        }
    }
}

impl std::error::Error for StageError {}

/// Classify an HTTP response status into the taxonomy above. `429` and `5xx`
/// are transient; other `4xx` are permanent.
pub fn classify_status(status: reqwest::StatusCode, context: &str) -> StageError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        StageError::transient(anyhow::anyhow!("{context}: container returned {status}"))
    } else {
        StageError::permanent(anyhow::anyhow!("{context}: container returned {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let e = classify_status(reqwest::StatusCode::BAD_GATEWAY, "detect-layout");
        assert!(e.is_retryable());
    }

    #[test]
    fn client_errors_are_permanent() {
        let e = classify_status(reqwest::StatusCode::BAD_REQUEST, "detect-layout");
        assert!(!e.is_retryable());
    }
}
