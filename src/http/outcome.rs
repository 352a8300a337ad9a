//! Explicit result of a network call whose failure must degrade, not abort.

use std::fmt;

/// Outcome of a registry lookup or webhook call.
///
/// Callers match on this at the call site to decide whether a failure means
/// "empty metadata", "approval denied" or "notification dropped".
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Success(T),
    Timeout,
    Error(String),
}

impl<T> CallOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Converts to `Option`, discarding the failure reason.
    pub fn ok(self) -> Option<T> {
        match self {
            CallOutcome::Success(value) => Some(value),
            CallOutcome::Timeout | CallOutcome::Error(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CallOutcome<U> {
        match self {
            CallOutcome::Success(value) => CallOutcome::Success(f(value)),
            CallOutcome::Timeout => CallOutcome::Timeout,
            CallOutcome::Error(e) => CallOutcome::Error(e),
        }
    }

    /// Classifies an `anyhow` error raised while performing the call.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let timed_out = error.chain().any(|cause| {
            cause
                .downcast_ref::<reqwest::Error>()
                .is_some_and(|e| e.is_timeout())
        });
        if timed_out {
            CallOutcome::Timeout
        } else {
            CallOutcome::Error(format!("{:#}", error))
        }
    }
}

impl<T> fmt::Display for CallOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Success(_) => write!(f, "success"),
            CallOutcome::Timeout => write!(f, "timed out"),
            CallOutcome::Error(e) => write!(f, "error: {}", e),
        }
    }
}
