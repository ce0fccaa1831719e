//! Error types.
//!
//! `BackendError` lives here rather than in `ktiger-client` so the session
//! controller can classify failures (fatal load vs. retryable write)
//! without string matching.

use thiserror::Error;

use crate::model::{AttemptId, SectionId};
use crate::session::SessionState;

/// Errors that can occur when talking to the exam backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The requested resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication failed or the token could not be refreshed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Returns `true` if retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Network(_) => true,
            BackendError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Errors from a `SessionStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored record exists but cannot be parsed.
    #[error("corrupt session record: {0}")]
    Corrupt(String),
}

/// Errors from the platform audio device.
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("failed to load audio {url}: {message}")]
    Load { url: String, message: String },

    #[error("audio playback failed: {0}")]
    Playback(String),
}

/// Errors surfaced by the exam session controller.
#[derive(Debug, Error)]
pub enum ExamError {
    /// The attempt id is unknown to the backend.
    #[error("exam attempt {0} not found")]
    NotFound(AttemptId),

    #[error("exam has no sections")]
    NoSections,

    /// Questions were requested for a section other than the active one.
    #[error("section {0} is not the active section")]
    SectionMismatch(SectionId),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The operation is not legal in the controller's current state.
    #[error("cannot {op} while {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    /// Section advance was requested before the last question.
    #[error("section can only be left from its last question")]
    NotAtSectionEnd,

    /// A confirmation prompt was used after the position it was issued for changed.
    #[error("confirmation prompt no longer matches the current section")]
    StalePrompt,

    #[error("no audio available")]
    NoAudio,

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Controller result type.
pub type Result<T, E = ExamError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Timeout(10).is_transient());
        assert!(BackendError::Network("reset".into()).is_transient());
        assert!(BackendError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!BackendError::Api {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!BackendError::NotFound("/exam-attempts/1".into()).is_transient());
        assert!(!BackendError::Unauthorized("expired".into()).is_transient());
    }

    #[test]
    fn invalid_state_message_names_operation() {
        let err = ExamError::InvalidState {
            op: "submit",
            state: SessionState::Loading,
        };
        assert_eq!(err.to_string(), "cannot submit while Loading");
    }
}
