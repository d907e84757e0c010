//! Typed error taxonomy for the edit engine.
//!
//! Block-local errors (`MatchFailed`, `WriteFailed`, `ValidationRejected`)
//! are recovered by the applier and carried as data rather than raised;
//! session-level errors (`AttemptsExhausted`, `LlmError`, `Cancelled`) are
//! the terminal `Err` of a session run. `CommitFailed` is logged but never
//! promoted to an edit failure — a session with a failed commit still
//! reports `Done`.

use serde::{Deserialize, Serialize};

/// One reason a single validated block was rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub file: String,
    pub reason: String,
}

/// The error kinds the edit engine can raise.
#[derive(Debug, thiserror::Error, Clone, Serialize, Deserialize)]
pub enum EditEngineError {
    #[error("model response contained no recognisable edit blocks")]
    ParseEmpty,

    #[error("{dropped} block(s) dropped due to marker mis-sequencing")]
    ParseMalformed { dropped: usize },

    #[error("{} block(s) failed validation", issues.len())]
    ValidationRejected { issues: Vec<ValidationIssue> },

    #[error("no match for block {block_index} targeting {file}")]
    MatchFailed { file: String, block_index: usize },

    #[error("failed to write {file}: {cause}")]
    WriteFailed { file: String, cause: String },

    #[error("commit failed: {cause}")]
    CommitFailed { cause: String },

    #[error("session exhausted {attempts} attempt(s) without full success")]
    AttemptsExhausted { attempts: u32 },

    #[error("LLM call failed: {cause}")]
    LlmError { cause: String },

    #[error("session cancelled")]
    Cancelled,
}

impl EditEngineError {
    /// Whether this error kind is recoverable via a reflection-driven retry,
    /// as opposed to terminal for the whole session.
    pub fn is_reflectable(&self) -> bool {
        matches!(
            self,
            EditEngineError::ParseEmpty
                | EditEngineError::ParseMalformed { .. }
                | EditEngineError::ValidationRejected { .. }
                | EditEngineError::MatchFailed { .. }
                | EditEngineError::WriteFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_level_errors_are_not_reflectable() {
        assert!(!EditEngineError::Cancelled.is_reflectable());
        assert!(
            !EditEngineError::AttemptsExhausted { attempts: 3 }.is_reflectable()
        );
        assert!(
            !EditEngineError::LlmError {
                cause: "timeout".into()
            }
            .is_reflectable()
        );
    }

    #[test]
    fn block_local_errors_are_reflectable() {
        assert!(EditEngineError::ParseEmpty.is_reflectable());
        assert!(
            EditEngineError::MatchFailed {
                file: "a.txt".into(),
                block_index: 0
            }
            .is_reflectable()
        );
        assert!(
            EditEngineError::ValidationRejected { issues: vec![] }.is_reflectable()
        );
    }

    #[test]
    fn commit_failed_is_serializable_and_logged_not_fatal() {
        let err = EditEngineError::CommitFailed {
            cause: "dirty index".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("dirty index"));
        // CommitFailed is deliberately not in the reflectable set: a
        // commit failure never converts to an edit failure.
        assert!(!err.is_reflectable());
    }

    #[test]
    fn display_messages_are_human_readable() {
        let err = EditEngineError::MatchFailed {
            file: "a.txt".into(),
            block_index: 2,
        };
        assert_eq!(err.to_string(), "no match for block 2 targeting a.txt");
    }
}
