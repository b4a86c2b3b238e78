//! JSON envelope wrapping every operation result at the process edge.

use serde::Serialize;

use crate::error::{Coded, ErrorReport};

/// Outcome of one named operation.
///
/// Serializes as `{"function": …, "result": …}` on success and as
/// `{"function": …, "error": {"message", "code", "stack"?}}` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    /// The operation succeeded.
    Success {
        /// Operation name.
        function: String,
        /// Operation payload.
        result: T,
    },
    /// The operation failed.
    Failure {
        /// Operation name.
        function: String,
        /// Coded cause chain.
        error: ErrorReport,
    },
}

impl<T> Envelope<T> {
    /// Wraps the outcome of `function`.
    pub fn new<E: Coded>(function: impl Into<String>, outcome: Result<T, E>) -> Self {
        match outcome {
            Ok(result) => Self::Success {
                function: function.into(),
                result,
            },
            Err(error) => Self::Failure {
                function: function.into(),
                error: ErrorReport::from(&error),
            },
        }
    }

    /// The failure report, when the operation failed.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorReport> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backup::BackupError;

    #[test]
    fn success_carries_the_result() {
        let outcome: Result<&str, BackupError> = Ok("stopped");
        let envelope = Envelope::new("stop", outcome);
        let value = serde_json::to_value(&envelope).expect("json");
        assert_eq!(value, json!({"function": "stop", "result": "stopped"}));
        assert!(envelope.error().is_none());
    }

    #[test]
    fn failure_carries_the_coded_chain() {
        let outcome: Result<(), _> = Err(BackupError::Corrupt {
            backup: String::from("b1"),
            missing: 1,
        });
        let envelope = Envelope::new("backup-restore", outcome);
        let value = serde_json::to_value(&envelope).expect("json");
        assert_eq!(value["function"], "backup-restore");
        assert_eq!(value["error"]["code"], 2024);
        assert!(value["error"].get("stack").is_none());
    }
}
