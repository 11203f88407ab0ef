//! Bridge errors
//!
//! Every way an `analyze_repository` invocation can fail. Advisories are not
//! errors and live in [`crate::advisory`].

use thiserror::Error;

use crate::protocol::INVALID_PARAMS;

/// Typed failure of a tool invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Arguments failed schema validation. Raised before anything is spawned.
    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownOperation(String),

    /// The reporter could not be started at all.
    #[error("{cause}")]
    Spawn { cause: String },

    /// The reporter ran and exited unsuccessfully.
    #[error("{cause}")]
    ExternalProcess {
        exit_code: Option<i32>,
        stderr: String,
        cause: String,
    },
}

impl BridgeError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::Spawn { .. } => "spawn",
            Self::ExternalProcess { .. } => "external_process",
        }
    }

    /// Errors produced by the reporter run itself, reported as failed tool
    /// results rather than JSON-RPC errors.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::ExternalProcess { .. })
    }

    /// JSON-RPC error code for request-level errors
    pub fn rpc_code(&self) -> i32 {
        INVALID_PARAMS
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExternalProcess { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ExternalProcess { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let spawn = BridgeError::Spawn {
            cause: "Failed to start uniquity-reporter: not found".to_string(),
        };
        let external = BridgeError::ExternalProcess {
            exit_code: Some(2),
            stderr: "boom".to_string(),
            cause: "uniquity-reporter failed with code 2. Stderr: boom".to_string(),
        };

        assert_ne!(spawn.kind(), external.kind());
        assert!(spawn.is_tool_failure());
        assert!(external.is_tool_failure());
        assert_eq!(spawn.exit_code(), None);
        assert_eq!(external.exit_code(), Some(2));
        assert_eq!(external.stderr(), Some("boom"));
    }

    #[test]
    fn test_request_errors_are_not_tool_failures() {
        let err = BridgeError::Validation("missing required field: repositoryUrl".to_string());
        assert!(!err.is_tool_failure());
        assert_eq!(err.rpc_code(), INVALID_PARAMS);
        assert!(err.to_string().contains("repositoryUrl"));

        let err = BridgeError::UnknownOperation("summarize".to_string());
        assert_eq!(err.kind(), "unknown_operation");
        assert_eq!(err.to_string(), "Unknown tool: summarize");
    }
}
