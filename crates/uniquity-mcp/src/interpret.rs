//! Output interpretation
//!
//! Classifies a [`ProcessOutcome`] as a payload or a [`BridgeError`].
//! A zero exit code is always a success: stdout that is not a JSON document
//! is returned as plain text, never rejected.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::protocol::ToolResult;
use crate::runner::ProcessOutcome;

pub const NO_OUTPUT_TEXT: &str = "(No output from reporter)";

/// What a successful run produced
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    /// stdout was a JSON document, scalars included
    Structured(Value),
    /// stdout that is not JSON, trimmed
    Text(String),
    /// stdout was empty or whitespace
    NoOutput,
}

impl ToolPayload {
    pub fn into_tool_result(self) -> ToolResult {
        match self {
            Self::Structured(Value::String(text)) => ToolResult::success(text),
            Self::Structured(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                let result = ToolResult::success(text);
                if value.is_object() {
                    result.with_structured(value)
                } else {
                    result
                }
            }
            Self::Text(text) => ToolResult::success(text),
            Self::NoOutput => ToolResult::success(NO_OUTPUT_TEXT),
        }
    }
}

pub fn interpret(outcome: ProcessOutcome) -> Result<ToolPayload, BridgeError> {
    match outcome {
        ProcessOutcome::SpawnFailure { cause } => Err(BridgeError::Spawn { cause }),
        ProcessOutcome::Failure {
            exit_code,
            stderr,
            cause,
        } => Err(BridgeError::ExternalProcess {
            exit_code,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            cause,
        }),
        ProcessOutcome::Success { stdout } => Ok(shape(&stdout)),
    }
}

fn shape(stdout: &[u8]) -> ToolPayload {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        warn!("Reporter exited successfully but produced no output");
        return ToolPayload::NoOutput;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => ToolPayload::Structured(value),
        Err(e) => {
            debug!("Reporter output is not JSON ({}), returning it as text", e);
            ToolPayload::Text(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(stdout: &str) -> ProcessOutcome {
        ProcessOutcome::Success {
            stdout: stdout.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_empty_output_is_placeholder() {
        assert_eq!(interpret(success("")).unwrap(), ToolPayload::NoOutput);
        assert_eq!(interpret(success(" \n\t ")).unwrap(), ToolPayload::NoOutput);

        let result = ToolPayload::NoOutput.into_tool_result();
        assert!(!result.is_error);
        assert_eq!(result.content[0].text, NO_OUTPUT_TEXT);
    }

    #[test]
    fn test_json_output_is_structured() {
        let payload = interpret(success("{\"ok\":true}\n")).unwrap();
        assert_eq!(payload, ToolPayload::Structured(json!({"ok": true})));

        let result = payload.into_tool_result();
        assert_eq!(result.structured_content, Some(json!({"ok": true})));
    }

    #[test]
    fn test_json_array_has_no_structured_content() {
        let payload = interpret(success("[1, 2]")).unwrap();
        assert_eq!(payload, ToolPayload::Structured(json!([1, 2])));
        assert!(payload.into_tool_result().structured_content.is_none());
    }

    #[test]
    fn test_plain_text_falls_back() {
        assert_eq!(
            interpret(success("  plain text \n")).unwrap(),
            ToolPayload::Text("plain text".to_string())
        );
        assert_eq!(
            interpret(success("{\"truncated\": ")).unwrap(),
            ToolPayload::Text("{\"truncated\":".to_string())
        );
    }

    #[test]
    fn test_json_scalars_are_structured() {
        for (stdout, value) in [
            ("42\n", json!(42)),
            ("\"hello\"", json!("hello")),
            ("true", json!(true)),
            ("null", Value::Null),
        ] {
            let payload = interpret(success(stdout)).unwrap();
            assert_eq!(payload, ToolPayload::Structured(value));
            assert!(payload.into_tool_result().structured_content.is_none());
        }

        let result = ToolPayload::Structured(json!(42)).into_tool_result();
        assert_eq!(result.content[0].text, "42");
        // Strings are shown unquoted.
        let result = ToolPayload::Structured(json!("hello")).into_tool_result();
        assert_eq!(result.content[0].text, "hello");
    }

    #[test]
    fn test_markdown_report_is_text() {
        let report = "# Uniquity Report\n\n- widgets: 3 duplicates\n";
        let result = interpret(success(report)).unwrap().into_tool_result();
        assert_eq!(result.content[0].text, report.trim());
    }

    #[test]
    fn test_failure_carries_code_and_stderr() {
        let err = interpret(ProcessOutcome::Failure {
            exit_code: Some(2),
            stderr: b"boom".to_vec(),
            cause: "uniquity-reporter failed with code 2. Stderr: boom".to_string(),
        })
        .unwrap_err();

        assert_eq!(err.kind(), "external_process");
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.to_string().contains("boom"));
        assert_eq!(err.stderr(), Some("boom"));
    }

    #[test]
    fn test_spawn_failure_has_no_exit_code() {
        let err = interpret(ProcessOutcome::SpawnFailure {
            cause: "Failed to start uniquity-reporter: No such file or directory".to_string(),
        })
        .unwrap_err();

        assert!(matches!(err, BridgeError::Spawn { .. }));
        assert_eq!(err.exit_code(), None);
    }
}
