//! Tool schema
//!
//! The `analyze_repository` input shape, declared once as data. The same table
//! renders the JSON Schema returned by `tools/list` and validates incoming
//! arguments, so the two cannot drift apart.

use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::config::LogLevelSet;
use crate::error::BridgeError;
use crate::protocol::{InputSchema, Tool};

pub const ANALYZE_REPOSITORY: &str = "analyze_repository";

pub const REPOSITORY_URL: &str = "repositoryUrl";
pub const OPENAI_MODEL: &str = "openaiModel";
pub const LOGGING: &str = "logging";
pub const LOG_LEVEL: &str = "logLevel";
pub const LOG_FILE: &str = "logFile";
pub const ANALYSIS_TYPES: &str = "analysisTypes";
pub const INCLUDE_PATTERNS: &str = "includePatterns";
pub const EXCLUDE_PATTERNS: &str = "excludePatterns";
pub const MAX_FILE_SIZE: &str = "maxFileSize";

pub const LOGGING_STATES: &[&str] = &["on", "off"];

/// Shape of a single argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Url,
    String,
    StringEnum(&'static [&'static str]),
    StringList,
    PositiveInteger,
}

/// One declared argument
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    pub required: bool,
}

impl FieldSpec {
    fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
        }
    }

    fn json_schema(&self) -> Value {
        let mut schema = match self.kind {
            FieldKind::Url => json!({"type": "string", "format": "uri"}),
            FieldKind::String => json!({"type": "string"}),
            FieldKind::StringEnum(values) => json!({"type": "string", "enum": values}),
            FieldKind::StringList => json!({"type": "array", "items": {"type": "string"}}),
            FieldKind::PositiveInteger => json!({"type": "integer", "minimum": 1}),
        };
        schema["description"] = json!(self.description);
        schema
    }

    fn check(&self, value: &Value) -> Result<(), BridgeError> {
        let invalid = |why: String| BridgeError::Validation(format!("{}: {}", self.name, why));

        match self.kind {
            FieldKind::Url => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string".to_string()))?
                    .trim();
                if raw.is_empty() {
                    return Err(invalid("must not be empty".to_string()));
                }
                let url = Url::parse(raw).map_err(|e| invalid(format!("not a valid URL ({})", e)))?;
                // Rules out host-less forms like `mailto:`, `file:///` and `unix:`.
                if url.host().is_none() {
                    return Err(invalid(format!("'{}' is not a repository URL", raw)));
                }
            }
            FieldKind::String => {
                if !value.is_string() {
                    return Err(invalid("expected a string".to_string()));
                }
            }
            FieldKind::StringEnum(values) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid("expected a string".to_string()))?;
                // Optional enums with odd values are passed on; the mapper
                // drops them with an advisory.
                if self.required && !values.contains(&s) {
                    return Err(invalid(format!(
                        "'{}' is not one of {}",
                        s,
                        values.join(", ")
                    )));
                }
            }
            FieldKind::StringList => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid("expected an array of strings".to_string()))?;
                if items.iter().any(|item| !item.is_string()) {
                    return Err(invalid("expected an array of strings".to_string()));
                }
            }
            FieldKind::PositiveInteger => match value.as_u64() {
                Some(n) if n >= 1 => {}
                _ => return Err(invalid("expected a positive integer".to_string())),
            },
        }

        Ok(())
    }
}

/// A tool's name, description and declared arguments
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    /// The `analyze_repository` tool, with the deployment's log level set
    pub fn analyze_repository(log_levels: LogLevelSet) -> Self {
        Self {
            name: ANALYZE_REPOSITORY,
            description: "Analyzes a Git repository and generates a report using Uniquity Reporter. \
                The analysis is performed with repo=off mode, meaning no local repository copy \
                is created or persisted.",
            fields: vec![
                FieldSpec {
                    name: REPOSITORY_URL,
                    kind: FieldKind::Url,
                    description: "The URL of the Git repository to analyze.",
                    required: true,
                },
                FieldSpec::optional(
                    OPENAI_MODEL,
                    FieldKind::String,
                    "Optional: The OpenAI model to use (e.g., gpt-4o-mini).",
                ),
                FieldSpec::optional(
                    LOGGING,
                    FieldKind::StringEnum(LOGGING_STATES),
                    "Optional: Turn reporter logging on or off. Required for logFile to take effect.",
                ),
                FieldSpec::optional(
                    LOG_LEVEL,
                    FieldKind::StringEnum(log_levels.values()),
                    "Optional: The log level for the reporter.",
                ),
                FieldSpec::optional(
                    LOG_FILE,
                    FieldKind::String,
                    "Optional: The path to a log file for the reporter (needs logging=on).",
                ),
                FieldSpec::optional(
                    ANALYSIS_TYPES,
                    FieldKind::StringList,
                    "Optional: Analysis types to run.",
                ),
                FieldSpec::optional(
                    INCLUDE_PATTERNS,
                    FieldKind::StringList,
                    "Optional: Glob patterns of files to include.",
                ),
                FieldSpec::optional(
                    EXCLUDE_PATTERNS,
                    FieldKind::StringList,
                    "Optional: Glob patterns of files to exclude.",
                ),
                FieldSpec::optional(
                    MAX_FILE_SIZE,
                    FieldKind::PositiveInteger,
                    "Optional: Skip files larger than this many bytes.",
                ),
            ],
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Accepted values of an enumerated field
    pub fn allowed_values(&self, name: &str) -> &'static [&'static str] {
        match self.field(name).map(|f| f.kind) {
            Some(FieldKind::StringEnum(values)) => values,
            _ => &[],
        }
    }

    /// Discovery form of this schema
    pub fn to_tool(&self) -> Tool {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.to_string(), f.json_schema()))
            .collect();

        Tool {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema: InputSchema {
                schema_type: "object".to_string(),
                properties,
                required: self
                    .fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.name.to_string())
                    .collect(),
            },
        }
    }

    /// Check arguments against the declared fields. `null` counts as absent.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), BridgeError> {
        for field in &self.fields {
            match arguments.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(BridgeError::Validation(format!(
                            "missing required field: {}",
                            field.name
                        )));
                    }
                }
                Some(value) => field.check(value)?,
            }
        }

        for key in arguments.keys() {
            if self.field(key).is_none() {
                debug!("Ignoring unknown argument: {}", key);
            }
        }

        Ok(())
    }
}
