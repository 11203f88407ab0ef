//! Typed `analyze_repository` request

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// Arguments of one `analyze_repository` call.
///
/// Enumerated fields stay as raw strings here; recognizing them is the
/// mapper's job so that odd values become advisories instead of failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub repository_url: String,
    pub openai_model: Option<String>,
    pub logging: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub analysis_types: Option<Vec<String>>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
}

impl AnalysisRequest {
    pub fn new(repository_url: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            ..Self::default()
        }
    }

    /// Build from arguments that already passed schema validation
    pub fn from_arguments(arguments: Map<String, Value>) -> Result<Self, BridgeError> {
        let mut request: Self = serde_json::from_value(Value::Object(arguments))
            .map_err(|e| BridgeError::Validation(e.to_string()))?;
        request.repository_url = request.repository_url.trim().to_string();
        Ok(request)
    }
}
