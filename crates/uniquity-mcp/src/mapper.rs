//! Argument/environment mapping
//!
//! Turns an [`AnalysisRequest`] into the reporter's command line and
//! environment overlay. Pure: no I/O, same input gives the same output.
//!
//! Argument order is fixed:
//!
//! ```text
//! --repo=off [--model=M] [--logging=on|off] [--log-level=L] [--log-file=P]
//!     [--analysis-types=a,b] [--include-patterns=g,h] [--exclude-patterns=g,h]
//!     [--max-file-size=N] <repositoryUrl>
//! ```
//!
//! Under [`ArgumentConvention::Environment`] the model and logging options move
//! to `<prefix>OPENAI_MODEL`, `<prefix>LOGGING`, `<prefix>LOG_LEVEL` and
//! `<prefix>LOG_FILE` instead.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::advisory::Advisory;
use crate::config::{ArgumentConvention, Config};
use crate::request::AnalysisRequest;
use crate::schema::{ToolSchema, LOGGING, LOG_LEVEL};

/// Always passed: the reporter must never keep a local clone.
pub const REPO_OFF: &str = "--repo=off";

/// A fully resolved reporter invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Applied over the inherited environment; these values win.
    pub env: BTreeMap<String, String>,
}

/// Result of mapping one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapped {
    pub spec: InvocationSpec,
    pub advisories: Vec<Advisory>,
}

/// Maps requests to invocations under one fixed convention
#[derive(Debug, Clone)]
pub struct Mapper {
    program: PathBuf,
    convention: ArgumentConvention,
    env_prefix: String,
    logging_states: &'static [&'static str],
    log_levels: &'static [&'static str],
}

impl Mapper {
    pub fn new(
        program: impl Into<PathBuf>,
        convention: ArgumentConvention,
        env_prefix: impl Into<String>,
        schema: &ToolSchema,
    ) -> Self {
        Self {
            program: program.into(),
            convention,
            env_prefix: env_prefix.into(),
            logging_states: schema.allowed_values(LOGGING),
            log_levels: schema.allowed_values(LOG_LEVEL),
        }
    }

    pub fn from_config(config: &Config, schema: &ToolSchema) -> Self {
        Self::new(
            config.executable.program(),
            config.convention,
            config.env_prefix.clone(),
            schema,
        )
    }

    pub fn build(&self, request: &AnalysisRequest) -> Mapped {
        let mut advisories = Vec::new();
        let mut args = vec![REPO_OFF.to_string()];
        let mut env = BTreeMap::new();

        let logging = recognized(
            LOGGING,
            self.logging_states,
            request.logging.as_deref(),
            &mut advisories,
        );
        let log_level = recognized(
            LOG_LEVEL,
            self.log_levels,
            request.log_level.as_deref(),
            &mut advisories,
        );

        let log_file = match non_empty(request.log_file.as_deref()) {
            Some(path) if logging == Some("on") => Some(path),
            Some(path) => {
                advisories.push(Advisory::LogFileWithoutLogging {
                    log_file: path.to_string(),
                });
                None
            }
            None => None,
        };

        let mut option = |flag: &str, var: &str, value: Option<&str>| {
            let Some(value) = value else { return };
            match self.convention {
                ArgumentConvention::Flags => args.push(format!("{}={}", flag, value)),
                ArgumentConvention::Environment => {
                    env.insert(format!("{}{}", self.env_prefix, var), value.to_string());
                }
            }
        };

        option("--model", "OPENAI_MODEL", non_empty(request.openai_model.as_deref()));
        option("--logging", "LOGGING", logging);
        option("--log-level", "LOG_LEVEL", log_level);
        option("--log-file", "LOG_FILE", log_file);

        push_list(&mut args, "--analysis-types", request.analysis_types.as_deref());
        push_list(&mut args, "--include-patterns", request.include_patterns.as_deref());
        push_list(&mut args, "--exclude-patterns", request.exclude_patterns.as_deref());
        if let Some(size) = request.max_file_size {
            args.push(format!("--max-file-size={}", size));
        }

        args.push(request.repository_url.clone());

        Mapped {
            spec: InvocationSpec {
                program: self.program.clone(),
                args,
                env,
            },
            advisories,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Keep an enumerated value only if it is in the accepted set
fn recognized<'a>(
    field: &'static str,
    accepted: &[&str],
    value: Option<&'a str>,
    advisories: &mut Vec<Advisory>,
) -> Option<&'a str> {
    let value = non_empty(value)?;
    if accepted.contains(&value) {
        Some(value)
    } else {
        advisories.push(Advisory::UnrecognizedValue {
            field,
            value: value.to_string(),
        });
        None
    }
}

fn push_list(args: &mut Vec<String>, flag: &str, values: Option<&[String]>) {
    let Some(values) = values else { return };
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if !values.is_empty() {
        args.push(format!("{}={}", flag, values.join(",")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevelSet;

    const URL: &str = "https://github.com/acme/widgets";

    fn mapper(convention: ArgumentConvention) -> Mapper {
        let schema = ToolSchema::analyze_repository(LogLevelSet::Extended);
        Mapper::new("uniquity-reporter", convention, "UNIQUITY_", &schema)
    }

    fn full_request() -> AnalysisRequest {
        AnalysisRequest {
            repository_url: URL.to_string(),
            openai_model: Some("gpt-4o-mini".to_string()),
            logging: Some("on".to_string()),
            log_level: Some("debug".to_string()),
            log_file: Some("/tmp/reporter.log".to_string()),
            analysis_types: Some(vec!["duplication".to_string(), "similarity".to_string()]),
            include_patterns: Some(vec!["src/**".to_string()]),
            exclude_patterns: Some(vec!["target/**".to_string(), "*.lock".to_string()]),
            max_file_size: Some(4096),
        }
    }

    #[test]
    fn test_minimal_request() {
        let mapped = mapper(ArgumentConvention::Flags).build(&AnalysisRequest::new(URL));
        assert_eq!(mapped.spec.args, vec![REPO_OFF.to_string(), URL.to_string()]);
        assert!(mapped.spec.env.is_empty());
        assert!(mapped.advisories.is_empty());
        assert_eq!(mapped.spec.program, PathBuf::from("uniquity-reporter"));
    }

    #[test]
    fn test_flag_order() {
        let mapped = mapper(ArgumentConvention::Flags).build(&full_request());
        assert_eq!(
            mapped.spec.args,
            vec![
                "--repo=off",
                "--model=gpt-4o-mini",
                "--logging=on",
                "--log-level=debug",
                "--log-file=/tmp/reporter.log",
                "--analysis-types=duplication,similarity",
                "--include-patterns=src/**",
                "--exclude-patterns=target/**,*.lock",
                "--max-file-size=4096",
                URL,
            ]
        );
        assert!(mapped.spec.env.is_empty());
        assert!(mapped.advisories.is_empty());
    }

    #[test]
    fn test_environment_convention() {
        let mapped = mapper(ArgumentConvention::Environment).build(&full_request());
        assert_eq!(
            mapped.spec.args,
            vec![
                "--repo=off",
                "--analysis-types=duplication,similarity",
                "--include-patterns=src/**",
                "--exclude-patterns=target/**,*.lock",
                "--max-file-size=4096",
                URL,
            ]
        );
        assert_eq!(mapped.spec.env["UNIQUITY_OPENAI_MODEL"], "gpt-4o-mini");
        assert_eq!(mapped.spec.env["UNIQUITY_LOGGING"], "on");
        assert_eq!(mapped.spec.env["UNIQUITY_LOG_LEVEL"], "debug");
        assert_eq!(mapped.spec.env["UNIQUITY_LOG_FILE"], "/tmp/reporter.log");
    }

    #[test]
    fn test_empty_prefix_gives_legacy_names() {
        let schema = ToolSchema::analyze_repository(LogLevelSet::Standard);
        let mapper = Mapper::new("uniquity-reporter", ArgumentConvention::Environment, "", &schema);
        let mut request = AnalysisRequest::new(URL);
        request.openai_model = Some("gpt-4o".to_string());
        request.log_level = Some("warn".to_string());

        let mapped = mapper.build(&request);
        assert_eq!(mapped.spec.env["OPENAI_MODEL"], "gpt-4o");
        assert_eq!(mapped.spec.env["LOG_LEVEL"], "warn");
    }

    #[test]
    fn test_absent_fields_emit_nothing() {
        let flags = [
            "--model",
            "--logging",
            "--log-level",
            "--log-file",
            "--analysis-types",
            "--include-patterns",
            "--exclude-patterns",
            "--max-file-size",
        ];
        let mut request = AnalysisRequest::new(URL);
        request.analysis_types = Some(vec![]);
        request.openai_model = Some("  ".to_string());

        let mapped = mapper(ArgumentConvention::Flags).build(&request);
        for flag in flags {
            assert!(
                !mapped.spec.args.iter().any(|a| a.starts_with(flag)),
                "unexpected {}",
                flag
            );
        }
    }

    #[test]
    fn test_log_file_without_logging() {
        for logging in [None, Some("off")] {
            let mut request = AnalysisRequest::new(URL);
            request.logging = logging.map(str::to_string);
            request.log_file = Some("/tmp/reporter.log".to_string());

            let mapped = mapper(ArgumentConvention::Flags).build(&request);
            assert!(!mapped.spec.args.iter().any(|a| a.starts_with("--log-file")));
            assert_eq!(
                mapped.advisories,
                vec![Advisory::LogFileWithoutLogging {
                    log_file: "/tmp/reporter.log".to_string()
                }]
            );

            let mut without_file = request.clone();
            without_file.log_file = None;
            let baseline = mapper(ArgumentConvention::Flags).build(&without_file);
            assert_eq!(mapped.spec, baseline.spec);
        }
    }

    #[test]
    fn test_unrecognized_enum_values() {
        let mut request = AnalysisRequest::new(URL);
        request.logging = Some("sometimes".to_string());
        request.log_level = Some("loud".to_string());

        let mapped = mapper(ArgumentConvention::Flags).build(&request);
        assert_eq!(mapped.spec.args, vec![REPO_OFF.to_string(), URL.to_string()]);
        assert_eq!(mapped.advisories.len(), 2);
        assert!(mapped.advisories.contains(&Advisory::UnrecognizedValue {
            field: LOGGING,
            value: "sometimes".to_string()
        }));
    }

    #[test]
    fn test_trace_only_in_extended_set() {
        let schema = ToolSchema::analyze_repository(LogLevelSet::Standard);
        let mapper = Mapper::new("uniquity-reporter", ArgumentConvention::Flags, "", &schema);
        let mut request = AnalysisRequest::new(URL);
        request.log_level = Some("trace".to_string());

        let mapped = mapper.build(&request);
        assert_eq!(mapped.advisories.len(), 1);
        assert!(!mapped.spec.args.iter().any(|a| a.starts_with("--log-level")));
    }

    #[test]
    fn test_build_is_deterministic() {
        for convention in [ArgumentConvention::Flags, ArgumentConvention::Environment] {
            let mapper = mapper(convention);
            let request = full_request();
            assert_eq!(mapper.build(&request), mapper.build(&request));
        }
    }
}
