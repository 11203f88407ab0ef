//! Configuration for the Uniquity MCP server
//!
//! Deployment-time choices: where the reporter lives, how options reach it,
//! which log levels the schema offers. Read once at startup and never changed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_REPORTER: &str = "uniquity-reporter";

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("uniquity-mcp")
}

/// Default location of the config file
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How the reporter executable is located
    #[serde(default)]
    pub executable: ExecutableResolution,

    /// Whether model/logging options travel as flags or environment variables
    #[serde(default)]
    pub convention: ArgumentConvention,

    /// Prefix for environment variables under the environment convention
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    /// Value set offered for `logLevel`
    #[serde(default)]
    pub log_levels: LogLevelSet,

    /// Kill the reporter after this many seconds (no deadline when unset)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Seconds in-flight invocations get to finish on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_env_prefix() -> String {
    "UNIQUITY_".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executable: ExecutableResolution::default(),
            convention: ArgumentConvention::default(),
            env_prefix: default_env_prefix(),
            log_levels: LogLevelSet::default(),
            timeout_secs: None,
            shutdown_grace_secs: default_shutdown_grace(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        if !required && !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// How the reporter executable is found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutableResolution {
    /// Resolved by name through the inherited `PATH`
    SearchPath { name: String },
    /// Fixed path `<root>/bin/<name>`
    InstallRoot { root: PathBuf, name: String },
}

impl Default for ExecutableResolution {
    fn default() -> Self {
        Self::SearchPath {
            name: DEFAULT_REPORTER.to_string(),
        }
    }
}

impl ExecutableResolution {
    /// What gets handed to the process spawner
    pub fn program(&self) -> PathBuf {
        match self {
            Self::SearchPath { name } => PathBuf::from(name),
            Self::InstallRoot { root, name } => root.join("bin").join(name),
        }
    }

    /// Display name used in log lines and error messages
    pub fn name(&self) -> &str {
        match self {
            Self::SearchPath { name } | Self::InstallRoot { name, .. } => name,
        }
    }

    /// Check at startup whether the reporter can be found. Never fatal.
    pub fn check_installed(&self) -> bool {
        match self {
            Self::SearchPath { name } => match which::which(name) {
                Ok(path) => {
                    debug!("Reporter resolved to {}", path.display());
                    true
                }
                Err(e) => {
                    warn!("Reporter '{}' not found on PATH: {}", name, e);
                    false
                }
            },
            Self::InstallRoot { .. } => {
                let path = self.program();
                let found = path.is_file();
                if !found {
                    warn!("Reporter not found at {}", path.display());
                }
                found
            }
        }
    }
}

/// How model and logging options are passed to the reporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentConvention {
    #[default]
    Flags,
    Environment,
}

/// Log levels the reporter understands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevelSet {
    /// error, warn, info, debug
    Standard,
    /// error, warn, info, debug, trace
    #[default]
    Extended,
}

impl LogLevelSet {
    pub fn values(&self) -> &'static [&'static str] {
        match self {
            Self::Standard => &["error", "warn", "info", "debug"],
            Self::Extended => &["error", "warn", "info", "debug", "trace"],
        }
    }
}

/// Logging for this server (not the reporter)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    #[serde(default)]
    pub filter: Option<String>,
}

impl LoggingConfig {
    /// Pick the effective filter: CLI flag, then `RUST_LOG`, then config, then `info`.
    pub fn resolve_filter(&self, cli: Option<&str>, rust_log: Option<&str>) -> String {
        cli.or(rust_log)
            .or(self.filter.as_deref())
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or("info")
            .to_string()
    }
}

/// Build a filter from `directive`, falling back to `info` when it does not
/// parse. The second value is the parse error to report once logging is up.
pub fn parse_filter(directive: &str) -> (EnvFilter, Option<String>) {
    match EnvFilter::try_new(directive) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new("info"), Some(e.to_string())),
    }
}
