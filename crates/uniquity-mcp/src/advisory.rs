//! Advisories
//!
//! Non-fatal conditions noticed while mapping a request. They never change
//! control flow; they are handed to an [`AdvisorySink`] supplied at startup.

use std::fmt;
use std::sync::Mutex;

use tracing::warn;

/// A non-fatal, observable condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A log file was given but logging was not switched on
    LogFileWithoutLogging { log_file: String },

    /// An optional enumerated field carried a value outside its set
    UnrecognizedValue { field: &'static str, value: String },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogFileWithoutLogging { log_file } => write!(
                f,
                "logFile '{}' ignored: logging is not set to 'on'",
                log_file
            ),
            Self::UnrecognizedValue { field, value } => {
                write!(f, "{} value '{}' not recognized, ignoring", field, value)
            }
        }
    }
}

/// Receives advisories raised during an invocation
pub trait AdvisorySink: Send + Sync {
    fn advise(&self, advisory: Advisory);
}

/// Default sink: logs each advisory as a warning
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAdvisories;

impl AdvisorySink for TracingAdvisories {
    fn advise(&self, advisory: Advisory) {
        warn!(advisory = %advisory, "Advisory");
    }
}

/// Sink that keeps every advisory it receives
#[derive(Debug, Default)]
pub struct CollectingAdvisories {
    seen: Mutex<Vec<Advisory>>,
}

impl CollectingAdvisories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far
    pub fn snapshot(&self) -> Vec<Advisory> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl AdvisorySink for CollectingAdvisories {
    fn advise(&self, advisory: Advisory) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(advisory);
        }
    }
}
