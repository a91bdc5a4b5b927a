//! Error types for rulesplit.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for rulesplit operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A rule line with a bad field count or an unparseable field
    #[error("malformed rule at line {line}: {reason}")]
    MalformedRuleLine { line: usize, reason: String },

    /// A trace line with a bad field count or an unparseable field
    #[error("malformed trace at line {line}: {reason}")]
    MalformedTraceLine { line: usize, reason: String },

    /// Reading or writing a specific file failed
    #[error("file error on {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The classification engine could not be run or exited non-zero
    #[error("engine {program} failed (status {status:?}): {stderr}")]
    EngineFailure {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The engine printed something that is not a valid metric line
    #[error("unparseable engine output: {0}")]
    EngineOutput(String),

    /// The engine exited cleanly but never reported a required metric
    #[error("engine did not report {metric} for {rules:?}")]
    MissingMetric { metric: &'static str, rules: PathBuf },

    /// Trace generation failed
    #[error("trace generator error: {0}")]
    TraceGenerator(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Strategy number outside 1..=3
    #[error("invalid strategy: {0} (expected 1, 2 or 3)")]
    InvalidStrategy(u8),
}

impl Error {
    /// Wrap an IO error with the path it happened on.
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn rule_line(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedRuleLine {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn trace_line(line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedTraceLine {
            line,
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from the external engine.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Error::EngineFailure { .. } | Error::EngineOutput(_) | Error::MissingMetric { .. }
        )
    }
}

/// Result type alias for rulesplit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for a single field of a rule line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// Wrong number of whitespace-separated fields
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: &'static str, actual: usize },

    /// Invalid IPv4 address, CIDR or address range
    #[error("invalid address: {0}")]
    Address(String),

    /// Invalid port number
    #[error("invalid port: {0}")]
    Port(String),

    /// Port range without the ':' separator
    #[error("expected ':' between port bounds, got {0:?}")]
    Separator(String),

    /// Invalid protocol value or mask (mask must be 0x00 or 0xFF)
    #[error("invalid protocol: {0}")]
    Protocol(String),

    /// Invalid prefix (value/length)
    #[error("invalid prefix: {0}")]
    Prefix(String),

    /// Invalid trailing rule id
    #[error("invalid rule id: {0}")]
    Id(String),
}
