//! Error handling for the pool integration harness
//!
//! Every failure a scenario can hit maps to one variant here, so a failed
//! run names exactly which contract was broken.

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pool integration harness
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML rendering errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport to a collaborator could not be established or was reset
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Response bytes are not valid JSON or break the handshake contract
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Non-2xx HTTP status or unexpected content type
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A payload field is missing or has the wrong kind
    #[error("Schema violation at `{path}`: expected {expected}, got {actual}")]
    SchemaViolation {
        path: String,
        expected: String,
        actual: String,
    },

    /// Retry budget exhausted without the counter advancing
    #[error("Counter `{key}` did not advance past {baseline} after {attempts} attempts (last value {last})")]
    ConvergenceTimeout {
        key: String,
        baseline: i64,
        last: i64,
        attempts: u32,
    },

    /// Required environment key absent, malformed, or a referenced path missing
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Mining client process could not be started or stopped
    #[error("Process error: {message}")]
    Process { message: String },

    /// A business assertion inside a scenario failed
    #[error("Assertion failed: {what}: expected {expected}, observed {observed}")]
    Assertion {
        what: String,
        expected: String,
        observed: String,
    },
}

impl Error {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a schema violation
    pub fn schema(
        path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a process error
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    /// Create an assertion failure carrying the literal expected and observed values
    pub fn assertion(
        what: impl Into<String>,
        expected: impl std::fmt::Display,
        observed: impl std::fmt::Display,
    ) -> Self {
        Self::Assertion {
            what: what.into(),
            expected: expected.to_string(),
            observed: observed.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Connection { .. } => "connection",
            Error::Protocol { .. } => "protocol",
            Error::Transport { .. } => "transport",
            Error::SchemaViolation { .. } => "schema",
            Error::ConvergenceTimeout { .. } => "convergence_timeout",
            Error::Configuration { .. } => "configuration",
            Error::Process { .. } => "process",
            Error::Assertion { .. } => "assertion",
        }
    }

    /// Map a reqwest failure onto the harness taxonomy.
    ///
    /// Connect/timeout failures are connection errors, status failures are
    /// transport errors and body decoding failures are transport errors too.
    pub fn from_http(context: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::connection(format!("{}: {}", context, err))
        } else if let Some(status) = err.status() {
            Error::transport(format!("{}: HTTP {}", context, status))
        } else {
            Error::transport(format!("{}: {}", context, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_violation_display() {
        let err = Error::schema("result.job.height", "integer", "string \"12\"");
        assert_eq!(
            err.to_string(),
            "Schema violation at `result.job.height`: expected integer, got string \"12\""
        );
        assert_eq!(err.category(), "schema");
    }

    #[test]
    fn test_assertion_carries_literals() {
        let err = Error::assertion("result.status", "\"OK\"", "\"BLOCKED\"");
        let text = err.to_string();
        assert!(text.contains("\"OK\""));
        assert!(text.contains("\"BLOCKED\""));
    }

    #[test]
    fn test_convergence_timeout_display() {
        let err = Error::ConvergenceTimeout {
            key: "pool_blocks_found".to_string(),
            baseline: 5,
            last: 5,
            attempts: 3,
        };
        assert_eq!(err.category(), "convergence_timeout");
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.category(), "io");
    }
}
