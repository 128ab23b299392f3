use core::result::Result as CoreResult;
use std::io::Error as IoError;

use reqwest::Error as ReqwestError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlDeError;
use toml::ser::Error as TomlSerError;

/// Result type for orchestration operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors that can occur while planning or executing tool invocations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// An HTTP request failed at the transport level.
    #[error("HTTP request failed: {0}")]
    Http(#[from] ReqwestError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] TomlDeError),

    /// TOML serialization failed.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] TomlSerError),

    /// Configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Arguments did not satisfy the tool's input schema.
    #[error("Invalid arguments: {0}")]
    Validation(String),

    /// No tool with the given name is registered.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A step references a dependency that does not exist in the plan.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// The step list has a structural defect such as a cycle.
    #[error("Planning error: {0}")]
    Planning(String),

    /// The tool reported a failure while executing.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The invocation exceeded its configured timeout.
    #[error("Invocation timed out after {0}ms")]
    Timeout(u64),

    /// The tool's circuit breaker is open and the call was not attempted.
    #[error("Circuit open for tool '{tool}', retry in {retry_after_ms}ms")]
    CircuitOpen {
        /// Name of the tool whose breaker rejected the call.
        tool: String,
        /// Milliseconds until the breaker will admit a trial call.
        retry_after_ms: u64,
    },

    /// A stateful session misbehaved at the protocol level.
    #[error("Session error: {0}")]
    Session(String),

    /// The required credential could not be resolved.
    #[error("Credential not found: {0}")]
    MissingCredential(String),

    /// The invocation was cancelled before it completed.
    #[error("Invocation cancelled")]
    Cancelled,
}

impl Error {
    /// Determines whether this error may succeed if retried.
    ///
    /// Transient failures (tool execution errors, timeouts, transport and
    /// session faults) are retryable; schema violations, unknown tools,
    /// open breakers, and plan defects are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::Timeout(_) | Self::Session(_) | Self::Http(_)
        )
    }

    /// Determines whether this error is fatal before any execution starts.
    ///
    /// Plan-build-time defects abort the run without invoking any tool.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Planning(_) | Self::Dependency(_) | Self::Config(_))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use serde_json::{Value as JsonValue, from_str};
    use std::io;

    #[test]
    fn test_error_display() {
        let error1 = Error::Validation("missing field 'location'".to_owned());
        assert_eq!(
            error1.to_string(),
            "Invalid arguments: missing field 'location'"
        );

        let error2 = Error::ToolNotFound("get_weather".to_owned());
        assert_eq!(error2.to_string(), "Tool not found: get_weather");

        let error3 = Error::Timeout(5000);
        assert_eq!(error3.to_string(), "Invocation timed out after 5000ms");

        let error4 = Error::CircuitOpen {
            tool: "search".to_owned(),
            retry_after_ms: 1200,
        };
        assert_eq!(
            error4.to_string(),
            "Circuit open for tool 'search', retry in 1200ms"
        );
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Execution("boom".to_owned()).is_retryable());
        assert!(Error::Timeout(100).is_retryable());
        assert!(Error::Session("pipe closed".to_owned()).is_retryable());

        assert!(!Error::Validation("bad input".to_owned()).is_retryable());
        assert!(!Error::ToolNotFound("missing".to_owned()).is_retryable());
        assert!(
            !Error::CircuitOpen {
                tool: "search".to_owned(),
                retry_after_ms: 0,
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Planning("cycle".to_owned()).is_retryable());
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::Planning("cycle among steps 1, 2".to_owned()).is_fatal());
        assert!(Error::Dependency("step 3 references step 9".to_owned()).is_fatal());

        assert!(!Error::Execution("boom".to_owned()).is_fatal());
        assert!(!Error::Timeout(100).is_fatal());
    }

    #[test]
    fn test_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_error = from_str::<JsonValue>("not json").unwrap_err();
        let error: Error = json_error.into();
        assert!(matches!(error, Error::Json(_)));
        assert!(!error.is_retryable());
    }
}
