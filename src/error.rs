//! Error types for clusterdeck.
//!
//! Errors fall into three families: construction errors raised before any
//! remote side effect happens, remote errors raised by a step while it
//! talks to a host, and the playbook-level [`Error::StepFailed`] which keeps
//! the classified counts of the batch that failed. [`Error::SkipTask`] is
//! not a failure at all: a task returns it to say it had nothing to do.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::executor::monitor::Summary;
use crate::vars::VarsError;

/// Result type alias for clusterdeck operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for clusterdeck.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// A value handed to the config container is not an entity kind it knows.
    #[error("Unsupported config type: {0}")]
    UnsupportedConfigType(String),

    /// The step type cannot be applied to the config kind it was given.
    #[error("Unknown task type '{step}' for {config} configs")]
    UnknownTaskType {
        /// Step type name
        step: String,
        /// Config kind name
        config: String,
    },

    /// Two entities of one run derived the same id.
    #[error("Duplicate id '{0}'")]
    DuplicateId(String),

    /// Invalid topology contents.
    #[error("Invalid topology: {0}")]
    Topology(String),

    /// Error reading or decoding a topology or format file.
    #[error("Failed to parse '{path}': {message}")]
    ConfigParse {
        /// Path of the file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Variable resolution failed.
    #[error(transparent)]
    Vars(#[from] VarsError),

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// Transport level failure (connect, spawn, transfer).
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Command exited non-zero.
    #[error("Command failed on '{host}' with exit code {exit_code}: {message}")]
    RemoteCommandFailed {
        /// Target host
        host: String,
        /// Exit code
        exit_code: i32,
        /// Error message
        message: String,
    },

    /// Command exceeded its deadline.
    #[error("Command on '{host}' timed out after {} seconds", timeout.as_secs())]
    Timeout {
        /// Target host
        host: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Persistence lookup or update failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A step failed for a reason other than a remote command.
    #[error("Step '{step}' failed: {message}")]
    StepExecution {
        /// Step name
        step: String,
        /// Error message
        message: String,
    },

    /// Intentional no-op outcome of a task.
    #[error("Task skipped")]
    SkipTask,

    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// A playbook step stopped the run.
    #[error("Playbook step '{step}' failed ({summary}): {source}")]
    StepFailed {
        /// Step type name
        step: String,
        /// Classified counts of the batch
        summary: Summary,
        /// First hard error of the batch
        #[source]
        source: Box<Error>,
    },

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new remote command failure.
    pub fn remote_command_failed(
        host: impl Into<String>,
        exit_code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteCommandFailed {
            host: host.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Creates a new step execution error.
    pub fn step_execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Returns true for the skip sentinel.
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::SkipTask)
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::StepFailed { source, .. } => source.exit_code(),
            Error::RemoteCommandFailed { .. } | Error::StepExecution { .. } => 2,
            Error::Connection(_) | Error::Timeout { .. } => 3,
            Error::ConfigParse { .. }
            | Error::Topology(_)
            | Error::DuplicateId(_)
            | Error::Vars(_)
            | Error::YamlParse(_) => 4,
            Error::UnsupportedConfigType(_) | Error::UnknownTaskType { .. } => 5,
            Error::Storage(_) => 6,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_sentinel() {
        assert!(Error::SkipTask.is_skip());
        assert!(!Error::Internal("x".into()).is_skip());
    }

    #[test]
    fn test_step_failed_exit_code_follows_source() {
        let err = Error::StepFailed {
            step: "START_SERVICE".into(),
            summary: Summary {
                success: 1,
                skipped: 0,
                failed: 1,
            },
            source: Box::new(Error::remote_command_failed("h1", 1, "boom")),
        };
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("START_SERVICE"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            host: "h1".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Command on 'h1' timed out after 5 seconds");
        assert_eq!(err.exit_code(), 3);
    }
}
