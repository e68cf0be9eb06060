use std::time::Duration;
use thiserror::Error;

/// Ways an external parser invocation can fail.
#[derive(Error, Debug)]
pub enum ParserError {
    /// The process could not be started or waited on (missing executable, permission denied, ...)
    #[error("Failed to run parser '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully, or succeeded without printing anything
    #[error("Parser exited with {status}")]
    Failed {
        /// Human-readable exit status (`exit status: 1`, `signal: 9 (SIGKILL)`, ...)
        status: String,
        stderr: String,
    },

    /// The process exited successfully but stdout is not a JSON document
    #[error("Parser output is not valid JSON: {reason}")]
    Unparseable { output: String, reason: String },

    /// The process ran past the configured timeout and was killed
    #[error("Parser killed after {}", humantime::format_duration(*after))]
    TimedOut { after: Duration },

    /// The invocation was aborted because the server is shutting down
    #[error("Parser invocation cancelled")]
    Cancelled,
}

impl ParserError {
    /// Label used for the invocation outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            ParserError::Spawn { .. } => "spawn_error",
            ParserError::Failed { .. } => "failed",
            ParserError::Unparseable { .. } => "unparseable",
            ParserError::TimedOut { .. } => "timeout",
            ParserError::Cancelled => "cancelled",
        }
    }
}

pub type Result<T> = std::result::Result<T, ParserError>;
