//! External parser abstraction.
//!
//! The parser is an out-of-process program that reads spreadsheet files and prints a single
//! JSON document on stdout. This module defines the [`ParserRunner`] trait the upload gateway
//! talks to, and [`ProcessParser`], the implementation that spawns the configured program.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ParserConfig;

mod errors;
mod process;

pub use errors::{ParserError, Result};
pub use process::{ProcessParser, interpret_output};

/// Create the parser runner from configuration
pub fn create_runner(config: &ParserConfig) -> Arc<dyn ParserRunner> {
    Arc::new(ProcessParser::from(config.clone()))
}

/// Runs the external parser over a set of files.
#[async_trait]
pub trait ParserRunner: Send + Sync {
    /// Parse the given files, in order, and return the parser's result document.
    ///
    /// Called exactly once per upload request. Implementations must stop work and return
    /// [`ParserError::Cancelled`] once `cancel` fires.
    async fn run(&self, paths: &[PathBuf], cancel: CancellationToken) -> Result<serde_json::Value>;
}
