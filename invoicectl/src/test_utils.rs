//! Test helpers: configs, a recording parser stand-in, and test servers.

use async_trait::async_trait;
use axum_test::{TestServer, multipart::Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ParserConfig};
use crate::limits::ParserSlots;
use crate::parser::{ParserError, ParserRunner, Result};
use crate::scratch::ScratchDir;
use crate::{AppState, Application};

/// Default config with scratch files under `scratch_dir` and metrics off.
pub fn create_test_config(scratch_dir: &Path) -> Config {
    let mut config = Config::default();
    config.scratch.dir = scratch_dir.to_path_buf();
    config.enable_metrics = false;
    config
}

/// Parser config running an inline `sh` script; file paths arrive as `$1`, `$2`, ...
pub fn shell_parser_config(script: &str) -> ParserConfig {
    ParserConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "parser".to_string()],
        script: None,
        working_dir: None,
        timeout: Duration::from_secs(10),
    }
}

/// A file as the parser saw it at invocation time.
#[derive(Debug, Clone)]
pub struct SeenFile {
    pub path: PathBuf,
    /// `None` if the file did not exist
    pub contents: Option<Vec<u8>>,
}

/// Parser stand-in that records every invocation and answers with a canned result.
///
/// An `Ok` document is returned on every call; an error is returned once, then
/// [`ParserError::Cancelled`].
pub struct RecordingParser {
    response: Mutex<Option<Result<Value>>>,
    invocations: Mutex<Vec<Vec<SeenFile>>>,
}

impl RecordingParser {
    pub fn returning(response: Result<Value>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Some(response)),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn invocations(&self) -> Vec<Vec<SeenFile>> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl ParserRunner for RecordingParser {
    async fn run(&self, paths: &[PathBuf], _cancel: CancellationToken) -> Result<Value> {
        let seen = paths
            .iter()
            .map(|path| SeenFile {
                path: path.clone(),
                contents: std::fs::read(path).ok(),
            })
            .collect();
        self.invocations.lock().unwrap().push(seen);

        let mut response = self.response.lock().unwrap();
        if let Some(Ok(document)) = response.as_ref() {
            return Ok(document.clone());
        }
        response.take().unwrap_or(Err(ParserError::Cancelled))
    }
}

pub fn create_test_state(config: Config, parser: Arc<dyn ParserRunner>) -> AppState {
    AppState::builder()
        .scratch(ScratchDir::new(&config.scratch.dir))
        .maybe_parser_slots(ParserSlots::from_config(&config.limits).map(Arc::new))
        .parser(parser)
        .config(config)
        .build()
}

pub fn create_test_server(state: AppState) -> TestServer {
    Application::with_state(state)
        .expect("Failed to build application")
        .into_test_server()
}

/// Test server running the parser described by `config.parser`.
pub fn create_test_app(config: Config) -> TestServer {
    Application::new(config).expect("Failed to build application").into_test_server()
}

pub fn create_test_app_with_parser(config: Config, parser: Arc<dyn ParserRunner>) -> TestServer {
    create_test_server(create_test_state(config, parser))
}

/// Multipart file part with the given upload name.
pub fn file_part(name: &str, contents: &[u8]) -> Part {
    Part::bytes(contents.to_vec()).file_name(name.to_string())
}

/// Number of entries left in the scratch directory (0 if it was never created).
pub fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
