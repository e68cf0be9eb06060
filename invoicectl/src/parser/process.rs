//! Parser runner backed by a child process.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{ParserError, ParserRunner, Result};
use crate::config::ParserConfig;
use crate::metrics;

/// Spawns `<program> [args...] [script] <paths...>` once per call.
///
/// The child is spawned with `kill_on_drop`, so a timeout, a cancellation, or the caller's
/// future being dropped (client disconnect) all terminate it.
#[derive(Debug, Clone)]
pub struct ProcessParser {
    program: String,
    args: Vec<String>,
    script: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl From<ParserConfig> for ProcessParser {
    fn from(config: ParserConfig) -> Self {
        Self {
            program: config.program,
            args: config.args,
            script: config.script,
            working_dir: config.working_dir,
            timeout: config.timeout,
        }
    }
}

impl ProcessParser {
    fn command(&self, paths: &[PathBuf]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(self.script.iter())
            .args(paths)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        command
    }

    async fn invoke(&self, paths: &[PathBuf], cancel: CancellationToken) -> Result<serde_json::Value> {
        let child = self.command(paths).spawn().map_err(|source| ParserError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        debug!(pid = ?child.id(), "Parser process spawned");

        // Losing branches drop `wait_with_output`, which drops the child and kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|source| ParserError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            _ = tokio::time::sleep(self.timeout) => {
                return Err(ParserError::TimedOut { after: self.timeout });
            }
            _ = cancel.cancelled() => {
                return Err(ParserError::Cancelled);
            }
        };

        interpret_output(output)
    }
}

#[async_trait]
impl ParserRunner for ProcessParser {
    #[instrument(skip_all, fields(program = %self.program, files = paths.len()))]
    async fn run(&self, paths: &[PathBuf], cancel: CancellationToken) -> Result<serde_json::Value> {
        let started = Instant::now();
        let result = self.invoke(paths, cancel).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                info!(elapsed_ms = elapsed.as_millis() as u64, "Parser finished");
                metrics::record_parser_invocation("success", elapsed);
            }
            Err(e) => {
                warn!(elapsed_ms = elapsed.as_millis() as u64, error = %e, "Parser invocation failed");
                metrics::record_parser_invocation(e.outcome(), elapsed);
            }
        }

        result
    }
}

/// Turn a finished parser process into its result document.
///
/// - non-zero exit: [`ParserError::Failed`] with stderr, whatever stdout holds
/// - zero exit, blank stdout: [`ParserError::Failed`] with stderr
/// - zero exit, stdout not JSON: [`ParserError::Unparseable`] with the raw stdout
pub fn interpret_output(output: Output) -> Result<serde_json::Value> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    debug!(status = %output.status, stdout_bytes = output.stdout.len(), "Parser stdout: {}", stdout);
    if !stderr.is_empty() {
        debug!("Parser stderr: {}", stderr);
    }

    if !output.status.success() || stdout.trim().is_empty() {
        return Err(ParserError::Failed {
            status: output.status.to_string(),
            stderr: stderr.into_owned(),
        });
    }

    serde_json::from_str(&stdout).map_err(|e| ParserError::Unparseable {
        output: stdout.into_owned(),
        reason: e.to_string(),
    })
}
