//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `INVOICECTL_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `INVOICECTL_` override YAML values
//! 3. **PORT** - Special case: overrides `port` if set, as most PaaS hosts inject it
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `INVOICECTL_PARSER__TIMEOUT=30s` sets the `parser.timeout` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use invoicectl::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`, `service_name`
//! - **Scratch storage**: `scratch.dir` - where uploads live while the parser runs
//! - **Parser**: `parser.program`, `parser.args`, `parser.script`, `parser.working_dir`, `parser.timeout`
//! - **Upload**: `upload.max_file_size`, `upload.max_files`, `upload.allowed_extensions`
//! - **Limits**: `limits.max_concurrent_invocations`, `limits.max_waiting_invocations`, `limits.max_wait`
//! - **CORS**: `cors.allowed_origins`, `cors.allow_credentials`, `cors.max_age`
//! - **Features**: `enable_metrics`, `enable_otel_export`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! PORT=8080
//!
//! # Point at a different interpreter and script
//! INVOICECTL_PARSER__PROGRAM=venv/bin/python3
//! INVOICECTL_PARSER__SCRIPT=invoice_parser.py
//!
//! # Accept any extension and let the parser reject bad input
//! INVOICECTL_UPLOAD__ALLOWED_EXTENSIONS=[]
//! ```

use anyhow::bail;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "INVOICECTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Service name reported by the health endpoint
    pub service_name: String,
    /// Scratch storage for uploaded files
    pub scratch: ScratchConfig,
    /// External parser invocation
    pub parser: ParserConfig,
    /// Upload validation
    pub upload: UploadConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Scratch directory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScratchConfig {
    /// Directory holding uploaded files while the parser runs. Created on first upload.
    pub dir: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
        }
    }
}

/// External parser configuration.
///
/// The parser is invoked as `<program> [args...] [script] <path1> <path2> ...` and must print
/// exactly one JSON document on stdout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    /// Executable to run (interpreter or standalone parser binary)
    pub program: String,
    /// Extra arguments placed before the script and file paths
    pub args: Vec<String>,
    /// Script handed to the interpreter. Omit when `program` is the parser itself.
    pub script: Option<PathBuf>,
    /// Working directory for the child process (defaults to the server's)
    pub working_dir: Option<PathBuf>,
    /// Kill the parser and fail the request after this long
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![],
            script: Some(PathBuf::from("invoice_parser.py")),
            working_dir: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Upload validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Maximum size of a single uploaded file in bytes.
    /// Default: 10MB
    pub max_file_size: u64,
    /// Maximum number of files per request.
    /// Set to 0 for unlimited.
    /// Default: 20
    pub max_files: usize,
    /// Accepted file extensions, compared case-insensitively and without the leading dot.
    /// An empty list accepts every file and leaves rejection to the parser.
    /// Default: ["xlsx", "xls"]
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            max_files: 20,
            allowed_extensions: vec!["xlsx".to_string(), "xls".to_string()],
        }
    }
}

impl UploadConfig {
    /// Whether a file with this original name passes the extension filter.
    pub fn accepts(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }

        let Some((_, ext)) = filename.rsplit_once('.') else {
            return false;
        };
        self.allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext))
    }

    /// Request body limit derived from the per-file and per-request caps.
    ///
    /// Returns `None` when the file count is unlimited.
    pub fn body_limit(&self) -> Option<usize> {
        if self.max_files == 0 {
            return None;
        }
        // Headroom for multipart boundaries and part headers
        let overhead = 64 * 1024 * self.max_files as u64;
        Some((self.max_file_size.saturating_mul(self.max_files as u64) + overhead) as usize)
    }
}

/// Resource limits for protecting system capacity.
///
/// These limits help prevent resource exhaustion under high load by rejecting
/// requests that would exceed capacity rather than degrading performance for all users.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum number of parser processes running at once.
    /// Set to 0 for unlimited.
    /// Default: 0 (unlimited)
    pub max_concurrent_invocations: usize,
    /// Maximum number of requests that can wait for a parser slot.
    /// When this limit is reached, new requests receive HTTP 429 immediately.
    /// Set to 0 for unlimited waiting queue.
    /// Default: 20
    pub max_waiting_invocations: usize,
    /// Maximum time to wait for a parser slot before returning HTTP 429.
    /// Zero rejects immediately when no slot is available.
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_invocations: 0,
            max_waiting_invocations: 20,
            max_wait: Duration::from_secs(60),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests. Not compatible with a wildcard origin.
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            service_name: "Transport Analytics API".to_string(),
            scratch: ScratchConfig::default(),
            parser: ParserConfig::default(),
            upload: UploadConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parser.program.trim().is_empty() {
            bail!("parser.program must not be empty");
        }

        if self.parser.timeout.is_zero() {
            bail!("parser.timeout must be greater than zero");
        }

        if self.upload.max_file_size == 0 {
            bail!("upload.max_file_size must be greater than zero");
        }

        if let Some(ext) = self
            .upload
            .allowed_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.contains(['.', '/', '\\']))
        {
            bail!("invalid entry '{ext}' in upload.allowed_extensions (use bare extensions such as \"xlsx\")");
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            bail!("cors.allow_credentials cannot be combined with a '*' origin");
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("INVOICECTL_").ignore(&["CONFIG"]).split("__"))
            // PaaS-style PORT variable
            .merge(Env::raw().only(&["PORT"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
