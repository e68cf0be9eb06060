//! # invoicectl: transport invoice upload gateway
//!
//! `invoicectl` is a small HTTP service in front of a transport invoice parser. Users upload
//! spreadsheets (`.xlsx`/`.xls`) of carrier invoices from a browser page; the gateway stores them
//! in a scratch directory, runs the external parser over them, and returns the parser's JSON
//! result: extracted invoice records plus totals and vehicle/driver statistics.
//!
//! ## Request Flow
//!
//! A `POST /api/process-invoices` request carries one or more files under the multipart field
//! `files`. The handler in [`api::handlers::invoices`]:
//!
//! 1. streams each file into the scratch directory ([`scratch`]), enforcing the extension,
//!    size and count limits from [`config::UploadConfig`]
//! 2. takes a parser slot ([`limits`]), if concurrent runs are bounded
//! 3. runs the parser once over all stored paths ([`parser`]), bounded by a timeout and
//!    cancelled on shutdown
//! 4. removes every scratch file, whatever the outcome
//! 5. relays the parser's JSON document unchanged, or maps the failure to an
//!    [`errors::ErrorResponse`]
//!
//! The parser's document is not reinterpreted. A document with `"success": false` (nothing
//! recognisable in the spreadsheets) is still a successful invocation and is returned with 200.
//!
//! ## Other Routes
//!
//! - `GET /api/health`: liveness
//! - `GET /api/openapi.json`, `GET /api/docs`: OpenAPI document and viewer ([`openapi`])
//! - `GET /internal/metrics`: Prometheus metrics, when `enable_metrics` is set ([`metrics`])
//! - anything else: the embedded upload page ([`static_assets`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use invoicectl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = invoicectl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     invoicectl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
pub mod limits;
pub mod metrics;
mod openapi;
pub mod parser;
pub mod scratch;
mod static_assets;
pub mod telemetry;
#[cfg(test)]
mod test_utils;

use std::sync::{Arc, OnceLock};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, Method},
    routing::{get, post},
};
use axum_prometheus::{PrometheusMetricLayer, metrics_exporter_prometheus::PrometheusHandle};
use bon::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{health::health, invoices::process_invoices, static_assets::serve_embedded_asset},
    config::CorsOrigin,
    limits::ParserSlots,
    openapi::ApiDoc,
    parser::ParserRunner,
    scratch::ScratchDir,
};

pub use config::Config;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config.clone())
///     .scratch(ScratchDir::new(&config.scratch.dir))
///     .parser(parser::create_runner(&config.parser))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub scratch: ScratchDir,
    pub parser: Arc<dyn ParserRunner>,
    /// Bound on concurrent parser processes; `None` when unbounded
    pub parser_slots: Option<Arc<ParserSlots>>,
    /// Cancelled when the server starts shutting down; in-flight parser runs are killed
    #[builder(default)]
    pub shutdown_token: CancellationToken,
}

/// The recorder behind axum-prometheus is process-global and can only be installed once.
static PROMETHEUS: OnceLock<(PrometheusMetricLayer<'static>, PrometheusHandle)> = OnceLock::new();

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    // tower-http rejects "*" inside an origin list, so a wildcard anywhere means any origin
    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Browsers send the origin without a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<http::HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: API routes, docs, front end, and middleware.
///
/// # Errors
///
/// Returns an error if the CORS configuration cannot be turned into header values.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = match state.config.upload.body_limit() {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    let api_routes = Router::new()
        .route("/process-invoices", post(process_invoices).layer(body_limit))
        .route("/health", get(health))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state(state.clone());

    let router = Router::new()
        .nest("/api", api_routes)
        .fallback(serve_embedded_asset)
        .layer(create_cors_layer(&state.config)?);

    let router = if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PROMETHEUS.get_or_init(PrometheusMetricLayer::pair).clone();
        router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer)
    } else {
        router
    };

    Ok(router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ))
}

/// Main application: state plus the router built from it.
///
/// 1. **Create**: [`Application::new`] builds the parser runner, parser slots and router
/// 2. **Serve**: [`Application::serve`] binds to the configured address and handles requests
/// 3. **Shutdown**: on the shutdown signal, in-flight parser runs are cancelled, open
///    connections drain, and pending spans are flushed
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting invoice gateway with configuration: {:#?}", config);

        warn_if_parser_script_missing(&config);

        let app_state = AppState::builder()
            .config(config.clone())
            .scratch(ScratchDir::new(&config.scratch.dir))
            .parser(parser::create_runner(&config.parser))
            .maybe_parser_slots(ParserSlots::from_config(&config.limits).map(Arc::new))
            .build();

        Self::with_state(app_state)
    }

    /// Build an application around prepared state, e.g. with a substitute parser runner.
    pub fn with_state(app_state: AppState) -> anyhow::Result<Self> {
        let router = build_router(&app_state)?;
        let config = app_state.config.clone();
        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Invoice gateway listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        let shutdown_token = self.app_state.shutdown_token.clone();
        let shutdown = async move {
            shutdown.await;
            info!("Cancelling in-flight parser runs...");
            shutdown_token.cancel();
        };

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

/// The parser script is only opened by the child process, so a bad path would otherwise first
/// show up as a failed upload.
fn warn_if_parser_script_missing(config: &Config) {
    let Some(script) = &config.parser.script else {
        return;
    };

    let resolved = match &config.parser.working_dir {
        Some(dir) if script.is_relative() => dir.join(script),
        _ => script.clone(),
    };

    if !resolved.exists() {
        warn!(
            script = %resolved.display(),
            "Parser script not found; uploads will fail until it is in place"
        );
    }
}
