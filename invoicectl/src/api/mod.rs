//! HTTP API: route handlers and their data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Response bodies and the typed view of the parser result
//!
//! # Routes
//!
//! - `POST /api/process-invoices`: upload spreadsheets and return the parser's result
//! - `GET /api/health`: liveness
//! - `GET /api/openapi.json`, `GET /api/docs`: API description
//!
//! Everything else outside `/api` is served from the embedded front end.

pub mod handlers;
pub mod models;
