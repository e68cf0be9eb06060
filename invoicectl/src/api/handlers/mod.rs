//! HTTP request handlers.
//!
//! - [`invoices`]: multipart upload, parser invocation, result relay
//! - [`health`]: liveness check
//! - [`static_assets`]: front end serving and page fallback
//!
//! Handlers return [`crate::errors::Error`], which converts to a status code and a JSON
//! [`crate::errors::ErrorResponse`] body.

pub mod health;
pub mod invoices;
pub mod static_assets;
