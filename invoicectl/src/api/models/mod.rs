//! API request and response data models.
//!
//! - [`invoices`]: the parser's result document (statistics and invoice records)
//! - [`health`]: liveness response
//!
//! Error bodies live in [`crate::errors::ErrorResponse`].

pub mod health;
pub mod invoices;
