use crate::parser::ParserError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The request carried no files under the `files` field
    #[error("No files uploaded")]
    NoFiles,

    /// Invalid request data, e.g. a malformed multipart body
    #[error("{message}")]
    BadRequest { message: String },

    /// File extension not in the configured allow-list
    #[error("File \"{filename}\" is not an Excel file")]
    UnsupportedFileType { filename: String },

    /// File or request exceeds the configured size limits
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Too many concurrent parser invocations
    #[error("{message}")]
    TooManyRequests { message: String },

    /// The external parser failed or produced an unusable result
    #[error(transparent)]
    Parser(#[from] ParserError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// Short, user-facing summary of the failure
    pub error: String,
    /// Diagnostic text (parser stderr, raw parser output, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoFiles | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::UnsupportedFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Parser(parser_err) => match parser_err {
                ParserError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                ParserError::Spawn { .. }
                | ParserError::Failed { .. }
                | ParserError::Unparseable { .. }
                | ParserError::TimedOut { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::NoFiles => "No files uploaded".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::UnsupportedFileType { .. } => self.to_string(),
            Error::PayloadTooLarge { message } => message.clone(),
            Error::TooManyRequests { message } => message.clone(),
            Error::Parser(parser_err) => match parser_err {
                ParserError::Spawn { .. } | ParserError::Failed { .. } => "Parser execution failed".to_string(),
                ParserError::Unparseable { .. } => "Failed to parse parser result".to_string(),
                ParserError::TimedOut { .. } => "Parser timed out".to_string(),
                ParserError::Cancelled => "Service is shutting down".to_string(),
            },
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }

    /// Diagnostic detail attached to the response body.
    ///
    /// Only parser failures carry details: the parser's stderr, its raw stdout, or the OS error
    /// that prevented it from starting.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Parser(ParserError::Spawn { source, .. }) => Some(source.to_string()),
            Error::Parser(ParserError::Failed { stderr, .. }) => Some(stderr.clone()),
            Error::Parser(ParserError::Unparseable { output, .. }) => Some(output.clone()),
            Error::Parser(err @ ParserError::TimedOut { .. }) => Some(err.to_string()),
            _ => None,
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            error: self.user_message(),
            details: self.details(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Parser(ParserError::Cancelled) => {
                tracing::info!("Parser invocation cancelled: {}", self);
            }
            Error::Parser(_) => {
                tracing::warn!("Parser error: {}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::info!("Capacity error: {}", self);
            }
            Error::NoFiles | Error::BadRequest { .. } | Error::UnsupportedFileType { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.to_response_body())).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
