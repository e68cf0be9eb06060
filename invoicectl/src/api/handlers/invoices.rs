//! Invoice upload gateway.

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use tracing::{debug, info, instrument, warn};

use crate::AppState;
use crate::api::models::invoices::ProcessingResult;
use crate::errors::{Error, ErrorResponse, Result};

/// Multipart field carrying the uploaded spreadsheets
pub const FILES_FIELD: &str = "files";

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { message: e.body_text() }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

fn storage_error(e: std::io::Error) -> Error {
    Error::Internal {
        operation: format!("store uploaded file: {e}"),
    }
}

#[utoipa::path(
    post,
    path = "/api/process-invoices",
    tag = "invoices",
    summary = "Process invoice spreadsheets",
    description = "Upload one or more transport invoice spreadsheets under the `files` field. \
The files are handed to the external parser and its result document is returned unchanged.",
    request_body(
        content_type = "multipart/form-data",
        description = "Spreadsheets (.xlsx/.xls) under the `files` field"
    ),
    responses(
        (status = 200, description = "Parser result document", body = ProcessingResult),
        (status = 400, description = "No files uploaded, too many files, or malformed multipart body", body = ErrorResponse),
        (status = 413, description = "A file exceeds the size limit", body = ErrorResponse),
        (status = 415, description = "A file has a disallowed extension", body = ErrorResponse),
        (status = 429, description = "All parser slots busy and the wait queue full or expired", body = ErrorResponse),
        (status = 500, description = "Parser failed, timed out, or printed something other than JSON", body = ErrorResponse),
        (status = 503, description = "Server is shutting down", body = ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn process_invoices(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<serde_json::Value>> {
    let upload = &state.config.upload;
    // Every early return below drops `files`, which removes whatever was already written
    let mut files = state.scratch.files();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILES_FIELD) {
            debug!(field = ?field.name(), "Ignoring multipart field");
            continue;
        }

        let Some(original_name) = field.file_name().map(str::to_string) else {
            debug!("Ignoring non-file part under the files field");
            continue;
        };

        if !upload.accepts(&original_name) {
            return Err(Error::UnsupportedFileType { filename: original_name });
        }

        if upload.max_files > 0 && files.len() >= upload.max_files {
            return Err(Error::BadRequest {
                message: format!("Too many files: at most {} per request", upload.max_files),
            });
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| mime_guess::from_path(&original_name).first_or_octet_stream().to_string());

        let mut writer = files.create(&original_name, &content_type).await.map_err(storage_error)?;

        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            // Check size limit incrementally to fail fast
            if writer.size() + chunk.len() as u64 > upload.max_file_size {
                warn!(
                    original_name = %original_name,
                    max_file_size = upload.max_file_size,
                    "File size limit exceeded, aborting upload"
                );
                return Err(Error::PayloadTooLarge {
                    message: format!(
                        "File \"{}\" exceeds the maximum allowed size of {} bytes ({} MB)",
                        original_name,
                        upload.max_file_size,
                        upload.max_file_size / (1024 * 1024)
                    ),
                });
            }
            writer.write_chunk(&chunk).await.map_err(storage_error)?;
        }

        let file = writer.finish().await.map_err(storage_error)?;
        debug!(
            original_name = %file.original_name,
            content_type = %file.content_type,
            size = file.size,
            path = %file.path.display(),
            "Stored upload"
        );
    }

    if files.is_empty() {
        return Err(Error::NoFiles);
    }

    info!(
        files = ?files.iter().map(|f| f.original_name.as_str()).collect::<Vec<_>>(),
        "Received invoice files for processing"
    );

    // Held until the parser exits; uploads above never wait for it
    let _slot = match &state.parser_slots {
        Some(slots) => Some(slots.acquire(&state.shutdown_token).await?),
        None => None,
    };

    let result = state.parser.run(&files.paths(), state.shutdown_token.child_token()).await;
    files.cleanup().await;
    let document = result?;

    match ProcessingResult::view(&document) {
        Some(view) if view.success => {
            info!(
                records = view.statistics.as_ref().map(|s| s.total_records),
                total_amount = view.statistics.as_ref().map(|s| s.total_amount),
                "Invoices processed"
            );
        }
        Some(view) => {
            warn!(error = ?view.error, "Parser reported no usable data");
        }
        None => {
            warn!("Parser result does not match the expected document shape, relaying as is");
        }
    }

    Ok(Json(document))
}
