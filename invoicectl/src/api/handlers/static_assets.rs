//! HTTP handlers for the embedded front end.

use axum::{
    Json,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::errors::ErrorResponse;
use crate::static_assets::Assets;

/// Serve embedded static assets, falling back to `index.html` for unknown page routes.
///
/// Unknown `/api/*` paths get a JSON 404 instead of the page, so API clients never receive HTML.
#[instrument]
pub async fn serve_embedded_asset(uri: Uri) -> Response {
    let mut path = uri.path().trim_start_matches('/');

    if path == "api" || path.starts_with("api/") {
        debug!("No API route for {}", uri.path());
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                success: false,
                error: format!("Not found: {}", uri.path()),
                details: None,
            }),
        )
            .into_response();
    }

    if path.is_empty() || path.ends_with('/') {
        path = "index.html";
    }

    if let Some(content) = Assets::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [
                (header::CONTENT_TYPE, mime.as_ref().to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            content.data.into_owned(),
        )
            .into_response();
    }

    debug!("Hitting SPA fallback for: {}", uri.path());
    match Assets::get("index.html") {
        Some(index) => (
            [
                (header::CONTENT_TYPE, "text/html".to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            index.data.into_owned(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
