//! OpenAPI documentation, served as JSON at `/api/openapi.json` and rendered at `/api/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::errors::ErrorResponse;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Transport invoice gateway",
        description = "Upload transport invoice spreadsheets and get back the records, totals and \
vehicle/driver statistics extracted by the invoice parser."
    ),
    paths(
        api::handlers::invoices::process_invoices,
        api::handlers::health::health,
    ),
    components(schemas(
        api::models::invoices::ProcessingResult,
        api::models::invoices::Statistics,
        api::models::invoices::InvoiceRecord,
        api::models::health::HealthResponse,
        ErrorResponse,
    )),
    tags(
        (name = "invoices", description = "Invoice spreadsheet processing"),
        (name = "health", description = "Service liveness"),
    )
)]
pub struct ApiDoc;
