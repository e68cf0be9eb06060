use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always "OK"
    pub status: String,
    pub service: String,
    /// RFC 3339 UTC timestamp with millisecond precision
    pub timestamp: String,
}

impl HealthResponse {
    pub fn ok(service: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: "OK".to_string(),
            service: service.to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
