//! Parser result document.
//!
//! The gateway relays the parser's stdout document verbatim. These types are a typed view of
//! that document, used for logging and the OpenAPI schema. They are lenient: every field the
//! parser may omit is optional, and unknown fields are ignored.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result document printed by the parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProcessingResult {
    pub success: bool,
    /// Summary line, e.g. "Обработано 42 записей"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Statistics>,
    #[serde(default)]
    pub data: Vec<InvoiceRecord>,
    /// Set by the parser when it found nothing to process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProcessingResult {
    /// Typed view of a relayed document, if it has the expected shape.
    pub fn view(document: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(document.clone()).ok()
    }
}

/// Aggregates computed by the parser over all records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Statistics {
    pub total_records: u64,
    pub total_amount: f64,
    /// Number of distinct vehicle registrations
    pub unique_cars: u64,
    /// Number of distinct driver surnames
    pub unique_drivers: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub car_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub driver_list: Vec<String>,
}

/// One transport invoice line.
///
/// The parser emits Russian column names; they are kept on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceRecord {
    /// Trip date as written in the invoice (`DD.MM.YY`)
    #[serde(rename = "Дата")]
    pub date: String,
    #[serde(rename = "Маршрут")]
    pub route: String,
    /// Cost in roubles
    #[serde(rename = "Стоимость")]
    pub cost: f64,
    /// Vehicle registration number
    #[serde(rename = "Гос_номер")]
    pub vehicle: String,
    #[serde(rename = "Водитель")]
    pub driver: String,
    /// Source file name
    #[serde(rename = "Источник")]
    pub source: String,
    /// Spreadsheet row the record came from
    #[serde(rename = "Строка", default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u32>,
}
