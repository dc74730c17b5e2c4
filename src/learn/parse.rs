//! Extraction of the JSON payload the assistant embeds in free text, with
//! the defensive coercions that keep a schema-free text generator usable:
//! the upstream model regularly omits fields, and every gap here maps to a
//! concrete default instead of a failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, AppResult};

pub const DEFAULT_UNIT: &str = "kg CO2e";

pub const DEFAULT_TIPS: [&str; 3] = [
    "Walk, cycle or take public transport for short trips",
    "Choose seasonal, locally grown food",
    "Switch off devices instead of leaving them on standby",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonEstimate {
    pub footprint: f64,
    pub unit: String,
    pub breakdown: Vec<CarbonBreakdownEntry>,
    pub tips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonBreakdownEntry {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
}

/// Either a structured reading of the assistant's reply, or the raw text when
/// no structure could be recovered. The reply is never dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantAnswer<T> {
    Parsed(T),
    Raw(String),
}

pub fn parse_or_raw<T>(text: &str, parser: impl Fn(&str) -> AppResult<T>) -> AssistantAnswer<T> {
    match parser(text) {
        Ok(value) => AssistantAnswer::Parsed(value),
        Err(_) => AssistantAnswer::Raw(text.to_owned()),
    }
}

/// Extracts the first embedded JSON object or array: the span from the first
/// `{` or `[` (whichever comes first) to the last matching `}` or `]`.
pub fn extract_json(text: &str) -> AppResult<Value> {
    let (open, close) = match (text.find('{'), text.find('[')) {
        (Some(obj), Some(arr)) if arr < obj => (arr, ']'),
        (Some(obj), _) => (obj, '}'),
        (None, Some(arr)) => (arr, ']'),
        (None, None) => return Err(AppError::UnparseableResponse),
    };
    let end = text
        .rfind(close)
        .filter(|&end| end > open)
        .ok_or(AppError::UnparseableResponse)?;

    serde_json::from_str(&text[open..=end]).map_err(|_| AppError::UnparseableResponse)
}

/// Carbon-footprint reading. Missing or invalid fields coerce to defaults:
/// `footprint` to 0, `unit` to [`DEFAULT_UNIT`], a missing breakdown to one
/// `Total` entry carrying the whole footprint, missing tips to
/// [`DEFAULT_TIPS`].
pub fn parse_carbon(text: &str) -> AppResult<CarbonEstimate> {
    let value = extract_json(text)?;

    let footprint = value
        .get("footprint")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let unit = value
        .get("unit")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_UNIT)
        .to_owned();

    let breakdown = match value.get("breakdown").and_then(Value::as_array) {
        Some(entries) => entries
            .iter()
            .filter_map(|entry| {
                let category = entry.get("category").and_then(Value::as_str)?;
                Some(CarbonBreakdownEntry {
                    category: category.to_owned(),
                    amount: entry.get("amount").and_then(Value::as_f64).unwrap_or(0.0),
                })
            })
            .collect(),
        None => vec![CarbonBreakdownEntry {
            category: "Total".to_owned(),
            amount: footprint,
        }],
    };

    let tips = match value.get("tips").and_then(Value::as_array) {
        Some(tips) => tips
            .iter()
            .filter_map(|tip| tip.as_str().map(str::to_owned))
            .collect(),
        None => DEFAULT_TIPS.map(str::to_owned).to_vec(),
    };

    Ok(CarbonEstimate {
        footprint,
        unit,
        breakdown,
        tips,
    })
}

/// Green-event suggestions. A reply whose payload is not an array coerces to
/// an empty list; there is no partial-event recovery.
pub fn parse_green_events(text: &str) -> AppResult<Vec<GreenEvent>> {
    let value = extract_json(text)?;
    let Some(items) = value.as_array() else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect())
}
