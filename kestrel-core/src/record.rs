//! Persisted records
//!
//! A record is one item harvested from a source, keyed by
//! `(source, external_id)`. The collector owns `response`; the scorer owns
//! `predicted_label` and `predicted_score`; `manual_label` belongs to human
//! review and is only ever read here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Source;

/// A harvested item and its classification state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned primary key, strictly increasing in insertion order
    pub id: i64,
    pub source: Source,
    /// The origin's own identifier, unique within `source`
    pub external_id: String,
    /// Payload exactly as returned by the origin API
    pub response: Value,
    pub manual_label: Option<bool>,
    pub predicted_label: Option<bool>,
    /// Probability of the positive class, in `[0, 1]`
    pub predicted_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Whether the scorer has labelled this record
    pub fn is_scored(&self) -> bool {
        self.predicted_label.is_some()
    }
}

/// How an upsert resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn from_created(created: bool) -> Self {
        if created {
            Self::Inserted
        } else {
            Self::Updated
        }
    }
}

/// Mutable record columns that can be written in bulk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    Response,
    ManualLabel,
    PredictedLabel,
    PredictedScore,
}

impl RecordField {
    /// Column name in the store
    pub fn column(&self) -> &'static str {
        match self {
            RecordField::Response => "response",
            RecordField::ManualLabel => "manual_label",
            RecordField::PredictedLabel => "predicted_label",
            RecordField::PredictedScore => "predicted_score",
        }
    }
}

/// Derive the external identifier of an API item from its `id` field.
///
/// Numeric ids are rendered in decimal; string ids are used as-is.
pub fn external_id_of(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
