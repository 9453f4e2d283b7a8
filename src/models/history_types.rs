use crate::models::predict_types::{Alternative, Prediction, PredictionResult};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock as integer milliseconds since the epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A history entry recorded in the session-local cache.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LocalEntry {
    pub id: String,
    pub preview: Option<String>,
    pub result: PredictionResult,
    pub timestamp: i64,
}

/// A history entry as it lives in the remote store. The `id` is the
/// server-assigned key and is attached after deserializing the record body.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RemoteRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub prediction: Option<Prediction>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(default, rename = "imageSnippet")]
    pub image_snippet: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

/// Write shape for appending one analysis to the remote store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NewAnalysis {
    pub prediction: Prediction,
    pub alternatives: Vec<Alternative>,
    #[serde(rename = "imageSnippet")]
    pub image_snippet: Option<String>,
    pub timestamp: i64,
}

/// The two raw history shapes, made explicit instead of duck-typed.
#[derive(Debug, Clone)]
pub enum RawEntry {
    Local(LocalEntry),
    Remote(RemoteRecord),
}

/// Canonical history entry consumed by the presentation layer. Only
/// produced for entries with a resolvable prediction.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub thumbnail: Option<String>,
    pub plant: String,
    pub condition: String,
    pub confidence: f32,
    pub is_healthy: bool,
    pub timestamp: i64,
    pub alternatives: Vec<Alternative>,
}
