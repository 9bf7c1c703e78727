use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub id: Option<i64>,
    pub session_id: String,
    pub capture_key: String,
    pub path: String,
    pub byte_len: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: Option<i64>,
    pub session_id: String,
    pub analysis_key: String,
    pub is_productive: bool,
    pub reason: String,
    pub raw: String,
    /// Text file holding the prompt and response, when one was written.
    pub path: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}
