// Batch Models
// Progress reporting for the in-place batch conversion job

use serde::{Deserialize, Serialize};

/// Outcome of one file in a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFileResult {
    pub path: String,
    pub success: bool,
    /// Why the file was skipped (present only on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Live status of the batch conversion job. Retained after completion so the
/// final counters stay queryable until the next job starts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub running: bool,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// File name currently being processed ("" when idle)
    pub current: String,
    pub results: Vec<BatchFileResult>,
}
