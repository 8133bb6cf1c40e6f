use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mapper::RowError;

/// One rejected source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRejection {
    pub line_number: u64,
    pub error_type: String,
    pub error_message: String,
}

/// One batch whose commit attempt failed and was rolled back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch_index: u64,
    pub first_line: u64,
    pub last_line: u64,
    pub rows: u64,
    pub error_type: String,
    pub error_message: String,
}

/// Summary of a completed load. Created empty at load start, accumulated
/// batch-by-batch by the loader, returned at load end, never mutated after.
///
/// `rows_inserted + rows_rejected == rows_read` holds for every completed
/// load with an intact stream; a row is never counted on both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub load_id: String,
    pub table: String,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_rejected: u64,
    pub batches_committed: u64,
    pub batches_rolled_back: u64,
    #[serde(default)]
    pub rejections: Vec<RowRejection>,
    #[serde(default)]
    pub batch_failures: Vec<BatchFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_error: Option<String>,
    pub started_at: String,
    pub completed_at: String,
}

impl LoadReport {
    pub(crate) fn start(table: &str) -> Self {
        Self {
            load_id: Uuid::new_v4().to_string(),
            table: table.to_string(),
            rows_read: 0,
            rows_inserted: 0,
            rows_rejected: 0,
            batches_committed: 0,
            batches_rolled_back: 0,
            rejections: Vec::new(),
            batch_failures: Vec::new(),
            stream_error: None,
            started_at: Utc::now().to_rfc3339(),
            completed_at: String::new(),
        }
    }

    pub(crate) fn record_rejection(&mut self, line_number: u64, error: &RowError) {
        self.rows_rejected += 1;
        self.rejections.push(RowRejection {
            line_number,
            error_type: error.error_type().to_string(),
            error_message: error.to_string(),
        });
    }

    pub(crate) fn finish(&mut self) {
        self.completed_at = Utc::now().to_rfc3339();
    }

    /// True when every read row was inserted and every batch committed.
    pub fn is_clean(&self) -> bool {
        self.rows_rejected == 0 && self.batches_rolled_back == 0 && self.stream_error.is_none()
    }
}
