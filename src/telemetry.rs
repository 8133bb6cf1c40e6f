/// Progress events sent from the loader to the CLI display.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Batch committed atomically
    BatchCommitted { rows: u64, duration_ms: u64 },
    /// Batch rolled back after a failed commit attempt
    BatchRolledBack { rows: u64 },
    /// Source row rejected during mapping
    RowRejected,
}

/// Statistics aggregated from load events
#[derive(Debug, Default, Clone)]
pub struct LoadStats {
    pub rows_inserted: u64,
    pub rows_rejected: u64,
    pub batches_committed: u64,
    pub batches_rolled_back: u64,
    pub batch_durations_ms: Vec<u64>,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a load event
    pub fn update(&mut self, event: &LoadEvent) {
        match event {
            LoadEvent::BatchCommitted { rows, duration_ms } => {
                self.rows_inserted += rows;
                self.batches_committed += 1;
                self.batch_durations_ms.push(*duration_ms);
            }
            LoadEvent::BatchRolledBack { .. } => {
                self.batches_rolled_back += 1;
            }
            LoadEvent::RowRejected => {
                self.rows_rejected += 1;
            }
        }
    }

    /// Calculate percentile from batch durations
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.batch_durations_ms.is_empty() {
            return None;
        }

        let mut sorted = self.batch_durations_ms.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize - 1;
        let index = index.min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
