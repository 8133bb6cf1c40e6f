use std::time::Instant;

use async_trait::async_trait;
use csv_async::{AsyncReaderBuilder, StringRecord};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::mapper::{map_row, MappedRecord};
use super::report::{BatchFailure, LoadReport};
use crate::schema::{ColumnDef, TargetTableSpec};
use crate::telemetry::LoadEvent;

/// Fatal loader misconfiguration, raised before any I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
}

/// Batch-level destination failures. Recovered: the batch is rolled back and
/// the load continues with the next one.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("destination unreachable: {0}")]
    Connectivity(String),

    #[error("batch commit failed: {0}")]
    Commit(String),
}

impl DestinationError {
    pub fn error_type(&self) -> &'static str {
        match self {
            DestinationError::Connectivity(_) => "connectivity",
            DestinationError::Commit(_) => "batch_commit",
        }
    }
}

/// The one capability the loader needs from a store: atomic multi-row insert
/// with commit/rollback. Partial application must be impossible; an error
/// return means nothing from the batch persisted.
#[async_trait]
pub trait Destination: Send + Sync {
    async fn insert_batch(
        &self,
        table: &str,
        columns: &[ColumnDef],
        records: &[MappedRecord],
    ) -> Result<(), DestinationError>;
}

/// Source framing for the delimited input stream.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            quote: b'"',
        }
    }
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self::csv()
    }
}

/// Streams rows from a headerless delimited source, maps them, and commits
/// them in fixed-size batches. Each batch gets exactly one commit attempt;
/// a failed batch rolls back whole and the load continues. Row and batch
/// failures are captured in the report, never raised.
#[derive(Debug)]
pub struct BatchLoader<D> {
    destination: D,
    batch_size: usize,
    delimited: DelimitedConfig,
    progress: Option<mpsc::UnboundedSender<LoadEvent>>,
}

impl<D: Destination> BatchLoader<D> {
    pub fn new(destination: D, batch_size: usize) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        Ok(Self {
            destination,
            batch_size,
            delimited: DelimitedConfig::default(),
            progress: None,
        })
    }

    pub fn with_delimited(mut self, delimited: DelimitedConfig) -> Self {
        self.delimited = delimited;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<LoadEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Load one source stream into the spec's table and return the report.
    ///
    /// Rows are read lazily; the stream is never buffered whole. Batches are
    /// built and committed strictly in file order, one at a time.
    pub async fn load<R>(&self, source: R, spec: &TargetTableSpec) -> LoadReport
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut report = LoadReport::start(spec.table_name());

        // flexible: arity mismatches must reach the mapper as row errors
        // instead of terminating the reader.
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimited.delimiter)
            .quote(self.delimited.quote)
            .create_reader(source);

        let mut record = StringRecord::new();
        let mut batch: Vec<MappedRecord> = Vec::with_capacity(self.batch_size);
        let mut line = 0u64;
        let mut batch_index = 0u64;
        let mut batch_first_line = 0u64;
        let mut batch_last_line = 0u64;

        loop {
            match reader.read_record(&mut record).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "stream error, stopping row intake");
                    report.stream_error = Some(e.to_string());
                    break;
                }
            }

            line += 1;
            report.rows_read += 1;

            let fields: Vec<&str> = record.iter().collect();
            match map_row(&fields, spec) {
                Ok(mapped) => {
                    if batch.is_empty() {
                        batch_first_line = line;
                    }
                    batch_last_line = line;
                    batch.push(mapped);

                    if batch.len() == self.batch_size {
                        batch_index += 1;
                        self.commit_batch(
                            &mut report,
                            spec,
                            &mut batch,
                            batch_index,
                            batch_first_line,
                            batch_last_line,
                        )
                        .await;
                    }
                }
                Err(err) => {
                    warn!(line, error = %err, "row rejected");
                    report.record_rejection(line, &err);
                    self.send(LoadEvent::RowRejected);
                }
            }
        }

        // Flush the final partial batch through the same atomic path.
        if !batch.is_empty() {
            batch_index += 1;
            self.commit_batch(
                &mut report,
                spec,
                &mut batch,
                batch_index,
                batch_first_line,
                batch_last_line,
            )
            .await;
        }

        report.finish();
        report
    }

    /// One atomic commit attempt for the accumulated batch. The batch is
    /// consumed either way; a failure is recorded and the loader moves on.
    async fn commit_batch(
        &self,
        report: &mut LoadReport,
        spec: &TargetTableSpec,
        batch: &mut Vec<MappedRecord>,
        batch_index: u64,
        first_line: u64,
        last_line: u64,
    ) {
        let rows = batch.len() as u64;
        let start = Instant::now();

        match self
            .destination
            .insert_batch(spec.table_name(), spec.insert_columns(), batch)
            .await
        {
            Ok(()) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                report.rows_inserted += rows;
                report.batches_committed += 1;
                debug!(batch = batch_index, rows, duration_ms, "batch committed");
                self.send(LoadEvent::BatchCommitted { rows, duration_ms });
            }
            Err(err) => {
                report.batches_rolled_back += 1;
                warn!(
                    batch = batch_index,
                    rows,
                    first_line,
                    last_line,
                    error = %err,
                    "batch rolled back"
                );
                report.batch_failures.push(BatchFailure {
                    batch_index,
                    first_line,
                    last_line,
                    rows,
                    error_type: err.error_type().to_string(),
                    error_message: batch_failure_message(&err, batch),
                });
                self.send(LoadEvent::BatchRolledBack { rows });
            }
        }

        batch.clear();
    }

    fn send(&self, event: LoadEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }
}

/// Failure message with enough context to find the offending data.
fn batch_failure_message(err: &DestinationError, batch: &[MappedRecord]) -> String {
    let first_record_sample = batch
        .first()
        .map(|record| {
            let preview: Vec<String> = record
                .values()
                .iter()
                .take(3)
                .map(|value| {
                    let text = value.to_string();
                    if text.chars().count() > 20 {
                        let truncated: String = text.chars().take(20).collect();
                        format!("{truncated}...")
                    } else {
                        text
                    }
                })
                .collect();
            format!(
                "[{}{}]",
                preview.join(", "),
                if record.len() > 3 { ", ..." } else { "" }
            )
        })
        .unwrap_or_else(|| "<empty>".to_string());

    format!(
        "{}\n\
         \n\
         Batch context:\n\
         - Batch size: {} records\n\
         - First record sample: {}",
        err,
        batch.len(),
        first_record_sample
    )
}
