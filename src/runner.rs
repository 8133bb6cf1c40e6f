//! High-level runner API for triggering a load.
//!
//! This module resolves the source file, builds the table descriptor, and
//! drives the batch loader. It is the primary entry point for the CLI and
//! the HTTP server.

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::db::Pool;
use crate::io::BlobStore;
use crate::loader::{BatchLoader, DelimitedConfig, LoadReport};
use crate::schema::TargetTableSpec;
use crate::telemetry::LoadEvent;

/// File format for the source data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Tsv,
}

impl Format {
    /// Parse format from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Format::Csv),
            "tsv" => Ok(Format::Tsv),
            _ => Err(anyhow::anyhow!(
                "Unsupported format: {}. Supported formats: csv, tsv",
                s
            )),
        }
    }

    fn delimited_config(self) -> DelimitedConfig {
        match self {
            Format::Csv => DelimitedConfig::csv(),
            Format::Tsv => DelimitedConfig::tsv(),
        }
    }
}

/// Arguments for running a data load operation
#[derive(Debug, Clone)]
pub struct LoadArgs {
    // Source and destination
    pub file_name: String,
    pub target_table: String,
    pub format: Format,

    // Column configuration. When both lists are None the target table must
    // be one of the built-in historical tables. Target entries use the
    // `name[:type][?]` form; insert entries are bare column names.
    pub target_columns: Option<Vec<String>>,
    pub insert_columns: Option<Vec<String>>,

    // Batching
    pub batch_size: usize,
}

/// Run a data load operation with the specified arguments
///
/// Resolves `file_name` against the blob store, maps each row to the
/// table descriptor, and inserts in fixed-size transactional batches.
/// Rejected rows and failed batches are recorded in the returned report
/// rather than aborting the load.
///
/// # Example
///
/// ```no_run
/// use histload::db::{connect, PoolArgsBuilder};
/// use histload::io::LocalBlobStore;
/// use histload::runner::{run_load, Format, LoadArgs};
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = connect(
///     PoolArgsBuilder::default()
///         .host("localhost")
///         .database("hr_history")
///         .username("loader")
///         .password("secret")
///         .build()?,
/// )
/// .await?;
/// let store = LocalBlobStore::new("/data/extracts");
///
/// let args = LoadArgs {
///     file_name: "hired_employees.csv".to_string(),
///     target_table: "hired_employees".to_string(),
///     format: Format::Csv,
///     target_columns: None,
///     insert_columns: None,
///     batch_size: 1000,
/// };
///
/// let report = run_load(&pool, &store, args, None).await?;
/// println!("Inserted {} of {} rows", report.rows_inserted, report.rows_read);
/// # Ok(())
/// # }
/// ```
pub async fn run_load(
    pool: &Pool,
    store: &dyn BlobStore,
    args: LoadArgs,
    progress: Option<mpsc::UnboundedSender<LoadEvent>>,
) -> Result<LoadReport> {
    // Descriptor and batch size problems are fatal before any I/O happens.
    let spec = build_spec(&args)?;
    let mut loader =
        BatchLoader::new(pool.clone(), args.batch_size)?.with_delimited(args.format.delimited_config());
    if let Some(tx) = progress {
        loader = loader.with_progress(tx);
    }

    let blob_name = store.resolve(&args.file_name).await?;
    let reader = store.open(&blob_name).await?;

    info!(
        file = %blob_name,
        table = %spec.table_name(),
        batch_size = args.batch_size,
        "Starting load"
    );

    let report = loader.load(reader, &spec).await;

    info!(
        load_id = %report.load_id,
        rows_read = report.rows_read,
        rows_inserted = report.rows_inserted,
        rows_rejected = report.rows_rejected,
        batches_committed = report.batches_committed,
        batches_rolled_back = report.batches_rolled_back,
        "Load finished"
    );

    Ok(report)
}

/// Build the table descriptor for a load request.
fn build_spec(args: &LoadArgs) -> Result<TargetTableSpec> {
    match (&args.target_columns, &args.insert_columns) {
        (None, None) => Ok(TargetTableSpec::catalog(&args.target_table)?),
        (Some(target), Some(insert)) => Ok(TargetTableSpec::from_column_lists(
            &args.target_table,
            target,
            insert,
        )?),
        (Some(target), None) => {
            // Without an explicit insert list every target column is loaded.
            let insert: Vec<String> = target
                .iter()
                .map(|spec| column_name_of(spec))
                .collect();
            Ok(TargetTableSpec::from_column_lists(
                &args.target_table,
                target,
                &insert,
            )?)
        }
        (None, Some(_)) => bail!("insert columns require target columns to be specified"),
    }
}

/// Strip the type and nullability markers from a `name[:type][?]` entry.
fn column_name_of(spec: &str) -> String {
    let trimmed = spec.trim().trim_end_matches('?');
    match trimmed.split_once(':') {
        Some((name, _)) => name.trim().to_string(),
        None => trimmed.to_string(),
    }
}
