use clap::{Parser, Subcommand};
use histload::api::{start_server, ApiState};
use histload::config::{DbConfig, DEFAULT_BATCH_SIZE, DEFAULT_BIND_ADDR};
use histload::db::{connect, PoolArgsBuilder};
use histload::io::LocalBlobStore;
use histload::runner::{run_load, Format, LoadArgs};
use histload::telemetry::{LoadEvent, LoadStats};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Clone)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Load one delimited extract into a target table
    Load {
        /// Source file name, matched case-insensitively against the source directory
        #[arg(short, long)]
        file: String,

        /// Target table name
        #[arg(short, long)]
        table: String,

        /// Directory holding the source files (default: BLOB_DIR environment variable)
        #[arg(short, long)]
        source_dir: Option<String>,

        /// File format (csv, tsv) - auto-detected from extension if not specified
        #[arg(long)]
        format: Option<String>,

        /// Target column list (format: "name[:type][?],..." e.g. "id:int,name,hired_at:timestamp?")
        #[arg(long)]
        target_columns: Option<String>,

        /// Insert column subset (comma-separated names, in target column order)
        #[arg(long)]
        insert_columns: Option<String>,

        /// Batch size for inserts
        #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Write the full load report as JSON to this path
        #[arg(long)]
        report_json: Option<PathBuf>,

        /// Validate configuration and show plan without loading data
        #[arg(long)]
        dry_run: bool,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },
    /// Serve the HTTP API for loads and hiring reports
    Serve {
        /// Bind address
        #[arg(short, long, default_value = DEFAULT_BIND_ADDR)]
        bind: String,

        /// Directory holding the source files (default: BLOB_DIR environment variable)
        #[arg(short, long)]
        source_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Load {
            file,
            table,
            source_dir,
            format,
            target_columns,
            insert_columns,
            batch_size,
            report_json,
            dry_run,
            quiet,
        } => {
            run_loader(
                file,
                table,
                source_dir,
                format,
                target_columns,
                insert_columns,
                batch_size,
                report_json,
                dry_run,
                quiet,
            )
            .await?;
        }
        Command::Serve { bind, source_dir } => {
            run_server(bind, source_dir).await?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_loader(
    file: String,
    table: String,
    source_dir: Option<String>,
    format: Option<String>,
    target_columns: Option<String>,
    insert_columns: Option<String>,
    batch_size: usize,
    report_json: Option<PathBuf>,
    dry_run: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if quiet {
        EnvFilter::new("histload=warn,sqlx=off")
    } else {
        EnvFilter::new("histload=info,sqlx=off")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let source_dir = source_dir
        .or_else(|| std::env::var("BLOB_DIR").ok())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No source directory configured.\n\
                 Pass --source-dir or set the BLOB_DIR environment variable."
            )
        })?;

    // Auto-detect format from file extension if not provided
    let format = if let Some(f) = format {
        f
    } else {
        cli::detect_format_from_path(&file).ok_or_else(|| {
            anyhow::anyhow!(
                "Could not detect format from file '{}'.\n\
                 Supported extensions: .csv, .tsv\n\
                 Please specify --format explicitly.",
                file
            )
        })?
    };
    let format_enum = Format::parse(&format)?;

    // Parse column lists if provided
    let target_columns = target_columns
        .map(|s| cli::parse_column_list(&s))
        .transpose()
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse target columns: {}\n\
                 Example: --target-columns \"id:int,name,hired_at:timestamp?\"",
                e
            )
        })?;
    let insert_columns = insert_columns
        .map(|s| cli::parse_column_list(&s))
        .transpose()
        .map_err(|e| {
            anyhow::anyhow!(
                "Failed to parse insert columns: {}\n\
                 Example: --insert-columns \"id,name\"",
                e
            )
        })?;

    if !quiet {
        println!("Historical Data Loader");
        println!("======================");
        println!("Source dir: {}", source_dir);
        println!("File: {}", file);
        println!("Table: {}", table);
        println!("Batch size: {}", batch_size);
        println!();
    }

    // Handle dry-run mode
    if dry_run {
        println!("DRY RUN MODE - No data will be loaded");
        println!();
        println!("Configuration:");
        println!("  File: {}", file);
        println!("  Table: {}", table);
        println!("  Format: {}", format);
        println!("  Batch size: {}", batch_size);
        match &target_columns {
            Some(columns) => println!("  Target columns: {}", columns.join(", ")),
            None => println!("  Target columns: built-in catalog for '{}'", table),
        }
        if let Some(columns) = &insert_columns {
            println!("  Insert columns: {}", columns.join(", "));
        }
        println!();
        println!("To execute, run without --dry-run");
        return Ok(());
    }

    // Connect using DB_* environment settings
    let db = DbConfig::from_env()?;
    let pool = connect(
        PoolArgsBuilder::default()
            .host(db.host)
            .port(db.port)
            .database(db.database)
            .username(db.username)
            .password(db.password)
            .build()?,
    )
    .await?;
    let store = LocalBlobStore::new(&source_dir);

    let load_args = LoadArgs {
        file_name: file,
        target_table: table,
        format: format_enum,
        target_columns,
        insert_columns,
        batch_size,
    };

    // Progress display consumes loader events unless in quiet mode
    let (progress, progress_task) = if quiet {
        (None, None)
    } else {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Some(tx), Some(spawn_progress(rx)))
    };

    let start = std::time::Instant::now();
    let report = run_load(&pool, &store, load_args, progress).await?;
    let duration = start.elapsed();

    let stats = match progress_task {
        Some(task) => Some(task.await?),
        None => None,
    };

    println!();
    println!("Load Summary");
    println!("============");
    println!("Load ID: {}", report.load_id);
    println!("Rows read: {}", report.rows_read);
    println!("Rows inserted: {}", report.rows_inserted);
    println!("Rows rejected: {}", report.rows_rejected);
    println!("Batches committed: {}", report.batches_committed);
    println!("Batches rolled back: {}", report.batches_rolled_back);
    println!("Duration: {:.2}s", duration.as_secs_f64());
    println!(
        "Throughput: {:.2} rows/sec",
        report.rows_inserted as f64 / duration.as_secs_f64()
    );
    if let Some(stats) = &stats {
        if let (Some(p50), Some(p90), Some(p99)) = stats.get_percentiles() {
            println!("Batch commit time: p50: {}ms, p90: {}ms, p99: {}ms", p50, p90, p99);
        }
    }

    if !report.rejections.is_empty() {
        println!();
        println!("Rejected rows (first 5):");
        for rejection in report.rejections.iter().take(5) {
            println!(
                "  line {}: [{}] {}",
                rejection.line_number, rejection.error_type, rejection.error_message
            );
        }
        if report.rejections.len() > 5 {
            println!(
                "  ... and {} more (use --report-json for the full list)",
                report.rejections.len() - 5
            );
        }
    }

    if !report.batch_failures.is_empty() {
        println!();
        println!("Failed batches:");
        for failure in &report.batch_failures {
            println!(
                "  batch {} (lines {}-{}, {} rows): [{}]",
                failure.batch_index,
                failure.first_line,
                failure.last_line,
                failure.rows,
                failure.error_type
            );
        }
    }

    if let Some(path) = report_json {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write report to {}: {}", path.display(), e))?;
        if !quiet {
            println!();
            println!("Report written to {}", path.display());
        }
    }

    // A broken source stream means the load did not see the whole file
    if let Some(ref stream_error) = report.stream_error {
        anyhow::bail!("Source stream failed mid-load: {}", stream_error);
    }

    Ok(())
}

async fn run_server(bind: String, source_dir: Option<String>) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = EnvFilter::new("histload=info,sqlx=off");
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let source_dir = source_dir
        .or_else(|| std::env::var("BLOB_DIR").ok())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No source directory configured.\n\
                 Pass --source-dir or set the BLOB_DIR environment variable."
            )
        })?;

    let db = DbConfig::from_env()?;
    let pool = connect(
        PoolArgsBuilder::default()
            .host(db.host)
            .port(db.port)
            .database(db.database)
            .username(db.username)
            .password(db.password)
            .build()?,
    )
    .await?;

    let state = ApiState {
        pool,
        blobs: Arc::new(LocalBlobStore::new(&source_dir)),
    };
    start_server(&bind, state).await
}

/// Spawn the progress display task for a load.
fn spawn_progress(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<LoadEvent>,
) -> tokio::task::JoinHandle<LoadStats> {
    use indicatif::{ProgressBar, ProgressStyle};

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner:.green} {msg}")
            .unwrap(),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(100));

    tokio::spawn(async move {
        let mut stats = LoadStats::new();
        while let Some(event) = rx.recv().await {
            stats.update(&event);
            bar.set_message(format!(
                "Inserted: {} | Rejected: {} | Batches: {} committed / {} rolled back",
                stats.rows_inserted,
                stats.rows_rejected,
                stats.batches_committed,
                stats.batches_rolled_back
            ));
        }
        bar.finish_and_clear();
        stats
    })
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    /// Auto-detect file format from the file name
    pub fn detect_format_from_path(path: &str) -> Option<String> {
        let lower = path.to_lowercase();

        if lower.ends_with(".csv") {
            Some("csv".to_string())
        } else if lower.ends_with(".tsv") {
            Some("tsv".to_string())
        } else {
            None
        }
    }

    /// Parse a comma-separated column list, rejecting empty entries
    pub fn parse_column_list(list: &str) -> anyhow::Result<Vec<String>> {
        if list.trim().is_empty() {
            return Err(anyhow::anyhow!("Column list is empty"));
        }

        let columns: Vec<String> = list
            .split(',')
            .map(|part| part.trim().to_string())
            .collect();

        if columns.iter().any(|c| c.is_empty()) {
            return Err(anyhow::anyhow!(
                "Column list '{}' contains an empty entry",
                list
            ));
        }

        Ok(columns)
    }
}
