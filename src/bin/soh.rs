//! `soh`: ingest stock-on-hand spreadsheets into a file-backed inventory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use soh_pipeline::execution::{IngestionClient, IngestionOptions};
use soh_pipeline::ingestion::{SourceHandle, TracingObserver};
use soh_pipeline::inventory::{DEFAULT_LOW_STOCK_THRESHOLD, InventoryService, UploadStatus};
use soh_pipeline::processing::ReconcileMode;
use soh_pipeline::store::FileStore;

#[derive(Parser)]
#[command(name = "soh", about = "Stock-on-hand ingestion and inventory tools", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a spreadsheet, reconcile it and save the result.
    Ingest(IngestArgs),
    /// Write an upload template workbook.
    Template(TemplateArgs),
    /// Print the upload history.
    History(StoreArgs),
    /// Show one record by barcode.
    Lookup {
        #[command(flatten)]
        store: StoreArgs,
        barcode: String,
    },
    /// List records below a quantity threshold.
    LowStock {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, default_value_t = DEFAULT_LOW_STOCK_THRESHOLD)]
        threshold: u64,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// Directory holding the inventory documents.
    #[arg(long)]
    store: PathBuf,
}

#[derive(Args)]
struct IngestArgs {
    file: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    /// JSON file overriding ingestion options.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keep records that the upload does not list.
    #[arg(long)]
    additive: bool,
    /// Read buffer size in MiB.
    #[arg(long)]
    chunk_mib: Option<usize>,
    /// Rows mapped per parallel batch.
    #[arg(long)]
    batch_rows: Option<usize>,
}

#[derive(Args)]
struct TemplateArgs {
    out: PathBuf,
    /// Headers only, no sample rows.
    #[arg(long)]
    empty: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Command::Ingest(args) => run_ingest(args),
        Command::Template(args) => run_template(args),
        Command::History(args) => run_history(args),
        Command::Lookup { store, barcode } => run_lookup(store, &barcode),
        Command::LowStock { store, threshold } => run_low_stock(store, threshold),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("soh_pipeline=info,soh=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn chunk_size_from_mib(mib: usize) -> Result<usize> {
    mib.checked_mul(1024 * 1024)
        .with_context(|| format!("--chunk-mib {mib} is too large"))
}

fn run_ingest(args: IngestArgs) -> Result<()> {
    let mut options = match &args.config {
        Some(path) => IngestionOptions::from_json_file(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => IngestionOptions::default(),
    };
    if let Some(mib) = args.chunk_mib {
        options.reader.chunk_size = chunk_size_from_mib(mib)?;
    }
    if let Some(rows) = args.batch_rows {
        options.row_batch_size = rows;
    }

    let mode = if args.additive {
        ReconcileMode::Additive
    } else {
        ReconcileMode::FullRecount
    };
    let mut inventory = InventoryService::load(FileStore::open(&args.store.store)?)
        .context("loading inventory")?
        .with_mode(mode);

    let source = SourceHandle::open(&args.file).with_context(|| format!("opening {}", args.file.display()))?;
    let client = IngestionClient::new(options).with_observer(Arc::new(TracingObserver));
    let run = client.submit(source)?;

    let mut last_reported = -10.0;
    let outcome = run
        .wait_with_progress(|p| {
            if p.fraction_complete - last_reported >= 10.0 || p.fraction_complete >= 100.0 {
                last_reported = p.fraction_complete;
                eprintln!(
                    "{:>5.1}%  rows={}  {:.0} rows/s",
                    p.fraction_complete, p.rows_processed, p.throughput_rows_per_second
                );
            }
        })
        .context("ingestion failed; nothing was saved")?;

    let report = inventory.apply_upload(outcome).context("upload not saved")?;
    println!(
        "added {}  updated {}  removed {}",
        report.summary.added, report.summary.updated, report.summary.removed
    );
    match report.status() {
        UploadStatus::Saved => println!("all rows saved"),
        UploadStatus::SavedWithSkippedRows(n) => {
            println!("saved; {n} row(s) skipped:");
            for rejection in &report.rejection_samples {
                println!("  {rejection}");
            }
            let shown = report.rejection_samples.len() as u64;
            if n > shown {
                println!("  ... and {} more", n - shown);
            }
        }
    }
    Ok(())
}

#[cfg(feature = "template")]
fn run_template(args: TemplateArgs) -> Result<()> {
    use soh_pipeline::template::{TemplateSeed, write_template};

    let seed = if args.empty {
        TemplateSeed::empty()
    } else {
        TemplateSeed::example()
    };
    write_template(&args.out, &seed).with_context(|| format!("writing {}", args.out.display()))?;
    println!("template written to {}", args.out.display());
    Ok(())
}

#[cfg(not(feature = "template"))]
fn run_template(_args: TemplateArgs) -> Result<()> {
    bail!("template support not enabled (enable cargo feature 'template')")
}

fn run_history(args: StoreArgs) -> Result<()> {
    let inventory = InventoryService::load(FileStore::open(&args.store)?)?;
    if inventory.history().is_empty() {
        println!("no uploads yet");
    }
    for entry in inventory.history() {
        println!(
            "{}  {}  added {}  updated {}  removed {}",
            entry.recorded_at.to_rfc3339(),
            entry.source_label,
            entry.added,
            entry.updated,
            entry.removed
        );
    }
    Ok(())
}

fn run_lookup(args: StoreArgs, barcode: &str) -> Result<()> {
    let inventory = InventoryService::load(FileStore::open(&args.store)?)?;
    let Some(record) = inventory.record(barcode) else {
        bail!("no record with barcode {barcode}");
    };
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

fn run_low_stock(args: StoreArgs, threshold: u64) -> Result<()> {
    let inventory = InventoryService::load(FileStore::open(&args.store)?)?;
    for record in inventory.low_stock(threshold) {
        println!(
            "{}  qty {}  {}  {}",
            record.identifier,
            record.quantity,
            record.style,
            record.effective_placement()
        );
    }
    Ok(())
}
