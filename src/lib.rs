//! `soh-pipeline` turns stock-on-hand spreadsheets into a reconciled inventory.
//!
//! The pipeline, leaf-first:
//!
//! - [`ingestion`]: a single-pass, bounded-memory reader over CSV and `.xlsx` sources
//!   ([`ingestion::StreamingWorkbookReader`])
//! - [`processing`]: header-driven row mapping, container aggregation and reconciliation
//! - [`execution`]: the ingestion worker, with progress, cancellation and a caller-facing
//!   [`execution::IngestionClient`]
//! - [`store`] and [`inventory`]: the persisted inventory behind a get/set contract
//! - `template` (feature `template`): the upload template writer
//!
//! ## What you can ingest
//!
//! **File formats (detected by extension, else by sniffing the leading bytes):**
//!
//! - **CSV**: `.csv`, `.txt`
//! - **Excel workbooks** (requires the Cargo feature `excel`, on by default): `.xlsx`, `.xlsm`
//!
//! Headers are matched case-insensitively against a small alias table (e.g. the identifier column
//! may be called `Barcode` or `Item Code`). A workbook may carry an optional `Boxes` sheet listing
//! containers; otherwise containers are inferred from the records' box column.
//!
//! Rows that cannot become a record (no barcode, no style, negative quantity, ...) are collected
//! as [`types::RowRejection`]s and never fail the run.
//!
//! ## Quick example: ingest and reconcile
//!
//! ```no_run
//! use soh_pipeline::execution::{IngestionClient, IngestionOptions};
//! use soh_pipeline::ingestion::SourceHandle;
//! use soh_pipeline::inventory::InventoryService;
//! use soh_pipeline::store::FileStore;
//!
//! # fn main() -> Result<(), soh_pipeline::PipelineError> {
//! let client = IngestionClient::new(IngestionOptions::default());
//! let run = client.submit(SourceHandle::open("stock_count.xlsx")?)?;
//! let outcome = run.wait_with_progress(|p| println!("{:.0}%", p.fraction_complete))?;
//!
//! let mut inventory = InventoryService::load(FileStore::open("./inventory")?)?;
//! let report = inventory.apply_upload(outcome)?;
//! println!(
//!     "added={} updated={} removed={} skipped={}",
//!     report.summary.added, report.summary.updated, report.summary.removed, report.rejected_rows
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: records, containers, change summaries and progress snapshots
//! - [`error`]: the error type shared by every layer

pub mod error;
pub mod execution;
pub mod ingestion;
pub mod inventory;
pub mod processing;
pub mod store;
#[cfg(feature = "template")]
pub mod template;
pub mod types;

pub use error::{PipelineError, PipelineResult};
