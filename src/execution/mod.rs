//! Ingestion worker and its caller-facing client.
//!
//! This module sits "above" [`crate::ingestion`] and [`crate::processing`] and provides:
//!
//! - [`run_ingestion`]: the worker body (reader → mapper → aggregator), synchronous and directly
//!   testable
//! - parallel (batched) row mapping on a rayon pool, with sequential aggregation in source order
//! - cooperative cancellation at row-batch boundaries ([`CancellationToken`])
//! - monotonic, rate-limited progress snapshots
//! - [`IngestionClient`] / [`IngestionRun`]: the worker on its own thread, talking to the caller
//!   only through a channel with exactly one terminal message

mod client;
mod guard;
mod progress;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::row::{HeaderRow, RawRow};
use crate::ingestion::unified::validate_reader_options;
use crate::ingestion::{IngestionSeverity, IngestionStats, ReaderOptions, SourceHandle, StreamingWorkbookReader, WorkbookSink};
use crate::processing::{ContainerAggregator, ContainerMapper, RecordMapper};
use crate::types::{Container, IngestionProgress, InventoryRecord, ProgressPhase, RejectionLog, RowRejection, SheetKind};

pub use client::{IngestionClient, IngestionMessage, IngestionRun};
pub use guard::CancellationToken;

use progress::ProgressTracker;

/// Default number of rows mapped per parallel batch.
pub const DEFAULT_ROW_BATCH_SIZE: usize = 10_000;
/// Default minimum spacing between progress messages.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;
/// Default number of rejected rows kept verbatim in the outcome.
pub const DEFAULT_MAX_REJECTION_SAMPLES: usize = 1_000;

/// Configuration for an ingestion run.
///
/// Every field has a default, so a JSON config file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestionOptions {
    pub reader: ReaderOptions,
    /// Rows per mapping batch; cancellation is observed between batches.
    pub row_batch_size: usize,
    pub progress_interval_ms: u64,
    /// Worker threads used for mapping.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    pub max_rejection_samples: usize,
    /// Failures at or above this severity are reported through
    /// [`crate::ingestion::IngestionObserver::on_alert`].
    pub alert_at_or_above: IngestionSeverity,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            reader: ReaderOptions::default(),
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            num_threads: Some(n),
            max_rejection_samples: DEFAULT_MAX_REJECTION_SAMPLES,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

impl IngestionOptions {
    /// Load options from a JSON file; missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| PipelineError::InvalidOptions {
            message: format!("{}: {e}", path.display()),
        })
    }

    pub fn validate(&self) -> PipelineResult<()> {
        validate_reader_options(&self.reader)?;
        if self.row_batch_size == 0 {
            return Err(PipelineError::InvalidOptions {
                message: "row_batch_size must be > 0".to_string(),
            });
        }
        if self.num_threads == Some(0) {
            return Err(PipelineError::InvalidOptions {
                message: "num_threads must be > 0 when set".to_string(),
            });
        }
        Ok(())
    }

    fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Everything one successful run produced, handed off in the terminal message.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOutcome {
    /// Valid records, unique by identifier (first position, last value).
    pub records: Vec<InventoryRecord>,
    /// Containers seeded from a containers sheet or inferred from record placements.
    pub containers: Vec<Container>,
    pub rejections: RejectionLog,
    pub source_label: String,
    /// Non-blank body rows read from the record sheet.
    pub rows_read: u64,
    pub elapsed: Duration,
}

impl IngestionOutcome {
    pub fn stats(&self) -> IngestionStats {
        IngestionStats {
            records: self.records.len(),
            containers: self.containers.len(),
            rejected_rows: self.rejections.total(),
            rows_read: self.rows_read,
        }
    }
}

/// Run one ingestion on the calling thread.
///
/// Streams `source` through the record mapper and container aggregator, reporting progress
/// through `emit`. Returns [`PipelineError::Cancelled`] if `cancel` fires before the result is
/// ready; the source and all buffers are dropped on every exit path.
pub fn run_ingestion(
    source: SourceHandle,
    options: &IngestionOptions,
    cancel: &CancellationToken,
    emit: &mut dyn FnMut(IngestionProgress),
) -> PipelineResult<IngestionOutcome> {
    options.validate()?;
    cancel.check()?;

    let started = Instant::now();
    let pool = build_pool(options)?;
    let reader = StreamingWorkbookReader::new(source, &options.reader);
    let source_label = reader.label().to_string();

    let span = tracing::info_span!("ingestion", source = %source_label);
    let _enter = span.enter();
    tracing::info!(bytes_total = reader.bytes_total(), "ingestion started");

    let mut tracker = ProgressTracker::new(reader.progress_counter(), reader.bytes_total(), options.progress_interval());
    tracker.tick(ProgressPhase::Reading, 0, emit);

    let mut sink = PipelineSink {
        pool: &pool,
        cancel,
        emit,
        tracker,
        batch_size: options.row_batch_size,
        record_mapper: None,
        container_mapper: None,
        batch: Vec::with_capacity(options.row_batch_size.min(DEFAULT_ROW_BATCH_SIZE)),
        records: Vec::new(),
        positions: HashMap::new(),
        aggregator: ContainerAggregator::new(),
        rejections: RejectionLog::new(options.max_rejection_samples),
        rows_read: 0,
        rows_mapped: 0,
    };

    let summary = reader.read(&mut sink)?;
    sink.flush_batch()?;
    cancel.check()?;

    let PipelineSink {
        emit,
        mut tracker,
        records,
        aggregator,
        rejections,
        rows_read,
        rows_mapped,
        ..
    } = sink;
    tracker.finish(rows_mapped, emit);

    let outcome = IngestionOutcome {
        records,
        containers: aggregator.finish(),
        rejections,
        source_label,
        rows_read,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        record_sheet = ?summary.record_sheet,
        container_sheet = ?summary.container_sheet,
        records = outcome.records.len(),
        containers = outcome.containers.len(),
        rejected_rows = outcome.rejections.total(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "ingestion finished"
    );
    Ok(outcome)
}

fn build_pool(options: &IngestionOptions) -> PipelineResult<ThreadPool> {
    let n_threads = options
        .num_threads
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .max(1);
    ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("soh-map-{i}"))
        .build()
        .map_err(|e| PipelineError::WorkerFailed {
            message: format!("failed to build mapping thread pool: {e}"),
        })
}

/// Receives rows from the reader, maps them in parallel batches and aggregates in source order.
struct PipelineSink<'a> {
    pool: &'a ThreadPool,
    cancel: &'a CancellationToken,
    emit: &'a mut dyn FnMut(IngestionProgress),
    tracker: ProgressTracker,
    batch_size: usize,
    record_mapper: Option<RecordMapper>,
    container_mapper: Option<ContainerMapper>,
    batch: Vec<RawRow>,
    records: Vec<InventoryRecord>,
    /// identifier -> index into `records`
    positions: HashMap<String, usize>,
    aggregator: ContainerAggregator,
    rejections: RejectionLog,
    rows_read: u64,
    rows_mapped: u64,
}

impl PipelineSink<'_> {
    fn flush_batch(&mut self) -> PipelineResult<()> {
        self.cancel.check()?;
        if self.batch.is_empty() {
            return Ok(());
        }
        let Some(mapper) = &self.record_mapper else {
            self.batch.clear();
            return Ok(());
        };

        let batch = &self.batch;
        let mapped: Vec<Result<InventoryRecord, RowRejection>> =
            self.pool.install(|| batch.par_iter().map(|row| mapper.map_row(row)).collect());
        self.rows_mapped += self.batch.len() as u64;
        self.batch.clear();

        for result in mapped {
            match result {
                Ok(record) => self.accept(record),
                Err(rejection) => self.rejections.push(rejection),
            }
        }

        self.tracker.tick(ProgressPhase::Mapping, self.rows_mapped, &mut *self.emit);
        Ok(())
    }

    /// Last row wins on duplicate identifiers; the record keeps its first position.
    fn accept(&mut self, record: InventoryRecord) {
        self.aggregator.push(&record);
        match self.positions.get(&record.identifier) {
            Some(&idx) => self.records[idx] = record,
            None => {
                self.positions.insert(record.identifier.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }
}

impl WorkbookSink for PipelineSink<'_> {
    fn on_header(&mut self, sheet: SheetKind, header: Arc<HeaderRow>) -> PipelineResult<()> {
        self.cancel.check()?;
        match sheet {
            SheetKind::Records => {
                self.record_mapper = Some(RecordMapper::bind(&header)?);
                self.tracker.tick(ProgressPhase::Reading, 0, &mut *self.emit);
            }
            SheetKind::Containers => match ContainerMapper::bind(&header) {
                Ok(mapper) => self.container_mapper = Some(mapper),
                Err(err) => tracing::warn!(%err, "ignoring containers sheet"),
            },
        }
        Ok(())
    }

    fn on_row(&mut self, sheet: SheetKind, row: RawRow) -> PipelineResult<()> {
        match sheet {
            SheetKind::Containers => {
                if let Some(mapper) = &self.container_mapper {
                    match mapper.map_row(&row) {
                        Ok(container) => self.aggregator.seed(container),
                        Err(rejection) => self.rejections.push(rejection),
                    }
                }
                Ok(())
            }
            SheetKind::Records => {
                self.rows_read += 1;
                self.batch.push(row);
                if self.batch.len() >= self.batch_size {
                    self.flush_batch()?;
                }
                Ok(())
            }
        }
    }

    fn on_rejected(&mut self, rejection: RowRejection) -> PipelineResult<()> {
        self.rejections.push(rejection);
        Ok(())
    }

    fn checkpoint(&mut self) -> PipelineResult<()> {
        self.cancel.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_source(body: &str) -> SourceHandle {
        SourceHandle::from_bytes("upload.csv", body.as_bytes().to_vec())
    }

    fn opts(batch: usize) -> IngestionOptions {
        IngestionOptions {
            row_batch_size: batch,
            progress_interval_ms: 0,
            num_threads: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn maps_and_aggregates_in_source_order() {
        let src = csv_source("Barcode,Style,Box\nX,S1,BOX1\nY,S2,BOX1\nZ,S3,\n,S4,\n");
        let mut seen = Vec::new();
        let out = run_ingestion(src, &opts(2), &CancellationToken::new(), &mut |p| seen.push(p)).unwrap();

        let ids: Vec<&str> = out.records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["X", "Y", "Z"]);
        assert_eq!(out.containers.len(), 1);
        assert_eq!(out.containers[0].members, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(out.rejections.total(), 1);
        assert_eq!(out.rows_read, 4);
        assert_eq!(out.source_label, "upload.csv");

        assert_eq!(seen.last().map(|p| p.fraction_complete), Some(100.0));
        assert!(seen.windows(2).all(|w| w[0].fraction_complete <= w[1].fraction_complete));
    }

    #[test]
    fn duplicate_identifiers_keep_first_position_and_last_value() {
        let src = csv_source("barcode,style,qty,box\nA,S,1,B1\nB,S,1,\nA,S,9,\n");
        let out = run_ingestion(src, &opts(10), &CancellationToken::new(), &mut |_| {}).unwrap();

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].quantity, 9);
        assert_eq!(out.records[0].placement, None);
        assert!(out.containers.is_empty());
    }

    #[test]
    fn cancellation_is_observed_at_the_next_batch_boundary() {
        let mut body = String::from("barcode,style\n");
        for i in 0..50 {
            body.push_str(&format!("R{i},S\n"));
        }
        let token = CancellationToken::new();
        let mut messages = 0;
        let result = run_ingestion(csv_source(&body), &opts(5), &token, &mut |_| {
            messages += 1;
            if messages == 3 {
                token.cancel();
            }
        });
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(messages, 3);
    }

    #[test]
    fn pre_cancelled_token_never_reads() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_ingestion(csv_source("barcode,style\nA,S\n"), &opts(5), &token, &mut |_| {});
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn structural_header_problem_fails_the_run() {
        let result = run_ingestion(
            csv_source("qty,size\n1,M\n"),
            &opts(5),
            &CancellationToken::new(),
            &mut |_| {},
        );
        assert!(matches!(result, Err(PipelineError::MalformedSource { .. })));
    }

    #[test]
    fn options_validation_and_json_overrides() {
        let bad = IngestionOptions {
            row_batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(PipelineError::InvalidOptions { .. })));

        let parsed: IngestionOptions =
            serde_json::from_str(r#"{"row_batch_size": 7, "reader": {"chunk_size": 4096}}"#).unwrap();
        assert_eq!(parsed.row_batch_size, 7);
        assert_eq!(parsed.reader.chunk_size, 4096);
        assert_eq!(parsed.reader.record_sheet_names, ReaderOptions::default().record_sheet_names);
        assert_eq!(parsed.progress_interval_ms, DEFAULT_PROGRESS_INTERVAL_MS);
    }
}
