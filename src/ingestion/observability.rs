use std::fmt;
use std::sync::Arc;

use crate::error::PipelineError;

use super::unified::SourceFormat;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionSeverity {
    /// Informational event (e.g. a caller-requested cancellation).
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the run failed because of its source or options).
    Error,
    /// Critical error (I/O, persistence or worker infrastructure failures).
    Critical,
}

impl IngestionSeverity {
    /// Classify a run failure.
    pub fn for_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::Cancelled => IngestionSeverity::Info,
            PipelineError::Io(_) | PipelineError::StoreUnavailable { .. } | PipelineError::WorkerFailed { .. } => {
                IngestionSeverity::Critical
            }
            _ => IngestionSeverity::Error,
        }
    }
}

/// Context about an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionContext {
    /// Label of the source (usually the file name).
    pub source_label: String,
    /// Declared format, if the caller forced one.
    pub format: Option<SourceFormat>,
}

/// Tallies reported on a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    /// Valid records produced.
    pub records: usize,
    /// Containers realized by the aggregator.
    pub containers: usize,
    /// Rows rejected by the mapper or reader.
    pub rejected_rows: u64,
    /// Body rows read from the source.
    pub rows_read: u64,
}

/// Observer interface for ingestion outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait IngestionObserver: Send + Sync {
    /// Called when a run completes.
    fn on_success(&self, _ctx: &IngestionContext, _stats: IngestionStats) {}

    /// Called when a run ends with an error (including cancellation).
    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &PipelineError) {}

    /// Called when a failure meets the client's alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &PipelineError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        for o in &self.observers {
            o.on_success(ctx, stats);
        }
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &PipelineError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &PipelineError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits ingestion outcomes as `tracing` events.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        tracing::info!(
            source = %ctx.source_label,
            format = ?ctx.format,
            records = stats.records,
            containers = stats.containers,
            rejected_rows = stats.rejected_rows,
            rows_read = stats.rows_read,
            "ingestion complete"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &PipelineError) {
        match severity {
            IngestionSeverity::Info => {
                tracing::info!(source = %ctx.source_label, %error, "ingestion stopped")
            }
            IngestionSeverity::Warning => {
                tracing::warn!(source = %ctx.source_label, %error, "ingestion failed")
            }
            IngestionSeverity::Error | IngestionSeverity::Critical => {
                tracing::error!(source = %ctx.source_label, ?severity, %error, "ingestion failed")
            }
        }
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &PipelineError) {
        tracing::error!(alert = true, source = %ctx.source_label, ?severity, %error, "ingestion alert");
    }
}
