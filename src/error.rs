use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned by ingestion, reconciliation and store operations.
///
/// This is a single error enum shared by the reader, the worker, the reconciliation service and the
/// store adapters. Row-level problems are *not* errors: they are collected as
/// [`crate::types::RowRejection`]s and never fail a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Underlying I/O error (e.g. file not found, permission denied, read failure mid-stream).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The source could not be decoded (corrupt container, undecodable header, missing required
    /// columns).
    #[error("malformed source: {message}")]
    MalformedSource { message: String },

    /// The workbook contains no worksheet at all.
    #[error("no worksheet found in workbook")]
    NoWorksheetFound,

    /// The source format is not supported (or its cargo feature is disabled).
    #[error("unsupported source format: {message}")]
    UnsupportedFormat { message: String },

    /// The caller requested cancellation before the run completed.
    #[error("ingestion cancelled")]
    Cancelled,

    /// A client already has an active ingestion run.
    #[error("an ingestion is already running on this client")]
    IngestionInProgress,

    /// The worker context failed outside the normal error paths (spawn failure, panic, lost channel).
    #[error("ingestion worker failed: {message}")]
    WorkerFailed { message: String },

    /// Options failed validation.
    #[error("invalid options: {message}")]
    InvalidOptions { message: String },

    /// An upload produced no valid records; nothing was reconciled or saved.
    #[error("upload contained no valid records ({rejected_rows} rows skipped)")]
    EmptyUpload { rejected_rows: u64 },

    /// The persistence layer failed to read or write a key.
    #[error("store unavailable for key '{key}': {message}")]
    StoreUnavailable { key: String, message: String },

    #[error("record '{identifier}' not found")]
    RecordNotFound { identifier: String },

    #[error("container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("container '{id}' already exists")]
    DuplicateContainer { id: String },

    #[cfg(feature = "template")]
    /// Template generation error (feature-gated behind `template`).
    #[error("template error: {0}")]
    Template(#[from] rust_xlsxwriter::XlsxError),
}

impl PipelineError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSource {
            message: message.into(),
        }
    }

    pub(crate) fn store(key: &str, message: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Returns `true` for the failures that end an ingestion run before anything could be saved
    /// because of the source itself, as opposed to cancellation or infrastructure failures.
    pub fn is_source_problem(&self) -> bool {
        matches!(
            self,
            Self::MalformedSource { .. }
                | Self::NoWorksheetFound
                | Self::UnsupportedFormat { .. }
                | Self::EmptyUpload { .. }
        )
    }
}
