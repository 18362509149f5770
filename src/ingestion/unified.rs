//! Unified streaming reader.
//!
//! [`StreamingWorkbookReader`] hides the per-format readers behind one push-style contract: it
//! walks the source once, front to back, and hands the header and each body row to a
//! [`WorkbookSink`]. Only one chunk of raw bytes (the buffered reader's capacity) and one decoded
//! row are held at a time.
//!
//! - If the [`SourceHandle`] has no declared format, the format is inferred from the file
//!   extension, or sniffed from the leading bytes.
//! - Excel sources may contain an optional containers sheet; it is delivered (as
//!   [`SheetKind::Containers`]) before the record sheet.

use std::io::BufReader;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{RowRejection, SheetKind};

use super::csv;
use super::row::{HeaderRow, RawRow};
use super::source::{ByteCounter, CountingReader, SourceHandle};

/// Default raw-byte chunk size: large enough to amortize per-read overhead on multi-gigabyte files.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Comma-separated values.
    Csv,
    /// Office Open XML workbook (feature-gated behind `excel`).
    Xlsx,
}

impl SourceFormat {
    /// Parse a source format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Some(Self::Csv),
            "xlsx" | "xlsm" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

/// Options controlling how a source is read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Capacity of the raw-byte buffer between the source and the decoder.
    pub chunk_size: usize,
    /// Worksheet names (case-insensitive) that hold the stock records, in priority order.
    pub record_sheet_names: Vec<String>,
    /// Worksheet names (case-insensitive) recognised as the optional containers sheet.
    pub container_sheet_names: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            record_sheet_names: vec!["soh".to_string(), "products".to_string(), "inventory".to_string()],
            container_sheet_names: vec!["boxes".to_string(), "containers".to_string()],
        }
    }
}

/// Receiver for the rows of one streaming pass.
///
/// Returning an error from any method stops the pass and the error becomes the reader's result;
/// this is how the worker aborts on cancellation.
pub trait WorkbookSink {
    /// Called once per sheet, before any of its body rows.
    fn on_header(&mut self, sheet: SheetKind, header: Arc<HeaderRow>) -> PipelineResult<()>;

    /// Called for every non-blank body row, in source order.
    fn on_row(&mut self, sheet: SheetKind, row: RawRow) -> PipelineResult<()>;

    /// Called for body rows that could not be decoded at all.
    fn on_rejected(&mut self, _rejection: RowRejection) -> PipelineResult<()> {
        Ok(())
    }

    /// Called periodically while a reader scans cells without delivering rows, such as when it
    /// looks for the record sheet or walks a long run of blank rows.
    fn checkpoint(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

/// What one pass saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Name of the worksheet the records were read from (`None` for CSV).
    pub record_sheet: Option<String>,
    /// Name of the containers sheet, when one was present.
    pub container_sheet: Option<String>,
    /// Non-blank body rows delivered for the record sheet.
    pub record_rows: u64,
    /// Non-blank body rows delivered for the containers sheet.
    pub container_rows: u64,
}

/// Single-pass, bounded-memory reader over a [`SourceHandle`].
pub struct StreamingWorkbookReader {
    source: SourceHandle,
    options: ReaderOptions,
    counter: ByteCounter,
}

impl StreamingWorkbookReader {
    pub fn new(source: SourceHandle, options: &ReaderOptions) -> Self {
        Self {
            source,
            options: options.clone(),
            counter: ByteCounter::default(),
        }
    }

    /// Size of the source in bytes.
    pub fn bytes_total(&self) -> u64 {
        self.source.len()
    }

    /// A live counter of bytes consumed so far; safe to poll while [`Self::read`] runs.
    pub fn progress_counter(&self) -> ByteCounter {
        self.counter.clone()
    }

    pub fn label(&self) -> &str {
        self.source.label()
    }

    /// Stream the whole source into `sink`. Consumes the reader: the sequence is not restartable.
    pub fn read(mut self, sink: &mut dyn WorkbookSink) -> PipelineResult<ReadSummary> {
        let format = self.source.resolve_format()?;
        let chunk_size = self.options.chunk_size.max(1);
        let (label, _len, inner) = self.source.into_parts();
        let counting = CountingReader::new(inner, self.counter);

        tracing::debug!(source = %label, ?format, chunk_size, "streaming source");

        // The csv reader owns its own buffer of `chunk_size`; the zip decoder needs a seekable
        // buffered reader instead.
        match format {
            SourceFormat::Csv => csv::read_csv(counting, chunk_size, sink),
            SourceFormat::Xlsx => {
                read_xlsx_dispatch(BufReader::with_capacity(chunk_size, counting), &self.options, sink)
            }
        }
    }
}

fn read_xlsx_dispatch<R>(reader: R, options: &ReaderOptions, sink: &mut dyn WorkbookSink) -> PipelineResult<ReadSummary>
where
    R: std::io::Read + std::io::Seek,
{
    #[cfg(feature = "excel")]
    {
        super::excel::read_xlsx(reader, options, sink)
    }

    #[cfg(not(feature = "excel"))]
    {
        let _ = (reader, options, sink);
        Err(PipelineError::UnsupportedFormat {
            message: "excel ingestion not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

/// Validate reader options before a run starts.
pub(crate) fn validate_reader_options(options: &ReaderOptions) -> PipelineResult<()> {
    if options.chunk_size == 0 {
        return Err(PipelineError::InvalidOptions {
            message: "chunk_size must be > 0".to_string(),
        });
    }
    Ok(())
}
