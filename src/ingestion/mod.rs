//! Streaming source readers.
//!
//! Most callers go through [`StreamingWorkbookReader`] (from [`unified`]), which:
//!
//! - detects the format by file extension, or by sniffing the leading bytes
//! - reads the source in bounded chunks and pushes one row at a time into a [`WorkbookSink`]
//! - counts consumed bytes so a worker can report progress while the pass runs
//!
//! Format-specific readers are also available under:
//! - [`csv`]
//! - `excel` (feature `excel`)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod observability;
pub mod row;
pub mod source;
pub mod unified;

pub use observability::{
    CompositeObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats, TracingObserver,
};
pub use row::{CellValue, HeaderRow, RawRow};
pub use source::{ByteCounter, SourceHandle};
pub use unified::{DEFAULT_CHUNK_SIZE, ReadSummary, ReaderOptions, SourceFormat, StreamingWorkbookReader, WorkbookSink};
