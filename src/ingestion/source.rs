//! Byte-oriented source handles and consumed-byte accounting.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PipelineResult;

use super::unified::SourceFormat;

/// Anything the readers can pull bytes from. Excel workbooks are zip archives, so sources must be
/// seekable.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// An owned, single-use input for one ingestion run.
///
/// The handle is moved into the worker and dropped (closing any file) on every exit path.
pub struct SourceHandle {
    label: String,
    format: Option<SourceFormat>,
    len: u64,
    inner: Box<dyn ReadSeek>,
}

impl SourceHandle {
    /// Open a file. The label is the file name and the format is inferred from its extension.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(SourceFormat::from_extension);
        Ok(Self {
            label,
            format,
            len,
            inner: Box::new(file),
        })
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self {
            label: label.into(),
            format: None,
            len,
            inner: Box::new(Cursor::new(bytes)),
        }
    }

    /// Wrap an arbitrary seekable reader of known length.
    pub fn from_reader(label: impl Into<String>, reader: impl ReadSeek + 'static, len: u64) -> Self {
        Self {
            label: label.into(),
            format: None,
            len,
            inner: Box::new(reader),
        }
    }

    /// Force a format instead of inferring it.
    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The format declared by the caller or inferred from the file extension, if any.
    pub fn format(&self) -> Option<SourceFormat> {
        self.format
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The declared format, or one sniffed from the leading bytes (zip magic means xlsx).
    pub(crate) fn resolve_format(&mut self) -> PipelineResult<SourceFormat> {
        if let Some(fmt) = self.format {
            return Ok(fmt);
        }
        let mut magic = [0u8; 4];
        let mut filled = 0;
        while filled < magic.len() {
            let n = self.inner.read(&mut magic[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.inner.seek(SeekFrom::Start(0))?;
        let fmt = if filled == 4 && magic == *b"PK\x03\x04" {
            SourceFormat::Xlsx
        } else {
            SourceFormat::Csv
        };
        self.format = Some(fmt);
        Ok(fmt)
    }

    pub(crate) fn into_parts(self) -> (String, u64, Box<dyn ReadSeek>) {
        (self.label, self.len, self.inner)
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("label", &self.label)
            .field("format", &self.format)
            .field("len", &self.len)
            .finish()
    }
}

/// Shared counter of bytes pulled from a source. Cloned into the progress tracker.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

/// Reader adapter that records how many bytes were read through it.
pub(crate) struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n as u64);
        Ok(n)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_zip_magic_as_xlsx() {
        let mut src = SourceHandle::from_bytes("upload", b"PK\x03\x04rest".to_vec());
        assert_eq!(src.resolve_format().unwrap(), SourceFormat::Xlsx);

        let mut src = SourceHandle::from_bytes("upload", b"barcode,qty\n".to_vec());
        assert_eq!(src.resolve_format().unwrap(), SourceFormat::Csv);
    }

    #[test]
    fn counting_reader_tracks_consumed_bytes() {
        let counter = ByteCounter::default();
        let mut rdr = CountingReader::new(Cursor::new(vec![0u8; 10]), counter.clone());
        let mut buf = [0u8; 4];
        rdr.read_exact(&mut buf).unwrap();
        assert_eq!(counter.get(), 4);
        let mut rest = Vec::new();
        rdr.read_to_end(&mut rest).unwrap();
        assert_eq!(counter.get(), 10);
    }
}
