//! CSV streaming reader.

use std::io::Read;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{RowRejection, SheetKind};

use super::row::{CellValue, HeaderRow, RawRow};
use super::unified::{ReadSummary, WorkbookSink};

/// Stream CSV data from `reader` into `sink`.
///
/// Rules:
///
/// - The first non-empty record is the header row. If it cannot be decoded the whole source is
///   [`PipelineError::MalformedSource`]; no row is delivered.
/// - A source with no records at all yields nothing (not an error).
/// - Records may be ragged; missing trailing cells read as empty.
/// - A later record that cannot be decoded (e.g. invalid UTF-8) is reported through
///   [`WorkbookSink::on_rejected`] and reading continues.
pub fn read_csv<R: Read>(
    reader: R,
    chunk_size: usize,
    sink: &mut dyn WorkbookSink,
) -> PipelineResult<ReadSummary> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .buffer_capacity(chunk_size.max(1))
        .from_reader(reader);

    let mut summary = ReadSummary::default();
    let mut record = csv::StringRecord::new();

    let header = match rdr.read_record(&mut record) {
        Ok(true) => Arc::new(HeaderRow::new(record.iter().map(str::to_string).collect())),
        Ok(false) => return Ok(summary),
        Err(err) => {
            let message = format!("header row could not be decoded: {err}");
            if let csv::ErrorKind::Io(io) = err.into_kind() {
                return Err(PipelineError::Io(io));
            }
            return Err(PipelineError::malformed(message));
        }
    };
    sink.on_header(SheetKind::Records, Arc::clone(&header))?;

    loop {
        match rdr.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let number = record.position().map(|p| p.line()).unwrap_or(0);
                let cells = record.iter().map(text_cell).collect();
                let row = RawRow::new(Arc::clone(&header), number, cells);
                if row.is_blank() {
                    continue;
                }
                summary.record_rows += 1;
                sink.on_row(SheetKind::Records, row)?;
            }
            Err(err) => {
                let row = err.position().map(|p| p.line()).unwrap_or(0);
                let reason = err.to_string();
                if let csv::ErrorKind::Io(io) = err.into_kind() {
                    return Err(PipelineError::Io(io));
                }
                sink.on_rejected(RowRejection {
                    sheet: SheetKind::Records,
                    row,
                    reason,
                })?;
            }
        }
    }

    Ok(summary)
}

fn text_cell(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        CellValue::Empty
    } else {
        CellValue::Text(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        header: Option<Arc<HeaderRow>>,
        rows: Vec<RawRow>,
        rejected: Vec<RowRejection>,
    }

    impl WorkbookSink for Collect {
        fn on_header(&mut self, _sheet: SheetKind, header: Arc<HeaderRow>) -> PipelineResult<()> {
            self.header = Some(header);
            Ok(())
        }

        fn on_row(&mut self, _sheet: SheetKind, row: RawRow) -> PipelineResult<()> {
            self.rows.push(row);
            Ok(())
        }

        fn on_rejected(&mut self, rejection: RowRejection) -> PipelineResult<()> {
            self.rejected.push(rejection);
            Ok(())
        }
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut sink = Collect::default();
        let summary = read_csv(&b""[..], 16, &mut sink).unwrap();
        assert_eq!(summary.record_rows, 0);
        assert!(sink.header.is_none());
    }

    #[test]
    fn header_only_source_yields_empty_rows() {
        let mut sink = Collect::default();
        let summary = read_csv(&b"barcode,style\n"[..], 16, &mut sink).unwrap();
        assert_eq!(summary.record_rows, 0);
        assert!(sink.header.is_some());
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn undecodable_header_is_malformed() {
        let mut sink = Collect::default();
        let err = read_csv(&b"bar\xffcode,style\n1,2\n"[..], 16, &mut sink).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedSource { .. }));
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn undecodable_body_row_is_rejected_and_reading_continues() {
        let mut sink = Collect::default();
        let input = b"barcode,style\n1,A\n2,\xff\n3,C\n";
        let summary = read_csv(&input[..], 4, &mut sink).unwrap();
        assert_eq!(summary.record_rows, 2);
        assert_eq!(sink.rejected.len(), 1);
        assert_eq!(sink.rejected[0].row, 3);
        assert_eq!(sink.rows[1].get("barcode"), Some(&CellValue::Text("3".to_string())));
    }

    #[test]
    fn ragged_rows_pad_with_empty_cells() {
        let mut sink = Collect::default();
        read_csv(&b"barcode,style,qty\n1,A\n"[..], 64, &mut sink).unwrap();
        assert_eq!(sink.rows[0].get("qty"), Some(&CellValue::Empty));
    }
}
