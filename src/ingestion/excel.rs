#![cfg(feature = "excel")]

use std::io::{Read, Seek};
use std::sync::Arc;

use calamine::{DataRef, Reader, Xlsx};

use crate::error::{PipelineError, PipelineResult};
use crate::types::SheetKind;

use super::row::{CellValue, HeaderRow, RawRow};
use super::unified::{ReadSummary, ReaderOptions, WorkbookSink};

/// Cells scanned between two [`WorkbookSink::checkpoint`] calls.
const CHECKPOINT_EVERY_CELLS: u64 = 4096;

/// Stream an `.xlsx` workbook into `sink`, one row at a time.
///
/// Behavior:
/// - Cells are pulled from the worksheet XML as it is decompressed; no worksheet range is ever
///   materialised.
/// - The record sheet is chosen by: a known sheet name (`options.record_sheet_names`, ignoring an
///   entirely empty sheet), else the first worksheet with at least one data row, else the first
///   worksheet. A workbook without worksheets is [`PipelineError::NoWorksheetFound`].
/// - A sheet named in `options.container_sheet_names` is streamed first as
///   [`SheetKind::Containers`] and is never picked as the record sheet.
/// - The first non-empty row of a sheet is its header row; blank rows are skipped.
/// - `sink.checkpoint()` runs before each sheet is opened and every few thousand cells, so an
///   error from it stops the sheet probes as well as the streaming passes.
pub fn read_xlsx<R: Read + Seek>(
    reader: R,
    options: &ReaderOptions,
    sink: &mut dyn WorkbookSink,
) -> PipelineResult<ReadSummary> {
    let mut workbook: Xlsx<R> = Xlsx::new(reader)
        .map_err(|e| PipelineError::malformed(format!("workbook could not be opened: {e}")))?;

    let sheet_names = workbook.sheet_names();
    if sheet_names.is_empty() {
        return Err(PipelineError::NoWorksheetFound);
    }

    let container_sheet = find_named(&sheet_names, &options.container_sheet_names);
    let record_sheet = select_record_sheet(
        &mut workbook,
        &sheet_names,
        container_sheet.as_deref(),
        &options.record_sheet_names,
        sink,
    )?;
    tracing::debug!(
        record_sheet = %record_sheet,
        container_sheet = ?container_sheet,
        sheets = sheet_names.len(),
        "selected worksheets"
    );

    let mut summary = ReadSummary {
        record_sheet: Some(record_sheet.clone()),
        ..Default::default()
    };

    if let Some(name) = container_sheet.filter(|name| *name != record_sheet) {
        summary.container_rows = stream_sheet(&mut workbook, &name, SheetKind::Containers, sink)?;
        summary.container_sheet = Some(name);
    }
    summary.record_rows = stream_sheet(&mut workbook, &record_sheet, SheetKind::Records, sink)?;

    Ok(summary)
}

/// How much content a sheet has, as far as a probe needed to look.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetShape {
    Empty,
    HeaderOnly,
    HasData,
}

fn find_named(sheet_names: &[String], wanted: &[String]) -> Option<String> {
    wanted.iter().find_map(|w| {
        sheet_names
            .iter()
            .find(|name| name.trim().eq_ignore_ascii_case(w.trim()))
            .cloned()
    })
}

fn select_record_sheet<R: Read + Seek>(
    workbook: &mut Xlsx<R>,
    sheet_names: &[String],
    container_sheet: Option<&str>,
    known_names: &[String],
    sink: &mut dyn WorkbookSink,
) -> PipelineResult<String> {
    if let Some(name) = find_named(sheet_names, known_names) {
        if probe_sheet(workbook, &name, sink)? != SheetShape::Empty {
            return Ok(name);
        }
        tracing::debug!(sheet = %name, "known record sheet is empty; falling back");
    }

    let candidates: Vec<&String> = sheet_names
        .iter()
        .filter(|name| Some(name.as_str()) != container_sheet)
        .collect();

    for name in &candidates {
        if probe_sheet(workbook, name, sink)? == SheetShape::HasData {
            return Ok((*name).clone());
        }
    }

    candidates
        .first()
        .map(|name| (*name).clone())
        .or_else(|| sheet_names.first().cloned())
        .ok_or(PipelineError::NoWorksheetFound)
}

/// Stream a sheet only as far as needed to tell whether it has a header and a data row.
fn probe_sheet<R: Read + Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
    sink: &mut dyn WorkbookSink,
) -> PipelineResult<SheetShape> {
    sink.checkpoint()?;
    let mut cells = workbook
        .worksheet_cells_reader(name)
        .map_err(|e| PipelineError::malformed(format!("sheet '{name}': {e}")))?;

    let mut header_row: Option<u32> = None;
    let mut scanned = 0u64;
    while let Some(cell) = cells
        .next_cell()
        .map_err(|e| PipelineError::malformed(format!("sheet '{name}': {e}")))?
    {
        scanned += 1;
        if scanned % CHECKPOINT_EVERY_CELLS == 0 {
            sink.checkpoint()?;
        }
        if cell_value(cell.get_value()).is_empty() {
            continue;
        }
        let (row, _col) = cell.get_position();
        match header_row {
            None => header_row = Some(row),
            Some(h) if row > h => return Ok(SheetShape::HasData),
            Some(_) => {}
        }
    }

    Ok(if header_row.is_some() {
        SheetShape::HeaderOnly
    } else {
        SheetShape::Empty
    })
}

fn stream_sheet<R: Read + Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
    kind: SheetKind,
    sink: &mut dyn WorkbookSink,
) -> PipelineResult<u64> {
    sink.checkpoint()?;
    let mut cells = workbook
        .worksheet_cells_reader(name)
        .map_err(|e| PipelineError::malformed(format!("sheet '{name}': {e}")))?;

    let mut assembler = RowAssembler::new(kind);
    let mut scanned = 0u64;
    while let Some(cell) = cells
        .next_cell()
        .map_err(|e| PipelineError::malformed(format!("sheet '{name}': {e}")))?
    {
        scanned += 1;
        if scanned % CHECKPOINT_EVERY_CELLS == 0 {
            sink.checkpoint()?;
        }
        let (row, col) = cell.get_position();
        assembler.push(row, col, cell_value(cell.get_value()), sink)?;
    }
    assembler.finish(sink)
}

/// Groups the cell stream of one sheet into rows. Holds at most one row of cells.
struct RowAssembler {
    kind: SheetKind,
    current_row: Option<u32>,
    cells: Vec<(u32, CellValue)>,
    header: Option<Arc<HeaderRow>>,
    delivered: u64,
}

impl RowAssembler {
    fn new(kind: SheetKind) -> Self {
        Self {
            kind,
            current_row: None,
            cells: Vec::new(),
            header: None,
            delivered: 0,
        }
    }

    fn push(&mut self, row: u32, col: u32, value: CellValue, sink: &mut dyn WorkbookSink) -> PipelineResult<()> {
        if self.current_row != Some(row) {
            self.flush(sink)?;
            self.current_row = Some(row);
        }
        if !value.is_empty() {
            self.cells.push((col, value));
        }
        Ok(())
    }

    fn finish(mut self, sink: &mut dyn WorkbookSink) -> PipelineResult<u64> {
        self.flush(sink)?;
        Ok(self.delivered)
    }

    fn flush(&mut self, sink: &mut dyn WorkbookSink) -> PipelineResult<()> {
        if self.cells.is_empty() {
            return Ok(());
        }

        let Some(header) = self.header.clone() else {
            let width = self.cells.iter().map(|(c, _)| *c as usize + 1).max().unwrap_or(0);
            let mut labels = vec![String::new(); width];
            for (col, value) in self.cells.drain(..) {
                labels[col as usize] = value.as_text();
            }
            let header = Arc::new(HeaderRow::new(labels));
            self.header = Some(Arc::clone(&header));
            return sink.on_header(self.kind, header);
        };

        let mut values = vec![CellValue::Empty; header.width()];
        for (col, value) in self.cells.drain(..) {
            if let Some(slot) = values.get_mut(col as usize) {
                *slot = value;
            }
        }
        // Report 1-based row number (Excel-like).
        let number = u64::from(self.current_row.unwrap_or(0)) + 1;
        self.delivered += 1;
        sink.on_row(self.kind, RawRow::new(header, number, values))
    }
}

// The trailing arm keeps this compiling if calamine grows new cell kinds.
#[allow(unreachable_patterns)]
fn cell_value(data: &DataRef<'_>) -> CellValue {
    match data {
        DataRef::Int(i) => CellValue::Number(*i as f64),
        DataRef::Float(f) => CellValue::Number(*f),
        DataRef::String(s) => CellValue::Text(s.clone()),
        DataRef::SharedString(s) => CellValue::Text((*s).to_string()),
        DataRef::Bool(b) => CellValue::Bool(*b),
        DataRef::DateTime(dt) => CellValue::Number(dt.as_f64()),
        DataRef::DateTimeIso(s) => CellValue::Text(s.clone()),
        DataRef::DurationIso(s) => CellValue::Text(s.clone()),
        DataRef::Error(_) | DataRef::Empty => CellValue::Empty,
        _ => CellValue::Empty,
    }
}
