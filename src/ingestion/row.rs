//! Untyped row shape produced by the streaming readers.
//!
//! A [`HeaderRow`] is built once per sheet; every [`RawRow`] shares it through an `Arc`, so a body
//! row only owns its cells.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A decoded spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Render the cell as text. Whole floats render without a fractional part so numeric barcodes
    /// survive as `123456789012` rather than `123456789012.0`.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(f) => {
                if f.fract() == 0.0 && f.abs() < 1e18 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            CellValue::Bool(b) => b.to_string(),
        }
    }

    /// Text of a non-empty cell, `None` for empty/blank cells.
    pub fn non_empty_text(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.as_text())
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Normalise a header label for case-insensitive binding: lower-case, with spaces, underscores and
/// hyphens removed (`"Item Code"`, `"item_code"` and `"ItemCode"` all become `"itemcode"`).
pub fn normalize_header(label: &str) -> String {
    label
        .trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// The header row of one sheet: column labels plus a normalised-name index.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRow {
    labels: Vec<String>,
    index: HashMap<String, usize>,
}

impl HeaderRow {
    /// Build a header from labels in column order. When two columns normalise to the same name the
    /// first one wins.
    pub fn new(labels: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(labels.len());
        for (pos, label) in labels.iter().enumerate() {
            let key = normalize_header(label);
            if key.is_empty() {
                continue;
            }
            index.entry(key).or_insert(pos);
        }
        Self { labels, index }
    }

    /// Column labels as they appeared in the source.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn width(&self) -> usize {
        self.labels.len()
    }

    /// Position of a column by (case-insensitive) name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&normalize_header(name)).copied()
    }

    /// Position of the first alias present in the header.
    pub fn position_of_any(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|a| self.position(a))
    }
}

/// One body row: the shared header plus this row's cells in column order.
#[derive(Debug, Clone)]
pub struct RawRow {
    header: Arc<HeaderRow>,
    /// 1-based row number in the source.
    number: u64,
    cells: Vec<CellValue>,
}

impl RawRow {
    pub fn new(header: Arc<HeaderRow>, number: u64, cells: Vec<CellValue>) -> Self {
        Self {
            header,
            number,
            cells,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn header(&self) -> &HeaderRow {
        &self.header
    }

    /// Cell at a column position; missing trailing cells read as empty.
    pub fn cell(&self, pos: usize) -> &CellValue {
        self.cells.get(pos).unwrap_or(&CellValue::Empty)
    }

    /// Cell by header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.header.position(name).map(|pos| self.cell(pos))
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_binding_is_case_and_separator_insensitive() {
        let header = HeaderRow::new(vec![
            "Item Code".to_string(),
            "QTY".to_string(),
            "style_number".to_string(),
        ]);
        assert_eq!(header.position("item code"), Some(0));
        assert_eq!(header.position("ItemCode"), Some(0));
        assert_eq!(header.position("qty"), Some(1));
        assert_eq!(header.position("Style Number"), Some(2));
        assert_eq!(header.position("barcode"), None);
        assert_eq!(header.position_of_any(&["barcode", "item code"]), Some(0));
    }

    #[test]
    fn raw_row_exposes_header_mapping() {
        let header = Arc::new(HeaderRow::new(vec!["Barcode".to_string(), "Qty".to_string()]));
        let row = RawRow::new(header, 2, vec![CellValue::Number(123456789012.0)]);
        assert_eq!(row.get("barcode").map(CellValue::as_text), Some("123456789012".to_string()));
        assert_eq!(row.get("qty"), Some(&CellValue::Empty));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn bom_is_stripped_from_header_labels() {
        assert_eq!(normalize_header("\u{feff}Barcode"), "barcode");
    }
}
