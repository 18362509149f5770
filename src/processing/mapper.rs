//! Header-driven row decoding.
//!
//! [`RecordMapper`] binds the columns of a record sheet once, by alias, and then turns each
//! [`RawRow`] into a typed [`InventoryRecord`] or a [`RowRejection`]. [`ContainerMapper`] does
//! the same for the optional containers sheet. Both are pure: no I/O, no shared state, so batches
//! can be mapped in parallel.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::row::{CellValue, HeaderRow, RawRow, normalize_header};
use crate::types::{Container, DEFAULT_CONTAINER_LOCATION, InventoryRecord, Placement, RowRejection, SheetKind};

/// Accepted header labels per logical field, in priority order.
pub mod aliases {
    pub const IDENTIFIER: &[&str] = &["barcode", "item code"];
    pub const QUANTITY: &[&str] = &["quantity", "qty"];
    pub const SIZE: &[&str] = &["size"];
    pub const COLOR: &[&str] = &["color", "colour"];
    pub const AGE: &[&str] = &["age", "variant"];
    pub const STYLE: &[&str] = &["style number", "style code", "style"];
    pub const DEPARTMENT: &[&str] = &["department", "dept"];
    pub const RETAIL_PRICE: &[&str] = &["retail price", "price"];
    pub const LOCATION: &[&str] = &["location"];
    pub const CONTAINER: &[&str] = &["box number", "box", "ctn", "container"];

    pub const CONTAINER_ID: &[&str] = &["box number", "box", "container", "container id", "id"];
    pub const CONTAINER_NAME: &[&str] = &["box name", "container name", "name"];
}

/// Column positions of a record sheet, bound once per header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMapper {
    identifier: usize,
    style: usize,
    quantity: Option<usize>,
    size: Option<usize>,
    color: Option<usize>,
    age: Option<usize>,
    department: Option<usize>,
    retail_price: Option<usize>,
    location: Option<usize>,
    container: Option<usize>,
}

impl RecordMapper {
    /// Bind a header row. A header without an identifier or a style column cannot produce a single
    /// valid record, so it is a structural failure rather than a per-row one.
    pub fn bind(header: &HeaderRow) -> PipelineResult<Self> {
        let identifier = header.position_of_any(aliases::IDENTIFIER).ok_or_else(|| {
            PipelineError::malformed(format!(
                "no identifier column (expected one of: {})",
                aliases::IDENTIFIER.join(", ")
            ))
        })?;
        let style = header.position_of_any(aliases::STYLE).ok_or_else(|| {
            PipelineError::malformed(format!(
                "no style column (expected one of: {})",
                aliases::STYLE.join(", ")
            ))
        })?;

        Ok(Self {
            identifier,
            style,
            quantity: header.position_of_any(aliases::QUANTITY),
            size: header.position_of_any(aliases::SIZE),
            color: header.position_of_any(aliases::COLOR),
            age: header.position_of_any(aliases::AGE),
            department: header.position_of_any(aliases::DEPARTMENT),
            retail_price: header.position_of_any(aliases::RETAIL_PRICE),
            location: header.position_of_any(aliases::LOCATION),
            container: header.position_of_any(aliases::CONTAINER),
        })
    }

    /// Decode one body row.
    pub fn map_row(&self, row: &RawRow) -> Result<InventoryRecord, RowRejection> {
        let reject = |reason: String| RowRejection {
            sheet: SheetKind::Records,
            row: row.number(),
            reason,
        };

        let identifier = row
            .cell(self.identifier)
            .non_empty_text()
            .ok_or_else(|| reject("missing identifier".to_string()))?;
        let style = row
            .cell(self.style)
            .non_empty_text()
            .ok_or_else(|| reject(format!("record '{identifier}': missing style")))?;

        let quantity = match self.quantity {
            Some(pos) => parse_quantity(row.cell(pos)).map_err(|e| reject(format!("record '{identifier}': {e}")))?,
            None => 0,
        };
        let retail_price = match self.retail_price {
            Some(pos) => parse_price(row.cell(pos)).map_err(|e| reject(format!("record '{identifier}': {e}")))?,
            None => Decimal::ZERO,
        };
        let placement = self.placement(row);

        Ok(InventoryRecord {
            identifier,
            quantity,
            size: self.text(row, self.size),
            color: self.text(row, self.color),
            age: self.text(row, self.age),
            style,
            department: self.text(row, self.department),
            retail_price,
            placement,
        })
    }

    fn text(&self, row: &RawRow, pos: Option<usize>) -> String {
        pos.map(|p| row.cell(p).as_text()).unwrap_or_default()
    }

    /// `None` means the row did not state a usable placement and reconciliation keeps the existing
    /// one. That covers a `Box` location with an empty container column (the container reference is
    /// unstated, not absent) and location text outside the known set.
    fn placement(&self, row: &RawRow) -> Option<Placement> {
        if let Some(id) = self.container.and_then(|p| row.cell(p).non_empty_text()) {
            return Some(Placement::Container(id));
        }
        let location = self.location.and_then(|p| row.cell(p).non_empty_text())?;
        match normalize_header(&location).as_str() {
            "mainstore" | "main" => Some(Placement::MainStore),
            "backstore" | "back" => Some(Placement::BackStore),
            _ => None,
        }
    }
}

/// Column positions of a containers sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMapper {
    id: usize,
    name: Option<usize>,
    location: Option<usize>,
}

impl ContainerMapper {
    pub fn bind(header: &HeaderRow) -> PipelineResult<Self> {
        let id = header.position_of_any(aliases::CONTAINER_ID).ok_or_else(|| {
            PipelineError::malformed(format!(
                "containers sheet has no id column (expected one of: {})",
                aliases::CONTAINER_ID.join(", ")
            ))
        })?;
        Ok(Self {
            id,
            name: header.position_of_any(aliases::CONTAINER_NAME),
            location: header.position_of_any(aliases::LOCATION),
        })
    }

    /// Decode one container row. Name defaults to `Box <id>`, location to `Back Store`.
    pub fn map_row(&self, row: &RawRow) -> Result<Container, RowRejection> {
        let id = row.cell(self.id).non_empty_text().ok_or_else(|| RowRejection {
            sheet: SheetKind::Containers,
            row: row.number(),
            reason: "missing container id".to_string(),
        })?;
        let mut container = Container::inferred(&id);
        if let Some(name) = self.name.and_then(|p| row.cell(p).non_empty_text()) {
            container.name = name;
        }
        container.location = self
            .location
            .and_then(|p| row.cell(p).non_empty_text())
            .unwrap_or_else(|| DEFAULT_CONTAINER_LOCATION.to_string());
        Ok(container)
    }
}

/// Blank or unreadable quantities read as 0; fractions truncate; negatives are rejected.
fn parse_quantity(cell: &CellValue) -> Result<u64, String> {
    let value = match cell {
        CellValue::Number(f) => *f,
        CellValue::Text(s) => match s.trim().replace(',', "").parse::<f64>() {
            Ok(f) => f,
            Err(_) => return Ok(0),
        },
        CellValue::Empty | CellValue::Bool(_) => return Ok(0),
    };
    if !value.is_finite() {
        return Ok(0);
    }
    if value < 0.0 {
        return Err(format!("negative quantity {value}"));
    }
    Ok(value.trunc() as u64)
}

/// Blank or unreadable prices read as 0; negatives are rejected. Currency symbols and thousands
/// separators are ignored.
fn parse_price(cell: &CellValue) -> Result<Decimal, String> {
    let price = match cell {
        CellValue::Number(f) => match Decimal::try_from(*f) {
            Ok(d) => d.round_dp(4).normalize(),
            Err(_) => return Ok(Decimal::ZERO),
        },
        CellValue::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | '£' | '€' | ',' | ' '))
                .collect();
            match Decimal::from_str(&cleaned) {
                Ok(d) => d.normalize(),
                Err(_) => return Ok(Decimal::ZERO),
            }
        }
        CellValue::Empty | CellValue::Bool(_) => return Ok(Decimal::ZERO),
    };
    if price.is_sign_negative() && !price.is_zero() {
        return Err(format!("negative retail price {price}"));
    }
    Ok(price)
}
