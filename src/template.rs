//! Upload template writer (feature `template`).
//!
//! Produces an `.xlsx` with a `Products` sheet and a `Boxes` sheet using the same header
//! convention the reader binds, optionally seeded with example rows.

use std::path::Path;

use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::error::PipelineResult;
use crate::types::{Container, InventoryRecord, Placement};

pub const PRODUCTS_SHEET: &str = "Products";
pub const BOXES_SHEET: &str = "Boxes";

pub const PRODUCT_HEADERS: [&str; 10] = [
    "Barcode",
    "Quantity",
    "Size",
    "Color",
    "Age",
    "StyleNumber",
    "Department",
    "RetailPrice",
    "Location",
    "BoxNumber",
];
pub const BOX_HEADERS: [&str; 3] = ["BoxNumber", "BoxName", "Location"];

/// Rows written below the headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSeed {
    pub records: Vec<InventoryRecord>,
    pub containers: Vec<Container>,
}

impl TemplateSeed {
    /// Headers only.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Three sample products (two boxed in `BOX001`) and three boxes.
    pub fn example() -> Self {
        let sample = |barcode: &str, qty: u64, size: &str, color: &str, style: &str, dept: &str, cents: i64| {
            let mut r = InventoryRecord::new(barcode, style).with_quantity(qty);
            r.size = size.to_string();
            r.color = color.to_string();
            r.age = "Adult".to_string();
            r.department = dept.to_string();
            r.retail_price = rust_decimal::Decimal::new(cents, 2);
            r
        };
        let boxed = Placement::Container("BOX001".to_string());
        Self {
            records: vec![
                sample("123456789012", 10, "M", "Blue", "STY001", "Menswear", 2999).with_placement(boxed.clone()),
                sample("223456789012", 5, "S", "Red", "STY002", "Womenswear", 3999).with_placement(boxed),
                sample("323456789012", 3, "L", "Black", "STY003", "Accessories", 1999)
                    .with_placement(Placement::MainStore),
            ],
            containers: vec![
                Container::new("BOX001", "Winter Collection", "Back Store"),
                Container::new("BOX002", "Summer Collection", "Warehouse"),
                Container::new("BOX003", "Accessories", "Storage Room"),
            ],
        }
    }
}

/// Write the template workbook to `path`.
pub fn write_template(path: impl AsRef<Path>, seed: &TemplateSeed) -> PipelineResult<()> {
    let mut workbook = build_workbook(seed)?;
    workbook.save(path.as_ref())?;
    Ok(())
}

/// The template workbook as bytes.
pub fn template_bytes(seed: &TemplateSeed) -> PipelineResult<Vec<u8>> {
    let mut workbook = build_workbook(seed)?;
    Ok(workbook.save_to_buffer()?)
}

fn build_workbook(seed: &TemplateSeed) -> PipelineResult<Workbook> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    let products = workbook.add_worksheet();
    products.set_name(PRODUCTS_SHEET)?;
    write_headers(products, &PRODUCT_HEADERS, &bold)?;
    for (i, record) in seed.records.iter().enumerate() {
        write_record(products, i as u32 + 1, record)?;
    }

    let boxes = workbook.add_worksheet();
    boxes.set_name(BOXES_SHEET)?;
    write_headers(boxes, &BOX_HEADERS, &bold)?;
    for (i, container) in seed.containers.iter().enumerate() {
        let row = i as u32 + 1;
        boxes.write_string(row, 0, &container.id)?;
        boxes.write_string(row, 1, &container.name)?;
        boxes.write_string(row, 2, &container.location)?;
    }

    Ok(workbook)
}

fn write_headers(sheet: &mut Worksheet, headers: &[&str], format: &Format) -> PipelineResult<()> {
    for (col, label) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *label, format)?;
    }
    Ok(())
}

fn write_record(sheet: &mut Worksheet, row: u32, record: &InventoryRecord) -> PipelineResult<()> {
    // Barcodes are written as text so long codes keep every digit.
    sheet.write_string(row, 0, &record.identifier)?;
    sheet.write_number(row, 1, record.quantity as f64)?;
    sheet.write_string(row, 2, &record.size)?;
    sheet.write_string(row, 3, &record.color)?;
    sheet.write_string(row, 4, &record.age)?;
    sheet.write_string(row, 5, &record.style)?;
    sheet.write_string(row, 6, &record.department)?;
    sheet.write_number(row, 7, record.retail_price.to_f64().unwrap_or_default())?;
    let (location, box_number) = match &record.placement {
        Some(Placement::Container(id)) => ("Box", id.as_str()),
        Some(Placement::MainStore) => ("Main Store", ""),
        Some(Placement::BackStore) => ("Back Store", ""),
        None => ("", ""),
    };
    if !location.is_empty() {
        sheet.write_string(row, 8, location)?;
    }
    if !box_number.is_empty() {
        sheet.write_string(row, 9, box_number)?;
    }
    Ok(())
}
