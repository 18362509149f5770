//! Core data model types for inventory ingestion.
//!
//! An upload turns spreadsheet rows into [`InventoryRecord`]s, groups boxed records into
//! [`Container`]s, and reconciliation condenses every accepted upload into a [`ChangeSummary`].
//! [`IngestionProgress`] is the transient telemetry emitted while a run is in flight.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default display location for containers that were inferred from record rows.
pub const DEFAULT_CONTAINER_LOCATION: &str = "Back Store";

/// Where a record currently resides.
///
/// The container reference lives inside the [`Placement::Container`] variant, so a record can only
/// carry a container reference when it is actually placed in a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "location", content = "container", rename_all = "kebab-case")]
pub enum Placement {
    /// Unboxed on the shop floor.
    #[default]
    MainStore,
    /// Unboxed in the back room.
    BackStore,
    /// Inside the named container.
    Container(String),
}

impl Placement {
    /// The wire label used in persisted records and upload sheets.
    pub fn label(&self) -> &'static str {
        match self {
            Placement::MainStore => "main-store",
            Placement::BackStore => "back-store",
            Placement::Container(_) => "container",
        }
    }

    /// The container reference, if the placement is a container.
    pub fn container_id(&self) -> Option<&str> {
        match self {
            Placement::Container(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Container(id) => write!(f, "container:{id}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One stock-keeping unit, keyed by its barcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Unique barcode; primary key within a record set.
    pub identifier: String,
    pub quantity: u64,
    pub size: String,
    pub color: String,
    /// Age / variant tag.
    pub age: String,
    /// Style identifier (required).
    pub style: String,
    pub department: String,
    pub retail_price: Decimal,
    /// Placement as stated by the source, or `None` when the source did not say.
    ///
    /// `None` reads as [`Placement::MainStore`] (see [`Self::effective_placement`]) but lets
    /// reconciliation keep an operator-assigned placement across refresh uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

impl InventoryRecord {
    /// Create a record with the required fields; everything else is empty/zero.
    pub fn new(identifier: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            quantity: 0,
            size: String::new(),
            color: String::new(),
            age: String::new(),
            style: style.into(),
            department: String::new(),
            retail_price: Decimal::ZERO,
            placement: None,
        }
    }

    /// Builder-style helper used by tests and callers constructing records by hand.
    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Builder-style helper that sets an explicit placement.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = Some(placement);
        self
    }

    /// The placement that applies to this record.
    pub fn effective_placement(&self) -> Placement {
        self.placement.clone().unwrap_or_default()
    }

    /// The container this record belongs to, if any.
    pub fn container_id(&self) -> Option<&str> {
        self.placement.as_ref().and_then(Placement::container_id)
    }
}

/// A physical storage unit (e.g. a box) grouping records by a shared reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    /// Display name.
    pub name: String,
    pub location: String,
    /// Member record identifiers, in the order the records were seen.
    #[serde(default)]
    pub members: Vec<String>,
}

impl Container {
    /// Create an empty container.
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: location.into(),
            members: Vec::new(),
        }
    }

    /// The container a record reference implies when nothing else is known about it.
    pub fn inferred(id: &str) -> Self {
        Self::new(id, format!("Box {id}"), DEFAULT_CONTAINER_LOCATION)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.members.iter().any(|m| m == identifier)
    }
}

/// Outcome tally of one accepted upload. Appended to history and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub recorded_at: DateTime<Utc>,
    /// Human-readable label of the upload source (usually the file name).
    pub source_label: String,
}

/// Which stage of a run a progress snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressPhase {
    /// Opening the source, locating the worksheet and header.
    Reading,
    /// Streaming rows through the mapper and aggregator.
    Mapping,
}

/// Read-only progress snapshot emitted during one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionProgress {
    /// 0–100, non-decreasing within one run.
    pub fraction_complete: f64,
    pub phase: ProgressPhase,
    pub bytes_processed: u64,
    pub bytes_total: u64,
    pub rows_processed: u64,
    /// Total rows, when the source format can tell up front.
    pub rows_total: Option<u64>,
    pub throughput_rows_per_second: f64,
    pub eta_seconds: Option<f64>,
}

/// Which logical sheet a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SheetKind {
    /// Inventory records (the stock-on-hand sheet).
    Records,
    /// Optional container listing.
    Containers,
}

/// A row that could not be turned into a record. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    pub sheet: SheetKind,
    /// 1-based row number in the source (the header is row 1 for CSV).
    pub row: u64,
    pub reason: String,
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} row {}: {}", self.sheet, self.row, self.reason)
    }
}

/// Rejected-row bookkeeping with an exact count and a bounded sample list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionLog {
    total: u64,
    samples: Vec<RowRejection>,
    #[serde(skip)]
    max_samples: usize,
}

impl RejectionLog {
    /// Keep at most `max_samples` rejections; the count is always exact.
    pub fn new(max_samples: usize) -> Self {
        Self {
            total: 0,
            samples: Vec::new(),
            max_samples,
        }
    }

    pub fn push(&mut self, rejection: RowRejection) {
        self.total += 1;
        if self.samples.len() < self.max_samples {
            self.samples.push(rejection);
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn samples(&self) -> &[RowRejection] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_defaults_to_main_store() {
        let rec = InventoryRecord::new("123", "STY1");
        assert_eq!(rec.placement, None);
        assert_eq!(rec.effective_placement(), Placement::MainStore);
        assert_eq!(rec.container_id(), None);
    }

    #[test]
    fn placement_serializes_with_kebab_labels() {
        let json = serde_json::to_value(Placement::Container("BOX1".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"location": "container", "container": "BOX1"}));

        let json = serde_json::to_value(Placement::BackStore).unwrap();
        assert_eq!(json, serde_json::json!({"location": "back-store"}));
    }

    #[test]
    fn rejection_log_caps_samples_but_counts_everything() {
        let mut log = RejectionLog::new(2);
        for row in 2..7 {
            log.push(RowRejection {
                sheet: SheetKind::Records,
                row,
                reason: "missing barcode".to_string(),
            });
        }
        assert_eq!(log.total(), 5);
        assert_eq!(log.samples().len(), 2);
        assert_eq!(log.samples()[1].row, 3);
    }
}
