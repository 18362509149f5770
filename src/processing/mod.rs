//! Pure transformations between the reader and the store.
//!
//! - [`mapper`]: raw rows to typed records and containers
//! - [`aggregate`]: streaming grouping of records by container
//! - [`reconcile`]: merging an upload into the persisted inventory
//!
//! ## Example: rows → records → containers
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use soh_pipeline::ingestion::{CellValue, HeaderRow, RawRow};
//! use soh_pipeline::processing::{ContainerAggregator, RecordMapper};
//!
//! let header = Arc::new(HeaderRow::new(vec!["Barcode".into(), "Style".into(), "Box".into()]));
//! let mapper = RecordMapper::bind(&header).unwrap();
//!
//! let mut aggregator = ContainerAggregator::new();
//! for (n, (id, boxed)) in [("X", "BOX1"), ("Y", "BOX1"), ("Z", "")].into_iter().enumerate() {
//!     let cells = vec![
//!         CellValue::Text(id.into()),
//!         CellValue::Text("STY".into()),
//!         if boxed.is_empty() { CellValue::Empty } else { CellValue::Text(boxed.into()) },
//!     ];
//!     let record = mapper.map_row(&RawRow::new(Arc::clone(&header), n as u64 + 2, cells)).unwrap();
//!     aggregator.push(&record);
//! }
//!
//! let containers = aggregator.finish();
//! assert_eq!(containers[0].members, vec!["X".to_string(), "Y".to_string()]);
//! ```

pub mod aggregate;
pub mod mapper;
pub mod reconcile;

pub use aggregate::ContainerAggregator;
pub use mapper::{ContainerMapper, RecordMapper};
pub use reconcile::{ReconcileMode, Reconciliation, ReconciliationEngine};
