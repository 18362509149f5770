//! The persisted inventory and the operations that change it.
//!
//! [`InventoryService`] owns the current state and an [`InventoryStore`]. It loads once at
//! startup and saves on every mutation. In-memory state is only replaced after every write for
//! that mutation succeeded, so a [`PipelineError::StoreUnavailable`] leaves it untouched, and the
//! keys written before the failing one are put back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PipelineError, PipelineResult};
use crate::execution::IngestionOutcome;
use crate::processing::{ReconcileMode, ReconciliationEngine};
use crate::store::{CONTAINERS_KEY, HISTORY_KEY, InventoryStore, RECORDS_KEY};
use crate::types::{ChangeSummary, Container, InventoryRecord, Placement, RowRejection};

/// Records with fewer units than this are reported as low stock by default.
pub const DEFAULT_LOW_STOCK_THRESHOLD: u64 = 5;

/// The full persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryState {
    pub records: Vec<InventoryRecord>,
    pub containers: Vec<Container>,
    /// Append-only, oldest first.
    pub history: Vec<ChangeSummary>,
}

/// What the caller is told after an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub summary: ChangeSummary,
    pub rejected_rows: u64,
    /// Up to `max_rejection_samples` of the skipped rows.
    pub rejection_samples: Vec<RowRejection>,
}

/// Saved, or saved with some rows skipped. Anything else is an error and nothing was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Saved,
    SavedWithSkippedRows(u64),
}

impl UploadReport {
    pub fn status(&self) -> UploadStatus {
        if self.rejected_rows == 0 {
            UploadStatus::Saved
        } else {
            UploadStatus::SavedWithSkippedRows(self.rejected_rows)
        }
    }
}

pub struct InventoryService<S> {
    store: S,
    engine: ReconciliationEngine,
    state: InventoryState,
}

impl<S: InventoryStore> InventoryService<S> {
    /// Load the persisted state. Missing keys mean an empty inventory.
    pub fn load(store: S) -> PipelineResult<Self> {
        let state = InventoryState {
            records: load_key(&store, RECORDS_KEY)?,
            containers: load_key(&store, CONTAINERS_KEY)?,
            history: load_key(&store, HISTORY_KEY)?,
        };
        tracing::debug!(
            records = state.records.len(),
            containers = state.containers.len(),
            history = state.history.len(),
            "inventory loaded"
        );
        Ok(Self {
            store,
            engine: ReconciliationEngine::default(),
            state,
        })
    }

    pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
        self.engine = ReconciliationEngine::new(mode);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn state(&self) -> &InventoryState {
        &self.state
    }

    /// Reconcile an ingestion result into the inventory and persist it.
    pub fn apply_upload(&mut self, outcome: IngestionOutcome) -> PipelineResult<UploadReport> {
        self.apply_upload_at(outcome, Utc::now())
    }

    /// [`Self::apply_upload`] with an explicit timestamp for the history entry.
    pub fn apply_upload_at(&mut self, outcome: IngestionOutcome, at: DateTime<Utc>) -> PipelineResult<UploadReport> {
        // Under full-recount semantics an empty upload would erase everything.
        if outcome.records.is_empty() {
            return Err(PipelineError::EmptyUpload {
                rejected_rows: outcome.rejections.total(),
            });
        }

        let merged = self.engine.reconcile(
            &self.state.records,
            &outcome.records,
            &self.state.containers,
            &outcome.containers,
            &outcome.source_label,
            at,
        );
        let mut history = self.state.history.clone();
        history.push(merged.summary.clone());

        let next = InventoryState {
            records: merged.records,
            containers: merged.containers,
            history,
        };
        self.commit(next, true)?;

        let summary = merged.summary;
        tracing::info!(
            source = %summary.source_label,
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            rejected_rows = outcome.rejections.total(),
            "upload saved"
        );
        Ok(UploadReport {
            summary,
            rejected_rows: outcome.rejections.total(),
            rejection_samples: outcome.rejections.samples().to_vec(),
        })
    }

    /// Put one record into an existing container, taking it out of its previous one.
    pub fn assign_to_container(&mut self, identifier: &str, container_id: &str) -> PipelineResult<()> {
        let record_idx = self.record_index(identifier)?;
        let target_idx = self.container_index(container_id)?;

        let mut next = self.state.clone();
        if let Some(old) = next.records[record_idx].container_id().map(str::to_string) {
            if let Some(c) = next.containers.iter_mut().find(|c| c.id == old) {
                c.members.retain(|m| m != identifier);
            }
        }
        let target = &mut next.containers[target_idx];
        if !target.contains(identifier) {
            target.members.push(identifier.to_string());
        }
        next.records[record_idx].placement = Some(Placement::Container(container_id.to_string()));

        self.commit(next, false)
    }

    /// Take a record out of its container and put it back in the main store. A record that is not
    /// in a container is left as it is.
    pub fn remove_from_container(&mut self, identifier: &str) -> PipelineResult<()> {
        let record_idx = self.record_index(identifier)?;
        let Some(old) = self.state.records[record_idx].container_id().map(str::to_string) else {
            return Ok(());
        };

        let mut next = self.state.clone();
        if let Some(c) = next.containers.iter_mut().find(|c| c.id == old) {
            c.members.retain(|m| m != identifier);
        }
        next.records[record_idx].placement = Some(Placement::MainStore);

        self.commit(next, false)
    }

    pub fn create_container(&mut self, id: &str, name: &str, location: &str) -> PipelineResult<()> {
        if self.container(id).is_some() {
            return Err(PipelineError::DuplicateContainer { id: id.to_string() });
        }
        let mut containers = self.state.containers.clone();
        containers.push(Container::new(id, name, location));
        save_key(&self.store, CONTAINERS_KEY, &containers)?;
        self.state.containers = containers;
        Ok(())
    }

    pub fn record(&self, identifier: &str) -> Option<&InventoryRecord> {
        self.state.records.iter().find(|r| r.identifier == identifier)
    }

    pub fn container(&self, id: &str) -> Option<&Container> {
        self.state.containers.iter().find(|c| c.id == id)
    }

    /// Records with strictly fewer than `threshold` units.
    pub fn low_stock(&self, threshold: u64) -> Vec<&InventoryRecord> {
        self.state.records.iter().filter(|r| r.quantity < threshold).collect()
    }

    /// Case-insensitive substring match over identifier, size, color, department and style. An
    /// empty query matches nothing.
    pub fn search(&self, query: &str) -> Vec<&InventoryRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.state
            .records
            .iter()
            .filter(|r| {
                [&r.identifier, &r.size, &r.color, &r.department, &r.style]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&query))
            })
            .collect()
    }

    pub fn records(&self) -> &[InventoryRecord] {
        &self.state.records
    }

    pub fn containers(&self) -> &[Container] {
        &self.state.containers
    }

    pub fn history(&self) -> &[ChangeSummary] {
        &self.state.history
    }

    fn record_index(&self, identifier: &str) -> PipelineResult<usize> {
        self.state
            .records
            .iter()
            .position(|r| r.identifier == identifier)
            .ok_or_else(|| PipelineError::RecordNotFound {
                identifier: identifier.to_string(),
            })
    }

    fn container_index(&self, id: &str) -> PipelineResult<usize> {
        self.state
            .containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| PipelineError::ContainerNotFound { id: id.to_string() })
    }

    /// Persist `next` and only then make it current.
    ///
    /// If a later key fails, the keys already written are put back to the current state so the
    /// store never holds half of a mutation.
    fn commit(&mut self, next: InventoryState, with_history: bool) -> PipelineResult<()> {
        if let Err(err) = save_state(&self.store, &next, with_history) {
            self.restore(with_history);
            return Err(err);
        }
        self.state = next;
        Ok(())
    }

    fn restore(&self, with_history: bool) {
        let mut keys = vec![
            (RECORDS_KEY, serde_json::to_value(&self.state.records)),
            (CONTAINERS_KEY, serde_json::to_value(&self.state.containers)),
        ];
        if with_history {
            keys.push((HISTORY_KEY, serde_json::to_value(&self.state.history)));
        }
        for (key, value) in keys {
            let restored = value
                .map_err(|e| PipelineError::store(key, e))
                .and_then(|value| self.store.set(key, value));
            if let Err(err) = restored {
                tracing::error!(key, %err, "could not restore key after a failed commit");
            }
        }
    }
}

fn save_state<S: InventoryStore>(store: &S, state: &InventoryState, with_history: bool) -> PipelineResult<()> {
    save_key(store, RECORDS_KEY, &state.records)?;
    save_key(store, CONTAINERS_KEY, &state.containers)?;
    if with_history {
        save_key(store, HISTORY_KEY, &state.history)?;
    }
    Ok(())
}

fn load_key<S: InventoryStore, T: DeserializeOwned + Default>(store: &S, key: &str) -> PipelineResult<T> {
    match store.get(key)? {
        Some(value) => serde_json::from_value(value).map_err(|e| PipelineError::store(key, e)),
        None => Ok(T::default()),
    }
}

fn save_key<S: InventoryStore, T: Serialize + ?Sized>(store: &S, key: &str, value: &T) -> PipelineResult<()> {
    let value = serde_json::to_value(value).map_err(|e| PipelineError::store(key, e))?;
    store.set(key, value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;
    use crate::types::RejectionLog;

    fn outcome(records: Vec<InventoryRecord>) -> IngestionOutcome {
        IngestionOutcome {
            records,
            containers: Vec::new(),
            rejections: RejectionLog::new(10),
            source_label: "count.csv".to_string(),
            rows_read: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn rec(id: &str, qty: u64, department: &str) -> InventoryRecord {
        let mut r = InventoryRecord::new(id, format!("STY-{id}")).with_quantity(qty);
        r.department = department.to_string();
        r
    }

    fn service() -> InventoryService<MemoryStore> {
        let mut svc = InventoryService::load(MemoryStore::new()).unwrap();
        svc.apply_upload(outcome(vec![rec("111", 2, "Menswear"), rec("222", 9, "Kids"), rec("333", 4, "menswear")]))
            .unwrap();
        svc
    }

    #[test]
    fn low_stock_is_strictly_below_threshold() {
        let svc = service();
        let low: Vec<&str> = svc
            .low_stock(DEFAULT_LOW_STOCK_THRESHOLD)
            .iter()
            .map(|r| r.identifier.as_str())
            .collect();
        assert_eq!(low, vec!["111", "333"]);
        assert!(svc.low_stock(2).is_empty());
    }

    #[test]
    fn search_is_case_insensitive_and_empty_query_matches_nothing() {
        let svc = service();
        assert_eq!(svc.search("MENSWEAR").len(), 2);
        assert_eq!(svc.search("sty-222").len(), 1);
        assert!(svc.search("  ").is_empty());
    }

    #[test]
    fn create_container_rejects_duplicates() {
        let mut svc = service();
        svc.create_container("B1", "Winter", "Back Store").unwrap();
        assert!(matches!(
            svc.create_container("B1", "Again", "Back Store"),
            Err(PipelineError::DuplicateContainer { .. })
        ));
        assert_eq!(svc.container("B1").map(|c| c.name.as_str()), Some("Winter"));
    }

    #[test]
    fn report_status_distinguishes_skipped_rows() {
        let mut svc = InventoryService::load(MemoryStore::new()).unwrap();
        let mut out = outcome(vec![rec("1", 1, "")]);
        out.rejections.push(RowRejection {
            sheet: crate::types::SheetKind::Records,
            row: 3,
            reason: "missing identifier".to_string(),
        });
        let report = svc.apply_upload(out).unwrap();
        assert_eq!(report.status(), UploadStatus::SavedWithSkippedRows(1));
        assert_eq!(report.rejection_samples.len(), 1);
    }
}
