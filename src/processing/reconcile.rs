//! Merging an ingested record set into the persisted one.
//!
//! Reconciliation is a pure function over two record sets. Per identifier:
//!
//! - present on both sides: the incoming record wins field by field, except that a placement the
//!   upload did not state (`placement == None`) falls back to the existing record's placement
//!   (counted as *updated*, even when nothing changed)
//! - incoming only: kept as-is (*added*)
//! - existing only: dropped under [`ReconcileMode::FullRecount`] (*removed*), kept under
//!   [`ReconcileMode::Additive`]
//!
//! Container membership is then rebuilt from the merged placements.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChangeSummary, Container, InventoryRecord};

use super::aggregate::ContainerAggregator;

/// How records absent from an upload are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileMode {
    /// The upload is a full stock count: anything it does not list is gone.
    #[default]
    FullRecount,
    /// The upload only adds and updates; nothing is removed.
    Additive,
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub records: Vec<InventoryRecord>,
    pub containers: Vec<Container>,
    pub summary: ChangeSummary,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine {
    mode: ReconcileMode,
}

impl ReconciliationEngine {
    pub fn new(mode: ReconcileMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ReconcileMode {
        self.mode
    }

    /// Merge `incoming_*` into `existing_*`.
    ///
    /// The container set is: every existing container (its name and location kept, even if it
    /// ends up empty), then incoming containers with ids not already known, then containers
    /// inferred from merged placements. Every membership list is recomputed from the merged
    /// records.
    pub fn reconcile(
        &self,
        existing_records: &[InventoryRecord],
        incoming_records: &[InventoryRecord],
        existing_containers: &[Container],
        incoming_containers: &[Container],
        source_label: &str,
        at: DateTime<Utc>,
    ) -> Reconciliation {
        let existing: HashMap<&str, &InventoryRecord> = existing_records
            .iter()
            .map(|r| (r.identifier.as_str(), r))
            .collect();
        let incoming = dedupe_last_wins(incoming_records);

        let mut added = 0u64;
        let mut updated = 0u64;
        let mut merged_incoming: Vec<InventoryRecord> = Vec::with_capacity(incoming.len());
        for record in incoming {
            match existing.get(record.identifier.as_str()) {
                Some(prior) => {
                    updated += 1;
                    merged_incoming.push(merge_fields(prior, record));
                }
                None => {
                    added += 1;
                    merged_incoming.push(record.clone());
                }
            }
        }

        let (records, removed) = match self.mode {
            ReconcileMode::FullRecount => {
                let listed: HashSet<&str> = merged_incoming.iter().map(|r| r.identifier.as_str()).collect();
                let removed = existing.keys().filter(|id| !listed.contains(*id)).count() as u64;
                (merged_incoming, removed)
            }
            ReconcileMode::Additive => (keep_existing_then_add(existing_records, merged_incoming), 0),
        };

        let mut aggregator = ContainerAggregator::new();
        for c in existing_containers.iter().chain(incoming_containers) {
            aggregator.seed(c.clone());
        }
        for record in &records {
            aggregator.push(record);
        }
        let containers = aggregator.finish();

        tracing::debug!(
            mode = ?self.mode,
            added,
            updated,
            removed,
            records = records.len(),
            containers = containers.len(),
            "reconciled upload"
        );

        Reconciliation {
            records,
            containers,
            summary: ChangeSummary {
                added,
                updated,
                removed,
                recorded_at: at,
                source_label: source_label.to_string(),
            },
        }
    }
}

fn merge_fields(existing: &InventoryRecord, incoming: &InventoryRecord) -> InventoryRecord {
    let mut merged = incoming.clone();
    if merged.placement.is_none() {
        merged.placement = existing.placement.clone();
    }
    merged
}

/// Keep the first position of each identifier, with the last value seen for it.
fn dedupe_last_wins(records: &[InventoryRecord]) -> Vec<&InventoryRecord> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<&InventoryRecord> = Vec::with_capacity(records.len());
    for record in records {
        match position.get(record.identifier.as_str()) {
            Some(&idx) => out[idx] = record,
            None => {
                position.insert(record.identifier.as_str(), out.len());
                out.push(record);
            }
        }
    }
    out
}

fn keep_existing_then_add(existing: &[InventoryRecord], merged: Vec<InventoryRecord>) -> Vec<InventoryRecord> {
    let mut replacements: HashMap<String, InventoryRecord> =
        merged.into_iter().map(|r| (r.identifier.clone(), r)).collect();
    let mut out = Vec::with_capacity(existing.len() + replacements.len());
    let mut seen = HashSet::new();
    for record in existing {
        if !seen.insert(record.identifier.as_str()) {
            continue;
        }
        out.push(replacements.remove(&record.identifier).unwrap_or_else(|| record.clone()));
    }
    // Whatever is left was not in the existing set. HashMap order is arbitrary, so sort for a
    // stable result.
    let mut added: Vec<InventoryRecord> = replacements.into_values().collect();
    added.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    out.extend(added);
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::Placement;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).single().unwrap()
    }

    fn rec(id: &str, qty: u64) -> InventoryRecord {
        InventoryRecord::new(id, "STY").with_quantity(qty)
    }

    fn ids(records: &[InventoryRecord]) -> Vec<&str> {
        records.iter().map(|r| r.identifier.as_str()).collect()
    }

    #[test]
    fn reconciling_a_set_with_itself_is_a_noop_update() {
        let existing = vec![
            rec("A", 1).with_placement(Placement::Container("C1".to_string())),
            rec("B", 2),
        ];
        let containers = vec![Container {
            members: vec!["A".to_string()],
            ..Container::new("C1", "Winter", "Back Store")
        }];
        let out = ReconciliationEngine::default().reconcile(&existing, &existing, &containers, &[], "x.csv", at());

        assert_eq!(out.records, existing);
        assert_eq!(out.containers, containers);
        assert_eq!((out.summary.added, out.summary.updated, out.summary.removed), (0, 2, 0));
    }

    #[test]
    fn placement_falls_back_to_existing_when_upload_is_silent() {
        let existing = vec![rec("A", 1).with_placement(Placement::Container("C1".to_string()))];
        let incoming = vec![rec("A", 9)];
        let out = ReconciliationEngine::default().reconcile(&existing, &incoming, &[], &[], "x.csv", at());

        assert_eq!(out.records[0].quantity, 9);
        assert_eq!(out.records[0].container_id(), Some("C1"));
        assert_eq!(out.containers[0].members, vec!["A".to_string()]);
    }

    #[test]
    fn explicit_placement_in_upload_overrides_existing() {
        let existing = vec![rec("A", 1).with_placement(Placement::Container("C1".to_string()))];
        let incoming = vec![rec("A", 1).with_placement(Placement::BackStore)];
        let existing_containers = vec![Container {
            members: vec!["A".to_string()],
            ..Container::inferred("C1")
        }];
        let out = ReconciliationEngine::default().reconcile(
            &existing,
            &incoming,
            &existing_containers,
            &[],
            "x.csv",
            at(),
        );

        assert_eq!(out.records[0].placement, Some(Placement::BackStore));
        assert_eq!(out.containers.len(), 1, "known containers survive even when emptied");
        assert!(out.containers[0].members.is_empty());
    }

    #[test]
    fn full_recount_drops_absent_records() {
        let existing = vec![rec("A", 1).with_placement(Placement::BackStore), rec("B", 1)];
        let incoming = vec![rec("A", 5), rec("C", 3)];
        let out = ReconciliationEngine::default().reconcile(&existing, &incoming, &[], &[], "x.csv", at());

        assert_eq!(ids(&out.records), vec!["A", "C"]);
        assert_eq!(out.records[0].quantity, 5);
        assert_eq!(out.records[0].placement, Some(Placement::BackStore));
        assert_eq!((out.summary.added, out.summary.updated, out.summary.removed), (1, 1, 1));
        assert_eq!(out.summary.source_label, "x.csv");
        assert_eq!(out.summary.recorded_at, at());
    }

    #[test]
    fn additive_mode_keeps_absent_records() {
        let existing = vec![rec("A", 1), rec("B", 1)];
        let incoming = vec![rec("C", 3), rec("A", 5)];
        let out = ReconciliationEngine::new(ReconcileMode::Additive).reconcile(
            &existing,
            &incoming,
            &[],
            &[],
            "x.csv",
            at(),
        );

        assert_eq!(ids(&out.records), vec!["A", "B", "C"]);
        assert_eq!(out.records[0].quantity, 5);
        assert_eq!((out.summary.added, out.summary.updated, out.summary.removed), (1, 1, 0));
    }

    #[test]
    fn duplicate_incoming_identifiers_count_once_with_last_value() {
        let incoming = vec![rec("A", 1), rec("B", 1), rec("A", 7)];
        let out = ReconciliationEngine::default().reconcile(&[], &incoming, &[], &[], "x.csv", at());

        assert_eq!(ids(&out.records), vec!["A", "B"]);
        assert_eq!(out.records[0].quantity, 7);
        assert_eq!(out.summary.added, 2);
    }

    #[test]
    fn known_container_metadata_wins_over_incoming() {
        let existing_containers = vec![Container::new("C1", "Winter", "Back Store")];
        let incoming_containers = vec![
            Container::new("C1", "Renamed", "Warehouse"),
            Container::new("C2", "Summer", "Warehouse"),
        ];
        let incoming = vec![
            rec("A", 1).with_placement(Placement::Container("C2".to_string())),
            rec("B", 1).with_placement(Placement::Container("C3".to_string())),
        ];
        let out = ReconciliationEngine::default().reconcile(
            &[],
            &incoming,
            &existing_containers,
            &incoming_containers,
            "x.xlsx",
            at(),
        );

        let names: Vec<(&str, &str)> = out.containers.iter().map(|c| (c.id.as_str(), c.name.as_str())).collect();
        assert_eq!(names, vec![("C1", "Winter"), ("C2", "Summer"), ("C3", "Box C3")]);
        assert_eq!(out.containers[1].members, vec!["A".to_string()]);
    }
}
