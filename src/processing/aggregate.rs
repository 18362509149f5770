//! Streaming grouping of records into containers.

use std::collections::{HashMap, HashSet};

use crate::types::{Container, InventoryRecord};

/// Groups records by container reference while they stream past.
///
/// Containers are created lazily (see [`Container::inferred`]) the first time a reference is seen,
/// unless they were seeded beforehand. Membership reflects only the records pushed into this
/// aggregator; it never merges with previously persisted containers. An inferred container that a
/// later duplicate row leaves empty is not part of the result.
#[derive(Debug, Default)]
pub struct ContainerAggregator {
    containers: Vec<Container>,
    by_id: HashMap<String, usize>,
    /// record identifier -> index of the container currently holding it
    placed: HashMap<String, usize>,
    seeded: HashSet<String>,
}

impl ContainerAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container's display name and location before any record refers to it.
    ///
    /// The first seed for an id wins; seeded containers are kept even if no record ends up in them.
    /// Any members on the seed are ignored.
    pub fn seed(&mut self, container: Container) {
        if self.by_id.contains_key(&container.id) {
            return;
        }
        let mut container = container;
        container.members.clear();
        self.seeded.insert(container.id.clone());
        self.by_id.insert(container.id.clone(), self.containers.len());
        self.containers.push(container);
    }

    /// Account for one record.
    ///
    /// Pushing the same identifier again (a later duplicate row) moves it out of the container it
    /// was previously placed in.
    pub fn push(&mut self, record: &InventoryRecord) {
        let target = record.container_id().map(|id| self.index_of_or_create(id));

        if let Some(&previous) = self.placed.get(&record.identifier) {
            if Some(previous) == target {
                return;
            }
            self.containers[previous].members.retain(|m| m != &record.identifier);
            self.placed.remove(&record.identifier);
        }

        if let Some(idx) = target {
            self.containers[idx].members.push(record.identifier.clone());
            self.placed.insert(record.identifier.clone(), idx);
        }
    }

    /// Number of containers referenced so far, including inferred ones that are now empty.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// The container set, in first-seen order: every seeded container, plus the inferred ones
    /// that still hold a record.
    pub fn finish(self) -> Vec<Container> {
        let seeded = self.seeded;
        self.containers
            .into_iter()
            .filter(|c| !c.members.is_empty() || seeded.contains(&c.id))
            .collect()
    }

    fn index_of_or_create(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.by_id.get(id) {
            return idx;
        }
        let idx = self.containers.len();
        self.containers.push(Container::inferred(id));
        self.by_id.insert(id.to_string(), idx);
        idx
    }
}
