//! The dependency fan-out graph: which instances consume which shared values.
//!
//! Fan-out is coarse. Publishing a cell schedules every subscriber, whatever part of the value it
//! reads, and independently of where the subscriber sits in the tree.

use crate::store::InstanceId;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A unique identifier for a shared-value cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u32, u16, u16, [u8; 8]);

impl CellId {
    pub(crate) fn new() -> CellId {
        let uuid = Uuid::new_v4();
        let (a, b, c, d) = uuid.as_fields();
        CellId(a, b, c, *d)
    }
}

#[derive(Debug)]
struct CellEntry {
    owner: InstanceId,
    subscribers: HashSet<InstanceId>,
}

/// Tracks shared-value cells, their owners and their subscribers.
#[derive(Debug, Default)]
pub struct FanoutGraph {
    cells: HashMap<CellId, CellEntry>,
    subscriptions: HashMap<InstanceId, HashSet<CellId>>,
}

impl FanoutGraph {
    pub fn new() -> FanoutGraph {
        FanoutGraph::default()
    }

    /// Registers a cell owned by `owner`. The cell goes away when its owner does.
    pub fn register_cell(&mut self, cell: CellId, owner: InstanceId) {
        self.cells.entry(cell).or_insert_with(|| CellEntry {
            owner,
            subscribers: HashSet::new(),
        });
    }

    /// Subscribes an instance to a cell. Returns false if the cell does not exist.
    pub fn subscribe(&mut self, cell: CellId, instance: InstanceId) -> bool {
        match self.cells.get_mut(&cell) {
            Some(entry) => {
                entry.subscribers.insert(instance);
                self.subscriptions.entry(instance).or_default().insert(cell);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, cell: CellId, instance: InstanceId) {
        if let Some(entry) = self.cells.get_mut(&cell) {
            entry.subscribers.remove(&instance);
        }
        if let Some(cells) = self.subscriptions.get_mut(&instance) {
            cells.remove(&cell);
            if cells.is_empty() {
                self.subscriptions.remove(&instance);
            }
        }
    }

    /// Replaces an instance's subscriptions with the cells it read during its latest evaluation.
    pub fn resubscribe(&mut self, instance: InstanceId, cells: Vec<CellId>) {
        let previous = self.subscriptions.remove(&instance).unwrap_or_default();
        for cell in previous {
            if let Some(entry) = self.cells.get_mut(&cell) {
                entry.subscribers.remove(&instance);
            }
        }
        for cell in cells {
            if !self.subscribe(cell, instance) {
                log::debug!("{:?} read a cell that is gone: {:?}", instance, cell);
            }
        }
    }

    /// Returns every current subscriber of a cell; each appears once.
    pub fn publish(&self, cell: CellId) -> Vec<InstanceId> {
        match self.cells.get(&cell) {
            Some(entry) => {
                log::trace!(
                    "publish {:?}: {} subscriber(s)",
                    cell,
                    entry.subscribers.len()
                );
                entry.subscribers.iter().copied().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn subscribers(&self, cell: CellId) -> impl Iterator<Item = InstanceId> + '_ {
        self.cells
            .get(&cell)
            .into_iter()
            .flat_map(|entry| entry.subscribers.iter().copied())
    }

    pub fn owner(&self, cell: CellId) -> Option<InstanceId> {
        self.cells.get(&cell).map(|entry| entry.owner)
    }

    /// Drops an instance's subscriptions and every cell it owns.
    pub fn remove_instance(&mut self, instance: InstanceId) {
        if let Some(cells) = self.subscriptions.remove(&instance) {
            for cell in cells {
                if let Some(entry) = self.cells.get_mut(&cell) {
                    entry.subscribers.remove(&instance);
                }
            }
        }

        let owned: Vec<CellId> = self
            .cells
            .iter()
            .filter(|(_, entry)| entry.owner == instance)
            .map(|(cell, _)| *cell)
            .collect();
        for cell in owned {
            if let Some(entry) = self.cells.remove(&cell) {
                for subscriber in entry.subscribers {
                    if let Some(cells) = self.subscriptions.get_mut(&subscriber) {
                        cells.remove(&cell);
                    }
                }
            }
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn clear(&mut self) {
        self.cells.clear();
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_returns_each_subscriber_once() {
        let mut graph = FanoutGraph::new();
        let owner = InstanceId::new();
        let a = InstanceId::new();
        let b = InstanceId::new();
        let cell = CellId::new();
        graph.register_cell(cell, owner);
        assert!(graph.subscribe(cell, a));
        assert!(graph.subscribe(cell, a));
        assert!(graph.subscribe(cell, b));

        let mut scheduled = graph.publish(cell);
        scheduled.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(scheduled, expected);
    }

    #[test]
    fn subscribing_to_unknown_cell_fails() {
        let mut graph = FanoutGraph::new();
        assert!(!graph.subscribe(CellId::new(), InstanceId::new()));
        assert!(graph.publish(CellId::new()).is_empty());
    }

    #[test]
    fn resubscribe_drops_cells_no_longer_read() {
        let mut graph = FanoutGraph::new();
        let owner = InstanceId::new();
        let consumer = InstanceId::new();
        let first = CellId::new();
        let second = CellId::new();
        graph.register_cell(first, owner);
        graph.register_cell(second, owner);

        graph.resubscribe(consumer, vec![first, second]);
        graph.resubscribe(consumer, vec![second]);
        assert!(graph.publish(first).is_empty());
        assert_eq!(graph.publish(second), vec![consumer]);

        graph.unsubscribe(second, consumer);
        assert!(graph.publish(second).is_empty());
    }

    #[test]
    fn removing_owner_drops_its_cells() {
        let mut graph = FanoutGraph::new();
        let owner = InstanceId::new();
        let consumer = InstanceId::new();
        let cell = CellId::new();
        graph.register_cell(cell, owner);
        graph.subscribe(cell, consumer);
        assert_eq!(graph.owner(cell), Some(owner));

        graph.remove_instance(owner);
        assert_eq!(graph.cell_count(), 0);
        assert_eq!(graph.subscribers(cell).count(), 0);

        graph.remove_instance(consumer);
        assert!(graph.subscriptions.is_empty());
    }
}
