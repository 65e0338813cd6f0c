//! Per-transaction change summary.

use crate::id_generator::NodeId;
use crate::operations::Operations;
use std::collections::BTreeSet;

/// Nodes touched by the current transaction.
///
/// The four sets are disjoint except that a moved node may also be updated.
/// A node deleted and reinserted within one transaction is reported as moved;
/// one inserted and deleted again does not appear at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub inserted: BTreeSet<NodeId>,
    /// Deleted nodes stay readable through [`crate::Document::node`]
    pub deleted: BTreeSet<NodeId>,
    pub moved: BTreeSet<NodeId>,
    pub updated: BTreeSet<NodeId>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.deleted.is_empty()
            && self.moved.is_empty()
            && self.updated.is_empty()
    }

    /// True if the node was inserted, moved or updated
    pub fn touches(&self, id: &NodeId) -> bool {
        self.inserted.contains(id) || self.moved.contains(id) || self.updated.contains(id)
    }
}

/// Payload delivered to change listeners after a commit
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operations: Operations,
    /// Already in replay order: applying it undoes `operations`
    pub inverse_operations: Operations,
    pub diff: Diff,
}
