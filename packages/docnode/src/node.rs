//! Nodes and their links.

use crate::id_generator::NodeId;
use crate::state::StateValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node in the document arena.
///
/// Links are ids into the same arena. Deleted nodes keep their last links
/// and state, so they can still be read after the change that removed them.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    node_type: String,
    pub(crate) state: BTreeMap<String, Box<dyn StateValue>>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    pub(crate) first: Option<NodeId>,
    pub(crate) last: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Parent,
    Prev,
    Next,
    First,
    Last,
}

impl Node {
    pub(crate) fn new(id: NodeId, node_type: impl Into<String>) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            state: BTreeMap::new(),
            parent: None,
            prev: None,
            next: None,
            first: None,
            last: None,
        }
    }

    /// Drop links and state so the slot can be reused for a replayed insert
    pub(crate) fn reset(&mut self, node_type: &str) {
        *self = Node::new(self.id.clone(), node_type);
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn parent(&self) -> Option<&NodeId> {
        self.parent.as_ref()
    }

    pub fn prev(&self) -> Option<&NodeId> {
        self.prev.as_ref()
    }

    pub fn next(&self) -> Option<&NodeId> {
        self.next.as_ref()
    }

    pub fn first(&self) -> Option<&NodeId> {
        self.first.as_ref()
    }

    pub fn last(&self) -> Option<&NodeId> {
        self.last.as_ref()
    }

    pub(crate) fn link(&self, link: Link) -> Option<&NodeId> {
        match link {
            Link::Parent => self.parent.as_ref(),
            Link::Prev => self.prev.as_ref(),
            Link::Next => self.next.as_ref(),
            Link::First => self.first.as_ref(),
            Link::Last => self.last.as_ref(),
        }
    }

    pub(crate) fn link_mut(&mut self, link: Link) -> &mut Option<NodeId> {
        match link {
            Link::Parent => &mut self.parent,
            Link::Prev => &mut self.prev,
            Link::Next => &mut self.next,
            Link::First => &mut self.first,
            Link::Last => &mut self.last,
        }
    }
}

/// Where nodes go relative to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    /// After the target's last child
    Append,
    /// Before the target's first child
    Prepend,
    /// Immediately before the target, as siblings
    Before,
    /// Immediately after the target, as siblings
    After,
}
