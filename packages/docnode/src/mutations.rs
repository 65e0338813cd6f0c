//! # Mutations
//!
//! Structural primitives (insert, delete, move, copy, replace) over sibling
//! ranges. Each primitive validates everything before touching the tree, so
//! a failed call leaves the document exactly as it was.
//!
//! Operations are only recorded for attached nodes; building a detached
//! subtree is silent until it is inserted.

use crate::document::Document;
use crate::errors::{DocError, DocResult};
use crate::id_generator::NodeId;
use crate::node::{Link, Node, Position};
use crate::traversal::TraversalOptions;
use std::collections::HashSet;

impl Document {
    // ── Public API ─────────────────────────────────────────────────────────

    /// Insert detached `nodes` as the last children of `target`
    pub fn append(&mut self, target: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        self.insert(target, Position::Append, nodes)
    }

    pub fn prepend(&mut self, target: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        self.insert(target, Position::Prepend, nodes)
    }

    pub fn insert_before(&mut self, target: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        self.insert(target, Position::Before, nodes)
    }

    pub fn insert_after(&mut self, target: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        self.insert(target, Position::After, nodes)
    }

    pub fn insert(&mut self, target: &NodeId, position: Position, nodes: &[NodeId]) -> DocResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        self.with_transaction(|doc| doc.insert_range(target, position, nodes))
    }

    /// Delete a node and its subtree
    pub fn delete(&mut self, id: &NodeId) -> DocResult<()> {
        self.with_transaction(|doc| doc.delete_range(id, id))
    }

    pub fn delete_children(&mut self, id: &NodeId) -> DocResult<()> {
        self.ensure_mutable()?;
        let (Some(first), Some(last)) = (self.link(id, Link::First), self.link(id, Link::Last)) else {
            return Ok(());
        };
        self.with_transaction(|doc| doc.delete_range(&first, &last))
    }

    /// Replace a node with `nodes`
    pub fn replace(&mut self, id: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        self.with_transaction(|doc| doc.replace_range(id, id, nodes))
    }

    pub fn replace_children(&mut self, id: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        match (self.link(id, Link::First), self.link(id, Link::Last)) {
            (Some(first), Some(last)) => self.with_transaction(|doc| doc.replace_range(&first, &last, nodes)),
            _ => self.append(id, nodes),
        }
    }

    pub fn move_to(&mut self, id: &NodeId, target: &NodeId, position: Position) -> DocResult<()> {
        self.with_transaction(|doc| doc.move_range(id, id, target, position))
    }

    /// Deep-copy a node (fresh ids, same state) to `position` of `target`
    pub fn copy_to(&mut self, id: &NodeId, target: &NodeId, position: Position) -> DocResult<NodeId> {
        let copies = self.with_transaction(|doc| doc.copy_range(id, id, target, position))?;
        copies
            .into_iter()
            .next()
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))
    }

    /// Operate on the sibling range `start..=end`
    pub fn range(&mut self, start: &NodeId, end: &NodeId) -> RangeMut<'_> {
        RangeMut {
            doc: self,
            start: start.clone(),
            end: end.clone(),
        }
    }

    // ── Primitives ─────────────────────────────────────────────────────────

    /// Ids of `start..=end`, which must be siblings in that order
    pub(crate) fn range_ids(&self, start: &NodeId, end: &NodeId) -> DocResult<Vec<NodeId>> {
        for id in [start, end] {
            if !self.nodes.contains_key(id) {
                return Err(DocError::NodeNotFound(id.clone()));
            }
        }
        let mut ids = vec![start.clone()];
        let mut current = start.clone();
        while current != *end {
            current = self.link(&current, Link::Next).ok_or_else(|| DocError::InvalidRange {
                start: start.clone(),
                end: end.clone(),
            })?;
            ids.push(current.clone());
        }
        Ok(ids)
    }

    pub(crate) fn insert_range(&mut self, target: &NodeId, position: Position, nodes: &[NodeId]) -> DocResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        if !self.nodes.contains_key(target) {
            return Err(DocError::NodeNotFound(target.clone()));
        }
        let parent = match position {
            Position::Append | Position::Prepend => target.clone(),
            Position::Before | Position::After => {
                if *target == self.root {
                    return Err(DocError::RootSiblings);
                }
                if !self.is_linked(target) {
                    return Err(DocError::Orphan(target.clone()));
                }
                self.link(target, Link::Parent)
                    .ok_or_else(|| DocError::Orphan(target.clone()))?
            }
        };
        self.validate_insert(target, &parent, nodes)?;

        match position {
            Position::Prepend => match self.link(target, Link::First) {
                Some(first) => self.insert_range(&first, Position::Before, nodes),
                None => self.insert_range(target, Position::Append, nodes),
            },
            Position::After => match self.link(target, Link::Next) {
                Some(next) => self.insert_range(&next, Position::Before, nodes),
                None => self.insert_range(&parent, Position::Append, nodes),
            },
            Position::Append => {
                for node in nodes {
                    self.unlink_stale(node);
                }
                let last = self.link(target, Link::Last);
                if self.is_attached(target) {
                    self.record_insert(target, last.clone(), None, nodes)?;
                }
                self.link_append(target, last, nodes);
                Ok(())
            }
            Position::Before => {
                for node in nodes {
                    self.unlink_stale(node);
                }
                let prev = self.link(target, Link::Prev);
                if self.is_attached(&parent) {
                    self.record_insert(&parent, prev, Some(target.clone()), nodes)?;
                }
                self.link_before(&parent, target, nodes);
                Ok(())
            }
        }
    }

    /// Every inserted node (and its subtree) must be a detached node of this
    /// document, not the root, and not contain the insertion point.
    fn validate_insert(&self, target: &NodeId, parent: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        let mut seen = HashSet::new();
        for node in nodes {
            if !self.nodes.contains_key(node) {
                return Err(DocError::ForeignNode(node.clone()));
            }
            for id in self.descendants(node).with_options(TraversalOptions { include_self: true }) {
                if self.is_attached(id) {
                    return Err(DocError::DuplicateId(id.clone()));
                }
                if id == parent || id == target {
                    return Err(DocError::InsertIntoSelf(node.clone()));
                }
                if self.node_type_of(id)? == crate::definition::ROOT_TYPE {
                    return Err(DocError::RootInsert);
                }
                if !seen.insert(id.clone()) {
                    return Err(DocError::DuplicateId(id.clone()));
                }
            }
        }
        Ok(())
    }

    /// Whether `id` is really in its parent's child chain. Deleted nodes
    /// keep their old links after the chain has been rewired around them.
    pub(crate) fn is_linked(&self, id: &NodeId) -> bool {
        let Some(parent) = self.link(id, Link::Parent) else {
            return false;
        };
        match self.link(id, Link::Prev) {
            Some(prev) => self.link(&prev, Link::Next).as_ref() == Some(id),
            None => self.link(&parent, Link::First).as_ref() == Some(id),
        }
    }

    /// Remove a detached node from the sibling chain it was last linked in
    pub(crate) fn unlink_stale(&mut self, id: &NodeId) {
        if !self.is_linked(id) {
            return;
        }
        let Some(parent) = self.link(id, Link::Parent) else {
            return;
        };
        let prev = self.link(id, Link::Prev);
        let next = self.link(id, Link::Next);
        match &prev {
            Some(prev) => self.set_link(prev, Link::Next, next.clone()),
            None => self.set_link(&parent, Link::First, next.clone()),
        }
        match &next {
            Some(next) => self.set_link(next, Link::Prev, prev.clone()),
            None => self.set_link(&parent, Link::Last, prev.clone()),
        }
    }

    fn link_append(&mut self, parent: &NodeId, last: Option<NodeId>, nodes: &[NodeId]) {
        let mut current = last;
        for node in nodes {
            self.attach(node, parent, current.clone(), None);
            match &current {
                Some(current) => self.set_link(current, Link::Next, Some(node.clone())),
                None => self.set_link(parent, Link::First, Some(node.clone())),
            }
            current = Some(node.clone());
        }
        self.set_link(parent, Link::Last, current);
    }

    fn link_before(&mut self, parent: &NodeId, target: &NodeId, nodes: &[NodeId]) {
        let mut current = target.clone();
        for node in nodes.iter().rev() {
            let prev = self.link(&current, Link::Prev);
            self.attach(node, parent, prev.clone(), Some(current.clone()));
            if let Some(prev) = &prev {
                self.set_link(prev, Link::Next, Some(node.clone()));
            }
            self.set_link(&current, Link::Prev, Some(node.clone()));
            current = node.clone();
        }
        if self.link(parent, Link::First).as_ref() == Some(target) {
            self.set_link(parent, Link::First, Some(current));
        }
    }

    /// Set a node's links and index its subtree if the parent is attached
    fn attach(&mut self, id: &NodeId, parent: &NodeId, prev: Option<NodeId>, next: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = Some(parent.clone());
            node.prev = prev;
            node.next = next;
        }
        if self.is_attached(parent) {
            for descendant in self.descendant_ids(id, true) {
                self.attached.insert(descendant);
            }
        }
    }

    /// Cut `start..=end` out of its parent's chain. The range keeps its
    /// own (now stale) outer links.
    pub(crate) fn detach_range(&mut self, start: &NodeId, end: &NodeId) {
        let Some(parent) = self.link(start, Link::Parent) else {
            return;
        };
        let prev = self.link(start, Link::Prev);
        let next = self.link(end, Link::Next);
        match &prev {
            Some(prev) => self.set_link(prev, Link::Next, next.clone()),
            None => self.set_link(&parent, Link::First, next.clone()),
        }
        match &next {
            Some(next) => self.set_link(next, Link::Prev, prev.clone()),
            None => self.set_link(&parent, Link::Last, prev.clone()),
        }
    }

    pub(crate) fn delete_range(&mut self, start: &NodeId, end: &NodeId) -> DocResult<()> {
        if *start == self.root || *end == self.root {
            return Err(DocError::RootDelete);
        }
        let range = self.range_ids(start, end)?;
        if !self.is_attached(start) {
            if self.is_linked(start) {
                self.detach_range(start, end);
            }
            return Ok(());
        }
        let parent = self
            .link(start, Link::Parent)
            .ok_or_else(|| DocError::Orphan(start.clone()))?;

        // collect before detaching so the whole subtree leaves the index
        let mut removed = Vec::new();
        for node in &range {
            removed.extend(self.descendant_ids(node, true));
        }
        self.record_delete(&range, &parent)?;
        for id in removed {
            self.attached.remove(&id);
        }
        Ok(())
    }

    pub(crate) fn move_range(
        &mut self,
        start: &NodeId,
        end: &NodeId,
        target: &NodeId,
        position: Position,
    ) -> DocResult<()> {
        if *start == self.root {
            return Err(DocError::RootMove);
        }
        if !self.nodes.contains_key(target) {
            return Err(DocError::NodeNotFound(target.clone()));
        }
        let range = self.range_ids(start, end)?;
        if !self.is_linked(start) {
            return Err(DocError::Orphan(start.clone()));
        }
        if matches!(position, Position::Before | Position::After) {
            if *target == self.root {
                return Err(DocError::RootSiblings);
            }
            if !self.is_linked(target) {
                return Err(DocError::Orphan(target.clone()));
            }
        }

        let unchanged = match position {
            Position::Before => self.link(target, Link::Prev).as_ref() == Some(end),
            Position::After => self.link(target, Link::Next).as_ref() == Some(start),
            Position::Append => self.link(target, Link::Last).as_ref() == Some(end),
            Position::Prepend => self.link(target, Link::First).as_ref() == Some(start),
        };
        if unchanged {
            return Ok(());
        }

        let members: HashSet<&NodeId> = range.iter().collect();
        if members.contains(target) {
            return Err(DocError::TargetInRange);
        }
        if self.ancestors(target).iter().any(|id| members.contains(id)) {
            return Err(DocError::TargetDescendsFromRange);
        }

        let (new_parent, new_prev, new_next) = match position {
            Position::Append => (target.clone(), self.link(target, Link::Last), None),
            Position::Prepend => (target.clone(), None, self.link(target, Link::First)),
            Position::Before | Position::After => {
                let parent = self
                    .link(target, Link::Parent)
                    .ok_or_else(|| DocError::Orphan(target.clone()))?;
                if position == Position::Before {
                    (parent, self.link(target, Link::Prev), Some(target.clone()))
                } else {
                    (parent, Some(target.clone()), self.link(target, Link::Next))
                }
            }
        };
        let old_parent = self
            .link(start, Link::Parent)
            .ok_or_else(|| DocError::Orphan(start.clone()))?;
        let attached = self.is_attached(start);
        if attached != self.is_attached(&new_parent) {
            return Err(DocError::AttachmentMismatch);
        }

        let old_prev = self.link(start, Link::Prev);
        let old_next = self.link(end, Link::Next);
        self.detach_range(start, end);
        if attached {
            let from = (self.anchor(&old_parent), old_prev, old_next);
            let to = (self.anchor(&new_parent), new_prev.clone(), new_next.clone());
            self.record_move(&range, to, from);
        }

        self.set_link(start, Link::Prev, new_prev.clone());
        match &new_prev {
            Some(prev) => self.set_link(prev, Link::Next, Some(start.clone())),
            None => self.set_link(&new_parent, Link::First, Some(start.clone())),
        }
        self.set_link(end, Link::Next, new_next.clone());
        match &new_next {
            Some(next) => self.set_link(next, Link::Prev, Some(end.clone())),
            None => self.set_link(&new_parent, Link::Last, Some(end.clone())),
        }
        if old_parent != new_parent {
            for node in &range {
                self.set_link(node, Link::Parent, Some(new_parent.clone()));
            }
        }
        Ok(())
    }

    pub(crate) fn copy_range(
        &mut self,
        start: &NodeId,
        end: &NodeId,
        target: &NodeId,
        position: Position,
    ) -> DocResult<Vec<NodeId>> {
        let range = self.range_ids(start, end)?;
        if !self.nodes.contains_key(target) {
            return Err(DocError::NodeNotFound(target.clone()));
        }
        let mut copies = Vec::with_capacity(range.len());
        for node in &range {
            copies.push(self.clone_subtree(node)?);
        }
        if let Err(err) = self.insert_range(target, position, &copies) {
            for copy in &copies {
                for id in self.descendant_ids(copy, true) {
                    self.nodes.remove(&id);
                }
            }
            return Err(err);
        }
        Ok(copies)
    }

    /// Detached deep copy with fresh ids
    fn clone_subtree(&mut self, id: &NodeId) -> DocResult<NodeId> {
        let source = self
            .nodes
            .get(id)
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))?;
        let node_type = source.node_type().to_string();
        let encoded = self.encode_state(id)?;
        let state = self.decode_state(&node_type, &encoded)?;
        let copy = self.create_node_of_type(&node_type)?;
        if let Some(node) = self.nodes.get_mut(&copy) {
            node.state = state;
        }

        let children = self.child_ids(id);
        let mut copied_children = Vec::with_capacity(children.len());
        for child in &children {
            copied_children.push(self.clone_subtree(child)?);
        }
        if !copied_children.is_empty() {
            self.link_append(&copy, None, &copied_children);
        }
        Ok(copy)
    }

    pub(crate) fn replace_range(&mut self, start: &NodeId, end: &NodeId, nodes: &[NodeId]) -> DocResult<()> {
        if *start != self.root && !self.is_linked(start) {
            return Err(DocError::Orphan(start.clone()));
        }
        let parent = self.link(start, Link::Parent);
        let prev = self.link(start, Link::Prev);
        let next = self.link(end, Link::Next);
        self.delete_range(start, end)?;
        match (prev, next, parent) {
            (Some(prev), _, _) => self.insert_range(&prev, Position::After, nodes),
            (None, Some(next), _) => self.insert_range(&next, Position::Before, nodes),
            (None, None, Some(parent)) => self.insert_range(&parent, Position::Append, nodes),
            (None, None, None) => Ok(()),
        }
    }

    pub(crate) fn insert_silently(&mut self, parent: &NodeId, node: Node) {
        let id = node.id().clone();
        self.nodes.insert(id.clone(), node);
        let last = self.link(parent, Link::Last);
        self.link_append(parent, last, &[id]);
    }
}

/// A sibling range `start..=end`, validated when an operation runs
pub struct RangeMut<'a> {
    doc: &'a mut Document,
    start: NodeId,
    end: NodeId,
}

impl<'a> RangeMut<'a> {
    pub fn ids(&self) -> DocResult<Vec<NodeId>> {
        self.doc.range_ids(&self.start, &self.end)
    }

    pub fn for_each(&self, mut f: impl FnMut(&Document, &NodeId)) -> DocResult<()> {
        for id in self.ids()? {
            f(&*self.doc, &id);
        }
        Ok(())
    }

    pub fn find(&self, mut predicate: impl FnMut(&Document, &NodeId) -> bool) -> DocResult<Option<NodeId>> {
        Ok(self.ids()?.into_iter().find(|id| predicate(&*self.doc, id)))
    }

    pub fn delete(self) -> DocResult<()> {
        let (start, end) = (self.start, self.end);
        self.doc.with_transaction(|doc| doc.delete_range(&start, &end))
    }

    pub fn replace(self, nodes: &[NodeId]) -> DocResult<()> {
        let (start, end) = (self.start, self.end);
        self.doc
            .with_transaction(|doc| doc.replace_range(&start, &end, nodes))
    }

    pub fn move_to(self, target: &NodeId, position: Position) -> DocResult<()> {
        let (start, end) = (self.start, self.end);
        self.doc
            .with_transaction(|doc| doc.move_range(&start, &end, target, position))
    }

    /// Copy the range; returns the ids of the top-level copies
    pub fn copy_to(self, target: &NodeId, position: Position) -> DocResult<Vec<NodeId>> {
        let (start, end) = (self.start, self.end);
        self.doc
            .with_transaction(|doc| doc.copy_range(&start, &end, target, position))
    }
}
