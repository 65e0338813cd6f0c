//! Read-only tree traversal.
//!
//! Every axis yields ids borrowed from the document, together with their
//! distance from the origin node (depth for descendants).

use crate::document::Document;
use crate::id_generator::NodeId;
use crate::node::Link;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalOptions {
    /// Yield the origin node first
    pub include_self: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Children,
    Descendants,
    Ancestors,
    PrevSiblings,
    NextSiblings,
}

/// A lazy traversal along one axis. Unknown origins traverse nothing.
#[derive(Clone, Copy)]
pub struct Traversal<'a> {
    doc: &'a Document,
    origin: Option<&'a NodeId>,
    axis: Axis,
    options: TraversalOptions,
}

impl<'a> Traversal<'a> {
    pub(crate) fn new(doc: &'a Document, origin: &NodeId, axis: Axis) -> Self {
        Self {
            doc,
            origin: doc.node(origin).map(|node| node.id()),
            axis,
            options: TraversalOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TraversalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn include_self(self) -> Self {
        self.with_options(TraversalOptions { include_self: true })
    }

    pub fn iter(&self) -> TraversalIter<'a> {
        let pending = self.origin.and_then(|origin| {
            if self.options.include_self {
                Some((origin, 0))
            } else {
                successor(self.doc, origin, self.axis, origin, 0)
            }
        });
        TraversalIter {
            doc: self.doc,
            origin: self.origin,
            axis: self.axis,
            pending,
        }
    }

    pub fn for_each(&self, mut f: impl FnMut(&'a NodeId)) {
        self.iter().for_each(|id| f(id));
    }

    /// Distance from the origin along the axis: depth for descendants and
    /// ancestors, index for siblings
    pub fn for_each_with_depth(&self, mut f: impl FnMut(&'a NodeId, usize)) {
        let mut iter = self.iter();
        while let Some((id, depth)) = iter.advance() {
            f(id, depth);
        }
    }

    pub fn find(&self, mut predicate: impl FnMut(&NodeId) -> bool) -> Option<&'a NodeId> {
        self.iter().find(|id| predicate(id))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for Traversal<'a> {
    type Item = &'a NodeId;
    type IntoIter = TraversalIter<'a>;

    fn into_iter(self) -> TraversalIter<'a> {
        self.iter()
    }
}

pub struct TraversalIter<'a> {
    doc: &'a Document,
    origin: Option<&'a NodeId>,
    axis: Axis,
    pending: Option<(&'a NodeId, usize)>,
}

impl<'a> TraversalIter<'a> {
    fn advance(&mut self) -> Option<(&'a NodeId, usize)> {
        let (current, level) = self.pending.take()?;
        if let Some(origin) = self.origin {
            self.pending = successor(self.doc, origin, self.axis, current, level);
        }
        Some((current, level))
    }
}

impl<'a> Iterator for TraversalIter<'a> {
    type Item = &'a NodeId;

    fn next(&mut self) -> Option<&'a NodeId> {
        self.advance().map(|(id, _)| id)
    }
}

fn link<'a>(doc: &'a Document, id: &NodeId, link: Link) -> Option<&'a NodeId> {
    doc.node(id).and_then(|node| node.link(link))
}

fn successor<'a>(
    doc: &'a Document,
    origin: &'a NodeId,
    axis: Axis,
    current: &'a NodeId,
    level: usize,
) -> Option<(&'a NodeId, usize)> {
    match axis {
        Axis::Children if current == origin => link(doc, origin, Link::First).map(|id| (id, 1)),
        Axis::Children => link(doc, current, Link::Next).map(|id| (id, 1)),
        Axis::Ancestors => link(doc, current, Link::Parent).map(|id| (id, level + 1)),
        Axis::PrevSiblings => link(doc, current, Link::Prev).map(|id| (id, level + 1)),
        Axis::NextSiblings => link(doc, current, Link::Next).map(|id| (id, level + 1)),
        Axis::Descendants => {
            if let Some(first) = link(doc, current, Link::First) {
                return Some((first, level + 1));
            }
            // climb until a next sibling exists, never leaving the origin
            let mut node = current;
            let mut level = level;
            loop {
                if node == origin {
                    return None;
                }
                if let Some(next) = link(doc, node, Link::Next) {
                    return Some((next, level));
                }
                node = link(doc, node, Link::Parent)?;
                level = level.saturating_sub(1);
            }
        }
    }
}

impl Document {
    pub fn children(&self, id: &NodeId) -> Traversal<'_> {
        Traversal::new(self, id, Axis::Children)
    }

    /// Descendants in pre-order
    pub fn descendants(&self, id: &NodeId) -> Traversal<'_> {
        Traversal::new(self, id, Axis::Descendants)
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self, id: &NodeId) -> Traversal<'_> {
        Traversal::new(self, id, Axis::Ancestors)
    }

    /// Previous siblings, nearest first
    pub fn prev_siblings(&self, id: &NodeId) -> Traversal<'_> {
        Traversal::new(self, id, Axis::PrevSiblings)
    }

    pub fn next_siblings(&self, id: &NodeId) -> Traversal<'_> {
        Traversal::new(self, id, Axis::NextSiblings)
    }

    pub(crate) fn child_ids(&self, id: &NodeId) -> Vec<NodeId> {
        self.children(id).ids()
    }

    pub(crate) fn descendant_ids(&self, id: &NodeId, include_self: bool) -> Vec<NodeId> {
        self.descendants(id)
            .with_options(TraversalOptions { include_self })
            .ids()
    }
}
