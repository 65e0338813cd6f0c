//! # Operations
//!
//! Compact, JSON-serializable record of a transaction. An [`Operations`] value
//! is a pair of an ordered list of structural operations and a state patch:
//!
//! ```text
//! [ [op, op, ...], { "<node id>": { "<field>": "<stringified JSON>" } } ]
//!
//! INSERT  [0, [[id, type], ...], parent | 0, prev | 0, next | 0]
//! DELETE  [1, start, end | 0]
//! MOVE    [2, start, end | 0, parent | 0, prev | 0, next | 0]
//! ```
//!
//! `0` stands for "root" in a parent slot and for "none" everywhere else.
//!
//! Recording happens as primitives run: every forward operation gets an
//! inverse, so that replaying the inverse list back to front restores the
//! document as it was before the transaction.

use crate::diff::Diff;
use crate::document::Document;
use crate::errors::{DocError, DocResult, ErrorKind};
use crate::id_generator::NodeId;
use crate::node::{Link, Position};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{trace, warn};

/// Per node, per field: stringified JSON of the new value
pub type StatePatch = BTreeMap<NodeId, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Insert `(id, type)` pairs. The anchor is `prev` if set, else `next`,
    /// else the end of `parent`'s children (`None` parent is the root).
    Insert {
        nodes: Vec<(NodeId, String)>,
        parent: Option<NodeId>,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    },
    /// Delete the sibling range `start..=end` (`None` end is `start`)
    Delete { start: NodeId, end: Option<NodeId> },
    /// Move the sibling range `start..=end`, anchored like `Insert`
    Move {
        start: NodeId,
        end: Option<NodeId>,
        parent: Option<NodeId>,
        prev: Option<NodeId>,
        next: Option<NodeId>,
    },
}

const INSERT: u8 = 0;
const DELETE: u8 = 1;
const MOVE: u8 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operations {
    pub ordered: Vec<Operation>,
    pub state_patch: StatePatch,
}

impl Operations {
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty() && self.state_patch.is_empty()
    }

    pub fn to_json_string(&self) -> DocResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(s: &str) -> DocResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

// ── Serialization ──────────────────────────────────────────────────────────

/// An optional id in wire form: the id string, or `0`
struct Anchor<'a>(&'a Option<NodeId>);

impl Serialize for Anchor<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(id) => serializer.serialize_str(id.as_str()),
            None => serializer.serialize_u8(0),
        }
    }
}

struct OwnedAnchor(Option<NodeId>);

impl<'de> Deserialize<'de> for OwnedAnchor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AnchorVisitor;

        impl<'de> Visitor<'de> for AnchorVisitor {
            type Value = OwnedAnchor;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a node id or 0")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<OwnedAnchor, E> {
                if v == 0 {
                    Ok(OwnedAnchor(None))
                } else {
                    Err(E::invalid_value(de::Unexpected::Unsigned(v), &self))
                }
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<OwnedAnchor, E> {
                if v == 0 {
                    Ok(OwnedAnchor(None))
                } else {
                    Err(E::invalid_value(de::Unexpected::Signed(v), &self))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<OwnedAnchor, E> {
                Ok(OwnedAnchor(Some(NodeId::from(v))))
            }
        }

        deserializer.deserialize_any(AnchorVisitor)
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Operation::Insert {
                nodes,
                parent,
                prev,
                next,
            } => {
                let mut seq = serializer.serialize_seq(Some(5))?;
                seq.serialize_element(&INSERT)?;
                seq.serialize_element(nodes)?;
                seq.serialize_element(&Anchor(parent))?;
                seq.serialize_element(&Anchor(prev))?;
                seq.serialize_element(&Anchor(next))?;
                seq.end()
            }
            Operation::Delete { start, end } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&DELETE)?;
                seq.serialize_element(start)?;
                seq.serialize_element(&Anchor(end))?;
                seq.end()
            }
            Operation::Move {
                start,
                end,
                parent,
                prev,
                next,
            } => {
                let mut seq = serializer.serialize_seq(Some(6))?;
                seq.serialize_element(&MOVE)?;
                seq.serialize_element(start)?;
                seq.serialize_element(&Anchor(end))?;
                seq.serialize_element(&Anchor(parent))?;
                seq.serialize_element(&Anchor(prev))?;
                seq.serialize_element(&Anchor(next))?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OperationVisitor;

        fn element<'de, A, T>(seq: &mut A, index: usize) -> Result<T, A::Error>
        where
            A: SeqAccess<'de>,
            T: Deserialize<'de>,
        {
            seq.next_element()?
                .ok_or_else(|| de::Error::invalid_length(index, &"a complete operation"))
        }

        impl<'de> Visitor<'de> for OperationVisitor {
            type Value = Operation;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an INSERT, DELETE or MOVE operation array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Operation, A::Error> {
                let kind: u8 = element(&mut seq, 0)?;
                match kind {
                    INSERT => Ok(Operation::Insert {
                        nodes: element(&mut seq, 1)?,
                        parent: element::<_, OwnedAnchor>(&mut seq, 2)?.0,
                        prev: element::<_, OwnedAnchor>(&mut seq, 3)?.0,
                        next: element::<_, OwnedAnchor>(&mut seq, 4)?.0,
                    }),
                    DELETE => Ok(Operation::Delete {
                        start: element(&mut seq, 1)?,
                        end: element::<_, OwnedAnchor>(&mut seq, 2)?.0,
                    }),
                    MOVE => Ok(Operation::Move {
                        start: element(&mut seq, 1)?,
                        end: element::<_, OwnedAnchor>(&mut seq, 2)?.0,
                        parent: element::<_, OwnedAnchor>(&mut seq, 3)?.0,
                        prev: element::<_, OwnedAnchor>(&mut seq, 4)?.0,
                        next: element::<_, OwnedAnchor>(&mut seq, 5)?.0,
                    }),
                    other => Err(de::Error::invalid_value(
                        de::Unexpected::Unsigned(other.into()),
                        &"0, 1 or 2",
                    )),
                }
            }
        }

        deserializer.deserialize_seq(OperationVisitor)
    }
}

impl Serialize for Operations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.ordered, &self.state_patch).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (ordered, state_patch) = <(Vec<Operation>, StatePatch)>::deserialize(deserializer)?;
        Ok(Operations {
            ordered,
            state_patch,
        })
    }
}

// ── Recording ──────────────────────────────────────────────────────────────

impl Document {
    /// Record an insert of already-validated `nodes` under an attached
    /// `parent`, between `prev` and `next`. Called before linking.
    pub(crate) fn record_insert(
        &mut self,
        parent: &NodeId,
        prev: Option<NodeId>,
        next: Option<NodeId>,
        nodes: &[NodeId],
    ) -> DocResult<()> {
        let (Some(first), Some(last)) = (nodes.first(), nodes.last()) else {
            return Ok(());
        };
        let entries = self.typed_entries(nodes)?;
        let anchor = self.anchor(parent);
        self.operations.ordered.push(Operation::Insert {
            nodes: entries,
            parent: anchor,
            prev,
            next,
        });
        if !self.diff.inserted.contains(parent) {
            self.inverse_operations.ordered.push(Operation::Delete {
                start: first.clone(),
                end: (first != last).then(|| last.clone()),
            });
        }

        for node in nodes {
            self.copy_inserted_to_diff(node)?;
            for descendant in self.descendant_ids(node, false) {
                self.copy_inserted_to_diff(&descendant)?;
                if self.link(&descendant, Link::Prev).is_some() {
                    continue;
                }
                // first child: record the whole sibling list in one insert
                let Some(child_parent) = self.link(&descendant, Link::Parent) else {
                    continue;
                };
                let children = self.child_ids(&child_parent);
                let entries = self.typed_entries(&children)?;
                self.operations.ordered.push(Operation::Insert {
                    nodes: entries,
                    parent: Some(child_parent.clone()),
                    prev: None,
                    next: None,
                });
                if !self.diff.inserted.contains(&child_parent) {
                    let last_child = children.last().cloned();
                    self.inverse_operations.ordered.push(Operation::Delete {
                        start: descendant.clone(),
                        end: last_child.filter(|last| *last != descendant),
                    });
                }
            }
        }
        Ok(())
    }

    fn copy_inserted_to_diff(&mut self, id: &NodeId) -> DocResult<()> {
        if self.diff.deleted.remove(id) {
            self.diff.moved.insert(id.clone());
            self.reinserted.insert(id.clone());
            if self.state_differs_from_inverse(id)? {
                self.diff.updated.insert(id.clone());
            }
            // the inverse holds every non-default field from before the
            // deletion, so any field it lacks was at its default
            let defaults = self.registry.defaults(self.node_type_of(id)?)?;
            let previous = self.inverse_operations.state_patch.entry(id.clone()).or_default();
            for (key, default) in defaults {
                previous.entry(key).or_insert(default);
            }
        } else {
            self.diff.inserted.insert(id.clone());
        }
        let state = self.encode_state(id)?;
        if !state.is_empty() {
            self.operations.state_patch.insert(id.clone(), state);
        }
        Ok(())
    }

    /// For a node coming back within the transaction that removed it: does
    /// its state differ from what it was before the transaction?
    fn state_differs_from_inverse(&self, id: &NodeId) -> DocResult<bool> {
        let current = self.encode_state(id)?;
        let previous = self.inverse_operations.state_patch.get(id);
        let keys: BTreeSet<&String> = current
            .keys()
            .chain(previous.into_iter().flat_map(|fields| fields.keys()))
            .collect();
        for key in keys {
            let now = match current.get(key) {
                Some(encoded) => encoded.clone(),
                None => self.default_encoded(id, key)?,
            };
            let before = match previous.and_then(|fields| fields.get(key)) {
                Some(encoded) => encoded.clone(),
                None => self.default_encoded(id, key)?,
            };
            if now != before {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Does the forward patch of `id` change anything the inverse patch
    /// would restore? Missing entries stand for the field's default.
    fn patch_differs(&self, id: &NodeId) -> DocResult<bool> {
        let forward = self.operations.state_patch.get(id);
        let inverse = self.inverse_operations.state_patch.get(id);
        let keys: BTreeSet<&String> = forward
            .into_iter()
            .chain(inverse)
            .flat_map(|fields| fields.keys())
            .collect();
        for key in keys {
            let now = match forward.and_then(|fields| fields.get(key)) {
                Some(encoded) => encoded.clone(),
                None => self.default_encoded(id, key)?,
            };
            let before = match inverse.and_then(|fields| fields.get(key)) {
                Some(encoded) => encoded.clone(),
                None => self.default_encoded(id, key)?,
            };
            if now != before {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn copy_deleted_to_diff(&mut self, id: &NodeId) -> DocResult<()> {
        if self.diff.inserted.remove(id) {
            self.diff.moved.remove(id);
            return Ok(());
        }
        self.diff.moved.remove(id);
        self.reinserted.remove(id);
        let mut previous = self.encode_state(id)?;
        if let Some(recorded) = self.inverse_operations.state_patch.get(id) {
            previous.extend(recorded.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if !previous.is_empty() {
            self.inverse_operations
                .state_patch
                .insert(id.clone(), previous);
        }
        self.diff.deleted.insert(id.clone());
        Ok(())
    }

    /// Record deletion of the attached range, detaching it in the process
    pub(crate) fn record_delete(&mut self, range: &[NodeId], parent: &NodeId) -> DocResult<()> {
        let (Some(start), Some(end)) = (range.first(), range.last()) else {
            return Ok(());
        };
        self.operations.ordered.push(Operation::Delete {
            start: start.clone(),
            end: (start != end).then(|| end.clone()),
        });

        let entries = self.typed_entries(range)?;
        for node in range {
            self.copy_deleted_to_diff(node)?;
        }

        let restore = !self.diff.inserted.contains(parent);
        let mut inverse = Vec::new();
        if restore {
            inverse.push(Operation::Insert {
                nodes: entries,
                parent: self.anchor(parent),
                prev: self.link(start, Link::Prev),
                next: self.link(end, Link::Next),
            });
        }
        self.detach_range(start, end);

        for node in range {
            for descendant in self.descendant_ids(node, true) {
                self.operations.state_patch.remove(&descendant);
                self.diff.updated.remove(&descendant);
                let children = self.child_ids(&descendant);
                if children.is_empty() {
                    continue;
                }
                let entries = self.typed_entries(&children)?;
                for child in &children {
                    self.copy_deleted_to_diff(child)?;
                }
                if restore {
                    inverse.push(Operation::Insert {
                        nodes: entries,
                        parent: Some(descendant.clone()),
                        prev: None,
                        next: None,
                    });
                }
            }
        }

        inverse.reverse();
        self.inverse_operations.ordered.extend(inverse);
        Ok(())
    }

    /// Record a move of an attached range; positions are captured by the caller
    pub(crate) fn record_move(
        &mut self,
        range: &[NodeId],
        to: (Option<NodeId>, Option<NodeId>, Option<NodeId>),
        from: (Option<NodeId>, Option<NodeId>, Option<NodeId>),
    ) {
        let (Some(start), Some(end)) = (range.first(), range.last()) else {
            return;
        };
        let end = (start != end).then(|| end.clone());
        let (parent, prev, next) = to;
        self.operations.ordered.push(Operation::Move {
            start: start.clone(),
            end: end.clone(),
            parent,
            prev,
            next,
        });
        let (parent, prev, next) = from;
        self.inverse_operations.ordered.push(Operation::Move {
            start: start.clone(),
            end,
            parent,
            prev,
            next,
        });
        for node in range {
            if !self.diff.inserted.contains(node) {
                self.diff.moved.insert(node.clone());
            }
        }
    }

    /// Remember the pre-transaction value of a field about to change
    pub(crate) fn record_state_inverse(&mut self, id: &NodeId, key: &str) -> DocResult<()> {
        if self.diff.inserted.contains(id) {
            return Ok(());
        }
        if self
            .inverse_operations
            .state_patch
            .get(id)
            .map_or(false, |fields| fields.contains_key(key))
        {
            return Ok(());
        }
        let encoded = self.encode_field(id, key)?;
        self.inverse_operations
            .state_patch
            .entry(id.clone())
            .or_default()
            .insert(key.to_string(), encoded);
        Ok(())
    }

    /// Record the new value of a field. A field set back to its value from
    /// before the transaction drops out of both patches, unless the node was
    /// deleted and reinserted: replay rebuilds it from defaults, so its patch
    /// entries must stay.
    pub(crate) fn record_state(&mut self, id: &NodeId, key: &str) -> DocResult<()> {
        let encoded = self.encode_field(id, key)?;
        if self.reinserted.contains(id) {
            self.operations
                .state_patch
                .entry(id.clone())
                .or_default()
                .insert(key.to_string(), encoded);
            if self.patch_differs(id)? {
                self.diff.updated.insert(id.clone());
            } else {
                self.diff.updated.remove(id);
            }
            return Ok(());
        }
        let reverted = self
            .inverse_operations
            .state_patch
            .get(id)
            .and_then(|fields| fields.get(key))
            == Some(&encoded);

        if reverted && self.operations.state_patch.contains_key(id) {
            if let Some(fields) = self.operations.state_patch.get_mut(id) {
                fields.remove(key);
                if fields.is_empty() {
                    self.operations.state_patch.remove(id);
                    self.diff.updated.remove(id);
                }
            }
            if let Some(fields) = self.inverse_operations.state_patch.get_mut(id) {
                fields.remove(key);
                if fields.is_empty() {
                    self.inverse_operations.state_patch.remove(id);
                }
            }
            return Ok(());
        }

        self.operations
            .state_patch
            .entry(id.clone())
            .or_default()
            .insert(key.to_string(), encoded);
        if !self.diff.inserted.contains(id) {
            self.diff.updated.insert(id.clone());
        }
        Ok(())
    }

    pub(crate) fn has_changes(&self) -> bool {
        let Diff {
            inserted,
            deleted,
            moved,
            ..
        } = &self.diff;
        !inserted.is_empty()
            || !deleted.is_empty()
            || !moved.is_empty()
            || !self.operations.state_patch.is_empty()
    }

    fn typed_entries(&self, ids: &[NodeId]) -> DocResult<Vec<(NodeId, String)>> {
        ids.iter()
            .map(|id| Ok((id.clone(), self.node_type_of(id)?.to_string())))
            .collect()
    }

    /// Wire form of a parent reference: the root is written as `0`
    pub(crate) fn anchor(&self, id: &NodeId) -> Option<NodeId> {
        (*id != self.root).then(|| id.clone())
    }
}

// ── Replay ─────────────────────────────────────────────────────────────────

impl Document {
    /// Apply operations received from elsewhere (a peer, a log, the undo
    /// stack) inside a transaction.
    ///
    /// Operations whose target nodes no longer exist are skipped with a
    /// warning. Schema errors (unknown node types) abort the transaction.
    pub fn apply_operations(&mut self, operations: &Operations) -> DocResult<()> {
        if operations.is_empty() {
            return Ok(());
        }
        self.with_transaction(|doc| doc.replay(operations))
    }

    pub(crate) fn replay(&mut self, operations: &Operations) -> DocResult<()> {
        for operation in &operations.ordered {
            match self.replay_one(operation) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::Structural => {
                    warn!(error = %err, "Skipping operation that no longer applies");
                }
                Err(err) => return Err(err),
            }
        }
        self.merge_state_patch(&operations.state_patch)
    }

    fn replay_one(&mut self, operation: &Operation) -> DocResult<()> {
        trace!(?operation, "Replaying operation");
        match operation {
            Operation::Insert {
                nodes,
                parent,
                prev,
                next,
            } => {
                let (target, position) = self.resolve_anchor(parent, prev, next)?;
                if let Some((id, _)) = nodes.iter().find(|(id, _)| self.is_attached(id)) {
                    return Err(DocError::DuplicateId(id.clone()));
                }
                let mut fresh = Vec::with_capacity(nodes.len());
                for (id, node_type) in nodes {
                    fresh.push(self.spawn_node(id, node_type)?);
                }
                self.insert_range(&target, position, &fresh)
            }
            Operation::Delete { start, end } => {
                let end = end.as_ref().unwrap_or(start);
                self.ensure_attached(start)?;
                self.ensure_attached(end)?;
                self.delete_range(start, end)
            }
            Operation::Move {
                start,
                end,
                parent,
                prev,
                next,
            } => {
                let end = end.as_ref().unwrap_or(start);
                self.ensure_attached(start)?;
                self.ensure_attached(end)?;
                let (target, position) = self.resolve_anchor(parent, prev, next)?;
                self.move_range(start, end, &target, position)
            }
        }
    }

    fn resolve_anchor(
        &self,
        parent: &Option<NodeId>,
        prev: &Option<NodeId>,
        next: &Option<NodeId>,
    ) -> DocResult<(NodeId, Position)> {
        let (target, position) = match (prev, next) {
            (Some(prev), _) => (prev.clone(), Position::After),
            (None, Some(next)) => (next.clone(), Position::Before),
            (None, None) => (
                parent.clone().unwrap_or_else(|| self.root.clone()),
                Position::Append,
            ),
        };
        self.ensure_attached(&target)?;
        Ok((target, position))
    }

    fn ensure_attached(&self, id: &NodeId) -> DocResult<()> {
        if self.is_attached(id) {
            Ok(())
        } else {
            Err(DocError::NodeNotFound(id.clone()))
        }
    }

    fn merge_state_patch(&mut self, patch: &StatePatch) -> DocResult<()> {
        for (id, fields) in patch {
            if !self.is_attached(id) {
                warn!(node = %id, "Skipping state for a node that is not in the document");
                continue;
            }
            let node_type = self.node_type_of(id)?.to_string();
            for (key, encoded) in fields {
                let value = match self.registry.decode(&node_type, key, encoded) {
                    Ok(value) => value,
                    Err(err) if err.kind() == ErrorKind::Schema => {
                        warn!(node = %id, field = %key, "Skipping unregistered state");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                self.write_state(id, key, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn test_insert_wire_form() {
        let op = Operation::Insert {
            nodes: vec![(id("a"), "text".into()), (id("b"), "text".into())],
            parent: None,
            prev: Some(id("x")),
            next: None,
        };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!([0, [["a", "text"], ["b", "text"]], 0, "x", 0])
        );
    }

    #[test]
    fn test_delete_and_move_wire_form() {
        let delete = Operation::Delete {
            start: id("a"),
            end: None,
        };
        assert_eq!(serde_json::to_value(&delete).unwrap(), json!([1, "a", 0]));

        let mv = Operation::Move {
            start: id("a"),
            end: Some(id("c")),
            parent: Some(id("p")),
            prev: None,
            next: Some(id("n")),
        };
        assert_eq!(
            serde_json::to_value(&mv).unwrap(),
            json!([2, "a", "c", "p", 0, "n"])
        );
    }

    #[test]
    fn test_operations_parse() {
        let text = r#"[[[1,"a","b"],[2,"c",0,0,0,"d"]],{"a":{"value":"\"x\""}}]"#;
        let ops = Operations::from_json_str(text).unwrap();
        assert_eq!(ops.ordered.len(), 2);
        assert_eq!(
            ops.ordered[0],
            Operation::Delete {
                start: id("a"),
                end: Some(id("b"))
            }
        );
        assert_eq!(ops.state_patch[&id("a")]["value"], "\"x\"");
        assert_eq!(ops.to_json_string().unwrap(), text);
    }

    #[test]
    fn test_rejects_malformed_operations() {
        assert!(Operations::from_json_str(r#"[[[7,"a"]],{}]"#).is_err());
        assert!(Operations::from_json_str(r#"[[[1]],{}]"#).is_err());
        assert!(Operations::from_json_str(r#"[[[1,"a",5]],{}]"#).is_err());
    }

    #[test]
    fn test_empty_operations() {
        let ops = Operations::default();
        assert!(ops.is_empty());
        assert_eq!(ops.to_json_string().unwrap(), "[[],{}]");
    }
}
