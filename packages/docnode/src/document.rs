//! # Document
//!
//! The document owns every node it has ever created in an arena keyed by id.
//! Attached nodes (the root and everything reachable from it) are also kept
//! in an index; detached nodes stay in the arena so deleted nodes can still
//! be read and so replayed inserts can reuse their ids.

use crate::definition::{DocConfig, NodeDefinition, Registry, ROOT_TYPE};
use crate::diff::{ChangeEvent, Diff};
use crate::errors::{DocError, DocResult};
use crate::id_generator::{new_root_id, root_created_at, IdGenerator, NodeId};
use crate::node::{Link, Node};
use crate::normalize::Normalizer;
use crate::operations::Operations;
use crate::state::{type_mismatch, Field, StateCodec, State, StateMut, StateValue};
use crate::transaction::Stage;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

pub type ChangeListener = Box<dyn FnMut(&Document, &ChangeEvent) -> DocResult<()>>;
pub type NormalizeListener = Box<dyn FnMut(&mut Document, &Diff) -> DocResult<()>>;

/// Handle returned by [`Document::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct Document {
    pub(crate) registry: Registry,
    pub(crate) strict_mode: bool,
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) attached: HashSet<NodeId>,
    pub(crate) root: NodeId,
    pub(crate) stage: Stage,
    pub(crate) operations: Operations,
    pub(crate) inverse_operations: Operations,
    pub(crate) diff: Diff,
    /// Nodes deleted and inserted again within the open transaction
    pub(crate) reinserted: HashSet<NodeId>,
    pub(crate) ids: IdGenerator,
    pub(crate) change_listeners: Vec<(ListenerId, ChangeListener)>,
    pub(crate) normalize_listeners: Vec<NormalizeListener>,
    pub(crate) commit_scheduler: Option<Box<dyn FnMut()>>,
    next_listener_id: u64,
}

impl Document {
    /// Build a document with an empty root and run each extension's
    /// register hooks.
    pub fn new(config: DocConfig) -> DocResult<Self> {
        let registry = Registry::build(config.extensions.iter().flat_map(|ext| ext.nodes()))?;
        let root = new_root_id();
        let ids = IdGenerator::new(root_created_at(&root));

        let mut doc = Document {
            registry,
            strict_mode: config.strict_mode,
            nodes: HashMap::new(),
            attached: HashSet::new(),
            root: root.clone(),
            stage: Stage::Init,
            operations: Operations::default(),
            inverse_operations: Operations::default(),
            diff: Diff::default(),
            reinserted: HashSet::new(),
            ids,
            change_listeners: Vec::new(),
            normalize_listeners: Vec::new(),
            commit_scheduler: None,
            next_listener_id: 0,
        };
        doc.nodes.insert(root.clone(), Node::new(root.clone(), ROOT_TYPE));
        doc.attached.insert(root.clone());

        for extension in &config.extensions {
            for register in extension.register_hooks() {
                register(&mut doc)?;
            }
        }
        doc.stage = Stage::Idle;

        debug!(root = %root, "Document created");
        Ok(doc)
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    /// Any node this document created, attached or not
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// An attached node
    pub fn get_node_by_id(&self, id: &NodeId) -> Option<&Node> {
        if self.is_attached(id) {
            self.nodes.get(id)
        } else {
            None
        }
    }

    /// Nodes held in the arena, attached or not. See [`Document::gc`].
    pub fn arena_size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_attached(&self, id: &NodeId) -> bool {
        self.attached.contains(id)
    }

    /// Number of attached nodes, root included
    pub fn size(&self) -> usize {
        self.attached.len()
    }

    pub fn is(&self, id: &NodeId, definition: &NodeDefinition) -> bool {
        self.nodes
            .get(id)
            .map_or(false, |node| node.node_type() == definition.node_type())
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.registry.types()
    }

    /// Create a detached node with default state
    pub fn create_node(&mut self, definition: &NodeDefinition) -> DocResult<NodeId> {
        self.create_node_of_type(definition.node_type())
    }

    pub(crate) fn create_node_of_type(&mut self, node_type: &str) -> DocResult<NodeId> {
        if node_type == ROOT_TYPE {
            return Err(DocError::RootInsert);
        }
        self.registry.ensure_type(node_type)?;
        let id = self.ids.new_id();
        self.nodes.insert(id.clone(), Node::new(id.clone(), node_type));
        Ok(id)
    }

    /// Get or recycle the arena slot for a replayed insert
    pub(crate) fn spawn_node(&mut self, id: &NodeId, node_type: &str) -> DocResult<NodeId> {
        self.registry.ensure_type(node_type)?;
        if node_type == ROOT_TYPE {
            return Err(DocError::RootInsert);
        }
        if self.nodes.contains_key(id) {
            self.unlink_stale(id);
        }
        match self.nodes.get_mut(id) {
            Some(node) => node.reset(node_type),
            None => {
                self.nodes.insert(id.clone(), Node::new(id.clone(), node_type));
            }
        }
        Ok(id.clone())
    }

    // ── State ──────────────────────────────────────────────────────────────

    pub fn get<C: StateCodec>(&self, id: &NodeId, field: &Field<C>) -> DocResult<&C::Value> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))?;
        let resolved = self.registry.field(node.node_type(), field.name())?;
        let value = node
            .state
            .get(field.name())
            .map_or(resolved.default.as_ref(), |value| value.as_ref());
        value
            .as_any()
            .downcast_ref::<C::Value>()
            .ok_or_else(|| type_mismatch(node.node_type(), field.name()))
    }

    /// Value of a field as it was when the transaction started.
    ///
    /// Only valid for nodes in `diff.updated`. The flag is `false` when this
    /// field did not change (the current value is returned).
    pub fn get_prev<C: StateCodec>(&self, id: &NodeId, field: &Field<C>) -> DocResult<(bool, C::Value)> {
        if !self.diff.updated.contains(id) {
            return Err(DocError::PrevUnavailable(id.clone()));
        }
        let recorded = self
            .inverse_operations
            .state_patch
            .get(id)
            .and_then(|fields| fields.get(field.name()));
        match recorded {
            Some(encoded) => {
                let json: serde_json::Value = serde_json::from_str(encoded)?;
                Ok((true, field.codec().from_json(Some(&json))))
            }
            None => Ok((false, self.get(id, field)?.clone())),
        }
    }

    pub fn set<C: StateCodec>(&mut self, id: &NodeId, field: &Field<C>, value: C::Value) -> DocResult<()> {
        self.with_transaction(|doc| doc.write_state(id, field.name(), Box::new(value)))
    }

    pub fn update<C: StateCodec>(
        &mut self,
        id: &NodeId,
        field: &Field<C>,
        f: impl FnOnce(&C::Value) -> C::Value,
    ) -> DocResult<()> {
        self.with_transaction(|doc| {
            let value = f(doc.get(id, field)?);
            doc.write_state(id, field.name(), Box::new(value))
        })
    }

    pub fn state<'a, C: StateCodec>(&'a self, id: &NodeId, field: &'a Field<C>) -> State<'a, C> {
        State::new(self, id.clone(), field)
    }

    pub fn state_mut<'a, C: StateCodec>(&'a mut self, id: &NodeId, field: &'a Field<C>) -> StateMut<'a, C> {
        StateMut::new(self, id.clone(), field)
    }

    /// Set one field, recording it if the node is attached. Equal values
    /// are a no-op.
    pub(crate) fn write_state(&mut self, id: &NodeId, key: &str, value: Box<dyn StateValue>) -> DocResult<()> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))?;
        let resolved = self.registry.field(node.node_type(), key)?;
        if resolved.codec.value_type() != value.value_type() {
            return Err(type_mismatch(node.node_type(), key));
        }
        let current = node
            .state
            .get(key)
            .map_or(resolved.default.as_ref(), |current| current.as_ref());
        if current.eq_value(value.as_ref()) {
            return Ok(());
        }

        let attached = self.is_attached(id);
        if attached {
            self.record_state_inverse(id, key)?;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.state.insert(key.to_string(), value);
        }
        if attached {
            self.record_state(id, key)?;
        }
        Ok(())
    }

    /// Stringified JSON of one field; defaults included
    pub(crate) fn encode_field(&self, id: &NodeId, key: &str) -> DocResult<String> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))?;
        match node.state.get(key) {
            Some(value) => self.registry.encode(node.node_type(), key, value.as_ref()),
            None => self.default_encoded(id, key),
        }
    }

    pub(crate) fn default_encoded(&self, id: &NodeId, key: &str) -> DocResult<String> {
        let node_type = self.node_type_of(id)?;
        Ok(self.registry.field(node_type, key)?.default_encoded.clone())
    }

    /// Stringified JSON of every field holding a non-default value
    pub(crate) fn encode_state(&self, id: &NodeId) -> DocResult<BTreeMap<String, String>> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))?;
        let mut encoded = BTreeMap::new();
        for (key, value) in &node.state {
            let field = self.registry.field(node.node_type(), key)?;
            let value = self.registry.encode(node.node_type(), key, value.as_ref())?;
            if value != field.default_encoded {
                encoded.insert(key.clone(), value);
            }
        }
        Ok(encoded)
    }

    /// Decode stringified JSON state. Values that decode to the default are
    /// not stored.
    pub(crate) fn decode_state(
        &self,
        node_type: &str,
        encoded: &BTreeMap<String, String>,
    ) -> DocResult<BTreeMap<String, Box<dyn StateValue>>> {
        let mut state = BTreeMap::new();
        for (key, value) in encoded {
            let decoded = self.registry.decode(node_type, key, value)?;
            if !self.registry.field(node_type, key)?.default.eq_value(decoded.as_ref()) {
                state.insert(key.clone(), decoded);
            }
        }
        Ok(state)
    }

    // ── Arena ──────────────────────────────────────────────────────────────

    /// Drop every detached node from the arena and return how many were
    /// removed. Only allowed while idle.
    ///
    /// Deleted nodes and nodes created but never inserted stay readable
    /// through [`Document::node`] until the next `gc`. Undo and replay do not
    /// need them: replayed inserts recreate nodes from their ids and state
    /// patch. Ids of collected nodes can no longer be inserted.
    pub fn gc(&mut self) -> DocResult<usize> {
        if self.stage != Stage::Idle {
            return Err(DocError::UpdateDuringStage(self.stage.name()));
        }
        let before = self.nodes.len();
        let attached = &self.attached;
        self.nodes.retain(|id, _| attached.contains(id));
        let removed = before - self.nodes.len();
        debug!(removed, remaining = self.nodes.len(), "Collected detached nodes");
        Ok(removed)
    }

    // ── Listeners ──────────────────────────────────────────────────────────

    /// Subscribe to committed changes. Not allowed during a transaction.
    pub fn on_change(
        &mut self,
        listener: impl FnMut(&Document, &ChangeEvent) -> DocResult<()> + 'static,
    ) -> DocResult<ListenerId> {
        if !matches!(self.stage, Stage::Idle | Stage::Init) {
            return Err(DocError::ChangeListenerStage);
        }
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.change_listeners.push((id, Box::new(listener)));
        Ok(id)
    }

    pub fn off_change(&mut self, id: ListenerId) -> bool {
        let before = self.change_listeners.len();
        self.change_listeners.retain(|(listener, _)| *listener != id);
        self.change_listeners.len() != before
    }

    /// Register a normalize listener. Only allowed from an extension's
    /// register hook.
    pub fn on_normalize(
        &mut self,
        listener: impl FnMut(&mut Document, &Diff) -> DocResult<()> + 'static,
    ) -> DocResult<()> {
        if self.stage != Stage::Init {
            return Err(DocError::NormalizeListenerStage);
        }
        self.normalize_listeners.push(Box::new(listener));
        Ok(())
    }

    pub fn add_normalizer<N: Normalizer + 'static>(&mut self, mut normalizer: N) -> DocResult<()> {
        self.on_normalize(move |doc, diff| normalizer.normalize(doc, diff))
    }

    /// Called whenever a transaction opens, e.g. to queue a deferred commit
    pub fn set_commit_scheduler(&mut self, scheduler: impl FnMut() + 'static) {
        self.commit_scheduler = Some(Box::new(scheduler));
    }

    // ── Links ──────────────────────────────────────────────────────────────

    pub(crate) fn link(&self, id: &NodeId, link: Link) -> Option<NodeId> {
        self.nodes.get(id).and_then(|node| node.link(link).cloned())
    }

    pub(crate) fn set_link(&mut self, id: &NodeId, link: Link, value: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            *node.link_mut(link) = value;
        }
    }

    pub(crate) fn node_type_of(&self, id: &NodeId) -> DocResult<&str> {
        self.nodes
            .get(id)
            .map(|node| node.node_type())
            .ok_or_else(|| DocError::NodeNotFound(id.clone()))
    }

    /// Walk the attached tree and report every broken link.
    ///
    /// An empty result means: each parent's `first`/`last` bound a chain
    /// whose `prev`/`next` agree, every child points back at its parent, and
    /// the index holds exactly the nodes reachable from the root.
    pub fn check_integrity(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut reachable = HashSet::new();
        let mut stack = vec![self.root.clone()];

        if self.link(&self.root, Link::Parent).is_some() {
            problems.push("root has a parent".to_string());
        }

        while let Some(id) = stack.pop() {
            if !reachable.insert(id.clone()) {
                problems.push(format!("{id} is reachable twice"));
                continue;
            }
            let Some(node) = self.nodes.get(&id) else {
                problems.push(format!("{id} is linked but missing from the arena"));
                continue;
            };

            let mut prev: Option<NodeId> = None;
            let mut child = node.first.clone();
            let mut steps = 0usize;
            while let Some(current) = child {
                steps += 1;
                if steps > self.nodes.len() {
                    problems.push(format!("children of {id} form a cycle"));
                    break;
                }
                let Some(child_node) = self.nodes.get(&current) else {
                    problems.push(format!("{current} is linked but missing from the arena"));
                    break;
                };
                if child_node.parent.as_ref() != Some(&id) {
                    problems.push(format!("{current} does not point back to parent {id}"));
                }
                if child_node.prev != prev {
                    problems.push(format!("{current}.prev does not match its previous sibling"));
                }
                stack.push(current.clone());
                prev = Some(current);
                child = child_node.next.clone();
            }
            if node.last != prev {
                problems.push(format!("{id}.last does not match its last child"));
            }
        }

        for id in &self.attached {
            if !reachable.contains(id) {
                problems.push(format!("{id} is indexed but not reachable from the root"));
            }
        }
        for id in &reachable {
            if !self.attached.contains(id) {
                problems.push(format!("{id} is reachable but not indexed"));
            }
        }
        problems
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("root", &self.root)
            .field("stage", &self.stage)
            .field("size", &self.attached.len())
            .field("arena", &self.nodes.len())
            .finish()
    }
}
