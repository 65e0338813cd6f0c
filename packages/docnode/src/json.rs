//! JSON projection of a document.
//!
//! Each node is `[id, type, {field: "<stringified JSON>"}]`, followed by a
//! list of children when it has any. Fields at their default are omitted.

use crate::definition::{DocConfig, ROOT_TYPE};
use crate::document::Document;
use crate::errors::{DocError, DocResult};
use crate::id_generator::{root_created_at, IdGenerator, NodeId};
use crate::node::Node;
use crate::transaction::Stage;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonDoc {
    pub id: NodeId,
    pub node_type: String,
    pub state: BTreeMap<String, String>,
    pub children: Vec<JsonDoc>,
}

impl Serialize for JsonDoc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.children.is_empty() { 3 } else { 4 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.id)?;
        seq.serialize_element(&self.node_type)?;
        seq.serialize_element(&self.state)?;
        if !self.children.is_empty() {
            seq.serialize_element(&self.children)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for JsonDoc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct JsonDocVisitor;

        impl<'de> Visitor<'de> for JsonDocVisitor {
            type Value = JsonDoc;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a node array [id, type, state, children?]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JsonDoc, A::Error> {
                let id = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let node_type = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let state = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let children = seq.next_element()?.unwrap_or_default();
                Ok(JsonDoc {
                    id,
                    node_type,
                    state,
                    children,
                })
            }
        }

        deserializer.deserialize_seq(JsonDocVisitor)
    }
}

impl Document {
    /// Project the attached tree. Fails while a transaction is open.
    pub fn to_json(&self) -> DocResult<JsonDoc> {
        if !matches!(self.stage, Stage::Idle | Stage::Change) {
            return Err(DocError::SerializeDuringTransaction);
        }
        self.to_json_unsafe()
    }

    /// Project the tree in any stage, including mid-transaction states
    pub fn to_json_unsafe(&self) -> DocResult<JsonDoc> {
        self.node_to_json(&self.root)
    }

    fn node_to_json(&self, id: &NodeId) -> DocResult<JsonDoc> {
        let children = self
            .child_ids(id)
            .iter()
            .map(|child| self.node_to_json(child))
            .collect::<DocResult<Vec<_>>>()?;
        Ok(JsonDoc {
            id: id.clone(),
            node_type: self.node_type_of(id)?.to_string(),
            state: self.encode_state(id)?,
            children,
        })
    }

    /// Rebuild a document from its projection without recording anything.
    ///
    /// The root must be of type `root`; unknown types and fields are errors.
    pub fn from_json(config: DocConfig, json: &JsonDoc) -> DocResult<Self> {
        if json.node_type != ROOT_TYPE {
            return Err(DocError::InvalidRoot(json.node_type.clone()));
        }
        let mut doc = Document::new(config)?;

        let placeholder = doc.root.clone();
        doc.nodes.remove(&placeholder);
        doc.attached.remove(&placeholder);

        let root = doc.build_node(json)?;
        doc.root = root.id().clone();
        doc.attached.insert(doc.root.clone());
        doc.nodes.insert(doc.root.clone(), root);
        let root_id = doc.root.clone();
        for child in &json.children {
            doc.build_subtree(&root_id, child)?;
        }
        doc.ids = IdGenerator::new(root_created_at(&doc.root));

        debug!(root = %doc.root, nodes = doc.size(), "Document loaded");
        Ok(doc)
    }

    fn build_subtree(&mut self, parent: &NodeId, json: &JsonDoc) -> DocResult<()> {
        if json.node_type == ROOT_TYPE {
            return Err(DocError::RootInsert);
        }
        if self.nodes.contains_key(&json.id) {
            return Err(DocError::DuplicateId(json.id.clone()));
        }
        let node = self.build_node(json)?;
        self.insert_silently(parent, node);
        for child in &json.children {
            self.build_subtree(&json.id, child)?;
        }
        Ok(())
    }

    fn build_node(&self, json: &JsonDoc) -> DocResult<Node> {
        self.registry.ensure_type(&json.node_type)?;
        let mut node = Node::new(json.id.clone(), json.node_type.clone());
        node.state = self.decode_state(&json.node_type, &json.state)?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leaf_has_no_children_slot() {
        let leaf = JsonDoc {
            id: NodeId::from("a"),
            node_type: "text".to_string(),
            state: BTreeMap::from([("value".to_string(), "\"x\"".to_string())]),
            children: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&leaf).unwrap(),
            json!(["a", "text", {"value": "\"x\""}])
        );
    }

    #[test]
    fn test_parse_nested() {
        let doc: JsonDoc =
            serde_json::from_str(r#"["r","root",{},[["a","text",{}],["b","text",{},[["c","text",{}]]]]]"#)
                .unwrap();
        assert_eq!(doc.children.len(), 2);
        assert_eq!(doc.children[1].children[0].id, NodeId::from("c"));
        assert!(serde_json::from_str::<JsonDoc>(r#"["r"]"#).is_err());
    }
}
