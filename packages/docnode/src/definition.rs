//! Node type definitions, extensions and the resolved registry.

use crate::errors::{DocError, DocResult};
use crate::normalize::Normalizer;
use crate::state::{ErasedCodec, Field, StateCodec, StateValue};
use crate::Document;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Type tag of the document root
pub const ROOT_TYPE: &str = "root";

/// Declares a node type and the state fields it carries.
///
/// Several definitions may share a type; their fields are merged when the
/// document is built, and a field declared twice for one type is an error.
#[derive(Clone)]
pub struct NodeDefinition {
    node_type: String,
    fields: Vec<(String, Rc<dyn ErasedCodec>)>,
}

impl NodeDefinition {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_state<C: StateCodec>(mut self, field: &Field<C>) -> Self {
        self.fields.push((field.name().to_string(), field.erased()));
        self
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("node_type", &self.node_type)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}

pub type RegisterFn = Rc<dyn Fn(&mut Document) -> DocResult<()>>;

/// A bundle of node definitions plus registration hooks run while the
/// document is being built (the only time normalize listeners may be added).
#[derive(Clone, Default)]
pub struct Extension {
    nodes: Vec<NodeDefinition>,
    register: Vec<RegisterFn>,
}

impl Extension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = NodeDefinition>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn with_register(mut self, register: impl Fn(&mut Document) -> DocResult<()> + 'static) -> Self {
        self.register.push(Rc::new(register));
        self
    }

    /// Register a normalizer with every document built from this extension
    pub fn with_normalizer<N>(self, normalizer: N) -> Self
    where
        N: Normalizer + Clone + 'static,
    {
        self.with_register(move |doc| doc.add_normalizer(normalizer.clone()))
    }

    pub fn nodes(&self) -> &[NodeDefinition] {
        &self.nodes
    }

    pub(crate) fn register_hooks(&self) -> &[RegisterFn] {
        &self.register
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("nodes", &self.nodes)
            .field("register", &self.register.len())
            .finish()
    }
}

/// Document configuration
#[derive(Debug, Clone)]
pub struct DocConfig {
    pub extensions: Vec<Extension>,
    /// Run normalize listeners a second time and fail if they still mutate
    pub strict_mode: bool,
}

impl Default for DocConfig {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            strict_mode: true,
        }
    }
}

impl DocConfig {
    pub fn new(extensions: impl IntoIterator<Item = Extension>) -> Self {
        Self {
            extensions: extensions.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }
}

/// A field resolved for one node type
pub(crate) struct ResolvedField {
    pub codec: Rc<dyn ErasedCodec>,
    pub default: Box<dyn StateValue>,
    pub default_encoded: String,
}

/// Merged, validated set of node types for one document
#[derive(Default)]
pub(crate) struct Registry {
    types: HashMap<String, HashMap<String, ResolvedField>>,
}

impl Registry {
    pub fn build<'a>(definitions: impl IntoIterator<Item = &'a NodeDefinition>) -> DocResult<Self> {
        let mut registry = Registry::default();
        registry.types.insert(ROOT_TYPE.to_string(), HashMap::new());

        for definition in definitions {
            if definition.node_type.is_empty() {
                return Err(DocError::MissingType);
            }
            if definition.node_type == ROOT_TYPE {
                return Err(DocError::ReservedType(ROOT_TYPE.to_string()));
            }
            let fields = registry
                .types
                .entry(definition.node_type.clone())
                .or_default();
            for (name, codec) in &definition.fields {
                if fields.contains_key(name) {
                    return Err(DocError::StateCollision {
                        node_type: definition.node_type.clone(),
                        field: name.clone(),
                    });
                }
                let default = codec.decode(None);
                let default_encoded = encode(codec.as_ref(), default.as_ref())
                    .ok_or_else(|| crate::state::type_mismatch(&definition.node_type, name))??;
                fields.insert(
                    name.clone(),
                    ResolvedField {
                        codec: codec.clone(),
                        default,
                        default_encoded,
                    },
                );
            }
        }
        Ok(registry)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.types.contains_key(node_type)
    }

    pub fn ensure_type(&self, node_type: &str) -> DocResult<()> {
        if self.contains(node_type) {
            Ok(())
        } else {
            Err(DocError::UnregisteredType(node_type.to_string()))
        }
    }

    pub fn field(&self, node_type: &str, name: &str) -> DocResult<&ResolvedField> {
        self.types
            .get(node_type)
            .ok_or_else(|| DocError::UnregisteredType(node_type.to_string()))?
            .get(name)
            .ok_or_else(|| DocError::UnregisteredState {
                node_type: node_type.to_string(),
                field: name.to_string(),
            })
    }

    /// Every field of `node_type` with its encoded default
    pub fn defaults(&self, node_type: &str) -> DocResult<Vec<(String, String)>> {
        let fields = self
            .types
            .get(node_type)
            .ok_or_else(|| DocError::UnregisteredType(node_type.to_string()))?;
        Ok(fields
            .iter()
            .map(|(name, field)| (name.clone(), field.default_encoded.clone()))
            .collect())
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Encode a value of `node_type.name` to its stringified JSON form
    pub fn encode(&self, node_type: &str, name: &str, value: &dyn StateValue) -> DocResult<String> {
        let field = self.field(node_type, name)?;
        encode(field.codec.as_ref(), value).ok_or_else(|| crate::state::type_mismatch(node_type, name))?
    }

    pub fn decode(&self, node_type: &str, name: &str, encoded: &str) -> DocResult<Box<dyn StateValue>> {
        let field = self.field(node_type, name)?;
        let json: Value = serde_json::from_str(encoded)?;
        Ok(field.codec.decode(Some(&json)))
    }
}

fn encode(codec: &dyn ErasedCodec, value: &dyn StateValue) -> Option<DocResult<String>> {
    let json = codec.encode(value)?;
    Some(
        json.and_then(|json| serde_json::to_string(&json))
            .map_err(DocError::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{number, string};

    #[test]
    fn test_definitions_merge_per_type() {
        let a = NodeDefinition::new("text").with_state(&Field::new("value", string("")));
        let b = NodeDefinition::new("text").with_state(&Field::new("size", number(12.0)));
        let registry = Registry::build([&a, &b]).unwrap();

        assert!(registry.field("text", "value").is_ok());
        assert_eq!(registry.field("text", "size").unwrap().default_encoded, "12");
        assert!(registry.contains(ROOT_TYPE));
    }

    #[test]
    fn test_field_collision() {
        let a = NodeDefinition::new("text").with_state(&Field::new("value", string("")));
        let b = NodeDefinition::new("text").with_state(&Field::new("value", string("x")));
        let err = Registry::build([&a, &b]).err().unwrap();
        assert!(matches!(err, DocError::StateCollision { .. }));
    }

    #[test]
    fn test_empty_and_reserved_types() {
        let empty = NodeDefinition::new("");
        assert!(matches!(Registry::build([&empty]), Err(DocError::MissingType)));

        let root = NodeDefinition::new(ROOT_TYPE);
        assert!(matches!(Registry::build([&root]), Err(DocError::ReservedType(_))));
    }

    #[test]
    fn test_unregistered_lookups() {
        let registry = Registry::build(Vec::<&NodeDefinition>::new()).unwrap();
        assert!(matches!(
            registry.field("text", "value"),
            Err(DocError::UnregisteredType(_))
        ));
        assert!(matches!(
            registry.field(ROOT_TYPE, "value"),
            Err(DocError::UnregisteredState { .. })
        ));
    }

    #[test]
    fn test_encode_decode() {
        let def = NodeDefinition::new("text").with_state(&Field::new("value", string("")));
        let registry = Registry::build([&def]).unwrap();
        let encoded = registry.encode("text", "value", &"hi".to_string()).unwrap();
        assert_eq!(encoded, "\"hi\"");
        let decoded = registry.decode("text", "value", &encoded).unwrap();
        assert!(decoded.eq_value(&"hi".to_string()));
        assert!(registry.encode("text", "value", &1.0f64).is_err());
    }
}
