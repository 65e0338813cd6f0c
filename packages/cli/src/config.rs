use anyhow::{bail, Result};
use docnode::{
    boolean, define_state, number, string, DocConfig, Extension, Field, NodeDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_NAME: &str = "docnode.config.json";

/// docnode configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Verify that normalizers are idempotent
    #[serde(default = "default_strict_mode")]
    pub strict_mode: bool,

    /// Node types documents may contain, besides the root
    #[serde(default)]
    pub node_types: Vec<NodeTypeConfig>,
}

fn default_strict_mode() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    /// Type tag, e.g. "paragraph"
    #[serde(rename = "type")]
    pub node_type: String,

    /// State fields by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state: BTreeMap<String, FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub kind: FieldKind,

    /// Value used when the field is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Json,
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(Config::default())
        }
    }

    /// Build the document configuration these node types describe
    pub fn doc_config(&self) -> Result<DocConfig> {
        let mut nodes = Vec::with_capacity(self.node_types.len());
        for node_type in &self.node_types {
            let mut definition = NodeDefinition::new(node_type.node_type.as_str());
            for (name, field) in &node_type.state {
                definition = field.add_to(definition, name)?;
            }
            nodes.push(definition);
        }
        Ok(DocConfig::new([Extension::new().with_nodes(nodes)]).strict_mode(self.strict_mode))
    }
}

impl FieldConfig {
    fn add_to(&self, definition: NodeDefinition, name: &str) -> Result<NodeDefinition> {
        let default = self.default.clone();
        let definition = match (self.kind, default) {
            (FieldKind::String, None) => definition.with_state(&Field::new(name, string(""))),
            (FieldKind::String, Some(Value::String(s))) => {
                definition.with_state(&Field::new(name, string(s)))
            }
            (FieldKind::Number, None) => definition.with_state(&Field::new(name, number(0.0))),
            (FieldKind::Number, Some(Value::Number(n))) => {
                definition.with_state(&Field::new(name, number(n.as_f64().unwrap_or_default())))
            }
            (FieldKind::Boolean, None) => definition.with_state(&Field::new(name, boolean(false))),
            (FieldKind::Boolean, Some(Value::Bool(b))) => {
                definition.with_state(&Field::new(name, boolean(b)))
            }
            (FieldKind::Json, default) => {
                let default = default.unwrap_or(Value::Null);
                let codec = define_state(move |json: Option<&Value>| {
                    json.cloned().unwrap_or_else(|| default.clone())
                });
                definition.with_state(&Field::new(name, codec))
            }
            (kind, Some(default)) => bail!(
                "Default {} does not match kind {:?} of field '{}' on '{}'",
                default,
                kind,
                name,
                definition.node_type()
            ),
        };
        Ok(definition)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_mode: default_strict_mode(),
            node_types: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docnode::Document;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "strictMode": false,
            "nodeTypes": [
                { "type": "paragraph" },
                {
                    "type": "text",
                    "state": {
                        "value": { "kind": "string" },
                        "size": { "kind": "number", "default": 12 },
                        "meta": { "kind": "json", "default": { "tags": [] } }
                    }
                }
            ]
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(!config.strict_mode);
        assert_eq!(config.node_types.len(), 2);
        assert_eq!(config.node_types[1].state["size"].kind, FieldKind::Number);

        let doc = Document::new(config.doc_config().unwrap()).unwrap();
        assert!(!doc.strict_mode());
        let mut types: Vec<&str> = doc.node_types().collect();
        types.sort();
        assert_eq!(types, vec!["paragraph", "root", "text"]);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.strict_mode);
        assert!(config.node_types.is_empty());
        assert!(config.doc_config().is_ok());
    }

    #[test]
    fn test_mismatched_default() {
        let json = r#"{ "nodeTypes": [
            { "type": "text", "state": { "value": { "kind": "string", "default": 1 } } }
        ] }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.doc_config().is_err());
    }
}
