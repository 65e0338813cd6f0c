//! # Normalization
//!
//! Normalizers run after every committed transaction that changed something,
//! before change listeners see it. They may mutate the document to restore
//! invariants the schema alone cannot express; their edits join the same
//! transaction.
//!
//! Normalizers should be:
//! - **Idempotent**: a second pass over a normalized document mutates nothing
//!   (strict mode verifies this)
//! - **Local**: driven by the diff, not by rescanning the whole tree

use crate::definition::NodeDefinition;
use crate::diff::Diff;
use crate::document::Document;
use crate::errors::DocResult;
use tracing::debug;

pub trait Normalizer {
    fn normalize(&mut self, doc: &mut Document, diff: &Diff) -> DocResult<()>;
}

/// Keep the root non-empty by appending a fresh node whenever it loses its
/// last child.
#[derive(Debug, Clone)]
pub struct RequireChild {
    child: NodeDefinition,
}

impl RequireChild {
    pub fn new(child: NodeDefinition) -> Self {
        Self { child }
    }
}

impl Normalizer for RequireChild {
    fn normalize(&mut self, doc: &mut Document, _diff: &Diff) -> DocResult<()> {
        let root = doc.root().clone();
        if doc.children(&root).iter().next().is_some() {
            return Ok(());
        }
        let child = doc.create_node(&self.child)?;
        debug!(child = %child, node_type = self.child.node_type(), "Root emptied, appending child");
        doc.append(&root, &[child])
    }
}
