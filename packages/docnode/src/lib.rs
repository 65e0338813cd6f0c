//! # docnode
//!
//! Transactional, typed document tree.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ definitions: node types + state codecs      │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ document: arena of linked nodes             │
//! │  - insert / delete / move / copy / replace  │
//! │  - every edit records forward + inverse ops │
//! └─────────────────────────────────────────────┘
//!                     ↓ commit
//! ┌─────────────────────────────────────────────┐
//! │ normalize listeners (may edit, same tx)     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ change listeners: operations, inverse, diff │
//! │  - undo manager, sync, persistence          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **One writer**: a document is mutated through `&mut`; listeners run
//!    synchronously inside `commit`
//! 2. **Replayable**: operations from one document apply to any document
//!    with the same history, including one restored from JSON
//! 3. **All or nothing**: a failing primitive rolls back the transaction
//! 4. **Ids are stable**: undo restores deleted nodes under their old ids
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docnode::{string, DocConfig, Document, Extension, Field, NodeDefinition};
//!
//! let value = Field::new("value", string(""));
//! let text = NodeDefinition::new("text").with_state(&value);
//! let mut doc = Document::new(DocConfig::new([Extension::new().with_nodes([text.clone()])]))?;
//!
//! doc.on_change(|_, event| {
//!     println!("{}", event.operations.to_json_string()?);
//!     Ok(())
//! })?;
//!
//! let node = doc.create_node(&text)?;
//! doc.set(&node, &value, "hello".to_string())?;
//! doc.append(&doc.root().clone(), &[node])?;
//! doc.commit()?;
//! ```

mod definition;
mod diff;
mod document;
mod errors;
mod id_generator;
mod json;
mod mutations;
mod node;
mod normalize;
mod operations;
mod state;
mod transaction;
mod traversal;
mod undo_manager;

pub use definition::{DocConfig, Extension, NodeDefinition, RegisterFn, ROOT_TYPE};
pub use diff::{ChangeEvent, Diff};
pub use document::{ChangeListener, Document, ListenerId, NormalizeListener};
pub use errors::{DocError, DocResult, ErrorKind, ListenerError};
pub use id_generator::{compare_ids, IdGenerator, NodeId};
pub use json::JsonDoc;
pub use mutations::RangeMut;
pub use node::{Node, Position};
pub use normalize::{Normalizer, RequireChild};
pub use operations::{Operation, Operations, StatePatch};
pub use state::{
    boolean, define_state, define_state_with, json, number, string, BooleanState, CustomState,
    Field, JsonState, NumberState, State, StateCodec, StateMut, StateValue, StringState,
};
pub use transaction::Stage;
pub use traversal::{Axis, Traversal, TraversalIter, TraversalOptions};
pub use undo_manager::{UndoManager, UndoOptions};
