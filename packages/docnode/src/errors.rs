//! Error types for the document engine

use crate::id_generator::NodeId;
use thiserror::Error;

pub type DocResult<T> = Result<T, DocError>;

/// Error returned by user listener code (change and normalize listeners).
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad class of a [`DocError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Registration or deserialization against the node-type registry failed
    Schema,
    /// The document was used in the wrong lifecycle stage
    Lifecycle,
    /// A tree primitive was called with arguments that would corrupt the tree
    Structural,
    /// JSON encoding/decoding failed
    Codec,
    /// A change or normalize listener failed
    Listener,
}

#[derive(Error, Debug)]
pub enum DocError {
    // Schema errors
    #[error("Collision error: node type '{node_type}' registers state '{field}' twice")]
    StateCollision { node_type: String, field: String },

    #[error("Node definition does not have a type")]
    MissingType,

    #[error("Node type '{0}' is not registered")]
    UnregisteredType(String),

    #[error("Node type '{node_type}' has no registered state '{field}'")]
    UnregisteredState { node_type: String, field: String },

    #[error("State '{field}' of node type '{node_type}' does not hold the requested value type")]
    StateTypeMismatch { node_type: String, field: String },

    #[error("The root of a serialized document must have type 'root', found '{0}'")]
    InvalidRoot(String),

    #[error("Node type '{0}' is reserved")]
    ReservedType(String),

    // Lifecycle errors
    #[error("You can't trigger an update inside a {0} event")]
    UpdateDuringStage(&'static str),

    #[error("Strict mode has caught an error: normalize listeners are not idempotent. They should not mutate the document on the second pass")]
    NonIdempotentNormalize,

    #[error("You can't register a change event listener inside a transaction or another change event")]
    ChangeListenerStage,

    #[error("You can't register a normalize event listener outside the register callback of an extension")]
    NormalizeListenerStage,

    #[error("You can't commit during the {0} stage")]
    CommitDuringStage(&'static str),

    #[error("Cannot serialize a document during an active transaction. Use the unsafe option for debugging")]
    SerializeDuringTransaction,

    #[error("getPrev can only be used on nodes in diff.updated; '{0}' is not")]
    PrevUnavailable(NodeId),

    // Structural errors
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node '{end}' is not a later sibling of '{start}'")]
    InvalidRange { start: NodeId, end: NodeId },

    #[error("Target is in the range")]
    TargetInRange,

    #[error("Target is descendant of the range")]
    TargetDescendsFromRange,

    #[error("Node '{0}' cannot be inserted because it already exists in the doc")]
    DuplicateId(NodeId),

    #[error("Node '{0}' is from a different doc")]
    ForeignNode(NodeId),

    #[error("Node '{0}' cannot be inserted inside its own subtree")]
    InsertIntoSelf(NodeId),

    #[error("You cannot insert nodes of type 'root'")]
    RootInsert,

    #[error("Root node cannot be deleted")]
    RootDelete,

    #[error("Root node cannot be moved")]
    RootMove,

    #[error("Root node cannot have siblings")]
    RootSiblings,

    #[error("Cannot move a range between an attached and a detached parent")]
    AttachmentMismatch,

    #[error("Node '{0}' has no parent")]
    Orphan(NodeId),

    // Codec errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Listener errors
    #[error("Listener error: {0}")]
    Listener(#[source] ListenerError),
}

impl DocError {
    pub fn kind(&self) -> ErrorKind {
        use DocError::*;
        match self {
            StateCollision { .. }
            | MissingType
            | UnregisteredType(_)
            | UnregisteredState { .. }
            | StateTypeMismatch { .. }
            | InvalidRoot(_)
            | ReservedType(_) => ErrorKind::Schema,
            UpdateDuringStage(_)
            | NonIdempotentNormalize
            | ChangeListenerStage
            | NormalizeListenerStage
            | CommitDuringStage(_)
            | SerializeDuringTransaction
            | PrevUnavailable(_) => ErrorKind::Lifecycle,
            NodeNotFound(_)
            | InvalidRange { .. }
            | TargetInRange
            | TargetDescendsFromRange
            | DuplicateId(_)
            | ForeignNode(_)
            | InsertIntoSelf(_)
            | RootInsert
            | RootDelete
            | RootMove
            | RootSiblings
            | AttachmentMismatch
            | Orphan(_) => ErrorKind::Structural,
            Json(_) => ErrorKind::Codec,
            Listener(_) => ErrorKind::Listener,
        }
    }

    /// Wrap an arbitrary listener failure.
    pub fn listener(error: impl Into<ListenerError>) -> Self {
        DocError::Listener(error.into())
    }
}
