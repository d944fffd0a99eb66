//! Error types for the workflow graph engine.

use crate::provider::ProviderError;

/// Graph shape errors, raised when a graph is built. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("duplicate node name: {name}")]
    DuplicateNode { name: String },

    #[error("entry node {entry} is not registered")]
    MissingEntryNode { entry: String },

    #[error("edge leaves unregistered node {from}")]
    UnknownEdgeSource { from: String },
}

/// Failure of a single node execution.
///
/// Recovered by the node's `on_error` hook when it has one; otherwise it
/// halts the run (never the process).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("node panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

impl From<conclave_state::StorageError> for NodeError {
    fn from(err: conclave_state::StorageError) -> Self {
        NodeError::Storage(err.to_string())
    }
}

/// Result type for graph construction.
pub type GraphResult<T> = std::result::Result<T, GraphError>;
