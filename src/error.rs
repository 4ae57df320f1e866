use crate::NodeId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TypeError {
    #[error("type {name:?} in module {module:?} could not be resolved")]
    Unresolved { name: String, module: String },
    #[error("type reference is not set")]
    Unset,
}

/// Raised while validating a procedure call against the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BindError {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("no procedure {name:?} on {ty} accepts ({params})")]
    NoMatchingProcedure {
        ty: String,
        name: String,
        params: String,
    },
}

/// Raised by a procedure while it runs.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum InvokeError {
    #[error("expected {expected} arguments, got {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("procedure failed: {0}")]
    Failed(String),
}

/// Configuration errors detected while building a tree, before it is ever ticked.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("the root node {0:?} does not exist")]
    MissingRoot(NodeId),
    #[error("no root node was given")]
    NoRoot,
    #[error("node {0:?} was added twice")]
    DuplicateNode(NodeId),
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("node {0:?} cannot own services because it has no children")]
    NotAFlowNode(NodeId),
    #[error("node {node:?} references {count} children, more than it accepts")]
    TooManyChildren { node: NodeId, count: usize },
    #[error("node {0:?} is referenced as a child by more than one node")]
    MultipleParents(NodeId),
    #[error("node {0:?} is its own ancestor")]
    Cycle(NodeId),
    #[error("failed to bind {node:?}: {source}")]
    Bind {
        node: NodeId,
        #[source]
        source: BindError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid driver configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
}
