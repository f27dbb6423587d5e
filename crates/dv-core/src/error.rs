//! Error types for the repository tree

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::tree::NodeId;

/// Errors raised by the tree container itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Unknown tree node: {0:?}")]
    UnknownNode(NodeId),

    #[error("Node {0:?} already has a parent")]
    AlreadyHasParent(NodeId),

    #[error("Inserting {0:?} would make it its own ancestor")]
    WouldCreateCycle(NodeId),

    #[error("Child position {position} out of range (child count: {count})")]
    IndexOutOfRange { position: usize, count: usize },

    #[error("Children of '{0}' have already been fetched")]
    ChildrenAlreadyFetched(String),

    #[error("Operation not allowed on the invisible root")]
    RootNotAllowed,
}

/// Errors raised while normalizing or applying an array index
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("index {index} is out of bounds for axis {axis} with size {size}")]
    OutOfBounds { index: isize, axis: usize, size: usize },

    #[error("too many indices: array is {ndim}-dimensional, but {given} were indexed")]
    TooManyIndices { ndim: usize, given: usize },

    #[error("slice step cannot be zero")]
    ZeroStep,

    #[error("an index can only have a single ellipsis")]
    MultipleEllipsis,

    #[error("no field named '{0}'")]
    UnknownField(String),

    #[error("cannot parse index '{0}'")]
    Parse(String),
}

/// Errors stored on, or returned by, repository tree items
#[derive(Error, Debug, Clone)]
pub enum RtiError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Plugin '{plugin}' unavailable: {reason}")]
    PluginUnavailable { plugin: String, reason: String },

    #[error("'{0}' is not sliceable")]
    NotSliceable(String),

    #[error("'{0}' is not open")]
    NotOpen(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Other error: {0}")]
    Other(String),
}

impl RtiError {
    /// Errors that signal caller misuse rather than a data problem.
    /// These propagate regardless of the error policy.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            RtiError::Index(_) | RtiError::Tree(_) | RtiError::NotSliceable(_)
        )
    }
}

impl From<std::io::Error> for RtiError {
    fn from(error: std::io::Error) -> Self {
        RtiError::Io(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_message() {
        let err = RtiError::FileNotFound(PathBuf::from("/no/such/file.h5"));
        assert_eq!(err.to_string(), "File not found: /no/such/file.h5");
    }

    #[test]
    fn test_contract_violations() {
        assert!(RtiError::from(IndexError::ZeroStep).is_contract_violation());
        assert!(RtiError::from(TreeError::RootNotAllowed).is_contract_violation());
        assert!(!RtiError::Format("bad".into()).is_contract_violation());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(!RtiError::from(io).is_contract_violation());
    }
}
