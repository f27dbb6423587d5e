//! Core abstractions of the repository browser
//!
//! This crate provides the lazily populated repository tree, the adapter
//! traits that bind tree items to data formats, the file registry, and the
//! array values items expose.

pub mod adapter;
pub mod array;
pub mod config;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod lazy;
pub mod memory;
pub mod registry;
pub mod repo;
pub mod rti;
pub mod tree;
pub mod value;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

// Re-export commonly used types
pub use adapter::{Adapter, FetchContext, IconGlyph, OwnedHandle, Sliceable};
pub use array::{parse_index, shape_summary, ArrayValue, CompoundArray, IndexElem};
pub use config::{ErrorPolicy, RepoConfig};
pub use error::{IndexError, RtiError, TreeError};
pub use events::{RepoEvent, RepoSubscriber};
pub use registry::{FileFactory, Registry, RegistryEntry};
pub use repo::RepoTree;
pub use rti::{colors, RepoTreeItem};
pub use tree::NodeId;
pub use value::Value;
