//! Adapter traits that bind a tree item to one backing format
//!
//! A [`RepoTreeItem`](crate::RepoTreeItem) drives the lifecycle; the adapter only
//! supplies the hooks. Hooks report failures as `Err` and the item decides what
//! to store, log and propagate.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::array::{ArrayValue, IndexElem};
use crate::error::RtiError;
use crate::registry::Registry;
use crate::rti::RepoTreeItem;
use crate::value::Value;

/// Glyph hint for the tree view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IconGlyph {
    Folder,
    File,
    Group,
    Array,
    Field,
    Scalar,
    Dimension,
    Sequence,
    Unknown,
}

/// Context handed to [`Adapter::fetch_all_children`]
pub struct FetchContext<'a> {
    pub node_name: &'a str,
    pub file_name: Option<&'a Path>,
    /// Children usually inherit the parent's color
    pub icon_color: &'a str,
    pub registry: &'a Registry,
}

/// Format-specific behavior of a tree item
pub trait Adapter {
    /// Short description such as "HDF-5 group"
    fn type_name(&self) -> &str;

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Unknown
    }

    /// Whether this kind of item can have children at all
    fn has_children(&self) -> bool {
        true
    }

    /// Acquire the underlying resource
    fn open_resources(&mut self) -> Result<(), RtiError> {
        Ok(())
    }

    /// Release the underlying resource
    fn close_resources(&mut self) -> Result<(), RtiError> {
        Ok(())
    }

    /// Whether an underlying resource is currently held
    fn holds_resource(&self) -> bool {
        false
    }

    /// Build all children. Called at most once per fetch, and only while open.
    fn fetch_all_children(&self, _ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(Vec::new())
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// Array access, available only while the data can be indexed
    fn sliceable(&self) -> Option<&dyn Sliceable> {
        None
    }

    /// One line summary; defaults to the shape of sliceable data
    fn summary(&self) -> String {
        self.sliceable()
            .map(|data| crate::array::shape_summary(&data.shape()))
            .unwrap_or_default()
    }

    /// Short text rendering of the data for a panel `width` characters wide
    fn quick_look(&self, _width: usize) -> String {
        String::new()
    }
}

/// Array-style access to an item's data
pub trait Sliceable {
    fn shape(&self) -> Vec<usize>;

    /// Apply an index expression. Index errors describe caller misuse.
    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError>;

    fn element_type_name(&self) -> String;

    fn dimension_names(&self) -> Vec<String> {
        default_dimension_names(self.shape().len())
    }

    fn unit(&self) -> String {
        String::new()
    }

    fn missing_data_value(&self) -> Option<Value> {
        None
    }
}

/// `dim-0`, `dim-1`, ...
pub fn default_dimension_names(ndim: usize) -> Vec<String> {
    (0..ndim).map(|n| format!("dim-{n}")).collect()
}

/// Sliceable data that is an in-memory array
impl Sliceable for ArrayValue {
    fn shape(&self) -> Vec<usize> {
        ArrayValue::shape(self).to_vec()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(ArrayValue::get_item(self, index)?)
    }

    fn element_type_name(&self) -> String {
        ArrayValue::element_type_name(self).to_string()
    }
}

/// A handle owned by a file-root adapter and shared with its children.
///
/// Children hold clones of the `Arc` so they can keep reading while the tree
/// shows them; closing the owner releases its clone and the tree discards the
/// children, which drops the rest.
pub struct OwnedHandle<H> {
    handle: Option<Arc<H>>,
}

impl<H> OwnedHandle<H> {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Store a freshly opened handle, replacing any stale one
    pub fn acquire(&mut self, handle: H) -> Arc<H> {
        let handle = Arc::new(handle);
        self.handle = Some(Arc::clone(&handle));
        handle
    }

    pub fn release(&mut self) -> Option<Arc<H>> {
        self.handle.take()
    }

    pub fn get(&self) -> Option<&Arc<H>> {
        self.handle.as_ref()
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// The handle, or `NotOpen` naming `what`
    pub fn require(&self, what: &str) -> Result<&Arc<H>, RtiError> {
        self.handle
            .as_ref()
            .ok_or_else(|| RtiError::NotOpen(what.to_string()))
    }
}

impl<H> Default for OwnedHandle<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_handle_lifecycle() {
        let mut handle = OwnedHandle::new();
        assert!(!handle.is_held());
        assert!(matches!(handle.require("file"), Err(RtiError::NotOpen(_))));

        let shared = handle.acquire(42u32);
        assert!(handle.is_held());
        assert_eq!(Arc::strong_count(&shared), 2);

        assert!(handle.release().is_some());
        assert!(!handle.is_held());
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn test_default_dimension_names() {
        assert_eq!(default_dimension_names(2), vec!["dim-0", "dim-1"]);
        assert!(default_dimension_names(0).is_empty());
    }
}
