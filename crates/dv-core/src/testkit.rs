//! Contract checks shared by the tests of every adapter
//!
//! Each check takes a constructor so it can start from a fresh closed item.
//! Checks panic with a descriptive message on violation.

use std::sync::Arc;

use crate::config::{ErrorPolicy, RepoConfig};
use crate::error::{RtiError, TreeError};
use crate::registry::Registry;
use crate::repo::RepoTree;
use crate::rti::RepoTreeItem;

/// Closing twice is harmless and leaves the item closed
pub fn check_close_idempotent(make: &dyn Fn() -> RepoTreeItem) {
    let mut item = make();
    item.open(ErrorPolicy::Lenient).unwrap();
    item.close(ErrorPolicy::Lenient).unwrap();
    item.close(ErrorPolicy::Lenient).unwrap();
    assert!(!item.is_open(), "{} still open after closing twice", item.node_name());
    assert!(!item.holds_resource(), "{} holds a resource after close", item.node_name());
}

/// A successful open sets the flag; close clears it and the handle
pub fn check_open_close_symmetry(make: &dyn Fn() -> RepoTreeItem) {
    let mut item = make();
    assert!(!item.is_open(), "{} starts open", item.node_name());
    item.open(ErrorPolicy::Lenient).unwrap();
    if item.last_error().is_none() {
        assert!(item.is_open(), "{} not open after a clean open", item.node_name());
    } else {
        assert!(!item.is_open(), "{} open despite an error", item.node_name());
    }
    item.close(ErrorPolicy::Lenient).unwrap();
    assert!(!item.is_open());
    assert!(!item.holds_resource(), "{} holds a resource after close", item.node_name());
}

/// Fetching marks the item fetched, successful or not
pub fn check_fetch_marks_fetched(make: &dyn Fn() -> RepoTreeItem, registry: &Registry) {
    let mut item = make();
    assert!(item.can_fetch_children(), "{} cannot fetch before fetching", item.node_name());
    let first = item.fetch_children(registry, ErrorPolicy::Lenient);
    assert!(first.is_ok(), "lenient fetch of {} failed: {:?}", item.node_name(), first.err());
    assert!(!item.can_fetch_children());
    assert!(matches!(
        item.fetch_children(registry, ErrorPolicy::Lenient),
        Err(RtiError::Tree(TreeError::ChildrenAlreadyFetched(_)))
    ));

    for child in first.unwrap_or_default() {
        assert!(!child.is_open(), "child {} created open", child.node_name());
        assert!(!child.node_name().is_empty());
        assert!(!child.node_name().contains('/'), "child name {} has a slash", child.node_name());
    }
}

/// Finalizing a fully expanded subtree closes every node, twice over
pub fn check_finalize_recursive(make: &dyn Fn() -> RepoTreeItem, registry: Arc<Registry>, depth: usize) {
    let mut repo = RepoTree::new(registry, RepoConfig::default());
    let root = repo.root();
    let top = repo.insert_item(root, make(), None).unwrap();
    repo.expand(top, depth).unwrap();

    for _ in 0..2 {
        repo.finalize(top).unwrap();
        let mut nodes: Vec<_> = repo.walk(top).unwrap().into_iter().map(|(node, _)| node).collect();
        nodes.push(top);
        for node in nodes {
            let item = repo.item(node).unwrap();
            assert!(!item.is_open(), "{} open after finalize", item.node_name());
            assert!(!item.holds_resource(), "{} holds a resource after finalize", item.node_name());
        }
    }
}

/// Array access agrees with the shape, and items backed by a resource stop
/// offering it once closed
pub fn check_sliceable_when_open(make: &dyn Fn() -> RepoTreeItem) {
    let mut item = make();
    item.open(ErrorPolicy::Lenient).unwrap();
    let held = item.holds_resource();
    if let Ok(shape) = item.shape() {
        let full = item.get_item(&[]).unwrap();
        assert_eq!(full.shape(), shape.as_slice(), "{} shape mismatch", item.node_name());
        assert_eq!(item.dimension_names().len(), shape.len());
    }
    item.close(ErrorPolicy::Lenient).unwrap();
    if held {
        assert!(!item.is_sliceable(), "{} sliceable while closed", item.node_name());
    }
}

/// Run every check against items built by `make`
pub fn check_adapter_contract(make: &dyn Fn() -> RepoTreeItem, registry: Arc<Registry>) {
    check_close_idempotent(make);
    check_open_close_symmetry(make);
    check_fetch_marks_fetched(make, &registry);
    check_sliceable_when_open(make);
    check_finalize_recursive(make, registry, 4);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{create_directory, create_unknown_file};
    use crate::memory::create_from_value;
    use crate::value::Value;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_memory_contract() {
        let make = || {
            let mut map = BTreeMap::new();
            map.insert("b".to_string(), Value::Int(2));
            map.insert("a".to_string(), Value::Sequence(vec![Value::Float(1.5), Value::Null]));
            create_from_value("config", Value::Mapping(map))
        };
        check_adapter_contract(&make, Arc::new(Registry::new()));
    }

    #[test]
    fn test_filesystem_contract() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("x.bin"), b"x").unwrap();
        let path = dir.path().to_path_buf();

        check_adapter_contract(&|| create_directory(&path), Arc::new(Registry::new()));
        let missing = path.join("missing.bin");
        check_adapter_contract(&|| create_unknown_file(&missing), Arc::new(Registry::new()));
    }
}
