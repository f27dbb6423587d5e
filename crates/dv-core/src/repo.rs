//! The repository tree
//!
//! [`RepoTree`] owns every item and implements the operations a tree view
//! drives: fetching children on expansion, opening and closing items, and
//! finalizing branches before they are removed. Closing an item discards its
//! children, since they may borrow the handle being released.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::array::{ArrayValue, IndexElem};
use crate::config::RepoConfig;
use crate::error::{RtiError, TreeError};
use crate::events::{RepoEvent, RepoSubscriber, SubscriberList};
use crate::filesystem::create_rti_from_file_name;
use crate::memory::create_from_value;
use crate::registry::Registry;
use crate::rti::RepoTreeItem;
use crate::tree::{NodeId, Tree};
use crate::value::Value;

/// Adapter of the root node, which is never shown
struct InvisibleRoot;

impl Adapter for InvisibleRoot {
    fn type_name(&self) -> &str {
        "Invisible Root"
    }
}

/// Tree of repository items under an invisible root
pub struct RepoTree {
    tree: Tree<RepoTreeItem>,
    root: NodeId,
    registry: Arc<Registry>,
    config: RepoConfig,
    subscribers: SubscriberList,
}

impl RepoTree {
    /// Create an empty tree that resolves files with `registry`
    pub fn new(registry: Arc<Registry>, config: RepoConfig) -> Self {
        let mut tree = Tree::new();
        let root = tree.add(RepoTreeItem::invisible_root(InvisibleRoot));
        Self {
            tree,
            root,
            registry,
            config,
            subscribers: SubscriberList::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Number of items, not counting the invisible root
    pub fn len(&self) -> usize {
        self.tree.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a view to be told about structural changes
    pub fn subscribe(&self, subscriber: &Arc<dyn RepoSubscriber>) {
        self.subscribers.subscribe(subscriber);
    }

    pub fn item(&self, id: NodeId) -> Result<&RepoTreeItem, RtiError> {
        Ok(self.tree.get(id)?)
    }

    fn item_mut(&mut self, id: NodeId) -> Result<&mut RepoTreeItem, RtiError> {
        Ok(self.tree.get_mut(id)?)
    }

    fn check_not_root(&self, id: NodeId) -> Result<(), RtiError> {
        if id == self.root {
            return Err(TreeError::RootNotAllowed.into());
        }
        Ok(())
    }

    /// Add an item without a parent
    pub fn add_detached(&mut self, item: RepoTreeItem) -> NodeId {
        self.tree.add(item)
    }

    /// Attach a detached node under `parent`, appending when `position` is `None`
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        position: Option<usize>,
    ) -> Result<(), RtiError> {
        self.tree.insert_child(parent, child, position)?;
        self.subscribers.publish(&RepoEvent::ItemInserted { parent, node: child });
        Ok(())
    }

    /// Add `item` under `parent`
    pub fn insert_item(
        &mut self,
        parent: NodeId,
        item: RepoTreeItem,
        position: Option<usize>,
    ) -> Result<NodeId, RtiError> {
        self.tree.get(parent)?;
        let child = self.tree.add(item);
        self.insert_child(parent, child, position)?;
        Ok(child)
    }

    /// Add a top-level item for the file or directory at `path`
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<NodeId, RtiError> {
        let path = path.as_ref();
        let item = create_rti_from_file_name(&self.registry, path);
        info!("Loading {} as {}", path.display(), item.type_name());
        self.insert_item(self.root, item, None)
    }

    /// Add a top-level item over an in-memory value
    pub fn load_value(&mut self, name: &str, value: Value) -> Result<NodeId, RtiError> {
        self.insert_item(self.root, create_from_value(name, value), None)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, RtiError> {
        Ok(self.tree.parent(id)?)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], RtiError> {
        Ok(self.tree.children(id)?)
    }

    pub fn child_count(&self, id: NodeId) -> Result<usize, RtiError> {
        Ok(self.tree.child_count(id)?)
    }

    pub fn child(&self, id: NodeId, row: usize) -> Result<NodeId, RtiError> {
        Ok(self.tree.child(id, row)?)
    }

    pub fn child_index_in_parent(&self, id: NodeId) -> Result<Option<usize>, RtiError> {
        Ok(self.tree.child_index_in_parent(id)?)
    }

    /// `/`-joined names from the root down; the root itself has an empty path
    pub fn node_path(&self, id: NodeId) -> Result<String, RtiError> {
        let mut path = String::new();
        let mut nodes = self.tree.ancestors(id)?;
        nodes.reverse();
        nodes.push(id);
        for node in nodes.into_iter().filter(|node| *node != self.root) {
            path.push('/');
            path.push_str(self.item(node)?.node_name());
        }
        Ok(path)
    }

    /// First child of `parent` called `name`
    pub fn child_by_node_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.tree.children(parent).ok()?.iter().copied().find(|child| {
            self.tree
                .get(*child)
                .map(|item| item.node_name() == name)
                .unwrap_or(false)
        })
    }

    /// Resolve a path such as `/data.h5/group/dataset` among already fetched
    /// items. Never triggers a fetch.
    pub fn find_by_node_path(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self.root, |node, name| self.child_by_node_name(node, name))
    }

    /// Whether the view should draw an expander for `id`
    pub fn has_children(&self, id: NodeId) -> Result<bool, RtiError> {
        let item = self.item(id)?;
        Ok(item.has_children() && (item.can_fetch_children() || self.tree.child_count(id)? > 0))
    }

    pub fn can_fetch_children(&self, id: NodeId) -> Result<bool, RtiError> {
        Ok(self.item(id)?.can_fetch_children())
    }

    /// Materialize the children of `id`, opening it if needed.
    ///
    /// The adapter builds the complete list before anything is inserted, so a
    /// failing fetch leaves no partial children behind.
    pub fn fetch_children(&mut self, id: NodeId) -> Result<Vec<NodeId>, RtiError> {
        let policy = self.config.error_policy;
        let registry = Arc::clone(&self.registry);
        let items = self.item_mut(id)?.fetch_children(&registry, policy)?;

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let child = self.tree.add(item);
            self.tree.insert_child(id, child, None)?;
            ids.push(child);
        }
        debug!("Fetched {} children of {}", ids.len(), self.node_path(id)?);
        self.subscribers.publish(&RepoEvent::ChildrenFetched { parent: id, count: ids.len() });
        Ok(ids)
    }

    /// Open `id`. Reopening an open item first discards its children.
    pub fn open(&mut self, id: NodeId) -> Result<(), RtiError> {
        self.check_not_root(id)?;
        let mut first_error = None;
        if self.item(id)?.is_open() {
            warn!("Reopening {}", self.node_path(id)?);
            first_error = self.remove_all_children(id).err();
        }
        let policy = self.config.error_policy;
        let result = self.item_mut(id)?.open(policy);
        self.subscribers.publish(&RepoEvent::Opened { node: id });
        result?;
        first_error.map_or(Ok(()), Err)
    }

    /// Close `id` after finalizing and removing its children
    pub fn close(&mut self, id: NodeId) -> Result<(), RtiError> {
        self.check_not_root(id)?;
        let children_result = self.remove_all_children(id);
        let policy = self.config.error_policy;
        let result = self.item_mut(id)?.close(policy);
        self.subscribers.publish(&RepoEvent::Closed { node: id });
        children_result.and(result)
    }

    /// Close `id` and every descendant, children before parents.
    ///
    /// All nodes are closed even when some fail; the first failure is
    /// returned under the strict policy. Safe to call repeatedly.
    pub fn finalize(&mut self, id: NodeId) -> Result<(), RtiError> {
        let policy = self.config.error_policy;
        let mut first_error = None;
        for node in self.tree.post_order(id)? {
            if let Err(e) = self.item_mut(node)?.close(policy) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Finalize and remove the child at `position`
    pub fn remove_child(&mut self, parent: NodeId, position: usize) -> Result<(), RtiError> {
        let child = self.tree.child(parent, position)?;
        let result = self.finalize(child);
        self.tree.remove_subtree(child)?;
        self.subscribers.publish(&RepoEvent::ChildrenRemoved { parent, count: 1 });
        result
    }

    /// Finalize and remove every child of `id`; the children can then be fetched again
    pub fn remove_all_children(&mut self, id: NodeId) -> Result<(), RtiError> {
        let children = self.tree.children(id)?.to_vec();
        let mut first_error = None;
        for child in &children {
            if let Err(e) = self.finalize(*child) {
                first_error.get_or_insert(e);
            }
            self.tree.remove_subtree(*child)?;
        }
        if id != self.root {
            self.item_mut(id)?.reset_fetched();
        }
        if !children.is_empty() {
            self.subscribers.publish(&RepoEvent::ChildrenRemoved {
                parent: id,
                count: children.len(),
            });
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn get_item(&self, id: NodeId, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        self.item(id)?.get_item(index)
    }

    /// Quick look text limited by the configured element count
    pub fn quick_look(&self, id: NodeId, width: usize) -> Result<String, RtiError> {
        Ok(self
            .item(id)?
            .quick_look(width, self.config.quick_look_max_elements))
    }

    /// Fetch children recursively, `depth` levels below `id`
    pub fn expand(&mut self, id: NodeId, depth: usize) -> Result<(), RtiError> {
        if depth == 0 {
            return Ok(());
        }
        let item = self.item(id)?;
        if item.has_children() && item.can_fetch_children() {
            self.fetch_children(id)?;
        }
        for child in self.tree.children(id)?.to_vec() {
            self.expand(child, depth - 1)?;
        }
        Ok(())
    }

    /// Nodes below `id` in display order with their depth, `id` excluded
    pub fn walk(&self, id: NodeId) -> Result<Vec<(NodeId, usize)>, RtiError> {
        let mut result = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = self
            .tree
            .children(id)?
            .iter()
            .rev()
            .map(|child| (*child, 0))
            .collect();
        while let Some((node, depth)) = stack.pop() {
            result.push((node, depth));
            for child in self.tree.children(node)?.iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        Ok(result)
    }
}

impl Drop for RepoTree {
    fn drop(&mut self) {
        if let Err(e) = self.finalize(self.root) {
            warn!("Finalizing the repository tree failed: {}", e);
        }
    }
}
