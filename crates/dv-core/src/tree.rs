//! Generic ordered tree container
//!
//! Nodes live in an arena and are addressed by generational [`NodeId`]s. A node
//! owns its ordered list of children; the parent link is a plain id, so a child
//! never keeps its parent alive. Freed slots are reused with a bumped generation,
//! which makes stale ids fail lookups instead of aliasing a new node.

use crate::error::TreeError;

/// Handle to a node in a [`Tree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

struct Entry<T> {
    value: T,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

/// Arena-backed ordered tree
pub struct Tree<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Tree<T> {
    /// Create an empty tree
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add a detached node
    pub fn add(&mut self, value: T) -> NodeId {
        let entry = Entry {
            value,
            parent: None,
            children: Vec::new(),
        };
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        NodeId { index, generation: 0 }
    }

    /// Whether `id` refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_ok()
    }

    fn entry(&self, id: NodeId) -> Result<&Entry<T>, TreeError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(TreeError::UnknownNode(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut Entry<T>, TreeError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(TreeError::UnknownNode(id))
    }

    pub fn get(&self, id: NodeId) -> Result<&T, TreeError> {
        self.entry(id).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut T, TreeError> {
        self.entry_mut(id).map(|entry| &mut entry.value)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        self.entry(id).map(|entry| entry.parent)
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        self.entry(id).map(|entry| entry.children.as_slice())
    }

    pub fn child_count(&self, id: NodeId) -> Result<usize, TreeError> {
        self.entry(id).map(|entry| entry.children.len())
    }

    /// The child at `row`
    pub fn child(&self, id: NodeId, row: usize) -> Result<NodeId, TreeError> {
        let children = &self.entry(id)?.children;
        children.get(row).copied().ok_or(TreeError::IndexOutOfRange {
            position: row,
            count: children.len(),
        })
    }

    /// Position of `id` among its siblings, `None` for detached nodes
    pub fn child_index_in_parent(&self, id: NodeId) -> Result<Option<usize>, TreeError> {
        match self.entry(id)?.parent {
            Some(parent) => Ok(self
                .entry(parent)?
                .children
                .iter()
                .position(|child| *child == id)),
            None => Ok(None),
        }
    }

    /// Ancestors of `id`, nearest first
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let mut result = Vec::new();
        let mut current = self.entry(id)?.parent;
        while let Some(node) = current {
            result.push(node);
            current = self.entry(node)?.parent;
        }
        Ok(result)
    }

    /// Attach a detached node under `parent`, appending when `position` is `None`.
    /// Positions past the end append.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        position: Option<usize>,
    ) -> Result<(), TreeError> {
        if self.entry(child)?.parent.is_some() {
            return Err(TreeError::AlreadyHasParent(child));
        }
        if parent == child || self.ancestors(parent)?.contains(&child) {
            return Err(TreeError::WouldCreateCycle(child));
        }

        let children = &mut self.entry_mut(parent)?.children;
        let position = position.unwrap_or(children.len()).min(children.len());
        children.insert(position, child);
        self.entry_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Detach `id` from its parent, keeping its subtree intact
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        if let Some(parent) = self.entry(id)?.parent {
            self.entry_mut(parent)?.children.retain(|child| *child != id);
            self.entry_mut(id)?.parent = None;
        }
        Ok(())
    }

    /// Node ids of the subtree rooted at `id`, children before parents
    pub fn post_order(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let mut result = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                result.push(node);
                continue;
            }
            stack.push((node, true));
            for child in self.entry(node)?.children.iter().rev() {
                stack.push((*child, false));
            }
        }
        Ok(result)
    }

    /// Detach and free the subtree rooted at `id`, returning the values in post-order
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<T>, TreeError> {
        self.detach(id)?;
        let order = self.post_order(id)?;
        let mut values = Vec::with_capacity(order.len());
        for node in order {
            let slot = &mut self.slots[node.index as usize];
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(node.index);
                self.len -= 1;
                values.push(entry.value);
            }
        }
        Ok(values)
    }
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Tree<&'static str>, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let root = tree.add("root");
        let a = tree.add("a");
        let b = tree.add("b");
        let c = tree.add("c");
        tree.insert_child(root, a, None).unwrap();
        tree.insert_child(root, b, None).unwrap();
        tree.insert_child(a, c, None).unwrap();
        (tree, root, a, b, c)
    }

    #[test]
    fn test_insert_and_navigate() {
        let (tree, root, a, b, c) = sample();
        assert_eq!(tree.child_count(root).unwrap(), 2);
        assert_eq!(tree.child(root, 1).unwrap(), b);
        assert_eq!(tree.parent(c).unwrap(), Some(a));
        assert_eq!(tree.child_index_in_parent(b).unwrap(), Some(1));
        assert_eq!(tree.child_index_in_parent(root).unwrap(), None);
        assert_eq!(tree.ancestors(c).unwrap(), vec![a, root]);
    }

    #[test]
    fn test_insert_at_position() {
        let (mut tree, root, a, b, _) = sample();
        let d = tree.add("d");
        tree.insert_child(root, d, Some(0)).unwrap();
        assert_eq!(tree.children(root).unwrap(), &[d, a, b]);

        let e = tree.add("e");
        tree.insert_child(root, e, Some(99)).unwrap();
        assert_eq!(tree.child(root, 3).unwrap(), e);
    }

    #[test]
    fn test_insert_requires_detached_child() {
        let (mut tree, _, a, b, c) = sample();
        assert_eq!(tree.insert_child(b, c, None), Err(TreeError::AlreadyHasParent(c)));

        tree.detach(c).unwrap();
        tree.insert_child(b, c, None).unwrap();
        assert_eq!(tree.parent(c).unwrap(), Some(b));
        assert_eq!(tree.child_count(a).unwrap(), 0);
    }

    #[test]
    fn test_insert_rejects_cycles() {
        let (mut tree, root, a, _, c) = sample();
        assert_eq!(tree.insert_child(c, root, None), Err(TreeError::WouldCreateCycle(root)));
        tree.detach(a).unwrap();
        assert_eq!(tree.insert_child(c, a, None), Err(TreeError::WouldCreateCycle(a)));
    }

    #[test]
    fn test_child_out_of_range() {
        let (tree, root, ..) = sample();
        assert_eq!(
            tree.child(root, 5),
            Err(TreeError::IndexOutOfRange { position: 5, count: 2 })
        );
    }

    #[test]
    fn test_post_order() {
        let (tree, root, a, b, c) = sample();
        assert_eq!(tree.post_order(root).unwrap(), vec![c, a, b, root]);
    }

    #[test]
    fn test_remove_subtree_invalidates_ids() {
        let (mut tree, root, a, b, c) = sample();
        let removed = tree.remove_subtree(a).unwrap();
        assert_eq!(removed, vec!["c", "a"]);
        assert_eq!(tree.len(), 2);
        assert!(!tree.contains(a));
        assert!(!tree.contains(c));
        assert_eq!(tree.children(root).unwrap(), &[b]);

        // Reused slots get a new generation
        let d = tree.add("d");
        assert_ne!(d, a);
        assert!(tree.get(a).is_err());
        assert_eq!(*tree.get(d).unwrap(), "d");
    }
}
