//! Change notifications for views of the repository tree

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::tree::NodeId;

/// Something that changed in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoEvent {
    /// An item was opened, successfully or not
    Opened { node: NodeId },
    Closed { node: NodeId },
    /// Children were inserted after a fetch
    ChildrenFetched { parent: NodeId, count: usize },
    /// Children were finalized and removed
    ChildrenRemoved { parent: NodeId, count: usize },
    /// A new top-level item was added
    ItemInserted { parent: NodeId, node: NodeId },
}

/// Trait for components that mirror the tree, such as a tree view model
pub trait RepoSubscriber: Send + Sync {
    fn on_repo_event(&self, event: &RepoEvent);
}

/// Weakly held subscriber list; dropped subscribers are pruned on publish
#[derive(Clone, Default)]
pub struct SubscriberList {
    subscribers: Arc<RwLock<Vec<Weak<dyn RepoSubscriber>>>>,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber
    pub fn subscribe(&self, subscriber: &Arc<dyn RepoSubscriber>) {
        self.subscribers.write().push(Arc::downgrade(subscriber));
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify all live subscribers
    pub fn publish(&self, event: &RepoEvent) {
        let mut subscribers = self.subscribers.write();

        // Remove any dead weak references
        subscribers.retain(|weak| weak.strong_count() > 0);

        for weak in subscribers.iter() {
            if let Some(subscriber) = weak.upgrade() {
                subscriber.on_repo_event(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<RepoEvent>>,
    }

    impl RepoSubscriber for Recorder {
        fn on_repo_event(&self, event: &RepoEvent) {
            self.events.lock().push(event.clone());
        }
    }

    #[test]
    fn test_publish_and_prune() {
        let list = SubscriberList::new();
        let recorder = Arc::new(Recorder::default());
        let subscriber: Arc<dyn RepoSubscriber> = recorder.clone();
        list.subscribe(&subscriber);

        let mut tree = crate::tree::Tree::new();
        let node = tree.add(());
        list.publish(&RepoEvent::Opened { node });
        assert_eq!(recorder.events.lock().len(), 1);

        drop(subscriber);
        drop(recorder);
        assert!(list.is_empty());
        list.publish(&RepoEvent::Closed { node });
    }
}
