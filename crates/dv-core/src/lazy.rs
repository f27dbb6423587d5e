//! Lazy child materialization state

use crate::error::TreeError;

/// Tracks whether a node's children have been materialized.
///
/// A fetch attempt marks the node fetched whatever its outcome, so a failing
/// fetch is reported once instead of being retried by every view refresh.
/// Only [`LazyState::reset`] (called when the children are removed) makes the
/// node fetchable again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LazyState {
    fetched: bool,
}

impl LazyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state that never fetches, for nodes whose children are inserted explicitly
    pub fn already_fetched() -> Self {
        Self { fetched: true }
    }

    pub fn can_fetch(&self) -> bool {
        !self.fetched
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    /// Mark the start of a fetch of `node_name`'s children
    pub fn begin_fetch(&mut self, node_name: &str) -> Result<(), TreeError> {
        if self.fetched {
            return Err(TreeError::ChildrenAlreadyFetched(node_name.to_string()));
        }
        self.fetched = true;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.fetched = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_once() {
        let mut state = LazyState::new();
        assert!(state.can_fetch());
        state.begin_fetch("group").unwrap();
        assert!(!state.can_fetch());
        assert_eq!(
            state.begin_fetch("group"),
            Err(TreeError::ChildrenAlreadyFetched("group".into()))
        );
    }

    #[test]
    fn test_reset_allows_refetch() {
        let mut state = LazyState::already_fetched();
        assert!(state.is_fetched());
        state.reset();
        assert!(state.begin_fetch("dir").is_ok());
    }
}
