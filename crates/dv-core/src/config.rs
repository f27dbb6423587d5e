//! Repository tree configuration

use serde::{Deserialize, Serialize};

use crate::error::RtiError;

/// How failures of the I/O hooks reach the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Store the error on the item and carry on
    #[default]
    Lenient,
    /// Store the error on the item and also return it
    Strict,
}

impl ErrorPolicy {
    /// Outcome of an operation whose failure has already been stored
    pub fn handle(self, error: RtiError) -> Result<(), RtiError> {
        match self {
            ErrorPolicy::Lenient => Ok(()),
            ErrorPolicy::Strict => Err(error),
        }
    }
}

/// Settings for a [`RepoTree`](crate::RepoTree)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepoConfig {
    /// Error propagation policy for open, close and fetch
    pub error_policy: ErrorPolicy,

    /// Arrays larger than this are not rendered in quick looks
    pub quick_look_max_elements: usize,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::Lenient,
            quick_look_max_elements: 1000,
        }
    }
}

impl RepoConfig {
    pub fn strict() -> Self {
        Self {
            error_policy: ErrorPolicy::Strict,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_handle() {
        let error = RtiError::Format("corrupt".into());
        assert!(ErrorPolicy::Lenient.handle(error.clone()).is_ok());
        assert!(matches!(ErrorPolicy::Strict.handle(error), Err(RtiError::Format(_))));
    }

    #[test]
    fn test_defaults() {
        let config = RepoConfig::default();
        assert_eq!(config.error_policy, ErrorPolicy::Lenient);
        assert_eq!(config.quick_look_max_elements, 1000);
        assert_eq!(RepoConfig::strict().error_policy, ErrorPolicy::Strict);
    }
}
