//! Recognition of missing values in text tables

use serde::{Deserialize, Serialize};

/// Which cell texts count as missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullConfig {
    /// Patterns to treat as null
    pub patterns: Vec<String>,

    /// Whether to trim whitespace before checking
    pub trim_whitespace: bool,

    pub case_sensitive: bool,
}

impl Default for NullConfig {
    fn default() -> Self {
        Self {
            patterns: ["", "-", "N/A", "NA", "NaN", "null", "None"]
                .into_iter()
                .map(String::from)
                .collect(),
            trim_whitespace: true,
            case_sensitive: false,
        }
    }
}

impl NullConfig {
    /// Only empty cells are missing
    pub fn empty_only() -> Self {
        Self {
            patterns: vec![String::new()],
            ..Self::default()
        }
    }

    /// Check if a cell should be treated as missing
    pub fn is_null(&self, value: &str) -> bool {
        let value = if self.trim_whitespace { value.trim() } else { value };

        self.patterns.iter().any(|pattern| {
            if self.case_sensitive {
                value == pattern
            } else {
                value.eq_ignore_ascii_case(pattern)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns() {
        let config = NullConfig::default();
        assert!(config.is_null(""));
        assert!(config.is_null("  n/a "));
        assert!(config.is_null("NULL"));
        assert!(config.is_null("nan"));
        assert!(!config.is_null("0"));
        assert!(!config.is_null("nothing"));
    }

    #[test]
    fn test_case_sensitive() {
        let config = NullConfig {
            case_sensitive: true,
            trim_whitespace: false,
            ..NullConfig::default()
        };
        assert!(config.is_null("None"));
        assert!(!config.is_null("none"));
        assert!(!config.is_null(" None"));
        assert!(!NullConfig::empty_only().is_null("NA"));
    }
}
