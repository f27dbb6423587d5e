//! Parsing options for delimited text tables

use serde::{Deserialize, Serialize};

use super::null_handling::NullConfig;

/// Options for CSV tables and NumPy text files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvTableConfig {
    pub delimiter: char,

    /// Lines starting with this character are skipped
    pub comment: Option<char>,

    /// Whether the first row holds the column names
    pub has_headers: bool,

    /// Rows sampled for type inference
    pub sample_rows: usize,

    pub null: NullConfig,
}

impl Default for CsvTableConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            comment: Some('#'),
            has_headers: true,
            sample_rows: 1000,
            null: NullConfig::default(),
        }
    }
}

impl CsvTableConfig {
    pub(crate) fn delimiter_byte(&self) -> u8 {
        u8::try_from(u32::from(self.delimiter)).unwrap_or(b',')
    }

    pub(crate) fn comment_byte(&self) -> Option<u8> {
        self.comment.and_then(|c| u8::try_from(u32::from(c)).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml() {
        let config: CsvTableConfig = toml::from_str("delimiter = ';'\nsample_rows = 10").unwrap();
        assert_eq!(config.delimiter_byte(), b';');
        assert_eq!(config.sample_rows, 10);
        assert_eq!(config.comment_byte(), Some(b'#'));
        assert!(config.null.is_null("N/A"));
    }
}
