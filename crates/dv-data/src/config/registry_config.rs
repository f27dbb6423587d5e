//! Serializable form of the file registry

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::DataError;

/// One registry row: a display name, a plugin id and its glob patterns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntryConfig {
    pub name: String,
    /// Plugin id, see [`crate::plugins::plugin_factory`]
    pub plugin: String,
    /// Patterns separated by `:` or `;`
    pub globs: String,
}

impl RegistryEntryConfig {
    pub fn new(name: &str, plugin: &str, globs: &str) -> Self {
        Self {
            name: name.to_string(),
            plugin: plugin.to_string(),
            globs: globs.to_string(),
        }
    }
}

/// Ordered registry rows; earlier rows win when several match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub entries: Vec<RegistryEntryConfig>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let entries = [
            ("NetCDF", "netcdf", "*.nc;*.nc4"),
            ("HDF-5", "hdf5", "*.hdf5:*.h5:*.h5e:*.he5:*.nc"),
            ("NumPy binary", "numpy-binary", "*.npy"),
            ("CSV table", "csv", "*.csv"),
            ("NumPy compressed", "numpy-compressed", "*.npz"),
            ("NumPy text", "numpy-text", "*.dat"),
            ("MATLAB", "matlab", "*.mat"),
            ("WAV", "wav", "*.wav"),
            ("Image", "image", "*.bmp:*.gif:*.jpg:*.jpeg:*.png:*.pnm:*.ppm:*.tif:*.tiff"),
            ("Arrow IPC", "arrow", "*.arrow:*.feather:*.ipc"),
            ("Parquet", "parquet", "*.parquet"),
            ("JSON", "json", "*.json"),
            ("Exdir", "exdir", "*.exdir"),
        ];
        Self {
            entries: entries
                .iter()
                .map(|(name, plugin, globs)| RegistryEntryConfig::new(name, plugin, globs))
                .collect(),
        }
    }
}

impl RegistryConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, DataError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, DataError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let config = RegistryConfig::default();
        assert_eq!(config.entries.len(), 13);
        assert_eq!(config.entries[0].plugin, "netcdf");
        assert_eq!(config.entries[1].plugin, "hdf5");
        assert_eq!(config.entries.last().map(|e| e.plugin.as_str()), Some("exdir"));
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            [[entries]]
            name = "Tables"
            plugin = "csv"
            globs = "*.csv:*.tsv"

            [[entries]]
            name = "Arrays"
            plugin = "numpy-binary"
            globs = "*.npy"
        "#;
        let config = RegistryConfig::from_toml_str(text).unwrap();
        assert_eq!(config.entries.len(), 2);
        assert_eq!(config.entries[0], RegistryEntryConfig::new("Tables", "csv", "*.csv:*.tsv"));

        assert!(RegistryConfig::from_toml_str("entries = 3").is_err());
        assert!(RegistryConfig::from_toml_str("").unwrap().entries.is_empty());
    }
}
