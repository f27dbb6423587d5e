//! File name based adapter registry
//!
//! Entries map glob patterns to a factory that builds a tree item for a file.
//! The registry is a plain value handed to the tree; there is no process-wide
//! instance.

use std::fmt;
use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::error::RtiError;
use crate::filesystem;
use crate::rti::RepoTreeItem;

/// Builds a closed tree item for the file at a path
pub type FileFactory = fn(&Path) -> RepoTreeItem;

/// One registered file type
pub struct RegistryEntry {
    name: String,
    plugin: String,
    globs: Vec<String>,
    matcher: GlobSet,
    factory: Result<FileFactory, RtiError>,
}

impl RegistryEntry {
    /// `globs` is a list of patterns separated by `:` or `;`, e.g. `*.h5:*.hdf5`
    pub fn new(
        name: impl Into<String>,
        plugin: impl Into<String>,
        globs: &str,
        factory: Result<FileFactory, RtiError>,
    ) -> Result<Self, RtiError> {
        let globs = split_globs(globs);
        let mut builder = GlobSetBuilder::new();
        for pattern in &globs {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| RtiError::Other(format!("Invalid glob '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let matcher = builder
            .build()
            .map_err(|e| RtiError::Other(format!("Invalid glob set: {e}")))?;

        Ok(Self {
            name: name.into(),
            plugin: plugin.into(),
            globs,
            matcher,
            factory,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the adapter this entry binds to
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn globs(&self) -> &[String] {
        &self.globs
    }

    pub fn is_available(&self) -> bool {
        self.factory.is_ok()
    }

    /// The factory, or the reason it could not be loaded
    pub fn factory(&self) -> Result<FileFactory, RtiError> {
        self.factory.clone()
    }

    /// Case-insensitive match against the file name component of `path`
    pub fn matches(&self, path: &Path) -> bool {
        match path.file_name() {
            Some(file_name) => self.matcher.is_match(Path::new(file_name)),
            None => false,
        }
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("globs", &self.globs)
            .field("available", &self.is_available())
            .finish()
    }
}

/// Split a glob list on `:` and `;`
pub fn split_globs(globs: &str) -> Vec<String> {
    globs
        .split([':', ';'])
        .map(str::trim)
        .filter(|glob| !glob.is_empty())
        .map(str::to_string)
        .collect()
}

/// Ordered collection of registry entries
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    /// An empty registry; every file falls back to the directory or unknown-file adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Earlier entries win when several match.
    pub fn register(&mut self, entry: RegistryEntry) {
        debug!("Registering {} for {:?}", entry.name, entry.globs);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// First entry whose globs match `path`
    pub fn match_file_name(&self, path: &Path) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.matches(path))
    }

    /// Decide which factory builds the item for `path`.
    ///
    /// * a matching entry with a loaded factory gives `(Some(factory), Some(entry))`
    /// * a matching entry whose factory failed to load gives `(None, Some(entry))`
    /// * no match gives the directory or unknown-file factory and no entry
    pub fn resolve_adapter(&self, path: &Path) -> (Option<FileFactory>, Option<&RegistryEntry>) {
        if let Some(entry) = self.match_file_name(path) {
            return (entry.factory().ok(), Some(entry));
        }
        if path.is_dir() {
            (Some(filesystem::create_directory as FileFactory), None)
        } else {
            (Some(filesystem::create_unknown_file as FileFactory), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::create_unknown_file;
    use rstest::rstest;
    use tempfile::tempdir;

    fn first(path: &Path) -> RepoTreeItem {
        create_unknown_file(path).with_icon_color("#000001")
    }

    fn second(path: &Path) -> RepoTreeItem {
        create_unknown_file(path).with_icon_color("#000002")
    }

    fn sample_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(RegistryEntry::new("First", "first", "*.h5:*.nc", Ok(first as FileFactory)).unwrap());
        registry.register(RegistryEntry::new("Second", "second", "*.nc;*.nc4", Ok(second as FileFactory)).unwrap());
        registry.register(
            RegistryEntry::new(
                "Broken",
                "broken",
                "*.brk",
                Err(RtiError::PluginUnavailable {
                    plugin: "broken".into(),
                    reason: "not compiled in".into(),
                }),
            )
            .unwrap(),
        );
        registry
    }

    #[test]
    fn test_split_globs() {
        assert_eq!(split_globs("*.h5:*.hdf5; *.he5"), vec!["*.h5", "*.hdf5", "*.he5"]);
        assert!(split_globs("").is_empty());
    }

    #[rstest]
    #[case("data.h5", Some("First"))]
    #[case("DATA.H5", Some("First"))]
    #[case("/some/dir/x.nc", Some("First"))]
    #[case("x.nc4", Some("Second"))]
    #[case("x.brk", Some("Broken"))]
    #[case("x.txt", None)]
    fn test_match_file_name(#[case] path: &str, #[case] expected: Option<&str>) {
        let registry = sample_registry();
        let name = registry.match_file_name(Path::new(path)).map(|entry| entry.name());
        assert_eq!(name, expected);
    }

    #[test]
    fn test_first_registered_wins() {
        let registry = sample_registry();
        let (factory, entry) = registry.resolve_adapter(Path::new("shared.nc"));
        assert_eq!(entry.unwrap().name(), "First");
        let item = factory.unwrap()(Path::new("shared.nc"));
        assert_eq!(item.icon_color(), "#000001");
    }

    #[test]
    fn test_unavailable_plugin() {
        let registry = sample_registry();
        let (factory, entry) = registry.resolve_adapter(Path::new("x.brk"));
        assert!(factory.is_none());
        let entry = entry.unwrap();
        assert!(!entry.is_available());
        assert!(matches!(entry.factory(), Err(RtiError::PluginUnavailable { .. })));
    }

    #[test]
    fn test_fallbacks() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("notes.xyz");
        std::fs::write(&file, b"hello").unwrap();
        let registry = sample_registry();

        let (factory, entry) = registry.resolve_adapter(dir.path());
        assert!(entry.is_none());
        assert_eq!(factory.unwrap()(dir.path()).type_name(), "Directory");

        let (factory, entry) = registry.resolve_adapter(&file);
        assert!(entry.is_none());
        assert_eq!(factory.unwrap()(&file).type_name(), "Unknown File");
    }
}
