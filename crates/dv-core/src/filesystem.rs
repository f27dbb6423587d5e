//! Directory and unknown-file items

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::adapter::{Adapter, FetchContext, IconGlyph};
use crate::error::RtiError;
use crate::registry::Registry;
use crate::rti::{check_file_exists, colors, RepoTreeItem};

/// A file no registered adapter claims
pub struct UnknownFileAdapter {
    path: PathBuf,
}

impl UnknownFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl Adapter for UnknownFileAdapter {
    fn type_name(&self) -> &str {
        "Unknown File"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn has_children(&self) -> bool {
        false
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        check_file_exists(&self.path)
    }
}

/// A directory whose entries become children through the registry
pub struct DirectoryAdapter {
    path: PathBuf,
}

impl DirectoryAdapter {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }
}

impl Adapter for DirectoryAdapter {
    fn type_name(&self) -> &str {
        "Directory"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Folder
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        check_file_exists(&self.path)
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let (dirs, files) = list_directory(&self.path)?;
        debug!("Directory {} has {} subdirectories and {} files", self.path.display(), dirs.len(), files.len());

        Ok(dirs
            .iter()
            .chain(files.iter())
            .map(|path| create_rti_from_file_name(ctx.registry, path))
            .collect())
    }
}

/// Subdirectories and files of `path`, each sorted case-insensitively.
/// Hidden entries (leading `.`) are skipped.
pub fn list_directory(path: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), RtiError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in std::fs::read_dir(path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", path.display(), e);
                continue;
            }
        };
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let entry_path = entry.path();
        if entry_path.is_dir() {
            dirs.push(entry_path);
        } else {
            files.push(entry_path);
        }
    }

    let sort_key = |path: &PathBuf| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    };
    dirs.sort_by_key(sort_key);
    files.sort_by_key(sort_key);
    Ok((dirs, files))
}

/// Factory for [`DirectoryAdapter`] items
pub fn create_directory(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, DirectoryAdapter::new(path)).with_icon_color(colors::UNKNOWN)
}

/// Factory for [`UnknownFileAdapter`] items
pub fn create_unknown_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, UnknownFileAdapter::new(path)).with_icon_color(colors::UNKNOWN)
}

/// Build a closed item for `path` using the registry.
///
/// Never fails: a plugin that could not be loaded yields an unknown-file item
/// carrying the load error.
pub fn create_rti_from_file_name(registry: &Registry, path: &Path) -> RepoTreeItem {
    match registry.resolve_adapter(path) {
        (Some(factory), _) => factory(path),
        (None, Some(entry)) => {
            let error = match entry.factory() {
                Err(error) => error,
                Ok(_) => RtiError::Other(format!("No adapter for {}", entry.name())),
            };
            warn!("Cannot use {} for {}: {}", entry.name(), path.display(), error);
            create_unknown_file(path).with_error(error)
        }
        (None, None) => create_unknown_file(path),
    }
}
