//! Repository tree items
//!
//! A [`RepoTreeItem`] is one node of the data repository: a name, an optional
//! backing file, the open/error state and the format [`Adapter`] that does the
//! actual I/O. The methods here implement the per-item part of the lifecycle;
//! [`RepoTree`](crate::RepoTree) adds the parts that need the surrounding tree.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use crate::array::{shape_summary, ArrayValue, IndexElem};
use crate::config::ErrorPolicy;
use crate::error::RtiError;
use crate::lazy::LazyState;
use crate::registry::Registry;
use crate::value::Value;

/// Icon colors shared by several adapters
pub mod colors {
    pub const UNKNOWN: &str = "#999999";
    pub const ERROR: &str = "#FF0000";
    pub const MEMORY: &str = "#FFDD20";
}

/// One node of the repository tree
pub struct RepoTreeItem {
    node_name: String,
    file_name: Option<PathBuf>,
    icon_color: String,
    is_open: bool,
    last_error: Option<RtiError>,
    lazy: LazyState,
    adapter: Box<dyn Adapter>,
}

impl RepoTreeItem {
    /// Create a closed item without a backing file
    pub fn new(node_name: impl Into<String>, adapter: impl Adapter + 'static) -> Self {
        Self {
            node_name: sanitize_node_name(node_name.into()),
            file_name: None,
            icon_color: colors::UNKNOWN.to_string(),
            is_open: false,
            last_error: None,
            lazy: LazyState::new(),
            adapter: Box::new(adapter),
        }
    }

    /// Create a closed item for a file, named after the last path component.
    /// A missing file is recorded as the item's error.
    pub fn for_file(path: &Path, adapter: impl Adapter + 'static) -> Self {
        let path = absolute_path(path);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let mut item = Self::new(name, adapter).with_file_name(&path);
        if let Err(error) = check_file_exists(&path) {
            item.last_error = Some(error);
        }
        item
    }

    pub(crate) fn invisible_root(adapter: impl Adapter + 'static) -> Self {
        Self {
            node_name: String::new(),
            file_name: None,
            icon_color: colors::UNKNOWN.to_string(),
            is_open: false,
            last_error: None,
            lazy: LazyState::already_fetched(),
            adapter: Box::new(adapter),
        }
    }

    pub fn with_file_name(mut self, path: &Path) -> Self {
        self.file_name = Some(absolute_path(path));
        self
    }

    pub fn with_icon_color(mut self, color: impl Into<String>) -> Self {
        let color = color.into();
        if !color.is_empty() {
            self.icon_color = color;
        }
        self
    }

    /// Record an error at construction, e.g. an unavailable plugin
    pub fn with_error(mut self, error: RtiError) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    pub fn icon_color(&self) -> &str {
        &self.icon_color
    }

    /// Color to draw the icon with, red while an error is stored
    pub fn display_icon_color(&self) -> &str {
        if self.last_error.is_some() {
            colors::ERROR
        } else {
            &self.icon_color
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn last_error(&self) -> Option<&RtiError> {
        self.last_error.as_ref()
    }

    pub fn can_fetch_children(&self) -> bool {
        self.lazy.can_fetch()
    }

    pub(crate) fn reset_fetched(&mut self) {
        self.lazy.reset();
    }

    pub fn type_name(&self) -> &str {
        self.adapter.type_name()
    }

    pub fn icon_glyph(&self) -> IconGlyph {
        self.adapter.icon_glyph()
    }

    pub fn has_children(&self) -> bool {
        self.adapter.has_children()
    }

    pub fn holds_resource(&self) -> bool {
        self.adapter.holds_resource()
    }

    pub fn is_sliceable(&self) -> bool {
        self.adapter.sliceable().is_some()
    }

    /// Array access, or `NotSliceable`
    pub fn sliceable(&self) -> Result<&dyn Sliceable, RtiError> {
        self.adapter
            .sliceable()
            .ok_or_else(|| RtiError::NotSliceable(self.node_name.clone()))
    }

    pub fn shape(&self) -> Result<Vec<usize>, RtiError> {
        Ok(self.sliceable()?.shape())
    }

    pub fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        self.sliceable()?.get_item(index)
    }

    pub fn attributes(&self) -> BTreeMap<String, Value> {
        self.adapter.attributes()
    }

    pub fn element_type_name(&self) -> String {
        self.adapter
            .sliceable()
            .map(|data| data.element_type_name())
            .unwrap_or_default()
    }

    pub fn dimension_names(&self) -> Vec<String> {
        self.adapter
            .sliceable()
            .map(|data| data.dimension_names())
            .unwrap_or_default()
    }

    pub fn unit(&self) -> String {
        self.adapter
            .sliceable()
            .map(|data| data.unit())
            .unwrap_or_default()
    }

    pub fn missing_data_value(&self) -> Option<Value> {
        self.adapter.sliceable().and_then(|data| data.missing_data_value())
    }

    pub fn summary(&self) -> String {
        self.adapter.summary()
    }

    /// Text rendering of the data. Arrays with more than `max_elements`
    /// elements are described instead of printed.
    pub fn quick_look(&self, width: usize, max_elements: usize) -> String {
        let Some(data) = self.adapter.sliceable() else {
            return self.adapter.quick_look(width);
        };
        let shape = data.shape();
        if shape.iter().product::<usize>() > max_elements {
            return format!("{} of {}", self.type_name(), shape_summary(&shape));
        }
        match data.get_item(&[]) {
            Ok(array) => array
                .to_string()
                .lines()
                .map(|line| truncate(line, width))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(error) => format!("Error: {error}"),
        }
    }

    /// Open the underlying resource. Reopening an open item closes it first.
    pub fn open(&mut self, policy: ErrorPolicy) -> Result<(), RtiError> {
        self.last_error = None;
        if self.is_open {
            warn!("Item is already open, closing before reopening: {}", self.node_name);
            if let Err(e) = self.adapter.close_resources() {
                warn!("Closing stale resources of {} failed: {}", self.node_name, e);
            }
            self.is_open = false;
        }

        debug!("Opening {}", self.node_name);
        match self.adapter.open_resources() {
            Ok(()) => {
                self.is_open = true;
                Ok(())
            }
            Err(e) => {
                error!("Error opening {}: {}", self.node_name, e);
                self.last_error = Some(e.clone());
                policy.handle(e)
            }
        }
    }

    /// Release the underlying resource. The item ends up closed even if the
    /// close hook fails.
    pub fn close(&mut self, policy: ErrorPolicy) -> Result<(), RtiError> {
        self.last_error = None;
        if !self.is_open {
            debug!("Item is already closed: {}", self.node_name);
            return Ok(());
        }

        debug!("Closing {}", self.node_name);
        let result = self.adapter.close_resources();
        self.is_open = false;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Error closing {}: {}", self.node_name, e);
                self.last_error = Some(e.clone());
                policy.handle(e)
            }
        }
    }

    /// Build this item's children, opening it first if needed.
    ///
    /// The item is marked fetched whatever happens. A failed open or a failed
    /// hook leaves the error on the item and yields no children.
    pub fn fetch_children(
        &mut self,
        registry: &Registry,
        policy: ErrorPolicy,
    ) -> Result<Vec<RepoTreeItem>, RtiError> {
        self.lazy.begin_fetch(&self.node_name)?;

        if !self.is_open {
            self.open(policy)?;
        }
        if !self.is_open {
            warn!("Opening {} failed, no children fetched", self.node_name);
            return Ok(Vec::new());
        }
        self.last_error = None;

        let ctx = FetchContext {
            node_name: &self.node_name,
            file_name: self.file_name.as_deref(),
            icon_color: &self.icon_color,
            registry,
        };
        match self.adapter.fetch_all_children(&ctx) {
            Ok(children) => Ok(children),
            Err(e) => {
                error!("Error fetching children of {}: {}", self.node_name, e);
                self.last_error = Some(e.clone());
                policy.handle(e).map(|()| Vec::new())
            }
        }
    }
}

impl fmt::Debug for RepoTreeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoTreeItem")
            .field("node_name", &self.node_name)
            .field("type_name", &self.adapter.type_name())
            .field("file_name", &self.file_name)
            .field("is_open", &self.is_open)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Names are path components: never empty and never containing `/`
fn sanitize_node_name(name: String) -> String {
    if name.is_empty() {
        return "<empty>".to_string();
    }
    if name.contains('/') {
        return name.replace('/', "\u{2215}");
    }
    name
}

fn truncate(line: &str, width: usize) -> String {
    if width == 0 || line.chars().count() <= width {
        line.to_string()
    } else {
        line.chars().take(width).collect()
    }
}

/// Make `path` absolute against the current directory
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// `FileNotFound` unless `path` exists
pub fn check_file_exists(path: &Path) -> Result<(), RtiError> {
    if path.exists() {
        Ok(())
    } else {
        Err(RtiError::FileNotFound(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayValue;
    use ndarray::{Array, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Adapter whose hooks can be told to fail
    #[derive(Default)]
    struct ScriptedAdapter {
        fail_open: bool,
        fail_close: bool,
        fail_fetch: bool,
        held: bool,
        opens: Arc<AtomicUsize>,
    }

    impl Adapter for ScriptedAdapter {
        fn type_name(&self) -> &str {
            "scripted"
        }

        fn open_resources(&mut self) -> Result<(), RtiError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(RtiError::Format("cannot open".into()));
            }
            self.held = true;
            Ok(())
        }

        fn close_resources(&mut self) -> Result<(), RtiError> {
            self.held = false;
            if self.fail_close {
                return Err(RtiError::Other("cannot close".into()));
            }
            Ok(())
        }

        fn holds_resource(&self) -> bool {
            self.held
        }

        fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
            if self.fail_fetch {
                return Err(RtiError::Unsupported("odd member".into()));
            }
            Ok(vec![
                RepoTreeItem::new("a", ScriptedAdapter::default()).with_icon_color(ctx.icon_color),
                RepoTreeItem::new("b", ScriptedAdapter::default()),
            ])
        }
    }

    #[test]
    fn test_open_close_symmetry() {
        let mut item = RepoTreeItem::new("scripted", ScriptedAdapter::default());
        item.open(ErrorPolicy::Lenient).unwrap();
        assert!(item.is_open());
        assert!(item.holds_resource());
        item.close(ErrorPolicy::Lenient).unwrap();
        assert!(!item.is_open());
        assert!(!item.holds_resource());
        assert!(item.last_error().is_none());
    }

    #[test]
    fn test_close_twice() {
        let mut item = RepoTreeItem::new("scripted", ScriptedAdapter::default());
        item.open(ErrorPolicy::Strict).unwrap();
        item.close(ErrorPolicy::Strict).unwrap();
        item.close(ErrorPolicy::Strict).unwrap();
        assert!(!item.is_open());
        assert!(item.last_error().is_none());
    }

    #[test]
    fn test_reopen_closes_first() {
        let opens = Arc::new(AtomicUsize::new(0));
        let adapter = ScriptedAdapter {
            opens: Arc::clone(&opens),
            ..Default::default()
        };
        let mut item = RepoTreeItem::new("scripted", adapter);
        item.open(ErrorPolicy::Lenient).unwrap();
        item.open(ErrorPolicy::Lenient).unwrap();
        assert!(item.is_open());
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_open_is_stored() {
        let adapter = ScriptedAdapter {
            fail_open: true,
            ..Default::default()
        };
        let mut item = RepoTreeItem::new("scripted", adapter);
        assert!(item.open(ErrorPolicy::Lenient).is_ok());
        assert!(!item.is_open());
        assert!(matches!(item.last_error(), Some(RtiError::Format(_))));
        assert_eq!(item.display_icon_color(), colors::ERROR);

        assert!(matches!(item.open(ErrorPolicy::Strict), Err(RtiError::Format(_))));
        assert!(item.last_error().is_some());
    }

    #[test]
    fn test_failed_close_still_closes() {
        let adapter = ScriptedAdapter {
            fail_close: true,
            ..Default::default()
        };
        let mut item = RepoTreeItem::new("scripted", adapter);
        item.open(ErrorPolicy::Lenient).unwrap();
        item.close(ErrorPolicy::Lenient).unwrap();
        assert!(!item.is_open());
        assert!(matches!(item.last_error(), Some(RtiError::Other(_))));
    }

    #[test]
    fn test_fetch_marks_fetched_on_failure() {
        let registry = Registry::new();
        let adapter = ScriptedAdapter {
            fail_fetch: true,
            ..Default::default()
        };
        let mut item = RepoTreeItem::new("scripted", adapter);
        let children = item.fetch_children(&registry, ErrorPolicy::Lenient).unwrap();
        assert!(children.is_empty());
        assert!(!item.can_fetch_children());
        assert!(item.is_open());
        assert!(matches!(item.last_error(), Some(RtiError::Unsupported(_))));

        // A second fetch is a contract violation
        assert!(matches!(
            item.fetch_children(&registry, ErrorPolicy::Lenient),
            Err(RtiError::Tree(_))
        ));
    }

    #[test]
    fn test_fetch_after_failed_open() {
        let registry = Registry::new();
        let adapter = ScriptedAdapter {
            fail_open: true,
            ..Default::default()
        };
        let mut item = RepoTreeItem::new("scripted", adapter);
        let children = item.fetch_children(&registry, ErrorPolicy::Lenient).unwrap();
        assert!(children.is_empty());
        assert!(!item.can_fetch_children());
        assert!(item.last_error().is_some());
    }

    #[test]
    fn test_children_inherit_color() {
        let registry = Registry::new();
        let mut item =
            RepoTreeItem::new("scripted", ScriptedAdapter::default()).with_icon_color("#123456");
        let children = item.fetch_children(&registry, ErrorPolicy::Lenient).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].icon_color(), "#123456");
    }

    #[test]
    fn test_node_names_are_sanitized() {
        let item = RepoTreeItem::new("a/b", ScriptedAdapter::default());
        assert!(!item.node_name().contains('/'));
        assert_eq!(RepoTreeItem::new("", ScriptedAdapter::default()).node_name(), "<empty>");
    }

    #[test]
    fn test_missing_file_is_recorded() {
        let item = RepoTreeItem::for_file(Path::new("/no/such/dir/data.bin"), ScriptedAdapter::default());
        assert_eq!(item.node_name(), "data.bin");
        assert!(matches!(item.last_error(), Some(RtiError::FileNotFound(_))));
        assert!(item.file_name().unwrap().is_absolute());
    }

    struct FixedArray(ArrayValue);

    impl Adapter for FixedArray {
        fn type_name(&self) -> &str {
            "fixed array"
        }

        fn sliceable(&self) -> Option<&dyn Sliceable> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_quick_look_limits() {
        let array: ArrayValue = Array::from_shape_vec(IxDyn(&[2, 3]), (0..6i64).collect())
            .unwrap()
            .into();
        let item = RepoTreeItem::new("data", FixedArray(array));
        assert_eq!(item.summary(), "2 × 3");
        assert_eq!(item.quick_look(80, 4), "fixed array of 2 × 3");
        assert!(item.quick_look(80, 1000).contains("[3, 4, 5]"));
        assert_eq!(item.dimension_names(), vec!["dim-0", "dim-1"]);
    }

    #[test]
    fn test_not_sliceable() {
        let item = RepoTreeItem::new("scripted", ScriptedAdapter::default());
        assert!(!item.is_sliceable());
        assert!(matches!(item.shape(), Err(RtiError::NotSliceable(_))));
        assert!(item.summary().is_empty());
        assert!(item.dimension_names().is_empty());
    }
}
