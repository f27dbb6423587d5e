//! Exdir directory trees
//!
//! An Exdir file is a directory. Each object in it is a subdirectory whose
//! `exdir.yaml` names its type; attributes live next to it in
//! `attributes.yaml` and a dataset keeps its data in `data.npy`. Directories
//! without metadata are raw directories and are browsed like any other
//! directory.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dv_core::adapter::{default_dimension_names, Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::array::{ArrayValue, IndexElem};
use dv_core::filesystem::{create_directory, list_directory};
use dv_core::rti::{check_file_exists, RepoTreeItem};
use dv_core::{RtiError, Value};
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use tracing::{debug, warn};

use crate::attributes::{masked, missing_value_of, unit_of, unwrap_single};
use crate::numpy::{read_npy_info, read_npy_records, NpyInfo};
use crate::records::{RecordFieldAdapter, RecordLayout, RecordSource};
use crate::DataError;

pub const ICON_COLOR: &str = "#00BBFF";

const META_FILE: &str = "exdir.yaml";
const ATTRIBUTES_FILE: &str = "attributes.yaml";
const DATA_FILE: &str = "data.npy";

#[derive(Debug, Deserialize)]
struct Metadata {
    exdir: ObjectMetadata,
}

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    File,
    Group,
    Dataset,
    /// No `exdir.yaml`
    Raw,
}

fn object_kind(dir: &Path) -> Result<ObjectKind, DataError> {
    let meta = dir.join(META_FILE);
    if !meta.is_file() {
        return Ok(ObjectKind::Raw);
    }
    let metadata: Metadata = serde_yaml::from_str(&std::fs::read_to_string(&meta)?)?;
    match metadata.exdir.kind.as_str() {
        "file" => Ok(ObjectKind::File),
        "group" => Ok(ObjectKind::Group),
        "dataset" => Ok(ObjectKind::Dataset),
        other => Err(DataError::Format(format!("unexpected Exdir type '{other}'"))),
    }
}

fn yaml_key(key: &YamlValue) -> String {
    match key {
        YamlValue::String(text) => text.clone(),
        other => serde_yaml::to_string(other)
            .map(|text| text.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Convert a YAML node. Lists of numbers become 1D arrays.
pub fn yaml_to_value(yaml: YamlValue) -> Value {
    match yaml {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(v) => Value::Bool(v),
        YamlValue::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Int(v)
            } else if let Some(v) = n.as_u64() {
                Value::UInt(v)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        YamlValue::String(s) => Value::Str(s),
        YamlValue::Sequence(items) => {
            Value::Sequence(items.into_iter().map(yaml_to_value).collect()).into_homogeneous_array()
        }
        YamlValue::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, value)| (yaml_key(&key), yaml_to_value(value)))
                .collect(),
        ),
        YamlValue::Tagged(tagged) => yaml_to_value(tagged.value),
    }
}

fn flatten_into(attributes: &mut BTreeMap<String, Value>, prefix: &str, yaml: YamlValue) {
    let join = |key: String| if prefix.is_empty() { key } else { format!("{prefix}/{key}") };
    match yaml {
        YamlValue::Mapping(map) => {
            for (key, value) in map {
                flatten_into(attributes, &join(yaml_key(&key)), value);
            }
        }
        value => {
            let value = match yaml_to_value(value) {
                Value::Array(array) => unwrap_single(array),
                other => other,
            };
            attributes.insert(prefix.to_string(), value);
        }
    }
}

/// The attributes of an object with nested keys joined by `/`.
///
/// A top level list is keyed by position.
pub fn read_attributes(dir: &Path) -> Result<BTreeMap<String, Value>, DataError> {
    let path = dir.join(ATTRIBUTES_FILE);
    let mut attributes = BTreeMap::new();
    if !path.is_file() {
        return Ok(attributes);
    }
    let document: YamlValue = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    match document {
        YamlValue::Null => {}
        YamlValue::Sequence(items) => {
            for (n, item) in items.into_iter().enumerate() {
                flatten_into(&mut attributes, &n.to_string(), item);
            }
        }
        YamlValue::Mapping(map) => flatten_into(&mut attributes, "", YamlValue::Mapping(map)),
        other => warn!("Ignoring attributes of {} that are not a mapping: {:?}", dir.display(), other),
    }
    Ok(attributes)
}

/// Items for the objects of a group directory. Objects whose metadata cannot
/// be read are skipped.
fn object_children(dir: &Path, icon_color: &str) -> Result<Vec<RepoTreeItem>, RtiError> {
    let (dirs, _) = list_directory(dir)?;
    let mut children = Vec::with_capacity(dirs.len());
    for path in dirs {
        match object_item(&path) {
            Ok(item) => children.push(item.with_icon_color(icon_color)),
            Err(e) => warn!("Ignored {}: {}", path.display(), e),
        }
    }
    Ok(children)
}

fn object_item(path: &Path) -> Result<RepoTreeItem, DataError> {
    match object_kind(path)? {
        ObjectKind::Group => Ok(RepoTreeItem::for_file(path, ExdirGroupAdapter::new(path)?)),
        ObjectKind::Dataset => Ok(RepoTreeItem::for_file(path, ExdirDatasetAdapter::new(path)?)),
        ObjectKind::Raw => Ok(create_directory(path)),
        ObjectKind::File => Err(DataError::Format("Exdir file nested inside another".to_string())),
    }
}

/// The root directory of an Exdir file
pub struct ExdirFileAdapter {
    path: PathBuf,
    attributes: Option<BTreeMap<String, Value>>,
}

impl ExdirFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            attributes: None,
        }
    }
}

impl Adapter for ExdirFileAdapter {
    fn type_name(&self) -> &str {
        "Exdir file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        debug!("Opening: {}", self.path.display());
        check_file_exists(&self.path)?;
        if object_kind(&self.path)? != ObjectKind::File {
            return Err(RtiError::Format(format!("{} is not an Exdir file", self.path.display())));
        }
        self.attributes = Some(read_attributes(&self.path)?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        debug!("Closing: {}", self.path.display());
        self.attributes = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.attributes.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        if self.attributes.is_none() {
            return Err(RtiError::NotOpen(ctx.node_name.to_string()));
        }
        object_children(&self.path, ctx.icon_color)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.attributes.clone().unwrap_or_default()
    }
}

pub struct ExdirGroupAdapter {
    path: PathBuf,
    attributes: BTreeMap<String, Value>,
}

impl ExdirGroupAdapter {
    pub fn new(path: &Path) -> Result<Self, DataError> {
        Ok(Self {
            path: path.to_path_buf(),
            attributes: read_attributes(path)?,
        })
    }
}

impl Adapter for ExdirGroupAdapter {
    fn type_name(&self) -> &str {
        "Exdir group"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Group
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        object_children(&self.path, ctx.icon_color)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.attributes.clone()
    }
}

/// Dataset contents loaded when the item is opened, shared with its fields
struct DatasetData {
    array: ArrayValue,
    /// Zero-dimensional data shown with shape `[1]`
    scalar: bool,
    attributes: BTreeMap<String, Value>,
}

impl RecordSource for DatasetData {
    fn record_shape(&self) -> Vec<usize> {
        self.array.shape().to_vec()
    }

    fn read_records(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.array.get_item(index)?)
    }

    fn record_dimension_names(&self) -> Vec<String> {
        default_dimension_names(self.array.ndim())
    }

    fn record_attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }
}

impl Sliceable for DatasetData {
    fn shape(&self) -> Vec<usize> {
        if self.scalar {
            vec![1]
        } else {
            self.array.shape().to_vec()
        }
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let array = if self.scalar {
            Cow::Owned(self.array.with_leading_axis())
        } else {
            Cow::Borrowed(&self.array)
        };
        Ok(masked(array.get_item(index)?, self.missing_data_value().as_ref()))
    }

    fn element_type_name(&self) -> String {
        self.array.element_type_name().to_string()
    }

    fn unit(&self) -> String {
        unit_of(&self.attributes)
    }

    fn missing_data_value(&self) -> Option<Value> {
        missing_value_of(&self.attributes)
    }
}

/// A dataset directory. Its children are the fields of structured data and
/// any raw directories stored with it.
pub struct ExdirDatasetAdapter {
    path: PathBuf,
    info: NpyInfo,
    raw_dirs: Vec<PathBuf>,
    attributes: BTreeMap<String, Value>,
    loaded: Option<(Arc<DatasetData>, Option<RecordLayout>)>,
}

impl ExdirDatasetAdapter {
    /// Reads the metadata only; the data is read on open
    pub fn new(path: &Path) -> Result<Self, DataError> {
        let (raw_dirs, _) = list_directory(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            info: read_npy_info(&path.join(DATA_FILE))?,
            raw_dirs,
            attributes: read_attributes(path)?,
            loaded: None,
        })
    }

    fn is_scalar(&self) -> bool {
        self.info.shape.is_empty()
    }

    fn has_fields(&self) -> bool {
        self.info.structured && !self.is_scalar()
    }
}

impl Adapter for ExdirDatasetAdapter {
    fn type_name(&self) -> &str {
        if self.is_scalar() {
            "Exdir scalar"
        } else {
            "Exdir dataset"
        }
    }

    fn icon_glyph(&self) -> IconGlyph {
        if self.is_scalar() {
            IconGlyph::Scalar
        } else {
            IconGlyph::Array
        }
    }

    fn has_children(&self) -> bool {
        self.has_fields() || !self.raw_dirs.is_empty()
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        let bytes = std::fs::read(self.path.join(DATA_FILE))?;
        let (array, layout) = read_npy_records(&bytes)?;
        debug!("Read {} array of shape {:?} from {}", array.element_type_name(), array.shape(), self.path.display());
        let data = DatasetData {
            array,
            scalar: self.is_scalar(),
            attributes: self.attributes.clone(),
        };
        self.loaded = Some((Arc::new(data), layout));
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.loaded = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.loaded.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let (data, layout) = self
            .loaded
            .as_ref()
            .ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;

        let mut children = match layout {
            Some(layout) if self.has_fields() => {
                let source: Arc<dyn RecordSource> = data.clone();
                RecordFieldAdapter::children("Exdir field", source, layout, ctx.icon_color)
            }
            _ => Vec::new(),
        };
        children.extend(
            self.raw_dirs
                .iter()
                .map(|path| create_directory(path).with_icon_color(ctx.icon_color)),
        );
        Ok(children)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.attributes.clone()
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.loaded.as_ref().map(|(data, _)| data.as_ref() as &dyn Sliceable)
    }

    fn summary(&self) -> String {
        let Some(data) = self.sliceable() else {
            return String::new();
        };
        if !self.is_scalar() {
            return dv_core::shape_summary(&data.shape());
        }
        match data.get_item(&[IndexElem::at(0)]).map(|array| array.scalar_value()) {
            Ok(Some(value)) => value.to_string(),
            Ok(None) => String::new(),
            Err(e) => format!("Error: {e}"),
        }
    }
}

pub fn create_exdir_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, ExdirFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}
