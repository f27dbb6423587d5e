//! JSON documents parsed with `serde_json`

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use dv_core::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::memory::create_with_color;
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use serde_json::Value as JsonValue;

use crate::DataError;

pub const ICON_COLOR: &str = "#FFDD20";

/// Convert a parsed document. Lists of numbers become 1D arrays.
pub fn json_to_value(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(v) => Value::Bool(v),
        JsonValue::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Int(v)
            } else if let Some(v) = n.as_u64() {
                Value::UInt(v)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Value::Str(s),
        JsonValue::Array(items) => {
            Value::Sequence(items.into_iter().map(json_to_value).collect()).into_homogeneous_array()
        }
        JsonValue::Object(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, value)| (key, json_to_value(value)))
                .collect(),
        ),
    }
}

pub fn read_json(path: &Path) -> Result<Value, DataError> {
    let json: JsonValue = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    Ok(json_to_value(json))
}

/// A JSON file; objects and lists become nested children
pub struct JsonFileAdapter {
    path: PathBuf,
    document: Option<Value>,
}

impl JsonFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            document: None,
        }
    }
}

impl Adapter for JsonFileAdapter {
    fn type_name(&self) -> &str {
        "JSON file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.document = Some(read_json(&self.path)?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.document = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.document.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let document = self.document.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        let children = match document {
            Value::Mapping(map) => map
                .iter()
                .map(|(key, value)| create_with_color(key.as_str(), value.clone(), ctx.icon_color))
                .collect(),
            Value::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(n, value)| create_with_color(format!("elem-{n}"), value.clone(), ctx.icon_color))
                .collect(),
            _ => Vec::new(),
        };
        Ok(children)
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        match &self.document {
            Some(Value::Array(array)) => Some(array as &dyn Sliceable),
            _ => None,
        }
    }

    fn summary(&self) -> String {
        match &self.document {
            Some(Value::Array(array)) => dv_core::shape_summary(array.shape()),
            Some(document) => document.to_string(),
            None => String::new(),
        }
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        if let Some(document) = &self.document {
            attributes.insert("type".to_string(), Value::from(document.type_name()));
        }
        attributes
    }
}

pub fn create_json_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, JsonFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}
