//! Items over in-memory values
//!
//! These back the children of formats that load everything at open time
//! (JSON, NumPy archives, MATLAB files) and any data a host application wants
//! to show in the tree directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use crate::array::{shape_summary, ArrayValue, IndexElem};
use crate::error::RtiError;
use crate::rti::{colors, RepoTreeItem};
use crate::value::Value;

/// Wrap a value in the item type matching its shape
pub fn create_from_value(name: impl Into<String>, value: Value) -> RepoTreeItem {
    create_with_color(name, value, colors::MEMORY)
}

/// Same as [`create_from_value`] with an explicit icon color
pub fn create_with_color(name: impl Into<String>, value: Value, icon_color: &str) -> RepoTreeItem {
    let item = match value {
        Value::Sequence(items) => RepoTreeItem::new(name, SequenceAdapter::new(items)),
        Value::Mapping(map) => RepoTreeItem::new(name, MappingAdapter::new(map)),
        Value::Array(array) => RepoTreeItem::new(name, ArrayAdapter::new(array)),
        scalar => RepoTreeItem::new(name, ScalarAdapter::new(scalar)),
    };
    item.with_icon_color(icon_color)
}

/// One field child per field of a compound array
pub fn field_children(array: &Arc<ArrayValue>, icon_color: &str) -> Vec<RepoTreeItem> {
    match array.as_compound() {
        Some(compound) => compound
            .field_names()
            .map(|name| {
                RepoTreeItem::new(name, FieldAdapter::new(Arc::clone(array), name))
                    .with_icon_color(icon_color)
            })
            .collect(),
        None => Vec::new(),
    }
}

/// A single scalar value, sliceable with an empty shape
pub struct ScalarAdapter {
    value: Value,
    array: ArrayValue,
}

impl ScalarAdapter {
    pub fn new(value: Value) -> Self {
        let array = value
            .to_array()
            .unwrap_or_else(|| ArrayValue::Str(ndarray::arr0(value.to_string()).into_dyn()));
        Self { value, array }
    }
}

impl Adapter for ScalarAdapter {
    fn type_name(&self) -> &str {
        "Scalar"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Scalar
    }

    fn has_children(&self) -> bool {
        false
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(self)
    }

    fn summary(&self) -> String {
        self.value.to_string()
    }
}

impl Sliceable for ScalarAdapter {
    fn shape(&self) -> Vec<usize> {
        Vec::new()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.array.get_item(index)?)
    }

    fn element_type_name(&self) -> String {
        self.value.type_name().to_string()
    }
}

/// An in-memory array; compound arrays get one child per field
pub struct ArrayAdapter {
    array: Arc<ArrayValue>,
}

impl ArrayAdapter {
    pub fn new(array: ArrayValue) -> Self {
        Self { array: Arc::new(array) }
    }
}

impl Adapter for ArrayAdapter {
    fn type_name(&self) -> &str {
        "Array"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn has_children(&self) -> bool {
        self.array.as_compound().is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(field_children(&self.array, ctx.icon_color))
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(self.array.as_ref())
    }
}

/// One named field of a compound array
pub struct FieldAdapter {
    parent: Arc<ArrayValue>,
    field: String,
}

impl FieldAdapter {
    pub fn new(parent: Arc<ArrayValue>, field: impl Into<String>) -> Self {
        Self {
            parent,
            field: field.into(),
        }
    }

    fn field_array(&self) -> Option<&ArrayValue> {
        self.parent.as_compound()?.field(&self.field).ok()
    }
}

impl Adapter for FieldAdapter {
    fn type_name(&self) -> &str {
        "Field"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Field
    }

    fn has_children(&self) -> bool {
        false
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(self)
    }
}

impl Sliceable for FieldAdapter {
    /// Record shape followed by the field's sub-shape
    fn shape(&self) -> Vec<usize> {
        self.field_array()
            .map(|field| field.shape().to_vec())
            .unwrap_or_default()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.parent.get_field_item(&self.field, index)?)
    }

    fn element_type_name(&self) -> String {
        self.field_array()
            .map(|field| field.element_type_name().to_string())
            .unwrap_or_default()
    }

    fn dimension_names(&self) -> Vec<String> {
        let record_ndim = self.parent.ndim();
        let sub_ndim = self.shape().len().saturating_sub(record_ndim);
        (0..record_ndim)
            .map(|n| format!("dim-{n}"))
            .chain((0..sub_ndim).map(|n| format!("subdim-{n}")))
            .collect()
    }
}

/// A list of values; children are named `elem-0`, `elem-1`, ...
pub struct SequenceAdapter {
    items: Vec<Value>,
}

impl SequenceAdapter {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl Adapter for SequenceAdapter {
    fn type_name(&self) -> &str {
        "Sequence"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Sequence
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(self
            .items
            .iter()
            .enumerate()
            .map(|(n, value)| create_with_color(format!("elem-{n}"), value.clone(), ctx.icon_color))
            .collect())
    }

    fn summary(&self) -> String {
        format!("{} items", self.items.len())
    }
}

/// A dictionary; children follow the sorted key order
pub struct MappingAdapter {
    map: BTreeMap<String, Value>,
}

impl MappingAdapter {
    pub fn new(map: BTreeMap<String, Value>) -> Self {
        Self { map }
    }
}

impl Adapter for MappingAdapter {
    fn type_name(&self) -> &str {
        "Mapping"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Group
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(self
            .map
            .iter()
            .map(|(key, value)| create_with_color(key.as_str(), value.clone(), ctx.icon_color))
            .collect())
    }
}

/// Generator for [`SyntheticArrayAdapter`]
pub type ArrayGenerator = Box<dyn Fn() -> Result<ArrayValue, RtiError>>;

/// An array computed when the item is opened and dropped when it is closed
pub struct SyntheticArrayAdapter {
    generator: ArrayGenerator,
    array: Option<Arc<ArrayValue>>,
}

impl SyntheticArrayAdapter {
    pub fn new(generator: impl Fn() -> Result<ArrayValue, RtiError> + 'static) -> Self {
        Self {
            generator: Box::new(generator),
            array: None,
        }
    }
}

impl Adapter for SyntheticArrayAdapter {
    fn type_name(&self) -> &str {
        "Synthetic Array"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.array = Some(Arc::new((self.generator)()?));
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.array = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.array.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(self
            .array
            .as_ref()
            .map(|array| field_children(array, ctx.icon_color))
            .unwrap_or_default())
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.array.as_deref().map(|array| array as &dyn Sliceable)
    }

    fn summary(&self) -> String {
        self.array
            .as_ref()
            .map(|array| shape_summary(array.shape()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::CompoundArray;
    use crate::config::ErrorPolicy;
    use crate::registry::Registry;
    use ndarray::{arr1, Array, IxDyn};

    fn fetch(item: &mut RepoTreeItem) -> Vec<RepoTreeItem> {
        item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap()
    }

    fn records() -> ArrayValue {
        let x: ArrayValue = arr1(&[1.0f64, 2.0, 3.0, 4.0]).into_dyn().into();
        let pos: ArrayValue = Array::from_shape_vec(IxDyn(&[4, 2]), (0..8i32).collect())
            .unwrap()
            .into();
        ArrayValue::Compound(
            CompoundArray::new(vec![4], vec![("x".into(), x), ("pos".into(), pos)]).unwrap(),
        )
    }

    #[test]
    fn test_array_item() {
        let array: ArrayValue = Array::from_shape_vec(IxDyn(&[3, 8]), (0..24i64).collect())
            .unwrap()
            .into();
        let item = create_from_value("a", Value::Array(array));
        assert!(item.is_sliceable());
        assert_eq!(item.shape().unwrap(), vec![3, 8]);
        let result = item
            .get_item(&[IndexElem::at(1), IndexElem::range(2, 5)])
            .unwrap();
        let expected: ArrayValue = arr1(&[10i64, 11, 12]).into_dyn().into();
        assert_eq!(result, expected);
        assert_eq!(item.icon_color(), colors::MEMORY);
    }

    #[test]
    fn test_mapping_sorted() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Value::Int(2));
        map.insert("a".to_string(), Value::Int(1));
        let mut item = create_from_value("m", Value::Mapping(map));
        let children = fetch(&mut item);
        let names: Vec<&str> = children.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(children[0].type_name(), "Scalar");
        assert!(item.summary().is_empty());
    }

    #[test]
    fn test_sequence_names() {
        let mut item = create_from_value(
            "s",
            Value::Sequence(vec![Value::from("x"), Value::Sequence(vec![])]),
        );
        let children = fetch(&mut item);
        assert_eq!(children[0].node_name(), "elem-0");
        assert_eq!(children[1].node_name(), "elem-1");
        assert_eq!(children[1].type_name(), "Sequence");
    }

    #[test]
    fn test_scalar_item() {
        let item = create_from_value("pi", Value::Float(3.5));
        assert!(item.is_sliceable());
        assert!(item.shape().unwrap().is_empty());
        assert_eq!(item.summary(), "3.5");
        assert_eq!(item.element_type_name(), "float64");
        assert_eq!(item.get_item(&[]).unwrap().scalar_value(), Some(Value::Float(3.5)));
        assert!(matches!(
            item.get_item(&[IndexElem::at(0)]),
            Err(RtiError::Index(_))
        ));
    }

    #[test]
    fn test_structured_array_children() {
        let mut item = create_from_value("rec", Value::Array(records()));
        assert_eq!(item.element_type_name(), "<structured>");
        let children = fetch(&mut item);
        let names: Vec<&str> = children.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["x", "pos"]);

        let pos = &children[1];
        assert_eq!(pos.shape().unwrap(), vec![4, 2]);
        assert_eq!(pos.dimension_names(), vec!["dim-0", "subdim-0"]);
        assert_eq!(pos.element_type_name(), "int32");
    }

    #[test]
    fn test_field_indexes_records_first() {
        let parent = Arc::new(records());
        let x = FieldAdapter::new(Arc::clone(&parent), "x");
        let pos = FieldAdapter::new(Arc::clone(&parent), "pos");

        for index in [
            vec![IndexElem::at(2)],
            vec![IndexElem::range(1, 3)],
            vec![IndexElem::slice(None, None, -2)],
        ] {
            let expected = parent.get_item(&index).unwrap().field("x").unwrap();
            assert_eq!(Sliceable::get_item(&x, &index).unwrap(), expected);
        }

        // Record index then sub-axis index
        let value = Sliceable::get_item(&pos, &[IndexElem::at(3), IndexElem::at(1)]).unwrap();
        assert_eq!(value.scalar_value(), Some(Value::Int(7)));
        let column = Sliceable::get_item(&pos, &[IndexElem::Ellipsis, IndexElem::at(0)]).unwrap();
        let expected: ArrayValue = arr1(&[0i32, 2, 4, 6]).into_dyn().into();
        assert_eq!(column, expected);
    }

    #[test]
    fn test_synthetic_array_lifecycle() {
        let mut item = RepoTreeItem::new(
            "ramp",
            SyntheticArrayAdapter::new(|| Ok(arr1(&[0.0f64, 0.5, 1.0]).into_dyn().into())),
        );
        assert!(!item.is_sliceable());
        item.open(ErrorPolicy::Strict).unwrap();
        assert!(item.holds_resource());
        assert_eq!(item.shape().unwrap(), vec![3]);
        item.close(ErrorPolicy::Strict).unwrap();
        assert!(!item.holds_resource());
        assert!(!item.is_sliceable());
    }

    #[test]
    fn test_synthetic_array_failure() {
        let mut item = RepoTreeItem::new(
            "broken",
            SyntheticArrayAdapter::new(|| Err(RtiError::Other("no data".into()))),
        );
        item.open(ErrorPolicy::Lenient).unwrap();
        assert!(!item.is_open());
        assert!(item.last_error().is_some());
    }
}
