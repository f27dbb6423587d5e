//! Conventional attribute names shared by the self-describing formats

use std::collections::BTreeMap;

use dv_core::array::IndexElem;
use dv_core::{ArrayValue, Value};

pub const UNIT_ATTRIBUTES: [&str; 6] = ["unit", "units", "Unit", "Units", "UNIT", "UNITS"];

pub const MISSING_VALUE_ATTRIBUTES: [&str; 5] =
    ["missing_value", "MissingValue", "missingValue", "FillValue", "_FillValue"];

/// The first attribute present from `names`, in the order given
pub fn find_attribute<'a>(attributes: &'a BTreeMap<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| attributes.get(*name))
}

/// The unit text, empty when there is none
pub fn unit_of(attributes: &BTreeMap<String, Value>) -> String {
    find_attribute(attributes, &UNIT_ATTRIBUTES).map(value_text).unwrap_or_default()
}

/// Strings without quotes, anything else as displayed
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Str(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn missing_value_of(attributes: &BTreeMap<String, Value>) -> Option<Value> {
    find_attribute(attributes, &MISSING_VALUE_ATTRIBUTES).cloned()
}

/// A field's own entry of an attribute that holds one value per record field.
/// Other values apply to every field.
pub fn per_field(value: Option<Value>, position: usize, field_count: usize) -> Option<Value> {
    match value {
        Some(Value::Array(array)) if array.ndim() == 1 && array.len() == field_count => {
            array.get_item(&[IndexElem::at(position as isize)]).ok()?.scalar_value()
        }
        Some(Value::Sequence(mut items)) if items.len() == field_count => Some(items.swap_remove(position)),
        other => other,
    }
}

/// Floating point elements equal to the missing value become NaN
pub fn masked(array: ArrayValue, missing: Option<&Value>) -> ArrayValue {
    match missing {
        Some(missing) => array.mask_missing(missing),
        None => array,
    }
}

/// Attribute arrays with a single element become plain values
pub fn unwrap_single(array: ArrayValue) -> Value {
    if array.len() != 1 {
        return Value::Array(array);
    }
    let index = vec![IndexElem::at(0); array.ndim()];
    match array.get_item(&index).ok().and_then(|element| element.scalar_value()) {
        Some(value) => value,
        None => Value::Array(array),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_lookup_order() {
        let mut attributes = BTreeMap::new();
        attributes.insert("_FillValue".to_string(), Value::Float(-1.0));
        attributes.insert("missing_value".to_string(), Value::Float(-999.0));
        attributes.insert("Units".to_string(), Value::from("K"));

        assert_eq!(missing_value_of(&attributes), Some(Value::Float(-999.0)));
        assert_eq!(unit_of(&attributes), "K");
        assert_eq!(unit_of(&BTreeMap::new()), "");
    }

    #[test]
    fn test_per_field_values() {
        let units: ArrayValue = arr1(&["s".to_string(), "m".to_string()]).into_dyn().into();
        assert_eq!(per_field(Some(Value::Array(units.clone())), 1, 2), Some(Value::from("m")));
        assert_eq!(per_field(Some(Value::Array(units.clone())), 0, 3), Some(Value::Array(units)));

        let fills = Value::Sequence(vec![Value::Int(-1), Value::Float(-9.5)]);
        assert_eq!(per_field(Some(fills), 1, 2), Some(Value::Float(-9.5)));
        assert_eq!(per_field(Some(Value::Float(0.0)), 1, 2), Some(Value::Float(0.0)));
        assert_eq!(per_field(None, 0, 1), None);
    }

    #[test]
    fn test_masked() {
        let data: ArrayValue = arr1(&[1.0f32, -1.0]).into_dyn().into();
        let values = masked(data.clone(), Some(&Value::Float(-1.0))).to_f64().unwrap();
        assert!(values[[1]].is_nan());
        assert_eq!(masked(data.clone(), None), data);
    }

    #[test]
    fn test_unwrap_single() {
        assert_eq!(unwrap_single(arr1(&[2.5f32]).into_dyn().into()), Value::Float(2.5));
        assert_eq!(unwrap_single(arr2(&[[7i32]]).into_dyn().into()), Value::Int(7));

        let pair: ArrayValue = arr1(&[1u8, 2]).into_dyn().into();
        assert_eq!(unwrap_single(pair.clone()), Value::Array(pair));
    }
}
