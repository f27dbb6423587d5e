//! Packed record buffers
//!
//! Structured NumPy arrays, HDF-5 compound datasets and NetCDF compound
//! variables all store records as fixed-size runs of bytes. A [`RecordLayout`]
//! says where each field lives inside a record, and decoding a buffer of
//! records yields a [`CompoundArray`] with one array per field.
//!
//! Fields of records that stay on disk are shown by [`RecordFieldAdapter`],
//! which asks its [`RecordSource`] for the selected records only.

use std::collections::BTreeMap;
use std::sync::Arc;

use dv_core::adapter::{Adapter, IconGlyph, Sliceable};
use dv_core::array::{shape_summary, split_field_index, ArrayValue, CompoundArray, IndexElem};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use ndarray::{ArrayD, IxDyn};

use crate::attributes::{find_attribute, masked, per_field, value_text, MISSING_VALUE_ATTRIBUTES, UNIT_ATTRIBUTES};
use crate::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    Native,
}

/// Element type of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Byte string of a fixed length, cut at the first NUL
    Bytes(usize),
    /// UTF-32 text of a fixed number of code points
    Utf32(usize),
}

impl ElementKind {
    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 => 8,
            ElementKind::Bytes(len) => *len,
            ElementKind::Utf32(len) => 4 * len,
        }
    }

    /// Name in the vocabulary of [`ArrayValue::element_type_name`]
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementKind::Bool => "bool",
            ElementKind::I8 => "int8",
            ElementKind::I16 => "int16",
            ElementKind::I32 => "int32",
            ElementKind::I64 => "int64",
            ElementKind::U8 => "uint8",
            ElementKind::U16 => "uint16",
            ElementKind::U32 => "uint32",
            ElementKind::U64 => "uint64",
            ElementKind::F32 => "float32",
            ElementKind::F64 => "float64",
            ElementKind::Bytes(_) | ElementKind::Utf32(_) => "str",
        }
    }
}

/// Position and type of one field inside a record
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub kind: ElementKind,
    pub order: ByteOrder,
    /// Shape of the field within one record; empty for single elements
    pub sub_shape: Vec<usize>,
    pub offset: usize,
}

impl FieldLayout {
    pub fn new(name: impl Into<String>, kind: ElementKind, offset: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            order: ByteOrder::Native,
            sub_shape: Vec::new(),
            offset,
        }
    }

    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_sub_shape(mut self, sub_shape: Vec<usize>) -> Self {
        self.sub_shape = sub_shape;
        self
    }

    /// Bytes the field occupies in each record
    pub fn byte_len(&self) -> usize {
        self.kind.size() * self.sub_shape.iter().product::<usize>()
    }
}

/// Fields of a record type and the size of one record in bytes.
///
/// Bytes not covered by a field are padding or members that cannot be shown.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    pub size: usize,
    pub fields: Vec<FieldLayout>,
}

impl RecordLayout {
    pub fn new(size: usize, fields: Vec<FieldLayout>) -> Self {
        Self { size, fields }
    }

    /// Decode `shape` records stored back to back in C order
    pub fn decode(&self, bytes: &[u8], shape: &[usize]) -> Result<CompoundArray, DataError> {
        if self.size == 0 {
            return Err(DataError::Format("record type has no size".to_string()));
        }
        let count: usize = shape.iter().product();
        if bytes.len() != count * self.size {
            return Err(DataError::Format(format!(
                "expected {} bytes for {} records of {} bytes, found {}",
                count * self.size,
                count,
                self.size,
                bytes.len()
            )));
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let end = field.offset + field.byte_len();
            if end > self.size {
                return Err(DataError::Format(format!(
                    "field '{}' runs past the end of its {} byte record",
                    field.name, self.size
                )));
            }
            let mut raw = Vec::with_capacity(count * field.byte_len());
            for record in bytes.chunks_exact(self.size) {
                raw.extend_from_slice(&record[field.offset..end]);
            }
            let field_shape: Vec<usize> = shape.iter().chain(&field.sub_shape).copied().collect();
            fields.push((field.name.clone(), decode_elements(field.kind, field.order, &raw, &field_shape)?));
        }
        Ok(CompoundArray::new(shape.to_vec(), fields)?)
    }
}

macro_rules! decode_numbers {
    ($bytes:expr, $order:expr, $shape:expr, $t:ty, $variant:ident) => {{
        const SIZE: usize = std::mem::size_of::<$t>();
        let values: Vec<$t> = $bytes
            .chunks_exact(SIZE)
            .map(|chunk| {
                let mut raw = [0u8; SIZE];
                raw.copy_from_slice(chunk);
                match $order {
                    ByteOrder::Little => <$t>::from_le_bytes(raw),
                    ByteOrder::Big => <$t>::from_be_bytes(raw),
                    ByteOrder::Native => <$t>::from_ne_bytes(raw),
                }
            })
            .collect();
        ArrayValue::$variant(ArrayD::from_shape_vec(IxDyn($shape), values)?)
    }};
}

/// Decode packed elements of a single kind into an array of `shape`
pub fn decode_elements(
    kind: ElementKind,
    order: ByteOrder,
    bytes: &[u8],
    shape: &[usize],
) -> Result<ArrayValue, DataError> {
    let count: usize = shape.iter().product();
    if bytes.len() != count * kind.size() {
        return Err(DataError::Format(format!(
            "expected {} bytes for {} {} elements, found {}",
            count * kind.size(),
            count,
            kind.type_name(),
            bytes.len()
        )));
    }

    let array = match kind {
        ElementKind::Bool => {
            let values = bytes.iter().map(|&byte| byte != 0).collect();
            ArrayValue::Bool(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }
        ElementKind::I8 => decode_numbers!(bytes, order, shape, i8, I8),
        ElementKind::I16 => decode_numbers!(bytes, order, shape, i16, I16),
        ElementKind::I32 => decode_numbers!(bytes, order, shape, i32, I32),
        ElementKind::I64 => decode_numbers!(bytes, order, shape, i64, I64),
        ElementKind::U8 => decode_numbers!(bytes, order, shape, u8, U8),
        ElementKind::U16 => decode_numbers!(bytes, order, shape, u16, U16),
        ElementKind::U32 => decode_numbers!(bytes, order, shape, u32, U32),
        ElementKind::U64 => decode_numbers!(bytes, order, shape, u64, U64),
        ElementKind::F32 => decode_numbers!(bytes, order, shape, f32, F32),
        ElementKind::F64 => decode_numbers!(bytes, order, shape, f64, F64),
        ElementKind::Bytes(0) | ElementKind::Utf32(0) => {
            ArrayValue::Str(ArrayD::from_shape_vec(IxDyn(shape), vec![String::new(); count])?)
        }
        ElementKind::Bytes(len) => {
            let values = bytes.chunks_exact(len).map(bytes_to_text).collect();
            ArrayValue::Str(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }
        ElementKind::Utf32(len) => {
            let values = bytes.chunks_exact(4 * len).map(|chunk| utf32_to_text(chunk, order)).collect();
            ArrayValue::Str(ArrayD::from_shape_vec(IxDyn(shape), values)?)
        }
    };
    Ok(array)
}

/// Text of a NUL padded byte string; invalid UTF-8 is replaced
pub fn bytes_to_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&byte| byte == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn utf32_to_text(bytes: &[u8], order: ByteOrder) -> String {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            match order {
                ByteOrder::Little => u32::from_le_bytes(raw),
                ByteOrder::Big => u32::from_be_bytes(raw),
                ByteOrder::Native => u32::from_ne_bytes(raw),
            }
        })
        .take_while(|&code| code != 0)
        .map(|code| char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Records stored in a file, read one selection at a time
pub trait RecordSource {
    fn record_shape(&self) -> Vec<usize>;

    /// `records[index]` as a compound array; `index` covers the record axes only
    fn read_records(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError>;

    fn record_dimension_names(&self) -> Vec<String>;

    /// Attributes of the record array; entries may hold one value per field
    fn record_attributes(&self) -> &BTreeMap<String, Value>;
}

/// One field of records that stay in the file.
///
/// Indexing reads `parent[record_index]` from the source and then selects
/// the field, so only the selected records are decoded.
pub struct RecordFieldAdapter {
    type_name: &'static str,
    source: Arc<dyn RecordSource>,
    field: FieldLayout,
    position: usize,
    field_count: usize,
}

impl RecordFieldAdapter {
    /// One child per field of `layout`
    pub fn children(
        type_name: &'static str,
        source: Arc<dyn RecordSource>,
        layout: &RecordLayout,
        icon_color: &str,
    ) -> Vec<RepoTreeItem> {
        let field_count = layout.fields.len();
        layout
            .fields
            .iter()
            .enumerate()
            .map(|(position, field)| {
                let adapter = RecordFieldAdapter {
                    type_name,
                    source: Arc::clone(&source),
                    field: field.clone(),
                    position,
                    field_count,
                };
                RepoTreeItem::new(field.name.as_str(), adapter).with_icon_color(icon_color)
            })
            .collect()
    }

    fn field_attribute(&self, names: &[&str]) -> Option<Value> {
        let value = find_attribute(self.source.record_attributes(), names).cloned();
        per_field(value, self.position, self.field_count)
    }
}

impl Adapter for RecordFieldAdapter {
    fn type_name(&self) -> &str {
        self.type_name
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

    fn summary(&self) -> String {
        shape_summary(&Sliceable::shape(self))
    }
}

impl Sliceable for RecordFieldAdapter {
    fn shape(&self) -> Vec<usize> {
        let mut shape = self.source.record_shape();
        shape.extend_from_slice(&self.field.sub_shape);
        shape
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let record_ndim = self.source.record_shape().len();
        let (record_part, sub_part) = split_field_index(index, record_ndim, self.field.sub_shape.len())?;
        let mut selected = self.source.read_records(&record_part)?.field(&self.field.name)?;
        if !sub_part.is_empty() {
            selected = selected.get_item(&sub_part)?;
        }
        Ok(masked(selected, self.missing_data_value().as_ref()))
    }

    fn element_type_name(&self) -> String {
        self.field.kind.type_name().to_string()
    }

    fn dimension_names(&self) -> Vec<String> {
        let mut names = self.source.record_dimension_names();
        names.extend((0..self.field.sub_shape.len()).map(|n| format!("SubDim{n}")));
        names
    }

    fn unit(&self) -> String {
        self.field_attribute(&UNIT_ATTRIBUTES).map(|unit| value_text(&unit)).unwrap_or_default()
    }

    fn missing_data_value(&self) -> Option<Value> {
        self.field_attribute(&MISSING_VALUE_ATTRIBUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array};
    use std::cell::Cell;

    /// Records `(id: i16 LE, pos: 2 x f32 BE)` with a byte of padding
    fn sample_layout() -> RecordLayout {
        RecordLayout::new(
            11,
            vec![
                FieldLayout::new("id", ElementKind::I16, 0).with_order(ByteOrder::Little),
                FieldLayout::new("pos", ElementKind::F32, 3)
                    .with_order(ByteOrder::Big)
                    .with_sub_shape(vec![2]),
            ],
        )
    }

    fn sample_bytes(count: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        for n in 0..count {
            bytes.extend_from_slice(&(n as i16 * 10).to_le_bytes());
            bytes.push(0xff);
            bytes.extend_from_slice(&(n as f32).to_be_bytes());
            bytes.extend_from_slice(&(-(n as f32)).to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_records() {
        let records = sample_layout().decode(&sample_bytes(3), &[3]).unwrap();
        assert_eq!(records.field("id").unwrap(), &ArrayValue::from(arr1(&[0i16, 10, 20]).into_dyn()));
        let pos: ArrayValue = Array::from_shape_vec(IxDyn(&[3, 2]), vec![0.0f32, -0.0, 1.0, -1.0, 2.0, -2.0])
            .unwrap()
            .into();
        assert_eq!(records.field("pos").unwrap(), &pos);
    }

    #[test]
    fn test_decode_rejects_short_buffers() {
        let layout = sample_layout();
        assert!(matches!(layout.decode(&sample_bytes(2), &[3]), Err(DataError::Format(_))));

        let overlong = RecordLayout::new(4, vec![FieldLayout::new("x", ElementKind::F64, 0)]);
        assert!(overlong.decode(&[0; 8], &[2]).is_err());
    }

    #[test]
    fn test_decode_text() {
        let bytes = b"ab\0\0xyzw";
        let text = decode_elements(ElementKind::Bytes(4), ByteOrder::Native, bytes, &[2]).unwrap();
        assert_eq!(text, ArrayValue::Str(arr1(&["ab".to_string(), "xyzw".to_string()]).into_dyn()));

        let mut wide = Vec::new();
        for code in ['h' as u32, 'é' as u32, 0] {
            wide.extend_from_slice(&code.to_le_bytes());
        }
        let text = decode_elements(ElementKind::Utf32(3), ByteOrder::Little, &wide, &[]).unwrap();
        assert_eq!(text.scalar_value(), Some(Value::from("hé")));
    }

    /// Serves records from memory and counts how many it decodes
    struct CountingSource {
        layout: RecordLayout,
        bytes: Vec<u8>,
        attributes: BTreeMap<String, Value>,
        decoded: Cell<usize>,
    }

    impl RecordSource for CountingSource {
        fn record_shape(&self) -> Vec<usize> {
            vec![4]
        }

        fn read_records(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
            let all = ArrayValue::Compound(self.layout.decode(&self.bytes, &[4])?);
            let selected = all.get_item(index)?;
            self.decoded.set(self.decoded.get() + selected.len());
            Ok(selected)
        }

        fn record_dimension_names(&self) -> Vec<String> {
            vec!["time".to_string()]
        }

        fn record_attributes(&self) -> &BTreeMap<String, Value> {
            &self.attributes
        }
    }

    #[test]
    fn test_field_adapter_slices_records() {
        let mut attributes = BTreeMap::new();
        let units: ArrayValue = arr1(&["".to_string(), "m".to_string()]).into_dyn().into();
        attributes.insert("units".to_string(), Value::Array(units));
        attributes.insert("_FillValue".to_string(), Value::Float(-3.0));
        let source = Arc::new(CountingSource {
            layout: sample_layout(),
            bytes: sample_bytes(4),
            attributes,
            decoded: Cell::new(0),
        });

        let children = RecordFieldAdapter::children("Test field", source.clone(), &sample_layout(), "#123456");
        let names: Vec<&str> = children.iter().map(|child| child.node_name()).collect();
        assert_eq!(names, vec!["id", "pos"]);

        let pos = &children[1];
        assert_eq!(pos.type_name(), "Test field");
        assert_eq!(pos.shape().unwrap(), vec![4, 2]);
        assert_eq!(pos.dimension_names(), vec!["time", "SubDim0"]);
        assert_eq!(pos.unit(), "m");
        assert_eq!(pos.element_type_name(), "float32");

        let column = pos.get_item(&[IndexElem::range(2, 4), IndexElem::at(1)]).unwrap();
        let values = column.to_f64().unwrap();
        assert_eq!(values[[0]], -2.0);
        assert!(values[[1]].is_nan());
        assert_eq!(source.decoded.get(), 2);
    }
}
