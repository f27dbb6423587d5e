//! NumPy binary, compressed and text files
//!
//! Plain numeric `.npy` files are read through `ndarray-npy`. Text and
//! structured element types are decoded from the header's descriptor by
//! [`crate::records`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;
use std::sync::Arc;

use dv_core::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::array::ArrayValue;
use dv_core::memory::{create_with_color, field_children};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use ndarray::{Array2, ArrayD, Axis, IxDyn, OwnedRepr, ShapeBuilder};
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpyExt, ReadNpzError};
use tracing::{debug, warn};

use crate::records::{decode_elements, ByteOrder, ElementKind, FieldLayout, RecordLayout};
use crate::DataError;

pub const ICON_COLOR: &str = "#987456";

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Python literal as written in a `.npy` header. Tuples read as lists.
#[derive(Debug, Clone, PartialEq)]
enum PyLiteral {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    List(Vec<PyLiteral>),
    Dict(Vec<(PyLiteral, PyLiteral)>),
}

impl PyLiteral {
    fn parse(text: &str) -> Result<PyLiteral, DataError> {
        let mut chars = text.chars().peekable();
        let value = parse_literal(&mut chars)?;
        skip_whitespace(&mut chars);
        match chars.next() {
            None => Ok(value),
            Some(c) => Err(header_error(format!("unexpected '{c}' after the header dictionary"))),
        }
    }

    fn get(&self, key: &str) -> Option<&PyLiteral> {
        let PyLiteral::Dict(entries) = self else {
            return None;
        };
        entries.iter().find_map(|(k, v)| matches!(k, PyLiteral::Str(name) if name == key).then_some(v))
    }

    /// A shape: an integer or a sequence of integers
    fn as_shape(&self) -> Result<Vec<usize>, DataError> {
        let to_len = |value: &PyLiteral| match value {
            PyLiteral::Int(n) if *n >= 0 => Ok(*n as usize),
            other => Err(header_error(format!("invalid dimension {other:?}"))),
        };
        match self {
            PyLiteral::List(items) => items.iter().map(to_len).collect(),
            single => Ok(vec![to_len(single)?]),
        }
    }
}

fn header_error(message: String) -> DataError {
    DataError::Format(format!("NumPy header: {message}"))
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

fn parse_literal(chars: &mut Peekable<Chars<'_>>) -> Result<PyLiteral, DataError> {
    skip_whitespace(chars);
    match chars.peek().copied() {
        Some('{') => {
            chars.next();
            let mut entries = Vec::new();
            loop {
                skip_whitespace(chars);
                if chars.next_if_eq(&'}').is_some() {
                    return Ok(PyLiteral::Dict(entries));
                }
                let key = parse_literal(chars)?;
                skip_whitespace(chars);
                if chars.next() != Some(':') {
                    return Err(header_error("expected ':' in dictionary".to_string()));
                }
                entries.push((key, parse_literal(chars)?));
                skip_whitespace(chars);
                if chars.next_if_eq(&',').is_none() && chars.peek() != Some(&'}') {
                    return Err(header_error("expected ',' or '}' in dictionary".to_string()));
                }
            }
        }
        Some(open @ ('[' | '(')) => {
            chars.next();
            let close = if open == '[' { ']' } else { ')' };
            let mut items = Vec::new();
            loop {
                skip_whitespace(chars);
                if chars.next_if_eq(&close).is_some() {
                    return Ok(PyLiteral::List(items));
                }
                items.push(parse_literal(chars)?);
                skip_whitespace(chars);
                if chars.next_if_eq(&',').is_none() && chars.peek() != Some(&close) {
                    return Err(header_error(format!("expected ',' or '{close}'")));
                }
            }
        }
        Some(quote @ ('\'' | '"')) => {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == quote => return Ok(PyLiteral::Str(text)),
                    Some('\\') => text.extend(chars.next()),
                    Some(c) => text.push(c),
                    None => return Err(header_error("unterminated string".to_string())),
                }
            }
        }
        Some(_) => {
            let mut word = String::new();
            while let Some(c) = chars.next_if(|c| c.is_alphanumeric() || *c == '-' || *c == '_') {
                word.push(c);
            }
            match word.as_str() {
                "True" => Ok(PyLiteral::Bool(true)),
                "False" => Ok(PyLiteral::Bool(false)),
                "None" => Ok(PyLiteral::None),
                number => number
                    .parse()
                    .map(PyLiteral::Int)
                    .map_err(|_| header_error(format!("unexpected token '{number}'"))),
            }
        }
        None => Err(header_error("unexpected end of header".to_string())),
    }
}

/// The header of a `.npy` file and where its data starts
struct NpyHeader {
    descr: PyLiteral,
    fortran_order: bool,
    shape: Vec<usize>,
    data_offset: usize,
}

impl NpyHeader {
    /// Length and start of the header text given the file's first bytes
    fn span(bytes: &[u8]) -> Result<(usize, usize), DataError> {
        if !bytes.starts_with(NPY_MAGIC) || bytes.len() < 10 {
            return Err(DataError::Format("not a NumPy file".to_string()));
        }
        match bytes[6] {
            1 => Ok((u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10)),
            2 | 3 if bytes.len() >= 12 => {
                Ok((u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12))
            }
            version => Err(DataError::Format(format!("unsupported NumPy format version {version}"))),
        }
    }

    fn parse(bytes: &[u8]) -> Result<NpyHeader, DataError> {
        let (header_len, header_start) = Self::span(bytes)?;
        let raw = bytes
            .get(header_start..header_start + header_len)
            .ok_or_else(|| header_error("truncated".to_string()))?;
        let dict = PyLiteral::parse(&String::from_utf8_lossy(raw))?;

        let descr = dict.get("descr").cloned().ok_or_else(|| header_error("missing 'descr'".to_string()))?;
        let fortran_order = matches!(dict.get("fortran_order"), Some(PyLiteral::Bool(true)));
        let shape = dict
            .get("shape")
            .ok_or_else(|| header_error("missing 'shape'".to_string()))?
            .as_shape()?;
        Ok(NpyHeader {
            descr,
            fortran_order,
            shape,
            data_offset: header_start + header_len,
        })
    }
}

/// Parse a type string such as `<f8` or `|S5`. The kind is `None` for types
/// that have a size but cannot be shown (complex, datetime, void).
fn parse_typestr(typestr: &str) -> Result<(Option<ElementKind>, ByteOrder, usize), DataError> {
    let mut chars = typestr.chars();
    let mut kind = chars.next().ok_or_else(|| header_error("empty type string".to_string()))?;
    let order = match kind {
        '<' => ByteOrder::Little,
        '>' => ByteOrder::Big,
        _ => ByteOrder::Native,
    };
    if matches!(kind, '<' | '>' | '|' | '=') {
        kind = chars.next().ok_or_else(|| header_error(format!("no type in '{typestr}'")))?;
    }
    let digits: String = chars.take_while(|c| c.is_ascii_digit()).collect();
    let size: usize = match (kind, digits.as_str()) {
        ('?', "") => 1,
        (_, digits) => digits
            .parse()
            .map_err(|_| header_error(format!("no size in '{typestr}'")))?,
    };

    let element = match (kind, size) {
        ('?' | 'b', 1) => Some(ElementKind::Bool),
        ('i', 1) => Some(ElementKind::I8),
        ('i', 2) => Some(ElementKind::I16),
        ('i', 4) => Some(ElementKind::I32),
        ('i', 8) => Some(ElementKind::I64),
        ('u', 1) => Some(ElementKind::U8),
        ('u', 2) => Some(ElementKind::U16),
        ('u', 4) => Some(ElementKind::U32),
        ('u', 8) => Some(ElementKind::U64),
        ('f', 4) => Some(ElementKind::F32),
        ('f', 8) => Some(ElementKind::F64),
        ('S' | 'a', len) => Some(ElementKind::Bytes(len)),
        ('U', len) => return Ok((Some(ElementKind::Utf32(len)), order, 4 * len)),
        ('c' | 'M' | 'm' | 'V' | 'f', _) => None,
        _ => return Err(header_error(format!("unknown type '{typestr}'"))),
    };
    Ok((element, order, size))
}

/// Record layout of a structured descriptor, a list of
/// `(name, type[, shape])` entries
fn record_layout(entries: &[PyLiteral]) -> Result<RecordLayout, DataError> {
    let mut fields = Vec::new();
    let mut offset = 0;
    for entry in entries {
        let PyLiteral::List(parts) = entry else {
            return Err(header_error(format!("invalid field {entry:?}")));
        };
        let name = match parts.first() {
            Some(PyLiteral::Str(name)) => name.clone(),
            // (title, name) pairs
            Some(PyLiteral::List(titled)) => match titled.last() {
                Some(PyLiteral::Str(name)) => name.clone(),
                _ => return Err(header_error(format!("invalid field name in {entry:?}"))),
            },
            _ => return Err(header_error(format!("invalid field {entry:?}"))),
        };
        let sub_shape = match parts.get(2) {
            Some(shape) => shape.as_shape()?,
            None => Vec::new(),
        };
        let count: usize = sub_shape.iter().product();

        let (kind, order, size) = match parts.get(1) {
            Some(PyLiteral::Str(typestr)) => parse_typestr(typestr)?,
            Some(PyLiteral::List(nested)) => (None, ByteOrder::Native, record_layout(nested)?.size),
            _ => return Err(header_error(format!("invalid field type in {entry:?}"))),
        };
        match kind {
            Some(kind) if !name.is_empty() => {
                fields.push(
                    FieldLayout::new(name, kind, offset)
                        .with_order(order)
                        .with_sub_shape(sub_shape),
                );
            }
            None if !name.is_empty() => warn!("Skipping field '{}' of unsupported NumPy type", name),
            // unnamed padding
            _ => {}
        }
        offset += size * count;
    }
    Ok(RecordLayout::new(offset, fields))
}

/// Element bytes of a Fortran ordered array rearranged into C order
fn c_order_bytes(data: &[u8], element_size: usize, shape: &[usize]) -> Result<Vec<u8>, DataError> {
    let count = shape.iter().product();
    let positions = ArrayD::from_shape_vec(IxDyn(shape).f(), (0..count).collect::<Vec<usize>>())?;
    let mut reordered = Vec::with_capacity(data.len());
    for &position in positions.iter() {
        reordered.extend_from_slice(&data[position * element_size..(position + 1) * element_size]);
    }
    Ok(reordered)
}

/// The data section of a `.npy` file whose elements are `element_size` bytes
fn element_bytes<'a>(
    bytes: &'a [u8],
    header: &NpyHeader,
    element_size: usize,
) -> Result<Cow<'a, [u8]>, DataError> {
    let len = header.shape.iter().product::<usize>() * element_size;
    let data = bytes
        .get(header.data_offset..header.data_offset + len)
        .ok_or_else(|| DataError::Format(format!("NumPy data shorter than {len} bytes")))?;
    if header.fortran_order && header.shape.len() > 1 {
        Ok(Cow::Owned(c_order_bytes(data, element_size, &header.shape)?))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

fn read_numeric_npy(bytes: &[u8]) -> Result<ArrayValue, DataError> {
    macro_rules! first_matching {
        ($($t:ty),*) => {{
            $(
                match ArrayD::<$t>::read_npy(Cursor::new(bytes)) {
                    Ok(array) => return Ok(ArrayValue::from(array)),
                    Err(ReadNpyError::WrongDescriptor(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            )*
            Err(DataError::Format("unsupported NumPy element type".into()))
        }};
    }
    first_matching!(f64, f32, i64, i32, i16, i8, u64, u32, u16, u8, bool)
}

/// Decode an in-memory `.npy` file.
///
/// Structured arrays become compound arrays with one field per named member;
/// byte and unicode strings become text.
pub fn read_npy_bytes(bytes: &[u8]) -> Result<ArrayValue, DataError> {
    Ok(read_npy_records(bytes)?.0)
}

/// Same as [`read_npy_bytes`], also returning the record layout of
/// structured arrays
pub fn read_npy_records(bytes: &[u8]) -> Result<(ArrayValue, Option<RecordLayout>), DataError> {
    let header = NpyHeader::parse(bytes)?;
    match &header.descr {
        PyLiteral::List(entries) => {
            let layout = record_layout(entries)?;
            let data = element_bytes(bytes, &header, layout.size)?;
            let records = ArrayValue::Compound(layout.decode(&data, &header.shape)?);
            Ok((records, Some(layout)))
        }
        PyLiteral::Str(typestr) => match parse_typestr(typestr)? {
            (Some(kind @ (ElementKind::Bytes(_) | ElementKind::Utf32(_))), order, size) => {
                let data = element_bytes(bytes, &header, size)?;
                Ok((decode_elements(kind, order, &data, &header.shape)?, None))
            }
            _ => Ok((read_numeric_npy(bytes)?, None)),
        },
        other => Err(header_error(format!("invalid descr {other:?}"))),
    }
}

/// Shape and kind of a `.npy` file, read from its header only
#[derive(Debug, Clone, PartialEq)]
pub struct NpyInfo {
    pub shape: Vec<usize>,
    pub structured: bool,
}

pub fn read_npy_info(path: &Path) -> Result<NpyInfo, DataError> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    (&mut file).take(12).read_to_end(&mut bytes)?;
    let (header_len, header_start) = NpyHeader::span(&bytes)?;
    let remaining = (header_start + header_len).saturating_sub(bytes.len());
    file.take(remaining as u64).read_to_end(&mut bytes)?;

    let header = NpyHeader::parse(&bytes)?;
    Ok(NpyInfo {
        structured: matches!(header.descr, PyLiteral::List(_)),
        shape: header.shape,
    })
}

/// Read one member of an `.npz` archive
fn read_npz_member<R: std::io::Read + std::io::Seek>(
    archive: &mut NpzReader<R>,
    name: &str,
) -> Result<ArrayValue, DataError> {
    fn read<T: ndarray_npy::ReadableElement, R: std::io::Read + std::io::Seek>(
        archive: &mut NpzReader<R>,
        name: &str,
    ) -> Result<ArrayD<T>, ReadNpzError> {
        archive.by_name::<OwnedRepr<T>, IxDyn>(name)
    }
    macro_rules! member {
        ($($t:ty),*) => {{
            $(
                match read::<$t, R>(archive, name) {
                    Ok(array) => return Ok(ArrayValue::from(array)),
                    Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => {}
                    Err(e) => return Err(e.into()),
                }
            )*
            Err(DataError::Format(format!("unsupported element type in member '{name}'")))
        }};
    }
    member!(f64, f32, i64, i32, i16, i8, u64, u32, u16, u8, bool)
}

/// Read every member of an `.npz` archive, sorted by name with the `.npy`
/// suffix removed. Members of element types that cannot be read are skipped.
pub fn read_npz(path: &Path) -> Result<Vec<(String, ArrayValue)>, DataError> {
    let mut archive = NpzReader::new(BufReader::new(File::open(path)?))?;
    let mut names = archive.names()?;
    names.sort();

    let mut members = Vec::with_capacity(names.len());
    for name in names {
        let display_name = name.strip_suffix(".npy").unwrap_or(&name).to_string();
        match read_npz_member(&mut archive, &name) {
            Ok(array) => members.push((display_name, array)),
            Err(DataError::Format(reason)) => warn!("Skipping archive member '{}': {}", display_name, reason),
            Err(e) => return Err(e),
        }
    }
    Ok(members)
}

/// Parse a whitespace or comma separated table of numbers. Text after `#`
/// is a comment.
pub fn parse_text_table(text: &str) -> Result<Array2<f64>, DataError> {
    let mut values = Vec::new();
    let mut num_cols = None;
    let mut num_rows = 0;

    for (line_number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        let row = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .map(|field| {
                field.parse::<f64>().map_err(|_| {
                    DataError::Format(format!("line {}: '{}' is not a number", line_number + 1, field))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if row.is_empty() {
            continue;
        }
        match num_cols {
            None => num_cols = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(DataError::Format(format!(
                    "line {}: expected {} columns, found {}",
                    line_number + 1,
                    n,
                    row.len()
                )))
            }
            Some(_) => {}
        }
        values.extend(row);
        num_rows += 1;
    }

    Ok(Array2::from_shape_vec((num_rows, num_cols.unwrap_or(0)), values)?)
}

/// Sliceable data read into memory when the item is opened
struct LoadedArray(Option<Arc<ArrayValue>>);

impl LoadedArray {
    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.0.as_deref().map(|array| array as &dyn Sliceable)
    }

    fn is_compound(&self) -> bool {
        self.0.as_ref().is_some_and(|array| array.as_compound().is_some())
    }
}

/// A `.npy` file; the fields of a structured array are its children
pub struct NumpyBinaryFileAdapter {
    path: PathBuf,
    array: LoadedArray,
}

impl NumpyBinaryFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            array: LoadedArray(None),
        }
    }
}

impl Adapter for NumpyBinaryFileAdapter {
    fn type_name(&self) -> &str {
        "NumPy array"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn has_children(&self) -> bool {
        self.array.is_compound()
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        let bytes = std::fs::read(&self.path)?;
        let array = read_npy_bytes(&bytes)?;
        debug!("Read {} array of shape {:?} from {}", array.element_type_name(), array.shape(), self.path.display());
        self.array = LoadedArray(Some(Arc::new(array)));
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.array = LoadedArray(None);
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.array.0.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let array = self.array.0.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        Ok(field_children(array, ctx.icon_color))
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.array.sliceable()
    }
}

/// A `.npz` archive; each member array is a child
pub struct NumpyCompressedFileAdapter {
    path: PathBuf,
    members: Option<Vec<(String, ArrayValue)>>,
}

impl NumpyCompressedFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            members: None,
        }
    }
}

impl Adapter for NumpyCompressedFileAdapter {
    fn type_name(&self) -> &str {
        "NumPy archive"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.members = Some(read_npz(&self.path)?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.members = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.members.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let members = self.members.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        Ok(members
            .iter()
            .map(|(name, array)| create_with_color(name.as_str(), Value::Array(array.clone()), ctx.icon_color))
            .collect())
    }

    fn summary(&self) -> String {
        self.members
            .as_ref()
            .map(|members| format!("{} arrays", members.len()))
            .unwrap_or_default()
    }
}

/// A text file of numbers; sliceable as rows by columns, with one child
/// per column
pub struct NumpyTextFileAdapter {
    path: PathBuf,
    array: LoadedArray,
}

impl NumpyTextFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            array: LoadedArray(None),
        }
    }
}

impl Adapter for NumpyTextFileAdapter {
    fn type_name(&self) -> &str {
        "NumPy text file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        let table = parse_text_table(&std::fs::read_to_string(&self.path)?)?;
        self.array = LoadedArray(Some(Arc::new(ArrayValue::F64(table.into_dyn()))));
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.array = LoadedArray(None);
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.array.0.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let Some(ArrayValue::F64(table)) = self.array.0.as_deref() else {
            return Err(RtiError::NotOpen(ctx.node_name.to_string()));
        };
        Ok(table
            .axis_iter(Axis(1))
            .enumerate()
            .map(|(n, column)| {
                let column = ArrayValue::F64(column.to_owned());
                create_with_color(format!("column-{n}"), Value::Array(column), ctx.icon_color)
            })
            .collect())
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        attributes.insert("path".to_string(), Value::from(self.path.display().to_string()));
        attributes
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.array.sliceable()
    }
}

pub fn create_numpy_binary(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, NumpyBinaryFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}

pub fn create_numpy_compressed(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, NumpyCompressedFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}

pub fn create_numpy_text(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, NumpyTextFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}
