//! Typed n-dimensional arrays and the index grammar used to slice them
//!
//! Indexing follows the NumPy rules the collectors expect: integers select and
//! drop an axis (negative values count from the end), slices are clamped to the
//! axis length and may run backwards, a single ellipsis expands to as many full
//! slices as needed, and missing trailing axes are taken whole. The result
//! always has one axis per slice in the expanded index.

use std::fmt;

use ndarray::{ArrayD, Axis, SliceInfoElem};
use num_traits::ToPrimitive;

use crate::error::{IndexError, RtiError};
use crate::value::Value;

/// One element of an index expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexElem {
    /// Select one position and drop the axis
    Index(isize),
    /// Python-style slice; missing bounds default to the full extent
    Slice {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
    /// As many full slices as needed to cover the remaining axes
    Ellipsis,
}

impl IndexElem {
    pub fn at(index: isize) -> Self {
        IndexElem::Index(index)
    }

    /// `start:stop`
    pub fn range(start: isize, stop: isize) -> Self {
        IndexElem::Slice {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    /// `:`
    pub fn full() -> Self {
        IndexElem::Slice {
            start: None,
            stop: None,
            step: 1,
        }
    }

    pub fn slice(start: Option<isize>, stop: Option<isize>, step: isize) -> Self {
        IndexElem::Slice { start, stop, step }
    }
}

impl fmt::Display for IndexElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexElem::Index(index) => write!(f, "{index}"),
            IndexElem::Ellipsis => write!(f, "..."),
            IndexElem::Slice { start, stop, step } => {
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                write!(f, ":")?;
                if let Some(stop) = stop {
                    write!(f, "{stop}")?;
                }
                if *step != 1 {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parse index text such as `1, 2:5`, `..., 0` or `::-1`
pub fn parse_index(text: &str) -> Result<Vec<IndexElem>, IndexError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let parse_bound = |part: &str| -> Result<Option<isize>, IndexError> {
        let part = part.trim();
        if part.is_empty() {
            Ok(None)
        } else {
            part.parse::<isize>()
                .map(Some)
                .map_err(|_| IndexError::Parse(text.to_string()))
        }
    };

    text.split(',')
        .map(|elem| {
            let elem = elem.trim();
            if elem == "..." {
                return Ok(IndexElem::Ellipsis);
            }
            if !elem.contains(':') {
                return parse_bound(elem)?
                    .map(IndexElem::Index)
                    .ok_or_else(|| IndexError::Parse(text.to_string()));
            }
            let parts: Vec<&str> = elem.split(':').collect();
            if parts.len() > 3 {
                return Err(IndexError::Parse(text.to_string()));
            }
            let start = parse_bound(parts[0])?;
            let stop = parse_bound(parts[1])?;
            let step = match parts.get(2) {
                Some(part) => parse_bound(part)?.unwrap_or(1),
                None => 1,
            };
            Ok(IndexElem::Slice { start, stop, step })
        })
        .collect()
}

/// Replace the ellipsis by full slices and pad the index to `ndim` elements
pub fn expand_index(index: &[IndexElem], ndim: usize) -> Result<Vec<IndexElem>, IndexError> {
    let ellipses = index
        .iter()
        .filter(|elem| matches!(elem, IndexElem::Ellipsis))
        .count();
    if ellipses > 1 {
        return Err(IndexError::MultipleEllipsis);
    }
    let given = index.len() - ellipses;
    if given > ndim {
        return Err(IndexError::TooManyIndices { ndim, given });
    }

    let fill = ndim - given;
    let mut expanded = Vec::with_capacity(ndim);
    for elem in index {
        match elem {
            IndexElem::Ellipsis => {
                expanded.extend(std::iter::repeat(IndexElem::full()).take(fill))
            }
            other => expanded.push(*other),
        }
    }
    if ellipses == 0 {
        expanded.extend(std::iter::repeat(IndexElem::full()).take(fill));
    }
    Ok(expanded)
}

/// First position and element count of a Python-style slice over `size` elements
pub fn slice_indices(
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    size: usize,
) -> Result<(isize, usize), IndexError> {
    if step == 0 {
        return Err(IndexError::ZeroStep);
    }
    let n = size as isize;
    let wrap = |value: isize, lower: isize, upper: isize| {
        let value = if value < 0 { value + n } else { value };
        value.clamp(lower, upper)
    };

    let (first, end) = if step > 0 {
        (
            start.map_or(0, |s| wrap(s, 0, n)),
            stop.map_or(n, |s| wrap(s, 0, n)),
        )
    } else {
        (
            start.map_or(n - 1, |s| wrap(s, -1, n - 1)),
            stop.map_or(-1, |s| wrap(s, -1, n - 1)),
        )
    };

    let count = if step > 0 && end > first {
        (end - first + step - 1) / step
    } else if step < 0 && first > end {
        (first - end - step - 1) / -step
    } else {
        0
    };
    Ok((first, count as usize))
}

/// An index resolved against a concrete shape
struct Resolved {
    elems: Vec<SliceInfoElem>,
    shape: Vec<usize>,
}

fn resolve_index(index: &[IndexElem], shape: &[usize]) -> Result<Resolved, IndexError> {
    let expanded = expand_index(index, shape.len())?;
    let mut elems = Vec::with_capacity(expanded.len());
    let mut out_shape = Vec::with_capacity(expanded.len());

    for (axis, (elem, &size)) in expanded.iter().zip(shape).enumerate() {
        match *elem {
            IndexElem::Index(index) => {
                let n = size as isize;
                let position = if index < 0 { index + n } else { index };
                if position < 0 || position >= n {
                    return Err(IndexError::OutOfBounds { index, axis, size });
                }
                elems.push(SliceInfoElem::Index(position));
            }
            IndexElem::Slice { start, stop, step } => {
                let (first, count) = slice_indices(start, stop, step, size)?;
                out_shape.push(count);
                if count == 0 {
                    elems.push(SliceInfoElem::Slice { start: 0, end: Some(0), step: 1 });
                    continue;
                }
                let last = first + (count as isize - 1) * step;
                // Negative ndarray steps walk [start, end) from the back
                let (lower, upper) = if step > 0 { (first, last) } else { (last, first) };
                elems.push(SliceInfoElem::Slice {
                    start: lower,
                    end: Some(upper + 1),
                    step,
                });
            }
            IndexElem::Ellipsis => {
                out_shape.push(size);
                elems.push(full_slice());
            }
        }
    }

    Ok(Resolved { elems, shape: out_shape })
}

fn full_slice() -> SliceInfoElem {
    SliceInfoElem::Slice { start: 0, end: None, step: 1 }
}

/// A forward strided run along one axis: `count` positions from `start`,
/// `stride` apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRead {
    pub start: usize,
    pub count: usize,
    pub stride: usize,
}

impl AxisRead {
    /// One past the last position read
    pub fn end(&self) -> usize {
        match self.count {
            0 => self.start,
            count => self.start + (count - 1) * self.stride + 1,
        }
    }
}

/// An index split for storage libraries that only read forward hyperslabs.
///
/// `reads` has one entry per axis of the stored array and never drops an axis.
/// Applying `residual` to the block read that way gives the same result as
/// applying the original index to the whole array.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPlan {
    pub reads: Vec<AxisRead>,
    pub residual: Vec<IndexElem>,
}

impl ReadPlan {
    pub fn block_shape(&self) -> Vec<usize> {
        self.reads.iter().map(|read| read.count).collect()
    }

    pub fn block_len(&self) -> usize {
        self.reads.iter().map(|read| read.count).product()
    }

    /// True when the block has no elements and nothing needs reading
    pub fn is_empty(&self) -> bool {
        self.reads.iter().any(|read| read.count == 0)
    }
}

/// Plan the smallest forward hyperslab that covers `index` over `shape`
pub fn plan_read(index: &[IndexElem], shape: &[usize]) -> Result<ReadPlan, IndexError> {
    let expanded = expand_index(index, shape.len())?;
    let mut reads = Vec::with_capacity(shape.len());
    let mut residual = Vec::with_capacity(shape.len());

    for (axis, (elem, &size)) in expanded.iter().zip(shape).enumerate() {
        match *elem {
            IndexElem::Index(index) => {
                let n = size as isize;
                let position = if index < 0 { index + n } else { index };
                if position < 0 || position >= n {
                    return Err(IndexError::OutOfBounds { index, axis, size });
                }
                reads.push(AxisRead { start: position as usize, count: 1, stride: 1 });
                residual.push(IndexElem::at(0));
            }
            IndexElem::Slice { start, stop, step } => {
                let (first, count) = slice_indices(start, stop, step, size)?;
                if count == 0 {
                    reads.push(AxisRead { start: 0, count: 0, stride: 1 });
                    residual.push(IndexElem::full());
                    continue;
                }
                if step > 0 {
                    reads.push(AxisRead { start: first as usize, count, stride: step as usize });
                    residual.push(IndexElem::full());
                } else {
                    let last = first + (count as isize - 1) * step;
                    reads.push(AxisRead { start: last as usize, count, stride: step.unsigned_abs() });
                    residual.push(IndexElem::slice(None, None, -1));
                }
            }
            IndexElem::Ellipsis => {
                reads.push(AxisRead { start: 0, count: size, stride: 1 });
                residual.push(IndexElem::full());
            }
        }
    }
    Ok(ReadPlan { reads, residual })
}

/// Split an index over a field of `record_ndim + field_ndim` axes into the
/// record part and a part for the field's own sub-axes.
///
/// The sub part starts with an ellipsis so it applies to the trailing axes of
/// whatever the record part leaves behind.
pub fn split_field_index(
    index: &[IndexElem],
    record_ndim: usize,
    field_ndim: usize,
) -> Result<(Vec<IndexElem>, Vec<IndexElem>), IndexError> {
    let expanded = expand_index(index, record_ndim + field_ndim)?;
    let (record_part, sub_part) = expanded.split_at(record_ndim);
    let mut rest = Vec::with_capacity(sub_part.len() + 1);
    if !sub_part.is_empty() {
        rest.push(IndexElem::Ellipsis);
        rest.extend_from_slice(sub_part);
    }
    Ok((record_part.to_vec(), rest))
}

/// Text such as `3 × 8` for a shape; empty for zero-dimensional data
pub fn shape_summary(shape: &[usize]) -> String {
    shape
        .iter()
        .map(|len| len.to_string())
        .collect::<Vec<_>>()
        .join(" × ")
}

/// Array of records with named fields.
///
/// Every field array has the record shape as its leading axes, followed by the
/// field's own sub-shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundArray {
    shape: Vec<usize>,
    fields: Vec<(String, ArrayValue)>,
}

impl CompoundArray {
    pub fn new(shape: Vec<usize>, fields: Vec<(String, ArrayValue)>) -> Result<Self, RtiError> {
        for (name, field) in &fields {
            if !field.shape().starts_with(&shape) {
                return Err(RtiError::Format(format!(
                    "field '{}' with shape {:?} does not extend record shape {:?}",
                    name,
                    field.shape(),
                    shape
                )));
            }
        }
        Ok(Self { shape, fields })
    }

    /// Record shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn fields(&self) -> &[(String, ArrayValue)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn field(&self, name: &str) -> Result<&ArrayValue, IndexError> {
        self.fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, field)| field)
            .ok_or_else(|| IndexError::UnknownField(name.to_string()))
    }

    /// Axes a field adds after the record axes
    pub fn sub_shape(&self, name: &str) -> Result<&[usize], IndexError> {
        Ok(&self.field(name)?.shape()[self.shape.len()..])
    }

    fn apply(&self, elems: &[SliceInfoElem], shape: Vec<usize>) -> CompoundArray {
        let fields = self
            .fields
            .iter()
            .map(|(name, field)| {
                let mut field_elems = elems.to_vec();
                let extra = field.ndim() - self.shape.len();
                field_elems.extend(std::iter::repeat(full_slice()).take(extra));
                let field_shape = sliced_shape(field.shape(), &field_elems);
                (name.clone(), field.apply(&field_elems, field_shape))
            })
            .collect();
        CompoundArray { shape, fields }
    }

    fn with_leading_axis(&self) -> CompoundArray {
        let mut shape = vec![1];
        shape.extend_from_slice(&self.shape);
        let fields = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.with_leading_axis()))
            .collect();
        CompoundArray { shape, fields }
    }
}

fn sliced_shape(shape: &[usize], elems: &[SliceInfoElem]) -> Vec<usize> {
    shape
        .iter()
        .zip(elems)
        .filter_map(|(&size, elem)| match *elem {
            SliceInfoElem::Slice { start, end, step } => {
                let end = end.unwrap_or(size as isize);
                let stride = step.unsigned_abs() as isize;
                Some(if end > start {
                    ((end - start + stride - 1) / stride) as usize
                } else {
                    0
                })
            }
            SliceInfoElem::Index(_) => None,
            SliceInfoElem::NewAxis => Some(1),
        })
        .collect()
}

/// A dynamically typed n-dimensional array
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Bool(ArrayD<bool>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Str(ArrayD<String>),
    Compound(CompoundArray),
}

macro_rules! for_each_array {
    ($value:expr, $arr:ident => $body:expr, $compound:ident => $cbody:expr) => {
        match $value {
            ArrayValue::Bool($arr) => $body,
            ArrayValue::I8($arr) => $body,
            ArrayValue::I16($arr) => $body,
            ArrayValue::I32($arr) => $body,
            ArrayValue::I64($arr) => $body,
            ArrayValue::U8($arr) => $body,
            ArrayValue::U16($arr) => $body,
            ArrayValue::U32($arr) => $body,
            ArrayValue::U64($arr) => $body,
            ArrayValue::F32($arr) => $body,
            ArrayValue::F64($arr) => $body,
            ArrayValue::Str($arr) => $body,
            ArrayValue::Compound($compound) => $cbody,
        }
    };
}

macro_rules! map_array {
    ($value:expr, $arr:ident => $body:expr, $compound:ident => $cbody:expr) => {
        match $value {
            ArrayValue::Bool($arr) => ArrayValue::Bool($body),
            ArrayValue::I8($arr) => ArrayValue::I8($body),
            ArrayValue::I16($arr) => ArrayValue::I16($body),
            ArrayValue::I32($arr) => ArrayValue::I32($body),
            ArrayValue::I64($arr) => ArrayValue::I64($body),
            ArrayValue::U8($arr) => ArrayValue::U8($body),
            ArrayValue::U16($arr) => ArrayValue::U16($body),
            ArrayValue::U32($arr) => ArrayValue::U32($body),
            ArrayValue::U64($arr) => ArrayValue::U64($body),
            ArrayValue::F32($arr) => ArrayValue::F32($body),
            ArrayValue::F64($arr) => ArrayValue::F64($body),
            ArrayValue::Str($arr) => ArrayValue::Str($body),
            ArrayValue::Compound($compound) => $cbody,
        }
    };
}

macro_rules! numeric_to_f64 {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            ArrayValue::Bool($arr) => Some($arr.mapv(|v| if v { 1.0 } else { 0.0 })),
            ArrayValue::I8($arr) => Some($body),
            ArrayValue::I16($arr) => Some($body),
            ArrayValue::I32($arr) => Some($body),
            ArrayValue::I64($arr) => Some($body),
            ArrayValue::U8($arr) => Some($body),
            ArrayValue::U16($arr) => Some($body),
            ArrayValue::U32($arr) => Some($body),
            ArrayValue::U64($arr) => Some($body),
            ArrayValue::F32($arr) => Some($body),
            ArrayValue::F64($arr) => Some($arr.clone()),
            ArrayValue::Str(_) | ArrayValue::Compound(_) => None,
        }
    };
}

impl ArrayValue {
    pub fn shape(&self) -> &[usize] {
        for_each_array!(self, a => a.shape(), c => c.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements (records for compound arrays)
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type_name(&self) -> &'static str {
        match self {
            ArrayValue::Bool(_) => "bool",
            ArrayValue::I8(_) => "int8",
            ArrayValue::I16(_) => "int16",
            ArrayValue::I32(_) => "int32",
            ArrayValue::I64(_) => "int64",
            ArrayValue::U8(_) => "uint8",
            ArrayValue::U16(_) => "uint16",
            ArrayValue::U32(_) => "uint32",
            ArrayValue::U64(_) => "uint64",
            ArrayValue::F32(_) => "float32",
            ArrayValue::F64(_) => "float64",
            ArrayValue::Str(_) => "str",
            ArrayValue::Compound(_) => "<structured>",
        }
    }

    pub fn as_compound(&self) -> Option<&CompoundArray> {
        match self {
            ArrayValue::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    /// Apply an index expression, returning an owned sub-array
    pub fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, IndexError> {
        let resolved = resolve_index(index, self.shape())?;
        Ok(self.apply(&resolved.elems, resolved.shape))
    }

    fn apply(&self, elems: &[SliceInfoElem], shape: Vec<usize>) -> ArrayValue {
        map_array!(
            self,
            a => a.slice(elems).to_owned(),
            c => ArrayValue::Compound(c.apply(elems, shape))
        )
    }

    /// The same elements behind a new first axis of length one
    pub fn with_leading_axis(&self) -> ArrayValue {
        map_array!(
            self,
            a => a.clone().insert_axis(Axis(0)),
            c => ArrayValue::Compound(c.with_leading_axis())
        )
    }

    /// Select a named field of a compound array
    pub fn field(&self, name: &str) -> Result<ArrayValue, IndexError> {
        match self {
            ArrayValue::Compound(compound) => compound.field(name).cloned(),
            _ => Err(IndexError::UnknownField(name.to_string())),
        }
    }

    /// `self[index][field]` for a compound array.
    ///
    /// `index` addresses the field's full shape. Its record part is applied to
    /// the records before the field is selected; the rest then indexes the
    /// field's own sub-axes.
    pub fn get_field_item(&self, field: &str, index: &[IndexElem]) -> Result<ArrayValue, IndexError> {
        let compound = self
            .as_compound()
            .ok_or_else(|| IndexError::UnknownField(field.to_string()))?;
        let record_ndim = compound.shape().len();
        let field_ndim = compound.field(field)?.ndim() - record_ndim;
        let (record_part, sub_part) = split_field_index(index, record_ndim, field_ndim)?;

        let selected = self.get_item(&record_part)?.field(field)?;
        if sub_part.is_empty() {
            return Ok(selected);
        }
        selected.get_item(&sub_part)
    }

    /// Numeric and boolean arrays converted to `f64`
    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        numeric_to_f64!(self, a => a.mapv(|v| v.to_f64().unwrap_or(f64::NAN)))
    }

    /// The single element of a zero-dimensional array
    pub fn scalar_value(&self) -> Option<Value> {
        if self.ndim() != 0 {
            return None;
        }
        let value = match self {
            ArrayValue::Bool(a) => Value::Bool(*a.iter().next()?),
            ArrayValue::I8(a) => Value::Int(i64::from(*a.iter().next()?)),
            ArrayValue::I16(a) => Value::Int(i64::from(*a.iter().next()?)),
            ArrayValue::I32(a) => Value::Int(i64::from(*a.iter().next()?)),
            ArrayValue::I64(a) => Value::Int(*a.iter().next()?),
            ArrayValue::U8(a) => Value::UInt(u64::from(*a.iter().next()?)),
            ArrayValue::U16(a) => Value::UInt(u64::from(*a.iter().next()?)),
            ArrayValue::U32(a) => Value::UInt(u64::from(*a.iter().next()?)),
            ArrayValue::U64(a) => Value::UInt(*a.iter().next()?),
            ArrayValue::F32(a) => Value::Float(f64::from(*a.iter().next()?)),
            ArrayValue::F64(a) => Value::Float(*a.iter().next()?),
            ArrayValue::Str(a) => Value::Str(a.iter().next()?.clone()),
            ArrayValue::Compound(_) => return None,
        };
        Some(value)
    }

    /// Replace elements equal to `missing` by NaN in floating point arrays
    pub fn mask_missing(&self, missing: &Value) -> ArrayValue {
        let Some(fill) = missing.as_f64() else {
            return self.clone();
        };
        match self {
            ArrayValue::F64(a) => ArrayValue::F64(a.mapv(|v| if v == fill { f64::NAN } else { v })),
            ArrayValue::F32(a) => {
                let fill = fill as f32;
                ArrayValue::F32(a.mapv(|v| if v == fill { f32::NAN } else { v }))
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for_each_array!(
            self,
            a => write!(f, "{a}"),
            c => {
                write!(f, "{{")?;
                for (i, (name, field)) in c.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {field}")?;
                }
                write!(f, "}}")
            }
        )
    }
}

macro_rules! impl_from_array {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<ArrayD<$t>> for ArrayValue {
                fn from(array: ArrayD<$t>) -> Self {
                    ArrayValue::$variant(array)
                }
            }
        )*
    };
}

impl_from_array!(
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
);
