//! NetCDF files through the `netcdf` bindings
//!
//! Library groups and variables borrow the open file, so items below the file
//! keep a shared handle plus the path of their group and look themselves up
//! again when read. Only the strided block covering an index is read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dv_core::adapter::{Adapter, FetchContext, IconGlyph, OwnedHandle, Sliceable};
use dv_core::array::{plan_read, ArrayValue, CompoundArray, IndexElem, ReadPlan};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use ndarray::{Array1, ArrayD, Dimension as _, IxDyn};
use netcdf::types::{CompoundType, FloatType, IntType, NcVariableType};
use netcdf::{Attribute, AttributeValue, Dimension, Extent, Extents, Variable};
use tracing::{debug, warn};

use crate::attributes::{masked, missing_value_of, unit_of};
use crate::records::{ElementKind, FieldLayout, RecordFieldAdapter, RecordLayout, RecordSource};
use crate::DataError;

pub const ICON_COLOR: &str = "#0088FF";

fn vec_value<T>(values: Vec<T>) -> Value
where
    ArrayValue: From<ndarray::ArrayD<T>>,
{
    Value::Array(ArrayValue::from(Array1::from_vec(values).into_dyn()))
}

fn attribute_value(value: AttributeValue) -> Value {
    #[allow(unreachable_patterns)]
    match value {
        AttributeValue::Uchar(v) => Value::UInt(u64::from(v)),
        AttributeValue::Schar(v) => Value::Int(i64::from(v)),
        AttributeValue::Ushort(v) => Value::UInt(u64::from(v)),
        AttributeValue::Short(v) => Value::Int(i64::from(v)),
        AttributeValue::Uint(v) => Value::UInt(u64::from(v)),
        AttributeValue::Int(v) => Value::Int(i64::from(v)),
        AttributeValue::Ulonglong(v) => Value::UInt(v),
        AttributeValue::Longlong(v) => Value::Int(v),
        AttributeValue::Float(v) => Value::Float(f64::from(v)),
        AttributeValue::Double(v) => Value::Float(v),
        AttributeValue::Str(v) => Value::Str(v),
        AttributeValue::Uchars(v) => vec_value(v),
        AttributeValue::Schars(v) => vec_value(v),
        AttributeValue::Ushorts(v) => vec_value(v),
        AttributeValue::Shorts(v) => vec_value(v),
        AttributeValue::Uints(v) => vec_value(v),
        AttributeValue::Ints(v) => vec_value(v),
        AttributeValue::Ulonglongs(v) => vec_value(v),
        AttributeValue::Longlongs(v) => vec_value(v),
        AttributeValue::Floats(v) => vec_value(v),
        AttributeValue::Doubles(v) => vec_value(v),
        AttributeValue::Strs(v) => vec_value(v),
        other => Value::from(format!("{other:?}")),
    }
}

fn attribute_map<'a>(attributes: impl Iterator<Item = Attribute<'a>>) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    for attribute in attributes {
        match attribute.value() {
            Ok(value) => {
                map.insert(attribute.name().to_string(), attribute_value(value));
            }
            Err(e) => debug!("Skipping attribute {}: {}", attribute.name(), e),
        }
    }
    map
}

fn type_name(vartype: &NcVariableType) -> String {
    match vartype {
        NcVariableType::Int(IntType::I8) => "int8".to_string(),
        NcVariableType::Int(IntType::I16) => "int16".to_string(),
        NcVariableType::Int(IntType::I32) => "int32".to_string(),
        NcVariableType::Int(IntType::I64) => "int64".to_string(),
        NcVariableType::Int(IntType::U8) => "uint8".to_string(),
        NcVariableType::Int(IntType::U16) => "uint16".to_string(),
        NcVariableType::Int(IntType::U32) => "uint32".to_string(),
        NcVariableType::Int(IntType::U64) => "uint64".to_string(),
        NcVariableType::Float(FloatType::F32) => "float32".to_string(),
        NcVariableType::Float(FloatType::F64) => "float64".to_string(),
        NcVariableType::Char => "char".to_string(),
        NcVariableType::String => "str".to_string(),
        NcVariableType::Compound(_) => "<structured>".to_string(),
        other => format!("{other:?}"),
    }
}

/// One member of a compound type
struct Member<'a> {
    name: &'a str,
    basetype: &'a NcVariableType,
    arraydims: &'a [usize],
    offset: usize,
}

/// Record layout of compound members. Members without a fixed size element
/// type are left out.
fn record_layout<'a>(size: usize, members: impl IntoIterator<Item = Member<'a>>) -> RecordLayout {
    let mut fields = Vec::new();
    for member in members {
        let mut sub_shape = member.arraydims.to_vec();
        let kind = match member.basetype {
            NcVariableType::Int(IntType::I8) => ElementKind::I8,
            NcVariableType::Int(IntType::I16) => ElementKind::I16,
            NcVariableType::Int(IntType::I32) => ElementKind::I32,
            NcVariableType::Int(IntType::I64) => ElementKind::I64,
            NcVariableType::Int(IntType::U8) => ElementKind::U8,
            NcVariableType::Int(IntType::U16) => ElementKind::U16,
            NcVariableType::Int(IntType::U32) => ElementKind::U32,
            NcVariableType::Int(IntType::U64) => ElementKind::U64,
            NcVariableType::Float(FloatType::F32) => ElementKind::F32,
            NcVariableType::Float(FloatType::F64) => ElementKind::F64,
            // the last axis of a character array is the string length
            NcVariableType::Char => ElementKind::Bytes(sub_shape.pop().unwrap_or(1)),
            other => {
                warn!("Skipping compound member '{}' of type {}", member.name, type_name(other));
                continue;
            }
        };
        fields.push(FieldLayout::new(member.name, kind, member.offset).with_sub_shape(sub_shape));
    }
    RecordLayout::new(size, fields)
}

fn compound_layout(compound: &CompoundType) -> RecordLayout {
    let members = compound.fields.iter().map(|field| Member {
        name: &field.name,
        basetype: &field.basetype,
        arraydims: field.arraydims.as_deref().unwrap_or_default(),
        offset: field.offset,
    });
    record_layout(compound.size, members)
}

fn extents(plan: &ReadPlan) -> Extents {
    Extents::Extent(
        plan.reads
            .iter()
            .map(|read| Extent::SliceCount {
                start: read.start,
                count: read.count,
                stride: read.stride as isize,
            })
            .collect(),
    )
}

macro_rules! read_typed {
    ($variable:expr, $plan:expr, $t:ty) => {{
        let array: ArrayD<$t> = if $plan.reads.is_empty() {
            $variable.get::<$t, _>(..)?
        } else if $plan.is_empty() {
            ArrayD::from_shape_vec(IxDyn(&$plan.block_shape()), Vec::new())?
        } else {
            $variable.get::<$t, _>(extents($plan))?
        };
        ArrayValue::from(array)
    }};
}

fn read_raw(variable: &Variable<'_>, plan: &ReadPlan) -> Result<Vec<u8>, DataError> {
    if plan.reads.is_empty() {
        Ok(variable.get_raw_values(..)?)
    } else if plan.is_empty() {
        Ok(Vec::new())
    } else {
        Ok(variable.get_raw_values(extents(plan))?)
    }
}

/// One byte per element, shown as a one character string
fn char_elements(bytes: &[u8], shape: &[usize]) -> Result<ArrayValue, DataError> {
    let text = bytes.iter().map(|&byte| char::from(byte).to_string()).collect();
    Ok(ArrayValue::Str(ArrayD::from_shape_vec(IxDyn(shape), text)?))
}

/// Variable-length strings are fetched one element at a time
fn read_strings(variable: &Variable<'_>, plan: &ReadPlan) -> Result<ArrayD<String>, DataError> {
    if plan.reads.is_empty() {
        return Ok(ArrayD::from_elem(IxDyn(&[]), variable.get_string(..)?));
    }
    let shape = plan.block_shape();
    let mut values = Vec::with_capacity(plan.block_len());
    for position in ndarray::indices(IxDyn(&shape)) {
        let element = plan
            .reads
            .iter()
            .zip(position.slice())
            .map(|(read, &n)| Extent::Index(read.start + n * read.stride))
            .collect();
        values.push(variable.get_string(Extents::Extent(element))?);
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
}

/// The block of a variable described by `plan`, before the residual index
fn read_block(variable: &Variable<'_>, plan: &ReadPlan) -> Result<ArrayValue, DataError> {
    let array = match variable.vartype() {
        NcVariableType::Int(IntType::I8) => read_typed!(variable, plan, i8),
        NcVariableType::Int(IntType::I16) => read_typed!(variable, plan, i16),
        NcVariableType::Int(IntType::I32) => read_typed!(variable, plan, i32),
        NcVariableType::Int(IntType::I64) => read_typed!(variable, plan, i64),
        NcVariableType::Int(IntType::U8) => read_typed!(variable, plan, u8),
        NcVariableType::Int(IntType::U16) => read_typed!(variable, plan, u16),
        NcVariableType::Int(IntType::U32) => read_typed!(variable, plan, u32),
        NcVariableType::Int(IntType::U64) => read_typed!(variable, plan, u64),
        NcVariableType::Float(FloatType::F32) => read_typed!(variable, plan, f32),
        NcVariableType::Float(FloatType::F64) => read_typed!(variable, plan, f64),
        NcVariableType::Char => char_elements(&read_raw(variable, plan)?, &plan.block_shape())?,
        NcVariableType::String => ArrayValue::Str(read_strings(variable, plan)?),
        NcVariableType::Compound(compound) => {
            let layout = compound_layout(&compound);
            let shape = plan.block_shape();
            if layout.fields.is_empty() {
                return Ok(ArrayValue::Compound(CompoundArray::new(shape, Vec::new())?));
            }
            ArrayValue::Compound(layout.decode(&read_raw(variable, plan)?, &shape)?)
        }
        other => {
            return Err(RtiError::Unsupported(format!("reading NetCDF type {}", type_name(&other))).into());
        }
    };
    Ok(array)
}

fn is_readable(vartype: &NcVariableType) -> bool {
    matches!(
        vartype,
        NcVariableType::Int(_)
            | NcVariableType::Float(_)
            | NcVariableType::Char
            | NcVariableType::String
            | NcVariableType::Compound(_)
    )
}

fn not_found(what: &str, name: &str) -> DataError {
    DataError::Format(format!("{what} '{name}' disappeared from the file"))
}

/// `variable[index]` for variable `name` of the group at `group_path` (empty
/// for the root)
fn read_variable(
    file: &netcdf::File,
    group_path: &str,
    name: &str,
    index: &[IndexElem],
) -> Result<ArrayValue, DataError> {
    let read = |variable: &Variable<'_>| -> Result<ArrayValue, DataError> {
        let shape: Vec<usize> = variable.dimensions().iter().map(|dim| dim.len()).collect();
        let plan = plan_read(index, &shape)?;
        Ok(read_block(variable, &plan)?.get_item(&plan.residual)?)
    };
    if group_path.is_empty() {
        let variable = file.variable(name).ok_or_else(|| not_found("variable", name))?;
        read(&variable)
    } else {
        let group = file.group(group_path)?.ok_or_else(|| not_found("group", group_path))?;
        let variable = group.variable(name).ok_or_else(|| not_found("variable", name))?;
        read(&variable)
    }
}

struct DimensionInfo {
    name: String,
    len: usize,
    unlimited: bool,
}

impl DimensionInfo {
    fn of(dimension: &Dimension<'_>) -> Self {
        Self {
            name: dimension.name(),
            len: dimension.len(),
            unlimited: dimension.is_unlimited(),
        }
    }
}

/// What an item needs to know about a variable without holding it
struct VariableInfo {
    name: String,
    shape: Vec<usize>,
    dimension_names: Vec<String>,
    vartype: NcVariableType,
    attributes: BTreeMap<String, Value>,
}

impl VariableInfo {
    fn of(variable: &Variable<'_>) -> Self {
        let dimensions = variable.dimensions();
        Self {
            name: variable.name(),
            shape: dimensions.iter().map(|dim| dim.len()).collect(),
            dimension_names: dimensions.iter().map(|dim| dim.name()).collect(),
            vartype: variable.vartype(),
            attributes: attribute_map(variable.attributes()),
        }
    }
}

/// Everything directly inside one group
struct GroupMembers {
    dimensions: Vec<DimensionInfo>,
    groups: Vec<String>,
    variables: Vec<VariableInfo>,
}

fn group_members(file: &netcdf::File, group_path: &str) -> Result<GroupMembers, DataError> {
    if group_path.is_empty() {
        Ok(GroupMembers {
            dimensions: file.dimensions().map(|dim| DimensionInfo::of(&dim)).collect(),
            groups: file.groups()?.map(|group| group.name()).collect(),
            variables: file.variables().map(|var| VariableInfo::of(&var)).collect(),
        })
    } else {
        let group = file.group(group_path)?.ok_or_else(|| not_found("group", group_path))?;
        Ok(GroupMembers {
            dimensions: group.dimensions().map(|dim| DimensionInfo::of(&dim)).collect(),
            groups: group.groups().map(|group| group.name()).collect(),
            variables: group.variables().map(|var| VariableInfo::of(&var)).collect(),
        })
    }
}

fn group_attributes(file: &netcdf::File, group_path: &str) -> Result<BTreeMap<String, Value>, DataError> {
    if group_path.is_empty() {
        Ok(attribute_map(file.attributes()))
    } else {
        let group = file.group(group_path)?.ok_or_else(|| not_found("group", group_path))?;
        Ok(attribute_map(group.attributes()))
    }
}

/// Dimensions, then groups, then variables
fn group_children(file: &Arc<netcdf::File>, group_path: &str, icon_color: &str) -> Result<Vec<RepoTreeItem>, DataError> {
    let members = group_members(file, group_path)?;
    let mut children = Vec::new();

    for dimension in members.dimensions {
        let name = dimension.name.clone();
        children.push(RepoTreeItem::new(name, NcdfDimensionAdapter { dimension }));
    }
    for name in members.groups {
        let path = if group_path.is_empty() {
            name.clone()
        } else {
            format!("{group_path}/{name}")
        };
        children.push(RepoTreeItem::new(name, NcdfGroupAdapter::new(Arc::clone(file), path)));
    }
    for info in members.variables {
        let name = info.name.clone();
        let adapter = NcdfVariableAdapter {
            data: Arc::new(VariableData {
                file: Arc::clone(file),
                group_path: group_path.to_string(),
                info,
            }),
        };
        children.push(RepoTreeItem::new(name, adapter));
    }

    Ok(children
        .into_iter()
        .map(|child| child.with_icon_color(icon_color))
        .collect())
}

/// A NetCDF file, shown as its root group
pub struct NcdfFileAdapter {
    path: PathBuf,
    file: OwnedHandle<netcdf::File>,
}

impl NcdfFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: OwnedHandle::new(),
        }
    }
}

impl Adapter for NcdfFileAdapter {
    fn type_name(&self) -> &str {
        "NetCDF file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        let file = netcdf::open(&self.path).map_err(DataError::from)?;
        self.file.acquire(file);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.file.release();
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.file.is_held()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let file = self.file.require(ctx.node_name)?;
        Ok(group_children(file, "", ctx.icon_color)?)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        match self.file.get().map(|file| group_attributes(file, "")) {
            Some(Ok(attributes)) => attributes,
            Some(Err(e)) => {
                warn!("Cannot read attributes of {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        }
    }
}

pub struct NcdfGroupAdapter {
    file: Arc<netcdf::File>,
    path: String,
}

impl NcdfGroupAdapter {
    pub fn new(file: Arc<netcdf::File>, path: String) -> Self {
        Self { file, path }
    }
}

impl Adapter for NcdfGroupAdapter {
    fn type_name(&self) -> &str {
        "NetCDF group"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Group
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(group_children(&self.file, &self.path, ctx.icon_color)?)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        group_attributes(&self.file, &self.path).unwrap_or_else(|e| {
            warn!("Cannot read attributes of group {}: {}", self.path, e);
            BTreeMap::new()
        })
    }
}

pub struct NcdfDimensionAdapter {
    dimension: DimensionInfo,
}

impl Adapter for NcdfDimensionAdapter {
    fn type_name(&self) -> &str {
        "NetCDF dimension"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Dimension
    }

    fn has_children(&self) -> bool {
        false
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        attributes.insert("unlimited".to_string(), Value::Bool(self.dimension.unlimited));
        attributes.insert("size".to_string(), Value::UInt(self.dimension.len as u64));
        attributes
    }

    fn summary(&self) -> String {
        self.dimension.len.to_string()
    }
}

/// A variable and where to find it again, shared with the field items of
/// compound variables
struct VariableData {
    file: Arc<netcdf::File>,
    group_path: String,
    info: VariableInfo,
}

impl VariableData {
    fn read(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(read_variable(&self.file, &self.group_path, &self.info.name, index)?)
    }
}

impl RecordSource for VariableData {
    fn record_shape(&self) -> Vec<usize> {
        self.info.shape.clone()
    }

    fn read_records(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        self.read(index)
    }

    fn record_dimension_names(&self) -> Vec<String> {
        self.info.dimension_names.clone()
    }

    fn record_attributes(&self) -> &BTreeMap<String, Value> {
        &self.info.attributes
    }
}

/// A variable; the members of a compound variable are its children
pub struct NcdfVariableAdapter {
    data: Arc<VariableData>,
}

impl Adapter for NcdfVariableAdapter {
    fn type_name(&self) -> &str {
        "NetCDF variable"
    }

    fn icon_glyph(&self) -> IconGlyph {
        if self.data.info.shape.is_empty() {
            IconGlyph::Scalar
        } else {
            IconGlyph::Array
        }
    }

    fn has_children(&self) -> bool {
        matches!(self.data.info.vartype, NcVariableType::Compound(_))
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let NcVariableType::Compound(compound) = &self.data.info.vartype else {
            return Ok(Vec::new());
        };
        let source: Arc<dyn RecordSource> = self.data.clone();
        Ok(RecordFieldAdapter::children(
            "NetCDF field",
            source,
            &compound_layout(compound),
            ctx.icon_color,
        ))
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.data.info.attributes.clone()
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        if is_readable(&self.data.info.vartype) {
            Some(self)
        } else {
            None
        }
    }

    fn summary(&self) -> String {
        if !self.data.info.shape.is_empty() {
            return dv_core::shape_summary(&self.data.info.shape);
        }
        match self.get_item(&[]).map(|array| array.scalar_value()) {
            Ok(Some(value)) => value.to_string(),
            Ok(None) => String::new(),
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl Sliceable for NcdfVariableAdapter {
    fn shape(&self) -> Vec<usize> {
        self.data.info.shape.clone()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let array = self.data.read(index)?;
        Ok(masked(array, self.missing_data_value().as_ref()))
    }

    fn element_type_name(&self) -> String {
        type_name(&self.data.info.vartype)
    }

    fn dimension_names(&self) -> Vec<String> {
        self.data.info.dimension_names.clone()
    }

    fn unit(&self) -> String {
        unit_of(&self.data.info.attributes)
    }

    fn missing_data_value(&self) -> Option<Value> {
        missing_value_of(&self.data.info.attributes)
    }
}

pub fn create_netcdf_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, NcdfFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}
