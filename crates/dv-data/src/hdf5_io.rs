//! HDF-5 files through the `hdf5` bindings
//!
//! The file handle is owned by the file item and shared with every group and
//! dataset item below it. Indexing a dataset reads only the hyperslab that
//! covers the index. Fixed length strings and compound records have no
//! compile-time Rust type, so they are read as raw bytes through `hdf5-sys`
//! and decoded by [`crate::records`].

use std::collections::BTreeMap;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use dv_core::adapter::{Adapter, FetchContext, IconGlyph, OwnedHandle, Sliceable};
use dv_core::array::{plan_read, ArrayValue, IndexElem, ReadPlan};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use hdf5::types::{CompoundField, CompoundType, FloatSize, IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Attribute, Container, Dataset, Datatype, Group, H5Type, Location, LocationType};
use hdf5_sys::h5::hsize_t;
use hdf5_sys::h5a::H5Aread;
use hdf5_sys::h5d::{H5Dget_space, H5Dread};
use hdf5_sys::h5i::hid_t;
use hdf5_sys::h5p::H5P_DEFAULT;
use hdf5_sys::h5s::{H5S_seloper_t, H5Sclose, H5Screate_simple, H5Sselect_hyperslab, H5S_ALL};
use ndarray::{Array1, ArrayD, IxDyn, SliceInfo, SliceInfoElem};
use tracing::{debug, warn};

use crate::attributes::{masked, missing_value_of, unit_of, unwrap_single};
use crate::records::{decode_elements, ByteOrder, ElementKind, FieldLayout, RecordFieldAdapter, RecordLayout, RecordSource};
use crate::DataError;

pub const ICON_COLOR: &str = "#00EE88";

fn read_typed<T: H5Type>(container: &Container, flat: bool) -> hdf5::Result<ArrayD<T>> {
    if flat {
        Ok(Array1::from_vec(container.read_raw::<T>()?).into_dyn())
    } else {
        container.read_dyn::<T>()
    }
}

/// Read a dataset or attribute of a type with a Rust counterpart. With `flat`
/// the data comes back as 1D.
pub fn read_container(container: &Container, flat: bool) -> Result<ArrayValue, DataError> {
    let descriptor = container.dtype()?.to_descriptor()?;
    let array = match descriptor {
        TypeDescriptor::Integer(IntSize::U1) => ArrayValue::from(read_typed::<i8>(container, flat)?),
        TypeDescriptor::Integer(IntSize::U2) => ArrayValue::from(read_typed::<i16>(container, flat)?),
        TypeDescriptor::Integer(IntSize::U4) => ArrayValue::from(read_typed::<i32>(container, flat)?),
        TypeDescriptor::Integer(IntSize::U8) => ArrayValue::from(read_typed::<i64>(container, flat)?),
        TypeDescriptor::Unsigned(IntSize::U1) => ArrayValue::from(read_typed::<u8>(container, flat)?),
        TypeDescriptor::Unsigned(IntSize::U2) => ArrayValue::from(read_typed::<u16>(container, flat)?),
        TypeDescriptor::Unsigned(IntSize::U4) => ArrayValue::from(read_typed::<u32>(container, flat)?),
        TypeDescriptor::Unsigned(IntSize::U8) => ArrayValue::from(read_typed::<u64>(container, flat)?),
        TypeDescriptor::Float(FloatSize::U4) => ArrayValue::from(read_typed::<f32>(container, flat)?),
        TypeDescriptor::Float(FloatSize::U8) => ArrayValue::from(read_typed::<f64>(container, flat)?),
        TypeDescriptor::Boolean => ArrayValue::from(read_typed::<bool>(container, flat)?),
        TypeDescriptor::VarLenUnicode => {
            ArrayValue::Str(read_typed::<VarLenUnicode>(container, flat)?.map(|s| s.as_str().to_string()))
        }
        TypeDescriptor::VarLenAscii => {
            ArrayValue::Str(read_typed::<VarLenAscii>(container, flat)?.map(|s| s.as_str().to_string()))
        }
        other => {
            return Err(RtiError::Unsupported(format!("reading HDF-5 type {other:?}")).into());
        }
    };
    Ok(array)
}

/// Short element type name in the vocabulary of [`ArrayValue::element_type_name`]
pub fn descriptor_type_name(descriptor: &TypeDescriptor) -> String {
    match descriptor {
        TypeDescriptor::Integer(size) => format!("int{}", *size as usize * 8),
        TypeDescriptor::Unsigned(size) => format!("uint{}", *size as usize * 8),
        TypeDescriptor::Float(FloatSize::U4) => "float32".to_string(),
        TypeDescriptor::Float(FloatSize::U8) => "float64".to_string(),
        TypeDescriptor::Boolean => "bool".to_string(),
        TypeDescriptor::VarLenUnicode
        | TypeDescriptor::VarLenAscii
        | TypeDescriptor::FixedAscii(_)
        | TypeDescriptor::FixedUnicode(_) => "str".to_string(),
        TypeDescriptor::Compound(_) => "<structured>".to_string(),
        other => format!("{other:?}"),
    }
}

/// Element kind and sub-shape of a compound member, `None` when the member
/// cannot be decoded from raw bytes
fn element_kind(descriptor: &TypeDescriptor) -> Option<(ElementKind, Vec<usize>)> {
    let kind = match descriptor {
        TypeDescriptor::Integer(IntSize::U1) => ElementKind::I8,
        TypeDescriptor::Integer(IntSize::U2) => ElementKind::I16,
        TypeDescriptor::Integer(IntSize::U4) => ElementKind::I32,
        TypeDescriptor::Integer(IntSize::U8) => ElementKind::I64,
        TypeDescriptor::Unsigned(IntSize::U1) => ElementKind::U8,
        TypeDescriptor::Unsigned(IntSize::U2) => ElementKind::U16,
        TypeDescriptor::Unsigned(IntSize::U4) => ElementKind::U32,
        TypeDescriptor::Unsigned(IntSize::U8) => ElementKind::U64,
        TypeDescriptor::Float(FloatSize::U4) => ElementKind::F32,
        TypeDescriptor::Float(FloatSize::U8) => ElementKind::F64,
        TypeDescriptor::Boolean => ElementKind::Bool,
        TypeDescriptor::FixedAscii(len) | TypeDescriptor::FixedUnicode(len) => ElementKind::Bytes(*len),
        TypeDescriptor::FixedArray(inner, len) => {
            let (kind, mut sub_shape) = element_kind(inner)?;
            sub_shape.insert(0, *len);
            return Some((kind, sub_shape));
        }
        _ => return None,
    };
    Some((kind, Vec::new()))
}

/// How the elements of a dataset are read
enum Elements {
    /// Through the typed bindings
    Typed(TypeDescriptor),
    /// Fixed length strings as raw bytes
    Text { descriptor: TypeDescriptor, len: usize },
    /// Compound records as raw bytes. `memory` keeps the members that can be
    /// decoded, packed in member order, and `layout` describes that packing.
    Records { memory: TypeDescriptor, layout: RecordLayout },
}

impl Elements {
    fn new(descriptor: &TypeDescriptor) -> Self {
        match descriptor {
            TypeDescriptor::FixedAscii(len) | TypeDescriptor::FixedUnicode(len) => Elements::Text {
                descriptor: descriptor.clone(),
                len: *len,
            },
            TypeDescriptor::Compound(compound) => {
                let (memory, layout) = packed_compound(compound);
                Elements::Records { memory, layout }
            }
            other => Elements::Typed(other.clone()),
        }
    }
}

fn packed_compound(compound: &CompoundType) -> (TypeDescriptor, RecordLayout) {
    let mut members = Vec::new();
    let mut fields = Vec::new();
    let mut offset = 0;
    for member in &compound.fields {
        let Some((kind, sub_shape)) = element_kind(&member.ty) else {
            warn!("Skipping compound member '{}' of unsupported type {:?}", member.name, member.ty);
            continue;
        };
        fields.push(FieldLayout::new(member.name.as_str(), kind, offset).with_sub_shape(sub_shape));
        members.push(CompoundField {
            name: member.name.clone(),
            ty: member.ty.clone(),
            offset,
            index: members.len(),
        });
        offset += member.ty.size();
    }
    let memory = TypeDescriptor::Compound(CompoundType { fields: members, size: offset });
    (memory, RecordLayout::new(offset, fields))
}

fn read_failed(what: &str) -> DataError {
    DataError::Format(format!("reading {what} failed"))
}

/// Raw bytes of a dataset selection converted to `memory`.
///
/// Without a plan the whole dataset is read.
fn read_dataset_bytes(
    dataset: &Dataset,
    memory: &TypeDescriptor,
    element_size: usize,
    plan: Option<&ReadPlan>,
) -> Result<Vec<u8>, DataError> {
    let hyperslab = plan.filter(|plan| !plan.reads.is_empty());
    let count = match hyperslab {
        Some(plan) => plan.block_len(),
        None => dataset.size(),
    };
    let mut buffer = vec![0u8; count * element_size];
    if buffer.is_empty() {
        return Ok(buffer);
    }
    let memory_type = Datatype::from_descriptor(memory)?;

    let status = match hyperslab {
        // SAFETY: the buffer holds `count` elements of the memory type, and
        // both dataspaces are closed before returning.
        None => unsafe {
            H5Dread(dataset.id(), memory_type.id(), H5S_ALL, H5S_ALL, H5P_DEFAULT, buffer.as_mut_ptr().cast())
        },
        Some(plan) => {
            let start: Vec<hsize_t> = plan.reads.iter().map(|read| read.start as hsize_t).collect();
            let stride: Vec<hsize_t> = plan.reads.iter().map(|read| read.stride as hsize_t).collect();
            let counts: Vec<hsize_t> = plan.reads.iter().map(|read| read.count as hsize_t).collect();
            unsafe {
                let file_space: hid_t = H5Dget_space(dataset.id());
                if file_space < 0 {
                    return Err(read_failed(&dataset.name()));
                }
                let memory_space = H5Screate_simple(counts.len() as c_int, counts.as_ptr(), ptr::null());
                let mut status = H5Sselect_hyperslab(
                    file_space,
                    H5S_seloper_t::H5S_SELECT_SET,
                    start.as_ptr(),
                    stride.as_ptr(),
                    counts.as_ptr(),
                    ptr::null(),
                );
                if status >= 0 && memory_space >= 0 {
                    status = H5Dread(
                        dataset.id(),
                        memory_type.id(),
                        memory_space,
                        file_space,
                        H5P_DEFAULT,
                        buffer.as_mut_ptr().cast(),
                    );
                }
                if memory_space >= 0 {
                    H5Sclose(memory_space);
                }
                H5Sclose(file_space);
                status
            }
        }
    };
    if status < 0 {
        return Err(read_failed(&dataset.name()));
    }
    Ok(buffer)
}

fn read_slab<T: H5Type>(dataset: &Dataset, plan: &ReadPlan) -> Result<ArrayD<T>, DataError> {
    if plan.reads.is_empty() {
        return Ok(dataset.read_dyn::<T>()?);
    }
    if plan.is_empty() {
        return Ok(ArrayD::from_shape_vec(IxDyn(&plan.block_shape()), Vec::new())?);
    }
    let elems: Vec<SliceInfoElem> = plan
        .reads
        .iter()
        .map(|read| SliceInfoElem::Slice {
            start: read.start as isize,
            end: Some(read.end() as isize),
            step: read.stride as isize,
        })
        .collect();
    let selection = SliceInfo::<_, IxDyn, IxDyn>::try_from(elems)?;
    Ok(dataset.read_slice::<T, _, IxDyn>(selection)?)
}

/// The block of a dataset described by `plan`, before the residual index
fn read_block(dataset: &Dataset, elements: &Elements, plan: &ReadPlan) -> Result<ArrayValue, DataError> {
    let shape = plan.block_shape();
    let array = match elements {
        Elements::Typed(descriptor) => match descriptor {
            TypeDescriptor::Integer(IntSize::U1) => ArrayValue::from(read_slab::<i8>(dataset, plan)?),
            TypeDescriptor::Integer(IntSize::U2) => ArrayValue::from(read_slab::<i16>(dataset, plan)?),
            TypeDescriptor::Integer(IntSize::U4) => ArrayValue::from(read_slab::<i32>(dataset, plan)?),
            TypeDescriptor::Integer(IntSize::U8) => ArrayValue::from(read_slab::<i64>(dataset, plan)?),
            TypeDescriptor::Unsigned(IntSize::U1) => ArrayValue::from(read_slab::<u8>(dataset, plan)?),
            TypeDescriptor::Unsigned(IntSize::U2) => ArrayValue::from(read_slab::<u16>(dataset, plan)?),
            TypeDescriptor::Unsigned(IntSize::U4) => ArrayValue::from(read_slab::<u32>(dataset, plan)?),
            TypeDescriptor::Unsigned(IntSize::U8) => ArrayValue::from(read_slab::<u64>(dataset, plan)?),
            TypeDescriptor::Float(FloatSize::U4) => ArrayValue::from(read_slab::<f32>(dataset, plan)?),
            TypeDescriptor::Float(FloatSize::U8) => ArrayValue::from(read_slab::<f64>(dataset, plan)?),
            TypeDescriptor::Boolean => ArrayValue::from(read_slab::<bool>(dataset, plan)?),
            TypeDescriptor::VarLenUnicode => {
                ArrayValue::Str(read_slab::<VarLenUnicode>(dataset, plan)?.map(|s| s.as_str().to_string()))
            }
            TypeDescriptor::VarLenAscii => {
                ArrayValue::Str(read_slab::<VarLenAscii>(dataset, plan)?.map(|s| s.as_str().to_string()))
            }
            other => {
                return Err(RtiError::Unsupported(format!("reading HDF-5 type {other:?}")).into());
            }
        },
        Elements::Text { descriptor, len } => {
            let bytes = read_dataset_bytes(dataset, descriptor, *len, Some(plan))?;
            decode_elements(ElementKind::Bytes(*len), ByteOrder::Native, &bytes, &shape)?
        }
        Elements::Records { memory, layout } => {
            if layout.fields.is_empty() {
                return Ok(ArrayValue::Compound(dv_core::CompoundArray::new(shape, Vec::new())?));
            }
            let bytes = read_dataset_bytes(dataset, memory, layout.size, Some(plan))?;
            ArrayValue::Compound(layout.decode(&bytes, &shape)?)
        }
    };
    Ok(array)
}

/// Every element of a dataset as a 1D array
fn read_flat(dataset: &Dataset, elements: &Elements) -> Result<ArrayValue, DataError> {
    let shape = [dataset.size()];
    match elements {
        Elements::Typed(_) => read_container(dataset, true),
        Elements::Text { descriptor, len } => {
            let bytes = read_dataset_bytes(dataset, descriptor, *len, None)?;
            decode_elements(ElementKind::Bytes(*len), ByteOrder::Native, &bytes, &shape)
        }
        Elements::Records { memory, layout } => {
            let bytes = read_dataset_bytes(dataset, memory, layout.size, None)?;
            Ok(ArrayValue::Compound(layout.decode(&bytes, &shape)?))
        }
    }
}

/// Read an attribute, decoding fixed length strings from raw bytes
fn read_attribute(attr: &Attribute) -> Result<ArrayValue, DataError> {
    let descriptor = attr.dtype()?.to_descriptor()?;
    let (TypeDescriptor::FixedAscii(len) | TypeDescriptor::FixedUnicode(len)) = descriptor else {
        return read_container(attr, false);
    };
    let mut buffer = vec![0u8; attr.size() * len];
    if !buffer.is_empty() {
        let memory_type = Datatype::from_descriptor(&descriptor)?;
        // SAFETY: the buffer holds every element of the attribute
        let status = unsafe { H5Aread(attr.id(), memory_type.id(), buffer.as_mut_ptr().cast()) };
        if status < 0 {
            return Err(read_failed(&attr.name()));
        }
    }
    decode_elements(ElementKind::Bytes(len), ByteOrder::Native, &buffer, &attr.shape())
}

/// All attributes of a group or dataset. Unreadable ones are skipped.
fn read_attributes(location: &Location) -> BTreeMap<String, Value> {
    let mut attributes = BTreeMap::new();
    let names = match location.attr_names() {
        Ok(names) => names,
        Err(e) => {
            warn!("Cannot list attributes of {}: {}", location.name(), e);
            return attributes;
        }
    };
    for name in names {
        let value = location
            .attr(&name)
            .map_err(DataError::from)
            .and_then(|attr| read_attribute(&attr));
        match value {
            Ok(array) => {
                attributes.insert(name, unwrap_single(array));
            }
            Err(e) => debug!("Skipping attribute {} of {}: {}", name, location.name(), e),
        }
    }
    attributes
}

fn dimension_names(ndim: usize) -> Vec<String> {
    (0..ndim).map(|n| format!("Dim{n}")).collect()
}

/// Items for the members of a group, in library order. Members that cannot
/// be resolved, such as dangling links, are skipped.
fn group_children(file: &Arc<hdf5::File>, group: &Group, icon_color: &str) -> Result<Vec<RepoTreeItem>, DataError> {
    let mut children = Vec::new();
    for name in group.member_names()? {
        let item = match group.loc_type_by_name(&name) {
            Ok(LocationType::Group) => {
                RepoTreeItem::new(name.as_str(), Hdf5GroupAdapter::new(Arc::clone(file), group.group(&name)?))
            }
            Ok(LocationType::Dataset) => {
                let dataset = group.dataset(&name)?;
                if dataset.is_scalar() {
                    RepoTreeItem::new(name.as_str(), Hdf5ScalarAdapter::new(Arc::clone(file), dataset)?)
                } else {
                    RepoTreeItem::new(name.as_str(), Hdf5DatasetAdapter::new(Arc::clone(file), dataset)?)
                }
            }
            Ok(other) => {
                warn!("Skipping {} in {}: unexpected member type {:?}", name, group.name(), other);
                continue;
            }
            Err(e) => {
                warn!("Skipping {} in {}: {}", name, group.name(), e);
                continue;
            }
        };
        children.push(item.with_icon_color(icon_color));
    }
    Ok(children)
}

/// An HDF-5 file, shown as its root group
pub struct Hdf5FileAdapter {
    path: PathBuf,
    file: OwnedHandle<hdf5::File>,
}

impl Hdf5FileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: OwnedHandle::new(),
        }
    }
}

impl Adapter for Hdf5FileAdapter {
    fn type_name(&self) -> &str {
        "HDF-5 file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        let file = hdf5::File::open(&self.path).map_err(DataError::from)?;
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
        Ok(group_children(file, file, ctx.icon_color)?)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.file.get().map(|file| read_attributes(file)).unwrap_or_default()
    }
}

pub struct Hdf5GroupAdapter {
    file: Arc<hdf5::File>,
    group: Group,
}

impl Hdf5GroupAdapter {
    pub fn new(file: Arc<hdf5::File>, group: Group) -> Self {
        Self { file, group }
    }
}

impl Adapter for Hdf5GroupAdapter {
    fn type_name(&self) -> &str {
        "HDF-5 group"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Group
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        Ok(group_children(&self.file, &self.group, ctx.icon_color)?)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        read_attributes(&self.group)
    }
}

/// A dataset and what is needed to read it, shared with the field items of
/// compound datasets
struct DatasetData {
    _file: Arc<hdf5::File>,
    dataset: Dataset,
    descriptor: TypeDescriptor,
    elements: Elements,
    attributes: BTreeMap<String, Value>,
}

impl DatasetData {
    fn new(file: Arc<hdf5::File>, dataset: Dataset) -> Result<Self, DataError> {
        let descriptor = dataset.dtype()?.to_descriptor()?;
        Ok(Self {
            _file: file,
            elements: Elements::new(&descriptor),
            descriptor,
            attributes: read_attributes(&dataset),
            dataset,
        })
    }

    /// `dataset[index]` with missing values masked
    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let plan = plan_read(index, &self.dataset.shape())?;
        let block = read_block(&self.dataset, &self.elements, &plan)?;
        Ok(masked(block.get_item(&plan.residual)?, missing_value_of(&self.attributes).as_ref()))
    }
}

impl RecordSource for DatasetData {
    fn record_shape(&self) -> Vec<usize> {
        self.dataset.shape()
    }

    fn read_records(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let plan = plan_read(index, &self.dataset.shape())?;
        let block = read_block(&self.dataset, &self.elements, &plan)?;
        Ok(block.get_item(&plan.residual)?)
    }

    fn record_dimension_names(&self) -> Vec<String> {
        dimension_names(self.dataset.ndim())
    }

    fn record_attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }
}

/// A dataset with at least one dimension; members of compound datasets are
/// its children
pub struct Hdf5DatasetAdapter {
    data: Arc<DatasetData>,
}

impl Hdf5DatasetAdapter {
    pub fn new(file: Arc<hdf5::File>, dataset: Dataset) -> Result<Self, DataError> {
        Ok(Self {
            data: Arc::new(DatasetData::new(file, dataset)?),
        })
    }
}

impl Adapter for Hdf5DatasetAdapter {
    fn type_name(&self) -> &str {
        "HDF-5 dataset"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn has_children(&self) -> bool {
        matches!(self.data.elements, Elements::Records { .. })
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let Elements::Records { layout, .. } = &self.data.elements else {
            return Ok(Vec::new());
        };
        let source: Arc<dyn RecordSource> = self.data.clone();
        Ok(RecordFieldAdapter::children("HDF-5 field", source, layout, ctx.icon_color))
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.data.attributes.clone()
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(self)
    }
}

impl Sliceable for Hdf5DatasetAdapter {
    fn shape(&self) -> Vec<usize> {
        self.data.dataset.shape()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        self.data.get_item(index)
    }

    fn element_type_name(&self) -> String {
        descriptor_type_name(&self.data.descriptor)
    }

    fn dimension_names(&self) -> Vec<String> {
        dimension_names(self.data.dataset.ndim())
    }

    fn unit(&self) -> String {
        unit_of(&self.data.attributes)
    }

    fn missing_data_value(&self) -> Option<Value> {
        missing_value_of(&self.data.attributes)
    }
}

/// A dataset without dimensions, exposed with shape `[1]`
pub struct Hdf5ScalarAdapter {
    data: DatasetData,
}

impl Hdf5ScalarAdapter {
    pub fn new(file: Arc<hdf5::File>, dataset: Dataset) -> Result<Self, DataError> {
        Ok(Self {
            data: DatasetData::new(file, dataset)?,
        })
    }
}

impl Adapter for Hdf5ScalarAdapter {
    fn type_name(&self) -> &str {
        "HDF-5 scalar"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Scalar
    }

    fn has_children(&self) -> bool {
        false
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        self.data.attributes.clone()
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(self)
    }

    fn summary(&self) -> String {
        match self.get_item(&[IndexElem::at(0)]).map(|array| array.scalar_value()) {
            Ok(Some(value)) => value.to_string(),
            Ok(None) => String::new(),
            Err(e) => format!("Error: {e}"),
        }
    }
}

impl Sliceable for Hdf5ScalarAdapter {
    fn shape(&self) -> Vec<usize> {
        vec![1]
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let array = read_flat(&self.data.dataset, &self.data.elements)?;
        Ok(masked(array.get_item(index)?, self.missing_data_value().as_ref()))
    }

    fn element_type_name(&self) -> String {
        descriptor_type_name(&self.data.descriptor)
    }

    fn dimension_names(&self) -> Vec<String> {
        dimension_names(1)
    }

    fn unit(&self) -> String {
        unit_of(&self.data.attributes)
    }

    fn missing_data_value(&self) -> Option<Value> {
        missing_value_of(&self.data.attributes)
    }
}

pub fn create_hdf5_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, Hdf5FileAdapter::new(path)).with_icon_color(ICON_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::testkit::check_adapter_contract;
    use dv_core::{parse_index, ErrorPolicy, Registry};
    use hdf5::types::FixedAscii;
    use ndarray::{arr1, arr2};
    use tempfile::tempdir;

    fn write_sample(path: &Path) {
        let file = hdf5::File::create(path).unwrap();
        let group = file.create_group("science").unwrap();

        let data = group.new_dataset::<f64>().shape([2, 3]).create("temperature").unwrap();
        data.write(&arr2(&[[1.0, 2.0, 3.0], [4.0, -999.0, 6.0]])).unwrap();
        let units: VarLenUnicode = "K".parse().unwrap();
        data.new_attr::<VarLenUnicode>().shape(()).create("units").unwrap().write_scalar(&units).unwrap();
        data.new_attr::<f64>().shape(()).create("missing_value").unwrap().write_scalar(&-999.0).unwrap();

        let count = file.new_dataset::<i32>().shape(()).create("count").unwrap();
        count.write_scalar(&7).unwrap();
        // sorts between the two real members
        file.link_soft("/nowhere", "dangling").unwrap();
    }

    #[derive(H5Type, Clone, Copy)]
    #[repr(C)]
    struct Reading {
        id: i32,
        value: f64,
        label: FixedAscii<6>,
        position: [f32; 2],
    }

    fn write_records(path: &Path) {
        let file = hdf5::File::create(path).unwrap();
        let reading = |id: i32, value: f64, label: &str| Reading {
            id,
            value,
            label: FixedAscii::from_ascii(label).unwrap(),
            position: [id as f32, -(id as f32)],
        };
        let readings = arr1(&[reading(1, 0.5, "first"), reading(2, -1.0, "second"), reading(3, 2.5, "third")]);
        let data = file.new_dataset::<Reading>().shape([3]).create("readings").unwrap();
        data.write(&readings).unwrap();
        let units: Vec<VarLenUnicode> = ["", "V", "", "mm"].iter().map(|u| u.parse().unwrap()).collect();
        data.new_attr::<VarLenUnicode>().shape([4]).create("units").unwrap().write(&arr1(&units)).unwrap();
        data.new_attr::<f64>().shape(()).create("_FillValue").unwrap().write_scalar(&-1.0).unwrap();

        let codes = arr1(&[FixedAscii::<4>::from_ascii("ab").unwrap(), FixedAscii::<4>::from_ascii("wxyz").unwrap()]);
        let text = file.new_dataset::<FixedAscii<4>>().shape([2]).create("codes").unwrap();
        text.write(&codes).unwrap();
        let label = FixedAscii::<8>::from_ascii("station").unwrap();
        text.new_attr::<FixedAscii<8>>().shape(()).create("site").unwrap().write_scalar(&label).unwrap();
    }

    #[test]
    fn test_groups_and_datasets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.h5");
        write_sample(&path);

        let registry = Registry::new();
        let mut item = create_hdf5_file(&path);
        let mut children = item.fetch_children(&registry, ErrorPolicy::Strict).unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["count", "science"]);

        let count = &children[0];
        assert_eq!(count.type_name(), "HDF-5 scalar");
        assert_eq!(count.shape().unwrap(), vec![1]);
        assert_eq!(count.summary(), "7");

        let science = children[1].fetch_children(&registry, ErrorPolicy::Strict).unwrap();
        let temperature = &science[0];
        assert_eq!(temperature.type_name(), "HDF-5 dataset");
        assert_eq!(temperature.shape().unwrap(), vec![2, 3]);
        assert_eq!(temperature.element_type_name(), "float64");
        assert_eq!(temperature.dimension_names(), vec!["Dim0", "Dim1"]);
        assert_eq!(temperature.unit(), "K");
        assert_eq!(temperature.missing_data_value(), Some(Value::Float(-999.0)));

        let row = temperature.get_item(&parse_index("1, 1:").unwrap()).unwrap().to_f64().unwrap();
        assert!(row[[0]].is_nan());
        assert_eq!(row[[1]], 6.0);
    }

    #[test]
    fn test_hyperslab_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.h5");
        write_sample(&path);

        let registry = Registry::new();
        let mut item = create_hdf5_file(&path);
        let mut children = item.fetch_children(&registry, ErrorPolicy::Strict).unwrap();
        let science = children[1].fetch_children(&registry, ErrorPolicy::Strict).unwrap();
        let temperature = &science[0];

        let reversed = temperature.get_item(&parse_index("0, ::-2").unwrap()).unwrap();
        assert_eq!(reversed.to_f64().unwrap().iter().copied().collect::<Vec<f64>>(), vec![3.0, 1.0]);
        let column = temperature.get_item(&parse_index("..., -1").unwrap()).unwrap();
        assert_eq!(column.to_f64().unwrap().iter().copied().collect::<Vec<f64>>(), vec![3.0, 6.0]);
        let empty = temperature.get_item(&parse_index("1:1").unwrap()).unwrap();
        assert_eq!(empty.shape(), &[0, 3]);
        assert!(temperature.get_item(&parse_index("2").unwrap()).is_err());
    }

    #[test]
    fn test_compound_and_text_datasets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("records.h5");
        write_records(&path);

        let registry = Registry::new();
        let mut item = create_hdf5_file(&path);
        let mut children = item.fetch_children(&registry, ErrorPolicy::Strict).unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["codes", "readings"]);

        let codes = &children[0];
        assert_eq!(codes.element_type_name(), "str");
        assert_eq!(codes.attributes().get("site"), Some(&Value::from("station")));
        let text = codes.get_item(&[]).unwrap();
        assert_eq!(text, ArrayValue::Str(arr1(&["ab".to_string(), "wxyz".to_string()]).into_dyn()));

        let readings = &mut children[1];
        assert!(readings.has_children());
        assert_eq!(readings.element_type_name(), "<structured>");
        let tail = readings.get_item(&[IndexElem::range(1, 3)]).unwrap();
        assert_eq!(tail.shape(), &[2]);
        assert_eq!(tail.field("label").unwrap().get_item(&[IndexElem::at(0)]).unwrap().scalar_value(), Some(Value::from("second")));

        let fields = readings.fetch_children(&registry, ErrorPolicy::Strict).unwrap();
        let names: Vec<&str> = fields.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["id", "value", "label", "position"]);
        assert_eq!(fields[0].type_name(), "HDF-5 field");

        let value = &fields[1];
        assert_eq!(value.unit(), "V");
        assert_eq!(value.element_type_name(), "float64");
        let values = value.get_item(&[]).unwrap().to_f64().unwrap();
        assert_eq!(values[[0]], 0.5);
        assert!(values[[1]].is_nan());

        let position = &fields[3];
        assert_eq!(position.shape().unwrap(), vec![3, 2]);
        assert_eq!(position.dimension_names(), vec!["Dim0", "SubDim0"]);
        assert_eq!(position.unit(), "mm");
        let y = position.get_item(&[IndexElem::at(2), IndexElem::at(1)]).unwrap();
        assert_eq!(y.scalar_value(), Some(Value::Float(-3.0)));
    }

    #[test]
    fn test_contract() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.h5");
        write_sample(&path);
        check_adapter_contract(&|| create_hdf5_file(&path), Arc::new(Registry::new()));

        let records = dir.path().join("records.h5");
        write_records(&records);
        check_adapter_contract(&|| create_hdf5_file(&records), Arc::new(Registry::new()));

        let missing = dir.path().join("missing.h5");
        check_adapter_contract(&|| create_hdf5_file(&missing), Arc::new(Registry::new()));
    }
}
