//! MATLAB `.mat` files (level 5) parsed with `matfile`

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use dv_core::adapter::{Adapter, FetchContext, IconGlyph};
use dv_core::array::ArrayValue;
use dv_core::memory::create_with_color;
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use matfile::{MatFile, NumericData};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use tracing::{debug, warn};

use crate::DataError;

pub const ICON_COLOR: &str = "#987456";

/// MATLAB stores arrays in column-major order
fn column_major<T>(shape: &[usize], data: Vec<T>) -> Result<ArrayD<T>, DataError> {
    Ok(ArrayD::from_shape_vec(IxDyn(shape).f(), data)?)
}

fn to_array(name: &str, shape: &[usize], data: &NumericData) -> Result<ArrayValue, DataError> {
    macro_rules! real_part {
        ($real:expr, $imag:expr) => {{
            if $imag.is_some() {
                warn!("Dropping the imaginary part of complex variable '{}'", name);
            }
            ArrayValue::from(column_major(shape, $real.clone())?)
        }};
    }
    let array = match data {
        NumericData::Int8 { real, imag } => real_part!(real, imag),
        NumericData::UInt8 { real, imag } => real_part!(real, imag),
        NumericData::Int16 { real, imag } => real_part!(real, imag),
        NumericData::UInt16 { real, imag } => real_part!(real, imag),
        NumericData::Int32 { real, imag } => real_part!(real, imag),
        NumericData::UInt32 { real, imag } => real_part!(real, imag),
        NumericData::Int64 { real, imag } => real_part!(real, imag),
        NumericData::UInt64 { real, imag } => real_part!(real, imag),
        NumericData::Single { real, imag } => real_part!(real, imag),
        NumericData::Double { real, imag } => real_part!(real, imag),
    };
    Ok(array)
}

/// Numeric variables of a `.mat` file sorted by name
pub fn read_mat(path: &Path) -> Result<Vec<(String, ArrayValue)>, DataError> {
    let mat = MatFile::parse(BufReader::new(File::open(path)?))?;
    let mut variables = mat
        .arrays()
        .iter()
        .map(|array| Ok((array.name().to_string(), to_array(array.name(), array.size(), array.data())?)))
        .collect::<Result<Vec<_>, DataError>>()?;
    variables.sort_by(|a, b| a.0.cmp(&b.0));
    debug!("Read {} variables from {}", variables.len(), path.display());
    Ok(variables)
}

/// A `.mat` file; each variable is an array child
pub struct MatlabFileAdapter {
    path: PathBuf,
    variables: Option<Vec<(String, ArrayValue)>>,
}

impl MatlabFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            variables: None,
        }
    }
}

impl Adapter for MatlabFileAdapter {
    fn type_name(&self) -> &str {
        "MATLAB file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.variables = Some(read_mat(&self.path)?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.variables = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.variables.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let variables = self.variables.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        Ok(variables
            .iter()
            .map(|(name, array)| create_with_color(name.as_str(), Value::Array(array.clone()), ctx.icon_color))
            .collect())
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        if let Some(variables) = &self.variables {
            attributes.insert("variables".to_string(), Value::UInt(variables.len() as u64));
        }
        attributes
    }

    fn summary(&self) -> String {
        self.variables
            .as_ref()
            .map(|variables| format!("{} variables", variables.len()))
            .unwrap_or_default()
    }
}

pub fn create_matlab_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, MatlabFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::testkit::check_adapter_contract;
    use dv_core::{parse_index, ErrorPolicy, Registry};
    use std::sync::Arc;
    use tempfile::tempdir;

    const MI_INT8: u32 = 1;
    const MI_INT32: u32 = 5;
    const MI_UINT32: u32 = 6;
    const MI_DOUBLE: u32 = 9;
    const MI_MATRIX: u32 = 14;
    const MX_DOUBLE_CLASS: u32 = 6;

    fn element(data_type: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&data_type.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(payload);
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        bytes
    }

    /// A little-endian level 5 file holding one real double matrix
    fn write_double_matrix(path: &Path, name: &str, rows: i32, cols: i32, values: &[f64]) {
        let mut flags = Vec::new();
        flags.extend_from_slice(&MX_DOUBLE_CLASS.to_le_bytes());
        flags.extend_from_slice(&0u32.to_le_bytes());
        let mut dims = Vec::new();
        dims.extend_from_slice(&rows.to_le_bytes());
        dims.extend_from_slice(&cols.to_le_bytes());
        let real: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut matrix = element(MI_UINT32, &flags);
        matrix.extend(element(MI_INT32, &dims));
        matrix.extend(element(MI_INT8, name.as_bytes()));
        matrix.extend(element(MI_DOUBLE, &real));

        let mut header = format!("{:<116}", "MATLAB 5.0 MAT-file").into_bytes();
        header.extend_from_slice(&[0; 8]);
        header.extend_from_slice(&0x0100u16.to_le_bytes());
        header.extend_from_slice(b"IM");
        header.extend(element(MI_MATRIX, &matrix));
        std::fs::write(path, header).unwrap();
    }

    #[test]
    fn test_column_major() {
        let array = column_major(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(array[[0, 1]], 3);
        assert_eq!(array[[1, 0]], 2);
    }

    #[test]
    fn test_variables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.mat");
        write_double_matrix(&path, "grid", 2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let mut item = create_matlab_file(&path);
        let children = item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap();
        assert_eq!(item.summary(), "1 variables");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].node_name(), "grid");
        assert_eq!(children[0].shape().unwrap(), vec![2, 3]);
        let value = children[0].get_item(&parse_index("0, 1").unwrap()).unwrap();
        assert_eq!(value.scalar_value(), Some(Value::Float(3.0)));

        check_adapter_contract(&|| create_matlab_file(&path), Arc::new(Registry::new()));
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.mat");
        std::fs::write(&path, b"definitely not a mat file").unwrap();

        let mut item = create_matlab_file(&path);
        assert!(item.open(ErrorPolicy::Strict).is_err());
        assert!(!item.is_open());
        assert!(item.last_error().is_some());
        check_adapter_contract(&|| create_matlab_file(&path), Arc::new(Registry::new()));
    }
}
