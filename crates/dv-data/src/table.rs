//! Delimited text tables
//!
//! The file is parsed with `csv`, column types are inferred from a sample of
//! rows and the result is held as an arrow [`RecordBatch`] while the item is
//! open.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use csv::ReaderBuilder;
use dv_core::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::array::{ArrayValue, IndexElem};
use dv_core::memory::create_with_color;
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::arrow_io::{batch_columns, column_children, Columns};
use crate::config::{CsvTableConfig, NullConfig};
use crate::DataError;

pub const ICON_COLOR: &str = "#CC6600";

/// Parse a delimited text file into a record batch
pub fn read_table(path: &Path, config: &CsvTableConfig) -> Result<RecordBatch, DataError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(config.delimiter_byte())
        .comment(config.comment_byte())
        .has_headers(config.has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(File::open(path)?));

    let mut names: Vec<String> = if config.has_headers {
        reader.headers()?.iter().map(|name| name.to_string()).collect()
    } else {
        Vec::new()
    };

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(names.len());
    for n in names.len()..width {
        names.push(format!("column-{n}"));
    }

    let samples = &rows[..rows.len().min(config.sample_rows.max(1))];
    let fields: Vec<Field> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| Field::new(name, detect_column_type(samples, idx, &config.null), true))
        .collect();
    let columns: Vec<ArrayRef> = fields
        .iter()
        .enumerate()
        .map(|(idx, field)| build_column(&rows, idx, field.data_type(), &config.null))
        .collect();

    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    Ok(RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?)
}

/// Infer a column type from sample rows: integer, then float, then boolean,
/// falling back to text. Missing cells do not vote.
fn detect_column_type(samples: &[Vec<String>], col_idx: usize, null: &NullConfig) -> DataType {
    let mut is_int = true;
    let mut is_float = true;
    let mut is_bool = true;

    for value in samples.iter().filter_map(|row| row.get(col_idx)) {
        if null.is_null(value) {
            continue;
        }
        if is_int && value.parse::<i64>().is_err() {
            is_int = false;
        }
        if is_float && value.parse::<f64>().is_err() {
            is_float = false;
        }
        if is_bool && parse_bool(value).is_none() {
            is_bool = false;
        }
    }

    if is_int {
        DataType::Int64
    } else if is_float {
        DataType::Float64
    } else if is_bool {
        DataType::Boolean
    } else {
        DataType::Utf8
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

/// Build one arrow column. Cells that are missing or fail to parse become nulls.
fn build_column(rows: &[Vec<String>], col_idx: usize, data_type: &DataType, null: &NullConfig) -> ArrayRef {
    let cells = rows
        .iter()
        .map(|row| row.get(col_idx).filter(|value| !null.is_null(value)));

    match data_type {
        DataType::Int64 => {
            let mut builder = Int64Builder::new();
            for cell in cells {
                builder.append_option(cell.and_then(|value| value.parse().ok()));
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::new();
            for cell in cells {
                builder.append_option(cell.and_then(|value| value.parse().ok()));
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for cell in cells {
                builder.append_option(cell.and_then(|value| parse_bool(value)));
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                builder.append_option(cell);
            }
            Arc::new(builder.finish())
        }
    }
}

/// Rows by columns as `f64`, when every column is numeric
fn numeric_matrix(columns: &Columns, num_rows: usize) -> Option<ArrayValue> {
    if columns.is_empty() {
        return None;
    }
    let numeric = columns
        .iter()
        .map(|(_, array)| match array.as_ref() {
            ArrayValue::I64(_) | ArrayValue::F64(_) => array.to_f64(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    let matrix = Array2::from_shape_fn((num_rows, numeric.len()), |(row, col)| numeric[col][[row]]);
    Some(ArrayValue::F64(matrix.into_dyn()))
}

struct Table {
    columns: Columns,
    num_rows: usize,
    matrix: Option<ArrayValue>,
}

/// A CSV file; sliceable as a matrix when all columns are numeric
pub struct TableFileAdapter {
    path: PathBuf,
    config: CsvTableConfig,
    table: Option<Table>,
}

impl TableFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self::with_config(path, CsvTableConfig::default())
    }

    pub fn with_config(path: &Path, config: CsvTableConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            config,
            table: None,
        }
    }
}

impl Adapter for TableFileAdapter {
    fn type_name(&self) -> &str {
        "CSV table"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        let batch = read_table(&self.path, &self.config)?;
        debug!("Parsed {} rows and {} columns from {}", batch.num_rows(), batch.num_columns(), self.path.display());

        let columns = batch_columns(&batch);
        let num_rows = batch.num_rows();
        let matrix = numeric_matrix(&columns, num_rows);
        self.table = Some(Table { columns, num_rows, matrix });
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.table = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.table.is_some()
    }

    /// The columns, then `index` with the row numbers and `columns` with the names
    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let table = self.table.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;

        let mut children = column_children(&table.columns, ctx.icon_color);
        let index: Array1<i64> = (0..table.num_rows as i64).collect();
        children.push(create_with_color("index", Value::Array(index.into_dyn().into()), ctx.icon_color));
        let names: Array1<String> = table.columns.iter().map(|(name, _)| name.clone()).collect();
        children.push(create_with_color("columns", Value::Array(ArrayValue::Str(names.into_dyn())), ctx.icon_color));
        Ok(children)
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        attributes.insert("delimiter".to_string(), Value::from(self.config.delimiter.to_string()));
        if let Some(table) = &self.table {
            attributes.insert("num_rows".to_string(), Value::UInt(table.num_rows as u64));
            attributes.insert("num_columns".to_string(), Value::UInt(table.columns.len() as u64));
        }
        attributes
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.table.as_ref().filter(|table| table.matrix.is_some()).map(|table| table as &dyn Sliceable)
    }

    fn summary(&self) -> String {
        self.table
            .as_ref()
            .map(|table| format!("{} rows, {} columns", table.num_rows, table.columns.len()))
            .unwrap_or_default()
    }
}

impl Sliceable for Table {
    fn shape(&self) -> Vec<usize> {
        self.matrix.as_ref().map(|m| m.shape().to_vec()).unwrap_or_default()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        let matrix = self.matrix.as_ref().ok_or_else(|| RtiError::Unsupported("table has text columns".into()))?;
        Ok(matrix.get_item(index)?)
    }

    fn element_type_name(&self) -> String {
        "float64".to_string()
    }

    fn dimension_names(&self) -> Vec<String> {
        vec!["index".to_string(), "columns".to_string()]
    }

    fn missing_data_value(&self) -> Option<Value> {
        Some(Value::Float(f64::NAN))
    }
}

pub fn create_csv_table(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, TableFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::testkit::check_adapter_contract;
    use dv_core::{parse_index, ErrorPolicy, Registry};
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_type_inference() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "mixed.csv",
            "# measurements\nid,value,ok,name\n1,2.5,yes,a\n2,N/A,no,b\n3,4,true,\n",
        );
        let batch = read_table(&path, &CsvTableConfig::default()).unwrap();
        let types: Vec<DataType> = batch.schema().fields().iter().map(|f| f.data_type().clone()).collect();
        assert_eq!(types, vec![DataType::Int64, DataType::Float64, DataType::Boolean, DataType::Utf8]);
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.column(1).null_count(), 1);
    }

    #[test]
    fn test_numeric_table_is_sliceable() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "grid.csv", "x,y\n1,10.5\n2,\n3,30.5\n");

        let mut item = create_csv_table(&path);
        assert!(!item.is_sliceable());
        item.open(ErrorPolicy::Strict).unwrap();
        assert_eq!(item.shape().unwrap(), vec![3, 2]);
        assert_eq!(item.dimension_names(), vec!["index", "columns"]);

        let row = item.get_item(&parse_index("1").unwrap()).unwrap();
        let values = row.to_f64().unwrap();
        assert_eq!(values[[0]], 2.0);
        assert!(values[[1]].is_nan());
    }

    #[test]
    fn test_children() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "people.csv", "name,age\nann,31\nbob,42\n");

        let mut item = create_csv_table(&path);
        let children = item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["name", "age", "index", "columns"]);
        assert!(!item.is_sliceable());
        assert_eq!(item.summary(), "2 rows, 2 columns");

        let age = &children[1];
        assert_eq!(age.shape().unwrap(), vec![2]);
        assert_eq!(age.get_item(&[IndexElem::at(1)]).unwrap().scalar_value(), Some(Value::Int(42)));
    }

    #[test]
    fn test_without_headers() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "raw.csv", "1;2\n3;4;5\n");
        let config = CsvTableConfig {
            delimiter: ';',
            has_headers: false,
            ..CsvTableConfig::default()
        };
        let batch = read_table(&path, &config).unwrap();
        let names: Vec<String> = batch.schema().fields().iter().map(|f| f.name().clone()).collect();
        assert_eq!(names, vec!["column-0", "column-1", "column-2"]);
        assert_eq!(batch.column(2).null_count(), 1);
    }

    #[test]
    fn test_contract() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "t.csv", "a,b\n1,2\n");
        check_adapter_contract(&|| create_csv_table(&path), Arc::new(Registry::new()));
    }
}
