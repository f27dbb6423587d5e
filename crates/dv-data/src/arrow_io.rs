//! Arrow IPC and Parquet files
//!
//! Both formats are read into a single [`RecordBatch`] when the item is
//! opened. Every supported column becomes a one dimensional child.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, AsArray};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, SchemaRef,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use dv_core::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::array::{ArrayValue, IndexElem};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use ndarray::Array1;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, warn};

use crate::DataError;

pub const ICON_COLOR: &str = "#AA4488";

/// Container format of an [`ArrowFileAdapter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowFormat {
    Ipc,
    Parquet,
}

/// Read every batch of an Arrow IPC file and concatenate them
pub fn read_ipc(path: &Path) -> Result<RecordBatch, DataError> {
    let reader = FileReader::try_new(File::open(path)?, None)?;
    let schema = reader.schema();
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Read every row group of a Parquet file and concatenate them
pub fn read_parquet(path: &Path) -> Result<RecordBatch, DataError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema: SchemaRef = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

macro_rules! primitive_column {
    ($column:expr, $arrow_type:ty) => {{
        let array = $column.as_primitive::<$arrow_type>();
        if array.null_count() > 0 {
            let values: Array1<f64> = array
                .iter()
                .map(|value| value.map_or(f64::NAN, |v| v as f64))
                .collect();
            ArrayValue::F64(values.into_dyn())
        } else {
            ArrayValue::from(Array1::from(array.values().to_vec()).into_dyn())
        }
    }};
}

/// Convert one arrow column into a 1D array.
///
/// Integer columns with nulls become `f64` with NaN. Boolean and text
/// columns have no such marker: a null reads as `false` or as the empty
/// string, the same as a stored `false` or `""`. Temporal and decimal
/// columns become text. Nested types are not supported and yield `None`.
pub fn column_to_array(column: &dyn Array) -> Option<ArrayValue> {
    let array = match column.data_type() {
        DataType::Boolean => {
            let values: Array1<bool> = column
                .as_boolean()
                .iter()
                .map(|value| value.unwrap_or(false))
                .collect();
            ArrayValue::Bool(values.into_dyn())
        }
        DataType::Int8 => primitive_column!(column, Int8Type),
        DataType::Int16 => primitive_column!(column, Int16Type),
        DataType::Int32 => primitive_column!(column, Int32Type),
        DataType::Int64 => primitive_column!(column, Int64Type),
        DataType::UInt8 => primitive_column!(column, UInt8Type),
        DataType::UInt16 => primitive_column!(column, UInt16Type),
        DataType::UInt32 => primitive_column!(column, UInt32Type),
        DataType::UInt64 => primitive_column!(column, UInt64Type),
        DataType::Float32 => primitive_column!(column, Float32Type),
        DataType::Float64 => primitive_column!(column, Float64Type),
        DataType::Float16 => {
            let widened = cast(column, &DataType::Float64).ok()?;
            return column_to_array(widened.as_ref());
        }
        DataType::Utf8 => text_column(column.as_string::<i32>().iter()),
        DataType::LargeUtf8 => text_column(column.as_string::<i64>().iter()),
        DataType::Date32
        | DataType::Date64
        | DataType::Time32(_)
        | DataType::Time64(_)
        | DataType::Timestamp(_, _)
        | DataType::Duration(_)
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => {
            let text = cast(column, &DataType::Utf8).ok()?;
            return column_to_array(text.as_ref());
        }
        _ => return None,
    };
    Some(array)
}

fn text_column<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayValue {
    let values: Array1<String> = values.map(|value| value.unwrap_or_default().to_string()).collect();
    ArrayValue::Str(values.into_dyn())
}

/// Named columns of a table, in schema order
pub type Columns = Vec<(String, Arc<ArrayValue>)>;

/// Convert the supported columns of a batch, skipping the rest with a warning
pub fn batch_columns(batch: &RecordBatch) -> Columns {
    batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .filter_map(|(field, column)| match column_to_array(column.as_ref()) {
            Some(array) => Some((field.name().clone(), Arc::new(array))),
            None => {
                warn!("Skipping column '{}' of unsupported type {}", field.name(), field.data_type());
                None
            }
        })
        .collect()
}

/// One column of a table
pub struct ColumnAdapter {
    array: Arc<ArrayValue>,
    missing: Option<Value>,
}

impl ColumnAdapter {
    pub fn new(array: Arc<ArrayValue>) -> Self {
        let missing = matches!(array.as_ref(), ArrayValue::F64(_)).then_some(Value::Float(f64::NAN));
        Self { array, missing }
    }
}

impl Adapter for ColumnAdapter {
    fn type_name(&self) -> &str {
        "Column"
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

impl Sliceable for ColumnAdapter {
    fn shape(&self) -> Vec<usize> {
        self.array.shape().to_vec()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.array.get_item(index)?)
    }

    fn element_type_name(&self) -> String {
        self.array.element_type_name().to_string()
    }

    fn dimension_names(&self) -> Vec<String> {
        vec!["index".to_string()]
    }

    fn missing_data_value(&self) -> Option<Value> {
        self.missing.clone()
    }
}

/// Column children sharing the parent's icon color
pub fn column_children(columns: &Columns, icon_color: &str) -> Vec<RepoTreeItem> {
    columns
        .iter()
        .map(|(name, array)| {
            RepoTreeItem::new(name.as_str(), ColumnAdapter::new(Arc::clone(array))).with_icon_color(icon_color)
        })
        .collect()
}

struct LoadedTable {
    columns: Columns,
    num_rows: usize,
    metadata: BTreeMap<String, Value>,
}

/// An Arrow IPC or Parquet file
pub struct ArrowFileAdapter {
    path: PathBuf,
    format: ArrowFormat,
    table: Option<LoadedTable>,
}

impl ArrowFileAdapter {
    pub fn new(path: &Path, format: ArrowFormat) -> Self {
        Self {
            path: path.to_path_buf(),
            format,
            table: None,
        }
    }

    fn load(&self) -> Result<LoadedTable, DataError> {
        let batch = match self.format {
            ArrowFormat::Ipc => read_ipc(&self.path)?,
            ArrowFormat::Parquet => read_parquet(&self.path)?,
        };
        debug!("Read {} rows from {}", batch.num_rows(), self.path.display());

        let metadata = batch
            .schema()
            .metadata()
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value.as_str())))
            .collect();
        Ok(LoadedTable {
            columns: batch_columns(&batch),
            num_rows: batch.num_rows(),
            metadata,
        })
    }
}

impl Adapter for ArrowFileAdapter {
    fn type_name(&self) -> &str {
        match self.format {
            ArrowFormat::Ipc => "Arrow file",
            ArrowFormat::Parquet => "Parquet file",
        }
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::File
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.table = Some(self.load()?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.table = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.table.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let table = self.table.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        Ok(column_children(&table.columns, ctx.icon_color))
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let Some(table) = &self.table else {
            return BTreeMap::new();
        };
        let mut attributes = table.metadata.clone();
        attributes.insert("num_rows".to_string(), Value::UInt(table.num_rows as u64));
        attributes.insert("num_columns".to_string(), Value::UInt(table.columns.len() as u64));
        attributes
    }

    fn summary(&self) -> String {
        self.table
            .as_ref()
            .map(|table| format!("{} rows, {} columns", table.num_rows, table.columns.len()))
            .unwrap_or_default()
    }
}

pub fn create_arrow_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, ArrowFileAdapter::new(path, ArrowFormat::Ipc)).with_icon_color(ICON_COLOR)
}

pub fn create_parquet_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, ArrowFileAdapter::new(path, ArrowFormat::Parquet)).with_icon_color(ICON_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, ListArray, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::ipc::writer::FileWriter;
    use dv_core::testkit::check_adapter_contract;
    use dv_core::{ErrorPolicy, Registry};
    use parquet::arrow::ArrowWriter;
    use tempfile::tempdir;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("score", DataType::Int64, true),
            Field::new("weight", DataType::Float64, false),
            Field::new("label", DataType::Utf8, true),
            Field::new(
                "tags",
                DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
                true,
            ),
        ]));
        let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1)]),
            None,
            Some(vec![Some(2), Some(3)]),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(Int64Array::from(vec![Some(10), None, Some(30)])),
            Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            Arc::new(tags),
        ];
        RecordBatch::try_new(schema, columns).unwrap()
    }

    fn write_ipc(path: &Path) {
        let batch = sample_batch();
        let mut writer = FileWriter::try_new(File::create(path).unwrap(), &batch.schema()).unwrap();
        writer.write(&batch).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    fn write_parquet(path: &Path) {
        let batch = sample_batch();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_column_conversion() {
        let batch = sample_batch();
        let columns = batch_columns(&batch);
        let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["id", "score", "weight", "label"]);

        assert!(matches!(columns[0].1.as_ref(), ArrayValue::I64(_)));
        let ArrayValue::F64(score) = columns[1].1.as_ref() else {
            panic!("nullable ints should become floats");
        };
        assert!(score[[1]].is_nan());
        assert_eq!(score[[2]], 30.0);
        let ArrayValue::Str(label) = columns[3].1.as_ref() else {
            panic!("expected text");
        };
        assert_eq!(label[[1]], "");
    }

    #[test]
    fn test_unsupported_column_between_supported() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "tags",
                DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
                true,
            ),
            Field::new("weight", DataType::Float64, false),
            Field::new("flag", DataType::Boolean, true),
        ]));
        let tags = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![Some(vec![Some(1)]), None]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 2])),
            Arc::new(tags),
            Arc::new(Float64Array::from(vec![0.5, 1.5])),
            Arc::new(BooleanArray::from(vec![Some(true), None])),
        ];
        let batch = RecordBatch::try_new(schema, columns).unwrap();

        let columns = batch_columns(&batch);
        let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["id", "weight", "flag"]);
        assert_eq!(columns[1].1.get_item(&[IndexElem::at(1)]).unwrap().scalar_value(), Some(Value::Float(1.5)));
    }

    #[test]
    fn test_null_booleans_and_text_read_as_defaults() {
        let flags = BooleanArray::from(vec![Some(true), None, Some(false)]);
        let ArrayValue::Bool(flags) = column_to_array(&flags).unwrap() else {
            panic!("expected booleans");
        };
        assert_eq!(flags.iter().copied().collect::<Vec<_>>(), vec![true, false, false]);

        let labels = StringArray::from(vec![Some("a"), None, Some("")]);
        let ArrayValue::Str(labels) = column_to_array(&labels).unwrap() else {
            panic!("expected text");
        };
        assert_eq!(labels.iter().map(String::as_str).collect::<Vec<_>>(), vec!["a", "", ""]);

        let column = ColumnAdapter::new(Arc::new(ArrayValue::Bool(flags)));
        assert_eq!(column.missing_data_value(), None);
    }

    #[test]
    fn test_ipc_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.arrow");
        write_ipc(&path);

        let mut item = create_arrow_file(&path);
        let children = item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap();
        assert_eq!(children.len(), 4);
        assert_eq!(item.attributes().get("num_rows"), Some(&Value::UInt(6)));

        let mut weight = children.into_iter().nth(2).unwrap();
        weight.open(ErrorPolicy::Strict).unwrap();
        assert_eq!(weight.shape().unwrap(), vec![6]);
        assert_eq!(weight.dimension_names(), vec!["index"]);
        assert!(weight.missing_data_value().is_some());
        let tail = weight.get_item(&[IndexElem::at(-1)]).unwrap();
        assert_eq!(tail.scalar_value(), Some(Value::Float(2.5)));
    }

    #[test]
    fn test_parquet_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.parquet");
        write_parquet(&path);

        let mut item = create_parquet_file(&path);
        assert_eq!(item.type_name(), "Parquet file");
        let children = item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap();
        assert_eq!(children[0].node_name(), "id");
        assert_eq!(item.summary(), "3 rows, 4 columns");

        check_adapter_contract(&|| create_parquet_file(&path), Arc::new(Registry::new()));
    }

    #[test]
    fn test_corrupt_file_stores_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.arrow");
        std::fs::write(&path, b"definitely not arrow").unwrap();

        let mut item = create_arrow_file(&path);
        assert!(item.fetch_children(&Registry::new(), ErrorPolicy::Lenient).unwrap().is_empty());
        assert!(matches!(item.last_error(), Some(RtiError::Format(_))));
        assert!(item.fetch_children(&Registry::new(), ErrorPolicy::Lenient).is_err());
    }
}
