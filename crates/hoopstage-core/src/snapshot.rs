// Parquet snapshots of typed tables.
//
// Each column is written with one Arrow type chosen from the cells it holds:
// all-bool columns become Boolean, all-integer Int64, integer/float mixes
// Float64, anything else (including all-unset columns) Utf8. Reading maps
// Parquet fields back onto cell values.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, RecordBatchOptions, StringArray,
};
use arrow_schema::{ArrowError, DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use parquet::errors::ParquetError;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use tracing::debug;

use crate::persist::{write_atomic, PersistError};
use crate::table::{Cell, CellValue, Table, TableError};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to open snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid parquet in {path}: {source}")]
    Parquet { path: PathBuf, source: ParquetError },

    #[error("failed to build record batch for {path}: {source}")]
    Arrow { path: PathBuf, source: ArrowError },

    #[error("snapshot {path} does not form a table: {source}")]
    Shape { path: PathBuf, source: TableError },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
}

impl ColumnKind {
    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Boolean => DataType::Boolean,
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Utf8 => DataType::Utf8,
        }
    }
}

fn column_kind<'a>(cells: impl Iterator<Item = &'a Cell>) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in cells.flatten() {
        let this = match value {
            CellValue::Bool(_) => ColumnKind::Boolean,
            CellValue::Int(_) => ColumnKind::Int64,
            CellValue::Float(_) => ColumnKind::Float64,
            CellValue::Text(_) => return ColumnKind::Utf8,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int64), ColumnKind::Float64)
            | (Some(ColumnKind::Float64), ColumnKind::Int64) => ColumnKind::Float64,
            _ => return ColumnKind::Utf8,
        });
    }
    kind.unwrap_or(ColumnKind::Utf8)
}

fn build_array(table: &Table, col: usize, kind: ColumnKind) -> ArrayRef {
    let cells = table.column_cells(col);
    match kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(
            cells
                .map(|c| c.as_ref().and_then(CellValue::as_bool))
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Int64 => Arc::new(Int64Array::from(
            cells
                .map(|c| match c {
                    Some(CellValue::Int(v)) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Float64 => Arc::new(Float64Array::from(
            cells
                .map(|c| match c {
                    Some(CellValue::Float(v)) => Some(*v),
                    Some(CellValue::Int(v)) => Some(*v as f64),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Utf8 => Arc::new(StringArray::from(
            cells
                .map(|c| c.as_ref().map(ToString::to_string))
                .collect::<Vec<Option<String>>>(),
        )),
    }
}

fn to_record_batch(path: &Path, table: &Table) -> Result<RecordBatch, SnapshotError> {
    let mut fields = Vec::with_capacity(table.width());
    let mut arrays = Vec::with_capacity(table.width());
    for (col, name) in table.columns().iter().enumerate() {
        let kind = column_kind(table.column_cells(col));
        fields.push(ArrowField::new(name, kind.data_type(), true));
        arrays.push(build_array(table, col, kind));
    }
    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(table.len()));
    RecordBatch::try_new_with_options(schema, arrays, &options).map_err(|e| SnapshotError::Arrow {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically write `table` to `path` as Parquet.
pub fn write_snapshot(path: &Path, table: &Table) -> Result<(), SnapshotError> {
    let batch = to_record_batch(path, table)?;
    write_atomic(path, |out| {
        let mut writer = ArrowWriter::try_new(out, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close().map(|_| ())
    })?;
    debug!(
        "wrote {} rows x {} cols to {}",
        table.len(),
        table.width(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn field_to_cell(field: &Field) -> Cell {
    let value = match field {
        Field::Null => return None,
        Field::Bool(b) => CellValue::Bool(*b),
        Field::Byte(v) => CellValue::Int(i64::from(*v)),
        Field::Short(v) => CellValue::Int(i64::from(*v)),
        Field::Int(v) => CellValue::Int(i64::from(*v)),
        Field::Long(v) => CellValue::Int(*v),
        Field::UByte(v) => CellValue::Int(i64::from(*v)),
        Field::UShort(v) => CellValue::Int(i64::from(*v)),
        Field::UInt(v) => CellValue::Int(i64::from(*v)),
        Field::ULong(v) => match i64::try_from(*v) {
            Ok(v) => CellValue::Int(v),
            Err(_) => CellValue::Float(*v as f64),
        },
        Field::Float(v) => CellValue::Float(f64::from(*v)),
        Field::Double(v) => CellValue::Float(*v),
        Field::Str(s) => CellValue::Text(s.clone()),
        other => CellValue::Text(other.to_string()),
    };
    Some(value)
}

/// Read a Parquet snapshot into a table.
pub fn read_snapshot(path: &Path) -> Result<Table, SnapshotError> {
    let parquet_err = |source: ParquetError| SnapshotError::Parquet {
        path: path.to_path_buf(),
        source,
    };
    let shape_err = |source: TableError| SnapshotError::Shape {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|e| SnapshotError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = SerializedFileReader::new(file).map_err(parquet_err)?;
    let columns: Vec<String> = reader
        .metadata()
        .file_metadata()
        .schema()
        .get_fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect();

    let mut table = Table::new(columns).map_err(shape_err)?;
    for row in reader.get_row_iter(None).map_err(parquet_err)? {
        let row = row.map_err(parquet_err)?;
        let cells = row
            .get_column_iter()
            .map(|(_, field)| field_to_cell(field))
            .collect();
        table.push_row(cells).map_err(shape_err)?;
    }
    debug!(
        "read {} rows x {} cols from {}",
        table.len(),
        table.width(),
        path.display()
    );
    Ok(table)
}

/// Like [`read_snapshot`] but `Ok(None)` when the file does not exist.
pub fn read_snapshot_if_exists(path: &Path) -> Result<Option<Table>, SnapshotError> {
    if path.exists() {
        read_snapshot(path).map(Some)
    } else {
        Ok(None)
    }
}
