//! Parquet encoding/decoding for frames
//!
//! Every column is written as a nullable Arrow field. Decoding accepts the
//! four frame types plus Int32/Float32/LargeUtf8, which are widened.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, StringArray,
};
use arrow::datatypes::{DataType as ArrowType, Field, Schema as ArrowSchema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use super::{Column, DataType, Frame, FrameError, Schema, Value};

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("featurestore".to_string()),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Int64 => ArrowType::Int64,
        DataType::Float64 => ArrowType::Float64,
        DataType::Utf8 => ArrowType::Utf8,
        DataType::Boolean => ArrowType::Boolean,
    }
}

fn frame_type(column: &str, data_type: &ArrowType) -> Result<DataType, FrameError> {
    match data_type {
        ArrowType::Int64 | ArrowType::Int32 => Ok(DataType::Int64),
        ArrowType::Float64 | ArrowType::Float32 => Ok(DataType::Float64),
        ArrowType::Utf8 | ArrowType::LargeUtf8 => Ok(DataType::Utf8),
        ArrowType::Boolean => Ok(DataType::Boolean),
        other => Err(FrameError::UnsupportedType {
            column: column.to_string(),
            data_type: other.to_string(),
        }),
    }
}

fn arrow_schema(schema: &Schema) -> Arc<ArrowSchema> {
    Arc::new(ArrowSchema::new(
        schema
            .columns()
            .iter()
            .map(|c| Field::new(&c.name, arrow_type(c.data_type), true))
            .collect::<Vec<_>>(),
    ))
}

fn build_array(frame: &Frame, idx: usize, data_type: DataType) -> ArrayRef {
    let cells = frame.rows().iter().map(|row| &row[idx]);
    match data_type {
        DataType::Int64 => Arc::new(cells.map(Value::as_i64).collect::<Int64Array>()),
        DataType::Float64 => Arc::new(
            cells
                .map(|v| match v {
                    Value::Float64(f) => Some(*f),
                    _ => None,
                })
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(cells.map(Value::as_str).collect::<StringArray>()),
        DataType::Boolean => Arc::new(
            cells
                .map(|v| match v {
                    Value::Boolean(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
    }
}

/// Encode a frame as a single-row-group Parquet file
pub fn encode_parquet(frame: &Frame) -> Result<Bytes, FrameError> {
    let schema = arrow_schema(frame.schema());
    let columns: Vec<ArrayRef> = frame
        .schema()
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, c)| build_array(frame, idx, c.data_type))
        .collect();
    let options = RecordBatchOptions::new().with_row_count(Some(frame.len()));
    let batch = RecordBatch::try_new_with_options(schema.clone(), columns, &options)
        .map_err(|e| FrameError::Parquet(format!("record batch build failed: {e}")))?;

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties()))
        .map_err(|e| FrameError::Parquet(format!("parquet writer init failed: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| FrameError::Parquet(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| FrameError::Parquet(format!("parquet close failed: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, column: &str) -> Result<&'a T, FrameError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| FrameError::Parquet(format!("column '{column}' has unexpected layout")))
}

fn read_column(array: &ArrayRef, column: &str, out: &mut [Vec<Value>]) -> Result<(), FrameError> {
    macro_rules! fill {
        ($ty:ty, $conv:expr) => {{
            let typed = downcast::<$ty>(array, column)?;
            for (i, row) in out.iter_mut().enumerate() {
                if typed.is_null(i) {
                    row.push(Value::Null);
                } else {
                    row.push($conv(typed.value(i)));
                }
            }
        }};
    }

    match array.data_type() {
        ArrowType::Int64 => fill!(Int64Array, Value::Int64),
        ArrowType::Int32 => fill!(Int32Array, |v: i32| Value::Int64(v as i64)),
        ArrowType::Float64 => fill!(Float64Array, Value::Float64),
        ArrowType::Float32 => fill!(Float32Array, |v: f32| Value::Float64(v as f64)),
        ArrowType::Utf8 => fill!(StringArray, |v: &str| Value::Utf8(v.to_string())),
        ArrowType::LargeUtf8 => fill!(LargeStringArray, |v: &str| Value::Utf8(v.to_string())),
        ArrowType::Boolean => fill!(BooleanArray, Value::Boolean),
        other => {
            return Err(FrameError::UnsupportedType {
                column: column.to_string(),
                data_type: other.to_string(),
            })
        }
    }
    Ok(())
}

/// Decode a Parquet file into a frame
pub fn decode_parquet(bytes: Bytes) -> Result<Frame, FrameError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| FrameError::Parquet(format!("parquet reader init failed: {e}")))?;

    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|f| Ok(Column::new(f.name(), frame_type(f.name(), f.data_type())?)))
        .collect::<Result<Vec<_>, FrameError>>()?;
    let schema = Schema::new(columns)?;

    let reader = builder
        .build()
        .map_err(|e| FrameError::Parquet(format!("parquet reader build failed: {e}")))?;

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| FrameError::Parquet(format!("parquet read batch failed: {e}")))?;
        let mut chunk: Vec<Vec<Value>> = (0..batch.num_rows())
            .map(|_| Vec::with_capacity(schema.len()))
            .collect();
        for (array, column) in batch.columns().iter().zip(schema.columns()) {
            read_column(array, &column.name, &mut chunk)?;
        }
        rows.extend(chunk);
    }

    Frame::from_rows(schema, rows)
}
