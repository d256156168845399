//! Tabular frames
//!
//! A [`Frame`] is the unit of tabular data passed between data sources,
//! features and the store: a [`Schema`] of named, typed, nullable columns
//! plus row-major [`Value`]s.

mod parquet;
mod value;

pub use self::parquet::{decode_parquet, encode_parquet};
pub use value::{DataType, Value};

use serde::{Deserialize, Serialize};

/// Errors from frame construction and manipulation
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Row length does not match the schema
    #[error("row {row} has {actual} values, schema has {expected} columns")]
    Arity {
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// Value type does not match the column type
    #[error("row {row}, column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: DataType,
        actual: DataType,
    },

    /// Column not present in the schema
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Column declared twice
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    /// Parquet/Arrow encoding failure
    #[error("parquet error: {0}")]
    Parquet(String),

    /// Arrow type without a frame equivalent
    #[error("unsupported column type for '{column}': {data_type}")]
    UnsupportedType { column: String, data_type: String },
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Create a schema, rejecting duplicate column names
    pub fn new(columns: Vec<Column>) -> Result<Self, FrameError> {
        let mut seen = std::collections::HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(FrameError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Row-major table of values conforming to a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Empty frame with the given schema
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Build a frame, validating arity and value types of every row
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self, FrameError> {
        let mut frame = Self::empty(schema);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Append one row
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), FrameError> {
        let row_index = self.rows.len();
        if row.len() != self.schema.len() {
            return Err(FrameError::Arity {
                row: row_index,
                expected: self.schema.len(),
                actual: row.len(),
            });
        }
        for (value, column) in row.iter().zip(self.schema.columns()) {
            if let Some(actual) = value.data_type() {
                if actual != column.data_type {
                    return Err(FrameError::TypeMismatch {
                        row: row_index,
                        column: column.name.clone(),
                        expected: column.data_type,
                        actual,
                    });
                }
            }
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, in row order
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, FrameError> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Keep rows for which `predicate` holds
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&[Value]) -> bool,
    {
        Self {
            schema: self.schema.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| predicate(row))
                .cloned()
                .collect(),
        }
    }

    /// Keep only the named columns, in the given order
    pub fn select(&self, names: &[&str]) -> Result<Self, FrameError> {
        let mut indices = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let idx = self
                .schema
                .index_of(name)
                .ok_or_else(|| FrameError::ColumnNotFound(name.to_string()))?;
            indices.push(idx);
            columns.push(self.schema.columns()[idx].clone());
        }
        let schema = Schema::new(columns)?;
        let rows = self
            .rows
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Self { schema, rows })
    }

    /// Re-shape rows onto `target` by column name
    ///
    /// Columns missing from this frame become null; columns not in `target`
    /// are dropped. Fails if a shared column changed type.
    pub fn project_onto(&self, target: &Schema) -> Result<Self, FrameError> {
        let mut mapping = Vec::with_capacity(target.len());
        for column in target.columns() {
            match self.schema.index_of(&column.name) {
                Some(idx) => {
                    let source = &self.schema.columns()[idx];
                    if source.data_type != column.data_type {
                        return Err(FrameError::TypeMismatch {
                            row: 0,
                            column: column.name.clone(),
                            expected: column.data_type,
                            actual: source.data_type,
                        });
                    }
                    mapping.push(Some(idx));
                }
                None => mapping.push(None),
            }
        }
        let rows = self
            .rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|m| m.map(|i| row[i].clone()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(Self {
            schema: target.clone(),
            rows,
        })
    }

    /// Append all rows of `other`, projected onto this frame's schema
    pub fn extend(&mut self, other: &Frame) -> Result<(), FrameError> {
        let projected = other.project_onto(&self.schema)?;
        self.rows.extend(projected.rows);
        Ok(())
    }

    /// Concatenate frames onto a common schema
    pub fn concat(schema: Schema, frames: &[Frame]) -> Result<Self, FrameError> {
        let mut out = Self::empty(schema);
        for frame in frames {
            out.extend(frame)?;
        }
        Ok(out)
    }
}
