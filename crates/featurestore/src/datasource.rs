//! Raw data access for feature computation

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::{Frame, FrameError};

/// Error type for data source operations
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// No source registered for the dataset
    #[error("no data source registered for dataset {0}")]
    NotRegistered(Uuid),

    /// Selection refers to a column the source does not have
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Backend failure
    #[error("data source error: {0}")]
    Backend(String),
}

/// Rows a unit of work operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeySelection {
    /// The whole dataset
    All,
    /// `start <= column <= end`
    Range { column: String, start: i64, end: i64 },
    /// `column in keys`
    Keys { column: String, keys: Vec<i64> },
}

impl KeySelection {
    /// Whether a row with this (cast) key is selected
    pub fn matches(&self, key: Option<i64>) -> bool {
        match (self, key) {
            (Self::All, _) => true,
            (_, None) => false,
            (Self::Range { start, end, .. }, Some(k)) => k >= *start && k <= *end,
            (Self::Keys { keys, .. }, Some(k)) => keys.contains(&k),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Range { column, .. } | Self::Keys { column, .. } => Some(column),
        }
    }
}

/// Read access to a dataset's raw rows
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Load the rows selected by `selection`
    async fn load(&self, selection: &KeySelection) -> Result<Frame, DataSourceError>;

    /// Sorted distinct castable keys of `column`
    async fn distinct_keys(&self, column: &str) -> Result<Vec<i64>, DataSourceError>;
}

/// Data source backed by an in-memory frame
#[derive(Debug, Clone)]
pub struct InMemoryDataSource {
    frame: Frame,
}

impl InMemoryDataSource {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn load(&self, selection: &KeySelection) -> Result<Frame, DataSourceError> {
        let Some(column) = selection.column() else {
            return Ok(self.frame.clone());
        };
        let idx = self
            .frame
            .schema()
            .index_of(column)
            .ok_or_else(|| DataSourceError::ColumnNotFound(column.to_string()))?;
        Ok(self.frame.filter(|row| selection.matches(row[idx].as_key())))
    }

    async fn distinct_keys(&self, column: &str) -> Result<Vec<i64>, DataSourceError> {
        let keys: BTreeSet<i64> = self
            .frame
            .column_values(column)
            .map_err(|_| DataSourceError::ColumnNotFound(column.to_string()))?
            .into_iter()
            .filter_map(|v| v.as_key())
            .collect();
        Ok(keys.into_iter().collect())
    }
}

/// Data sources keyed by dataset id
#[derive(Default, Clone)]
pub struct DataSourceRegistry {
    sources: Arc<DashMap<Uuid, Arc<dyn DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dataset_id: Uuid, source: Arc<dyn DataSource>) {
        self.sources.insert(dataset_id, source);
    }

    pub fn get(&self, dataset_id: Uuid) -> Result<Arc<dyn DataSource>, DataSourceError> {
        self.sources
            .get(&dataset_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(DataSourceError::NotRegistered(dataset_id))
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("datasets", &self.sources.len())
            .finish()
    }
}
