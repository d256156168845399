//! Dataset catalog
//!
//! Records of datasets and their features, their workflow status, and the
//! error events recorded when units fail.

mod file;
mod memory;
mod state;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use file::{FileCatalog, CATALOG_FILE};
pub use memory::InMemoryCatalog;

use crate::feature::WorkflowStatus;
use crate::frame::Frame;

/// Error type for catalog operations
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(Uuid),

    #[error("feature not found: {0}")]
    FeatureNotFound(Uuid),

    /// Feature name already used within the dataset
    #[error("feature '{name}' already exists in dataset {dataset_id}")]
    DuplicateFeature { dataset_id: Uuid, name: String },

    /// Status mark not allowed from the current state
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A dataset whose features are computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    /// Set when every feature of a run became ready
    pub fit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named, versioned feature of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub name: String,
    /// Registry key of the implementation
    pub feature_key: String,
    pub version: String,
    pub position: i32,
    pub primary_key: Option<String>,
    pub batch_size: Option<u64>,
    pub status: WorkflowStatus,
    pub needs_fit: bool,
    pub fit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureRecord {
    /// Partition size of the feature's store
    pub fn partition_size(&self, default: u64) -> u64 {
        self.batch_size.unwrap_or(default).max(1)
    }

    /// Whether the next run has to compute this feature
    pub fn needs_recompute(&self) -> bool {
        self.needs_fit || self.status != WorkflowStatus::Ready
    }
}

/// Parameters for [`DatasetCatalog::create_feature`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFeature {
    pub dataset_id: Uuid,
    pub name: String,
    pub feature_key: String,
    pub version: String,
    pub position: i32,
    pub primary_key: Option<String>,
    pub batch_size: Option<u64>,
}

impl NewFeature {
    pub fn new(
        dataset_id: Uuid,
        name: impl Into<String>,
        feature_key: impl Into<String>,
        position: i32,
    ) -> Self {
        Self {
            dataset_id,
            name: name.into(),
            feature_key: feature_key.into(),
            version: "v1".to_string(),
            position,
            primary_key: None,
            batch_size: None,
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Classification of a unit failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Output did not match the declared columns
    Validation,
    /// Error or panic while loading or computing
    Computation,
    /// A partition file could not be read or written
    StoreIo,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Computation => write!(f, "computation"),
            Self::StoreIo => write!(f, "store_io"),
        }
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub feature_id: Option<Uuid>,
    pub batch_id: Option<String>,
    pub unit_number: Option<u32>,
    pub kind: ErrorKind,
    pub message: String,
    /// Error chain or panic payload, outermost first
    pub trace: Vec<String>,
    /// The data the unit was working on when it failed
    pub slice: Option<Frame>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(dataset_id: Uuid, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            dataset_id,
            feature_id: None,
            batch_id: None,
            unit_number: None,
            kind,
            message: message.into(),
            trace: Vec::new(),
            slice: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_feature(mut self, feature_id: Uuid) -> Self {
        self.feature_id = Some(feature_id);
        self
    }

    pub fn with_unit(mut self, batch_id: impl Into<String>, unit_number: u32) -> Self {
        self.batch_id = Some(batch_id.into());
        self.unit_number = Some(unit_number);
        self
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_slice(mut self, slice: Option<Frame>) -> Self {
        self.slice = slice;
        self
    }
}

/// Dataset collaborator used by the scheduler, coordinator and workers
#[async_trait]
pub trait DatasetCatalog: Send + Sync + 'static {
    async fn create_dataset(&self, name: &str) -> Result<DatasetRecord, CatalogError>;

    async fn create_feature(&self, feature: NewFeature) -> Result<FeatureRecord, CatalogError>;

    async fn dataset(&self, dataset_id: Uuid) -> Result<DatasetRecord, CatalogError>;

    /// Look a dataset up by name
    async fn find_dataset(&self, name: &str) -> Result<Option<DatasetRecord>, CatalogError>;

    async fn feature(&self, feature_id: Uuid) -> Result<FeatureRecord, CatalogError>;

    /// Features of a dataset ordered by position, then name
    async fn features(&self, dataset_id: Uuid) -> Result<Vec<FeatureRecord>, CatalogError>;

    /// Features that are not ready or are flagged for refit, in run order
    async fn features_needing_recompute(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<FeatureRecord>, CatalogError>;

    /// Mark the dataset's workflow status
    async fn mark_workflow_status(
        &self,
        dataset_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError>;

    /// Mark a feature's workflow status
    ///
    /// Marking `ready` clears `needs_fit` and stamps `fit_at`.
    async fn mark_feature_status(
        &self,
        feature_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError>;

    /// Called once when every feature of a run is ready
    async fn after_all_features_fit(&self, dataset_id: Uuid) -> Result<(), CatalogError>;

    async fn record_error(&self, error: ErrorRecord) -> Result<(), CatalogError>;

    /// Error records of a dataset, oldest first
    async fn errors(&self, dataset_id: Uuid) -> Result<Vec<ErrorRecord>, CatalogError>;

    /// Move a feature back to `pending` and flag it for refit
    async fn reset_feature(&self, feature_id: Uuid) -> Result<(), CatalogError>;

    /// Move a dataset and its failed features back to `pending`
    async fn reset_dataset(&self, dataset_id: Uuid) -> Result<(), CatalogError>;
}
