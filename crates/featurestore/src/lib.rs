//! # Feature Pipeline & Partitioned Feature Store
//!
//! Computes derived feature columns for tabular datasets and persists them so
//! they can be joined back onto raw data, repeatedly and incrementally.
//!
//! ## Features
//!
//! - **Position-ordered scheduling**: a feature's batch is dispatched only after
//!   every earlier feature has drained successfully
//! - **Batch coordination**: one-shot after-batch hooks, de-duplicated reports
//!   under at-least-once delivery, persisted unit arguments
//! - **Worker pool**: bounded concurrency, panics and errors turned into
//!   recorded failures, cancellation between units
//! - **Partitioned store**: Parquet files per primary-key range, merge-by-key
//!   upsert under per-partition locks, range-pruned reads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                             │
//! │  (orders features by position, builds units, waits on drain) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ enqueue_batch       ▲ after_batch
//!                              ▼                     │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BatchCoordinator                          │
//! │  (argument store, remaining units, failure → catalog, halt)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ JobQueue            ▲ report
//!                              ▼                     │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkerPool / Worker                        │
//! │  (load slice, fit, validate, upsert)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PartitionedStore                          │
//! │  (<root>/<dataset>/features/<feature>/<version>/partitionN)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use featurestore::prelude::*;
//!
//! #[derive(Default)]
//! struct PriceRatio;
//!
//! #[async_trait]
//! impl Feature for PriceRatio {
//!     fn computes_columns(&self) -> Vec<Column> {
//!         vec![Column::new("price_ratio", DataType::Float64)]
//!     }
//!
//!     async fn fit(&self, slice: Frame, d: &FeatureDescriptor, _: &FitContext)
//!         -> Result<Frame, FeatureError> { /* ... */ }
//! }
//!
//! impl FeatureDefinition for PriceRatio {
//!     const KEY: &'static str = "price_ratio";
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod datasource;
pub mod feature;
pub mod frame;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::catalog::{
        DatasetCatalog, DatasetRecord, ErrorKind, ErrorRecord, FeatureRecord, FileCatalog,
        InMemoryCatalog, NewFeature,
    };
    pub use crate::config::{FeatureStoreConfig, WorkerConfig};
    pub use crate::datasource::{DataSource, DataSourceRegistry, InMemoryDataSource, KeySelection};
    pub use crate::feature::{
        Feature, FeatureDefinition, FeatureDescriptor, FeatureError, FeatureRegistry, FitContext,
        KeyGroup, WorkflowStatus,
    };
    pub use crate::frame::{Column, DataType, Frame, Schema, Value};
    pub use crate::pipeline::{FeaturePipeline, PipelineError, Transformed};
    pub use crate::scheduler::{RunHandle, RunPhase};
    pub use crate::store::{FeatureLocation, FeatureStoreRoot, KeyPredicate, PartitionedStore};
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use catalog::{CatalogError, DatasetCatalog, FileCatalog, InMemoryCatalog};
pub use config::{ConfigError, FeatureStoreConfig, WorkerConfig};
pub use coordinator::{
    AfterBatchHook, BatchArgsStore, BatchCoordinator, BatchId, BatchUnit, CoordinatorError,
    FileBatchArgsStore, InMemoryBatchArgsStore,
};
pub use datasource::{DataSource, DataSourceError, DataSourceRegistry, InMemoryDataSource};
pub use feature::{Feature, FeatureDefinition, FeatureError, FeatureRegistry, WorkflowStatus};
pub use frame::{Frame, FrameError, Schema, Value};
pub use pipeline::{FeaturePipeline, FeaturePipelineBuilder, PipelineError, Transformed};
pub use scheduler::{RunHandle, RunPhase, Scheduler, SchedulerError};
pub use store::{FeatureLocation, FeatureStoreRoot, KeyPredicate, PartitionedStore, StoreError};
pub use transport::{InMemoryJobQueue, JobQueue, QueueError};
pub use worker::{Worker, WorkerPool, WorkerPoolError};
