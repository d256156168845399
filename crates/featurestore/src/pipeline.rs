//! Process-level wiring of the pipeline
//!
//! [`FeaturePipeline`] owns one scheduler, coordinator and worker pool over a
//! shared catalog and store root, and applies computed features back onto
//! raw frames.

use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::catalog::{CatalogError, DatasetCatalog, FeatureRecord, InMemoryCatalog};
use crate::config::FeatureStoreConfig;
use crate::coordinator::{BatchArgsStore, BatchCoordinator, FileBatchArgsStore};
use crate::datasource::DataSourceRegistry;
use crate::feature::{FeatureError, FeatureRegistry, RegistryError, WorkflowStatus};
use crate::frame::Frame;
use crate::scheduler::{plan, RunHandle, Scheduler, SchedulerError};
use crate::store::{FeatureStoreRoot, KeyCoverage, PartitionedStore};
use crate::transport::{InMemoryJobQueue, JobQueue};
use crate::worker::{Worker, WorkerPool, WorkerPoolError};

/// Error type for pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),
}

/// Frame with every ready feature applied
#[derive(Debug, Clone)]
pub struct Transformed {
    pub frame: Frame,
    /// Key coverage per applied feature, in run order
    pub coverage: Vec<(String, KeyCoverage)>,
}

/// Builder for [`FeaturePipeline`]
///
/// Collaborators not provided default to an in-memory catalog, an in-process
/// queue and batch arguments under `<root>/_batches`.
pub struct FeaturePipelineBuilder {
    config: FeatureStoreConfig,
    catalog: Option<Arc<dyn DatasetCatalog>>,
    queue: Option<Arc<dyn JobQueue>>,
    args: Option<Arc<dyn BatchArgsStore>>,
    registry: FeatureRegistry,
    sources: DataSourceRegistry,
}

impl FeaturePipelineBuilder {
    pub fn catalog(mut self, catalog: Arc<dyn DatasetCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn batch_args(mut self, args: Arc<dyn BatchArgsStore>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn registry(mut self, registry: FeatureRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn sources(mut self, sources: DataSourceRegistry) -> Self {
        self.sources = sources;
        self
    }

    pub fn build(self) -> FeaturePipeline {
        let config = self.config;
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(InMemoryCatalog::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::new()));
        let args = self
            .args
            .unwrap_or_else(|| Arc::new(FileBatchArgsStore::new(&config.root_dir)));
        let registry = Arc::new(self.registry);
        let stores = FeatureStoreRoot::new(&config.root_dir);

        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::clone(&queue),
            args,
            Arc::clone(&catalog),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            self.sources.clone(),
            Arc::clone(&coordinator),
            config.default_partition_size,
        );
        let worker = Arc::new(Worker::new(
            config.worker.worker_id.clone(),
            Arc::clone(&registry),
            self.sources.clone(),
            stores.clone(),
            Arc::clone(&coordinator),
        ));
        let pool = WorkerPool::new(worker, Arc::clone(&queue), config.worker.clone());

        FeaturePipeline {
            config,
            catalog,
            registry,
            sources: self.sources,
            stores,
            queue,
            coordinator,
            scheduler,
            pool,
        }
    }
}

/// Scheduler, coordinator and worker pool for one process
///
/// # Example
///
/// ```ignore
/// let mut registry = FeatureRegistry::new();
/// registry.register::<PriceRatio>()?;
///
/// let pipeline = FeaturePipeline::builder(FeatureStoreConfig::from_env()?)
///     .registry(registry)
///     .build();
/// pipeline.sources().register(dataset_id, Arc::new(source));
/// pipeline.start_workers()?;
///
/// let phase = pipeline.run(dataset_id).await?.wait().await;
/// let applied = pipeline.transform(dataset_id, raw).await?;
/// pipeline.shutdown().await?;
/// ```
pub struct FeaturePipeline {
    config: FeatureStoreConfig,
    catalog: Arc<dyn DatasetCatalog>,
    registry: Arc<FeatureRegistry>,
    sources: DataSourceRegistry,
    stores: FeatureStoreRoot,
    queue: Arc<dyn JobQueue>,
    coordinator: Arc<BatchCoordinator>,
    scheduler: Arc<Scheduler>,
    pool: WorkerPool,
}

impl FeaturePipeline {
    pub fn builder(config: FeatureStoreConfig) -> FeaturePipelineBuilder {
        FeaturePipelineBuilder {
            config,
            catalog: None,
            queue: None,
            args: None,
            registry: FeatureRegistry::new(),
            sources: DataSourceRegistry::new(),
        }
    }

    pub fn config(&self) -> &FeatureStoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn DatasetCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn sources(&self) -> &DataSourceRegistry {
        &self.sources
    }

    pub fn stores(&self) -> &FeatureStoreRoot {
        &self.stores
    }

    pub fn coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Start consuming units
    pub fn start_workers(&self) -> Result<(), PipelineError> {
        Ok(self.pool.start()?)
    }

    /// Compute the features of a dataset that need it
    pub async fn run(&self, dataset_id: Uuid) -> Result<RunHandle, PipelineError> {
        Ok(self.scheduler.run(dataset_id).await?)
    }

    pub async fn abort(&self, dataset_id: Uuid) -> Result<(), PipelineError> {
        Ok(self.scheduler.abort(dataset_id).await?)
    }

    /// Store handle of a feature's current version
    pub async fn store(&self, feature_id: Uuid) -> Result<PartitionedStore, PipelineError> {
        let feature = self.catalog.feature(feature_id).await?;
        let dataset = self.catalog.dataset(feature.dataset_id).await?;
        Ok(self.open(&dataset.name, &feature))
    }

    fn open(&self, dataset: &str, feature: &FeatureRecord) -> PartitionedStore {
        self.stores.open(plan::location(
            dataset,
            feature,
            self.config.default_partition_size,
        ))
    }

    /// Apply every ready feature of the dataset to `frame`, in run order
    #[instrument(skip(self, frame), fields(rows = frame.len()))]
    pub async fn transform(
        &self,
        dataset_id: Uuid,
        frame: Frame,
    ) -> Result<Transformed, PipelineError> {
        let dataset = self.catalog.dataset(dataset_id).await?;
        let mut frame = frame;
        let mut coverage = Vec::new();

        for feature in self.catalog.features(dataset_id).await? {
            if feature.status != WorkflowStatus::Ready {
                debug!(feature = %feature.name, status = %feature.status, "Skipping feature");
                continue;
            }
            let implementation = self.registry.get(&feature.feature_key)?;
            let descriptor =
                plan::descriptor(&dataset.name, &feature, self.config.default_partition_size);
            let store = self.open(&dataset.name, &feature);

            let applied = implementation.transform(frame, &descriptor, &store).await?;
            debug!(
                feature = %feature.name,
                passed_through = applied.passed_through,
                "Applied feature"
            );
            frame = applied.frame;
            coverage.push((feature.name.clone(), applied.coverage));
        }

        Ok(Transformed { frame, coverage })
    }

    /// Close the queue and wait for running units
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        info!("Shutting down pipeline");
        self.queue.close();
        Ok(self.pool.shutdown().await?)
    }
}

impl std::fmt::Debug for FeaturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeaturePipeline")
            .field("root_dir", &self.config.root_dir)
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish()
    }
}
