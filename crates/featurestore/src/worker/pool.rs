//! Worker pool for unit execution
//!
//! Pulls units from the job queue and runs them on a bounded number of tasks.
//! Cancellation is checked between units; a unit already received always runs
//! to completion and reports.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::Worker;
use crate::config::WorkerConfig;
use crate::transport::JobQueue;

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Pool is running and accepting units
    Running,
    /// Pool is draining (completing current units, not receiving new ones)
    Draining,
    /// Pool has stopped
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Pool already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// Shutdown timeout
    #[error("graceful shutdown timed out with {remaining} units running")]
    ShutdownTimeout { remaining: usize },
}

/// Pool of concurrent unit executions
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::new(worker, queue, WorkerConfig::default().with_concurrency(8));
/// pool.start()?;
/// // ... later, graceful shutdown
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    worker: Arc<Worker>,
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
    cancel: Mutex<CancellationToken>,
    status: RwLock<WorkerPoolStatus>,
    active_tasks: Arc<Semaphore>,
    tracker: TaskTracker,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(worker: Arc<Worker>, queue: Arc<dyn JobQueue>, config: WorkerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            worker,
            queue,
            config: config.with_concurrency(concurrency),
            cancel: Mutex::new(CancellationToken::new()),
            status: RwLock::new(WorkerPoolStatus::Stopped),
            active_tasks: Arc::new(Semaphore::new(concurrency)),
            tracker: TaskTracker::new(),
            poll_handle: Mutex::new(None),
        }
    }

    /// Start receiving units
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }

        info!(concurrency = self.config.concurrency, "Starting worker pool");

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.tracker.reopen();

        let worker = Arc::clone(&self.worker);
        let queue = Arc::clone(&self.queue);
        let active_tasks = Arc::clone(&self.active_tasks);
        let tracker = self.tracker.clone();

        let handle = tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = Arc::clone(&active_tasks).acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    break;
                };

                let unit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    unit = queue.receive() => unit,
                };
                let Some(unit) = unit else {
                    debug!("Queue closed, poll loop exiting");
                    break;
                };

                let worker = Arc::clone(&worker);
                tracker.spawn(async move {
                    worker.execute(unit).await;
                    drop(permit);
                });
            }
            debug!("Poll loop stopped");
        });
        *self.poll_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop receiving units and wait for running ones to report
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status == WorkerPoolStatus::Stopped {
                return Ok(());
            }
            *status = WorkerPoolStatus::Draining;
        }

        info!("Initiating graceful shutdown");
        self.cancel.lock().cancel();

        let poll_handle = self.poll_handle.lock().take();
        if let Some(handle) = poll_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Poll loop ended abnormally");
            }
        }

        self.tracker.close();
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active_tasks.available_permits();
            if available == self.config.concurrency {
                debug!("All units completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                let remaining = self.config.concurrency - available;
                warn!(remaining, "Shutdown timeout reached");
                *self.status.write() = WorkerPoolStatus::Stopped;
                return Err(WorkerPoolError::ShutdownTimeout { remaining });
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.tracker.wait().await;

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!("Worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    /// Units currently executing
    pub fn current_load(&self) -> usize {
        self.config.concurrency - self.active_tasks.available_permits()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_id", &self.config.worker_id)
            .field("status", &self.status())
            .field("current_load", &self.current_load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetCatalog, InMemoryCatalog, NewFeature};
    use crate::coordinator::{
        AfterBatchHook, BatchCoordinator, BatchId, BatchUnit, CompletedBatch,
        InMemoryBatchArgsStore,
    };
    use crate::datasource::{DataSourceRegistry, InMemoryDataSource, KeySelection};
    use crate::feature::{
        Feature, FeatureDescriptor, FeatureError, FeatureRegistry, FitContext, WorkflowStatus,
    };
    use crate::frame::{Column, DataType, Frame, Schema, Value};
    use crate::store::{FeatureLocation, FeatureStoreRoot};
    use crate::transport::InMemoryJobQueue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Slow {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Feature for Slow {
        fn computes_columns(&self) -> Vec<Column> {
            vec![]
        }

        async fn fit(
            &self,
            slice: Frame,
            _descriptor: &FeatureDescriptor,
            _context: &FitContext,
        ) -> Result<Frame, FeatureError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(slice.select(&["id"])?)
        }
    }

    #[derive(Default)]
    struct Drained(AtomicUsize);

    #[async_trait]
    impl AfterBatchHook for Drained {
        async fn after_batch(&self, _batch: CompletedBatch) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_pool_bounds_concurrency_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        let ds = catalog.create_dataset("d").await.unwrap();
        let f = catalog
            .create_feature(NewFeature::new(ds.id, "slow", "slow", 0).with_primary_key("id"))
            .await
            .unwrap();
        catalog
            .mark_feature_status(f.id, WorkflowStatus::Fitting)
            .await
            .unwrap();

        let feature = Arc::new(Slow {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut registry = FeatureRegistry::new();
        registry.register_instance("slow", feature.clone()).unwrap();

        let schema = Schema::new(vec![Column::new("id", DataType::Int64)]).unwrap();
        let rows = (0..8).map(|i| vec![Value::Int64(i)]).collect();
        let sources = DataSourceRegistry::new();
        sources.register(
            ds.id,
            Arc::new(InMemoryDataSource::new(Frame::from_rows(schema, rows).unwrap())),
        );

        let queue = Arc::new(InMemoryJobQueue::new());
        let coordinator = Arc::new(BatchCoordinator::new(
            queue.clone(),
            Arc::new(InMemoryBatchArgsStore::new()),
            catalog.clone(),
        ));
        let worker = Arc::new(Worker::new(
            "w",
            Arc::new(registry),
            sources,
            FeatureStoreRoot::new(dir.path()),
            coordinator.clone(),
        ));
        let pool = WorkerPool::new(worker, queue.clone(), WorkerConfig::default().with_concurrency(2));

        let batch_id = BatchId::generate("slow");
        let units = (0..8)
            .map(|i| BatchUnit {
                dataset_id: ds.id,
                feature_id: f.id,
                feature_name: "slow".into(),
                feature_key: "slow".into(),
                position: 0,
                batch_id: batch_id.clone(),
                unit_number: i,
                selection: KeySelection::Keys {
                    column: "id".into(),
                    keys: vec![i as i64],
                },
                store: FeatureLocation::new("d", "slow", "v1").with_primary_key("id"),
                dependencies: vec![],
            })
            .collect();
        let hook = Arc::new(Drained::default());
        coordinator
            .enqueue_batch(batch_id, units, hook.clone())
            .await
            .unwrap();

        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkerPoolError::AlreadyRunning)));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while hook.0.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown().await.unwrap();
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert!(feature.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
        assert_eq!(pool.current_load(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_when_stopped_is_noop() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let coordinator = Arc::new(BatchCoordinator::new(
            queue.clone(),
            Arc::new(InMemoryBatchArgsStore::new()),
            catalog,
        ));
        let worker = Arc::new(Worker::new(
            "w",
            Arc::new(FeatureRegistry::new()),
            DataSourceRegistry::new(),
            FeatureStoreRoot::new("/nonexistent"),
            coordinator,
        ));
        let pool = WorkerPool::new(worker, queue, WorkerConfig::default());
        pool.shutdown().await.unwrap();

        pool.start().unwrap();
        pool.shutdown().await.unwrap();
        pool.start().unwrap();
        pool.shutdown().await.unwrap();
        assert_eq!(pool.status(), WorkerPoolStatus::Stopped);
    }
}
