//! Position-ordered scheduling of feature batches
//!
//! The scheduler never polls. It dispatches one feature's batch and is woken
//! by the coordinator when that batch drains:
//!
//! ```text
//!   run(dataset) ──► dispatch_next ──► enqueue_batch(feature p)
//!                         ▲                    │
//!                         │            units run on workers
//!                         │                    │
//!                         └── after_batch ◄────┘
//!                              succeeded: feature p ready, continue
//!                              failed:    stop, dataset stays failed
//! ```
//!
//! Features sharing a position run one after another in name order.

pub(crate) mod plan;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::{CatalogError, DatasetCatalog, ErrorKind, ErrorRecord, FeatureRecord};
use crate::coordinator::{
    AfterBatchHook, BatchCoordinator, BatchId, BatchUnit, CompletedBatch, CoordinatorError,
    UnitFailure,
};
use crate::datasource::{DataSourceError, DataSourceRegistry};
use crate::feature::{FeatureError, FeatureRegistry, RegistryError, WorkflowStatus};

/// Error type for scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed datasets must be reset before another run
    #[error("dataset {0} is failed, reset it before running")]
    DatasetFailed(Uuid),

    #[error("dataset {0} already has an active run")]
    AlreadyRunning(Uuid),

    /// Declared dependency cannot be used
    #[error("feature '{feature}' depends on '{dependency}': {reason}")]
    Dependency {
        feature: String,
        dependency: String,
        reason: String,
    },

    /// The scheduler was dropped while a run was active
    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Source(#[from] DataSourceError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl SchedulerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Feature(FeatureError::Validation(_)) => ErrorKind::Validation,
            Self::Feature(FeatureError::Store(_)) => ErrorKind::StoreIo,
            _ => ErrorKind::Computation,
        }
    }
}

/// Progress of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Running,
    /// Every feature is ready
    Completed,
    /// Dispatch stopped, the dataset is failed
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Observer of one run
#[derive(Debug, Clone)]
pub struct RunHandle {
    dataset_id: Uuid,
    phase: watch::Receiver<RunPhase>,
}

impl RunHandle {
    pub fn dataset_id(&self) -> Uuid {
        self.dataset_id
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Wait until the run completes or fails
    pub async fn wait(&mut self) -> RunPhase {
        let reached = match self.phase.wait_for(|p| p.is_terminal()).await {
            Ok(phase) => Some(*phase),
            Err(_) => None,
        };
        // sender dropped: report the last phase it published
        reached.unwrap_or_else(|| *self.phase.borrow())
    }
}

struct RunState {
    dataset: String,
    pending: VecDeque<FeatureRecord>,
    features: Vec<FeatureRecord>,
    current: Option<FeatureRecord>,
    phase: watch::Sender<RunPhase>,
}

enum Dispatch {
    Enqueued,
    NoUnits,
}

/// Orders features by position and dispatches one batch at a time
pub struct Scheduler {
    catalog: Arc<dyn DatasetCatalog>,
    registry: Arc<FeatureRegistry>,
    sources: DataSourceRegistry,
    coordinator: Arc<BatchCoordinator>,
    default_partition_size: u64,
    runs: Mutex<HashMap<Uuid, RunState>>,
    me: Weak<Scheduler>,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        registry: Arc<FeatureRegistry>,
        sources: DataSourceRegistry,
        coordinator: Arc<BatchCoordinator>,
        default_partition_size: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            catalog,
            registry,
            sources,
            coordinator,
            default_partition_size: default_partition_size.max(1),
            runs: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    /// Start computing the features of a dataset that need it
    #[instrument(skip(self))]
    pub async fn run(&self, dataset_id: Uuid) -> Result<RunHandle, SchedulerError> {
        let dataset = self.catalog.dataset(dataset_id).await?;
        if dataset.status.is_failed() {
            return Err(SchedulerError::DatasetFailed(dataset_id));
        }

        let (tx, rx) = watch::channel(RunPhase::Running);
        {
            let mut runs = self.runs.lock();
            if runs.contains_key(&dataset_id) {
                return Err(SchedulerError::AlreadyRunning(dataset_id));
            }
            runs.insert(
                dataset_id,
                RunState {
                    dataset: dataset.name.clone(),
                    pending: VecDeque::new(),
                    features: Vec::new(),
                    current: None,
                    phase: tx,
                },
            );
        }
        let handle = RunHandle {
            dataset_id,
            phase: rx,
        };

        if let Err(e) = self.prepare(dataset_id).await {
            self.runs.lock().remove(&dataset_id);
            return Err(e);
        }

        self.dispatch_next(dataset_id).await;
        Ok(handle)
    }

    async fn prepare(&self, dataset_id: Uuid) -> Result<(), SchedulerError> {
        let pending = self.catalog.features_needing_recompute(dataset_id).await?;
        let features = self.catalog.features(dataset_id).await?;
        self.coordinator.resume(dataset_id);
        self.catalog
            .mark_workflow_status(dataset_id, WorkflowStatus::Fitting)
            .await?;

        info!(
            %dataset_id,
            features = features.len(),
            needing_recompute = pending.len(),
            "Run started"
        );
        if let Some(state) = self.runs.lock().get_mut(&dataset_id) {
            state.pending = pending.into();
            state.features = features;
        }
        Ok(())
    }

    /// Stop a run: the dataset becomes failed and later positions are refused
    ///
    /// Units already handed to workers finish.
    #[instrument(skip(self))]
    pub async fn abort(&self, dataset_id: Uuid) -> Result<(), SchedulerError> {
        let position = self
            .runs
            .lock()
            .get(&dataset_id)
            .and_then(|s| s.current.as_ref().map(|f| f.position))
            .unwrap_or(i32::MIN);
        self.coordinator.halt(dataset_id, position);
        self.catalog
            .mark_workflow_status(dataset_id, WorkflowStatus::Failed)
            .await?;
        warn!(%dataset_id, position, "Run aborted");
        self.finish(dataset_id, RunPhase::Failed);
        Ok(())
    }

    /// Phase of the dataset's active run
    pub fn phase(&self, dataset_id: Uuid) -> Option<RunPhase> {
        self.runs.lock().get(&dataset_id).map(|s| *s.phase.borrow())
    }

    pub fn is_running(&self, dataset_id: Uuid) -> bool {
        self.runs.lock().contains_key(&dataset_id)
    }

    async fn dispatch_next(&self, dataset_id: Uuid) {
        loop {
            let (dataset, next, features) = {
                let mut runs = self.runs.lock();
                let Some(state) = runs.get_mut(&dataset_id) else {
                    return;
                };
                let next = state.pending.pop_front();
                state.current = next.clone();
                (state.dataset.clone(), next, state.features.clone())
            };

            let Some(feature) = next else {
                self.complete(dataset_id).await;
                return;
            };

            match self.upstream_failed(&feature).await {
                Ok(false) => {}
                Ok(true) => {
                    warn!(feature = %feature.name, "Upstream feature failed, stopping dispatch");
                    if let Err(e) = self
                        .catalog
                        .mark_workflow_status(dataset_id, WorkflowStatus::Failed)
                        .await
                    {
                        error!(error = %e, "Failed to mark dataset failed");
                    }
                    self.coordinator.halt(dataset_id, feature.position);
                    self.finish(dataset_id, RunPhase::Failed);
                    return;
                }
                Err(e) => {
                    self.fail_feature(&feature, e).await;
                    return;
                }
            }

            match self.dispatch_feature(&dataset, &feature, &features).await {
                Ok(Dispatch::Enqueued) => return,
                Ok(Dispatch::NoUnits) => {
                    debug!(feature = %feature.name, "No key groups, feature ready");
                    if let Err(e) = self
                        .catalog
                        .mark_feature_status(feature.id, WorkflowStatus::Ready)
                        .await
                    {
                        self.fail_feature(&feature, e.into()).await;
                        return;
                    }
                }
                Err(SchedulerError::Coordinator(CoordinatorError::Halted { .. })) => {
                    debug!(feature = %feature.name, "Dataset halted, dispatch stopped");
                    self.finish(dataset_id, RunPhase::Failed);
                    return;
                }
                Err(e) => {
                    self.fail_feature(&feature, e).await;
                    return;
                }
            }
        }
    }

    async fn upstream_failed(&self, feature: &FeatureRecord) -> Result<bool, SchedulerError> {
        Ok(self
            .catalog
            .features(feature.dataset_id)
            .await?
            .iter()
            .any(|f| f.position <= feature.position && f.status.is_failed()))
    }

    #[instrument(skip(self, dataset, features), fields(feature = %feature.name, position = feature.position))]
    async fn dispatch_feature(
        &self,
        dataset: &str,
        feature: &FeatureRecord,
        features: &[FeatureRecord],
    ) -> Result<Dispatch, SchedulerError> {
        let implementation = self.registry.get(&feature.feature_key)?;
        let dependencies = plan::resolve_dependencies(
            dataset,
            feature,
            &implementation.dependencies(),
            features,
            self.default_partition_size,
        )?;
        let store = plan::location(dataset, feature, self.default_partition_size);
        let descriptor = plan::descriptor(dataset, feature, self.default_partition_size);

        self.catalog
            .mark_feature_status(feature.id, WorkflowStatus::Fitting)
            .await?;

        let selections =
            plan::selections(implementation.as_ref(), &self.sources, &descriptor).await?;
        if selections.is_empty() {
            return Ok(Dispatch::NoUnits);
        }

        let batch_id = BatchId::generate(&feature.name);
        let units = plan::units(feature, &batch_id, selections, &store, &dependencies);
        let hook: Arc<dyn AfterBatchHook> =
            self.me.upgrade().ok_or(SchedulerError::ShuttingDown)?;

        info!(%batch_id, units = units.len(), "Dispatching feature");
        self.coordinator.enqueue_batch(batch_id, units, hook).await?;
        Ok(Dispatch::Enqueued)
    }

    async fn complete(&self, dataset_id: Uuid) {
        let result = async {
            self.catalog
                .mark_workflow_status(dataset_id, WorkflowStatus::Ready)
                .await?;
            self.catalog.after_all_features_fit(dataset_id).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(%dataset_id, "All features fit");
                self.finish(dataset_id, RunPhase::Completed);
            }
            Err(e) => {
                error!(%dataset_id, error = %e, "Failed to complete run");
                self.finish(dataset_id, RunPhase::Failed);
            }
        }
    }

    /// Record a dispatch failure and stop the run
    async fn fail_feature(&self, feature: &FeatureRecord, error: SchedulerError) {
        let dataset_id = feature.dataset_id;
        warn!(feature = %feature.name, error = %error, "Feature failed before dispatch");

        let failure = UnitFailure::from_error(error.kind(), &error);
        let record = ErrorRecord::new(dataset_id, failure.kind, failure.message)
            .with_feature(feature.id)
            .with_trace(failure.trace);
        if let Err(e) = self.catalog.record_error(record).await {
            error!(error = %e, "Failed to record error");
        }
        if let Err(e) = self
            .catalog
            .mark_feature_status(feature.id, WorkflowStatus::Failed)
            .await
        {
            error!(error = %e, "Failed to mark feature failed");
        }
        if let Err(e) = self
            .catalog
            .mark_workflow_status(dataset_id, WorkflowStatus::Failed)
            .await
        {
            error!(error = %e, "Failed to mark dataset failed");
        }
        self.coordinator.halt(dataset_id, feature.position);
        self.finish(dataset_id, RunPhase::Failed);
    }

    fn finish(&self, dataset_id: Uuid, phase: RunPhase) {
        if let Some(state) = self.runs.lock().remove(&dataset_id) {
            state.phase.send_replace(phase);
            debug!(%dataset_id, ?phase, "Run finished");
        }
    }

    fn is_current(&self, dataset_id: Uuid, feature_id: Uuid) -> bool {
        self.runs
            .lock()
            .get(&dataset_id)
            .and_then(|s| s.current.as_ref())
            .is_some_and(|f| f.id == feature_id)
    }
}

#[async_trait]
impl AfterBatchHook for Scheduler {
    async fn after_batch(&self, batch: CompletedBatch) {
        if !batch.succeeded {
            self.finish(batch.dataset_id, RunPhase::Failed);
            return;
        }

        if let Err(e) = self
            .catalog
            .mark_feature_status(batch.feature_id, WorkflowStatus::Ready)
            .await
        {
            error!(feature_id = %batch.feature_id, error = %e, "Failed to mark feature ready");
            self.finish(batch.dataset_id, RunPhase::Failed);
            return;
        }
        debug!(batch_id = %batch.batch_id, "Feature ready");

        if self.is_current(batch.dataset_id, batch.feature_id) {
            self.dispatch_next(batch.dataset_id).await;
        }
    }

    async fn unit_failed(&self, unit: &BatchUnit, _failure: &UnitFailure) {
        self.finish(unit.dataset_id, RunPhase::Failed);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active_runs", &self.runs.lock().len())
            .field("default_partition_size", &self.default_partition_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, NewFeature};
    use crate::coordinator::{InMemoryBatchArgsStore, UnitOutcome};
    use crate::datasource::{InMemoryDataSource, KeySelection};
    use crate::feature::{Feature, FeatureDescriptor, FitContext};
    use crate::frame::{Column, DataType, Frame, Schema, Value};
    use crate::transport::{InMemoryJobQueue, JobQueue};
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_terminal_phase() {
        let (tx, rx) = watch::channel(RunPhase::Running);
        let mut handle = RunHandle {
            dataset_id: Uuid::nil(),
            phase: rx,
        };
        let waiter = tokio::spawn(async move { handle.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send_replace(RunPhase::Failed);
        drop(tx);
        assert_eq!(waiter.await.unwrap(), RunPhase::Failed);
    }

    #[tokio::test]
    async fn test_wait_after_sender_dropped_reports_last_phase() {
        let (tx, rx) = watch::channel(RunPhase::Running);
        let mut handle = RunHandle {
            dataset_id: Uuid::nil(),
            phase: rx,
        };
        drop(tx);
        assert_eq!(handle.wait().await, RunPhase::Running);
    }

    struct Passthrough {
        batchable: bool,
        dependencies: Vec<String>,
    }

    #[async_trait]
    impl Feature for Passthrough {
        fn computes_columns(&self) -> Vec<Column> {
            vec![]
        }

        fn dependencies(&self) -> Vec<String> {
            self.dependencies.clone()
        }

        fn batchable(&self) -> bool {
            self.batchable
        }

        async fn fit(
            &self,
            slice: Frame,
            _descriptor: &FeatureDescriptor,
            _context: &FitContext,
        ) -> Result<Frame, FeatureError> {
            Ok(slice)
        }
    }

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        queue: Arc<InMemoryJobQueue>,
        coordinator: Arc<BatchCoordinator>,
        scheduler: Arc<Scheduler>,
        sources: DataSourceRegistry,
        dataset_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let coordinator = Arc::new(BatchCoordinator::new(
            queue.clone(),
            Arc::new(InMemoryBatchArgsStore::new()),
            catalog.clone(),
        ));
        let mut registry = FeatureRegistry::new();
        registry
            .register_instance(
                "single",
                Arc::new(Passthrough {
                    batchable: false,
                    dependencies: vec![],
                }),
            )
            .unwrap();
        registry
            .register_instance(
                "batched",
                Arc::new(Passthrough {
                    batchable: true,
                    dependencies: vec![],
                }),
            )
            .unwrap();
        registry
            .register_instance(
                "needs_single",
                Arc::new(Passthrough {
                    batchable: false,
                    dependencies: vec!["single".into()],
                }),
            )
            .unwrap();

        let ds = catalog.create_dataset("homes").await.unwrap();
        let sources = DataSourceRegistry::new();
        let schema = Schema::new(vec![Column::new("id", DataType::Int64)]).unwrap();
        let rows = (0..25).map(|i| vec![Value::Int64(i)]).collect();
        sources.register(
            ds.id,
            Arc::new(InMemoryDataSource::new(Frame::from_rows(schema, rows).unwrap())),
        );

        let scheduler = Scheduler::new(
            catalog.clone(),
            Arc::new(registry),
            sources.clone(),
            coordinator.clone(),
            10,
        );
        Fixture {
            catalog,
            queue,
            coordinator,
            scheduler,
            sources,
            dataset_id: ds.id,
        }
    }

    async fn add(fx: &Fixture, name: &str, key: &str, position: i32) -> FeatureRecord {
        fx.catalog
            .create_feature(NewFeature::new(fx.dataset_id, name, key, position).with_primary_key("id"))
            .await
            .unwrap()
    }

    async fn drain_queue(fx: &Fixture) -> Vec<BatchUnit> {
        let mut units = Vec::new();
        while let Ok(Some(unit)) =
            tokio::time::timeout(Duration::from_millis(50), fx.queue.receive()).await
        {
            units.push(unit);
        }
        units
    }

    #[tokio::test]
    async fn test_empty_run_completes() {
        let fx = fixture().await;
        let mut handle = fx.scheduler.run(fx.dataset_id).await.unwrap();

        assert_eq!(handle.wait().await, RunPhase::Completed);
        let ds = fx.catalog.dataset(fx.dataset_id).await.unwrap();
        assert_eq!(ds.status, WorkflowStatus::Ready);
        assert_eq!(fx.catalog.all_fit_calls(), 1);
    }

    #[tokio::test]
    async fn test_next_feature_waits_for_drain() {
        let fx = fixture().await;
        let first = add(&fx, "b_first", "single", 0).await;
        let second = add(&fx, "a_second", "batched", 1).await;

        let mut handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        let units = drain_queue(&fx).await;
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].feature_id, first.id);
        assert_eq!(units[0].selection, KeySelection::All);
        assert_eq!(fx.queue.enqueued(), 1);

        fx.coordinator
            .report(&units[0], UnitOutcome::Succeeded { rows_written: 25 })
            .await;

        // 25 keys at batch size 10
        let batched = drain_queue(&fx).await;
        assert_eq!(batched.len(), 3);
        assert!(batched.iter().all(|u| u.feature_id == second.id));
        assert_eq!(
            fx.catalog.feature(first.id).await.unwrap().status,
            WorkflowStatus::Ready
        );

        for unit in &batched {
            fx.coordinator
                .report(unit, UnitOutcome::Succeeded { rows_written: 10 })
                .await;
        }
        assert_eq!(handle.wait().await, RunPhase::Completed);
        assert!(!fx.scheduler.is_running(fx.dataset_id));
    }

    #[tokio::test]
    async fn test_same_position_runs_by_name() {
        let fx = fixture().await;
        let b = add(&fx, "beta", "single", 0).await;
        let a = add(&fx, "alpha", "single", 0).await;

        let _handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        let units = drain_queue(&fx).await;
        assert_eq!(units[0].feature_id, a.id);
        fx.coordinator
            .report(&units[0], UnitOutcome::Succeeded { rows_written: 1 })
            .await;
        let units = drain_queue(&fx).await;
        assert_eq!(units[0].feature_id, b.id);
    }

    #[tokio::test]
    async fn test_failure_stops_dispatch() {
        let fx = fixture().await;
        let first = add(&fx, "first", "single", 0).await;
        add(&fx, "second", "single", 1).await;

        let mut handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        let units = drain_queue(&fx).await;
        fx.coordinator
            .report(
                &units[0],
                UnitOutcome::Failed(UnitFailure::new(ErrorKind::Computation, "boom")),
            )
            .await;

        assert_eq!(handle.wait().await, RunPhase::Failed);
        assert_eq!(fx.queue.enqueued(), 1);
        assert_eq!(
            fx.catalog.feature(first.id).await.unwrap().status,
            WorkflowStatus::Failed
        );
        assert!(matches!(
            fx.scheduler.run(fx.dataset_id).await,
            Err(SchedulerError::DatasetFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_key_fails_feature() {
        let fx = fixture().await;
        let f = add(&fx, "mystery", "not_registered", 0).await;

        let mut handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        assert_eq!(handle.wait().await, RunPhase::Failed);

        let errors = fx.catalog.errors(fx.dataset_id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].feature_id, Some(f.id));
        assert!(errors[0].message.contains("not_registered"));
        assert_eq!(
            fx.catalog.dataset(fx.dataset_id).await.unwrap().status,
            WorkflowStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_dependency_wiring() {
        let fx = fixture().await;
        add(&fx, "single", "single", 0).await;
        add(&fx, "derived", "needs_single", 1).await;

        let _handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        let units = drain_queue(&fx).await;
        fx.coordinator
            .report(&units[0], UnitOutcome::Succeeded { rows_written: 1 })
            .await;

        let units = drain_queue(&fx).await;
        assert_eq!(units[0].dependencies.len(), 1);
        assert_eq!(units[0].dependencies[0].name, "single");
        assert_eq!(units[0].dependencies[0].location.partition_size, 10);
    }

    #[tokio::test]
    async fn test_dependency_at_same_position_fails() {
        let fx = fixture().await;
        add(&fx, "single", "single", 1).await;
        add(&fx, "derived", "needs_single", 1).await;

        // "derived" sorts first and its dependency is not upstream
        let mut handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        assert_eq!(handle.wait().await, RunPhase::Failed);
        assert_eq!(fx.queue.enqueued(), 0);
        let errors = fx.catalog.errors(fx.dataset_id).await.unwrap();
        assert!(errors[0].message.contains("depends on 'single'"));
    }

    #[tokio::test]
    async fn test_no_key_groups_marks_ready() {
        let fx = fixture().await;
        let empty = fx.catalog.create_dataset("empty").await.unwrap();
        let schema = Schema::new(vec![Column::new("id", DataType::Int64)]).unwrap();
        fx.sources
            .register(empty.id, Arc::new(InMemoryDataSource::new(Frame::empty(schema))));
        let f = fx
            .catalog
            .create_feature(NewFeature::new(empty.id, "b", "batched", 0).with_primary_key("id"))
            .await
            .unwrap();

        let mut handle = fx.scheduler.run(empty.id).await.unwrap();
        assert_eq!(handle.wait().await, RunPhase::Completed);
        assert_eq!(
            fx.catalog.feature(f.id).await.unwrap().status,
            WorkflowStatus::Ready
        );
        assert_eq!(fx.queue.enqueued(), 0);
    }

    #[tokio::test]
    async fn test_abort_halts_later_positions() {
        let fx = fixture().await;
        add(&fx, "first", "single", 0).await;
        add(&fx, "second", "single", 1).await;

        let mut handle = fx.scheduler.run(fx.dataset_id).await.unwrap();
        assert!(matches!(
            fx.scheduler.run(fx.dataset_id).await,
            Err(SchedulerError::AlreadyRunning(_))
        ));
        let units = drain_queue(&fx).await;

        fx.scheduler.abort(fx.dataset_id).await.unwrap();
        assert_eq!(handle.wait().await, RunPhase::Failed);

        // in-flight unit still reports
        fx.coordinator
            .report(&units[0], UnitOutcome::Succeeded { rows_written: 1 })
            .await;
        assert_eq!(fx.queue.enqueued(), 1);
        assert!(fx.coordinator.is_halted(fx.dataset_id, 1));
    }
}
