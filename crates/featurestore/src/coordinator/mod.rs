//! Batch coordination
//!
//! Tracks which units of a batch are still outstanding, fires the batch's
//! after-batch hook exactly once when the last one reports, and turns unit
//! failures into catalog state.
//!
//! ```text
//!   enqueue_batch ──► args store (put) ──► job queue
//!                                              │
//!   report(unit) ◄──────────── worker ◄────────┘
//!        │
//!        ├─ failure: error record, feature failed, dataset failed, halt
//!        └─ last unit: hook.after_batch(arguments)
//! ```

mod args;
mod unit;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub use args::{ArgsError, BatchArgsStore, FileBatchArgsStore, InMemoryBatchArgsStore, BATCHES_DIR};
pub use unit::{BatchId, BatchUnit, DependencyRef, UnitFailure, UnitOutcome};

use crate::catalog::{CatalogError, DatasetCatalog, ErrorRecord};
use crate::feature::WorkflowStatus;
use crate::transport::{JobQueue, QueueError};

/// Error type for coordinator operations
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A batch needs at least one unit
    #[error("batch {0} has no units")]
    EmptyBatch(BatchId),

    /// Units disagree on batch, dataset, feature or position
    #[error("batch {0} mixes units of different batches or features")]
    MixedBatch(BatchId),

    /// Batch id already in flight
    #[error("batch {0} is already in flight")]
    DuplicateBatch(BatchId),

    /// Dataset is halted at or before this position
    #[error("dataset {dataset_id} is halted, refusing position {position}")]
    Halted { dataset_id: Uuid, position: i32 },

    /// No arguments stored for the batch
    #[error("unknown batch: {0}")]
    UnknownBatch(BatchId),

    #[error(transparent)]
    Args(#[from] ArgsError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// A batch whose last unit has reported
#[derive(Debug, Clone)]
pub struct CompletedBatch {
    pub batch_id: BatchId,
    pub dataset_id: Uuid,
    pub feature_id: Uuid,
    pub position: i32,
    /// False if any unit failed
    pub succeeded: bool,
    /// Original unit arguments, in submission order
    pub arguments: Vec<BatchUnit>,
}

/// Callback registered with each batch
#[async_trait]
pub trait AfterBatchHook: Send + Sync + 'static {
    /// Called exactly once when every unit of the batch has reported
    async fn after_batch(&self, batch: CompletedBatch);

    /// Called for each failing unit, before the batch drains
    async fn unit_failed(&self, _unit: &BatchUnit, _failure: &UnitFailure) {}
}

struct BatchState {
    dataset_id: Uuid,
    feature_id: Uuid,
    position: i32,
    remaining: BTreeSet<u32>,
    failed: bool,
    hook: Arc<dyn AfterBatchHook>,
}

/// Tracks batch membership and completion
pub struct BatchCoordinator {
    queue: Arc<dyn JobQueue>,
    args: Arc<dyn BatchArgsStore>,
    catalog: Arc<dyn DatasetCatalog>,
    batches: Mutex<HashMap<BatchId, BatchState>>,
    halted: Mutex<HashMap<Uuid, i32>>,
}

impl BatchCoordinator {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        args: Arc<dyn BatchArgsStore>,
        catalog: Arc<dyn DatasetCatalog>,
    ) -> Self {
        Self {
            queue,
            args,
            catalog,
            batches: Mutex::new(HashMap::new()),
            halted: Mutex::new(HashMap::new()),
        }
    }

    /// Persist the unit arguments, then hand every unit to the queue
    #[instrument(skip(self, units, hook), fields(units = units.len()))]
    pub async fn enqueue_batch(
        &self,
        batch_id: BatchId,
        units: Vec<BatchUnit>,
        hook: Arc<dyn AfterBatchHook>,
    ) -> Result<(), CoordinatorError> {
        let first = units
            .first()
            .ok_or_else(|| CoordinatorError::EmptyBatch(batch_id.clone()))?;
        let (dataset_id, feature_id, position) = (first.dataset_id, first.feature_id, first.position);
        if units.iter().any(|u| {
            u.batch_id != batch_id
                || u.dataset_id != dataset_id
                || u.feature_id != feature_id
                || u.position != position
        }) {
            return Err(CoordinatorError::MixedBatch(batch_id));
        }
        if self.is_halted(dataset_id, position) {
            warn!(%dataset_id, position, "Refusing batch for halted dataset");
            return Err(CoordinatorError::Halted {
                dataset_id,
                position,
            });
        }

        self.args.put(&batch_id, &units).await?;

        {
            let mut batches = self.batches.lock();
            if batches.contains_key(&batch_id) {
                return Err(CoordinatorError::DuplicateBatch(batch_id));
            }
            batches.insert(
                batch_id.clone(),
                BatchState {
                    dataset_id,
                    feature_id,
                    position,
                    remaining: units.iter().map(|u| u.unit_number).collect(),
                    failed: false,
                    hook,
                },
            );
        }

        if let Err(e) = self.queue.enqueue_batch(&batch_id, units).await {
            self.batches.lock().remove(&batch_id);
            return Err(e.into());
        }

        info!(%batch_id, %dataset_id, %feature_id, position, "Batch enqueued");
        Ok(())
    }

    /// Record the outcome of one unit
    ///
    /// Reports for unknown or already drained batches, and repeated reports
    /// for the same unit, are ignored.
    #[instrument(skip(self, unit, outcome), fields(batch_id = %unit.batch_id, unit_number = unit.unit_number))]
    pub async fn report(&self, unit: &BatchUnit, outcome: UnitOutcome) {
        let (hook, drained) = {
            let mut batches = self.batches.lock();
            let Some(state) = batches.get_mut(&unit.batch_id) else {
                debug!("Report for unknown or drained batch ignored");
                return;
            };
            if !state.remaining.remove(&unit.unit_number) {
                debug!("Duplicate report ignored");
                return;
            }
            if !outcome.is_success() {
                state.failed = true;
            }
            let hook = Arc::clone(&state.hook);
            let drained = if state.remaining.is_empty() {
                batches.remove(&unit.batch_id)
            } else {
                None
            };
            (hook, drained)
        };

        if let UnitOutcome::Failed(failure) = &outcome {
            self.handle_failure(unit, failure).await;
            hook.unit_failed(unit, failure).await;
        }

        if let Some(state) = drained {
            let arguments = match self.args.get(&unit.batch_id).await {
                Ok(Some(args)) => args,
                Ok(None) => {
                    warn!("Batch arguments missing at drain");
                    Vec::new()
                }
                Err(e) => {
                    error!(error = %e, "Failed to load batch arguments at drain");
                    Vec::new()
                }
            };
            info!(succeeded = !state.failed, "Batch drained");
            hook.after_batch(CompletedBatch {
                batch_id: unit.batch_id.clone(),
                dataset_id: state.dataset_id,
                feature_id: state.feature_id,
                position: state.position,
                succeeded: !state.failed,
                arguments,
            })
            .await;
        }
    }

    async fn handle_failure(&self, unit: &BatchUnit, failure: &UnitFailure) {
        warn!(
            dataset_id = %unit.dataset_id,
            feature = %unit.feature_name,
            kind = %failure.kind,
            error = %failure.message,
            "Unit failed"
        );

        let record = ErrorRecord::new(unit.dataset_id, failure.kind, failure.message.clone())
            .with_feature(unit.feature_id)
            .with_unit(unit.batch_id.as_str(), unit.unit_number)
            .with_trace(failure.trace.clone())
            .with_slice(failure.slice.clone());
        if let Err(e) = self.catalog.record_error(record).await {
            error!(error = %e, "Failed to record error");
        }
        if let Err(e) = self
            .catalog
            .mark_feature_status(unit.feature_id, WorkflowStatus::Failed)
            .await
        {
            error!(error = %e, "Failed to mark feature failed");
        }
        if let Err(e) = self
            .catalog
            .mark_workflow_status(unit.dataset_id, WorkflowStatus::Failed)
            .await
        {
            error!(error = %e, "Failed to mark dataset failed");
        }
        self.halt(unit.dataset_id, unit.position);
    }

    /// Refuse batches of `dataset_id` at positions after `position`
    pub fn halt(&self, dataset_id: Uuid, position: i32) {
        let mut halted = self.halted.lock();
        let entry = halted.entry(dataset_id).or_insert(position);
        *entry = (*entry).min(position);
        debug!(%dataset_id, position = *entry, "Dataset halted");
    }

    /// Accept batches of `dataset_id` again
    pub fn resume(&self, dataset_id: Uuid) {
        if self.halted.lock().remove(&dataset_id).is_some() {
            debug!(%dataset_id, "Dataset resumed");
        }
    }

    /// Whether a batch at `position` would be refused
    pub fn is_halted(&self, dataset_id: Uuid, position: i32) -> bool {
        self.halted
            .lock()
            .get(&dataset_id)
            .is_some_and(|halted_at| position > *halted_at)
    }

    /// Stored unit arguments of a batch
    pub async fn batch_arguments(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<BatchUnit>, CoordinatorError> {
        self.args
            .get(batch_id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownBatch(batch_id.clone()))
    }

    /// Number of batches with outstanding units
    pub fn in_flight(&self) -> usize {
        self.batches.lock().len()
    }

    /// Outstanding unit numbers of a batch
    pub fn remaining(&self, batch_id: &BatchId) -> Option<Vec<u32>> {
        self.batches
            .lock()
            .get(batch_id)
            .map(|s| s.remaining.iter().copied().collect())
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("in_flight", &self.in_flight())
            .field("halted", &*self.halted.lock())
            .finish()
    }
}
