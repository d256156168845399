//! Job queue transport
//!
//! Delivery is at-least-once: a unit may be received more than once, and the
//! coordinator de-duplicates completion reports.

mod memory;

use async_trait::async_trait;

pub use memory::InMemoryJobQueue;

use crate::coordinator::{BatchId, BatchUnit};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Queue no longer accepts units
    #[error("queue is closed")]
    Closed,

    /// Unit tagged with a different batch
    #[error("unit {unit_number} belongs to batch {actual}, not {expected}")]
    BatchMismatch {
        expected: BatchId,
        actual: BatchId,
        unit_number: u32,
    },

    /// Backend failure
    #[error("queue error: {0}")]
    Backend(String),
}

/// Transport handing units to workers
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    /// Submit one unit
    async fn enqueue(&self, unit: BatchUnit) -> Result<(), QueueError>;

    /// Submit every unit of a batch
    async fn enqueue_batch(
        &self,
        batch_id: &BatchId,
        units: Vec<BatchUnit>,
    ) -> Result<(), QueueError> {
        if let Some(unit) = units.iter().find(|u| &u.batch_id != batch_id) {
            return Err(QueueError::BatchMismatch {
                expected: batch_id.clone(),
                actual: unit.batch_id.clone(),
                unit_number: unit.unit_number,
            });
        }
        for unit in units {
            self.enqueue(unit).await?;
        }
        Ok(())
    }

    /// Next unit, or `None` once the queue is closed and drained
    async fn receive(&self) -> Option<BatchUnit>;

    /// Stop accepting units
    fn close(&self);
}
