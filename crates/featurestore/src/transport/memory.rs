//! In-process job queue

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{JobQueue, QueueError};
use crate::coordinator::BatchUnit;

/// Unbounded in-process queue
///
/// With duplicate delivery enabled every unit is delivered twice, which
/// exercises the at-least-once handling of the coordinator.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<BatchUnit>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BatchUnit>>,
    duplicate_delivery: bool,
    enqueued: AtomicUsize,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            duplicate_delivery: false,
            enqueued: AtomicUsize::new(0),
        }
    }

    /// Deliver every unit twice
    pub fn with_duplicate_delivery(mut self, enabled: bool) -> Self {
        self.duplicate_delivery = enabled;
        self
    }

    /// Number of deliveries queued so far, duplicates included
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    fn send(&self, unit: BatchUnit) -> Result<(), QueueError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(QueueError::Closed)?;
        tx.send(unit).map_err(|_| QueueError::Closed)?;
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, unit: BatchUnit) -> Result<(), QueueError> {
        trace!(batch_id = %unit.batch_id, unit_number = unit.unit_number, "Enqueue unit");
        if self.duplicate_delivery {
            self.send(unit.clone())?;
        }
        self.send(unit)
    }

    async fn receive(&self) -> Option<BatchUnit> {
        self.rx.lock().await.recv().await
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::BatchId;
    use crate::datasource::KeySelection;
    use crate::store::FeatureLocation;
    use uuid::Uuid;

    fn unit(batch: &str, n: u32) -> BatchUnit {
        BatchUnit {
            dataset_id: Uuid::now_v7(),
            feature_id: Uuid::now_v7(),
            feature_name: "f".into(),
            feature_key: "f".into(),
            position: 0,
            batch_id: BatchId::from(batch),
            unit_number: n,
            selection: KeySelection::All,
            store: FeatureLocation::new("d", "f", "v1"),
            dependencies: vec![],
        }
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = InMemoryJobQueue::new();
        queue
            .enqueue_batch(&BatchId::from("b"), vec![unit("b", 0), unit("b", 1)])
            .await
            .unwrap();

        assert_eq!(queue.receive().await.unwrap().unit_number, 0);
        assert_eq!(queue.receive().await.unwrap().unit_number, 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery() {
        let queue = InMemoryJobQueue::new().with_duplicate_delivery(true);
        queue.enqueue(unit("b", 7)).await.unwrap();

        assert_eq!(queue.enqueued(), 2);
        assert_eq!(queue.receive().await.unwrap().unit_number, 7);
        assert_eq!(queue.receive().await.unwrap().unit_number, 7);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(unit("b", 0)).await.unwrap();
        queue.close();

        assert!(matches!(
            queue.enqueue(unit("b", 1)).await,
            Err(QueueError::Closed)
        ));
        assert!(queue.receive().await.is_some());
        assert!(queue.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_batch_mismatch_rejected() {
        let queue = InMemoryJobQueue::new();
        let err = queue
            .enqueue_batch(&BatchId::from("a"), vec![unit("b", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::BatchMismatch { .. }));
        assert_eq!(queue.enqueued(), 0);
    }
}
