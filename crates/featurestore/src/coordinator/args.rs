//! Storage of the original unit arguments of each batch

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{BatchId, BatchUnit};

/// Directory under the store root holding batch argument files
pub const BATCHES_DIR: &str = "_batches";

/// Error type for batch argument storage
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Batch id cannot be used as a file name
    #[error("invalid batch id: {0}")]
    InvalidBatchId(BatchId),
}

/// Keyed storage of batch arguments
///
/// Arguments stay readable after the batch drains.
#[async_trait]
pub trait BatchArgsStore: Send + Sync + 'static {
    async fn put(&self, batch_id: &BatchId, args: &[BatchUnit]) -> Result<(), ArgsError>;

    async fn get(&self, batch_id: &BatchId) -> Result<Option<Vec<BatchUnit>>, ArgsError>;
}

/// In-memory batch argument store for testing
#[derive(Debug, Default)]
pub struct InMemoryBatchArgsStore {
    batches: RwLock<HashMap<BatchId, Vec<BatchUnit>>>,
}

impl InMemoryBatchArgsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
    }
}

#[async_trait]
impl BatchArgsStore for InMemoryBatchArgsStore {
    async fn put(&self, batch_id: &BatchId, args: &[BatchUnit]) -> Result<(), ArgsError> {
        self.batches.write().insert(batch_id.clone(), args.to_vec());
        Ok(())
    }

    async fn get(&self, batch_id: &BatchId) -> Result<Option<Vec<BatchUnit>>, ArgsError> {
        Ok(self.batches.read().get(batch_id).cloned())
    }
}

/// Batch arguments as `<root>/_batches/<batch_id>.json`
#[derive(Debug, Clone)]
pub struct FileBatchArgsStore {
    dir: PathBuf,
}

impl FileBatchArgsStore {
    /// Store under `<root>/_batches`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join(BATCHES_DIR),
        }
    }

    fn path(&self, batch_id: &BatchId) -> Result<PathBuf, ArgsError> {
        if !batch_id.is_file_safe() {
            return Err(ArgsError::InvalidBatchId(batch_id.clone()));
        }
        Ok(self.dir.join(format!("{batch_id}.json")))
    }
}

#[async_trait]
impl BatchArgsStore for FileBatchArgsStore {
    async fn put(&self, batch_id: &BatchId, args: &[BatchUnit]) -> Result<(), ArgsError> {
        let path = self.path(batch_id)?;
        let bytes =
            serde_json::to_vec_pretty(args).map_err(|e| ArgsError::Serialization(e.to_string()))?;
        let io = |source| ArgsError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        let tmp = path.with_extension(format!("{}.tmp", Uuid::now_v7().simple()));
        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io(source));
        }
        Ok(())
    }

    async fn get(&self, batch_id: &BatchId) -> Result<Option<Vec<BatchUnit>>, ArgsError> {
        let path = self.path(batch_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ArgsError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArgsError::Io { path, source }),
        }
    }
}
