//! Key-partitioned upsert and pruned reads for one feature version

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::lock::PartitionLocks;
use super::partition::{
    parse_partition_file_name, partition_index, path_segment, PartitionInfo,
    DEFAULT_PARTITION_SIZE, UNPARTITIONED_FILE,
};
use super::predicate::KeyPredicate;
use super::{PartitionFailure, StoreError};
use crate::frame::{decode_parquet, encode_parquet, Frame, Schema, Value};

/// Where a feature version lives and how it is keyed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLocation {
    pub dataset: String,
    pub feature: String,
    pub version: String,
    pub primary_key: Option<String>,
    pub partition_size: u64,
}

impl FeatureLocation {
    pub fn new(
        dataset: impl Into<String>,
        feature: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            feature: feature.into(),
            version: version.into(),
            primary_key: None,
            partition_size: DEFAULT_PARTITION_SIZE,
        }
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    pub fn with_partition_size(mut self, size: u64) -> Self {
        self.partition_size = size.max(1);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Directory of this version relative to the store root
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(path_segment(&self.dataset))
            .join("features")
            .join(path_segment(&self.feature))
            .join(path_segment(&self.version))
    }
}

/// Root directory shared by every feature store of a process
///
/// Handles opened from the same root share one partition lock table.
#[derive(Debug, Clone)]
pub struct FeatureStoreRoot {
    root: PathBuf,
    locks: Arc<PartitionLocks>,
}

impl FeatureStoreRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(PartitionLocks::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Open a writable handle
    pub fn open(&self, location: FeatureLocation) -> PartitionedStore {
        PartitionedStore {
            dir: self.root.join(location.relative_dir()),
            location,
            locks: Arc::clone(&self.locks),
            schema: None,
            read_only: false,
        }
    }

    /// Open a handle that refuses writes, used for dependency lookups
    pub fn open_read_only(&self, location: FeatureLocation) -> PartitionedStore {
        PartitionedStore {
            read_only: true,
            ..self.open(location)
        }
    }
}

/// How a write was laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Partitioned,
    Unpartitioned,
}

/// Outcome of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub mode: WriteMode,
    /// Partition indices rewritten, ascending
    pub partitions_written: Vec<i64>,
    /// Rows supplied by the caller
    pub rows_written: usize,
}

/// Outcome of a read
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub frame: Frame,
    /// Partition files opened, ascending
    pub partitions_read: Vec<i64>,
    /// Whether the unpartitioned file was opened
    pub unpartitioned_read: bool,
}

/// Handle on one feature version's directory
#[derive(Debug, Clone)]
pub struct PartitionedStore {
    location: FeatureLocation,
    dir: PathBuf,
    locks: Arc<PartitionLocks>,
    schema: Option<Schema>,
    read_only: bool,
}

impl PartitionedStore {
    /// Declare the schema returned by reads that find no data
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn location(&self) -> &FeatureLocation {
        &self.location
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.location.primary_key.as_deref()
    }

    pub fn partition_size(&self) -> u64 {
        self.location.partition_size.max(1)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Upsert `frame` into the store
    ///
    /// When every row carries a castable primary key, rows are merged by key
    /// into their partitions; otherwise the unpartitioned file is replaced.
    /// A failing partition does not stop the others. A write whose layout
    /// differs from the one already on disk fails with
    /// [`StoreError::LayoutConflict`].
    #[instrument(skip(self, frame), fields(dir = %self.dir.display(), rows = frame.len()))]
    pub async fn write(&self, frame: &Frame) -> Result<WriteSummary, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly(self.dir.clone()));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(StoreError::io(&self.dir))?;

        match self.castable_keys(frame) {
            Some((pk_idx, keys)) => {
                if self.has_unpartitioned().await? {
                    return Err(self.layout_conflict(WriteMode::Unpartitioned));
                }
                self.write_partitioned(frame, pk_idx, keys).await
            }
            None => {
                if !self.list_partitions().await?.is_empty() {
                    return Err(self.layout_conflict(WriteMode::Partitioned));
                }
                self.write_unpartitioned(frame).await
            }
        }
    }

    fn layout_conflict(&self, existing: WriteMode) -> StoreError {
        let attempted = match existing {
            WriteMode::Partitioned => WriteMode::Unpartitioned,
            WriteMode::Unpartitioned => WriteMode::Partitioned,
        };
        warn!(?existing, ?attempted, "Write would mix store layouts");
        StoreError::LayoutConflict {
            dir: self.dir.clone(),
            existing,
            attempted,
        }
    }

    fn castable_keys(&self, frame: &Frame) -> Option<(usize, Vec<i64>)> {
        let pk = self.primary_key()?;
        let idx = frame.schema().index_of(pk)?;
        let keys = frame
            .rows()
            .iter()
            .map(|row| row[idx].as_key())
            .collect::<Option<Vec<_>>>()?;
        Some((idx, keys))
    }

    async fn write_partitioned(
        &self,
        frame: &Frame,
        pk_idx: usize,
        keys: Vec<i64>,
    ) -> Result<WriteSummary, StoreError> {
        let size = self.partition_size();
        let mut groups: BTreeMap<i64, Vec<(i64, Vec<Value>)>> = BTreeMap::new();
        for (row, key) in frame.rows().iter().zip(keys) {
            groups
                .entry(partition_index(key, size))
                .or_default()
                .push((key, row.clone()));
        }

        let attempted = groups.len();
        let writes = groups.into_iter().map(|(index, rows)| async move {
            let result = self
                .merge_partition(index, frame.schema(), pk_idx, rows)
                .await;
            (index, result)
        });
        let results = futures::future::join_all(writes).await;

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for (index, result) in results {
            match result {
                Ok(rows) => {
                    debug!(partition = index, rows, "Partition merged");
                    written.push(index);
                }
                Err(e) => {
                    warn!(partition = index, error = %e, "Partition write failed");
                    failed.push(PartitionFailure {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }

        if !failed.is_empty() {
            return Err(StoreError::PartialWrite { attempted, failed });
        }

        info!(partitions = written.len(), rows = frame.len(), "Partitioned write committed");
        Ok(WriteSummary {
            mode: WriteMode::Partitioned,
            partitions_written: written,
            rows_written: frame.len(),
        })
    }

    async fn merge_partition(
        &self,
        index: i64,
        schema: &Schema,
        pk_idx: usize,
        rows: Vec<(i64, Vec<Value>)>,
    ) -> Result<usize, StoreError> {
        let info = PartitionInfo::new(&self.dir, index, self.partition_size());
        let _guard = self.locks.lock(&info.path).await;

        let mut merged: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
        if let Some(existing) = read_frame(&info.path).await? {
            for row in existing.project_onto(schema)?.into_rows() {
                if let Some(key) = row[pk_idx].as_key() {
                    merged.insert(key, row);
                }
            }
        }
        // last row for a key wins
        for (key, row) in rows {
            merged.insert(key, row);
        }

        let out = Frame::from_rows(schema.clone(), merged.into_values().collect())?;
        write_atomic(&info.path, encode_parquet(&out)?).await?;
        Ok(out.len())
    }

    async fn write_unpartitioned(&self, frame: &Frame) -> Result<WriteSummary, StoreError> {
        let path = self.dir.join(UNPARTITIONED_FILE);
        let _guard = self.locks.lock(&path).await;
        write_atomic(&path, encode_parquet(frame)?).await?;

        info!(rows = frame.len(), "Unpartitioned write committed");
        Ok(WriteSummary {
            mode: WriteMode::Unpartitioned,
            partitions_written: Vec::new(),
            rows_written: frame.len(),
        })
    }

    /// Read rows matching `predicate`, opening only covering partitions
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn read(&self, predicate: &KeyPredicate) -> Result<ReadResult, StoreError> {
        let listed: Vec<i64> = self
            .list_partitions()
            .await?
            .into_iter()
            .map(|p| p.index)
            .collect();
        let to_open = predicate
            .covering_partitions(self.partition_size(), &listed)
            .unwrap_or_else(|| listed.clone());

        let reads = to_open.iter().map(|index| {
            let path = PartitionInfo::new(&self.dir, *index, self.partition_size()).path;
            async move { read_frame(&path).await.map(|f| (*index, f)) }
        });
        let mut frames = Vec::new();
        let mut partitions_read = Vec::new();
        for (index, frame) in futures::future::try_join_all(reads).await? {
            if let Some(frame) = frame {
                partitions_read.push(index);
                frames.push(frame);
            }
        }

        let unpartitioned = read_frame(&self.dir.join(UNPARTITIONED_FILE)).await?;
        let unpartitioned_read = unpartitioned.is_some();
        frames.extend(unpartitioned);

        let schema = match (&self.schema, frames.first()) {
            (Some(schema), _) => schema.clone(),
            (None, Some(first)) => first.schema().clone(),
            (None, None) => self.stored_schema(&listed).await?.unwrap_or_default(),
        };
        let mut frame = Frame::concat(schema, &frames)?;

        if !predicate.is_all() {
            frame = match self.primary_key().and_then(|pk| frame.schema().index_of(pk)) {
                Some(pk_idx) => frame.filter(|row| predicate.matches(row[pk_idx].as_key())),
                None => Frame::empty(frame.schema().clone()),
            };
        }

        debug!(
            partitions = ?partitions_read,
            unpartitioned = unpartitioned_read,
            rows = frame.len(),
            "Read complete"
        );
        Ok(ReadResult {
            frame,
            partitions_read,
            unpartitioned_read,
        })
    }

    /// Schema of the first stored partition, for typing empty reads
    async fn stored_schema(&self, listed: &[i64]) -> Result<Option<Schema>, StoreError> {
        let Some(index) = listed.first() else {
            return Ok(None);
        };
        let path = PartitionInfo::new(&self.dir, *index, self.partition_size()).path;
        Ok(read_frame(&path).await?.map(|f| f.schema().clone()))
    }

    /// Read rows matching `predicate`
    pub async fn query(&self, predicate: &KeyPredicate) -> Result<Frame, StoreError> {
        Ok(self.read(predicate).await?.frame)
    }

    /// Partition files on disk, sorted by index
    pub async fn list_partitions(&self) -> Result<Vec<PartitionInfo>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir)(e)),
        };

        let mut partitions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StoreError::io(&self.dir))?
        {
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(parse_partition_file_name) {
                partitions.push(PartitionInfo::new(&self.dir, index, self.partition_size()));
            }
        }
        partitions.sort_by_key(|p| p.index);
        Ok(partitions)
    }

    /// Whether the unpartitioned file exists
    pub async fn has_unpartitioned(&self) -> Result<bool, StoreError> {
        let path = self.dir.join(UNPARTITIONED_FILE);
        tokio::fs::try_exists(&path)
            .await
            .map_err(StoreError::io(&path))
    }

    /// No partition files and no unpartitioned file
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.list_partitions().await?.is_empty() && !self.has_unpartitioned().await?)
    }

    /// Delete this feature version
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn wipe(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly(self.dir.clone()));
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!("Feature version wiped");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.dir)(e)),
        }
    }

    /// Copy every file of this version into `version`, returning a handle on the copy
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn copy_version(&self, version: &str) -> Result<PartitionedStore, StoreError> {
        let target = PartitionedStore {
            location: self.location.clone().with_version(version),
            dir: self
                .dir
                .parent()
                .map(|p| p.join(path_segment(version)))
                .unwrap_or_else(|| PathBuf::from(path_segment(version))),
            locks: Arc::clone(&self.locks),
            schema: self.schema.clone(),
            read_only: false,
        };
        tokio::fs::create_dir_all(&target.dir)
            .await
            .map_err(StoreError::io(&target.dir))?;

        let mut files = self
            .list_partitions()
            .await?
            .into_iter()
            .map(|p| p.path)
            .collect::<Vec<_>>();
        if self.has_unpartitioned().await? {
            files.push(self.dir.join(UNPARTITIONED_FILE));
        }

        for source in &files {
            let Some(name) = source.file_name() else {
                continue;
            };
            let dest = target.dir.join(name);
            let _guard = self.locks.lock(&dest).await;
            tokio::fs::copy(source, &dest)
                .await
                .map_err(StoreError::io(source))?;
        }

        info!(files = files.len(), to = %target.dir.display(), "Feature version copied");
        Ok(target)
    }
}

async fn read_frame(path: &Path) -> Result<Option<Frame>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(decode_parquet(Bytes::from(bytes))?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path)(e)),
    }
}

/// Write to a temp file in the same directory, fsync, then rename over `path`
async fn write_atomic(path: &Path, bytes: Bytes) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("partition");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::now_v7().simple()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(StoreError::io(&tmp))?;
        file.write_all(&bytes).await.map_err(StoreError::io(&tmp))?;
        file.sync_all().await.map_err(StoreError::io(&tmp))?;
        drop(file);
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(StoreError::io(path))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}
