//! Partitioned feature store
//!
//! Each feature version is a directory of Parquet files:
//!
//! ```text
//! <root>/<dataset>/features/<feature>/<version>/partition<N>.parquet
//! <root>/<dataset>/features/<feature>/<version>/feature.parquet   (unpartitioned)
//! ```
//!
//! Rows with a castable integer primary key are grouped into fixed-size key
//! ranges and merged into their partition file by key. Frames without one are
//! written wholesale to a single file. A version keeps whichever layout its
//! first write chose until it is wiped.

mod apply;
mod lock;
mod partition;
mod partitioned;
mod predicate;

use std::path::{Path, PathBuf};

pub use apply::{apply_stored, Applied, KeyCoverage};
pub use lock::{PartitionGuard, PartitionLocks};
pub use partition::{
    parse_partition_file_name, partition_end, partition_file_name, partition_index,
    partition_start, path_segment, PartitionInfo, DEFAULT_PARTITION_SIZE, UNPARTITIONED_FILE,
};
pub use partitioned::{
    FeatureLocation, FeatureStoreRoot, PartitionedStore, ReadResult, WriteMode, WriteSummary,
};
pub use predicate::KeyPredicate;

use crate::frame::FrameError;

/// A partition that could not be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub index: i64,
    pub message: String,
}

impl std::fmt::Display for PartitionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partition {}: {}", self.index, self.message)
    }
}

fn describe_failures(failures: &[PartitionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding, decoding or schema failure
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Some partitions of a write failed; the others were committed
    #[error("{} of {attempted} partition writes failed: {}", .failed.len(), describe_failures(.failed))]
    PartialWrite {
        attempted: usize,
        failed: Vec<PartitionFailure>,
    },

    /// Write attempted through a read-only handle
    #[error("store is read-only: {}", .0.display())]
    ReadOnly(PathBuf),

    /// The write would mix partition files and the unpartitioned file
    #[error("{} already holds {existing:?} data, refusing a {attempted:?} write", .dir.display())]
    LayoutConflict {
        dir: PathBuf,
        existing: WriteMode,
        attempted: WriteMode,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
