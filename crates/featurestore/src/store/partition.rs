//! Partition addressing
//!
//! A partition is a contiguous primary-key range `[index * size, (index + 1) * size)`
//! stored in one Parquet file. The mapping is a pure function of the key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Partition size used when a feature declares no batch size
pub const DEFAULT_PARTITION_SIZE: u64 = 10_000;

/// File holding a feature version that could not be partitioned
pub const UNPARTITIONED_FILE: &str = "feature.parquet";

const PARTITION_PREFIX: &str = "partition";
const PARQUET_SUFFIX: &str = ".parquet";

/// Partition index for `key` (Euclidean floor, so `-1` lands in partition `-1`)
pub fn partition_index(key: i64, partition_size: u64) -> i64 {
    let size = clamp_size(partition_size);
    key.div_euclid(size)
}

/// First key of a partition (inclusive)
pub fn partition_start(index: i64, partition_size: u64) -> i64 {
    index.saturating_mul(clamp_size(partition_size))
}

/// Last key of a partition (inclusive)
pub fn partition_end(index: i64, partition_size: u64) -> i64 {
    partition_start(index, partition_size).saturating_add(clamp_size(partition_size) - 1)
}

fn clamp_size(partition_size: u64) -> i64 {
    i64::try_from(partition_size.max(1)).unwrap_or(i64::MAX)
}

/// File name for a partition index
pub fn partition_file_name(index: i64) -> String {
    format!("{PARTITION_PREFIX}{index}{PARQUET_SUFFIX}")
}

/// Parse `partition<N>.parquet` back into `N`
pub fn parse_partition_file_name(name: &str) -> Option<i64> {
    name.strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(PARQUET_SUFFIX)?
        .parse()
        .ok()
}

/// Normalize a dataset or feature name into a path segment
///
/// Lowercases and collapses every run of non-alphanumeric characters into `_`.
pub fn path_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            in_run = false;
            out.push(ch.to_ascii_lowercase());
        } else if !in_run {
            in_run = true;
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// One partition file of a feature version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub index: i64,
    /// First key covered (inclusive)
    pub key_start: i64,
    /// Last key covered (inclusive)
    pub key_end: i64,
    pub path: PathBuf,
}

impl PartitionInfo {
    pub fn new(dir: &Path, index: i64, partition_size: u64) -> Self {
        Self {
            index,
            key_start: partition_start(index, partition_size),
            key_end: partition_end(index, partition_size),
            path: dir.join(partition_file_name(index)),
        }
    }

    pub fn contains(&self, key: i64) -> bool {
        key >= self.key_start && key <= self.key_end
    }
}
