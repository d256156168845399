//! Primary-key predicates and partition pruning

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::partition::partition_index;

/// Filter on the primary key of a feature store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyPredicate {
    /// Every row
    All,
    /// `key == value`
    Eq { key: i64 },
    /// `key in set`
    In { keys: BTreeSet<i64> },
    /// `start <= key <= end`, either bound may be open
    Range {
        start: Option<i64>,
        end: Option<i64>,
    },
}

impl KeyPredicate {
    pub fn eq(key: i64) -> Self {
        Self::Eq { key }
    }

    pub fn keys(keys: impl IntoIterator<Item = i64>) -> Self {
        Self::In {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn range(start: i64, end: i64) -> Self {
        Self::Range {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Whether a row with this (cast) key passes the predicate
    ///
    /// Rows without a castable key only pass `All`.
    pub fn matches(&self, key: Option<i64>) -> bool {
        match (self, key) {
            (Self::All, _) => true,
            (_, None) => false,
            (Self::Eq { key: want }, Some(k)) => k == *want,
            (Self::In { keys }, Some(k)) => keys.contains(&k),
            (Self::Range { start, end }, Some(k)) => {
                start.map_or(true, |s| k >= s) && end.map_or(true, |e| k <= e)
            }
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Partition indices a read must open
    ///
    /// `existing` is the sorted list of partition indices present on disk.
    /// Returns `None` when every partition has to be scanned.
    pub fn covering_partitions(&self, partition_size: u64, existing: &[i64]) -> Option<Vec<i64>> {
        match self {
            Self::All => None,
            Self::Eq { key } => {
                let idx = partition_index(*key, partition_size);
                Some(existing.iter().copied().filter(|i| *i == idx).collect())
            }
            Self::In { keys } => {
                let wanted: BTreeSet<i64> = keys
                    .iter()
                    .map(|k| partition_index(*k, partition_size))
                    .collect();
                Some(
                    existing
                        .iter()
                        .copied()
                        .filter(|i| wanted.contains(i))
                        .collect(),
                )
            }
            Self::Range { start, end } => {
                if let (Some(s), Some(e)) = (start, end) {
                    if s > e {
                        return Some(Vec::new());
                    }
                }
                let lo = start.map(|s| partition_index(s, partition_size));
                let hi = end.map(|e| partition_index(e, partition_size));
                Some(
                    existing
                        .iter()
                        .copied()
                        .filter(|i| lo.map_or(true, |lo| *i >= lo) && hi.map_or(true, |hi| *i <= hi))
                        .collect(),
                )
            }
        }
    }
}
