//! Joining stored feature columns back onto raw frames

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::partition::partition_index;
use super::partitioned::PartitionedStore;
use super::predicate::KeyPredicate;
use super::StoreError;
use crate::frame::{Column, Frame, Schema, Value};

/// Which requested keys the store could answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCoverage {
    /// A stored row exists
    pub present: BTreeSet<i64>,
    /// The covering partition exists but holds no row for the key
    pub missing: BTreeSet<i64>,
    /// No file covers the key yet
    pub not_computed: BTreeSet<i64>,
}

impl KeyCoverage {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.not_computed.is_empty()
    }
}

/// Result of applying a store to a frame
#[derive(Debug, Clone)]
pub struct Applied {
    pub frame: Frame,
    pub coverage: KeyCoverage,
    /// True when the input came back unchanged because nothing was stored
    pub passed_through: bool,
}

/// Left-join the stored columns of `store` onto `input` by primary key
///
/// If the store holds no row for any requested key the input passes through
/// unchanged. Otherwise every stored column not already in `input` is
/// appended, null where the key has no stored row.
pub async fn apply_stored(input: Frame, store: &PartitionedStore) -> Result<Applied, StoreError> {
    let Some(pk) = store.primary_key().map(str::to_string) else {
        return Ok(pass_through(input, KeyCoverage::default()));
    };
    let Some(pk_idx) = input.schema().index_of(&pk) else {
        return Ok(pass_through(input, KeyCoverage::default()));
    };

    let requested: BTreeSet<i64> = input
        .rows()
        .iter()
        .filter_map(|row| row[pk_idx].as_key())
        .collect();
    let result = store.read(&KeyPredicate::In { keys: requested.clone() }).await?;
    let stored = result.frame;

    let stored_by_key: HashMap<i64, &Vec<Value>> = match stored.schema().index_of(&pk) {
        Some(idx) => stored
            .rows()
            .iter()
            .filter_map(|row| row[idx].as_key().map(|k| (k, row)))
            .collect(),
        None => HashMap::new(),
    };

    let size = store.partition_size();
    let computed: BTreeSet<i64> = store
        .list_partitions()
        .await?
        .into_iter()
        .map(|p| p.index)
        .collect();
    let mut coverage = KeyCoverage::default();
    for key in requested {
        if stored_by_key.contains_key(&key) {
            coverage.present.insert(key);
        } else if result.unpartitioned_read || computed.contains(&partition_index(key, size)) {
            coverage.missing.insert(key);
        } else {
            coverage.not_computed.insert(key);
        }
    }

    if stored_by_key.is_empty() {
        return Ok(pass_through(input, coverage));
    }

    let joined: Vec<(usize, Column)> = stored
        .schema()
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name != pk && !input.schema().contains(&c.name))
        .map(|(i, c)| (i, c.clone()))
        .collect();

    let mut columns = input.schema().columns().to_vec();
    columns.extend(joined.iter().map(|(_, c)| c.clone()));
    let schema = Schema::new(columns)?;

    let rows = input
        .rows()
        .iter()
        .map(|row| {
            let hit = row[pk_idx].as_key().and_then(|k| stored_by_key.get(&k));
            let mut out = row.clone();
            out.extend(joined.iter().map(|(i, _)| match hit {
                Some(stored_row) => stored_row[*i].clone(),
                None => Value::Null,
            }));
            out
        })
        .collect();

    Ok(Applied {
        frame: Frame::from_rows(schema, rows)?,
        coverage,
        passed_through: false,
    })
}

fn pass_through(frame: Frame, coverage: KeyCoverage) -> Applied {
    Applied {
        frame,
        coverage,
        passed_through: true,
    }
}
