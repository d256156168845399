//! Feature trait definition

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datasource::{DataSource, DataSourceError, KeySelection};
use crate::frame::{Column, Frame, FrameError, Schema};
use crate::store::{apply_stored, Applied, PartitionedStore, StoreError};

/// Error type for feature computation
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    /// `fit` or `batch` failed
    #[error("computation failed: {0}")]
    Computation(String),

    /// Output does not match the declared columns
    #[error("validation failed: {0}")]
    Validation(String),

    /// Declared dependency is not available to this unit
    #[error("dependency not available: {0}")]
    Dependency(String),

    #[error(transparent)]
    Source(#[from] DataSourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl FeatureError {
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// A disjoint group of keys handled by one batch unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyGroup {
    /// `start <= key <= end`
    Range { start: i64, end: i64 },
    /// An explicit key set
    Keys { keys: Vec<i64> },
}

impl KeyGroup {
    /// Split keys into contiguous ranges of at most `batch_size` distinct keys
    pub fn chunk(keys: impl IntoIterator<Item = i64>, batch_size: u64) -> Vec<KeyGroup> {
        let mut keys: Vec<i64> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        let size = usize::try_from(batch_size.max(1)).unwrap_or(usize::MAX);
        keys.chunks(size)
            .filter_map(|chunk| match (chunk.first(), chunk.last()) {
                (Some(start), Some(end)) => Some(KeyGroup::Range {
                    start: *start,
                    end: *end,
                }),
                _ => None,
            })
            .collect()
    }

    /// Row selection on `column` for this group
    pub fn selection(&self, column: &str) -> KeySelection {
        match self {
            Self::Range { start, end } => KeySelection::Range {
                column: column.to_string(),
                start: *start,
                end: *end,
            },
            Self::Keys { keys } => KeySelection::Keys {
                column: column.to_string(),
                keys: keys.clone(),
            },
        }
    }
}

/// Identity and storage layout of a feature, as seen by its implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureDescriptor {
    pub dataset_id: Uuid,
    pub feature_id: Uuid,
    pub dataset: String,
    pub name: String,
    pub version: String,
    pub primary_key: Option<String>,
    /// Declared batch size, or the store default
    pub batch_size: u64,
}

/// Read-only handles on the stores of declared dependencies
#[derive(Debug, Clone, Default)]
pub struct FitContext {
    dependencies: HashMap<String, PartitionedStore>,
}

impl FitContext {
    pub fn new(dependencies: HashMap<String, PartitionedStore>) -> Self {
        Self { dependencies }
    }

    /// Store of a declared dependency, by feature name
    pub fn dependency(&self, name: &str) -> Result<&PartitionedStore, FeatureError> {
        self.dependencies
            .get(name)
            .ok_or_else(|| FeatureError::Dependency(name.to_string()))
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }
}

/// A feature computes additional columns for a dataset
///
/// Implementations are stateless; every call receives the descriptor of the
/// feature record it runs for.
///
/// # Example
///
/// ```ignore
/// use featurestore::prelude::*;
///
/// #[derive(Default)]
/// struct PriceRatio;
///
/// #[async_trait]
/// impl Feature for PriceRatio {
///     fn computes_columns(&self) -> Vec<Column> {
///         vec![Column::new("price_ratio", DataType::Float64)]
///     }
///
///     async fn fit(&self, slice: Frame, _: &FeatureDescriptor, _: &FitContext)
///         -> Result<Frame, FeatureError> {
///         // ...
///     }
/// }
///
/// impl FeatureDefinition for PriceRatio {
///     const KEY: &'static str = "price_ratio";
/// }
/// ```
#[async_trait]
pub trait Feature: Send + Sync + 'static {
    /// Columns produced by `fit`, excluding the primary key
    fn computes_columns(&self) -> Vec<Column>;

    /// Names of features whose stores `fit` reads
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the scheduler should split this feature into key groups
    fn batchable(&self) -> bool {
        false
    }

    /// Column the key groups from `batch` refer to, defaults to the primary key
    fn batch_key(&self) -> Option<String> {
        None
    }

    /// Key groups for batched execution
    ///
    /// The default chunks the distinct values of the batch column into
    /// contiguous ranges of `batch_size` keys.
    async fn batch(
        &self,
        source: &dyn DataSource,
        descriptor: &FeatureDescriptor,
    ) -> Result<Vec<KeyGroup>, FeatureError> {
        let column = self
            .batch_key()
            .or_else(|| descriptor.primary_key.clone())
            .ok_or_else(|| {
                FeatureError::validation(format!(
                    "feature '{}' is batchable but has no batch key",
                    descriptor.name
                ))
            })?;
        let keys = source.distinct_keys(&column).await?;
        Ok(KeyGroup::chunk(keys, descriptor.batch_size))
    }

    /// Compute the feature for one slice of raw data
    ///
    /// The result must contain the primary key column (when declared) plus
    /// exactly the columns of `computes_columns`.
    async fn fit(
        &self,
        slice: Frame,
        descriptor: &FeatureDescriptor,
        context: &FitContext,
    ) -> Result<Frame, FeatureError>;

    /// Join stored output back onto raw data
    async fn transform(
        &self,
        input: Frame,
        _descriptor: &FeatureDescriptor,
        store: &PartitionedStore,
    ) -> Result<Applied, FeatureError> {
        Ok(apply_stored(input, store).await?)
    }
}

/// A feature with a stable registry key
pub trait FeatureDefinition: Feature + Default {
    /// Registry key, stored on feature records
    const KEY: &'static str;
}

/// Schema a feature's stored output must have
///
/// The primary key column takes the type it has in `sample` and defaults to
/// Int64 when the sample lacks it.
pub fn output_schema(
    feature: &dyn Feature,
    descriptor: &FeatureDescriptor,
    sample: Option<&Schema>,
) -> Result<Schema, FrameError> {
    let mut columns = Vec::new();
    if let Some(pk) = &descriptor.primary_key {
        let data_type = sample
            .and_then(|s| s.column(pk))
            .map(|c| c.data_type)
            .unwrap_or(crate::frame::DataType::Int64);
        columns.push(Column::new(pk.clone(), data_type));
    }
    columns.extend(feature.computes_columns());
    Schema::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataType;

    #[test]
    fn test_chunk_contiguous_ranges() {
        let groups = KeyGroup::chunk([7, 1, 3, 3, 9, 2], 2);
        assert_eq!(
            groups,
            vec![
                KeyGroup::Range { start: 1, end: 2 },
                KeyGroup::Range { start: 3, end: 7 },
                KeyGroup::Range { start: 9, end: 9 },
            ]
        );
    }

    #[test]
    fn test_chunk_empty() {
        assert!(KeyGroup::chunk(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_selection_on_column() {
        let selection = KeyGroup::Range { start: 1, end: 5 }.selection("company_id");
        assert_eq!(selection.column(), Some("company_id"));
        assert!(selection.matches(Some(5)));
        assert!(!selection.matches(Some(6)));
    }

    struct Ratio;

    #[async_trait]
    impl Feature for Ratio {
        fn computes_columns(&self) -> Vec<Column> {
            vec![Column::new("ratio", DataType::Float64)]
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

    #[test]
    fn test_output_schema_includes_primary_key() {
        let descriptor = FeatureDescriptor {
            dataset_id: Uuid::now_v7(),
            feature_id: Uuid::now_v7(),
            dataset: "d".into(),
            name: "ratio".into(),
            version: "v1".into(),
            primary_key: Some("id".into()),
            batch_size: 10,
        };
        let schema = output_schema(&Ratio, &descriptor, None).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["id", "ratio"]);
        assert_eq!(schema.column("id").unwrap().data_type, DataType::Int64);
    }

    #[test]
    fn test_missing_dependency() {
        let context = FitContext::default();
        assert!(matches!(
            context.dependency("upstream"),
            Err(FeatureError::Dependency(_))
        ));
    }
}
