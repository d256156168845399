//! Turning a feature record into batch units

use tracing::debug;

use crate::catalog::FeatureRecord;
use crate::coordinator::{BatchId, BatchUnit, DependencyRef};
use crate::datasource::{DataSourceRegistry, KeySelection};
use crate::feature::{Feature, FeatureDescriptor};
use crate::store::FeatureLocation;

use super::SchedulerError;

/// Store location of a feature's output
pub(crate) fn location(dataset: &str, feature: &FeatureRecord, default_size: u64) -> FeatureLocation {
    let location = FeatureLocation::new(dataset, &feature.name, &feature.version)
        .with_partition_size(feature.partition_size(default_size));
    match &feature.primary_key {
        Some(pk) => location.with_primary_key(pk),
        None => location,
    }
}

pub(crate) fn descriptor(dataset: &str, feature: &FeatureRecord, default_size: u64) -> FeatureDescriptor {
    FeatureDescriptor {
        dataset_id: feature.dataset_id,
        feature_id: feature.id,
        dataset: dataset.to_string(),
        name: feature.name.clone(),
        version: feature.version.clone(),
        primary_key: feature.primary_key.clone(),
        batch_size: feature.partition_size(default_size),
    }
}

/// Resolve declared dependencies against the dataset's features
///
/// A dependency must exist and sit at a strictly lower position.
pub(crate) fn resolve_dependencies(
    dataset: &str,
    feature: &FeatureRecord,
    names: &[String],
    features: &[FeatureRecord],
    default_size: u64,
) -> Result<Vec<DependencyRef>, SchedulerError> {
    names
        .iter()
        .map(|name| {
            let upstream = features
                .iter()
                .find(|f| &f.name == name)
                .ok_or_else(|| SchedulerError::Dependency {
                    feature: feature.name.clone(),
                    dependency: name.clone(),
                    reason: "no such feature in dataset".into(),
                })?;
            if upstream.position >= feature.position {
                return Err(SchedulerError::Dependency {
                    feature: feature.name.clone(),
                    dependency: name.clone(),
                    reason: format!(
                        "position {} is not before {}",
                        upstream.position, feature.position
                    ),
                });
            }
            Ok(DependencyRef {
                name: name.clone(),
                location: location(dataset, upstream, default_size),
            })
        })
        .collect()
}

/// Key selections of a feature's units
///
/// A batchable feature with a primary key gets one selection per key group,
/// possibly none. Any other feature runs as a single unit over the whole
/// dataset, since its output is one file that each write replaces.
pub(crate) async fn selections(
    implementation: &dyn Feature,
    sources: &DataSourceRegistry,
    descriptor: &FeatureDescriptor,
) -> Result<Vec<KeySelection>, SchedulerError> {
    if !implementation.batchable() {
        return Ok(vec![KeySelection::All]);
    }
    let Some(primary_key) = descriptor.primary_key.clone() else {
        debug!(feature = %descriptor.name, "No primary key, running as a single unit");
        return Ok(vec![KeySelection::All]);
    };
    let column = implementation.batch_key().unwrap_or(primary_key);
    let source = sources.get(descriptor.dataset_id)?;
    let groups = implementation.batch(source.as_ref(), descriptor).await?;
    Ok(groups.iter().map(|g| g.selection(&column)).collect())
}

pub(crate) fn units(
    feature: &FeatureRecord,
    batch_id: &BatchId,
    selections: Vec<KeySelection>,
    store: &FeatureLocation,
    dependencies: &[DependencyRef],
) -> Vec<BatchUnit> {
    selections
        .into_iter()
        .enumerate()
        .map(|(n, selection)| BatchUnit {
            dataset_id: feature.dataset_id,
            feature_id: feature.id,
            feature_name: feature.name.clone(),
            feature_key: feature.feature_key.clone(),
            position: feature.position,
            batch_id: batch_id.clone(),
            unit_number: n as u32,
            selection,
            store: store.clone(),
            dependencies: dependencies.to_vec(),
        })
        .collect()
}
