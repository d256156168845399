//! In-memory implementation of DatasetCatalog for testing

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::state::CatalogState;
use super::*;

/// In-memory implementation of DatasetCatalog
///
/// Provides the same semantics as [`FileCatalog`] without touching disk.
///
/// # Example
///
/// ```
/// use featurestore::InMemoryCatalog;
///
/// let catalog = InMemoryCatalog::new();
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    all_fit_calls: AtomicUsize,
}

impl InMemoryCatalog {
    /// Create a new in-memory catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `after_all_features_fit` calls so far
    pub fn all_fit_calls(&self) -> usize {
        self.all_fit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetCatalog for InMemoryCatalog {
    async fn create_dataset(&self, name: &str) -> Result<DatasetRecord, CatalogError> {
        Ok(self.state.write().create_dataset(name))
    }

    async fn create_feature(&self, feature: NewFeature) -> Result<FeatureRecord, CatalogError> {
        self.state.write().create_feature(feature)
    }

    async fn dataset(&self, dataset_id: Uuid) -> Result<DatasetRecord, CatalogError> {
        self.state.read().dataset(dataset_id)
    }

    async fn find_dataset(&self, name: &str) -> Result<Option<DatasetRecord>, CatalogError> {
        Ok(self.state.read().find_dataset(name))
    }

    async fn feature(&self, feature_id: Uuid) -> Result<FeatureRecord, CatalogError> {
        self.state.read().feature(feature_id)
    }

    async fn features(&self, dataset_id: Uuid) -> Result<Vec<FeatureRecord>, CatalogError> {
        self.state.read().features(dataset_id)
    }

    async fn features_needing_recompute(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<FeatureRecord>, CatalogError> {
        self.state.read().features_needing_recompute(dataset_id)
    }

    async fn mark_workflow_status(
        &self,
        dataset_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError> {
        self.state.write().mark_workflow_status(dataset_id, status)
    }

    async fn mark_feature_status(
        &self,
        feature_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError> {
        self.state.write().mark_feature_status(feature_id, status)
    }

    async fn after_all_features_fit(&self, dataset_id: Uuid) -> Result<(), CatalogError> {
        self.state.write().after_all_features_fit(dataset_id)?;
        self.all_fit_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn record_error(&self, error: ErrorRecord) -> Result<(), CatalogError> {
        self.state.write().record_error(error)
    }

    async fn errors(&self, dataset_id: Uuid) -> Result<Vec<ErrorRecord>, CatalogError> {
        self.state.read().errors(dataset_id)
    }

    async fn reset_feature(&self, feature_id: Uuid) -> Result<(), CatalogError> {
        self.state.write().reset_feature(feature_id)
    }

    async fn reset_dataset(&self, dataset_id: Uuid) -> Result<(), CatalogError> {
        self.state.write().reset_dataset(dataset_id)
    }
}
