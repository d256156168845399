//! JSON-file implementation of DatasetCatalog
//!
//! The whole catalog is one JSON document, rewritten atomically after every
//! mutation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::state::CatalogState;
use super::*;

/// File name of the catalog under the store root
pub const CATALOG_FILE: &str = "catalog.json";

/// Catalog persisted as `<root>/catalog.json`
#[derive(Debug)]
pub struct FileCatalog {
    path: PathBuf,
    state: Mutex<CatalogState>,
}

impl FileCatalog {
    /// Open the catalog under `root`, starting empty if the file does not exist
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = root.as_ref().join(CATALOG_FILE);
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CatalogError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogState::default(),
            Err(source) => return Err(CatalogError::Io { path, source }),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &CatalogState) -> Result<(), CatalogError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CatalogError::Serialization(e.to_string()))?;
        let io = |source| CatalogError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        // unique per write: several processes may share the root
        let tmp = self
            .path
            .with_file_name(format!(".{CATALOG_FILE}.{}.tmp", Uuid::now_v7().simple()));
        let result = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;
        if let Err(source) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io(source));
        }

        debug!(path = %self.path.display(), "Catalog persisted");
        Ok(())
    }

    /// Apply a mutation and persist the result
    ///
    /// The in-memory state only changes if the write succeeds.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CatalogState) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl DatasetCatalog for FileCatalog {
    async fn create_dataset(&self, name: &str) -> Result<DatasetRecord, CatalogError> {
        self.mutate(|s| Ok(s.create_dataset(name))).await
    }

    async fn create_feature(&self, feature: NewFeature) -> Result<FeatureRecord, CatalogError> {
        self.mutate(|s| s.create_feature(feature)).await
    }

    async fn dataset(&self, dataset_id: Uuid) -> Result<DatasetRecord, CatalogError> {
        self.state.lock().await.dataset(dataset_id)
    }

    async fn find_dataset(&self, name: &str) -> Result<Option<DatasetRecord>, CatalogError> {
        Ok(self.state.lock().await.find_dataset(name))
    }

    async fn feature(&self, feature_id: Uuid) -> Result<FeatureRecord, CatalogError> {
        self.state.lock().await.feature(feature_id)
    }

    async fn features(&self, dataset_id: Uuid) -> Result<Vec<FeatureRecord>, CatalogError> {
        self.state.lock().await.features(dataset_id)
    }

    async fn features_needing_recompute(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<FeatureRecord>, CatalogError> {
        self.state.lock().await.features_needing_recompute(dataset_id)
    }

    async fn mark_workflow_status(
        &self,
        dataset_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError> {
        self.mutate(|s| s.mark_workflow_status(dataset_id, status))
            .await
    }

    async fn mark_feature_status(
        &self,
        feature_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError> {
        self.mutate(|s| s.mark_feature_status(feature_id, status))
            .await
    }

    async fn after_all_features_fit(&self, dataset_id: Uuid) -> Result<(), CatalogError> {
        self.mutate(|s| s.after_all_features_fit(dataset_id)).await
    }

    async fn record_error(&self, error: ErrorRecord) -> Result<(), CatalogError> {
        self.mutate(|s| s.record_error(error)).await
    }

    async fn errors(&self, dataset_id: Uuid) -> Result<Vec<ErrorRecord>, CatalogError> {
        self.state.lock().await.errors(dataset_id)
    }

    async fn reset_feature(&self, feature_id: Uuid) -> Result<(), CatalogError> {
        self.mutate(|s| s.reset_feature(feature_id)).await
    }

    async fn reset_dataset(&self, dataset_id: Uuid) -> Result<(), CatalogError> {
        self.mutate(|s| s.reset_dataset(dataset_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::open(dir.path()).await.unwrap();
        let ds = catalog.create_dataset("houses").await.unwrap();
        let f = catalog
            .create_feature(NewFeature::new(ds.id, "ratio", "price_ratio", 0).with_batch_size(10))
            .await
            .unwrap();
        catalog
            .mark_feature_status(f.id, WorkflowStatus::Failed)
            .await
            .unwrap();
        catalog
            .record_error(ErrorRecord::new(ds.id, ErrorKind::Computation, "boom").with_feature(f.id))
            .await
            .unwrap();

        let reopened = FileCatalog::open(dir.path()).await.unwrap();
        let f2 = reopened.feature(f.id).await.unwrap();
        assert_eq!(f2.status, WorkflowStatus::Failed);
        assert_eq!(f2.batch_size, Some(10));
        assert_eq!(reopened.errors(ds.id).await.unwrap().len(), 1);
        assert!(dir.path().join(CATALOG_FILE).exists());
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::open(dir.path()).await.unwrap();
        let ds = catalog.create_dataset("houses").await.unwrap();
        catalog
            .mark_workflow_status(ds.id, WorkflowStatus::Failed)
            .await
            .unwrap();

        assert!(catalog
            .mark_workflow_status(ds.id, WorkflowStatus::Fitting)
            .await
            .is_err());
        assert_eq!(
            catalog.dataset(ds.id).await.unwrap().status,
            WorkflowStatus::Failed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_catalogs_sharing_a_root_persist_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let a = std::sync::Arc::new(FileCatalog::open(dir.path()).await.unwrap());
        let b = std::sync::Arc::new(FileCatalog::open(dir.path()).await.unwrap());

        let writes = (0..20).map(|i| {
            let catalog = if i % 2 == 0 { a.clone() } else { b.clone() };
            tokio::spawn(async move { catalog.create_dataset(&format!("ds{i}")).await })
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap().unwrap();
        }

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![CATALOG_FILE.to_string()]);
        assert!(FileCatalog::open(dir.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(CATALOG_FILE), b"{not json")
            .await
            .unwrap();
        assert!(matches!(
            FileCatalog::open(dir.path()).await,
            Err(CatalogError::Serialization(_))
        ));
    }
}
