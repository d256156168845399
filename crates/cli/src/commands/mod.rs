// Shared command context and argument resolution

pub mod batches;
pub mod datasets;
pub mod store;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use featurestore::catalog::{DatasetRecord, FeatureRecord};
use featurestore::{
    DatasetCatalog, FeatureLocation, FeatureStoreConfig, FeatureStoreRoot, FileCatalog,
    PartitionedStore,
};
use uuid::Uuid;

use crate::output::OutputFormat;

/// Everything a command needs: resolved config and output settings
pub struct Context {
    pub config: FeatureStoreConfig,
    pub output: OutputFormat,
    pub quiet: bool,
}

impl Context {
    pub fn load(
        config: Option<&Path>,
        root: Option<PathBuf>,
        output: OutputFormat,
        quiet: bool,
    ) -> Result<Self> {
        let mut config = FeatureStoreConfig::load(config).context("Failed to load config")?;
        if let Some(root) = root {
            config = config.with_root_dir(root);
        }
        tracing::debug!(root = %config.root_dir.display(), "Loaded config");
        Ok(Self {
            config,
            output,
            quiet,
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root_dir
    }

    pub async fn catalog(&self) -> Result<FileCatalog> {
        FileCatalog::open(self.root())
            .await
            .with_context(|| format!("Failed to open catalog under {}", self.root().display()))
    }

    /// Open the store named by `args`, filling gaps from the catalog record
    pub async fn store(&self, args: &LocationArgs) -> Result<PartitionedStore> {
        let catalog = self.catalog().await?;
        let record = find_feature(&catalog, &args.dataset, &args.feature).await?;
        let location = args.resolve(record.as_ref(), self.config.default_partition_size);
        Ok(FeatureStoreRoot::new(self.root()).open(location))
    }
}

/// Identifies one feature version on disk
#[derive(Args, Debug, Clone)]
pub struct LocationArgs {
    /// Dataset name
    #[arg(long, short)]
    pub dataset: String,

    /// Feature name
    #[arg(long, short)]
    pub feature: String,

    /// Feature version (defaults to the catalog's, else v1)
    #[arg(long)]
    pub version: Option<String>,

    /// Primary key column (defaults to the catalog's)
    #[arg(long)]
    pub primary_key: Option<String>,

    /// Partition size (defaults to the feature's batch size, else the configured default)
    #[arg(long)]
    pub partition_size: Option<u64>,
}

impl LocationArgs {
    fn resolve(&self, record: Option<&(String, FeatureRecord)>, default_size: u64) -> FeatureLocation {
        let (dataset, version, primary_key, size) = match record {
            Some((dataset, f)) => (
                dataset.clone(),
                self.version.clone().unwrap_or_else(|| f.version.clone()),
                self.primary_key.clone().or_else(|| f.primary_key.clone()),
                self.partition_size.unwrap_or_else(|| f.partition_size(default_size)),
            ),
            None => (
                self.dataset.clone(),
                self.version.clone().unwrap_or_else(|| "v1".to_string()),
                self.primary_key.clone(),
                self.partition_size.unwrap_or(default_size),
            ),
        };
        let location = FeatureLocation::new(dataset, &self.feature, version).with_partition_size(size);
        match primary_key {
            Some(pk) => location.with_primary_key(pk),
            None => location,
        }
    }
}

/// Dataset by ID or name
pub async fn find_dataset(catalog: &FileCatalog, dataset: &str) -> Result<DatasetRecord> {
    if let Ok(id) = dataset.parse::<Uuid>() {
        return catalog
            .dataset(id)
            .await
            .with_context(|| format!("Dataset not found: {dataset}"));
    }
    catalog
        .find_dataset(dataset)
        .await?
        .with_context(|| format!("Dataset not found: {dataset}"))
}

async fn find_feature(
    catalog: &FileCatalog,
    dataset: &str,
    feature: &str,
) -> Result<Option<(String, FeatureRecord)>> {
    let Some(ds) = catalog.find_dataset(dataset).await? else {
        return Ok(None);
    };
    Ok(catalog
        .features(ds.id)
        .await?
        .into_iter()
        .find(|f| f.name == feature)
        .map(|f| (ds.name.clone(), f)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> LocationArgs {
        LocationArgs {
            dataset: "homes".into(),
            feature: "ratio".into(),
            version: None,
            primary_key: None,
            partition_size: None,
        }
    }

    #[test]
    fn test_resolve_without_catalog_record() {
        let location = args().resolve(None, 10_000);
        assert_eq!(location.version, "v1");
        assert_eq!(location.partition_size, 10_000);
        assert_eq!(location.primary_key, None);
    }

    #[tokio::test]
    async fn test_resolve_fills_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::open(dir.path()).await.unwrap();
        let ds = catalog.create_dataset("homes").await.unwrap();
        catalog
            .create_feature(
                featurestore::catalog::NewFeature::new(ds.id, "ratio", "price_ratio", 0)
                    .with_primary_key("id")
                    .with_batch_size(25)
                    .with_version("v3"),
            )
            .await
            .unwrap();

        let record = find_feature(&catalog, "homes", "ratio").await.unwrap();
        let location = args().resolve(record.as_ref(), 10_000);
        assert_eq!(location.version, "v3");
        assert_eq!(location.partition_size, 25);
        assert_eq!(location.primary_key.as_deref(), Some("id"));

        let mut overridden = args();
        overridden.version = Some("v4".into());
        assert_eq!(overridden.resolve(record.as_ref(), 10_000).version, "v4");
    }
}
