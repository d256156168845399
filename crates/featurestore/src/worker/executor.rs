//! Execution of a single batch unit

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::catalog::ErrorKind;
use crate::coordinator::{BatchCoordinator, BatchUnit, UnitFailure, UnitOutcome};
use crate::datasource::DataSourceRegistry;
use crate::feature::{Feature, FeatureDescriptor, FeatureError, FeatureRegistry, FitContext};
use crate::frame::Frame;
use crate::store::FeatureStoreRoot;

/// Executes units and reports their outcome to the coordinator
///
/// No error or panic raised while running a unit escapes [`Worker::execute`].
pub struct Worker {
    id: String,
    registry: Arc<FeatureRegistry>,
    sources: DataSourceRegistry,
    stores: FeatureStoreRoot,
    coordinator: Arc<BatchCoordinator>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        registry: Arc<FeatureRegistry>,
        sources: DataSourceRegistry,
        stores: FeatureStoreRoot,
        coordinator: Arc<BatchCoordinator>,
    ) -> Self {
        Self {
            id: id.into(),
            registry,
            sources,
            stores,
            coordinator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run one unit and report the outcome
    #[instrument(
        skip(self, unit),
        fields(
            worker_id = %self.id,
            batch_id = %unit.batch_id,
            unit_number = unit.unit_number,
            feature = %unit.feature_name
        )
    )]
    pub async fn execute(&self, unit: BatchUnit) {
        let outcome = match AssertUnwindSafe(self.run(&unit)).catch_unwind().await {
            Ok(Ok(rows_written)) => {
                debug!(rows_written, "Unit succeeded");
                UnitOutcome::Succeeded { rows_written }
            }
            Ok(Err(failure)) => UnitOutcome::Failed(failure),
            Err(payload) => UnitOutcome::Failed(UnitFailure::new(
                ErrorKind::Computation,
                format!("unit panicked: {}", panic_message(payload.as_ref())),
            )),
        };
        self.coordinator.report(&unit, outcome).await;
    }

    async fn run(&self, unit: &BatchUnit) -> Result<usize, UnitFailure> {
        let feature = self
            .registry
            .get(&unit.feature_key)
            .map_err(|e| UnitFailure::from_error(ErrorKind::Computation, &e))?;
        let source = self
            .sources
            .get(unit.dataset_id)
            .map_err(|e| UnitFailure::from_error(ErrorKind::Computation, &e))?;
        let slice = source
            .load(&unit.selection)
            .await
            .map_err(|e| UnitFailure::from_error(ErrorKind::Computation, &e))?;

        let descriptor = descriptor(unit);
        let context = FitContext::new(
            unit.dependencies
                .iter()
                .map(|d| (d.name.clone(), self.stores.open_read_only(d.location.clone())))
                .collect::<HashMap<_, _>>(),
        );

        let fit = AssertUnwindSafe(feature.fit(slice.clone(), &descriptor, &context))
            .catch_unwind()
            .await;
        let output = match fit {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                return Err(UnitFailure::from_error(failure_kind(&e), &e).with_slice(slice));
            }
            Err(payload) => {
                warn!("fit panicked");
                return Err(UnitFailure::new(
                    ErrorKind::Computation,
                    format!("fit panicked: {}", panic_message(payload.as_ref())),
                )
                .with_slice(slice));
            }
        };

        if let Err(message) = validate_output(feature.as_ref(), &descriptor, &output) {
            return Err(UnitFailure::new(ErrorKind::Validation, message).with_slice(output));
        }

        let store = self
            .stores
            .open(unit.store.clone())
            .with_schema(output.schema().clone());
        let summary = store
            .write(&output)
            .await
            .map_err(|e| UnitFailure::from_error(ErrorKind::StoreIo, &e).with_slice(output.clone()))?;
        Ok(summary.rows_written)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}

fn descriptor(unit: &BatchUnit) -> FeatureDescriptor {
    FeatureDescriptor {
        dataset_id: unit.dataset_id,
        feature_id: unit.feature_id,
        dataset: unit.store.dataset.clone(),
        name: unit.feature_name.clone(),
        version: unit.store.version.clone(),
        primary_key: unit.store.primary_key.clone(),
        batch_size: unit.store.partition_size,
    }
}

fn failure_kind(error: &FeatureError) -> ErrorKind {
    match error {
        FeatureError::Validation(_) => ErrorKind::Validation,
        FeatureError::Store(_) => ErrorKind::StoreIo,
        _ => ErrorKind::Computation,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Check `output` holds the primary key plus exactly the declared columns
pub fn validate_output(
    feature: &dyn Feature,
    descriptor: &FeatureDescriptor,
    output: &Frame,
) -> Result<(), String> {
    let declared = feature.computes_columns();
    let schema = output.schema();
    let mut problems = Vec::new();

    if let Some(pk) = &descriptor.primary_key {
        if !schema.contains(pk) {
            problems.push(format!("missing primary key column '{pk}'"));
        }
    }
    for column in &declared {
        match schema.column(&column.name) {
            None => problems.push(format!("missing column '{}'", column.name)),
            Some(actual) if actual.data_type != column.data_type => problems.push(format!(
                "column '{}' is {}, declared {}",
                column.name, actual.data_type, column.data_type
            )),
            Some(_) => {}
        }
    }
    for name in schema.names() {
        let is_pk = descriptor.primary_key.as_deref() == Some(name);
        if !is_pk && !declared.iter().any(|c| c.name == name) {
            problems.push(format!("undeclared column '{name}'"));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetCatalog, InMemoryCatalog, NewFeature};
    use crate::coordinator::{AfterBatchHook, BatchId, CompletedBatch, InMemoryBatchArgsStore};
    use crate::datasource::{InMemoryDataSource, KeySelection};
    use crate::feature::WorkflowStatus;
    use crate::frame::{Column, DataType, Schema, Value};
    use crate::store::{FeatureLocation, KeyPredicate};
    use crate::transport::InMemoryJobQueue;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct Doubled;

    #[async_trait]
    impl Feature for Doubled {
        fn computes_columns(&self) -> Vec<Column> {
            vec![Column::new("doubled", DataType::Int64)]
        }

        async fn fit(
            &self,
            slice: Frame,
            _descriptor: &FeatureDescriptor,
            _context: &FitContext,
        ) -> Result<Frame, FeatureError> {
            let schema = Schema::new(vec![
                Column::new("id", DataType::Int64),
                Column::new("doubled", DataType::Int64),
            ])?;
            let rows = slice
                .rows()
                .iter()
                .map(|r| vec![r[0].clone(), Value::Int64(r[1].as_i64().unwrap_or(0) * 2)])
                .collect();
            Ok(Frame::from_rows(schema, rows)?)
        }
    }

    struct Sloppy;

    #[async_trait]
    impl Feature for Sloppy {
        fn computes_columns(&self) -> Vec<Column> {
            vec![Column::new("doubled", DataType::Int64)]
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

    struct Panics;

    #[async_trait]
    impl Feature for Panics {
        fn computes_columns(&self) -> Vec<Column> {
            vec![]
        }

        async fn fit(
            &self,
            _slice: Frame,
            _descriptor: &FeatureDescriptor,
            _context: &FitContext,
        ) -> Result<Frame, FeatureError> {
            panic!("exploded");
        }
    }

    struct NoopHook;

    #[async_trait]
    impl AfterBatchHook for NoopHook {
        async fn after_batch(&self, _batch: CompletedBatch) {}
    }

    struct Harness {
        _dir: tempfile::TempDir,
        catalog: Arc<InMemoryCatalog>,
        coordinator: Arc<BatchCoordinator>,
        worker: Worker,
        stores: FeatureStoreRoot,
        dataset_id: Uuid,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        let ds = catalog.create_dataset("numbers").await.unwrap();
        catalog
            .mark_workflow_status(ds.id, WorkflowStatus::Fitting)
            .await
            .unwrap();

        let mut registry = FeatureRegistry::new();
        registry.register_instance("doubled", Arc::new(Doubled)).unwrap();
        registry.register_instance("sloppy", Arc::new(Sloppy)).unwrap();
        registry.register_instance("panics", Arc::new(Panics)).unwrap();

        let schema = Schema::new(vec![
            Column::new("id", DataType::Int64),
            Column::new("n", DataType::Int64),
        ])
        .unwrap();
        let rows = (0..20).map(|i| vec![Value::Int64(i), Value::Int64(i)]).collect();
        let sources = DataSourceRegistry::new();
        sources.register(
            ds.id,
            Arc::new(InMemoryDataSource::new(Frame::from_rows(schema, rows).unwrap())),
        );

        let stores = FeatureStoreRoot::new(dir.path());
        let coordinator = Arc::new(BatchCoordinator::new(
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(InMemoryBatchArgsStore::new()),
            catalog.clone(),
        ));
        let worker = Worker::new(
            "w-1",
            Arc::new(registry),
            sources,
            stores.clone(),
            coordinator.clone(),
        );
        Harness {
            _dir: dir,
            catalog,
            coordinator,
            worker,
            stores,
            dataset_id: ds.id,
        }
    }

    async fn unit_for(h: &Harness, key: &str) -> BatchUnit {
        let f = h
            .catalog
            .create_feature(NewFeature::new(h.dataset_id, key, key, 0).with_primary_key("id"))
            .await
            .unwrap();
        h.catalog
            .mark_feature_status(f.id, WorkflowStatus::Fitting)
            .await
            .unwrap();
        let batch_id = BatchId::generate(key);
        let unit = BatchUnit {
            dataset_id: h.dataset_id,
            feature_id: f.id,
            feature_name: key.into(),
            feature_key: key.into(),
            position: 0,
            batch_id: batch_id.clone(),
            unit_number: 0,
            selection: KeySelection::Range {
                column: "id".into(),
                start: 5,
                end: 14,
            },
            store: FeatureLocation::new("numbers", key, "v1")
                .with_primary_key("id")
                .with_partition_size(10),
            dependencies: vec![],
        };
        h.coordinator
            .enqueue_batch(batch_id, vec![unit.clone()], Arc::new(NoopHook))
            .await
            .unwrap();
        unit
    }

    #[tokio::test]
    async fn test_successful_unit_writes_store() {
        let h = harness().await;
        let unit = unit_for(&h, "doubled").await;

        h.worker.execute(unit.clone()).await;

        let store = h.stores.open(unit.store.clone());
        let rows = store.query(&KeyPredicate::All).await.unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(store.list_partitions().await.unwrap().len(), 2);
        assert!(h.catalog.errors(h.dataset_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let h = harness().await;
        let unit = unit_for(&h, "doubled").await;
        h.worker.execute(unit.clone()).await;
        let store = h.stores.open(unit.store.clone());
        let first = store.query(&KeyPredicate::All).await.unwrap();

        h.worker.execute(unit.clone()).await;
        assert_eq!(store.query(&KeyPredicate::All).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_validation_failure_is_recorded() {
        let h = harness().await;
        let unit = unit_for(&h, "sloppy").await;

        h.worker.execute(unit.clone()).await;

        let errors = h.catalog.errors(h.dataset_id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Validation);
        assert!(errors[0].message.contains("missing column 'doubled'"));
        assert!(errors[0].message.contains("undeclared column 'n'"));
        assert_eq!(errors[0].slice.as_ref().map(Frame::len), Some(10));
        assert_eq!(
            h.catalog.feature(unit.feature_id).await.unwrap().status,
            WorkflowStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let h = harness().await;
        let unit = unit_for(&h, "panics").await;

        h.worker.execute(unit).await;

        let errors = h.catalog.errors(h.dataset_id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Computation);
        assert!(errors[0].message.contains("exploded"));
        assert!(errors[0].slice.is_some());
        assert_eq!(
            h.catalog.dataset(h.dataset_id).await.unwrap().status,
            WorkflowStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unknown_feature_key_fails_unit() {
        let h = harness().await;
        let mut unit = unit_for(&h, "doubled").await;
        unit.feature_key = "nope".into();

        h.worker.execute(unit).await;

        let errors = h.catalog.errors(h.dataset_id).await.unwrap();
        assert!(errors[0].message.contains("unknown feature: nope"));
    }
}
