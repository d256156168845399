//! Catalog state shared by the in-memory and file backends

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CatalogError, DatasetRecord, ErrorRecord, FeatureRecord, NewFeature};
use crate::feature::WorkflowStatus;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(super) struct CatalogState {
    datasets: BTreeMap<Uuid, DatasetRecord>,
    features: BTreeMap<Uuid, FeatureRecord>,
    errors: Vec<ErrorRecord>,
}

fn check_transition(from: WorkflowStatus, to: WorkflowStatus) -> Result<(), CatalogError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CatalogError::InvalidTransition { from, to })
    }
}

impl CatalogState {
    pub fn create_dataset(&mut self, name: &str) -> DatasetRecord {
        let now = Utc::now();
        let record = DatasetRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
            status: WorkflowStatus::Pending,
            fit_at: None,
            created_at: now,
            updated_at: now,
        };
        self.datasets.insert(record.id, record.clone());
        record
    }

    pub fn create_feature(&mut self, new: NewFeature) -> Result<FeatureRecord, CatalogError> {
        self.dataset(new.dataset_id)?;
        if self
            .features
            .values()
            .any(|f| f.dataset_id == new.dataset_id && f.name == new.name)
        {
            return Err(CatalogError::DuplicateFeature {
                dataset_id: new.dataset_id,
                name: new.name,
            });
        }

        let now = Utc::now();
        let record = FeatureRecord {
            id: Uuid::now_v7(),
            dataset_id: new.dataset_id,
            name: new.name,
            feature_key: new.feature_key,
            version: new.version,
            position: new.position,
            primary_key: new.primary_key,
            batch_size: new.batch_size,
            status: WorkflowStatus::Pending,
            needs_fit: true,
            fit_at: None,
            created_at: now,
            updated_at: now,
        };
        self.features.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn dataset(&self, dataset_id: Uuid) -> Result<DatasetRecord, CatalogError> {
        self.datasets
            .get(&dataset_id)
            .cloned()
            .ok_or(CatalogError::DatasetNotFound(dataset_id))
    }

    pub fn find_dataset(&self, name: &str) -> Option<DatasetRecord> {
        self.datasets.values().find(|d| d.name == name).cloned()
    }

    pub fn feature(&self, feature_id: Uuid) -> Result<FeatureRecord, CatalogError> {
        self.features
            .get(&feature_id)
            .cloned()
            .ok_or(CatalogError::FeatureNotFound(feature_id))
    }

    pub fn features(&self, dataset_id: Uuid) -> Result<Vec<FeatureRecord>, CatalogError> {
        self.dataset(dataset_id)?;
        let mut features: Vec<FeatureRecord> = self
            .features
            .values()
            .filter(|f| f.dataset_id == dataset_id)
            .cloned()
            .collect();
        features.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        Ok(features)
    }

    pub fn features_needing_recompute(
        &self,
        dataset_id: Uuid,
    ) -> Result<Vec<FeatureRecord>, CatalogError> {
        Ok(self
            .features(dataset_id)?
            .into_iter()
            .filter(FeatureRecord::needs_recompute)
            .collect())
    }

    pub fn mark_workflow_status(
        &mut self,
        dataset_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError> {
        let dataset = self
            .datasets
            .get_mut(&dataset_id)
            .ok_or(CatalogError::DatasetNotFound(dataset_id))?;
        if dataset.status == status {
            return Ok(());
        }
        check_transition(dataset.status, status)?;
        dataset.status = status;
        dataset.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_feature_status(
        &mut self,
        feature_id: Uuid,
        status: WorkflowStatus,
    ) -> Result<(), CatalogError> {
        let feature = self
            .features
            .get_mut(&feature_id)
            .ok_or(CatalogError::FeatureNotFound(feature_id))?;
        if feature.status == status {
            return Ok(());
        }
        check_transition(feature.status, status)?;
        let now = Utc::now();
        feature.status = status;
        feature.updated_at = now;
        if status == WorkflowStatus::Ready {
            feature.needs_fit = false;
            feature.fit_at = Some(now);
        }
        Ok(())
    }

    pub fn after_all_features_fit(&mut self, dataset_id: Uuid) -> Result<(), CatalogError> {
        let dataset = self
            .datasets
            .get_mut(&dataset_id)
            .ok_or(CatalogError::DatasetNotFound(dataset_id))?;
        let now = Utc::now();
        dataset.fit_at = Some(now);
        dataset.updated_at = now;
        Ok(())
    }

    pub fn record_error(&mut self, error: ErrorRecord) -> Result<(), CatalogError> {
        self.dataset(error.dataset_id)?;
        self.errors.push(error);
        Ok(())
    }

    pub fn errors(&self, dataset_id: Uuid) -> Result<Vec<ErrorRecord>, CatalogError> {
        self.dataset(dataset_id)?;
        Ok(self
            .errors
            .iter()
            .filter(|e| e.dataset_id == dataset_id)
            .cloned()
            .collect())
    }

    pub fn reset_feature(&mut self, feature_id: Uuid) -> Result<(), CatalogError> {
        let feature = self
            .features
            .get_mut(&feature_id)
            .ok_or(CatalogError::FeatureNotFound(feature_id))?;
        feature.status = WorkflowStatus::Pending;
        feature.needs_fit = true;
        feature.updated_at = Utc::now();
        Ok(())
    }

    pub fn reset_dataset(&mut self, dataset_id: Uuid) -> Result<(), CatalogError> {
        let now = Utc::now();
        let dataset = self
            .datasets
            .get_mut(&dataset_id)
            .ok_or(CatalogError::DatasetNotFound(dataset_id))?;
        dataset.status = WorkflowStatus::Pending;
        dataset.updated_at = now;

        for feature in self
            .features
            .values_mut()
            .filter(|f| f.dataset_id == dataset_id && f.status == WorkflowStatus::Failed)
        {
            feature.status = WorkflowStatus::Pending;
            feature.needs_fit = true;
            feature.updated_at = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_ordered_by_position_then_name() {
        let mut state = CatalogState::default();
        let ds = state.create_dataset("houses");
        state
            .create_feature(NewFeature::new(ds.id, "zeta", "k", 1))
            .unwrap();
        state
            .create_feature(NewFeature::new(ds.id, "alpha", "k", 1))
            .unwrap();
        state
            .create_feature(NewFeature::new(ds.id, "first", "k", 0))
            .unwrap();

        let names: Vec<_> = state
            .features(ds.id)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["first", "alpha", "zeta"]);
    }

    #[test]
    fn test_ready_clears_needs_fit() {
        let mut state = CatalogState::default();
        let ds = state.create_dataset("houses");
        let f = state
            .create_feature(NewFeature::new(ds.id, "f", "k", 0))
            .unwrap();

        state
            .mark_feature_status(f.id, WorkflowStatus::Fitting)
            .unwrap();
        state.mark_feature_status(f.id, WorkflowStatus::Ready).unwrap();

        let f = state.feature(f.id).unwrap();
        assert!(!f.needs_fit);
        assert!(f.fit_at.is_some());
        assert!(state.features_needing_recompute(ds.id).unwrap().is_empty());
    }

    #[test]
    fn test_failed_requires_reset() {
        let mut state = CatalogState::default();
        let ds = state.create_dataset("houses");
        let f = state
            .create_feature(NewFeature::new(ds.id, "f", "k", 0))
            .unwrap();
        state.mark_feature_status(f.id, WorkflowStatus::Failed).unwrap();
        state
            .mark_workflow_status(ds.id, WorkflowStatus::Failed)
            .unwrap();

        assert!(matches!(
            state.mark_feature_status(f.id, WorkflowStatus::Fitting),
            Err(CatalogError::InvalidTransition { .. })
        ));

        state.reset_dataset(ds.id).unwrap();
        assert_eq!(state.dataset(ds.id).unwrap().status, WorkflowStatus::Pending);
        let f = state.feature(f.id).unwrap();
        assert_eq!(f.status, WorkflowStatus::Pending);
        assert!(f.needs_fit);
    }

    #[test]
    fn test_duplicate_feature_name() {
        let mut state = CatalogState::default();
        let ds = state.create_dataset("houses");
        state
            .create_feature(NewFeature::new(ds.id, "f", "k", 0))
            .unwrap();
        assert!(matches!(
            state.create_feature(NewFeature::new(ds.id, "f", "k", 1)),
            Err(CatalogError::DuplicateFeature { .. })
        ));
    }
}
