//! Batch units and batch identifiers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ErrorKind;
use crate::datasource::KeySelection;
use crate::frame::Frame;
use crate::store::{path_segment, FeatureLocation};

/// Name of a group of units dispatched together
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Fresh id of the form `batch_<feature>_<uuid>`
    pub fn generate(feature_name: &str) -> Self {
        Self(format!(
            "batch_{}_{}",
            path_segment(feature_name),
            Uuid::now_v7().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is safe to use as a file name
    pub fn is_file_safe(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BatchId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BatchId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store of an upstream feature a unit may read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    pub location: FeatureLocation,
}

/// One quantum of feature work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchUnit {
    pub dataset_id: Uuid,
    pub feature_id: Uuid,
    pub feature_name: String,
    /// Registry key of the implementation
    pub feature_key: String,
    pub position: i32,
    pub batch_id: BatchId,
    pub unit_number: u32,
    pub selection: KeySelection,
    /// Where the unit writes its output
    pub store: FeatureLocation,
    pub dependencies: Vec<DependencyRef>,
}

/// Why a unit failed
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Error chain or panic payload, outermost first
    pub trace: Vec<String>,
    /// Data the unit was working on
    pub slice: Option<Frame>,
}

impl UnitFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
            slice: None,
        }
    }

    /// Build from an error, capturing its source chain
    pub fn from_error(kind: ErrorKind, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut current = error.source();
        while let Some(source) = current {
            trace.push(source.to_string());
            current = source.source();
        }
        Self {
            kind,
            message: error.to_string(),
            trace,
            slice: None,
        }
    }

    pub fn with_slice(mut self, slice: Frame) -> Self {
        self.slice = Some(slice);
        self
    }
}

/// Result of executing one unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Succeeded { rows_written: usize },
    Failed(UnitFailure),
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}
