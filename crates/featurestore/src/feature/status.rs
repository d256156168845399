//! Workflow status of datasets and features

use serde::{Deserialize, Serialize};

/// Workflow status
///
/// `pending -> fitting -> ready`, any non-failed state may move to `failed`.
/// `failed` is sticky: only an explicit reset returns it to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Needs computing
    Pending,

    /// Units are running
    Fitting,

    /// Stored output is current
    Ready,

    /// A unit failed
    Failed,
}

impl WorkflowStatus {
    /// Whether a regular status mark may move from `self` to `next`
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Pending, Fitting) | (Fitting, Ready) => true,
            (Ready, Fitting) | (Ready, Pending) => true,
            _ => false,
        }
    }

    pub fn is_failed(self) -> bool {
        self == WorkflowStatus::Failed
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fitting => write!(f, "fitting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fitting" => Ok(Self::Fitting),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}
