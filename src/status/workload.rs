//! READY-family status vocabulary for workloads.
//!
//! Workloads aggregate the statuses of their Kubernetes components
//! (the objects rendered from the submitted manifest); the merge algorithm
//! is the generic resolver, only the wording differs from project resources.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::resolver::CompositeState;

/// Wire status for workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadStatus {
    #[default]
    Unassigned,
    Pending,
    PartiallyReady,
    Ready,
    Failed,
    SyncedError,
    Deleting,
    DeleteFailed,
    Deleted,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadStatus::Unassigned => write!(f, "UNASSIGNED"),
            WorkloadStatus::Pending => write!(f, "PENDING"),
            WorkloadStatus::PartiallyReady => write!(f, "PARTIALLY_READY"),
            WorkloadStatus::Ready => write!(f, "READY"),
            WorkloadStatus::Failed => write!(f, "FAILED"),
            WorkloadStatus::SyncedError => write!(f, "SYNCED_ERROR"),
            WorkloadStatus::Deleting => write!(f, "DELETING"),
            WorkloadStatus::DeleteFailed => write!(f, "DELETE_FAILED"),
            WorkloadStatus::Deleted => write!(f, "DELETED"),
        }
    }
}

impl From<CompositeState> for WorkloadStatus {
    fn from(state: CompositeState) -> Self {
        match state {
            CompositeState::Unassigned => WorkloadStatus::Unassigned,
            CompositeState::Pending => WorkloadStatus::Pending,
            CompositeState::PartiallySynced => WorkloadStatus::PartiallyReady,
            CompositeState::Synced => WorkloadStatus::Ready,
            CompositeState::Failed => WorkloadStatus::Failed,
            CompositeState::SyncedError => WorkloadStatus::SyncedError,
            CompositeState::Deleting => WorkloadStatus::Deleting,
            CompositeState::DeleteFailed => WorkloadStatus::DeleteFailed,
            CompositeState::Deleted => WorkloadStatus::Deleted,
        }
    }
}

impl From<WorkloadStatus> for CompositeState {
    fn from(status: WorkloadStatus) -> Self {
        match status {
            WorkloadStatus::Unassigned => CompositeState::Unassigned,
            WorkloadStatus::Pending => CompositeState::Pending,
            WorkloadStatus::PartiallyReady => CompositeState::PartiallySynced,
            WorkloadStatus::Ready => CompositeState::Synced,
            WorkloadStatus::Failed => CompositeState::Failed,
            WorkloadStatus::SyncedError => CompositeState::SyncedError,
            WorkloadStatus::Deleting => CompositeState::Deleting,
            WorkloadStatus::DeleteFailed => CompositeState::DeleteFailed,
            WorkloadStatus::Deleted => CompositeState::Deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::resolver::{SubState, SubStatus, resolve};

    #[test]
    fn test_partial_sync_renders_partially_ready() {
        let subs = vec![
            SubStatus::new("deployment", SubState::Synced),
            SubStatus::new("service", SubState::Pending),
        ];
        let r = resolve(CompositeState::Pending, &subs);
        assert_eq!(WorkloadStatus::from(r.state), WorkloadStatus::PartiallyReady);
        assert_eq!(WorkloadStatus::from(r.state).to_string(), "PARTIALLY_READY");
    }

    #[test]
    fn test_all_synced_renders_ready() {
        let subs = vec![SubStatus::new("deployment", SubState::Synced)];
        let r = resolve(CompositeState::PartiallySynced, &subs);
        assert_eq!(WorkloadStatus::from(r.state), WorkloadStatus::Ready);
    }
}
