//! SYNCED-family status vocabulary for project-scoped resources
//! (namespaces, secrets, S3 storages).

use serde::{Deserialize, Serialize};
use std::fmt;

use super::resolver::CompositeState;

/// Wire status for project-scoped resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectResourceStatus {
    #[default]
    Unassigned,
    Pending,
    PartiallySynced,
    Synced,
    Failed,
    SyncedError,
    Deleting,
    DeleteFailed,
    Deleted,
}

impl fmt::Display for ProjectResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectResourceStatus::Unassigned => write!(f, "UNASSIGNED"),
            ProjectResourceStatus::Pending => write!(f, "PENDING"),
            ProjectResourceStatus::PartiallySynced => write!(f, "PARTIALLY_SYNCED"),
            ProjectResourceStatus::Synced => write!(f, "SYNCED"),
            ProjectResourceStatus::Failed => write!(f, "FAILED"),
            ProjectResourceStatus::SyncedError => write!(f, "SYNCED_ERROR"),
            ProjectResourceStatus::Deleting => write!(f, "DELETING"),
            ProjectResourceStatus::DeleteFailed => write!(f, "DELETE_FAILED"),
            ProjectResourceStatus::Deleted => write!(f, "DELETED"),
        }
    }
}

impl From<CompositeState> for ProjectResourceStatus {
    fn from(state: CompositeState) -> Self {
        match state {
            CompositeState::Unassigned => ProjectResourceStatus::Unassigned,
            CompositeState::Pending => ProjectResourceStatus::Pending,
            CompositeState::PartiallySynced => ProjectResourceStatus::PartiallySynced,
            CompositeState::Synced => ProjectResourceStatus::Synced,
            CompositeState::Failed => ProjectResourceStatus::Failed,
            CompositeState::SyncedError => ProjectResourceStatus::SyncedError,
            CompositeState::Deleting => ProjectResourceStatus::Deleting,
            CompositeState::DeleteFailed => ProjectResourceStatus::DeleteFailed,
            CompositeState::Deleted => ProjectResourceStatus::Deleted,
        }
    }
}

impl From<ProjectResourceStatus> for CompositeState {
    fn from(status: ProjectResourceStatus) -> Self {
        match status {
            ProjectResourceStatus::Unassigned => CompositeState::Unassigned,
            ProjectResourceStatus::Pending => CompositeState::Pending,
            ProjectResourceStatus::PartiallySynced => CompositeState::PartiallySynced,
            ProjectResourceStatus::Synced => CompositeState::Synced,
            ProjectResourceStatus::Failed => CompositeState::Failed,
            ProjectResourceStatus::SyncedError => CompositeState::SyncedError,
            ProjectResourceStatus::Deleting => CompositeState::Deleting,
            ProjectResourceStatus::DeleteFailed => CompositeState::DeleteFailed,
            ProjectResourceStatus::Deleted => CompositeState::Deleted,
        }
    }
}
