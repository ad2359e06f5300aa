//! Generic composite-status merge.
//!
//! The precedence order implemented here is load-bearing: a single
//! `DeleteFailed` outranks co-occurring `Failed` conditions because deletion
//! failures require distinct operator action. Changing the order changes
//! which status operators see first.

use std::fmt;

/// Status reported for one sub-resource of a composite parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubState {
    /// Reconciliation requested, no terminal report yet.
    Pending,
    /// Sub-resource is live and matches the desired state.
    Synced,
    /// Creation or update was rejected.
    Failed,
    /// Sub-resource exists but drifted or stopped syncing.
    SyncedError,
    /// Deletion in progress.
    Deleting,
    /// Deletion was rejected.
    DeleteFailed,
    /// Sub-resource is gone.
    Deleted,
    /// Reported state was not recognized.
    Unknown,
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubState::Pending => write!(f, "PENDING"),
            SubState::Synced => write!(f, "SYNCED"),
            SubState::Failed => write!(f, "FAILED"),
            SubState::SyncedError => write!(f, "SYNCED_ERROR"),
            SubState::Deleting => write!(f, "DELETING"),
            SubState::DeleteFailed => write!(f, "DELETE_FAILED"),
            SubState::Deleted => write!(f, "DELETED"),
            SubState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One named sub-resource status with its optional reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubStatus {
    /// Stable sub-resource name used to tag reasons ("namespace", "quota", ...)
    pub name: String,
    pub state: SubState,
    pub reason: Option<String>,
}

impl SubStatus {
    pub fn new(name: impl Into<String>, state: SubState) -> Self {
        Self {
            name: name.into(),
            state,
            reason: None,
        }
    }

    pub fn with_reason(name: impl Into<String>, state: SubState, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state,
            reason: Some(reason.into()),
        }
    }
}

/// The resolved composite status of the parent resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositeState {
    /// No sub-resources reported yet.
    #[default]
    Unassigned,
    /// All sub-resources still pending.
    Pending,
    /// Some sub-resources synced, the rest pending.
    PartiallySynced,
    /// Every sub-resource synced.
    Synced,
    /// At least one sub-resource failed to be created or updated.
    Failed,
    /// At least one sub-resource drifted, reported an unknown state, or
    /// disappeared while the parent was not deleting.
    SyncedError,
    /// Parent deletion in progress.
    Deleting,
    /// At least one sub-resource failed to be deleted.
    DeleteFailed,
    /// Every sub-resource confirmed deleted.
    Deleted,
}

impl fmt::Display for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeState::Unassigned => write!(f, "UNASSIGNED"),
            CompositeState::Pending => write!(f, "PENDING"),
            CompositeState::PartiallySynced => write!(f, "PARTIALLY_SYNCED"),
            CompositeState::Synced => write!(f, "SYNCED"),
            CompositeState::Failed => write!(f, "FAILED"),
            CompositeState::SyncedError => write!(f, "SYNCED_ERROR"),
            CompositeState::Deleting => write!(f, "DELETING"),
            CompositeState::DeleteFailed => write!(f, "DELETE_FAILED"),
            CompositeState::Deleted => write!(f, "DELETED"),
        }
    }
}

/// How a composite status reported for a sub-resource folds back into a
/// sub-state when that resource is itself a child of a larger parent.
impl From<CompositeState> for SubState {
    fn from(state: CompositeState) -> Self {
        match state {
            CompositeState::Unassigned | CompositeState::Pending | CompositeState::PartiallySynced => {
                SubState::Pending
            }
            CompositeState::Synced => SubState::Synced,
            CompositeState::Failed => SubState::Failed,
            CompositeState::SyncedError => SubState::SyncedError,
            CompositeState::Deleting => SubState::Deleting,
            CompositeState::DeleteFailed => SubState::DeleteFailed,
            CompositeState::Deleted => SubState::Deleted,
        }
    }
}

/// Outcome of a merge: one state plus an operator-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub state: CompositeState,
    pub reason: Option<String>,
}

impl Resolution {
    fn new(state: CompositeState, summary: Option<&str>, subs: &[SubStatus]) -> Self {
        let detail = format_reasons(subs);
        let reason = match (summary, detail) {
            (Some(s), Some(d)) => Some(format!("{s} ({d})")),
            (Some(s), None) => Some(s.to_string()),
            (None, d) => d,
        };
        Self { state, reason }
    }
}

/// Concatenate per-sub-resource reasons, tagged by name, for diagnosis.
fn format_reasons(subs: &[SubStatus]) -> Option<String> {
    let parts: Vec<String> = subs
        .iter()
        .filter_map(|s| {
            s.reason
                .as_deref()
                .map(|r| format!("{}: {}", s.name, r))
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

/// Merge sub-resource statuses into one composite status.
///
/// `previous` is the parent's current lifecycle state; while it is
/// `Deleting`, only the deletion outcome of the sub-resources matters.
pub fn resolve(previous: CompositeState, subs: &[SubStatus]) -> Resolution {
    if previous == CompositeState::Deleting {
        return resolve_deleting(subs);
    }

    if subs.is_empty() {
        return Resolution::new(CompositeState::Unassigned, None, subs);
    }

    let any = |state: SubState| subs.iter().any(|s| s.state == state);
    let all = |state: SubState| subs.iter().all(|s| s.state == state);

    if any(SubState::DeleteFailed) {
        Resolution::new(
            CompositeState::DeleteFailed,
            Some("some sub-resources failed to be deleted"),
            subs,
        )
    } else if any(SubState::Failed) {
        Resolution::new(
            CompositeState::Failed,
            Some("some sub-resources are in a failed state"),
            subs,
        )
    } else if any(SubState::SyncedError) || any(SubState::Unknown) {
        Resolution::new(
            CompositeState::SyncedError,
            Some("some sub-resources have failed to sync"),
            subs,
        )
    } else if any(SubState::Deleted) {
        // The parent is not deleting, so a deleted sub-resource is drift.
        Resolution::new(
            CompositeState::SyncedError,
            Some("one or more sub-resources have been deleted unexpectedly"),
            subs,
        )
    } else if all(SubState::Synced) {
        Resolution::new(CompositeState::Synced, None, subs)
    } else if subs
        .iter()
        .all(|s| matches!(s.state, SubState::Synced | SubState::Pending))
    {
        if any(SubState::Synced) {
            Resolution::new(CompositeState::PartiallySynced, None, subs)
        } else {
            Resolution::new(CompositeState::Pending, None, subs)
        }
    } else {
        Resolution::new(
            CompositeState::SyncedError,
            Some("unknown states detected"),
            subs,
        )
    }
}

fn resolve_deleting(subs: &[SubStatus]) -> Resolution {
    if subs.iter().all(|s| s.state == SubState::Deleted) {
        Resolution::new(CompositeState::Deleted, None, subs)
    } else if subs.iter().any(|s| s.state == SubState::DeleteFailed) {
        Resolution::new(
            CompositeState::DeleteFailed,
            Some("some sub-resources failed to be deleted"),
            subs,
        )
    } else {
        Resolution::new(CompositeState::Deleting, None, subs)
    }
}
