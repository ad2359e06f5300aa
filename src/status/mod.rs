//! Composite status resolution.
//!
//! A parent resource (project, workload) owns several independently reported
//! sub-resources (namespace, quota, secrets, storage, components). This module
//! merges their statuses into one authoritative parent status under a fixed
//! precedence order, plus an attributable reason string for operators.
//!
//! - [`resolver`]: the generic merge state machine
//! - [`project`]: SYNCED-family vocabulary for project-scoped resources
//! - [`workload`]: READY-family vocabulary for workloads

pub mod project;
pub mod resolver;
pub mod workload;

pub use project::ProjectResourceStatus;
pub use resolver::{CompositeState, Resolution, SubState, SubStatus, resolve};
pub use workload::WorkloadStatus;
