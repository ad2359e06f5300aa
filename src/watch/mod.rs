//! Cluster-local resource watching.
//!
//! Watch streams run on dedicated tasks and feed a bounded channel that the
//! reconciliation loop consumes; the stream restarts itself on watch
//! timeouts instead of exiting silently.

pub mod crd;
pub mod stream;

pub use crd::{installed_crd_version, select_installed_version};
pub use stream::{ResourceEvent, WatchEventKind, spawn_watch};
