//! Session-scoped persistence boundary.
//!
//! The relational layer (organizations/projects/clusters/quotas CRUD) is an
//! external collaborator; handlers only consume this narrow interface to
//! read the rows they need and to persist composite statuses and node
//! inventory. [`InMemoryRepository`] backs tests and single-process runs.

use std::collections::HashMap;
use std::future::Future;

use jiff::Timestamp;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::message::ClusterNode;
use crate::status::resolver::{CompositeState, SubStatus};

/// Parent entity whose composite status is being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEntity {
    Project(Uuid),
    Workload(Uuid),
    Secret(Uuid),
    Storage(Uuid),
    ClusterQuotas,
}

/// Minimal cluster row read by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    pub id: Uuid,
    pub name: String,
    pub organization_name: String,
    pub last_heartbeat: Option<Timestamp>,
}

/// The persistence operations the reconciliation handlers depend on.
pub trait Repository: Send + Sync + 'static {
    fn get_cluster(&self, id: Uuid) -> impl Future<Output = Result<Option<ClusterRecord>>> + Send;

    fn record_heartbeat(
        &self,
        cluster_name: &str,
        organization_name: &str,
        timestamp: Timestamp,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get_node(&self, name: &str) -> impl Future<Output = Result<Option<ClusterNode>>> + Send;

    fn upsert_node(&self, node: ClusterNode) -> impl Future<Output = Result<()>> + Send;

    /// Drop stored nodes missing from the latest report (the inventory is
    /// recreated wholesale every heartbeat cycle).
    fn remove_absent_nodes(&self, present: &[String]) -> impl Future<Output = Result<()>> + Send;

    /// Record one sub-resource status under its parent, replacing any
    /// previous report for the same sub-resource name.
    fn record_sub_status(
        &self,
        entity: StatusEntity,
        sub: SubStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    fn sub_statuses(
        &self,
        entity: StatusEntity,
    ) -> impl Future<Output = Result<Vec<SubStatus>>> + Send;

    fn current_status(
        &self,
        entity: StatusEntity,
    ) -> impl Future<Output = Result<CompositeState>> + Send;

    fn update_status(
        &self,
        entity: StatusEntity,
        status: CompositeState,
        reason: Option<String>,
        actor: &str,
        timestamp: Timestamp,
    ) -> impl Future<Output = Result<()>> + Send;

    fn store_workload_manifest(
        &self,
        workload_id: Uuid,
        manifest: Value,
    ) -> impl Future<Output = Result<()>> + Send;

    fn take_workload_manifest(
        &self,
        workload_id: Uuid,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;
}

/// Recorded status transition, kept for inspection in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    pub status: CompositeState,
    pub reason: Option<String>,
    pub actor: String,
    pub timestamp: Timestamp,
}

#[derive(Default)]
struct Tables {
    clusters: HashMap<Uuid, ClusterRecord>,
    heartbeats: HashMap<String, (String, Timestamp)>,
    nodes: HashMap<String, ClusterNode>,
    sub_statuses: HashMap<StatusEntity, Vec<SubStatus>>,
    statuses: HashMap<StatusEntity, StatusRow>,
    manifests: HashMap<Uuid, Value>,
}

/// Hash-map-backed repository for tests and local runs.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_cluster(&self, record: ClusterRecord) {
        self.tables
            .write()
            .await
            .clusters
            .insert(record.id, record);
    }

    pub async fn heartbeat(&self, cluster_name: &str) -> Option<(String, Timestamp)> {
        self.tables
            .read()
            .await
            .heartbeats
            .get(cluster_name)
            .cloned()
    }

    pub async fn status_row(&self, entity: StatusEntity) -> Option<StatusRow> {
        self.tables.read().await.statuses.get(&entity).cloned()
    }

    pub async fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.nodes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Repository for InMemoryRepository {
    async fn get_cluster(&self, id: Uuid) -> Result<Option<ClusterRecord>> {
        Ok(self.tables.read().await.clusters.get(&id).cloned())
    }

    async fn record_heartbeat(
        &self,
        cluster_name: &str,
        organization_name: &str,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.tables.write().await.heartbeats.insert(
            cluster_name.to_string(),
            (organization_name.to_string(), timestamp),
        );
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<ClusterNode>> {
        Ok(self.tables.read().await.nodes.get(name).cloned())
    }

    async fn upsert_node(&self, node: ClusterNode) -> Result<()> {
        self.tables
            .write()
            .await
            .nodes
            .insert(node.name.clone(), node);
        Ok(())
    }

    async fn remove_absent_nodes(&self, present: &[String]) -> Result<()> {
        self.tables
            .write()
            .await
            .nodes
            .retain(|name, _| present.iter().any(|p| p == name));
        Ok(())
    }

    async fn record_sub_status(&self, entity: StatusEntity, sub: SubStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let subs = tables.sub_statuses.entry(entity).or_default();
        if let Some(existing) = subs.iter_mut().find(|s| s.name == sub.name) {
            *existing = sub;
        } else {
            subs.push(sub);
        }
        Ok(())
    }

    async fn sub_statuses(&self, entity: StatusEntity) -> Result<Vec<SubStatus>> {
        Ok(self
            .tables
            .read()
            .await
            .sub_statuses
            .get(&entity)
            .cloned()
            .unwrap_or_default())
    }

    async fn current_status(&self, entity: StatusEntity) -> Result<CompositeState> {
        Ok(self
            .tables
            .read()
            .await
            .statuses
            .get(&entity)
            .map(|row| row.status)
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        entity: StatusEntity,
        status: CompositeState,
        reason: Option<String>,
        actor: &str,
        timestamp: Timestamp,
    ) -> Result<()> {
        self.tables.write().await.statuses.insert(
            entity,
            StatusRow {
                status,
                reason,
                actor: actor.to_string(),
                timestamp,
            },
        );
        Ok(())
    }

    async fn store_workload_manifest(&self, workload_id: Uuid, manifest: Value) -> Result<()> {
        self.tables
            .write()
            .await
            .manifests
            .insert(workload_id, manifest);
        Ok(())
    }

    async fn take_workload_manifest(&self, workload_id: Uuid) -> Result<Option<Value>> {
        Ok(self.tables.write().await.manifests.remove(&workload_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::resolver::SubState;

    #[tokio::test]
    async fn test_sub_status_replaced_by_name() {
        let repo = InMemoryRepository::new();
        let entity = StatusEntity::Project(Uuid::new_v4());
        repo.record_sub_status(entity, SubStatus::new("namespace", SubState::Pending))
            .await
            .unwrap();
        repo.record_sub_status(entity, SubStatus::new("namespace", SubState::Synced))
            .await
            .unwrap();
        let subs = repo.sub_statuses(entity).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].state, SubState::Synced);
    }

    #[tokio::test]
    async fn test_remove_absent_nodes() {
        let repo = InMemoryRepository::new();
        for name in ["node-0", "node-1"] {
            repo.upsert_node(ClusterNode {
                name: name.into(),
                cpu_milli: 1000,
                memory_bytes: 1,
                ephemeral_storage_bytes: 1,
                gpu: None,
                status: "Ready".into(),
                ready: true,
            })
            .await
            .unwrap();
        }
        repo.remove_absent_nodes(&["node-1".to_string()]).await.unwrap();
        assert_eq!(repo.node_names().await, vec!["node-1".to_string()]);
    }

    #[tokio::test]
    async fn test_current_status_defaults_to_unassigned() {
        let repo = InMemoryRepository::new();
        let status = repo
            .current_status(StatusEntity::Workload(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(status, CompositeState::Unassigned);
    }
}
