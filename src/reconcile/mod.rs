//! Reconciliation handlers: one per inbound message discriminator.
//!
//! Handlers convert intent messages into Kubernetes state and observed
//! state into status feedback. Kubernetes rejections are reported as data
//! (FAILED / DELETE_FAILED status messages) and the inbound message is
//! still acked; only transient infrastructure errors propagate so the
//! consumer's retry/DLQ path engages.

pub mod namespace;
pub mod nodes;
pub mod quotas;
pub mod secrets;
pub mod storage;
pub mod workload;

use std::sync::Arc;

use kube::Client;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::broker::consumer::{MessageHandler, Outcome};
use crate::broker::publisher::{MessageScope, Target};
use crate::broker::registry::ConnectionRegistry;
use crate::broker::transport::Connector;
use crate::error::Result;
use crate::message::Envelope;
use crate::repository::{Repository, StatusEntity};
use crate::status::resolver::{CompositeState, SubStatus, resolve};

/// Label carrying the owning project's id on managed namespaces.
pub const PROJECT_ID_LABEL: &str = "ai.edgebus.io/project-id";
/// Label marking namespaces as managed by the kueue queueing system.
pub const KUEUE_MANAGED_LABEL: &str = "kueue-managed";
/// Label carrying the project-secret id on ExternalSecret/Secret objects.
pub const SECRET_ID_LABEL: &str = "ai.edgebus.io/project-secret-id";
/// Label carrying the project-storage id on storage ConfigMaps.
pub const STORAGE_ID_LABEL: &str = "ai.edgebus.io/project-storage-id";
/// Field manager name for server-side apply.
pub const FIELD_MANAGER: &str = "edgebus-agent";

/// Actor recorded on repository status updates made by this process.
const STATUS_ACTOR: &str = "edgebus";

/// Routes each decoded envelope to its handler.
///
/// Handlers enqueue status feedback into a [`MessageScope`] that commits
/// only after the handler (and any repository writes) succeeded, so a
/// failed business transaction publishes nothing.
pub struct Dispatcher<C: Connector, R: Repository> {
    client: Client,
    repository: Arc<R>,
    registry: Arc<ConnectionRegistry<C>>,
    /// The cluster this agent serves; unset for the control-plane role.
    cluster_id: Option<Uuid>,
}

impl<C: Connector, R: Repository> Dispatcher<C, R> {
    pub fn new(
        client: Client,
        repository: Arc<R>,
        registry: Arc<ConnectionRegistry<C>>,
        cluster_id: Option<Uuid>,
    ) -> Self {
        Self {
            client,
            repository,
            registry,
            cluster_id,
        }
    }

    async fn dispatch(&self, message: Envelope) -> Result<()> {
        let mut scope = MessageScope::new(self.registry.clone());
        let feedback = self.run_handler(message).await?;
        for message in feedback {
            scope.enqueue(Target::Common, message);
        }
        scope.commit().await
    }

    /// Exhaustive dispatch over the closed union. Returns the status
    /// feedback messages to publish on the common vhost.
    async fn run_handler(&self, message: Envelope) -> Result<Vec<Envelope>> {
        match message {
            Envelope::Heartbeat {
                cluster_name,
                organization_name,
                timestamp,
            } => {
                record_cluster_heartbeat(
                    self.repository.as_ref(),
                    self.cluster_id,
                    &cluster_name,
                    &organization_name,
                    timestamp,
                )
                .await?;
                Ok(Vec::new())
            }
            Envelope::ClusterNodesReport { nodes, timestamp: _ } => {
                nodes::handle_report(self.repository.as_ref(), &nodes).await?;
                Ok(Vec::new())
            }
            Envelope::WorkloadSubmit {
                workload_id,
                manifest,
                user_token: _,
            } => workload::submit(&self.client, self.repository.as_ref(), workload_id, manifest).await,
            Envelope::WorkloadDelete { workload_id } => {
                workload::delete(&self.client, self.repository.as_ref(), workload_id).await
            }
            Envelope::WorkloadStatusUpdate {
                workload_id,
                status,
                reason,
                timestamp,
            } => {
                self.repository
                    .update_status(
                        StatusEntity::Workload(workload_id),
                        status.into(),
                        reason,
                        STATUS_ACTOR,
                        timestamp,
                    )
                    .await?;
                Ok(Vec::new())
            }
            Envelope::WorkloadComponentStatusUpdate {
                component_id,
                kind,
                api_version: _,
                workload_id,
                status,
                reason,
                timestamp,
            } => {
                let sub = SubStatus {
                    name: format!("{kind}/{component_id}"),
                    state: CompositeState::from(status).into(),
                    reason,
                };
                self.merge_sub_status(StatusEntity::Workload(workload_id), sub, timestamp)
                    .await?;
                Ok(Vec::new())
            }
            Envelope::ClusterQuotasAllocation {
                gpu_vendor,
                allocations,
                priority_classes,
            } => quotas::apply(&self.client, &gpu_vendor, &allocations, &priority_classes).await,
            Envelope::ClusterQuotasStatus {
                allocations: _,
                timestamp,
            } => {
                self.repository
                    .update_status(
                        StatusEntity::ClusterQuotas,
                        CompositeState::Synced,
                        None,
                        STATUS_ACTOR,
                        timestamp,
                    )
                    .await?;
                Ok(Vec::new())
            }
            Envelope::ClusterQuotasFailure { reason, timestamp } => {
                self.repository
                    .update_status(
                        StatusEntity::ClusterQuotas,
                        CompositeState::Failed,
                        Some(reason),
                        STATUS_ACTOR,
                        timestamp,
                    )
                    .await?;
                Ok(Vec::new())
            }
            Envelope::ProjectNamespaceCreate { name, project_id } => {
                namespace::create(&self.client, &name, project_id, &Default::default(), &Default::default())
                    .await
            }
            Envelope::ProjectNamespaceDelete { name, project_id } => {
                namespace::delete(&self.client, &name, project_id).await
            }
            Envelope::ProjectNamespaceStatus {
                project_id,
                status,
                reason,
            } => {
                let sub = SubStatus {
                    name: "namespace".to_string(),
                    state: CompositeState::from(status).into(),
                    reason,
                };
                self.merge_sub_status(StatusEntity::Project(project_id), sub, jiff::Timestamp::now())
                    .await?;
                Ok(Vec::new())
            }
            Envelope::ProjectSecretsCreate {
                secret_id,
                namespace,
                kind,
                manifest,
            } => secrets::create(&self.client, secret_id, &namespace, kind, manifest).await,
            Envelope::ProjectSecretsUpdate {
                secret_id,
                namespace,
                kind,
                manifest,
            } => secrets::update(&self.client, secret_id, &namespace, kind, manifest).await,
            Envelope::ProjectSecretsDelete {
                secret_id,
                namespace,
                kind,
            } => secrets::delete(&self.client, secret_id, &namespace, kind).await,
            Envelope::ProjectSecretsStatus {
                secret_id,
                status,
                reason,
            } => {
                let sub = SubStatus {
                    name: "secret".to_string(),
                    state: CompositeState::from(status).into(),
                    reason,
                };
                self.merge_sub_status(StatusEntity::Secret(secret_id), sub, jiff::Timestamp::now())
                    .await?;
                Ok(Vec::new())
            }
            Envelope::ProjectS3StorageCreate {
                storage_id,
                namespace,
                name,
                bucket_url,
                access_key_secret_ref,
                secret_key_secret_ref,
            } => {
                storage::create(
                    &self.client,
                    storage_id,
                    &namespace,
                    &name,
                    &bucket_url,
                    &access_key_secret_ref,
                    &secret_key_secret_ref,
                )
                .await
            }
            Envelope::ProjectS3StorageUpdate {
                storage_id,
                namespace,
                name,
                bucket_url,
                access_key_secret_ref,
                secret_key_secret_ref,
            } => {
                storage::update(
                    &self.client,
                    storage_id,
                    &namespace,
                    &name,
                    &bucket_url,
                    &access_key_secret_ref,
                    &secret_key_secret_ref,
                )
                .await
            }
            Envelope::ProjectS3StorageDelete {
                storage_id,
                namespace,
                name: _,
            } => storage::delete(&self.client, storage_id, &namespace).await,
            Envelope::ProjectS3StorageStatus {
                storage_id,
                status,
                reason,
            } => {
                let sub = SubStatus {
                    name: "storage".to_string(),
                    state: CompositeState::from(status).into(),
                    reason,
                };
                self.merge_sub_status(StatusEntity::Storage(storage_id), sub, jiff::Timestamp::now())
                    .await?;
                Ok(Vec::new())
            }
        }
    }

    /// Record one sub-resource report, re-resolve the parent's composite
    /// status, and persist the result.
    async fn merge_sub_status(
        &self,
        entity: StatusEntity,
        sub: SubStatus,
        timestamp: jiff::Timestamp,
    ) -> Result<()> {
        self.repository.record_sub_status(entity, sub).await?;
        let previous = self.repository.current_status(entity).await?;
        let subs = self.repository.sub_statuses(entity).await?;
        let resolution = resolve(previous, &subs);
        self.repository
            .update_status(entity, resolution.state, resolution.reason, STATUS_ACTOR, timestamp)
            .await
    }
}

/// Record a heartbeat, cross-checking it against the configured cluster's
/// registered row first. Heartbeats from unregistered or renamed clusters
/// are still recorded (the row may simply not have synced yet) but logged
/// so the discrepancy is visible.
pub async fn record_cluster_heartbeat<R: Repository>(
    repository: &R,
    cluster_id: Option<Uuid>,
    cluster_name: &str,
    organization_name: &str,
    timestamp: jiff::Timestamp,
) -> Result<()> {
    if let Some(id) = cluster_id {
        match repository.get_cluster(id).await? {
            Some(record) if record.name != cluster_name => {
                warn!(
                    cluster_id = %id,
                    registered = record.name,
                    reported = cluster_name,
                    "heartbeat name does not match registered cluster"
                );
            }
            Some(_) => {
                debug!(cluster_id = %id, cluster_name, "heartbeat from registered cluster");
            }
            None => {
                warn!(cluster_id = %id, cluster_name, "heartbeat for unregistered cluster");
            }
        }
    }
    repository
        .record_heartbeat(cluster_name, organization_name, timestamp)
        .await
}

impl<C: Connector, R: Repository> MessageHandler for Dispatcher<C, R> {
    async fn handle(&self, message: Envelope) -> Outcome {
        let message_type = message.message_type();
        match self.dispatch(message).await {
            Ok(()) => Outcome::Ack,
            Err(e) if e.is_retryable() => {
                warn!(message_type, error = %e, "handler failed, requeueing");
                Outcome::NackRequeue
            }
            Err(e) => {
                error!(message_type, error = %e, "handler failed permanently, dead-lettering");
                Outcome::NackDrop
            }
        }
    }
}
