//! The wire envelope exchanged between the control plane and edge clusters.
//!
//! Every message is a UTF-8 JSON object whose `message_type` field selects
//! the variant. The union is closed: decoding fails on an unknown
//! discriminator instead of silently dropping fields, and handling the enum
//! is exhaustiveness-checked at compile time.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::status::{ProjectResourceStatus, WorkloadStatus};

/// GPU details for a cluster node, absent on CPU-only nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInformation {
    /// Number of GPU devices on the node
    pub count: u32,
    /// Device type identifier (e.g. "H100")
    pub r#type: String,
    /// Vendor string (e.g. "nvidia.com")
    pub vendor: String,
    /// VRAM per device in bytes
    pub vram_bytes: u64,
    /// Marketing product name as reported by the device plugin
    pub product_name: String,
}

/// Inventory record for one cluster node, rebuilt wholesale on every
/// heartbeat cycle and diffed against the stored copy (see
/// [`has_node_changed`](crate::reconcile::nodes::has_node_changed)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    /// Allocatable CPU in milli-cores
    pub cpu_milli: u64,
    /// Allocatable memory in bytes
    pub memory_bytes: u64,
    /// Allocatable ephemeral storage in bytes
    pub ephemeral_storage_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuInformation>,
    /// Raw node status string from the cluster
    pub status: String,
    pub ready: bool,
}

/// A quota carved out of a cluster for a set of project namespaces.
///
/// Produced by the control plane from project quotas; consumed by the
/// cluster to configure its queueing system and echoed back as status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAllocation {
    /// Unique per cluster
    pub quota_name: String,
    pub cpu_milli: u64,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
    pub gpu_count: u32,
    /// Namespaces the quota applies to
    pub namespaces: Vec<String>,
}

/// Scheduling priority class pushed alongside quota allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClassSpec {
    pub name: String,
    pub value: i32,
}

/// The closed message union, discriminated by `message_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum Envelope {
    Heartbeat {
        cluster_name: String,
        organization_name: String,
        timestamp: Timestamp,
    },
    WorkloadSubmit {
        workload_id: Uuid,
        /// Rendered manifest documents to apply on the cluster
        manifest: serde_json::Value,
        user_token: String,
    },
    WorkloadDelete {
        workload_id: Uuid,
    },
    WorkloadStatusUpdate {
        workload_id: Uuid,
        status: WorkloadStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: Timestamp,
    },
    WorkloadComponentStatusUpdate {
        component_id: Uuid,
        kind: String,
        api_version: String,
        workload_id: Uuid,
        status: WorkloadStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        timestamp: Timestamp,
    },
    ClusterNodesReport {
        nodes: Vec<ClusterNode>,
        timestamp: Timestamp,
    },
    ClusterQuotasAllocation {
        gpu_vendor: String,
        allocations: Vec<QuotaAllocation>,
        priority_classes: Vec<PriorityClassSpec>,
    },
    ClusterQuotasStatus {
        allocations: Vec<QuotaAllocation>,
        timestamp: Timestamp,
    },
    ClusterQuotasFailure {
        reason: String,
        timestamp: Timestamp,
    },
    ProjectNamespaceCreate {
        name: String,
        project_id: Uuid,
    },
    ProjectNamespaceDelete {
        name: String,
        project_id: Uuid,
    },
    ProjectNamespaceStatus {
        project_id: Uuid,
        status: ProjectResourceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ProjectSecretsCreate {
        secret_id: Uuid,
        namespace: String,
        kind: SecretKind,
        manifest: serde_json::Value,
    },
    ProjectSecretsUpdate {
        secret_id: Uuid,
        namespace: String,
        kind: SecretKind,
        manifest: serde_json::Value,
    },
    ProjectSecretsDelete {
        secret_id: Uuid,
        namespace: String,
        kind: SecretKind,
    },
    ProjectSecretsStatus {
        secret_id: Uuid,
        status: ProjectResourceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ProjectS3StorageCreate {
        storage_id: Uuid,
        namespace: String,
        name: String,
        bucket_url: String,
        access_key_secret_ref: String,
        secret_key_secret_ref: String,
    },
    ProjectS3StorageUpdate {
        storage_id: Uuid,
        namespace: String,
        name: String,
        bucket_url: String,
        access_key_secret_ref: String,
        secret_key_secret_ref: String,
    },
    ProjectS3StorageDelete {
        storage_id: Uuid,
        namespace: String,
        name: String,
    },
    ProjectS3StorageStatus {
        storage_id: Uuid,
        status: ProjectResourceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// How a project secret materializes on the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    /// Managed by the external-secrets operator (ExternalSecret CRD)
    ExternalSecret,
    /// Plain core/v1 Secret
    Opaque,
}

impl Envelope {
    /// Decode a raw broker payload. Fails closed: a body that is not UTF-8,
    /// not JSON, or whose `message_type` is unknown is rejected.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(body)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to the canonical JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// The discriminator string this variant carries on the wire.
    pub fn message_type(&self) -> &'static str {
        match self {
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::WorkloadSubmit { .. } => "workload_submit",
            Envelope::WorkloadDelete { .. } => "workload_delete",
            Envelope::WorkloadStatusUpdate { .. } => "workload_status_update",
            Envelope::WorkloadComponentStatusUpdate { .. } => "workload_component_status_update",
            Envelope::ClusterNodesReport { .. } => "cluster_nodes_report",
            Envelope::ClusterQuotasAllocation { .. } => "cluster_quotas_allocation",
            Envelope::ClusterQuotasStatus { .. } => "cluster_quotas_status",
            Envelope::ClusterQuotasFailure { .. } => "cluster_quotas_failure",
            Envelope::ProjectNamespaceCreate { .. } => "project_namespace_create",
            Envelope::ProjectNamespaceDelete { .. } => "project_namespace_delete",
            Envelope::ProjectNamespaceStatus { .. } => "project_namespace_status",
            Envelope::ProjectSecretsCreate { .. } => "project_secrets_create",
            Envelope::ProjectSecretsUpdate { .. } => "project_secrets_update",
            Envelope::ProjectSecretsDelete { .. } => "project_secrets_delete",
            Envelope::ProjectSecretsStatus { .. } => "project_secrets_status",
            Envelope::ProjectS3StorageCreate { .. } => "project_s3_storage_create",
            Envelope::ProjectS3StorageUpdate { .. } => "project_s3_storage_update",
            Envelope::ProjectS3StorageDelete { .. } => "project_s3_storage_delete",
            Envelope::ProjectS3StorageStatus { .. } => "project_s3_storage_status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_roundtrip() {
        let msg = Envelope::Heartbeat {
            cluster_name: "edge-eu-1".into(),
            organization_name: "acme".into(),
            timestamp: Timestamp::UNIX_EPOCH,
        };
        let bytes = msg.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_discriminator_on_wire() {
        let msg = Envelope::WorkloadDelete {
            workload_id: Uuid::nil(),
        };
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["message_type"], "workload_delete");
        assert_eq!(msg.message_type(), "workload_delete");
    }

    #[test]
    fn test_unknown_discriminator_rejected() {
        let body = br#"{"message_type":"quantum_entangle","payload":1}"#;
        assert!(Envelope::decode(body).is_err());
    }

    #[test]
    fn test_missing_discriminator_rejected() {
        let body = br#"{"cluster_name":"edge-eu-1"}"#;
        assert!(Envelope::decode(body).is_err());
    }

    #[test]
    fn test_non_utf8_rejected() {
        let body = [0xff, 0xfe, 0x80];
        assert!(matches!(
            Envelope::decode(&body),
            Err(crate::error::DecodeError::NotUtf8(_))
        ));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let body = br#"{"message_type":"workload_delete","workload_id":"00000000-0000-0000-0000-000000000000","added_in_v2":true}"#;
        let decoded = Envelope::decode(body).unwrap();
        assert_eq!(
            decoded,
            Envelope::WorkloadDelete {
                workload_id: Uuid::nil()
            }
        );
    }

    #[test]
    fn test_nodes_report_roundtrip_with_gpu() {
        let msg = Envelope::ClusterNodesReport {
            nodes: vec![ClusterNode {
                name: "node-0".into(),
                cpu_milli: 64_000,
                memory_bytes: 512 << 30,
                ephemeral_storage_bytes: 2 << 40,
                gpu: Some(GpuInformation {
                    count: 8,
                    r#type: "H100".into(),
                    vendor: "nvidia.com".into(),
                    vram_bytes: 80 << 30,
                    product_name: "NVIDIA H100 80GB HBM3".into(),
                }),
                status: "Ready".into(),
                ready: true,
            }],
            timestamp: Timestamp::UNIX_EPOCH,
        };
        let decoded = Envelope::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_status_vocabulary_serializes_screaming_snake() {
        let msg = Envelope::ProjectNamespaceStatus {
            project_id: Uuid::nil(),
            status: ProjectResourceStatus::PartiallySynced,
            reason: None,
        };
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["status"], "PARTIALLY_SYNCED");
        assert!(value.get("reason").is_none());
    }
}
