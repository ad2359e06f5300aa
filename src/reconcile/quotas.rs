//! Cluster quota reconciliation.
//!
//! The control plane carves project quotas into per-cluster allocations;
//! the cluster applies them as ResourceQuota objects in each target
//! namespace plus the shared PriorityClasses, then echoes the allocations
//! back as status. Any failure aborts the cycle and reports
//! ClusterQuotasFailure instead.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceQuota;
use k8s_openapi::api::scheduling::v1::PriorityClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use tracing::{info, warn};

use super::FIELD_MANAGER;
use crate::error::Result;
use crate::message::{Envelope, PriorityClassSpec, QuotaAllocation};

/// Build the ResourceQuota enforcing one allocation in one namespace.
pub fn build_resource_quota(
    allocation: &QuotaAllocation,
    namespace: &str,
    gpu_vendor: &str,
) -> ResourceQuota {
    let mut hard = BTreeMap::new();
    hard.insert(
        "requests.cpu".to_string(),
        Quantity(format!("{}m", allocation.cpu_milli)),
    );
    hard.insert(
        "requests.memory".to_string(),
        Quantity(allocation.memory_bytes.to_string()),
    );
    hard.insert(
        "requests.storage".to_string(),
        Quantity(allocation.storage_bytes.to_string()),
    );
    if allocation.gpu_count > 0 {
        hard.insert(
            format!("requests.{gpu_vendor}/gpu"),
            Quantity(allocation.gpu_count.to_string()),
        );
    }

    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(allocation.quota_name.clone()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(k8s_openapi::api::core::v1::ResourceQuotaSpec {
            hard: Some(hard),
            ..Default::default()
        }),
        ..ResourceQuota::default()
    }
}

/// Build one cluster-scoped PriorityClass.
pub fn build_priority_class(spec: &PriorityClassSpec) -> PriorityClass {
    PriorityClass {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            ..ObjectMeta::default()
        },
        value: spec.value,
        global_default: Some(false),
        ..PriorityClass::default()
    }
}

/// Apply a quota allocation cycle and report the outcome.
pub async fn apply(
    client: &Client,
    gpu_vendor: &str,
    allocations: &[QuotaAllocation],
    priority_classes: &[PriorityClassSpec],
) -> Result<Vec<Envelope>> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for spec in priority_classes {
        let api: Api<PriorityClass> = Api::all(client.clone());
        let priority_class = build_priority_class(spec);
        if let Err(e) = api
            .patch(&spec.name, &params, &Patch::Apply(&priority_class))
            .await
        {
            warn!(priority_class = %spec.name, error = %e, "failed to apply priority class");
            return Ok(vec![failure(format!(
                "priority class {}: {e}",
                spec.name
            ))]);
        }
    }

    for allocation in allocations {
        for namespace in &allocation.namespaces {
            let api: Api<ResourceQuota> = Api::namespaced(client.clone(), namespace);
            let quota = build_resource_quota(allocation, namespace, gpu_vendor);
            if let Err(e) = api
                .patch(&allocation.quota_name, &params, &Patch::Apply(&quota))
                .await
            {
                warn!(
                    quota = %allocation.quota_name,
                    namespace,
                    error = %e,
                    "failed to apply resource quota"
                );
                return Ok(vec![failure(format!(
                    "quota {} in {namespace}: {e}",
                    allocation.quota_name
                ))]);
            }
        }
    }

    info!(
        allocations = allocations.len(),
        priority_classes = priority_classes.len(),
        "applied quota allocation cycle"
    );
    Ok(vec![Envelope::ClusterQuotasStatus {
        allocations: allocations.to_vec(),
        timestamp: jiff::Timestamp::now(),
    }])
}

fn failure(reason: String) -> Envelope {
    Envelope::ClusterQuotasFailure {
        reason,
        timestamp: jiff::Timestamp::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation() -> QuotaAllocation {
        QuotaAllocation {
            quota_name: "team-ml".into(),
            cpu_milli: 32_000,
            memory_bytes: 256 << 30,
            storage_bytes: 1 << 40,
            gpu_count: 4,
            namespaces: vec!["proj-a".into(), "proj-b".into()],
        }
    }

    #[test]
    fn test_resource_quota_hard_limits() {
        let quota = build_resource_quota(&allocation(), "proj-a", "nvidia.com");
        assert_eq!(quota.metadata.name.as_deref(), Some("team-ml"));
        assert_eq!(quota.metadata.namespace.as_deref(), Some("proj-a"));
        let hard = quota.spec.unwrap().hard.unwrap();
        assert_eq!(hard["requests.cpu"].0, "32000m");
        assert_eq!(hard["requests.memory"].0, (256u64 << 30).to_string());
        assert_eq!(hard["requests.storage"].0, (1u64 << 40).to_string());
        assert_eq!(hard["requests.nvidia.com/gpu"].0, "4");
    }

    #[test]
    fn test_cpu_only_quota_has_no_gpu_entry() {
        let mut allocation = allocation();
        allocation.gpu_count = 0;
        let quota = build_resource_quota(&allocation, "proj-a", "nvidia.com");
        let hard = quota.spec.unwrap().hard.unwrap();
        assert!(!hard.keys().any(|key| key.contains("/gpu")));
    }

    #[test]
    fn test_priority_class_is_not_global_default() {
        let priority_class = build_priority_class(&PriorityClassSpec {
            name: "training-high".into(),
            value: 1000,
        });
        assert_eq!(priority_class.metadata.name.as_deref(), Some("training-high"));
        assert_eq!(priority_class.value, 1000);
        assert_eq!(priority_class.global_default, Some(false));
    }
}
