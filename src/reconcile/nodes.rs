//! Cluster node inventory reconciliation.
//!
//! Every heartbeat cycle the cluster reports its node list wholesale; each
//! reported node is diffed field-by-field against the stored copy so an
//! unchanged node costs no database write.

use tracing::{debug, info};

use crate::error::Result;
use crate::message::{ClusterNode, GpuInformation};
use crate::repository::Repository;

fn gpu_changed(reported: Option<&GpuInformation>, stored: Option<&GpuInformation>) -> bool {
    match (reported, stored) {
        (None, None) => false,
        (Some(a), Some(b)) => {
            a.count != b.count
                || a.r#type != b.r#type
                || a.vendor != b.vendor
                || a.vram_bytes != b.vram_bytes
                || a.product_name != b.product_name
        }
        _ => true,
    }
}

/// True when any compared field differs between the reported node and the
/// stored copy.
pub fn has_node_changed(reported: &ClusterNode, stored: &ClusterNode) -> bool {
    reported.cpu_milli != stored.cpu_milli
        || reported.memory_bytes != stored.memory_bytes
        || reported.ephemeral_storage_bytes != stored.ephemeral_storage_bytes
        || gpu_changed(reported.gpu.as_ref(), stored.gpu.as_ref())
        || reported.status != stored.status
        || reported.ready != stored.ready
}

/// Apply one node report: upsert new and drifted nodes, drop nodes that
/// disappeared from the report.
pub async fn handle_report<R: Repository>(repository: &R, nodes: &[ClusterNode]) -> Result<()> {
    let mut updated = 0usize;
    for node in nodes {
        let write = match repository.get_node(&node.name).await? {
            None => true,
            Some(stored) => has_node_changed(node, &stored),
        };
        if write {
            repository.upsert_node(node.clone()).await?;
            updated += 1;
        } else {
            debug!(node = %node.name, "node unchanged");
        }
    }
    let present: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
    repository.remove_absent_nodes(&present).await?;
    info!(reported = nodes.len(), updated, "applied node report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;

    fn gpu() -> GpuInformation {
        GpuInformation {
            count: 8,
            r#type: "H100".into(),
            vendor: "nvidia.com".into(),
            vram_bytes: 80 << 30,
            product_name: "NVIDIA H100 80GB HBM3".into(),
        }
    }

    fn node() -> ClusterNode {
        ClusterNode {
            name: "node-0".into(),
            cpu_milli: 64_000,
            memory_bytes: 512 << 30,
            ephemeral_storage_bytes: 2 << 40,
            gpu: Some(gpu()),
            status: "Ready".into(),
            ready: true,
        }
    }

    #[test]
    fn test_identical_nodes_are_unchanged() {
        assert!(!has_node_changed(&node(), &node()));
    }

    #[test]
    fn test_each_field_flips_changed() {
        let base = node();
        let mutations: Vec<Box<dyn Fn(&mut ClusterNode)>> = vec![
            Box::new(|n| n.cpu_milli += 1),
            Box::new(|n| n.memory_bytes += 1),
            Box::new(|n| n.ephemeral_storage_bytes += 1),
            Box::new(|n| n.status = "NotReady".into()),
            Box::new(|n| n.ready = false),
            Box::new(|n| n.gpu = None),
            Box::new(|n| n.gpu.as_mut().unwrap().count += 1),
            Box::new(|n| n.gpu.as_mut().unwrap().r#type = "A100".into()),
            Box::new(|n| n.gpu.as_mut().unwrap().vendor = "amd.com".into()),
            Box::new(|n| n.gpu.as_mut().unwrap().vram_bytes += 1),
            Box::new(|n| n.gpu.as_mut().unwrap().product_name = "other".into()),
        ];
        for (i, mutate) in mutations.iter().enumerate() {
            let mut changed = base.clone();
            mutate(&mut changed);
            assert!(
                has_node_changed(&changed, &base),
                "mutation {i} not detected"
            );
        }
    }

    #[test]
    fn test_gpu_added_is_change() {
        let mut stored = node();
        stored.gpu = None;
        assert!(has_node_changed(&node(), &stored));
    }

    #[tokio::test]
    async fn test_report_upserts_and_prunes() {
        let repo = InMemoryRepository::new();
        let mut other = node();
        other.name = "node-1".into();
        handle_report(&repo, &[node(), other]).await.unwrap();
        assert_eq!(repo.node_names().await, vec!["node-0", "node-1"]);

        // next cycle node-1 is gone
        handle_report(&repo, &[node()]).await.unwrap();
        assert_eq!(repo.node_names().await, vec!["node-0"]);
    }

    #[tokio::test]
    async fn test_unchanged_node_is_not_rewritten() {
        let repo = InMemoryRepository::new();
        handle_report(&repo, &[node()]).await.unwrap();
        // same report again is a no-op (observable only through the stored
        // copy staying equal; the write-skip is covered by has_node_changed)
        handle_report(&repo, &[node()]).await.unwrap();
        assert_eq!(repo.get_node("node-0").await.unwrap().unwrap(), node());
    }
}
