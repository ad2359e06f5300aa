// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for edgebus.
//!
//! Uses proptest to generate random inputs and verify invariants.

use proptest::prelude::*;

use edgebus::message::{ClusterNode, Envelope, GpuInformation};
use edgebus::reconcile::nodes::has_node_changed;
use edgebus::status::{CompositeState, SubState, SubStatus, resolve};

/// Strategy for generating random sub-states.
fn any_sub_state() -> impl Strategy<Value = SubState> {
    prop_oneof![
        Just(SubState::Pending),
        Just(SubState::Synced),
        Just(SubState::Failed),
        Just(SubState::SyncedError),
        Just(SubState::Deleting),
        Just(SubState::DeleteFailed),
        Just(SubState::Deleted),
        Just(SubState::Unknown),
    ]
}

/// Strategy for generating random composite states.
fn any_composite_state() -> impl Strategy<Value = CompositeState> {
    prop_oneof![
        Just(CompositeState::Unassigned),
        Just(CompositeState::Pending),
        Just(CompositeState::PartiallySynced),
        Just(CompositeState::Synced),
        Just(CompositeState::Failed),
        Just(CompositeState::SyncedError),
        Just(CompositeState::Deleting),
        Just(CompositeState::DeleteFailed),
        Just(CompositeState::Deleted),
    ]
}

/// Strategy for generating one named sub-status.
fn any_sub_status() -> impl Strategy<Value = SubStatus> {
    (
        "[a-z]{1,12}",
        any_sub_state(),
        proptest::option::of("[ -~]{0,40}"),
    )
        .prop_map(|(name, state, reason)| SubStatus {
            name,
            state,
            reason,
        })
}

/// Strategy for generating a node inventory record.
fn any_node() -> impl Strategy<Value = ClusterNode> {
    (
        "[a-z0-9-]{1,20}",
        0u64..1_000_000,
        0u64..u64::MAX / 2,
        0u64..u64::MAX / 2,
        proptest::option::of((1u32..16, "[A-Z0-9]{2,8}").prop_map(|(count, r#type)| {
            GpuInformation {
                count,
                r#type,
                vendor: "nvidia.com".to_string(),
                vram_bytes: 80 << 30,
                product_name: "generated".to_string(),
            }
        })),
        prop_oneof![Just("Ready".to_string()), Just("NotReady".to_string())],
        any::<bool>(),
    )
        .prop_map(
            |(name, cpu_milli, memory_bytes, ephemeral_storage_bytes, gpu, status, ready)| {
                ClusterNode {
                    name,
                    cpu_milli,
                    memory_bytes,
                    ephemeral_storage_bytes,
                    gpu,
                    status,
                    ready,
                }
            },
        )
}

proptest! {
    /// The resolver is total: any multiset of sub-statuses resolves to
    /// exactly one state without panicking.
    #[test]
    fn resolver_is_total(
        previous in any_composite_state(),
        subs in proptest::collection::vec(any_sub_status(), 0..16),
    ) {
        let resolution = resolve(previous, &subs);
        // the state is one of the nine documented values, by construction;
        // check the reason only appears when some sub carried one
        if resolution.reason.is_some() {
            prop_assert!(!subs.is_empty());
        }
    }

    /// An empty sub-status list never produces a terminal delete state
    /// unless deletion was already in progress.
    #[test]
    fn empty_subs_never_invent_deletion(previous in any_composite_state()) {
        prop_assume!(previous != CompositeState::Deleting);
        let resolution = resolve(previous, &[]);
        prop_assert_ne!(resolution.state, CompositeState::Deleted);
        prop_assert_ne!(resolution.state, CompositeState::DeleteFailed);
    }

    /// All-synced input always resolves to SYNCED regardless of history.
    #[test]
    fn all_synced_resolves_synced(
        previous in any_composite_state(),
        names in proptest::collection::hash_set("[a-z]{1,8}", 1..8),
    ) {
        prop_assume!(previous != CompositeState::Deleting);
        let subs: Vec<SubStatus> = names
            .into_iter()
            .map(|name| SubStatus::new(name, SubState::Synced))
            .collect();
        prop_assert_eq!(resolve(previous, &subs).state, CompositeState::Synced);
    }

    /// Node drift detection is reflexive and symmetric on compared fields.
    #[test]
    fn node_drift_is_an_equivalence(a in any_node(), b in any_node()) {
        prop_assert!(!has_node_changed(&a, &a));
        prop_assert!(!has_node_changed(&b, &b));
        prop_assert_eq!(has_node_changed(&a, &b), has_node_changed(&b, &a));
    }

    /// Every encodable envelope decodes back to itself.
    #[test]
    fn node_report_round_trips(nodes in proptest::collection::vec(any_node(), 0..8)) {
        let message = Envelope::ClusterNodesReport {
            nodes,
            timestamp: jiff::Timestamp::UNIX_EPOCH,
        };
        let decoded = Envelope::decode(&message.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded, message);
    }
}
