mod common;

use common::init_tracing;
use common::mock_cluster::MockCluster;
use tokio_util::sync::CancellationToken;
use trib_core::{
    check_open_slots, discover, fix_open_slot, fix_open_slots, open_slots, ClusterError,
    ClusterSession, MarkerKind, RepairAction, SessionOptions, TribError,
};

async fn fixing_session(cluster: &MockCluster) -> ClusterSession {
    let options = SessionOptions {
        fix: true,
        ..Default::default()
    };
    discover(cluster, "127.0.0.1:7000", options).await.unwrap()
}

/// a -> b migration of slot 200 interrupted halfway
fn half_migrated_cluster() -> MockCluster {
    let cluster = MockCluster::three_masters();
    cluster.with_node("a0000000", |n| {
        n.migrating.insert(200, "b0000000".to_string());
    });
    cluster.with_node("b0000000", |n| {
        n.importing.insert(200, "a0000000".to_string());
    });
    cluster.put_keys("a0000000", 200, &["k1", "k2", "k3"]);
    cluster.put_keys("b0000000", 200, &["k0"]);
    cluster
}

fn assert_no_markers(cluster: &MockCluster, slot: u16) {
    for id in ["a0000000", "b0000000", "c0000000"] {
        let node = cluster.node(id);
        assert!(!node.migrating.contains_key(&slot), "{} still migrating", id);
        assert!(!node.importing.contains_key(&slot), "{} still importing", id);
    }
}

#[tokio::test]
async fn test_interrupted_migration_is_finished() {
    init_tracing();
    let cluster = half_migrated_cluster();
    let mut session = fixing_session(&cluster).await;

    assert_eq!(
        check_open_slots(session.topology()),
        vec![
            ClusterError::OpenSlots {
                node: "127.0.0.1:7000".to_string(),
                state: MarkerKind::Migrating,
                slots: vec![200],
            },
            ClusterError::OpenSlots {
                node: "127.0.0.1:7001".to_string(),
                state: MarkerKind::Importing,
                slots: vec![200],
            },
        ]
    );

    let report = fix_open_slots(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.repaired.len(), 1);
    let repair = &report.repaired[0];
    assert_eq!(repair.owner.as_deref(), Some("b0000000"));
    assert!(matches!(
        repair.actions[0],
        RepairAction::FinishMigration { keys_moved: 3, .. }
    ));

    // Cluster side
    assert!(cluster.node("b0000000").slots.contains(&200));
    assert!(!cluster.node("a0000000").slots.contains(&200));
    assert!(!cluster.node("c0000000").slots.contains(&200));
    assert_eq!(cluster.key_count("b0000000", 200), 4);
    assert_eq!(cluster.key_count("a0000000", 200), 0);
    assert_no_markers(&cluster, 200);

    // Local view follows
    assert!(open_slots(session.topology()).is_empty());
    assert!(session.topology().is_slot_stable(200));
}

#[tokio::test]
async fn test_busy_key_is_retried_with_replace() {
    let cluster = half_migrated_cluster();
    cluster.put_keys("b0000000", 200, &["k1"]);
    let mut session = fixing_session(&cluster).await;

    let repair = fix_open_slot(&mut session, 200, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(repair.owner.as_deref(), Some("b0000000"));
    assert!(cluster
        .commands()
        .iter()
        .any(|c| c.starts_with("127.0.0.1:7000: MIGRATE") && c.contains("REPLACE")));
    assert_eq!(cluster.key_count("a0000000", 200), 0);
    assert_eq!(cluster.key_count("b0000000", 200), 4);
}

#[tokio::test]
async fn test_orphaned_keys_get_an_owner() {
    let cluster = MockCluster::three_masters();
    cluster.with_node("a0000000", |n| {
        n.slots.remove(&300);
    });
    cluster.put_keys("b0000000", 300, &["x", "y"]);
    cluster.put_keys("c0000000", 300, &["z"]);
    let mut session = fixing_session(&cluster).await;

    // Not open by markers, only by the keys left behind
    assert!(open_slots(session.topology()).is_empty());

    let report = fix_open_slots(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.repaired.len(), 1);
    assert_eq!(report.repaired[0].slot, 300);
    assert_eq!(report.repaired[0].owner.as_deref(), Some("b0000000"));

    assert!(cluster.node("b0000000").slots.contains(&300));
    assert_eq!(cluster.key_count("b0000000", 300), 3);
    assert_eq!(cluster.key_count("c0000000", 300), 0);
    assert_no_markers(&cluster, 300);
    assert!(session.topology().node("b0000000").unwrap().owns(300));
}

#[tokio::test]
async fn test_multiple_owners_keep_the_one_with_most_keys() {
    let cluster = MockCluster::three_masters();
    cluster.with_node("b0000000", |n| {
        n.slots.insert(100);
    });
    cluster.put_keys("a0000000", 100, &["only"]);
    cluster.put_keys("b0000000", 100, &["m1", "m2", "m3"]);
    let mut session = fixing_session(&cluster).await;

    assert_eq!(
        open_slots(session.topology()).into_iter().collect::<Vec<_>>(),
        vec![100]
    );

    let repair = fix_open_slot(&mut session, 100, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(repair.owner.as_deref(), Some("b0000000"));
    assert!(repair
        .actions
        .iter()
        .any(|a| matches!(a, RepairAction::BumpEpoch { node, .. } if node == "b0000000")));
    assert!(repair
        .actions
        .iter()
        .any(|a| matches!(a, RepairAction::DelSlot { node } if node == "a0000000")));

    assert!(!cluster.node("a0000000").slots.contains(&100));
    assert!(cluster.node("b0000000").slots.contains(&100));
    assert_eq!(cluster.key_count("b0000000", 100), 4);
    assert_eq!(cluster.node("b0000000").config_epoch, 1);
    assert_no_markers(&cluster, 100);
    assert!(session.topology().is_slot_stable(100));
}

#[tokio::test]
async fn test_stale_import_is_cancelled() {
    let cluster = MockCluster::three_masters();
    cluster.with_node("c0000000", |n| {
        n.importing.insert(10, "a0000000".to_string());
    });
    cluster.put_keys("a0000000", 10, &["k"]);
    let mut session = fixing_session(&cluster).await;

    let repair = fix_open_slot(&mut session, 10, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(repair.owner.as_deref(), Some("a0000000"));
    assert_eq!(
        repair.actions,
        vec![RepairAction::SetStable {
            node: "c0000000".to_string()
        }]
    );
    assert!(cluster.node("a0000000").slots.contains(&10));
    assert_eq!(cluster.key_count("a0000000", 10), 1);
    assert_no_markers(&cluster, 10);
}

#[tokio::test]
async fn test_slot_without_owner_or_keys_cannot_be_fixed() {
    let cluster = MockCluster::three_masters();
    cluster.with_node("a0000000", |n| {
        n.slots.remove(&300);
    });
    cluster.with_node("b0000000", |n| {
        n.importing.insert(300, "a0000000".to_string());
    });
    let mut session = fixing_session(&cluster).await;

    let err = fix_open_slot(&mut session, 300, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TribError::Fix(ClusterError::Fix { slot: 300, .. })
    ));

    // The pass reports it and carries on
    let report = fix_open_slots(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.repaired.is_empty());
    assert!(matches!(
        report.failed.as_slice(),
        [ClusterError::Fix { slot: 300, .. }]
    ));
}

#[tokio::test]
async fn test_stable_slot_is_a_noop() {
    let cluster = MockCluster::three_masters();
    let mut session = fixing_session(&cluster).await;
    cluster.clear_log();

    let repair = fix_open_slot(&mut session, 42, &CancellationToken::new())
        .await
        .unwrap();
    assert!(repair.is_noop());
    assert!(repair.owner.is_none());
    assert!(cluster.commands().is_empty());
}

#[tokio::test]
async fn test_fix_requires_authorization() {
    let cluster = half_migrated_cluster();
    let mut session = discover(&cluster, "127.0.0.1:7000", SessionOptions::default())
        .await
        .unwrap();

    let result = fix_open_slots(&mut session, &CancellationToken::new()).await;
    assert!(matches!(result, Err(TribError::FixNotAuthorized)));
    assert!(cluster.node("a0000000").migrating.contains_key(&200));
}

#[tokio::test]
async fn test_cancelled_repair_leaves_slot_open() {
    let cluster = half_migrated_cluster();
    let mut session = fixing_session(&cluster).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = fix_open_slot(&mut session, 200, &cancel).await;
    assert!(matches!(result, Err(TribError::Cancelled)));
    assert!(cluster.node("a0000000").migrating.contains_key(&200));
    assert!(cluster.node("b0000000").importing.contains_key(&200));
    assert_eq!(cluster.key_count("a0000000", 200), 3);

    let result = fix_open_slots(&mut session, &cancel).await;
    assert!(matches!(result, Err(TribError::Cancelled)));
}

#[tokio::test]
async fn test_pass_survives_a_node_lost_after_discovery() {
    let cluster = half_migrated_cluster();
    cluster.with_node("a0000000", |n| {
        n.slots.remove(&300);
    });
    let mut session = fixing_session(&cluster).await;
    cluster.set_unreachable("127.0.0.1:7002");

    let report = fix_open_slots(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.repaired.len(), 1);
    assert_eq!(report.repaired[0].slot, 200);
    assert!(matches!(
        report.failed.as_slice(),
        [ClusterError::Uncounted { slot: 300, node, .. }] if node == "127.0.0.1:7002"
    ));

    assert!(cluster.node("b0000000").slots.contains(&200));
    assert!(!cluster.node("a0000000").slots.contains(&200));
    assert_eq!(cluster.key_count("b0000000", 200), 4);
    assert_no_markers(&cluster, 200);
}

#[tokio::test]
async fn test_interrupted_orphan_repair_is_picked_up_again() {
    let cluster = MockCluster::three_masters();
    cluster.with_node("a0000000", |n| {
        n.slots.remove(&300);
    });
    cluster.put_keys("b0000000", 300, &["x", "y"]);
    cluster.put_keys("c0000000", 300, &["z"]);
    cluster.fail_command("MIGRATE");
    let mut session = fixing_session(&cluster).await;

    let report = fix_open_slots(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.repaired.is_empty());
    assert!(matches!(
        report.failed.as_slice(),
        [ClusterError::Fix { slot: 300, .. }]
    ));
    // b took the slot but c still carries a marker for its key
    assert!(cluster.node("b0000000").slots.contains(&300));
    assert_eq!(cluster.key_count("c0000000", 300), 1);
    assert_eq!(
        cluster.node("c0000000").importing.get(&300).map(String::as_str),
        Some("b0000000")
    );

    cluster.heal_commands();
    let mut session = fixing_session(&cluster).await;
    assert_eq!(
        open_slots(session.topology()).into_iter().collect::<Vec<_>>(),
        vec![300]
    );
    let report = fix_open_slots(&mut session, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.repaired.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(cluster.key_count("b0000000", 300), 3);
    assert_eq!(cluster.key_count("c0000000", 300), 0);
    assert_no_markers(&cluster, 300);
}

#[tokio::test]
async fn test_failed_import_gives_the_claim_back() {
    let cluster = MockCluster::three_masters();
    cluster.with_node("b0000000", |n| {
        n.slots.insert(100);
    });
    cluster.put_keys("a0000000", 100, &["only"]);
    cluster.put_keys("b0000000", 100, &["m1", "m2", "m3"]);
    cluster.fail_command("CLUSTER SETSLOT 100 IMPORTING");
    let mut session = fixing_session(&cluster).await;

    let result = fix_open_slot(&mut session, 100, &CancellationToken::new()).await;
    assert!(matches!(result, Err(TribError::Client { .. })));
    assert!(cluster
        .commands()
        .iter()
        .any(|c| c == "127.0.0.1:7000: CLUSTER ADDSLOTS 100"));
    assert!(cluster.node("a0000000").slots.contains(&100));
    assert_eq!(cluster.key_count("a0000000", 100), 1);

    // Still shared, so the next pass sees it
    cluster.heal_commands();
    let session = fixing_session(&cluster).await;
    assert!(open_slots(session.topology()).contains(&100));
}
