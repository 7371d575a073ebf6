//! Dependency graph, cycle rejection, and blocked-cache scenarios
//! (spec §8 scenarios 2 and 5).

use swarmmail::domain::models::{CellFilter, CellStatus, CellType, Relationship};
use swarmmail::hive::{Hive, NewCell};
use swarmmail::store::Store;

async fn new_cell(hive: &Hive<'_>, title: &str) -> String {
    hive.create_cell(NewCell {
        title: title.to_string(),
        cell_type: CellType::Task,
        priority: None,
        parent_id: None,
        description: None,
        created_by: None,
    })
    .await
    .unwrap()
    .id
}

#[tokio::test]
async fn cycle_attempt_is_rejected_and_leaves_graph_unchanged() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let c1 = new_cell(&hive, "c1").await;
    let c2 = new_cell(&hive, "c2").await;
    let c3 = new_cell(&hive, "c3").await;

    hive.add_dependency(&c1, &c2, Relationship::Blocks).await.unwrap();
    hive.add_dependency(&c2, &c3, Relationship::Blocks).await.unwrap();

    let before = hive.get_dependents(&c1).await.unwrap().len();
    let err = hive.add_dependency(&c3, &c1, Relationship::Blocks).await.unwrap_err();
    assert!(matches!(err, swarmmail::Error::Cycle { .. }), "expected a Cycle error, got {err:?}");
    let after = hive.get_dependents(&c1).await.unwrap().len();
    assert_eq!(before, after, "rejected edge must not be written");
}

#[tokio::test]
async fn self_edge_is_rejected_as_a_cycle() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");
    let c1 = new_cell(&hive, "solo").await;

    let err = hive.add_dependency(&c1, &c1, Relationship::Blocks).await.unwrap_err();
    assert!(matches!(err, swarmmail::Error::Cycle { .. }));
}

#[tokio::test]
async fn cycle_check_spans_all_relationship_kinds() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let c1 = new_cell(&hive, "c1").await;
    let c2 = new_cell(&hive, "c2").await;

    hive.add_dependency(&c1, &c2, Relationship::Related).await.unwrap();
    // A `blocks` edge closing the loop must still be rejected even though
    // the existing edge is a different relationship kind: the DAG property
    // is total across all relationship types.
    let err = hive.add_dependency(&c2, &c1, Relationship::Blocks).await.unwrap_err();
    assert!(matches!(err, swarmmail::Error::Cycle { .. }));
}

#[tokio::test]
async fn blocked_cache_rebuild_and_ready_ordering() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let b1 = hive
        .create_cell(NewCell { title: "b1".into(), cell_type: CellType::Task, priority: Some(1), parent_id: None, description: None, created_by: None })
        .await
        .unwrap()
        .id;
    let b2 = hive
        .create_cell(NewCell { title: "b2".into(), cell_type: CellType::Task, priority: Some(2), parent_id: None, description: None, created_by: None })
        .await
        .unwrap()
        .id;
    let b3 = hive
        .create_cell(NewCell { title: "b3".into(), cell_type: CellType::Task, priority: Some(1), parent_id: None, description: None, created_by: None })
        .await
        .unwrap()
        .id;

    hive.add_dependency(&b2, &b1, Relationship::Blocks).await.unwrap();
    hive.add_dependency(&b3, &b1, Relationship::Blocks).await.unwrap();

    assert!(hive.is_blocked(&b2).await.unwrap());
    assert!(hive.is_blocked(&b3).await.unwrap());

    let ready_before = hive.query_cells(CellFilter { ready: Some(true), ..Default::default() }).await.unwrap();
    let ready_ids: Vec<_> = ready_before.iter().map(|c| c.id.clone()).collect();
    assert!(ready_ids.contains(&b1));
    assert!(!ready_ids.contains(&b2));
    assert!(!ready_ids.contains(&b3));

    hive.close_cell(&b1, Some("done")).await.unwrap();
    hive.rebuild_blocked_cache(None).await.unwrap();

    assert!(!hive.is_blocked(&b2).await.unwrap());
    assert!(!hive.is_blocked(&b3).await.unwrap());

    let ready_after = hive.query_cells(CellFilter { ready: Some(true), ..Default::default() }).await.unwrap();
    assert_eq!(ready_after.len(), 2);
    // priority 1 (b3) must sort ahead of priority 2 (b2): lower is higher.
    assert_eq!(ready_after[0].id, b3);
    assert_eq!(ready_after[1].id, b2);
}

#[tokio::test]
async fn tombstone_never_transitions_to_any_other_status() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");
    let c1 = new_cell(&hive, "doomed").await;

    hive.delete_cell(&c1, "operator", Some("no longer needed")).await.unwrap();
    let tombstoned = hive.get_cell(&c1).await.unwrap();
    assert_eq!(tombstoned.status, CellStatus::Tombstone);

    let err = hive.change_status(&c1, CellStatus::Open).await.unwrap_err();
    assert!(matches!(err, swarmmail::Error::State { .. }), "tombstone must not accept further transitions, got {err:?}");
}

#[tokio::test]
async fn epic_creation_is_atomic_and_rejects_invalid_dependency_index() {
    use swarmmail::domain::models::ValidatedSubtask;

    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");

    let subtasks = vec![
        ValidatedSubtask { index: 0, title: "first".into(), files: vec![], dependencies: vec![], description: None },
        ValidatedSubtask { index: 1, title: "second".into(), files: vec![], dependencies: vec![7], description: None },
    ];

    let err = hive.create_epic("doomed epic", &subtasks).await.unwrap_err();
    assert!(matches!(err, swarmmail::Error::Validation { .. }));

    let all = hive.query_cells(CellFilter::default()).await.unwrap();
    assert!(all.is_empty(), "a failed createEpic must roll back every would-be cell");
}
