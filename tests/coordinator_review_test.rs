//! Swarm lifecycle: spawn, the 3-strike review state machine, and
//! completion's scope-violation gate (spec §8 scenario 3).

use swarmmail::coordinator::SwarmCoordinator;
use swarmmail::domain::models::{CellType, FeedbackStatus, ReviewFeedback, ReviewState};
use swarmmail::hive::{Hive, NewCell};
use swarmmail::mailbox::Mailbox;
use swarmmail::reservation::ReservationMgr;
use swarmmail::store::Store;

async fn setup(project: &str) -> (Store, String) {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, project);
    let cell = hive
        .create_cell(NewCell { title: "worker bead".into(), cell_type: CellType::Task, priority: None, parent_id: None, description: None, created_by: None })
        .await
        .unwrap();
    (store, cell.id)
}

fn coordinator<'a>(store: &'a Store, project: &'a str) -> SwarmCoordinator<'a> {
    let summarizer: &'static dyn swarmmail::domain::ports::Summarizer =
        Box::leak(Box::new(swarmmail::domain::ports::NullSummarizer));
    let mailbox = Mailbox::new(store, project, 5, summarizer);
    let reservations = ReservationMgr::new(store, project, 3600);
    SwarmCoordinator::new(store, project, mailbox, reservations, 3)
}

#[tokio::test]
async fn third_consecutive_rejection_blocks_the_cell() {
    let (store, bead_id) = setup("proj").await;
    let coordinator = coordinator(&store, "proj");

    for attempt in 1..=2 {
        let record = coordinator.review_begin(&bead_id).await.unwrap();
        assert_eq!(record.attempt, attempt);
        let record = coordinator
            .review_feedback(
                &bead_id,
                "worker-1",
                ReviewFeedback { status: FeedbackStatus::NeedsChanges, summary: format!("round {attempt}"), issues: vec!["fix it".into()] },
            )
            .await
            .unwrap();
        assert_eq!(record.state, ReviewState::NeedsChanges);
    }

    let third = coordinator.review_begin(&bead_id).await.unwrap();
    assert_eq!(third.attempt, 3);
    let blocked = coordinator
        .review_feedback(
            &bead_id,
            "worker-1",
            ReviewFeedback { status: FeedbackStatus::NeedsChanges, summary: "round 3".into(), issues: vec!["still broken".into()] },
        )
        .await
        .unwrap();
    assert_eq!(blocked.state, ReviewState::Blocked);

    let hive = Hive::new(&store, "proj");
    let cell = hive.get_cell(&bead_id).await.unwrap();
    assert_eq!(cell.status, swarmmail::domain::models::CellStatus::Blocked);

    let decision_types: Vec<String> = sqlx::query_scalar(
        "SELECT decision_type FROM decision_traces WHERE bead_id = ? ORDER BY id",
    )
    .bind(&bead_id)
    .fetch_all(store.pool())
    .await
    .unwrap();
    assert_eq!(decision_types.iter().filter(|t| *t == "review_rejection").count(), 3);
    assert!(decision_types.contains(&"review_approval".to_string()));

    let link_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(link_type) FROM entity_links el JOIN decision_traces dt ON dt.id = el.decision_id \
         WHERE dt.bead_id = ? AND dt.decision_type = 'review_approval' AND el.link_type = 'cites_precedent'",
    )
    .bind(&bead_id)
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(link_count, 2, "the blocked decision must cite both prior rejections as precedent");
}

#[tokio::test]
async fn approval_closes_the_review_without_blocking() {
    let (store, bead_id) = setup("proj").await;
    let coordinator = coordinator(&store, "proj");

    coordinator.review_begin(&bead_id).await.unwrap();
    let record = coordinator
        .review_feedback(&bead_id, "worker-1", ReviewFeedback { status: FeedbackStatus::Approved, summary: "looks good".into(), issues: vec![] })
        .await
        .unwrap();
    assert_eq!(record.state, ReviewState::Approved);
    assert_eq!(record.attempt, 1);
}

#[tokio::test]
async fn spawn_reserves_files_and_fails_on_conflict() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");
    let cell = hive
        .create_cell(NewCell { title: "bead".into(), cell_type: CellType::Task, priority: None, parent_id: None, description: None, created_by: None })
        .await
        .unwrap();
    let other_cell = hive
        .create_cell(NewCell { title: "other-bead".into(), cell_type: CellType::Task, priority: None, parent_id: None, description: None, created_by: None })
        .await
        .unwrap();

    let coordinator = coordinator(&store, "proj");
    let contract = coordinator
        .spawn_subtask(&cell.id, "epic-1", &["src/main.rs".to_string()], serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(contract.files, vec!["src/main.rs".to_string()]);

    let reserved = hive.get_cell(&cell.id).await.unwrap();
    assert_eq!(reserved.status, swarmmail::domain::models::CellStatus::InProgress);

    let err = coordinator.spawn_subtask(&other_cell.id, "epic-1", &["src/main.rs".to_string()], serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, swarmmail::Error::ReservationConflict { .. }));
}

#[tokio::test]
async fn completion_flags_scope_violations_but_still_closes() {
    let store = Store::open_in_memory().await.unwrap();
    let hive = Hive::new(&store, "proj");
    let cell = hive
        .create_cell(NewCell { title: "bead".into(), cell_type: CellType::Task, priority: None, parent_id: None, description: None, created_by: None })
        .await
        .unwrap();
    let coordinator = coordinator(&store, "proj");

    coordinator.spawn_subtask(&cell.id, "epic-1", &["src/a.rs".to_string()], serde_json::json!({})).await.unwrap();

    let outcome = coordinator
        .complete(&cell.id, "did the work", &["src/a.rs".to_string(), "src/unreserved.rs".to_string()], false)
        .await
        .unwrap();
    assert!(outcome.scope_violation);
    assert_eq!(outcome.files_out_of_scope, vec!["src/unreserved.rs".to_string()]);

    let closed = hive.get_cell(&cell.id).await.unwrap();
    assert_eq!(closed.status, swarmmail::domain::models::CellStatus::Closed);

    let reservations = ReservationMgr::new(&store, "proj", 3600);
    let active: Vec<_> = reservations.active_for().await.unwrap().into_iter().filter(|r| r.agent_name == cell.id).collect();
    assert!(active.is_empty(), "complete must release the agent's reservations");
}
