//! Full swarm lifecycle through one `SwarmSession`: decomposition
//! validation, epic creation, spawn, review approval, and completion,
//! each component reading the same projections the others wrote.

use swarmmail::config::SwarmMailConfig;
use swarmmail::domain::models::{FeedbackStatus, RawDecomposition, RawSubtask, ReviewFeedback, ReviewState};
use swarmmail::store::Store;
use swarmmail::SwarmSession;

async fn session() -> SwarmSession {
    let store = Store::open_in_memory().await.unwrap();
    SwarmSession::bare(store, "proj", SwarmMailConfig::default())
}

#[tokio::test]
async fn decompose_spawn_review_complete_round_trip() {
    let session = session().await;

    let raw = RawDecomposition {
        subtasks: vec![
            RawSubtask { title: "wire the handler".into(), files: vec!["src/handler.rs".into()], dependencies: vec![], description: None },
            RawSubtask { title: "add tests".into(), files: vec!["tests/handler_test.rs".into()], dependencies: vec![0], description: None },
        ],
    };
    let result = session.coordinator().validate_decomposition(&raw);
    assert!(result.valid);
    let bead_tree = result.bead_tree.unwrap();

    let epic = session.hive().create_epic("ship the handler", &bead_tree.subtasks).await.unwrap();
    assert_eq!(epic.subtasks.len(), 2);

    let first = &epic.subtasks[0];
    let second = &epic.subtasks[1];
    assert!(session.hive().is_blocked(&second.id).await.unwrap());

    let contract = session
        .coordinator()
        .spawn_subtask(&first.id, &epic.epic.id, &["src/handler.rs".to_string()], serde_json::json!({ "strategy": "file-based" }))
        .await
        .unwrap();
    assert_eq!(contract.bead_id, first.id);

    session.coordinator().review_begin(&first.id).await.unwrap();
    let approved = session
        .coordinator()
        .review_feedback(&first.id, "worker-1", ReviewFeedback { status: FeedbackStatus::Approved, summary: "looks right".into(), issues: vec![] })
        .await
        .unwrap();
    assert_eq!(approved.state, ReviewState::Approved);

    let outcome = session.coordinator().complete(&first.id, "handler wired up", &["src/handler.rs".to_string()], false).await.unwrap();
    assert!(!outcome.scope_violation);

    session.hive().rebuild_blocked_cache(None).await.unwrap();
    assert!(!session.hive().is_blocked(&second.id).await.unwrap(), "closing the blocker must unblock the dependent subtask");

    let reserved_after_complete = session.reservations().active_for().await.unwrap();
    assert!(reserved_after_complete.iter().all(|r| r.agent_name != first.id));
}

#[tokio::test]
async fn checkpoint_and_recover_round_trip_the_worker_context() {
    use swarmmail::domain::models::{Recovery, Strategy};

    let session = session().await;
    let epic_id = "epic-1";
    let bead_id = "bead-1";

    session
        .coordinator()
        .checkpoint(
            epic_id,
            bead_id,
            Strategy::FeatureBased,
            &["src/feature.rs".to_string()],
            &[],
            Recovery { last_progress: Some("scaffolded module".into()), files_modified: vec!["src/feature.rs".into()], error_context: None },
        )
        .await
        .unwrap();

    let recovered = session.coordinator().recover(epic_id, bead_id).await.unwrap();
    assert_eq!(recovered.epic_id, epic_id);
    assert_eq!(recovered.bead_id, bead_id);
    assert_eq!(recovered.files, vec!["src/feature.rs".to_string()]);
    assert_eq!(recovered.recovery.last_progress.as_deref(), Some("scaffolded module"));
}
