//! End-to-end reservation conflict scenario (spec §8 scenario 1).

use swarmmail::reservation::{ReservationMgr, ReserveOptions};
use swarmmail::store::Store;

#[tokio::test]
async fn exclusive_conflict_then_release_then_retry_succeeds() {
    let store = Store::open_in_memory().await.unwrap();
    let reservations = ReservationMgr::new(&store, "proj", 3600);

    let granted = reservations
        .reserve("agent-a", &["src/auth/**".to_string()], ReserveOptions::default())
        .await
        .unwrap();
    assert_eq!(granted.granted.len(), 1);
    assert!(granted.conflicts.is_empty());

    let outcome = reservations
        .reserve("agent-b", &["src/auth/login.ts".to_string()], ReserveOptions::default())
        .await
        .unwrap();
    assert!(outcome.granted.is_empty(), "conflicting reservation must grant nothing");
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].path, "src/auth/login.ts");
    assert_eq!(outcome.conflicts[0].holders, vec!["agent-a".to_string()]);

    reservations.release("agent-a", None, None).await.unwrap();

    let retry = reservations
        .reserve("agent-b", &["src/auth/login.ts".to_string()], ReserveOptions::default())
        .await
        .unwrap();
    assert_eq!(retry.granted.len(), 1);
    assert!(retry.conflicts.is_empty());
}

#[tokio::test]
async fn shared_reservations_do_not_conflict() {
    let store = Store::open_in_memory().await.unwrap();
    let reservations = ReservationMgr::new(&store, "proj", 3600);

    let opts = ReserveOptions { exclusive: false, ..Default::default() };
    let a = reservations.reserve("agent-a", &["docs/readme.md".to_string()], opts.clone()).await.unwrap();
    assert_eq!(a.granted.len(), 1);

    let b = reservations.reserve("agent-b", &["docs/readme.md".to_string()], opts).await.unwrap();
    assert_eq!(b.granted.len(), 1, "two shared reservations over the same path must both be granted");
}

#[tokio::test]
async fn reserve_then_release_roundtrip_leaves_active_set_unchanged() {
    let store = Store::open_in_memory().await.unwrap();
    let reservations = ReservationMgr::new(&store, "proj", 3600);

    let before = reservations.active_for().await.unwrap();
    reservations.reserve("agent-a", &["src/x.rs".to_string()], ReserveOptions::default()).await.unwrap();
    reservations.release("agent-a", Some(&["src/x.rs".to_string()]), None).await.unwrap();
    let after = reservations.active_for().await.unwrap();

    assert_eq!(before.len(), after.len());
}

#[tokio::test]
async fn partial_batch_conflict_grants_nothing() {
    let store = Store::open_in_memory().await.unwrap();
    let reservations = ReservationMgr::new(&store, "proj", 3600);

    reservations.reserve("agent-a", &["src/one.rs".to_string()], ReserveOptions::default()).await.unwrap();

    let outcome = reservations
        .reserve(
            "agent-b",
            &["src/two.rs".to_string(), "src/one.rs".to_string()],
            ReserveOptions::default(),
        )
        .await
        .unwrap();

    assert!(outcome.granted.is_empty(), "atomic reserve grants all-or-nothing");
    assert_eq!(outcome.conflicts.len(), 1);

    let active = reservations.active_for().await.unwrap();
    assert!(active.iter().all(|r| r.agent_name != "agent-b"));
}

#[tokio::test]
async fn expired_reservation_is_self_healing_on_next_contact() {
    let store = Store::open_in_memory().await.unwrap();
    let reservations = ReservationMgr::new(&store, "proj", 3600);

    reservations
        .reserve("agent-a", &["src/stale.rs".to_string()], ReserveOptions { ttl_seconds: -10, ..Default::default() })
        .await
        .unwrap();

    let outcome = reservations
        .reserve("agent-b", &["src/stale.rs".to_string()], ReserveOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.granted.len(), 1, "an expired exclusive reservation must not block a new one");
}
