//! Lock expiry sweeping, fence-token renewal, and retrying acquisition
//! (spec GLOSSARY "Lock"; spec §9 "lock contention retried with backoff").

use swarmmail::lock::LockMgr;
use swarmmail::store::Store;
use swarmmail::Error;

#[tokio::test]
async fn expired_lock_is_swept_on_next_acquire_attempt() {
    let store = Store::open_in_memory().await.unwrap();
    let locks = LockMgr::new(&store, "proj");

    locks.acquire("epic:create", "agent-a", -5).await.unwrap();
    let taken = locks.acquire("epic:create", "agent-b", 60).await.unwrap();
    assert_eq!(taken.holder, "agent-b");
}

#[tokio::test]
async fn renew_extends_expiry_for_the_same_fence_token() {
    let store = Store::open_in_memory().await.unwrap();
    let locks = LockMgr::new(&store, "proj");

    let lock = locks.acquire("epic:create", "agent-a", 5).await.unwrap();
    let renewed = locks.renew("epic:create", "agent-a", lock.seq, 600).await.unwrap();
    assert!(renewed.expires_at > lock.expires_at);
}

#[tokio::test]
async fn renew_with_wrong_fence_token_is_rejected() {
    let store = Store::open_in_memory().await.unwrap();
    let locks = LockMgr::new(&store, "proj");

    let lock = locks.acquire("epic:create", "agent-a", 60).await.unwrap();
    let err = locks.renew("epic:create", "agent-a", lock.seq + 1, 60).await.unwrap_err();
    assert!(matches!(err, Error::State { .. }));
}

#[tokio::test]
async fn acquire_with_retry_succeeds_once_the_prior_holder_releases() {
    let store = Store::open_in_memory().await.unwrap();
    let locks = LockMgr::new(&store, "proj");

    let first = locks.acquire("epic:create", "agent-a", 60).await.unwrap();
    locks.release("epic:create", "agent-a", first.seq).await.unwrap();

    let second = locks.acquire_with_retry("epic:create", "agent-b", 60, 5).await.unwrap();
    assert_eq!(second.holder, "agent-b");
}
