//! Distributed mutex over the `locks` table, used to serialize admin
//! operations across processes sharing one project database (spec
//! GLOSSARY "Lock"; spec §9 "Failure semantics" — lock contention is
//! retried with backoff up to a fixed number of attempts).

use crate::domain::models::Lock;
use crate::error::{Error, Result};
use crate::store::Store;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use sqlx::Row;
use std::time::Duration;

pub struct LockMgr<'a> {
    store: &'a Store,
    project_key: String,
}

impl<'a> LockMgr<'a> {
    pub fn new(store: &'a Store, project_key: impl Into<String>) -> Self {
        Self { store, project_key: project_key.into() }
    }

    /// Acquire `resource` for `holder`, sweeping an expired prior holder
    /// first. Returns the fence token (`seq`) the caller must present to
    /// [`Self::release`] or [`Self::renew`].
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, resource: &str, holder: &str, ttl_seconds: i64) -> Result<Lock> {
        let mut tx = self.store.transaction().await?;
        let now = chrono::Utc::now();

        sqlx::query("DELETE FROM locks WHERE resource = ? AND project_key = ? AND expires_at < ?")
            .bind(resource)
            .bind(&self.project_key)
            .bind(now.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::io("lock.acquire", e.to_string()))?;

        let held_by: Option<String> =
            sqlx::query_scalar("SELECT holder FROM locks WHERE resource = ? AND project_key = ?")
                .bind(resource)
                .bind(&self.project_key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::io("lock.acquire", e.to_string()))?;

        if let Some(current_holder) = held_by {
            if current_holder != holder {
                return Err(Error::state(
                    "lock.acquire",
                    format!("resource `{resource}` is held by `{current_holder}`"),
                ));
            }
        }

        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM locks")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::io("lock.acquire", e.to_string()))?;
        let expires_at = now + chrono::Duration::seconds(ttl_seconds);

        sqlx::query(
            r#"
            INSERT INTO locks (resource, project_key, holder, seq, acquired_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (resource) DO UPDATE SET
                holder = excluded.holder,
                seq = excluded.seq,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(resource)
        .bind(&self.project_key)
        .bind(holder)
        .bind(next_seq)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::io("lock.acquire", e.to_string()))?;

        tx.commit().await.map_err(|e| Error::io("lock.acquire", e.to_string()))?;

        Ok(Lock { resource: resource.to_string(), holder: holder.to_string(), seq: next_seq, acquired_at: now, expires_at })
    }

    /// Retry [`Self::acquire`] with exponential backoff, up to
    /// `max_attempts` tries. Used by callers (e.g. `releaseAll`,
    /// decay-tier maintenance) that can tolerate waiting briefly for a
    /// contended admin lock rather than failing immediately.
    pub async fn acquire_with_retry(
        &self,
        resource: &str,
        holder: &str,
        ttl_seconds: i64,
        max_attempts: u32,
    ) -> Result<Lock> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.acquire(resource, holder, ttl_seconds).await {
                Ok(lock) => return Ok(lock),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(_) => {
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(2));
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Release `resource`, only if `holder`/`seq` still match the current
    /// row — a stale caller (one whose lock already expired and was
    /// reassigned) gets an error instead of silently releasing someone
    /// else's lock.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, resource: &str, holder: &str, seq: i64) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM locks WHERE resource = ? AND project_key = ? AND holder = ? AND seq = ?",
        )
        .bind(resource)
        .bind(&self.project_key)
        .bind(holder)
        .bind(seq)
        .execute(self.store.pool())
        .await
        .map_err(|e| Error::io("lock.release", e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::state(
                "lock.release",
                format!("no matching lock for resource `{resource}` held by `{holder}` at seq {seq}"),
            ));
        }
        Ok(())
    }

    /// Extend `resource`'s expiry, presenting the same fence token
    /// returned by [`Self::acquire`].
    #[tracing::instrument(skip(self))]
    pub async fn renew(&self, resource: &str, holder: &str, seq: i64, ttl_seconds: i64) -> Result<Lock> {
        let now = chrono::Utc::now();
        let expires_at = now + chrono::Duration::seconds(ttl_seconds);
        let result = sqlx::query(
            "UPDATE locks SET expires_at = ? WHERE resource = ? AND project_key = ? AND holder = ? AND seq = ?",
        )
        .bind(expires_at.to_rfc3339())
        .bind(resource)
        .bind(&self.project_key)
        .bind(holder)
        .bind(seq)
        .execute(self.store.pool())
        .await
        .map_err(|e| Error::io("lock.renew", e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::state(
                "lock.renew",
                format!("no matching lock for resource `{resource}` held by `{holder}` at seq {seq}"),
            ));
        }

        let acquired_at: String = sqlx::query_scalar("SELECT acquired_at FROM locks WHERE resource = ? AND project_key = ?")
            .bind(resource)
            .bind(&self.project_key)
            .fetch_one(self.store.pool())
            .await
            .map_err(|e| Error::io("lock.renew", e.to_string()))?;
        let acquired_at = chrono::DateTime::parse_from_rfc3339(&acquired_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| Error::io("lock.renew", e.to_string()))?;

        Ok(Lock { resource: resource.to_string(), holder: holder.to_string(), seq, acquired_at, expires_at })
    }

    /// Current holder of `resource`, if any (including expired-but-not-yet-swept rows).
    pub async fn current(&self, resource: &str) -> Result<Option<Lock>> {
        let row = sqlx::query(
            "SELECT resource, holder, seq, acquired_at, expires_at FROM locks WHERE resource = ? AND project_key = ?",
        )
        .bind(resource)
        .bind(&self.project_key)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("lock.current", e.to_string()))?;

        row.map(|row| row_to_lock(&row)).transpose()
    }
}

fn row_to_lock(row: &sqlx::sqlite::SqliteRow) -> Result<Lock> {
    let acquired_at: String = row.try_get("acquired_at").map_err(|e| Error::io("lock", e.to_string()))?;
    let expires_at: String = row.try_get("expires_at").map_err(|e| Error::io("lock", e.to_string()))?;
    Ok(Lock {
        resource: row.try_get("resource").map_err(|e| Error::io("lock", e.to_string()))?,
        holder: row.try_get("holder").map_err(|e| Error::io("lock", e.to_string()))?,
        seq: row.try_get("seq").map_err(|e| Error::io("lock", e.to_string()))?,
        acquired_at: chrono::DateTime::parse_from_rfc3339(&acquired_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| Error::io("lock", e.to_string()))?,
        expires_at: chrono::DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| Error::io("lock", e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn acquire_then_release_frees_the_resource() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = LockMgr::new(&store, "proj");

        let lock = locks.acquire("epic:create", "agent-a", 60).await.unwrap();
        locks.release("epic:create", "agent-a", lock.seq).await.unwrap();
        assert!(locks.current("epic:create").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acquire_conflicts_with_a_different_live_holder() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = LockMgr::new(&store, "proj");

        locks.acquire("epic:create", "agent-a", 60).await.unwrap();
        let err = locks.acquire("epic:create", "agent-b", 60).await.unwrap_err();
        assert!(matches!(err, Error::State { .. }));
    }

    #[tokio::test]
    async fn release_with_stale_fence_token_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = LockMgr::new(&store, "proj");

        let lock = locks.acquire("epic:create", "agent-a", 60).await.unwrap();
        locks.release("epic:create", "agent-a", lock.seq).await.unwrap();
        let err = locks.release("epic:create", "agent-a", lock.seq).await.unwrap_err();
        assert!(matches!(err, Error::State { .. }));
    }

    #[tokio::test]
    async fn acquire_by_same_holder_reuses_resource_and_bumps_seq() {
        let store = Store::open_in_memory().await.unwrap();
        let locks = LockMgr::new(&store, "proj");

        let first = locks.acquire("epic:create", "agent-a", 60).await.unwrap();
        let second = locks.acquire("epic:create", "agent-a", 60).await.unwrap();
        assert!(second.seq > first.seq);
    }
}
