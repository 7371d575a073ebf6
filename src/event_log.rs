//! Append-only event log with projection applied inside the append
//! transaction (spec §4.2).
//!
//! `append` never returns successfully unless the projector also accepted
//! the event: if projection fails, the whole transaction rolls back and
//! the caller sees the append as not having happened.

use crate::domain::models::{Event, NewEvent, ProjectKey};
use crate::error::{Error, Result};
use crate::projector::Projector;
use crate::store::Store;
use sqlx::Row;

/// The id and sequence assigned to a freshly appended event. `id` and
/// `sequence` are the same number; kept as two fields to mirror the
/// contract's vocabulary (`append(event) -> {id, sequence}`).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Appended {
    pub id: i64,
    pub sequence: i64,
}

/// Optional filters for [`EventLog::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub after_id: Option<i64>,
    pub types: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
}

pub struct EventLog<'a> {
    store: &'a Store,
}

impl<'a> EventLog<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Append one event, running the projector inside the same
    /// transaction. If `idempotency_key` is set and already used for this
    /// project, returns the id of the prior append instead of inserting a
    /// duplicate row.
    #[tracing::instrument(skip(self, event), fields(project_key = %event.project_key, event_type = %event.event_type))]
    pub async fn append(&self, event: NewEvent) -> Result<Appended> {
        let mut tx = self.store.transaction().await?;

        if let Some(key) = &event.idempotency_key {
            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM events WHERE project_key = ? AND idempotency_key = ?",
            )
            .bind(&event.project_key)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::io("event_log.append", e.to_string()))?;

            if let Some(id) = existing {
                tx.commit().await.map_err(|e| Error::io("event_log.append", e.to_string()))?;
                return Ok(Appended { id, sequence: id });
            }
        }

        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let data_str = serde_json::to_string(&event.data)?;

        let row = sqlx::query(
            r#"
            INSERT INTO events (project_key, event_type, timestamp_ms, data, idempotency_key)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.project_key)
        .bind(&event.event_type)
        .bind(timestamp_ms)
        .bind(&data_str)
        .bind(&event.idempotency_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::io("event_log.append", e.to_string()))?;

        let id = row.last_insert_rowid();
        let committed = Event {
            id,
            project_key: event.project_key.clone(),
            event_type: event.event_type.clone(),
            timestamp_ms,
            data: event.data.clone(),
        };

        let projector = Projector::new();
        if let Err(e) = projector.apply(&mut tx, &committed).await {
            // Roll back: the append never happened from the caller's view.
            drop(tx);
            return Err(Error::projection(
                "event_log.append",
                format!("projecting {}: {e}", committed.event_type),
            ));
        }

        tx.commit().await.map_err(|e| Error::io("event_log.append", e.to_string()))?;
        Ok(Appended { id, sequence: id })
    }

    /// Append several events as a single atomic unit: all project inside
    /// one transaction, and either all commit or none do. Used by callers
    /// that must make multiple events durable together (`createEpic`,
    /// batched `reserve`).
    #[tracing::instrument(skip(self, events))]
    pub async fn append_batch(&self, events: Vec<NewEvent>) -> Result<Vec<Appended>> {
        let mut tx = self.store.transaction().await?;
        let projector = Projector::new();
        let mut appended = Vec::with_capacity(events.len());

        for event in events {
            if let Some(key) = &event.idempotency_key {
                let existing: Option<i64> = sqlx::query_scalar(
                    "SELECT id FROM events WHERE project_key = ? AND idempotency_key = ?",
                )
                .bind(&event.project_key)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::io("event_log.append_batch", e.to_string()))?;

                if let Some(id) = existing {
                    appended.push(Appended { id, sequence: id });
                    continue;
                }
            }

            let timestamp_ms = chrono::Utc::now().timestamp_millis();
            let data_str = serde_json::to_string(&event.data)?;

            let row = sqlx::query(
                r#"
                INSERT INTO events (project_key, event_type, timestamp_ms, data, idempotency_key)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.project_key)
            .bind(&event.event_type)
            .bind(timestamp_ms)
            .bind(&data_str)
            .bind(&event.idempotency_key)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::io("event_log.append_batch", e.to_string()))?;

            let id = row.last_insert_rowid();
            let committed = Event {
                id,
                project_key: event.project_key.clone(),
                event_type: event.event_type.clone(),
                timestamp_ms,
                data: event.data.clone(),
            };

            if let Err(e) = projector.apply(&mut tx, &committed).await {
                drop(tx);
                return Err(Error::projection(
                    "event_log.append_batch",
                    format!("projecting {}: {e}", committed.event_type),
                ));
            }

            appended.push(Appended { id, sequence: id });
        }

        tx.commit().await.map_err(|e| Error::io("event_log.append_batch", e.to_string()))?;
        Ok(appended)
    }

    /// Read events for a project, totally ordered by `id` ascending.
    pub async fn read(&self, project_key: &ProjectKey, filter: ReadFilter) -> Result<Vec<Event>> {
        let mut sql = String::from(
            "SELECT id, project_key, event_type, timestamp_ms, data FROM events WHERE project_key = ?",
        );
        if filter.after_id.is_some() {
            sql.push_str(" AND id > ?");
        }
        if filter.since_ms.is_some() {
            sql.push_str(" AND timestamp_ms >= ?");
        }
        if filter.until_ms.is_some() {
            sql.push_str(" AND timestamp_ms <= ?");
        }
        if let Some(types) = &filter.types {
            if !types.is_empty() {
                let placeholders = types.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                sql.push_str(&format!(" AND event_type IN ({placeholders})"));
            }
        }
        sql.push_str(" ORDER BY id ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(project_key);
        if let Some(after_id) = filter.after_id {
            query = query.bind(after_id);
        }
        if let Some(since_ms) = filter.since_ms {
            query = query.bind(since_ms);
        }
        if let Some(until_ms) = filter.until_ms {
            query = query.bind(until_ms);
        }
        if let Some(types) = &filter.types {
            for t in types {
                query = query.bind(t);
            }
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit);
        }

        let rows = query
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::io("event_log.read", e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let data_str: String = row.try_get("data").map_err(|e| Error::io("event_log.read", e.to_string()))?;
                Ok(Event {
                    id: row.try_get("id").map_err(|e| Error::io("event_log.read", e.to_string()))?,
                    project_key: row.try_get("project_key").map_err(|e| Error::io("event_log.read", e.to_string()))?,
                    event_type: row.try_get("event_type").map_err(|e| Error::io("event_log.read", e.to_string()))?,
                    timestamp_ms: row.try_get("timestamp_ms").map_err(|e| Error::io("event_log.read", e.to_string()))?,
                    data: serde_json::from_str(&data_str)?,
                })
            })
            .collect()
    }

    /// Stream every event for a project through `visit`, in order. Used to
    /// rebuild projections from scratch: `visit` normally calls
    /// `Projector::apply` against fresh, empty derived tables.
    pub async fn replay<F, Fut>(&self, project_key: &ProjectKey, mut visit: F) -> Result<()>
    where
        F: FnMut(Event) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let events = self.read(project_key, ReadFilter::default()).await?;
        for event in events {
            visit(event).await?;
        }
        Ok(())
    }
}
