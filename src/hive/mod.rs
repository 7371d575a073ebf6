//! Work-item tracker: cell CRUD, dependency graph, blocked-cache, JSONL
//! export/import (spec §4.6).

pub(crate) mod blocked_cache;
mod cycle;
mod id;
mod jsonl;

use crate::domain::models::{
    Cell, CellFilter, CellId, CellStatus, CellType, Dependency, EventType, ImportReport, NewEvent,
    Relationship, ValidatedSubtask,
};
use crate::error::{Error, Result};
use crate::event_log::EventLog;
use crate::store::Store;
use serde_json::json;
use sqlx::Row;

/// Input for [`Hive::create_cell`].
#[derive(Debug, Clone)]
pub struct NewCell {
    pub title: String,
    pub cell_type: CellType,
    pub priority: Option<i32>,
    pub parent_id: Option<CellId>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// Result of [`Hive::create_epic`].
#[derive(Debug, Clone)]
pub struct EpicResult {
    pub epic: Cell,
    pub subtasks: Vec<Cell>,
}

/// Patch fields for [`Hive::update_cell`]; `None` leaves the field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct CellPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i32>,
}

pub struct Hive<'a> {
    store: &'a Store,
    project_key: String,
    project_slug: String,
}

impl<'a> Hive<'a> {
    pub fn new(store: &'a Store, project_key: impl Into<String>) -> Self {
        let project_key = project_key.into();
        let project_slug = crate::store::slugify(&project_key);
        Self { store, project_key, project_slug }
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_cell(&self, new_cell: NewCell) -> Result<Cell> {
        if new_cell.title.trim().is_empty() {
            return Err(Error::validation("hive.create_cell", "title must not be empty"));
        }
        let cell_id = id::generate(&self.project_slug);
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::CellCreated,
            json!({
                "cell_id": cell_id,
                "title": new_cell.title,
                "issue_type": new_cell.cell_type.as_str(),
                "priority": new_cell.priority.unwrap_or(100),
                "description": new_cell.description,
                "parent_id": new_cell.parent_id,
                "created_by": new_cell.created_by,
            }),
        ))
        .await?;
        self.get_cell(&cell_id).await
    }

    /// Atomic: the epic cell, every subtask cell, and every declared
    /// `blocks` dependency are appended inside one transaction via
    /// `EventLog::append_batch`. Cycle-checked before any row is written.
    #[tracing::instrument(skip(self, subtasks))]
    pub async fn create_epic(&self, title: &str, subtasks: &[ValidatedSubtask]) -> Result<EpicResult> {
        if title.trim().is_empty() {
            return Err(Error::validation("hive.create_epic", "epic title must not be empty"));
        }

        let epic_id = id::generate(&self.project_slug);
        let subtask_ids: Vec<String> = subtasks.iter().map(|_| id::generate(&self.project_slug)).collect();

        let mut events = vec![NewEvent::new(
            self.project_key.clone(),
            EventType::CellCreated,
            json!({
                "cell_id": epic_id,
                "title": title,
                "issue_type": "epic",
                "priority": 50,
            }),
        )];

        for (subtask, subtask_id) in subtasks.iter().zip(&subtask_ids) {
            events.push(NewEvent::new(
                self.project_key.clone(),
                EventType::CellCreated,
                json!({
                    "cell_id": subtask_id,
                    "title": subtask.title,
                    "issue_type": "task",
                    "priority": 100,
                    "description": subtask.description,
                    "parent_id": epic_id,
                }),
            ));
        }

        for (subtask, subtask_id) in subtasks.iter().zip(&subtask_ids) {
            for dep_index in &subtask.dependencies {
                let depends_on_id = subtask_ids
                    .get(*dep_index)
                    .ok_or_else(|| Error::validation("hive.create_epic", format!("dependency index {dep_index} out of range")))?;
                events.push(NewEvent::new(
                    self.project_key.clone(),
                    EventType::DependencyAdded,
                    json!({
                        "cell_id": subtask_id,
                        "depends_on_id": depends_on_id,
                        "relationship": "blocks",
                    }),
                ));
            }
        }

        let log = EventLog::new(self.store);
        log.append_batch(events).await?;

        let epic = self.get_cell(&epic_id).await?;
        let mut created = Vec::with_capacity(subtask_ids.len());
        for subtask_id in &subtask_ids {
            created.push(self.get_cell(subtask_id).await?);
        }
        Ok(EpicResult { epic, subtasks: created })
    }

    pub async fn get_cell(&self, id: &str) -> Result<Cell> {
        let mut tx = self.store.transaction().await?;
        let resolved = id::resolve(&mut tx, &self.project_key, id).await?;
        let cell = Self::load_cell(&mut tx, &resolved).await?;
        tx.commit().await.map_err(|e| Error::io("hive.get_cell", e.to_string()))?;
        Ok(cell)
    }

    async fn load_cell(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, id: &str) -> Result<Cell> {
        let row = sqlx::query(
            "SELECT id, project_key, title, description, cell_type, status, priority, parent_id, created_at, updated_at, deleted_at FROM cells WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| Error::io("hive.get_cell", e.to_string()))?
        .ok_or_else(|| Error::not_found("hive.get_cell", "no such cell", id))?;

        row_to_cell(&row)
    }

    #[tracing::instrument(skip(self))]
    pub async fn query_cells(&self, filter: CellFilter) -> Result<Vec<Cell>> {
        let mut sql = String::from(
            "SELECT id, project_key, title, description, cell_type, status, priority, parent_id, created_at, updated_at, deleted_at FROM cells WHERE project_key = ?",
        );
        let mut binds: Vec<String> = vec![self.project_key.clone()];

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            binds.push(status.as_str().to_string());
        }
        if let Some(cell_type) = filter.cell_type {
            sql.push_str(" AND cell_type = ?");
            binds.push(cell_type.as_str().to_string());
        }
        if let Some(parent_id) = &filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            binds.push(parent_id.clone());
        }
        if filter.ready == Some(true) {
            sql.push_str(
                " AND status = 'open' AND id NOT IN (SELECT cell_id FROM blocked_cache WHERE project_key = ?)",
            );
            binds.push(self.project_key.clone());
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::io("hive.query_cells", e.to_string()))?;

        rows.iter().map(row_to_cell).collect()
    }

    #[tracing::instrument(skip(self, patch))]
    pub async fn update_cell(&self, id: &str, patch: CellPatch) -> Result<Cell> {
        let resolved = self.resolve(id).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::CellUpdated,
            json!({
                "cell_id": resolved,
                "title": patch.title,
                "description": patch.description,
                "priority": patch.priority,
            }),
        ))
        .await?;
        self.get_cell(&resolved).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn close_cell(&self, id: &str, reason: Option<&str>) -> Result<Cell> {
        let resolved = self.resolve(id).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::CellClosed,
            json!({ "cell_id": resolved, "reason": reason }),
        ))
        .await?;
        self.get_cell(&resolved).await
    }

    /// Tombstone, not a hard delete: sets status to `tombstone`, which
    /// never transitions to anything else.
    #[tracing::instrument(skip(self))]
    pub async fn delete_cell(&self, id: &str, deleted_by: &str, reason: Option<&str>) -> Result<Cell> {
        let resolved = self.resolve(id).await?;
        let current = self.get_cell(&resolved).await?;
        if current.status == CellStatus::Tombstone {
            return Ok(current);
        }
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::CellStatusChanged,
            json!({
                "cell_id": resolved,
                "from_status": current.status.as_str(),
                "to_status": "tombstone",
                "deleted_by": deleted_by,
                "reason": reason,
            }),
        ))
        .await?;
        self.get_cell(&resolved).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_status(&self, id: &str, to_status: CellStatus) -> Result<Cell> {
        let resolved = self.resolve(id).await?;
        let current = self.get_cell(&resolved).await?;
        if current.status == CellStatus::Tombstone {
            return Err(Error::state("hive.change_status", "tombstoned cells never change status"));
        }
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::CellStatusChanged,
            json!({
                "cell_id": resolved,
                "from_status": current.status.as_str(),
                "to_status": to_status.as_str(),
            }),
        ))
        .await?;
        self.get_cell(&resolved).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_dependency(&self, from: &str, to: &str, relationship: Relationship) -> Result<()> {
        let from = self.resolve(from).await?;
        let to = self.resolve(to).await?;
        if from == to {
            return Err(Error::Cycle { operation: "hive.add_dependency", path: vec![from.clone(), to] });
        }

        let mut tx = self.store.transaction().await?;
        cycle::check(&mut tx, "hive.add_dependency", &from, &to).await?;
        tx.rollback().await.map_err(|e| Error::io("hive.add_dependency", e.to_string()))?;

        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::DependencyAdded,
            json!({ "cell_id": from, "depends_on_id": to, "relationship": relationship.as_str() }),
        ))
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_dependency(&self, from: &str, to: &str, relationship: Relationship) -> Result<()> {
        let from = self.resolve(from).await?;
        let to = self.resolve(to).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::DependencyRemoved,
            json!({ "cell_id": from, "depends_on_id": to, "relationship": relationship.as_str() }),
        ))
        .await?;
        Ok(())
    }

    pub async fn get_dependencies(&self, id: &str) -> Result<Vec<Dependency>> {
        let resolved = self.resolve(id).await?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT depends_on_id, relationship FROM dependencies WHERE cell_id = ?")
                .bind(&resolved)
                .fetch_all(self.store.pool())
                .await
                .map_err(|e| Error::io("hive.get_dependencies", e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|(depends_on_id, relationship)| {
                Relationship::from_str(&relationship).map(|relationship| Dependency {
                    cell_id: resolved.clone(),
                    depends_on_id,
                    relationship,
                })
            })
            .collect())
    }

    pub async fn get_dependents(&self, id: &str) -> Result<Vec<Dependency>> {
        let resolved = self.resolve(id).await?;
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT cell_id, relationship FROM dependencies WHERE depends_on_id = ?")
                .bind(&resolved)
                .fetch_all(self.store.pool())
                .await
                .map_err(|e| Error::io("hive.get_dependents", e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|(cell_id, relationship)| {
                Relationship::from_str(&relationship)
                    .map(|relationship| Dependency { cell_id, depends_on_id: resolved.clone(), relationship })
            })
            .collect())
    }

    pub async fn is_blocked(&self, id: &str) -> Result<bool> {
        let resolved = self.resolve(id).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(blocker_id) FROM blocked_cache WHERE project_key = ? AND cell_id = ?")
            .bind(&self.project_key)
            .bind(&resolved)
            .fetch_one(self.store.pool())
            .await
            .map_err(|e| Error::io("hive.is_blocked", e.to_string()))?;
        Ok(count > 0)
    }

    pub async fn get_blockers(&self, id: &str) -> Result<Vec<CellId>> {
        let resolved = self.resolve(id).await?;
        sqlx::query_scalar("SELECT blocker_id FROM blocked_cache WHERE project_key = ? AND cell_id = ?")
            .bind(&self.project_key)
            .bind(&resolved)
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::io("hive.get_blockers", e.to_string()))
    }

    /// Rebuild the entire project's blocked-cache from scratch, or just
    /// one cell's entry when `cell_id` is given.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_blocked_cache(&self, cell_id: Option<&str>) -> Result<()> {
        let mut tx = self.store.transaction().await?;
        match cell_id {
            Some(id) => {
                let resolved = id::resolve(&mut tx, &self.project_key, id).await?;
                blocked_cache::rebuild_affected(&mut tx, &self.project_key, &resolved).await?;
            }
            None => blocked_cache::rebuild_all(&mut tx, &self.project_key).await?,
        }
        tx.commit().await.map_err(|e| Error::io("hive.rebuild_blocked_cache", e.to_string()))?;
        Ok(())
    }

    pub async fn export_jsonl(&self, include_deleted: bool, cell_ids: Option<&[String]>) -> Result<String> {
        let mut tx = self.store.transaction().await?;
        let text = jsonl::export(&mut tx, &self.project_key, include_deleted, cell_ids).await?;
        tx.commit().await.map_err(|e| Error::io("hive.export_jsonl", e.to_string()))?;
        Ok(text)
    }

    pub async fn import_jsonl(&self, text: &str, dry_run: bool, skip_existing: bool) -> Result<ImportReport> {
        let mut tx = self.store.transaction().await?;
        let report = jsonl::import(&mut tx, &self.project_key, text, dry_run, skip_existing).await?;
        if dry_run {
            tx.rollback().await.map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
        } else {
            tx.commit().await.map_err(|e| Error::io("hive.import_jsonl", e.to_string()))?;
        }
        Ok(report)
    }

    async fn resolve(&self, fragment: &str) -> Result<String> {
        let mut tx = self.store.transaction().await?;
        let resolved = id::resolve(&mut tx, &self.project_key, fragment).await?;
        tx.commit().await.map_err(|e| Error::io("hive.resolve", e.to_string()))?;
        Ok(resolved)
    }
}

fn row_to_cell(row: &sqlx::sqlite::SqliteRow) -> Result<Cell> {
    let status_str: String = row.try_get("status").map_err(|e| Error::io("hive", e.to_string()))?;
    let type_str: String = row.try_get("cell_type").map_err(|e| Error::io("hive", e.to_string()))?;
    Ok(Cell {
        id: row.try_get("id").map_err(|e| Error::io("hive", e.to_string()))?,
        project_key: row.try_get("project_key").map_err(|e| Error::io("hive", e.to_string()))?,
        title: row.try_get("title").map_err(|e| Error::io("hive", e.to_string()))?,
        description: row.try_get("description").map_err(|e| Error::io("hive", e.to_string()))?,
        cell_type: CellType::from_str(&type_str)
            .ok_or_else(|| Error::projection("hive", format!("unknown cell_type {type_str}")))?,
        status: CellStatus::from_str(&status_str)
            .ok_or_else(|| Error::projection("hive", format!("unknown status {status_str}")))?,
        priority: row.try_get("priority").map_err(|e| Error::io("hive", e.to_string()))?,
        parent_id: row.try_get("parent_id").map_err(|e| Error::io("hive", e.to_string()))?,
        created_at: parse_ts(row, "created_at")?,
        updated_at: parse_ts(row, "updated_at")?,
        deleted_at: row
            .try_get::<Option<String>, _>("deleted_at")
            .map_err(|e| Error::io("hive", e.to_string()))?
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc)),
    })
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.try_get(column).map_err(|e| Error::io("hive", e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::io("hive", format!("parsing {column}: {e}")))
}
