//! Applies each committed event to its derived tables (spec §4.3).
//!
//! Handlers are idempotent against replay of the same event id: each one
//! upserts rather than inserts-or-dies, so re-running `replay` against
//! fresh projections reproduces the same rows as incremental application.
//! Unknown event types are accepted without touching any derived table —
//! the log keeps them, forward compatibility falls out for free.

use crate::domain::models::{CellStatus, EventType};
use crate::error::{Error, Result};
use crate::hive::blocked_cache;
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

pub struct Projector;

impl Projector {
    pub fn new() -> Self {
        Self
    }

    pub async fn apply(&self, tx: &mut Transaction<'_, Sqlite>, event: &crate::domain::models::Event) -> Result<()> {
        let kind = event.kind();
        let data = &event.data;
        let project_key = &event.project_key;
        let now = event.timestamp();

        match kind {
            EventType::AgentRegistered => self.agent_registered(tx, project_key, data, now).await,
            EventType::AgentActive => self.agent_active(tx, project_key, data, now).await,
            EventType::MessageSent => self.message_sent(tx, project_key, event.id, data, now).await,
            EventType::MessageRead => self.message_touch(tx, data, "read_at", now).await,
            EventType::MessageAcked => self.message_touch(tx, data, "acked_at", now).await,
            EventType::FileReserved => self.file_reserved(tx, project_key, event.id, data, now).await,
            EventType::FileReleased => self.file_released(tx, project_key, data, now).await,
            EventType::CellCreated => self.cell_created(tx, project_key, data, now).await,
            EventType::CellUpdated => self.cell_updated(tx, project_key, data, now).await,
            EventType::CellStatusChanged => self.cell_status_changed(tx, project_key, data, now).await,
            EventType::CellClosed => self.cell_closed(tx, project_key, data, now).await,
            EventType::DependencyAdded => self.dependency_added(tx, project_key, data, now).await,
            EventType::DependencyRemoved => self.dependency_removed(tx, project_key, data).await,
            EventType::SwarmCheckpointed => self.swarm_checkpointed(tx, project_key, data, now).await,
            EventType::DecisionRecorded => self.decision_recorded(tx, project_key, data, now).await,
            EventType::MemoryStored => self.memory_stored(tx, project_key, data, now).await,
            EventType::MemoryUpdated => self.memory_updated(tx, data, now).await,
            EventType::MemoryDeleted => self.memory_deleted(tx, data).await,
            EventType::MemoryValidated => self.memory_validated(tx, data, now).await,
            EventType::MemoryFound | EventType::Unknown => Ok(()),
            EventType::EpicCreated => Ok(()), // summary-only event, cells/deps arrive as sibling events
        }
    }

    async fn agent_registered(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let name = require_str(data, "agent_name", "projector.agent_registered")?;
        let program = data.get("program").and_then(Value::as_str);
        let model = data.get("model").and_then(Value::as_str);
        let task_description = data.get("task_description").and_then(Value::as_str);
        let now_str = now.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO agents (project_key, name, program, model, task_description, registered_at, last_active_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (project_key, name) DO NOTHING
            "#,
        )
        .bind(project_key)
        .bind(name)
        .bind(program)
        .bind(model)
        .bind(task_description)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.agent_registered", e.to_string()))?;
        Ok(())
    }

    async fn agent_active(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let name = require_str(data, "agent_name", "projector.agent_active")?;
        sqlx::query("UPDATE agents SET last_active_at = ? WHERE project_key = ? AND name = ?")
            .bind(now.to_rfc3339())
            .bind(project_key)
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.agent_active", e.to_string()))?;
        Ok(())
    }

    async fn message_sent(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        event_id: i64,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let message_id = data
            .get("message_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("msg-{event_id}"));
        let from_agent = require_str(data, "from_agent", "projector.message_sent")?;
        let subject = require_str(data, "subject", "projector.message_sent")?;
        let body = require_str(data, "body", "projector.message_sent")?;
        let thread_id = data.get("thread_id").and_then(Value::as_str);
        let importance = data.get("importance").and_then(Value::as_str).unwrap_or("normal");
        let ack_required = data.get("ack_required").and_then(Value::as_bool).unwrap_or(false);
        let to_agents: Vec<String> = data
            .get("to_agents")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        sqlx::query(
            r#"
            INSERT INTO messages (id, project_key, from_agent, subject, body, thread_id, importance, ack_required, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&message_id)
        .bind(project_key)
        .bind(from_agent)
        .bind(subject)
        .bind(body)
        .bind(thread_id)
        .bind(importance)
        .bind(i64::from(ack_required))
        .bind(now.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.message_sent", e.to_string()))?;

        // Broadcast ("*") expands to all agents currently registered in
        // this project at send time, per spec §4.4.
        let recipients: Vec<String> = if to_agents.iter().any(|a| a == crate::domain::models::BROADCAST_RECIPIENT) {
            sqlx::query_scalar("SELECT name FROM agents WHERE project_key = ?")
                .bind(project_key)
                .fetch_all(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.message_sent", e.to_string()))?
        } else {
            to_agents
        };

        for agent_name in recipients {
            sqlx::query(
                r#"
                INSERT INTO message_recipients (message_id, agent_name)
                VALUES (?, ?)
                ON CONFLICT (message_id, agent_name) DO NOTHING
                "#,
            )
            .bind(&message_id)
            .bind(&agent_name)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.message_sent", e.to_string()))?;
        }
        Ok(())
    }

    async fn message_touch(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        data: &Value,
        column: &'static str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let message_id = require_str(data, "message_id", "projector.message_touch")?;
        let agent_name = require_str(data, "agent_name", "projector.message_touch")?;
        let sql = format!(
            "UPDATE message_recipients SET {column} = ? WHERE message_id = ? AND agent_name = ? AND {column} IS NULL"
        );
        sqlx::query(&sql)
            .bind(now.to_rfc3339())
            .bind(message_id)
            .bind(agent_name)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.message_touch", e.to_string()))?;
        Ok(())
    }

    async fn file_reserved(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        event_id: i64,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let agent_name = require_str(data, "agent_name", "projector.file_reserved")?;
        let exclusive = data.get("exclusive").and_then(Value::as_bool).unwrap_or(true);
        let reason = data.get("reason").and_then(Value::as_str);
        let expires_at = data
            .get("expires_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| (now + chrono::Duration::seconds(3600)).to_rfc3339());
        let paths: Vec<String> = data
            .get("paths")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        for (idx, path) in paths.iter().enumerate() {
            let id = format!("res-{event_id}-{idx}");
            sqlx::query(
                r#"
                INSERT INTO reservations (id, project_key, agent_name, path_pattern, exclusive, reason, created_at, expires_at, released_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&id)
            .bind(project_key)
            .bind(agent_name)
            .bind(path)
            .bind(i64::from(exclusive))
            .bind(reason)
            .bind(now.to_rfc3339())
            .bind(&expires_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.file_reserved", e.to_string()))?;
        }
        Ok(())
    }

    async fn file_released(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let agent_name = require_str(data, "agent_name", "projector.file_released")?;
        let release_all = data.get("release_all").and_then(Value::as_bool).unwrap_or(false);
        let target_agent = data.get("target_agent").and_then(Value::as_str);
        let paths: Option<Vec<String>> = data
            .get("paths")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
        let reservation_ids: Option<Vec<String>> = data
            .get("reservation_ids")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());

        let now_str = now.to_rfc3339();

        if release_all {
            let scope = target_agent.unwrap_or(agent_name);
            sqlx::query(
                "UPDATE reservations SET released_at = ? WHERE project_key = ? AND agent_name = ? AND released_at IS NULL",
            )
            .bind(&now_str)
            .bind(project_key)
            .bind(scope)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.file_released", e.to_string()))?;
            return Ok(());
        }

        if let Some(ids) = reservation_ids {
            for id in ids {
                sqlx::query("UPDATE reservations SET released_at = ? WHERE id = ? AND released_at IS NULL")
                    .bind(&now_str)
                    .bind(&id)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| Error::projection("projector.file_released", e.to_string()))?;
            }
            return Ok(());
        }

        if let Some(paths) = paths {
            for path in paths {
                sqlx::query(
                    "UPDATE reservations SET released_at = ? WHERE project_key = ? AND agent_name = ? AND path_pattern = ? AND released_at IS NULL",
                )
                .bind(&now_str)
                .bind(project_key)
                .bind(agent_name)
                .bind(&path)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.file_released", e.to_string()))?;
            }
            return Ok(());
        }

        // No explicit scope: release all of this agent's own active reservations.
        sqlx::query(
            "UPDATE reservations SET released_at = ? WHERE project_key = ? AND agent_name = ? AND released_at IS NULL",
        )
        .bind(&now_str)
        .bind(project_key)
        .bind(agent_name)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.file_released", e.to_string()))?;
        Ok(())
    }

    async fn cell_created(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let cell_id = require_str(data, "cell_id", "projector.cell_created")?;
        let title = require_str(data, "title", "projector.cell_created")?;
        let issue_type = require_str(data, "issue_type", "projector.cell_created")?;
        let priority = data.get("priority").and_then(Value::as_i64).unwrap_or(100);
        let description = data.get("description").and_then(Value::as_str);
        let parent_id = data.get("parent_id").and_then(Value::as_str);
        let now_str = now.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO cells (id, project_key, title, description, cell_type, status, priority, parent_id, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, 'open', ?, ?, ?, ?, NULL)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(cell_id)
        .bind(project_key)
        .bind(title)
        .bind(description)
        .bind(issue_type)
        .bind(priority)
        .bind(parent_id)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.cell_created", e.to_string()))?;
        Ok(())
    }

    async fn cell_updated(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        _project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let cell_id = require_str(data, "cell_id", "projector.cell_updated")?;
        if let Some(title) = data.get("title").and_then(Value::as_str) {
            sqlx::query("UPDATE cells SET title = ?, updated_at = ? WHERE id = ?")
                .bind(title)
                .bind(now.to_rfc3339())
                .bind(cell_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.cell_updated", e.to_string()))?;
        }
        if let Some(description) = data.get("description").and_then(Value::as_str) {
            sqlx::query("UPDATE cells SET description = ?, updated_at = ? WHERE id = ?")
                .bind(description)
                .bind(now.to_rfc3339())
                .bind(cell_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.cell_updated", e.to_string()))?;
        }
        if let Some(priority) = data.get("priority").and_then(Value::as_i64) {
            sqlx::query("UPDATE cells SET priority = ?, updated_at = ? WHERE id = ?")
                .bind(priority)
                .bind(now.to_rfc3339())
                .bind(cell_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.cell_updated", e.to_string()))?;
        }
        Ok(())
    }

    async fn cell_status_changed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let cell_id = require_str(data, "cell_id", "projector.cell_status_changed")?;
        let to_status = require_str(data, "to_status", "projector.cell_status_changed")?;

        sqlx::query("UPDATE cells SET status = ?, updated_at = ? WHERE id = ? AND status != 'tombstone'")
            .bind(to_status)
            .bind(now.to_rfc3339())
            .bind(cell_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.cell_status_changed", e.to_string()))?;

        if let Some(status) = CellStatus::from_str(to_status) {
            if status.unblocks_dependents() {
                blocked_cache::rebuild_affected(tx, project_key, cell_id).await?;
            }
        }
        Ok(())
    }

    async fn cell_closed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let cell_id = require_str(data, "cell_id", "projector.cell_closed")?;
        sqlx::query("UPDATE cells SET status = 'closed', updated_at = ? WHERE id = ? AND status != 'tombstone'")
            .bind(now.to_rfc3339())
            .bind(cell_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.cell_closed", e.to_string()))?;
        blocked_cache::rebuild_affected(tx, project_key, cell_id).await?;
        Ok(())
    }

    async fn dependency_added(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let cell_id = require_str(data, "cell_id", "projector.dependency_added")?;
        let depends_on_id = require_str(data, "depends_on_id", "projector.dependency_added")?;
        let relationship = require_str(data, "relationship", "projector.dependency_added")?;

        sqlx::query(
            r#"
            INSERT INTO dependencies (project_key, cell_id, depends_on_id, relationship, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (cell_id, depends_on_id, relationship) DO NOTHING
            "#,
        )
        .bind(project_key)
        .bind(cell_id)
        .bind(depends_on_id)
        .bind(relationship)
        .bind(now.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.dependency_added", e.to_string()))?;

        if relationship == "blocks" {
            blocked_cache::rebuild_affected(tx, project_key, cell_id).await?;
        }
        Ok(())
    }

    async fn dependency_removed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
    ) -> Result<()> {
        let cell_id = require_str(data, "cell_id", "projector.dependency_removed")?;
        let depends_on_id = require_str(data, "depends_on_id", "projector.dependency_removed")?;
        let relationship = require_str(data, "relationship", "projector.dependency_removed")?;

        sqlx::query("DELETE FROM dependencies WHERE cell_id = ? AND depends_on_id = ? AND relationship = ?")
            .bind(cell_id)
            .bind(depends_on_id)
            .bind(relationship)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.dependency_removed", e.to_string()))?;

        blocked_cache::rebuild_affected(tx, project_key, cell_id).await?;
        Ok(())
    }

    async fn swarm_checkpointed(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let epic_id = require_str(data, "epic_id", "projector.swarm_checkpointed")?;
        let bead_id = require_str(data, "bead_id", "projector.swarm_checkpointed")?;
        let strategy = require_str(data, "strategy", "projector.swarm_checkpointed")?;
        let files = data.get("files").cloned().unwrap_or_else(|| Value::Array(vec![]));
        let dependencies = data.get("dependencies").cloned().unwrap_or_else(|| Value::Array(vec![]));
        let directives = data.get("directives").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let recovery = data.get("recovery").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let now_str = now.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO swarm_contexts (project_key, epic_id, bead_id, strategy, files, dependencies, directives, recovery, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (project_key, epic_id, bead_id) DO UPDATE SET
                strategy = excluded.strategy,
                files = excluded.files,
                dependencies = excluded.dependencies,
                directives = excluded.directives,
                recovery = excluded.recovery,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_key)
        .bind(epic_id)
        .bind(bead_id)
        .bind(strategy)
        .bind(files.to_string())
        .bind(dependencies.to_string())
        .bind(directives.to_string())
        .bind(recovery.to_string())
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.swarm_checkpointed", e.to_string()))?;
        Ok(())
    }

    async fn decision_recorded(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let decision_id = data
            .get("decision_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let decision_type = require_str(data, "decision_type", "projector.decision_recorded")?;
        let agent_name = require_str(data, "agent_name", "projector.decision_recorded")?;
        let decision = data.get("decision").cloned().unwrap_or(Value::Null);
        let epic_id = data.get("epic_id").and_then(Value::as_str);
        let bead_id = data.get("bead_id").and_then(Value::as_str);
        let rationale = data.get("rationale").and_then(Value::as_str);
        let inputs_gathered = data.get("inputs_gathered").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let policy_evaluated = data.get("policy_evaluated").cloned().unwrap_or_else(|| Value::Object(Default::default()));
        let alternatives = data.get("alternatives").cloned().unwrap_or_else(|| Value::Array(vec![]));
        let precedent_cited = data.get("precedent_cited").cloned().unwrap_or_else(|| Value::Array(vec![]));
        let quality_score = data.get("quality_score").and_then(Value::as_f64);
        let now_str = now.to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO decision_traces (
                id, project_key, decision_type, epic_id, bead_id, agent_name, decision,
                rationale, inputs_gathered, policy_evaluated, alternatives, precedent_cited,
                outcome_event_id, quality_score, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&decision_id)
        .bind(project_key)
        .bind(decision_type)
        .bind(epic_id)
        .bind(bead_id)
        .bind(agent_name)
        .bind(decision.to_string())
        .bind(rationale)
        .bind(inputs_gathered.to_string())
        .bind(policy_evaluated.to_string())
        .bind(alternatives.to_string())
        .bind(precedent_cited.to_string())
        .bind(quality_score)
        .bind(&now_str)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.decision_recorded", e.to_string()))?;

        if let Some(links) = data.get("entity_links").and_then(Value::as_array) {
            for link in links {
                let entity_kind = link.get("entity_kind").and_then(Value::as_str).unwrap_or("cell");
                let entity_id = link.get("entity_id").and_then(Value::as_str).unwrap_or_default();
                let link_type = link.get("link_type").and_then(Value::as_str).unwrap_or("related");
                let strength = link.get("strength").and_then(Value::as_f64).unwrap_or(1.0).clamp(0.0, 1.0);

                sqlx::query(
                    "INSERT INTO entity_links (decision_id, entity_kind, entity_id, link_type, strength) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&decision_id)
                .bind(entity_kind)
                .bind(entity_id)
                .bind(link_type)
                .bind(strength)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.decision_recorded", e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn memory_stored(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_key: &str,
        data: &Value,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let memory_id = require_str(data, "memory_id", "projector.memory_stored")?;
        let content = data
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| data.get("content_preview").and_then(Value::as_str))
            .unwrap_or_default();
        let tags = data.get("tags").cloned().unwrap_or_else(|| Value::Array(vec![]));
        let collection = data.get("collection").and_then(Value::as_str).unwrap_or("default");
        let confidence = data.get("confidence").and_then(Value::as_f64).unwrap_or(1.0);
        let now_str = now.to_rfc3339();
        let embedding: Option<Vec<u8>> = data
            .get("embedding")
            .and_then(Value::as_array)
            .map(|arr| {
                let floats: Vec<f32> = arr.iter().filter_map(Value::as_f64).map(|v| v as f32).collect();
                crate::store::vector::encode_embedding(&floats)
            });

        sqlx::query(
            r#"
            INSERT INTO memories (id, project_key, content, tags, collection, confidence, decay_tier, created_at, validated_at, embedding)
            VALUES (?, ?, ?, ?, ?, ?, 'hot', ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(memory_id)
        .bind(project_key)
        .bind(content)
        .bind(tags.to_string())
        .bind(collection)
        .bind(confidence)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&embedding)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::projection("projector.memory_stored", e.to_string()))?;

        sqlx::query("INSERT INTO memories_fts (id, content) VALUES (?, ?)")
            .bind(memory_id)
            .bind(content)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.memory_stored", e.to_string()))?;
        Ok(())
    }

    async fn memory_updated(&self, tx: &mut Transaction<'_, Sqlite>, data: &Value, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let memory_id = require_str(data, "memory_id", "projector.memory_updated")?;
        if let Some(content) = data.get("content").and_then(Value::as_str) {
            sqlx::query("UPDATE memories SET content = ? WHERE id = ?")
                .bind(content)
                .bind(memory_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.memory_updated", e.to_string()))?;
            sqlx::query("UPDATE memories_fts SET content = ? WHERE id = ?")
                .bind(content)
                .bind(memory_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.memory_updated", e.to_string()))?;
        }
        if let Some(tags) = data.get("tags") {
            sqlx::query("UPDATE memories SET tags = ? WHERE id = ?")
                .bind(tags.to_string())
                .bind(memory_id)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::projection("projector.memory_updated", e.to_string()))?;
        }
        let _ = now;
        Ok(())
    }

    async fn memory_deleted(&self, tx: &mut Transaction<'_, Sqlite>, data: &Value) -> Result<()> {
        let memory_id = require_str(data, "memory_id", "projector.memory_deleted")?;
        sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(memory_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.memory_deleted", e.to_string()))?;
        sqlx::query("DELETE FROM memories_fts WHERE id = ?")
            .bind(memory_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.memory_deleted", e.to_string()))?;
        Ok(())
    }

    async fn memory_validated(&self, tx: &mut Transaction<'_, Sqlite>, data: &Value, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let memory_id = require_str(data, "memory_id", "projector.memory_validated")?;
        let now_str = now.to_rfc3339();
        sqlx::query("UPDATE memories SET validated_at = ?, decay_tier = 'hot' WHERE id = ?")
            .bind(&now_str)
            .bind(memory_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.memory_validated", e.to_string()))?;
        sqlx::query("INSERT INTO memory_validations (memory_id, validated_at) VALUES (?, ?)")
            .bind(memory_id)
            .bind(&now_str)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::projection("projector.memory_validated", e.to_string()))?;
        Ok(())
    }
}

impl Default for Projector {
    fn default() -> Self {
        Self::new()
    }
}

fn require_str<'a>(data: &'a Value, field: &'static str, operation: &'static str) -> Result<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::projection(operation, format!("missing required field `{field}`")))
}
