//! Per-agent inbox, threaded messages, ack/read tracking, bounded fetch
//! (spec §4.4).
//!
//! `inbox` never returns more than `max_limit` headers regardless of what
//! the caller asks for — this is a design contract, not a convenience, so
//! the cap is enforced here rather than left to callers.

use crate::domain::models::{EventType, Importance, MessageHeader, NewEvent, ThreadSummary};
use crate::domain::ports::Summarizer;
use crate::error::{Error, Result};
use crate::event_log::EventLog;
use crate::store::Store;
use serde_json::json;
use sqlx::Row;

pub struct Mailbox<'a> {
    store: &'a Store,
    project_key: String,
    max_inbox_limit: u32,
    summarizer: &'a dyn Summarizer,
}

/// Options for [`Mailbox::send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub ack_required: bool,
}

/// Options for [`Mailbox::inbox`].
#[derive(Debug, Clone, Default)]
pub struct InboxOptions {
    pub limit: Option<u32>,
    pub unread_only: bool,
    pub include_bodies: bool,
}

impl<'a> Mailbox<'a> {
    pub fn new(store: &'a Store, project_key: impl Into<String>, max_inbox_limit: u32, summarizer: &'a dyn Summarizer) -> Self {
        Self { store, project_key: project_key.into(), max_inbox_limit, summarizer }
    }

    #[tracing::instrument(skip(self, body))]
    pub async fn send(&self, from: &str, to: &[String], subject: &str, body: &str, options: SendOptions) -> Result<String> {
        if to.is_empty() {
            return Err(Error::validation("mailbox.send", "at least one recipient is required"));
        }
        let message_id = uuid::Uuid::new_v4().to_string();
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::MessageSent,
            json!({
                "message_id": message_id,
                "from_agent": from,
                "to_agents": to,
                "subject": subject,
                "body": body,
                "thread_id": options.thread_id,
                "importance": options.importance.as_str(),
                "ack_required": options.ack_required,
            }),
        ))
        .await?;
        Ok(message_id)
    }

    /// Returns at most `min(options.limit.unwrap_or(max), max)` headers,
    /// newest first. Bodies are omitted unless `include_bodies` is set.
    #[tracing::instrument(skip(self))]
    pub async fn inbox(&self, agent: &str, options: InboxOptions) -> Result<Vec<MessageHeader>> {
        let limit = options.limit.unwrap_or(self.max_inbox_limit).min(self.max_inbox_limit);

        let mut sql = String::from(
            r#"
            SELECT m.id, m.from_agent, m.subject, m.thread_id, m.importance, m.ack_required,
                   m.created_at, r.read_at, r.acked_at, m.body
            FROM message_recipients r
            JOIN messages m ON m.id = r.message_id
            WHERE r.agent_name = ? AND m.project_key = ?
            "#,
        );
        if options.unread_only {
            sql.push_str(" AND r.read_at IS NULL");
        }
        sql.push_str(" ORDER BY m.created_at DESC LIMIT ?");

        let rows = sqlx::query(&sql)
            .bind(agent)
            .bind(&self.project_key)
            .bind(i64::from(limit))
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::io("mailbox.inbox", e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(MessageHeader {
                    id: row.try_get("id").map_err(|e| Error::io("mailbox.inbox", e.to_string()))?,
                    from_agent: row.try_get("from_agent").map_err(|e| Error::io("mailbox.inbox", e.to_string()))?,
                    subject: row.try_get("subject").map_err(|e| Error::io("mailbox.inbox", e.to_string()))?,
                    thread_id: row.try_get("thread_id").map_err(|e| Error::io("mailbox.inbox", e.to_string()))?,
                    importance: Importance::from_str(
                        &row.try_get::<String, _>("importance").map_err(|e| Error::io("mailbox.inbox", e.to_string()))?,
                    ),
                    ack_required: row.try_get::<i64, _>("ack_required").map_err(|e| Error::io("mailbox.inbox", e.to_string()))? != 0,
                    created_at: parse_ts(&row, "created_at")?,
                    read_at: parse_ts_opt(&row, "read_at")?,
                    acked_at: parse_ts_opt(&row, "acked_at")?,
                    body: if options.include_bodies {
                        row.try_get("body").map_err(|e| Error::io("mailbox.inbox", e.to_string()))?
                    } else {
                        None
                    },
                })
            })
            .collect()
    }

    /// Fetch one message's body and mark it read for `agent`.
    #[tracing::instrument(skip(self))]
    pub async fn read(&self, message_id: &str, agent: &str) -> Result<String> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT m.body FROM messages m JOIN message_recipients r ON r.message_id = m.id WHERE m.id = ? AND r.agent_name = ?",
        )
        .bind(message_id)
        .bind(agent)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("mailbox.read", e.to_string()))?;

        let body = body.ok_or_else(|| Error::not_found("mailbox.read", "no such message for this agent", message_id))?;

        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::MessageRead,
            json!({ "message_id": message_id, "agent_name": agent }),
        ))
        .await?;
        Ok(body)
    }

    #[tracing::instrument(skip(self))]
    pub async fn ack(&self, message_id: &str, agent: &str) -> Result<()> {
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM message_recipients WHERE message_id = ? AND agent_name = ?",
        )
        .bind(message_id)
        .bind(agent)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("mailbox.ack", e.to_string()))?;
        if exists.is_none() {
            return Err(Error::not_found("mailbox.ack", "no such message for this agent", message_id));
        }

        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::MessageAcked,
            json!({ "message_id": message_id, "agent_name": agent }),
        ))
        .await?;
        Ok(())
    }

    /// Aggregate counts, participants, and last activity for a thread; a
    /// prose summary is attached when the configured summarizer produces
    /// one, otherwise `prose` is `None` and callers fall back to the
    /// structural fields.
    #[tracing::instrument(skip(self))]
    pub async fn summarize_thread(&self, thread_id: &str) -> Result<ThreadSummary> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT from_agent, body, created_at FROM messages WHERE project_key = ? AND thread_id = ? ORDER BY created_at ASC",
        )
        .bind(&self.project_key)
        .bind(thread_id)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::io("mailbox.summarize_thread", e.to_string()))?;

        if rows.is_empty() {
            return Err(Error::not_found("mailbox.summarize_thread", "no messages in thread", thread_id));
        }

        let mut participants: Vec<String> = Vec::new();
        let mut bodies = Vec::with_capacity(rows.len());
        let mut last_activity = chrono::Utc::now();
        for (from_agent, body, created_at) in &rows {
            if !participants.contains(from_agent) {
                participants.push(from_agent.clone());
            }
            bodies.push(body.clone());
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(created_at) {
                last_activity = dt.with_timezone(&chrono::Utc);
            }
        }

        let prose = self.summarizer.summarize(&bodies).await.unwrap_or(None);

        Ok(ThreadSummary {
            thread_id: thread_id.to_string(),
            message_count: rows.len(),
            participants,
            last_activity,
            prose,
        })
    }
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.try_get(column).map_err(|e| Error::io("mailbox", e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::io("mailbox", format!("parsing {column}: {e}")))
}

fn parse_ts_opt(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let s: Option<String> = row.try_get(column).map_err(|e| Error::io("mailbox", e.to_string()))?;
    Ok(s.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&chrono::Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::NullSummarizer;

    #[tokio::test]
    async fn inbox_clamps_limit_above_cap() {
        let store = Store::open_in_memory().await.unwrap();
        let summarizer = NullSummarizer;
        let mailbox = Mailbox::new(&store, "proj", 5, &summarizer);

        // Register recipient so projector accepts a direct send.
        let log = EventLog::new(&store);
        log.append(NewEvent::new(
            "proj".to_string(),
            EventType::AgentRegistered,
            json!({ "agent_name": "bob" }),
        ))
        .await
        .unwrap();

        for i in 0..10 {
            mailbox
                .send("alice", &["bob".to_string()], &format!("subject {i}"), "body", SendOptions::default())
                .await
                .unwrap();
        }

        let headers = mailbox.inbox("bob", InboxOptions { limit: Some(100), ..Default::default() }).await.unwrap();
        assert_eq!(headers.len(), 5);
    }
}
