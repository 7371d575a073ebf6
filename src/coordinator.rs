//! Swarm lifecycle: decomposition planning/validation, subtask spawn, the
//! review state machine, completion, and checkpoint/recovery (spec §4.7).

use crate::domain::models::{
    BeadTree, CellStatus, CompletionOutcome, DecompositionResult, EventType, FeedbackStatus,
    NewEvent, RawDecomposition, Recovery, ReviewFeedback, ReviewRecord, ReviewState,
    SpawnContract, Strategy, StrategySelection, SwarmContext, ValidatedSubtask,
};
use crate::error::{Error, Result};
use crate::event_log::EventLog;
use crate::hive::Hive;
use crate::mailbox::{Mailbox, SendOptions};
use crate::reservation::{patterns_intersect, ReservationMgr, ReserveOptions};
use crate::store::Store;
use serde_json::{json, Value};
use sqlx::Row;
use std::collections::HashSet;

/// Weighted keyword table for strategy selection (spec §4.7). Scoring is a
/// simple hit count; ties are broken by `Strategy::priority_rank`.
const STRATEGY_KEYWORDS: &[(Strategy, &[&str])] = &[
    (Strategy::FileBased, &["file", "files", "module", "refactor", "rename", "path"]),
    (Strategy::RiskBased, &["risk", "security", "migration", "breaking", "critical", "rollback"]),
    (Strategy::FeatureBased, &["feature", "add", "implement", "support", "endpoint", "ui"]),
    (Strategy::ResearchBased, &["research", "investigate", "explore", "evaluate", "compare", "spike"]),
];

pub struct SwarmCoordinator<'a> {
    store: &'a Store,
    project_key: String,
    hive: Hive<'a>,
    mailbox: Mailbox<'a>,
    reservations: ReservationMgr<'a>,
    max_rejections: u32,
}

impl<'a> SwarmCoordinator<'a> {
    pub fn new(
        store: &'a Store,
        project_key: impl Into<String>,
        mailbox: Mailbox<'a>,
        reservations: ReservationMgr<'a>,
        max_rejections: u32,
    ) -> Self {
        let project_key = project_key.into();
        let hive = Hive::new(store, project_key.clone());
        Self {
            store,
            project_key,
            hive,
            mailbox,
            reservations,
            max_rejections: max_rejections.max(1),
        }
    }

    /// Pure: builds a planning prompt template. Never touches storage.
    pub fn plan_prompt(&self, task: &str, strategy: Option<Strategy>, context: Option<&Value>, use_memory: bool) -> String {
        let selection = strategy
            .map(|strategy| StrategySelection { strategy, confidence: 1.0, alternatives: Vec::new() })
            .unwrap_or_else(|| self.select_strategy(task));

        let mut prompt = format!(
            "Decompose the following task using the {} strategy (confidence {:.2}):\n\n{task}\n\n",
            selection.strategy.as_str(),
            selection.confidence,
        );
        if use_memory {
            prompt.push_str("Consult semantic memory for relevant precedent before decomposing.\n\n");
        }
        if let Some(ctx) = context {
            prompt.push_str(&format!("Additional context:\n{ctx}\n\n"));
        }
        prompt.push_str(
            "Respond with JSON: {\"subtasks\": [{\"title\": ..., \"files\": [...], \"dependencies\": [...], \"description\": ...}]}\n\
             Rules: at least 2 subtasks; no file may appear in more than one subtask; each subtask's \
             dependency indices must reference only earlier subtasks.",
        );
        prompt
    }

    /// Token-class keyword matching with a fixed priority tie-break
    /// (`file-based > risk-based > feature-based > research-based`).
    pub fn select_strategy(&self, task: &str) -> StrategySelection {
        let lower = task.to_lowercase();
        let mut scores: Vec<(Strategy, f64)> = STRATEGY_KEYWORDS
            .iter()
            .map(|(strategy, keywords)| {
                let hits = keywords.iter().filter(|kw| lower.contains(*kw)).count();
                (*strategy, hits as f64)
            })
            .collect();
        let total: f64 = scores.iter().map(|(_, score)| score).sum();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.priority_rank().cmp(&b.0.priority_rank())));

        let (winner, winner_score) = scores[0];
        let confidence = if total > 0.0 { winner_score / total } else { 0.25 };
        let alternatives = scores
            .into_iter()
            .skip(1)
            .take(1)
            .map(|(strategy, score)| (strategy, if total > 0.0 { score / total } else { 0.0 }))
            .collect();

        StrategySelection { strategy: winner, confidence, alternatives }
    }

    /// Parses and enforces the four decomposition rules from spec §4.7. Any
    /// violation rejects the whole plan rather than partially accepting it.
    pub fn validate_decomposition(&self, raw: &RawDecomposition) -> DecompositionResult {
        if raw.subtasks.len() < 2 {
            return DecompositionResult {
                valid: false,
                bead_tree: None,
                error: Some("decomposition requires at least 2 subtasks".to_string()),
            };
        }

        let mut seen_files: HashSet<&str> = HashSet::new();
        for (index, subtask) in raw.subtasks.iter().enumerate() {
            if subtask.title.trim().is_empty() {
                return DecompositionResult {
                    valid: false,
                    bead_tree: None,
                    error: Some(format!("subtask {index} has an empty title")),
                };
            }
            for dep in &subtask.dependencies {
                if *dep >= index {
                    return DecompositionResult {
                        valid: false,
                        bead_tree: None,
                        error: Some(format!("subtask {index} has dependency index {dep}, which must be in [0, {index})")),
                    };
                }
            }
            for file in &subtask.files {
                if !seen_files.insert(file.as_str()) {
                    return DecompositionResult {
                        valid: false,
                        bead_tree: None,
                        error: Some(format!("file {file} appears in more than one subtask")),
                    };
                }
            }
        }

        let subtasks = raw
            .subtasks
            .iter()
            .enumerate()
            .map(|(index, subtask)| ValidatedSubtask {
                index,
                title: subtask.title.clone(),
                files: subtask.files.clone(),
                dependencies: subtask.dependencies.clone(),
                description: subtask.description.clone(),
            })
            .collect();

        DecompositionResult { valid: true, bead_tree: Some(BeadTree { subtasks }), error: None }
    }

    /// Reserves the subtask's files (the subtask's own bead_id is the
    /// reserving agent identity) and produces the worker prompt contract.
    /// The worker is never started if reservation fails.
    #[tracing::instrument(skip(self, shared_context))]
    pub async fn spawn_subtask(&self, bead_id: &str, epic_id: &str, files: &[String], shared_context: Value) -> Result<SpawnContract> {
        let outcome = self
            .reservations
            .reserve(
                bead_id,
                files,
                ReserveOptions { reason: Some(format!("spawned subtask {bead_id}")), exclusive: true, ttl_seconds: 0 },
            )
            .await?;
        if !outcome.conflicts.is_empty() {
            return Err(Error::ReservationConflict { operation: "coordinator.spawn_subtask", conflicts: outcome.conflicts });
        }

        self.hive.change_status(bead_id, CellStatus::InProgress).await?;

        Ok(SpawnContract {
            bead_id: bead_id.to_string(),
            epic_id: epic_id.to_string(),
            files: files.to_vec(),
            shared_context,
        })
    }

    /// `not_reviewed/needs_changes → reviewing`, incrementing the durable
    /// attempt counter.
    #[tracing::instrument(skip(self))]
    pub async fn review_begin(&self, bead_id: &str) -> Result<ReviewRecord> {
        let now = chrono::Utc::now();
        let prior_attempt: Option<i64> = sqlx::query_scalar(
            "SELECT attempt FROM review_state WHERE project_key = ? AND bead_id = ?",
        )
        .bind(&self.project_key)
        .bind(bead_id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("coordinator.review_begin", e.to_string()))?;
        let attempt = prior_attempt.unwrap_or(0) + 1;

        self.upsert_review_state(bead_id, ReviewState::Reviewing, attempt, now).await?;

        Ok(ReviewRecord { bead_id: bead_id.to_string(), state: ReviewState::Reviewing, attempt: attempt as u32, updated_at: now })
    }

    /// Drives `reviewing → {approved | needs_changes | blocked}`. On the
    /// third consecutive `needs_changes`, the cell is marked `blocked` and a
    /// decision trace records the termination with precedent links to the
    /// prior two rejections.
    #[tracing::instrument(skip(self, feedback))]
    pub async fn review_feedback(&self, bead_id: &str, worker_id: &str, feedback: ReviewFeedback) -> Result<ReviewRecord> {
        let now = chrono::Utc::now();
        let attempt: u32 = sqlx::query_scalar::<_, i64>(
            "SELECT attempt FROM review_state WHERE project_key = ? AND bead_id = ?",
        )
        .bind(&self.project_key)
        .bind(bead_id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("coordinator.review_feedback", e.to_string()))?
        .unwrap_or(1) as u32;

        match feedback.status {
            FeedbackStatus::Approved => {
                self.upsert_review_state(bead_id, ReviewState::Approved, attempt as i64, now).await?;
                Ok(ReviewRecord { bead_id: bead_id.to_string(), state: ReviewState::Approved, attempt, updated_at: now })
            }
            FeedbackStatus::NeedsChanges => {
                let rejection_decision_id = self.record_rejection_decision(bead_id, worker_id, &feedback).await?;

                if attempt >= self.max_rejections {
                    self.block_cell(bead_id, worker_id, &rejection_decision_id).await?;
                    self.upsert_review_state(bead_id, ReviewState::Blocked, attempt as i64, now).await?;
                    Ok(ReviewRecord { bead_id: bead_id.to_string(), state: ReviewState::Blocked, attempt, updated_at: now })
                } else {
                    self.hive.change_status(bead_id, CellStatus::Open).await?;
                    self.mailbox
                        .send(
                            "coordinator",
                            &[worker_id.to_string()],
                            &format!("changes requested on {bead_id}"),
                            &format!("{}\n\nissues:\n{}", feedback.summary, feedback.issues.join("\n")),
                            SendOptions { ack_required: true, ..Default::default() },
                        )
                        .await?;
                    self.upsert_review_state(bead_id, ReviewState::NeedsChanges, attempt as i64, now).await?;
                    Ok(ReviewRecord { bead_id: bead_id.to_string(), state: ReviewState::NeedsChanges, attempt, updated_at: now })
                }
            }
        }
    }

    /// Closes the cell, releases the worker's reservations, and records a
    /// completion decision trace. Unless `skip_verification` is set, flags
    /// (but does not block on) files touched outside the reserved set.
    #[tracing::instrument(skip(self, files_touched))]
    pub async fn complete(&self, bead_id: &str, summary: &str, files_touched: &[String], skip_verification: bool) -> Result<CompletionOutcome> {
        let reserved: Vec<String> = self
            .reservations
            .active_for()
            .await?
            .into_iter()
            .filter(|r| r.agent_name == bead_id)
            .map(|r| r.path_pattern)
            .collect();

        let files_out_of_scope: Vec<String> = if skip_verification {
            Vec::new()
        } else {
            files_touched
                .iter()
                .filter(|f| !reserved.iter().any(|r| patterns_intersect(r, f)))
                .cloned()
                .collect()
        };
        let scope_violation = !files_out_of_scope.is_empty();

        self.hive.close_cell(bead_id, Some(summary)).await?;
        self.reservations.release(bead_id, None, None).await?;

        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::DecisionRecorded,
            json!({
                "decision_type": "subtask_completion",
                "agent_name": bead_id,
                "bead_id": bead_id,
                "decision": {
                    "summary": summary,
                    "scope_violation": scope_violation,
                    "files_out_of_scope": files_out_of_scope,
                },
            }),
        ))
        .await?;

        Ok(CompletionOutcome { bead_id: bead_id.to_string(), scope_violation, files_out_of_scope })
    }

    /// Writes a `swarm_checkpointed` event carrying the worker's recovery
    /// blob, keyed by `(epic_id, bead_id)`.
    #[tracing::instrument(skip(self, recovery))]
    pub async fn checkpoint(
        &self,
        epic_id: &str,
        bead_id: &str,
        strategy: Strategy,
        files: &[String],
        dependencies: &[String],
        recovery: Recovery,
    ) -> Result<()> {
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::SwarmCheckpointed,
            json!({
                "epic_id": epic_id,
                "bead_id": bead_id,
                "strategy": strategy.as_str(),
                "files": files,
                "dependencies": dependencies,
                "recovery": recovery,
            }),
        ))
        .await?;
        Ok(())
    }

    /// Returns the most recent checkpoint for `(epic_id, bead_id)`. Used by
    /// worker agents recovering after a host process restart.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self, epic_id: &str, bead_id: &str) -> Result<SwarmContext> {
        let row = sqlx::query(
            "SELECT epic_id, bead_id, strategy, files, dependencies, directives, recovery, created_at, updated_at \
             FROM swarm_contexts WHERE project_key = ? AND epic_id = ? AND bead_id = ?",
        )
        .bind(&self.project_key)
        .bind(epic_id)
        .bind(bead_id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("coordinator.recover", e.to_string()))?;

        let row = row.ok_or_else(|| Error::not_found("coordinator.recover", "no checkpoint for this bead", bead_id))?;

        let files: String = row.try_get("files").map_err(|e| Error::io("coordinator.recover", e.to_string()))?;
        let dependencies: String = row.try_get("dependencies").map_err(|e| Error::io("coordinator.recover", e.to_string()))?;
        let directives: String = row.try_get("directives").map_err(|e| Error::io("coordinator.recover", e.to_string()))?;
        let recovery: String = row.try_get("recovery").map_err(|e| Error::io("coordinator.recover", e.to_string()))?;

        Ok(SwarmContext {
            epic_id: row.try_get("epic_id").map_err(|e| Error::io("coordinator.recover", e.to_string()))?,
            bead_id: row.try_get("bead_id").map_err(|e| Error::io("coordinator.recover", e.to_string()))?,
            strategy: row.try_get("strategy").map_err(|e| Error::io("coordinator.recover", e.to_string()))?,
            files: serde_json::from_str(&files).unwrap_or_default(),
            dependencies: serde_json::from_str(&dependencies).unwrap_or_default(),
            directives: serde_json::from_str(&directives).unwrap_or(Value::Null),
            recovery: serde_json::from_str(&recovery).unwrap_or_default(),
            created_at: parse_ts(&row, "created_at")?,
            updated_at: parse_ts(&row, "updated_at")?,
        })
    }

    async fn upsert_review_state(&self, bead_id: &str, state: ReviewState, attempt: i64, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO review_state (project_key, bead_id, state, attempt, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (project_key, bead_id) DO UPDATE SET
                state = excluded.state,
                attempt = excluded.attempt,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.project_key)
        .bind(bead_id)
        .bind(state.as_str())
        .bind(attempt)
        .bind(now.to_rfc3339())
        .execute(self.store.pool())
        .await
        .map_err(|e| Error::io("coordinator.review_state", e.to_string()))?;
        Ok(())
    }

    async fn record_rejection_decision(&self, bead_id: &str, worker_id: &str, feedback: &ReviewFeedback) -> Result<String> {
        let decision_id = uuid::Uuid::new_v4().to_string();
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::DecisionRecorded,
            json!({
                "decision_id": decision_id,
                "decision_type": "review_rejection",
                "agent_name": worker_id,
                "bead_id": bead_id,
                "decision": { "summary": feedback.summary, "issues": feedback.issues },
                "rationale": feedback.summary,
            }),
        ))
        .await?;
        Ok(decision_id)
    }

    /// Marks the cell `blocked` and records the 3-strike termination, with
    /// precedent links to the prior two `review_rejection` decisions for
    /// this bead. `current_rejection_id` (the just-recorded terminal-strike
    /// decision) is excluded from the precedent set: it's the blocking
    /// transition itself, not a precedent for it.
    async fn block_cell(&self, bead_id: &str, worker_id: &str, current_rejection_id: &str) -> Result<()> {
        self.hive.change_status(bead_id, CellStatus::Blocked).await?;

        let precedent_ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM decision_traces WHERE project_key = ? AND bead_id = ? AND decision_type = 'review_rejection' AND id != ? ORDER BY created_at ASC",
        )
        .bind(&self.project_key)
        .bind(bead_id)
        .bind(current_rejection_id)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::io("coordinator.block_cell", e.to_string()))?;

        let entity_links: Vec<Value> = precedent_ids
            .iter()
            .map(|id| json!({ "entity_kind": "decision", "entity_id": id, "link_type": "cites_precedent", "strength": 1.0 }))
            .collect();

        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::DecisionRecorded,
            json!({
                "decision_type": "review_approval",
                "agent_name": worker_id,
                "bead_id": bead_id,
                "decision": { "status": "blocked", "reason": "third consecutive needs_changes review" },
                "precedent_cited": precedent_ids,
                "entity_links": entity_links,
            }),
        ))
        .await?;
        Ok(())
    }
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.try_get(column).map_err(|e| Error::io("coordinator", e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::io("coordinator", format!("parsing {column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RawSubtask;

    fn coordinator_stub(store: &Store, project: &str, summarizer: &'static dyn crate::domain::ports::Summarizer) -> SwarmCoordinator<'_> {
        let mailbox = Mailbox::new(store, project, 50, summarizer);
        let reservations = ReservationMgr::new(store, project, 3600);
        SwarmCoordinator::new(store, project, mailbox, reservations, 3)
    }

    #[tokio::test]
    async fn validate_decomposition_rejects_single_subtask() {
        let store = Store::open_in_memory().await.unwrap();
        let summarizer: &'static dyn crate::domain::ports::Summarizer = Box::leak(Box::new(crate::domain::ports::NullSummarizer));
        let coordinator = coordinator_stub(&store, "proj", summarizer);
        let raw = RawDecomposition { subtasks: vec![RawSubtask { title: "only one".into(), files: vec![], dependencies: vec![], description: None }] };
        let result = coordinator.validate_decomposition(&raw);
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn validate_decomposition_rejects_duplicate_file() {
        let store = Store::open_in_memory().await.unwrap();
        let summarizer: &'static dyn crate::domain::ports::Summarizer = Box::leak(Box::new(crate::domain::ports::NullSummarizer));
        let coordinator = coordinator_stub(&store, "proj", summarizer);
        let raw = RawDecomposition {
            subtasks: vec![
                RawSubtask { title: "a".into(), files: vec!["src/main.rs".into()], dependencies: vec![], description: None },
                RawSubtask { title: "b".into(), files: vec!["src/main.rs".into()], dependencies: vec![], description: None },
            ],
        };
        let result = coordinator.validate_decomposition(&raw);
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn validate_decomposition_rejects_forward_dependency() {
        let store = Store::open_in_memory().await.unwrap();
        let summarizer: &'static dyn crate::domain::ports::Summarizer = Box::leak(Box::new(crate::domain::ports::NullSummarizer));
        let coordinator = coordinator_stub(&store, "proj", summarizer);
        let raw = RawDecomposition {
            subtasks: vec![
                RawSubtask { title: "a".into(), files: vec![], dependencies: vec![1], description: None },
                RawSubtask { title: "b".into(), files: vec![], dependencies: vec![], description: None },
            ],
        };
        let result = coordinator.validate_decomposition(&raw);
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn validate_decomposition_accepts_well_formed_plan() {
        let store = Store::open_in_memory().await.unwrap();
        let summarizer: &'static dyn crate::domain::ports::Summarizer = Box::leak(Box::new(crate::domain::ports::NullSummarizer));
        let coordinator = coordinator_stub(&store, "proj", summarizer);
        let raw = RawDecomposition {
            subtasks: vec![
                RawSubtask { title: "a".into(), files: vec!["src/a.rs".into()], dependencies: vec![], description: None },
                RawSubtask { title: "b".into(), files: vec!["src/b.rs".into()], dependencies: vec![0], description: None },
            ],
        };
        let result = coordinator.validate_decomposition(&raw);
        assert!(result.valid);
        assert_eq!(result.bead_tree.unwrap().subtasks.len(), 2);
    }

    #[test]
    fn select_strategy_prefers_file_based_on_tie() {
        let strategy = Strategy::FileBased;
        assert_eq!(strategy.priority_rank(), 0);
    }
}
