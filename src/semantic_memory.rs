//! Content-addressed semantic memory: embedding-backed retrieval with FTS
//! fallback, decay tiers, duplicate suppression, and SKOS-flavored entity
//! linking (spec §4.8).

use crate::domain::models::{
    DecayBoundaries, DecayTier, EventType, Memory, MemoryEntity, NewEvent, RetrievalMethod,
    ScoredMemory, TaxonomyNode,
};
use crate::domain::models::MemoryStats;
use crate::domain::ports::{EntityExtractor, ExtractionResult};
use crate::domain::ports::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::event_log::EventLog;
use crate::store::vector::{cosine_score, decode_embedding};
use crate::store::Store;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Bound on the in-memory duplicate-detection cache, per spec §4.8
/// ("bounded ~100 entries, LRU-ish").
const DEDUP_CACHE_CAPACITY: usize = 100;

/// Characters kept from content before dedup-hashing, per spec §4.8.
const DEDUP_HASH_PREFIX_CHARS: usize = 100;

/// Depth bound for [`SemanticMemory::taxonomy_tree`] traversal, guarding
/// against cycles in `memory_links`.
const MAX_TAXONOMY_DEPTH: usize = 8;

/// Options for [`SemanticMemory::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub tags: Vec<String>,
    pub collection: Option<String>,
    pub confidence: Option<f64>,
    pub extract_entities: bool,
}

/// Result of a [`SemanticMemory::store`] call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreOutcome {
    pub id: String,
    pub duplicate: bool,
}

/// Options for [`SemanticMemory::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub limit: Option<u32>,
    /// Force full-text retrieval even when an embedding provider is
    /// configured.
    pub fts: bool,
    pub expand: bool,
    pub collection: Option<String>,
    pub decay_tier: Option<DecayTier>,
}

/// Patch accepted by [`SemanticMemory::update`]. Only `content` and `tags`
/// round-trip through the event log today — the projector does not yet
/// persist `confidence`/`collection` changes (see DESIGN.md).
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct SemanticMemory<'a> {
    store: &'a Store,
    project_key: String,
    embedder: &'a dyn EmbeddingProvider,
    extractor: &'a dyn EntityExtractor,
    decay_boundaries: DecayBoundaries,
    dedup_score: f64,
    dedup_cache: DedupCache,
    last_recall_at_ms: AtomicI64,
    recall_cooldown_ms: i64,
}

impl<'a> SemanticMemory<'a> {
    pub fn new(
        store: &'a Store,
        project_key: impl Into<String>,
        embedder: &'a dyn EmbeddingProvider,
        extractor: &'a dyn EntityExtractor,
        decay_boundaries: DecayBoundaries,
        dedup_score: f64,
        recall_cooldown_ms: i64,
    ) -> Self {
        Self {
            store,
            project_key: project_key.into(),
            embedder,
            extractor,
            decay_boundaries,
            dedup_score,
            dedup_cache: DedupCache::new(),
            last_recall_at_ms: AtomicI64::new(0),
            recall_cooldown_ms,
        }
    }

    /// Store `content`, suppressing duplicates and optionally extracting
    /// entities/taxonomy links. See spec §4.8 "Duplicate suppression".
    #[tracing::instrument(skip(self, content))]
    pub async fn store(&self, content: &str, options: StoreOptions) -> Result<StoreOutcome> {
        if content.trim().is_empty() {
            return Err(Error::validation("semantic_memory.store", "content must not be empty"));
        }

        let hash = content_hash(content);
        if let Some(existing_id) = self.dedup_cache.get(&hash) {
            return Ok(StoreOutcome { id: existing_id, duplicate: true });
        }

        let candidates = self
            .find(content, FindOptions { limit: Some(3), ..Default::default() })
            .await
            .unwrap_or_default();
        if let Some(top) = candidates.first() {
            if top.score >= self.dedup_score {
                self.dedup_cache.insert(hash, top.memory.id.clone());
                return Ok(StoreOutcome { id: top.memory.id.clone(), duplicate: true });
            }
        }

        let memory_id = uuid::Uuid::new_v4().to_string();
        let embedding = match self.embedder.embed(content).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "semantic_memory.store: embedding provider failed, storing without a vector");
                None
            }
        };

        let extraction = if options.extract_entities {
            match self.extractor.extract(content).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "semantic_memory.store: entity extraction failed, storing without linkage");
                    ExtractionResult::default()
                }
            }
        } else {
            ExtractionResult::default()
        };

        let preview: String = content.chars().take(200).collect();
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::MemoryStored,
            json!({
                "memory_id": memory_id,
                "content": content,
                "content_preview": preview,
                "tags": options.tags,
                "collection": options.collection.clone().unwrap_or_else(|| "default".to_string()),
                "confidence": options.confidence.unwrap_or(1.0),
                "embedding": embedding,
            }),
        ))
        .await?;

        if !extraction.entities.is_empty() || !extraction.relations.is_empty() {
            if let Err(e) = self.link_entities(&memory_id, &extraction).await {
                tracing::warn!(error = %e, "semantic_memory.store: entity linkage failed, memory stored without it");
            }
        }

        self.dedup_cache.insert(hash, memory_id.clone());
        Ok(StoreOutcome { id: memory_id, duplicate: false })
    }

    /// Entity/taxonomy links are maintained outside the append transaction,
    /// the same way `blocked_cache` is: they are a derived projection of
    /// an optional, failure-tolerant extraction step, not part of the
    /// event's required fields.
    async fn link_entities(&self, memory_id: &str, extraction: &ExtractionResult) -> Result<()> {
        let mut tx = self.store.transaction().await?;

        for entity in &extraction.entities {
            sqlx::query(
                "INSERT INTO memory_entities (memory_id, pref_label, alt_labels) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(memory_id)
            .bind(&entity.pref_label)
            .bind(serde_json::to_string(&entity.alt_labels)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::io("semantic_memory.link_entities", e.to_string()))?;
        }

        for relation in &extraction.relations {
            if let Some(label) = &relation.broader {
                self.link_to_label(&mut tx, memory_id, label, "broader").await?;
            }
            if let Some(label) = &relation.narrower {
                self.link_to_label(&mut tx, memory_id, label, "narrower").await?;
            }
            if let Some(label) = &relation.related {
                self.link_to_label(&mut tx, memory_id, label, "related").await?;
            }
        }

        tx.commit().await.map_err(|e| Error::io("semantic_memory.link_entities", e.to_string()))?;
        Ok(())
    }

    async fn link_to_label(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        memory_id: &str,
        label: &str,
        kind: &str,
    ) -> Result<()> {
        let targets: Vec<String> = sqlx::query_scalar(
            "SELECT me.memory_id FROM memory_entities me JOIN memories m ON m.id = me.memory_id WHERE m.project_key = ? AND me.pref_label = ? AND me.memory_id != ?",
        )
        .bind(&self.project_key)
        .bind(label)
        .bind(memory_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| Error::io("semantic_memory.link_to_label", e.to_string()))?;

        for target in targets {
            sqlx::query(
                "INSERT INTO memory_links (from_memory_id, to_memory_id, kind) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(memory_id)
            .bind(&target)
            .bind(kind)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::io("semantic_memory.link_to_label", e.to_string()))?;
        }
        Ok(())
    }

    /// Vector search against `embedding`-populated rows when an embedding
    /// is available, otherwise FTS. See spec §4.8 "Retrieval".
    #[tracing::instrument(skip(self, query))]
    pub async fn find(&self, query: &str, options: FindOptions) -> Result<Vec<ScoredMemory>> {
        let limit = options.limit.unwrap_or(5).max(1);

        let mut results = if options.fts {
            self.find_fts(query, limit, &options).await?
        } else {
            match self.embedder.embed(query).await {
                Ok(Some(vector)) => self.find_semantic(&vector, limit, &options).await?,
                Ok(None) => self.find_fts(query, limit, &options).await?,
                Err(e) => {
                    tracing::warn!(error = %e, "semantic_memory.find: embedding provider failed, falling back to FTS");
                    self.find_fts(query, limit, &options).await?
                }
            }
        };

        if options.expand {
            results = self.expand_results(results).await?;
        }
        Ok(results)
    }

    async fn find_semantic(&self, query_vector: &[f32], limit: u32, options: &FindOptions) -> Result<Vec<ScoredMemory>> {
        let mut sql = String::from(
            "SELECT id, project_key, content, tags, collection, confidence, decay_tier, created_at, validated_at, embedding FROM memories WHERE project_key = ? AND embedding IS NOT NULL",
        );
        if options.collection.is_some() {
            sql.push_str(" AND collection = ?");
        }
        if options.decay_tier.is_some() {
            sql.push_str(" AND decay_tier = ?");
        }

        let mut q = sqlx::query(&sql).bind(&self.project_key);
        if let Some(collection) = &options.collection {
            q = q.bind(collection);
        }
        if let Some(tier) = options.decay_tier {
            q = q.bind(tier.as_str());
        }
        let rows = q.fetch_all(self.store.pool()).await.map_err(|e| Error::io("semantic_memory.find", e.to_string()))?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let memory = row_to_memory(row)?;
            let Some(embedding) = &memory.embedding else { continue };
            if embedding.len() != query_vector.len() {
                continue;
            }
            let score = cosine_score(query_vector, embedding)?;
            scored.push(ScoredMemory { memory, score, via: RetrievalMethod::Semantic });
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit as usize);
        Ok(scored)
    }

    async fn find_fts(&self, query: &str, limit: u32, options: &FindOptions) -> Result<Vec<ScoredMemory>> {
        let phrase = escape_fts_query(query);
        let mut sql = String::from(
            r#"
            SELECT m.id, m.project_key, m.content, m.tags, m.collection, m.confidence, m.decay_tier,
                   m.created_at, m.validated_at, m.embedding, bm25(memories_fts) AS rank
            FROM memories_fts
            JOIN memories m ON m.id = memories_fts.id
            WHERE memories_fts MATCH ? AND m.project_key = ?
            "#,
        );
        if options.collection.is_some() {
            sql.push_str(" AND m.collection = ?");
        }
        if options.decay_tier.is_some() {
            sql.push_str(" AND m.decay_tier = ?");
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut q = sqlx::query(&sql).bind(phrase).bind(&self.project_key);
        if let Some(collection) = &options.collection {
            q = q.bind(collection);
        }
        if let Some(tier) = options.decay_tier {
            q = q.bind(tier.as_str());
        }
        q = q.bind(i64::from(limit));

        let rows = q.fetch_all(self.store.pool()).await.map_err(|e| Error::io("semantic_memory.find", e.to_string()))?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.try_get("rank").unwrap_or(0.0);
                let score = (1.0 / (1.0 + rank.abs())).clamp(0.0, 1.0);
                Ok(ScoredMemory { memory: row_to_memory(row)?, score, via: RetrievalMethod::Fts })
            })
            .collect()
    }

    async fn expand_results(&self, results: Vec<ScoredMemory>) -> Result<Vec<ScoredMemory>> {
        let mut seen: HashSet<String> = results.iter().map(|r| r.memory.id.clone()).collect();
        let mut expanded = results.clone();

        for result in &results {
            let linked: Vec<String> = sqlx::query_scalar(
                "SELECT to_memory_id FROM memory_links WHERE from_memory_id = ? UNION SELECT from_memory_id FROM memory_links WHERE to_memory_id = ?",
            )
            .bind(&result.memory.id)
            .bind(&result.memory.id)
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::io("semantic_memory.expand", e.to_string()))?;

            for id in linked {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Ok(memory) = self.get(&id).await {
                    expanded.push(ScoredMemory { memory, score: result.score * 0.9, via: result.via });
                }
            }
        }
        Ok(expanded)
    }

    pub async fn get(&self, id: &str) -> Result<Memory> {
        let row = sqlx::query(
            "SELECT id, project_key, content, tags, collection, confidence, decay_tier, created_at, validated_at, embedding FROM memories WHERE project_key = ? AND id = ?",
        )
        .bind(&self.project_key)
        .bind(id)
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| Error::io("semantic_memory.get", e.to_string()))?
        .ok_or_else(|| Error::not_found("semantic_memory.get", "no such memory", id))?;
        row_to_memory(&row)
    }

    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: MemoryPatch) -> Result<()> {
        self.get(id).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(
            self.project_key.clone(),
            EventType::MemoryUpdated,
            json!({ "memory_id": id, "content": patch.content, "tags": patch.tags }),
        ))
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.get(id).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(self.project_key.clone(), EventType::MemoryDeleted, json!({ "memory_id": id })))
            .await?;
        Ok(())
    }

    /// Reset a memory's decay timer to `hot`, per spec §4.8 "Decay tiers".
    #[tracing::instrument(skip(self))]
    pub async fn validate(&self, id: &str) -> Result<()> {
        self.get(id).await?;
        let log = EventLog::new(self.store);
        log.append(NewEvent::new(self.project_key.clone(), EventType::MemoryValidated, json!({ "memory_id": id })))
            .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE project_key = ?")
            .bind(&self.project_key)
            .fetch_one(self.store.pool())
            .await
            .map_err(|e| Error::io("semantic_memory.stats", e.to_string()))?;
        let with_embedding: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE project_key = ? AND embedding IS NOT NULL")
                .bind(&self.project_key)
                .fetch_one(self.store.pool())
                .await
                .map_err(|e| Error::io("semantic_memory.stats", e.to_string()))?;

        let by_tier_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT decay_tier, COUNT(*) FROM memories WHERE project_key = ? GROUP BY decay_tier")
                .bind(&self.project_key)
                .fetch_all(self.store.pool())
                .await
                .map_err(|e| Error::io("semantic_memory.stats", e.to_string()))?;
        let by_collection_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT collection, COUNT(*) FROM memories WHERE project_key = ? GROUP BY collection")
                .bind(&self.project_key)
                .fetch_all(self.store.pool())
                .await
                .map_err(|e| Error::io("semantic_memory.stats", e.to_string()))?;

        Ok(MemoryStats {
            total: total.max(0) as usize,
            by_tier: by_tier_rows.into_iter().map(|(k, v)| (k, v.max(0) as usize)).collect(),
            by_collection: by_collection_rows.into_iter().map(|(k, v)| (k, v.max(0) as usize)).collect(),
            with_embedding: with_embedding.max(0) as usize,
        })
    }

    pub async fn list_entities(&self) -> Result<Vec<MemoryEntity>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT me.memory_id, me.pref_label, me.alt_labels FROM memory_entities me JOIN memories m ON m.id = me.memory_id WHERE m.project_key = ?",
        )
        .bind(&self.project_key)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::io("semantic_memory.list_entities", e.to_string()))?;
        rows.into_iter().map(row_to_entity).collect()
    }

    pub async fn get_entity(&self, label: &str) -> Result<Vec<MemoryEntity>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT me.memory_id, me.pref_label, me.alt_labels FROM memory_entities me JOIN memories m ON m.id = me.memory_id WHERE m.project_key = ? AND me.pref_label = ?",
        )
        .bind(&self.project_key)
        .bind(label)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::io("semantic_memory.get_entity", e.to_string()))?;
        rows.into_iter().map(row_to_entity).collect()
    }

    /// Breadth-first walk of `narrower` links rooted at `root_label`,
    /// bounded by [`MAX_TAXONOMY_DEPTH`] to tolerate cyclic extraction
    /// output without looping forever.
    pub async fn taxonomy_tree(&self, root_label: &str) -> Result<TaxonomyNode> {
        let mut nodes: HashMap<String, (Vec<String>, Vec<String>)> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((root_label.to_string(), 0));
        visited.insert(root_label.to_string());

        while let Some((label, depth)) = queue.pop_front() {
            let memory_ids = self.memory_ids_for_entity(&label).await?;
            let mut child_labels = Vec::new();
            if depth < MAX_TAXONOMY_DEPTH && !memory_ids.is_empty() {
                child_labels = self.narrower_labels_for(&memory_ids).await?;
                for child in &child_labels {
                    if visited.insert(child.clone()) {
                        queue.push_back((child.clone(), depth + 1));
                    }
                }
            }
            nodes.insert(label, (memory_ids, child_labels));
        }

        Ok(assemble_taxonomy(root_label, &nodes))
    }

    async fn memory_ids_for_entity(&self, label: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT me.memory_id FROM memory_entities me JOIN memories m ON m.id = me.memory_id WHERE m.project_key = ? AND me.pref_label = ?",
        )
        .bind(&self.project_key)
        .bind(label)
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::io("semantic_memory.taxonomy_tree", e.to_string()))
    }

    async fn narrower_labels_for(&self, memory_ids: &[String]) -> Result<Vec<String>> {
        if memory_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = memory_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT DISTINCT me.pref_label FROM memory_links ml JOIN memory_entities me ON me.memory_id = ml.to_memory_id WHERE ml.kind = 'narrower' AND ml.from_memory_id IN ({placeholders})"
        );
        let mut q = sqlx::query_scalar(&sql);
        for id in memory_ids {
            q = q.bind(id);
        }
        q.fetch_all(self.store.pool()).await.map_err(|e| Error::io("semantic_memory.taxonomy_tree", e.to_string()))
    }

    /// Whether an auto-recall query may run now, given the configured
    /// cooldown. Explicit, caller-initiated [`Self::find`] calls are not
    /// gated by this — only wrapper hooks that recall automatically on
    /// every turn need to check it.
    pub fn recall_allowed(&self, now_ms: i64) -> bool {
        let last = self.last_recall_at_ms.load(Ordering::Acquire);
        now_ms - last >= self.recall_cooldown_ms
    }

    pub fn mark_recalled(&self, now_ms: i64) {
        self.last_recall_at_ms.store(now_ms, Ordering::Release);
    }

    /// One maintenance pass: recompute every memory's decay tier from its
    /// `validated_at` age. Run periodically by [`Self::run_decay_daemon`]
    /// or by an external scheduler; not event-sourced, since tier is a
    /// pure function of time rather than a state transition worth an
    /// audit trail entry.
    pub async fn recompute_decay_tiers(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, validated_at FROM memories WHERE project_key = ?")
            .bind(&self.project_key)
            .fetch_all(self.store.pool())
            .await
            .map_err(|e| Error::io("semantic_memory.recompute_decay_tiers", e.to_string()))?;

        let mut updated = 0u64;
        for (id, validated_at) in rows {
            let Ok(validated_at) = chrono::DateTime::parse_from_rfc3339(&validated_at) else { continue };
            let age = now.signed_duration_since(validated_at.with_timezone(&chrono::Utc));
            let tier = DecayTier::from_age(age, self.decay_boundaries);
            let result = sqlx::query("UPDATE memories SET decay_tier = ? WHERE id = ? AND decay_tier != ?")
                .bind(tier.as_str())
                .bind(&id)
                .bind(tier.as_str())
                .execute(self.store.pool())
                .await
                .map_err(|e| Error::io("semantic_memory.recompute_decay_tiers", e.to_string()))?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    /// Background maintenance loop: recompute decay tiers every `interval`
    /// until `stop` is set. Spec §5 notes "no dedicated daemon is
    /// required"; this is an optional convenience a caller may spawn onto
    /// its own runtime (it owns the lifetime/ownership story, not us).
    pub async fn run_decay_daemon(&self, interval: std::time::Duration, stop: &std::sync::atomic::AtomicBool) -> Result<u64> {
        let mut total = 0u64;
        while !stop.load(Ordering::Acquire) {
            total += self.recompute_decay_tiers(chrono::Utc::now()).await?;
            tokio::time::sleep(interval).await;
        }
        Ok(total)
    }
}

fn assemble_taxonomy(label: &str, nodes: &HashMap<String, (Vec<String>, Vec<String>)>) -> TaxonomyNode {
    let (memory_ids, child_labels) = nodes.get(label).cloned().unwrap_or_default();
    let children = child_labels.iter().map(|child| assemble_taxonomy(child, nodes)).collect();
    TaxonomyNode { label: label.to_string(), memory_ids, children }
}

fn row_to_entity(row: (String, String, String)) -> Result<MemoryEntity> {
    let (memory_id, pref_label, alt_labels) = row;
    let alt_labels: Vec<String> = serde_json::from_str(&alt_labels)?;
    Ok(MemoryEntity { memory_id, pref_label, alt_labels })
}

fn row_to_memory(row: &sqlx::sqlite::SqliteRow) -> Result<Memory> {
    let tags_json: String = row.try_get("tags").map_err(|e| Error::io("semantic_memory", e.to_string()))?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding").map_err(|e| Error::io("semantic_memory", e.to_string()))?;
    let decay_tier_str: String = row.try_get("decay_tier").map_err(|e| Error::io("semantic_memory", e.to_string()))?;

    Ok(Memory {
        id: row.try_get("id").map_err(|e| Error::io("semantic_memory", e.to_string()))?,
        project_key: row.try_get("project_key").map_err(|e| Error::io("semantic_memory", e.to_string()))?,
        content: row.try_get("content").map_err(|e| Error::io("semantic_memory", e.to_string()))?,
        tags,
        collection: row.try_get("collection").map_err(|e| Error::io("semantic_memory", e.to_string()))?,
        confidence: row.try_get("confidence").map_err(|e| Error::io("semantic_memory", e.to_string()))?,
        decay_tier: DecayTier::from_str(&decay_tier_str).unwrap_or(DecayTier::Hot),
        created_at: parse_ts(row, "created_at")?,
        validated_at: parse_ts(row, "validated_at")?,
        embedding: embedding.map(|bytes| decode_embedding(&bytes)),
    })
}

fn parse_ts(row: &sqlx::sqlite::SqliteRow, column: &'static str) -> Result<chrono::DateTime<chrono::Utc>> {
    let s: String = row.try_get(column).map_err(|e| Error::io("semantic_memory", e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::io("semantic_memory", format!("parsing {column}: {e}")))
}

/// FTS5 phrase-query escaping: wrap the whole query in double quotes,
/// doubling any embedded quote, so arbitrary user text is always treated
/// as a literal phrase rather than FTS5 query syntax.
fn escape_fts_query(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

/// Normalized content hash used for session-local duplicate suppression:
/// whitespace-collapsed, lowercased, first 100 characters plus the
/// normalized length (spec §4.8).
fn content_hash(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let prefix: String = normalized.chars().take(DEDUP_HASH_PREFIX_CHARS).collect();
    let key = format!("{prefix}|{}", normalized.len());
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

struct DedupCache {
    entries: Mutex<VecDeque<(String, String)>>,
}

impl DedupCache {
    fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(DEDUP_CACHE_CAPACITY)) }
    }

    fn get(&self, hash: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.iter().find(|(h, _)| h == hash).map(|(_, id)| id.clone())
    }

    fn insert(&self, hash: String, id: String) {
        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.retain(|(h, _)| h != &hash);
        entries.push_front((hash, id));
        while entries.len() > DEDUP_CACHE_CAPACITY {
            entries.pop_back();
        }
    }
}

/// Capture filters used by wrapper hooks deciding whether to store a
/// snippet at all (spec §4.8 "Capture filters"). Not enforced by
/// [`SemanticMemory::store`] itself — callers gate their own input.
pub mod capture {
    use std::sync::OnceLock;

    const MIN_LEN: usize = 80;
    const LONG_FORM_MIN_LEN: usize = 300;
    const LONG_FORM_MIN_ENTITY_MATCHES: usize = 2;

    fn strong_patterns() -> &'static [regex::Regex] {
        static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            [
                r"(?i)\b(prefer|preference|always use|never use)\b",
                r"(?i)\b(decided|decision|we will|we should)\b",
                r"(?i)\b(learned|lesson|turns out|gotcha)\b",
                r"(?i)\b(architecture|design pattern|structured as)\b",
                r"(?i)\b(warning|caution|be careful|avoid)\b",
                r"(?i)\b(config(uration)? (rule|must|should))\b",
            ]
            .iter()
            .map(|p| regex::Regex::new(p).expect("static capture pattern"))
            .collect()
        })
    }

    fn entity_patterns() -> &'static [regex::Regex] {
        static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            [r"\b[A-Z][a-zA-Z0-9_]{2,}\b", r"`[^`]+`", r"\b[a-z_]+\.[a-z_]+\b"]
                .iter()
                .map(|p| regex::Regex::new(p).expect("static entity pattern"))
                .collect()
        })
    }

    fn system_patterns() -> &'static [regex::Regex] {
        static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            [
                r"(?i)^\[?(watchdog|heartbeat)\]?",
                r"(?i)\bOUTCOME:\b",
                r"(?i)\bDECISION:\b",
                r"(?i)\bCOMPACTION\b",
                r"(?i)^<injected[- ]context>",
            ]
            .iter()
            .map(|p| regex::Regex::new(p).expect("static system pattern"))
            .collect()
        })
    }

    /// Whether `content` should be captured into semantic memory.
    pub fn is_stored_worthy(content: &str) -> bool {
        if content.len() < MIN_LEN {
            return false;
        }
        if system_patterns().iter().any(|p| p.is_match(content)) {
            return false;
        }
        if strong_patterns().iter().any(|p| p.is_match(content)) {
            return true;
        }
        let entity_hits = entity_patterns().iter().filter(|p| p.is_match(content)).count();
        content.len() >= LONG_FORM_MIN_LEN && entity_hits >= LONG_FORM_MIN_ENTITY_MATCHES
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn rejects_short_content() {
            assert!(!is_stored_worthy("too short"));
        }

        #[test]
        fn accepts_preference_statement() {
            assert!(is_stored_worthy("We prefer using snake_case for all database column names in this project."));
        }

        #[test]
        fn rejects_system_heartbeat() {
            assert!(!is_stored_worthy(
                "[heartbeat] agent alpha is still alive and processing the queue as expected, no action needed."
            ));
        }

        #[test]
        fn accepts_long_form_with_entities() {
            let content = "The `PaymentProcessor` module coordinates with `StripeClient` and `LedgerWriter` \
                to settle transactions. `PaymentProcessor.settle` is called once per batch and writes \
                results back through `LedgerWriter.append`, keeping retries idempotent across restarts \
                even when the downstream `StripeClient` call partially succeeds before timing out.";
            assert!(content.len() >= LONG_FORM_MIN_LEN);
            assert!(is_stored_worthy(content));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{NullEmbeddingProvider, NullEntityExtractor};

    fn decay_boundaries() -> DecayBoundaries {
        DecayBoundaries::default()
    }

    #[tokio::test]
    async fn store_then_get_round_trips_content() {
        let store = Store::open_in_memory().await.unwrap();
        let embedder = NullEmbeddingProvider;
        let extractor = NullEntityExtractor;
        let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, decay_boundaries(), 0.85, 30_000);

        let outcome = memory.store("OAuth refresh tokens need a 5min buffer before expiry", StoreOptions::default()).await.unwrap();
        assert!(!outcome.duplicate);

        let fetched = memory.get(&outcome.id).await.unwrap();
        assert_eq!(fetched.content, "OAuth refresh tokens need a 5min buffer before expiry");
        assert_eq!(fetched.decay_tier, DecayTier::Hot);
    }

    #[tokio::test]
    async fn storing_identical_content_twice_is_deduplicated_via_session_cache() {
        let store = Store::open_in_memory().await.unwrap();
        let embedder = NullEmbeddingProvider;
        let extractor = NullEntityExtractor;
        let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, decay_boundaries(), 0.85, 30_000);

        let first = memory.store("retry requests with exponential backoff", StoreOptions::default()).await.unwrap();
        let second = memory.store("retry requests with exponential backoff", StoreOptions::default()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.duplicate);
    }

    #[tokio::test]
    async fn find_falls_back_to_fts_without_embedding_provider() {
        let store = Store::open_in_memory().await.unwrap();
        let embedder = NullEmbeddingProvider;
        let extractor = NullEntityExtractor;
        let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, decay_boundaries(), 0.85, 30_000);

        memory.store("database migrations must run before the server starts accepting traffic", StoreOptions::default()).await.unwrap();
        let results = memory.find("migrations server", FindOptions::default()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].via, RetrievalMethod::Fts);
    }

    #[tokio::test]
    async fn delete_removes_memory() {
        let store = Store::open_in_memory().await.unwrap();
        let embedder = NullEmbeddingProvider;
        let extractor = NullEntityExtractor;
        let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, decay_boundaries(), 0.85, 30_000);

        let outcome = memory.store("ephemeral note", StoreOptions::default()).await.unwrap();
        memory.delete(&outcome.id).await.unwrap();
        assert!(memory.get(&outcome.id).await.is_err());
    }

    #[tokio::test]
    async fn validate_resets_decay_tier_to_hot() {
        let store = Store::open_in_memory().await.unwrap();
        let embedder = NullEmbeddingProvider;
        let extractor = NullEntityExtractor;
        let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, decay_boundaries(), 0.85, 30_000);

        let outcome = memory.store("some fact worth remembering", StoreOptions::default()).await.unwrap();
        memory.validate(&outcome.id).await.unwrap();
        let fetched = memory.get(&outcome.id).await.unwrap();
        assert_eq!(fetched.decay_tier, DecayTier::Hot);
    }

    #[test]
    fn content_hash_ignores_whitespace_differences() {
        assert_eq!(content_hash("hello   world"), content_hash("hello world"));
        assert_eq!(content_hash("Hello World"), content_hash("hello world"));
    }

    #[test]
    fn recall_cooldown_gates_repeated_auto_recall() {
        let store_fut = Store::open_in_memory();
        let store = tokio_test::block_on(store_fut).unwrap();
        let embedder = NullEmbeddingProvider;
        let extractor = NullEntityExtractor;
        let memory = SemanticMemory::new(&store, "proj", &embedder, &extractor, decay_boundaries(), 0.85, 30_000);

        assert!(memory.recall_allowed(0));
        memory.mark_recalled(0);
        assert!(!memory.recall_allowed(1_000));
        assert!(memory.recall_allowed(31_000));
    }
}
