//! Semantic memory domain model — content-addressed memories with vector
//! embeddings, full-text fallback, decay tiers, and entity/taxonomy links.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Staleness bucket for a memory, derived from `validated_at` (fallback
/// `created_at`). Boundaries are configurable; these are the spec
/// defaults (see `SwarmMailConfig::memory_decay_tiers`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayTier {
    Hot,
    Warm,
    Cold,
    Stale,
}

impl DecayTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Stale => "stale",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(Self::Hot),
            "warm" => Some(Self::Warm),
            "cold" => Some(Self::Cold),
            "stale" => Some(Self::Stale),
            _ => None,
        }
    }

    /// Derive the tier for a given `validated_at` age, against the
    /// configured day boundaries `(hot, warm, cold)`.
    pub fn from_age(age: Duration, boundaries: DecayBoundaries) -> Self {
        if age <= Duration::days(boundaries.hot_days) {
            Self::Hot
        } else if age <= Duration::days(boundaries.warm_days) {
            Self::Warm
        } else if age <= Duration::days(boundaries.cold_days) {
            Self::Cold
        } else {
            Self::Stale
        }
    }
}

/// Configurable day boundaries for decay tier derivation. Defaults match
/// spec §4.8's table: hot ≤7d, warm ≤30d, cold ≤180d, else stale.
#[derive(Debug, Clone, Copy)]
pub struct DecayBoundaries {
    pub hot_days: i64,
    pub warm_days: i64,
    pub cold_days: i64,
}

impl Default for DecayBoundaries {
    fn default() -> Self {
        Self { hot_days: 7, warm_days: 30, cold_days: 180 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub project_key: Option<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub collection: String,
    /// `[0, 1]`.
    pub confidence: f64,
    pub decay_tier: DecayTier,
    pub created_at: DateTime<Utc>,
    pub validated_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
}

impl Default for Memory {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            project_key: None,
            content: String::new(),
            tags: Vec::new(),
            collection: "default".to_string(),
            confidence: 1.0,
            decay_tier: DecayTier::Hot,
            created_at: now,
            validated_at: now,
            embedding: None,
        }
    }
}

/// A memory row paired with its retrieval score (`find` results).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    /// `[0, 1]`, descending order in result sets.
    pub score: f64,
    pub via: RetrievalMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Semantic,
    Fts,
}

/// An entity extracted from memory content, SKOS-flavored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntity {
    pub memory_id: String,
    pub pref_label: String,
    pub alt_labels: Vec<String>,
}

/// SKOS relation between two memories: broader / narrower / related.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLinkKind {
    Broader,
    Narrower,
    Related,
}

impl MemoryLinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broader => "broader",
            Self::Narrower => "narrower",
            Self::Related => "related",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub from_memory_id: String,
    pub to_memory_id: String,
    pub kind: MemoryLinkKind,
}

/// Record of a decay-timer reset (`validate(id)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryValidation {
    pub memory_id: String,
    pub validated_at: DateTime<Utc>,
}

/// A taxonomy tree node rooted at a `pref_label`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub label: String,
    pub memory_ids: Vec<String>,
    pub children: Vec<TaxonomyNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: usize,
    pub by_tier: std::collections::HashMap<String, usize>,
    pub by_collection: std::collections::HashMap<String, usize>,
    pub with_embedding: usize,
}
