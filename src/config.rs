//! Layered configuration: defaults, project YAML, local YAML override,
//! environment variables (spec §6 "Configuration options").
//!
//! Precedence, highest last: built-in defaults, `.swarmmail/config.yaml`,
//! `.swarmmail/local.yaml`, then `SWARMMAIL_`-prefixed env vars with `__`
//! as the nesting separator (e.g. `SWARMMAIL_MEMORY__DEDUP_SCORE=0.9`).

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::domain::models::DecayBoundaries;

/// Rejections of an otherwise-deserializable config: values out of range
/// or logically inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("embedding.dim must be positive, got {0}")]
    InvalidEmbeddingDim(usize),
    #[error("memory.dedupScore must be in [0, 1], got {0}")]
    InvalidDedupScore(String),
    #[error("memory.minRecallScore must be in [0, 1], got {0}")]
    InvalidMinRecallScore(String),
    #[error("memory decay boundaries must be strictly increasing (hot < warm < cold)")]
    InvalidDecayBoundaries,
    #[error("reservation.defaultTtlSeconds must be positive, got {0}")]
    InvalidReservationTtl(i64),
    #[error("review.maxRejections must be at least 1, got {0}")]
    InvalidMaxRejections(u32),
    #[error("inbox.maxLimit must be in 1..=5, got {0}")]
    InvalidInboxMaxLimit(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dim: usize,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dim() -> usize {
    1536
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { model: default_embedding_model(), dim: default_embedding_dim() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    #[serde(default)]
    pub decay_tiers: DecayTiersConfig,
    #[serde(default = "default_dedup_score")]
    pub dedup_score: f64,
    #[serde(default = "default_recall_cooldown_ms")]
    pub recall_cooldown_ms: i64,
    #[serde(default = "default_min_recall_score")]
    pub min_recall_score: f64,
}

const fn default_dedup_score() -> f64 {
    0.85
}

const fn default_recall_cooldown_ms() -> i64 {
    30_000
}

const fn default_min_recall_score() -> f64 {
    0.55
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            decay_tiers: DecayTiersConfig::default(),
            dedup_score: default_dedup_score(),
            recall_cooldown_ms: default_recall_cooldown_ms(),
            min_recall_score: default_min_recall_score(),
        }
    }
}

/// Overrides for [`DecayBoundaries`]; separate from the domain type so the
/// wire/config shape (camelCase, serde defaults) doesn't leak into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayTiersConfig {
    #[serde(default = "default_hot_days")]
    pub hot_days: i64,
    #[serde(default = "default_warm_days")]
    pub warm_days: i64,
    #[serde(default = "default_cold_days")]
    pub cold_days: i64,
}

const fn default_hot_days() -> i64 {
    7
}
const fn default_warm_days() -> i64 {
    30
}
const fn default_cold_days() -> i64 {
    180
}

impl Default for DecayTiersConfig {
    fn default() -> Self {
        Self { hot_days: default_hot_days(), warm_days: default_warm_days(), cold_days: default_cold_days() }
    }
}

impl From<DecayTiersConfig> for DecayBoundaries {
    fn from(c: DecayTiersConfig) -> Self {
        Self { hot_days: c.hot_days, warm_days: c.warm_days, cold_days: c.cold_days }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationConfig {
    #[serde(default = "default_reservation_ttl")]
    pub default_ttl_seconds: i64,
}

const fn default_reservation_ttl() -> i64 {
    3600
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self { default_ttl_seconds: default_reservation_ttl() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewConfig {
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
}

const fn default_max_rejections() -> u32 {
    3
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { max_rejections: default_max_rejections() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxConfig {
    #[serde(default = "default_inbox_max_limit")]
    pub max_limit: u32,
}

const fn default_inbox_max_limit() -> u32 {
    5
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self { max_limit: default_inbox_max_limit() }
    }
}

/// Top-level crate configuration, deserialized by [`SwarmMailConfig::load`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmMailConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub reservation: ReservationConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub logging: crate::telemetry::LogConfig,
}

impl SwarmMailConfig {
    /// Load from `<project_dir>/.swarmmail/config.yaml`, then
    /// `<project_dir>/.swarmmail/local.yaml`, then `SWARMMAIL_` env vars,
    /// layered over built-in defaults. Validates before returning.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let base = project_dir.join(".swarmmail");
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(base.join("config.yaml")))
            .merge(Yaml::file(base.join("local.yaml")))
            .merge(Env::prefixed("SWARMMAIL_").split("__"));

        let config: Self = figment.extract().unwrap_or_default();
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from an explicit YAML file path, skipping the directory
    /// convention above. Used by tests and by callers embedding swarmmail
    /// in a larger configuration scheme.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("SWARMMAIL_").split("__"));
        let config: Self = figment.extract().unwrap_or_default();
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Self) -> Result<(), ConfigError> {
        if config.embedding.dim == 0 {
            return Err(ConfigError::InvalidEmbeddingDim(config.embedding.dim));
        }
        if !(0.0..=1.0).contains(&config.memory.dedup_score) {
            return Err(ConfigError::InvalidDedupScore(config.memory.dedup_score.to_string()));
        }
        if !(0.0..=1.0).contains(&config.memory.min_recall_score) {
            return Err(ConfigError::InvalidMinRecallScore(config.memory.min_recall_score.to_string()));
        }
        let tiers = &config.memory.decay_tiers;
        if !(tiers.hot_days < tiers.warm_days && tiers.warm_days < tiers.cold_days) {
            return Err(ConfigError::InvalidDecayBoundaries);
        }
        if config.reservation.default_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidReservationTtl(config.reservation.default_ttl_seconds));
        }
        if config.review.max_rejections < 1 {
            return Err(ConfigError::InvalidMaxRejections(config.review.max_rejections));
        }
        if config.inbox.max_limit < 1 || config.inbox.max_limit > 5 {
            return Err(ConfigError::InvalidInboxMaxLimit(config.inbox.max_limit));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(SwarmMailConfig::validate(&SwarmMailConfig::default()).is_ok());
    }

    #[test]
    fn rejects_inbox_limit_above_five() {
        let mut config = SwarmMailConfig::default();
        config.inbox.max_limit = 6;
        assert_eq!(SwarmMailConfig::validate(&config), Err(ConfigError::InvalidInboxMaxLimit(6)));
    }

    #[test]
    fn rejects_max_rejections_below_one() {
        let mut config = SwarmMailConfig::default();
        config.review.max_rejections = 0;
        assert_eq!(SwarmMailConfig::validate(&config), Err(ConfigError::InvalidMaxRejections(0)));
    }

    #[test]
    fn rejects_non_monotonic_decay_boundaries() {
        let mut config = SwarmMailConfig::default();
        config.memory.decay_tiers.warm_days = 5;
        assert_eq!(SwarmMailConfig::validate(&config), Err(ConfigError::InvalidDecayBoundaries));
    }

    #[test]
    fn rejects_dedup_score_out_of_range() {
        let mut config = SwarmMailConfig::default();
        config.memory.dedup_score = 1.5;
        assert!(SwarmMailConfig::validate(&config).is_err());
    }

    #[test]
    fn load_from_file_merges_yaml_over_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "memory:\n  dedupScore: 0.9\ninbox:\n  maxLimit: 3\n").unwrap();
        let config = SwarmMailConfig::load_from_file(file.path()).unwrap();
        assert!((config.memory.dedup_score - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.inbox.max_limit, 3);
        assert_eq!(config.review.max_rejections, 3);
    }

    #[test]
    fn load_from_file_rejects_invalid_override() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "review:\n  maxRejections: 0\n").unwrap();
        assert!(SwarmMailConfig::load_from_file(file.path()).is_err());
    }
}
