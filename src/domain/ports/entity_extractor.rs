//! Entity/taxonomy extraction port, delegated per spec §4.8.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub pref_label: String,
    #[serde(default)]
    pub alt_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub broader: Option<String>,
    pub narrower: Option<String>,
    pub related: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

/// Pluggable entity/taxonomy extractor. Failures are non-fatal: the
/// memory is stored anyway and linkage is simply skipped.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, content: &str) -> crate::error::Result<ExtractionResult>;
}

/// A no-op extractor: returns empty results, used when extraction isn't
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEntityExtractor;

#[async_trait]
impl EntityExtractor for NullEntityExtractor {
    async fn extract(&self, _content: &str) -> crate::error::Result<ExtractionResult> {
        Ok(ExtractionResult::default())
    }
}
