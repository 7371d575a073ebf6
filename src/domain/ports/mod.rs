//! Pluggable ports: traits the domain depends on but does not implement.

pub mod embedding;
pub mod entity_extractor;
pub mod summarizer;

pub use embedding::{EmbeddingProvider, NullEmbeddingProvider};
pub use entity_extractor::{
    EntityExtractor, ExtractedEntity, ExtractedRelation, ExtractionResult, NullEntityExtractor,
};
pub use summarizer::{NullSummarizer, Summarizer};
