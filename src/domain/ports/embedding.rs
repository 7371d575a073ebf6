//! Embedding provider port: `text -> vector[d]`, pluggable per spec §4.8.

use async_trait::async_trait;

/// Trait for embedding providers. Implementations that cannot currently
/// produce a vector (missing API key, provider outage) should return
/// `Ok(None)` rather than an error — `find` falls back to FTS silently,
/// per spec's "Missing embedding provider -> log once, downgrade to FTS."
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, e.g. `"openai"`, `"null"`.
    fn name(&self) -> &'static str;

    /// Expected vector dimensionality for this provider/model.
    fn dimension(&self) -> usize;

    /// Embed a single text, truncating to the provider's documented
    /// character limit first (spec: "~1000 characters").
    async fn embed(&self, text: &str) -> crate::error::Result<Option<Vec<f32>>>;
}

/// A no-op provider used when embedding is not configured. `find` always
/// falls back to FTS against this provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    fn dimension(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> crate::error::Result<Option<Vec<f32>>> {
        Ok(None)
    }
}
