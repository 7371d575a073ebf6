//! Thread/context summarization port, delegated per spec §4.3/§4.8.

use async_trait::async_trait;

/// Pluggable summarizer, used by `Mailbox::summarize_thread` to produce
/// `ThreadSummary::prose` and by the coordinator for checkpoint prose.
/// Implementations that cannot summarize should return `Ok(None)`; callers
/// fall back to a structural summary (participant/message counts only).
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, texts: &[String]) -> crate::error::Result<Option<String>>;
}

/// A no-op summarizer used when no LLM-backed summarizer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSummarizer;

#[async_trait]
impl Summarizer for NullSummarizer {
    async fn summarize(&self, _texts: &[String]) -> crate::error::Result<Option<String>> {
        Ok(None)
    }
}
