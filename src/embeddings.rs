//! OpenAI-compatible embedding provider (spec §4.8 "Embedding").
//!
//! Works against the OpenAI `/v1/embeddings` endpoint and any
//! OpenAI-compatible server (Azure OpenAI, local inference servers) by
//! overriding `base_url`. Text is truncated to the provider's documented
//! character limit before being sent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ports::EmbeddingProvider;
use crate::error::{Error, Result};

/// Characters kept before embedding, per spec §4.8 ("truncated to ~1000
/// characters before embedding").
const MAX_INPUT_CHARS: usize = 1000;

/// Configuration for [`OpenAiEmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingConfig {
    /// API key. Falls back to the `OPENAI_API_KEY` env var when `None`.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout_secs: 30,
        }
    }
}

impl OpenAiEmbeddingConfig {
    fn resolved_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// `EmbeddingProvider` backed by an OpenAI-compatible HTTP endpoint.
///
/// Per spec §4.8 and §7 ("IO errors from the embedding provider degrade
/// gracefully to FTS fallback"), every failure mode here — missing key,
/// network error, non-2xx response, malformed body — surfaces as `Ok(None)`
/// rather than an error, with a single warning logged. Callers that want a
/// hard failure (e.g. a startup connectivity check) should call the HTTP
/// client directly instead of going through this trait.
pub struct OpenAiEmbeddingProvider {
    config: OpenAiEmbeddingConfig,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiEmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::io("embeddings.new", e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(api_key) = self.config.resolved_api_key() else {
            tracing::warn!("embeddings.embed: no OPENAI_API_KEY configured, falling back to FTS");
            return Ok(None);
        };

        let truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let url = format!("{}/embeddings", self.config.base_url);
        let body = EmbeddingsRequest { model: self.config.model.clone(), input: vec![truncated] };

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "embeddings.embed: request failed, falling back to FTS");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "embeddings.embed: non-success response, falling back to FTS");
            return Ok(None);
        }

        match response.json::<EmbeddingsResponse>().await {
            Ok(parsed) => Ok(parsed.data.into_iter().next().map(|d| d.embedding)),
            Err(e) => {
                tracing::warn!(error = %e, "embeddings.embed: malformed response, falling back to FTS");
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}
