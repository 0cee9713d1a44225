//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in the core
//! crate:
//! - **[`OpenAIProvider`]**: calls `POST {url}/embeddings` with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: runs models in-process via fastembed (feature
//!   `local-embeddings`); no network calls after the model download.
//!
//! # Provider Selection
//!
//! [`resolve_provider`] picks one concrete provider from the configuration
//! before an index is opened. `auto` prefers the local provider when it is
//! compiled in and otherwise uses OpenAI. When the chosen provider cannot be
//! constructed and `embedding.fallback` names another one, the fallback is
//! used and the reason is kept in [`ProviderResolution`].
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use memory_harness_core::embedding::EmbeddingProvider;
use memory_harness_core::hash::hash_text;

use crate::config::EmbeddingConfig;
use crate::error::MemoryError;

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_MODEL: &str = "nomic-embed-text";
pub const LOCAL_DEFAULT_MODEL: &str = "all-minilm-l6-v2";

/// Cache identity over provider, model and endpoint. Never includes
/// credentials.
fn endpoint_provider_key(provider: &str, model: &str, url: &str) -> String {
    let identity = serde_json::json!({
        "provider": provider,
        "model": model,
        "url": url,
    });
    hash_text(&identity.to_string())
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn check_count(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(MemoryError::VectorCountMismatch { expected, got }.into());
    }
    Ok(())
}

/// POST `body` to `url`, retrying transient failures.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, delay_secs = delay.as_secs(), "{} retry", label);
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err =
                        Some(anyhow::anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                // Client error (not 429): don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (or a compatible endpoint).
///
/// Requires the `OPENAI_API_KEY` environment variable at construction.
pub struct OpenAIProvider {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(model: String, url: String, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider_key(&self) -> String {
        endpoint_provider_key(self.id(), &self.model, &self.url)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/embeddings", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        let vectors = parse_openai_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by their `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST {url}/api/embed`. Requires Ollama to be running with an
/// embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(model: String, url: String, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider_key(&self) -> String {
        endpoint_provider_key(self.id(), &self.model, &self.url)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;

        let vectors = parse_ollama_response(&json)?;
        check_count(texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached.
/// Inference runs on a blocking thread. Output vectors are sanitized and
/// L2-normalized.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    engine: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(model_name: String) -> Result<Self> {
        let model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            engine: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn id(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let engine = Arc::clone(&self.engine);
        let model = self.model.clone();
        let texts = texts.to_vec();
        let expected = texts.len();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = engine
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding engine lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(loaded);
            }
            let text_embedding = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;
            text_embedding
                .embed(texts, None)
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        check_count(expected, vectors.len())?;
        Ok(vectors
            .into_iter()
            .map(memory_harness_core::embedding::sanitize_and_normalize)
            .collect())
    }
}

// ============ Resolution ============

/// The provider chosen for an index, with how it was chosen.
pub struct ProviderResolution {
    pub provider: Arc<dyn EmbeddingProvider>,
    /// Provider name as configured (may be `auto`).
    pub requested: String,
    /// The provider that failed when a fallback was used.
    pub fallback_from: Option<String>,
    pub fallback_reason: Option<String>,
}

impl std::fmt::Debug for ProviderResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderResolution")
            .field("provider", &self.provider.id())
            .field("model", &self.provider.model())
            .field("requested", &self.requested)
            .field("fallback_from", &self.fallback_from)
            .field("fallback_reason", &self.fallback_reason)
            .finish()
    }
}

/// Concrete provider name for `auto`.
pub fn auto_provider_name() -> &'static str {
    if cfg!(feature = "local-embeddings") {
        "local"
    } else {
        "openai"
    }
}

/// Build provider `name`. `model` and `url` from the config only apply to
/// the primary provider; a fallback uses its own defaults.
fn create_provider(
    name: &str,
    config: &EmbeddingConfig,
    use_overrides: bool,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let model_override = config.model.clone().filter(|_| use_overrides);
    let url_override = config.url.clone().filter(|_| use_overrides);

    match name {
        "openai" => Ok(Arc::new(OpenAIProvider::new(
            model_override.unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            url_override.unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            config,
        )?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            model_override.unwrap_or_else(|| OLLAMA_DEFAULT_MODEL.to_string()),
            url_override.unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            config,
        )?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(
            model_override.unwrap_or_else(|| LOCAL_DEFAULT_MODEL.to_string()),
        )?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Select the embedding provider described by `config`.
///
/// # Errors
///
/// Fails when the chosen provider cannot be constructed and no usable
/// fallback is configured (missing API key, unknown model, feature not
/// compiled in).
pub fn resolve_provider(config: &EmbeddingConfig) -> Result<ProviderResolution> {
    let requested = config.provider.clone();
    let primary = if requested == "auto" {
        auto_provider_name()
    } else {
        requested.as_str()
    };

    match create_provider(primary, config, true) {
        Ok(provider) => Ok(ProviderResolution {
            provider,
            requested,
            fallback_from: None,
            fallback_reason: None,
        }),
        Err(e) if config.has_fallback() && config.fallback != primary => {
            tracing::warn!(
                provider = primary,
                fallback = %config.fallback,
                error = %e,
                "embedding provider unavailable, using fallback"
            );
            let provider = create_provider(&config.fallback, config, false).with_context(|| {
                format!(
                    "fallback embedding provider '{}' also failed (primary '{}': {})",
                    config.fallback, primary, e
                )
            })?;
            Ok(ProviderResolution {
                provider,
                fallback_from: Some(primary.to_string()),
                fallback_reason: Some(e.to_string()),
                requested,
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, fallback: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            fallback: fallback.to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({ "error": "x" })).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.25], [1.0, 0.0]] });
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);
        assert!(parse_ollama_response(&serde_json::json!({ "embeddings": [1.0] })).is_err());
    }

    #[test]
    fn test_count_mismatch_is_typed() {
        let err = check_count(3, 2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MemoryError>(),
            Some(&MemoryError::VectorCountMismatch { expected: 3, got: 2 })
        );
    }

    #[test]
    fn test_resolve_ollama_uses_defaults() {
        let resolution = resolve_provider(&config("ollama", "none")).unwrap();
        assert_eq!(resolution.provider.id(), "ollama");
        assert_eq!(resolution.provider.model(), OLLAMA_DEFAULT_MODEL);
        assert_eq!(resolution.requested, "ollama");
        assert!(resolution.fallback_from.is_none());
    }

    #[test]
    fn test_provider_key_depends_on_endpoint() {
        let cfg = EmbeddingConfig::default();
        let a = OllamaProvider::new("m".into(), "http://a:11434".into(), &cfg).unwrap();
        let b = OllamaProvider::new("m".into(), "http://b:11434/".into(), &cfg).unwrap();
        let a2 = OllamaProvider::new("m".into(), "http://a:11434/".into(), &cfg).unwrap();
        assert_ne!(a.provider_key(), b.provider_key());
        assert_eq!(a.provider_key(), a2.provider_key());
        assert_eq!(a.provider_key().len(), 64);
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_local_without_feature_falls_back() {
        let mut cfg = config("local", "ollama");
        cfg.model = Some("bge-small-en-v1.5".into());
        let resolution = resolve_provider(&cfg).unwrap();
        assert_eq!(resolution.provider.id(), "ollama");
        // The configured model belongs to the failed provider.
        assert_eq!(resolution.provider.model(), OLLAMA_DEFAULT_MODEL);
        assert_eq!(resolution.fallback_from.as_deref(), Some("local"));
        assert!(resolution.fallback_reason.unwrap().contains("local-embeddings"));
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_local_without_feature_and_no_fallback_fails() {
        assert!(resolve_provider(&config("local", "none")).is_err());
    }
}
