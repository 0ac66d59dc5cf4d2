//! Embedding models, the model registry, and the fallback-aware embedder.
//!
//! - [`EmbeddingModel`] is the async interface every backend implements.
//! - [`ModelRegistry`](registry::ModelRegistry) maps model ids to constructed
//!   models, built once from the configuration.
//! - [`Embedder`](embedder::Embedder) resolves a collection's model, falls
//!   back to the bundled default, fits vectors to the index width, and
//!   reports failures per text.
//!
//! # Providers
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `openai` | OpenAI-compatible `/v1/embeddings` endpoint |
//! | `ollama` | Ollama `/api/embed` |
//! | `local` | fastembed ONNX models (feature `local-embeddings-fastembed`) |
//! | `hashing` | Feature-hashed bag of words, no model files, no network |
//!
//! # Retry Strategy
//!
//! The HTTP providers retry with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, … capped at 32s

pub mod embedder;
pub mod registry;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use llm_index_core::embedding::l2_normalize;

use crate::config::ModelConfig;

pub use embedder::{EmbedOutcome, Embedder};
pub use registry::ModelRegistry;

/// An embedding backend.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Registry id, e.g. `"openai/small"`.
    fn id(&self) -> &str;
    /// Native output width.
    fn dims(&self) -> usize;
    /// Texts sent per call.
    fn batch_size(&self) -> usize;
    /// Embeds `texts`, returning one vector per text in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Builds the model described by `config`.
pub fn build_model(config: &ModelConfig) -> Result<Arc<dyn EmbeddingModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        "hashing" => Ok(Arc::new(HashingModel::new(
            &config.id,
            config.dims.unwrap_or(llm_index_core::embedding::DEFAULT_VECTOR_WIDTH),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalModel::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "embedding model '{}': rebuild with --features local-embeddings-fastembed",
            config.id
        ),
        other => bail!("unknown embedding provider: '{}'", other),
    }
}

// ============ HTTP helpers ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POSTs `body` to `url`, retrying rate limits, server errors, and network errors.
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
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, delay_secs = delay.as_secs(), "{} retry", label);
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn parse_vectors<'a>(items: impl Iterator<Item = Option<&'a serde_json::Value>>) -> Result<Vec<Vec<f32>>> {
    items
        .map(|item| {
            let values = item
                .and_then(|v| v.as_array())
                .ok_or_else(|| anyhow!("invalid embedding response: embedding is not an array"))?;
            Ok(values.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

// ============ OpenAI ============

pub struct OpenAiModel {
    id: String,
    model: String,
    dims: usize,
    url: String,
    api_key_env: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding model '{}': model required", config.id))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding model '{}': dims required", config.id))?;
        Ok(Self {
            id: config.id.clone(),
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            api_key_env: config.api_key_env.clone(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiModel {
    fn id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| anyhow!("{} not set", self.api_key_env))?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;

        let mut data: Vec<&serde_json::Value> = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| anyhow!("invalid OpenAI response: missing data array"))?
            .iter()
            .collect();
        // Order by the reported index so vectors line up with inputs.
        data.sort_by_key(|item| item.get("index").and_then(|i| i.as_u64()).unwrap_or(u64::MAX));
        parse_vectors(data.into_iter().map(|item| item.get("embedding")))
    }
}

// ============ Ollama ============

pub struct OllamaModel {
    id: String,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding model '{}': model required", config.id))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding model '{}': dims required", config.id))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            id: config.id.clone(),
            model,
            dims,
            url: format!("{}/api/embed", url.trim_end_matches('/')),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OllamaModel {
    fn id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json =
            post_json_with_retry(&self.client, &self.url, None, &body, self.max_retries, "Ollama")
                .await?;
        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid Ollama response: missing embeddings array"))?;
        parse_vectors(embeddings.iter().map(Some))
    }
}

// ============ Hashing ============

/// Feature-hashing embedder that ships with the binary.
///
/// Each lowercased alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets with a sign bit; the bucket counts are L2-normalized.
/// Texts sharing vocabulary land close together under cosine similarity.
pub struct HashingModel {
    id: String,
    dims: usize,
}

impl HashingModel {
    pub fn new(id: &str, dims: usize) -> Self {
        Self {
            id: id.to_string(),
            dims: dims.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingModel for HashingModel {
    fn id(&self) -> &str {
        &self.id
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn batch_size(&self) -> usize {
        256
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use std::sync::Mutex;

    /// fastembed ONNX model, loaded on first use and kept for the process.
    pub struct LocalModel {
        id: String,
        dims: usize,
        batch_size: usize,
        model: fastembed::EmbeddingModel,
        loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalModel {
        pub fn new(config: &ModelConfig) -> Result<Self> {
            let name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let (model, native_dims) = match name.as_str() {
                "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
                "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
                "multilingual-e5-small" => (fastembed::EmbeddingModel::MultilingualE5Small, 384),
                "multilingual-e5-base" => (fastembed::EmbeddingModel::MultilingualE5Base, 768),
                other => bail!(
                    "Unknown local embedding model: '{}'. Supported models: \
                     all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                     multilingual-e5-small, multilingual-e5-base",
                    other
                ),
            };
            Ok(Self {
                id: config.id.clone(),
                dims: config.dims.unwrap_or(native_dims),
                batch_size: config.batch_size,
                model,
                loaded: Arc::new(Mutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl EmbeddingModel for LocalModel {
        fn id(&self) -> &str {
            &self.id
        }
        fn dims(&self) -> usize {
            self.dims
        }
        fn batch_size(&self) -> usize {
            self.batch_size
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let texts = texts.to_vec();
            let loaded = Arc::clone(&self.loaded);
            let model = self.model.clone();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut guard = loaded
                    .lock()
                    .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
                if guard.is_none() {
                    let instance = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                    *guard = Some(instance);
                }
                let instance = guard
                    .as_mut()
                    .ok_or_else(|| anyhow!("local embedding model not loaded"))?;
                instance
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }
}
