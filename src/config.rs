//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/llm-index.sqlite"
//!
//! [tenants]
//! primary = "main"
//!
//! [host]
//! root = "./wiki"
//!
//! [embedding.fallback]
//! provider = "hashing"
//!
//! [[embedding.models]]
//! id = "openai/small"
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [[collections]]
//! tenant = "main"
//! id = "help"
//! embedding_model = "openai/small"
//! source = "mirrored"
//! scope = ["Help", "dev:Guides"]
//! ```
//!
//! [`load_config`] parses and validates the file. Every section except
//! `[db]` is optional.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use llm_index_core::embedding::DEFAULT_VECTOR_WIDTH;
use llm_index_core::models::{ChunkingPolicy, Collection, SourceKind};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tenants: TenantsConfig,
    #[serde(default)]
    pub host: Option<HostConfig>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Policy for collections that don't set their own.
    #[serde(default)]
    pub chunking: ChunkingPolicy,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenantsConfig {
    /// The only tenant whose collections may reach into other tenants.
    #[serde(default = "default_primary_tenant")]
    pub primary: String,
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_tenant(),
        }
    }
}

fn default_primary_tenant() -> String {
    "main".to_string()
}

/// Filesystem host store: `root/<tenant>/<Space>/<Page>.md`.
#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.xwiki".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_vector_width")]
    pub vector_width: usize,
    /// Zero-pad vectors shorter than `vector_width` instead of rejecting them.
    #[serde(default)]
    pub pad_short_vectors: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            vector_width: default_vector_width(),
            pad_short_vectors: false,
        }
    }
}

fn default_vector_width() -> usize {
    DEFAULT_VECTOR_WIDTH
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Bundled model used when a collection's model can't be resolved or fails.
    #[serde(default = "default_fallback_model")]
    pub fallback: ModelConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_model(),
            models: Vec::new(),
        }
    }
}

fn default_fallback_model() -> ModelConfig {
    ModelConfig {
        id: default_fallback_id(),
        provider: "hashing".to_string(),
        model: None,
        dims: Some(DEFAULT_VECTOR_WIDTH),
        url: None,
        api_key_env: default_api_key_env(),
        batch_size: default_batch_size(),
        max_retries: default_max_retries(),
        timeout_secs: default_timeout_secs(),
        max_parallel: default_max_parallel(),
        tenants: Vec::new(),
        principals: Vec::new(),
    }
}

/// One registered embedding model.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_fallback_id")]
    pub id: String,
    /// `openai`, `ollama`, `local`, or `hashing`.
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent calls allowed against this model.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Tenants allowed to use the model. Empty means every tenant.
    #[serde(default)]
    pub tenants: Vec<String>,
    /// Principals allowed to use the model. Empty means everyone.
    #[serde(default)]
    pub principals: Vec<String>,
}

fn default_fallback_id() -> String {
    "default".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
    /// First retry delay; doubled per failed attempt, capped at 32x.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            max_attempts: default_max_attempts(),
            sweep_batch_size: default_sweep_batch_size(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_task_timeout_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_sweep_batch_size() -> usize {
    100
}
fn default_retry_backoff_ms() -> u64 {
    1000
}

/// A collection as written in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    pub tenant: String,
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub embedding_model: String,
    #[serde(default)]
    pub chunking: Option<ChunkingPolicy>,
    pub source: SourceKind,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl Config {
    /// Collection definitions with defaults applied.
    pub fn collections(&self) -> Vec<Collection> {
        self.collections
            .iter()
            .map(|c| Collection {
                id: c.id.clone(),
                tenant: c.tenant.clone(),
                title: c.title.clone().unwrap_or_else(|| c.id.clone()),
                embedding_model: c.embedding_model.clone(),
                chunking: c.chunking.clone().unwrap_or_else(|| self.chunking.clone()),
                source: c.source,
                scope: c.scope.clone(),
                owner: c.owner.clone(),
            })
            .collect()
    }
}

const PROVIDERS: &[&str] = &["openai", "ollama", "local", "hashing"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;

    if config.tenants.primary.trim().is_empty() {
        bail!("tenants.primary must not be empty");
    }
    if config.index.vector_width == 0 {
        bail!("index.vector_width must be > 0");
    }
    if config.worker.concurrency == 0 {
        bail!("worker.concurrency must be >= 1");
    }
    if config.worker.max_attempts == 0 {
        bail!("worker.max_attempts must be >= 1");
    }
    if config.worker.sweep_batch_size == 0 {
        bail!("worker.sweep_batch_size must be >= 1");
    }
    config
        .chunking
        .validate()
        .context("invalid [chunking] policy")?;

    let mut model_ids = HashSet::new();
    model_ids.insert(config.embedding.fallback.id.clone());
    validate_model(&config.embedding.fallback)?;
    for model in &config.embedding.models {
        validate_model(model)?;
        if !model_ids.insert(model.id.clone()) {
            bail!("duplicate embedding model id '{}'", model.id);
        }
    }

    let mut seen = HashSet::new();
    for collection in config.collections() {
        if collection.id.is_empty() || collection.id.contains('/') || collection.id.contains(':') {
            bail!(
                "collection id '{}' must be non-empty and contain no '/' or ':'",
                collection.id
            );
        }
        if !seen.insert((collection.tenant.clone(), collection.id.clone())) {
            bail!(
                "duplicate collection '{}' in tenant '{}'",
                collection.id,
                collection.tenant
            );
        }
        collection
            .chunking
            .validate()
            .with_context(|| format!("collection '{}'", collection.id))?;
        if !model_ids.contains(&collection.embedding_model) {
            bail!(
                "collection '{}' uses unknown embedding model '{}'",
                collection.id,
                collection.embedding_model
            );
        }
        if collection.source == SourceKind::Mirrored && collection.scope.is_empty() {
            tracing::warn!(
                collection = %collection.id,
                tenant = %collection.tenant,
                "mirrored collection has an empty scope and will index nothing"
            );
        }
    }

    Ok(config)
}

fn validate_model(model: &ModelConfig) -> Result<()> {
    if !PROVIDERS.contains(&model.provider.as_str()) {
        bail!(
            "embedding model '{}': unknown provider '{}'. Must be one of: {}",
            model.id,
            model.provider,
            PROVIDERS.join(", ")
        );
    }
    if model.batch_size == 0 {
        bail!("embedding model '{}': batch_size must be >= 1", model.id);
    }
    if model.max_parallel == 0 {
        bail!("embedding model '{}': max_parallel must be >= 1", model.id);
    }
    if model.provider == "openai" || model.provider == "ollama" {
        if model.model.is_none() {
            bail!("embedding model '{}': model is required", model.id);
        }
        if model.dims.unwrap_or(0) == 0 {
            bail!("embedding model '{}': dims must be > 0", model.id);
        }
    }
    if model.provider == "local" && cfg!(not(feature = "local-embeddings-fastembed")) {
        bail!(
            "embedding model '{}': provider 'local' requires the local-embeddings-fastembed feature",
            model.id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "/tmp/llm-index.sqlite"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.tenants.primary, "main");
        assert_eq!(config.index.vector_width, 384);
        assert!(!config.index.pad_short_vectors);
        assert_eq!(config.embedding.fallback.provider, "hashing");
        assert_eq!(config.embedding.fallback.id, "default");
        assert_eq!(config.worker.sweep_batch_size, 100);
        assert_eq!(config.worker.retry_backoff_ms, 1000);
        assert!(config.collections().is_empty());
    }

    #[test]
    fn test_collections_inherit_default_chunking() {
        let config = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[chunking]
max_chunk_chars = 500
overlap_chars = 50

[[collections]]
tenant = "main"
id = "help"
embedding_model = "default"
source = "mirrored"
scope = ["Help"]

[[collections]]
tenant = "main"
id = "notes"
embedding_model = "default"
source = "managed"
[collections.chunking]
method = "section"
max_chunk_chars = 2000
"#,
        )
        .unwrap();
        let collections = config.collections();
        assert_eq!(collections[0].chunking, ChunkingPolicy::character(500, 50));
        assert_eq!(collections[0].title, "help");
        assert_eq!(collections[1].chunking.max_chunk_chars, 2000);
        assert_eq!(collections[1].chunking.overlap_chars, 0);
        assert_eq!(collections[1].source, SourceKind::Managed);
    }

    #[test]
    fn test_rejects_invalid_policy() {
        let err = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[[collections]]
tenant = "main"
id = "help"
embedding_model = "default"
source = "managed"
chunking = { max_chunk_chars = 10, overlap_chars = 10 }
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("overlap_chars"));
    }

    #[test]
    fn test_rejects_unknown_model_and_provider() {
        let unknown_model = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[[collections]]
tenant = "main"
id = "help"
embedding_model = "nope"
source = "managed"
"#,
        );
        assert!(unknown_model.is_err());

        let unknown_provider = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[[embedding.models]]
id = "m"
provider = "carrier-pigeon"
"#,
        );
        assert!(unknown_provider.is_err());
    }

    #[test]
    fn test_rejects_duplicate_collections() {
        let err = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[[collections]]
tenant = "main"
id = "help"
embedding_model = "default"
source = "managed"

[[collections]]
tenant = "main"
id = "help"
embedding_model = "default"
source = "managed"
"#,
        );
        assert!(err.is_err());
    }
}
