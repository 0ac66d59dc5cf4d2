//! Explicit registry of embedding models.
//!
//! Built once at startup from `[[embedding.models]]`. Lookup is a plain key
//! lookup on the model id followed by the tenant and principal checks of the
//! entry. Every entry owns a semaphore bounding concurrent calls to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;

use llm_index_core::IndexError;

use super::{build_model, EmbeddingModel};
use crate::config::{EmbeddingConfig, ModelConfig};

/// Who may use a model, and how hard.
#[derive(Debug, Clone)]
pub struct ModelAccess {
    /// Empty means every tenant.
    pub tenants: Vec<String>,
    /// Empty means every principal.
    pub principals: Vec<String>,
    /// Calls allowed in flight at once.
    pub max_parallel: usize,
    /// Limit for one batch call.
    pub timeout: Duration,
}

impl Default for ModelAccess {
    fn default() -> Self {
        Self {
            tenants: Vec::new(),
            principals: Vec::new(),
            max_parallel: 4,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ModelAccess {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            tenants: config.tenants.clone(),
            principals: config.principals.clone(),
            max_parallel: config.max_parallel,
            // Leave room for the provider's own retries inside the call.
            timeout: Duration::from_secs(
                config.timeout_secs * (u64::from(config.max_retries) + 1) + 60,
            ),
        }
    }
}

/// A model ready to be called, with its concurrency limit.
#[derive(Clone)]
pub struct ResolvedModel {
    pub model: Arc<dyn EmbeddingModel>,
    /// Shared by every clone, so all callers draw on one limit.
    pub permits: Arc<Semaphore>,
    pub timeout: Duration,
}

impl ResolvedModel {
    pub fn new(model: Arc<dyn EmbeddingModel>, access: &ModelAccess) -> Self {
        Self {
            model,
            permits: Arc::new(Semaphore::new(access.max_parallel.max(1))),
            timeout: access.timeout,
        }
    }
}

struct Entry {
    resolved: ResolvedModel,
    access: ModelAccess,
}

#[derive(Default)]
pub struct ModelRegistry {
    entries: HashMap<String, Entry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let mut registry = Self::new();
        for model_config in &config.models {
            let model = build_model(model_config)?;
            registry.register(model, ModelAccess::from_config(model_config));
        }
        Ok(registry)
    }

    pub fn register(&mut self, model: Arc<dyn EmbeddingModel>, access: ModelAccess) {
        let resolved = ResolvedModel::new(model, &access);
        self.register_resolved(resolved, access);
    }

    /// Registers a model whose permits are shared with another holder.
    pub fn register_resolved(&mut self, resolved: ResolvedModel, access: ModelAccess) {
        let id = resolved.model.id().to_string();
        self.entries.insert(id, Entry { resolved, access });
    }

    /// Looks up `model_id` for `tenant` on behalf of `principal`.
    ///
    /// `principal = None` is the system context and passes principal checks.
    pub fn resolve(
        &self,
        tenant: &str,
        model_id: &str,
        principal: Option<&str>,
    ) -> Result<ResolvedModel, IndexError> {
        let unknown = || IndexError::UnknownModel {
            tenant: tenant.to_string(),
            model: model_id.to_string(),
        };
        let entry = self.entries.get(model_id).ok_or_else(unknown)?;
        if !entry.access.tenants.is_empty() && !entry.access.tenants.iter().any(|t| t == tenant) {
            return Err(unknown());
        }
        if let Some(principal) = principal {
            if !entry.access.principals.is_empty()
                && !entry.access.principals.iter().any(|p| p == principal)
            {
                return Err(IndexError::AccessDenied(format!(
                    "'{}' may not use embedding model '{}'",
                    principal, model_id
                )));
            }
        }
        Ok(entry.resolved.clone())
    }
}
