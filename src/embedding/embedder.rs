//! Fallback-aware embedding of chunk texts.
//!
//! # Resolution order
//!
//! 1. The collection's model, resolved from the [`ModelRegistry`] for the
//!    tenant and principal.
//! 2. If resolution fails, the call fails or times out, or a vector can't be
//!    fitted to the index width: the bundled fallback model.
//! 3. If the fallback fails as well: [`EmbedOutcome::Failed`] with a
//!    readable message. The caller stores the chunk without a vector.
//!
//! The batch form always returns one outcome per input text. A failing
//! batch call is retried on the fallback group by group, then text by text,
//! so one bad input can't take the others down.
//!
//! Every vector carries the id of the model that produced it. Vectors of
//! different models live in different spaces and must not be mixed.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use llm_index_core::embedding::fit_width;

use super::registry::{ModelAccess, ResolvedModel};
use super::{build_model, EmbeddingModel, ModelRegistry};
use crate::config::Config;

/// Result of embedding one text.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    /// A vector fitted to the index width, and the id of the model behind it.
    Vector { vector: Vec<f32>, model: String },
    /// No model produced a vector; the message says why.
    Failed(String),
}

pub struct Embedder {
    registry: Arc<ModelRegistry>,
    fallback: ResolvedModel,
    width: usize,
    pad_short_vectors: bool,
}

impl Embedder {
    /// Registers the fallback under its own id as well, so collections may
    /// name it directly. Both paths draw on the same permits.
    pub fn new(
        mut registry: ModelRegistry,
        fallback: Arc<dyn EmbeddingModel>,
        fallback_access: ModelAccess,
        width: usize,
        pad_short_vectors: bool,
    ) -> Self {
        let fallback = ResolvedModel::new(fallback, &fallback_access);
        registry.register_resolved(fallback.clone(), fallback_access);
        Self {
            registry: Arc::new(registry),
            fallback,
            width,
            pad_short_vectors,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = ModelRegistry::from_config(&config.embedding)?;
        let fallback_config = &config.embedding.fallback;
        Ok(Self::new(
            registry,
            build_model(fallback_config)?,
            ModelAccess::from_config(fallback_config),
            config.index.vector_width,
            config.index.pad_short_vectors,
        ))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub async fn embed(
        &self,
        tenant: &str,
        model_id: &str,
        principal: Option<&str>,
        text: &str,
    ) -> EmbedOutcome {
        let texts = [text.to_string()];
        self.embed_batch(tenant, model_id, principal, &texts)
            .await
            .pop()
            .unwrap_or_else(|| EmbedOutcome::Failed("no embedding produced".to_string()))
    }

    /// Embeds `texts`, returning exactly `texts.len()` outcomes in order.
    pub async fn embed_batch(
        &self,
        tenant: &str,
        model_id: &str,
        principal: Option<&str>,
        texts: &[String],
    ) -> Vec<EmbedOutcome> {
        let mut outcomes: Vec<Option<EmbedOutcome>> = vec![None; texts.len()];
        let mut reasons: Vec<Option<String>> = vec![None; texts.len()];

        match self.registry.resolve(tenant, model_id, principal) {
            Ok(primary) => {
                let indices: Vec<usize> = (0..texts.len()).collect();
                for group in indices.chunks(primary.model.batch_size().max(1)) {
                    let batch: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();
                    match call_model(&primary, &batch).await {
                        Ok(vectors) => {
                            for (&i, vector) in group.iter().zip(vectors) {
                                match fit_width(vector, self.width, self.pad_short_vectors) {
                                    Ok(v) => {
                                        outcomes[i] = Some(EmbedOutcome::Vector {
                                            vector: v,
                                            model: primary.model.id().to_string(),
                                        })
                                    }
                                    Err(e) => reasons[i] = Some(format!("model '{}': {}", model_id, e)),
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                tenant,
                                model = model_id,
                                texts = group.len(),
                                error = %e,
                                "embedding model failed, using fallback"
                            );
                            for &i in group {
                                reasons[i] = Some(format!("model '{}': {}", model_id, e));
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    tenant,
                    model = model_id,
                    error = %e,
                    "embedding model unavailable, using fallback"
                );
                for reason in reasons.iter_mut() {
                    *reason = Some(e.to_string());
                }
            }
        }

        let pending: Vec<usize> = (0..texts.len()).filter(|&i| outcomes[i].is_none()).collect();
        for group in pending.chunks(self.fallback.model.batch_size().max(1)) {
            let batch: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();
            match call_model(&self.fallback, &batch).await {
                Ok(vectors) => {
                    for (&i, vector) in group.iter().zip(vectors) {
                        outcomes[i] = Some(self.fallback_outcome(Ok(vector), reasons[i].as_deref()));
                    }
                }
                Err(e) if group.len() == 1 => {
                    outcomes[group[0]] = Some(self.fallback_outcome(Err(e), reasons[group[0]].as_deref()));
                }
                Err(_) => {
                    for &i in group {
                        let single = call_model(&self.fallback, std::slice::from_ref(&texts[i]))
                            .await
                            .and_then(|mut v| v.pop().ok_or_else(|| anyhow!("empty response")));
                        outcomes[i] = Some(self.fallback_outcome(single, reasons[i].as_deref()));
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|o| o.unwrap_or_else(|| EmbedOutcome::Failed("no embedding produced".to_string())))
            .collect()
    }

    fn fallback_outcome(&self, result: Result<Vec<f32>>, primary_reason: Option<&str>) -> EmbedOutcome {
        let fitted = result.and_then(|v| {
            fit_width(v, self.width, self.pad_short_vectors).map_err(|e| anyhow!(e))
        });
        match fitted {
            Ok(v) => EmbedOutcome::Vector {
                vector: v,
                model: self.fallback.model.id().to_string(),
            },
            Err(e) => {
                let mut message = format!("fallback model '{}': {}", self.fallback.model.id(), e);
                if let Some(reason) = primary_reason {
                    message = format!("{}; {}", reason, message);
                }
                EmbedOutcome::Failed(message)
            }
        }
    }
}

/// Calls a model under its concurrency limit and timeout.
async fn call_model(resolved: &ResolvedModel, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let _permit = resolved
        .permits
        .acquire()
        .await
        .map_err(|_| anyhow!("model '{}' is shut down", resolved.model.id()))?;
    let vectors = tokio::time::timeout(resolved.timeout, resolved.model.embed(texts))
        .await
        .map_err(|_| anyhow!("timed out after {}s", resolved.timeout.as_secs()))??;
    if vectors.len() != texts.len() {
        return Err(anyhow!(
            "model '{}' returned {} vectors for {} texts",
            resolved.model.id(),
            vectors.len(),
            texts.len()
        ));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingModel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails every call, counting attempts.
    struct Broken {
        id: String,
        calls: AtomicUsize,
    }

    impl Broken {
        fn new(id: &str) -> Self {
            Self {
                id: id.into(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingModel for Broken {
        fn id(&self) -> &str {
            &self.id
        }
        fn dims(&self) -> usize {
            4
        }
        fn batch_size(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("service unavailable"))
        }
    }

    /// Returns vectors of a fixed width; fails on texts containing "poison".
    struct Fixed {
        id: String,
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingModel for Fixed {
        fn id(&self) -> &str {
            &self.id
        }
        fn dims(&self) -> usize {
            self.dims
        }
        fn batch_size(&self) -> usize {
            8
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(anyhow!("cannot embed poison"));
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    struct Slow;

    #[async_trait]
    impl EmbeddingModel for Slow {
        fn id(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            4
        }
        fn batch_size(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }
    }

    fn is_vector(outcome: &EmbedOutcome) -> bool {
        matches!(outcome, EmbedOutcome::Vector { .. })
    }

    fn model_of(outcome: &EmbedOutcome) -> Option<&str> {
        match outcome {
            EmbedOutcome::Vector { model, .. } => Some(model),
            EmbedOutcome::Failed(_) => None,
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {}", i)).collect()
    }

    fn embedder(primary: Arc<dyn EmbeddingModel>, fallback: Arc<dyn EmbeddingModel>, width: usize) -> Embedder {
        let mut registry = ModelRegistry::new();
        registry.register(primary, ModelAccess::default());
        Embedder::new(registry, fallback, ModelAccess::default(), width, false)
    }

    #[tokio::test]
    async fn test_primary_vectors_are_truncated() {
        let e = embedder(
            Arc::new(Fixed { id: "big".into(), dims: 1536 }),
            Arc::new(Broken::new("fallback")),
            384,
        );
        let outcomes = e.embed_batch("main", "big", None, &texts(3)).await;
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            match outcome {
                EmbedOutcome::Vector { vector, model } => {
                    assert_eq!(vector.len(), 384);
                    assert_eq!(model, "big");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_model_uses_fallback() {
        let e = embedder(
            Arc::new(Broken::new("primary")),
            Arc::new(HashingModel::new("default", 384)),
            384,
        );
        let outcomes = e.embed_batch("main", "does-not-exist", None, &texts(5)).await;
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| model_of(o) == Some("default")));
    }

    #[tokio::test]
    async fn test_failing_primary_uses_fallback() {
        let primary = Arc::new(Broken::new("primary"));
        let e = embedder(primary.clone(), Arc::new(HashingModel::new("default", 384)), 384);
        let outcomes = e.embed_batch("main", "primary", None, &texts(5)).await;
        assert!(outcomes.iter().all(|o| model_of(o) == Some("default")));
        // Five texts in groups of two.
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_everything_failing_still_returns_n_outcomes() {
        let e = embedder(
            Arc::new(Broken::new("primary")),
            Arc::new(Broken::new("fallback")),
            384,
        );
        let outcomes = e.embed_batch("main", "primary", None, &texts(7)).await;
        assert_eq!(outcomes.len(), 7);
        for outcome in &outcomes {
            match outcome {
                EmbedOutcome::Failed(msg) => {
                    assert!(msg.contains("model 'primary'"));
                    assert!(msg.contains("fallback model 'fallback'"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(e.embed_batch("main", "primary", None, &[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_one_bad_text_does_not_fail_the_others() {
        let e = embedder(
            Arc::new(Broken::new("primary")),
            Arc::new(Fixed { id: "fallback".into(), dims: 384 }),
            384,
        );
        let mut input = texts(3);
        input[1] = "poison pill".to_string();
        let outcomes = e.embed_batch("main", "primary", None, &input).await;
        assert!(is_vector(&outcomes[0]));
        assert!(!is_vector(&outcomes[1]));
        assert!(is_vector(&outcomes[2]));
    }

    #[tokio::test]
    async fn test_short_vectors_rejected_unless_padding() {
        let e = embedder(
            Arc::new(Fixed { id: "small".into(), dims: 128 }),
            Arc::new(Broken::new("fallback")),
            384,
        );
        let outcome = e.embed("main", "small", None, "hello").await;
        assert!(matches!(outcome, EmbedOutcome::Failed(ref m) if m.contains("128")));

        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(Fixed { id: "small".into(), dims: 128 }), ModelAccess::default());
        let padding = Embedder::new(
            registry,
            Arc::new(Broken::new("fallback")),
            ModelAccess::default(),
            384,
            true,
        );
        match padding.embed("main", "small", None, "hello").await {
            EmbedOutcome::Vector { vector: v, .. } => {
                assert_eq!(v.len(), 384);
                assert_eq!(v[127], 1.0);
                assert_eq!(v[128], 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let mut registry = ModelRegistry::new();
        registry.register(
            Arc::new(Slow),
            ModelAccess {
                timeout: Duration::from_millis(100),
                ..ModelAccess::default()
            },
        );
        let e = Embedder::new(
            registry,
            Arc::new(HashingModel::new("default", 384)),
            ModelAccess::default(),
            384,
            false,
        );
        let outcome = e.embed("main", "slow", None, "hello").await;
        assert_eq!(model_of(&outcome), Some("default"));
    }

    /// Tracks how many calls are in flight at once.
    struct Gauge {
        inside: AtomicUsize,
        max_seen: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for Gauge {
        fn id(&self) -> &str {
            "default"
        }
        fn dims(&self) -> usize {
            4
        }
        fn batch_size(&self) -> usize {
            8
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inside.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }
    }

    #[tokio::test]
    async fn test_fallback_named_directly_shares_its_limit() {
        let gauge = Arc::new(Gauge {
            inside: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        });
        let e = Embedder::new(
            ModelRegistry::new(),
            gauge.clone(),
            ModelAccess {
                max_parallel: 1,
                ..ModelAccess::default()
            },
            4,
            false,
        );
        // One call names the fallback, the other reaches it through an unknown model.
        let (direct, fallen_back) = tokio::join!(
            e.embed("main", "default", None, "a"),
            e.embed("main", "missing", None, "b"),
        );
        assert_eq!(model_of(&direct), Some("default"));
        assert_eq!(model_of(&fallen_back), Some("default"));
        assert_eq!(gauge.max_seen.load(Ordering::SeqCst), 1);
    }
}
