//! Indexing of a single document into a single collection.
//!
//! ```text
//! get_document ─▶ chunk_text ─▶ get_chunks (old vectors)
//!                                   │
//!       upsert_chunk ◀─ embed_batch ◀─ delete_chunks_by_document
//! ```
//!
//! The previous chunks are read before the delete so that chunks whose text
//! didn't change keep their vector without another embedding call. Only
//! vectors made by the collection's own model are kept; fallback vectors are
//! replaced as soon as that model answers again. The delete completes before
//! the first upsert.

use std::collections::HashMap;
use std::sync::Arc;

use llm_index_core::chunk::chunk_text;
use llm_index_core::index::IndexClient;
use llm_index_core::models::{content_hash, Chunk, Collection};
use llm_index_core::{IndexError, Result};

use crate::embedding::{EmbedOutcome, Embedder};
use crate::sources::Sources;

/// What one document task did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Chunks written for the document.
    pub chunks: usize,
    /// Chunks embedded by a model call.
    pub embedded: usize,
    /// Chunks that kept their previous vector.
    pub reused: usize,
    /// Chunks stored without a vector.
    pub failed: usize,
    /// The document was gone and its chunks were removed.
    pub removed: bool,
}

pub struct DocumentIndexer {
    sources: Sources,
    index: Arc<dyn IndexClient>,
    embedder: Arc<Embedder>,
}

impl DocumentIndexer {
    pub fn new(sources: Sources, index: Arc<dyn IndexClient>, embedder: Arc<Embedder>) -> Self {
        Self {
            sources,
            index,
            embedder,
        }
    }

    pub async fn index_document(
        &self,
        collection: &Collection,
        document_id: &str,
    ) -> Result<IndexReport> {
        collection.chunking.validate()?;
        let tenant = collection.tenant.as_str();

        let source = self.sources.for_collection(collection);
        let document = match source.get_document(collection, document_id).await {
            Ok(document) => document,
            Err(IndexError::NotFound(reason)) => {
                tracing::debug!(
                    tenant,
                    collection = %collection.id,
                    document = document_id,
                    %reason,
                    "document gone, removing its chunks"
                );
                self.index
                    .delete_chunks_by_document(tenant, &collection.id, document_id)
                    .await?;
                return Ok(IndexReport {
                    removed: true,
                    ..IndexReport::default()
                });
            }
            Err(e) => return Err(e),
        };

        let spans = chunk_text(&document.content, &collection.chunking)?;

        let mut previous: HashMap<String, Vec<f32>> = HashMap::new();
        for chunk in self
            .index
            .get_chunks(tenant, &collection.id, document_id)
            .await?
        {
            let same_model =
                chunk.embedding_model.as_deref() == Some(collection.embedding_model.as_str());
            if same_model && chunk.has_vector() && chunk.vector.len() == self.embedder.width() {
                previous.insert(chunk.content_hash(), chunk.vector);
            }
        }

        self.index
            .delete_chunks_by_document(tenant, &collection.id, document_id)
            .await?;

        let mut report = IndexReport {
            chunks: spans.len(),
            ..IndexReport::default()
        };
        let mut chunks = Vec::with_capacity(spans.len());
        let mut missing = Vec::new();
        for span in spans {
            let vector = previous
                .get(&content_hash(&span.text))
                .cloned()
                .unwrap_or_default();
            let embedding_model = if vector.is_empty() {
                missing.push(chunks.len());
                None
            } else {
                report.reused += 1;
                Some(collection.embedding_model.clone())
            };
            chunks.push(Chunk {
                tenant: tenant.to_string(),
                collection_id: collection.id.clone(),
                document_id: document_id.to_string(),
                chunk_index: span.index,
                document_url: document.source_url.clone(),
                language: document.language.clone(),
                pos_first_char: span.start,
                pos_last_char: span.end,
                content: span.text,
                vector,
                embedding_model,
                store_hint: collection.store_hint().to_string(),
                error_message: None,
            });
        }

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| chunks[i].content.clone()).collect();
            let outcomes = self
                .embedder
                .embed_batch(
                    tenant,
                    &collection.embedding_model,
                    collection.owner.as_deref(),
                    &texts,
                )
                .await;
            for (&i, outcome) in missing.iter().zip(outcomes) {
                match outcome {
                    EmbedOutcome::Vector { vector, model } => {
                        chunks[i].vector = vector;
                        chunks[i].embedding_model = Some(model);
                        report.embedded += 1;
                    }
                    EmbedOutcome::Failed(message) => {
                        chunks[i].error_message = Some(message);
                        report.failed += 1;
                    }
                }
            }
        }

        for chunk in &chunks {
            self.index.upsert_chunk(chunk).await?;
        }

        if report.failed > 0 {
            tracing::warn!(
                tenant,
                collection = %collection.id,
                document = document_id,
                failed = report.failed,
                "chunks stored without embeddings"
            );
        }
        tracing::debug!(
            tenant,
            collection = %collection.id,
            document = document_id,
            chunks = report.chunks,
            embedded = report.embedded,
            reused = report.reused,
            "document indexed"
        );
        Ok(report)
    }
}
