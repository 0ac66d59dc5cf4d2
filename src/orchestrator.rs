//! Event handling and task execution.
//!
//! [`IndexOrchestrator::handle_event`] is the single place where lifecycle
//! events turn into index changes:
//!
//! | Event | Effect |
//! |-------|--------|
//! | document created / updated | one document task per collection containing it, or a purge when none does |
//! | document deleted | purge from every collection, synchronously |
//! | collection created | sweep |
//! | collection updated | sweep on source or scope change; drop chunks and sweep on model or chunking change |
//! | collection deleted | drop its chunks |
//!
//! [`IndexOrchestrator::run_task`] executes what the queue hands back.
//!
//! Everything that writes or purges one document's chunks holds that
//! document's lock, so a purge can't land between another task's delete and
//! its upserts.

use std::sync::Arc;

use llm_index_core::index::IndexClient;
use llm_index_core::models::{Collection, SourceKind};
use llm_index_core::reference::{keep_prefixes, DocumentRef};
use llm_index_core::{IndexError, Result};

use crate::collections::CollectionRegistry;
use crate::events::{DocumentEvent, IndexEvent};
use crate::indexer::{DocumentIndexer, IndexReport};
use crate::locks::KeyedLocks;
use crate::queue::{IndexTask, TaskQueue};
use crate::sources::Sources;

/// Result of one executed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Indexed(IndexReport),
    /// Documents seen by a sweep, and how many of them were scheduled.
    Swept { enumerated: usize, scheduled: usize },
    /// The collection no longer exists.
    Skipped,
}

pub struct IndexOrchestrator {
    collections: Arc<CollectionRegistry>,
    sources: Sources,
    index: Arc<dyn IndexClient>,
    queue: Arc<dyn TaskQueue>,
    indexer: DocumentIndexer,
    /// Document ids and sweep keys currently being worked on.
    locks: KeyedLocks,
    primary_tenant: String,
    sweep_batch_size: usize,
}

impl IndexOrchestrator {
    pub fn new(
        collections: Arc<CollectionRegistry>,
        sources: Sources,
        index: Arc<dyn IndexClient>,
        queue: Arc<dyn TaskQueue>,
        indexer: DocumentIndexer,
        primary_tenant: impl Into<String>,
        sweep_batch_size: usize,
    ) -> Self {
        Self {
            collections,
            sources,
            index,
            queue,
            indexer,
            locks: KeyedLocks::new(),
            primary_tenant: primary_tenant.into(),
            sweep_batch_size: sweep_batch_size.max(1),
        }
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    pub async fn handle_event(&self, event: &IndexEvent) -> Result<()> {
        tracing::debug!(event = event.name(), tenant = event.tenant(), "handling event");
        match event {
            IndexEvent::DocumentCreated(e) | IndexEvent::DocumentUpdated(e) => {
                self.document_changed(e).await
            }
            IndexEvent::DocumentDeleted(e) => {
                let _guard = self.locks.lock(&e.document_id).await;
                self.index
                    .delete_chunks_by_store_hint_and_document(e.source.store_hint(), &e.document_id)
                    .await
            }
            IndexEvent::CollectionCreated(c) => {
                self.schedule(IndexTask::collection(&c.tenant, &c.id)).await
            }
            IndexEvent::CollectionUpdated { previous, current } => {
                self.collection_updated(previous, current).await
            }
            IndexEvent::CollectionDeleted(c) => {
                self.index.delete_chunks_by_collection(&c.tenant, &c.id).await
            }
        }
    }

    async fn document_changed(&self, event: &DocumentEvent) -> Result<()> {
        let targets: Vec<Collection> = match event.source {
            SourceKind::Mirrored => {
                let doc = DocumentRef::parse(&event.document_id)?;
                self.collections
                    .mirrored_containing(&doc, &self.primary_tenant)
            }
            SourceKind::Managed => event
                .collection_id
                .as_deref()
                .and_then(|id| self.collections.get(&event.tenant, id))
                .filter(|c| c.source == SourceKind::Managed)
                .into_iter()
                .collect(),
        };

        if targets.is_empty() {
            let _guard = self.locks.lock(&event.document_id).await;
            let hint = event.source.store_hint();
            if self.index.has_document(hint, &event.document_id).await? {
                tracing::info!(
                    tenant = %event.tenant,
                    document = %event.document_id,
                    "document left every collection, purging"
                );
                self.index
                    .delete_chunks_by_store_hint_and_document(hint, &event.document_id)
                    .await?;
            }
            return Ok(());
        }

        for c in targets {
            self.schedule(IndexTask::document(&c.tenant, &c.id, &event.document_id))
                .await?;
        }
        Ok(())
    }

    async fn collection_updated(&self, previous: &Collection, current: &Collection) -> Result<()> {
        let rebuild = previous.embedding_model != current.embedding_model
            || previous.chunking != current.chunking;
        let rescope = previous.source != current.source || !previous.same_scope(current);

        if rebuild {
            tracing::info!(
                tenant = %current.tenant,
                collection = %current.id,
                "embedding model or chunking changed, rebuilding"
            );
            self.index
                .delete_chunks_by_collection(&current.tenant, &current.id)
                .await?;
        }
        if rebuild || rescope {
            self.schedule(IndexTask::collection(&current.tenant, &current.id))
                .await?;
        }
        Ok(())
    }

    async fn schedule(&self, task: IndexTask) -> Result<()> {
        if !self.queue.enqueue(task.clone()).await? {
            tracing::trace!(task = %task, "already queued");
        }
        Ok(())
    }

    pub async fn run_task(&self, task: &IndexTask) -> Result<TaskOutcome> {
        let Some(collection) = self.collections.get(task.tenant(), task.collection_id()) else {
            tracing::debug!(task = %task, "collection is gone, skipping");
            return Ok(TaskOutcome::Skipped);
        };
        match task {
            IndexTask::Document { document_id, .. } => {
                let _guard = self.locks.lock(document_id).await;
                Ok(TaskOutcome::Indexed(
                    self.indexer.index_document(&collection, document_id).await?,
                ))
            }
            IndexTask::Collection { .. } => {
                let _guard = self.locks.lock(&task.key()).await;
                self.sweep(&collection).await
            }
        }
    }

    /// Re-applies the collection's scope, then schedules every document
    /// that isn't indexed yet.
    pub async fn sweep(&self, collection: &Collection) -> Result<TaskOutcome> {
        collection.chunking.validate()?;
        let keep = keep_prefixes(collection, &self.primary_tenant);
        if keep.is_empty() {
            self.index
                .delete_chunks_by_collection(&collection.tenant, &collection.id)
                .await?;
            return Ok(TaskOutcome::Swept {
                enumerated: 0,
                scheduled: 0,
            });
        }
        self.index
            .delete_chunks_by_scope_query(
                &collection.tenant,
                &collection.id,
                &keep,
                collection.store_hint(),
            )
            .await?;

        let source = self.sources.for_collection(collection);
        let mut offset = 0;
        let mut enumerated = 0;
        let mut scheduled = 0;
        loop {
            let ids = source
                .enumerate(collection, offset, Some(self.sweep_batch_size))
                .await?;
            if ids.is_empty() {
                break;
            }
            offset += ids.len();
            enumerated += ids.len();

            let existing = self
                .index
                .filter_existing_documents(&collection.tenant, &collection.id, &ids)
                .await?;
            for id in ids.iter().filter(|id| !existing.contains(id)) {
                self.schedule(IndexTask::document(&collection.tenant, &collection.id, id))
                    .await?;
                scheduled += 1;
            }
            if ids.len() < self.sweep_batch_size {
                break;
            }
        }

        tracing::info!(
            tenant = %collection.tenant,
            collection = %collection.id,
            enumerated,
            scheduled,
            "collection swept"
        );
        Ok(TaskOutcome::Swept {
            enumerated,
            scheduled,
        })
    }

    /// Schedules every document of a collection, indexed or not.
    pub async fn reindex_all(&self, collection: &Collection) -> Result<usize> {
        let ids = self
            .sources
            .for_collection(collection)
            .enumerate(collection, 0, None)
            .await?;
        for id in &ids {
            self.schedule(IndexTask::document(&collection.tenant, &collection.id, id))
                .await?;
        }
        Ok(ids.len())
    }

    /// Looks up a collection or fails with `NotFound`.
    pub fn collection(&self, tenant: &str, id: &str) -> Result<Collection> {
        self.collections
            .get(tenant, id)
            .ok_or_else(|| IndexError::NotFound(format!("collection '{}:{}'", tenant, id)))
    }
}
