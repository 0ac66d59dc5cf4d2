//! Protocol to the external index service.
//!
//! The [`IndexClient`] trait is the only way the pipeline touches the
//! index. Every operation is idempotent and takes its tenant explicitly.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_chunk`](IndexClient::upsert_chunk) | Insert or overwrite by `(tenant, collection, document, chunk_index)` |
//! | [`delete_chunks_by_document`](IndexClient::delete_chunks_by_document) | Clear a document before rewriting it |
//! | [`delete_chunks_by_collection`](IndexClient::delete_chunks_by_collection) | Drop a whole collection |
//! | [`delete_chunks_by_scope_query`](IndexClient::delete_chunks_by_scope_query) | Drop documents outside the scope or under another store hint |
//! | [`delete_chunks_by_store_hint_and_document`](IndexClient::delete_chunks_by_store_hint_and_document) | Purge a deleted document from every collection |
//! | [`filter_existing_documents`](IndexClient::filter_existing_documents) | Which candidate ids are already indexed |
//! | [`get_chunks`](IndexClient::get_chunks) | Current chunks of a document, in order |
//! | [`has_document`](IndexClient::has_document) | Whether a document has entries under a store hint |
//! | [`count_chunks`](IndexClient::count_chunks) | Chunk count for a tenant or collection |
//!
//! # Ordering
//!
//! A document task calls `delete_chunks_by_document` and waits for it before
//! its first `upsert_chunk`. Implementations must make a completed delete
//! visible to later reads.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Chunk;

#[async_trait]
pub trait IndexClient: Send + Sync {
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<()>;

    async fn delete_chunks_by_document(
        &self,
        tenant: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<()>;

    async fn delete_chunks_by_collection(&self, tenant: &str, collection_id: &str) -> Result<()>;

    /// Removes chunks whose document id starts with none of `keep_prefixes`,
    /// and chunks written under a store hint other than `store_hint`.
    async fn delete_chunks_by_scope_query(
        &self,
        tenant: &str,
        collection_id: &str,
        keep_prefixes: &[String],
        store_hint: &str,
    ) -> Result<()>;

    async fn delete_chunks_by_store_hint_and_document(
        &self,
        store_hint: &str,
        document_id: &str,
    ) -> Result<()>;

    /// Returns the candidates whose first chunk is present, in input order.
    async fn filter_existing_documents(
        &self,
        tenant: &str,
        collection_id: &str,
        candidate_ids: &[String],
    ) -> Result<Vec<String>>;

    async fn get_chunks(
        &self,
        tenant: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Vec<Chunk>>;

    async fn has_document(&self, store_hint: &str, document_id: &str) -> Result<bool>;

    async fn count_chunks(&self, tenant: &str, collection_id: Option<&str>) -> Result<usize>;
}

/// Whether an entry must go when the collection's scope is re-applied.
pub fn outside_scope(
    document_id: &str,
    entry_hint: &str,
    keep_prefixes: &[String],
    store_hint: &str,
) -> bool {
    entry_hint != store_hint || !keep_prefixes.iter().any(|p| document_id.starts_with(p.as_str()))
}
