//! In-memory [`IndexClient`] for tests and dry runs.
//!
//! Chunks live in a `BTreeMap` keyed by [`ChunkKey`] behind a
//! `std::sync::RwLock`, so reads come back ordered by tenant, collection,
//! document and chunk index.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, ChunkKey};

use super::{outside_scope, IndexClient};

#[derive(Default)]
pub struct InMemoryIndex {
    chunks: RwLock<BTreeMap<ChunkKey, Chunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ChunkKey, Chunk>> {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ChunkKey, Chunk>> {
        self.chunks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every stored chunk, in key order.
    pub fn all_chunks(&self) -> Vec<Chunk> {
        self.read().values().cloned().collect()
    }

    /// Distinct document ids of a collection.
    pub fn document_ids(&self, tenant: &str, collection_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read()
            .keys()
            .filter(|k| k.tenant == tenant && k.collection_id == collection_id)
            .map(|k| k.document_id.clone())
            .collect();
        ids.dedup();
        ids
    }
}

#[async_trait]
impl IndexClient for InMemoryIndex {
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.write().insert(chunk.key(), chunk.clone());
        Ok(())
    }

    async fn delete_chunks_by_document(
        &self,
        tenant: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<()> {
        self.write().retain(|k, _| {
            !(k.tenant == tenant && k.collection_id == collection_id && k.document_id == document_id)
        });
        Ok(())
    }

    async fn delete_chunks_by_collection(&self, tenant: &str, collection_id: &str) -> Result<()> {
        self.write()
            .retain(|k, _| !(k.tenant == tenant && k.collection_id == collection_id));
        Ok(())
    }

    async fn delete_chunks_by_scope_query(
        &self,
        tenant: &str,
        collection_id: &str,
        keep_prefixes: &[String],
        store_hint: &str,
    ) -> Result<()> {
        self.write().retain(|k, c| {
            k.tenant != tenant
                || k.collection_id != collection_id
                || !outside_scope(&k.document_id, &c.store_hint, keep_prefixes, store_hint)
        });
        Ok(())
    }

    async fn delete_chunks_by_store_hint_and_document(
        &self,
        store_hint: &str,
        document_id: &str,
    ) -> Result<()> {
        self.write()
            .retain(|k, c| !(k.document_id == document_id && c.store_hint == store_hint));
        Ok(())
    }

    async fn filter_existing_documents(
        &self,
        tenant: &str,
        collection_id: &str,
        candidate_ids: &[String],
    ) -> Result<Vec<String>> {
        let chunks = self.read();
        Ok(candidate_ids
            .iter()
            .filter(|id| {
                chunks.contains_key(&ChunkKey {
                    tenant: tenant.to_string(),
                    collection_id: collection_id.to_string(),
                    document_id: id.to_string(),
                    chunk_index: 0,
                })
            })
            .cloned()
            .collect())
    }

    async fn get_chunks(
        &self,
        tenant: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Vec<Chunk>> {
        Ok(self
            .read()
            .iter()
            .filter(|(k, _)| {
                k.tenant == tenant && k.collection_id == collection_id && k.document_id == document_id
            })
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn has_document(&self, store_hint: &str, document_id: &str) -> Result<bool> {
        Ok(self
            .read()
            .iter()
            .any(|(k, c)| k.document_id == document_id && c.store_hint == store_hint))
    }

    async fn count_chunks(&self, tenant: &str, collection_id: Option<&str>) -> Result<usize> {
        Ok(self
            .read()
            .keys()
            .filter(|k| k.tenant == tenant && collection_id.map_or(true, |c| k.collection_id == c))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(collection: &str, doc: &str, index: usize, hint: &str) -> Chunk {
        Chunk {
            tenant: "main".into(),
            collection_id: collection.into(),
            document_id: doc.into(),
            chunk_index: index,
            document_url: None,
            language: None,
            pos_first_char: index * 10,
            pos_last_char: index * 10 + 10,
            content: format!("{} #{}", doc, index),
            vector: vec![],
            embedding_model: None,
            store_hint: hint.into(),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_delete_then_upsert_leaves_exact_count() {
        let index = InMemoryIndex::new();
        for i in 0..5 {
            index.upsert_chunk(&chunk("c", "main:S.P", i, "mirrored")).await.unwrap();
        }
        index.delete_chunks_by_document("main", "c", "main:S.P").await.unwrap();
        for i in 0..2 {
            index.upsert_chunk(&chunk("c", "main:S.P", i, "mirrored")).await.unwrap();
        }
        assert_eq!(index.get_chunks("main", "c", "main:S.P").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_in_place() {
        let index = InMemoryIndex::new();
        let mut c = chunk("c", "main:S.P", 0, "mirrored");
        index.upsert_chunk(&c).await.unwrap();
        c.content = "changed".into();
        index.upsert_chunk(&c).await.unwrap();
        let stored = index.get_chunks("main", "c", "main:S.P").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "changed");
    }

    #[tokio::test]
    async fn test_scope_query_drops_other_prefixes_and_hints() {
        let index = InMemoryIndex::new();
        index.upsert_chunk(&chunk("c", "main:A.P1", 0, "mirrored")).await.unwrap();
        index.upsert_chunk(&chunk("c", "main:B.P2", 0, "mirrored")).await.unwrap();
        index.upsert_chunk(&chunk("c", "main:A.P3", 0, "managed")).await.unwrap();
        index.upsert_chunk(&chunk("other", "main:B.P2", 0, "mirrored")).await.unwrap();

        index
            .delete_chunks_by_scope_query("main", "c", &["main:A.".to_string()], "mirrored")
            .await
            .unwrap();

        assert_eq!(index.document_ids("main", "c"), vec!["main:A.P1".to_string()]);
        assert_eq!(index.document_ids("main", "other"), vec!["main:B.P2".to_string()]);
    }

    #[tokio::test]
    async fn test_store_hint_purge_spans_collections() {
        let index = InMemoryIndex::new();
        index.upsert_chunk(&chunk("c1", "main:A.P", 0, "mirrored")).await.unwrap();
        index.upsert_chunk(&chunk("c2", "main:A.P", 0, "mirrored")).await.unwrap();
        index.upsert_chunk(&chunk("c3", "main:A.P", 0, "managed")).await.unwrap();
        assert!(index.has_document("mirrored", "main:A.P").await.unwrap());

        index
            .delete_chunks_by_store_hint_and_document("mirrored", "main:A.P")
            .await
            .unwrap();

        assert!(!index.has_document("mirrored", "main:A.P").await.unwrap());
        assert_eq!(index.count_chunks("main", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filter_existing_checks_first_chunk() {
        let index = InMemoryIndex::new();
        index.upsert_chunk(&chunk("c", "main:A.P1", 0, "mirrored")).await.unwrap();
        index.upsert_chunk(&chunk("c", "main:A.P2", 1, "mirrored")).await.unwrap();
        let candidates = vec![
            "main:A.P2".to_string(),
            "main:A.P1".to_string(),
            "main:A.P9".to_string(),
        ];
        let existing = index.filter_existing_documents("main", "c", &candidates).await.unwrap();
        assert_eq!(existing, vec!["main:A.P1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_by_collection() {
        let index = InMemoryIndex::new();
        index.upsert_chunk(&chunk("c", "main:A.P1", 0, "mirrored")).await.unwrap();
        index.upsert_chunk(&chunk("d", "main:A.P1", 0, "mirrored")).await.unwrap();
        index.delete_chunks_by_collection("main", "c").await.unwrap();
        assert_eq!(index.count_chunks("main", Some("c")).await.unwrap(), 0);
        assert_eq!(index.count_chunks("main", Some("d")).await.unwrap(), 1);
    }
}
