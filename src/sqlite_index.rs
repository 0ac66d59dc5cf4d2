//! SQLite-backed [`IndexClient`].
//!
//! Stores chunk records in the `index_chunks` table with vectors encoded as
//! little-endian `f32` BLOBs. Rows are keyed by
//! `(tenant, collection_id, document_id, chunk_index)`, so an upsert
//! overwrites in place.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use llm_index_core::embedding::{blob_to_vec, vec_to_blob};
use llm_index_core::index::{outside_scope, IndexClient};
use llm_index_core::models::Chunk;
use llm_index_core::{IndexError, Result};

/// Bound parameters per `IN (...)` query, well under SQLite's variable limit.
const MAX_IN_PARAMS: usize = 500;

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> IndexError {
    IndexError::Backend(e.into())
}

fn row_to_chunk(row: &SqliteRow) -> std::result::Result<Chunk, sqlx::Error> {
    let vector: Option<Vec<u8>> = row.try_get("vector")?;
    Ok(Chunk {
        tenant: row.try_get("tenant")?,
        collection_id: row.try_get("collection_id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get::<i64, _>("chunk_index")? as usize,
        document_url: row.try_get("document_url")?,
        language: row.try_get("language")?,
        pos_first_char: row.try_get::<i64, _>("pos_first_char")? as usize,
        pos_last_char: row.try_get::<i64, _>("pos_last_char")? as usize,
        content: row.try_get("content")?,
        vector: vector.as_deref().map(blob_to_vec).unwrap_or_default(),
        embedding_model: row.try_get("embedding_model")?,
        store_hint: row.try_get("store_hint")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl IndexClient for SqliteIndex {
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let vector = chunk.has_vector().then(|| vec_to_blob(&chunk.vector));
        sqlx::query(
            r#"
            INSERT INTO index_chunks (tenant, collection_id, document_id, chunk_index,
                                      document_url, language, pos_first_char, pos_last_char,
                                      content, vector, embedding_model, store_hint, error_message,
                                      content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant, collection_id, document_id, chunk_index) DO UPDATE SET
                document_url = excluded.document_url,
                language = excluded.language,
                pos_first_char = excluded.pos_first_char,
                pos_last_char = excluded.pos_last_char,
                content = excluded.content,
                vector = excluded.vector,
                embedding_model = excluded.embedding_model,
                store_hint = excluded.store_hint,
                error_message = excluded.error_message,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&chunk.tenant)
        .bind(&chunk.collection_id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index as i64)
        .bind(&chunk.document_url)
        .bind(&chunk.language)
        .bind(chunk.pos_first_char as i64)
        .bind(chunk.pos_last_char as i64)
        .bind(&chunk.content)
        .bind(vector)
        .bind(&chunk.embedding_model)
        .bind(&chunk.store_hint)
        .bind(&chunk.error_message)
        .bind(chunk.content_hash())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_chunks_by_document(
        &self,
        tenant: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM index_chunks WHERE tenant = ? AND collection_id = ? AND document_id = ?",
        )
        .bind(tenant)
        .bind(collection_id)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_chunks_by_collection(&self, tenant: &str, collection_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_chunks WHERE tenant = ? AND collection_id = ?")
            .bind(tenant)
            .bind(collection_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_chunks_by_scope_query(
        &self,
        tenant: &str,
        collection_id: &str,
        keep_prefixes: &[String],
        store_hint: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let rows = sqlx::query(
            "SELECT DISTINCT document_id, store_hint FROM index_chunks WHERE tenant = ? AND collection_id = ?",
        )
        .bind(tenant)
        .bind(collection_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        for row in rows {
            let document_id: String = row.get("document_id");
            let entry_hint: String = row.get("store_hint");
            if outside_scope(&document_id, &entry_hint, keep_prefixes, store_hint) {
                sqlx::query(
                    "DELETE FROM index_chunks WHERE tenant = ? AND collection_id = ? AND document_id = ? AND store_hint = ?",
                )
                .bind(tenant)
                .bind(collection_id)
                .bind(&document_id)
                .bind(&entry_hint)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn delete_chunks_by_store_hint_and_document(
        &self,
        store_hint: &str,
        document_id: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM index_chunks WHERE store_hint = ? AND document_id = ?")
            .bind(store_hint)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn filter_existing_documents(
        &self,
        tenant: &str,
        collection_id: &str,
        candidate_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut found = std::collections::HashSet::new();

        for batch in candidate_ids.chunks(MAX_IN_PARAMS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT document_id FROM index_chunks WHERE chunk_index = 0 AND tenant = ",
            );
            qb.push_bind(tenant);
            qb.push(" AND collection_id = ");
            qb.push_bind(collection_id);
            qb.push(" AND document_id IN (");
            let mut separated = qb.separated(", ");
            for id in batch {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await.map_err(backend)?;
            for row in rows {
                found.insert(row.get::<String, _>("document_id"));
            }
        }

        Ok(candidate_ids
            .iter()
            .filter(|id| found.contains(*id))
            .cloned()
            .collect())
    }

    async fn get_chunks(
        &self,
        tenant: &str,
        collection_id: &str,
        document_id: &str,
    ) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM index_chunks
            WHERE tenant = ? AND collection_id = ? AND document_id = ?
            ORDER BY chunk_index
            "#,
        )
        .bind(tenant)
        .bind(collection_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(row_to_chunk)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(backend)
    }

    async fn has_document(&self, store_hint: &str, document_id: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM index_chunks WHERE store_hint = ? AND document_id = ?)",
        )
        .bind(store_hint)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(found)
    }

    async fn count_chunks(&self, tenant: &str, collection_id: Option<&str>) -> Result<usize> {
        let count: i64 = match collection_id {
            Some(collection_id) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM index_chunks WHERE tenant = ? AND collection_id = ?",
            )
            .bind(tenant)
            .bind(collection_id)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?,
            None => sqlx::query_scalar("SELECT COUNT(*) FROM index_chunks WHERE tenant = ?")
                .bind(tenant)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?,
        };
        Ok(count as usize)
    }
}

/// Per-collection chunk statistics for the `stats` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub tenant: String,
    pub collection_id: String,
    pub documents: i64,
    pub chunks: i64,
    pub without_vector: i64,
}

impl SqliteIndex {
    pub async fn collection_stats(&self) -> anyhow::Result<Vec<CollectionStats>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant, collection_id,
                   COUNT(DISTINCT document_id) AS documents,
                   COUNT(*) AS chunks,
                   SUM(CASE WHEN vector IS NULL THEN 1 ELSE 0 END) AS without_vector
            FROM index_chunks
            GROUP BY tenant, collection_id
            ORDER BY tenant, collection_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CollectionStats {
                tenant: row.get("tenant"),
                collection_id: row.get("collection_id"),
                documents: row.get("documents"),
                chunks: row.get("chunks"),
                without_vector: row.get("without_vector"),
            })
            .collect())
    }
}
