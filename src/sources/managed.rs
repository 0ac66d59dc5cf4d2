//! Managed documents stored in SQLite.
//!
//! A managed document belongs to exactly one collection and is addressed as
//! `tenant:collection/name`. Every write returns the matching document event.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use llm_index_core::models::{managed_document_id, Collection, Document, SourceKind};
use llm_index_core::{IndexError, Result};

use super::{DocumentDraft, DocumentSource};
use crate::events::{DocumentEvent, IndexEvent};

pub struct ManagedSource {
    pool: SqlitePool,
}

impl ManagedSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn check(collection: &Collection, name: &str) -> Result<String> {
        if collection.source != SourceKind::Managed {
            return Err(IndexError::Unsupported(format!(
                "collection '{}' is not managed",
                collection.id
            )));
        }
        if name.trim().is_empty() {
            return Err(IndexError::Config("document name must not be empty".to_string()));
        }
        Ok(managed_document_id(&collection.tenant, &collection.id, name))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM managed_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }
}

fn backend(e: sqlx::Error) -> IndexError {
    IndexError::Backend(e.into())
}

#[async_trait]
impl DocumentSource for ManagedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Managed
    }

    async fn enumerate(
        &self,
        collection: &Collection,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let limit = limit.map_or(-1, |l| l as i64);
        let rows = sqlx::query(
            "SELECT id FROM managed_documents WHERE tenant = ? AND collection_id = ? \
             ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(&collection.tenant)
        .bind(&collection.id)
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("id").map_err(backend))
            .collect()
    }

    async fn get_document(&self, collection: &Collection, document_id: &str) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, title, content, language, mimetype, source_url FROM managed_documents \
             WHERE id = ? AND tenant = ? AND collection_id = ?",
        )
        .bind(document_id)
        .bind(&collection.tenant)
        .bind(&collection.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| IndexError::NotFound(document_id.to_string()))?;

        Ok(Document {
            id: row.try_get("id").map_err(backend)?,
            tenant: collection.tenant.clone(),
            collection_id: collection.id.clone(),
            title: row.try_get("title").map_err(backend)?,
            content: row.try_get("content").map_err(backend)?,
            language: row.try_get("language").map_err(backend)?,
            mimetype: row.try_get("mimetype").map_err(backend)?,
            source_url: row.try_get("source_url").map_err(backend)?,
        })
    }

    async fn create_document(
        &self,
        collection: &Collection,
        name: &str,
        draft: DocumentDraft,
    ) -> Result<IndexEvent> {
        let id = Self::check(collection, name)?;
        if self.exists(&id).await? {
            return Err(IndexError::Config(format!("document '{}' already exists", id)));
        }
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO managed_documents (id, tenant, collection_id, name, title, content,
                                           language, mimetype, source_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&collection.tenant)
        .bind(&collection.id)
        .bind(name)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.language)
        .bind(draft.mimetype.as_deref().unwrap_or("text/plain"))
        .bind(&draft.source_url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(IndexEvent::DocumentCreated(DocumentEvent::managed(
            &collection.tenant,
            &collection.id,
            id,
        )))
    }

    async fn save_document(
        &self,
        collection: &Collection,
        name: &str,
        draft: DocumentDraft,
    ) -> Result<IndexEvent> {
        let id = Self::check(collection, name)?;
        let result = sqlx::query(
            r#"
            UPDATE managed_documents
            SET title = ?, content = ?, language = ?, mimetype = ?, source_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.language)
        .bind(draft.mimetype.as_deref().unwrap_or("text/plain"))
        .bind(&draft.source_url)
        .bind(Utc::now().timestamp())
        .bind(&id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(id));
        }

        Ok(IndexEvent::DocumentUpdated(DocumentEvent::managed(
            &collection.tenant,
            &collection.id,
            id,
        )))
    }

    async fn delete_document(&self, collection: &Collection, name: &str) -> Result<IndexEvent> {
        let id = Self::check(collection, name)?;
        let result = sqlx::query("DELETE FROM managed_documents WHERE id = ?")
            .bind(&id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(id));
        }

        Ok(IndexEvent::DocumentDeleted(DocumentEvent::managed(
            &collection.tenant,
            &collection.id,
            id,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_path;
    use crate::migrate::run_migrations;
    use llm_index_core::models::ChunkingPolicy;

    fn collection(id: &str) -> Collection {
        Collection {
            id: id.into(),
            tenant: "main".into(),
            title: id.into(),
            embedding_model: "default".into(),
            chunking: ChunkingPolicy::default(),
            source: SourceKind::Managed,
            scope: Vec::new(),
            owner: None,
        }
    }

    fn draft(content: &str) -> DocumentDraft {
        DocumentDraft {
            title: Some("Title".into()),
            content: content.into(),
            ..DocumentDraft::default()
        }
    }

    async fn source() -> (tempfile::TempDir, ManagedSource) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (tmp, ManagedSource::new(pool))
    }

    #[tokio::test]
    async fn test_create_get_save_delete() {
        let (_tmp, source) = source().await;
        let notes = collection("notes");

        let event = source.create_document(&notes, "readme", draft("v1")).await.unwrap();
        assert_eq!(
            event,
            IndexEvent::DocumentCreated(DocumentEvent::managed("main", "notes", "main:notes/readme"))
        );
        assert!(source.create_document(&notes, "readme", draft("again")).await.is_err());

        let doc = source.get_document(&notes, "main:notes/readme").await.unwrap();
        assert_eq!(doc.content, "v1");
        assert_eq!(doc.mimetype, "text/plain");

        let event = source.save_document(&notes, "readme", draft("v2")).await.unwrap();
        assert!(matches!(event, IndexEvent::DocumentUpdated(_)));
        let doc = source.get_document(&notes, "main:notes/readme").await.unwrap();
        assert_eq!(doc.content, "v2");

        let event = source.delete_document(&notes, "readme").await.unwrap();
        assert!(matches!(event, IndexEvent::DocumentDeleted(_)));
        assert!(matches!(
            source.get_document(&notes, "main:notes/readme").await,
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            source.save_document(&notes, "readme", draft("v3")).await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_enumerate_is_scoped_and_paged() {
        let (_tmp, source) = source().await;
        let notes = collection("notes");
        let other = collection("other");
        for name in ["c", "a", "b"] {
            source.create_document(&notes, name, draft(name)).await.unwrap();
        }
        source.create_document(&other, "x", draft("x")).await.unwrap();

        let all = source.enumerate(&notes, 0, None).await.unwrap();
        assert_eq!(all, vec!["main:notes/a", "main:notes/b", "main:notes/c"]);
        assert_eq!(source.enumerate(&notes, 1, Some(1)).await.unwrap(), vec!["main:notes/b"]);
        assert!(source.enumerate(&notes, 5, None).await.unwrap().is_empty());

        // A document of another collection is not visible here.
        assert!(source.get_document(&notes, "main:other/x").await.is_err());
    }
}
