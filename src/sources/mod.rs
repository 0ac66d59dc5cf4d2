//! Document sources.
//!
//! A [`DocumentSource`] lists the document ids of a collection and turns one
//! id into a [`Document`] with flattened text content. Two kinds exist:
//!
//! | Kind | Type | Writes |
//! |------|------|--------|
//! | managed | [`managed::ManagedSource`] | create, save, delete |
//! | mirrored | [`mirrored::MirroredSource`] | unsupported |
//!
//! Writes return the [`IndexEvent`] the caller hands to the orchestrator.

pub mod managed;
pub mod mirrored;

use std::sync::Arc;

use async_trait::async_trait;

use llm_index_core::models::{Collection, Document, SourceKind};
use llm_index_core::{IndexError, Result};

use crate::events::IndexEvent;

/// Content of a managed document before it has an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentDraft {
    pub title: Option<String>,
    pub content: String,
    pub language: Option<String>,
    pub mimetype: Option<String>,
    pub source_url: Option<String>,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Document ids of `collection`, in a stable order. `limit = None` is
    /// unbounded.
    async fn enumerate(
        &self,
        collection: &Collection,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>>;

    async fn get_document(&self, collection: &Collection, document_id: &str) -> Result<Document>;

    async fn create_document(
        &self,
        collection: &Collection,
        _name: &str,
        _draft: DocumentDraft,
    ) -> Result<IndexEvent> {
        Err(unsupported(self.kind(), "create", collection))
    }

    async fn save_document(
        &self,
        collection: &Collection,
        _name: &str,
        _draft: DocumentDraft,
    ) -> Result<IndexEvent> {
        Err(unsupported(self.kind(), "save", collection))
    }

    async fn delete_document(&self, collection: &Collection, _name: &str) -> Result<IndexEvent> {
        Err(unsupported(self.kind(), "delete", collection))
    }
}

fn unsupported(kind: SourceKind, op: &str, collection: &Collection) -> IndexError {
    IndexError::Unsupported(format!(
        "{} documents of {} collection '{}'",
        op, kind, collection.id
    ))
}

/// One source per kind.
#[derive(Clone)]
pub struct Sources {
    pub managed: Arc<dyn DocumentSource>,
    pub mirrored: Arc<dyn DocumentSource>,
}

impl Sources {
    pub fn new(managed: Arc<dyn DocumentSource>, mirrored: Arc<dyn DocumentSource>) -> Self {
        Self { managed, mirrored }
    }

    pub fn get(&self, kind: SourceKind) -> &Arc<dyn DocumentSource> {
        match kind {
            SourceKind::Managed => &self.managed,
            SourceKind::Mirrored => &self.mirrored,
        }
    }

    pub fn for_collection(&self, collection: &Collection) -> &Arc<dyn DocumentSource> {
        self.get(collection.source)
    }
}
