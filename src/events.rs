//! Lifecycle events consumed by the orchestrator.

use llm_index_core::models::{Collection, SourceKind};

/// A document changed somewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    pub tenant: String,
    pub document_id: String,
    pub source: SourceKind,
    /// Owning collection. Always set for managed documents, never for mirrored ones.
    pub collection_id: Option<String>,
}

impl DocumentEvent {
    pub fn mirrored(tenant: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            document_id: document_id.into(),
            source: SourceKind::Mirrored,
            collection_id: None,
        }
    }

    pub fn managed(
        tenant: impl Into<String>,
        collection_id: impl Into<String>,
        document_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            document_id: document_id.into(),
            source: SourceKind::Managed,
            collection_id: Some(collection_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    DocumentCreated(DocumentEvent),
    DocumentUpdated(DocumentEvent),
    DocumentDeleted(DocumentEvent),
    CollectionCreated(Collection),
    CollectionUpdated {
        previous: Collection,
        current: Collection,
    },
    CollectionDeleted(Collection),
}

impl IndexEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            IndexEvent::DocumentCreated(_) => "document-created",
            IndexEvent::DocumentUpdated(_) => "document-updated",
            IndexEvent::DocumentDeleted(_) => "document-deleted",
            IndexEvent::CollectionCreated(_) => "collection-created",
            IndexEvent::CollectionUpdated { .. } => "collection-updated",
            IndexEvent::CollectionDeleted(_) => "collection-deleted",
        }
    }

    pub fn tenant(&self) -> &str {
        match self {
            IndexEvent::DocumentCreated(e)
            | IndexEvent::DocumentUpdated(e)
            | IndexEvent::DocumentDeleted(e) => &e.tenant,
            IndexEvent::CollectionCreated(c) | IndexEvent::CollectionDeleted(c) => &c.tenant,
            IndexEvent::CollectionUpdated { current, .. } => &current.tenant,
        }
    }
}
