//! Documents mirrored from the host store.
//!
//! A mirrored collection's scope is a list of space prefixes, possibly
//! reaching into other tenants when the collection belongs to the primary
//! tenant. Enumeration serves one global `(offset, limit)` window over the
//! tenants in sorted order:
//!
//! ```text
//! dev:  [d0 d1 d2]   main: [m0 m1 m2 m3]
//! offset 4, limit 2  →  skip dev (3), skip m0, return [m1 m2]
//! ```
//!
//! Only tenants that are skipped entirely need counting.

use std::sync::Arc;

use async_trait::async_trait;

use llm_index_core::models::{Collection, Document, SourceKind};
use llm_index_core::reference::{resolve_scope, DocumentRef};
use llm_index_core::{IndexError, Result};

use super::DocumentSource;
use crate::extract::extract_text;
use crate::host::{HostPage, HostStore};

pub struct MirroredSource {
    host: Arc<dyn HostStore>,
    primary_tenant: String,
}

impl MirroredSource {
    pub fn new(host: Arc<dyn HostStore>, primary_tenant: impl Into<String>) -> Self {
        Self {
            host,
            primary_tenant: primary_tenant.into(),
        }
    }
}

#[async_trait]
impl DocumentSource for MirroredSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mirrored
    }

    async fn enumerate(
        &self,
        collection: &Collection,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let resolution = resolve_scope(collection, &self.primary_tenant);
        if !resolution.rejected.is_empty() {
            tracing::warn!(
                collection = %collection.id,
                tenant = %collection.tenant,
                rejected = ?resolution.rejected,
                "ignoring scope prefixes"
            );
        }

        let mut ids = Vec::new();
        let mut skip = offset;
        let mut remaining = limit;
        for (tenant, prefixes) in resolution.by_tenant() {
            if remaining == Some(0) {
                break;
            }
            if skip > 0 {
                let count = self.host.count_under_prefixes(&tenant, &prefixes).await?;
                if count <= skip {
                    skip -= count;
                    continue;
                }
            }
            let docs = self
                .host
                .enumerate_under_prefixes(&tenant, &prefixes, skip, remaining)
                .await?;
            skip = 0;
            if let Some(r) = remaining.as_mut() {
                *r = r.saturating_sub(docs.len());
            }
            ids.extend(docs.iter().map(DocumentRef::to_string));
        }
        Ok(ids)
    }

    async fn get_document(&self, collection: &Collection, document_id: &str) -> Result<Document> {
        let doc = DocumentRef::parse(document_id)?;
        if !resolve_scope(collection, &self.primary_tenant).contains(&doc) {
            return Err(IndexError::NotFound(format!(
                "{} is outside collection '{}'",
                document_id, collection.id
            )));
        }
        if !self.host.can_view(collection.owner.as_deref(), &doc).await? {
            return Err(IndexError::AccessDenied(format!(
                "{} may not view {}",
                collection.owner.as_deref().unwrap_or("system"),
                document_id
            )));
        }
        let page = self
            .host
            .get_page(&doc)
            .await?
            .ok_or_else(|| IndexError::NotFound(document_id.to_string()))?;

        Ok(Document {
            id: document_id.to_string(),
            tenant: collection.tenant.clone(),
            collection_id: collection.id.clone(),
            title: Some(page.title.clone()),
            content: assemble_content(document_id, &page),
            language: page.language.clone().or_else(|| doc.locale.clone()),
            mimetype: page.syntax.mimetype().to_string(),
            source_url: page.url.clone(),
        })
    }
}

/// Flattens a page into indexable text.
///
/// Title heading and body, one level-2 heading per non-blank metadata
/// field, then one per attachment whose text could be extracted.
pub fn assemble_content(document_id: &str, page: &HostPage) -> String {
    let syntax = page.syntax;
    let mut parts = Vec::new();

    let body = page.body.trim();
    let head = syntax.heading(1, &page.title);
    parts.push(if body.is_empty() {
        head
    } else {
        format!("{}\n\n{}", head, body)
    });

    for (name, value) in &page.metadata {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        parts.push(format!("{}\n\n{}", syntax.heading(2, name), value));
    }

    for attachment in &page.attachments {
        match extract_text(&attachment.filename, &attachment.mimetype, &attachment.bytes) {
            Ok(text) if text.is_empty() => {}
            Ok(text) => parts.push(format!("{}\n\n{}", syntax.heading(2, &attachment.filename), text)),
            Err(e) => {
                tracing::warn!(
                    document = document_id,
                    attachment = %attachment.filename,
                    error = %e,
                    "skipping attachment"
                );
            }
        }
    }

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::InMemoryHost;
    use crate::host::{Attachment, Syntax};
    use crate::sources::DocumentDraft;
    use llm_index_core::models::ChunkingPolicy;

    fn collection(tenant: &str, scope: &[&str]) -> Collection {
        Collection {
            id: "wiki".into(),
            tenant: tenant.into(),
            title: "Wiki".into(),
            embedding_model: "default".into(),
            chunking: ChunkingPolicy::default(),
            source: SourceKind::Mirrored,
            scope: scope.iter().map(|s| s.to_string()).collect(),
            owner: Some("alice".into()),
        }
    }

    fn page(title: &str, body: &str) -> HostPage {
        HostPage {
            title: title.into(),
            body: body.into(),
            syntax: Syntax::Markdown,
            ..HostPage::default()
        }
    }

    fn host() -> Arc<InMemoryHost> {
        let host = Arc::new(InMemoryHost::new());
        for i in 0..3 {
            host.insert(DocumentRef::new("dev", format!("Guides.D{}", i)), page("d", "d"));
        }
        for i in 0..4 {
            host.insert(DocumentRef::new("main", format!("Help.M{}", i)), page("m", "m"));
        }
        host.insert(DocumentRef::new("main", "Private.Secret"), page("s", "s"));
        host
    }

    #[tokio::test]
    async fn test_enumerate_spans_tenants() {
        let source = MirroredSource::new(host(), "main");
        let c = collection("main", &["Help", "dev:Guides"]);

        let all = source.enumerate(&c, 0, None).await.unwrap();
        assert_eq!(
            all,
            vec![
                "dev:Guides.D0", "dev:Guides.D1", "dev:Guides.D2",
                "main:Help.M0", "main:Help.M1", "main:Help.M2", "main:Help.M3",
            ]
        );
        assert_eq!(
            source.enumerate(&c, 4, Some(2)).await.unwrap(),
            vec!["main:Help.M1", "main:Help.M2"]
        );
        assert_eq!(
            source.enumerate(&c, 2, Some(3)).await.unwrap(),
            vec!["dev:Guides.D2", "main:Help.M0", "main:Help.M1"]
        );
        assert!(source.enumerate(&c, 7, None).await.unwrap().is_empty());
        assert!(source.enumerate(&c, 0, Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pagination_matches_full_listing() {
        let source = MirroredSource::new(host(), "main");
        let c = collection("main", &["Help", "dev:Guides"]);
        let all = source.enumerate(&c, 0, None).await.unwrap();
        for size in 1..=8 {
            let mut paged = Vec::new();
            let mut offset = 0;
            loop {
                let page = source.enumerate(&c, offset, Some(size)).await.unwrap();
                if page.is_empty() {
                    break;
                }
                offset += page.len();
                paged.extend(page);
            }
            assert_eq!(paged, all, "page size {}", size);
        }
    }

    #[tokio::test]
    async fn test_cross_tenant_scope_requires_primary() {
        let source = MirroredSource::new(host(), "main");
        let c = collection("other", &["dev:Guides"]);
        assert!(source.enumerate(&c, 0, None).await.unwrap().is_empty());
        assert!(matches!(
            source.get_document(&c, "dev:Guides.D0").await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_document_checks() {
        let host = host();
        host.deny("alice", DocumentRef::new("main", "Help.M0"));
        let source = MirroredSource::new(host, "main");
        let c = collection("main", &["Help"]);

        assert!(matches!(
            source.get_document(&c, "main:Private.Secret").await,
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            source.get_document(&c, "main:Help.M0").await,
            Err(IndexError::AccessDenied(_))
        ));
        assert!(matches!(
            source.get_document(&c, "main:Help.Gone").await,
            Err(IndexError::NotFound(_))
        ));
        let doc = source.get_document(&c, "main:Help.M1").await.unwrap();
        assert_eq!(doc.content, "# m\n\nm");
        assert_eq!(doc.mimetype, "text/markdown");
    }

    #[tokio::test]
    async fn test_writes_unsupported() {
        let source = MirroredSource::new(host(), "main");
        let c = collection("main", &["Help"]);
        assert!(matches!(
            source.create_document(&c, "x", DocumentDraft::default()).await,
            Err(IndexError::Unsupported(_))
        ));
        assert!(matches!(
            source.delete_document(&c, "x").await,
            Err(IndexError::Unsupported(_))
        ));
    }

    #[test]
    fn test_assemble_content_xwiki() {
        let page = HostPage {
            title: "Backups".into(),
            body: "Nightly at 2am.\n".into(),
            syntax: Syntax::XWiki,
            metadata: vec![
                ("Summary".into(), "How backups run".into()),
                ("Empty".into(), "   ".into()),
            ],
            attachments: vec![
                Attachment {
                    filename: "runbook.txt".into(),
                    mimetype: "text/plain".into(),
                    bytes: b"Step one".to_vec(),
                },
                Attachment {
                    filename: "diagram.png".into(),
                    mimetype: "image/png".into(),
                    bytes: vec![0x89],
                },
            ],
            ..HostPage::default()
        };
        assert_eq!(
            assemble_content("main:Ops.Backups", &page),
            "= Backups =\n\nNightly at 2am.\n\n== Summary ==\n\nHow backups run\n\n== runbook.txt ==\n\nStep one"
        );
    }
}
