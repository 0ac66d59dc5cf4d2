//! In-memory [`HostStore`] for tests and local experiments.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use llm_index_core::reference::DocumentRef;
use llm_index_core::Result;

use super::{under_any, HostPage, HostStore};

/// Host store kept in memory.
///
/// Pages are visible to everyone unless explicitly denied with
/// [`deny`](InMemoryHost::deny).
#[derive(Default)]
pub struct InMemoryHost {
    pages: RwLock<BTreeMap<DocumentRef, HostPage>>,
    denied: RwLock<HashSet<(String, DocumentRef)>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a page.
    pub fn insert(&self, doc: DocumentRef, page: HostPage) {
        self.pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(doc, page);
    }

    pub fn remove(&self, doc: &DocumentRef) -> Option<HostPage> {
        self.pages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(doc)
    }

    /// Hides `doc` from `principal`.
    pub fn deny(&self, principal: &str, doc: DocumentRef) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((principal.to_string(), doc));
    }

    fn matching(&self, tenant: &str, prefixes: &[String]) -> Vec<DocumentRef> {
        self.pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|doc| doc.tenant == tenant && under_any(&doc.path, prefixes))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HostStore for InMemoryHost {
    async fn get_page(&self, doc: &DocumentRef) -> Result<Option<HostPage>> {
        Ok(self
            .pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(doc)
            .cloned())
    }

    async fn enumerate_under_prefixes(
        &self,
        tenant: &str,
        prefixes: &[String],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentRef>> {
        let docs = self.matching(tenant, prefixes).into_iter().skip(offset);
        Ok(match limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        })
    }

    async fn count_under_prefixes(&self, tenant: &str, prefixes: &[String]) -> Result<usize> {
        Ok(self.matching(tenant, prefixes).len())
    }

    async fn can_view(&self, principal: Option<&str>, doc: &DocumentRef) -> Result<bool> {
        let Some(principal) = principal else {
            return Ok(true);
        };
        Ok(!self
            .denied
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(principal.to_string(), doc.clone())))
    }
}
