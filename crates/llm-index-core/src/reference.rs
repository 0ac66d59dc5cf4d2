//! Document and space references.
//!
//! Mirrored documents are addressed as `tenant:Space.Sub.Page`, optionally
//! followed by `;locale`. A space prefix such as `Space.Sub` contains every
//! document whose path starts with `Space.Sub.`. Prefixes may name another
//! tenant (`other:Space`), which only collections of the primary tenant are
//! allowed to do.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{IndexError, Result};
use crate::models::{Collection, SourceKind};

/// Fully qualified reference to a mirrored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentRef {
    /// Tenant (wiki) the page lives in.
    pub tenant: String,
    /// Dotted path, the last segment being the page name.
    pub path: String,
    /// Translation locale; `None` for the default language.
    pub locale: Option<String>,
}

impl DocumentRef {
    pub fn new(tenant: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            path: path.into(),
            locale: None,
        }
    }

    /// Parses `tenant:Space.Page[;locale]`. The tenant is mandatory.
    pub fn parse(raw: &str) -> Result<Self> {
        let (tenant, rest) = raw
            .split_once(':')
            .ok_or_else(|| IndexError::Config(format!("document id '{}' has no tenant", raw)))?;
        let (path, locale) = match rest.rsplit_once(';') {
            Some((path, locale)) if !locale.is_empty() => (path, Some(locale.to_string())),
            Some((path, _)) => (path, None),
            None => (rest, None),
        };
        if tenant.is_empty() || path.is_empty() {
            return Err(IndexError::Config(format!("malformed document id '{}'", raw)));
        }
        Ok(Self {
            tenant: tenant.to_string(),
            path: path.to_string(),
            locale,
        })
    }

    pub fn page_name(&self) -> &str {
        self.path.rsplit_once('.').map_or(&self.path, |(_, page)| page)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.path)?;
        if let Some(locale) = &self.locale {
            write!(f, ";{}", locale)?;
        }
        Ok(())
    }
}

/// A space prefix resolved to its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceRef {
    pub tenant: String,
    /// Dotted space path without a trailing dot.
    pub path: String,
}

impl SpaceRef {
    /// Resolves `Space.Sub` or `tenant:Space.Sub` against a default tenant.
    pub fn resolve(raw: &str, default_tenant: &str) -> Option<Self> {
        let raw = raw.trim();
        let (tenant, path) = match raw.split_once(':') {
            Some((tenant, path)) => (tenant.trim(), path.trim()),
            None => (default_tenant, raw),
        };
        let path = path.trim_end_matches('.');
        if tenant.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            tenant: tenant.to_string(),
            path: path.to_string(),
        })
    }

    pub fn contains(&self, doc: &DocumentRef) -> bool {
        self.tenant == doc.tenant && path_under(&doc.path, &self.path)
    }

    /// Literal prefix shared by the ids of every document in this space.
    pub fn id_prefix(&self) -> String {
        format!("{}:{}.", self.tenant, self.path)
    }
}

impl fmt::Display for SpaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.path)
    }
}

/// True when `path` lies strictly below the space `prefix`.
pub fn path_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Outcome of resolving a collection's configured scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeResolution {
    /// Accepted spaces, deduplicated, in configuration order.
    pub spaces: Vec<SpaceRef>,
    /// Raw prefixes dropped as malformed or as a forbidden cross-tenant reach.
    pub rejected: Vec<String>,
}

impl ScopeResolution {
    /// Accepted prefixes grouped by tenant, tenants in sorted order.
    pub fn by_tenant(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for space in &self.spaces {
            groups
                .entry(space.tenant.clone())
                .or_default()
                .push(space.path.clone());
        }
        groups
    }

    pub fn contains(&self, doc: &DocumentRef) -> bool {
        self.spaces.iter().any(|s| s.contains(doc))
    }
}

/// Resolves a mirrored collection's scope.
///
/// Unqualified prefixes take the collection's tenant. Prefixes naming
/// another tenant survive only when the collection belongs to
/// `primary_tenant`.
pub fn resolve_scope(collection: &Collection, primary_tenant: &str) -> ScopeResolution {
    let mut resolution = ScopeResolution::default();
    for raw in &collection.scope {
        let Some(space) = SpaceRef::resolve(raw, &collection.tenant) else {
            resolution.rejected.push(raw.clone());
            continue;
        };
        if space.tenant != collection.tenant && collection.tenant != primary_tenant {
            resolution.rejected.push(raw.clone());
            continue;
        }
        if !resolution.spaces.contains(&space) {
            resolution.spaces.push(space);
        }
    }
    resolution
}

/// Id prefixes of the documents a collection may keep in the index.
///
/// An empty result means nothing is in scope.
pub fn keep_prefixes(collection: &Collection, primary_tenant: &str) -> Vec<String> {
    match collection.source {
        SourceKind::Managed => vec![collection.managed_prefix()],
        SourceKind::Mirrored => resolve_scope(collection, primary_tenant)
            .spaces
            .iter()
            .map(SpaceRef::id_prefix)
            .collect(),
    }
}
