//! Collection definitions and their lifecycle.
//!
//! [`CollectionRegistry`] holds the live definitions keyed by
//! `(tenant, id)`. Every mutation returns the [`IndexEvent`] describing it.
//!
//! Definitions normally come from the config file. The binary keeps the
//! last applied set in the `collection_snapshots` table and [`diff`]s it
//! against the configured set on every `sync`, so edits to the file become
//! created / updated / deleted events.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use llm_index_core::models::{Collection, SourceKind};
use llm_index_core::reference::{resolve_scope, DocumentRef};
use llm_index_core::IndexError;

use crate::events::IndexEvent;

type Key = (String, String);

#[derive(Default)]
pub struct CollectionRegistry {
    collections: RwLock<BTreeMap<Key, Collection>>,
}

fn key(tenant: &str, id: &str) -> Key {
    (tenant.to_string(), id.to_string())
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collections(collections: impl IntoIterator<Item = Collection>) -> Self {
        let registry = Self::new();
        {
            let mut map = registry
                .collections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for c in collections {
                map.insert(key(&c.tenant, &c.id), c);
            }
        }
        registry
    }

    pub fn get(&self, tenant: &str, id: &str) -> Option<Collection> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(tenant, id))
            .cloned()
    }

    /// All collections, sorted by tenant then id.
    pub fn list(&self) -> Vec<Collection> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn create(&self, collection: Collection) -> llm_index_core::Result<IndexEvent> {
        collection.chunking.validate()?;
        let mut map = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let k = key(&collection.tenant, &collection.id);
        if map.contains_key(&k) {
            return Err(IndexError::Config(format!(
                "collection '{}' already exists in tenant '{}'",
                collection.id, collection.tenant
            )));
        }
        map.insert(k, collection.clone());
        Ok(IndexEvent::CollectionCreated(collection))
    }

    pub fn update(&self, collection: Collection) -> llm_index_core::Result<IndexEvent> {
        collection.chunking.validate()?;
        let mut map = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = map
            .get_mut(&key(&collection.tenant, &collection.id))
            .ok_or_else(|| IndexError::NotFound(format!("collection '{}'", collection.id)))?;
        let previous = std::mem::replace(slot, collection.clone());
        Ok(IndexEvent::CollectionUpdated {
            previous,
            current: collection,
        })
    }

    pub fn delete(&self, tenant: &str, id: &str) -> llm_index_core::Result<IndexEvent> {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(tenant, id))
            .map(IndexEvent::CollectionDeleted)
            .ok_or_else(|| IndexError::NotFound(format!("collection '{}'", id)))
    }

    /// Mirrored collections whose scope contains `doc`.
    ///
    /// Only collections of the document's own tenant and of the primary
    /// tenant can match.
    pub fn mirrored_containing(&self, doc: &DocumentRef, primary_tenant: &str) -> Vec<Collection> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.source == SourceKind::Mirrored)
            .filter(|c| c.tenant == doc.tenant || c.tenant == primary_tenant)
            .filter(|c| resolve_scope(c, primary_tenant).contains(doc))
            .cloned()
            .collect()
    }
}

/// Events turning `previous` into `current`: deletions, then creations,
/// then updates, each in key order.
pub fn diff(previous: &[Collection], current: &[Collection]) -> Vec<IndexEvent> {
    let before: BTreeMap<Key, &Collection> = previous
        .iter()
        .map(|c| (key(&c.tenant, &c.id), c))
        .collect();
    let after: BTreeMap<Key, &Collection> = current
        .iter()
        .map(|c| (key(&c.tenant, &c.id), c))
        .collect();

    let mut events = Vec::new();
    for (k, c) in &before {
        if !after.contains_key(k) {
            events.push(IndexEvent::CollectionDeleted((*c).clone()));
        }
    }
    for (k, c) in &after {
        if !before.contains_key(k) {
            events.push(IndexEvent::CollectionCreated((*c).clone()));
        }
    }
    for (k, c) in &after {
        if let Some(old) = before.get(k) {
            if old != c {
                events.push(IndexEvent::CollectionUpdated {
                    previous: (*old).clone(),
                    current: (*c).clone(),
                });
            }
        }
    }
    events
}

/// Last applied collection definitions.
pub async fn load_snapshot(pool: &SqlitePool) -> Result<Vec<Collection>> {
    let rows = sqlx::query("SELECT definition FROM collection_snapshots ORDER BY tenant, id")
        .fetch_all(pool)
        .await?;
    let mut collections = Vec::with_capacity(rows.len());
    for row in rows {
        let definition: String = row.try_get("definition")?;
        collections.push(serde_json::from_str(&definition)?);
    }
    Ok(collections)
}

/// Replaces the stored snapshot with `collections`.
pub async fn save_snapshot(pool: &SqlitePool, collections: &[Collection]) -> Result<()> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM collection_snapshots")
        .execute(&mut *tx)
        .await?;
    for c in collections {
        sqlx::query(
            "INSERT INTO collection_snapshots (tenant, id, definition, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&c.tenant)
        .bind(&c.id)
        .bind(serde_json::to_string(c)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_index_core::models::ChunkingPolicy;

    fn mirrored(tenant: &str, id: &str, scope: &[&str]) -> Collection {
        Collection {
            id: id.into(),
            tenant: tenant.into(),
            title: id.into(),
            embedding_model: "default".into(),
            chunking: ChunkingPolicy::default(),
            source: SourceKind::Mirrored,
            scope: scope.iter().map(|s| s.to_string()).collect(),
            owner: None,
        }
    }

    #[test]
    fn test_lifecycle_events() {
        let registry = CollectionRegistry::new();
        let c = mirrored("main", "help", &["Help"]);
        assert_eq!(
            registry.create(c.clone()).unwrap(),
            IndexEvent::CollectionCreated(c.clone())
        );
        assert!(registry.create(c.clone()).is_err());

        let renamed = Collection {
            title: "Help center".into(),
            ..c.clone()
        };
        match registry.update(renamed.clone()).unwrap() {
            IndexEvent::CollectionUpdated { previous, current } => {
                assert_eq!(previous, c);
                assert_eq!(current, renamed);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(registry.get("main", "help").unwrap().title, "Help center");

        assert!(matches!(
            registry.delete("main", "help").unwrap(),
            IndexEvent::CollectionDeleted(_)
        ));
        assert!(registry.delete("main", "help").is_err());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let registry = CollectionRegistry::new();
        let c = Collection {
            chunking: ChunkingPolicy::character(10, 10),
            ..mirrored("main", "bad", &["X"])
        };
        assert!(matches!(registry.create(c), Err(IndexError::InvalidPolicy(_))));
    }

    #[test]
    fn test_mirrored_containing() {
        let registry = CollectionRegistry::with_collections(vec![
            mirrored("main", "all-help", &["Help", "dev:Help"]),
            mirrored("dev", "dev-help", &["Help"]),
            mirrored("dev", "reach", &["main:Help"]),
            mirrored("main", "ops", &["Ops"]),
        ]);
        let ids = |doc: &DocumentRef| -> Vec<String> {
            registry
                .mirrored_containing(doc, "main")
                .into_iter()
                .map(|c| c.id)
                .collect()
        };
        assert_eq!(ids(&DocumentRef::new("dev", "Help.Page")), vec!["dev-help", "all-help"]);
        assert_eq!(ids(&DocumentRef::new("main", "Help.Page")), vec!["all-help"]);
        assert!(ids(&DocumentRef::new("main", "Other.Page")).is_empty());
    }

    #[test]
    fn test_diff() {
        let a = mirrored("main", "a", &["A"]);
        let b = mirrored("main", "b", &["B"]);
        let b2 = mirrored("main", "b", &["B", "C"]);
        let c = mirrored("main", "c", &["C"]);

        let events = diff(&[a.clone(), b.clone()], &[b2.clone(), c.clone()]);
        assert_eq!(
            events,
            vec![
                IndexEvent::CollectionDeleted(a.clone()),
                IndexEvent::CollectionCreated(c.clone()),
                IndexEvent::CollectionUpdated {
                    previous: b.clone(),
                    current: b2.clone()
                },
            ]
        );
        assert!(diff(&[a.clone()], &[a]).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("s.sqlite")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        assert!(load_snapshot(&pool).await.unwrap().is_empty());
        let set = vec![mirrored("main", "a", &["A"]), mirrored("dev", "b", &["B"])];
        save_snapshot(&pool, &set).await.unwrap();
        let loaded = load_snapshot(&pool).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].tenant, "dev");

        save_snapshot(&pool, &set[..1]).await.unwrap();
        assert_eq!(load_snapshot(&pool).await.unwrap(), vec![set[0].clone()]);
    }
}
