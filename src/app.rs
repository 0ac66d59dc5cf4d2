//! Wiring of the whole pipeline from a [`Config`].

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use llm_index_core::index::IndexClient;
use llm_index_core::models::SourceKind;

use crate::collections::CollectionRegistry;
use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::host::fs::FsHostStore;
use crate::host::memory::InMemoryHost;
use crate::host::HostStore;
use crate::indexer::DocumentIndexer;
use crate::migrate::run_migrations;
use crate::orchestrator::IndexOrchestrator;
use crate::queue::LocalTaskQueue;
use crate::sources::managed::ManagedSource;
use crate::sources::mirrored::MirroredSource;
use crate::sources::Sources;
use crate::sqlite_index::SqliteIndex;
use crate::worker::Worker;

pub struct Pipeline {
    pub config: Config,
    pub pool: SqlitePool,
    pub index: Arc<SqliteIndex>,
    pub sources: Sources,
    pub queue: Arc<LocalTaskQueue>,
    pub orchestrator: Arc<IndexOrchestrator>,
}

impl Pipeline {
    /// Connects to the database, applies migrations and builds every component.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;

        let host: Arc<dyn HostStore> = match &config.host {
            Some(host) => Arc::new(FsHostStore::new(host)?),
            None => {
                if config
                    .collections
                    .iter()
                    .any(|c| c.source == SourceKind::Mirrored)
                {
                    tracing::warn!("mirrored collections configured without a [host] section");
                }
                Arc::new(InMemoryHost::new())
            }
        };

        let index = Arc::new(SqliteIndex::new(pool.clone()));
        let sources = Sources::new(
            Arc::new(ManagedSource::new(pool.clone())),
            Arc::new(MirroredSource::new(host, &config.tenants.primary)),
        );
        let embedder = Arc::new(Embedder::from_config(config)?);
        let queue = Arc::new(LocalTaskQueue::new());
        let collections = Arc::new(CollectionRegistry::with_collections(config.collections()));

        let index_client: Arc<dyn IndexClient> = index.clone();
        let indexer = DocumentIndexer::new(sources.clone(), index_client.clone(), embedder);
        let orchestrator = Arc::new(IndexOrchestrator::new(
            collections,
            sources.clone(),
            index_client,
            queue.clone(),
            indexer,
            &config.tenants.primary,
            config.worker.sweep_batch_size,
        ));

        Ok(Self {
            config: config.clone(),
            pool,
            index,
            sources,
            queue,
            orchestrator,
        })
    }

    pub fn worker(&self) -> Worker {
        Worker::new(self.orchestrator.clone(), self.queue.clone(), &self.config.worker)
    }

    /// Resolves `tenant:id` or a bare `id` in the primary tenant.
    pub fn collection(&self, name: &str) -> llm_index_core::Result<llm_index_core::models::Collection> {
        let (tenant, id) = name
            .split_once(':')
            .unwrap_or((self.config.tenants.primary.as_str(), name));
        self.orchestrator.collection(tenant, id)
    }
}
