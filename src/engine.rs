//! `Engine`: one store with the resolver, pipeline and projection wired to it

use crate::config::EngineConfig;
use crate::pipeline::{CancellationToken, Orchestrator, RetentionSweeper};
use crate::projection::ProjectionEngine;
use crate::resolve::{
    AliasMatchAssist, CanonicalizationAssist, Embedder, EntityResolver, NoEmbedder, Reconciler,
};
use crate::storage::{OpenStore, SqliteStore, StorageResult, Store};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn Store>,
    resolver: Arc<EntityResolver>,
    orchestrator: Arc<Orchestrator>,
    projection: Arc<ProjectionEngine>,
    reconciler: Arc<Reconciler>,
    sweeper: Arc<RetentionSweeper>,
}

impl Engine {
    /// Wire every component to `store`. Resolver and reconciler share one
    /// set of per-type locks.
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        assist: Arc<dyn CanonicalizationAssist>,
        config: EngineConfig,
    ) -> Self {
        let resolver = Arc::new(EntityResolver::new(
            store.clone(),
            embedder,
            assist,
            config.resolver_config(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            resolver.locks().clone(),
            config.similarity_threshold,
            config.neighbor_k,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            resolver.clone(),
            config.orchestrator_config(),
        ));
        Self {
            projection: Arc::new(ProjectionEngine::new(store.clone())),
            sweeper: Arc::new(RetentionSweeper::new(store.clone())),
            config,
            store,
            resolver,
            orchestrator,
            reconciler,
        }
    }

    /// Open the SQLite store at the configured path with the default
    /// embedder and assist
    pub fn open(config: EngineConfig) -> StorageResult<Self> {
        let path = config.db_path();
        let store = open_sqlite(&path, config.embedding_dimensions)?;
        info!(db = %path.display(), dimensions = config.embedding_dimensions, "store opened");
        Ok(Self::new(
            Arc::new(store),
            default_embedder(),
            Arc::new(AliasMatchAssist),
            config,
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn projection(&self) -> &Arc<ProjectionEngine> {
        &self.projection
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn sweeper(&self) -> &Arc<RetentionSweeper> {
        &self.sweeper
    }

    /// Start the retention sweeper and, when an interval is configured,
    /// the reconciler. Both stop when `cancel` fires.
    pub fn start_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self
            .sweeper
            .clone()
            .spawn(self.config.sweep_interval(), cancel.clone())];
        if let Some(interval) = self.config.reconcile_interval() {
            handles.push(self.reconciler.clone().spawn(interval, cancel.clone()));
        }
        handles
    }
}

#[cfg(not(feature = "embeddings"))]
fn open_sqlite(path: &std::path::Path, dimensions: usize) -> StorageResult<SqliteStore> {
    SqliteStore::open(path, dimensions)
}

#[cfg(feature = "embeddings")]
fn open_sqlite(path: &std::path::Path, dimensions: usize) -> StorageResult<SqliteStore> {
    // The vec0 index is rebuilt from keyword rows on every open
    let index = crate::index::SqliteVecIndex::open_in_memory(dimensions)?;
    SqliteStore::open_with_index(path, Box::new(index))
}

/// The local fastembed model when built with `embeddings`, otherwise an
/// embedder that requires mentions to arrive pre-embedded
pub fn default_embedder() -> Arc<dyn Embedder> {
    #[cfg(feature = "embeddings")]
    {
        match crate::resolve::FastEmbedEmbedder::default_model() {
            Ok(embedder) => return Arc::new(embedder),
            Err(e) => warn!(error = %e, "embedding model unavailable; mentions must carry embeddings"),
        }
    }
    #[cfg(not(feature = "embeddings"))]
    warn!("built without embeddings; mentions must carry embeddings");
    Arc::new(NoEmbedder)
}
