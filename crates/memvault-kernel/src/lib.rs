//! The Memvault consistency kernel.
//!
//! Ties the three storage adapters, the embedding provider, the write
//! coordinator, and the background reconciler into one process-local
//! service. The [`Vault`] facade opens everything from a [`VaultConfig`];
//! embedders and stores remain swappable behind their traits.

pub mod config;
pub mod coordinator;
pub mod embedding;
pub mod keyed_lock;
pub mod reconciler;
pub mod retry;

pub use config::{default_config_path, load_config, vault_home};
pub use coordinator::{Coordinator, MemoryDraft, RecallHit, RepairOutcome};
pub use embedding::{build_provider, EmbeddingProvider, LocalHashEmbedder, OpenAiEmbedder};
pub use reconciler::{PassReport, Reconciler};
pub use retry::{retry_with_backoff, BackoffPolicy, RetryFailure};

use memvault_store::{
    GraphStore, MetadataStore, QdrantVectorIndex, SqliteGraphStore, SqliteMetadataStore,
    SqliteVectorIndex, VectorIndex,
};
use memvault_types::config::VaultConfig;
use memvault_types::MemvaultResult;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// A fully wired vault: coordinator plus the handles needed to run and stop
/// its reconciler.
pub struct Vault {
    coordinator: Coordinator,
    config: VaultConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Vault {
    /// Open all stores named in the config and wire a coordinator over them.
    ///
    /// SQLite files are created (with parent directories) as needed; when
    /// `stores.qdrant_url` is set the vector index speaks to Qdrant instead.
    pub async fn open(config: VaultConfig) -> MemvaultResult<Self> {
        let metadata: Arc<dyn MetadataStore> = Arc::new(open_sqlite(
            &config.stores.metadata_path,
            |p| SqliteMetadataStore::open(p),
            SqliteMetadataStore::open_in_memory,
        )?);

        let vector: Arc<dyn VectorIndex> = match &config.stores.qdrant_url {
            Some(url) => Arc::new(
                QdrantVectorIndex::connect(
                    url.clone(),
                    config.stores.qdrant_collection.clone(),
                    config.embedding.dimensions,
                )
                .await?,
            ),
            None => Arc::new(open_sqlite(
                &config.stores.vector_path,
                |p| SqliteVectorIndex::open(p),
                SqliteVectorIndex::open_in_memory,
            )?),
        };

        let graph: Arc<dyn GraphStore> = Arc::new(open_sqlite(
            &config.stores.graph_path,
            |p| SqliteGraphStore::open(p),
            SqliteGraphStore::open_in_memory,
        )?);

        let embedder = build_provider(&config.embedding)?;
        let coordinator = Coordinator::new(
            metadata,
            vector,
            graph,
            embedder,
            Duration::from_millis(config.adapter_timeout_ms),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            metadata = %config.stores.metadata_path,
            vector_backend = if config.stores.qdrant_url.is_some() { "qdrant" } else { "sqlite" },
            "vault opened"
        );
        Ok(Self {
            coordinator,
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The write coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// The configuration this vault was opened with.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Spawn the periodic reconciler; it stops on [`Vault::shutdown`].
    pub fn start_reconciler(&self) -> JoinHandle<()> {
        Reconciler::new(
            self.coordinator.clone(),
            self.config.reconciler.clone(),
            self.shutdown_rx.clone(),
        )
        .spawn()
    }

    /// Run one reconciliation pass immediately, drift scan included.
    pub async fn reconcile_now(&self) -> PassReport {
        let mut reconciler_config = self.config.reconciler.clone();
        reconciler_config.drift_scan_every = 1;
        Reconciler::new(
            self.coordinator.clone(),
            reconciler_config,
            self.shutdown_rx.clone(),
        )
        .run_pass()
        .await
    }

    /// Signal the reconciler (and anything else watching) to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Open a SQLite-backed store, creating parent directories for file paths.
fn open_sqlite<S>(
    path: &str,
    open: impl Fn(&str) -> MemvaultResult<S>,
    open_in_memory: impl Fn() -> MemvaultResult<S>,
) -> MemvaultResult<S> {
    if path == ":memory:" {
        return open_in_memory();
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    open(path)
}
