//! Configuration structs with serde defaults.
//!
//! Loading (TOML file + `MEMVAULT_*` environment overrides) lives in the
//! kernel crate; this module only defines the shapes.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a Memvault process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Log filter (overridden by `RUST_LOG`).
    pub log_level: String,
    /// Storage backend locations.
    pub stores: StoreConfig,
    /// Per-adapter-call timeout in milliseconds.
    pub adapter_timeout_ms: u64,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Reconciler settings.
    pub reconciler: ReconcilerConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stores: StoreConfig::default(),
            adapter_timeout_ms: 5_000,
            embedding: EmbeddingConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// Where each of the three stores lives.
///
/// SQLite paths default to files under the vault home; the special value
/// `:memory:` gives an ephemeral store. When `qdrant_url` is set, the vector
/// index uses Qdrant over HTTP instead of SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite path for the metadata store.
    pub metadata_path: String,
    /// SQLite path for the vector index (ignored when `qdrant_url` is set).
    pub vector_path: String,
    /// SQLite path for the graph store.
    pub graph_path: String,
    /// Base URL of a Qdrant instance, e.g. `http://localhost:6333`.
    pub qdrant_url: Option<String>,
    /// Qdrant collection name.
    pub qdrant_collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            metadata_path: "metadata.db".to_string(),
            vector_path: "vector.db".to_string(),
            graph_path: "graph.db".to_string(),
            qdrant_url: None,
            qdrant_collection: "memvault".to_string(),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider: `local` (deterministic hash projection) or `openai`
    /// (any OpenAI-compatible `/v1/embeddings` endpoint).
    pub provider: String,
    /// Model name sent to the provider.
    pub model: String,
    /// Base URL for HTTP providers.
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Embedding dimensionality.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimensions: 384,
        }
    }
}

/// Reconciler cadence and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Seconds between repair passes.
    pub interval_secs: u64,
    /// Every Nth pass also runs the cross-store drift scan.
    pub drift_scan_every: u32,
    /// Records fetched per status per pass.
    pub batch_limit: usize,
    /// Retry attempts per record per pass.
    pub max_attempts: u32,
    /// Minimum backoff delay between retries, milliseconds.
    pub min_delay_ms: u64,
    /// Maximum backoff delay, milliseconds.
    pub max_delay_ms: u64,
    /// Orphaned derived entries younger than this are reported, not deleted.
    pub orphan_grace_secs: u64,
    /// Concurrent adapter calls the reconciler may hold (isolation budget,
    /// separate from foreground traffic).
    pub concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            drift_scan_every: 10,
            batch_limit: 64,
            max_attempts: 4,
            min_delay_ms: 200,
            max_delay_ms: 10_000,
            orphan_grace_secs: 600,
            concurrency: 4,
        }
    }
}
