//! The consistency coordinator.
//!
//! One logical memory lives in three stores that share no transaction
//! manager. The coordinator sequences every mutation so the metadata store
//! is always a superset of "things that might still exist":
//!
//! - **Create/update**: metadata first (the durability checkpoint), then
//!   embedding + vector + graph. Partial failure marks the record `degraded`
//!   and reports the write as accepted-but-not-indexed, never as a hard
//!   failure.
//! - **Delete**: tombstone in metadata first, then derived-store deletes,
//!   and only after both confirm absence is the metadata row physically
//!   removed. A crash mid-delete leaves a tombstone the reconciler finishes;
//!   it never resurrects.
//!
//! Operations on the same `memory_id` serialize on a keyed lock; independent
//! ids proceed concurrently. Every adapter call runs under a timeout, and a
//! timeout counts as that store being unavailable.

use crate::embedding::EmbeddingProvider;
use crate::keyed_lock::KeyedLocks;
use chrono::Utc;
use memvault_store::traits::{GraphStore, MetadataStore, VectorIndex};
use memvault_types::{
    EdgeSpec, MemoryId, MemoryRecord, MemoryStatus, MemvaultError, MemvaultResult, RelationKind,
    StoreKind, VectorEntry, WriteReceipt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// A create request before the coordinator assigns identity and ordering.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    /// Explicit id, for clients that retry creates idempotently.
    pub memory_id: Option<MemoryId>,
    /// Owning principal.
    pub user_id: String,
    /// Memory content.
    pub text: String,
    /// Outgoing relationships to record in the graph store.
    pub edges: Vec<EdgeSpec>,
}

impl MemoryDraft {
    /// Draft a new memory for a user.
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            memory_id: None,
            user_id: user_id.into(),
            text: text.into(),
            edges: Vec::new(),
        }
    }

    /// Pin the memory id (idempotent client retries).
    pub fn with_id(mut self, memory_id: MemoryId) -> Self {
        self.memory_id = Some(memory_id);
        self
    }

    /// Add a `relates_to` edge.
    pub fn relates_to(mut self, other: MemoryId) -> Self {
        self.edges.push(EdgeSpec {
            to: other,
            relation: RelationKind::RelatesTo,
        });
        self
    }

    /// Add a `supersedes` edge toward the memory this one replaces.
    pub fn supersedes(mut self, older: MemoryId) -> Self {
        self.edges.push(EdgeSpec {
            to: older,
            relation: RelationKind::Supersedes,
        });
        self
    }
}

/// What [`Coordinator::repair`] actually did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Record was already consistent (or already physically gone).
    Unchanged,
    /// Propagation was replayed and the record promoted to `synced`.
    Resynced,
    /// A stalled tombstone's physical removal completed.
    DeleteCompleted,
}

/// One search result, hydrated through the metadata store.
#[derive(Debug, Clone)]
pub struct RecallHit {
    /// The authoritative record.
    pub record: MemoryRecord,
    /// Similarity score from the vector index.
    pub score: f32,
    /// Graph neighbors of this memory (best effort).
    pub related: Vec<MemoryId>,
}

/// Orchestrates writes and deletes across the three storage adapters.
#[derive(Clone)]
pub struct Coordinator {
    metadata: Arc<dyn MetadataStore>,
    vector: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    locks: Arc<KeyedLocks>,
    adapter_timeout: Duration,
}

impl Coordinator {
    /// Wire a coordinator over the three adapters and an embedding provider.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vector: Arc<dyn VectorIndex>,
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            metadata,
            vector,
            graph,
            embedder,
            locks: Arc::new(KeyedLocks::new()),
            adapter_timeout,
        }
    }

    /// The metadata adapter (drift scans need direct reads).
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// The vector adapter.
    pub fn vector(&self) -> &Arc<dyn VectorIndex> {
        &self.vector
    }

    /// The graph adapter.
    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Run an adapter call under the configured timeout; a timeout counts
    /// as the store being unavailable.
    pub(crate) async fn call<T>(
        &self,
        store: StoreKind,
        fut: impl std::future::Future<Output = MemvaultResult<T>>,
    ) -> MemvaultResult<T> {
        match tokio::time::timeout(self.adapter_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(MemvaultError::StoreUnavailable {
                store,
                reason: format!("timed out after {}ms", self.adapter_timeout.as_millis()),
            }),
        }
    }

    /// Create a memory (or idempotently retry a create).
    ///
    /// Returns once the fate of the write is known: `Synced` when all three
    /// stores took it, `Degraded` when metadata is durable but a derived
    /// store lagged. A metadata failure is the only hard error here:
    /// without the source-of-truth row there is nothing to reconcile.
    pub async fn remember(&self, draft: MemoryDraft) -> MemvaultResult<WriteReceipt> {
        let memory_id = draft.memory_id.unwrap_or_default();
        let guard = self.locks.acquire(memory_id).await;

        let now = Utc::now();
        let record = MemoryRecord {
            memory_id,
            user_id: draft.user_id,
            text: draft.text,
            created_at: now,
            updated_at: now,
            status: MemoryStatus::Pending,
            version: 1,
            edges: draft.edges,
        };

        // Durability checkpoint. Conflicts and metadata outages propagate.
        self.call(StoreKind::Metadata, self.metadata.put(&record))
            .await?;

        // put() may have been an idempotent no-op against an existing row;
        // read back what actually stands.
        let stored = self
            .call(StoreKind::Metadata, self.metadata.get(memory_id))
            .await?
            .ok_or_else(|| {
                MemvaultError::Internal(format!("record {memory_id} missing after put"))
            })?;

        if stored.status == MemoryStatus::Synced {
            // Duplicate of an already-indexed write; nothing to propagate.
            return Ok(WriteReceipt {
                memory_id,
                status: MemoryStatus::Synced,
                version: stored.version,
            });
        }

        let status = self.propagate_detached(stored.clone(), guard).await?;
        Ok(WriteReceipt {
            memory_id,
            status,
            version: stored.version,
        })
    }

    /// Replace a memory's text with a new version.
    ///
    /// The version bump happens under the id's lock, so concurrent amends
    /// cannot silently overwrite each other.
    pub async fn amend(
        &self,
        memory_id: MemoryId,
        text: impl Into<String>,
    ) -> MemvaultResult<WriteReceipt> {
        let guard = self.locks.acquire(memory_id).await;

        let existing = self
            .call(StoreKind::Metadata, self.metadata.get(memory_id))
            .await?
            .filter(|r| r.status.is_live())
            .ok_or_else(|| MemvaultError::NotFound(memory_id.to_string()))?;

        let mut record = existing.clone();
        record.text = text.into();
        record.version = existing.version + 1;
        record.status = MemoryStatus::Pending;
        record.updated_at = Utc::now();

        self.call(StoreKind::Metadata, self.metadata.put(&record))
            .await?;

        let version = record.version;
        let status = self.propagate_detached(record, guard).await?;
        Ok(WriteReceipt {
            memory_id,
            status,
            version,
        })
    }

    /// Delete a memory: logical tombstone first, then physical removal.
    ///
    /// Returns Ok once the tombstone is durable. Derived-store cleanup is
    /// best effort; a failure there leaves the tombstone for the reconciler
    /// and is still a successful delete from the caller's view.
    pub async fn forget(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        let _guard = self.locks.acquire(memory_id).await;

        let record = self
            .call(StoreKind::Metadata, self.metadata.get(memory_id))
            .await?
            .ok_or_else(|| MemvaultError::NotFound(memory_id.to_string()))?;

        if record.status != MemoryStatus::Deleted {
            // Irreversible marker; must land before any physical removal.
            self.call(
                StoreKind::Metadata,
                self.metadata.set_status(memory_id, MemoryStatus::Deleted),
            )
            .await?;
            info!(memory_id = %memory_id, "memory tombstoned");
        }

        if let Err(e) = self.finish_delete(memory_id).await {
            warn!(
                memory_id = %memory_id,
                error = %e,
                "delete incomplete; tombstone left for reconciler"
            );
        }
        Ok(())
    }

    /// Fetch the authoritative record. Tombstones read as not found.
    pub async fn fetch(&self, memory_id: MemoryId) -> MemvaultResult<MemoryRecord> {
        self.call(StoreKind::Metadata, self.metadata.get(memory_id))
            .await?
            .filter(|r| r.status.is_live())
            .ok_or_else(|| MemvaultError::NotFound(memory_id.to_string()))
    }

    /// Similarity search over one user's memories.
    ///
    /// Results are hydrated through the metadata store: hits whose row is
    /// gone or tombstoned are dropped. A memory still `pending` may
    /// legitimately be absent; its vector entry may not exist yet.
    pub async fn recall(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> MemvaultResult<Vec<RecallHit>> {
        let query_vec = self
            .call(StoreKind::Embedding, self.embedder.embed(query))
            .await?;
        let hits = self
            .call(
                StoreKind::Vector,
                self.vector.search(&query_vec, user_id, k),
            )
            .await?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(record) = self
                .call(StoreKind::Metadata, self.metadata.get(hit.memory_id))
                .await?
            else {
                debug!(memory_id = %hit.memory_id, "vector hit without metadata row, skipping");
                continue;
            };
            if !record.status.is_live() || record.user_id != user_id {
                continue;
            }
            // Neighbor expansion is best effort; a graph outage must not
            // fail the search.
            let related = match self
                .call(StoreKind::Graph, self.graph.neighbors(hit.memory_id, None))
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(memory_id = %hit.memory_id, error = %e, "neighbor lookup failed");
                    Vec::new()
                }
            };
            out.push(RecallHit {
                record,
                score: hit.score,
                related,
            });
        }
        Ok(out)
    }

    /// Bring one record back in line with metadata truth.
    ///
    /// Called by the reconciler: re-propagates `pending`/`degraded` records
    /// and completes stalled deletes. A record that turns out consistent on
    /// arrival (another actor got there first) reports `Unchanged` so pass
    /// metrics only count work actually done.
    pub async fn repair(&self, memory_id: MemoryId) -> MemvaultResult<RepairOutcome> {
        let _guard = self.locks.acquire(memory_id).await;

        let Some(record) = self
            .call(StoreKind::Metadata, self.metadata.get(memory_id))
            .await?
        else {
            // Physically gone already; nothing to repair.
            return Ok(RepairOutcome::Unchanged);
        };

        match record.status {
            MemoryStatus::Synced => Ok(RepairOutcome::Unchanged),
            MemoryStatus::Pending | MemoryStatus::Degraded => {
                self.propagate(&record).await?;
                self.call(
                    StoreKind::Metadata,
                    self.metadata.set_status(memory_id, MemoryStatus::Synced),
                )
                .await?;
                info!(memory_id = %memory_id, "record repaired to synced");
                Ok(RepairOutcome::Resynced)
            }
            MemoryStatus::Deleted => {
                self.finish_delete(memory_id).await?;
                info!(memory_id = %memory_id, "stalled delete completed");
                Ok(RepairOutcome::DeleteCompleted)
            }
        }
    }

    /// Derived-store deletes, then (and only then) the metadata row.
    async fn finish_delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        self.call(StoreKind::Vector, self.vector.delete(memory_id))
            .await?;
        self.call(StoreKind::Graph, self.graph.delete_node(memory_id))
            .await?;
        // No derived entry can now outlive the metadata row.
        self.call(StoreKind::Metadata, self.metadata.delete(memory_id))
            .await
    }

    /// Write the derived stores for a record: embedding, vector entry,
    /// graph node, declared edges.
    async fn propagate(&self, record: &MemoryRecord) -> MemvaultResult<()> {
        let vector = self
            .call(StoreKind::Embedding, self.embedder.embed(&record.text))
            .await?;
        let entry = VectorEntry {
            memory_id: record.memory_id,
            user_id: record.user_id.clone(),
            vector,
            created_at: record.created_at,
        };
        self.call(StoreKind::Vector, self.vector.upsert(&entry))
            .await?;
        self.call(
            StoreKind::Graph,
            self.graph.upsert_node(record.memory_id, &record.user_id),
        )
        .await?;
        for edge in record.graph_edges() {
            self.call(StoreKind::Graph, self.graph.upsert_edge(&edge))
                .await?;
        }
        Ok(())
    }

    /// Propagate on a detached task that owns the id's lock guard.
    ///
    /// The caller awaits the outcome, but if the caller is cancelled the
    /// task keeps running: a committed metadata write cannot be rolled
    /// back, so its propagation must not be abandoned half-way either.
    async fn propagate_detached(
        &self,
        record: MemoryRecord,
        guard: OwnedMutexGuard<()>,
    ) -> MemvaultResult<MemoryStatus> {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let memory_id = record.memory_id;
            match this.propagate(&record).await {
                Ok(()) => {
                    match this
                        .call(
                            StoreKind::Metadata,
                            this.metadata.set_status(memory_id, MemoryStatus::Synced),
                        )
                        .await
                    {
                        Ok(()) => {
                            debug!(memory_id = %memory_id, "memory synced");
                            MemoryStatus::Synced
                        }
                        Err(e) => {
                            // Derived stores are fine, only the flip failed;
                            // the stale-pending sweep resolves it.
                            warn!(memory_id = %memory_id, error = %e, "status flip to synced failed");
                            MemoryStatus::Degraded
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        memory_id = %memory_id,
                        store = ?e.store_kind(),
                        error = %e,
                        "propagation failed, marking degraded"
                    );
                    if let Err(mark_err) = this
                        .call(
                            StoreKind::Metadata,
                            this.metadata.set_status(memory_id, MemoryStatus::Degraded),
                        )
                        .await
                    {
                        warn!(
                            memory_id = %memory_id,
                            error = %mark_err,
                            "could not mark degraded; pending row left for reconciler"
                        );
                    }
                    MemoryStatus::Degraded
                }
            }
        });
        handle
            .await
            .map_err(|e| MemvaultError::Internal(format!("propagation task panicked: {e}")))
    }
}
