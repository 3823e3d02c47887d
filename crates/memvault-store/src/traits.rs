//! Adapter contracts for the three storage backends.
//!
//! Every method is a suspension point (network or disk I/O); the kernel wraps
//! each call in a timeout and treats a timeout as `StoreUnavailable` for the
//! adapter's store. Mutating methods are idempotent so the reconciler can
//! replay them safely.

use async_trait::async_trait;
use memvault_types::{
    GraphEdge, MemoryId, MemoryRecord, MemoryStatus, MemvaultResult, RelationKind, VectorEntry,
};

/// Contract for the relational metadata store.
///
/// This is the only component permitted to declare that a memory exists.
/// Vector and graph entries are denormalized caches of its truth.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or idempotently re-insert a record.
    ///
    /// `memory_id` uniqueness is enforced here: re-putting an identical
    /// payload is a no-op; a contradictory payload fails with `Conflict`
    /// unless the existing row is still `pending`/`degraded` (an in-flight
    /// writer retrying) or the new record carries the next version.
    async fn put(&self, record: &MemoryRecord) -> MemvaultResult<()>;

    /// Fetch a record by id, tombstones included.
    async fn get(&self, memory_id: MemoryId) -> MemvaultResult<Option<MemoryRecord>>;

    /// Transition a record's consistency status.
    async fn set_status(&self, memory_id: MemoryId, status: MemoryStatus) -> MemvaultResult<()>;

    /// Physically remove a row. Absent id is Ok (replayable).
    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()>;

    /// Records in a given status, oldest first, up to `limit`.
    async fn list_by_status(
        &self,
        status: MemoryStatus,
        limit: usize,
    ) -> MemvaultResult<Vec<MemoryRecord>>;

    /// Live (non-deleted) memory ids for one user. Drift-scan support.
    async fn list_ids_for_user(&self, user_id: &str) -> MemvaultResult<Vec<MemoryId>>;

    /// All user ids with at least one row, tombstones included.
    async fn list_users(&self) -> MemvaultResult<Vec<String>>;
}

/// A single similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matching memory.
    pub memory_id: MemoryId,
    /// Similarity score, higher is closer.
    pub score: f32,
}

/// Contract for the vector similarity index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the entry for `entry.memory_id`.
    ///
    /// Repeating the same `(memory_id, vector)` pair produces no duplicate
    /// and no error.
    async fn upsert(&self, entry: &VectorEntry) -> MemvaultResult<()>;

    /// Remove the entry for an id. Absent id is Ok.
    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()>;

    /// Top-`k` entries for one user, highest similarity first, ties broken
    /// by most recent `created_at`.
    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        k: usize,
    ) -> MemvaultResult<Vec<SearchHit>>;

    /// Whether an entry exists for the id.
    async fn contains(&self, memory_id: MemoryId) -> MemvaultResult<bool>;

    /// All entry ids for one user, with entry creation times. Drift-scan
    /// support: lets the reconciler find orphans and judge their age.
    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, chrono::DateTime<chrono::Utc>)>>;
}

/// Contract for the relationship graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ensure a node exists for the memory. Idempotent.
    async fn upsert_node(&self, memory_id: MemoryId, user_id: &str) -> MemvaultResult<()>;

    /// Ensure an edge exists. Idempotent under `(from, to, relation)`.
    async fn upsert_edge(&self, edge: &GraphEdge) -> MemvaultResult<()>;

    /// Remove a node and cascade to its edges. Absent node is Ok.
    async fn delete_node(&self, memory_id: MemoryId) -> MemvaultResult<()>;

    /// Neighbor ids of a node, optionally filtered by relation kind.
    async fn neighbors(
        &self,
        memory_id: MemoryId,
        relation: Option<&RelationKind>,
    ) -> MemvaultResult<Vec<MemoryId>>;

    /// Whether a node exists.
    async fn node_exists(&self, memory_id: MemoryId) -> MemvaultResult<bool>;

    /// All node ids for one user, with node creation times. Drift-scan
    /// support.
    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, chrono::DateTime<chrono::Utc>)>>;
}
