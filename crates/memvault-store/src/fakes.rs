//! In-memory fakes for the adapter traits (testing only).
//!
//! Each fake satisfies its contract without external dependencies and adds
//! programmable fault injection: an availability toggle and a fail-next
//! counter, plus call counters for asserting on retry behavior.

use crate::traits::{GraphStore, MetadataStore, SearchHit, VectorIndex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memvault_types::{
    GraphEdge, MemoryId, MemoryRecord, MemoryStatus, MemvaultError, MemvaultResult, RelationKind,
    StoreKind, VectorEntry,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Shared fault-injection switchboard.
#[derive(Debug, Default)]
pub struct Faults {
    unavailable: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicU64,
}

impl Faults {
    /// Make every call fail until `restore` is called.
    pub fn make_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// Clear the unavailability toggle.
    pub fn restore(&self) {
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Total calls observed (failures included).
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn gate(&self, store: StoreKind) -> MemvaultResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MemvaultError::StoreUnavailable {
                store,
                reason: "injected outage".to_string(),
            });
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_next
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(MemvaultError::StoreUnavailable {
                store,
                reason: "injected transient failure".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeMetadataStore
// ---------------------------------------------------------------------------

/// In-memory metadata store with the same put semantics as the SQLite one.
#[derive(Debug, Default)]
pub struct FakeMetadataStore {
    rows: Mutex<HashMap<MemoryId, MemoryRecord>>,
    /// Fault injection.
    pub faults: Faults,
}

impl FakeMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn put(&self, record: &MemoryRecord) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Metadata)?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&record.memory_id) {
            None => {
                rows.insert(record.memory_id, record.clone());
                Ok(())
            }
            Some(existing) => {
                if existing.same_content(record) {
                    return Ok(());
                }
                if existing.user_id != record.user_id || existing.status == MemoryStatus::Deleted {
                    return Err(MemvaultError::Conflict(record.memory_id.to_string()));
                }
                let is_next_version = record.version == existing.version + 1;
                let in_flight_retry = record.version == existing.version
                    && matches!(
                        existing.status,
                        MemoryStatus::Pending | MemoryStatus::Degraded
                    );
                if !is_next_version && !in_flight_retry {
                    return Err(MemvaultError::Conflict(record.memory_id.to_string()));
                }
                let mut updated = record.clone();
                updated.created_at = existing.created_at;
                rows.insert(record.memory_id, updated);
                Ok(())
            }
        }
    }

    async fn get(&self, memory_id: MemoryId) -> MemvaultResult<Option<MemoryRecord>> {
        self.faults.gate(StoreKind::Metadata)?;
        Ok(self.rows.lock().unwrap().get(&memory_id).cloned())
    }

    async fn set_status(&self, memory_id: MemoryId, status: MemoryStatus) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Metadata)?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&memory_id) {
            Some(row) => {
                row.status = status;
                Ok(())
            }
            None => Err(MemvaultError::NotFound(memory_id.to_string())),
        }
    }

    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Metadata)?;
        self.rows.lock().unwrap().remove(&memory_id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: MemoryStatus,
        limit: usize,
    ) -> MemvaultResult<Vec<MemoryRecord>> {
        self.faults.gate(StoreKind::Metadata)?;
        let rows = self.rows.lock().unwrap();
        let mut matching: Vec<MemoryRecord> = rows
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_ids_for_user(&self, user_id: &str) -> MemvaultResult<Vec<MemoryId>> {
        self.faults.gate(StoreKind::Metadata)?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|r| r.user_id == user_id && r.status != MemoryStatus::Deleted)
            .map(|r| r.memory_id)
            .collect())
    }

    async fn list_users(&self) -> MemvaultResult<Vec<String>> {
        self.faults.gate(StoreKind::Metadata)?;
        let rows = self.rows.lock().unwrap();
        let users: HashSet<String> = rows.values().map(|r| r.user_id.clone()).collect();
        Ok(users.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// FakeVectorIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FakeVectorRow {
    entry: VectorEntry,
    inserted_at: DateTime<Utc>,
}

/// In-memory vector index with brute-force cosine search.
#[derive(Debug, Default)]
pub struct FakeVectorIndex {
    rows: Mutex<HashMap<MemoryId, FakeVectorRow>>,
    /// Fault injection.
    pub faults: Faults,
}

impl FakeVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry directly, bypassing the contract (drift simulation).
    pub fn inject_orphan(&self, entry: VectorEntry, inserted_at: DateTime<Utc>) {
        self.rows
            .lock()
            .unwrap()
            .insert(entry.memory_id, FakeVectorRow { entry, inserted_at });
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Vector)?;
        self.rows.lock().unwrap().insert(
            entry.memory_id,
            FakeVectorRow {
                entry: entry.clone(),
                inserted_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Vector)?;
        self.rows.lock().unwrap().remove(&memory_id);
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        k: usize,
    ) -> MemvaultResult<Vec<SearchHit>> {
        self.faults.gate(StoreKind::Vector)?;
        let rows = self.rows.lock().unwrap();
        let mut scored: Vec<(SearchHit, DateTime<Utc>)> = rows
            .values()
            .filter(|row| row.entry.user_id == user_id)
            .map(|row| {
                (
                    SearchHit {
                        memory_id: row.entry.memory_id,
                        score: crate::vector::cosine_similarity(query, &row.entry.vector),
                    },
                    row.entry.created_at,
                )
            })
            .collect();
        scored.sort_by(|(a, a_created), (b, b_created)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_created.cmp(a_created))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(hit, _)| hit).collect())
    }

    async fn contains(&self, memory_id: MemoryId) -> MemvaultResult<bool> {
        self.faults.gate(StoreKind::Vector)?;
        Ok(self.rows.lock().unwrap().contains_key(&memory_id))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, DateTime<Utc>)>> {
        self.faults.gate(StoreKind::Vector)?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|row| row.entry.user_id == user_id)
            .map(|row| (row.entry.memory_id, row.inserted_at))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FakeGraphStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FakeGraphInner {
    nodes: HashMap<MemoryId, (String, DateTime<Utc>)>,
    edges: HashSet<(MemoryId, MemoryId, String)>,
}

/// In-memory graph store.
#[derive(Debug, Default)]
pub struct FakeGraphStore {
    inner: Mutex<FakeGraphInner>,
    /// Fault injection.
    pub faults: Faults,
}

impl FakeGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }

    /// Insert a node directly, bypassing the contract (drift simulation).
    pub fn inject_orphan_node(&self, memory_id: MemoryId, user_id: &str, created_at: DateTime<Utc>) {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert(memory_id, (user_id.to_string(), created_at));
    }
}

#[async_trait]
impl GraphStore for FakeGraphStore {
    async fn upsert_node(&self, memory_id: MemoryId, user_id: &str) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Graph)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .nodes
            .entry(memory_id)
            .or_insert_with(|| (user_id.to_string(), Utc::now()));
        Ok(())
    }

    async fn upsert_edge(&self, edge: &GraphEdge) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Graph)?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .edges
            .insert((edge.from, edge.to, edge.relation.as_str().to_string()));
        Ok(())
    }

    async fn delete_node(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        self.faults.gate(StoreKind::Graph)?;
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.remove(&memory_id);
        inner
            .edges
            .retain(|(from, to, _)| *from != memory_id && *to != memory_id);
        Ok(())
    }

    async fn neighbors(
        &self,
        memory_id: MemoryId,
        relation: Option<&RelationKind>,
    ) -> MemvaultResult<Vec<MemoryId>> {
        self.faults.gate(StoreKind::Graph)?;
        let inner = self.inner.lock().unwrap();
        let wanted = relation.map(|r| r.as_str().to_string());
        let mut out = HashSet::new();
        for (from, to, rel) in &inner.edges {
            if let Some(ref w) = wanted {
                if rel != w {
                    continue;
                }
            }
            if *from == memory_id {
                out.insert(*to);
            } else if *to == memory_id {
                out.insert(*from);
            }
        }
        Ok(out.into_iter().collect())
    }

    async fn node_exists(&self, memory_id: MemoryId) -> MemvaultResult<bool> {
        self.faults.gate(StoreKind::Graph)?;
        Ok(self.inner.lock().unwrap().nodes.contains_key(&memory_id))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, DateTime<Utc>)>> {
        self.faults.gate(StoreKind::Graph)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .nodes
            .iter()
            .filter(|(_, (owner, _))| owner == user_id)
            .map(|(id, (_, created))| (*id, *created))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_next_recovers() {
        let index = FakeVectorIndex::new();
        index.faults.fail_next(2);

        let entry = VectorEntry {
            memory_id: MemoryId::new(),
            user_id: "alice".to_string(),
            vector: vec![1.0],
            created_at: Utc::now(),
        };
        assert!(index.upsert(&entry).await.is_err());
        assert!(index.upsert(&entry).await.is_err());
        assert!(index.upsert(&entry).await.is_ok());
        assert_eq!(index.faults.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_until_restored() {
        let graph = FakeGraphStore::new();
        let id = MemoryId::new();
        graph.faults.make_unavailable();
        assert!(graph.upsert_node(id, "alice").await.is_err());
        graph.faults.restore();
        assert!(graph.upsert_node(id, "alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_fake_metadata_conflict_semantics() {
        let store = FakeMetadataStore::new();
        let record = MemoryRecord::new("alice", "text");
        store.put(&record).await.unwrap();
        store
            .set_status(record.memory_id, MemoryStatus::Synced)
            .await
            .unwrap();

        let mut contradictory = record.clone();
        contradictory.text = "other".to_string();
        assert!(matches!(
            store.put(&contradictory).await,
            Err(MemvaultError::Conflict(_))
        ));

        // Identical put stays a no-op.
        store.put(&record).await.unwrap();
        let fetched = store.get(record.memory_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, MemoryStatus::Synced);
    }
}
