//! End-to-end consistency flows over fault-injecting in-memory stores.
//!
//! These cover the protocol guarantees as observable behavior: metadata
//! durability, write idempotency, degraded writes converging after outages,
//! delete tombstones never resurrecting, and per-id serialization under
//! concurrency.

use chrono::{DateTime, Utc};
use memvault_kernel::reconciler::Reconciler;
use memvault_kernel::{Coordinator, LocalHashEmbedder, MemoryDraft};
use memvault_store::fakes::{FakeGraphStore, FakeMetadataStore, FakeVectorIndex};
use memvault_store::traits::SearchHit;
use memvault_store::{GraphStore, MetadataStore, VectorIndex};
use memvault_types::config::ReconcilerConfig;
use memvault_types::{MemoryId, MemoryStatus, MemvaultError, MemvaultResult, VectorEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Vaultlet {
    coordinator: Coordinator,
    metadata: Arc<FakeMetadataStore>,
    vector: Arc<FakeVectorIndex>,
    graph: Arc<FakeGraphStore>,
}

fn vaultlet() -> Vaultlet {
    let metadata = Arc::new(FakeMetadataStore::new());
    let vector = Arc::new(FakeVectorIndex::new());
    let graph = Arc::new(FakeGraphStore::new());
    let coordinator = Coordinator::new(
        metadata.clone(),
        vector.clone(),
        graph.clone(),
        Arc::new(LocalHashEmbedder::new(64)),
        Duration::from_secs(5),
    );
    Vaultlet {
        coordinator,
        metadata,
        vector,
        graph,
    }
}

/// Vector index that stalls every call, for exercising adapter timeouts.
struct SlowVectorIndex {
    inner: Arc<FakeVectorIndex>,
    delay: Duration,
}

#[async_trait::async_trait]
impl VectorIndex for SlowVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> MemvaultResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(entry).await
    }

    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(memory_id).await
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        k: usize,
    ) -> MemvaultResult<Vec<SearchHit>> {
        tokio::time::sleep(self.delay).await;
        self.inner.search(query, user_id, k).await
    }

    async fn contains(&self, memory_id: MemoryId) -> MemvaultResult<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.contains(memory_id).await
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, DateTime<Utc>)>> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_for_user(user_id).await
    }
}

fn reconciler(v: &Vaultlet) -> Reconciler {
    let config = ReconcilerConfig {
        interval_secs: 1,
        drift_scan_every: 1,
        max_attempts: 3,
        min_delay_ms: 1,
        max_delay_ms: 5,
        orphan_grace_secs: 0,
        ..ReconcilerConfig::default()
    };
    let (_tx, rx) = watch::channel(false);
    Reconciler::new(v.coordinator.clone(), config, rx)
}

#[tokio::test]
async fn create_is_durable_before_any_derived_write() {
    let v = vaultlet();
    // Both derived stores down; only metadata takes the write.
    v.vector.faults.make_unavailable();
    v.graph.faults.make_unavailable();

    let receipt = v
        .coordinator
        .remember(MemoryDraft::new("alice", "must survive"))
        .await
        .unwrap();

    assert_eq!(receipt.status, MemoryStatus::Degraded);
    let record = v.metadata.get(receipt.memory_id).await.unwrap().unwrap();
    assert_eq!(record.text, "must survive");
    assert!(v.coordinator.fetch(receipt.memory_id).await.is_ok());
}

#[tokio::test]
async fn degraded_write_converges_once_store_returns() {
    let v = vaultlet();
    v.vector.faults.make_unavailable();
    let receipt = v
        .coordinator
        .remember(MemoryDraft::new("alice", "likes green tea"))
        .await
        .unwrap();
    assert_eq!(receipt.status, MemoryStatus::Degraded);

    // Outage heals; one reconciliation pass restores full indexing.
    v.vector.faults.restore();
    let report = reconciler(&v).run_pass().await;
    assert_eq!(report.repaired, 1);

    let hits = v
        .coordinator
        .recall("alice", "likes green tea", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.status, MemoryStatus::Synced);
}

#[tokio::test]
async fn transient_failures_only_cost_retries() {
    let v = vaultlet();
    v.vector.faults.fail_next(1);

    // First attempt degrades; the fault has burned off by reconcile time.
    let receipt = v
        .coordinator
        .remember(MemoryDraft::new("alice", "flaky network"))
        .await
        .unwrap();
    assert_eq!(receipt.status, MemoryStatus::Degraded);

    let report = reconciler(&v).run_pass().await;
    assert_eq!(report.repaired, 1);
    assert!(v.vector.contains(receipt.memory_id).await.unwrap());
}

#[tokio::test]
async fn duplicate_create_with_pinned_id_converges_to_one_memory() {
    let v = vaultlet();
    let id = MemoryId::new();
    let draft = MemoryDraft::new("alice", "retried request").with_id(id);

    let first = v.coordinator.remember(draft.clone()).await.unwrap();
    let second = v.coordinator.remember(draft).await.unwrap();

    assert_eq!(first.memory_id, second.memory_id);
    assert_eq!(second.version, 1);
    assert_eq!(v.vector.len(), 1);
    assert_eq!(v.graph.node_count(), 1);
}

#[tokio::test]
async fn interrupted_delete_never_resurrects() {
    let v = vaultlet();
    let receipt = v
        .coordinator
        .remember(MemoryDraft::new("alice", "short-lived secret"))
        .await
        .unwrap();

    // Vector store dies mid-delete: tombstone lands, cleanup stalls.
    v.vector.faults.make_unavailable();
    v.coordinator.forget(receipt.memory_id).await.unwrap();

    // Reads must treat it as gone immediately.
    assert!(matches!(
        v.coordinator.fetch(receipt.memory_id).await,
        Err(MemvaultError::NotFound(_))
    ));

    // Store recovers. Its stale entry must not leak into search results
    // even before reconciliation runs.
    v.vector.faults.restore();
    let hits = v
        .coordinator
        .recall("alice", "short-lived secret", 5)
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Reconciliation completes physical removal.
    let report = reconciler(&v).run_pass().await;
    assert_eq!(report.deletes_completed, 1);
    assert!(v.metadata.get(receipt.memory_id).await.unwrap().is_none());
    assert!(!v.vector.contains(receipt.memory_id).await.unwrap());
    assert!(!v.graph.node_exists(receipt.memory_id).await.unwrap());
}

#[tokio::test]
async fn forget_then_recreate_same_id_conflicts() {
    let v = vaultlet();
    let id = MemoryId::new();
    v.coordinator
        .remember(MemoryDraft::new("alice", "original").with_id(id))
        .await
        .unwrap();

    // Stall the delete so the tombstone stays behind.
    v.graph.faults.make_unavailable();
    v.coordinator.forget(id).await.unwrap();
    v.graph.faults.restore();

    // The id is burned; a new write may not reuse it.
    let err = v
        .coordinator
        .remember(MemoryDraft::new("alice", "impostor").with_id(id))
        .await
        .unwrap_err();
    assert!(matches!(err, MemvaultError::Conflict(_)));
}

#[tokio::test]
async fn concurrent_writes_to_distinct_ids_all_land() {
    let v = vaultlet();
    let mut handles = Vec::new();
    for i in 0..16 {
        let coordinator = v.coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .remember(MemoryDraft::new("alice", format!("memory number {i}")))
                .await
        }));
    }
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert_eq!(receipt.status, MemoryStatus::Synced);
    }
    assert_eq!(v.vector.len(), 16);
    assert_eq!(v.graph.node_count(), 16);
    assert_eq!(
        v.metadata.list_ids_for_user("alice").await.unwrap().len(),
        16
    );
}

#[tokio::test]
async fn concurrent_amends_serialize_version_bumps() {
    let v = vaultlet();
    let receipt = v
        .coordinator
        .remember(MemoryDraft::new("alice", "v1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let coordinator = v.coordinator.clone();
        let id = receipt.memory_id;
        handles.push(tokio::spawn(async move {
            coordinator.amend(id, format!("rewrite {i}")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Eight amends on top of version 1, no lost updates.
    let record = v.coordinator.fetch(receipt.memory_id).await.unwrap();
    assert_eq!(record.version, 9);
    assert_eq!(record.status, MemoryStatus::Synced);
}

#[tokio::test]
async fn edges_rebuilt_from_metadata_after_graph_outage() {
    let v = vaultlet();
    let base = v
        .coordinator
        .remember(MemoryDraft::new("alice", "owns a bicycle"))
        .await
        .unwrap();

    // Edge-carrying write lands while the graph store is down.
    v.graph.faults.make_unavailable();
    let receipt = v
        .coordinator
        .remember(MemoryDraft::new("alice", "the bicycle is red").relates_to(base.memory_id))
        .await
        .unwrap();
    assert_eq!(receipt.status, MemoryStatus::Degraded);

    v.graph.faults.restore();
    reconciler(&v).run_pass().await;

    // The relationship came back from metadata truth alone.
    let neighbors = v.graph.neighbors(receipt.memory_id, None).await.unwrap();
    assert!(neighbors.contains(&base.memory_id));
}

#[tokio::test]
async fn hung_store_times_out_into_degraded() {
    let metadata = Arc::new(FakeMetadataStore::new());
    let vector = Arc::new(FakeVectorIndex::new());
    let graph = Arc::new(FakeGraphStore::new());
    let coordinator = Coordinator::new(
        metadata.clone(),
        Arc::new(SlowVectorIndex {
            inner: vector.clone(),
            delay: Duration::from_millis(500),
        }),
        graph,
        Arc::new(LocalHashEmbedder::new(64)),
        Duration::from_millis(50),
    );

    // The vector store hangs well past the adapter timeout. The write must
    // still be accepted, with the timeout treated like an outage.
    let receipt = coordinator
        .remember(MemoryDraft::new("alice", "stuck in traffic"))
        .await
        .unwrap();
    assert_eq!(receipt.status, MemoryStatus::Degraded);

    let record = metadata.get(receipt.memory_id).await.unwrap().unwrap();
    assert_eq!(record.status, MemoryStatus::Degraded);
    // The timed-out upsert was abandoned before it reached the index.
    assert_eq!(vector.len(), 0);
}

#[tokio::test]
async fn concurrent_create_and_forget_settle_consistently() {
    for _ in 0..10 {
        let v = vaultlet();
        let id = MemoryId::new();

        let create = {
            let coordinator = v.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .remember(MemoryDraft::new("alice", "contested memory").with_id(id))
                    .await
            })
        };
        let forget = {
            let coordinator = v.coordinator.clone();
            tokio::spawn(async move { coordinator.forget(id).await })
        };
        let created = create.await.unwrap();
        let forgotten = forget.await.unwrap();
        assert!(created.is_ok());

        reconciler(&v).run_pass().await;

        match forgotten {
            // The delete observed the record: it wins permanently.
            Ok(()) => {
                assert!(v.metadata.get(id).await.unwrap().is_none());
                assert!(!v.vector.contains(id).await.unwrap());
                assert!(!v.graph.node_exists(id).await.unwrap());
                let hits = v
                    .coordinator
                    .recall("alice", "contested memory", 5)
                    .await
                    .unwrap();
                assert!(hits.is_empty());
            }
            // The delete ran before the create had anything to observe;
            // the created memory stands, fully indexed.
            Err(MemvaultError::NotFound(_)) => {
                let record = v.metadata.get(id).await.unwrap().unwrap();
                assert_eq!(record.status, MemoryStatus::Synced);
                assert!(v.vector.contains(id).await.unwrap());
            }
            Err(other) => panic!("unexpected forget outcome: {other}"),
        }
    }
}

#[tokio::test]
async fn recall_is_scoped_to_the_requesting_user() {
    let v = vaultlet();
    v.coordinator
        .remember(MemoryDraft::new("alice", "keeps a private journal"))
        .await
        .unwrap();
    v.coordinator
        .remember(MemoryDraft::new("bob", "keeps a public blog"))
        .await
        .unwrap();

    let hits = v
        .coordinator
        .recall("alice", "keeps a private journal", 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.user_id, "alice");
}
