//! Background reconciliation loop.
//!
//! Sweeps the metadata store for records whose derived stores are known or
//! suspected stale: `degraded` records get their propagation replayed,
//! `deleted` tombstones get their physical removal completed, and `pending`
//! records old enough that their original writer is clearly gone are treated
//! like degraded ones. Every Nth pass additionally runs a drift scan that
//! compares derived-store contents against metadata truth and removes
//! orphaned entries.
//!
//! One pass runs at a time (a slow pass never stacks behind the timer) and
//! per-record repairs run under a semaphore so a wedged store cannot absorb
//! the whole pass. Each repair retries with bounded exponential backoff;
//! exhaustion is logged and the record stays where it is until the next pass.

use crate::coordinator::{Coordinator, RepairOutcome};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use chrono::{Duration as ChronoDuration, Utc};
use memvault_store::traits::{GraphStore, MetadataStore, VectorIndex};
use memvault_types::config::ReconcilerConfig;
use memvault_types::{MemoryId, MemoryStatus, MemvaultError, StoreKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one reconciliation pass accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Records promoted back to `synced`.
    pub repaired: usize,
    /// Tombstones whose physical removal completed.
    pub deletes_completed: usize,
    /// Records whose retry budget ran out this pass.
    pub exhausted: usize,
    /// Derived-store orphans removed by the drift scan.
    pub orphans_removed: usize,
    /// Orphans younger than the grace period, left for a later pass.
    pub orphans_deferred: usize,
    /// `synced` records found missing derived entries, demoted to `degraded`.
    pub demoted: usize,
}

impl PassReport {
    fn merge(&mut self, other: PassReport) {
        self.repaired += other.repaired;
        self.deletes_completed += other.deletes_completed;
        self.exhausted += other.exhausted;
        self.orphans_removed += other.orphans_removed;
        self.orphans_deferred += other.orphans_deferred;
        self.demoted += other.demoted;
    }

    fn is_quiet(&self) -> bool {
        *self == PassReport::default()
    }
}

/// Periodic repair worker over a [`Coordinator`].
pub struct Reconciler {
    coordinator: Coordinator,
    config: ReconcilerConfig,
    backoff: BackoffPolicy,
    shutdown: watch::Receiver<bool>,
    busy: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
    passes: AtomicU64,
}

impl Reconciler {
    /// Build a reconciler. `shutdown` flips to `true` to stop the loop.
    pub fn new(
        coordinator: Coordinator,
        config: ReconcilerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let backoff = BackoffPolicy {
            max_attempts: config.max_attempts,
            min_delay_ms: config.min_delay_ms,
            max_delay_ms: config.max_delay_ms,
            ..BackoffPolicy::default()
        };
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            coordinator,
            config,
            backoff,
            shutdown,
            busy: Arc::new(AtomicBool::new(false)),
            permits,
            passes: AtomicU64::new(0),
        }
    }

    /// Spawn the periodic loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// The loop body: tick, pass, repeat until shutdown.
    pub async fn run(mut self) {
        let interval = Duration::from_secs(self.config.interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "reconciler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if self.busy.swap(true, Ordering::SeqCst) {
                        debug!("previous reconciliation pass still running, skipping tick");
                        continue;
                    }
                    let report = self.run_pass().await;
                    self.busy.store(false, Ordering::SeqCst);
                    if !report.is_quiet() {
                        info!(
                            repaired = report.repaired,
                            deletes_completed = report.deletes_completed,
                            exhausted = report.exhausted,
                            orphans_removed = report.orphans_removed,
                            demoted = report.demoted,
                            "reconciliation pass finished"
                        );
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run one full pass immediately. Public so operators (and tests) can
    /// force reconciliation without waiting for the timer.
    pub async fn run_pass(&self) -> PassReport {
        let pass_number = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = PassReport::default();

        report.merge(self.sweep_status(MemoryStatus::Degraded).await);
        report.merge(self.sweep_status(MemoryStatus::Deleted).await);
        report.merge(self.sweep_stale_pending().await);

        let every = self.config.drift_scan_every.max(1) as u64;
        if pass_number % every == 0 {
            report.merge(self.drift_scan().await);
        }
        report
    }

    /// Repair every record currently in `status`, up to the batch limit.
    async fn sweep_status(&self, status: MemoryStatus) -> PassReport {
        let records = match self
            .coordinator
            .metadata()
            .list_by_status(status, self.config.batch_limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(status = %status, error = %e, "status sweep could not list records");
                return PassReport::default();
            }
        };
        self.repair_batch(records.iter().map(|r| r.memory_id).collect())
            .await
    }

    /// Pending rows normally resolve within their own request. One whose
    /// last write is older than a pass interval means the writer died
    /// between the metadata write and the status flip; replay it like a
    /// degraded record. Staleness keys on `updated_at`, not `created_at`:
    /// an amend of an old record is a fresh write. Replaying a still-live
    /// write is harmless because repair serializes on the record's lock and
    /// propagation is idempotent.
    async fn sweep_stale_pending(&self) -> PassReport {
        let records = match self
            .coordinator
            .metadata()
            .list_by_status(MemoryStatus::Pending, self.config.batch_limit)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "pending sweep could not list records");
                return PassReport::default();
            }
        };
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.interval_secs.max(1) as i64);
        let stale: Vec<MemoryId> = records
            .into_iter()
            .filter(|r| r.updated_at < cutoff)
            .map(|r| r.memory_id)
            .collect();
        self.repair_batch(stale).await
    }

    /// Repair a batch of ids concurrently under the semaphore budget.
    async fn repair_batch(&self, ids: Vec<MemoryId>) -> PassReport {
        let mut tasks = Vec::with_capacity(ids.len());
        for memory_id in ids {
            let coordinator = self.coordinator.clone();
            let backoff = self.backoff.clone();
            let permits = self.permits.clone();
            tasks.push(tokio::spawn(async move {
                // Closed only if the reconciler is dropped mid-pass.
                let Ok(_permit) = permits.acquire_owned().await else {
                    return None;
                };
                let outcome = retry_with_backoff(&backoff, || {
                    let coordinator = coordinator.clone();
                    async move { coordinator.repair(memory_id).await }
                })
                .await;
                Some((memory_id, outcome))
            }));
        }

        let mut report = PassReport::default();
        for joined in futures::future::join_all(tasks).await {
            let Ok(Some((memory_id, outcome))) = joined else {
                continue;
            };
            match outcome {
                Ok(RepairOutcome::Resynced) => report.repaired += 1,
                Ok(RepairOutcome::DeleteCompleted) => report.deletes_completed += 1,
                Ok(RepairOutcome::Unchanged) => {
                    debug!(memory_id = %memory_id, "record was already consistent");
                }
                Err(failure) => {
                    report.exhausted += 1;
                    let err = MemvaultError::ReconciliationExhausted {
                        memory_id: memory_id.to_string(),
                        attempts: failure.attempts,
                    };
                    error!(
                        memory_id = %memory_id,
                        attempts = failure.attempts,
                        last_error = %failure.last_error,
                        "{err}"
                    );
                }
            }
        }
        report
    }

    /// Compare derived stores against metadata truth, per user.
    ///
    /// Orphans (derived entries whose metadata row no longer exists) are
    /// removed once older than the grace period; younger ones may belong to
    /// an in-flight write, so they only get reported. `synced` records with
    /// a missing derived entry are demoted so the status sweep rebuilds them.
    async fn drift_scan(&self) -> PassReport {
        let mut report = PassReport::default();
        let users = match self.coordinator.metadata().list_users().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "drift scan could not list users");
                return report;
            }
        };

        for user_id in users {
            if let Err(e) = self.drift_scan_user(&user_id, &mut report).await {
                warn!(user_id = %user_id, error = %e, "drift scan failed for user");
            }
        }
        report
    }

    async fn drift_scan_user(
        &self,
        user_id: &str,
        report: &mut PassReport,
    ) -> Result<(), MemvaultError> {
        let live: HashSet<MemoryId> = self
            .coordinator
            .metadata()
            .list_ids_for_user(user_id)
            .await?
            .into_iter()
            .collect();
        let grace = ChronoDuration::seconds(self.config.orphan_grace_secs as i64);
        let cutoff = Utc::now() - grace;

        let vector_entries = self.coordinator.vector().list_for_user(user_id).await?;
        let mut vector_ids = HashSet::with_capacity(vector_entries.len());
        for (memory_id, inserted_at) in vector_entries {
            vector_ids.insert(memory_id);
            if live.contains(&memory_id) {
                continue;
            }
            if inserted_at < cutoff {
                self.coordinator.vector().delete(memory_id).await?;
                info!(memory_id = %memory_id, store = %StoreKind::Vector, "removed orphaned entry");
                report.orphans_removed += 1;
            } else {
                debug!(memory_id = %memory_id, store = %StoreKind::Vector, "orphan within grace period");
                report.orphans_deferred += 1;
            }
        }

        let graph_entries = self.coordinator.graph().list_for_user(user_id).await?;
        let mut graph_ids = HashSet::with_capacity(graph_entries.len());
        for (memory_id, created_at) in graph_entries {
            graph_ids.insert(memory_id);
            if live.contains(&memory_id) {
                continue;
            }
            if created_at < cutoff {
                self.coordinator.graph().delete_node(memory_id).await?;
                info!(memory_id = %memory_id, store = %StoreKind::Graph, "removed orphaned node");
                report.orphans_removed += 1;
            } else {
                debug!(memory_id = %memory_id, store = %StoreKind::Graph, "orphan within grace period");
                report.orphans_deferred += 1;
            }
        }

        // The inverse direction: metadata claims synced, a derived store
        // disagrees. Demote so the status sweep rebuilds from truth.
        for memory_id in &live {
            if vector_ids.contains(memory_id) && graph_ids.contains(memory_id) {
                continue;
            }
            let Some(record) = self.coordinator.metadata().get(*memory_id).await? else {
                continue;
            };
            if record.status == MemoryStatus::Synced {
                self.coordinator
                    .metadata()
                    .set_status(*memory_id, MemoryStatus::Degraded)
                    .await?;
                warn!(memory_id = %memory_id, "synced record missing derived entries, demoted");
                report.demoted += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::MemoryDraft;
    use crate::embedding::LocalHashEmbedder;
    use memvault_store::fakes::{FakeGraphStore, FakeMetadataStore, FakeVectorIndex};
    use memvault_types::{MemoryRecord, VectorEntry};

    struct Harness {
        coordinator: Coordinator,
        metadata: Arc<FakeMetadataStore>,
        vector: Arc<FakeVectorIndex>,
        graph: Arc<FakeGraphStore>,
    }

    fn harness() -> Harness {
        let metadata = Arc::new(FakeMetadataStore::new());
        let vector = Arc::new(FakeVectorIndex::new());
        let graph = Arc::new(FakeGraphStore::new());
        let coordinator = Coordinator::new(
            metadata.clone(),
            vector.clone(),
            graph.clone(),
            Arc::new(LocalHashEmbedder::new(32)),
            Duration::from_secs(5),
        );
        Harness {
            coordinator,
            metadata,
            vector,
            graph,
        }
    }

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            interval_secs: 1,
            drift_scan_every: 1,
            batch_limit: 64,
            max_attempts: 3,
            min_delay_ms: 1,
            max_delay_ms: 5,
            orphan_grace_secs: 0,
            concurrency: 4,
        }
    }

    fn reconciler(h: &Harness, config: ReconcilerConfig) -> Reconciler {
        let (_tx, rx) = watch::channel(false);
        Reconciler::new(h.coordinator.clone(), config, rx)
    }

    #[tokio::test]
    async fn test_pass_repairs_degraded_record() {
        let h = harness();
        h.vector.faults.make_unavailable();
        let receipt = h
            .coordinator
            .remember(MemoryDraft::new("alice", "flaky"))
            .await
            .unwrap();
        assert_eq!(receipt.status, MemoryStatus::Degraded);
        h.vector.faults.restore();

        let report = reconciler(&h, fast_config()).run_pass().await;

        assert_eq!(report.repaired, 1);
        assert_eq!(report.exhausted, 0);
        let record = h.metadata.get(receipt.memory_id).await.unwrap().unwrap();
        assert_eq!(record.status, MemoryStatus::Synced);
        assert!(h.vector.contains(receipt.memory_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_pass_completes_stalled_delete() {
        let h = harness();
        let receipt = h
            .coordinator
            .remember(MemoryDraft::new("alice", "doomed"))
            .await
            .unwrap();

        // Delete whose derived cleanup failed: the tombstone remains.
        h.graph.faults.make_unavailable();
        h.coordinator.forget(receipt.memory_id).await.unwrap();
        assert!(h.metadata.get(receipt.memory_id).await.unwrap().is_some());
        h.graph.faults.restore();

        let report = reconciler(&h, fast_config()).run_pass().await;

        assert_eq!(report.deletes_completed, 1);
        assert!(h.metadata.get(receipt.memory_id).await.unwrap().is_none());
        assert!(!h.graph.node_exists(receipt.memory_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_exhaustion_leaves_record_degraded() {
        let h = harness();
        h.vector.faults.make_unavailable();
        let receipt = h
            .coordinator
            .remember(MemoryDraft::new("alice", "stuck"))
            .await
            .unwrap();

        // Store stays down through the whole pass.
        let report = reconciler(&h, fast_config()).run_pass().await;

        assert_eq!(report.exhausted, 1);
        let record = h.metadata.get(receipt.memory_id).await.unwrap().unwrap();
        assert_eq!(record.status, MemoryStatus::Degraded);
    }

    #[tokio::test]
    async fn test_stale_pending_row_is_replayed() {
        let h = harness();
        // A pending row whose writer died an hour ago, before the flip.
        let mut abandoned = MemoryRecord::new("alice", "orphaned write");
        abandoned.created_at = Utc::now() - ChronoDuration::hours(1);
        abandoned.updated_at = abandoned.created_at;
        h.metadata.put(&abandoned).await.unwrap();

        let report = reconciler(&h, fast_config()).run_pass().await;

        assert_eq!(report.repaired, 1);
        let record = h.metadata.get(abandoned.memory_id).await.unwrap().unwrap();
        assert_eq!(record.status, MemoryStatus::Synced);
        assert!(h.vector.contains(abandoned.memory_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_fresh_write_to_old_record_is_not_stale() {
        let h = harness();
        // An amend in flight right now, on a record created long ago.
        let mut in_flight = MemoryRecord::new("alice", "edit in progress");
        in_flight.created_at = Utc::now() - ChronoDuration::hours(1);
        in_flight.updated_at = Utc::now();
        h.metadata.put(&in_flight).await.unwrap();

        let report = reconciler(&h, fast_config()).run_pass().await;

        // The sweep must leave it for its own writer to finish.
        assert_eq!(report.repaired, 0);
        let record = h.metadata.get(in_flight.memory_id).await.unwrap().unwrap();
        assert_eq!(record.status, MemoryStatus::Pending);
    }

    #[tokio::test]
    async fn test_drift_scan_removes_expired_orphan() {
        let h = harness();
        h.coordinator
            .remember(MemoryDraft::new("alice", "anchor"))
            .await
            .unwrap();

        // A vector entry with no metadata row, older than the grace period.
        let orphan = MemoryId::new();
        h.vector.inject_orphan(
            VectorEntry {
                memory_id: orphan,
                user_id: "alice".to_string(),
                vector: vec![0.1; 32],
                created_at: Utc::now() - ChronoDuration::hours(2),
            },
            Utc::now() - ChronoDuration::hours(2),
        );

        let report = reconciler(&h, fast_config()).run_pass().await;

        assert_eq!(report.orphans_removed, 1);
        assert!(!h.vector.contains(orphan).await.unwrap());
    }

    #[tokio::test]
    async fn test_drift_scan_defers_young_orphan() {
        let h = harness();
        h.coordinator
            .remember(MemoryDraft::new("alice", "anchor"))
            .await
            .unwrap();

        let orphan = MemoryId::new();
        h.vector.inject_orphan(
            VectorEntry {
                memory_id: orphan,
                user_id: "alice".to_string(),
                vector: vec![0.1; 32],
                created_at: Utc::now(),
            },
            Utc::now(),
        );

        let mut config = fast_config();
        config.orphan_grace_secs = 3600;
        let report = reconciler(&h, config).run_pass().await;

        assert_eq!(report.orphans_removed, 0);
        assert_eq!(report.orphans_deferred, 1);
        assert!(h.vector.contains(orphan).await.unwrap());
    }

    #[tokio::test]
    async fn test_drift_scan_demotes_synced_with_missing_vector() {
        let h = harness();
        let receipt = h
            .coordinator
            .remember(MemoryDraft::new("alice", "will lose its vector"))
            .await
            .unwrap();
        assert_eq!(receipt.status, MemoryStatus::Synced);

        // Simulate derived-store data loss behind the coordinator's back.
        h.vector.delete(receipt.memory_id).await.unwrap();

        let report = reconciler(&h, fast_config()).run_pass().await;
        assert_eq!(report.demoted, 1);

        // The next pass rebuilds it.
        let report = reconciler(&h, fast_config()).run_pass().await;
        assert_eq!(report.repaired, 1);
        assert!(h.vector.contains(receipt.memory_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_quiet_pass_reports_nothing() {
        let h = harness();
        h.coordinator
            .remember(MemoryDraft::new("alice", "all good"))
            .await
            .unwrap();

        let report = reconciler(&h, fast_config()).run_pass().await;
        assert!(report.is_quiet());
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let h = harness();
        let (tx, rx) = watch::channel(false);
        let handle = Reconciler::new(h.coordinator.clone(), fast_config(), rx).spawn();

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}
