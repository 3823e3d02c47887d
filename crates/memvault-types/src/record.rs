//! Memory records, derived-store artifacts, and the consistency status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a memory. The join key across all three stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random MemoryId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-store consistency state of a memory.
///
/// `Pending` and `Degraded` permit missing or stale derived-store entries;
/// `Synced` promises exactly one vector entry and a consistent edge set.
/// `Deleted` is the irreversible tombstone set before physical removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Metadata written, derived-store propagation in flight.
    Pending,
    /// All three stores agree.
    Synced,
    /// Derived stores are known incomplete; awaiting reconciliation.
    Degraded,
    /// Logically deleted; physical removal may still be outstanding.
    Deleted,
}

impl MemoryStatus {
    /// Stable string form used in SQL columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Pending => "pending",
            MemoryStatus::Synced => "synced",
            MemoryStatus::Degraded => "degraded",
            MemoryStatus::Deleted => "deleted",
        }
    }

    /// Parse the SQL string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MemoryStatus::Pending),
            "synced" => Some(MemoryStatus::Synced),
            "degraded" => Some(MemoryStatus::Degraded),
            "deleted" => Some(MemoryStatus::Deleted),
            _ => None,
        }
    }

    /// Whether the memory should be visible to readers.
    pub fn is_live(&self) -> bool {
        !matches!(self, MemoryStatus::Deleted)
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of truth: one memory as recorded in the metadata store.
///
/// `memory_id`, `user_id`, and `created_at` are immutable after creation.
/// `text` changes only through a version bump, never in place.
///
/// Intended graph edges are part of the record so the derived stores can be
/// rebuilt from metadata truth alone: a reconciler repairing a failed
/// propagation must not depend on state that only lived in the original
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique ID, assigned at creation.
    pub memory_id: MemoryId,
    /// Owning principal.
    pub user_id: String,
    /// The memory's content.
    pub text: String,
    /// When this memory was created.
    pub created_at: DateTime<Utc>,
    /// When content last changed. Staleness checks key on this, never on
    /// `created_at`: an amended old record is a fresh write.
    pub updated_at: DateTime<Utc>,
    /// Cross-store consistency state.
    pub status: MemoryStatus,
    /// Monotonic version, bumped on every content change.
    pub version: u64,
    /// Outgoing relationships this memory should hold in the graph store.
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

/// An outgoing edge as recorded in metadata: the `from` side is implied by
/// the owning record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Target memory.
    pub to: MemoryId,
    /// Relationship kind.
    pub relation: RelationKind,
}

impl MemoryRecord {
    /// Build a fresh record in `Pending` state at version 1.
    pub fn new(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            memory_id: MemoryId::new(),
            user_id: user_id.into(),
            text: text.into(),
            created_at: now,
            updated_at: now,
            status: MemoryStatus::Pending,
            version: 1,
            edges: Vec::new(),
        }
    }

    /// Whether `other` carries the same content under the same identity.
    ///
    /// Status and the timestamps are deliberately excluded: a duplicate
    /// create racing a reconciler pass must still count as identical.
    pub fn same_content(&self, other: &MemoryRecord) -> bool {
        self.memory_id == other.memory_id
            && self.user_id == other.user_id
            && self.text == other.text
            && self.version == other.version
            && self.edges == other.edges
    }

    /// The full graph edges this record implies.
    pub fn graph_edges(&self) -> Vec<GraphEdge> {
        self.edges
            .iter()
            .map(|spec| GraphEdge {
                from: self.memory_id,
                to: spec.to,
                relation: spec.relation.clone(),
            })
            .collect()
    }
}

/// Derived artifact held by the vector index, keyed by `memory_id`.
///
/// Originated only by the coordinator; the vector adapter never creates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Join key back to the metadata store.
    pub memory_id: MemoryId,
    /// Copy of the owner, for filtered search.
    pub user_id: String,
    /// The embedding of the record's text.
    pub vector: Vec<f32>,
    /// Copy of the record's creation time, for tie-breaking search results.
    pub created_at: DateTime<Utc>,
}

/// Relationship kinds between memories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Generic association between two memories.
    RelatesTo,
    /// A newer version of a memory supersedes an older one.
    Supersedes,
    /// A memory mentions a referenced entity/memory.
    Mentions,
    /// A custom relation.
    Custom(String),
}

impl RelationKind {
    /// Stable string form used as the edge key component in SQL.
    pub fn as_str(&self) -> &str {
        match self {
            RelationKind::RelatesTo => "relates_to",
            RelationKind::Supersedes => "supersedes",
            RelationKind::Mentions => "mentions",
            RelationKind::Custom(s) => s.as_str(),
        }
    }

    /// Parse the SQL string form.
    pub fn parse(s: &str) -> Self {
        match s {
            "relates_to" => RelationKind::RelatesTo,
            "supersedes" => RelationKind::Supersedes,
            "mentions" => RelationKind::Mentions,
            other => RelationKind::Custom(other.to_string()),
        }
    }
}

/// A directed edge in the graph store, idempotent under its full triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source memory.
    pub from: MemoryId,
    /// Target memory (may transiently not exist in metadata during
    /// concurrent writes; the reconciler repairs, never rejects).
    pub to: MemoryId,
    /// Relationship kind.
    pub relation: RelationKind,
}

/// What a create/update returns to the caller.
///
/// Metadata durability is definitive either way; `Degraded` means "accepted
/// but not yet fully indexed", never a hard failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteReceipt {
    /// The memory this receipt covers.
    pub memory_id: MemoryId,
    /// Post-write status: `Synced` or `Degraded`.
    pub status: MemoryStatus,
    /// Version the write landed at.
    pub version: u64,
}

impl WriteReceipt {
    /// Whether all derived stores caught up within the request.
    pub fn fully_indexed(&self) -> bool {
        self.status == MemoryStatus::Synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            MemoryStatus::Pending,
            MemoryStatus::Synced,
            MemoryStatus::Degraded,
            MemoryStatus::Deleted,
        ] {
            assert_eq!(MemoryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MemoryStatus::parse("unknown"), None);
    }

    #[test]
    fn test_status_liveness() {
        assert!(MemoryStatus::Pending.is_live());
        assert!(MemoryStatus::Degraded.is_live());
        assert!(!MemoryStatus::Deleted.is_live());
    }

    #[test]
    fn test_new_record_defaults() {
        let record = MemoryRecord::new("alice", "prefers window seats");
        assert_eq!(record.status, MemoryStatus::Pending);
        assert_eq!(record.version, 1);
        assert_eq!(record.user_id, "alice");
    }

    #[test]
    fn test_same_content_ignores_status() {
        let a = MemoryRecord::new("alice", "text");
        let mut b = a.clone();
        b.status = MemoryStatus::Degraded;
        assert!(a.same_content(&b));

        b.text = "other text".to_string();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_relation_kind_roundtrip() {
        assert_eq!(RelationKind::parse("supersedes"), RelationKind::Supersedes);
        assert_eq!(
            RelationKind::parse("cites"),
            RelationKind::Custom("cites".to_string())
        );
        assert_eq!(RelationKind::Custom("cites".to_string()).as_str(), "cites");
    }

    #[test]
    fn test_record_serialization() {
        let record = MemoryRecord::new("bob", "test memory");
        let json = serde_json::to_string(&record).unwrap();
        let back: MemoryRecord = serde_json::from_str(&json).unwrap();
        assert!(record.same_content(&back));
        assert_eq!(back.status, MemoryStatus::Pending);
    }
}
