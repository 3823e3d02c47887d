//! Shared error types for the Memvault system.

use thiserror::Error;

/// Which storage backend an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// The relational metadata store (source of truth).
    Metadata,
    /// The vector similarity index.
    Vector,
    /// The relationship graph store.
    Graph,
    /// The embedding provider (treated as a derived-store dependency).
    Embedding,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreKind::Metadata => "metadata",
            StoreKind::Vector => "vector",
            StoreKind::Graph => "graph",
            StoreKind::Embedding => "embedding",
        };
        f.write_str(s)
    }
}

/// Top-level error type for the Memvault system.
#[derive(Error, Debug)]
pub enum MemvaultError {
    /// A write contradicts an existing record with the same `memory_id`.
    #[error("Conflict on memory {0}")]
    Conflict(String),

    /// The requested memory does not exist (or is tombstoned).
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// A storage backend could not be reached or timed out.
    #[error("Store unavailable ({store}): {reason}")]
    StoreUnavailable {
        /// Which backend failed.
        store: StoreKind,
        /// Connection/timeout detail.
        reason: String,
    },

    /// The reconciler exhausted its retry budget for a record.
    ///
    /// Surfaced as an operator-visible error; the record stays `degraded`
    /// and is picked up again on the next pass.
    #[error("Reconciliation exhausted for memory {memory_id} after {attempts} attempts")]
    ReconciliationExhausted {
        /// The record that could not be repaired.
        memory_id: String,
        /// Total attempts made in this pass.
        attempts: u32,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemvaultError {
    /// Whether retrying the failed operation can plausibly succeed.
    ///
    /// Drives both the coordinator's degraded routing and the reconciler's
    /// backoff loop. Conflicts and missing records are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemvaultError::StoreUnavailable { .. } | MemvaultError::Io(_)
        )
    }

    /// The backend this error came from, if it is a store failure.
    pub fn store_kind(&self) -> Option<StoreKind> {
        match self {
            MemvaultError::StoreUnavailable { store, .. } => Some(*store),
            _ => None,
        }
    }
}

/// Alias for Result with MemvaultError.
pub type MemvaultResult<T> = Result<T, MemvaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let unavailable = MemvaultError::StoreUnavailable {
            store: StoreKind::Vector,
            reason: "connection refused".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert_eq!(unavailable.store_kind(), Some(StoreKind::Vector));

        let conflict = MemvaultError::Conflict("abc".to_string());
        assert!(!conflict.is_retryable());
        assert!(conflict.store_kind().is_none());

        let missing = MemvaultError::NotFound("abc".to_string());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_store_kind_display() {
        assert_eq!(StoreKind::Metadata.to_string(), "metadata");
        assert_eq!(StoreKind::Embedding.to_string(), "embedding");
    }
}
