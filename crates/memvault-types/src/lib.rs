//! Core types for the Memvault memory coordinator.
//!
//! This crate defines the data structures shared across the storage adapters,
//! the consistency kernel, and the CLI. It contains no business logic and no
//! I/O.

pub mod config;
pub mod error;
pub mod record;

pub use error::{MemvaultError, MemvaultResult, StoreKind};
pub use record::{
    EdgeSpec, GraphEdge, MemoryId, MemoryRecord, MemoryStatus, RelationKind, VectorEntry,
    WriteReceipt,
};
