//! Storage adapters for the Memvault coordinator.
//!
//! Three independent backends, each behind a thin async contract:
//! - **Metadata store** (SQLite): the durable source of truth for existence,
//!   ownership, text, and consistency status.
//! - **Vector index** (SQLite or Qdrant over HTTP): similarity-searchable
//!   embeddings, a denormalized cache of metadata truth.
//! - **Graph store** (SQLite): relationship edges between memories.
//!
//! The adapters deliberately share no connection and no transaction scope;
//! cross-store consistency is the kernel's job, not theirs.

pub mod fakes;
pub mod graph;
pub mod metadata;
pub mod migration;
pub mod qdrant;
pub mod traits;
pub mod vector;

pub use graph::SqliteGraphStore;
pub use metadata::SqliteMetadataStore;
pub use qdrant::QdrantVectorIndex;
pub use traits::{GraphStore, MetadataStore, VectorIndex};
pub use vector::SqliteVectorIndex;
