//! SQLite-backed vector index.
//!
//! Embeddings are stored as little-endian f32 BLOBs and ranked in process
//! with cosine similarity. Suits single-node deployments and tests; the
//! Qdrant adapter covers deployments with a real vector database.

use crate::traits::{SearchHit, VectorIndex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memvault_types::{MemoryId, MemvaultError, MemvaultResult, StoreKind, VectorEntry};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Vector index backed by its own SQLite database.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
}

fn store_err(e: impl std::fmt::Display) -> MemvaultError {
    MemvaultError::StoreUnavailable {
        store: StoreKind::Vector,
        reason: e.to_string(),
    }
}

/// Serialize an embedding to bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding from BLOB bytes.
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in [-1.0, 1.0].
///
/// Mismatched lengths and empty vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

impl SqliteVectorIndex {
    /// Open (and migrate) a vector database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MemvaultResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        crate::migration::migrate_vector(&conn).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an ephemeral in-memory index.
    pub fn open_in_memory() -> MemvaultResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        crate::migration::migrate_vector(&conn).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MemvaultResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MemvaultError::Internal(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> MemvaultResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO vectors (memory_id, user_id, embedding, created_at, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(memory_id) DO UPDATE SET
                 user_id = ?2, embedding = ?3, created_at = ?4",
            rusqlite::params![
                entry.memory_id.to_string(),
                entry.user_id,
                embedding_to_bytes(&entry.vector),
                entry.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        debug!(memory_id = %entry.memory_id, dims = entry.vector.len(), "vector upserted");
        Ok(())
    }

    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM vectors WHERE memory_id = ?1",
            [memory_id.to_string()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        k: usize,
    ) -> MemvaultResult<Vec<SearchHit>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT memory_id, embedding, created_at FROM vectors WHERE user_id = ?1")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(store_err)?;

        let mut scored: Vec<(SearchHit, DateTime<Utc>)> = Vec::new();
        for row in rows {
            let (id_str, blob, created_str) = row.map_err(store_err)?;
            let Some(memory_id) = MemoryId::parse(&id_str) else {
                continue;
            };
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let score = cosine_similarity(query, &embedding_from_bytes(&blob));
            scored.push((SearchHit { memory_id, score }, created_at));
        }

        // Highest similarity first; ties go to the most recent memory.
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
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE memory_id = ?1",
                [memory_id.to_string()],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        Ok(count > 0)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, DateTime<Utc>)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT memory_id, inserted_at FROM vectors WHERE user_id = ?1")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(store_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id_str, inserted_str) = row.map_err(store_err)?;
            let Some(id) = MemoryId::parse(&id_str) else {
                continue;
            };
            let inserted_at = chrono::DateTime::parse_from_rfc3339(&inserted_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            out.push((id, inserted_at));
        }
        Ok(out)
    }
}
