//! SQLite-backed metadata store, the source of truth.

use crate::traits::MetadataStore;
use async_trait::async_trait;
use chrono::Utc;
use memvault_types::{MemoryId, MemoryRecord, MemoryStatus, MemvaultError, MemvaultResult, StoreKind};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Metadata store backed by its own SQLite database.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

fn store_err(e: impl std::fmt::Display) -> MemvaultError {
    MemvaultError::StoreUnavailable {
        store: StoreKind::Metadata,
        reason: e.to_string(),
    }
}

impl SqliteMetadataStore {
    /// Open (and migrate) a metadata database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MemvaultResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        crate::migration::migrate_metadata(&conn).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an ephemeral in-memory store.
    pub fn open_in_memory() -> MemvaultResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        crate::migration::migrate_metadata(&conn).map_err(store_err)?;
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

type RawRow = (String, String, String, String, String, String, u64, String);

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode_record(
    (id_str, user_id, text, created_str, updated_str, status_str, version, edges_json): RawRow,
) -> MemvaultResult<MemoryRecord> {
    let memory_id = MemoryId::parse(&id_str)
        .ok_or_else(|| MemvaultError::Serialization(format!("bad memory_id: {id_str}")))?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_str)
        .map_err(|e| MemvaultError::Serialization(e.to_string()))?
        .with_timezone(&Utc);
    let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_str)
        .map_err(|e| MemvaultError::Serialization(e.to_string()))?
        .with_timezone(&Utc);
    let status = MemoryStatus::parse(&status_str)
        .ok_or_else(|| MemvaultError::Serialization(format!("bad status: {status_str}")))?;
    let edges = serde_json::from_str(&edges_json)
        .map_err(|e| MemvaultError::Serialization(e.to_string()))?;
    Ok(MemoryRecord {
        memory_id,
        user_id,
        text,
        created_at,
        updated_at,
        status,
        version,
        edges,
    })
}

fn encode_edges(record: &MemoryRecord) -> MemvaultResult<String> {
    serde_json::to_string(&record.edges).map_err(|e| MemvaultError::Serialization(e.to_string()))
}

const SELECT_COLS: &str =
    "memory_id, user_id, text, created_at, updated_at, status, version, edges";

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put(&self, record: &MemoryRecord) -> MemvaultResult<()> {
        let conn = self.lock()?;

        let existing = conn
            .query_row(
                &format!("SELECT {SELECT_COLS} FROM memories WHERE memory_id = ?1"),
                [record.memory_id.to_string()],
                row_to_record,
            )
            .optional()
            .map_err(store_err)?
            .map(decode_record)
            .transpose()?;

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO memories
                        (memory_id, user_id, text, created_at, updated_at, status, version, edges)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        record.memory_id.to_string(),
                        record.user_id,
                        record.text,
                        record.created_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                        record.status.as_str(),
                        record.version,
                        encode_edges(record)?,
                    ],
                )
                .map_err(store_err)?;
                debug!(memory_id = %record.memory_id, "metadata row inserted");
                Ok(())
            }
            Some(existing) => {
                // Identical payload: idempotent no-op, status untouched.
                if existing.same_content(record) {
                    return Ok(());
                }
                // user_id and created_at are immutable; a tombstone never
                // accepts new content.
                if existing.user_id != record.user_id || existing.status == MemoryStatus::Deleted {
                    return Err(MemvaultError::Conflict(record.memory_id.to_string()));
                }
                // Version bump: the update path.
                let is_next_version = record.version == existing.version + 1;
                // Same-version rewrite is only allowed while the earlier
                // write is still in flight (pending/degraded).
                let in_flight_retry = record.version == existing.version
                    && matches!(
                        existing.status,
                        MemoryStatus::Pending | MemoryStatus::Degraded
                    );
                if !is_next_version && !in_flight_retry {
                    return Err(MemvaultError::Conflict(record.memory_id.to_string()));
                }
                conn.execute(
                    "UPDATE memories
                     SET text = ?2, updated_at = ?3, status = ?4, version = ?5, edges = ?6
                     WHERE memory_id = ?1",
                    rusqlite::params![
                        record.memory_id.to_string(),
                        record.text,
                        record.updated_at.to_rfc3339(),
                        record.status.as_str(),
                        record.version,
                        encode_edges(record)?,
                    ],
                )
                .map_err(store_err)?;
                debug!(
                    memory_id = %record.memory_id,
                    version = record.version,
                    "metadata row updated"
                );
                Ok(())
            }
        }
    }

    async fn get(&self, memory_id: MemoryId) -> MemvaultResult<Option<MemoryRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {SELECT_COLS} FROM memories WHERE memory_id = ?1"),
            [memory_id.to_string()],
            row_to_record,
        )
        .optional()
        .map_err(store_err)?
        .map(decode_record)
        .transpose()
    }

    async fn set_status(&self, memory_id: MemoryId, status: MemoryStatus) -> MemvaultResult<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE memories SET status = ?2 WHERE memory_id = ?1",
                rusqlite::params![memory_id.to_string(), status.as_str()],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(MemvaultError::NotFound(memory_id.to_string()));
        }
        debug!(memory_id = %memory_id, status = %status, "status transition");
        Ok(())
    }

    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM memories WHERE memory_id = ?1",
            [memory_id.to_string()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: MemoryStatus,
        limit: usize,
    ) -> MemvaultResult<Vec<MemoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SELECT_COLS} FROM memories WHERE status = ?1
                 ORDER BY created_at ASC, id ASC LIMIT ?2"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![status.as_str(), limit as i64],
                row_to_record,
            )
            .map_err(store_err)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(decode_record(row.map_err(store_err)?)?);
        }
        Ok(records)
    }

    async fn list_ids_for_user(&self, user_id: &str) -> MemvaultResult<Vec<MemoryId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT memory_id FROM memories WHERE user_id = ?1 AND status != 'deleted'")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        let mut ids = Vec::new();
        for row in rows {
            let s = row.map_err(store_err)?;
            if let Some(id) = MemoryId::parse(&s) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn list_users(&self) -> MemvaultResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM memories")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.map_err(store_err)?);
        }
        Ok(users)
    }
}
