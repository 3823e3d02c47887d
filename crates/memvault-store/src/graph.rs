//! SQLite-backed graph store: one node per memory, directed typed edges.

use crate::traits::GraphStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memvault_types::{GraphEdge, MemoryId, MemvaultError, MemvaultResult, RelationKind, StoreKind};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Graph store backed by its own SQLite database.
#[derive(Clone)]
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

fn store_err(e: impl std::fmt::Display) -> MemvaultError {
    MemvaultError::StoreUnavailable {
        store: StoreKind::Graph,
        reason: e.to_string(),
    }
}

impl SqliteGraphStore {
    /// Open (and migrate) a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MemvaultResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        crate::migration::migrate_graph(&conn).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an ephemeral in-memory store.
    pub fn open_in_memory() -> MemvaultResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        crate::migration::migrate_graph(&conn).map_err(store_err)?;
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
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, memory_id: MemoryId, user_id: &str) -> MemvaultResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO nodes (memory_id, user_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(memory_id) DO UPDATE SET user_id = ?2",
            rusqlite::params![memory_id.to_string(), user_id, Utc::now().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &GraphEdge) -> MemvaultResult<()> {
        let conn = self.lock()?;
        // Idempotent under the full (from, to, relation) key.
        conn.execute(
            "INSERT OR IGNORE INTO edges (from_id, to_id, relation, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                edge.from.to_string(),
                edge.to.to_string(),
                edge.relation.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        debug!(from = %edge.from, to = %edge.to, relation = edge.relation.as_str(), "edge upserted");
        Ok(())
    }

    async fn delete_node(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        let conn = self.lock()?;
        let id = memory_id.to_string();
        // Cascade: edges in either direction go with the node.
        conn.execute(
            "DELETE FROM edges WHERE from_id = ?1 OR to_id = ?1",
            [&id],
        )
        .map_err(store_err)?;
        conn.execute("DELETE FROM nodes WHERE memory_id = ?1", [&id])
            .map_err(store_err)?;
        Ok(())
    }

    async fn neighbors(
        &self,
        memory_id: MemoryId,
        relation: Option<&RelationKind>,
    ) -> MemvaultResult<Vec<MemoryId>> {
        let conn = self.lock()?;
        let id = memory_id.to_string();
        let mut out = Vec::new();

        let collect = |stmt: &mut rusqlite::Statement<'_>,
                       params: &[&dyn rusqlite::ToSql]|
         -> MemvaultResult<Vec<String>> {
            let rows = stmt
                .query_map(params, |row| row.get::<_, String>(0))
                .map_err(store_err)?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(store_err)?);
            }
            Ok(ids)
        };

        let raw = match relation {
            Some(kind) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT to_id FROM edges WHERE from_id = ?1 AND relation = ?2
                         UNION
                         SELECT from_id FROM edges WHERE to_id = ?1 AND relation = ?2",
                    )
                    .map_err(store_err)?;
                collect(&mut stmt, &[&id, &kind.as_str()])?
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT to_id FROM edges WHERE from_id = ?1
                         UNION
                         SELECT from_id FROM edges WHERE to_id = ?1",
                    )
                    .map_err(store_err)?;
                collect(&mut stmt, &[&id])?
            }
        };

        for id_str in raw {
            if let Some(parsed) = MemoryId::parse(&id_str) {
                out.push(parsed);
            }
        }
        Ok(out)
    }

    async fn node_exists(&self, memory_id: MemoryId) -> MemvaultResult<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM nodes WHERE memory_id = ?1",
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
            .prepare("SELECT memory_id, created_at FROM nodes WHERE user_id = ?1")
            .map_err(store_err)?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(store_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (id_str, created_str) = row.map_err(store_err)?;
            let Some(id) = MemoryId::parse(&id_str) else {
                continue;
            };
            let created_at = chrono::DateTime::parse_from_rfc3339(&created_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            out.push((id, created_at));
        }
        Ok(out)
    }
}
