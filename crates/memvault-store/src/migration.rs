//! Schema creation and migration for the SQLite-backed stores.
//!
//! Each store owns its own database file and its own schema version (SQLite
//! `user_version` pragma). The metadata v1 schema matches the minimal table
//! the service originally shipped with; v2 adds the `status` and `version`
//! columns the consistency protocol requires.

use rusqlite::Connection;

/// Current metadata schema version.
const METADATA_SCHEMA_VERSION: u32 = 2;

/// Current vector schema version.
const VECTOR_SCHEMA_VERSION: u32 = 1;

/// Current graph schema version.
const GRAPH_SCHEMA_VERSION: u32 = 1;

/// Get the schema version of a database.
fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version of a database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Check if a column exists (SQLite has no ADD COLUMN IF NOT EXISTS).
fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!("PRAGMA table_info({})", table);
    let Ok(mut stmt) = conn.prepare(&sql) else {
        return false;
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(1)) else {
        return false;
    };
    // Drain before the statement drops; the iterator borrows it.
    let found = rows.filter_map(|r| r.ok()).any(|n| n == column);
    found
}

/// Bring a metadata database up to the current schema.
pub fn migrate_metadata(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current = get_schema_version(conn);

    if current < 1 {
        metadata_v1(conn)?;
    }
    if current < 2 {
        metadata_v2(conn)?;
    }

    set_schema_version(conn, METADATA_SCHEMA_VERSION)
}

/// Version 1: the original minimal memories table.
fn metadata_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id);
        ",
    )
}

/// Version 2: consistency-status, optimistic-versioning, and edge columns.
fn metadata_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    if !column_exists(conn, "memories", "status") {
        conn.execute_batch(
            "ALTER TABLE memories ADD COLUMN status TEXT NOT NULL DEFAULT 'synced';",
        )?;
    }
    if !column_exists(conn, "memories", "version") {
        conn.execute_batch("ALTER TABLE memories ADD COLUMN version INTEGER NOT NULL DEFAULT 1;")?;
    }
    if !column_exists(conn, "memories", "edges") {
        conn.execute_batch("ALTER TABLE memories ADD COLUMN edges TEXT NOT NULL DEFAULT '[]';")?;
    }
    if !column_exists(conn, "memories", "updated_at") {
        // ADD COLUMN only takes constant defaults; backfill separately.
        conn.execute_batch(
            "ALTER TABLE memories ADD COLUMN updated_at TEXT NOT NULL DEFAULT '';
             UPDATE memories SET updated_at = created_at WHERE updated_at = '';",
        )?;
    }
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);")
}

/// Bring a vector database up to the current schema.
pub fn migrate_vector(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current = get_schema_version(conn);

    if current < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vectors (
                memory_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL,
                inserted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_vectors_user ON vectors(user_id);
            ",
        )?;
    }

    set_schema_version(conn, VECTOR_SCHEMA_VERSION)
}

/// Bring a graph database up to the current schema.
pub fn migrate_graph(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current = get_schema_version(conn);

    if current < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS nodes (
                memory_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, relation)
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_user ON nodes(user_id);
            CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
            ",
        )?;
    }

    set_schema_version(conn, GRAPH_SCHEMA_VERSION)
}
