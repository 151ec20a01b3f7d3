//! SQL DDL for the record store.
//!
//! Defines the `memories`, `memories_fts` (FTS5), and `schema_meta` tables.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// The schema version that the current binary writes.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
-- Core memory storage. The embedding BLOB is little-endian f32, owned here.
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL CHECK(type IN ('episodic','semantic','procedural','entity')),
    title TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    tier TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(type);
CREATE INDEX IF NOT EXISTS idx_memories_tier ON memories(tier);
CREATE INDEX IF NOT EXISTS idx_memories_archived ON memories(archived);

-- Full-text search (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    title,
    content,
    tags,
    id UNINDEXED,
    content='memories',
    content_rowid='rowid'
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the stored embedding dimension, if one was recorded.
pub fn get_embedding_dimension(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_dimension'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(val.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Record the embedding dimension this database is written with.
pub fn set_embedding_dimension(conn: &Connection, dimension: usize) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_dimension', ?1)",
        [dimension.to_string()],
    )?;
    Ok(())
}
