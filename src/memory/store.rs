//! Write path for the record store.
//!
//! The record store owns title, content, tags and the embedding BLOB. It is
//! the source of truth: the exact scan reads vectors from here and the
//! approximate index is backfilled from here. Every mutation keeps the FTS5
//! index in sync inside the same transaction.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;

use super::embedding_to_bytes;
use crate::memory::types::{Memory, MemoryType, MemoryUpdate, NewMemory};

const MEMORY_COLUMNS: &str = "id, type, title, content, tags, tier, archived, \
     embedding IS NOT NULL, created_at, updated_at";

/// What happened to a record's vector during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorChange {
    /// A new vector was stored.
    Replaced,
    /// The text changed but no vector was available, so the stale one was dropped.
    Cleared,
    Unchanged,
}

/// Result of [`update_memory`].
#[derive(Debug)]
pub struct UpdateOutcome {
    pub memory: Memory,
    pub vector: VectorChange,
}

/// Insert a new record, its FTS row and (if available) its vector.
pub fn store_memory(
    conn: &mut Connection,
    new: &NewMemory,
    embedding: Option<&[f32]>,
) -> Result<Memory> {
    if new.content.trim().is_empty() {
        bail!("content must not be empty");
    }

    let tx = conn.transaction()?;
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let tags_json = serde_json::to_string(&new.tags)?;

    tx.execute(
        "INSERT INTO memories (id, type, title, content, tags, tier, archived, embedding, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?8)",
        params![
            id,
            new.memory_type.as_str(),
            new.title,
            new.content,
            tags_json,
            new.tier,
            embedding.map(embedding_to_bytes),
            now,
        ],
    )?;
    let rowid = tx.last_insert_rowid();
    insert_fts(&tx, rowid, &new.title, &new.content, &tags_json, &id)?;

    tx.commit()?;
    tracing::debug!(id = %id, has_embedding = embedding.is_some(), "memory stored");

    Ok(Memory {
        id,
        memory_type: new.memory_type,
        title: new.title.clone(),
        content: new.content.clone(),
        tags: new.tags.clone(),
        tier: new.tier.clone(),
        archived: false,
        has_embedding: embedding.is_some(),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Apply a partial update. A text change without a fresh vector clears the
/// stored vector so no consumer keeps scoring stale text.
pub fn update_memory(
    conn: &mut Connection,
    id: &str,
    update: &MemoryUpdate,
    embedding: Option<&[f32]>,
) -> Result<UpdateOutcome> {
    let tx = conn.transaction()?;
    let (rowid, current) = match load_row(&tx, id)? {
        Some(found) => found,
        None => bail!("memory not found: {id}"),
    };

    let title = update.title.clone().unwrap_or_else(|| current.title.clone());
    let content = update
        .content
        .clone()
        .unwrap_or_else(|| current.content.clone());
    if content.trim().is_empty() {
        bail!("content must not be empty");
    }
    let tags = update.tags.clone().unwrap_or_else(|| current.tags.clone());
    let tier = update.tier.clone().unwrap_or_else(|| current.tier.clone());
    let old_tags_json = serde_json::to_string(&current.tags)?;
    let tags_json = serde_json::to_string(&tags)?;
    let now = chrono::Utc::now().to_rfc3339();

    let vector = match embedding {
        Some(v) => {
            tx.execute(
                "UPDATE memories SET embedding = ?1 WHERE id = ?2",
                params![embedding_to_bytes(v), id],
            )?;
            VectorChange::Replaced
        }
        None if update.touches_text() && current.has_embedding => {
            tx.execute(
                "UPDATE memories SET embedding = NULL WHERE id = ?1",
                params![id],
            )?;
            VectorChange::Cleared
        }
        None => VectorChange::Unchanged,
    };

    tx.execute(
        "UPDATE memories SET title = ?1, content = ?2, tags = ?3, tier = ?4, updated_at = ?5 WHERE id = ?6",
        params![title, content, tags_json, tier, now, id],
    )?;
    delete_fts(
        &tx,
        rowid,
        &current.title,
        &current.content,
        &old_tags_json,
        id,
    )?;
    insert_fts(&tx, rowid, &title, &content, &tags_json, id)?;

    tx.commit()?;

    let has_embedding = match vector {
        VectorChange::Replaced => true,
        VectorChange::Cleared => false,
        VectorChange::Unchanged => current.has_embedding,
    };
    Ok(UpdateOutcome {
        memory: Memory {
            title,
            content,
            tags,
            tier,
            has_embedding,
            updated_at: now,
            ..current
        },
        vector,
    })
}

/// Exclude a record from search without deleting it. Returns `false` if the
/// id is unknown or already archived.
pub fn archive_memory(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE memories SET archived = 1, updated_at = ?1 WHERE id = ?2 AND archived = 0",
        params![chrono::Utc::now().to_rfc3339(), id],
    )?;
    Ok(rows > 0)
}

/// Permanently remove a record and its FTS row. Returns `false` if unknown.
pub fn delete_memory(conn: &mut Connection, id: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    let Some((rowid, current)) = load_row(&tx, id)? else {
        return Ok(false);
    };
    let tags_json = serde_json::to_string(&current.tags)?;
    delete_fts(&tx, rowid, &current.title, &current.content, &tags_json, id)?;
    tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(true)
}

pub fn get_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    Ok(load_row(conn, id)?.map(|(_, m)| m))
}

/// Batch-fetch records by id. Unknown ids are absent from the map.
pub fn fetch_memories(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, Memory>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT rowid, {MEMORY_COLUMNS} FROM memories WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| map_memory(row).map(|(_, m)| m))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|m| (m.id.clone(), m)).collect())
}

/// Live (non-archived) records with a vector of `dimension` floats, in
/// insertion order. `limit` bounds the number of rows read.
pub fn live_vectors(
    conn: &Connection,
    dimension: usize,
    limit: Option<usize>,
) -> Result<Vec<(String, Vec<f32>)>> {
    let byte_len = (dimension * std::mem::size_of::<f32>()) as i64;
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM memories \
         WHERE archived = 0 AND embedding IS NOT NULL AND length(embedding) = ?1 \
         ORDER BY rowid LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![byte_len, limit], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, super::bytes_to_embedding(&blob)))
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read stored vectors")?;
    Ok(rows)
}

fn load_row(conn: &Connection, id: &str) -> Result<Option<(i64, Memory)>> {
    let sql = format!("SELECT rowid, {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_memory).optional()?)
}

fn map_memory(row: &Row<'_>) -> rusqlite::Result<(i64, Memory)> {
    let type_str: String = row.get(2)?;
    let memory_type = type_str.parse::<MemoryType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let tags_json: String = row.get(5)?;
    Ok((
        row.get(0)?,
        Memory {
            id: row.get(1)?,
            memory_type,
            title: row.get(3)?,
            content: row.get(4)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            tier: row.get(6)?,
            archived: row.get(7)?,
            has_embedding: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        },
    ))
}

/// Sync the FTS5 index after inserting into the memories table.
///
/// Must use the same rowid as the corresponding `memories` row.
fn insert_fts(
    tx: &Transaction,
    rowid: i64,
    title: &str,
    content: &str,
    tags_json: &str,
    id: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO memories_fts (rowid, title, content, tags, id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![rowid, title, content, tags_json, id],
    )?;
    Ok(())
}

/// External-content FTS5 deletes need the exact previously indexed values.
fn delete_fts(
    tx: &Transaction,
    rowid: i64,
    title: &str,
    content: &str,
    tags_json: &str,
    id: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO memories_fts (memories_fts, rowid, title, content, tags, id) \
         VALUES ('delete', ?1, ?2, ?3, ?4, ?5)",
        params![rowid, title, content, tags_json, id],
    )?;
    Ok(())
}
