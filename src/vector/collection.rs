//! On-disk state of one approximate collection.
//!
//! Each collection directory holds `collection.db`, a small SQLite file with
//! the immutable collection parameters and every live entry, and
//! `graph.usearch`, the serialized HNSW graph. The entry table is
//! authoritative; the graph file is a cache that can always be rebuilt from it.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{Metric, VectorError};
use crate::memory::{bytes_to_embedding, embedding_to_bytes};

pub const ENTRIES_FILE: &str = "collection.db";
pub const GRAPH_FILE: &str = "graph.usearch";

/// Bumped when the entry table layout changes.
const FORMAT_VERSION: u32 = 1;

const COLLECTION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collection_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    key INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    vector BLOB NOT NULL
);
"#;

/// An entry as persisted: graph key, record id, vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: u64,
    pub id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug)]
pub struct CollectionFile {
    dir: PathBuf,
    conn: Connection,
    dimension: usize,
    metric: Metric,
}

impl CollectionFile {
    /// Open the collection in `dir`, creating it if absent. An existing
    /// collection must match `dimension` and `metric`.
    pub fn create_or_open(
        dir: &Path,
        dimension: usize,
        metric: Metric,
    ) -> Result<Self, VectorError> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join(ENTRIES_FILE))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(COLLECTION_SQL)?;

        match read_meta(&conn)? {
            Some((existing_dim, existing_metric)) => {
                if existing_dim != dimension {
                    return Err(VectorError::DimensionMismatch {
                        expected: existing_dim,
                        actual: dimension,
                    });
                }
                if existing_metric != metric {
                    return Err(VectorError::MetricMismatch {
                        existing: existing_metric.to_string(),
                        requested: metric.to_string(),
                    });
                }
                tracing::debug!(dir = %dir.display(), dimension, "opened collection file");
            }
            None => {
                let tx = conn.unchecked_transaction()?;
                for (key, value) in [
                    ("dimension", dimension.to_string()),
                    ("metric", metric.to_string()),
                    ("format_version", FORMAT_VERSION.to_string()),
                ] {
                    tx.execute(
                        "INSERT INTO collection_meta (key, value) VALUES (?1, ?2)",
                        params![key, value],
                    )?;
                }
                tx.commit()?;
                tracing::debug!(dir = %dir.display(), dimension, "created collection file");
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            conn,
            dimension,
            metric,
        })
    }

    /// True when `dir` already holds a collection.
    pub fn exists(dir: &Path) -> bool {
        dir.join(ENTRIES_FILE).exists()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn graph_path(&self) -> PathBuf {
        self.dir.join(GRAPH_FILE)
    }

    /// All entries in key order. Rows whose vector length is wrong are skipped.
    pub fn load_entries(&self) -> Result<Vec<StoredEntry>, VectorError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, id, vector FROM entries ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok(StoredEntry {
                    key: row.get::<_, i64>(0)? as u64,
                    id: row.get(1)?,
                    vector: bytes_to_embedding(&blob),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total = rows.len();
        let entries: Vec<StoredEntry> = rows
            .into_iter()
            .filter(|e| e.vector.len() == self.dimension)
            .collect();
        if entries.len() != total {
            tracing::warn!(
                skipped = total - entries.len(),
                "collection rows with wrong vector length ignored"
            );
        }
        Ok(entries)
    }

    /// One past the highest graph key ever committed, 0 for a new collection.
    /// Keys of deleted entries stay below it, so they are never handed out
    /// again even if a stale graph file still holds them.
    pub fn next_key(&self) -> Result<u64, VectorError> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM collection_meta WHERE key = 'next_key'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let stored = match stored {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| VectorError::Backend(format!("corrupt collection next_key: {e}")))?,
            None => 0,
        };
        let max_key: Option<i64> =
            self.conn
                .query_row("SELECT MAX(key) FROM entries", [], |row| row.get(0))?;
        Ok(stored.max(max_key.map(|k| k as u64 + 1).unwrap_or(0)))
    }

    /// Atomically delete `removed` ids and write `upserts`. An upsert of an id
    /// that already has a row replaces that row. The key high-water mark
    /// advances in the same transaction.
    pub fn apply(&mut self, upserts: &[StoredEntry], removed: &[&str]) -> Result<(), VectorError> {
        let tx = self.conn.transaction()?;
        {
            let mut delete = tx.prepare_cached("DELETE FROM entries WHERE id = ?1")?;
            for id in removed {
                delete.execute(params![id])?;
            }
            for entry in upserts {
                delete.execute(params![entry.id])?;
            }
            let mut insert =
                tx.prepare_cached("INSERT INTO entries (key, id, vector) VALUES (?1, ?2, ?3)")?;
            for entry in upserts {
                insert.execute(params![
                    entry.key as i64,
                    entry.id,
                    embedding_to_bytes(&entry.vector)
                ])?;
            }
            if let Some(max) = upserts.iter().map(|e| e.key).max() {
                tx.execute(
                    "INSERT INTO collection_meta (key, value) VALUES ('next_key', ?1) \
                     ON CONFLICT(key) DO UPDATE SET value = \
                         CAST(MAX(CAST(value AS INTEGER), CAST(excluded.value AS INTEGER)) AS TEXT)",
                    params![(max + 1).to_string()],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Bytes used by every file in the collection directory.
    pub fn size_bytes(&self) -> u64 {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .filter(|m| m.is_file())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

fn read_meta(conn: &Connection) -> Result<Option<(usize, Metric)>, VectorError> {
    let get = |key: &str| -> rusqlite::Result<Option<String>> {
        conn.query_row(
            "SELECT value FROM collection_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
    };

    let (Some(dimension), Some(metric)) = (get("dimension")?, get("metric")?) else {
        return Ok(None);
    };
    let dimension = dimension
        .parse::<usize>()
        .map_err(|e| VectorError::Backend(format!("corrupt collection dimension: {e}")))?;
    let metric = metric
        .parse::<Metric>()
        .map_err(|e| VectorError::Backend(format!("corrupt collection metric: {e}")))?;
    Ok(Some((dimension, metric)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(key: u64, id: &str, v: Vec<f32>) -> StoredEntry {
        StoredEntry {
            key,
            id: id.to_string(),
            vector: v,
        }
    }

    #[test]
    fn create_then_reopen_with_same_parameters() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("c");
        assert!(!CollectionFile::exists(&dir));
        CollectionFile::create_or_open(&dir, 3, Metric::Cosine).unwrap();
        assert!(CollectionFile::exists(&dir));
        let reopened = CollectionFile::create_or_open(&dir, 3, Metric::Cosine).unwrap();
        assert_eq!(reopened.dimension(), 3);
    }

    #[test]
    fn reopen_with_other_dimension_fails() {
        let tmp = TempDir::new().unwrap();
        CollectionFile::create_or_open(tmp.path(), 3, Metric::Cosine).unwrap();
        let err = CollectionFile::create_or_open(tmp.path(), 4, Metric::Cosine).unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 3, actual: 4 }));
    }

    #[test]
    fn apply_replaces_and_removes_rows() {
        let tmp = TempDir::new().unwrap();
        let mut file = CollectionFile::create_or_open(tmp.path(), 2, Metric::Cosine).unwrap();
        file.apply(
            &[entry(0, "a", vec![1.0, 0.0]), entry(1, "b", vec![0.0, 1.0])],
            &[],
        )
        .unwrap();
        file.apply(&[entry(2, "a", vec![0.6, 0.8])], &["b"]).unwrap();

        let entries = file.load_entries().unwrap();
        assert_eq!(entries, vec![entry(2, "a", vec![0.6, 0.8])]);
        assert!(file.size_bytes() > 0);
    }

    #[test]
    fn next_key_survives_deleting_the_highest_entry() {
        let tmp = TempDir::new().unwrap();
        {
            let mut file = CollectionFile::create_or_open(tmp.path(), 2, Metric::Cosine).unwrap();
            assert_eq!(file.next_key().unwrap(), 0);
            file.apply(
                &[entry(0, "a", vec![1.0, 0.0]), entry(7, "b", vec![0.0, 1.0])],
                &[],
            )
            .unwrap();
            file.apply(&[], &["b"]).unwrap();
            assert_eq!(file.next_key().unwrap(), 8);
        }
        let file = CollectionFile::create_or_open(tmp.path(), 2, Metric::Cosine).unwrap();
        assert_eq!(file.next_key().unwrap(), 8);
    }
}
