//! Brute-force vector search over the record store.
//!
//! Holds no state of its own: every search re-reads live records with a
//! vector and scores them with sqlite-vec's `vec_distance_cosine`. Writes are
//! no-ops because the record store is already the source of truth. This is
//! the ground-truth oracle the approximate index is measured against.

use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use super::{check_dimension, IndexStats, SearchResult, VectorError, VectorIndex};
use crate::memory::embedding_to_bytes;

pub struct ExactScanIndex {
    db: Arc<Mutex<Connection>>,
    dimension: usize,
    /// Maximum records read per scan, oldest first.
    scan_limit: usize,
}

impl ExactScanIndex {
    pub fn new(db: Arc<Mutex<Connection>>, dimension: usize, scan_limit: usize) -> Self {
        Self {
            db,
            dimension,
            scan_limit,
        }
    }

    fn byte_len(&self) -> i64 {
        (self.dimension * std::mem::size_of::<f32>()) as i64
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, VectorError> {
        self.db.lock().map_err(|_| VectorError::LockPoisoned)
    }
}

impl VectorIndex for ExactScanIndex {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(&self, _id: &str, vector: &[f32]) -> Result<(), VectorError> {
        check_dimension(self.dimension, vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorError> {
        check_dimension(self.dimension, query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, 1.0 - vec_distance_cosine(embedding, ?1) AS score FROM ( \
                 SELECT rowid AS seq, id, embedding FROM memories \
                 WHERE archived = 0 AND embedding IS NOT NULL AND length(embedding) = ?2 \
                 ORDER BY rowid LIMIT ?3 \
             ) WHERE score IS NOT NULL ORDER BY score DESC, seq ASC LIMIT ?4",
        )?;
        let results = stmt
            .query_map(
                params![
                    embedding_to_bytes(query),
                    self.byte_len(),
                    self.scan_limit as i64,
                    k as i64
                ],
                |row| Ok(SearchResult::new(row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(k, found = results.len(), "exact scan complete");
        Ok(results)
    }

    /// Reports whether the record store still holds a live vector for `id`.
    fn delete(&self, id: &str) -> Result<bool, VectorError> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM memories \
             WHERE id = ?1 AND archived = 0 AND embedding IS NOT NULL",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn stats(&self) -> Result<IndexStats, VectorError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories \
             WHERE archived = 0 AND embedding IS NOT NULL AND length(embedding) = ?1",
            params![self.byte_len()],
            |row| row.get(0),
        )?;
        Ok(IndexStats {
            count: count as usize,
            dimension: self.dimension,
            size_bytes: count as u64 * self.byte_len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store::{archive_memory, store_memory};
    use crate::memory::types::{MemoryType, NewMemory};

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    fn setup(dim: usize, scan_limit: usize) -> (Arc<Mutex<Connection>>, ExactScanIndex) {
        let db = Arc::new(Mutex::new(db::open_memory_database().unwrap()));
        let index = ExactScanIndex::new(Arc::clone(&db), dim, scan_limit);
        (db, index)
    }

    fn insert(db: &Mutex<Connection>, text: &str, v: &[f32]) -> String {
        let mut conn = db.lock().unwrap();
        store_memory(&mut conn, &NewMemory::new(MemoryType::Semantic, text), Some(v))
            .unwrap()
            .id
    }

    #[test]
    fn search_ranks_by_similarity() {
        let (db, index) = setup(4, 100);
        let a = insert(&db, "a", &unit(4, 0));
        let b = insert(&db, "b", &[0.6, 0.8, 0.0, 0.0]);
        let _c = insert(&db, "c", &unit(4, 3));

        let results = index.search(&unit(4, 0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, a);
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[1].id, b);
        assert!((results[1].score - 0.6).abs() < 1e-5);
    }

    #[test]
    fn search_sees_writes_immediately() {
        let (db, index) = setup(4, 100);
        assert!(index.search(&unit(4, 1), 5).unwrap().is_empty());

        let id = insert(&db, "fresh", &unit(4, 1));
        let results = index.search(&unit(4, 1), 5).unwrap();
        assert_eq!(results[0].id, id);

        archive_memory(&db.lock().unwrap(), &id).unwrap();
        assert!(index.search(&unit(4, 1), 5).unwrap().is_empty());
        assert!(!index.delete(&id).unwrap());
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let (db, index) = setup(4, 100);
        let first = insert(&db, "first", &unit(4, 2));
        let second = insert(&db, "second", &unit(4, 2));
        let ids: Vec<String> = index
            .search(&unit(4, 2), 2)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn zero_vector_rows_are_skipped() {
        let (db, index) = setup(4, 100);
        let _blank = insert(&db, "blank", &[0.0; 4]);
        let live = insert(&db, "live", &unit(4, 1));
        let results = index.search(&unit(4, 1), 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, live);
    }

    #[test]
    fn scan_limit_bounds_candidates() {
        let (db, index) = setup(4, 1);
        let _oldest = insert(&db, "old", &unit(4, 0));
        let _newer = insert(&db, "new", &unit(4, 1));
        assert_eq!(index.search(&unit(4, 1), 5).unwrap().len(), 1);
    }

    #[test]
    fn wrong_dimension_query_is_rejected() {
        let (_db, index) = setup(4, 100);
        let err = index.search(&[1.0, 0.0], 5).unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 4, actual: 2 }));
        assert!(index.upsert("x", &[1.0]).is_err());
    }

    #[test]
    fn stats_counts_live_vectors_of_dimension() {
        let (db, index) = setup(4, 100);
        insert(&db, "a", &unit(4, 0));
        insert(&db, "b", &unit(4, 1));
        insert(&db, "odd", &unit(8, 1));
        let stats = index.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.dimension, 4);
        assert_eq!(stats.size_bytes, 32);
    }
}
