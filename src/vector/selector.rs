//! Startup selection of the process's one active [`VectorIndex`].
//!
//! The result is an explicit [`ActiveIndex`] value that callers thread
//! through the recall and write paths; nothing here is global.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::collection::CollectionFile;
use super::{AnnStore, ApproximateIndex, CollectionHandle, ExactScanIndex, VectorError, VectorIndex};
use crate::config::{IndexBackend, MnemoConfig};
use crate::memory::store::live_vectors;

/// The index chosen at startup, plus what happened while choosing it.
#[derive(Clone)]
pub struct ActiveIndex {
    index: Arc<dyn VectorIndex>,
    backend: IndexBackend,
    /// Why the configured approximate index was not used, if it wasn't.
    fallback: Option<String>,
    backfill: Option<BackfillReport>,
}

impl ActiveIndex {
    pub fn exact(db: Arc<Mutex<Connection>>, config: &MnemoConfig) -> Self {
        Self {
            index: Arc::new(ExactScanIndex::new(
                db,
                config.embedding.dimension,
                config.retrieval.exact_scan_limit,
            )),
            backend: IndexBackend::Exact,
            fallback: None,
            backfill: None,
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn backend(&self) -> IndexBackend {
        self.backend
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn backfill_report(&self) -> Option<&BackfillReport> {
        self.backfill.as_ref()
    }
}

impl std::fmt::Debug for ActiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveIndex")
            .field("backend", &self.backend)
            .field("fallback", &self.fallback)
            .field("backfill", &self.backfill)
            .finish()
    }
}

/// Outcome of replaying the record store into an index.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub replayed: usize,
    pub skipped: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Pick the active index for this process. Never fails: when the
/// approximate index is configured but cannot be opened or backfilled, the
/// exact scan is used and the cause is logged once.
pub fn select_index(config: &MnemoConfig, db: Arc<Mutex<Connection>>) -> ActiveIndex {
    match config.index.backend {
        IndexBackend::Exact => {
            info!(backend = "exact", "vector index selected");
            ActiveIndex::exact(db, config)
        }
        IndexBackend::Approximate => match open_ready_approximate(config, &db) {
            Ok((index, backfilled)) => {
                info!(
                    backend = "approximate",
                    collection = %config.index.collection,
                    "vector index selected"
                );
                ActiveIndex {
                    index: Arc::new(index),
                    backend: IndexBackend::Approximate,
                    fallback: None,
                    backfill: backfilled,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "approximate index unavailable, falling back to exact scan"
                );
                let mut active = ActiveIndex::exact(db, config);
                active.fallback = Some(format!("{e:#}"));
                active
            }
        },
    }
}

/// Open the configured approximate collection without backfilling it.
pub fn open_approximate(config: &MnemoConfig) -> Result<ApproximateIndex, VectorError> {
    let handle = CollectionHandle::new(config.index.collection.clone())?;
    let store = AnnStore::open(config.resolved_index_path(), config.index.ann_config())?;
    ApproximateIndex::open(Arc::new(store), handle, config.embedding.dimension)
}

/// Open the approximate collection and backfill it if it holds nothing yet.
fn open_ready_approximate(
    config: &MnemoConfig,
    db: &Mutex<Connection>,
) -> Result<(ApproximateIndex, Option<BackfillReport>)> {
    let dir = config
        .resolved_index_path()
        .join(&config.index.collection);
    let existed = CollectionFile::exists(&dir);

    let index = open_approximate(config)?;
    // An empty collection is treated as new, so a backfill interrupted by a
    // crash is retried on the next start.
    if existed && index.stats()?.count > 0 {
        return Ok((index, None));
    }
    let report = backfill(db, &index)?;
    Ok((index, Some(report)))
}

/// Replay every live record vector through `upsert`, then rebuild once.
///
/// Not transactional with concurrent writes; a record written meanwhile is
/// upserted again by the write path, which replaces rather than duplicates.
pub fn backfill(db: &Mutex<Connection>, index: &dyn VectorIndex) -> Result<BackfillReport> {
    let started = Instant::now();
    let vectors = {
        let conn = db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
        live_vectors(&conn, index.dimension(), None)?
    };

    let mut replayed = 0usize;
    let mut skipped = 0usize;
    for (id, vector) in &vectors {
        match index.upsert(id, vector) {
            Ok(()) => replayed += 1,
            Err(e) => {
                warn!(id = %id, error = %e, "backfill skipped record");
                skipped += 1;
            }
        }
    }
    index.rebuild()?;

    let report = BackfillReport {
        replayed,
        skipped,
        elapsed: started.elapsed(),
    };
    info!(
        index = index.name(),
        replayed,
        skipped,
        elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
        "backfill complete"
    );
    Ok(report)
}
