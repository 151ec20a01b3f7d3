//! Benchmark suites measuring the approximate index against the exact scan.
//!
//! Each suite runs against a [`Fixture`]: one in-memory record store loaded
//! with a corpus, the [`ExactScanIndex`] over it as ground truth, and an
//! [`ApproximateIndex`] collection holding the same vectors.

use anyhow::{anyhow, ensure, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::corpus::Corpus;
use super::metrics::{
    coefficient_of_variation, mean, millis, recall_at_k, std_dev, throughput, LatencySummary,
};
use crate::db;
use crate::memory::store::{delete_memory, store_memory};
use crate::memory::types::{MemoryType, NewMemory};
use crate::vector::{
    AnnConfig, AnnStore, ApproximateIndex, CollectionHandle, ExactScanIndex, SearchResult,
    VectorIndex,
};

/// A loaded corpus with both indexes over it.
pub struct Fixture {
    db: Arc<Mutex<Connection>>,
    exact: ExactScanIndex,
    ann: ApproximateIndex,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    ingest: Duration,
    initial_rebuild: Duration,
}

impl Fixture {
    /// Load `corpus` into a fresh record store and into collection `name`
    /// under `root`, then rebuild once.
    pub fn build(root: &Path, name: &str, corpus: &Corpus, config: AnnConfig) -> Result<Self> {
        let db = Arc::new(Mutex::new(db::open_memory_database()?));
        let exact = ExactScanIndex::new(Arc::clone(&db), corpus.dimension, corpus.len().max(1));
        let store = Arc::new(AnnStore::open(root, config)?);
        let ann = ApproximateIndex::open(store, CollectionHandle::new(name)?, corpus.dimension)?;

        let mut ids = Vec::with_capacity(corpus.len());
        {
            let mut conn = lock(&db)?;
            for (i, v) in corpus.vectors.iter().enumerate() {
                let new = NewMemory::new(MemoryType::Semantic, format!("synthetic record {i}"));
                ids.push(store_memory(&mut conn, &new, Some(v))?.id);
            }
        }

        let started = Instant::now();
        for (id, v) in ids.iter().zip(&corpus.vectors) {
            ann.upsert(id, v)?;
        }
        let ingest = started.elapsed();

        let started = Instant::now();
        ann.rebuild()?;
        let initial_rebuild = started.elapsed();

        info!(
            collection = name,
            entries = ids.len(),
            dimension = corpus.dimension,
            rebuild_ms = millis(initial_rebuild),
            "bench fixture ready"
        );
        Ok(Self {
            db,
            exact,
            ann,
            ids,
            vectors: corpus.vectors.clone(),
            ingest,
            initial_rebuild,
        })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn approximate(&self) -> &ApproximateIndex {
        &self.ann
    }

    pub fn exact(&self) -> &ExactScanIndex {
        &self.exact
    }

    pub fn ingest_report(&self) -> IngestReport {
        IngestReport {
            entries: self.ids.len(),
            upserts_per_sec: throughput(self.ids.len(), self.ingest),
            initial_rebuild_ms: millis(self.initial_rebuild),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub entries: usize,
    pub upserts_per_sec: f64,
    pub initial_rebuild_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallReport {
    pub queries: usize,
    pub k: usize,
    pub mean_recall: f64,
    pub min_recall: f64,
}

/// Recall@k of the approximate index, exact scan as ground truth.
pub fn recall_suite(fixture: &Fixture, queries: &[Vec<f32>], k: usize) -> Result<RecallReport> {
    let recalls = recall_per_query(fixture, queries, k)?;
    let report = RecallReport {
        queries: recalls.len(),
        k,
        mean_recall: mean(&recalls),
        min_recall: recalls.iter().copied().fold(1.0, f64::min),
    };
    debug!(mean = report.mean_recall, min = report.min_recall, "recall suite done");
    Ok(report)
}

fn recall_per_query(fixture: &Fixture, queries: &[Vec<f32>], k: usize) -> Result<Vec<f64>> {
    queries
        .iter()
        .map(|q| {
            let truth = ids_of(fixture.exact.search(q, k)?);
            let approx = ids_of(fixture.ann.search(q, k)?);
            Ok(recall_at_k(&truth, &approx, k))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    pub approximate: LatencySummary,
    pub exact: LatencySummary,
}

/// Per-query search latency of both indexes on a clean collection.
pub fn latency_suite(fixture: &Fixture, queries: &[Vec<f32>], k: usize) -> Result<LatencyReport> {
    fixture.ann.rebuild()?;
    let mut ann = Vec::with_capacity(queries.len());
    let mut exact = Vec::with_capacity(queries.len());
    for q in queries {
        let started = Instant::now();
        fixture.ann.search(q, k)?;
        ann.push(started.elapsed());

        let started = Instant::now();
        fixture.exact.search(q, k)?;
        exact.push(started.elapsed());
    }
    Ok(LatencyReport {
        approximate: LatencySummary::from_durations(&ann),
        exact: LatencySummary::from_durations(&exact),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputReport {
    pub upserts: usize,
    pub upserts_per_sec: f64,
    pub rebuild_ms: f64,
    pub searches: usize,
    pub searches_per_sec: f64,
}

/// Bulk ingestion and query throughput on a fresh collection `name`.
pub fn throughput_suite(
    root: &Path,
    name: &str,
    corpus: &Corpus,
    queries: &[Vec<f32>],
    k: usize,
    config: AnnConfig,
) -> Result<ThroughputReport> {
    let store = Arc::new(AnnStore::open(root, config)?);
    let index = ApproximateIndex::open(store, CollectionHandle::new(name)?, corpus.dimension)?;

    let started = Instant::now();
    for (i, v) in corpus.vectors.iter().enumerate() {
        index.upsert(&format!("t{i}"), v)?;
    }
    let upsert_time = started.elapsed();

    let started = Instant::now();
    index.rebuild()?;
    let rebuild_time = started.elapsed();

    let started = Instant::now();
    for q in queries {
        index.search(q, k)?;
    }
    let search_time = started.elapsed();

    Ok(ThroughputReport {
        upserts: corpus.len(),
        upserts_per_sec: throughput(corpus.len(), upsert_time),
        rebuild_ms: millis(rebuild_time),
        searches: queries.len(),
        searches_per_sec: throughput(queries.len(), search_time),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildStabilityReport {
    pub runs: usize,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub coefficient_of_variation: f64,
    pub samples_ms: Vec<f64>,
    /// Repeated searches against the rebuilt state returned identical lists.
    pub deterministic: bool,
}

/// Time `runs` consecutive rebuilds of the fixture's fixed corpus.
///
/// Every vector is re-upserted unchanged before each timed rebuild, so each
/// run folds the whole corpus; one untimed warm-up run precedes them.
pub fn rebuild_stability_suite(
    fixture: &Fixture,
    runs: usize,
    probe: &[Vec<f32>],
    k: usize,
) -> Result<RebuildStabilityReport> {
    ensure!(runs > 0, "rebuild stability needs at least one run");
    let mut samples = Vec::with_capacity(runs);
    for run in 0..=runs {
        for (id, v) in fixture.ids.iter().zip(&fixture.vectors) {
            fixture.ann.upsert(id, v)?;
        }
        let started = Instant::now();
        fixture.ann.rebuild()?;
        if run > 0 {
            samples.push(millis(started.elapsed()));
        }
    }

    let mut deterministic = true;
    for q in probe {
        let first = ids_of(fixture.ann.search(q, k)?);
        let second = ids_of(fixture.ann.search(q, k)?);
        deterministic &= first == second;
    }

    Ok(RebuildStabilityReport {
        runs,
        mean_ms: mean(&samples),
        std_dev_ms: std_dev(&samples),
        coefficient_of_variation: coefficient_of_variation(&samples),
        samples_ms: samples,
        deterministic,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub inserted: usize,
    pub deleted: usize,
    /// `stats().count` after the post-delete rebuild.
    pub count: usize,
    /// Deleted ids returned by any query. Must be zero.
    pub leaked: usize,
    /// Recall@k against the exact scan over the surviving records.
    pub mean_recall: f64,
}

impl MutationReport {
    pub fn count_matches(&self) -> bool {
        self.count == self.inserted - self.deleted
    }
}

/// Delete a seeded `fraction` of the fixture, rebuild, then query.
///
/// Records are removed from the record store as well, so the exact scan
/// keeps serving as ground truth. Mutates the fixture; run it last.
pub fn mutation_suite(
    fixture: &mut Fixture,
    fraction: f64,
    queries: &[Vec<f32>],
    k: usize,
    seed: u64,
) -> Result<MutationReport> {
    let inserted = fixture.ann.stats()?.count;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut victims = fixture.ids.clone();
    victims.shuffle(&mut rng);
    victims.truncate((fixture.ids.len() as f64 * fraction.clamp(0.0, 1.0)).round() as usize);

    {
        let mut conn = lock(&fixture.db)?;
        for id in &victims {
            delete_memory(&mut conn, id)?;
        }
    }
    for id in &victims {
        ensure!(fixture.ann.delete(id)?, "delete of live id {id} reported absent");
    }
    fixture.ann.rebuild()?;

    let deleted: HashSet<&str> = victims.iter().map(String::as_str).collect();
    let mut leaked = 0usize;
    let mut recalls = Vec::with_capacity(queries.len());
    for q in queries {
        let approx = ids_of(fixture.ann.search(q, k)?);
        leaked += approx.iter().filter(|id| deleted.contains(id.as_str())).count();
        let truth = ids_of(fixture.exact.search(q, k)?);
        recalls.push(recall_at_k(&truth, &approx, k));
    }

    let (ids, vectors): (Vec<String>, Vec<Vec<f32>>) = fixture
        .ids
        .iter()
        .cloned()
        .zip(fixture.vectors.iter().cloned())
        .filter(|(id, _)| !deleted.contains(id.as_str()))
        .unzip();
    fixture.ids = ids;
    fixture.vectors = vectors;

    let report = MutationReport {
        inserted,
        deleted: victims.len(),
        count: fixture.ann.stats()?.count,
        leaked,
        mean_recall: mean(&recalls),
    };
    info!(
        deleted = report.deleted,
        leaked = report.leaked,
        recall = report.mean_recall,
        "mutation suite done"
    );
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct FootprintReport {
    pub entries: usize,
    pub dimension: usize,
    pub size_bytes: u64,
    pub bytes_per_entry: f64,
    /// Bytes the raw f32 vectors alone would take.
    pub raw_vector_bytes: u64,
}

/// On-disk size of the approximate collection.
pub fn memory_footprint(fixture: &Fixture) -> Result<FootprintReport> {
    fixture.ann.rebuild()?;
    let stats = fixture.ann.stats()?;
    let raw = (stats.count * stats.dimension * std::mem::size_of::<f32>()) as u64;
    Ok(FootprintReport {
        entries: stats.count,
        dimension: stats.dimension,
        size_bytes: stats.size_bytes,
        bytes_per_entry: if stats.count == 0 {
            0.0
        } else {
            stats.size_bytes as f64 / stats.count as f64
        },
        raw_vector_bytes: raw,
    })
}

fn ids_of(results: Vec<SearchResult>) -> Vec<String> {
    results.into_iter().map(|r| r.id).collect()
}

fn lock(db: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    db.lock()
        .map_err(|e| anyhow!("db lock poisoned: {e}"))
        .context("bench record store")
}
