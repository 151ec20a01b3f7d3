//! Validation harness for the vector retrieval subsystem.
//!
//! Generates a seeded synthetic corpus, loads it into both index
//! implementations and reports recall@k, latency percentiles, throughput,
//! rebuild stability, correctness under deletes and on-disk footprint. The
//! exact scan is the ground truth throughout.

pub mod corpus;
pub mod metrics;
pub mod suites;

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::info;

pub use corpus::{Corpus, Distribution};
pub use suites::{
    FootprintReport, Fixture, IngestReport, LatencyReport, MutationReport, RebuildStabilityReport,
    RecallReport, ThroughputReport,
};

use crate::vector::AnnConfig;

/// Parameters of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub size: usize,
    pub dimension: usize,
    pub distribution: Distribution,
    pub queries: usize,
    pub k: usize,
    pub seed: u64,
    /// Fraction of the corpus deleted by the mutation suite.
    pub delete_fraction: f64,
    pub rebuild_runs: usize,
    pub ann: AnnConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            size: 1_000,
            dimension: 384,
            distribution: Distribution::Uniform,
            queries: 100,
            k: 10,
            seed: 42,
            delete_fraction: 0.2,
            rebuild_runs: 10,
            ann: AnnConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub distribution: Distribution,
    pub size: usize,
    pub dimension: usize,
    pub k: usize,
    pub seed: u64,
    pub ingest: IngestReport,
    pub footprint: FootprintReport,
    pub recall: RecallReport,
    pub latency: LatencyReport,
    pub throughput: ThroughputReport,
    pub rebuild: RebuildStabilityReport,
    pub mutation: MutationReport,
}

/// Run every suite with collections stored under `root`.
pub fn run(config: &BenchConfig, root: &Path) -> Result<BenchReport> {
    info!(
        size = config.size,
        dimension = config.dimension,
        distribution = config.distribution.name(),
        "benchmark started"
    );
    let corpus = Corpus::generate(config.distribution, config.size, config.dimension, config.seed);
    let queries = corpus.queries(config.queries, config.seed.wrapping_add(1));

    let mut fixture = Fixture::build(root, "bench", &corpus, config.ann.clone())?;
    let footprint = suites::memory_footprint(&fixture)?;
    let recall = suites::recall_suite(&fixture, &queries, config.k)?;
    let latency = suites::latency_suite(&fixture, &queries, config.k)?;
    let throughput = suites::throughput_suite(
        root,
        "throughput",
        &corpus,
        &queries,
        config.k,
        config.ann.clone(),
    )?;
    let rebuild = suites::rebuild_stability_suite(&fixture, config.rebuild_runs, &queries, config.k)?;
    let mutation = suites::mutation_suite(
        &mut fixture,
        config.delete_fraction,
        &queries,
        config.k,
        config.seed.wrapping_add(2),
    )?;

    info!(
        recall = recall.mean_recall,
        leaked = mutation.leaked,
        rebuild_cv = rebuild.coefficient_of_variation,
        "benchmark finished"
    );
    Ok(BenchReport {
        distribution: config.distribution,
        size: config.size,
        dimension: config.dimension,
        k: config.k,
        seed: config.seed,
        ingest: fixture.ingest_report(),
        footprint,
        recall,
        latency,
        throughput,
        rebuild,
        mutation,
    })
}
