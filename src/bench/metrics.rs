//! Accuracy and timing statistics.

use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

/// Fraction of the true top-`k` ids that appear in the approximate top-`k`.
///
/// When fewer than `k` true neighbours exist the denominator shrinks to
/// match; an empty ground truth scores 1.0.
pub fn recall_at_k(truth: &[String], approx: &[String], k: usize) -> f64 {
    let truth: HashSet<&str> = truth.iter().take(k).map(String::as_str).collect();
    if truth.is_empty() {
        return 1.0;
    }
    let hits = approx
        .iter()
        .take(k)
        .filter(|id| truth.contains(id.as_str()))
        .count();
    hits as f64 / truth.len() as f64
}

/// Nearest-rank percentile of an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Standard deviation over mean; 0 for an empty or zero-mean sample.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    std_dev(values) / m
}

/// Operations per second.
pub fn throughput(ops: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    ops as f64 / secs
}

pub fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Latency distribution of one operation, in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_durations(samples: &[Duration]) -> Self {
        let mut ms: Vec<f64> = samples.iter().copied().map(millis).collect();
        ms.sort_by(|a, b| a.total_cmp(b));
        Self {
            samples: ms.len(),
            mean_ms: mean(&ms),
            p50_ms: percentile(&ms, 50.0),
            p95_ms: percentile(&ms, 95.0),
            p99_ms: percentile(&ms, 99.0),
            max_ms: ms.last().copied().unwrap_or(0.0),
        }
    }
}
