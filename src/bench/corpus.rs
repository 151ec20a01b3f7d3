//! Seeded synthetic corpora of unit vectors.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::vector::normalize;

/// Shape of a generated corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Distribution {
    /// Directions drawn uniformly from the unit sphere.
    Uniform,
    /// Points scattered around `centers` random directions.
    Clustered { centers: usize, spread: f32 },
    /// Tight groups of `group` almost identical vectors.
    NearDuplicate { group: usize, spread: f32 },
}

impl Distribution {
    pub const CLUSTERED: Self = Self::Clustered {
        centers: 20,
        spread: 0.5,
    };
    pub const NEAR_DUPLICATE: Self = Self::NearDuplicate {
        group: 10,
        spread: 0.05,
    };

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Clustered { .. } => "clustered",
            Self::NearDuplicate { .. } => "near_duplicate",
        }
    }
}

impl std::str::FromStr for Distribution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Self::Uniform),
            "clustered" => Ok(Self::CLUSTERED),
            "near_duplicate" | "near-duplicate" | "adversarial" => Ok(Self::NEAR_DUPLICATE),
            _ => Err(format!(
                "unknown distribution: {s} (expected uniform, clustered or near_duplicate)"
            )),
        }
    }
}

/// Generated vectors plus the anchors queries are drawn around.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub distribution: Distribution,
    pub dimension: usize,
    pub vectors: Vec<Vec<f32>>,
    anchors: Vec<Vec<f32>>,
}

impl Corpus {
    pub fn generate(distribution: Distribution, size: usize, dimension: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let (anchors, vectors) = match distribution {
            Distribution::Uniform => {
                let vectors = (0..size).map(|_| random_unit(&mut rng, dimension)).collect();
                (Vec::new(), vectors)
            }
            Distribution::Clustered { centers, spread } => {
                let anchors: Vec<Vec<f32>> = (0..centers.max(1))
                    .map(|_| random_unit(&mut rng, dimension))
                    .collect();
                let vectors = (0..size)
                    .map(|i| jitter(&mut rng, &anchors[i % anchors.len()], spread))
                    .collect();
                (anchors, vectors)
            }
            Distribution::NearDuplicate { group, spread } => {
                let groups = size.div_ceil(group.max(1)).max(1);
                let anchors: Vec<Vec<f32>> = (0..groups)
                    .map(|_| random_unit(&mut rng, dimension))
                    .collect();
                let vectors = (0..size)
                    .map(|i| jitter(&mut rng, &anchors[i / group.max(1)], spread))
                    .collect();
                (anchors, vectors)
            }
        };

        Self {
            distribution,
            dimension,
            vectors,
            anchors,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Query vectors from the corpus distribution that are not corpus members.
    pub fn queries(&self, count: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| match self.distribution {
                Distribution::Uniform => random_unit(&mut rng, self.dimension),
                Distribution::Clustered { spread, .. }
                | Distribution::NearDuplicate { spread, .. } => {
                    let anchor = &self.anchors[rng.random_range(0..self.anchors.len())];
                    jitter(&mut rng, anchor, spread)
                }
            })
            .collect()
    }
}

/// A direction drawn uniformly from the unit sphere.
pub fn random_unit(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dimension).map(|_| gaussian(rng)).collect();
    normalize(&mut v);
    v
}

/// `base` plus isotropic noise of expected norm `spread`, renormalized.
fn jitter(rng: &mut StdRng, base: &[f32], spread: f32) -> Vec<f32> {
    let sigma = spread / (base.len() as f32).sqrt();
    let mut v: Vec<f32> = base.iter().map(|x| x + sigma * gaussian(rng)).collect();
    normalize(&mut v);
    v
}

/// Standard normal sample (Box-Muller).
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.random_range(f32::EPSILON..1.0);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::dot;

    fn norm(v: &[f32]) -> f32 {
        dot(v, v).sqrt()
    }

    #[test]
    fn generation_is_seeded() {
        let a = Corpus::generate(Distribution::Uniform, 20, 16, 7);
        let b = Corpus::generate(Distribution::Uniform, 20, 16, 7);
        let c = Corpus::generate(Distribution::Uniform, 20, 16, 8);
        assert_eq!(a.vectors, b.vectors);
        assert_ne!(a.vectors, c.vectors);
    }

    #[test]
    fn every_vector_is_unit_norm() {
        for dist in [
            Distribution::Uniform,
            Distribution::CLUSTERED,
            Distribution::NEAR_DUPLICATE,
        ] {
            let corpus = Corpus::generate(dist, 50, 32, 1);
            assert_eq!(corpus.len(), 50);
            for v in corpus.vectors.iter().chain(corpus.queries(5, 2).iter()) {
                assert_eq!(v.len(), 32);
                assert!((norm(v) - 1.0).abs() < 1e-4, "{} not unit", dist.name());
            }
        }
    }

    #[test]
    fn near_duplicates_are_tight() {
        let corpus = Corpus::generate(Distribution::NEAR_DUPLICATE, 20, 64, 3);
        // first two share a group, the eleventh starts the next one
        assert!(dot(&corpus.vectors[0], &corpus.vectors[1]) > 0.99);
        assert!(dot(&corpus.vectors[0], &corpus.vectors[10]) < 0.9);
    }

    #[test]
    fn distribution_parses_names() {
        assert_eq!("uniform".parse::<Distribution>().unwrap(), Distribution::Uniform);
        assert_eq!("clustered".parse::<Distribution>().unwrap().name(), "clustered");
        assert_eq!("adversarial".parse::<Distribution>().unwrap().name(), "near_duplicate");
        assert!("gaussian".parse::<Distribution>().is_err());
    }
}
