#![allow(dead_code)]

use anyhow::Result;
use mnemo::config::{IndexBackend, MnemoConfig};
use mnemo::db;
use mnemo::embedding::EmbeddingProvider;
use mnemo::memory::store::store_memory;
use mnemo::memory::types::NewMemory;
use rusqlite::Connection;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const DIM: usize = 64;

/// Fresh in-memory record store behind the shared handle indexes expect.
pub fn test_db() -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(db::open_memory_database().unwrap()))
}

/// A `DIM`-dim unit vector with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// Unit vector mixing two spikes, `weight` on `a` and the rest on `b`.
pub fn blend(a: usize, b: usize, weight: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[a % DIM] = weight;
    v[b % DIM] += (1.0 - weight * weight).sqrt();
    v
}

pub fn insert_memory(db: &Mutex<Connection>, new: NewMemory, embedding: Option<&[f32]>) -> String {
    let mut conn = db.lock().unwrap();
    store_memory(&mut conn, &new, embedding).unwrap().id
}

/// Config pointing the approximate backend at `dir` with `DIM`-dim vectors.
pub fn approximate_config(dir: &Path) -> MnemoConfig {
    let mut config = MnemoConfig::default();
    config.embedding.dimension = DIM;
    config.index.backend = IndexBackend::Approximate;
    config.index.path = dir.join("index").to_string_lossy().into_owned();
    config
}

/// Deterministic bag-of-words embedder: each lowercase word adds 1.0 to a
/// hashed bucket. Texts sharing words are similar.
pub struct HashingProvider;

impl EmbeddingProvider for HashingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; DIM];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() % DIM as u64) as usize] += 1.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// A provider that always fails, standing in for an unloaded model.
pub struct BrokenProvider;

impl EmbeddingProvider for BrokenProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("model unavailable")
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}
