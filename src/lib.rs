//! Persistent memory for AI agents with swappable vector retrieval.
//!
//! Records (title, content, tags and an optional embedding) live in SQLite.
//! Recall fuses an FTS5 keyword ranking with vector similarity from the one
//! [`VectorIndex`](vector::VectorIndex) active for the process: either an
//! exact scan over the record store or an approximate usearch HNSW
//! collection kept correct under interleaved writes by a dirty-rebuild
//! protocol.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for the exact scan
//! - **Approximate index**: [usearch](https://github.com/unum-cloud/usearch)
//!   HNSW, one persisted collection per handle
//! - **Search**: weighted fusion, `0.7 * semantic + 0.3 * keyword` by default,
//!   keyword-only when no query embedding is available
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization and schema
//! - [`embedding`]: the embedding provider seam
//! - [`memory`]: record store write path and hybrid recall
//! - [`vector`]: exact and approximate indexes and startup selection
//! - [`service`]: async facade threading the active index through reads and writes
//! - [`bench`]: recall, latency, throughput and mutation benchmarks

pub mod bench;
pub mod config;
pub mod db;
pub mod embedding;
pub mod memory;
pub mod service;
pub mod vector;
