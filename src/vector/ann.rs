//! Approximate nearest-neighbour index on usearch HNSW.
//!
//! Writes never touch the graph directly. `upsert` and `delete` stage the
//! change and set the collection's dirty flag; `rebuild` persists the staged
//! changes to the entry table and folds them into the graph. `search`
//! rebuilds first whenever the flag is set, so a delete followed by a search
//! never returns the deleted id.
//!
//! Parameters:
//! - M = 32 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 256 (search-time quality, raised to k when k is larger)

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, info, warn};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::collection::{CollectionFile, StoredEntry};
use super::{check_dimension, IndexStats, Metric, SearchResult, VectorError, VectorIndex};

/// HNSW configuration shared by every collection of a store.
#[derive(Debug, Clone)]
pub struct AnnConfig {
    /// Metric used by [`ApproximateIndex::open`].
    pub metric: Metric,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Graph tombstones tolerated, as a fraction of live entries, before a
    /// rebuild constructs a fresh graph.
    pub compaction_ratio: f64,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            connectivity: 32,
            expansion_add: 200,
            expansion_search: 256,
            compaction_ratio: 0.25,
        }
    }
}

/// Names one persisted collection. Doubles as its directory name under the
/// store root, so only `[A-Za-z0-9_.-]` is accepted and it may not start
/// with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionHandle(String);

impl CollectionHandle {
    pub fn new(name: impl Into<String>) -> Result<Self, VectorError> {
        let name = name.into();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(VectorError::InvalidHandle(name));
        }
        Ok(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CollectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A write waiting for the next rebuild. Each upsert carries a fresh graph key.
#[derive(Debug, Clone)]
enum Staged {
    Upsert { key: u64, vector: Vec<f32> },
    Delete,
}

struct LiveEntry {
    id: String,
    vector: Vec<f32>,
}

/// One open collection: authoritative live set, pending writes, graph.
struct Collection {
    name: String,
    file: CollectionFile,
    graph: Index,
    /// Graph slots consumed since the graph was constructed.
    graph_slots: usize,
    /// Entries removed from the graph since it was constructed.
    graph_removed: usize,
    /// Set when an in-memory graph mutation failed; forces a fresh graph.
    graph_invalid: bool,
    /// Set when the graph on disk lags the in-memory graph.
    graph_unsaved: bool,
    /// Live entries in key (arrival) order.
    live: BTreeMap<u64, LiveEntry>,
    keys: HashMap<String, u64>,
    staged: HashMap<String, Staged>,
    next_key: u64,
    dirty: bool,
}

impl Collection {
    fn open(
        name: &str,
        dir: &Path,
        dimension: usize,
        metric: Metric,
        config: &AnnConfig,
    ) -> Result<Self, VectorError> {
        let file = CollectionFile::create_or_open(dir, dimension, metric)?;
        let entries = file.load_entries()?;

        let mut live = BTreeMap::new();
        let mut keys = HashMap::new();
        for StoredEntry { key, id, vector } in entries {
            keys.insert(id.clone(), key);
            live.insert(key, LiveEntry { id, vector });
        }
        let next_key = file.next_key()?;

        let mut collection = Self {
            name: name.to_string(),
            graph: new_graph(dimension, metric, config)?,
            file,
            graph_slots: 0,
            graph_removed: 0,
            graph_invalid: false,
            graph_unsaved: false,
            live,
            keys,
            staged: HashMap::new(),
            next_key,
            dirty: false,
        };

        if !collection.load_graph(config)? {
            collection.build_graph(config)?;
            collection.save_graph()?;
        }

        info!(
            collection = %collection.name,
            dimension,
            entries = collection.live.len(),
            "opened ann collection"
        );
        Ok(collection)
    }

    /// Load the saved graph if it holds exactly the live entries. A graph
    /// saved before the last committed apply is rejected and rebuilt.
    fn load_graph(&mut self, config: &AnnConfig) -> Result<bool, VectorError> {
        let path = self.file.graph_path();
        if !path.exists() {
            return Ok(false);
        }

        let graph = new_graph(self.file.dimension(), self.file.metric(), config)?;
        if let Err(e) = graph.load(path_str(&path)?) {
            warn!(collection = %self.name, error = %e, "graph file unreadable, rebuilding");
            return Ok(false);
        }
        if graph.size() != self.live.len() || !self.live.keys().all(|k| graph.contains(*k)) {
            warn!(
                collection = %self.name,
                graph = graph.size(),
                live = self.live.len(),
                "graph file is stale, rebuilding"
            );
            return Ok(false);
        }

        self.graph_slots = graph.size();
        self.graph_removed = 0;
        self.graph = graph;
        Ok(true)
    }

    fn upsert(&mut self, id: &str, vector: &[f32]) -> Result<(), VectorError> {
        check_dimension(self.file.dimension(), vector)?;
        let key = self.next_key;
        self.next_key += 1;
        self.staged.insert(
            id.to_string(),
            Staged::Upsert {
                key,
                vector: vector.to_vec(),
            },
        );
        self.dirty = true;
        Ok(())
    }

    fn delete(&mut self, id: &str) -> bool {
        let existed = match self.staged.get(id) {
            Some(Staged::Upsert { .. }) => true,
            Some(Staged::Delete) => false,
            None => self.keys.contains_key(id),
        };
        if existed {
            self.staged.insert(id.to_string(), Staged::Delete);
        }
        self.dirty = true;
        existed
    }

    fn rebuild(&mut self, config: &AnnConfig) -> Result<(), VectorError> {
        if !self.dirty && !self.graph_invalid {
            if self.graph_unsaved {
                self.save_graph()?;
            }
            return Ok(());
        }

        let started = Instant::now();
        let mut staged: Vec<(String, Staged)> = self.staged.drain().collect();
        // Deletes first, then upserts in key order: the fold is deterministic.
        staged.sort_by_key(|(_, s)| match s {
            Staged::Delete => (0, 0),
            Staged::Upsert { key, .. } => (1, *key),
        });

        let mut upserts: Vec<StoredEntry> = Vec::new();
        let mut removed: Vec<String> = Vec::new();
        for (id, change) in &staged {
            match change {
                Staged::Upsert { key, vector } => upserts.push(StoredEntry {
                    key: *key,
                    id: id.clone(),
                    vector: vector.clone(),
                }),
                Staged::Delete => removed.push(id.clone()),
            }
        }

        let removed_ids: Vec<&str> = removed.iter().map(String::as_str).collect();
        if let Err(e) = self.file.apply(&upserts, &removed_ids) {
            // Nothing was applied; keep the writes for the next attempt.
            self.staged.extend(staged);
            return Err(e);
        }

        // Fold into the live set, collecting graph keys that leave it.
        let mut stale_keys: Vec<u64> = Vec::new();
        for id in &removed {
            if let Some(key) = self.keys.remove(id) {
                self.live.remove(&key);
                stale_keys.push(key);
            }
        }
        let upserted = upserts.len();
        for StoredEntry { key, id, vector } in upserts {
            if let Some(old) = self.keys.insert(id.clone(), key) {
                self.live.remove(&old);
                stale_keys.push(old);
            }
            self.live.insert(key, LiveEntry { id, vector });
        }
        // The in-memory state now matches the entry table.
        self.dirty = false;

        let tombstones = self.graph_removed + stale_keys.len();
        let compact = self.graph_invalid
            || tombstones as f64 > config.compaction_ratio * self.live.len().max(1) as f64;

        let folded = if compact {
            self.build_graph(config)
        } else {
            self.fold_graph(&stale_keys, upserted)
        };
        if let Err(e) = folded {
            self.graph_invalid = true;
            return Err(e);
        }
        self.graph_unsaved = true;
        self.save_graph()?;

        info!(
            collection = %self.name,
            upserted,
            removed = stale_keys.len(),
            live = self.live.len(),
            compacted = compact,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "rebuild complete"
        );
        Ok(())
    }

    /// Apply removals, then add the `added` most recent live keys.
    fn fold_graph(&mut self, stale_keys: &[u64], added: usize) -> Result<(), VectorError> {
        for key in stale_keys {
            self.graph.remove(*key).map_err(VectorError::backend)?;
        }
        self.graph_removed += stale_keys.len();

        // New keys are always larger than every key already in the graph.
        let fresh: Vec<(u64, &LiveEntry)> = self
            .live
            .iter()
            .rev()
            .take(added)
            .map(|(k, e)| (*k, e))
            .collect();
        reserve_for(&self.graph, self.graph_slots + fresh.len())?;
        for (key, entry) in fresh.into_iter().rev() {
            self.graph
                .add(key, &entry.vector)
                .map_err(VectorError::backend)?;
        }
        self.graph_slots += added;
        Ok(())
    }

    /// Construct a fresh graph from the live set in key order.
    fn build_graph(&mut self, config: &AnnConfig) -> Result<(), VectorError> {
        let graph = new_graph(self.file.dimension(), self.file.metric(), config)?;
        reserve_for(&graph, self.live.len())?;
        for (key, entry) in &self.live {
            graph.add(*key, &entry.vector).map_err(VectorError::backend)?;
        }
        self.graph = graph;
        self.graph_slots = self.live.len();
        self.graph_removed = 0;
        self.graph_invalid = false;
        self.graph_unsaved = true;
        debug!(collection = %self.name, entries = self.live.len(), "graph constructed");
        Ok(())
    }

    /// Write the graph next to the entry table via a temp file and rename.
    fn save_graph(&mut self) -> Result<(), VectorError> {
        let path = self.file.graph_path();
        let tmp = path.with_extension("usearch.tmp");
        self.graph
            .save(path_str(&tmp)?)
            .map_err(|e| VectorError::Io(std::io::Error::other(e.to_string())))?;
        std::fs::rename(&tmp, &path)?;
        self.graph_unsaved = false;
        Ok(())
    }

    fn search(
        &mut self,
        query: &[f32],
        k: usize,
        config: &AnnConfig,
    ) -> Result<Vec<SearchResult>, VectorError> {
        check_dimension(self.file.dimension(), query)?;
        if self.dirty || self.graph_invalid {
            debug!(collection = %self.name, pending = self.staged.len(), "search triggered rebuild");
            self.rebuild(config)?;
        }
        if k == 0 || self.live.is_empty() {
            return Ok(Vec::new());
        }

        let matches = self.graph.search(query, k).map_err(VectorError::backend)?;
        let mut hits: Vec<(u64, f32)> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter(|(key, distance)| distance.is_finite() && self.live.contains_key(*key))
            .map(|(key, distance)| (*key, 1.0 - distance))
            .collect();
        // Equal scores rank in arrival (key) order.
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|(key, score)| {
                self.live
                    .get(&key)
                    .map(|e| SearchResult::new(e.id.clone(), score))
            })
            .collect();

        debug!(collection = %self.name, k, found = results.len(), "ann search complete");
        Ok(results)
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            count: self.live.len(),
            dimension: self.file.dimension(),
            size_bytes: self.file.size_bytes(),
        }
    }
}

fn new_graph(dimension: usize, metric: Metric, config: &AnnConfig) -> Result<Index, VectorError> {
    let options = IndexOptions {
        dimensions: dimension,
        metric: match metric {
            Metric::Cosine => MetricKind::Cos,
        },
        quantization: ScalarKind::F32,
        connectivity: config.connectivity,
        expansion_add: config.expansion_add,
        expansion_search: config.expansion_search,
        multi: false,
    };
    let graph = Index::new(&options).map_err(VectorError::backend)?;
    // usearch requires capacity before the first add
    graph
        .reserve(INITIAL_CAPACITY)
        .map_err(VectorError::backend)?;
    Ok(graph)
}

const INITIAL_CAPACITY: usize = 64;

/// Grow the graph so it can hold `needed` slots, doubling to amortize.
fn reserve_for(graph: &Index, needed: usize) -> Result<(), VectorError> {
    if needed > graph.capacity() {
        let target = needed.max(graph.capacity() * 2);
        graph.reserve(target).map_err(VectorError::backend)?;
    }
    Ok(())
}

fn path_str(path: &Path) -> Result<&str, VectorError> {
    path.to_str()
        .ok_or_else(|| VectorError::Backend(format!("non-UTF-8 path: {}", path.display())))
}

/// A directory of approximate collections, one subdirectory per handle.
///
/// Collections must be created (or reopened) with
/// [`create_collection`](Self::create_collection) before any other call on
/// their handle; nothing is created implicitly.
pub struct AnnStore {
    root: PathBuf,
    config: AnnConfig,
    collections: Mutex<HashMap<String, Collection>>,
}

impl AnnStore {
    pub fn open(root: impl Into<PathBuf>, config: AnnConfig) -> Result<Self, VectorError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            config,
            collections: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &AnnConfig {
        &self.config
    }

    /// Create the collection, or reopen it from disk. Idempotent; fails if
    /// the existing collection has another dimension or metric.
    pub fn create_collection(
        &self,
        handle: &CollectionHandle,
        dimension: usize,
        metric: Metric,
    ) -> Result<(), VectorError> {
        let mut collections = self.lock()?;
        if let Some(existing) = collections.get(handle.name()) {
            if existing.file.dimension() != dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: existing.file.dimension(),
                    actual: dimension,
                });
            }
            if existing.file.metric() != metric {
                return Err(VectorError::MetricMismatch {
                    existing: existing.file.metric().to_string(),
                    requested: metric.to_string(),
                });
            }
            return Ok(());
        }

        let dir = self.root.join(handle.name());
        let collection = Collection::open(handle.name(), &dir, dimension, metric, &self.config)?;
        collections.insert(handle.name().to_string(), collection);
        Ok(())
    }

    pub fn upsert(
        &self,
        handle: &CollectionHandle,
        id: &str,
        vector: &[f32],
    ) -> Result<(), VectorError> {
        self.with(handle, |c| c.upsert(id, vector))
    }

    /// Stage a tombstone. Returns `true` iff `id` was present, counting
    /// writes not yet rebuilt.
    pub fn delete(&self, handle: &CollectionHandle, id: &str) -> Result<bool, VectorError> {
        self.with(handle, |c| Ok(c.delete(id)))
    }

    pub fn rebuild(&self, handle: &CollectionHandle) -> Result<(), VectorError> {
        let config = &self.config;
        self.with(handle, |c| c.rebuild(config))
    }

    pub fn search(
        &self,
        handle: &CollectionHandle,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>, VectorError> {
        let config = &self.config;
        self.with(handle, |c| c.search(query, k, config))
    }

    pub fn stats(&self, handle: &CollectionHandle) -> Result<IndexStats, VectorError> {
        self.with(handle, |c| Ok(c.stats()))
    }

    /// Whether writes are waiting for a rebuild.
    pub fn is_dirty(&self, handle: &CollectionHandle) -> Result<bool, VectorError> {
        self.with(handle, |c| Ok(c.dirty))
    }

    fn with<T>(
        &self,
        handle: &CollectionHandle,
        f: impl FnOnce(&mut Collection) -> Result<T, VectorError>,
    ) -> Result<T, VectorError> {
        let mut collections = self.lock()?;
        let collection = collections
            .get_mut(handle.name())
            .ok_or_else(|| VectorError::CollectionNotFound(handle.name().to_string()))?;
        f(collection)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Collection>>, VectorError> {
        self.collections.lock().map_err(|_| VectorError::LockPoisoned)
    }
}

/// One collection of an [`AnnStore`] exposed through [`VectorIndex`].
pub struct ApproximateIndex {
    store: Arc<AnnStore>,
    handle: CollectionHandle,
    dimension: usize,
}

impl ApproximateIndex {
    /// Create or reopen `handle` with the store's default metric.
    pub fn open(
        store: Arc<AnnStore>,
        handle: CollectionHandle,
        dimension: usize,
    ) -> Result<Self, VectorError> {
        let metric = store.config().metric;
        store.create_collection(&handle, dimension, metric)?;
        Ok(Self {
            store,
            handle,
            dimension,
        })
    }

    pub fn handle(&self) -> &CollectionHandle {
        &self.handle
    }

    pub fn is_dirty(&self) -> Result<bool, VectorError> {
        self.store.is_dirty(&self.handle)
    }
}

impl VectorIndex for ApproximateIndex {
    fn name(&self) -> &'static str {
        "approximate"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(&self, id: &str, vector: &[f32]) -> Result<(), VectorError> {
        self.store.upsert(&self.handle, id, vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorError> {
        self.store.search(&self.handle, query, k)
    }

    fn delete(&self, id: &str) -> Result<bool, VectorError> {
        self.store.delete(&self.handle, id)
    }

    fn stats(&self) -> Result<IndexStats, VectorError> {
        self.store.stats(&self.handle)
    }

    fn rebuild(&self) -> Result<(), VectorError> {
        self.store.rebuild(&self.handle)
    }
}
