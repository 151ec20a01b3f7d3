use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::RetrievalConfig;
use crate::memory::store::{fetch_memories, live_vectors};
use crate::memory::types::MemoryType;
use crate::vector::{dot, SearchResult, VectorIndex};

// ── Public types ──────────────────────────────────────────────────────────────

/// A single recalled record with its fused score.
#[derive(Debug, Clone, Serialize)]
pub struct RecallHit {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    pub score: f64,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub created_at: String,
}

/// Response from [`recall`].
#[derive(Debug, Serialize)]
pub struct RecallResponse {
    pub results: Vec<RecallHit>,
    /// `false` when no query embedding was available and scoring fell back
    /// to keyword rank only.
    pub semantic: bool,
    /// Size of the fused candidate set before truncation and filtering.
    pub total_candidates: usize,
}

/// Filters applied after fusion. Filtered-out ids are not backfilled.
#[derive(Debug, Clone, Default)]
pub struct RecallFilter {
    pub memory_type: Option<MemoryType>,
    pub tier: Option<String>,
}

/// Fusion weights and candidate sizing.
#[derive(Debug, Clone)]
pub struct RecallConfig {
    pub limit: usize,
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    pub candidate_multiplier: usize,
}

impl RecallConfig {
    pub fn from_retrieval(config: &RetrievalConfig, limit: Option<usize>) -> Self {
        Self {
            limit: limit.unwrap_or(config.default_max_results),
            semantic_weight: config.semantic_weight,
            keyword_weight: config.keyword_weight,
            candidate_multiplier: config.candidate_multiplier.max(1),
        }
    }

    /// Candidates requested from each signal.
    pub fn candidate_limit(&self) -> usize {
        self.limit.saturating_mul(self.candidate_multiplier)
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self::from_retrieval(&RetrievalConfig::default(), None)
    }
}

/// A fused candidate before hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: String,
    pub score: f64,
    pub semantic_score: f64,
    pub keyword_score: f64,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Hybrid recall: FTS5 keyword rank + vector similarity → weighted fusion →
/// truncate to `limit` → post-filter.
///
/// The database lock is held only around the keyword query and the final
/// hydration, never across `index.search`, so an index that reads the same
/// record store (the exact scan) can take the lock itself. Passing
/// `index = None` scores every live vector in the store directly.
pub fn recall(
    db: &Mutex<Connection>,
    index: Option<&dyn VectorIndex>,
    query_text: &str,
    query_embedding: Option<&[f32]>,
    filter: &RecallFilter,
    config: &RecallConfig,
) -> Result<RecallResponse> {
    let candidate_limit = config.candidate_limit();

    // 1. Keyword candidates
    let keyword_ids = {
        let conn = lock(db)?;
        keyword_search(&conn, query_text, candidate_limit)?
    };
    let keyword = keyword_scores(&keyword_ids);

    // 2. Vector candidates, only when the query could be embedded
    let semantic = match query_embedding {
        Some(embedding) => Some(match index {
            Some(index) => index
                .search(embedding, candidate_limit)
                .with_context(|| format!("{} index search failed", index.name()))?,
            None => {
                let conn = lock(db)?;
                scan_all(&conn, embedding)?
            }
        }),
        None => {
            tracing::debug!("no query embedding, using keyword-only scoring");
            None
        }
    };

    // 3. Fuse and truncate
    let fused = fuse(&keyword, semantic.as_deref(), config);
    let total_candidates = fused.len();
    let top: Vec<FusedCandidate> = fused.into_iter().take(config.limit).collect();

    // 4. Hydrate and post-filter
    let ids: Vec<&str> = top.iter().map(|c| c.id.as_str()).collect();
    let memories = {
        let conn = lock(db)?;
        fetch_memories(&conn, &ids)?
    };

    let results = top
        .into_iter()
        .filter_map(|candidate| {
            let mem = memories.get(&candidate.id)?;
            if mem.archived {
                return None;
            }
            if let Some(ref t) = filter.memory_type {
                if mem.memory_type != *t {
                    return None;
                }
            }
            if let Some(ref tier) = filter.tier {
                if mem.tier.as_deref() != Some(tier.as_str()) {
                    return None;
                }
            }
            Some(RecallHit {
                id: candidate.id,
                memory_type: mem.memory_type.as_str().to_string(),
                title: mem.title.clone(),
                content: mem.content.clone(),
                tags: mem.tags.clone(),
                tier: mem.tier.clone(),
                score: candidate.score,
                semantic_score: candidate.semantic_score,
                keyword_score: candidate.keyword_score,
                created_at: mem.created_at.clone(),
            })
        })
        .collect();

    Ok(RecallResponse {
        results,
        semantic: semantic.is_some(),
        total_candidates,
    })
}

/// FTS5 BM25 keyword search over title, content and tags.
///
/// Returns live record ids, best match first. Terms are OR-ed so a partial
/// overlap still ranks.
pub fn keyword_search(conn: &Connection, query_text: &str, limit: usize) -> Result<Vec<String>> {
    let escaped = escape_fts_query(query_text);
    if escaped.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT m.id FROM memories_fts \
         JOIN memories m ON m.rowid = memories_fts.rowid \
         WHERE memories_fts MATCH ?1 AND m.archived = 0 \
         ORDER BY memories_fts.rank, m.rowid LIMIT ?2",
    )?;
    let results = stmt
        .query_map(params![escaped, limit as i64], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

/// Inverse-rank keyword scores: `(len - rank) / (len + 1)`.
///
/// Rank 0 scores highest; every listed id scores strictly above zero and
/// strictly below one.
pub fn keyword_scores(ids: &[String]) -> Vec<(String, f64)> {
    let len = ids.len() as f64;
    ids.iter()
        .enumerate()
        .map(|(rank, id)| (id.clone(), (len - rank as f64) / (len + 1.0)))
        .collect()
}

/// Weighted fusion of keyword and semantic candidates.
///
/// With `semantic = Some(..)` the score is
/// `semantic_weight * semantic + keyword_weight * keyword`, a missing signal
/// counting as zero. With `None` the keyword score is used as-is. Ties keep
/// first-arrival order: semantic candidates, then keyword-only ones.
pub fn fuse(
    keyword: &[(String, f64)],
    semantic: Option<&[SearchResult]>,
    config: &RecallConfig,
) -> Vec<FusedCandidate> {
    let mut order: Vec<FusedCandidate> = Vec::new();
    let mut slot: HashMap<String, usize> = HashMap::new();

    for hit in semantic.unwrap_or_default() {
        if slot.contains_key(&hit.id) {
            continue;
        }
        slot.insert(hit.id.clone(), order.len());
        order.push(FusedCandidate {
            id: hit.id.clone(),
            score: 0.0,
            semantic_score: hit.score as f64,
            keyword_score: 0.0,
        });
    }

    for (id, score) in keyword {
        match slot.get(id) {
            Some(&i) => order[i].keyword_score = *score,
            None => {
                slot.insert(id.clone(), order.len());
                order.push(FusedCandidate {
                    id: id.clone(),
                    score: 0.0,
                    semantic_score: 0.0,
                    keyword_score: *score,
                });
            }
        }
    }

    for candidate in &mut order {
        candidate.score = if semantic.is_some() {
            config.semantic_weight * candidate.semantic_score
                + config.keyword_weight * candidate.keyword_score
        } else {
            candidate.keyword_score
        };
    }

    // Stable sort keeps arrival order among equal scores.
    order.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    order
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Escape a user query for FTS5 MATCH syntax.
///
/// Wraps each whitespace-delimited word in double quotes and joins them with
/// `OR`. Strips empty tokens.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Score every live vector of the query's dimension. Used when no index is
/// active.
fn scan_all(conn: &Connection, query: &[f32]) -> Result<Vec<SearchResult>> {
    let mut scored: Vec<SearchResult> = live_vectors(conn, query.len(), None)?
        .into_iter()
        .map(|(id, v)| SearchResult::new(id, dot(query, &v)))
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored)
}

fn lock(db: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store::store_memory;
    use crate::memory::types::NewMemory;
    use crate::vector::ExactScanIndex;
    use std::sync::Arc;

    fn unit(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[hot] = 1.0;
        v
    }

    fn shared_db() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(db::open_memory_database().unwrap()))
    }

    fn insert(db: &Mutex<Connection>, new: NewMemory, embedding: Option<Vec<f32>>) -> String {
        let mut conn = db.lock().unwrap();
        store_memory(&mut conn, &new, embedding.as_deref()).unwrap().id
    }

    fn config(limit: usize) -> RecallConfig {
        RecallConfig {
            limit,
            ..RecallConfig::default()
        }
    }

    #[test]
    fn keyword_scores_are_inverse_rank_in_unit_interval() {
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let scores = keyword_scores(&ids);
        assert_eq!(scores[0].0, "a");
        assert!((scores[0].1 - 0.75).abs() < 1e-12);
        assert!((scores[2].1 - 0.25).abs() < 1e-12);
        assert!(scores.windows(2).all(|w| w[0].1 > w[1].1));
        assert!(scores.iter().all(|(_, s)| *s > 0.0 && *s < 1.0));
    }

    #[test]
    fn fuse_weights_semantic_over_keyword() {
        let keyword = vec![("kw".to_string(), 0.9)];
        let semantic = vec![SearchResult::new("sem", 0.8)];
        let fused = fuse(&keyword, Some(&semantic), &RecallConfig::default());

        assert_eq!(fused[0].id, "sem");
        assert!((fused[0].score - 0.7 * 0.8).abs() < 1e-6);
        assert!((fused[1].score - 0.3 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn fuse_adds_both_signals_for_shared_ids() {
        let keyword = vec![("both".to_string(), 0.5), ("kw".to_string(), 0.4)];
        let semantic = vec![SearchResult::new("both", 0.5), SearchResult::new("sem", 0.6)];
        let fused = fuse(&keyword, Some(&semantic), &RecallConfig::default());

        assert_eq!(fused.len(), 3);
        let both = fused.iter().find(|c| c.id == "both").unwrap();
        assert!((both.score - (0.7 * 0.5 + 0.3 * 0.5)).abs() < 1e-6);
        assert_eq!(fused[0].id, "both");
    }

    #[test]
    fn fuse_without_embedding_is_keyword_only() {
        let keyword = vec![("a".to_string(), 0.6), ("b".to_string(), 0.3)];
        let fused = fuse(&keyword, None, &RecallConfig::default());
        assert_eq!(fused[0].score, 0.6);
        assert_eq!(fused[1].score, 0.3);
    }

    #[test]
    fn fuse_breaks_ties_by_arrival() {
        let semantic = vec![
            SearchResult::new("first", 0.5),
            SearchResult::new("second", 0.5),
        ];
        let fused = fuse(&[], Some(&semantic), &RecallConfig::default());
        assert_eq!(fused[0].id, "first");
        assert_eq!(fused[1].id, "second");
    }

    #[test]
    fn escape_fts_query_quotes_and_ors_terms() {
        assert_eq!(escape_fts_query("quantum \"computer\""), "\"quantum\" OR \"computer\"");
        assert_eq!(escape_fts_query("  \"\" "), "");
    }

    #[test]
    fn keyword_search_skips_archived() {
        let db = shared_db();
        let live = insert(&db, NewMemory::new(MemoryType::Semantic, "quantum computing"), None);
        let gone = insert(&db, NewMemory::new(MemoryType::Semantic, "quantum foam"), None);
        crate::memory::store::archive_memory(&db.lock().unwrap(), &gone).unwrap();

        let ids = keyword_search(&db.lock().unwrap(), "quantum", 10).unwrap();
        assert_eq!(ids, vec![live]);
    }

    #[test]
    fn recall_prefers_semantic_match() {
        let db = shared_db();
        let index = ExactScanIndex::new(Arc::clone(&db), 8, 1000);
        let target = insert(
            &db,
            NewMemory::new(MemoryType::Semantic, "the cat sat on the mat"),
            Some(unit(0)),
        );
        let _other = insert(
            &db,
            NewMemory::new(MemoryType::Semantic, "cat facts and figures"),
            Some(unit(5)),
        );

        let response = recall(
            &db,
            Some(&index),
            "cat",
            Some(&unit(0)),
            &RecallFilter::default(),
            &config(5),
        )
        .unwrap();

        assert!(response.semantic);
        assert_eq!(response.results[0].id, target);
        assert!(response.results[0].semantic_score > 0.99);
    }

    #[test]
    fn recall_falls_back_to_keyword_rank() {
        let db = shared_db();
        let index = ExactScanIndex::new(Arc::clone(&db), 8, 1000);
        let id = insert(
            &db,
            NewMemory::new(MemoryType::Procedural, "deploy pipeline runbook"),
            Some(unit(1)),
        );

        let response = recall(
            &db,
            Some(&index),
            "runbook",
            None,
            &RecallFilter::default(),
            &config(5),
        )
        .unwrap();

        assert!(!response.semantic);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, id);
        assert_eq!(response.results[0].semantic_score, 0.0);
        assert_eq!(response.results[0].score, response.results[0].keyword_score);
    }

    #[test]
    fn type_filter_does_not_backfill() {
        let db = shared_db();
        let index = ExactScanIndex::new(Arc::clone(&db), 8, 1000);
        // Two episodic records outrank the semantic one for this query.
        insert(&db, NewMemory::new(MemoryType::Episodic, "alpha"), Some(unit(0)));
        insert(&db, NewMemory::new(MemoryType::Episodic, "beta"), Some(unit(0)));
        let semantic = insert(&db, NewMemory::new(MemoryType::Semantic, "gamma"), Some(unit(3)));

        let filter = RecallFilter {
            memory_type: Some(MemoryType::Semantic),
            tier: None,
        };
        let truncated = recall(&db, Some(&index), "", Some(&unit(0)), &filter, &config(2)).unwrap();
        assert!(truncated.results.is_empty());

        let wide = recall(&db, Some(&index), "", Some(&unit(0)), &filter, &config(3)).unwrap();
        assert_eq!(wide.results.len(), 1);
        assert_eq!(wide.results[0].id, semantic);
    }

    #[test]
    fn tier_filter_matches_exactly() {
        let db = shared_db();
        let hot = insert(
            &db,
            NewMemory::new(MemoryType::Semantic, "hot cache entry").with_tier("hot"),
            None,
        );
        insert(
            &db,
            NewMemory::new(MemoryType::Semantic, "cold cache entry").with_tier("cold"),
            None,
        );
        let filter = RecallFilter {
            memory_type: None,
            tier: Some("hot".into()),
        };
        let response = recall(&db, None, "cache", None, &filter, &config(5)).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, hot);
    }

    #[test]
    fn no_index_scans_all_live_vectors() {
        let db = shared_db();
        let near = insert(&db, NewMemory::new(MemoryType::Semantic, "one"), Some(unit(2)));
        insert(&db, NewMemory::new(MemoryType::Semantic, "two"), Some(unit(4)));

        let response = recall(
            &db,
            None,
            "",
            Some(&unit(2)),
            &RecallFilter::default(),
            &config(1),
        )
        .unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].id, near);
    }
}
