//! Async facade over the record store, the embedder and the active index.
//!
//! Every write persists the record first and then updates the vector index
//! on a best-effort basis: the record store is the source of truth, and an
//! index that missed a write is repaired by backfill. Blocking work (SQLite,
//! embedding, index rebuilds) runs under `tokio::task::spawn_blocking`.

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::MnemoConfig;
use crate::embedding::Embedder;
use crate::memory::search::{recall, RecallConfig, RecallFilter, RecallResponse};
use crate::memory::store::{
    archive_memory, delete_memory, get_memory, store_memory, update_memory, VectorChange,
};
use crate::memory::types::{embedding_text, Memory, MemoryUpdate, NewMemory};
use crate::vector::{ActiveIndex, IndexStats, VectorIndex};

/// How `forget` removes a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetMode {
    /// Keep the row but exclude it from every search.
    Archive,
    /// Remove the row.
    Delete,
}

#[derive(Clone)]
pub struct MemoryService {
    db: Arc<Mutex<Connection>>,
    index: ActiveIndex,
    embedder: Embedder,
    config: Arc<MnemoConfig>,
}

impl MemoryService {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        index: ActiveIndex,
        embedder: Embedder,
        config: Arc<MnemoConfig>,
    ) -> Self {
        Self {
            db,
            index,
            embedder,
            config,
        }
    }

    pub fn active_index(&self) -> &ActiveIndex {
        &self.index
    }

    /// Store a new record and hand its vector to the index.
    pub async fn remember(&self, new: NewMemory) -> Result<Memory> {
        let embedding = self.embed(new.embedding_text()).await?;

        let db = Arc::clone(&self.db);
        let vector = embedding.clone();
        let memory = blocking(move || {
            let mut conn = lock(&db)?;
            store_memory(&mut conn, &new, vector.as_deref())
        })
        .await
        .context("store failed")?;

        if let Some(v) = embedding {
            self.index_upsert(memory.id.clone(), v).await;
        }
        info!(id = %memory.id, has_embedding = memory.has_embedding, "memory remembered");
        Ok(memory)
    }

    /// Apply a partial update, re-embedding when the text changes.
    pub async fn revise(&self, id: &str, update: MemoryUpdate) -> Result<Memory> {
        let embedding = if update.touches_text() {
            let db = Arc::clone(&self.db);
            let lookup = id.to_string();
            let current = blocking(move || {
                let conn = lock(&db)?;
                get_memory(&conn, &lookup)
            })
            .await?
                .ok_or_else(|| anyhow!("memory not found: {id}"))?;
            let title = update.title.as_deref().unwrap_or(&current.title);
            let content = update.content.as_deref().unwrap_or(&current.content);
            self.embed(embedding_text(title, content)).await?
        } else {
            None
        };

        let db = Arc::clone(&self.db);
        let target = id.to_string();
        let vector = embedding.clone();
        let outcome = blocking(move || {
            let mut conn = lock(&db)?;
            update_memory(&mut conn, &target, &update, vector.as_deref())
        })
        .await
        .context("update failed")?;

        match (outcome.vector, embedding) {
            (VectorChange::Replaced, Some(v)) => self.index_upsert(id.to_string(), v).await,
            (VectorChange::Cleared, _) => self.index_delete(id.to_string()).await,
            _ => {}
        }
        Ok(outcome.memory)
    }

    /// Archive or delete a record and drop it from the index. Returns
    /// `false` if there was nothing to forget.
    pub async fn forget(&self, id: &str, mode: ForgetMode) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let target = id.to_string();
        let forgotten = blocking(move || {
            let mut conn = lock(&db)?;
            match mode {
                ForgetMode::Archive => archive_memory(&conn, &target),
                ForgetMode::Delete => delete_memory(&mut conn, &target),
            }
        })
        .await
        .context("forget failed")?;

        if forgotten {
            self.index_delete(id.to_string()).await;
            info!(id = %id, ?mode, "memory forgotten");
        }
        Ok(forgotten)
    }

    /// Hybrid recall through the active index. Falls back to keyword-only
    /// scoring when the query cannot be embedded.
    pub async fn recall(
        &self,
        query: &str,
        filter: RecallFilter,
        limit: Option<usize>,
    ) -> Result<RecallResponse> {
        let query_embedding = self.embed(query.to_string()).await?;
        let config = RecallConfig::from_retrieval(&self.config.retrieval, limit);

        let db = Arc::clone(&self.db);
        let index = Arc::clone(self.index.index());
        let query = query.to_string();
        let response = blocking(move || {
            recall(
                &db,
                Some(index.as_ref()),
                &query,
                query_embedding.as_deref(),
                &filter,
                &config,
            )
        })
        .await?;

        info!(
            results = response.results.len(),
            semantic = response.semantic,
            candidates = response.total_candidates,
            "recall complete"
        );
        Ok(response)
    }

    pub async fn index_stats(&self) -> Result<IndexStats> {
        let index = Arc::clone(self.index.index());
        blocking(move || Ok(index.stats()?)).await
    }

    /// Fold pending index writes now instead of on the next search.
    pub async fn rebuild_index(&self) -> Result<()> {
        let index = Arc::clone(self.index.index());
        blocking(move || Ok(index.rebuild()?)).await
    }

    async fn embed(&self, text: String) -> Result<Option<Vec<f32>>> {
        if !self.embedder.is_available() {
            return Ok(None);
        }
        let embedder = self.embedder.clone();
        tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| anyhow!("embedding task failed: {e}"))
    }

    async fn index_upsert(&self, id: String, vector: Vec<f32>) {
        let index = Arc::clone(self.index.index());
        let result = blocking(move || Ok(index.upsert(&id, &vector)?)).await;
        if let Err(e) = result {
            warn!(error = %e, "index upsert failed, record store still holds the vector");
        }
    }

    async fn index_delete(&self, id: String) {
        let index = Arc::clone(self.index.index());
        let result = blocking(move || Ok(index.delete(&id)?)).await;
        if let Err(e) = result {
            warn!(error = %e, "index delete failed");
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("blocking task failed: {e}"))?
}

fn lock(db: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
    db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::types::MemoryType;

    fn service() -> MemoryService {
        let db = Arc::new(Mutex::new(db::open_memory_database().unwrap()));
        let config = MnemoConfig::default();
        let index = ActiveIndex::exact(Arc::clone(&db), &config);
        let embedder = Embedder::disabled(config.embedding.dimension);
        MemoryService::new(db, index, embedder, Arc::new(config))
    }

    #[tokio::test]
    async fn keyword_only_round_trip() {
        let svc = service();
        let m = svc
            .remember(NewMemory::new(MemoryType::Semantic, "the build uses cargo workspaces"))
            .await
            .unwrap();
        assert!(!m.has_embedding);

        let resp = svc
            .recall("cargo", RecallFilter::default(), None)
            .await
            .unwrap();
        assert!(!resp.semantic);
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0].id, m.id);
    }

    #[tokio::test]
    async fn forget_unknown_id_is_false() {
        let svc = service();
        assert!(!svc.forget("missing", ForgetMode::Delete).await.unwrap());
    }

    #[tokio::test]
    async fn revise_unknown_id_fails() {
        let svc = service();
        let update = MemoryUpdate {
            content: Some("new text".into()),
            ..Default::default()
        };
        assert!(svc.revise("missing", update).await.is_err());
    }
}
