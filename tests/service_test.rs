mod helpers;

use std::sync::Arc;

use helpers::{approximate_config, test_db, BrokenProvider, HashingProvider, DIM};
use mnemo::config::{IndexBackend, MnemoConfig};
use mnemo::embedding::Embedder;
use mnemo::memory::search::RecallFilter;
use mnemo::memory::types::{MemoryType, MemoryUpdate, NewMemory};
use mnemo::service::{ForgetMode, MemoryService};
use mnemo::vector::select_index;
use tempfile::TempDir;

fn service_with(config: MnemoConfig, embedder: Embedder) -> MemoryService {
    let db = test_db();
    let index = select_index(&config, Arc::clone(&db));
    MemoryService::new(db, index, embedder, Arc::new(config))
}

fn hashing() -> Embedder {
    Embedder::new(Arc::new(HashingProvider), DIM)
}

fn exact_config() -> MnemoConfig {
    let mut config = MnemoConfig::default();
    config.embedding.dimension = DIM;
    config
}

#[tokio::test]
async fn remember_then_recall_semantically() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(approximate_config(tmp.path()), hashing());
    assert_eq!(svc.active_index().backend(), IndexBackend::Approximate);

    let target = svc
        .remember(NewMemory::new(MemoryType::Semantic, "rust borrow checker rules"))
        .await
        .unwrap();
    svc.remember(NewMemory::new(MemoryType::Semantic, "grocery list for tuesday"))
        .await
        .unwrap();
    assert!(target.has_embedding);

    let resp = svc
        .recall("borrow checker", RecallFilter::default(), Some(1))
        .await
        .unwrap();
    assert!(resp.semantic);
    assert_eq!(resp.results[0].id, target.id);
    assert!(resp.results[0].semantic_score > 0.0);
    assert_eq!(svc.index_stats().await.unwrap().count, 2);
}

#[tokio::test]
async fn forgotten_records_disappear_from_the_index() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(approximate_config(tmp.path()), hashing());
    let doomed = svc
        .remember(NewMemory::new(MemoryType::Episodic, "deploy failed at noon"))
        .await
        .unwrap();
    let kept = svc
        .remember(NewMemory::new(MemoryType::Episodic, "deploy succeeded at five"))
        .await
        .unwrap();

    assert!(svc.forget(&doomed.id, ForgetMode::Delete).await.unwrap());
    let resp = svc
        .recall("deploy failed at noon", RecallFilter::default(), None)
        .await
        .unwrap();
    let ids: Vec<&str> = resp.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![kept.id.as_str()]);
    assert_eq!(svc.index_stats().await.unwrap().count, 1);
}

#[tokio::test]
async fn archive_removes_vector_from_exact_scan() {
    let svc = service_with(exact_config(), hashing());
    let m = svc
        .remember(NewMemory::new(MemoryType::Semantic, "sqlite wal mode"))
        .await
        .unwrap();
    assert!(svc.forget(&m.id, ForgetMode::Archive).await.unwrap());
    assert!(!svc.forget(&m.id, ForgetMode::Archive).await.unwrap());

    let resp = svc
        .recall("sqlite wal", RecallFilter::default(), None)
        .await
        .unwrap();
    assert!(resp.results.is_empty());
    assert_eq!(svc.index_stats().await.unwrap().count, 0);
}

#[tokio::test]
async fn revise_reembeds_changed_text() {
    let tmp = TempDir::new().unwrap();
    let svc = service_with(approximate_config(tmp.path()), hashing());
    let m = svc
        .remember(NewMemory::new(MemoryType::Procedural, "restart the worker pool"))
        .await
        .unwrap();
    svc.remember(NewMemory::new(MemoryType::Procedural, "rotate the signing keys"))
        .await
        .unwrap();

    let update = MemoryUpdate {
        content: Some("rotate the signing keys quarterly".into()),
        ..Default::default()
    };
    let revised = svc.revise(&m.id, update).await.unwrap();
    assert!(revised.has_embedding);
    assert_eq!(svc.index_stats().await.unwrap().count, 2);

    let resp = svc
        .recall("quarterly", RecallFilter::default(), Some(1))
        .await
        .unwrap();
    assert_eq!(resp.results[0].id, m.id);
}

#[tokio::test]
async fn broken_embedder_degrades_to_keywords() {
    let svc = service_with(exact_config(), Embedder::new(Arc::new(BrokenProvider), DIM));
    let m = svc
        .remember(NewMemory::new(MemoryType::Semantic, "fallback keeps working"))
        .await
        .unwrap();
    assert!(!m.has_embedding);

    let resp = svc
        .recall("fallback", RecallFilter::default(), None)
        .await
        .unwrap();
    assert!(!resp.semantic);
    assert_eq!(resp.results.len(), 1);
    assert_eq!(resp.results[0].id, m.id);
}

#[tokio::test]
async fn backfill_replays_existing_vectors_on_switch() {
    let tmp = TempDir::new().unwrap();
    let db = test_db();

    // records written while the exact scan was active
    let exact = exact_config();
    let svc = MemoryService::new(
        Arc::clone(&db),
        select_index(&exact, Arc::clone(&db)),
        hashing(),
        Arc::new(exact),
    );
    for text in ["first note", "second note", "third note"] {
        svc.remember(NewMemory::new(MemoryType::Semantic, text))
            .await
            .unwrap();
    }

    let approximate = approximate_config(tmp.path());
    let active = select_index(&approximate, Arc::clone(&db));
    assert_eq!(active.backend(), IndexBackend::Approximate);
    assert_eq!(active.backfill_report().unwrap().replayed, 3);
    assert_eq!(active.index().stats().unwrap().count, 3);
}

#[tokio::test]
async fn punctuation_only_text_is_stored_without_vector() {
    let svc = service_with(exact_config(), hashing());
    let blank = svc
        .remember(NewMemory::new(MemoryType::Semantic, "!!! ???"))
        .await
        .unwrap();
    assert!(!blank.has_embedding);
    let kept = svc
        .remember(NewMemory::new(MemoryType::Semantic, "incident review notes"))
        .await
        .unwrap();

    let resp = svc
        .recall("incident review", RecallFilter::default(), None)
        .await
        .unwrap();
    assert!(resp.semantic);
    assert_eq!(resp.results[0].id, kept.id);
}
