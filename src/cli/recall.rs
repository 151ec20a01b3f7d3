use anyhow::Result;
use std::sync::Arc;

use mnemo::config::MnemoConfig;
use mnemo::embedding::Embedder;
use mnemo::memory::search::RecallFilter;
use mnemo::memory::types::MemoryType;
use mnemo::service::MemoryService;
use mnemo::vector::select_index;

use super::open_shared_db;

/// Run a recall from the terminal. No embedding model is bundled, so the
/// query is scored on keywords only.
pub async fn recall(
    config: MnemoConfig,
    query: &str,
    memory_type: Option<MemoryType>,
    tier: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let db = open_shared_db(&config)?;
    let index = select_index(&config, Arc::clone(&db));
    let embedder = Embedder::disabled(config.embedding.dimension);
    let service = MemoryService::new(db, index, embedder, Arc::new(config));

    let filter = RecallFilter { memory_type, tier };
    let response = service.recall(query, filter, limit).await?;

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} result(s) from {} candidate(s){}\n",
        response.results.len(),
        response.total_candidates,
        if response.semantic { "" } else { " (keyword only)" }
    );
    for (i, hit) in response.results.iter().enumerate() {
        let preview: String = hit.content.chars().take(120).collect();
        let ellipsis = if hit.content.chars().count() > 120 { "..." } else { "" };
        println!(
            "  {}. [{}] {} (score: {:.4}, semantic: {:.4}, keyword: {:.4})",
            i + 1,
            hit.memory_type,
            hit.id,
            hit.score,
            hit.semantic_score,
            hit.keyword_score,
        );
        if !hit.title.is_empty() {
            println!("     {}", hit.title);
        }
        println!("     {preview}{ellipsis}");
        println!();
    }
    Ok(())
}
