use anyhow::Result;

use mnemo::config::MnemoConfig;
use mnemo::vector::selector::open_approximate;
use mnemo::vector::{backfill, select_index, VectorIndex};

use super::open_shared_db;

/// Print stats of the index this configuration selects.
pub fn stats(config: &MnemoConfig) -> Result<()> {
    let db = open_shared_db(config)?;
    let active = select_index(config, db);
    let stats = active.index().stats()?;

    println!("Vector Index");
    println!("{}", "=".repeat(40));
    println!("  Backend:             {}", active.backend().as_str());
    if let Some(reason) = active.fallback_reason() {
        println!("  Fallback reason:     {reason}");
    }
    println!("  Entries:             {}", stats.count);
    println!("  Dimension:           {}", stats.dimension);
    println!("  Size:                {} bytes", stats.size_bytes);
    if let Some(report) = active.backfill_report() {
        println!(
            "  Backfilled:          {} record(s) in {:.1} ms",
            report.replayed,
            report.elapsed.as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

/// Fold pending writes of the approximate collection.
pub fn rebuild(config: &MnemoConfig) -> Result<()> {
    let index = open_approximate(config)?;
    let started = std::time::Instant::now();
    index.rebuild()?;
    let stats = index.stats()?;
    println!(
        "Rebuilt collection '{}' ({} entries) in {:.1} ms",
        index.handle(),
        stats.count,
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

/// Replay every stored vector into the approximate collection.
pub fn backfill_ann(config: &MnemoConfig) -> Result<()> {
    let db = open_shared_db(config)?;
    let index = open_approximate(config)?;
    let report = backfill(&db, &index)?;
    println!(
        "Backfilled {} record(s) into '{}' ({} skipped) in {:.1} ms",
        report.replayed,
        index.handle(),
        report.skipped,
        report.elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}
