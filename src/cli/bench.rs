use anyhow::{Context, Result};

use mnemo::bench::{self, BenchConfig};

/// Run the benchmark in a scratch directory and print the JSON report.
pub fn bench(config: &BenchConfig) -> Result<()> {
    let root = std::env::temp_dir().join(format!("mnemo-bench-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create {}", root.display()))?;

    let result = bench::run(config, &root);
    if let Err(e) = std::fs::remove_dir_all(&root) {
        tracing::warn!(dir = %root.display(), error = %e, "failed to clean up bench directory");
    }

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
