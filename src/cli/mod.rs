pub mod bench;
pub mod index;
pub mod recall;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use mnemo::config::MnemoConfig;
use mnemo::db::schema::{get_embedding_dimension, set_embedding_dimension};

/// Open the configured record store as the shared handle every index uses.
fn open_shared_db(config: &MnemoConfig) -> Result<Arc<Mutex<Connection>>> {
    let db_path = config.resolved_db_path();
    let conn = mnemo::db::open_database(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let dimension = config.embedding.dimension;
    match get_embedding_dimension(&conn)? {
        None => set_embedding_dimension(&conn, dimension)?,
        Some(stored) if stored != dimension => tracing::warn!(
            stored,
            configured = dimension,
            "record store was written with another embedding dimension"
        ),
        Some(_) => {}
    }
    Ok(Arc::new(Mutex::new(conn)))
}
