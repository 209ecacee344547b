pub mod models;
pub mod reconciler;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{AppError, Result};

pub use reconciler::Reconciler;

/// Open the store at `path`. With `create = false` a missing file is a
/// precondition failure pointing at `setup-db`.
pub async fn open(path: &Path, create: bool) -> Result<SqlitePool> {
    if !create && !path.exists() {
        return Err(AppError::MissingInput {
            path: path.to_path_buf(),
            hint: "run `edge-finder setup-db` first".to_string(),
        });
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .foreign_keys(true);

    // Single writer, single reader: one connection is all a run ever uses.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    info!(path = %path.display(), "database opened");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
