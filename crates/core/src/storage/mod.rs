use crate::error::ChanbenchError;
use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;

pub mod channel_stats;
pub mod metadata;
pub mod seed;
pub mod sync_runs;
pub mod video_stats;

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| ChanbenchError::StoreUnavailable(e.to_string()))
        .context("sqlx migrations failed")?;
    Ok(())
}

/// `anyhow::Context` for sqlx results: the root cause becomes
/// [`ChanbenchError::StoreUnavailable`] so callers can tell store failures apart.
pub(crate) trait StoreContext<T> {
    fn store_context<C>(self, context: C) -> anyhow::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    fn with_store_context<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> StoreContext<T> for Result<T, sqlx::Error> {
    fn store_context<C>(self, context: C) -> anyhow::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| ChanbenchError::StoreUnavailable(e.to_string()))
            .context(context)
    }

    fn with_store_context<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| ChanbenchError::StoreUnavailable(e.to_string()))
            .with_context(f)
    }
}

/// Owned handle to the persistent store.
///
/// Backed by a single connection, so every read and write is serialized. Sharing one store
/// between several writing processes is not supported.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the database at `database_url` and applies migrations.
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        if let Some(path) = database_file_path(database_url) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ChanbenchError::StoreUnavailable(format!(
                        "failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid DATABASE_URL: {database_url}"))?
            .create_if_missing(true);
        Self::connect(options).await
    }

    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory sqlite options")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> anyhow::Result<Self> {
        // One long-lived connection: in-memory databases live exactly as long as it does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| ChanbenchError::StoreUnavailable(e.to_string()))?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
        tracing::debug!("store closed");
    }
}

fn database_file_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}
