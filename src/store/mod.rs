//! Schema creation/migration, pooled connections, and vector similarity.
//!
//! One [`Store`] wraps one `SqlitePool` over one on-disk database file.
//! Multiple processes may open the same file concurrently: WAL journaling
//! plus SQLite's file locking provide the cross-process serialization the
//! spec requires; this crate adds no distributed coordination of its own.

pub(crate) mod vector;

pub use vector::VectorBackend;

use crate::error::{Error, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Pooled SQLite store for one project database file.
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
    vector_backend: VectorBackend,
}

/// Pool/health diagnostics, exposed for operators and tests.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreHealth {
    pub path: String,
    pub size_connections: u32,
    pub idle_connections: usize,
    pub vector_backend: &'static str,
}

impl Store {
    /// Open (creating if absent) the database file at `path`, run pending
    /// migrations, and attempt to load the `vec0` extension.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io("store.open", format!("creating {}: {e}", parent.display())))?;
        }

        let database_url = format!("sqlite:{}", path.display());
        let mut options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| Error::io("store.open", format!("invalid database url: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        // Safe, non-FFI extension loading: sqlx resolves and loads the
        // named shared library per-connection. No `unsafe` needed on our
        // side, keeping `unsafe_code = "forbid"` intact.
        options = options.extension("vec0");

        let pool = match SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(10)
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options.clone())
            .await
        {
            Ok(pool) => pool,
            Err(_) => {
                // vec0 not installed on this host: retry without it and
                // fall back to the pure-Rust cosine backend.
                tracing::warn!("vec0 extension unavailable, falling back to pure-Rust vector backend");
                let options = SqliteConnectOptions::from_str(&database_url)
                    .map_err(|e| Error::io("store.open", format!("invalid database url: {e}")))?
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .foreign_keys(true)
                    .busy_timeout(Duration::from_secs(5))
                    .create_if_missing(true);
                SqlitePoolOptions::new()
                    .min_connections(1)
                    .max_connections(10)
                    .idle_timeout(Duration::from_secs(30))
                    .max_lifetime(Duration::from_secs(1800))
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(|e| Error::io("store.open", format!("connecting: {e}")))?
            }
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::io("store.open", format!("migration failed: {e}")))?;

        let vector_backend = vector::detect(&pool).await;
        if vector_backend == VectorBackend::NativeVec0 {
            vector::ensure_shadow_table(&pool).await?;
        }

        Ok(Self { pool, path: path.to_path_buf(), vector_backend })
    }

    /// Open an in-memory database. Used by tests and by callers that want
    /// a throwaway session (no cross-process sharing is possible or
    /// expected in this mode).
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::io("store.open_in_memory", e.to_string()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| Error::io("store.open_in_memory", e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::io("store.open_in_memory", format!("migration failed: {e}")))?;

        let vector_backend = vector::detect(&pool).await;
        if vector_backend == VectorBackend::NativeVec0 {
            vector::ensure_shadow_table(&pool).await?;
        }

        Ok(Self { pool, path: PathBuf::from(":memory:"), vector_backend })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn vector_backend(&self) -> VectorBackend {
        self.vector_backend
    }

    /// Begin a transaction. Every multi-step write (event append +
    /// projection update, epic creation, reservation batches) goes
    /// through this.
    pub async fn transaction(&self) -> Result<Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| Error::io("store.transaction", e.to_string()))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn health(&self) -> StoreHealth {
        StoreHealth {
            path: self.path.display().to_string(),
            size_connections: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            vector_backend: self.vector_backend.as_str(),
        }
    }

    /// Deterministic on-disk path for a project, per spec §6:
    /// `<base_dir>/<slug>-<hash>/db`.
    pub fn project_db_path(base_dir: &Path, project_key: &str) -> PathBuf {
        let slug = slugify(project_key);
        let hash = stable_hash8(project_key);
        base_dir.join(format!("{slug}-{hash}")).join("db")
    }
}

pub(crate) fn slugify(key: &str) -> String {
    let mut slug: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    slug = slug.trim_matches('-').to_string();
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    if slug.is_empty() {
        slug = "project".to_string();
    }
    // Keep the directory name from growing unbounded for very long paths.
    slug.chars().rev().take(40).collect::<Vec<_>>().into_iter().rev().collect()
}

fn stable_hash8(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(key.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_handles_paths() {
        assert_eq!(slugify("/home/user/my-project"), "home-user-my-project");
        assert_eq!(slugify("C:\\Users\\me"), "c-users-me");
    }

    #[test]
    fn stable_hash8_is_deterministic() {
        assert_eq!(stable_hash8("abc"), stable_hash8("abc"));
        assert_ne!(stable_hash8("abc"), stable_hash8("abd"));
        assert_eq!(stable_hash8("abc").len(), 8);
    }

    #[tokio::test]
    async fn open_in_memory_runs_migrations() {
        let store = Store::open_in_memory().await.expect("open");
        let health = store.health();
        assert_eq!(health.path, ":memory:");
        store.close().await;
    }
}
