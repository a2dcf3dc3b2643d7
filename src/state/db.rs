//! Database handle

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::migrations;
use super::StateError;
use crate::util::paths;

/// How long a writer waits for another process's write lock before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Readers are concurrent under WAL; SQLite serialises the writers.
const MAX_CONNECTIONS: u32 = 4;

/// Handle to the environment registry. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateDb {
    pub(crate) pool: SqlitePool,
    path: Option<PathBuf>,
}

impl StateDb {
    /// `$XDG_DATA_HOME/arbor/state.db`, else `~/.local/share/arbor/state.db`
    pub fn default_path() -> Result<PathBuf, StateError> {
        paths::data_home()
            .map(|dir| dir.join("arbor").join("state.db"))
            .ok_or(StateError::NoDataDir)
    }

    /// Open the database at the default location
    pub async fn open_default() -> Result<Self, StateError> {
        Self::open(&Self::default_path()?).await
    }

    /// Open or create the database at `path` and run pending migrations
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        if let Some(parent) = parent {
            tokio::fs::create_dir_all(&parent)
                .await
                .map_err(|source| StateError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        debug!(path = %path.display(), "Opened state database");
        Self::init(pool, Some(path)).await
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// Every SQLite connection to `:memory:` sees its own database, so the pool
    /// is pinned to one connection that is never recycled.
    pub async fn open_in_memory() -> Result<Self, StateError> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(pool, None).await
    }

    async fn init(pool: SqlitePool, path: Option<PathBuf>) -> Result<Self, StateError> {
        migrations::migrate(&pool).await?;
        Ok(Self { pool, path })
    }

    /// Database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Highest applied migration
    pub async fn schema_version(&self) -> Result<i64, StateError> {
        migrations::schema_version(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
