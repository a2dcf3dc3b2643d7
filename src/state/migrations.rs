//! Append-only schema migration log
//!
//! Each entry runs once, inside its own `BEGIN IMMEDIATE` transaction, and
//! records its version in `schema_migrations`. The applied check is repeated
//! under the write lock so that two processes opening a fresh database at the
//! same time apply every migration exactly once.

use sqlx::sqlite::SqlitePool;
use tracing::info;

use super::StateError;

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

// New migrations go at the end. Never edit an entry that has shipped.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_environments_table",
        statements: &[
            r#"CREATE TABLE environments (
    id            TEXT PRIMARY KEY,
    backend       TEXT NOT NULL,
    backend_id    TEXT,
    repo_path     TEXT NOT NULL,
    remote_url    TEXT,
    branch_name   TEXT NOT NULL,
    base_branch   TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    status        TEXT NOT NULL
)"#,
            "CREATE INDEX idx_environments_repo ON environments(repo_path)",
            "CREATE INDEX idx_environments_backend ON environments(backend)",
            "CREATE INDEX idx_environments_status ON environments(status)",
        ],
    },
    Migration {
        version: 2,
        name: "index_environments_created_at",
        statements: &["CREATE INDEX idx_environments_created_at ON environments(created_at)"],
    },
];

/// Version of the newest migration this build knows about
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Bring the schema up to date
pub(crate) async fn migrate(pool: &SqlitePool) -> Result<(), StateError> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        )"#,
    )
    .execute(pool)
    .await?;

    let current = schema_version(pool).await?;
    let pending: Vec<&'static Migration> =
        MIGRATIONS.iter().filter(|m| m.version > current).collect();
    for migration in pending {
        let applied = apply(pool.clone(), migration)
            .await
            .map_err(|source| StateError::Migration {
                version: migration.version,
                name: migration.name,
                source,
            })?;
        if applied {
            info!(
                version = migration.version,
                name = migration.name,
                "Applied state migration"
            );
        }
    }
    Ok(())
}

/// Highest applied version, 0 for a fresh database
pub(crate) async fn schema_version(pool: &SqlitePool) -> Result<i64, StateError> {
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Run one migration under the write lock. `false` when another process got
/// there first.
async fn apply(pool: SqlitePool, migration: &'static Migration) -> Result<bool, sqlx::Error> {
    let version = migration.version;
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let already: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_migrations WHERE version = ?")
            .bind(version)
            .fetch_optional(&mut *tx)
            .await?;
    if already.is_some() {
        tx.rollback().await?;
        return Ok(false);
    }

    for statement in migration.statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
        .bind(version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}
