//! Environment records and queries

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

use super::db::StateDb;
use super::id::{is_hex, short_id};
use super::StateError;

const SELECT_COLUMNS: &str = "SELECT id, backend, backend_id, repo_path, remote_url, \
     branch_name, base_branch, created_at, status FROM environments";

/// Lifecycle of a tracked environment.
///
/// `Provisioning` -> `Ready` | `Failed`; `Ready` | `Failed` -> `Removed`.
/// Nothing leaves `Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Provisioning,
    Ready,
    Failed,
    Removed,
}

impl EnvironmentStatus {
    pub const ALL: [EnvironmentStatus; 4] = [
        EnvironmentStatus::Provisioning,
        EnvironmentStatus::Ready,
        EnvironmentStatus::Failed,
        EnvironmentStatus::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::Provisioning => "provisioning",
            EnvironmentStatus::Ready => "ready",
            EnvironmentStatus::Failed => "failed",
            EnvironmentStatus::Removed => "removed",
        }
    }

    /// Whether a record may move from `self` to `next`. Re-asserting the
    /// current status is always allowed.
    pub fn can_transition_to(self, next: EnvironmentStatus) -> bool {
        use EnvironmentStatus::*;
        self == next
            || matches!(
                (self, next),
                (Provisioning, Ready)
                    | (Provisioning, Failed)
                    | (Ready, Removed)
                    | (Failed, Removed)
            )
    }

    /// Statuses from which `self` is reachable in one step
    fn predecessors(self) -> Vec<EnvironmentStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(self))
            .collect()
    }

    /// Shown by a plain listing; the rest need `--all`
    pub fn is_listed_by_default(self) -> bool {
        matches!(
            self,
            EnvironmentStatus::Provisioning | EnvironmentStatus::Ready
        )
    }

    pub fn default_listing() -> Vec<EnvironmentStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.is_listed_by_default())
            .collect()
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EnvironmentStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StateError::InvalidStatus(s.to_string()))
    }
}

/// A tracked environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// 32 lowercase hex characters
    pub id: String,
    /// Configured backend name (e.g. "local")
    pub backend: String,
    /// Set once, after the backend created the workspace
    pub backend_id: Option<String>,
    pub repo_path: PathBuf,
    pub remote_url: Option<String>,
    pub branch_name: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    pub status: EnvironmentStatus,
}

impl Environment {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Outcome of a short-id lookup
#[derive(Debug, Clone, PartialEq)]
pub enum PrefixLookup {
    Found(Environment),
    NotFound,
    /// Every match, newest first
    Ambiguous(Vec<Environment>),
}

/// Filters for listing; all set filters must hold. Empty means everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub repo_path: Option<PathBuf>,
    pub backend: Option<String>,
    /// Any of these statuses
    pub statuses: Vec<EnvironmentStatus>,
}

impl ListFilter {
    fn push_where(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        let mut conjunction = " WHERE ";
        if let Some(repo) = &self.repo_path {
            query
                .push(conjunction)
                .push("repo_path = ")
                .push_bind(repo.to_string_lossy().into_owned());
            conjunction = " AND ";
        }
        if let Some(backend) = &self.backend {
            query
                .push(conjunction)
                .push("backend = ")
                .push_bind(backend.clone());
            conjunction = " AND ";
        }
        if !self.statuses.is_empty() {
            query.push(conjunction).push("status IN (");
            let mut separated = query.separated(", ");
            for status in &self.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
    }
}

/// Multi-line explanation of an ambiguous prefix, one candidate per line,
/// noting which candidates a default listing would hide.
pub fn describe_ambiguous(prefix: &str, candidates: &[Environment]) -> String {
    let mut out = format!(
        "ambiguous environment ID {:?}: matches {} environments\n\nMatching environments:\n",
        prefix,
        candidates.len()
    );
    for env in candidates {
        let visibility = if env.status.is_listed_by_default() {
            "visible"
        } else {
            "hidden, use --all to see"
        };
        out.push_str(&format!(
            "  {}  {:<12}  {}  ({})\n",
            env.short_id(),
            env.status,
            env.created_at.format("%Y-%m-%d %H:%M:%S"),
            visibility
        ));
    }
    out.push_str("\nHint: use a longer prefix or run \"arbor list --all\" to see hidden environments");
    out
}

// Fixed width so that text order in SQLite equals time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StateError::CorruptRow {
            id: id.to_string(),
            reason: format!("created_at {raw:?}: {e}"),
        })
}

fn environment_from_row(row: &SqliteRow) -> Result<Environment, StateError> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let status: String = row.try_get("status")?;
    let repo_path: String = row.try_get("repo_path")?;

    Ok(Environment {
        created_at: parse_timestamp(&id, &created_at)?,
        status: status.parse()?,
        backend: row.try_get("backend")?,
        backend_id: row.try_get("backend_id")?,
        repo_path: PathBuf::from(repo_path),
        remote_url: row.try_get("remote_url")?,
        branch_name: row.try_get("branch_name")?,
        base_branch: row.try_get("base_branch")?,
        id,
    })
}

/// Smallest string greater than every string starting with `prefix`
fn prefix_upper_bound(prefix: &str) -> String {
    let mut upper: Vec<char> = prefix.chars().collect();
    if let Some(last) = upper.pop() {
        // Hex digits are ASCII, so the successor is always a valid char.
        upper.push(char::from_u32(last as u32 + 1).unwrap_or(char::MAX));
    }
    upper.into_iter().collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl StateDb {
    /// Insert a new record. An existing id is a conflict, never overwritten.
    pub async fn create_environment(&self, env: &Environment) -> Result<(), StateError> {
        if env.id.is_empty() {
            return Err(StateError::MissingId);
        }

        let result = sqlx::query(
            "INSERT INTO environments (
                id, backend, backend_id, repo_path, remote_url,
                branch_name, base_branch, created_at, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&env.id)
        .bind(&env.backend)
        .bind(non_empty(&env.backend_id))
        .bind(env.repo_path.to_string_lossy().into_owned())
        .bind(non_empty(&env.remote_url))
        .bind(&env.branch_name)
        .bind(&env.base_branch)
        .bind(format_timestamp(&env.created_at))
        .bind(env.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(env_id = %env.id, status = %env.status, "Environment recorded");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StateError::AlreadyExists(env.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Exact lookup by full id
    pub async fn get_environment(&self, id: &str) -> Result<Environment, StateError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => environment_from_row(&row),
            None => Err(StateError::NotFound(id.to_string())),
        }
    }

    /// Lookup by id prefix, reporting every candidate when it is ambiguous.
    ///
    /// The prefix must be non-empty hex; it is matched case-insensitively.
    pub async fn get_environment_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<PrefixLookup, StateError> {
        if !is_hex(prefix) {
            return Err(StateError::InvalidPrefix(prefix.to_string()));
        }
        let lower = prefix.to_ascii_lowercase();
        let upper = prefix_upper_bound(&lower);

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE id >= ? AND id < ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(&lower)
        .bind(&upper)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = rows
            .iter()
            .map(environment_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match matches.len() {
            0 => PrefixLookup::NotFound,
            1 => PrefixLookup::Found(matches.remove(0)),
            _ => PrefixLookup::Ambiguous(matches),
        })
    }

    /// Overwrite the mutable fields of an existing record.
    ///
    /// The status change must be allowed by the lifecycle and a recorded
    /// `backend_id` can be neither changed nor cleared. Both rules are part of
    /// the guarded `UPDATE`, so a concurrent writer cannot slip between a check
    /// and the write.
    pub async fn update_environment(&self, env: &Environment) -> Result<(), StateError> {
        let backend_id = non_empty(&env.backend_id);

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE environments SET backend = ");
        query
            .push_bind(env.backend.clone())
            .push(", backend_id = ")
            .push_bind(backend_id.map(str::to_string))
            .push(", repo_path = ")
            .push_bind(env.repo_path.to_string_lossy().into_owned())
            .push(", remote_url = ")
            .push_bind(non_empty(&env.remote_url).map(str::to_string))
            .push(", branch_name = ")
            .push_bind(env.branch_name.clone())
            .push(", base_branch = ")
            .push_bind(env.base_branch.clone())
            .push(", status = ")
            .push_bind(env.status.as_str())
            .push(" WHERE id = ")
            .push_bind(env.id.clone())
            .push(" AND (backend_id IS NULL OR backend_id = ")
            .push_bind(backend_id.map(str::to_string))
            .push(") AND status IN (");
        let mut separated = query.separated(", ");
        for status in env.status.predecessors() {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");

        let affected = query.build().execute(&self.pool).await?.rows_affected();
        if affected == 1 {
            debug!(env_id = %env.id, status = %env.status, "Environment updated");
            return Ok(());
        }

        // Nothing matched: work out which rule rejected the write.
        let current = self.get_environment(&env.id).await?;
        if !current.status.can_transition_to(env.status) {
            return Err(StateError::InvalidTransition {
                id: env.id.clone(),
                from: current.status,
                to: env.status,
            });
        }
        if current.backend_id.is_some() && current.backend_id.as_deref() != backend_id {
            return Err(StateError::BackendIdImmutable(env.id.clone()));
        }
        Err(StateError::ConcurrentUpdate(env.id.clone()))
    }

    /// Delete a record by full id
    pub async fn delete_environment(&self, id: &str) -> Result<(), StateError> {
        let affected = sqlx::query("DELETE FROM environments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StateError::NotFound(id.to_string()));
        }
        debug!(env_id = %id, "Environment deleted");
        Ok(())
    }

    /// Records matching `filter`, newest first
    pub async fn list_environments(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<Environment>, StateError> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        filter.push_where(&mut query);
        query.push(" ORDER BY created_at DESC, rowid DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(environment_from_row).collect()
    }

    /// Number of records matching `filter`
    pub async fn count_environments(&self, filter: &ListFilter) -> Result<u64, StateError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM environments");
        filter.push_where(&mut query);

        let count: i64 = query.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}
