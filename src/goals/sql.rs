use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use super::{GoalResult, GoalStrategy};
use crate::agent::state::AgentState;
use crate::config::ProjectConfig;
use crate::errors::GoalError;

const DEFAULT_MAX_MS: f64 = 100.0;

/// Why a configured database cannot be benchmarked locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsnError {
    InMemory,
    UnsupportedScheme(String),
}

/// Map a `database`/`dsn` setting to a local SQLite file.
///
/// Accepts plain paths and `sqlite:` URLs in the SQLAlchemy form:
/// `sqlite:///app.db` is relative to the project, `sqlite:////srv/app.db`
/// is absolute. Dialect suffixes (`sqlite+pysqlite`) and query strings are
/// ignored.
pub fn local_database_path(raw: &str) -> Result<PathBuf, DsnError> {
    let raw = raw.trim();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return Ok(PathBuf::from(raw));
    };
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "sqlite" && !scheme.starts_with("sqlite+") {
        return Err(DsnError::UnsupportedScheme(scheme));
    }
    let rest = rest.split('?').next().unwrap_or_default();
    let path = rest.strip_prefix('/').unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return Err(DsnError::InMemory);
    }
    Ok(PathBuf::from(path))
}

/// Optimise a SQL query against a local SQLite database until it runs
/// under `max_ms` (and returns `expected_rows`, when set).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlBenchmarkGoal;

impl SqlBenchmarkGoal {
    async fn load_query(config: &ProjectConfig, cwd: &Path) -> Result<String, GoalResult> {
        if let Some(file) = config.query_file.as_deref() {
            return tokio::fs::read_to_string(cwd.join(file))
                .await
                .map_err(|e| {
                    GoalResult::not_achieved(
                        format!("Query file not readable: {} ({})", file, e),
                        json!({"error": "file_not_found"}),
                    )
                });
        }
        Ok(config
            .query
            .clone()
            .unwrap_or_else(|| "SELECT 1".to_string()))
    }

    /// Execute `query` and drain its rows, returning (row count, elapsed ms).
    async fn time_query(database: &Path, query: &str) -> Result<(usize, f64), libsql::Error> {
        let db = libsql::Builder::new_local(database).build().await?;
        let conn = db.connect()?;

        let start = Instant::now();
        let mut rows = conn.query(query, ()).await?;
        let mut count = 0usize;
        while rows.next().await?.is_some() {
            count += 1;
        }
        Ok((count, start.elapsed().as_secs_f64() * 1000.0))
    }
}

#[async_trait]
impl GoalStrategy for SqlBenchmarkGoal {
    fn name(&self) -> &str {
        "sql-benchmark"
    }

    async fn check(&self, _state: &AgentState, cwd: &Path) -> Result<GoalResult, GoalError> {
        let config = ProjectConfig::load_or_default_async(cwd).await;
        let Some(target) = config.database_target() else {
            return Ok(GoalResult::not_achieved(
                "No 'dsn' or 'database' configured in .retrai.yml",
                json!({"error": "missing_config"}),
            ));
        };
        let database = match local_database_path(target) {
            Ok(path) => cwd.join(path),
            Err(DsnError::InMemory) => {
                return Ok(GoalResult::not_achieved(
                    "An in-memory database cannot be benchmarked; point 'dsn' at a SQLite file",
                    json!({"error": "unsupported_dsn"}),
                ));
            }
            Err(DsnError::UnsupportedScheme(scheme)) => {
                return Ok(GoalResult::not_achieved(
                    format!(
                        "Unsupported database scheme '{}': only local SQLite databases (sqlite:///path) can be benchmarked",
                        scheme
                    ),
                    json!({"error": "unsupported_dsn", "scheme": scheme}),
                ));
            }
        };
        if !tokio::fs::try_exists(&database).await.unwrap_or(false) {
            return Ok(GoalResult::not_achieved(
                format!("Database file not found: {}", database.display()),
                json!({"error": "database_not_found"}),
            ));
        }

        let query = match Self::load_query(&config, cwd).await {
            Ok(query) => query,
            Err(result) => return Ok(result),
        };
        let max_ms = config.max_ms.unwrap_or(DEFAULT_MAX_MS);

        let (row_count, elapsed_ms) = match Self::time_query(&database, &query).await {
            Ok(measured) => measured,
            Err(e) => {
                return Ok(GoalResult::not_achieved(
                    format!("Query execution failed: {}", e),
                    json!({"error": e.to_string()}),
                ));
            }
        };

        let mut failures = Vec::new();
        if elapsed_ms > max_ms {
            failures.push(format!(
                "query took {:.1}ms (limit: {}ms)",
                elapsed_ms, max_ms
            ));
        }
        if let Some(expected) = config.expected_rows
            && row_count != expected
        {
            failures.push(format!(
                "returned {} rows (expected {})",
                row_count, expected
            ));
        }

        let details = json!({"elapsed_ms": elapsed_ms, "row_count": row_count});
        if failures.is_empty() {
            Ok(GoalResult::achieved(
                format!(
                    "Query completed in {:.1}ms (limit: {}ms), {} rows",
                    elapsed_ms, max_ms, row_count
                ),
                details,
            ))
        } else {
            Ok(GoalResult::not_achieved(failures.join("; "), details))
        }
    }

    fn system_prompt(&self, cwd: &Path) -> String {
        let config = ProjectConfig::load_or_default(cwd);
        let target = config.query_file.as_deref().unwrap_or("the SQL query");
        let max_ms = config.max_ms.unwrap_or(DEFAULT_MAX_MS);
        let base = format!(
            "Your goal is to optimise {} so it executes in under {}ms.\n\n\
             Strategy:\n\
             1. Read the current SQL query.\n\
             2. Inspect the query plan with EXPLAIN QUERY PLAN.\n\
             3. Look for missing indexes, full-table scans and inefficient JOINs.\n\
             4. Rewrite the query or add indexes.\n\
             5. Re-run the benchmark to verify the improvement.\n\n\
             Rules:\n\
             - Do NOT change the expected result set.\n\
             - Prefer query rewrites over schema changes.\n",
            target, max_ms
        );
        match config.system_prompt.as_deref().map(str::trim) {
            Some(custom) if !custom.is_empty() => format!("{}\n\n{}", custom, base),
            _ => base,
        }
    }
}
