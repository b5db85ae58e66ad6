//! SQLite-backed repository.
//!
//! Handles connection and migrations; job and queue CRUD live in `jobs` and
//! `queues`. Schedules, chunk tables and the last error are JSON columns.

mod jobs;
mod queues;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Percent-encode a path for a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len() + 9);
    out.push_str("sqlite://");
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    out
}

#[derive(Clone)]
pub struct SqliteRepository {
    pub(crate) pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Open (or create) `~/.local/state/qdm/qdm.db`.
    pub async fn open_default() -> Result<Self> {
        let dir = crate::logging::state_dir()?;
        Self::open_at(dir.join("qdm.db")).await
    }

    /// Open (or create) the database at `path`, creating parent dirs.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await
            .with_context(|| format!("open database {}", path.display()))?;
        let repo = SqliteRepository { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                concurrency INTEGER NOT NULL,
                schedule_json TEXT NOT NULL,
                retry_on_failure INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                include_paused INTEGER NOT NULL,
                is_running INTEGER NOT NULL,
                is_default INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                file_name TEXT NOT NULL,
                save_dir TEXT NOT NULL,
                total_size INTEGER,
                bytes_transferred INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                queue_id INTEGER,
                priority INTEGER NOT NULL DEFAULT 0,
                retry_attempts INTEGER NOT NULL DEFAULT 0,
                speed_limit INTEGER,
                category TEXT,
                resumable INTEGER NOT NULL DEFAULT 0,
                etag TEXT,
                last_modified TEXT,
                expected_sha256 TEXT,
                chunks_json TEXT NOT NULL DEFAULT '[]',
                last_error_json TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS jobs_queue ON jobs (queue_id, priority);")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
/// In-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<SqliteRepository> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let repo = SqliteRepository { pool };
    repo.migrate().await?;
    Ok(repo)
}
