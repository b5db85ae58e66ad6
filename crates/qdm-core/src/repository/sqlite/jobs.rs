//! Job rows.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::PathBuf;

use super::SqliteRepository;
use crate::model::{Job, JobError, JobFilter, JobId, JobStatus};
use crate::segmenter::Chunk;

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let chunks_json: String = row.get("chunks_json");
    let chunks: Vec<Chunk> = serde_json::from_str(&chunks_json).context("decode chunks_json")?;
    let last_error: Option<JobError> = match row.get::<Option<String>, _>("last_error_json") {
        Some(s) => Some(serde_json::from_str(&s).context("decode last_error_json")?),
        None => None,
    };
    let save_dir: String = row.get("save_dir");
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        url: row.get("url"),
        file_name: row.get("file_name"),
        save_dir: PathBuf::from(save_dir),
        total_size: row.get::<Option<i64>, _>("total_size").map(|v| v as u64),
        bytes_transferred: row.get::<i64, _>("bytes_transferred") as u64,
        status: JobStatus::parse(&status),
        queue_id: row.get("queue_id"),
        priority: row.get::<i64, _>("priority") as u32,
        retry_attempts: row.get::<i64, _>("retry_attempts") as u32,
        speed_limit: row.get::<Option<i64>, _>("speed_limit").map(|v| v as u64),
        category: row.get("category"),
        resumable: row.get("resumable"),
        etag: row.get("etag"),
        last_modified: row.get("last_modified"),
        expected_sha256: row.get("expected_sha256"),
        chunks,
        last_error,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn last_error_json(job: &Job) -> Result<Option<String>> {
    job.last_error
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

impl SqliteRepository {
    pub(super) async fn fetch_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub(super) async fn insert_job(&self, mut job: Job) -> Result<Job> {
        let id = sqlx::query(
            r#"
            INSERT INTO jobs (
                url, file_name, save_dir, total_size, bytes_transferred, status,
                queue_id, priority, retry_attempts, speed_limit, category, resumable,
                etag, last_modified, expected_sha256, chunks_json, last_error_json,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            "#,
        )
        .bind(&job.url)
        .bind(&job.file_name)
        .bind(job.save_dir.to_string_lossy().into_owned())
        .bind(job.total_size.map(|v| v as i64))
        .bind(job.bytes_transferred as i64)
        .bind(job.status.as_str())
        .bind(job.queue_id)
        .bind(job.priority as i64)
        .bind(job.retry_attempts as i64)
        .bind(job.speed_limit.map(|v| v as i64))
        .bind(&job.category)
        .bind(job.resumable)
        .bind(&job.etag)
        .bind(&job.last_modified)
        .bind(&job.expected_sha256)
        .bind(serde_json::to_string(&job.chunks)?)
        .bind(last_error_json(&job)?)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        job.id = id;
        Ok(job)
    }

    pub(super) async fn store_job(&self, job: &Job) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET url = ?1, file_name = ?2, save_dir = ?3, total_size = ?4,
                bytes_transferred = ?5, status = ?6, queue_id = ?7, priority = ?8,
                retry_attempts = ?9, speed_limit = ?10, category = ?11, resumable = ?12,
                etag = ?13, last_modified = ?14, expected_sha256 = ?15,
                chunks_json = ?16, last_error_json = ?17, updated_at = ?18
            WHERE id = ?19
            "#,
        )
        .bind(&job.url)
        .bind(&job.file_name)
        .bind(job.save_dir.to_string_lossy().into_owned())
        .bind(job.total_size.map(|v| v as i64))
        .bind(job.bytes_transferred as i64)
        .bind(job.status.as_str())
        .bind(job.queue_id)
        .bind(job.priority as i64)
        .bind(job.retry_attempts as i64)
        .bind(job.speed_limit.map(|v| v as i64))
        .bind(&job.category)
        .bind(job.resumable)
        .bind(&job.etag)
        .bind(&job.last_modified)
        .bind(&job.expected_sha256)
        .bind(serde_json::to_string(&job.chunks)?)
        .bind(last_error_json(job)?)
        .bind(job.updated_at)
        .bind(job.id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            anyhow::bail!("job {} not stored", job.id);
        }
        Ok(())
    }

    pub(super) async fn remove_job(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub(super) async fn query_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(q) = filter.queue_id {
            qb.push(" AND queue_id = ").push_bind(q);
        }
        if filter.unassigned {
            qb.push(" AND queue_id IS NULL");
        }
        if let Some(url) = &filter.url {
            qb.push(" AND url = ").push_bind(url.clone());
        }
        if !filter.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut sep = qb.separated(", ");
            for s in &filter.statuses {
                sep.push_bind(s.as_str());
            }
            sep.push_unseparated(")");
        }
        qb.push(" ORDER BY priority ASC, id ASC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }
}
