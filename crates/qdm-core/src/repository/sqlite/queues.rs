//! Queue rows, plus the `Repository` impl tying both tables together.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::SqliteRepository;
use crate::model::{Job, JobFilter, JobId, Queue, QueueId, Schedule};
use crate::repository::Repository;

fn queue_from_row(row: &SqliteRow) -> Result<Queue> {
    let schedule_json: String = row.get("schedule_json");
    let schedule: Schedule =
        serde_json::from_str(&schedule_json).context("decode schedule_json")?;
    Ok(Queue {
        id: row.get("id"),
        title: row.get("title"),
        concurrency: row.get::<i64, _>("concurrency") as u32,
        schedule,
        retry_on_failure: row.get("retry_on_failure"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        include_paused: row.get("include_paused"),
        is_running: row.get("is_running"),
        is_default: row.get("is_default"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.fetch_job(id).await
    }

    async fn add_job(&self, job: Job) -> Result<Job> {
        self.insert_job(job).await
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        self.store_job(job).await
    }

    async fn delete_job(&self, id: JobId) -> Result<()> {
        self.remove_job(id).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.query_jobs(filter).await
    }

    async fn get_queue(&self, id: QueueId) -> Result<Option<Queue>> {
        let row = sqlx::query("SELECT * FROM queues WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queue_from_row).transpose()
    }

    async fn add_queue(&self, mut queue: Queue) -> Result<Queue> {
        let id = sqlx::query(
            r#"
            INSERT INTO queues (
                title, concurrency, schedule_json, retry_on_failure, retry_count,
                include_paused, is_running, is_default, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&queue.title)
        .bind(queue.concurrency as i64)
        .bind(serde_json::to_string(&queue.schedule)?)
        .bind(queue.retry_on_failure)
        .bind(queue.retry_count as i64)
        .bind(queue.include_paused)
        .bind(queue.is_running)
        .bind(queue.is_default)
        .bind(queue.created_at)
        .bind(queue.updated_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        queue.id = id;
        Ok(queue)
    }

    async fn update_queue(&self, queue: &Queue) -> Result<()> {
        let done = sqlx::query(
            r#"
            UPDATE queues
            SET title = ?1, concurrency = ?2, schedule_json = ?3, retry_on_failure = ?4,
                retry_count = ?5, include_paused = ?6, is_running = ?7, is_default = ?8,
                updated_at = ?9
            WHERE id = ?10
            "#,
        )
        .bind(&queue.title)
        .bind(queue.concurrency as i64)
        .bind(serde_json::to_string(&queue.schedule)?)
        .bind(queue.retry_on_failure)
        .bind(queue.retry_count as i64)
        .bind(queue.include_paused)
        .bind(queue.is_running)
        .bind(queue.is_default)
        .bind(queue.updated_at)
        .bind(queue.id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            anyhow::bail!("queue {} not stored", queue.id);
        }
        Ok(())
    }

    async fn delete_queue(&self, id: QueueId) -> Result<()> {
        sqlx::query("DELETE FROM queues WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<Queue>> {
        let rows = sqlx::query("SELECT * FROM queues ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(queue_from_row).collect()
    }
}
