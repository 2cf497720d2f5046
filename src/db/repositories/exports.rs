use crate::{
    db::models::{ExportJob, ExportJobDb, ExportStatus},
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const COLUMNS: &str = "id, timelapse_id, status, output_format, output_fps, resolution, \
    custom_resolution, crf, total_frames, frames_done, output_path, error_message, \
    created_at, completed_at";

/// Export jobs repository
#[derive(Clone)]
pub struct ExportsRepository {
    pool: Arc<PgPool>,
}

impl ExportsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert a new job row
    pub async fn create(&self, job: &ExportJob) -> Result<ExportJob> {
        info!("Creating export job {} for timelapse {}", job.id, job.timelapse_id);

        let db = ExportJobDb::from(job.clone());

        let result = sqlx::query_as::<_, ExportJobDb>(&format!(
            r#"
            INSERT INTO export_jobs ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(db.id)
        .bind(db.timelapse_id)
        .bind(&db.status)
        .bind(&db.output_format)
        .bind(db.output_fps)
        .bind(&db.resolution)
        .bind(&db.custom_resolution)
        .bind(db.crf)
        .bind(db.total_frames)
        .bind(db.frames_done)
        .bind(&db.output_path)
        .bind(&db.error_message)
        .bind(db.created_at)
        .bind(db.completed_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create export job: {}", e)))?;

        Ok(ExportJob::try_from(result)?)
    }

    /// Get export job by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<ExportJob>> {
        let result = sqlx::query_as::<_, ExportJobDb>(&format!(
            "SELECT {COLUMNS} FROM export_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get export job by ID: {}", e)))?;

        Ok(result.map(ExportJob::try_from).transpose()?)
    }

    /// Jobs of a timelapse, newest first
    pub async fn get_by_timelapse(&self, timelapse_id: &Uuid) -> Result<Vec<ExportJob>> {
        let result = sqlx::query_as::<_, ExportJobDb>(&format!(
            "SELECT {COLUMNS} FROM export_jobs WHERE timelapse_id = $1 ORDER BY created_at DESC"
        ))
        .bind(timelapse_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list export jobs: {}", e)))?;

        Ok(result
            .into_iter()
            .map(ExportJob::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// pending -> running. Returns false if the job was not pending.
    pub async fn mark_running(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE export_jobs SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(ExportStatus::Pending.as_str())
            .bind(ExportStatus::Running.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to mark export running: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Durable progress checkpoint. Never reaches `total_frames` and never
    /// moves backwards.
    pub async fn update_progress(&self, id: &Uuid, frames_done: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE export_jobs
            SET frames_done = GREATEST(frames_done, LEAST($2, total_frames - 1))
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(frames_done)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update export progress: {}", e)))?;

        Ok(())
    }

    /// running -> completed, with `frames_done = total_frames`
    pub async fn complete(&self, id: &Uuid, completed_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'completed', frames_done = total_frames, completed_at = $2,
                error_message = NULL
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to complete export: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Any non-terminal status -> error
    pub async fn fail(&self, id: &Uuid, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET status = 'error', error_message = $2
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to mark export failed: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Reconcile every job left `running` to `error`
    pub async fn fail_running(&self, message: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE export_jobs SET status = 'error', error_message = $1 WHERE status = 'running'",
        )
        .bind(message)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to reconcile running exports: {}", e)))?;

        if result.rows_affected() > 0 {
            warn!("Marked {} interrupted export job(s) as failed", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}
