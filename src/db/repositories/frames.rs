use crate::{
    db::models::{Frame, FrameDb},
    error::Error,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Frames repository
#[derive(Clone)]
pub struct FramesRepository {
    pool: Arc<PgPool>,
}

impl FramesRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn convert(rows: Vec<FrameDb>) -> Vec<Frame> {
        rows.into_iter().map(Frame::from).collect()
    }

    /// Insert a frame row on its own, without touching the byte counter
    pub async fn create(&self, frame: &Frame) -> Result<Frame> {
        let db = FrameDb::from(frame.clone());

        let result = sqlx::query_as::<_, FrameDb>(
            r#"
            INSERT INTO frames (id, timelapse_id, file_path, captured_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, timelapse_id, file_path, captured_at
            "#,
        )
        .bind(db.id)
        .bind(db.timelapse_id)
        .bind(&db.file_path)
        .bind(db.captured_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create frame: {}", e)))?;

        Ok(Frame::from(result))
    }

    /// Insert a captured frame and add its size to the owning timelapse in
    /// one transaction.
    pub async fn record(
        &self,
        timelapse_id: &Uuid,
        file_path: &str,
        size_bytes: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Frame> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let updated = sqlx::query("UPDATE timelapses SET size_bytes = size_bytes + $2 WHERE id = $1")
            .bind(timelapse_id)
            .bind(size_bytes as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to update timelapse size: {}", e)))?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Timelapse with ID {} not found", timelapse_id)).into());
        }

        let result = sqlx::query_as::<_, FrameDb>(
            r#"
            INSERT INTO frames (id, timelapse_id, file_path, captured_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, timelapse_id, file_path, captured_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(timelapse_id)
        .bind(file_path)
        .bind(captured_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to insert frame: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit frame: {}", e)))?;

        debug!("Recorded frame {} for timelapse {}", result.id, timelapse_id);
        Ok(Frame::from(result))
    }

    /// Get frame by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Frame>> {
        let result = sqlx::query_as::<_, FrameDb>(
            "SELECT id, timelapse_id, file_path, captured_at FROM frames WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get frame by ID: {}", e)))?;

        Ok(result.map(Frame::from))
    }

    /// Frames of a timelapse in capture order
    pub async fn get_by_timelapse(&self, timelapse_id: &Uuid) -> Result<Vec<Frame>> {
        let result = sqlx::query_as::<_, FrameDb>(
            r#"
            SELECT id, timelapse_id, file_path, captured_at
            FROM frames
            WHERE timelapse_id = $1
            ORDER BY captured_at ASC
            "#,
        )
        .bind(timelapse_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get frames for timelapse: {}", e)))?;

        Ok(Self::convert(result))
    }

    /// Page through all frames in capture order
    pub async fn get_all(&self, timelapse_id: Option<Uuid>, limit: i64, offset: i64) -> Result<Vec<Frame>> {
        let result = sqlx::query_as::<_, FrameDb>(
            r#"
            SELECT id, timelapse_id, file_path, captured_at
            FROM frames
            WHERE ($1::uuid IS NULL OR timelapse_id = $1)
            ORDER BY captured_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(timelapse_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list frames: {}", e)))?;

        Ok(Self::convert(result))
    }

    pub async fn count_by_timelapse(&self, timelapse_id: &Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM frames WHERE timelapse_id = $1")
            .bind(timelapse_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to count frames: {}", e)))?;

        Ok(count.max(0) as u64)
    }

    /// Oldest frames captured before `cutoff`, across all timelapses
    pub async fn get_captured_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Frame>> {
        let result = sqlx::query_as::<_, FrameDb>(
            r#"
            SELECT id, timelapse_id, file_path, captured_at
            FROM frames
            WHERE captured_at < $1
            ORDER BY captured_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get expired frames: {}", e)))?;

        Ok(Self::convert(result))
    }

    /// Correct the stored path of a frame
    pub async fn update_path(&self, id: &Uuid, file_path: &str) -> Result<Frame> {
        let result = sqlx::query_as::<_, FrameDb>(
            r#"
            UPDATE frames SET file_path = $2
            WHERE id = $1
            RETURNING id, timelapse_id, file_path, captured_at
            "#,
        )
        .bind(id)
        .bind(file_path)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update frame: {}", e)))?
        .ok_or_else(|| Error::NotFound(format!("Frame with ID {} not found", id)))?;

        Ok(Frame::from(result))
    }

    /// Delete a frame row and subtract `reclaimed_bytes` from its timelapse
    pub async fn delete(&self, id: &Uuid, reclaimed_bytes: u64) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let timelapse_id: Option<Uuid> =
            sqlx::query_scalar("DELETE FROM frames WHERE id = $1 RETURNING timelapse_id")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::Database(format!("Failed to delete frame: {}", e)))?;

        let Some(timelapse_id) = timelapse_id else {
            return Ok(false);
        };

        sqlx::query(
            "UPDATE timelapses SET size_bytes = GREATEST(size_bytes - $2, 0) WHERE id = $1",
        )
        .bind(timelapse_id)
        .bind(reclaimed_bytes as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to update timelapse size: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit frame deletion: {}", e)))?;

        info!("Deleted frame {} ({} bytes reclaimed)", id, reclaimed_bytes);
        Ok(true)
    }
}
