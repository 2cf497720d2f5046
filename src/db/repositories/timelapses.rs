use crate::{
    db::models::{Timelapse, TimelapseDb, TimelapseStatus},
    error::Error,
};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const COLUMNS: &str =
    "id, camera_id, name, interval_seconds, status, started_at, ended_at, size_bytes, created_at";

/// Timelapses repository
#[derive(Clone)]
pub struct TimelapsesRepository {
    pool: Arc<PgPool>,
}

impl TimelapsesRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn convert(rows: Vec<TimelapseDb>) -> Result<Vec<Timelapse>> {
        Ok(rows
            .into_iter()
            .map(Timelapse::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Create a new timelapse
    pub async fn create(&self, timelapse: &Timelapse) -> Result<Timelapse> {
        info!("Creating new timelapse: {}", timelapse.name);

        let db = TimelapseDb::from(timelapse.clone());

        let result = sqlx::query_as::<_, TimelapseDb>(&format!(
            r#"
            INSERT INTO timelapses ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(db.id)
        .bind(db.camera_id)
        .bind(&db.name)
        .bind(db.interval_seconds)
        .bind(&db.status)
        .bind(db.started_at)
        .bind(db.ended_at)
        .bind(db.size_bytes)
        .bind(db.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create timelapse: {}", e)))?;

        Ok(Timelapse::try_from(result)?)
    }

    /// Get timelapse by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Timelapse>> {
        let result = sqlx::query_as::<_, TimelapseDb>(&format!(
            "SELECT {COLUMNS} FROM timelapses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get timelapse by ID: {}", e)))?;

        Ok(result.map(Timelapse::try_from).transpose()?)
    }

    /// List timelapses, optionally restricted to one camera
    pub async fn get_all(&self, camera_id: Option<Uuid>) -> Result<Vec<Timelapse>> {
        let result = sqlx::query_as::<_, TimelapseDb>(&format!(
            r#"
            SELECT {COLUMNS} FROM timelapses
            WHERE ($1::uuid IS NULL OR camera_id = $1)
            ORDER BY created_at
            "#
        ))
        .bind(camera_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list timelapses: {}", e)))?;

        Self::convert(result)
    }

    /// Get every timelapse in the given status
    pub async fn get_by_status(&self, status: TimelapseStatus) -> Result<Vec<Timelapse>> {
        let result = sqlx::query_as::<_, TimelapseDb>(&format!(
            "SELECT {COLUMNS} FROM timelapses WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get timelapses by status: {}", e)))?;

        Self::convert(result)
    }

    /// Update all user-editable fields of a timelapse, provided its status is
    /// still `expected`. A row that moved on in the meantime is a conflict.
    pub async fn update(&self, expected: TimelapseStatus, timelapse: &Timelapse) -> Result<Timelapse> {
        let db = TimelapseDb::from(timelapse.clone());

        let result = sqlx::query_as::<_, TimelapseDb>(&format!(
            r#"
            UPDATE timelapses
            SET name = $2, interval_seconds = $3, status = $4, started_at = $5, ended_at = $6
            WHERE id = $1 AND status = $7
            RETURNING {COLUMNS}
            "#
        ))
        .bind(db.id)
        .bind(&db.name)
        .bind(db.interval_seconds)
        .bind(&db.status)
        .bind(db.started_at)
        .bind(db.ended_at)
        .bind(expected.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update timelapse: {}", e)))?;

        match result {
            Some(row) => Ok(Timelapse::try_from(row)?),
            None => match self.get_by_id(&timelapse.id).await? {
                Some(current) => Err(Error::InvalidState(format!(
                    "Timelapse {} changed to {} while being updated from {}",
                    timelapse.id, current.status, expected
                ))
                .into()),
                None => Err(Error::NotFound(format!(
                    "Timelapse with ID {} not found",
                    timelapse.id
                ))
                .into()),
            },
        }
    }

    /// Compare-and-set on the status column. Returns false when the row was
    /// not in `from` anymore.
    pub async fn transition(
        &self,
        id: &Uuid,
        from: TimelapseStatus,
        to: TimelapseStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE timelapses SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to update timelapse status: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Sum of bytes captured across all timelapses
    pub async fn total_size_bytes(&self) -> Result<u64> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0)::BIGINT FROM timelapses")
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to sum timelapse sizes: {}", e)))?;

        Ok(total.unwrap_or(0).max(0) as u64)
    }

    /// Delete timelapse. Frames and export rows cascade.
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        info!("Deleting timelapse: {}", id);

        let result = sqlx::query("DELETE FROM timelapses WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete timelapse: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
