use crate::{
    db::models::{Camera, CameraDb},
    error::Error,
};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Cameras repository for handling camera operations
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new camera
    pub async fn create(&self, camera: &Camera) -> Result<Camera> {
        info!("Creating new camera: {}", camera.name);

        let camera_db = CameraDb::from(camera.clone());

        let result = sqlx::query_as::<_, CameraDb>(
            r#"
            INSERT INTO cameras (id, name, connection_type, rtsp_url, device_index, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, name, connection_type, rtsp_url, device_index, enabled, created_at
            "#,
        )
        .bind(camera_db.id)
        .bind(&camera_db.name)
        .bind(&camera_db.connection_type)
        .bind(&camera_db.rtsp_url)
        .bind(camera_db.device_index)
        .bind(camera_db.enabled)
        .bind(camera_db.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create camera: {}", e)))?;

        Ok(Camera::try_from(result)?)
    }

    /// Get camera by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, CameraDb>(
            r#"
            SELECT id, name, connection_type, rtsp_url, device_index, enabled, created_at
            FROM cameras
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by ID: {}", e)))?;

        Ok(result.map(Camera::try_from).transpose()?)
    }

    /// Get all cameras
    pub async fn get_all(&self) -> Result<Vec<Camera>> {
        let result = sqlx::query_as::<_, CameraDb>(
            r#"
            SELECT id, name, connection_type, rtsp_url, device_index, enabled, created_at
            FROM cameras
            ORDER BY created_at
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get cameras: {}", e)))?;

        Ok(result
            .into_iter()
            .map(Camera::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Update camera
    pub async fn update(&self, camera: &Camera) -> Result<Camera> {
        info!("Updating camera: {}", camera.id);

        let camera_db = CameraDb::from(camera.clone());

        let result = sqlx::query_as::<_, CameraDb>(
            r#"
            UPDATE cameras
            SET name = $2, connection_type = $3, rtsp_url = $4, device_index = $5, enabled = $6
            WHERE id = $1
            RETURNING id, name, connection_type, rtsp_url, device_index, enabled, created_at
            "#,
        )
        .bind(camera_db.id)
        .bind(&camera_db.name)
        .bind(&camera_db.connection_type)
        .bind(&camera_db.rtsp_url)
        .bind(camera_db.device_index)
        .bind(camera_db.enabled)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera: {}", e)))?
        .ok_or_else(|| Error::NotFound(format!("Camera with ID {} not found", camera.id)))?;

        Ok(Camera::try_from(result)?)
    }

    /// Delete camera. Timelapses, frames and export rows cascade.
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        info!("Deleting camera: {}", id);

        let result = sqlx::query("DELETE FROM cameras WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete camera: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}
