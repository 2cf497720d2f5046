use crate::{
    db::models::{Settings, SettingsDb},
    error::Error,
};
use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

const COLUMNS: &str = "id, timezone, storage_path, max_storage_gb, ffmpeg_timeout_seconds, \
    ffmpeg_rtsp_transport, capture_image_format, capture_image_quality, \
    default_capture_interval_seconds, max_frames_per_timelapse, retention_days";

/// Repository for the singleton settings row
#[derive(Clone)]
pub struct SettingsRepository {
    pool: Arc<PgPool>,
}

impl SettingsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Read the settings row, if it exists
    pub async fn get(&self) -> Result<Option<Settings>> {
        let result = sqlx::query_as::<_, SettingsDb>(&format!(
            "SELECT {COLUMNS} FROM app_settings WHERE id = 1"
        ))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get settings: {}", e)))?;

        Ok(result.map(Settings::try_from).transpose()?)
    }

    /// Read the settings row, inserting the defaults on first use
    pub async fn get_or_create(&self) -> Result<Settings> {
        if let Some(settings) = self.get().await? {
            return Ok(settings);
        }

        info!("Creating default settings row");
        let defaults = SettingsDb::from(Settings::default());
        sqlx::query(
            r#"
            INSERT INTO app_settings (id, timezone, storage_path, ffmpeg_timeout_seconds,
                ffmpeg_rtsp_transport, capture_image_format, capture_image_quality,
                default_capture_interval_seconds)
            VALUES (1, $1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&defaults.timezone)
        .bind(&defaults.storage_path)
        .bind(defaults.ffmpeg_timeout_seconds)
        .bind(&defaults.ffmpeg_rtsp_transport)
        .bind(&defaults.capture_image_format)
        .bind(defaults.capture_image_quality)
        .bind(defaults.default_capture_interval_seconds)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create settings: {}", e)))?;

        self.get()
            .await?
            .ok_or_else(|| Error::Database("Settings row missing after insert".to_string()).into())
    }

    /// Overwrite the settings row
    pub async fn update(&self, settings: &Settings) -> Result<Settings> {
        info!("Updating application settings");

        let db = SettingsDb::from(settings.clone());

        let result = sqlx::query_as::<_, SettingsDb>(&format!(
            r#"
            INSERT INTO app_settings ({COLUMNS})
            VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                timezone = EXCLUDED.timezone,
                storage_path = EXCLUDED.storage_path,
                max_storage_gb = EXCLUDED.max_storage_gb,
                ffmpeg_timeout_seconds = EXCLUDED.ffmpeg_timeout_seconds,
                ffmpeg_rtsp_transport = EXCLUDED.ffmpeg_rtsp_transport,
                capture_image_format = EXCLUDED.capture_image_format,
                capture_image_quality = EXCLUDED.capture_image_quality,
                default_capture_interval_seconds = EXCLUDED.default_capture_interval_seconds,
                max_frames_per_timelapse = EXCLUDED.max_frames_per_timelapse,
                retention_days = EXCLUDED.retention_days
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&db.timezone)
        .bind(&db.storage_path)
        .bind(db.max_storage_gb)
        .bind(db.ffmpeg_timeout_seconds)
        .bind(&db.ffmpeg_rtsp_transport)
        .bind(&db.capture_image_format)
        .bind(db.capture_image_quality)
        .bind(db.default_capture_interval_seconds)
        .bind(db.max_frames_per_timelapse)
        .bind(db.retention_days)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update settings: {}", e)))?;

        Ok(Settings::try_from(result)?)
    }
}
