//! The persistence interface consumed by the scheduler, the capture executor,
//! the export controller and the retention service.
//!
//! Every status write issued through this trait is compare-and-set, so a
//! background job can never overwrite a concurrent user change.

use crate::db::models::{Camera, ExportJob, Frame, Settings, Timelapse, TimelapseStatus};
use crate::db::repositories::{
    CamerasRepository, ExportsRepository, FramesRepository, SettingsRepository,
    TimelapsesRepository,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_camera(&self, id: &Uuid) -> Result<Option<Camera>>;

    /// The settings row; `None` until it has been created
    async fn get_settings(&self) -> Result<Option<Settings>>;

    async fn get_timelapse(&self, id: &Uuid) -> Result<Option<Timelapse>>;

    async fn list_timelapses_by_status(&self, status: TimelapseStatus) -> Result<Vec<Timelapse>>;

    /// Set `status = to` only if the row is currently `from`
    async fn transition_timelapse(
        &self,
        id: &Uuid,
        from: TimelapseStatus,
        to: TimelapseStatus,
    ) -> Result<bool>;

    /// Timelapses of one camera, oldest first
    async fn list_timelapses_for_camera(&self, camera_id: &Uuid) -> Result<Vec<Timelapse>>;

    /// Write the editable fields of `timelapse` if its stored status is still
    /// `expected`. Fails with `Error::InvalidState` when it is not.
    async fn update_timelapse(&self, expected: TimelapseStatus, timelapse: &Timelapse) -> Result<Timelapse>;

    /// Delete a timelapse together with its frame and export rows
    async fn delete_timelapse(&self, id: &Uuid) -> Result<bool>;

    /// Frames of a timelapse ordered by capture time
    async fn list_frames(&self, timelapse_id: &Uuid) -> Result<Vec<Frame>>;

    async fn count_frames(&self, timelapse_id: &Uuid) -> Result<u64>;

    /// Bytes captured across every timelapse
    async fn total_captured_bytes(&self) -> Result<u64>;

    /// Insert a frame and add `size_bytes` to its timelapse atomically
    async fn record_frame(
        &self,
        timelapse_id: &Uuid,
        file_path: &Path,
        size_bytes: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Frame>;

    async fn frames_captured_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Frame>>;

    /// Delete a frame row and subtract `reclaimed_bytes` from its timelapse
    async fn delete_frame(&self, id: &Uuid, reclaimed_bytes: u64) -> Result<bool>;

    async fn create_export_job(&self, job: &ExportJob) -> Result<ExportJob>;

    async fn get_export_job(&self, id: &Uuid) -> Result<Option<ExportJob>>;

    /// Jobs of a timelapse, newest first
    async fn list_export_jobs(&self, timelapse_id: &Uuid) -> Result<Vec<ExportJob>>;

    /// pending -> running
    async fn mark_export_running(&self, id: &Uuid) -> Result<bool>;

    /// Coarse durable checkpoint; clamped below `total_frames`
    async fn update_export_progress(&self, id: &Uuid, frames_done: i32) -> Result<()>;

    /// running -> completed, `frames_done = total_frames`
    async fn complete_export(&self, id: &Uuid, completed_at: DateTime<Utc>) -> Result<bool>;

    /// pending|running -> error
    async fn fail_export(&self, id: &Uuid, message: &str) -> Result<bool>;

    /// Every running job -> error; returns how many were reconciled
    async fn fail_running_exports(&self, message: &str) -> Result<u64>;
}

/// `Store` backed by the PostgreSQL repositories
#[derive(Clone)]
pub struct PgStore {
    cameras: CamerasRepository,
    timelapses: TimelapsesRepository,
    frames: FramesRepository,
    exports: ExportsRepository,
    settings: SettingsRepository,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            cameras: CamerasRepository::new(pool.clone()),
            timelapses: TimelapsesRepository::new(pool.clone()),
            frames: FramesRepository::new(pool.clone()),
            exports: ExportsRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_camera(&self, id: &Uuid) -> Result<Option<Camera>> {
        self.cameras.get_by_id(id).await
    }

    async fn get_settings(&self) -> Result<Option<Settings>> {
        self.settings.get().await
    }

    async fn get_timelapse(&self, id: &Uuid) -> Result<Option<Timelapse>> {
        self.timelapses.get_by_id(id).await
    }

    async fn list_timelapses_by_status(&self, status: TimelapseStatus) -> Result<Vec<Timelapse>> {
        self.timelapses.get_by_status(status).await
    }

    async fn transition_timelapse(
        &self,
        id: &Uuid,
        from: TimelapseStatus,
        to: TimelapseStatus,
    ) -> Result<bool> {
        self.timelapses.transition(id, from, to).await
    }

    async fn list_timelapses_for_camera(&self, camera_id: &Uuid) -> Result<Vec<Timelapse>> {
        self.timelapses.get_all(Some(*camera_id)).await
    }

    async fn update_timelapse(&self, expected: TimelapseStatus, timelapse: &Timelapse) -> Result<Timelapse> {
        self.timelapses.update(expected, timelapse).await
    }

    async fn delete_timelapse(&self, id: &Uuid) -> Result<bool> {
        self.timelapses.delete(id).await
    }

    async fn list_frames(&self, timelapse_id: &Uuid) -> Result<Vec<Frame>> {
        self.frames.get_by_timelapse(timelapse_id).await
    }

    async fn count_frames(&self, timelapse_id: &Uuid) -> Result<u64> {
        self.frames.count_by_timelapse(timelapse_id).await
    }

    async fn total_captured_bytes(&self) -> Result<u64> {
        self.timelapses.total_size_bytes().await
    }

    async fn record_frame(
        &self,
        timelapse_id: &Uuid,
        file_path: &Path,
        size_bytes: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Frame> {
        self.frames
            .record(timelapse_id, &file_path.to_string_lossy(), size_bytes, captured_at)
            .await
    }

    async fn frames_captured_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Frame>> {
        self.frames.get_captured_before(cutoff, limit).await
    }

    async fn delete_frame(&self, id: &Uuid, reclaimed_bytes: u64) -> Result<bool> {
        self.frames.delete(id, reclaimed_bytes).await
    }

    async fn create_export_job(&self, job: &ExportJob) -> Result<ExportJob> {
        self.exports.create(job).await
    }

    async fn get_export_job(&self, id: &Uuid) -> Result<Option<ExportJob>> {
        self.exports.get_by_id(id).await
    }

    async fn list_export_jobs(&self, timelapse_id: &Uuid) -> Result<Vec<ExportJob>> {
        self.exports.get_by_timelapse(timelapse_id).await
    }

    async fn mark_export_running(&self, id: &Uuid) -> Result<bool> {
        self.exports.mark_running(id).await
    }

    async fn update_export_progress(&self, id: &Uuid, frames_done: i32) -> Result<()> {
        self.exports.update_progress(id, frames_done).await
    }

    async fn complete_export(&self, id: &Uuid, completed_at: DateTime<Utc>) -> Result<bool> {
        self.exports.complete(id, completed_at).await
    }

    async fn fail_export(&self, id: &Uuid, message: &str) -> Result<bool> {
        self.exports.fail(id, message).await
    }

    async fn fail_running_exports(&self, message: &str) -> Result<u64> {
        self.exports.fail_running(message).await
    }
}
