use crate::capture::{CaptureError, CaptureParams, FrameSource};
use crate::clock::Clock;
use crate::db::models::{Frame, TimelapseStatus};
use crate::db::store::Store;
use crate::recorder::storage;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Why a tick did not produce a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TimelapseMissing,
    NotRunning,
    /// Completed by someone else; the timer has nothing left to do
    Completed,
    CameraMissing,
    SettingsMissing,
    CameraDisabled,
    CameraMisconfigured,
    LowDiskSpace { free_bytes: u64 },
    QuotaExceeded { used_bytes: u64, quota_bytes: u64 },
}

/// Result of one capture attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Captured(Frame),
    Skipped(SkipReason),
    /// The timelapse moved to completed; its timer must be cancelled
    AutoCompleted,
    /// Logged and swallowed; the next tick retries
    Failed,
}

impl CaptureOutcome {
    /// No later tick can capture for this timelapse
    pub fn ends_timer(&self) -> bool {
        matches!(
            self,
            CaptureOutcome::AutoCompleted
                | CaptureOutcome::Skipped(SkipReason::Completed)
                | CaptureOutcome::Skipped(SkipReason::TimelapseMissing)
        )
    }
}

/// Performs one guarded capture for a timelapse
pub struct CaptureExecutor {
    store: Arc<dyn Store>,
    source: Arc<dyn FrameSource>,
    clock: Arc<dyn Clock>,
    min_free_bytes: u64,
}

impl CaptureExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn FrameSource>,
        clock: Arc<dyn Clock>,
        min_free_bytes: u64,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            min_free_bytes,
        }
    }

    /// Run one attempt. Never returns an error: failures are logged here and
    /// reported as [`CaptureOutcome::Failed`].
    pub async fn execute(&self, timelapse_id: Uuid) -> CaptureOutcome {
        match self.capture(timelapse_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(capture_error) = e.downcast_ref::<CaptureError>() {
                    warn!("Capture error for timelapse {}: {}", timelapse_id, capture_error);
                } else if let Some(io_error) = e.downcast_ref::<std::io::Error>() {
                    warn!("I/O error for timelapse {}: {}", timelapse_id, io_error);
                } else {
                    error!("Unexpected error for timelapse {}: {:#}", timelapse_id, e);
                }
                CaptureOutcome::Failed
            }
        }
    }

    async fn auto_complete(&self, timelapse_id: Uuid, why: &str) -> Result<CaptureOutcome> {
        let completed = self
            .store
            .transition_timelapse(&timelapse_id, TimelapseStatus::Running, TimelapseStatus::Completed)
            .await?;

        if completed {
            info!("Timelapse {} {} - auto-completing", timelapse_id, why);
            Ok(CaptureOutcome::AutoCompleted)
        } else {
            // Someone else changed the status in the meantime
            Ok(CaptureOutcome::Skipped(SkipReason::NotRunning))
        }
    }

    async fn capture(&self, timelapse_id: Uuid) -> Result<CaptureOutcome> {
        let Some(timelapse) = self.store.get_timelapse(&timelapse_id).await? else {
            return Ok(CaptureOutcome::Skipped(SkipReason::TimelapseMissing));
        };
        match timelapse.status {
            TimelapseStatus::Running => {}
            TimelapseStatus::Completed => return Ok(CaptureOutcome::Skipped(SkipReason::Completed)),
            _ => return Ok(CaptureOutcome::Skipped(SkipReason::NotRunning)),
        }

        if timelapse.has_ended(self.clock.now()) {
            return self.auto_complete(timelapse_id, "reached end time").await;
        }

        let Some(camera) = self.store.get_camera(&timelapse.camera_id).await? else {
            return Ok(CaptureOutcome::Skipped(SkipReason::CameraMissing));
        };
        let Some(settings) = self.store.get_settings().await? else {
            return Ok(CaptureOutcome::Skipped(SkipReason::SettingsMissing));
        };

        if !camera.enabled {
            debug!("Camera {} is disabled, skipping timelapse {}", camera.id, timelapse_id);
            return Ok(CaptureOutcome::Skipped(SkipReason::CameraDisabled));
        }

        if let Some(max_frames) = settings.max_frames_per_timelapse {
            let count = self.store.count_frames(&timelapse_id).await?;
            if count >= max_frames.max(0) as u64 {
                return self.auto_complete(timelapse_id, "reached its frame limit").await;
            }
        }

        let source = match camera.source() {
            Ok(source) => source,
            Err(e) => {
                warn!("Timelapse {}: {}", timelapse_id, e);
                return Ok(CaptureOutcome::Skipped(SkipReason::CameraMisconfigured));
            }
        };

        let params = CaptureParams::from_settings(&settings);
        let data = self.source.capture(&source, &params).await?;

        if let Some(free_bytes) = storage::available_space(&settings.storage_path) {
            if free_bytes < self.min_free_bytes {
                warn!(
                    "Low disk space: {} MB free - skipping frame for timelapse {}",
                    free_bytes / (1024 * 1024),
                    timelapse_id
                );
                return Ok(CaptureOutcome::Skipped(SkipReason::LowDiskSpace { free_bytes }));
            }
        }

        if let Some(quota_bytes) = settings.max_storage_bytes() {
            let used_bytes = self.store.total_captured_bytes().await?;
            if used_bytes + data.len() as u64 > quota_bytes {
                warn!(
                    "Storage quota of {} MB reached - skipping frame for timelapse {}",
                    quota_bytes / (1024 * 1024),
                    timelapse_id
                );
                return Ok(CaptureOutcome::Skipped(SkipReason::QuotaExceeded {
                    used_bytes,
                    quota_bytes,
                }));
            }
        }

        let captured_at = self.clock.now();
        let path = storage::frame_path(
            &settings.storage_path,
            &timelapse_id,
            captured_at,
            params.format.extension(),
        );
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, &data).await?;

        let frame = match self
            .store
            .record_frame(&timelapse_id, &path, data.len() as u64, captured_at)
            .await
        {
            Ok(frame) => frame,
            Err(e) => {
                if let Err(remove_error) = tokio::fs::remove_file(&path).await {
                    warn!(
                        "Failed to remove orphaned frame {}: {}",
                        path.display(),
                        remove_error
                    );
                }
                return Err(e);
            }
        };

        debug!(
            "Captured frame for timelapse {} ({} bytes)",
            timelapse_id,
            data.len()
        );
        Ok(CaptureOutcome::Captured(frame))
    }
}
