//! Export pipeline: turns the frames of a timelapse into a video by driving
//! an external encoder, one task per job.
//!
//! Job lifecycle is `pending -> running -> completed | error`. Live progress
//! lives in a [`ProgressOverlay`]; the durable `frames_done` column is only
//! checkpointed now and then and stays below `total_frames` until the job
//! completes.

pub mod encoder;
pub mod manifest;
pub mod progress;

use crate::clock::Clock;
use crate::config::ExportConfig;
use crate::db::models::{ExportJob, ExportParams, ExportRequest, NewExportJob, OutputFormat};
use crate::db::store::Store;
use crate::error::Error;
use anyhow::Result;
use chrono::{DateTime, Utc};
use encoder::RunningEncoder;
use log::{error, info, warn};
pub use progress::ProgressOverlay;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Error message stored on jobs found running at startup
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by server restart";

/// Where the video of a new export is written
pub fn output_path(
    storage_root: &Path,
    timelapse_id: &Uuid,
    format: OutputFormat,
    now: DateTime<Utc>,
) -> PathBuf {
    storage_root.join("exports").join(format!(
        "timelapse_{}_{}.{}",
        timelapse_id,
        now.format("%Y%m%dT%H%M%S_%6f"),
        format.extension()
    ))
}

/// A job moved to running by this controller
struct ClaimedJob {
    job: ExportJob,
    params: ExportParams,
    progress: progress::ProgressGuard,
}

#[derive(Clone)]
pub struct ExportController {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    overlay: ProgressOverlay,
    ffmpeg_path: PathBuf,
    work_dir: PathBuf,
    checkpoint_interval: Duration,
    tail_chars: usize,
}

impl ExportController {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: &ExportConfig) -> Self {
        Self {
            store,
            clock,
            overlay: ProgressOverlay::new(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            work_dir: config.work_dir.clone(),
            checkpoint_interval: Duration::from_secs(config.checkpoint_interval_secs),
            tail_chars: config.diagnostic_tail_chars,
        }
    }

    /// Persist a pending job for `frame_paths`. Fails validation when there
    /// is nothing to export or the request is malformed.
    pub async fn submit(
        &self,
        timelapse_id: Uuid,
        frame_paths: &[PathBuf],
        output_path: PathBuf,
        request: ExportRequest,
    ) -> Result<ExportJob> {
        let job = NewExportJob {
            timelapse_id,
            request,
            total_frames: frame_paths.len() as i32,
            output_path,
        }
        .into_job()?;

        let job = self.store.create_export_job(&job).await?;
        info!(
            "Created export job {} for timelapse {} ({} frames)",
            job.id, timelapse_id, job.total_frames
        );
        Ok(job)
    }

    /// Run the job on its own task
    pub fn spawn(&self, job_id: Uuid, frame_paths: Vec<PathBuf>, output_path: PathBuf) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            controller.run(job_id, &frame_paths, &output_path).await;
        })
    }

    /// Drive one job to a terminal status. Errors end up on the job row,
    /// never in the caller.
    pub async fn run(&self, job_id: Uuid, frame_paths: &[PathBuf], output_path: &Path) {
        let claimed = match self.claim(job_id).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return,
            Err(e) => return self.record_failure(job_id, e).await,
        };

        if let Err(e) = self.encode(&claimed, frame_paths, output_path).await {
            self.record_failure(job_id, e).await;
        }
        // The overlay entry goes only after the terminal status is committed
        drop(claimed);
    }

    async fn record_failure(&self, job_id: Uuid, e: anyhow::Error) {
        error!("Export job {} failed: {:#}", job_id, e);
        if let Err(db_error) = self.store.fail_export(&job_id, &format!("{:#}", e)).await {
            error!(
                "Failed to record error for export job {}: {:#}",
                job_id, db_error
            );
        }
    }

    /// Move a pending job to running. Live progress is tracked from then on,
    /// never for a job some other writer already moved.
    async fn claim(&self, job_id: Uuid) -> Result<Option<ClaimedJob>> {
        let job = self
            .store
            .get_export_job(&job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Export job {} not found", job_id)))?;
        let params = job.params()?;

        if !self.store.mark_export_running(&job_id).await? {
            warn!("Export job {} is no longer pending, not running it", job_id);
            return Ok(None);
        }

        let progress = self.overlay.track(job_id);
        Ok(Some(ClaimedJob {
            job,
            params,
            progress,
        }))
    }

    async fn encode(
        &self,
        claimed: &ClaimedJob,
        frame_paths: &[PathBuf],
        output_path: &Path,
    ) -> Result<()> {
        let ClaimedJob {
            job,
            params,
            progress,
        } = claimed;
        let job_id = job.id;

        let manifest = manifest::write(&self.work_dir, frame_paths, params.fps)?;
        if let Some(dir) = output_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let args = encoder::encoder_args(manifest.path(), params, output_path);
        info!("Starting export job {} -> {}", job_id, output_path.display());
        let mut running = RunningEncoder::spawn(&self.ffmpeg_path, &args, self.tail_chars)?;

        let mut last_checkpoint = Instant::now();
        while let Some(count) = running.next_frame_count().await? {
            let frames_done = progress.advance(count.min(job.total_frames));
            if last_checkpoint.elapsed() >= self.checkpoint_interval {
                self.store.update_export_progress(&job_id, frames_done).await?;
                last_checkpoint = Instant::now();
            }
        }

        let outcome = running.finish().await?;
        drop(manifest);

        if outcome.status.success() {
            if self.store.complete_export(&job_id, self.clock.now()).await? {
                info!("Export job {} completed", job_id);
            } else {
                warn!("Export job {} changed status while encoding", job_id);
            }
            return Ok(());
        }

        let message = if outcome.diagnostics.is_empty() {
            match outcome.status.code() {
                Some(code) => format!("Encoder exited with code {}", code),
                None => "Encoder was terminated by a signal".to_string(),
            }
        } else {
            outcome.diagnostics
        };
        error!("Export job {} failed ({}): {}", job_id, outcome.status, message);
        self.store.fail_export(&job_id, &message).await?;
        Ok(())
    }

    /// Live frame count of a running job
    pub fn live_progress(&self, job_id: &Uuid) -> Option<i32> {
        self.overlay.get(job_id)
    }

    /// Startup reconciliation: nothing is encoding yet, so every job still
    /// marked running was interrupted.
    pub async fn recover(&self) -> Result<u64> {
        let count = self.store.fail_running_exports(INTERRUPTED_MESSAGE).await?;
        if count > 0 {
            warn!("Marked {} interrupted export job(s) as failed", count);
        }
        Ok(count)
    }
}
