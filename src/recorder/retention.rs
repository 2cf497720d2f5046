use crate::clock::Clock;
use crate::config::RetentionConfig;
use crate::db::models::Frame;
use crate::db::store::Store;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

/// Deletes frames older than `settings.retention_days`
pub struct RetentionService {
    config: RetentionConfig,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RetentionService {
    pub fn new(config: RetentionConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Run the sweep in the background until `cancel` fires. Returns `None`
    /// when retention is disabled in the config.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            info!("Frame retention service is disabled");
            return None;
        }

        info!(
            "Starting frame retention service with interval of {} seconds",
            self.config.check_interval_secs
        );

        Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Frame retention service stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cleanup().await {
                            error!("Error running frame retention: {:#}", e);
                        }
                    }
                }
            }
        }))
    }

    /// One sweep. Returns how many frames were removed.
    pub async fn run_cleanup(&self) -> Result<u64> {
        let Some(settings) = self.store.get_settings().await? else {
            return Ok(0);
        };
        let Some(days) = settings.retention_days.filter(|days| *days > 0) else {
            debug!("No retention period configured, keeping every frame");
            return Ok(0);
        };

        let Some(cutoff) = chrono::Duration::try_days(i64::from(days))
            .and_then(|period| self.clock.now().checked_sub_signed(period))
        else {
            warn!(
                "Retention period of {} day(s) reaches past the earliest date, keeping every frame",
                days
            );
            return Ok(0);
        };
        let batch_size = self.config.batch_size.max(1);
        let mut deleted = 0;

        loop {
            let frames = self.store.frames_captured_before(cutoff, batch_size).await?;
            if frames.is_empty() {
                break;
            }

            let mut deleted_in_batch = 0;
            for frame in &frames {
                if self.delete_frame(frame).await? {
                    deleted_in_batch += 1;
                }
            }
            deleted += deleted_in_batch;

            // Frames whose file could not be removed come back in the next
            // query, so stop when a batch makes no progress.
            if deleted_in_batch == 0 || (frames.len() as i64) < batch_size {
                break;
            }
        }

        if deleted > 0 {
            info!(
                "Removed {} frame(s) captured more than {} day(s) ago",
                deleted, days
            );
        }
        Ok(deleted)
    }

    /// File first, then the row
    async fn delete_frame(&self, frame: &Frame) -> Result<bool> {
        let size = match tokio::fs::metadata(&frame.file_path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };

        match tokio::fs::remove_file(&frame.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    "Failed to delete frame file {}: {}",
                    frame.file_path.display(),
                    e
                );
                return Ok(false);
            }
        }

        self.store.delete_frame(&frame.id, size).await
    }
}
