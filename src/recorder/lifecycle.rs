//! User-driven timelapse changes that touch both the durable row and the
//! capture timers.
//!
//! A change that ends capture stops the timers before the row is written, so
//! no tick can observe the old status. Every other change is written first
//! and handed to the scheduler afterwards, so the first tick reads the new
//! row. The row write is compare-and-set on the status that was read.

use crate::db::models::{Timelapse, TimelapseStatus, TimelapseUpdate};
use crate::db::store::Store;
use crate::error::Error;
use crate::recorder::scheduler::{CaptureScheduler, ScheduleAction};
use crate::recorder::storage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::path::Path;
use uuid::Uuid;

/// Load, patch and commit a timelapse, then drive its timers
pub async fn update_timelapse(
    store: &dyn Store,
    scheduler: &CaptureScheduler,
    now: DateTime<Utc>,
    timelapse_id: &Uuid,
    update: TimelapseUpdate,
) -> Result<Timelapse> {
    let current = store
        .get_timelapse(timelapse_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Timelapse not found: {}", timelapse_id)))?;

    apply_update(store, scheduler, now, &current, update).await
}

/// Commit `update` against the `current` row as it was read
pub async fn apply_update(
    store: &dyn Store,
    scheduler: &CaptureScheduler,
    now: DateTime<Utc>,
    current: &Timelapse,
    update: TimelapseUpdate,
) -> Result<Timelapse> {
    let next = update.apply(current)?;
    let action = ScheduleAction::plan(current, &next, now)?;

    if action != ScheduleAction::Stop {
        let updated = store.update_timelapse(current.status, &next).await?;
        scheduler.apply(current.id, action).await?;
        return Ok(updated);
    }

    scheduler.stop(current.id).await;
    match store.update_timelapse(current.status, &next).await {
        Ok(updated) => Ok(updated),
        Err(e) => {
            // The row moved on without us; its timers follow the stored status
            restore_timers(store, scheduler, now, &current.id).await?;
            Err(e)
        }
    }
}

/// Rebuild the timers of one timelapse from its stored row
async fn restore_timers(
    store: &dyn Store,
    scheduler: &CaptureScheduler,
    now: DateTime<Utc>,
    timelapse_id: &Uuid,
) -> Result<()> {
    let Some(timelapse) = store.get_timelapse(timelapse_id).await? else {
        return Ok(());
    };

    match timelapse.status {
        TimelapseStatus::Paused => {
            scheduler.start(timelapse.id, timelapse.interval_seconds).await;
            scheduler.pause(timelapse.id).await;
        }
        _ => {
            scheduler
                .apply(timelapse.id, ScheduleAction::for_new(&timelapse, now))
                .await?
        }
    }
    warn!(
        "Timelapse {} changed concurrently, timers restored for status {}",
        timelapse.id, timelapse.status
    );
    Ok(())
}

/// Stop the timers of a timelapse and remove its files under `root`, ahead
/// of deleting its row (directly or through the camera cascade)
pub async fn release_timelapse(
    store: &dyn Store,
    scheduler: &CaptureScheduler,
    root: &Path,
    timelapse_id: &Uuid,
) -> Result<()> {
    scheduler.stop(*timelapse_id).await;
    storage::delete_timelapse_files(store, root, timelapse_id).await
}

pub async fn delete_timelapse(
    store: &dyn Store,
    scheduler: &CaptureScheduler,
    root: &Path,
    timelapse_id: &Uuid,
) -> Result<bool> {
    release_timelapse(store, scheduler, root, timelapse_id).await?;
    let deleted = store.delete_timelapse(timelapse_id).await?;
    if deleted {
        info!("Deleted timelapse {}", timelapse_id);
    }
    Ok(deleted)
}

/// Release every timelapse of a camera. Returns how many there were.
pub async fn release_camera(
    store: &dyn Store,
    scheduler: &CaptureScheduler,
    root: &Path,
    camera_id: &Uuid,
) -> Result<usize> {
    let timelapses = store.list_timelapses_for_camera(camera_id).await?;
    for timelapse in &timelapses {
        release_timelapse(store, scheduler, root, &timelapse.id).await?;
    }
    Ok(timelapses.len())
}
