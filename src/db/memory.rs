//! In-memory [`Store`] for the unit tests.

use crate::db::models::{
    Camera, ExportJob, ExportStatus, Frame, Settings, Timelapse, TimelapseStatus,
};
use crate::db::store::Store;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

struct State {
    cameras: HashMap<Uuid, Camera>,
    timelapses: HashMap<Uuid, Timelapse>,
    frames: HashMap<Uuid, Frame>,
    exports: HashMap<Uuid, ExportJob>,
    settings: Option<Settings>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            cameras: HashMap::new(),
            timelapses: HashMap::new(),
            frames: HashMap::new(),
            exports: HashMap::new(),
            settings: Some(Settings::default()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_frame_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("Memory store lock poisoned".to_string()).into())
    }

    pub fn insert_camera(&self, camera: Camera) -> Result<()> {
        self.lock()?.cameras.insert(camera.id, camera);
        Ok(())
    }

    pub fn remove_camera(&self, id: &Uuid) -> Result<()> {
        self.lock()?.cameras.remove(id);
        Ok(())
    }

    pub fn insert_timelapse(&self, timelapse: Timelapse) -> Result<()> {
        self.lock()?.timelapses.insert(timelapse.id, timelapse);
        Ok(())
    }

    pub fn insert_export_job(&self, job: ExportJob) -> Result<()> {
        self.lock()?.exports.insert(job.id, job);
        Ok(())
    }

    /// Overwrite a timelapse status without the compare-and-set, as a user PATCH would
    pub fn set_timelapse_status(&self, id: &Uuid, status: TimelapseStatus) -> Result<()> {
        if let Some(timelapse) = self.lock()?.timelapses.get_mut(id) {
            timelapse.status = status;
        }
        Ok(())
    }

    pub fn set_settings(&self, settings: Option<Settings>) -> Result<()> {
        self.lock()?.settings = settings;
        Ok(())
    }

    /// Make every subsequent `record_frame` fail, to exercise rollback paths
    pub fn fail_frame_writes(&self, fail: bool) {
        self.fail_frame_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_camera(&self, id: &Uuid) -> Result<Option<Camera>> {
        Ok(self.lock()?.cameras.get(id).cloned())
    }

    async fn get_settings(&self) -> Result<Option<Settings>> {
        Ok(self.lock()?.settings.clone())
    }

    async fn get_timelapse(&self, id: &Uuid) -> Result<Option<Timelapse>> {
        Ok(self.lock()?.timelapses.get(id).cloned())
    }

    async fn list_timelapses_by_status(&self, status: TimelapseStatus) -> Result<Vec<Timelapse>> {
        let mut list: Vec<_> = self
            .lock()?
            .timelapses
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        list.sort_by_key(|t| t.created_at);
        Ok(list)
    }

    async fn transition_timelapse(
        &self,
        id: &Uuid,
        from: TimelapseStatus,
        to: TimelapseStatus,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        match state.timelapses.get_mut(id) {
            Some(timelapse) if timelapse.status == from => {
                timelapse.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_timelapses_for_camera(&self, camera_id: &Uuid) -> Result<Vec<Timelapse>> {
        let mut list: Vec<_> = self
            .lock()?
            .timelapses
            .values()
            .filter(|t| t.camera_id == *camera_id)
            .cloned()
            .collect();
        list.sort_by_key(|t| t.created_at);
        Ok(list)
    }

    async fn update_timelapse(&self, expected: TimelapseStatus, timelapse: &Timelapse) -> Result<Timelapse> {
        let mut state = self.lock()?;
        let Some(current) = state.timelapses.get_mut(&timelapse.id) else {
            return Err(Error::NotFound(format!("Timelapse with ID {} not found", timelapse.id)).into());
        };
        if current.status != expected {
            return Err(Error::InvalidState(format!(
                "Timelapse {} changed to {} while being updated from {}",
                timelapse.id, current.status, expected
            ))
            .into());
        }

        current.name = timelapse.name.clone();
        current.interval_seconds = timelapse.interval_seconds;
        current.status = timelapse.status;
        current.started_at = timelapse.started_at;
        current.ended_at = timelapse.ended_at;
        Ok(current.clone())
    }

    async fn delete_timelapse(&self, id: &Uuid) -> Result<bool> {
        let mut state = self.lock()?;
        state.frames.retain(|_, frame| frame.timelapse_id != *id);
        state.exports.retain(|_, job| job.timelapse_id != *id);
        Ok(state.timelapses.remove(id).is_some())
    }

    async fn list_frames(&self, timelapse_id: &Uuid) -> Result<Vec<Frame>> {
        let mut frames: Vec<_> = self
            .lock()?
            .frames
            .values()
            .filter(|f| f.timelapse_id == *timelapse_id)
            .cloned()
            .collect();
        frames.sort_by_key(|f| f.captured_at);
        Ok(frames)
    }

    async fn count_frames(&self, timelapse_id: &Uuid) -> Result<u64> {
        Ok(self
            .lock()?
            .frames
            .values()
            .filter(|f| f.timelapse_id == *timelapse_id)
            .count() as u64)
    }

    async fn total_captured_bytes(&self) -> Result<u64> {
        Ok(self
            .lock()?
            .timelapses
            .values()
            .map(|t| t.size_bytes.max(0) as u64)
            .sum())
    }

    async fn record_frame(
        &self,
        timelapse_id: &Uuid,
        file_path: &Path,
        size_bytes: u64,
        captured_at: DateTime<Utc>,
    ) -> Result<Frame> {
        if self.fail_frame_writes.load(Ordering::SeqCst) {
            return Err(Error::Database("Simulated write failure".to_string()).into());
        }

        let mut state = self.lock()?;
        let timelapse = state
            .timelapses
            .get_mut(timelapse_id)
            .ok_or_else(|| Error::NotFound(format!("Timelapse with ID {} not found", timelapse_id)))?;
        timelapse.size_bytes += size_bytes as i64;

        let frame = Frame {
            id: Uuid::new_v4(),
            timelapse_id: *timelapse_id,
            file_path: file_path.to_path_buf(),
            captured_at,
        };
        state.frames.insert(frame.id, frame.clone());
        Ok(frame)
    }

    async fn frames_captured_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Frame>> {
        let mut frames: Vec<_> = self
            .lock()?
            .frames
            .values()
            .filter(|f| f.captured_at < cutoff)
            .cloned()
            .collect();
        frames.sort_by_key(|f| f.captured_at);
        frames.truncate(limit.max(0) as usize);
        Ok(frames)
    }

    async fn delete_frame(&self, id: &Uuid, reclaimed_bytes: u64) -> Result<bool> {
        let mut state = self.lock()?;
        let Some(frame) = state.frames.remove(id) else {
            return Ok(false);
        };
        if let Some(timelapse) = state.timelapses.get_mut(&frame.timelapse_id) {
            timelapse.size_bytes = (timelapse.size_bytes - reclaimed_bytes as i64).max(0);
        }
        Ok(true)
    }

    async fn create_export_job(&self, job: &ExportJob) -> Result<ExportJob> {
        self.lock()?.exports.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn get_export_job(&self, id: &Uuid) -> Result<Option<ExportJob>> {
        Ok(self.lock()?.exports.get(id).cloned())
    }

    async fn list_export_jobs(&self, timelapse_id: &Uuid) -> Result<Vec<ExportJob>> {
        let mut jobs: Vec<_> = self
            .lock()?
            .exports
            .values()
            .filter(|j| j.timelapse_id == *timelapse_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn mark_export_running(&self, id: &Uuid) -> Result<bool> {
        let mut state = self.lock()?;
        match state.exports.get_mut(id) {
            Some(job) if job.status == ExportStatus::Pending => {
                job.status = ExportStatus::Running;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_export_progress(&self, id: &Uuid, frames_done: i32) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(job) = state.exports.get_mut(id) {
            if job.status == ExportStatus::Running {
                let clamped = frames_done.min(job.total_frames - 1);
                job.frames_done = job.frames_done.max(clamped);
            }
        }
        Ok(())
    }

    async fn complete_export(&self, id: &Uuid, completed_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.lock()?;
        match state.exports.get_mut(id) {
            Some(job) if job.status == ExportStatus::Running => {
                job.status = ExportStatus::Completed;
                job.frames_done = job.total_frames;
                job.completed_at = Some(completed_at);
                job.error_message = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_export(&self, id: &Uuid, message: &str) -> Result<bool> {
        let mut state = self.lock()?;
        match state.exports.get_mut(id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = ExportStatus::Error;
                job.error_message = Some(message.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_running_exports(&self, message: &str) -> Result<u64> {
        let mut state = self.lock()?;
        let mut count = 0;
        for job in state.exports.values_mut() {
            if job.status == ExportStatus::Running {
                job.status = ExportStatus::Error;
                job.error_message = Some(message.to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timelapse(status: TimelapseStatus) -> Timelapse {
        Timelapse {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            name: "mem".to_string(),
            interval_seconds: 5,
            status,
            started_at: None,
            ended_at: None,
            size_bytes: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let t = timelapse(TimelapseStatus::Paused);
        store.insert_timelapse(t.clone()).unwrap();

        assert!(!store
            .transition_timelapse(&t.id, TimelapseStatus::Running, TimelapseStatus::Completed)
            .await
            .unwrap());
        assert!(store
            .transition_timelapse(&t.id, TimelapseStatus::Paused, TimelapseStatus::Running)
            .await
            .unwrap());
        let reloaded = store.get_timelapse(&t.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TimelapseStatus::Running);
    }

    #[tokio::test]
    async fn update_refuses_a_status_that_moved_on() {
        let store = MemoryStore::new();
        let t = timelapse(TimelapseStatus::Completed);
        store.insert_timelapse(t.clone()).unwrap();

        let mut paused = t.clone();
        paused.status = TimelapseStatus::Paused;
        let err = store
            .update_timelapse(TimelapseStatus::Running, &paused)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidState(_))));
        let reloaded = store.get_timelapse(&t.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, TimelapseStatus::Completed);

        let mut renamed = t.clone();
        renamed.name = "renamed".to_string();
        let updated = store
            .update_timelapse(TimelapseStatus::Completed, &renamed)
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
    }

    #[tokio::test]
    async fn frame_bytes_are_tracked_on_record_and_delete() {
        let store = MemoryStore::new();
        let t = timelapse(TimelapseStatus::Running);
        store.insert_timelapse(t.clone()).unwrap();

        let frame = store
            .record_frame(&t.id, Path::new("/tmp/a.webp"), 500, Utc::now())
            .await
            .unwrap();
        assert_eq!(store.total_captured_bytes().await.unwrap(), 500);

        assert!(store.delete_frame(&frame.id, 500).await.unwrap());
        assert_eq!(store.total_captured_bytes().await.unwrap(), 0);
        assert!(!store.delete_frame(&frame.id, 500).await.unwrap());
    }
}
