use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Live frame counts of running export jobs.
///
/// Overlays the durable `frames_done` column so readers see per-frame
/// progress without a database write per frame. One lock guards the whole
/// map; every critical section is a single map operation.
#[derive(Debug, Clone, Default)]
pub struct ProgressOverlay {
    entries: Arc<Mutex<HashMap<Uuid, i32>>>,
}

impl ProgressOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, i32>> {
        // A poisoned map only ever holds plain counters
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, job_id: &Uuid) -> Option<i32> {
        self.lock().get(job_id).copied()
    }

    /// Record a new count. Counts never go backwards.
    pub fn advance(&self, job_id: Uuid, frames_done: i32) -> i32 {
        let mut entries = self.lock();
        let entry = entries.entry(job_id).or_insert(0);
        *entry = (*entry).max(frames_done);
        *entry
    }

    pub fn remove(&self, job_id: &Uuid) {
        self.lock().remove(job_id);
    }

    /// Start tracking a job; the entry is removed when the guard drops,
    /// whichever way the run ends.
    pub fn track(&self, job_id: Uuid) -> ProgressGuard {
        self.lock().insert(job_id, 0);
        ProgressGuard {
            overlay: self.clone(),
            job_id,
        }
    }
}

pub struct ProgressGuard {
    overlay: ProgressOverlay,
    job_id: Uuid,
}

impl ProgressGuard {
    pub fn advance(&self, frames_done: i32) -> i32 {
        self.overlay.advance(self.job_id, frames_done)
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.overlay.remove(&self.job_id);
    }
}
