//! Frame storage layout and volume accounting.

use crate::db::store::Store;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Capacity of the volume holding a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

/// Storage report served by the usage endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StorageUsage {
    pub storage_path: PathBuf,
    pub disk: Option<DiskUsage>,
    /// Bytes held by captured frames according to the database
    pub frames_bytes: u64,
}

/// Nearest existing ancestor, so the volume can be found before the storage
/// root has been created.
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .or_else(|| path.is_relative().then(|| Path::new(".")))
}

/// Volume statistics for `path`, `None` where statvfs is unavailable
pub fn disk_usage(path: &Path) -> Option<DiskUsage> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let target = existing_ancestor(path)?;
        let c_path = CString::new(target.as_os_str().as_bytes()).ok()?;
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();

        // Safety: c_path is NUL-terminated and stat points to writable memory.
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if ret != 0 {
            return None;
        }

        let stat = unsafe { stat.assume_init() };
        let block_size = stat.f_frsize as u64;
        let total = stat.f_blocks as u64 * block_size;
        let free = stat.f_bavail as u64 * block_size;

        Some(DiskUsage {
            total_bytes: total,
            used_bytes: total.saturating_sub(free),
            free_bytes: free,
        })
    }

    #[cfg(not(unix))]
    {
        let _ = existing_ancestor(path);
        None
    }
}

/// Free bytes available to this process on the volume of `path`
pub fn available_space(path: &Path) -> Option<u64> {
    disk_usage(path).map(|usage| usage.free_bytes)
}

/// Directory holding every frame of a timelapse
pub fn timelapse_dir(root: &Path, timelapse_id: &Uuid) -> PathBuf {
    root.join(format!("timelapse_{}", timelapse_id))
}

/// `<root>/timelapse_<id>/frame_<YYYYmmddTHHMMSS_ffffff>.<ext>`
///
/// Microsecond precision keeps names unique within a second, and lexical
/// order equals capture order.
pub fn frame_path(root: &Path, timelapse_id: &Uuid, instant: DateTime<Utc>, ext: &str) -> PathBuf {
    timelapse_dir(root, timelapse_id).join(format!(
        "frame_{}.{}",
        instant.format("%Y%m%dT%H%M%S_%6f"),
        ext
    ))
}

async fn remove_file_logged(path: &Path, what: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {} {}", what, path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {} {}: {}", what, path.display(), e),
    }
}

/// Remove the export outputs and the frame directory of a timelapse under
/// `root`. Frame rows pointing elsewhere lose only their own file. Failures
/// are logged and do not abort the cleanup.
pub async fn delete_timelapse_files(store: &dyn Store, root: &Path, timelapse_id: &Uuid) -> Result<()> {
    for job in store.list_export_jobs(timelapse_id).await? {
        remove_file_logged(&job.output_path, "export file").await;
    }

    let dir = timelapse_dir(root, timelapse_id);
    for frame in store.list_frames(timelapse_id).await? {
        if !frame.file_path.starts_with(&dir) {
            remove_file_logged(&frame.file_path, "frame file").await;
        }
    }

    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => info!("Removed frame directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove frame directory {}: {}", dir.display(), e),
    }

    Ok(())
}

/// Volume and frame usage for the storage root
pub async fn usage(store: &dyn Store, root: &Path) -> Result<StorageUsage> {
    let frames_bytes = store.total_captured_bytes().await?;
    let path = root.to_path_buf();
    let disk = tokio::task::spawn_blocking(move || disk_usage(&path)).await?;

    Ok(StorageUsage {
        storage_path: root.to_path_buf(),
        disk,
        frames_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::{ExportJob, ExportRequest, NewExportJob, Timelapse, TimelapseStatus};
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn frame_names_sort_chronologically() {
        let root = Path::new("/data");
        let id = Uuid::nil();
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 7).unwrap();
        let b = a + chrono::Duration::microseconds(1);

        let pa = frame_path(root, &id, a, "webp");
        let pb = frame_path(root, &id, b, "webp");
        assert_eq!(
            pa,
            PathBuf::from(format!(
                "/data/timelapse_{}/frame_20260301T090507_000000.webp",
                id
            ))
        );
        assert!(pa < pb);
    }

    #[cfg(unix)]
    #[test]
    fn disk_usage_reports_a_volume() {
        let dir = TempDir::new().unwrap();
        let usage = disk_usage(&dir.path().join("not/created/yet")).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.free_bytes <= usage.total_bytes);
    }

    #[tokio::test]
    async fn delete_timelapse_files_removes_frames_and_exports() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let timelapse = Timelapse {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            name: "cleanup".to_string(),
            interval_seconds: 5,
            status: TimelapseStatus::Completed,
            started_at: None,
            ended_at: None,
            size_bytes: 0,
            created_at: Utc::now(),
        };
        store.insert_timelapse(timelapse.clone()).unwrap();

        let frame_file = frame_path(dir.path(), &timelapse.id, Utc::now(), "jpg");
        std::fs::create_dir_all(frame_file.parent().unwrap()).unwrap();
        std::fs::write(&frame_file, b"x").unwrap();
        store
            .record_frame(&timelapse.id, &frame_file, 1, Utc::now())
            .await
            .unwrap();

        let output = dir.path().join("exports").join("out.webm");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"video").unwrap();
        let job: ExportJob = NewExportJob {
            timelapse_id: timelapse.id,
            request: ExportRequest::default(),
            total_frames: 1,
            output_path: output.clone(),
        }
        .into_job()
        .unwrap();
        store.insert_export_job(job).unwrap();

        delete_timelapse_files(&store, dir.path(), &timelapse.id).await.unwrap();

        assert!(!output.exists());
        assert!(!timelapse_dir(dir.path(), &timelapse.id).exists());
        assert!(dir.path().join("exports").exists());
    }

    #[tokio::test]
    async fn frames_outside_the_timelapse_dir_are_removed_one_by_one() {
        let root = TempDir::new().unwrap();
        let foreign = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let timelapse = Timelapse {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            name: "foreign".to_string(),
            interval_seconds: 5,
            status: TimelapseStatus::Completed,
            started_at: None,
            ended_at: None,
            size_bytes: 0,
            created_at: Utc::now(),
        };
        store.insert_timelapse(timelapse.clone()).unwrap();

        let registered = foreign.path().join("photo.jpg");
        let neighbour = foreign.path().join("unrelated_user_file.txt");
        std::fs::write(&registered, b"x").unwrap();
        std::fs::write(&neighbour, b"keep me").unwrap();
        store
            .record_frame(&timelapse.id, &registered, 1, Utc::now())
            .await
            .unwrap();

        delete_timelapse_files(&store, root.path(), &timelapse.id).await.unwrap();

        assert!(!registered.exists());
        assert!(foreign.path().exists());
        assert_eq!(std::fs::read(&neighbour).unwrap(), b"keep me");
    }
}
