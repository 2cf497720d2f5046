//! Shared wiring for the recorder unit tests.

use crate::capture::fake::FakeFrameSource;
use crate::clock::MockClock;
use crate::db::memory::MemoryStore;
use crate::db::models::{Camera, ConnectionType, ImageFormat, Settings, Timelapse, TimelapseStatus};
use crate::recorder::executor::CaptureExecutor;
use crate::recorder::scheduler::CaptureScheduler;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeFrameSource>,
    pub clock: Arc<MockClock>,
    pub dir: TempDir,
    pub camera: Camera,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_source(FakeFrameSource::new())
    }

    /// Must be called from inside a tokio runtime: the clock anchors to tokio time
    pub fn with_source(source: FakeFrameSource) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .set_settings(Some(Settings {
                storage_path: dir.path().to_path_buf(),
                capture_image_format: ImageFormat::Jpeg,
                ..Settings::default()
            }))
            .unwrap();

        let camera = Camera {
            id: Uuid::new_v4(),
            name: "bench".to_string(),
            connection_type: ConnectionType::Hardware,
            rtsp_url: None,
            device_index: Some(0),
            enabled: true,
            created_at: Utc::now(),
        };
        store.insert_camera(camera.clone()).unwrap();

        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Self {
            store,
            source: Arc::new(source),
            clock: Arc::new(MockClock::new(start)),
            dir,
            camera,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            storage_path: self.dir.path().to_path_buf(),
            capture_image_format: ImageFormat::Jpeg,
            ..Settings::default()
        }
    }

    /// Insert a timelapse on the fixture camera
    pub fn timelapse(&self, status: TimelapseStatus, interval_seconds: i32) -> Timelapse {
        let timelapse = Timelapse {
            id: Uuid::new_v4(),
            camera_id: self.camera.id,
            name: "fixture".to_string(),
            interval_seconds,
            status,
            started_at: None,
            ended_at: None,
            size_bytes: 0,
            created_at: Utc::now(),
        };
        self.store.insert_timelapse(timelapse.clone()).unwrap();
        timelapse
    }

    pub fn executor(&self, min_free_bytes: u64) -> CaptureExecutor {
        CaptureExecutor::new(
            self.store.clone(),
            self.source.clone(),
            self.clock.clone(),
            min_free_bytes,
        )
    }

    pub fn scheduler(&self) -> CaptureScheduler {
        CaptureScheduler::new(
            self.store.clone(),
            Arc::new(self.executor(0)),
            self.clock.clone(),
        )
    }
}
