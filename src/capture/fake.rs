//! Scripted `FrameSource` for unit tests.

use super::{CameraSource, CaptureError, CaptureParams, FrameSource};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// Returns queued results first, then `FAKE_JPEG` forever.
#[derive(Default)]
pub(crate) struct FakeFrameSource {
    queued: Mutex<VecDeque<Result<Vec<u8>, CaptureError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeFrameSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every capture sleeps this long (tokio time) before answering
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn push(&self, result: Result<Vec<u8>, CaptureError>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for FakeFrameSource {
    async fn capture(
        &self,
        _source: &CameraSource,
        _params: &CaptureParams,
    ) -> Result<Vec<u8>, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.queued.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(FAKE_JPEG.to_vec()))
    }
}
