//! Single-frame acquisition from cameras.
//!
//! A camera row resolves to a [`CameraSource`]; a [`FrameSource`] turns a
//! source plus [`CaptureParams`] into encoded image bytes. The production
//! implementation shells out to ffmpeg ([`ffmpeg::FfmpegFrameSource`]).

use crate::db::models::{ImageFormat, RtspTransport, Settings};
use async_trait::async_trait;

pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod fake;

pub use ffmpeg::FfmpegFrameSource;

/// Where a frame comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// RTSP/HTTP stream pulled over the network
    Network { url: String },
    /// Local video device, by index
    Hardware { device_index: u32 },
}

impl std::fmt::Display for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSource::Network { url } => write!(f, "network camera {}", url),
            CameraSource::Hardware { device_index } => {
                write!(f, "hardware camera #{}", device_index)
            }
        }
    }
}

/// Per-capture knobs derived from the global settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub format: ImageFormat,
    pub transport: RtspTransport,
    pub timeout_seconds: u64,
    /// 1..=100, higher is better
    pub quality: u8,
}

impl CaptureParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            format: settings.capture_image_format,
            transport: settings.ffmpeg_rtsp_transport,
            timeout_seconds: settings.ffmpeg_timeout_seconds.max(1) as u64,
            quality: settings.capture_image_quality.clamp(1, 100) as u8,
        }
    }
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Failure of a single capture attempt. All variants are transient from the
/// scheduler's point of view.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("ffmpeg binary not found: {0}")]
    NotFound(String),

    #[error("ffmpeg failed to capture a frame (exit code {exit_code:?}): {stderr}")]
    NonZeroExit {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("could not open hardware camera at index {device_index}: {reason}")]
    OpenFailed { device_index: u32, reason: String },

    #[error("failed to read frame from hardware camera at index {device_index}")]
    ReadFailed { device_index: u32 },

    #[error("failed to encode frame as {format}")]
    EncodeFailed { format: ImageFormat },
}

/// Anything that can produce one encoded still for a camera
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(
        &self,
        source: &CameraSource,
        params: &CaptureParams,
    ) -> Result<Vec<u8>, CaptureError>;
}
