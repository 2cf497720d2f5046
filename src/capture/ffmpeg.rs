use super::{CameraSource, CaptureError, CaptureParams, FrameSource};
use crate::db::models::ImageFormat;
use async_trait::async_trait;
use log::debug;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Upper bound on the stderr text carried inside an error
const STDERR_TAIL_CHARS: usize = 500;

enum GrabFailure {
    Spawn(std::io::Error),
    Timeout,
}

/// Run ffmpeg to completion, reading stdout and stderr concurrently. The
/// child is killed when the timeout drops the future.
async fn run_grab(program: &Path, args: &[String], timeout: Duration) -> Result<Output, GrabFailure> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(GrabFailure::Spawn(e)),
        Err(_) => Err(GrabFailure::Timeout),
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    text.chars().skip(skip).collect()
}

/// Encoder options placed before the output
fn output_args(params: &CaptureParams) -> Vec<String> {
    let mut args = vec!["-frames:v".to_string(), "1".to_string()];
    match params.format {
        ImageFormat::Webp => {
            args.push("-quality".to_string());
            args.push(params.quality.to_string());
        }
        ImageFormat::Jpeg => {
            // mjpeg qscale runs 2 (best) to 31 (worst)
            let q = 2 + (100 - params.quality.clamp(1, 100) as u32) * 29 / 99;
            args.push("-q:v".to_string());
            args.push(q.to_string());
        }
        ImageFormat::Png => {}
    }
    args.extend([
        "-f".to_string(),
        "image2pipe".to_string(),
        "-vcodec".to_string(),
        params.format.codec().to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

/// Grabs a frame from an RTSP/HTTP stream
#[derive(Debug, Clone)]
pub struct NetworkGrabber {
    ffmpeg_path: PathBuf,
}

impl NetworkGrabber {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn args(url: &str, params: &CaptureParams) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            args.push("-rtsp_transport".to_string());
            args.push(params.transport.to_string());
        }
        args.push("-i".to_string());
        args.push(url.to_string());
        args.extend(output_args(params));
        args
    }

    pub async fn grab(&self, url: &str, params: &CaptureParams) -> Result<Vec<u8>, CaptureError> {
        let args = Self::args(url, params);
        debug!("Grabbing network frame from {}", url);

        let output = run_grab(
            &self.ffmpeg_path,
            &args,
            Duration::from_secs(params.timeout_seconds),
        )
        .await
        .map_err(|failure| match failure {
            GrabFailure::Timeout => CaptureError::Timeout {
                seconds: params.timeout_seconds,
            },
            GrabFailure::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                CaptureError::NotFound(self.ffmpeg_path.display().to_string())
            }
            GrabFailure::Spawn(e) => CaptureError::NonZeroExit {
                exit_code: None,
                stderr: e.to_string(),
            },
        })?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(CaptureError::NonZeroExit {
                exit_code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(output.stdout)
    }
}

/// Platform input arguments for a local video device
#[cfg(target_os = "linux")]
fn device_input(device_index: u32) -> Option<Vec<String>> {
    Some(vec![
        "-f".to_string(),
        "v4l2".to_string(),
        "-i".to_string(),
        format!("/dev/video{}", device_index),
    ])
}

#[cfg(target_os = "macos")]
fn device_input(device_index: u32) -> Option<Vec<String>> {
    Some(vec![
        "-f".to_string(),
        "avfoundation".to_string(),
        "-i".to_string(),
        format!("{}", device_index),
    ])
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn device_input(_device_index: u32) -> Option<Vec<String>> {
    None
}

/// Grabs a frame from a locally attached device
#[derive(Debug, Clone)]
pub struct HardwareGrabber {
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

impl HardwareGrabber {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    pub fn args(device_index: u32, params: &CaptureParams) -> Option<Vec<String>> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        args.extend(device_input(device_index)?);
        args.extend(output_args(params));
        Some(args)
    }

    pub async fn grab(
        &self,
        device_index: u32,
        params: &CaptureParams,
    ) -> Result<Vec<u8>, CaptureError> {
        let args = Self::args(device_index, params).ok_or_else(|| CaptureError::OpenFailed {
            device_index,
            reason: "hardware capture is not supported on this platform".to_string(),
        })?;
        debug!("Grabbing hardware frame from device {}", device_index);

        let output = run_grab(&self.ffmpeg_path, &args, self.timeout)
            .await
            .map_err(|failure| match failure {
                GrabFailure::Timeout => CaptureError::Timeout {
                    seconds: self.timeout.as_secs(),
                },
                GrabFailure::Spawn(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    CaptureError::NotFound(self.ffmpeg_path.display().to_string())
                }
                GrabFailure::Spawn(e) => CaptureError::OpenFailed {
                    device_index,
                    reason: e.to_string(),
                },
            })?;

        if !output.status.success() {
            return Err(CaptureError::OpenFailed {
                device_index,
                reason: stderr_tail(&output.stderr),
            });
        }
        if output.stdout.is_empty() {
            return Err(CaptureError::ReadFailed { device_index });
        }
        if !params.format.matches(&output.stdout) {
            return Err(CaptureError::EncodeFailed {
                format: params.format,
            });
        }

        Ok(output.stdout)
    }
}

/// `FrameSource` that dispatches to the network or hardware grabber
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    network: NetworkGrabber,
    hardware: HardwareGrabber,
}

impl FfmpegFrameSource {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, hardware_timeout: Duration) -> Self {
        let ffmpeg_path = ffmpeg_path.into();
        Self {
            network: NetworkGrabber::new(ffmpeg_path.clone()),
            hardware: HardwareGrabber::new(ffmpeg_path, hardware_timeout),
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn capture(
        &self,
        source: &CameraSource,
        params: &CaptureParams,
    ) -> Result<Vec<u8>, CaptureError> {
        match source {
            CameraSource::Network { url } => self.network.grab(url, params).await,
            CameraSource::Hardware { device_index } => {
                self.hardware.grab(*device_index, params).await
            }
        }
    }
}
