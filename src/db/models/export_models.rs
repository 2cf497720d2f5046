use super::text_enum;
use crate::error::Error;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

static CUSTOM_RESOLUTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)x(\d+)$").unwrap());

/// Lifecycle status of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Pending,
    Running,
    Completed,
    Error,
}

text_enum!(ExportStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Error => "error",
});

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Completed | ExportStatus::Error)
    }
}

/// Container of the exported video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webm,
    Mp4,
}

text_enum!(OutputFormat {
    Webm => "webm",
    Mp4 => "mp4",
});

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mp4 => "video/mp4",
        }
    }
}

/// Output frame size. `Fixed` letterboxes the source into the given box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Original,
    Fixed { width: u32, height: u32 },
}

impl Resolution {
    /// Parse the request pair `resolution` / `custom_resolution`.
    pub fn parse(resolution: &str, custom: Option<&str>) -> Result<Self, Error> {
        match resolution {
            "original" => Ok(Resolution::Original),
            "1920x1080" | "1280x720" | "640x360" => Self::parse_dimensions(resolution),
            "custom" => {
                let custom = custom.ok_or_else(|| {
                    Error::Validation(
                        "custom_resolution must be in 'WxH' format (e.g. '1920x1080')".to_string(),
                    )
                })?;
                Self::parse_dimensions(custom)
            }
            other => Err(Error::Validation(format!("Unknown resolution: {}", other))),
        }
    }

    fn parse_dimensions(text: &str) -> Result<Self, Error> {
        let invalid = || {
            Error::Validation(
                "custom_resolution must be in 'WxH' format (e.g. '1920x1080')".to_string(),
            )
        };
        let caps = CUSTOM_RESOLUTION.captures(text).ok_or_else(invalid)?;
        let width: u32 = caps[1].parse().map_err(|_| invalid())?;
        let height: u32 = caps[2].parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Resolution::Fixed { width, height })
    }
}

/// Validated encode parameters handed to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportParams {
    pub format: OutputFormat,
    pub fps: u32,
    pub resolution: Resolution,
    pub crf: u32,
}

/// Request body for starting an export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(default = "default_format")]
    pub output_format: OutputFormat,
    #[serde(default = "default_fps")]
    pub output_fps: i32,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default)]
    pub custom_resolution: Option<String>,
    #[serde(default = "default_crf")]
    pub crf: i32,
}

fn default_format() -> OutputFormat {
    OutputFormat::Webm
}

fn default_fps() -> i32 {
    30
}

fn default_resolution() -> String {
    "original".to_string()
}

fn default_crf() -> i32 {
    28
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            output_format: default_format(),
            output_fps: default_fps(),
            resolution: default_resolution(),
            custom_resolution: None,
            crf: default_crf(),
        }
    }
}

impl ExportRequest {
    pub fn params(&self) -> Result<ExportParams, Error> {
        if !(1..=120).contains(&self.output_fps) {
            return Err(Error::Validation(format!(
                "output_fps must be between 1 and 120, got {}",
                self.output_fps
            )));
        }
        if !(0..=63).contains(&self.crf) {
            return Err(Error::Validation(format!(
                "crf must be between 0 and 63, got {}",
                self.crf
            )));
        }
        Ok(ExportParams {
            format: self.output_format,
            fps: self.output_fps as u32,
            resolution: Resolution::parse(&self.resolution, self.custom_resolution.as_deref())?,
            crf: self.crf as u32,
        })
    }
}

/// Export job model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub timelapse_id: Uuid,
    pub status: ExportStatus,
    pub output_format: OutputFormat,
    pub output_fps: i32,
    pub resolution: String,
    pub custom_resolution: Option<String>,
    pub crf: i32,
    pub total_frames: i32,
    pub frames_done: i32,
    pub output_path: PathBuf,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    /// Encode parameters as submitted. Rows are validated on creation, so
    /// this only fails on hand-edited data.
    pub fn params(&self) -> Result<ExportParams, Error> {
        ExportRequest {
            output_format: self.output_format,
            output_fps: self.output_fps,
            resolution: self.resolution.clone(),
            custom_resolution: self.custom_resolution.clone(),
            crf: self.crf,
        }
        .params()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExportJobDb {
    pub id: Uuid,
    pub timelapse_id: Uuid,
    pub status: String,
    pub output_format: String,
    pub output_fps: i32,
    pub resolution: String,
    pub custom_resolution: Option<String>,
    pub crf: i32,
    pub total_frames: i32,
    pub frames_done: i32,
    pub output_path: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExportJobDb> for ExportJob {
    type Error = Error;

    fn try_from(db: ExportJobDb) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db.id,
            timelapse_id: db.timelapse_id,
            status: db.status.parse()?,
            output_format: db.output_format.parse()?,
            output_fps: db.output_fps,
            resolution: db.resolution,
            custom_resolution: db.custom_resolution,
            crf: db.crf,
            total_frames: db.total_frames,
            frames_done: db.frames_done,
            output_path: PathBuf::from(db.output_path),
            error_message: db.error_message,
            created_at: db.created_at,
            completed_at: db.completed_at,
        })
    }
}

impl From<ExportJob> for ExportJobDb {
    fn from(job: ExportJob) -> Self {
        Self {
            id: job.id,
            timelapse_id: job.timelapse_id,
            status: job.status.to_string(),
            output_format: job.output_format.to_string(),
            output_fps: job.output_fps,
            resolution: job.resolution,
            custom_resolution: job.custom_resolution,
            crf: job.crf,
            total_frames: job.total_frames,
            frames_done: job.frames_done,
            output_path: job.output_path.to_string_lossy().to_string(),
            error_message: job.error_message,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Everything needed to insert a new pending job
#[derive(Debug, Clone)]
pub struct NewExportJob {
    pub timelapse_id: Uuid,
    pub request: ExportRequest,
    pub total_frames: i32,
    pub output_path: PathBuf,
}

impl NewExportJob {
    /// Build the pending job row, validating the request first.
    pub fn into_job(self) -> Result<ExportJob, Error> {
        self.request.params()?;
        if self.total_frames <= 0 {
            return Err(Error::Validation(
                "Timelapse has no frames to export".to_string(),
            ));
        }
        Ok(ExportJob {
            id: Uuid::new_v4(),
            timelapse_id: self.timelapse_id,
            status: ExportStatus::Pending,
            output_format: self.request.output_format,
            output_fps: self.request.output_fps,
            resolution: self.request.resolution,
            custom_resolution: self.request.custom_resolution,
            crf: self.request.crf,
            total_frames: self.total_frames,
            frames_done: 0,
            output_path: self.output_path,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let request: ExportRequest = serde_json::from_str("{}").unwrap();
        let params = request.params().unwrap();
        assert_eq!(params.format, OutputFormat::Webm);
        assert_eq!(params.fps, 30);
        assert_eq!(params.resolution, Resolution::Original);
        assert_eq!(params.crf, 28);
    }

    #[test]
    fn preset_and_custom_resolutions_parse() {
        assert_eq!(
            Resolution::parse("1280x720", None).unwrap(),
            Resolution::Fixed { width: 1280, height: 720 }
        );
        assert_eq!(
            Resolution::parse("custom", Some("800x600")).unwrap(),
            Resolution::Fixed { width: 800, height: 600 }
        );
    }

    #[test]
    fn malformed_custom_resolution_is_rejected() {
        assert!(Resolution::parse("custom", None).is_err());
        assert!(Resolution::parse("custom", Some("800 x 600")).is_err());
        assert!(Resolution::parse("custom", Some("0x600")).is_err());
        assert!(Resolution::parse("4k", None).is_err());
    }

    #[test]
    fn out_of_range_fps_and_crf_are_rejected() {
        let request = ExportRequest {
            output_fps: 0,
            ..Default::default()
        };
        assert!(request.params().is_err());

        let request = ExportRequest {
            crf: 64,
            ..Default::default()
        };
        assert!(request.params().is_err());
    }

    #[test]
    fn new_job_starts_pending_with_no_progress() {
        let job = NewExportJob {
            timelapse_id: Uuid::new_v4(),
            request: ExportRequest::default(),
            total_frames: 12,
            output_path: PathBuf::from("/tmp/out.webm"),
        }
        .into_job()
        .unwrap();
        assert_eq!(job.status, ExportStatus::Pending);
        assert_eq!(job.frames_done, 0);
        assert_eq!(job.total_frames, 12);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExportStatus::Completed.is_terminal());
        assert!(ExportStatus::Error.is_terminal());
        assert!(!ExportStatus::Running.is_terminal());
    }
}
