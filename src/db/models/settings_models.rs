use super::{deserialize_some, text_enum};
use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transport used for RTSP pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
    Http,
}

text_enum!(RtspTransport {
    Tcp => "tcp",
    Udp => "udp",
    Http => "http",
});

/// Encoding of captured stills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Jpeg,
    Png,
}

text_enum!(ImageFormat {
    Webp => "webp",
    Jpeg => "jpeg",
    Png => "png",
});

impl ImageFormat {
    /// ffmpeg video codec producing this format
    pub fn codec(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "mjpeg",
            ImageFormat::Png => "png",
        }
    }

    /// File extension used on disk
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    /// Check the leading magic bytes of an encoded image.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            ImageFormat::Webp => data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP",
            ImageFormat::Jpeg => data.starts_with(&[0xFF, 0xD8, 0xFF]),
            ImageFormat::Png => data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        }
    }
}

/// Longest accepted retention period, one hundred years
pub const MAX_RETENTION_DAYS: i32 = 36_500;

/// Global application settings (singleton row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub timezone: String,
    pub storage_path: PathBuf,
    pub max_storage_gb: Option<f64>,
    pub ffmpeg_timeout_seconds: i32,
    pub ffmpeg_rtsp_transport: RtspTransport,
    pub capture_image_format: ImageFormat,
    pub capture_image_quality: i32,
    pub default_capture_interval_seconds: i32,
    pub max_frames_per_timelapse: Option<i32>,
    pub retention_days: Option<i32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            storage_path: PathBuf::from("./data"),
            max_storage_gb: None,
            ffmpeg_timeout_seconds: 10,
            ffmpeg_rtsp_transport: RtspTransport::Tcp,
            capture_image_format: ImageFormat::Webp,
            capture_image_quality: 85,
            default_capture_interval_seconds: 60,
            max_frames_per_timelapse: None,
            retention_days: None,
        }
    }
}

impl Settings {
    /// Storage quota in bytes, if one is configured
    pub fn max_storage_bytes(&self) -> Option<u64> {
        self.max_storage_gb
            .filter(|gb| *gb > 0.0)
            .map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64)
    }

    pub fn validate(&self) -> Result<(), Error> {
        static TIMEZONE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(UTC|[A-Za-z_]+(/[A-Za-z0-9_+\-]+)+)$").unwrap());

        if !TIMEZONE.is_match(&self.timezone) {
            return Err(Error::Validation(format!("Unknown timezone: {:?}", self.timezone)));
        }
        if self.ffmpeg_timeout_seconds <= 0 {
            return Err(Error::Validation("ffmpeg_timeout_seconds must be positive".to_string()));
        }
        if !(1..=100).contains(&self.capture_image_quality) {
            return Err(Error::Validation(
                "capture_image_quality must be between 1 and 100".to_string(),
            ));
        }
        if self.default_capture_interval_seconds <= 0 {
            return Err(Error::Validation(
                "default_capture_interval_seconds must be positive".to_string(),
            ));
        }
        if self.max_frames_per_timelapse.map_or(false, |max| max <= 0) {
            return Err(Error::Validation("max_frames_per_timelapse must be positive".to_string()));
        }
        if self
            .retention_days
            .map_or(false, |days| !(1..=MAX_RETENTION_DAYS).contains(&days))
        {
            return Err(Error::Validation(format!(
                "retention_days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingsDb {
    pub id: i32,
    pub timezone: String,
    pub storage_path: String,
    pub max_storage_gb: Option<f64>,
    pub ffmpeg_timeout_seconds: i32,
    pub ffmpeg_rtsp_transport: String,
    pub capture_image_format: String,
    pub capture_image_quality: i32,
    pub default_capture_interval_seconds: i32,
    pub max_frames_per_timelapse: Option<i32>,
    pub retention_days: Option<i32>,
}

impl TryFrom<SettingsDb> for Settings {
    type Error = Error;

    fn try_from(db: SettingsDb) -> Result<Self, Self::Error> {
        Ok(Self {
            timezone: db.timezone,
            storage_path: PathBuf::from(db.storage_path),
            max_storage_gb: db.max_storage_gb,
            ffmpeg_timeout_seconds: db.ffmpeg_timeout_seconds,
            ffmpeg_rtsp_transport: db.ffmpeg_rtsp_transport.parse()?,
            capture_image_format: db.capture_image_format.parse()?,
            capture_image_quality: db.capture_image_quality,
            default_capture_interval_seconds: db.default_capture_interval_seconds,
            max_frames_per_timelapse: db.max_frames_per_timelapse,
            retention_days: db.retention_days,
        })
    }
}

impl From<Settings> for SettingsDb {
    fn from(settings: Settings) -> Self {
        Self {
            id: 1,
            timezone: settings.timezone,
            storage_path: settings.storage_path.to_string_lossy().to_string(),
            max_storage_gb: settings.max_storage_gb,
            ffmpeg_timeout_seconds: settings.ffmpeg_timeout_seconds,
            ffmpeg_rtsp_transport: settings.ffmpeg_rtsp_transport.to_string(),
            capture_image_format: settings.capture_image_format.to_string(),
            capture_image_quality: settings.capture_image_quality,
            default_capture_interval_seconds: settings.default_capture_interval_seconds,
            max_frames_per_timelapse: settings.max_frames_per_timelapse,
            retention_days: settings.retention_days,
        }
    }
}

/// Partial update for the settings row. Nullable knobs accept `null` to clear.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub timezone: Option<String>,
    pub storage_path: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub max_storage_gb: Option<Option<f64>>,
    pub ffmpeg_timeout_seconds: Option<i32>,
    pub ffmpeg_rtsp_transport: Option<RtspTransport>,
    pub capture_image_format: Option<ImageFormat>,
    pub capture_image_quality: Option<i32>,
    pub default_capture_interval_seconds: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub max_frames_per_timelapse: Option<Option<i32>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub retention_days: Option<Option<i32>>,
}

impl SettingsUpdate {
    pub fn apply(self, mut settings: Settings) -> Result<Settings, Error> {
        if let Some(timezone) = self.timezone {
            settings.timezone = timezone;
        }
        if let Some(storage_path) = self.storage_path {
            settings.storage_path = storage_path;
        }
        if let Some(max_storage_gb) = self.max_storage_gb {
            settings.max_storage_gb = max_storage_gb;
        }
        if let Some(timeout) = self.ffmpeg_timeout_seconds {
            settings.ffmpeg_timeout_seconds = timeout;
        }
        if let Some(transport) = self.ffmpeg_rtsp_transport {
            settings.ffmpeg_rtsp_transport = transport;
        }
        if let Some(format) = self.capture_image_format {
            settings.capture_image_format = format;
        }
        if let Some(quality) = self.capture_image_quality {
            settings.capture_image_quality = quality;
        }
        if let Some(interval) = self.default_capture_interval_seconds {
            settings.default_capture_interval_seconds = interval;
        }
        if let Some(max_frames) = self.max_frames_per_timelapse {
            settings.max_frames_per_timelapse = max_frames;
        }
        if let Some(retention_days) = self.retention_days {
            settings.retention_days = retention_days;
        }
        settings.validate()?;
        Ok(settings)
    }
}
