/// Implements `as_str`, `Display` and `FromStr` for enums persisted as lowercase text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(crate::error::Error::Validation(format!(
                        "Unknown {} value: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use text_enum;

/// Distinguishes an absent PATCH field from an explicit `null`.
///
/// Used as `#[serde(default, deserialize_with = "deserialize_some")]` on
/// `Option<Option<T>>` fields: absent stays `None`, `null` becomes `Some(None)`.
pub(crate) fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

pub mod camera_models;
pub mod export_models;
pub mod frame_models;
pub mod settings_models;
pub mod timelapse_models;

pub use camera_models::{Camera, CameraCreate, CameraDb, CameraUpdate, ConnectionType};
pub use export_models::{
    ExportJob, ExportJobDb, ExportParams, ExportRequest, ExportStatus, NewExportJob,
    OutputFormat, Resolution,
};
pub use frame_models::{Frame, FrameCreate, FrameDb, FrameUpdate};
pub use settings_models::{ImageFormat, RtspTransport, Settings, SettingsDb, SettingsUpdate};
pub use timelapse_models::{
    Timelapse, TimelapseCreate, TimelapseDb, TimelapseStatus, TimelapseUpdate,
};
