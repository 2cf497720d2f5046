use super::text_enum;
use crate::capture::CameraSource;
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the camera is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// RTSP or HTTP stream
    Network,
    /// Locally attached video device
    Hardware,
}

text_enum!(ConnectionType {
    Network => "network",
    Hardware => "hardware",
});

/// Camera model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: Uuid,
    pub name: String,
    pub connection_type: ConnectionType,
    pub rtsp_url: Option<String>,
    pub device_index: Option<i32>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Camera {
    /// Resolve the capture source this camera row describes.
    pub fn source(&self) -> Result<CameraSource, Error> {
        match self.connection_type {
            ConnectionType::Network => {
                let url = self
                    .rtsp_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        Error::Camera(format!("Network camera {} has no stream URL", self.id))
                    })?;
                Ok(CameraSource::Network {
                    url: url.to_string(),
                })
            }
            ConnectionType::Hardware => {
                let index = self
                    .device_index
                    .filter(|index| *index >= 0)
                    .ok_or_else(|| {
                        Error::Camera(format!("Hardware camera {} has no device index", self.id))
                    })?;
                Ok(CameraSource::Hardware {
                    device_index: index as u32,
                })
            }
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CameraDb {
    pub id: Uuid,
    pub name: String,
    pub connection_type: String,
    pub rtsp_url: Option<String>,
    pub device_index: Option<i32>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CameraDb> for Camera {
    type Error = Error;

    fn try_from(db: CameraDb) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db.id,
            name: db.name,
            connection_type: db.connection_type.parse()?,
            rtsp_url: db.rtsp_url,
            device_index: db.device_index,
            enabled: db.enabled,
            created_at: db.created_at,
        })
    }
}

impl From<Camera> for CameraDb {
    fn from(camera: Camera) -> Self {
        Self {
            id: camera.id,
            name: camera.name,
            connection_type: camera.connection_type.to_string(),
            rtsp_url: camera.rtsp_url,
            device_index: camera.device_index,
            enabled: camera.enabled,
            created_at: camera.created_at,
        }
    }
}

/// Request body for creating a camera
#[derive(Debug, Clone, Deserialize)]
pub struct CameraCreate {
    pub name: String,
    pub connection_type: ConnectionType,
    pub rtsp_url: Option<String>,
    pub device_index: Option<i32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CameraCreate {
    pub fn into_camera(self) -> Result<Camera, Error> {
        let camera = Camera {
            id: Uuid::new_v4(),
            name: self.name,
            connection_type: self.connection_type,
            rtsp_url: self.rtsp_url,
            device_index: self.device_index,
            enabled: self.enabled,
            created_at: Utc::now(),
        };
        validate_camera(&camera)?;
        Ok(camera)
    }
}

/// Partial update for a camera
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CameraUpdate {
    pub name: Option<String>,
    pub connection_type: Option<ConnectionType>,
    pub rtsp_url: Option<String>,
    pub device_index: Option<i32>,
    pub enabled: Option<bool>,
}

impl CameraUpdate {
    pub fn apply(self, mut camera: Camera) -> Result<Camera, Error> {
        if let Some(name) = self.name {
            camera.name = name;
        }
        if let Some(connection_type) = self.connection_type {
            camera.connection_type = connection_type;
        }
        if self.rtsp_url.is_some() {
            camera.rtsp_url = self.rtsp_url;
        }
        if self.device_index.is_some() {
            camera.device_index = self.device_index;
        }
        if let Some(enabled) = self.enabled {
            camera.enabled = enabled;
        }
        validate_camera(&camera)?;
        Ok(camera)
    }
}

fn validate_camera(camera: &Camera) -> Result<(), Error> {
    if camera.name.trim().is_empty() {
        return Err(Error::Validation("Camera name must not be empty".to_string()));
    }
    if let CameraSource::Network { url } = camera.source().map_err(|e| Error::Validation(e.to_string()))? {
        url::Url::parse(&url)
            .map_err(|e| Error::Validation(format!("Invalid stream URL {}: {}", url, e)))?;
    }
    Ok(())
}
