use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A single captured still belonging to a timelapse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub timelapse_id: Uuid,
    pub file_path: PathBuf,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FrameDb {
    pub id: Uuid,
    pub timelapse_id: Uuid,
    pub file_path: String,
    pub captured_at: DateTime<Utc>,
}

impl From<FrameDb> for Frame {
    fn from(db: FrameDb) -> Self {
        Self {
            id: db.id,
            timelapse_id: db.timelapse_id,
            file_path: PathBuf::from(db.file_path),
            captured_at: db.captured_at,
        }
    }
}

impl From<Frame> for FrameDb {
    fn from(frame: Frame) -> Self {
        Self {
            id: frame.id,
            timelapse_id: frame.timelapse_id,
            file_path: frame.file_path.to_string_lossy().to_string(),
            captured_at: frame.captured_at,
        }
    }
}

/// Request body for registering an existing image as a frame
#[derive(Debug, Clone, Deserialize)]
pub struct FrameCreate {
    pub timelapse_id: Uuid,
    pub file_path: PathBuf,
    pub captured_at: Option<DateTime<Utc>>,
}

impl FrameCreate {
    pub fn into_frame(self) -> Frame {
        Frame {
            id: Uuid::new_v4(),
            timelapse_id: self.timelapse_id,
            file_path: self.file_path,
            captured_at: self.captured_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Frames are immutable apart from correcting the stored path
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameUpdate {
    pub file_path: Option<PathBuf>,
}
