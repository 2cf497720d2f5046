use super::{deserialize_some, text_enum};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a timelapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelapseStatus {
    /// Created, not capturing yet (may carry a future start time)
    Pending,
    /// Capture timer active
    Running,
    /// Capture timer suspended
    Paused,
    /// Terminal
    Completed,
}

text_enum!(TimelapseStatus {
    Pending => "pending",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
});

impl TimelapseStatus {
    /// Whether a status change is allowed. Statuses only move forward,
    /// except for the running/paused pair.
    pub fn can_transition_to(self, next: TimelapseStatus) -> bool {
        use TimelapseStatus::*;

        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Running)
                | (Pending, Completed)
                | (Running, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Paused, Paused)
                | (Paused, Running)
                | (Paused, Completed)
                | (Completed, Completed)
        )
    }
}

/// Timelapse model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timelapse {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub name: String,
    pub interval_seconds: i32,
    pub status: TimelapseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl Timelapse {
    /// True once the configured end time has been reached.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.map_or(false, |end| now >= end)
    }

    /// The future instant this pending timelapse should auto-start at, if any.
    pub fn scheduled_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.status, self.started_at) {
            (TimelapseStatus::Pending, Some(at)) if at > now => Some(at),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimelapseDb {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub name: String,
    pub interval_seconds: i32,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TimelapseDb> for Timelapse {
    type Error = Error;

    fn try_from(db: TimelapseDb) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db.id,
            camera_id: db.camera_id,
            name: db.name,
            interval_seconds: db.interval_seconds,
            status: db.status.parse()?,
            started_at: db.started_at,
            ended_at: db.ended_at,
            size_bytes: db.size_bytes,
            created_at: db.created_at,
        })
    }
}

impl From<Timelapse> for TimelapseDb {
    fn from(timelapse: Timelapse) -> Self {
        Self {
            id: timelapse.id,
            camera_id: timelapse.camera_id,
            name: timelapse.name,
            interval_seconds: timelapse.interval_seconds,
            status: timelapse.status.to_string(),
            started_at: timelapse.started_at,
            ended_at: timelapse.ended_at,
            size_bytes: timelapse.size_bytes,
            created_at: timelapse.created_at,
        }
    }
}

/// Request body for creating a timelapse
#[derive(Debug, Clone, Deserialize)]
pub struct TimelapseCreate {
    pub camera_id: Uuid,
    pub name: String,
    /// Falls back to the global default interval when absent
    pub interval_seconds: Option<i32>,
    #[serde(default = "default_status")]
    pub status: TimelapseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

fn default_status() -> TimelapseStatus {
    TimelapseStatus::Pending
}

impl TimelapseCreate {
    pub fn into_timelapse(self, default_interval: i32) -> Result<Timelapse, Error> {
        if self.status == TimelapseStatus::Paused {
            return Err(Error::Validation(
                "A timelapse cannot be created in the paused state".to_string(),
            ));
        }
        let timelapse = Timelapse {
            id: Uuid::new_v4(),
            camera_id: self.camera_id,
            name: self.name,
            interval_seconds: self.interval_seconds.unwrap_or(default_interval),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            size_bytes: 0,
            created_at: Utc::now(),
        };
        validate_timelapse(&timelapse)?;
        Ok(timelapse)
    }
}

/// Partial update for a timelapse. `started_at`/`ended_at` accept an explicit
/// `null` to clear the value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelapseUpdate {
    pub name: Option<String>,
    pub interval_seconds: Option<i32>,
    pub status: Option<TimelapseStatus>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub started_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub ended_at: Option<Option<DateTime<Utc>>>,
}

impl TimelapseUpdate {
    /// Apply the patch, rejecting status edges the lifecycle does not allow.
    pub fn apply(self, current: &Timelapse) -> Result<Timelapse, Error> {
        let mut next = current.clone();
        if let Some(name) = self.name {
            next.name = name;
        }
        if let Some(interval) = self.interval_seconds {
            next.interval_seconds = interval;
        }
        if let Some(status) = self.status {
            if !current.status.can_transition_to(status) {
                return Err(Error::InvalidState(format!(
                    "Timelapse {} cannot move from {} to {}",
                    current.id, current.status, status
                )));
            }
            next.status = status;
        }
        if let Some(started_at) = self.started_at {
            next.started_at = started_at;
        }
        if let Some(ended_at) = self.ended_at {
            next.ended_at = ended_at;
        }
        validate_timelapse(&next)?;
        Ok(next)
    }
}

fn validate_timelapse(timelapse: &Timelapse) -> Result<(), Error> {
    if timelapse.name.trim().is_empty() {
        return Err(Error::Validation("Timelapse name must not be empty".to_string()));
    }
    if timelapse.interval_seconds <= 0 {
        return Err(Error::Validation(format!(
            "interval_seconds must be positive, got {}",
            timelapse.interval_seconds
        )));
    }
    if let (Some(start), Some(end)) = (timelapse.started_at, timelapse.ended_at) {
        if end <= start {
            return Err(Error::Validation(
                "ended_at must be later than started_at".to_string(),
            ));
        }
    }
    Ok(())
}
