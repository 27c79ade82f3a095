use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One waypoint of a plowing path. Kept as an opaque key/value record: app
/// revisions have sent `{x, y}` grid cells as well as lat/lon pairs.
pub type Waypoint = serde_json::Map<String, serde_json::Value>;

/// Action tag carried by every command sent to the plow.
pub const START_PLOWING: &str = "START_PLOWING";

/// Body of `POST /api/plow-path`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathSubmission {
    pub path: Vec<Waypoint>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub moisture_at_start: Option<f64>,
    pub total_distance: f64,
}

/// Row about to be written to `plowing_history`; id and created_at come from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryRecord {
    pub path_data: String,
    pub total_distance: f64,
    pub moisture_at_start: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: u64,
    pub path_data: String,
    pub total_distance: f64,
    pub moisture_at_start: Option<f64>,
    pub created_at: OffsetDateTime,
}

/// Payload published on the command topic. Never persisted.
#[derive(Debug, Serialize)]
pub struct DeviceCommand<'a> {
    pub action: &'static str,
    pub device_id: &'a str,
    pub path: &'a [Waypoint],
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl<'a> DeviceCommand<'a> {
    pub fn start_plowing(submission: &'a PathSubmission) -> Self {
        Self {
            action: START_PLOWING,
            device_id: &submission.device_id,
            path: &submission.path,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSensorReading {
    pub moisture: f64,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub id: u64,
    pub moisture: f64,
    pub status: Option<String>,
    pub created_at: OffsetDateTime,
}

pub fn encode_path(path: &[Waypoint]) -> Result<String, serde_json::Error> {
    serde_json::to_string(path)
}

pub fn decode_path(text: &str) -> Result<Vec<Waypoint>, serde_json::Error> {
    serde_json::from_str(text)
}
