use crate::models::NewSensorReading;
use crate::ports::{PersistencePort, PortError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Below this the field is too dry to plow.
pub const DRY_BELOW: f64 = 35.0;
/// Above this the field is too wet to plow.
pub const WET_ABOVE: f64 = 75.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilStatus {
    Dry,
    Optimal,
    Wet,
}

impl SoilStatus {
    /// Bounds are inclusive on the optimal side: 35.0 and 75.0 are optimal.
    pub fn classify(moisture: f64) -> Self {
        if moisture < DRY_BELOW {
            SoilStatus::Dry
        } else if moisture > WET_ABOVE {
            SoilStatus::Wet
        } else {
            SoilStatus::Optimal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SoilStatus::Dry => "dry",
            SoilStatus::Optimal => "optimal",
            SoilStatus::Wet => "wet",
        }
    }
}

impl fmt::Display for SoilStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes one sensor_logs row. A caller-supplied status wins, otherwise the
/// reading is classified here.
pub async fn record_reading(
    store: &dyn PersistencePort,
    moisture: f64,
    status: Option<String>,
) -> Result<(u64, String), PortError> {
    let status = status
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| SoilStatus::classify(moisture).to_string());
    let id = store
        .insert_sensor(&NewSensorReading { moisture, status: Some(status.clone()) })
        .await?;
    Ok((id, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryPort;

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(SoilStatus::classify(0.0), SoilStatus::Dry);
        assert_eq!(SoilStatus::classify(34.9), SoilStatus::Dry);
        assert_eq!(SoilStatus::classify(35.0), SoilStatus::Optimal);
        assert_eq!(SoilStatus::classify(75.0), SoilStatus::Optimal);
        assert_eq!(SoilStatus::classify(75.1), SoilStatus::Wet);
        assert_eq!(SoilStatus::classify(100.0), SoilStatus::Wet);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SoilStatus::Optimal).unwrap(), "\"optimal\"");
    }

    #[tokio::test]
    async fn test_record_reading_derives_missing_status() {
        let store = MemoryPort::new();
        let (_, status) = record_reading(&store, 80.0, None).await.unwrap();
        assert_eq!(status, "wet");
        let (_, status) = record_reading(&store, 20.0, Some("  ".into())).await.unwrap();
        assert_eq!(status, "dry");

        let (id, status) = record_reading(&store, 20.0, Some("calibrating".into())).await.unwrap();
        assert_eq!(status, "calibrating");
        let latest = store.latest_sensor().await.unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.status.as_deref(), Some("calibrating"));
    }
}
