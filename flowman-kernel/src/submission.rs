/**
 * PATH SUBMISSION - Record then dispatch one plowing path
 *
 * ROLE :
 * Orchestrates the store and the broker for `POST /api/plow-path`.
 *
 * OPERATION :
 * received -> persisted -> dispatch_attempted -> acknowledged
 *     |
 *     +-> failed (store unreachable or insert rejected, nothing published)
 *
 * - The history row is the system of record: no row, no command
 * - The command is best effort: a broker failure is logged and reported
 *   in the receipt, the row stays committed
 * - No retries, no rollback, no deduplication (same path twice = two rows)
 */

use crate::dispatch::{DispatchError, SharedPublisher};
use crate::health::HealthTracker;
use crate::models::{encode_path, DeviceCommand, NewHistoryRecord, PathSubmission};
use crate::ports::{PortError, SharedPort};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Acknowledged,
    TimedOut,
    ConnectionError,
    EncodingError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionReceipt {
    pub history_id: u64,
    pub dispatch: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] PortError),
}

pub struct SubmissionPipeline {
    store: SharedPort,
    publisher: SharedPublisher,
    command_topic: String,
    ack_timeout: Duration,
    health: HealthTracker,
}

impl SubmissionPipeline {
    pub fn new(
        store: SharedPort,
        publisher: SharedPublisher,
        command_topic: impl Into<String>,
        ack_timeout: Duration,
        health: HealthTracker,
    ) -> Self {
        Self {
            store,
            publisher,
            command_topic: command_topic.into(),
            ack_timeout,
            health,
        }
    }

    pub async fn submit(&self, submission: PathSubmission) -> Result<SubmissionReceipt, SubmissionError> {
        // JSON cannot carry NaN/inf, but a negative distance gets through decoding
        if !submission.total_distance.is_finite() || submission.total_distance < 0.0 {
            return Err(SubmissionError::Validation(format!(
                "total_distance must be a non-negative number, got {}",
                submission.total_distance
            )));
        }

        let record = NewHistoryRecord {
            path_data: encode_path(&submission.path).map_err(PortError::from)?,
            total_distance: submission.total_distance,
            moisture_at_start: submission.moisture_at_start,
        };
        let history_id = self.store.insert_history(&record).await.map_err(|e| {
            error!("[submission] path not recorded, nothing dispatched: {e}");
            e
        })?;
        info!(
            "[submission] path #{history_id} recorded ({} waypoints, {:.2} m, device '{}')",
            submission.path.len(),
            submission.total_distance,
            submission.device_id
        );

        let outcome = match serde_json::to_vec(&DeviceCommand::start_plowing(&submission)) {
            Ok(payload) => {
                self.publisher
                    .publish(&self.command_topic, payload, self.ack_timeout)
                    .await
            }
            Err(e) => Err(DispatchError::from(e)),
        };
        self.health.record_dispatch(&outcome);

        let (dispatch, warning) = match outcome {
            Ok(ack) => {
                info!("[submission] path #{history_id} acknowledged on {} (pkid {})", ack.topic, ack.pkid);
                (DispatchStatus::Acknowledged, None)
            }
            Err(e) => {
                warn!("[submission] path #{history_id} recorded but not dispatched: {e}");
                let status = match e {
                    DispatchError::TimedOut(_) => DispatchStatus::TimedOut,
                    DispatchError::Connection(_) => DispatchStatus::ConnectionError,
                    DispatchError::Serialization(_) => DispatchStatus::EncodingError,
                };
                (status, Some(e.to_string()))
            }
        };

        Ok(SubmissionReceipt { history_id, dispatch, warning })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::doubles::{RecordingPublisher, RefusingPublisher, SilentPublisher};
    use crate::dispatch::CommandPublisher;
    use crate::models::decode_path;
    use crate::ports::doubles::{RejectingPort, UnreachablePort};
    use crate::ports::{MemoryPort, PersistencePort};
    use serde_json::json;
    use std::sync::Arc;

    fn pipeline(store: SharedPort, publisher: SharedPublisher) -> SubmissionPipeline {
        SubmissionPipeline::new(
            store,
            publisher,
            "smart_plowing/command",
            Duration::from_secs(5),
            HealthTracker::new(),
        )
    }

    fn submission(value: serde_json::Value) -> PathSubmission {
        serde_json::from_value(value).unwrap()
    }

    fn two_point_path() -> PathSubmission {
        submission(json!({
            "path": [{"x": 0, "y": 0}, {"x": 1, "y": 1}],
            "device_id": "dev-1",
            "moisture_at_start": 42.5,
            "total_distance": 1.41
        }))
    }

    #[tokio::test]
    async fn test_records_then_dispatches() {
        let store = Arc::new(MemoryPort::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let receipt = pipeline(store.clone(), publisher.clone())
            .submit(two_point_path())
            .await
            .unwrap();

        assert_eq!(receipt.dispatch, DispatchStatus::Acknowledged);
        assert_eq!(receipt.warning, None);

        let rows = store.recent_history(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, receipt.history_id);
        assert_eq!(rows[0].total_distance, 1.41);
        assert_eq!(rows[0].moisture_at_start, Some(42.5));
        assert_eq!(decode_path(&rows[0].path_data).unwrap(), two_point_path().path);

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "smart_plowing/command");
        assert_eq!(published[0].payload["action"], "START_PLOWING");
        assert_eq!(published[0].payload["device_id"], "dev-1");
        assert_eq!(published[0].payload["path"], json!([{"x": 0, "y": 0}, {"x": 1, "y": 1}]));
    }

    #[tokio::test]
    async fn test_unreachable_store_publishes_nothing() {
        let store = Arc::new(UnreachablePort::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let err = pipeline(store, publisher.clone()).submit(two_point_path()).await.unwrap_err();

        assert!(matches!(err, SubmissionError::Store(PortError::Unavailable(_))));
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_insert_publishes_nothing() {
        let publisher = Arc::new(RecordingPublisher::default());
        let err = pipeline(Arc::new(RejectingPort), publisher.clone())
            .submit(two_point_path())
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::Store(PortError::Query(_))));
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refused_broker_keeps_the_row() {
        let store = Arc::new(MemoryPort::new());
        let publisher = Arc::new(RefusingPublisher::default());
        let receipt = pipeline(store.clone(), publisher.clone())
            .submit(two_point_path())
            .await
            .unwrap();

        assert_eq!(receipt.dispatch, DispatchStatus::ConnectionError);
        assert!(receipt.warning.unwrap().contains("Connection refused"));
        assert_eq!(*publisher.attempts.lock(), 1, "no internal retry");
        assert_eq!(store.history_len(), 1);
    }

    #[tokio::test]
    async fn test_ack_timeout_keeps_the_row() {
        let store = Arc::new(MemoryPort::new());
        let p = pipeline(store.clone(), Arc::new(SilentPublisher));
        let receipt = p.submit(two_point_path()).await.unwrap();

        assert_eq!(receipt.dispatch, DispatchStatus::TimedOut);
        assert_eq!(store.history_len(), 1);
        assert_eq!(p.health.dispatch_stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_empty_path_is_recorded() {
        let store = Arc::new(MemoryPort::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let receipt = pipeline(store.clone(), publisher.clone())
            .submit(submission(json!({"path": [], "total_distance": 0})))
            .await
            .unwrap();

        let rows = store.recent_history(1).await.unwrap();
        assert_eq!(rows[0].id, receipt.history_id);
        assert_eq!(rows[0].path_data, "[]");
        assert_eq!(publisher.published.lock()[0].payload["path"], json!([]));
    }

    #[tokio::test]
    async fn test_same_path_twice_gives_two_rows() {
        let store = Arc::new(MemoryPort::new());
        let p = pipeline(store.clone(), Arc::new(RecordingPublisher::default()));
        let first = p.submit(two_point_path()).await.unwrap();
        let second = p.submit(two_point_path()).await.unwrap();

        assert_ne!(first.history_id, second.history_id);
        assert_eq!(store.history_len(), 2);
    }

    #[tokio::test]
    async fn test_negative_distance_is_rejected_before_the_store() {
        let store = Arc::new(UnreachablePort::default());
        let err = pipeline(store.clone(), Arc::new(RecordingPublisher::default()))
            .submit(submission(json!({"path": [], "total_distance": -1.0})))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::Validation(_)));
        assert_eq!(store.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_command_timeout_is_passed_through() {
        struct ExpectTimeout;

        #[async_trait::async_trait]
        impl CommandPublisher for ExpectTimeout {
            async fn publish(&self, topic: &str, _: Vec<u8>, ack_timeout: Duration) -> Result<crate::dispatch::Ack, DispatchError> {
                assert_eq!(ack_timeout, Duration::from_secs(5));
                Ok(crate::dispatch::Ack { topic: topic.into(), pkid: 1 })
            }
        }

        let receipt = pipeline(Arc::new(MemoryPort::new()), Arc::new(ExpectTimeout))
            .submit(two_point_path())
            .await
            .unwrap();
        assert_eq!(receipt.dispatch, DispatchStatus::Acknowledged);
    }
}
