/**
 * REST API FLOWMAN - HTTP surface of the kernel
 *
 * ROLE :
 * Entry point for the mobile app: receives plowing paths, serves the
 * plowing history and the latest soil moisture reading.
 *
 * OPERATION :
 * - Axum router, JSON bodies both ways, permissive CORS for web/mobile clients
 * - POST /api/plow-path goes through the SubmissionPipeline (record, then dispatch)
 * - Read/delete endpoints talk to the PersistencePort directly
 * - Errors are rendered as {"status":"error","detail":...} with a mapped status code
 *
 * ROUTES :
 * GET    /                          liveness
 * GET    /system/health             uptime, broker listener, dispatch counters
 * POST   /api/plow-path             record + dispatch a path
 * GET    /api/plowing-history       newest first, capped
 * DELETE /api/plowing-history/all   wipe the history
 * DELETE /api/plowing-history/{id}  delete one row
 * GET    /api/soil-data/latest      latest moisture reading
 * POST   /api/soil-data/record      store a moisture reading
 */

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::health::{HealthTracker, KernelHealth};
use crate::models::{decode_path, HistoryRecord, PathSubmission};
use crate::ports::{PortError, SharedPort};
use crate::soil::record_reading;
use crate::submission::{DispatchStatus, SubmissionError, SubmissionPipeline};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedPort,
    pub pipeline: Arc<SubmissionPipeline>,
    pub health: HealthTracker,
    pub history_limit: u32,
    pub display_offset: UtcOffset,
}

#[derive(Debug)]
pub enum ApiError {
    Unavailable(String),
    Internal(String),
    NotFound(String),
    Validation(String),
}

impl From<PortError> for ApiError {
    fn from(e: PortError) -> Self {
        match e {
            PortError::Unavailable(msg) => ApiError::Unavailable(format!("Database not connected: {msg}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(e: SubmissionError) -> Self {
        match e {
            SubmissionError::Validation(msg) => ApiError::Validation(msg),
            SubmissionError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, detail) = match self {
            ApiError::Unavailable(d) => (StatusCode::SERVICE_UNAVAILABLE, d),
            ApiError::Internal(d) => (StatusCode::INTERNAL_SERVER_ERROR, d),
            ApiError::NotFound(d) => (StatusCode::NOT_FOUND, d),
            ApiError::Validation(d) => (StatusCode::UNPROCESSABLE_ENTITY, d),
        };
        if code.is_server_error() {
            error!("[http] {code}: {detail}");
        }
        (code, Json(json!({ "status": "error", "detail": detail }))).into_response()
    }
}

#[derive(Serialize)]
struct HistoryView {
    id: u64,
    path_data: Value,
    total_distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    moisture_at_start: Option<f64>,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct SensorRecordRequest {
    moisture: f64,
    #[serde(default)]
    status: Option<String>,
}

fn format_timestamp(ts: OffsetDateTime, offset: UtcOffset) -> String {
    ts.to_offset(offset).format(&Rfc3339).unwrap_or_default()
}

fn to_view(r: HistoryRecord, offset: UtcOffset) -> HistoryView {
    // rows written by older app revisions may not hold valid JSON
    let path_data = match decode_path(&r.path_data) {
        Ok(path) => Value::Array(path.into_iter().map(Value::Object).collect()),
        Err(e) => {
            warn!("[http] history #{} has undecodable path_data: {e}", r.id);
            Value::String(r.path_data)
        }
    };
    HistoryView {
        id: r.id,
        path_data,
        total_distance: r.total_distance,
        moisture_at_start: r.moisture_at_start,
        created_at: format_timestamp(r.created_at, offset),
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/system/health", get(get_system_health))
        .route("/api/plow-path", post(receive_path))
        .route("/api/plowing-history", get(get_history))
        .route("/api/plowing-history/all", delete(delete_all_history))
        .route("/api/plowing-history/{id}", delete(delete_history))
        .route("/api/soil-data/latest", get(get_latest_sensor))
        .route("/api/soil-data/record", post(record_sensor))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

// GET / (liveness)
async fn home() -> Json<Value> {
    Json(json!({ "status": "online", "message": "Smart Rice Flowman backend ready" }))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(app.store.backend()))
}

// POST /api/plow-path
async fn receive_path(
    State(app): State<AppState>,
    Json(submission): Json<PathSubmission>,
) -> Result<Json<Value>, ApiError> {
    let receipt = app.pipeline.submit(submission).await?;
    let message = match receipt.dispatch {
        DispatchStatus::Acknowledged => "Path sent to the device and saved to history",
        _ => "Path saved to history, device dispatch failed",
    };
    let mut body = json!({
        "status": "success",
        "message": message,
        "history_id": receipt.history_id,
        "dispatch": receipt.dispatch,
    });
    if let Some(warning) = receipt.warning {
        body["warning"] = Value::String(warning);
    }
    Ok(Json(body))
}

// GET /api/plowing-history
async fn get_history(State(app): State<AppState>) -> Result<Json<Vec<HistoryView>>, ApiError> {
    let rows = app.store.recent_history(app.history_limit).await?;
    Ok(Json(rows.into_iter().map(|r| to_view(r, app.display_offset)).collect()))
}

// DELETE /api/plowing-history/{id}
async fn delete_history(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, ApiError> {
    if !app.store.delete_history(id).await? {
        return Err(ApiError::NotFound(format!("History #{id} not found")));
    }
    info!("[http] history #{id} deleted");
    Ok(Json(json!({ "status": "success", "message": format!("History #{id} deleted") })))
}

// DELETE /api/plowing-history/all
async fn delete_all_history(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    let removed = app.store.clear_history().await?;
    warn!("[http] plowing history cleared ({removed} rows)");
    Ok(Json(json!({
        "status": "success",
        "message": format!("{removed} history entries deleted"),
    })))
}

// GET /api/soil-data/latest
async fn get_latest_sensor(State(app): State<AppState>) -> Result<Json<Value>, ApiError> {
    let body = match app.store.latest_sensor().await? {
        Some(r) => json!({
            "moisture": r.moisture,
            "status": r.status,
            "timestamp": format_timestamp(r.created_at, app.display_offset),
        }),
        None => json!({ "moisture": 0, "status": "no data", "timestamp": null }),
    };
    Ok(Json(body))
}

// POST /api/soil-data/record
async fn record_sensor(
    State(app): State<AppState>,
    Json(req): Json<SensorRecordRequest>,
) -> Result<Json<Value>, ApiError> {
    let (id, status) = record_reading(app.store.as_ref(), req.moisture, req.status).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Reading #{id} saved ({status})"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::doubles::{RecordingPublisher, RefusingPublisher};
    use crate::dispatch::SharedPublisher;
    use crate::ports::doubles::{RejectingPort, UnreachablePort};
    use crate::ports::MemoryPort;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with(store: SharedPort, publisher: SharedPublisher) -> Router {
        let health = HealthTracker::new();
        let pipeline = SubmissionPipeline::new(
            store.clone(),
            publisher,
            "smart_plowing/command",
            Duration::from_secs(5),
            health.clone(),
        );
        build_router(AppState {
            store,
            pipeline: Arc::new(pipeline),
            health,
            history_limit: 10,
            display_offset: UtcOffset::UTC,
        })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn scenario_path() -> Value {
        json!({
            "path": [{"x": 0, "y": 0}, {"x": 1, "y": 1}],
            "device_id": "dev-1",
            "moisture_at_start": 42.5,
            "total_distance": 1.41
        })
    }

    #[tokio::test]
    async fn test_home_is_online() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));
        let (code, body) = call(&app, Method::GET, "/", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "online");
    }

    #[tokio::test]
    async fn test_submitted_path_shows_up_in_history() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));

        let (code, body) = call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["dispatch"], "acknowledged");
        assert!(body.get("warning").is_none());

        let (code, history) = call(&app, Method::GET, "/api/plowing-history", None).await;
        assert_eq!(code, StatusCode::OK);
        let entry = &history[0];
        assert_eq!(entry["id"], body["history_id"]);
        assert_eq!(entry["path_data"], json!([{"x": 0, "y": 0}, {"x": 1, "y": 1}]));
        assert_eq!(entry["total_distance"], 1.41);
        assert_eq!(entry["moisture_at_start"], 42.5);
        assert!(entry["created_at"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_empty_path_succeeds() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));
        let (code, body) = call(
            &app,
            Method::POST,
            "/api/plow-path",
            Some(json!({"path": [], "total_distance": 0})),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (_, history) = call(&app, Method::GET, "/api/plowing-history", None).await;
        assert_eq!(history[0]["path_data"], json!([]));
        assert!(history[0].get("moisture_at_start").is_none());
    }

    #[tokio::test]
    async fn test_broker_refusal_is_still_success() {
        let store = Arc::new(MemoryPort::new());
        let app = app_with(store.clone(), Arc::new(RefusingPublisher::default()));
        let (code, body) = call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["dispatch"], "connection_error");
        assert!(body["warning"].is_string());
        assert_eq!(store.history_len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_server_error_without_publish() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app_with(Arc::new(UnreachablePort::default()), publisher.clone());
        let (code, body) = call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
        assert!(body["detail"].as_str().unwrap().contains("Database not connected"));
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_insert_is_500_with_detail() {
        let app = app_with(Arc::new(RejectingPort), Arc::new(RecordingPublisher::default()));
        let (code, body) = call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["detail"].as_str().unwrap().contains("cannot be null"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_by_decoding() {
        let publisher = Arc::new(RecordingPublisher::default());
        let app = app_with(Arc::new(MemoryPort::new()), publisher.clone());
        let (code, _) = call(&app, Method::POST, "/api/plow-path", Some(json!({"path": "nope"}))).await;

        assert!(code.is_client_error());
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_negative_distance_is_422() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));
        let (code, body) = call(
            &app,
            Method::POST,
            "/api/plow-path",
            Some(json!({"path": [], "total_distance": -3.0})),
        )
        .await;
        assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_capped() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));
        for i in 0..12 {
            let body = json!({"path": [{"x": i, "y": 0}], "total_distance": i as f64});
            call(&app, Method::POST, "/api/plow-path", Some(body)).await;
        }
        let (_, history) = call(&app, Method::GET, "/api/plowing-history", None).await;
        let history = history.as_array().unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0]["total_distance"], 11.0);
        assert_eq!(history[9]["total_distance"], 2.0);
    }

    #[tokio::test]
    async fn test_delete_one_then_404() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));
        let (_, created) = call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;
        let uri = format!("/api/plowing-history/{}", created["history_id"]);

        let (code, body) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (code, body) = call(&app, Method::DELETE, &uri, None).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_delete_all_is_not_taken_as_an_id() {
        let store = Arc::new(MemoryPort::new());
        let app = app_with(store.clone(), Arc::new(RecordingPublisher::default()));
        call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;
        call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;

        let (code, body) = call(&app, Method::DELETE, "/api/plowing-history/all", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["message"], "2 history entries deleted");
        assert_eq!(store.history_len(), 0);
    }

    #[tokio::test]
    async fn test_soil_data_record_then_latest() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RecordingPublisher::default()));

        let (_, empty) = call(&app, Method::GET, "/api/soil-data/latest", None).await;
        assert_eq!(empty["moisture"], 0);
        assert_eq!(empty["status"], "no data");
        assert!(empty["timestamp"].is_null());

        let (code, _) = call(&app, Method::POST, "/api/soil-data/record", Some(json!({"moisture": 30.0}))).await;
        assert_eq!(code, StatusCode::OK);
        call(&app, Method::POST, "/api/soil-data/record", Some(json!({"moisture": 55.0, "status": "optimal"}))).await;

        let (code, latest) = call(&app, Method::GET, "/api/soil-data/latest", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(latest["moisture"], 55.0);
        assert_eq!(latest["status"], "optimal");
        assert!(latest["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_reads_report_unreachable_store() {
        let app = app_with(Arc::new(UnreachablePort::default()), Arc::new(RecordingPublisher::default()));
        let (code, _) = call(&app, Method::GET, "/api/plowing-history", None).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        let (code, _) = call(&app, Method::GET, "/api/soil-data/latest", None).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_system_health_counts_dispatches() {
        let app = app_with(Arc::new(MemoryPort::new()), Arc::new(RefusingPublisher::default()));
        call(&app, Method::POST, "/api/plow-path", Some(scenario_path())).await;

        let (code, health) = call(&app, Method::GET, "/system/health", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(health["storage_backend"], "memory");
        assert_eq!(health["dispatch"]["failed"], 1);
        assert_eq!(health["dispatch"]["acknowledged"], 0);
    }

    #[test]
    fn test_timestamps_use_display_offset() {
        let ts = time::macros::datetime!(2025-01-10 03:00 UTC);
        let wib = UtcOffset::from_hms(7, 0, 0).unwrap();
        assert_eq!(format_timestamp(ts, wib), "2025-01-10T10:00:00+07:00");
        assert_eq!(format_timestamp(ts, UtcOffset::UTC), "2025-01-10T03:00:00Z");
    }

    #[test]
    fn test_legacy_path_text_is_passed_through() {
        let view = to_view(
            HistoryRecord {
                id: 7,
                path_data: "x=0,y=0".into(),
                total_distance: 0.0,
                moisture_at_start: None,
                created_at: OffsetDateTime::UNIX_EPOCH,
            },
            UtcOffset::UTC,
        );
        assert_eq!(view.path_data, Value::String("x=0,y=0".into()));
    }
}
