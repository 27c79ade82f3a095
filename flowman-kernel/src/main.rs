/**
 * FLOWMAN KERNEL - Main entry point of the Smart Rice Flowman backend
 *
 * ROLE : Wires config, storage, MQTT dispatch, sensor listener and HTTP.
 *
 * ARCHITECTURE : REST API -> plowing history store -> MQTT command to the plow,
 * plus an MQTT listener feeding soil moisture readings back into the store.
 */

mod config;
mod dispatch;
mod health;
mod http;
mod models;
mod mqtt;
mod ports;
mod soil;
mod submission;

use crate::config::load_config;
use crate::dispatch::MqttCommandPublisher;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::ports::create_port;
use crate::submission::SubmissionPipeline;

use anyhow::{Context, Result};
use std::sync::Arc;
use time::UtcOffset;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    let health = HealthTracker::new();

    let store = create_port(&cfg.storage).await;
    info!("[kernel] storage backend: {}", store.backend());

    let publisher = Arc::new(MqttCommandPublisher::new(&cfg.mqtt));
    let pipeline = SubmissionPipeline::new(
        store.clone(),
        publisher,
        cfg.mqtt.command_topic.clone(),
        cfg.mqtt.ack_timeout(),
        health.clone(),
    );
    info!(
        "[kernel] commands go to {} on {}:{} (ack timeout {:?})",
        cfg.mqtt.command_topic,
        cfg.mqtt.host,
        cfg.mqtt.port,
        cfg.mqtt.ack_timeout()
    );

    if cfg.mqtt.sensor_listener {
        mqtt::spawn_sensor_listener(cfg.mqtt.clone(), store.clone(), health.clone());
    }

    let display_offset = UtcOffset::from_hms(cfg.display_utc_offset_hours, 0, 0).unwrap_or_else(|e| {
        warn!("[kernel] display_utc_offset_hours ignored: {e}");
        UtcOffset::UTC
    });

    let app_state = AppState {
        store,
        pipeline: Arc::new(pipeline),
        health,
        history_limit: cfg.storage.effective_history_limit(),
        display_offset,
    };
    let app = http::build_router(app_state);

    let addr = format!("{}:{}", cfg.http.host, cfg.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("[kernel] listening on http://{addr}");
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
