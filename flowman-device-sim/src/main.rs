/**
 * FLOWMAN DEVICE SIM - Stand-in for the plow controller in the field
 *
 * ROLE :
 * Lets the whole loop run without hardware: kernel -> broker -> device and
 * device -> broker -> kernel.
 *
 * OPERATION :
 * - Listens on the command topic and "drives" each received path, logging
 *   one line per waypoint
 * - Publishes a soil moisture reading on the sensor topic at a fixed interval
 *
 * MQTT :
 * Listens: smart_plowing/command  ({"action", "device_id", "path", "timestamp"})
 * Publishes: smart_plowing/sensor ({"moisture": <f64>})
 */

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{interval, sleep};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SimConfig {
    broker_host: String,
    broker_port: u16,
    command_topic: String,
    sensor_topic: String,
    device_id: String,
    sensor_interval: Duration,
    step_delay: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            broker_host: "broker.hivemq.com".to_string(),
            broker_port: 1883,
            command_topic: "smart_plowing/command".to_string(),
            sensor_topic: "smart_plowing/sensor".to_string(),
            device_id: "dev-sim".to_string(),
            sensor_interval: Duration::from_secs(10),
            step_delay: Duration::from_millis(500),
        }
    }
}

impl SimConfig {
    fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("MQTT_BROKER") { cfg.broker_host = v; }
        if let Some(port) = lookup("MQTT_PORT").and_then(|v| v.parse::<u16>().ok()) { cfg.broker_port = port; }
        if let Some(v) = lookup("SIM_COMMAND_TOPIC") { cfg.command_topic = v; }
        if let Some(v) = lookup("SIM_SENSOR_TOPIC") { cfg.sensor_topic = v; }
        if let Some(v) = lookup("SIM_DEVICE_ID") { cfg.device_id = v; }
        if let Some(secs) = lookup("SIM_SENSOR_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            // tokio's interval panics on a zero period
            cfg.sensor_interval = Duration::from_secs(secs.max(1));
        }
        cfg
    }
}

/// Command sent by the kernel (same shape as its DeviceCommand).
#[derive(Debug, Deserialize)]
struct DeviceCommand {
    action: String,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    path: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    timestamp: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
struct SensorReading {
    moisture: f64,
}

/// Deterministic moisture curve: drifts slowly through dry, optimal and wet.
struct MoistureProbe {
    tick: u64,
}

impl MoistureProbe {
    fn new() -> Self {
        Self { tick: 0 }
    }

    fn next_reading(&mut self) -> SensorReading {
        let phase = self.tick as f64 / 12.0;
        self.tick += 1;
        let moisture = 55.0 + 35.0 * phase.sin();
        SensorReading { moisture: (moisture * 10.0).round() / 10.0 }
    }
}

/// True when this command is addressed to us. An empty device id is a broadcast.
fn is_for_device(cmd: &DeviceCommand, device_id: &str) -> bool {
    cmd.device_id.is_empty() || cmd.device_id == device_id
}

async fn drive_path(cmd: DeviceCommand, step_delay: Duration) {
    let sent = cmd
        .timestamp
        .map(|t| t.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("[device] {} with {} waypoints (sent {sent})", cmd.action, cmd.path.len());
    for (i, waypoint) in cmd.path.iter().enumerate() {
        info!("[device] step {}/{} -> {}", i + 1, cmd.path.len(), serde_json::Value::Object(waypoint.clone()));
        sleep(step_delay).await;
    }
    info!("[device] path done");
}

async fn handle_command(cfg: &SimConfig, payload: &[u8]) {
    match serde_json::from_slice::<DeviceCommand>(payload) {
        Ok(cmd) if is_for_device(&cmd, &cfg.device_id) => {
            tokio::spawn(drive_path(cmd, cfg.step_delay));
        }
        Ok(cmd) => info!("[device] ignoring command for '{}'", cmd.device_id),
        Err(e) => warn!("[device] invalid command JSON: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cfg = SimConfig::from_env(|k| std::env::var(k).ok().filter(|v| !v.is_empty()));
    info!("[device] {} starting against {}:{}", cfg.device_id, cfg.broker_host, cfg.broker_port);

    let client_id = format!("flowman-device-sim-{}", Uuid::new_v4().simple());
    let mut mqttopts = MqttOptions::new(client_id, &cfg.broker_host, cfg.broker_port);
    mqttopts.set_keep_alive(Duration::from_secs(30));
    mqttopts.set_max_packet_size(1024 * 1024, 1024 * 1024);

    let (client, mut eventloop) = AsyncClient::new(mqttopts, 10);

    let sensor_client = client.clone();
    let sensor_topic = cfg.sensor_topic.clone();
    let sensor_interval = cfg.sensor_interval;
    tokio::spawn(async move {
        let mut probe = MoistureProbe::new();
        let mut ticker = interval(sensor_interval);
        loop {
            ticker.tick().await;
            let reading = probe.next_reading();
            let payload = match serde_json::to_string(&reading) {
                Ok(p) => p,
                Err(e) => {
                    warn!("[device] cannot encode reading: {e}");
                    continue;
                }
            };
            match sensor_client.publish(sensor_topic.as_str(), QoS::AtLeastOnce, false, payload).await {
                Ok(()) => info!("[device] moisture {:.1}%", reading.moisture),
                Err(e) => warn!("[device] failed to publish reading: {e:?}"),
            }
        }
    });

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                client
                    .subscribe(cfg.command_topic.as_str(), QoS::AtLeastOnce)
                    .await
                    .context("subscribe to command topic")?;
                info!("[device] connected, waiting for commands on {}", cfg.command_topic);
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == cfg.command_topic => {
                handle_command(&cfg, &publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("[device] MQTT error: {e:?}");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
