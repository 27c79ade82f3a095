use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::ports::{PersistencePort, SharedPort};
use crate::soil::record_reading;
use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the field device publishes, e.g. `{"moisture": 75.5}`.
#[derive(Debug, Deserialize)]
struct SensorPayload {
    moisture: f64,
    #[serde(default)]
    status: Option<String>,
}

/// Decodes one sensor message and writes it to `sensor_logs`.
pub async fn ingest_sensor_payload(store: &dyn PersistencePort, payload: &[u8]) -> Result<(u64, String)> {
    let reading: SensorPayload = serde_json::from_slice(payload)
        .with_context(|| format!("invalid sensor JSON: {}", String::from_utf8_lossy(payload)))?;
    let (id, status) = record_reading(store, reading.moisture, reading.status).await?;
    Ok((id, status))
}

/// Long-lived subscription to the sensor topic. Subscribes again on every
/// CONNACK since sessions are clean.
pub fn spawn_sensor_listener(conf: MqttConf, store: SharedPort, health: HealthTracker) {
    task::spawn(async move {
        let client_id = format!("{}-sensor-{}", conf.client_prefix, Uuid::new_v4().simple());
        let mut opts = MqttOptions::new(client_id, &conf.host, conf.port);
        opts.set_keep_alive(conf.keep_alive());
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        health.mark_sensor_connecting();
        info!("[sensor] listening on {} via {}:{}", conf.sensor_topic, conf.host, conf.port);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    health.mark_sensor_connected();
                    if let Err(e) = client.try_subscribe(conf.sensor_topic.as_str(), QoS::AtLeastOnce) {
                        warn!("[sensor] subscribe failed: {e:?}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == conf.sensor_topic => {
                    match ingest_sensor_payload(store.as_ref(), &p.payload).await {
                        Ok((id, status)) => debug!("[sensor] reading #{id} stored ({status})"),
                        Err(e) => warn!("[sensor] reading dropped: {e:#}"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("[sensor] MQTT error: {e:?}");
                    health.increment_sensor_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
