/**
 * COMMAND DISPATCH - One-shot MQTT publisher for plow commands
 *
 * ROLE :
 * Sends one DeviceCommand to the broker and reports whether the broker
 * acknowledged it. Never retries: the caller decides what a failure means.
 *
 * OPERATION :
 * - Opens a dedicated broker session per publish (unique client id)
 * - Publishes at QoS 1 and polls the event loop until the PUBACK arrives
 * - The whole exchange, connect included, is bounded by `ack_timeout`
 * - Sends DISCONNECT after an acknowledged publish, drops the socket otherwise
 */

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::MqttConf;

/// Paths are not size-capped, so allow commands far beyond rumqttc's 10 KiB default.
const MAX_COMMAND_BYTES: usize = 1024 * 1024;
const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub pkid: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("broker did not acknowledge within {0:?}")]
    TimedOut(Duration),
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("command encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, ack_timeout: Duration) -> Result<Ack, DispatchError>;
}

pub type SharedPublisher = Arc<dyn CommandPublisher>;

pub struct MqttCommandPublisher {
    host: String,
    port: u16,
    client_prefix: String,
    keep_alive: Duration,
}

impl MqttCommandPublisher {
    pub fn new(conf: &MqttConf) -> Self {
        Self {
            host: conf.host.clone(),
            port: conf.port,
            client_prefix: conf.client_prefix.clone(),
            keep_alive: conf.keep_alive(),
        }
    }

    fn options(&self) -> MqttOptions {
        // public brokers kick the older session when two clients share an id
        let client_id = format!("{}-cmd-{}", self.client_prefix, Uuid::new_v4().simple());
        let mut opts = MqttOptions::new(client_id, &self.host, self.port);
        opts.set_keep_alive(self.keep_alive);
        opts.set_clean_session(true);
        opts.set_max_packet_size(MAX_COMMAND_BYTES, MAX_COMMAND_BYTES);
        opts
    }
}

async fn wait_for_puback(eventloop: &mut EventLoop) -> Result<u16, ConnectionError> {
    loop {
        if let Event::Incoming(Packet::PubAck(ack)) = eventloop.poll().await? {
            return Ok(ack.pkid);
        }
    }
}

async fn drain_until_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl CommandPublisher for MqttCommandPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, ack_timeout: Duration) -> Result<Ack, DispatchError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;

        // single publish in flight, so the first PUBACK is ours
        let pkid = match timeout(ack_timeout, wait_for_puback(&mut eventloop)).await {
            Ok(Ok(pkid)) => pkid,
            Ok(Err(e)) => return Err(DispatchError::Connection(e.to_string())),
            Err(_) => return Err(DispatchError::TimedOut(ack_timeout)),
        };

        if client.try_disconnect().is_ok() {
            let _ = timeout(DISCONNECT_GRACE, drain_until_disconnect(&mut eventloop)).await;
        }
        Ok(Ack { topic: topic.to_string(), pkid })
    }
}
