use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

/// Upper bound applied to the history listing, whatever the file says.
pub const MAX_HISTORY_LIMIT: u32 = 20;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub storage: StorageConf,
    pub mqtt: MqttConf,
    /// Offset (hours east of UTC) used when rendering timestamps to clients.
    pub display_utc_offset_hours: i8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mysql,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConf {
    pub backend: StorageBackend,
    pub mysql: MysqlConf,
    pub history_limit: u32,
    /// Runs `CREATE TABLE IF NOT EXISTS` for both tables at startup.
    pub bootstrap_schema: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MysqlConf {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub command_topic: String,
    pub sensor_topic: String,
    pub ack_timeout_ms: u64,
    pub keep_alive_secs: u64,
    pub client_prefix: String,
    pub sensor_listener: bool,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 8000 }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Mysql,
            mysql: MysqlConf::default(),
            history_limit: 10,
            bootstrap_schema: false,
        }
    }
}

impl Default for MysqlConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            database: "flowman".into(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".into(),
            port: 1883,
            command_topic: "smart_plowing/command".into(),
            sensor_topic: "smart_plowing/sensor".into(),
            ack_timeout_ms: 5_000,
            keep_alive_secs: 15,
            client_prefix: "flowman-kernel".into(),
            sensor_listener: true,
        }
    }
}

impl StorageConf {
    pub fn effective_history_limit(&self) -> u32 {
        self.history_limit.clamp(1, MAX_HISTORY_LIMIT)
    }
}

impl MqttConf {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        // rumqttc rejects keep-alive values below 5s
        Duration::from_secs(self.keep_alive_secs.max(5))
    }
}

impl KernelConfig {
    /// Applies the platform environment variables on top of the file values.
    /// The lookup is injected so tests don't have to touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let db = &mut self.storage.mysql;
        if let Some(v) = lookup("MYSQLHOST") { db.host = v; }
        if let Some(v) = lookup("MYSQLUSER") { db.user = v; }
        if let Some(v) = lookup("MYSQLPASSWORD") { db.password = v; }
        if let Some(v) = lookup("MYSQLDATABASE") { db.database = v; }
        if let Some(v) = lookup("MYSQLPORT") {
            match v.parse() {
                Ok(port) => db.port = port,
                Err(_) => warn!("[config] MYSQLPORT invalid: {v}"),
            }
        }
        if let Some(v) = lookup("PORT") {
            match v.parse() {
                Ok(port) => self.http.port = port,
                Err(_) => warn!("[config] PORT invalid: {v}"),
            }
        }
        if let Some(v) = lookup("MQTT_BROKER") { self.mqtt.host = v; }
        if let Some(v) = lookup("MQTT_PORT") {
            match v.parse() {
                Ok(port) => self.mqtt.port = port,
                Err(_) => warn!("[config] MQTT_PORT invalid: {v}"),
            }
        }
    }
}

fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("[config] config invalid: {e}");
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("FLOWMAN_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        info!("[config] no {path}, using defaults");
        KernelConfig::default()
    };
    cfg.apply_env_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    cfg
}
