use crate::dispatch::{Ack, DispatchError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub storage_backend: String,
    pub sensor_mqtt_status: String,
    pub sensor_mqtt_reconnects: u32,
    pub dispatch: DispatchStats,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub acknowledged: u64,
    pub timed_out: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    acknowledged: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    sensor_reconnects: Arc<AtomicU32>,
    sensor_status: Arc<Mutex<String>>,
    dispatch: Arc<Counters>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            sensor_reconnects: Arc::new(AtomicU32::new(0)),
            sensor_status: Arc::new(Mutex::new("disabled".to_string())),
            dispatch: Arc::new(Counters::default()),
        }
    }

    pub fn mark_sensor_connecting(&self) {
        *self.sensor_status.lock() = "connecting".to_string();
    }

    pub fn mark_sensor_connected(&self) {
        *self.sensor_status.lock() = "connected".to_string();
    }

    pub fn increment_sensor_reconnects(&self) {
        self.sensor_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.sensor_status.lock() = "reconnecting".to_string();
    }

    pub fn record_dispatch(&self, outcome: &Result<Ack, DispatchError>) {
        let counter = match outcome {
            Ok(_) => &self.dispatch.acknowledged,
            Err(DispatchError::TimedOut(_)) => &self.dispatch.timed_out,
            Err(_) => &self.dispatch.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        DispatchStats {
            acknowledged: self.dispatch.acknowledged.load(Ordering::Relaxed),
            timed_out: self.dispatch.timed_out.load(Ordering::Relaxed),
            failed: self.dispatch.failed.load(Ordering::Relaxed),
        }
    }

    pub fn get_health(&self, storage_backend: &str) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            storage_backend: storage_backend.to_string(),
            sensor_mqtt_status: self.sensor_status.lock().clone(),
            sensor_mqtt_reconnects: self.sensor_reconnects.load(Ordering::Relaxed),
            dispatch: self.dispatch_stats(),
        }
    }
}
