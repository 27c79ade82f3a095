/**
 * MEMORY PORT - Process-local store
 *
 * ROLE :
 * Same contract as the MySQL backend without a database server. Used for
 * local development (`storage.backend: memory`) and by the test suites.
 *
 * OPERATION :
 * - Both tables live in one Vec each, guarded by a single mutex
 * - Ids come from per-table counters that never go back, even after deletes
 * - created_at is taken at insert time, like a TIMESTAMP DEFAULT column
 */

use super::{PersistencePort, PortError};
use crate::models::{HistoryRecord, NewHistoryRecord, NewSensorReading, SensorRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

#[derive(Default)]
struct Tables {
    history: Vec<HistoryRecord>,
    sensors: Vec<SensorRecord>,
    last_history_id: u64,
    last_sensor_id: u64,
}

#[derive(Default)]
pub struct MemoryPort {
    tables: Mutex<Tables>,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.tables.lock().history.len()
    }
}

#[async_trait]
impl PersistencePort for MemoryPort {
    async fn insert_history(&self, record: &NewHistoryRecord) -> Result<u64, PortError> {
        let mut tables = self.tables.lock();
        tables.last_history_id += 1;
        let id = tables.last_history_id;
        tables.history.push(HistoryRecord {
            id,
            path_data: record.path_data.clone(),
            total_distance: record.total_distance,
            moisture_at_start: record.moisture_at_start,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn recent_history(&self, limit: u32) -> Result<Vec<HistoryRecord>, PortError> {
        let tables = self.tables.lock();
        Ok(tables.history.iter().rev().take(limit as usize).cloned().collect())
    }

    async fn delete_history(&self, id: u64) -> Result<bool, PortError> {
        let mut tables = self.tables.lock();
        let before = tables.history.len();
        tables.history.retain(|r| r.id != id);
        Ok(tables.history.len() != before)
    }

    async fn clear_history(&self) -> Result<u64, PortError> {
        let mut tables = self.tables.lock();
        let removed = tables.history.len() as u64;
        tables.history.clear();
        Ok(removed)
    }

    async fn insert_sensor(&self, reading: &NewSensorReading) -> Result<u64, PortError> {
        let mut tables = self.tables.lock();
        tables.last_sensor_id += 1;
        let id = tables.last_sensor_id;
        tables.sensors.push(SensorRecord {
            id,
            moisture: reading.moisture,
            status: reading.status.clone(),
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn latest_sensor(&self) -> Result<Option<SensorRecord>, PortError> {
        Ok(self.tables.lock().sensors.last().cloned())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
