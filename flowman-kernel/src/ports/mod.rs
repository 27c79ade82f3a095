/**
 * PERSISTENCE PORT - Storage contract of the flowman kernel
 *
 * ROLE :
 * Defines the single interface every storage backend implements, so the
 * submission pipeline and the query endpoints never know which store sits
 * behind them.
 *
 * OPERATION :
 * - PersistencePort trait = write/read contract for `plowing_history` and `sensor_logs`
 * - MySqlPort = production backend, one connection per call, parameterized statements
 * - MemoryPort = process-local backend for development and tests
 * - PortError = unavailable store vs failed statement, the HTTP layer maps both
 *
 * INVARIANTS :
 * - Ids are assigned by the store and only ever grow
 * - created_at is assigned by the store at write time (UTC)
 * - A connection never outlives the call that opened it, error paths included
 */

pub mod memory;
pub mod mysql;

use crate::config::{StorageBackend, StorageConf};
use crate::models::{HistoryRecord, NewHistoryRecord, NewSensorReading, SensorRecord};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

pub use memory::MemoryPort;
pub use mysql::MySqlPort;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// No connection could be acquired.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The statement itself failed (constraint, syntax, decode...).
    #[error("query failed: {0}")]
    Query(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Inserts one history row and returns its id.
    async fn insert_history(&self, record: &NewHistoryRecord) -> Result<u64, PortError>;

    /// Newest first, at most `limit` rows.
    async fn recent_history(&self, limit: u32) -> Result<Vec<HistoryRecord>, PortError>;

    /// Returns false when no row had this id.
    async fn delete_history(&self, id: u64) -> Result<bool, PortError>;

    /// Deletes every history row and returns how many were removed.
    async fn clear_history(&self) -> Result<u64, PortError>;

    async fn insert_sensor(&self, reading: &NewSensorReading) -> Result<u64, PortError>;

    async fn latest_sensor(&self) -> Result<Option<SensorRecord>, PortError>;

    /// Short backend name, reported by `/system/health`.
    fn backend(&self) -> &'static str;
}

pub type SharedPort = Arc<dyn PersistencePort>;

/// Builds the backend selected in the config. Schema bootstrap failures are
/// logged only: the store may simply not be up yet.
pub async fn create_port(conf: &StorageConf) -> SharedPort {
    match conf.backend {
        StorageBackend::Memory => {
            info!("[store] using in-memory backend, history is lost on restart");
            Arc::new(MemoryPort::new())
        }
        StorageBackend::Mysql => {
            let port = MySqlPort::new(&conf.mysql);
            if conf.bootstrap_schema {
                match port.bootstrap_schema().await {
                    Ok(()) => info!("[store] schema ready"),
                    Err(e) => error!("[store] schema bootstrap failed: {e}"),
                }
            }
            Arc::new(port)
        }
    }
}
