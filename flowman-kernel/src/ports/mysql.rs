/**
 * MYSQL PORT - Production store for plowing history and sensor logs
 *
 * ROLE :
 * Implements PersistencePort on top of MySQL with sqlx.
 *
 * OPERATION :
 * - One fresh connection per call, closed before returning
 * - On any error the connection is dropped, which closes the socket
 * - Every statement is a prepared statement with `?` placeholders
 * - path_data is a JSON column, read back through CAST(... AS CHAR)
 */

use super::{PersistencePort, PortError};
use crate::config::MysqlConf;
use crate::models::{HistoryRecord, NewHistoryRecord, NewSensorReading, SensorRecord};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::Connection;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

const CREATE_HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS plowing_history (
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
    path_data JSON NOT NULL,
    total_distance DOUBLE NOT NULL,
    moisture_at_start DOUBLE NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

const CREATE_SENSOR_TABLE: &str = "CREATE TABLE IF NOT EXISTS sensor_logs (
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
    moisture DOUBLE NOT NULL,
    status VARCHAR(32) NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

const INSERT_HISTORY: &str =
    "INSERT INTO plowing_history (path_data, total_distance, moisture_at_start) VALUES (?, ?, ?)";

const SELECT_HISTORY: &str = "SELECT id, CAST(path_data AS CHAR) AS path_data, total_distance, \
     moisture_at_start, created_at FROM plowing_history ORDER BY created_at DESC, id DESC LIMIT ?";

const DELETE_HISTORY: &str = "DELETE FROM plowing_history WHERE id = ?";

// DELETE rather than TRUNCATE so AUTO_INCREMENT keeps counting up
const CLEAR_HISTORY: &str = "DELETE FROM plowing_history";

const INSERT_SENSOR: &str = "INSERT INTO sensor_logs (moisture, status) VALUES (?, ?)";

const SELECT_LATEST_SENSOR: &str =
    "SELECT id, moisture, status, created_at FROM sensor_logs ORDER BY created_at DESC, id DESC LIMIT 1";

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: u64,
    path_data: String,
    total_distance: f64,
    moisture_at_start: Option<f64>,
    created_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct SensorRow {
    id: u64,
    moisture: f64,
    status: Option<String>,
    created_at: OffsetDateTime,
}

impl From<HistoryRow> for HistoryRecord {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            path_data: row.path_data,
            total_distance: row.total_distance,
            moisture_at_start: row.moisture_at_start,
            created_at: row.created_at,
        }
    }
}

impl From<SensorRow> for SensorRecord {
    fn from(row: SensorRow) -> Self {
        Self {
            id: row.id,
            moisture: row.moisture,
            status: row.status,
            created_at: row.created_at,
        }
    }
}

pub struct MySqlPort {
    options: MySqlConnectOptions,
    target: String,
}

impl MySqlPort {
    pub fn new(conf: &MysqlConf) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&conf.host)
            .port(conf.port)
            .username(&conf.user)
            .password(&conf.password)
            .database(&conf.database);
        Self {
            options,
            target: format!("{}:{}/{}", conf.host, conf.port, conf.database),
        }
    }

    async fn connect(&self) -> Result<MySqlConnection, PortError> {
        MySqlConnection::connect_with(&self.options).await.map_err(|e| {
            error!("[store] cannot connect to {}: {e}", self.target);
            PortError::Unavailable(e.to_string())
        })
    }

    pub async fn bootstrap_schema(&self) -> Result<(), PortError> {
        let mut conn = self.connect().await?;
        let mut result = sqlx::query(CREATE_HISTORY_TABLE).execute(&mut conn).await;
        if result.is_ok() {
            result = sqlx::query(CREATE_SENSOR_TABLE).execute(&mut conn).await;
        }
        release(conn).await;
        result.map(|_| ()).map_err(statement_error)
    }
}

/// Closes a connection once the statement is done. A failed close only
/// loses the goodbye packet, the socket is dropped either way.
async fn release(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        warn!("[store] connection close failed: {e}");
    }
}

fn statement_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PortError::Unavailable(e.to_string())
        }
        other => PortError::Query(other.to_string()),
    }
}

#[async_trait]
impl PersistencePort for MySqlPort {
    async fn insert_history(&self, record: &NewHistoryRecord) -> Result<u64, PortError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(INSERT_HISTORY)
            .bind(&record.path_data)
            .bind(record.total_distance)
            .bind(record.moisture_at_start)
            .execute(&mut conn)
            .await;
        release(conn).await;
        let done = result.map_err(statement_error)?;
        debug!("[store] history row {} written", done.last_insert_id());
        Ok(done.last_insert_id())
    }

    async fn recent_history(&self, limit: u32) -> Result<Vec<HistoryRecord>, PortError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query_as::<_, HistoryRow>(SELECT_HISTORY)
            .bind(limit)
            .fetch_all(&mut conn)
            .await;
        release(conn).await;
        Ok(result.map_err(statement_error)?.into_iter().map(Into::into).collect())
    }

    async fn delete_history(&self, id: u64) -> Result<bool, PortError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(DELETE_HISTORY).bind(id).execute(&mut conn).await;
        release(conn).await;
        Ok(result.map_err(statement_error)?.rows_affected() > 0)
    }

    async fn clear_history(&self) -> Result<u64, PortError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(CLEAR_HISTORY).execute(&mut conn).await;
        release(conn).await;
        Ok(result.map_err(statement_error)?.rows_affected())
    }

    async fn insert_sensor(&self, reading: &NewSensorReading) -> Result<u64, PortError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(INSERT_SENSOR)
            .bind(reading.moisture)
            .bind(reading.status.as_deref())
            .execute(&mut conn)
            .await;
        release(conn).await;
        Ok(result.map_err(statement_error)?.last_insert_id())
    }

    async fn latest_sensor(&self) -> Result<Option<SensorRecord>, PortError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query_as::<_, SensorRow>(SELECT_LATEST_SENSOR)
            .fetch_optional(&mut conn)
            .await;
        release(conn).await;
        Ok(result.map_err(statement_error)?.map(Into::into))
    }

    fn backend(&self) -> &'static str {
        "mysql"
    }
}
