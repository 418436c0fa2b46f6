//! MySQL location mirror.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

use super::{LocationMirror, MirrorError};
use crate::config::{ConfigError, DurableConfig};
use crate::model::LocationSnapshot;

const UPDATE_LAST_KNOWN_LOCATION: &str = "UPDATE shipments \
     SET last_known_latitude = ?, last_known_longitude = ?, last_known_bearing = ?, \
     last_location_update = FROM_UNIXTIME(? / 1000) \
     WHERE id = ?";

/// Writes last known locations onto the `shipments` table.
#[derive(Debug, Clone)]
pub struct MySqlLocationMirror {
    pool: MySqlPool,
}

impl MySqlLocationMirror {
    /// Opens a small connection pool against the durable store.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingValue` - If no database URL is configured
    /// - `ConfigError::Initialization` - If the pool cannot connect
    pub async fn connect(config: &DurableConfig) -> Result<Self, ConfigError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingValue {
                name: "WAYPOINT_DATABASE_URL",
            })?;

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| ConfigError::Initialization {
                component: "mysql pool",
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl LocationMirror for MySqlLocationMirror {
    async fn update_last_known_location(
        &self,
        snapshot: &LocationSnapshot,
    ) -> Result<u64, MirrorError> {
        let result = sqlx::query(UPDATE_LAST_KNOWN_LOCATION)
            .bind(snapshot.latitude)
            .bind(snapshot.longitude)
            .bind(snapshot.bearing)
            .bind(snapshot.timestamp_ms)
            .bind(snapshot.shipment_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| MirrorError::Backend {
                reason: e.to_string(),
            })?;

        Ok(result.rows_affected())
    }
}
