//! Redis-backed state store and active set.
//!
//! State lives as JSON under `{key_prefix}{shipment_id}` with a TTL; the
//! active set is a Redis set mutated with `SADD`/`SREM`. Version-checked
//! writes run as a Lua script so the compare and the write are one atomic step.

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::{ActiveSimulationRegistry, SimulationStateStore, StoreError};
use crate::config::{CacheConfig, ConfigError};
use crate::model::{ShipmentId, SimulatedVehicle};

const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
local expected = tonumber(ARGV[2])
if current then
    local stored = cjson.decode(current)['version'] or 0
    if tonumber(stored) ~= expected then
        return 0
    end
elseif expected ~= 0 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

/// Simulation state store and registry sharing one Redis connection.
#[derive(Clone)]
pub struct RedisSimulationStore {
    connection: ConnectionManager,
    key_prefix: String,
    active_set_key: String,
    ttl_secs: u64,
    compare_and_set: redis::Script,
}

impl RedisSimulationStore {
    /// Connects to Redis using the cache configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError::MissingValue` - If no Redis URL is configured
    /// - `ConfigError::Initialization` - If the connection cannot be established
    pub async fn connect(config: &CacheConfig) -> Result<Self, ConfigError> {
        let url = config.redis_url.as_deref().ok_or(ConfigError::MissingValue {
            name: "WAYPOINT_REDIS_URL",
        })?;

        let client = redis::Client::open(url).map_err(|e| ConfigError::Initialization {
            component: "redis client",
            reason: e.to_string(),
        })?;
        let connection =
            ConnectionManager::new(client)
                .await
                .map_err(|e| ConfigError::Initialization {
                    component: "redis connection",
                    reason: e.to_string(),
                })?;

        tracing::info!("Connected simulation store to Redis");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            active_set_key: config.active_set_key.clone(),
            ttl_secs: config.state_ttl.as_secs().max(1),
            compare_and_set: redis::Script::new(COMPARE_AND_SET_SCRIPT),
        })
    }

    fn state_key(&self, shipment_id: &ShipmentId) -> String {
        format!("{}{}", self.key_prefix, shipment_id)
    }

    fn encode(vehicle: &SimulatedVehicle) -> Result<String, StoreError> {
        serde_json::to_string(vehicle).map_err(|source| StoreError::Serialization {
            shipment_id: vehicle.shipment_id.to_string(),
            source,
        })
    }
}

/// Active set members split by whether they can be used as stored.
#[derive(Debug, Default, PartialEq)]
struct SortedMembers {
    /// Every usable shipment, canonical form.
    active: Vec<ShipmentId>,
    /// Raw members to remove from the set.
    stale: Vec<String>,
    /// Canonical IDs to re-add in place of untrimmed members.
    renamed: Vec<ShipmentId>,
}

fn sort_members(members: Vec<String>) -> SortedMembers {
    let mut sorted = SortedMembers::default();
    for member in members {
        match ShipmentId::parse(&member) {
            Ok(id) if id.as_str() == member => sorted.active.push(id),
            Ok(id) => {
                sorted.stale.push(member);
                sorted.renamed.push(id.clone());
                sorted.active.push(id);
            }
            Err(_) => sorted.stale.push(member),
        }
    }
    sorted.active.sort();
    sorted.active.dedup();
    sorted
}

fn backend(error: redis::RedisError) -> StoreError {
    StoreError::Backend {
        reason: error.to_string(),
    }
}

#[async_trait]
impl SimulationStateStore for RedisSimulationStore {
    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<SimulatedVehicle>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.state_key(shipment_id))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|source| StoreError::Serialization {
                shipment_id: shipment_id.to_string(),
                source,
            })
        })
        .transpose()
    }

    async fn set(&self, vehicle: &SimulatedVehicle) -> Result<(), StoreError> {
        let payload = Self::encode(vehicle)?;
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.state_key(&vehicle.shipment_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        vehicle: &SimulatedVehicle,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let payload = Self::encode(vehicle)?;
        let mut conn = self.connection.clone();
        let applied: i64 = self
            .compare_and_set
            .key(self.state_key(&vehicle.shipment_id))
            .arg(payload)
            .arg(expected_version)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(applied == 1)
    }

    async fn delete(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.state_key(shipment_id))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl ActiveSimulationRegistry for RedisSimulationStore {
    async fn list(&self) -> Result<Vec<ShipmentId>, StoreError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&self.active_set_key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        let members = sort_members(members);
        if !members.stale.is_empty() {
            let mut pipe = redis::pipe();
            for raw in &members.stale {
                tracing::warn!("Repairing malformed active set member {:?}", raw);
                pipe.cmd("SREM").arg(&self.active_set_key).arg(raw).ignore();
            }
            for id in &members.renamed {
                pipe.cmd("SADD").arg(&self.active_set_key).arg(id.as_str()).ignore();
            }
            pipe.query_async::<_, ()>(&mut conn).await.map_err(backend)?;
        }

        Ok(members.active)
    }

    async fn add(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(&self.active_set_key)
            .arg(shipment_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn remove(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("SREM")
            .arg(&self.active_set_key)
            .arg(shipment_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ShipmentId {
        ShipmentId::parse(raw).unwrap()
    }

    #[test]
    fn test_sort_members_repairs_malformed_entries() {
        let sorted = sort_members(vec![
            "SHP-2".to_string(),
            "   ".to_string(),
            " SHP-1 ".to_string(),
            "SHP-1".to_string(),
        ]);

        assert_eq!(sorted.active, vec![id("SHP-1"), id("SHP-2")]);
        assert_eq!(sorted.stale, vec!["   ".to_string(), " SHP-1 ".to_string()]);
        assert_eq!(sorted.renamed, vec![id("SHP-1")]);
    }

    #[test]
    fn test_sort_members_leaves_canonical_set_alone() {
        let sorted = sort_members(vec!["A".to_string(), "B".to_string()]);

        assert_eq!(sorted.active, vec![id("A"), id("B")]);
        assert!(sorted.stale.is_empty());
        assert!(sorted.renamed.is_empty());
    }
}
