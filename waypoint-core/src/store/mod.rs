//! Storage contracts for simulation state and the active simulation set.
//!
//! The registry decides which shipments are worth considering; the state store
//! is authoritative for what a simulation contains. They are addressed
//! independently, so a registered ID without state is expected after races
//! with cleanup and is handled as a cleanup trigger rather than an error.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;

use async_trait::async_trait;
pub use memory::{InMemoryRegistry, InMemoryStateStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisSimulationStore;

use crate::model::{ShipmentId, SimulatedVehicle};

/// Key-value persistence of per-shipment simulation state.
///
/// Expiry and eviction policy belong to the implementation.
#[async_trait]
pub trait SimulationStateStore: Send + Sync {
    /// Loads the state for `shipment_id`, `None` when absent.
    ///
    /// # Errors
    ///
    /// - `StoreError::Backend` - If the store could not be reached
    /// - `StoreError::Serialization` - If the stored payload is corrupt
    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<SimulatedVehicle>, StoreError>;

    /// Writes `vehicle` unconditionally.
    ///
    /// # Errors
    ///
    /// - `StoreError::Backend` - If the write failed
    async fn set(&self, vehicle: &SimulatedVehicle) -> Result<(), StoreError>;

    /// Writes `vehicle` only if the stored version equals `expected_version`.
    ///
    /// Returns `false` when another writer got there first or the entry has
    /// disappeared (unless `expected_version` is 0, which also accepts an
    /// absent entry).
    ///
    /// # Errors
    ///
    /// - `StoreError::Backend` - If the write failed
    async fn compare_and_set(
        &self,
        vehicle: &SimulatedVehicle,
        expected_version: u64,
    ) -> Result<bool, StoreError>;

    /// Removes the state for `shipment_id`.
    ///
    /// # Errors
    ///
    /// - `StoreError::Backend` - If the delete failed
    async fn delete(&self, shipment_id: &ShipmentId) -> Result<(), StoreError>;
}

/// Set of shipment IDs eligible for ticking.
///
/// Membership changes are atomic adds and removes, never a rewrite of the
/// whole set, so concurrent starters and scheduler cleanups cannot lose
/// each other's updates.
#[async_trait]
pub trait ActiveSimulationRegistry: Send + Sync {
    /// # Errors
    ///
    /// - `StoreError::Backend` - If the registry could not be read
    async fn list(&self) -> Result<Vec<ShipmentId>, StoreError>;

    /// # Errors
    ///
    /// - `StoreError::Backend` - If the registry could not be updated
    async fn add(&self, shipment_id: &ShipmentId) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// - `StoreError::Backend` - If the registry could not be updated
    async fn remove(&self, shipment_id: &ShipmentId) -> Result<(), StoreError>;
}

/// Errors from cache-backed state and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {reason}")]
    Backend { reason: String },

    #[error("Corrupt simulation state for {shipment_id}: {source}")]
    Serialization {
        shipment_id: String,
        #[source]
        source: serde_json::Error,
    },
}
