//! In-process state store and registry for development mode and tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ActiveSimulationRegistry, SimulationStateStore, StoreError};
use crate::model::{ShipmentId, SimulatedVehicle};

/// State store backed by a locked hash map.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<ShipmentId, SimulatedVehicle>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored simulations.
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Copy of every stored simulation, ordered by shipment ID.
    pub fn snapshot(&self) -> Vec<SimulatedVehicle> {
        let mut vehicles: Vec<_> = self.states.read().values().cloned().collect();
        vehicles.sort_by(|a, b| a.shipment_id.cmp(&b.shipment_id));
        vehicles
    }
}

#[async_trait]
impl SimulationStateStore for InMemoryStateStore {
    async fn get(&self, shipment_id: &ShipmentId) -> Result<Option<SimulatedVehicle>, StoreError> {
        Ok(self.states.read().get(shipment_id).cloned())
    }

    async fn set(&self, vehicle: &SimulatedVehicle) -> Result<(), StoreError> {
        self.states
            .write()
            .insert(vehicle.shipment_id.clone(), vehicle.clone());
        Ok(())
    }

    async fn compare_and_set(
        &self,
        vehicle: &SimulatedVehicle,
        expected_version: u64,
    ) -> Result<bool, StoreError> {
        let mut states = self.states.write();
        let current_version = states.get(&vehicle.shipment_id).map(|v| v.version);

        let matches = match current_version {
            Some(version) => version == expected_version,
            None => expected_version == 0,
        };
        if matches {
            states.insert(vehicle.shipment_id.clone(), vehicle.clone());
        }
        Ok(matches)
    }

    async fn delete(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        self.states.write().remove(shipment_id);
        Ok(())
    }
}

/// Active set backed by a locked ordered set.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    active: RwLock<BTreeSet<ShipmentId>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, shipment_id: &ShipmentId) -> bool {
        self.active.read().contains(shipment_id)
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

#[async_trait]
impl ActiveSimulationRegistry for InMemoryRegistry {
    async fn list(&self) -> Result<Vec<ShipmentId>, StoreError> {
        Ok(self.active.read().iter().cloned().collect())
    }

    async fn add(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        self.active.write().insert(shipment_id.clone());
        Ok(())
    }

    async fn remove(&self, shipment_id: &ShipmentId) -> Result<(), StoreError> {
        self.active.write().remove(shipment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::geo::GeoPoint;
    use crate::model::SimulationStatus;

    fn vehicle(id: &str, version: u64) -> SimulatedVehicle {
        let point = GeoPoint::new(0.0, 0.0);
        SimulatedVehicle {
            shipment_id: ShipmentId::parse(id).unwrap(),
            status: SimulationStatus::EnRoute,
            route: None,
            route_distance: 100.0,
            traveled_distance: 0.0,
            current_position: point,
            bearing: 0.0,
            destination_coordinates: point,
            last_update_time: 0,
            version,
        }
    }

    #[tokio::test]
    async fn test_compare_and_set_checks_version() {
        let store = InMemoryStateStore::new();
        store.set(&vehicle("A", 3)).await.unwrap();

        assert!(!store.compare_and_set(&vehicle("A", 4), 2).await.unwrap());
        assert_eq!(store.get(&vehicle("A", 0).shipment_id).await.unwrap().unwrap().version, 3);

        assert!(store.compare_and_set(&vehicle("A", 4), 3).await.unwrap());
        assert_eq!(store.get(&vehicle("A", 0).shipment_id).await.unwrap().unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_compare_and_set_on_missing_entry() {
        let store = InMemoryStateStore::new();

        assert!(!store.compare_and_set(&vehicle("gone", 5), 4).await.unwrap());
        assert!(store.is_empty());

        assert!(store.compare_and_set(&vehicle("fresh", 1), 0).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_concurrent_membership() {
        let registry = Arc::new(InMemoryRegistry::new());

        let mut handles = Vec::new();
        for i in 0..50 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let id = ShipmentId::parse(&format!("S-{i}")).unwrap();
                registry.add(&id).await.unwrap();
                if i % 2 == 0 {
                    registry.remove(&id).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len(), 25);
        assert!(registry.contains(&ShipmentId::parse("S-1").unwrap()));
        assert!(!registry.contains(&ShipmentId::parse("S-0").unwrap()));
    }
}
