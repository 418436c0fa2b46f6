//! Start and status transitions driven from outside the tick loop.
//!
//! The tick processor only ever moves a vehicle from `EnRoute` to
//! `PendingDeliveryConfirmation`. Every other edge goes through
//! [`SimulationControl`], which checks the stored version before writing so a
//! transition never clobbers a tick that landed in between.

use std::sync::Arc;

use crate::clock::Clock;
use crate::geo::{GeoError, RouteGeometry};
use crate::model::{ShipmentId, SimulatedVehicle, SimulationStatus};
use crate::store::{ActiveSimulationRegistry, SimulationStateStore, StoreError};

/// Errors from lifecycle transitions.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("No simulation found for shipment {shipment_id}")]
    NotFound { shipment_id: ShipmentId },

    #[error("Simulation {shipment_id} is already active with status {status}")]
    AlreadyActive {
        shipment_id: ShipmentId,
        status: SimulationStatus,
    },

    #[error("Cannot move simulation {shipment_id} from {from} to {to}")]
    InvalidTransition {
        shipment_id: ShipmentId,
        from: SimulationStatus,
        to: SimulationStatus,
    },

    #[error("Route distance must be positive and finite, got {distance}")]
    InvalidRouteDistance { distance: f64 },

    #[error("Invalid route: {0}")]
    InvalidRoute(#[from] GeoError),

    #[error("Simulation {shipment_id} changed concurrently, transition not applied")]
    Conflict { shipment_id: ShipmentId },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

/// Creates simulations and applies externally owned status transitions.
pub struct SimulationControl {
    states: Arc<dyn SimulationStateStore>,
    registry: Arc<dyn ActiveSimulationRegistry>,
    clock: Arc<dyn Clock>,
}

impl SimulationControl {
    pub fn new(
        states: Arc<dyn SimulationStateStore>,
        registry: Arc<dyn ActiveSimulationRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            states,
            registry,
            clock,
        }
    }

    /// Creates a simulation waiting for pickup at the start of `route` and
    /// registers it as active.
    ///
    /// A shipment whose previous simulation reached a terminal status can be
    /// started again.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidRoute` - If the geometry is malformed
    /// - `LifecycleError::InvalidRouteDistance` - If `route_distance` is not positive
    /// - `LifecycleError::AlreadyActive` - If a non-terminal simulation exists
    /// - `LifecycleError::Store` - If state or registry writes failed
    pub async fn start(
        &self,
        shipment_id: &ShipmentId,
        route: RouteGeometry,
        route_distance: f64,
    ) -> Result<SimulatedVehicle, LifecycleError> {
        route.validate()?;
        if !route_distance.is_finite() || route_distance <= 0.0 {
            return Err(LifecycleError::InvalidRouteDistance {
                distance: route_distance,
            });
        }

        let previous = self.states.get(shipment_id).await?;
        if let Some(existing) = previous.as_ref().filter(|v| !v.status.is_terminal()) {
            return Err(LifecycleError::AlreadyActive {
                shipment_id: shipment_id.clone(),
                status: existing.status,
            });
        }

        let (Some(start), Some(destination)) = (route.start(), route.end()) else {
            return Err(GeoError::TooFewCoordinates {
                count: route.coordinates.len(),
            }
            .into());
        };
        let vehicle = SimulatedVehicle {
            shipment_id: shipment_id.clone(),
            status: SimulationStatus::PendingPickup,
            route: Some(route),
            route_distance,
            traveled_distance: 0.0,
            current_position: start,
            bearing: 0.0,
            destination_coordinates: destination,
            last_update_time: self.clock.now_ms(),
            version: previous.map_or(1, |v| v.version.wrapping_add(1)),
        };

        // State without registration is never ticked; the reverse is cleaned up
        self.registry.add(shipment_id).await?;
        self.states.set(&vehicle).await?;

        tracing::info!(
            "Started simulation {} over {:.0} m",
            shipment_id,
            route_distance
        );
        Ok(vehicle)
    }

    /// Puts a vehicle in motion.
    ///
    /// The clock is stamped now so the first tick integrates transit time only,
    /// not the time spent waiting for pickup.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidTransition` - Unless the vehicle is idle or pending pickup
    /// - `LifecycleError::NotFound` / `Conflict` / `Store` - See [`Self::confirm_delivery`]
    pub async fn begin_transit(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<SimulatedVehicle, LifecycleError> {
        // Re-registers before the write in case cleanup raced with a restart
        self.transition(shipment_id, SimulationStatus::EnRoute, true, |status| {
            matches!(
                status,
                SimulationStatus::PendingPickup | SimulationStatus::Idle
            )
        })
        .await
    }

    /// Closes out a vehicle that has arrived.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::NotFound` - If there is no simulation
    /// - `LifecycleError::InvalidTransition` - Unless delivery is pending confirmation
    /// - `LifecycleError::Conflict` - If the state changed during the transition
    /// - `LifecycleError::Store` - If the store failed
    pub async fn confirm_delivery(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<SimulatedVehicle, LifecycleError> {
        self.transition(shipment_id, SimulationStatus::Completed, false, |status| {
            status == SimulationStatus::PendingDeliveryConfirmation
        })
        .await
    }

    /// Moves any non-terminal simulation to `Error`.
    pub async fn mark_error(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<SimulatedVehicle, LifecycleError> {
        self.transition(shipment_id, SimulationStatus::Error, false, |status| {
            !status.is_terminal()
        })
        .await
    }

    /// Moves any non-terminal simulation to `AwaitingStatus`.
    pub async fn mark_awaiting_status(
        &self,
        shipment_id: &ShipmentId,
    ) -> Result<SimulatedVehicle, LifecycleError> {
        self.transition(shipment_id, SimulationStatus::AwaitingStatus, false, |status| {
            !status.is_terminal()
        })
        .await
    }

    async fn transition(
        &self,
        shipment_id: &ShipmentId,
        to: SimulationStatus,
        register: bool,
        allowed_from: impl Fn(SimulationStatus) -> bool,
    ) -> Result<SimulatedVehicle, LifecycleError> {
        let current = self
            .states
            .get(shipment_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound {
                shipment_id: shipment_id.clone(),
            })?;

        if !allowed_from(current.status) {
            return Err(LifecycleError::InvalidTransition {
                shipment_id: shipment_id.clone(),
                from: current.status,
                to,
            });
        }

        if register {
            self.registry.add(shipment_id).await?;
        }

        let mut next = current.clone();
        next.status = to;
        next.last_update_time = self.clock.now_ms();
        next.version = current.version.wrapping_add(1);

        if !self.states.compare_and_set(&next, current.version).await? {
            return Err(LifecycleError::Conflict {
                shipment_id: shipment_id.clone(),
            });
        }

        tracing::info!("Simulation {} moved {} -> {}", shipment_id, current.status, to);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::GeoPoint;
    use crate::store::{InMemoryRegistry, InMemoryStateStore};
    use crate::test_mocks::{InterleavingStateStore, UnreachableRegistry};

    fn route() -> RouteGeometry {
        RouteGeometry::from_points(&[GeoPoint::new(52.52, 13.405), GeoPoint::new(52.53, 13.405)])
    }

    fn id(raw: &str) -> ShipmentId {
        ShipmentId::parse(raw).unwrap()
    }

    struct Fixture {
        states: Arc<InMemoryStateStore>,
        registry: Arc<InMemoryRegistry>,
        clock: Arc<ManualClock>,
        control: SimulationControl,
    }

    fn fixture() -> Fixture {
        let states = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let control = SimulationControl::new(states.clone(), registry.clone(), clock.clone());
        Fixture {
            states,
            registry,
            clock,
            control,
        }
    }

    #[tokio::test]
    async fn test_start_creates_pending_pickup_at_route_start() {
        let f = fixture();
        let vehicle = f.control.start(&id("SHP-1"), route(), 1_112.0).await.unwrap();

        assert_eq!(vehicle.status, SimulationStatus::PendingPickup);
        assert_eq!(vehicle.current_position, GeoPoint::new(52.52, 13.405));
        assert_eq!(vehicle.destination_coordinates, GeoPoint::new(52.53, 13.405));
        assert_eq!(vehicle.traveled_distance, 0.0);
        assert_eq!(vehicle.last_update_time, 1_000_000);
        assert!(f.registry.contains(&id("SHP-1")));
        assert_eq!(f.states.get(&id("SHP-1")).await.unwrap(), Some(vehicle));
    }

    #[tokio::test]
    async fn test_start_rejects_bad_input() {
        let f = fixture();
        let single = RouteGeometry::from_points(&[GeoPoint::new(0.0, 0.0)]);

        assert!(matches!(
            f.control.start(&id("A"), single, 10.0).await,
            Err(LifecycleError::InvalidRoute(GeoError::TooFewCoordinates { count: 1 }))
        ));
        assert!(matches!(
            f.control.start(&id("A"), route(), 0.0).await,
            Err(LifecycleError::InvalidRouteDistance { .. })
        ));
        assert!(matches!(
            f.control.start(&id("A"), route(), f64::NAN).await,
            Err(LifecycleError::InvalidRouteDistance { .. })
        ));
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_active_but_allows_restart_after_terminal() {
        let f = fixture();
        let shipment = id("SHP-1");
        f.control.start(&shipment, route(), 1_112.0).await.unwrap();

        assert!(matches!(
            f.control.start(&shipment, route(), 1_112.0).await,
            Err(LifecycleError::AlreadyActive {
                status: SimulationStatus::PendingPickup,
                ..
            })
        ));

        let failed = f.control.mark_error(&shipment).await.unwrap();
        let restarted = f.control.start(&shipment, route(), 1_112.0).await.unwrap();
        assert_eq!(restarted.status, SimulationStatus::PendingPickup);
        assert!(restarted.version > failed.version);
    }

    #[tokio::test]
    async fn test_begin_transit_stamps_clock() {
        let f = fixture();
        let shipment = id("SHP-1");
        f.control.start(&shipment, route(), 1_112.0).await.unwrap();
        f.clock.advance(Duration::from_secs(600));

        let moving = f.control.begin_transit(&shipment).await.unwrap();

        assert_eq!(moving.status, SimulationStatus::EnRoute);
        assert_eq!(moving.last_update_time, 1_600_000);
        assert_eq!(moving.version, 2);
    }

    #[tokio::test]
    async fn test_full_lifecycle_and_invalid_edges() {
        let f = fixture();
        let shipment = id("SHP-1");
        f.control.start(&shipment, route(), 1_112.0).await.unwrap();

        assert!(matches!(
            f.control.confirm_delivery(&shipment).await,
            Err(LifecycleError::InvalidTransition {
                from: SimulationStatus::PendingPickup,
                to: SimulationStatus::Completed,
                ..
            })
        ));

        f.control.begin_transit(&shipment).await.unwrap();
        assert!(matches!(
            f.control.begin_transit(&shipment).await,
            Err(LifecycleError::InvalidTransition { .. })
        ));

        let mut arrived = f.states.get(&shipment).await.unwrap().unwrap();
        arrived.status = SimulationStatus::PendingDeliveryConfirmation;
        f.states.set(&arrived).await.unwrap();

        let done = f.control.confirm_delivery(&shipment).await.unwrap();
        assert_eq!(done.status, SimulationStatus::Completed);

        assert!(matches!(
            f.control.mark_awaiting_status(&shipment).await,
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_on_missing_simulation() {
        let f = fixture();
        assert!(matches!(
            f.control.begin_transit(&id("ghost")).await,
            Err(LifecycleError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_loses_to_concurrent_write() {
        let f = fixture();
        let shipment = id("SHP-1");
        let started = f.control.start(&shipment, route(), 1_112.0).await.unwrap();

        let mut rival = started.clone();
        rival.version += 1;
        let racing = SimulationControl::new(
            Arc::new(InterleavingStateStore::new(f.states.clone(), rival)),
            f.registry.clone(),
            f.clock.clone(),
        );

        assert!(matches!(
            racing.begin_transit(&shipment).await,
            Err(LifecycleError::Conflict { .. })
        ));
        let stored = f.states.get(&shipment).await.unwrap().unwrap();
        assert_eq!(stored.status, SimulationStatus::PendingPickup);
    }

    #[tokio::test]
    async fn test_registry_failure_leaves_state_retryable() {
        let f = fixture();
        let shipment = id("SHP-1");
        let unreachable = SimulationControl::new(
            f.states.clone(),
            Arc::new(UnreachableRegistry),
            f.clock.clone(),
        );

        assert!(matches!(
            unreachable.start(&shipment, route(), 1_112.0).await,
            Err(LifecycleError::Store(_))
        ));
        assert_eq!(f.states.get(&shipment).await.unwrap(), None);

        f.control.start(&shipment, route(), 1_112.0).await.unwrap();
        assert!(matches!(
            unreachable.begin_transit(&shipment).await,
            Err(LifecycleError::Store(_))
        ));
        let stored = f.states.get(&shipment).await.unwrap().unwrap();
        assert_eq!(stored.status, SimulationStatus::PendingPickup);

        // Retrying once the registry is back succeeds
        let moving = f.control.begin_transit(&shipment).await.unwrap();
        assert_eq!(moving.status, SimulationStatus::EnRoute);
        assert!(f.registry.contains(&shipment));
    }
}
