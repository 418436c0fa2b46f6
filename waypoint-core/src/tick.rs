//! Advances one simulation by one time step.
//!
//! A tick is delivered by the work queue at least once, possibly twice, and
//! possibly concurrently with another delivery for the same shipment. Every
//! path that does not advance state is a cheap successful no-op, and the write
//! that does advance state is version-checked so two racing deliveries cannot
//! both integrate the same interval.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::SimulationConfig;
use crate::geo::{self, GeoError};
use crate::mirror::LocationMirror;
use crate::model::{ShipmentId, SimulatedVehicle, SimulationStatus};
use crate::store::{SimulationStateStore, StoreError};

/// Result of a tick that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No state exists; the simulation already finished or was cleaned up.
    NoActiveSimulation,
    /// The simulation is not moving.
    NotEnRoute { status: SimulationStatus },
    /// The clock has not advanced since the last persisted tick.
    NoTimeElapsed,
    /// Position moved along the route.
    Advanced {
        traveled_distance: f64,
        remaining_distance: f64,
    },
    /// The vehicle reached its destination and awaits delivery confirmation.
    Arrived,
}

impl TickOutcome {
    /// Human readable summary returned to the queue.
    pub fn message(&self) -> String {
        match self {
            Self::NoActiveSimulation => "No active simulation found".to_string(),
            Self::NotEnRoute { status } => {
                format!("Simulation not En Route (status: {status}), no update needed")
            }
            Self::NoTimeElapsed => "No time elapsed since last update".to_string(),
            Self::Advanced {
                traveled_distance,
                remaining_distance,
            } => format!(
                "Simulation advanced to {traveled_distance:.1} m ({remaining_distance:.1} m remaining)"
            ),
            Self::Arrived => "Vehicle arrived, pending delivery confirmation".to_string(),
        }
    }

    /// Whether this tick wrote new state.
    pub fn is_update(&self) -> bool {
        matches!(self, Self::Advanced { .. } | Self::Arrived)
    }
}

/// Errors that abort a tick, leaving state unadvanced for the next delivery.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("Failed to load simulation state: {0}")]
    StateLoad(#[source] StoreError),

    #[error("Route geometry error: {0}")]
    Geospatial(#[from] GeoError),

    #[error("Failed to persist simulation state: {0}")]
    StatePersist(#[source] StoreError),

    #[error("Simulation state changed concurrently {attempts} times, giving up")]
    VersionConflict { attempts: u32 },
}

impl TickError {
    /// HTTP-style status reported to the queue so it retries the delivery.
    pub fn status_code(&self) -> u16 {
        500
    }
}

/// Pure state transition for one tick.
///
/// Returns the vehicle that should be persisted, with `last_update_time` set
/// to `now_ms` and the version bumped. `elapsed_ms` must be positive.
///
/// # Errors
///
/// - `GeoError` - If the route is missing or malformed while still travelling
pub fn advance_vehicle(
    vehicle: &SimulatedVehicle,
    elapsed_ms: i64,
    now_ms: i64,
    config: &SimulationConfig,
) -> Result<SimulatedVehicle, GeoError> {
    let elapsed_secs = elapsed_ms as f64 / 1000.0;
    let distance_delta = config.base_speed_mps * elapsed_secs;
    let candidate = vehicle.traveled_distance + distance_delta;

    let mut next = vehicle.clone();
    if candidate >= vehicle.route_distance {
        next.traveled_distance = vehicle.route_distance;
        // Exact destination, not an interpolated point, to avoid floating drift
        next.current_position = vehicle.destination_coordinates;
        next.status = SimulationStatus::PendingDeliveryConfirmation;
    } else {
        let route = vehicle.route.as_ref().ok_or(GeoError::MissingRoute)?;
        let position = geo::point_at_distance(route, candidate)?;
        let ahead = geo::point_at_distance(route, candidate + config.lookahead_meters)?;

        next.traveled_distance = candidate;
        next.current_position = position;
        if ahead != position {
            next.bearing = geo::bearing_degrees(position, ahead);
        }
    }

    next.last_update_time = now_ms;
    next.version = vehicle.version.wrapping_add(1);
    Ok(next)
}

/// Applies ticks to simulations held in the state store.
pub struct TickProcessor {
    states: Arc<dyn SimulationStateStore>,
    mirror: Arc<dyn LocationMirror>,
    clock: Arc<dyn Clock>,
    config: SimulationConfig,
}

impl TickProcessor {
    pub fn new(
        states: Arc<dyn SimulationStateStore>,
        mirror: Arc<dyn LocationMirror>,
        clock: Arc<dyn Clock>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            states,
            mirror,
            clock,
            config,
        }
    }

    /// Processes one delivery of the tick job for `shipment_id`.
    ///
    /// # Errors
    ///
    /// - `TickError::StateLoad` - If state could not be read
    /// - `TickError::Geospatial` - If the route geometry is malformed
    /// - `TickError::StatePersist` - If the cache write failed; nothing advanced
    /// - `TickError::VersionConflict` - If concurrent writers kept winning
    pub async fn process(&self, shipment_id: &ShipmentId) -> Result<TickOutcome, TickError> {
        let attempts = self.config.max_write_attempts.max(1);

        for attempt in 1..=attempts {
            let Some(vehicle) = self
                .states
                .get(shipment_id)
                .await
                .map_err(TickError::StateLoad)?
            else {
                tracing::debug!("No simulation state for {}, nothing to tick", shipment_id);
                return Ok(TickOutcome::NoActiveSimulation);
            };

            if vehicle.status != SimulationStatus::EnRoute {
                tracing::debug!(
                    "Simulation {} is {}, skipping tick",
                    shipment_id,
                    vehicle.status
                );
                return Ok(TickOutcome::NotEnRoute {
                    status: vehicle.status,
                });
            }

            let now = self.clock.now_ms();
            let elapsed_ms = now - vehicle.last_update_time;
            if elapsed_ms <= 0 {
                tracing::debug!(
                    "No time elapsed for {} (delta {} ms), skipping tick",
                    shipment_id,
                    elapsed_ms
                );
                return Ok(TickOutcome::NoTimeElapsed);
            }

            let next = advance_vehicle(&vehicle, elapsed_ms, now, &self.config)?;

            let written = self
                .states
                .compare_and_set(&next, vehicle.version)
                .await
                .map_err(TickError::StatePersist)?;
            if !written {
                tracing::warn!(
                    "Concurrent update of {} detected on attempt {}/{}, reloading",
                    shipment_id,
                    attempt,
                    attempts
                );
                continue;
            }

            self.mirror_location(&next).await;

            let outcome = if next.status == SimulationStatus::PendingDeliveryConfirmation {
                tracing::info!(
                    "Shipment {} arrived at {}",
                    shipment_id,
                    next.current_position
                );
                TickOutcome::Arrived
            } else {
                tracing::debug!(
                    "Shipment {} advanced {:.1} m to {:.1}/{:.1} m",
                    shipment_id,
                    next.traveled_distance - vehicle.traveled_distance,
                    next.traveled_distance,
                    next.route_distance
                );
                TickOutcome::Advanced {
                    traveled_distance: next.traveled_distance,
                    remaining_distance: next.remaining_distance(),
                }
            };
            return Ok(outcome);
        }

        Err(TickError::VersionConflict { attempts })
    }

    async fn mirror_location(&self, vehicle: &SimulatedVehicle) {
        let snapshot = vehicle.location_snapshot();
        match self.mirror.update_last_known_location(&snapshot).await {
            Ok(0) => tracing::debug!(
                "Durable store has no row for {}, location not mirrored",
                vehicle.shipment_id
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(
                "Failed to mirror location for {} (cache already updated): {}",
                vehicle.shipment_id,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::geo::{GeoPoint, RouteGeometry};
    use crate::mirror::InMemoryLocationMirror;
    use crate::store::InMemoryStateStore;
    use crate::test_mocks::{FailingLocationMirror, FlakyStateStore, InterleavingStateStore};

    const START_MS: i64 = 1_700_000_000_000;

    /// A due-east route whose geometric length matches `route_distance`.
    fn route_of(meters: f64) -> (RouteGeometry, GeoPoint) {
        let start = GeoPoint::new(0.0, 0.0);
        let end = start.destination(90.0, meters);
        (RouteGeometry::from_points(&[start, end]), end)
    }

    fn en_route(id: &str, route_distance: f64, traveled: f64) -> SimulatedVehicle {
        let (route, end) = route_of(route_distance);
        let position = geo::point_at_distance(&route, traveled).unwrap();
        SimulatedVehicle {
            shipment_id: ShipmentId::parse(id).unwrap(),
            status: SimulationStatus::EnRoute,
            route: Some(route),
            route_distance,
            traveled_distance: traveled,
            current_position: position,
            bearing: 90.0,
            destination_coordinates: end,
            last_update_time: START_MS,
            version: 1,
        }
    }

    struct Fixture {
        states: Arc<InMemoryStateStore>,
        mirror: Arc<InMemoryLocationMirror>,
        clock: Arc<ManualClock>,
        processor: TickProcessor,
    }

    impl Fixture {
        fn new() -> Self {
            let states = Arc::new(InMemoryStateStore::new());
            let mirror = Arc::new(InMemoryLocationMirror::new());
            let clock = Arc::new(ManualClock::new(START_MS));
            let processor = TickProcessor::new(
                states.clone(),
                mirror.clone(),
                clock.clone(),
                SimulationConfig::default(),
            );
            Self {
                states,
                mirror,
                clock,
                processor,
            }
        }

        async fn stored(&self, id: &ShipmentId) -> SimulatedVehicle {
            self.states.get(id).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_tick_advances_by_elapsed_time() {
        let fixture = Fixture::new();
        let vehicle = en_route("S-1", 1_000.0, 0.0);
        fixture.states.set(&vehicle).await.unwrap();

        fixture.clock.advance(std::time::Duration::from_secs(10));
        let outcome = fixture.processor.process(&vehicle.shipment_id).await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Advanced {
                traveled_distance: 150.0,
                remaining_distance: 850.0
            }
        );
        let stored = fixture.stored(&vehicle.shipment_id).await;
        assert_eq!(stored.traveled_distance, 150.0);
        assert_eq!(stored.status, SimulationStatus::EnRoute);
        assert_eq!(stored.last_update_time, START_MS + 10_000);
        assert_eq!(stored.version, 2);
        assert!((stored.bearing - 90.0).abs() < 1e-6);

        let start = vehicle.route.as_ref().unwrap().start().unwrap();
        assert!((start.distance_m(stored.current_position) - 150.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_tick_arrival_is_exact() {
        let fixture = Fixture::new();
        let vehicle = en_route("S-2", 1_000.0, 950.0);
        fixture.states.set(&vehicle).await.unwrap();

        // 100 m at 15 m/s
        fixture.clock.advance(std::time::Duration::from_millis(6_667));
        let outcome = fixture.processor.process(&vehicle.shipment_id).await.unwrap();

        assert_eq!(outcome, TickOutcome::Arrived);
        let stored = fixture.stored(&vehicle.shipment_id).await;
        assert_eq!(stored.traveled_distance, 1_000.0);
        assert_eq!(stored.status, SimulationStatus::PendingDeliveryConfirmation);
        assert_eq!(
            stored.current_position.lat.to_bits(),
            vehicle.destination_coordinates.lat.to_bits()
        );
        assert_eq!(
            stored.current_position.lon.to_bits(),
            vehicle.destination_coordinates.lon.to_bits()
        );
    }

    #[tokio::test]
    async fn test_tick_is_noop_when_not_en_route() {
        let fixture = Fixture::new();
        for (i, status) in [
            SimulationStatus::Idle,
            SimulationStatus::PendingPickup,
            SimulationStatus::PendingDeliveryConfirmation,
            SimulationStatus::Completed,
            SimulationStatus::Error,
            SimulationStatus::AwaitingStatus,
        ]
        .into_iter()
        .enumerate()
        {
            let mut vehicle = en_route(&format!("S-{i}"), 1_000.0, 10.0);
            vehicle.status = status;
            fixture.states.set(&vehicle).await.unwrap();

            fixture.clock.advance(std::time::Duration::from_secs(30));
            let outcome = fixture.processor.process(&vehicle.shipment_id).await.unwrap();

            assert_eq!(outcome, TickOutcome::NotEnRoute { status });
            assert_eq!(fixture.stored(&vehicle.shipment_id).await, vehicle);
        }
        assert_eq!(fixture.mirror.write_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_missing_state_is_success() {
        let fixture = Fixture::new();
        let id = ShipmentId::parse("ghost").unwrap();

        let outcome = fixture.processor.process(&id).await.unwrap();

        assert_eq!(outcome, TickOutcome::NoActiveSimulation);
        assert!(fixture.states.is_empty());
    }

    #[tokio::test]
    async fn test_tick_zero_or_negative_elapsed_is_noop() {
        let fixture = Fixture::new();
        let vehicle = en_route("S-3", 1_000.0, 100.0);
        fixture.states.set(&vehicle).await.unwrap();

        let outcome = fixture.processor.process(&vehicle.shipment_id).await.unwrap();
        assert_eq!(outcome, TickOutcome::NoTimeElapsed);

        fixture.clock.set(START_MS - 5_000);
        let outcome = fixture.processor.process(&vehicle.shipment_id).await.unwrap();
        assert_eq!(outcome, TickOutcome::NoTimeElapsed);

        assert_eq!(fixture.stored(&vehicle.shipment_id).await, vehicle);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_does_not_double_advance() {
        let fixture = Fixture::new();
        let vehicle = en_route("S-4", 1_000.0, 0.0);
        fixture.states.set(&vehicle).await.unwrap();

        fixture.clock.advance(std::time::Duration::from_secs(4));
        fixture.processor.process(&vehicle.shipment_id).await.unwrap();
        let duplicate = fixture.processor.process(&vehicle.shipment_id).await.unwrap();

        assert_eq!(duplicate, TickOutcome::NoTimeElapsed);
        assert_eq!(fixture.stored(&vehicle.shipment_id).await.traveled_distance, 60.0);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_clock_for_retry() {
        let inner = Arc::new(InMemoryStateStore::new());
        let states = Arc::new(FlakyStateStore::new(inner.clone()));
        let clock = Arc::new(ManualClock::new(START_MS));
        let processor = TickProcessor::new(
            states.clone(),
            Arc::new(InMemoryLocationMirror::new()),
            clock.clone(),
            SimulationConfig::default(),
        );
        let vehicle = en_route("S-5", 1_000.0, 0.0);
        inner.set(&vehicle).await.unwrap();

        states.fail_next_writes(1);
        clock.advance(std::time::Duration::from_secs(10));
        let result = processor.process(&vehicle.shipment_id).await;
        assert!(matches!(result, Err(TickError::StatePersist(_))));
        assert_eq!(inner.get(&vehicle.shipment_id).await.unwrap().unwrap(), vehicle);

        // Redelivery later integrates the whole interval, nothing lost
        clock.advance(std::time::Duration::from_secs(10));
        processor.process(&vehicle.shipment_id).await.unwrap();
        let stored = inner.get(&vehicle.shipment_id).await.unwrap().unwrap();
        assert_eq!(stored.traveled_distance, 300.0);
        assert_eq!(stored.last_update_time, START_MS + 20_000);
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_tick() {
        let states = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(ManualClock::new(START_MS));
        let processor = TickProcessor::new(
            states.clone(),
            Arc::new(FailingLocationMirror),
            clock.clone(),
            SimulationConfig::default(),
        );
        let vehicle = en_route("S-6", 1_000.0, 0.0);
        states.set(&vehicle).await.unwrap();

        clock.advance(std::time::Duration::from_secs(2));
        let outcome = processor.process(&vehicle.shipment_id).await.unwrap();

        assert!(outcome.is_update());
        assert_eq!(
            states.get(&vehicle.shipment_id).await.unwrap().unwrap().traveled_distance,
            30.0
        );
    }

    #[tokio::test]
    async fn test_mirror_receives_persisted_location() {
        let fixture = Fixture::new();
        let vehicle = en_route("S-7", 1_000.0, 0.0);
        fixture.states.set(&vehicle).await.unwrap();

        fixture.clock.advance(std::time::Duration::from_secs(1));
        fixture.processor.process(&vehicle.shipment_id).await.unwrap();

        let stored = fixture.stored(&vehicle.shipment_id).await;
        let snapshot = fixture.mirror.latest(&vehicle.shipment_id).unwrap();
        assert_eq!(snapshot, stored.location_snapshot());
    }

    #[tokio::test]
    async fn test_malformed_route_aborts_tick() {
        let fixture = Fixture::new();
        let mut vehicle = en_route("S-8", 1_000.0, 0.0);
        vehicle.route = Some(RouteGeometry {
            coordinates: vec![[0.0, 0.0]],
        });
        fixture.states.set(&vehicle).await.unwrap();

        fixture.clock.advance(std::time::Duration::from_secs(1));
        let result = fixture.processor.process(&vehicle.shipment_id).await;

        assert!(matches!(
            result,
            Err(TickError::Geospatial(GeoError::TooFewCoordinates { count: 1 }))
        ));
        assert_eq!(fixture.stored(&vehicle.shipment_id).await, vehicle);
    }

    #[tokio::test]
    async fn test_concurrent_writer_wins_and_tick_reevaluates() {
        let inner = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(ManualClock::new(START_MS));
        let vehicle = en_route("S-9", 1_000.0, 0.0);
        inner.set(&vehicle).await.unwrap();

        clock.advance(std::time::Duration::from_secs(10));
        // Another delivery persists its own advance between our read and write
        let rival = advance_vehicle(
            &vehicle,
            10_000,
            clock.now_ms(),
            &SimulationConfig::default(),
        )
        .unwrap();
        let states = Arc::new(InterleavingStateStore::new(inner.clone(), rival));

        let processor = TickProcessor::new(
            states,
            Arc::new(InMemoryLocationMirror::new()),
            clock.clone(),
            SimulationConfig::default(),
        );
        let outcome = processor.process(&vehicle.shipment_id).await.unwrap();

        assert_eq!(outcome, TickOutcome::NoTimeElapsed);
        let stored = inner.get(&vehicle.shipment_id).await.unwrap().unwrap();
        assert_eq!(stored.traveled_distance, 150.0);
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn test_bearing_near_route_end_uses_clamped_lookahead() {
        let config = SimulationConfig::default();
        let mut vehicle = en_route("S-10", 1_000.0, 0.0);
        vehicle.bearing = 123.0;

        // Ends 1 m short of arrival so the look-ahead point clamps to the end
        let next = advance_vehicle(&vehicle, 66_600, START_MS + 66_600, &config).unwrap();

        assert_eq!(next.status, SimulationStatus::EnRoute);
        assert!(next.traveled_distance < 1_000.0);
        assert!((next.bearing - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(
            TickOutcome::NoActiveSimulation.message(),
            "No active simulation found"
        );
        assert!(
            TickOutcome::NotEnRoute {
                status: SimulationStatus::Completed
            }
            .message()
            .contains("Completed")
        );
        assert!(!TickOutcome::NoTimeElapsed.is_update());
    }
}
