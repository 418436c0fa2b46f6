//! Invariant checking framework for fleet simulation validation.

use std::fmt;

use waypoint_core::{ShipmentId, SimulatedVehicle, SimulationStatus};

/// Violation of a simulation invariant.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Shipment whose state broke the invariant
    pub shipment_id: ShipmentId,
    /// Detailed description of the violation
    pub description: String,
    /// Simulated epoch milliseconds when the violation was observed
    pub at_ms: i64,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated for {} at {} ms: {}",
            self.invariant, self.shipment_id, self.at_ms, self.description
        )
    }
}

/// Trait for checking per-vehicle invariants between two observations.
pub trait Invariant: Send + Sync {
    /// Checks `current` against the previous observation of the same vehicle.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation if the invariant does not hold.
    fn check(
        &self,
        previous: Option<&SimulatedVehicle>,
        current: &SimulatedVehicle,
    ) -> Result<(), String>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;
}

/// Travelled distance stays finite and within `[0, route_distance]`.
pub struct TraveledWithinRoute;

impl Invariant for TraveledWithinRoute {
    fn check(
        &self,
        _previous: Option<&SimulatedVehicle>,
        current: &SimulatedVehicle,
    ) -> Result<(), String> {
        let traveled = current.traveled_distance;
        if !traveled.is_finite() || traveled < 0.0 || traveled > current.route_distance {
            return Err(format!(
                "traveled {traveled} m outside [0, {}] m",
                current.route_distance
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "TraveledWithinRoute"
    }
}

/// Travelled distance never decreases, and strictly increases for every
/// persisted advance of a moving vehicle.
pub struct MonotonicProgress;

impl Invariant for MonotonicProgress {
    fn check(
        &self,
        previous: Option<&SimulatedVehicle>,
        current: &SimulatedVehicle,
    ) -> Result<(), String> {
        let Some(previous) = previous else {
            return Ok(());
        };

        if current.traveled_distance < previous.traveled_distance {
            return Err(format!(
                "traveled went backwards from {} m to {} m",
                previous.traveled_distance, current.traveled_distance
            ));
        }

        let advanced_while_moving = previous.status == SimulationStatus::EnRoute
            && current.status == SimulationStatus::EnRoute
            && current.last_update_time > previous.last_update_time;
        if advanced_while_moving && current.traveled_distance <= previous.traveled_distance {
            return Err(format!(
                "clock moved {} ms but traveled stayed at {} m",
                current.last_update_time - previous.last_update_time,
                current.traveled_distance
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MonotonicProgress"
    }
}

/// Arrived vehicles sit exactly on their destination with the full route
/// travelled.
pub struct ArrivalExactness;

impl Invariant for ArrivalExactness {
    fn check(
        &self,
        _previous: Option<&SimulatedVehicle>,
        current: &SimulatedVehicle,
    ) -> Result<(), String> {
        if !matches!(
            current.status,
            SimulationStatus::PendingDeliveryConfirmation | SimulationStatus::Completed
        ) {
            return Ok(());
        }

        let position = current.current_position;
        let destination = current.destination_coordinates;
        if position.lat.to_bits() != destination.lat.to_bits()
            || position.lon.to_bits() != destination.lon.to_bits()
        {
            return Err(format!(
                "arrived at {position} instead of destination {destination}"
            ));
        }
        if current.traveled_distance != current.route_distance {
            return Err(format!(
                "arrived with {} of {} m travelled",
                current.traveled_distance, current.route_distance
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ArrivalExactness"
    }
}

/// Every invariant the fleet simulation checks by default.
pub fn default_invariants() -> Vec<Box<dyn Invariant>> {
    vec![
        Box::new(TraveledWithinRoute),
        Box::new(MonotonicProgress),
        Box::new(ArrivalExactness),
    ]
}

#[cfg(test)]
mod tests {
    use waypoint_core::{GeoPoint, RouteGeometry};

    use super::*;

    fn vehicle(traveled: f64) -> SimulatedVehicle {
        let start = GeoPoint::new(52.52, 13.405);
        let end = GeoPoint::new(52.53, 13.405);
        SimulatedVehicle {
            shipment_id: ShipmentId::parse("SHP-1").unwrap(),
            status: SimulationStatus::EnRoute,
            route: Some(RouteGeometry::from_points(&[start, end])),
            route_distance: 1000.0,
            traveled_distance: traveled,
            current_position: start,
            bearing: 0.0,
            destination_coordinates: end,
            last_update_time: 10_000,
            version: 1,
        }
    }

    #[test]
    fn test_traveled_within_route() {
        assert!(TraveledWithinRoute.check(None, &vehicle(0.0)).is_ok());
        assert!(TraveledWithinRoute.check(None, &vehicle(1000.0)).is_ok());
        assert!(TraveledWithinRoute.check(None, &vehicle(1000.1)).is_err());
        assert!(TraveledWithinRoute.check(None, &vehicle(-1.0)).is_err());
        assert!(TraveledWithinRoute.check(None, &vehicle(f64::NAN)).is_err());
    }

    #[test]
    fn test_monotonic_progress() {
        let before = vehicle(100.0);
        let mut after = vehicle(250.0);
        after.last_update_time = 20_000;
        assert!(MonotonicProgress.check(Some(&before), &after).is_ok());

        assert!(MonotonicProgress.check(Some(&after), &before).is_err());

        // Clock advanced without movement
        let mut stalled = vehicle(100.0);
        stalled.last_update_time = 20_000;
        assert!(MonotonicProgress.check(Some(&before), &stalled).is_err());

        // Unchanged state is fine
        assert!(MonotonicProgress.check(Some(&before), &before.clone()).is_ok());
    }

    #[test]
    fn test_arrival_exactness() {
        let mut arrived = vehicle(1000.0);
        arrived.status = SimulationStatus::PendingDeliveryConfirmation;
        arrived.current_position = arrived.destination_coordinates;
        assert!(ArrivalExactness.check(None, &arrived).is_ok());

        let mut off_by_a_hair = arrived.clone();
        off_by_a_hair.current_position.lat += 1e-12;
        assert!(ArrivalExactness.check(None, &off_by_a_hair).is_err());

        let mut short = arrived.clone();
        short.traveled_distance = 999.0;
        assert!(ArrivalExactness.check(None, &short).is_err());

        // Moving vehicles are not held to arrival rules
        assert!(ArrivalExactness.check(None, &vehicle(10.0)).is_ok());
    }
}
