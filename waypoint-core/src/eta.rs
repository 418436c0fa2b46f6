//! Remaining travel time projection.

use serde::Serialize;

use crate::model::{SimulatedVehicle, SimulationStatus};

/// Projected arrival for an en-route vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaEstimate {
    /// Epoch milliseconds of arrival; `None` when already arrived.
    pub eta_timestamp: Option<i64>,
    pub remaining_duration_ms: u64,
}

/// Projects remaining travel time from remaining distance and speed.
#[derive(Debug, Clone, Copy)]
pub struct EtaEstimator {
    base_speed_mps: f64,
}

impl EtaEstimator {
    pub fn new(base_speed_mps: f64) -> Self {
        Self { base_speed_mps }
    }

    /// Estimates arrival for `vehicle` at `speed_multiplier` times base speed.
    ///
    /// Returns `None` unless the vehicle is en route on a route of positive
    /// length, and for non-positive (or NaN) effective speeds.
    pub fn estimate(
        &self,
        vehicle: &SimulatedVehicle,
        speed_multiplier: f64,
        now_ms: i64,
    ) -> Option<EtaEstimate> {
        if vehicle.status != SimulationStatus::EnRoute
            || vehicle.route.is_none()
            || vehicle.route_distance.is_nan()
            || vehicle.route_distance <= 0.0
        {
            return None;
        }

        let effective_speed = self.base_speed_mps * speed_multiplier;
        if effective_speed.is_nan() || effective_speed <= 0.0 {
            return None;
        }

        let remaining = vehicle.remaining_distance();
        if remaining <= 0.0 {
            return Some(EtaEstimate {
                eta_timestamp: None,
                remaining_duration_ms: 0,
            });
        }

        let remaining_duration_ms = (remaining / effective_speed * 1000.0).round() as u64;
        let eta_timestamp =
            now_ms.saturating_add(i64::try_from(remaining_duration_ms).unwrap_or(i64::MAX));

        Some(EtaEstimate {
            eta_timestamp: Some(eta_timestamp),
            remaining_duration_ms,
        })
    }
}
