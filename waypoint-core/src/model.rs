//! Simulation data model shared by every component.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geo::{GeoPoint, RouteGeometry};

/// Identifier of the shipment a simulation belongs to.
///
/// Always non-empty and free of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShipmentId(String);

impl ShipmentId {
    /// Parses a shipment identifier from untrusted input.
    ///
    /// # Errors
    ///
    /// - `ValidationError::EmptyShipmentId` - If the trimmed input is empty
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyShipmentId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShipmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShipmentId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ShipmentId> for String {
    fn from(id: ShipmentId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ShipmentId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rejected client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Shipment ID must be a non-empty string")]
    EmptyShipmentId,

    #[error("Missing or invalid shipmentId in request body")]
    MissingShipmentId,
}

/// Lifecycle status of a simulated vehicle.
///
/// Only the `EnRoute -> PendingDeliveryConfirmation` edge is driven by the
/// tick processor; every other edge is owned by external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimulationStatus {
    #[serde(rename = "Idle")]
    Idle,
    #[serde(rename = "Pending Pickup")]
    PendingPickup,
    #[serde(rename = "En Route")]
    EnRoute,
    #[serde(rename = "Pending Delivery Confirmation")]
    PendingDeliveryConfirmation,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Error")]
    Error,
    #[serde(rename = "Awaiting Status")]
    AwaitingStatus,
}

impl SimulationStatus {
    /// Terminal statuses are never ticked again and get dropped from the registry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::AwaitingStatus)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PendingPickup => "Pending Pickup",
            Self::EnRoute => "En Route",
            Self::PendingDeliveryConfirmation => "Pending Delivery Confirmation",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::AwaitingStatus => "Awaiting Status",
        }
    }
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-shipment simulation state as held by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedVehicle {
    pub shipment_id: ShipmentId,
    pub status: SimulationStatus,
    pub route: Option<RouteGeometry>,
    /// Precomputed route length in metres.
    pub route_distance: f64,
    /// Metres travelled along `route`, within `[0, route_distance]`.
    pub traveled_distance: f64,
    pub current_position: GeoPoint,
    /// Compass heading in degrees, `[0, 360)`.
    pub bearing: f64,
    pub destination_coordinates: GeoPoint,
    /// Epoch milliseconds of the last persisted tick.
    pub last_update_time: i64,
    /// Optimistic concurrency token, bumped on every successful write.
    #[serde(default)]
    pub version: u64,
}

impl SimulatedVehicle {
    /// Metres left until arrival, never negative.
    pub fn remaining_distance(&self) -> f64 {
        (self.route_distance - self.traveled_distance).max(0.0)
    }

    /// Fraction of the route covered, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.route_distance <= 0.0 {
            return 1.0;
        }
        (self.traveled_distance / self.route_distance).clamp(0.0, 1.0)
    }

    pub fn has_arrived(&self) -> bool {
        self.traveled_distance >= self.route_distance
    }

    /// Snapshot of the last known location for the durable mirror.
    pub fn location_snapshot(&self) -> LocationSnapshot {
        LocationSnapshot {
            shipment_id: self.shipment_id.clone(),
            latitude: self.current_position.lat,
            longitude: self.current_position.lon,
            bearing: self.bearing,
            timestamp_ms: self.last_update_time,
        }
    }
}

/// Last known location written to durable storage for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSnapshot {
    pub shipment_id: ShipmentId,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    pub timestamp_ms: i64,
}

/// Payload the queue delivers to the tick endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickJob {
    pub shipment_id: ShipmentId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipment_id_trims_and_rejects_empty() {
        assert_eq!(ShipmentId::parse("  SHP-42 ").unwrap().as_str(), "SHP-42");
        assert_eq!(ShipmentId::parse("   "), Err(ValidationError::EmptyShipmentId));
        assert_eq!(ShipmentId::parse(""), Err(ValidationError::EmptyShipmentId));
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&SimulationStatus::PendingDeliveryConfirmation).unwrap();
        assert_eq!(json, "\"Pending Delivery Confirmation\"");

        let parsed: SimulationStatus = serde_json::from_str("\"En Route\"").unwrap();
        assert_eq!(parsed, SimulationStatus::EnRoute);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SimulationStatus::Completed.is_terminal());
        assert!(SimulationStatus::Error.is_terminal());
        assert!(SimulationStatus::AwaitingStatus.is_terminal());
        assert!(!SimulationStatus::EnRoute.is_terminal());
        assert!(!SimulationStatus::PendingDeliveryConfirmation.is_terminal());
        assert!(!SimulationStatus::Idle.is_terminal());
    }

    #[test]
    fn test_tick_job_rejects_blank_id() {
        let job: TickJob = serde_json::from_str(r#"{"shipmentId":"abc"}"#).unwrap();
        assert_eq!(job.shipment_id.as_str(), "abc");

        assert!(serde_json::from_str::<TickJob>(r#"{"shipmentId":"  "}"#).is_err());
        assert!(serde_json::from_str::<TickJob>(r#"{"shipmentId":7}"#).is_err());
    }

    #[test]
    fn test_vehicle_without_version_defaults_to_zero() {
        let json = r#"{
            "shipmentId": "S1",
            "status": "En Route",
            "route": null,
            "routeDistance": 1000.0,
            "traveledDistance": 10.0,
            "currentPosition": {"lat": 1.0, "lon": 2.0},
            "bearing": 90.0,
            "destinationCoordinates": {"lat": 1.0, "lon": 3.0},
            "lastUpdateTime": 1700000000000
        }"#;
        let vehicle: SimulatedVehicle = serde_json::from_str(json).unwrap();

        assert_eq!(vehicle.version, 0);
        assert_eq!(vehicle.remaining_distance(), 990.0);
        assert!((vehicle.progress() - 0.01).abs() < 1e-12);
    }
}
