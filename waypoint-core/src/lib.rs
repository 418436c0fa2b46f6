//! Waypoint Core - vehicle position simulation engine
//!
//! Advances simulated vehicles along their routes in discrete ticks, fans tick
//! jobs out over an at-least-once work queue, and projects arrival times. The
//! crate holds the geospatial math, the tick and scheduling logic, the storage
//! contracts with their backends, and configuration.

pub mod clock;
pub mod config;
pub mod eta;
pub mod geo;
pub mod lifecycle;
pub mod mirror;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod tick;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, WaypointConfig};
pub use eta::{EtaEstimate, EtaEstimator};
pub use geo::{GeoError, GeoPoint, RouteGeometry};
pub use lifecycle::{LifecycleError, SimulationControl};
pub use mirror::{LocationMirror, MirrorError};
pub use model::{ShipmentId, SimulatedVehicle, SimulationStatus, TickJob, ValidationError};
pub use queue::{HttpTickQueue, MessageId, QueueError, TickQueue};
pub use scheduler::{DispatchOutcome, EnqueueSummary, SchedulerError, TickScheduler};
pub use store::{ActiveSimulationRegistry, SimulationStateStore, StoreError};
pub use tick::{TickError, TickOutcome, TickProcessor};

/// Errors that can bubble up from any Waypoint subsystem.
#[derive(Debug, thiserror::Error)]
pub enum WaypointError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Tick error: {0}")]
    Tick(#[from] TickError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WaypointError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            WaypointError::Validation(e) => e.to_string(),
            WaypointError::Tick(e) => match e {
                TickError::Geospatial(_) => "Simulation route is malformed".to_string(),
                TickError::VersionConflict { .. } => {
                    "Simulation was updated concurrently, tick will be retried".to_string()
                }
                _ => "Failed to process simulation tick".to_string(),
            },
            WaypointError::Scheduler(_) => "Failed to enqueue simulation ticks".to_string(),
            WaypointError::Lifecycle(e) => match e {
                LifecycleError::NotFound { shipment_id } => {
                    format!("No simulation found for shipment {shipment_id}")
                }
                LifecycleError::AlreadyActive { shipment_id, .. } => {
                    format!("Simulation for shipment {shipment_id} is already running")
                }
                LifecycleError::InvalidTransition { from, to, .. } => {
                    format!("Cannot change simulation status from {from} to {to}")
                }
                LifecycleError::InvalidRoute(_) | LifecycleError::InvalidRouteDistance { .. } => {
                    format!("Invalid route: {e}")
                }
                _ => "Simulation update failed".to_string(),
            },
            WaypointError::Configuration(e) => format!("Configuration error: {e}"),
            WaypointError::Storage(_) => "Simulation storage unavailable".to_string(),
            WaypointError::Queue(_) => "Work queue unavailable".to_string(),
        }
    }

    /// Checks if this error is due to caller input rather than infrastructure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            WaypointError::Validation(_)
                | WaypointError::Configuration(_)
                | WaypointError::Lifecycle(
                    LifecycleError::NotFound { .. }
                        | LifecycleError::AlreadyActive { .. }
                        | LifecycleError::InvalidTransition { .. }
                        | LifecycleError::InvalidRoute(_)
                        | LifecycleError::InvalidRouteDistance { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, WaypointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_classification() {
        assert!(WaypointError::from(ValidationError::MissingShipmentId).is_user_error());
        assert!(
            WaypointError::from(ConfigError::MissingValue {
                name: "WAYPOINT_PUBLIC_URL"
            })
            .is_user_error()
        );
        assert!(!WaypointError::from(TickError::VersionConflict { attempts: 3 }).is_user_error());
        assert!(
            !WaypointError::from(StoreError::Backend {
                reason: "down".to_string()
            })
            .is_user_error()
        );
    }

    #[test]
    fn test_user_messages_hide_backend_detail() {
        let error = WaypointError::from(StoreError::Backend {
            reason: "redis://secret@host refused".to_string(),
        });
        assert!(!error.user_message().contains("secret"));

        let error = WaypointError::from(LifecycleError::NotFound {
            shipment_id: ShipmentId::parse("SHP-9").unwrap(),
        });
        assert_eq!(error.user_message(), "No simulation found for shipment SHP-9");
    }
}
