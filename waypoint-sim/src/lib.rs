//! Waypoint Simulation Framework - deterministic fleet testing.
//!
//! Runs the real tick processor and scheduler against in-memory collaborators
//! under a manual clock and an in-process queue that redelivers and reorders
//! jobs from a seeded RNG. The same seed always produces the same fleet, the
//! same deliveries and the same final state.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use waypoint_sim::{FleetConfig, FleetSimulation};
//!
//! # async fn run() -> Result<(), waypoint_sim::SimulationError> {
//! let mut sim = FleetSimulation::new(FleetConfig::default()).await?;
//! let report = sim.run(30, Duration::from_secs(60)).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod fleet;
pub mod invariants;
pub mod queue;
pub mod rng;

pub use fleet::{FleetConfig, FleetSimulation, SimulationError, SimulationMetrics, SimulationReport};
pub use invariants::{
    ArrivalExactness, Invariant, InvariantViolation, MonotonicProgress, TraveledWithinRoute,
    default_invariants,
};
pub use queue::{Delivery, DeliveryConfig, InMemoryTickQueue, QueueStats};
pub use rng::DeterministicRng;
