//! Deterministic end-to-end fleet simulation.
//!
//! Wires the real tick processor and scheduler to in-memory collaborators, a
//! manual clock and the misbehaving in-process queue, then drives the fleet
//! step by step while checking invariants after every step.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use waypoint_core::config::{DispatchConfig, SimulationConfig};
use waypoint_core::mirror::InMemoryLocationMirror;
use waypoint_core::store::{InMemoryRegistry, InMemoryStateStore};
use waypoint_core::{
    Clock, EnqueueSummary, GeoPoint, LifecycleError, ManualClock, RouteGeometry, SchedulerError,
    ShipmentId, SimulatedVehicle, SimulationControl, SimulationStatus, TickOutcome,
    TickProcessor, TickScheduler,
};

use crate::invariants::{Invariant, InvariantViolation, default_invariants};
use crate::queue::{DeliveryConfig, InMemoryTickQueue};
use crate::rng::DeterministicRng;

/// Simulated start of every run, 2024-01-01T00:00:00Z.
const EPOCH_START_MS: i64 = 1_704_067_200_000;

/// Errors that stop a fleet simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid simulation configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to set up simulation: {0}")]
    Setup(#[from] LifecycleError),

    #[error("Scheduler pass failed: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Shape of a simulated fleet and its delivery conditions.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub vehicles: usize,
    pub seed: u64,
    /// Probability that the queue redelivers a tick job.
    pub duplicate_rate: f64,
    /// Deliver each batch of tick jobs in random order.
    pub shuffle_deliveries: bool,
    /// Confirm delivery of arrived vehicles at the end of each step.
    pub auto_confirm: bool,
    /// Route legs per vehicle, inclusive bounds.
    pub legs: (u64, u64),
    /// Length of each leg in metres, `[min, max)`.
    pub leg_length_m: (f64, f64),
    pub simulation: SimulationConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            vehicles: 10,
            seed: 42,
            duplicate_rate: 0.2,
            shuffle_deliveries: true,
            auto_confirm: true,
            legs: (1, 4),
            leg_length_m: (200.0, 2_000.0),
            simulation: SimulationConfig::default(),
        }
    }
}

impl FleetConfig {
    fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |reason: &str| {
            Err(SimulationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.vehicles == 0 {
            return invalid("at least one vehicle is required");
        }
        if !(0.0..=1.0).contains(&self.duplicate_rate) {
            return invalid("duplicate rate must be within [0, 1]");
        }
        if self.legs.0 == 0 || self.legs.0 > self.legs.1 {
            return invalid("leg bounds must satisfy 1 <= min <= max");
        }
        let (shortest, longest) = self.leg_length_m;
        if shortest.is_nan() || shortest <= 0.0 || !longest.is_finite() || shortest > longest {
            return invalid("leg length bounds must be positive and ordered");
        }
        Ok(())
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationMetrics {
    pub passes: u64,
    pub enqueued: u64,
    pub skipped: u64,
    pub cleaned: u64,
    pub enqueue_errors: u64,
    pub deliveries: u64,
    pub redeliveries: u64,
    pub advanced: u64,
    pub arrived: u64,
    pub no_ops: u64,
    pub tick_errors: u64,
}

impl SimulationMetrics {
    fn record_pass(&mut self, summary: &EnqueueSummary) {
        self.passes += 1;
        self.enqueued += summary.enqueued_count as u64;
        self.skipped += summary.skipped_count as u64;
        self.cleaned += summary.cleanup_count as u64;
        self.enqueue_errors += summary.error_count as u64;
    }
}

/// Result of a fleet simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    pub steps: u64,
    pub simulated_duration: Duration,
    pub vehicles: usize,
    /// Vehicles that reached their destination during the run.
    pub arrivals: usize,
    /// Vehicles still registered as active at the end of the run.
    pub still_active: usize,
    pub metrics: SimulationMetrics,
    pub violations: Vec<InvariantViolation>,
}

impl SimulationReport {
    /// True when no invariant was violated.
    pub fn success(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let m = &self.metrics;
        let mut out = String::new();
        let _ = writeln!(out, "Fleet simulation report (seed: {})", self.seed);
        let _ = writeln!(
            out,
            "Steps: {} ({:?} simulated)",
            self.steps, self.simulated_duration
        );
        let _ = writeln!(
            out,
            "Vehicles: {} ({} arrived, {} still active)",
            self.vehicles, self.arrivals, self.still_active
        );
        let _ = writeln!(
            out,
            "Scheduler: {} passes, {} enqueued, {} skipped, {} cleaned, {} errors",
            m.passes, m.enqueued, m.skipped, m.cleaned, m.enqueue_errors
        );
        let _ = writeln!(
            out,
            "Ticks: {} deliveries ({} redelivered), {} advanced, {} arrived, {} no-ops, {} errors",
            m.deliveries, m.redeliveries, m.advanced, m.arrived, m.no_ops, m.tick_errors
        );
        let _ = writeln!(out, "Invariant violations: {}", self.violations.len());
        for violation in &self.violations {
            let _ = writeln!(out, "  - {violation}");
        }
        out
    }
}

/// Deterministic simulation of a fleet of vehicles.
pub struct FleetSimulation {
    config: FleetConfig,
    clock: Arc<ManualClock>,
    states: Arc<InMemoryStateStore>,
    registry: Arc<InMemoryRegistry>,
    queue: Arc<InMemoryTickQueue>,
    control: SimulationControl,
    processor: TickProcessor,
    scheduler: TickScheduler,
    invariants: Vec<Box<dyn Invariant>>,
    observed: HashMap<ShipmentId, SimulatedVehicle>,
    arrivals: usize,
    steps: u64,
    elapsed: Duration,
    metrics: SimulationMetrics,
    violations: Vec<InvariantViolation>,
}

impl FleetSimulation {
    /// Generates the fleet, starts every simulation and puts it in transit.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidConfig` - If the fleet configuration is inconsistent
    /// - `SimulationError::Setup` - If a generated simulation could not be started
    pub async fn new(config: FleetConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let mut rng = DeterministicRng::from_seed(config.seed);
        let queue_rng = DeterministicRng::from_seed(config.seed.wrapping_add(1));

        let clock = Arc::new(ManualClock::new(EPOCH_START_MS));
        let states = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let queue = Arc::new(InMemoryTickQueue::new(
            DeliveryConfig {
                duplicate_rate: config.duplicate_rate,
                shuffle: config.shuffle_deliveries,
            },
            queue_rng,
        ));

        let control = SimulationControl::new(states.clone(), registry.clone(), clock.clone());
        let processor = TickProcessor::new(
            states.clone(),
            Arc::new(InMemoryLocationMirror::new()),
            clock.clone(),
            config.simulation.clone(),
        );
        let dispatch = DispatchConfig {
            public_base_url: Some("http://waypoint.sim".to_string()),
            ..DispatchConfig::default()
        };
        let scheduler = TickScheduler::new(
            registry.clone(),
            states.clone(),
            queue.clone(),
            dispatch,
            16,
        );

        let mut simulation = Self {
            config,
            clock,
            states,
            registry,
            queue,
            control,
            processor,
            scheduler,
            invariants: default_invariants(),
            observed: HashMap::new(),
            arrivals: 0,
            steps: 0,
            elapsed: Duration::ZERO,
            metrics: SimulationMetrics::default(),
            violations: Vec::new(),
        };

        for index in 0..simulation.config.vehicles {
            let shipment_id = ShipmentId::parse(&format!("SIM-{index:04}"))
                .map_err(|e| SimulationError::InvalidConfig {
                    reason: e.to_string(),
                })?;
            let route = simulation.generate_route(&mut rng);
            let length = route.length_meters().map_err(LifecycleError::from)?;

            simulation.control.start(&shipment_id, route, length).await?;
            let moving = simulation.control.begin_transit(&shipment_id).await?;
            simulation.observed.insert(shipment_id, moving);
        }

        tracing::info!(
            "Fleet simulation ready: {} vehicles, seed {}",
            simulation.config.vehicles,
            simulation.config.seed
        );
        Ok(simulation)
    }

    fn generate_route(&self, rng: &mut DeterministicRng) -> RouteGeometry {
        let mut point = GeoPoint::new(
            rng.random_between(-60.0, 60.0),
            rng.random_between(-170.0, 170.0),
        );
        let legs = rng.random_range(self.config.legs.0, self.config.legs.1 + 1);

        let mut points = vec![point];
        for _ in 0..legs {
            let bearing = rng.random_between(0.0, 360.0);
            let (min_m, max_m) = self.config.leg_length_m;
            let length = rng.random_between(min_m, max_m);
            point = point.destination(bearing, length);
            points.push(point);
        }
        RouteGeometry::from_points(&points)
    }

    /// Advances simulated time by `duration`, runs one scheduler pass and
    /// delivers every resulting tick job, then checks invariants.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Scheduler` - If the scheduler could not list active simulations
    /// - `SimulationError::Setup` - If confirming an arrived delivery failed
    pub async fn step(&mut self, duration: Duration) -> Result<(), SimulationError> {
        self.clock.advance(duration);
        self.elapsed += duration;
        self.steps += 1;

        let pass = self.scheduler.run_pass().await?;
        self.metrics.record_pass(&pass.summary);

        let deliveries = self.queue.drain();
        for delivery in deliveries {
            self.metrics.deliveries += 1;
            if delivery.redelivery {
                self.metrics.redeliveries += 1;
            }
            match self.processor.process(&delivery.job.shipment_id).await {
                Ok(TickOutcome::Advanced { .. }) => self.metrics.advanced += 1,
                Ok(TickOutcome::Arrived) => {
                    self.metrics.arrived += 1;
                    self.arrivals += 1;
                }
                Ok(_) => self.metrics.no_ops += 1,
                Err(e) => {
                    tracing::warn!(
                        "Tick {} for {} failed: {}",
                        delivery.message_id,
                        delivery.job.shipment_id,
                        e
                    );
                    self.metrics.tick_errors += 1;
                }
            }
        }

        self.check_invariants();

        if self.config.auto_confirm {
            self.confirm_arrivals().await?;
        }
        Ok(())
    }

    async fn confirm_arrivals(&mut self) -> Result<(), SimulationError> {
        let arrived: Vec<ShipmentId> = self
            .observed
            .values()
            .filter(|v| v.status == SimulationStatus::PendingDeliveryConfirmation)
            .map(|v| v.shipment_id.clone())
            .collect();

        for shipment_id in arrived {
            let confirmed = self.control.confirm_delivery(&shipment_id).await?;
            self.observed.insert(shipment_id, confirmed);
        }
        Ok(())
    }

    fn check_invariants(&mut self) {
        let now = self.clock.now_ms();
        for current in self.states.snapshot() {
            let previous = self.observed.get(&current.shipment_id);
            for invariant in &self.invariants {
                if let Err(description) = invariant.check(previous, &current) {
                    let violation = InvariantViolation {
                        invariant: invariant.name().to_string(),
                        shipment_id: current.shipment_id.clone(),
                        description,
                        at_ms: now,
                    };
                    tracing::error!("{}", violation);
                    self.violations.push(violation);
                }
            }
            self.observed.insert(current.shipment_id.clone(), current);
        }
    }

    /// Runs `steps` steps of `step_duration` each and reports.
    ///
    /// # Errors
    ///
    /// - `SimulationError` - If any step fails; see [`Self::step`]
    pub async fn run(
        &mut self,
        steps: u64,
        step_duration: Duration,
    ) -> Result<SimulationReport, SimulationError> {
        for _ in 0..steps {
            self.step(step_duration).await?;
        }
        Ok(self.report())
    }

    /// Report of everything simulated so far.
    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            seed: self.config.seed,
            steps: self.steps,
            simulated_duration: self.elapsed,
            vehicles: self.config.vehicles,
            arrivals: self.arrivals,
            still_active: self.registry.len(),
            metrics: self.metrics.clone(),
            violations: self.violations.clone(),
        }
    }

    /// Latest observed state of every vehicle, ordered by shipment.
    pub fn vehicles(&self) -> Vec<SimulatedVehicle> {
        let mut vehicles: Vec<SimulatedVehicle> = self.observed.values().cloned().collect();
        vehicles.sort_by(|a, b| a.shipment_id.cmp(&b.shipment_id));
        vehicles
    }

    /// Adds a custom invariant checked after every step.
    pub fn add_invariant(&mut self, invariant: Box<dyn Invariant>) {
        self.invariants.push(invariant);
    }
}
