//! CLI command implementations

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use waypoint_core::mirror::{DisabledLocationMirror, MySqlLocationMirror};
use waypoint_core::scheduler::spawn_scheduler_loop;
use waypoint_core::store::{InMemoryRegistry, InMemoryStateStore, RedisSimulationStore};
use waypoint_core::{
    ActiveSimulationRegistry, Clock, EtaEstimator, HttpTickQueue, LocationMirror, ShipmentId,
    SimulationControl, SimulationStateStore, SystemClock, TickProcessor, TickQueue,
    TickScheduler, WaypointConfig,
};
use waypoint_sim::{FleetConfig, FleetSimulation, InMemoryTickQueue};
use waypoint_web::{AppState, run_server};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server and the periodic scheduler
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Use in-memory backends and an in-process queue
        #[arg(long)]
        dev: bool,
    },
    /// Run one scheduler pass against the configured backends
    Enqueue,
    /// Apply one tick to a simulation
    Tick {
        /// Shipment whose simulation to advance
        shipment_id: String,
    },
    /// Run the deterministic fleet simulation
    Simulate {
        /// Number of simulated vehicles
        #[arg(long, default_value = "10")]
        vehicles: usize,
        /// Number of scheduler steps
        #[arg(long, default_value = "30")]
        steps: u64,
        /// Simulated seconds per step
        #[arg(long, default_value = "60")]
        step_secs: u64,
        /// Seed for fleet generation and delivery faults
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Probability of duplicate tick delivery
        #[arg(long, default_value = "0.2")]
        duplicate_rate: f64,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the failure of whichever command ran, with context
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port, dev } => serve(host, port, dev).await,
        Commands::Enqueue => enqueue().await,
        Commands::Tick { shipment_id } => tick(shipment_id).await,
        Commands::Simulate {
            vehicles,
            steps,
            step_secs,
            seed,
            duplicate_rate,
        } => simulate(vehicles, steps, step_secs, seed, duplicate_rate).await,
    }
}

struct Backends {
    states: Arc<dyn SimulationStateStore>,
    registry: Arc<dyn ActiveSimulationRegistry>,
    mirror: Arc<dyn LocationMirror>,
    queue: Arc<dyn TickQueue>,
}

/// Connects every collaborator from configuration, failing on anything missing.
async fn production_backends(config: &WaypointConfig) -> anyhow::Result<Backends> {
    config.validate()?;
    // Resolve the tick target up front so a misconfigured deployment never starts
    config.dispatch.tick_target_url()?;

    let queue = HttpTickQueue::from_config(&config.queue)?;
    let redis = Arc::new(
        RedisSimulationStore::connect(&config.cache)
            .await
            .context("Failed to connect simulation store")?,
    );

    let mirror: Arc<dyn LocationMirror> = if config.durable.database_url.is_some() {
        Arc::new(
            MySqlLocationMirror::connect(&config.durable)
                .await
                .context("Failed to connect durable store")?,
        )
    } else {
        tracing::warn!("WAYPOINT_DATABASE_URL not set, last known locations will not be mirrored");
        Arc::new(DisabledLocationMirror)
    };

    Ok(Backends {
        states: redis.clone(),
        registry: redis,
        mirror,
        queue: Arc::new(queue),
    })
}

struct Engine {
    processor: Arc<TickProcessor>,
    scheduler: Arc<TickScheduler>,
    control: Arc<SimulationControl>,
}

fn build_engine(config: &WaypointConfig, backends: &Backends, clock: Arc<dyn Clock>) -> Engine {
    Engine {
        processor: Arc::new(TickProcessor::new(
            backends.states.clone(),
            backends.mirror.clone(),
            clock.clone(),
            config.simulation.clone(),
        )),
        scheduler: Arc::new(TickScheduler::new(
            backends.registry.clone(),
            backends.states.clone(),
            backends.queue.clone(),
            config.dispatch.clone(),
            config.scheduler.max_concurrency,
        )),
        control: Arc::new(SimulationControl::new(
            backends.states.clone(),
            backends.registry.clone(),
            clock,
        )),
    }
}

/// Start the API server
///
/// # Errors
/// - Invalid configuration or unreachable backends outside dev mode
/// - The listener cannot bind
pub async fn serve(host: String, port: u16, dev: bool) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;

    let mut config = WaypointConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (backends, dev_queue) = if dev {
        if config.dispatch.public_base_url.is_none() {
            config.dispatch.public_base_url = Some(format!("http://{addr}"));
        }
        config.validate()?;

        let queue = Arc::new(InMemoryTickQueue::reliable());
        let backends = Backends {
            states: Arc::new(InMemoryStateStore::new()),
            registry: Arc::new(InMemoryRegistry::new()),
            mirror: Arc::new(DisabledLocationMirror),
            queue: queue.clone(),
        };
        tracing::info!("Development mode: in-memory state and in-process queue");
        (backends, Some(queue))
    } else {
        (production_backends(&config).await?, None)
    };

    let engine = build_engine(&config, &backends, clock.clone());

    let _scheduler_task = spawn_scheduler_loop(engine.scheduler.clone(), config.scheduler.interval);
    if let Some(queue) = dev_queue {
        spawn_dev_delivery(queue, engine.processor.clone());
    }

    let state = AppState {
        processor: engine.processor,
        scheduler: engine.scheduler,
        control: engine.control,
        states: backends.states,
        eta: EtaEstimator::new(config.simulation.base_speed_mps),
        clock,
    };

    println!("Waypoint API running on http://{addr}");
    run_server(addr, state).await?;
    Ok(())
}

/// Delivers in-process queue jobs straight to the tick processor.
fn spawn_dev_delivery(queue: Arc<InMemoryTickQueue>, processor: Arc<TickProcessor>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        loop {
            ticker.tick().await;
            for delivery in queue.drain() {
                if let Err(e) = processor.process(&delivery.job.shipment_id).await {
                    tracing::warn!(
                        "Delivery {} for {} failed: {}",
                        delivery.message_id,
                        delivery.job.shipment_id,
                        e
                    );
                }
            }
        }
    });
}

/// Run one scheduler pass and print its summary
///
/// # Errors
/// - Invalid configuration or unreachable backends
/// - The active registry could not be read
pub async fn enqueue() -> anyhow::Result<()> {
    let config = WaypointConfig::from_env();
    let backends = production_backends(&config).await?;
    let engine = build_engine(&config, &backends, Arc::new(SystemClock));

    let pass = engine.scheduler.run_pass().await?;
    let summary = pass.summary;
    println!("Found active: {}", summary.found_active);
    println!("  Enqueued: {}", summary.enqueued_count);
    println!("  Skipped:  {}", summary.skipped_count);
    println!("  Cleaned:  {}", summary.cleanup_count);
    println!("  Errors:   {}", summary.error_count);

    for dispatch in pass.dispatches {
        tracing::debug!("{}: {:?}", dispatch.shipment_id, dispatch.outcome);
    }
    Ok(())
}

/// Apply one tick to a simulation
///
/// # Errors
/// - The shipment ID is empty
/// - Invalid configuration or unreachable backends
/// - The tick failed to compute or persist
pub async fn tick(shipment_id: String) -> anyhow::Result<()> {
    let shipment_id = ShipmentId::parse(&shipment_id)?;

    let config = WaypointConfig::from_env();
    let backends = production_backends(&config).await?;
    let engine = build_engine(&config, &backends, Arc::new(SystemClock));

    let outcome = engine
        .processor
        .process(&shipment_id)
        .await
        .with_context(|| format!("Tick for {shipment_id} failed"))?;
    println!("{shipment_id}: {}", outcome.message());
    Ok(())
}

/// Run the deterministic fleet simulation
///
/// # Errors
/// - Invalid fleet parameters
/// - Any invariant was violated during the run
pub async fn simulate(
    vehicles: usize,
    steps: u64,
    step_secs: u64,
    seed: u64,
    duplicate_rate: f64,
) -> anyhow::Result<()> {
    let config = FleetConfig {
        vehicles,
        seed,
        duplicate_rate,
        ..FleetConfig::default()
    };

    let mut simulation = FleetSimulation::new(config).await?;
    let report = simulation
        .run(steps, Duration::from_secs(step_secs))
        .await?;

    print!("{}", report.summary());
    if !report.success() {
        anyhow::bail!(
            "{} invariant violations (reproduce with --seed {})",
            report.violations.len(),
            report.seed
        );
    }
    Ok(())
}
