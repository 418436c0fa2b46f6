//! Router assembly and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use waypoint_core::{
    Clock, EtaEstimator, SimulationControl, SimulationStateStore, TickProcessor, TickScheduler,
};

use crate::handlers::{
    api_enqueue_ticks, api_simulation_status, api_start_simulation, api_tick,
    api_transition_simulation,
};

/// Shared handles every handler works against.
#[derive(Clone)]
pub struct AppState {
    /// Applies one tick per queue delivery.
    pub processor: Arc<TickProcessor>,
    /// Runs enqueue passes.
    pub scheduler: Arc<TickScheduler>,
    /// Start and status transitions.
    pub control: Arc<SimulationControl>,
    /// Read access for status queries.
    pub states: Arc<dyn SimulationStateStore>,
    /// Arrival projection for status queries.
    pub eta: EtaEstimator,
    /// Time source shared with the processor.
    pub clock: Arc<dyn Clock>,
}

/// Builds the API router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/simulation/tick", post(api_tick))
        .route("/api/simulation/enqueue-ticks", post(api_enqueue_ticks))
        .route("/api/simulation/start", post(api_start_simulation))
        .route("/api/simulation/{shipment_id}", get(api_simulation_status))
        .route(
            "/api/simulation/{shipment_id}/transition",
            post(api_transition_simulation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API on `addr` until the process is stopped.
///
/// # Errors
///
/// - `std::io::Error` - If the listener cannot bind or the server fails
pub async fn run_server(addr: SocketAddr, state: AppState) -> Result<(), std::io::Error> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Waypoint API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}
