//! API handlers for ticking, scheduling and inspecting simulations

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use waypoint_core::{
    EtaEstimate, LifecycleError, RouteGeometry, ShipmentId, SimulatedVehicle, ValidationError,
    WaypointError,
};

use crate::server::AppState;

fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "message": message.into() }))).into_response()
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        message(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", rejection.body_text()),
        )
    })
}

fn parse_shipment_id(raw: &str) -> Result<ShipmentId, Response> {
    ShipmentId::parse(raw).map_err(|e| message(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Tick endpoint the work queue delivers `{"shipmentId": "..."}` to.
///
/// No-op outcomes answer 200 so the queue does not redeliver them; failures
/// answer 500 so it does.
pub async fn api_tick(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let shipment_id = payload
        .ok()
        .and_then(|Json(body)| {
            body.get("shipmentId")
                .and_then(Value::as_str)
                .map(ShipmentId::parse)
        })
        .unwrap_or(Err(ValidationError::MissingShipmentId));

    let shipment_id = match shipment_id {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!("Rejected tick request: {}", e);
            return message(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match state.processor.process(&shipment_id).await {
        Ok(outcome) => message(StatusCode::OK, outcome.message()),
        Err(e) => {
            tracing::error!("Tick for {} failed: {}", shipment_id, e);
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            message(status, e.to_string())
        }
    }
}

/// Runs one scheduler pass and returns its summary.
pub async fn api_enqueue_ticks(State(state): State<AppState>) -> Response {
    match state.scheduler.run_pass().await {
        Ok(pass) => Json(pass.summary).into_response(),
        Err(e) => {
            tracing::error!("Enqueue pass failed: {}", e);
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Query parameters for the status endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    /// Multiplier applied to base speed for the ETA, default 1.
    pub speed_multiplier: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationStatusResponse {
    simulation: SimulatedVehicle,
    progress: f64,
    remaining_distance: f64,
    eta: Option<EtaEstimate>,
}

/// Current simulation state with an arrival estimate.
pub async fn api_simulation_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let shipment_id = match parse_shipment_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.states.get(&shipment_id).await {
        Ok(Some(vehicle)) => {
            let eta = state.eta.estimate(
                &vehicle,
                query.speed_multiplier.unwrap_or(1.0),
                state.clock.now_ms(),
            );
            Json(SimulationStatusResponse {
                progress: vehicle.progress(),
                remaining_distance: vehicle.remaining_distance(),
                simulation: vehicle,
                eta,
            })
            .into_response()
        }
        Ok(None) => message(
            StatusCode::NOT_FOUND,
            format!("No simulation found for shipment {shipment_id}"),
        ),
        Err(e) => {
            tracing::error!("Failed to load simulation {}: {}", shipment_id, e);
            message(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Body of the start endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSimulationRequest {
    /// Shipment to simulate.
    pub shipment_id: String,
    /// GeoJSON `LineString` the vehicle follows.
    pub route: RouteGeometry,
    /// Route length in metres; computed from the geometry when omitted.
    pub route_distance: Option<f64>,
}

/// Creates a simulation waiting for pickup.
pub async fn api_start_simulation(
    State(state): State<AppState>,
    payload: Result<Json<StartSimulationRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let shipment_id = match parse_shipment_id(&request.shipment_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let route_distance = match request.route_distance {
        Some(distance) => distance,
        None => match request.route.length_meters() {
            Ok(length) => length,
            Err(e) => return message(StatusCode::BAD_REQUEST, format!("Invalid route: {e}")),
        },
    };

    match state
        .control
        .start(&shipment_id, request.route, route_distance)
        .await
    {
        Ok(vehicle) => (StatusCode::CREATED, Json(vehicle)).into_response(),
        Err(e) => lifecycle_error_response(e),
    }
}

/// Externally driven status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionAction {
    /// Pickup done, vehicle starts moving.
    BeginTransit,
    /// Recipient confirmed the delivery.
    ConfirmDelivery,
    /// Flag the simulation as failed.
    MarkError,
    /// Park the simulation pending manual confirmation.
    MarkAwaitingStatus,
}

/// Body of the transition endpoint.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Transition to apply.
    pub action: TransitionAction,
}

/// Applies a status transition to a simulation.
pub async fn api_transition_simulation(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Response {
    let shipment_id = match parse_shipment_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = match request.action {
        TransitionAction::BeginTransit => state.control.begin_transit(&shipment_id).await,
        TransitionAction::ConfirmDelivery => state.control.confirm_delivery(&shipment_id).await,
        TransitionAction::MarkError => state.control.mark_error(&shipment_id).await,
        TransitionAction::MarkAwaitingStatus => {
            state.control.mark_awaiting_status(&shipment_id).await
        }
    };

    match result {
        Ok(vehicle) => Json(vehicle).into_response(),
        Err(e) => lifecycle_error_response(e),
    }
}

fn lifecycle_error_response(error: LifecycleError) -> Response {
    let status = match &error {
        LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
        LifecycleError::AlreadyActive { .. }
        | LifecycleError::InvalidTransition { .. }
        | LifecycleError::Conflict { .. } => StatusCode::CONFLICT,
        LifecycleError::InvalidRoute(_) | LifecycleError::InvalidRouteDistance { .. } => {
            StatusCode::BAD_REQUEST
        }
        LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let error = WaypointError::from(error);
    if !error.is_user_error() {
        tracing::error!("Simulation update failed: {}", error);
    }
    message(status, error.user_message())
}
