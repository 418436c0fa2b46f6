//! HTTP request handlers

pub mod api;

pub use api::{
    StartSimulationRequest, StatusQuery, TransitionAction, TransitionRequest, api_enqueue_ticks,
    api_simulation_status, api_start_simulation, api_tick, api_transition_simulation,
};
