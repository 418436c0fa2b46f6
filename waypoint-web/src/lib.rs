//! Waypoint Web - JSON API Server

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! HTTP surface of the simulation engine: the tick endpoint the work queue
//! delivers to, the enqueue endpoint an external timer calls, and read-only
//! status with ETA for clients.

pub mod handlers;
pub mod server;

pub use server::{AppState, build_router, run_server};
