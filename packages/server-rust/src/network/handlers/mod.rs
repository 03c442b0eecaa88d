//! HTTP handler definitions for the Waypoint server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports the handler functions used when building the
//! router. RPC handlers are mounted separately by `RpcRouter`.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;

/// Shared state passed to the health handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
