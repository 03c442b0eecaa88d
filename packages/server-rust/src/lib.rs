//! Waypoint server: business operations exposed over RPC behind a decorated
//! request pipeline (rate limit, circuit breaker, tracing, logging, metrics).

pub mod app;
pub mod network;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use app::{Clients, Services};
pub use service::{CallContext, CallError, ServiceConfig, ServiceError};
