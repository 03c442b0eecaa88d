//! Tower middleware layers for request pipelines.
//!
//! - [`rate_limit`]: token-bucket admission control
//! - [`circuit_breaker`]: three-state failure isolation
//! - [`trace`]: `rpc` span and trace context propagation
//! - [`logging`]: one structured record per call
//! - [`metrics`]: call counts and latency
//! - [`pipeline`]: composes the layers around an operation in a fixed order

pub mod circuit_breaker;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod trace;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerLayer, CircuitState};
pub use logging::LoggingLayer;
pub use self::metrics::MetricsLayer;
pub use pipeline::{Pipeline, PipelineBuilder, StageKind};
pub use rate_limit::{RateLimitLayer, TokenBucket};
pub use trace::{SpanKind, TraceLayer};
