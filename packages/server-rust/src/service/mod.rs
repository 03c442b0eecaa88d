//! Call model and request pipeline.
//!
//! 1. **Call** (`call`): context, call envelope, and the call error taxonomy
//! 2. **Operation** (`operation`): the innermost unit of work
//! 3. **Middleware** (`middleware`): rate limit, circuit breaker, trace, log and
//!    metrics layers, composed in a fixed order by `PipelineBuilder`
//! 4. **Configuration** (`config`): per-role, per-method pipeline settings
//! 5. **Domain services** (`domain`): product, user and order capabilities

pub mod call;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod operation;

// Re-export key types for convenient access.
pub use call::{Call, CallContext, CallError, ErrorClass, Failer, IntoOutcome, ServiceError};
pub use config::{ConfigError, PipelineConfig, ServiceConfig};
pub use middleware::{Pipeline, PipelineBuilder, SpanKind, StageKind};
pub use operation::{operation_fn, Operation, OperationService};
