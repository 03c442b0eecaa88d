//! Pipeline composition: wraps one operation in the decorator stages.
//!
//! Stage order, outermost to innermost, is fixed regardless of the order the
//! builder was given them in:
//! 1. rate limit -- reject before any other work is done
//! 2. circuit breaker -- fail fast while the operation is unhealthy
//! 3. trace -- open the span the remaining stages run inside
//! 4. logging
//! 5. metrics
//! 6. the operation itself, bounded by the call's deadline and cancellation

use std::sync::Arc;

use tower::util::BoxCloneSyncService;
use tower::Layer;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerLayer};
use super::logging::LoggingLayer;
use super::metrics::MetricsLayer;
use super::rate_limit::{RateLimitLayer, TokenBucket};
use super::trace::{SpanKind, TraceLayer};
use crate::service::call::{Call, CallError, Failer};
use crate::service::config::{ConfigError, PipelineConfig};
use crate::service::operation::{Operation, OperationService};

/// A fully decorated operation: cloneable, shareable, and type-erased.
pub type Pipeline<Req, Resp> = BoxCloneSyncService<Call<Req>, Resp, CallError>;

/// Identifies a stage. Declaration order is the canonical outermost-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageKind {
    RateLimit,
    CircuitBreaker,
    Trace,
    Logging,
    Metrics,
}

enum Stage {
    RateLimit(Arc<TokenBucket>),
    CircuitBreaker(Arc<CircuitBreaker>),
    Trace,
    Logging,
    Metrics,
}

impl Stage {
    fn kind(&self) -> StageKind {
        match self {
            Self::RateLimit(_) => StageKind::RateLimit,
            Self::CircuitBreaker(_) => StageKind::CircuitBreaker,
            Self::Trace => StageKind::Trace,
            Self::Logging => StageKind::Logging,
            Self::Metrics => StageKind::Metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Collects stages for one capability and composes them around an operation.
pub struct PipelineBuilder {
    method: &'static str,
    kind: SpanKind,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Starts an empty pipeline for `method` on the given side of the boundary.
    #[must_use]
    pub fn new(method: &'static str, kind: SpanKind) -> Self {
        Self {
            method,
            kind,
            stages: Vec::new(),
        }
    }

    /// Builds the stages described by `config`, with fresh limiter and
    /// breaker state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any admission setting is invalid.
    pub fn from_config(
        method: &'static str,
        kind: SpanKind,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = Self::new(method, kind);
        if let Some(rl) = &config.rate_limit {
            builder = builder.with_rate_limiter(Arc::new(TokenBucket::from_config(rl)?));
        }
        if let Some(cb) = &config.circuit_breaker {
            builder = builder.with_circuit_breaker(Arc::new(CircuitBreaker::new(method, cb.clone())?));
        }
        if config.tracing {
            builder = builder.with_tracing();
        }
        if config.logging {
            builder = builder.with_logging();
        }
        if config.metrics {
            builder = builder.with_metrics();
        }
        Ok(builder)
    }

    #[must_use]
    pub fn with_rate_limiter(self, bucket: Arc<TokenBucket>) -> Self {
        self.push(Stage::RateLimit(bucket))
    }

    #[must_use]
    pub fn with_circuit_breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        self.push(Stage::CircuitBreaker(breaker))
    }

    #[must_use]
    pub fn with_tracing(self) -> Self {
        self.push(Stage::Trace)
    }

    #[must_use]
    pub fn with_logging(self) -> Self {
        self.push(Stage::Logging)
    }

    #[must_use]
    pub fn with_metrics(self) -> Self {
        self.push(Stage::Metrics)
    }

    /// Stages in the order a call passes through them.
    #[must_use]
    pub fn stages(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    fn push(mut self, stage: Stage) -> Self {
        let kind = stage.kind();
        self.stages.retain(|s| s.kind() != kind);
        let at = self.stages.partition_point(|s| s.kind() < kind);
        self.stages.insert(at, stage);
        self
    }

    /// Wraps `op` in the configured stages.
    pub fn build<Req, O>(self, op: O) -> Pipeline<Req, O::Response>
    where
        Req: Send + 'static,
        O: Operation<Req>,
        O::Response: Failer,
    {
        let method = self.method;
        let kind = self.kind;
        let innermost: Pipeline<Req, O::Response> =
            BoxCloneSyncService::new(OperationService::new(Arc::new(op)));

        self.stages
            .into_iter()
            .rev()
            .fold(innermost, |inner, stage| match stage {
                Stage::RateLimit(bucket) => {
                    BoxCloneSyncService::new(RateLimitLayer::new(method, bucket).layer(inner))
                }
                Stage::CircuitBreaker(breaker) => {
                    BoxCloneSyncService::new(CircuitBreakerLayer::new(breaker).layer(inner))
                }
                Stage::Trace => BoxCloneSyncService::new(TraceLayer::new(method, kind).layer(inner)),
                Stage::Logging => BoxCloneSyncService::new(LoggingLayer::new(method).layer(inner)),
                Stage::Metrics => BoxCloneSyncService::new(MetricsLayer::new(method, kind).layer(inner)),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
