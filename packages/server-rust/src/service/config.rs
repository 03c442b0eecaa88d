//! Pipeline configuration, loaded from JSON.
//!
//! Observability stages are on by default. Admission control (rate limiting,
//! circuit breaking) has no defaults and must be configured explicitly; once
//! present, every numeric setting is validated before any pipeline is built.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Invalid or unreadable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be {requirement}, got {value}")]
    OutOfRange {
        field: &'static str,
        requirement: &'static str,
        value: String,
    },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

fn out_of_range(
    field: &'static str,
    requirement: &'static str,
    value: impl ToString,
) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        requirement,
        value: value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for every exposed capability, per process role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// Upper bound on the deadline of every inbound call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Pipelines wrapping local operations.
    pub server: RoleConfig,
    /// Pipelines wrapping outbound remote calls.
    pub client: RoleConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            server: RoleConfig::default(),
            client: RoleConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid JSON
    /// for this schema, or fails validation.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_ms == 0 {
            return Err(out_of_range("callTimeoutMs", "greater than 0", 0));
        }
        self.server.validate()?;
        self.client.validate()
    }
}

/// Defaults plus per-method overrides for one process role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleConfig {
    pub defaults: PipelineConfig,
    /// Keyed by method name (`Sum`, `GetUser`, ...). An override replaces the
    /// defaults entirely.
    pub methods: HashMap<String, PipelineConfig>,
}

impl RoleConfig {
    #[must_use]
    pub fn pipeline_for(&self, method: &str) -> &PipelineConfig {
        self.methods.get(method).unwrap_or(&self.defaults)
    }

    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate()?;
        self.methods.values().try_for_each(PipelineConfig::validate)
    }
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Stages of one pipeline. Absent admission stages are simply not built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub rate_limit: Option<RateLimitConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub tracing: bool,
    pub logging: bool,
    pub metrics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: None,
            circuit_breaker: None,
            tracing: true,
            logging: true,
            metrics: true,
        }
    }
}

impl PipelineConfig {
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rl) = &self.rate_limit {
            rl.validate()?;
        }
        if let Some(cb) = &self.circuit_breaker {
            cb.validate()?;
        }
        Ok(())
    }
}

/// Token bucket settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Maximum burst size.
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_second: f64,
    /// Longest a call may wait for a token; 0 rejects immediately.
    #[serde(default)]
    pub max_wait_ms: u64,
}

impl RateLimitConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for a zero capacity or a
    /// non-positive refill rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(out_of_range("rateLimit.capacity", "at least 1", 0));
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(out_of_range(
                "rateLimit.refillPerSecond",
                "a positive finite number",
                self.refill_per_second,
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// When a closed breaker opens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TripCondition {
    /// Open after `count` failures inside the window.
    Failures { count: u32 },
    /// Open once at least `min_calls` outcomes are in the window and the
    /// failing share reaches `ratio`.
    #[serde(rename_all = "camelCase")]
    FailureRatio { ratio: f64, min_calls: u32 },
}

/// Circuit breaker settings. Every field is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    pub trip: TripCondition,
    /// Length of the sliding outcome window while closed.
    pub window_ms: u64,
    /// Time spent open before trial calls are let through.
    pub cooldown_ms: u64,
    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for any zero or out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.trip {
            TripCondition::Failures { count: 0 } => {
                return Err(out_of_range("circuitBreaker.trip.count", "at least 1", 0));
            }
            TripCondition::FailureRatio { ratio, .. } if !(ratio > 0.0 && ratio <= 1.0) => {
                return Err(out_of_range(
                    "circuitBreaker.trip.ratio",
                    "in (0, 1]",
                    ratio,
                ));
            }
            TripCondition::FailureRatio { min_calls: 0, .. } => {
                return Err(out_of_range("circuitBreaker.trip.minCalls", "at least 1", 0));
            }
            _ => {}
        }
        if self.window_ms == 0 {
            return Err(out_of_range("circuitBreaker.windowMs", "greater than 0", 0));
        }
        if self.cooldown_ms == 0 {
            return Err(out_of_range("circuitBreaker.cooldownMs", "greater than 0", 0));
        }
        if self.half_open_max_calls == 0 {
            return Err(out_of_range(
                "circuitBreaker.halfOpenMaxCalls",
                "at least 1",
                0,
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
