//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections. The split lets the caller learn the bound
//! port (and hand out the shutdown controller) before serving begins.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::{build_http_layers, track_in_flight};
use super::shutdown::{HealthState, ShutdownController};
use crate::transport::RpcRouter;

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates the shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- serves health and RPC routes until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- liveness probe
    /// - `GET /health/ready` -- readiness probe
    /// - `POST /rpc/...` -- RPC routes, behind in-flight tracking
    pub fn build_router(&self, rpc: RpcRouter) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            start_time: Instant::now(),
        };

        let rpc = rpc.into_router().layer(axum::middleware::from_fn_with_state(
            Arc::clone(&self.shutdown),
            track_in_flight,
        ));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state)
            .merge(rpc)
            .layer(build_http_layers(&self.config))
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured port
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves `rpc` until `shutdown` resolves, then drains.
    ///
    /// After the shutdown signal:
    /// 1. Health state transitions to Draining and new RPCs get 503
    /// 2. Open connections finish their in-flight calls. Closing connections
    ///    and waiting for calls share one `drain_timeout` budget
    /// 3. Health state transitions to Stopped once nothing is in flight
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// hits a fatal I/O error.
    pub async fn serve(
        mut self,
        rpc: RpcRouter,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router(rpc);
        let ctrl = self.shutdown;
        let drain_timeout = self.config.drain_timeout;

        let signal_ctrl = Arc::clone(&ctrl);
        let signal = async move {
            shutdown.await;
            info!("shutdown signalled, draining in-flight calls");
            signal_ctrl.trigger_shutdown();
        };

        let mut state = ctrl.state_receiver();
        let draining = async move {
            let _ = state
                .wait_for(|s| matches!(s, HealthState::Draining | HealthState::Stopped))
                .await;
        };

        ctrl.set_ready();
        info!("serving HTTP");

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .into_future();
        tokio::pin!(server);

        let mut finished = false;
        tokio::select! {
            result = &mut server => {
                result?;
                finished = true;
            }
            () = draining => {}
        }

        // One budget covers both closing connections and releasing calls.
        let deadline = tokio::time::Instant::now() + drain_timeout;
        if !finished {
            match tokio::time::timeout_at(deadline, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!("drain timeout expired, closing remaining connections"),
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if ctrl.wait_for_drain(remaining).await {
            info!("all in-flight calls drained");
        } else {
            warn!(
                in_flight = ctrl.in_flight_count(),
                "drain timeout expired with calls still in flight"
            );
        }
        Ok(())
    }
}
