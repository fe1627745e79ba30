//! Prometheus recorder and `/metrics` endpoint.
//!
//! The recorder is a process-wide singleton. `init_global` installs it and
//! serves it over HTTP; `init_test` installs it without an endpoint and is
//! safe to call from concurrently running tests.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu};

/// Histogram buckets for duration metrics (in seconds). Lease waits can
/// approach `max_retries * retry_interval`, hence the long upper end.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Access to the installed Prometheus recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

impl MetricsController {
    /// Get the global controller.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Install the recorder and serve `/metrics` and `/health` on `addr`.
pub fn init_global(addr: SocketAddr) -> Result<(), MetricsError> {
    install()?;
    let handle = MetricsController::get()?.handle.clone();
    tokio::spawn(serve(addr, handle));
    info!(%addr, "Metrics server started");
    Ok(())
}

/// Install the recorder without an HTTP endpoint. Idempotent.
pub fn init_test() {
    if install().is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

fn install() -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())
}

async fn serve(addr: SocketAddr, handle: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Metrics server error");
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit;
    use crate::metrics::events::BlobsDiscovered;
    use std::thread;

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        assert!(MetricsController::get().is_ok());
    }

    #[test]
    fn test_emitted_event_is_rendered() {
        init_test();

        emit!(BlobsDiscovered {
            count: 3,
            reader: "render-test".to_string(),
        });

        let output = MetricsController::get().unwrap().render();
        assert!(output.contains("flurry_blobs_discovered_total"));
        assert!(output.contains("render-test"));
    }

    #[test]
    fn test_concurrent_init_test() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    init_test();
                    MetricsController::get().unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_double_global_install_fails() {
        init_test();
        assert!(install().is_err());
    }
}
