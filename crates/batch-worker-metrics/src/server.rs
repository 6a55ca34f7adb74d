use crate::registry::MetricsRegistry;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use batch_worker_core::{Result, WorkerError};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Router exposing the registry snapshot at `path`
pub fn router(registry: MetricsRegistry, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<MetricsRegistry>) -> Response {
    match registry.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// HTTP scrape endpoint bound at construction
pub struct ScrapeServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScrapeServer {
    /// Bind `addr` and start serving. A port that is already taken fails
    /// immediately with `PortInUse`.
    pub async fn bind(addr: SocketAddr, path: &str, registry: MetricsRegistry) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => WorkerError::PortInUse {
                port: addr.port(),
                source: e,
            },
            _ => WorkerError::configuration(format!(
                "cannot bind metrics listener on {}: {}",
                addr, e
            )),
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| WorkerError::configuration(format!("metrics listener address: {}", e)))?;

        let shutdown = CancellationToken::new();
        let app = router(registry, path);
        let signal = shutdown.clone();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Metrics server error: {}", e);
            }
        });

        info!("Metrics server listening on {}", local_addr);

        Ok(ScrapeServer {
            local_addr,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait at most `grace` for open ones.
    pub async fn stop(mut self, grace: Duration) {
        self.shutdown.cancel();

        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Metrics server did not stop within {:?}, aborting", grace);
                handle.abort();
            }
        }
    }
}

impl Drop for ScrapeServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use prometheus::IntCounter;
    use tower::ServiceExt;

    fn registry_with_counter() -> (MetricsRegistry, IntCounter) {
        let registry = MetricsRegistry::new();
        let counter = registry
            .register(IntCounter::new("test_scrapes_total", "Scrapes").unwrap())
            .unwrap();
        (registry, counter)
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let (registry, counter) = registry_with_counter();
        counter.inc_by(7);

        let response = router(registry, "/metrics")
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("test_scrapes_total 7"));
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let (registry, _) = registry_with_counter();
        let app = router(registry, "/metrics");

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::post("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap();

        let result = ScrapeServer::bind(addr, "/metrics", MetricsRegistry::new()).await;
        match result {
            Err(WorkerError::PortInUse { port, .. }) => assert_eq!(port, addr.port()),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("bind should fail while the port is taken"),
        }
    }
}
