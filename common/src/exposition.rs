// HTTP exposition of the gauge registry

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4";

/// Build the exposition router: `/metrics` and `/health`
pub fn create_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_check))
        .with_state(handle)
}

/// Prometheus metrics endpoint
#[tracing::instrument(skip_all)]
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE_TEXT)],
        handle.render(),
    )
}

/// Health check endpoint
#[tracing::instrument]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// `/metrics` server, bound before any job runner starts
pub struct ExpositionServer {
    listener: TcpListener,
    router: Router,
}

impl ExpositionServer {
    /// Bind the listening socket. A bind failure is a startup error.
    #[instrument(skip(handle))]
    pub async fn bind(addr: SocketAddr, handle: PrometheusHandle) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Metrics endpoint listening");
        Ok(Self {
            listener,
            router: create_router(handle),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `token` is cancelled, then stop accepting and finish open requests
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<std::io::Result<()>> {
        tokio::spawn(async move {
            axum::serve(self.listener, self.router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await?;
            info!("Metrics endpoint stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricDescriptor;
    use crate::sink::{PrometheusSink, ValueSink};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint_renders_registry() {
        let sink = PrometheusSink::new();
        sink.register(&MetricDescriptor {
            name: "orders_total".to_string(),
            help: "Number of orders".to_string(),
            labels: BTreeMap::new(),
        })
        .unwrap();
        sink.observe("orders_total", 42.0);

        let response = create_router(sink.handle())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            CONTENT_TYPE_TEXT
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("orders_total 42"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = create_router(PrometheusSink::new().handle())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_server_stops_on_cancellation() {
        let server = ExpositionServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            PrometheusSink::new().handle(),
        )
        .await
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let token = CancellationToken::new();
        let handle = server.spawn(token.clone());
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
