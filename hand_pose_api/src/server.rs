use crate::{
    config::CorsConfig, pipeline::DetectionLimits, routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, http::HeaderValue, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use hand_landmarks::HandDetector;
use std::sync::Arc;
use tokio::{
    net::TcpListener,
    sync::{broadcast::Receiver, Semaphore},
    task::JoinHandle,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Room left on top of the image limit for multipart boundaries and headers.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct SharedState<M: HandDetector> {
    pub detector: Arc<M>,
    /// Admission to the blocking pool, `limits.max_in_flight` at a time.
    pub permits: Arc<Semaphore>,
    pub limits: DetectionLimits,
    pub metrics: Arc<Metrics>,
}

impl<M: HandDetector> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            detector: self.detector.clone(),
            permits: self.permits.clone(),
            limits: self.limits,
            metrics: self.metrics.clone(),
        }
    }
}

impl<M: HandDetector> SharedState<M> {
    pub fn new(detector: Arc<M>, limits: DetectionLimits, metrics: Arc<Metrics>) -> Self {
        Self {
            detector,
            permits: Arc::new(Semaphore::new(limits.max_in_flight.max(1))),
            limits,
            metrics,
        }
    }
}

fn cors_layer(config: &CorsConfig) -> anyhow::Result<CorsLayer> {
    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

pub fn build_router<M: HandDetector>(
    state: SharedState<M>,
    cors: &CorsConfig,
) -> anyhow::Result<Router> {
    let body_limit = state
        .limits
        .decode
        .max_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    let router = Router::new()
        .merge(api_routes::<M>())
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors)?)
        .layer(metrics_layer);

    Ok(router)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(router: Router, addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use hand_landmarks::{DecodeLimits, DecodedFrame, Detections, ModelError};
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct NoHands;

    impl HandDetector for NoHands {
        fn process(&self, _frame: &DecodedFrame) -> Result<Detections, ModelError> {
            Ok(Vec::new())
        }
    }

    fn router(origins: &[&str]) -> anyhow::Result<Router> {
        let state = SharedState::new(
            Arc::new(NoHands),
            DetectionLimits {
                decode: DecodeLimits {
                    max_bytes: 1024,
                    max_width: 256,
                    max_height: 256,
                    max_alloc: 1024 * 1024,
                },
                timeout: Duration::from_secs(1),
                max_in_flight: 1,
            },
            Arc::new(Metrics::new()?),
        );
        let cors = CorsConfig {
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
        };
        build_router(state, &cors)
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let app = router(&["http://localhost:3000"]).unwrap();

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/detect_hands")
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-client-id")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "x-client-id");
    }

    #[tokio::test]
    async fn test_cors_ignores_unknown_origin() {
        let app = router(&["http://localhost:3000"]).unwrap();

        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_origin_is_a_startup_error() {
        assert!(router(&["http://bad\norigin"]).is_err());
    }

    #[tokio::test]
    async fn test_metrics_route_is_registered() {
        let app = router(&[]).unwrap();

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
