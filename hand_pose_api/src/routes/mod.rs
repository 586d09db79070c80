mod detect_hands;
mod health;
mod metrics;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use hand_landmarks::HandDetector;

pub use detect_hands::{DetectHandsError, IMAGE_FIELD};
pub use health::HealthStatus;

pub fn api_routes<M: HandDetector>() -> Router<SharedState<M>> {
    Router::new()
        .route("/detect_hands", post(detect_hands::detect_hands::<M>))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler::<M>))
}
