mod hand_pose;
mod pipeline;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
pub use hand_pose::{
    DetectionResult, DetectionStatus, ErrorBody, HandPose, ImageSize, Keypoint, Keypoint3D,
};
pub use pipeline::{run_detection, DetectionLimits, PipelineError};
pub use routes::{DetectHandsError, HealthStatus, IMAGE_FIELD};
pub use server::{build_router, HttpServer, SharedState};
pub use telemetry::Metrics;
