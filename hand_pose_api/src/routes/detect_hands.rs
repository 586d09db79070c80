use crate::{
    hand_pose::{DetectionResult, ErrorBody},
    pipeline::{run_detection, PipelineError},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use hand_landmarks::HandDetector;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

pub const IMAGE_FIELD: &str = "image";

const ROUTE: &str = "/detect_hands";

#[derive(Error, Debug)]
pub enum DetectHandsError {
    #[error("Missing multipart field `image`")]
    MissingImage,
    #[error("{}", .0.body_text())]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl DetectHandsError {
    fn status_code(&self) -> StatusCode {
        match self {
            DetectHandsError::MissingImage => StatusCode::UNPROCESSABLE_ENTITY,
            DetectHandsError::Multipart(err) => err.status(),
            DetectHandsError::Pipeline(err) => err.status_code(),
        }
    }
}

impl IntoResponse for DetectHandsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Detection request failed: {:?}", self);
        } else {
            tracing::info!("Rejected upload: {}", self);
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn detect_hands<M: HandDetector>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> Result<Json<DetectionResult>, DetectHandsError> {
    state.metrics.record_request(ROUTE);

    let image = read_image_field(&mut multipart).await?;

    let started = Instant::now();
    let result = run_detection(
        state.detector.clone(),
        state.permits.clone(),
        image,
        state.limits,
    )
    .await;
    state
        .metrics
        .record_detection_duration(started.elapsed().as_millis() as u64, ROUTE);

    let result = result?;
    state
        .metrics
        .record_hands_detected(result.hand_poses.len() as u64, ROUTE);
    tracing::debug!(
        "Returning {} hand poses with status {:?}",
        result.hand_poses.len(),
        result.status
    );

    Ok(Json(result))
}

/// Returns the bytes of the first `image` field; other fields are skipped.
async fn read_image_field(multipart: &mut Multipart) -> Result<Bytes, DetectHandsError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(field.bytes().await?);
        }
    }
    Err(DetectHandsError::MissingImage)
}
