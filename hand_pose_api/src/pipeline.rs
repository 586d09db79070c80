use crate::hand_pose::DetectionResult;
use axum::http::StatusCode;
use bytes::Bytes;
use hand_landmarks::{decode_frame, DecodeLimits, FrameError, HandDetector, ModelError};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::instrument;

/// Bounds applied to every detection request.
#[derive(Debug, Clone, Copy)]
pub struct DetectionLimits {
    pub decode: DecodeLimits,
    pub timeout: Duration,
    /// Detections allowed on the blocking pool at once.
    pub max_in_flight: usize,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid image format")]
    InvalidImage(#[source] FrameError),
    #[error("{0}")]
    PayloadTooLarge(FrameError),
    #[error("Error processing image: {0}")]
    Processing(#[from] ModelError),
    #[error("Detection did not finish within {} ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Error processing image: {0}")]
    Worker(String),
}

impl From<FrameError> for PipelineError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { .. } | FrameError::ExceedsLimits(_) => {
                PipelineError::PayloadTooLarge(err)
            }
            _ => PipelineError::InvalidImage(err),
        }
    }
}

impl PipelineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            PipelineError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            PipelineError::Processing(_) | PipelineError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PipelineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Decodes `image`, runs the detector on it and shapes the response.
///
/// The work runs on the blocking pool once one of `permits` is free. The
/// deadline covers the wait for a permit as well as the work. When it passes
/// the request fails with `Timeout`; an inference already started is left to
/// finish and keeps its permit until then.
#[instrument(skip(detector, permits, image), fields(image_bytes = image.len()))]
pub async fn run_detection<M: HandDetector>(
    detector: Arc<M>,
    permits: Arc<Semaphore>,
    image: Bytes,
    limits: DetectionLimits,
) -> Result<DetectionResult, PipelineError> {
    let work = async move {
        let permit = permits
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detect(detector.as_ref(), &image, &limits.decode)
        })
        .await
        .map_err(|join_error| PipelineError::Worker(join_error.to_string()))?
    };

    match tokio::time::timeout(limits.timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout(limits.timeout)),
    }
}

fn detect<M: HandDetector>(
    detector: &M,
    image: &[u8],
    limits: &DecodeLimits,
) -> Result<DetectionResult, PipelineError> {
    let frame = decode_frame(image, limits)?;
    tracing::debug!("Decoded {}x{} frame", frame.width(), frame.height());

    let detections = detector.process(&frame)?;

    Ok(DetectionResult::from_detections(
        &detections,
        frame.width(),
        frame.height(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand_pose::DetectionStatus;
    use hand_landmarks::{DecodedFrame, Detections, HandLandmarks, Handedness, Landmark};
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    const LIMITS: DetectionLimits = DetectionLimits {
        decode: DecodeLimits {
            max_bytes: 1024 * 1024,
            max_width: 4096,
            max_height: 4096,
            max_alloc: 64 * 1024 * 1024,
        },
        timeout: Duration::from_secs(5),
        max_in_flight: 2,
    };

    struct CornerDetector;

    impl HandDetector for CornerDetector {
        fn process(&self, frame: &DecodedFrame) -> Result<Detections, ModelError> {
            let [r, g, _] = frame.pixels().get_pixel(0, 0).0;
            if r == 0 {
                return Ok(Vec::new());
            }
            let landmark = Landmark {
                x: r as f32 / 255.,
                y: g as f32 / 255.,
                z: 0.,
            };
            Ok(vec![HandLandmarks {
                handedness: Handedness::Right,
                score: 0.9,
                landmarks: [landmark; hand_landmarks::NUM_LANDMARKS],
            }])
        }
    }

    struct BrokenDetector;

    impl HandDetector for BrokenDetector {
        fn process(&self, _frame: &DecodedFrame) -> Result<Detections, ModelError> {
            Err(ModelError::MissingOutput("Identity".to_string()))
        }
    }

    struct PanickingDetector;

    impl HandDetector for PanickingDetector {
        fn process(&self, _frame: &DecodedFrame) -> Result<Detections, ModelError> {
            panic!("detector crashed")
        }
    }

    #[derive(Default)]
    struct SlowCountingDetector {
        calls: AtomicUsize,
    }

    impl HandDetector for SlowCountingDetector {
        fn process(&self, _frame: &DecodedFrame) -> Result<Detections, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(Vec::new())
        }
    }

    fn png(width: u32, height: u32, color: [u8; 3]) -> Bytes {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb(color));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), ImageFormat::Png)
            .unwrap();
        Bytes::from(image_data)
    }

    async fn run<M: HandDetector>(
        detector: M,
        image: Bytes,
        limits: DetectionLimits,
    ) -> Result<DetectionResult, PipelineError> {
        let permits = Arc::new(Semaphore::new(limits.max_in_flight));
        run_detection(Arc::new(detector), permits, image, limits).await
    }

    #[tokio::test]
    async fn test_run_detection_success() {
        let result = run(CornerDetector, png(64, 48, [255, 0, 0]), LIMITS)
            .await
            .unwrap();

        assert_eq!(result.status, DetectionStatus::Success);
        assert_eq!(result.hand_poses.len(), 1);
        assert_eq!(result.hand_poses[0].keypoints[0].x, 1.0);
        assert_eq!(result.hand_poses[0].image_size.width, 64);
        assert_eq!(result.hand_poses[0].image_size.height, 48);
    }

    #[tokio::test]
    async fn test_run_detection_without_hands() {
        let result = run(CornerDetector, png(8, 8, [0, 0, 0]), LIMITS)
            .await
            .unwrap();

        assert_eq!(result.status, DetectionStatus::NoHandsDetected);
        assert!(result.hand_poses.is_empty());
    }

    #[tokio::test]
    async fn test_run_detection_error_mapping() {
        let err = run(CornerDetector, Bytes::new(), LIMITS).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid image format");

        let small = DetectionLimits {
            decode: DecodeLimits {
                max_bytes: 16,
                ..LIMITS.decode
            },
            ..LIMITS
        };
        let err = run(CornerDetector, png(8, 8, [1, 1, 1]), small)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let err = run(BrokenDetector, png(8, 8, [1, 1, 1]), LIMITS)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_string(),
            "Error processing image: Model output `Identity` is missing"
        );
    }

    #[tokio::test]
    async fn test_run_detection_refuses_oversized_frames() {
        let narrow = DetectionLimits {
            decode: DecodeLimits {
                max_width: 64,
                ..LIMITS.decode
            },
            ..LIMITS
        };

        let err = run(CornerDetector, png(100, 10, [255, 0, 0]), narrow)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::PayloadTooLarge(_)));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(err.to_string().starts_with("Decoded image exceeds limits"));
    }

    #[tokio::test]
    async fn test_run_detection_reports_worker_panic() {
        let err = run(PanickingDetector, png(8, 8, [1, 1, 1]), LIMITS)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Worker(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_timed_out_detection_keeps_its_permit() {
        let detector = Arc::new(SlowCountingDetector::default());
        let permits = Arc::new(Semaphore::new(1));
        let limits = DetectionLimits {
            timeout: Duration::from_millis(100),
            max_in_flight: 1,
            ..LIMITS
        };

        let (first, second) = tokio::join!(
            run_detection(detector.clone(), permits.clone(), png(8, 8, [1, 1, 1]), limits),
            run_detection(detector.clone(), permits.clone(), png(8, 8, [1, 1, 1]), limits),
        );

        assert!(matches!(first, Err(PipelineError::Timeout(_))));
        assert!(matches!(second, Err(PipelineError::Timeout(_))));
        // The running inference still holds the only permit.
        assert_eq!(permits.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(permits.available_permits(), 1);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    }
}
