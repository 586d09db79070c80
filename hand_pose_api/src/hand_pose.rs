use hand_landmarks::{HandLandmarks, Handedness};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// One detected hand as returned to clients.
///
/// Every pose carries the size of the frame it was found in, so a pose can be
/// mapped back to pixels without the rest of the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandPose {
    pub score: f64,
    pub handedness: Handedness,
    pub keypoints: Vec<Keypoint>,
    #[serde(rename = "keypoints3D")]
    pub keypoints_3d: Vec<Keypoint3D>,
    pub image_size: ImageSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Success,
    NoHandsDetected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub status: DetectionStatus,
    pub hand_poses: Vec<HandPose>,
}

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: DetectionStatus,
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            status: DetectionStatus::Error,
            detail: detail.into(),
        }
    }
}

impl HandPose {
    /// 2D coordinates are clamped to the frame; depth is passed through as is.
    pub fn from_landmarks(hand: &HandLandmarks, width: u32, height: u32) -> Self {
        let keypoints = hand
            .landmarks
            .iter()
            .map(|l| Keypoint {
                x: f64::from(l.x).clamp(0., 1.),
                y: f64::from(l.y).clamp(0., 1.),
            })
            .collect();

        let keypoints_3d = hand
            .landmarks
            .iter()
            .map(|l| Keypoint3D {
                x: f64::from(l.x),
                y: f64::from(l.y),
                z: f64::from(l.z),
            })
            .collect();

        Self {
            score: f64::from(hand.score),
            handedness: hand.handedness,
            keypoints,
            keypoints_3d,
            image_size: ImageSize { width, height },
        }
    }
}

impl DetectionResult {
    pub fn from_detections(detections: &[HandLandmarks], width: u32, height: u32) -> Self {
        let hand_poses: Vec<HandPose> = detections
            .iter()
            .map(|hand| HandPose::from_landmarks(hand, width, height))
            .collect();

        let status = if hand_poses.is_empty() {
            DetectionStatus::NoHandsDetected
        } else {
            DetectionStatus::Success
        };

        Self { status, hand_poses }
    }
}
