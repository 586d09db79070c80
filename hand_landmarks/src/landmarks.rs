use serde::{Deserialize, Serialize};

/// Keypoints per hand produced by the landmark model.
pub const NUM_LANDMARKS: usize = 21;

/// A keypoint normalized to the source frame.
///
/// `x` and `y` are fractions of the frame width and height. `z` is a relative
/// depth on the same scale as `x`, with the wrist as origin, and is not bounded.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn label(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    pub handedness: Handedness,
    /// Confidence of the handedness classification, in [0, 1].
    pub score: f32,
    pub landmarks: [Landmark; NUM_LANDMARKS],
}

pub type Detections = Vec<HandLandmarks>;
