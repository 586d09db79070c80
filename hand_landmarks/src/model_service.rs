use crate::{frame::DecodedFrame, landmarks::Detections};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Inference session failed: {0}")]
    Session(String),
    #[error("Model output `{0}` is missing")]
    MissingOutput(String),
    #[error("Model output `{output}` has {actual} values, expected at least {expected}")]
    UnexpectedShape {
        output: String,
        expected: usize,
        actual: usize,
    },
    #[error("Session mutex poisoned: {0}")]
    PoisonedSession(String),
}

/// Detection adapter over a hand landmark detector.
///
/// Implementations are created once per process and shared by every in-flight
/// request, so `process` must not depend on state left behind by earlier calls.
pub trait HandDetector: Send + Sync + 'static {
    fn process(&self, frame: &DecodedFrame) -> Result<Detections, ModelError>;
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HandDetectorConfig {
    #[serde(default = "default_static_image_mode")]
    pub static_image_mode: bool,
    /// Palms kept after suppression; each one gets a landmark pass.
    #[serde(default = "default_max_num_hands")]
    pub max_num_hands: usize,
    #[serde(default = "default_min_detection_confidence")]
    pub min_detection_confidence: f32,
    /// Only meaningful with inter-frame tracking, kept for configuration parity.
    #[serde(default = "default_min_tracking_confidence")]
    pub min_tracking_confidence: f32,
}

fn default_static_image_mode() -> bool {
    true
}

fn default_max_num_hands() -> usize {
    1
}

fn default_min_detection_confidence() -> f32 {
    0.8
}

fn default_min_tracking_confidence() -> f32 {
    0.5
}

impl Default for HandDetectorConfig {
    fn default() -> Self {
        Self {
            static_image_mode: default_static_image_mode(),
            max_num_hands: default_max_num_hands(),
            min_detection_confidence: default_min_detection_confidence(),
            min_tracking_confidence: default_min_tracking_confidence(),
        }
    }
}

impl HandDetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.static_image_mode {
            return Err("Only static image mode is supported".to_string());
        }
        if self.max_num_hands == 0 {
            return Err("max_num_hands must be at least 1".to_string());
        }
        for (name, value) in [
            ("min_detection_confidence", self.min_detection_confidence),
            ("min_tracking_confidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_detector_config() {
        let config = HandDetectorConfig::default();

        assert!(config.static_image_mode);
        assert_eq!(config.max_num_hands, 1);
        assert_eq!(config.min_detection_confidence, 0.8);
        assert_eq!(config.min_tracking_confidence, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_several_hands() {
        let config = HandDetectorConfig {
            max_num_hands: 4,
            ..Default::default()
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let no_hands = HandDetectorConfig {
            max_num_hands: 0,
            ..Default::default()
        };
        assert!(no_hands.validate().is_err());

        let confidence = HandDetectorConfig {
            min_detection_confidence: 1.5,
            ..Default::default()
        };
        let err = confidence.validate().unwrap_err();
        assert!(err.contains("min_detection_confidence"));

        let tracking = HandDetectorConfig {
            static_image_mode: false,
            ..Default::default()
        };
        assert!(tracking.validate().is_err());
    }
}
