use crate::{
    frame::{ChannelOrder, TensorLayout},
    model_service::HandDetectorConfig,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
    #[serde(default)]
    pub channel_order: ChannelOrder,
    #[serde(default)]
    pub layout: TensorLayout,
    /// Palm scores, hand presence and handedness come out as logits when set.
    #[serde(default = "default_apply_sigmoid")]
    pub apply_sigmoid: bool,
    #[serde(default)]
    pub palm: PalmModelConfig,
    #[serde(default)]
    pub landmark: LandmarkModelConfig,
    #[serde(default)]
    pub detector: HandDetectorConfig,
}

/// First stage: finds palms on the letterboxed frame.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PalmModelConfig {
    pub onnx_file: String,
    pub input_size: u32,
    pub outputs: PalmOutputNames,
    /// Overlap above which the weaker of two palm boxes is dropped.
    pub min_suppression_threshold: f32,
}

impl Default for PalmModelConfig {
    fn default() -> Self {
        Self {
            onnx_file: "palm_detection_full.onnx".to_string(),
            input_size: 192,
            outputs: PalmOutputNames::default(),
            min_suppression_threshold: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PalmOutputNames {
    pub boxes: String,
    pub scores: String,
}

impl Default for PalmOutputNames {
    fn default() -> Self {
        Self {
            boxes: "Identity".to_string(),
            scores: "Identity_1".to_string(),
        }
    }
}

/// Second stage: regresses 21 landmarks on each hand crop.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LandmarkModelConfig {
    pub onnx_file: String,
    pub input_width: u32,
    pub input_height: u32,
    pub outputs: LandmarkOutputNames,
}

impl Default for LandmarkModelConfig {
    fn default() -> Self {
        Self {
            onnx_file: "hand_landmark_full.onnx".to_string(),
            input_width: 224,
            input_height: 224,
            outputs: LandmarkOutputNames::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LandmarkOutputNames {
    pub landmarks: String,
    pub presence: String,
    pub handedness: String,
}

impl Default for LandmarkOutputNames {
    fn default() -> Self {
        Self {
            landmarks: "Identity".to_string(),
            presence: "Identity_1".to_string(),
            handedness: "Identity_2".to_string(),
        }
    }
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_apply_sigmoid() -> bool {
    true
}

impl ModelConfig {
    pub fn palm_path(&self) -> PathBuf {
        self.model_dir.join(&self.palm.onnx_file)
    }

    pub fn landmark_path(&self) -> PathBuf {
        self.model_dir.join(&self.landmark.onnx_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.num_instances == 0 {
            return Err("num_instances must be at least 1".to_string());
        }
        if self.palm.input_size == 0 {
            return Err("Invalid palm model input size 0".to_string());
        }
        if self.landmark.input_width == 0 || self.landmark.input_height == 0 {
            return Err(format!(
                "Invalid landmark model input size {}x{}",
                self.landmark.input_width, self.landmark.input_height
            ));
        }
        if !(0.0..=1.0).contains(&self.palm.min_suppression_threshold) {
            return Err(format!(
                "min_suppression_threshold must be within [0, 1], got {}",
                self.palm.min_suppression_threshold
            ));
        }
        self.detector.validate()?;
        for path in [self.palm_path(), self.landmark_path()] {
            if !path.exists() {
                return Err(format!("Model file not found: {:?}", path));
            }
        }
        Ok(())
    }
}
