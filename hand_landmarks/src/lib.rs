mod frame;
mod landmarks;
mod model_service;
mod ort_service;
mod palm_detection;
mod roi;

pub mod config;

pub use frame::{
    decode_frame, ChannelOrder, DecodeLimits, DecodedFrame, FrameError, Letterbox, TensorLayout,
};
pub use landmarks::{Detections, HandLandmarks, Handedness, Landmark, NUM_LANDMARKS};
pub use model_service::{HandDetector, HandDetectorConfig, ModelError};
pub use ort_service::OrtHandDetector;
pub use roi::RotatedRect;
