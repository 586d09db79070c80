use crate::{
    config::{LandmarkModelConfig, ModelConfig, PalmModelConfig},
    frame::{ChannelOrder, DecodedFrame, TensorLayout},
    landmarks::{Detections, HandLandmarks, Handedness, Landmark, NUM_LANDMARKS},
    model_service::{HandDetector, HandDetectorConfig, ModelError},
    palm_detection::{
        decode_palms, generate_anchors, select_palms, Anchor, PalmDetection, VALUES_PER_ANCHOR,
    },
    roi::{hand_rect_from_palm, project_landmark, RotatedRect},
};
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, TryLockError,
    },
};

/// Palm logits are clipped to this magnitude before activation.
const SCORE_CLIP: f32 = 100.;

fn session_error(err: impl std::fmt::Display) -> ModelError {
    ModelError::Session(err.to_string())
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

fn first_value(name: &str, values: &[f32]) -> Result<f32, ModelError> {
    values
        .first()
        .copied()
        .ok_or_else(|| ModelError::UnexpectedShape {
            output: name.to_string(),
            expected: 1,
            actual: 0,
        })
}

/// Raw values read from one run of the landmark model.
struct RawLandmarks {
    landmarks: Vec<f32>,
    presence: f32,
    handedness: f32,
}

/// Sessions of one model, created once and each behind its own mutex.
struct SessionPool<S> {
    sessions: Vec<Mutex<S>>,
    counter: AtomicUsize,
}

impl<S> SessionPool<S> {
    fn from_sessions(sessions: Vec<S>) -> Self {
        Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            counter: AtomicUsize::new(0),
        }
    }

    /// Locks the first idle session, scanning from the next round-robin slot.
    /// Blocks on that slot only when every session is busy.
    fn acquire(&self) -> Result<(usize, MutexGuard<'_, S>), ModelError> {
        let len = self.sessions.len();
        if len == 0 {
            return Err(ModelError::Session("session pool is empty".to_string()));
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let index = (start + offset) % len;
            match self.sessions[index].try_lock() {
                Ok(guard) => return Ok((index, guard)),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(e)) => {
                    return Err(ModelError::PoisonedSession(e.to_string()))
                }
            }
        }

        let guard = self.sessions[start]
            .lock()
            .map_err(|e| ModelError::PoisonedSession(e.to_string()))?;
        Ok((start, guard))
    }
}

impl SessionPool<Session> {
    fn load(path: &Path, num_instances: usize) -> Result<Self, ModelError> {
        let sessions = (0..num_instances)
            .map(|_| {
                Session::builder()
                    .map_err(session_error)?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(session_error)?
                    .commit_from_file(path)
                    .map_err(session_error)
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        if sessions.is_empty() {
            return Err(ModelError::Session(
                "at least one session instance is required".to_string(),
            ));
        }

        tracing::info!("Created {} ONNX sessions from {:?}", sessions.len(), path);

        Ok(Self::from_sessions(sessions))
    }

    /// Runs one input through a free session and copies out the named outputs.
    fn run<const N: usize>(
        &self,
        input: &Array<f32, Ix4>,
        names: [&str; N],
    ) -> Result<[Vec<f32>; N], ModelError> {
        let (index, mut session) = self.acquire()?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Session(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Session(format!("inference failed: {}", e)))?;

        let values = names
            .iter()
            .map(|&name| {
                let value = outputs
                    .get(name)
                    .ok_or_else(|| ModelError::MissingOutput(name.to_string()))?;
                let (_, data) = value.try_extract_tensor::<f32>().map_err(|e| {
                    ModelError::Session(format!("failed to extract `{}`: {}", name, e))
                })?;
                Ok(data.to_vec())
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        values.try_into().map_err(|values: Vec<Vec<f32>>| {
            ModelError::Session(format!("expected {} outputs, got {}", N, values.len()))
        })
    }
}

/// Two-stage hand detector backed by ONNX Runtime.
///
/// A palm model runs on the letterboxed frame. Every palm it keeps becomes a
/// rotated hand region, and the landmark model runs on that crop. Each stage
/// has `num_instances` sessions, so at most that many inferences per stage
/// run at the same time.
#[derive(Clone)]
pub struct OrtHandDetector {
    palm_sessions: Arc<SessionPool<Session>>,
    landmark_sessions: Arc<SessionPool<Session>>,
    anchors: Arc<Vec<Anchor>>,
    palm: PalmModelConfig,
    landmark: LandmarkModelConfig,
    channel_order: ChannelOrder,
    layout: TensorLayout,
    apply_sigmoid: bool,
    detector: HandDetectorConfig,
}

impl OrtHandDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let palm_sessions =
            SessionPool::load(&model_config.palm_path(), model_config.num_instances)?;
        let landmark_sessions =
            SessionPool::load(&model_config.landmark_path(), model_config.num_instances)?;
        let anchors = generate_anchors(model_config.palm.input_size);

        tracing::info!(
            "Palm model input {}px with {} anchors",
            model_config.palm.input_size,
            anchors.len()
        );

        Ok(Self {
            palm_sessions: Arc::new(palm_sessions),
            landmark_sessions: Arc::new(landmark_sessions),
            anchors: Arc::new(anchors),
            palm: model_config.palm.clone(),
            landmark: model_config.landmark.clone(),
            channel_order: model_config.channel_order,
            layout: model_config.layout,
            apply_sigmoid: model_config.apply_sigmoid,
            detector: model_config.detector.clone(),
        })
    }

    fn activate(&self, x: f32) -> f32 {
        if self.apply_sigmoid {
            sigmoid(x)
        } else {
            x
        }
    }

    fn detect_palms(&self, frame: &DecodedFrame) -> Result<Vec<PalmDetection>, ModelError> {
        let (input, letterbox) =
            frame.letterbox_tensor(self.palm.input_size, self.channel_order, self.layout);
        let names = &self.palm.outputs;
        let [boxes, scores] = self
            .palm_sessions
            .run(&input, [names.boxes.as_str(), names.scores.as_str()])?;

        let palms = self.decode_palm_outputs(&boxes, &scores)?;

        Ok(palms
            .iter()
            .map(|palm| palm.remove_letterbox(&letterbox))
            .collect())
    }

    /// Scores every anchor, then keeps the strongest non-overlapping palms,
    /// at most `max_num_hands` of them.
    fn decode_palm_outputs(
        &self,
        boxes: &[f32],
        scores: &[f32],
    ) -> Result<Vec<PalmDetection>, ModelError> {
        let names = &self.palm.outputs;
        for (output, expected, actual) in [
            (&names.boxes, self.anchors.len() * VALUES_PER_ANCHOR, boxes.len()),
            (&names.scores, self.anchors.len(), scores.len()),
        ] {
            if actual < expected {
                return Err(ModelError::UnexpectedShape {
                    output: output.clone(),
                    expected,
                    actual,
                });
            }
        }

        let scores: Vec<f32> = scores
            .iter()
            .map(|&score| self.activate(score.clamp(-SCORE_CLIP, SCORE_CLIP)))
            .collect();
        let candidates = decode_palms(
            boxes,
            &scores,
            &self.anchors,
            self.palm.input_size,
            self.detector.min_detection_confidence,
        );

        Ok(select_palms(
            candidates,
            self.palm.min_suppression_threshold,
            self.detector.max_num_hands,
        ))
    }

    fn detect_landmarks(
        &self,
        frame: &DecodedFrame,
        rect: &RotatedRect,
    ) -> Result<Option<HandLandmarks>, ModelError> {
        let input = frame.crop_tensor(
            rect,
            self.landmark.input_width,
            self.landmark.input_height,
            self.channel_order,
            self.layout,
        );
        let names = &self.landmark.outputs;
        let [landmarks, presence, handedness] = self.landmark_sessions.run(
            &input,
            [
                names.landmarks.as_str(),
                names.presence.as_str(),
                names.handedness.as_str(),
            ],
        )?;

        let raw = RawLandmarks {
            landmarks,
            presence: first_value(&names.presence, &presence)?,
            handedness: first_value(&names.handedness, &handedness)?,
        };

        self.decode_landmarks(&raw, rect)
    }

    /// Turns raw landmark model values into a detection in frame space.
    ///
    /// Coordinates come out in crop pixels. They are divided by the crop size
    /// and projected through `rect`; `z` shares the scale of `x`.
    fn decode_landmarks(
        &self,
        raw: &RawLandmarks,
        rect: &RotatedRect,
    ) -> Result<Option<HandLandmarks>, ModelError> {
        let presence = self.activate(raw.presence);
        if presence < self.detector.min_detection_confidence {
            tracing::debug!("Hand presence {:.3} below threshold", presence);
            return Ok(None);
        }

        let expected = NUM_LANDMARKS * 3;
        if raw.landmarks.len() < expected {
            return Err(ModelError::UnexpectedShape {
                output: self.landmark.outputs.landmarks.clone(),
                expected,
                actual: raw.landmarks.len(),
            });
        }

        let right_probability = self.activate(raw.handedness);
        let (handedness, score) = if right_probability >= 0.5 {
            (Handedness::Right, right_probability)
        } else {
            (Handedness::Left, 1. - right_probability)
        };

        let (w, h) = (
            self.landmark.input_width as f32,
            self.landmark.input_height as f32,
        );
        let landmarks: [Landmark; NUM_LANDMARKS] = std::array::from_fn(|i| {
            project_landmark(
                rect,
                raw.landmarks[3 * i] / w,
                raw.landmarks[3 * i + 1] / h,
                raw.landmarks[3 * i + 2] / w,
            )
        });

        Ok(Some(HandLandmarks {
            handedness,
            score,
            landmarks,
        }))
    }
}

impl HandDetector for OrtHandDetector {
    fn process(&self, frame: &DecodedFrame) -> Result<Detections, ModelError> {
        let palms = self.detect_palms(frame)?;
        tracing::debug!("Found {} palm candidates", palms.len());

        let mut detections = Vec::with_capacity(palms.len());
        for palm in &palms {
            let rect = hand_rect_from_palm(palm, frame.width(), frame.height());
            let Some(hand) = self.detect_landmarks(frame, &rect)? else {
                continue;
            };

            tracing::debug!(
                "Hand {}: handedness={}, score={:.3}, palm={:.3}, wrist=({:.3}, {:.3})",
                detections.len(),
                hand.handedness.label(),
                hand.score,
                palm.score,
                hand.landmarks[0].x,
                hand.landmarks[0].y
            );
            detections.push(hand);
        }

        Ok(detections)
    }
}
