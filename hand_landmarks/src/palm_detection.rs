use crate::frame::Letterbox;
use std::collections::VecDeque;

pub const NUM_PALM_KEYPOINTS: usize = 7;
/// Box center, box size, then one `(x, y)` pair per keypoint.
pub const VALUES_PER_ANCHOR: usize = 4 + 2 * NUM_PALM_KEYPOINTS;

/// Feature map strides of the palm model's output layers. Consecutive layers
/// with the same stride share one grid.
const ANCHOR_STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x_center: f32,
    pub y_center: f32,
}

/// A palm found by the detection model, in normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PalmDetection {
    pub score: f32,
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    pub keypoints: [(f32, f32); NUM_PALM_KEYPOINTS],
}

impl PalmDetection {
    fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            self.x_center - self.width / 2.,
            self.y_center - self.height / 2.,
            self.x_center + self.width / 2.,
            self.y_center + self.height / 2.,
        )
    }

    fn iou(&self, other: &Self) -> f32 {
        let (ax0, ay0, ax1, ay1) = self.bounds();
        let (bx0, by0, bx1, by1) = other.bounds();
        let inter_w = (ax1.min(bx1) - ax0.max(bx0)).max(0.);
        let inter_h = (ay1.min(by1) - ay0.max(by0)).max(0.);
        let intersection = inter_w * inter_h;
        let union = self.width * self.height + other.width * other.height - intersection;

        if union > 0. {
            intersection / union
        } else {
            0.
        }
    }

    /// Moves the detection from letterboxed tensor space to frame space.
    pub fn remove_letterbox(&self, letterbox: &Letterbox) -> Self {
        let (x_center, y_center) = letterbox.to_frame(self.x_center, self.y_center);

        Self {
            score: self.score,
            x_center,
            y_center,
            width: self.width / letterbox.content_width,
            height: self.height / letterbox.content_height,
            keypoints: self.keypoints.map(|(x, y)| letterbox.to_frame(x, y)),
        }
    }
}

/// Anchor centers for a square palm model input of `input_size` pixels, in
/// the order the model emits its predictions.
pub fn generate_anchors(input_size: u32) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    let mut layer = 0;

    while layer < ANCHOR_STRIDES.len() {
        let stride = ANCHOR_STRIDES[layer];
        let mut next = layer;
        while next < ANCHOR_STRIDES.len() && ANCHOR_STRIDES[next] == stride {
            next += 1;
        }

        let per_cell = (next - layer) * ANCHORS_PER_LAYER;
        let grid = input_size.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let anchor = Anchor {
                    x_center: (x as f32 + 0.5) / grid as f32,
                    y_center: (y as f32 + 0.5) / grid as f32,
                };
                anchors.extend(std::iter::repeat(anchor).take(per_cell));
            }
        }

        layer = next;
    }

    anchors
}

/// Decodes per-anchor regressions into palm candidates.
///
/// `scores` are probabilities. Box and keypoint offsets are in input pixels
/// relative to their anchor.
pub fn decode_palms(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[Anchor],
    input_size: u32,
    min_score: f32,
) -> Vec<PalmDetection> {
    let size = input_size as f32;

    boxes
        .chunks_exact(VALUES_PER_ANCHOR)
        .zip(scores)
        .zip(anchors)
        .filter(|((_, score), _)| **score >= min_score)
        .map(|((raw, &score), anchor)| PalmDetection {
            score,
            x_center: raw[0] / size + anchor.x_center,
            y_center: raw[1] / size + anchor.y_center,
            width: raw[2] / size,
            height: raw[3] / size,
            keypoints: std::array::from_fn(|k| {
                (
                    raw[4 + 2 * k] / size + anchor.x_center,
                    raw[5 + 2 * k] / size + anchor.y_center,
                )
            }),
        })
        .collect()
}

/// Non-maximum suppression, keeping at most `max_palms` detections in
/// descending score order.
pub fn select_palms(
    mut candidates: Vec<PalmDetection>,
    iou_threshold: f32,
    max_palms: usize,
) -> Vec<PalmDetection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut queue: VecDeque<PalmDetection> = candidates.into();
    let mut keep = Vec::new();

    while let Some(best) = queue.pop_front() {
        if keep.len() == max_palms {
            break;
        }
        queue.retain(|other| best.iou(other) < iou_threshold);
        keep.push(best);
    }

    keep
}
