use crate::{landmarks::Landmark, palm_detection::PalmDetection};
use std::f32::consts::PI;

/// Palm keypoint at the center of the wrist.
const WRIST_KEYPOINT: usize = 0;
/// Palm keypoint at the base of the middle finger.
const MIDDLE_FINGER_KEYPOINT: usize = 2;
/// Growth of the palm box into the hand region.
const HAND_SCALE: f32 = 2.6;
/// Shift towards the fingers, as a fraction of the palm box height.
const HAND_SHIFT_Y: f32 = -0.5;

/// A rectangle in frame-normalized coordinates, rotated clockwise by
/// `rotation` radians around its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

fn normalize_radians(angle: f32) -> f32 {
    angle - 2. * PI * ((angle + PI) / (2. * PI)).floor()
}

/// Builds the region the landmark model looks at from a palm detection.
///
/// The region is turned so the wrist-to-middle-finger axis points up, then
/// shifted towards the fingers, squared on its long side and enlarged so the
/// whole hand fits.
pub fn hand_rect_from_palm(
    palm: &PalmDetection,
    frame_width: u32,
    frame_height: u32,
) -> RotatedRect {
    let (w, h) = (frame_width as f32, frame_height as f32);
    let (x0, y0) = palm.keypoints[WRIST_KEYPOINT];
    let (x1, y1) = palm.keypoints[MIDDLE_FINGER_KEYPOINT];
    let rotation = normalize_radians(PI / 2. - (-(y1 - y0) * h).atan2((x1 - x0) * w));

    let (sin, cos) = rotation.sin_cos();
    let x_center = palm.x_center - h * palm.height * HAND_SHIFT_Y * sin / w;
    let y_center = palm.y_center + palm.height * HAND_SHIFT_Y * cos;

    let long_side = (palm.width * w).max(palm.height * h);

    RotatedRect {
        x_center,
        y_center,
        width: long_side / w * HAND_SCALE,
        height: long_side / h * HAND_SCALE,
        rotation,
    }
}

/// Maps a landmark from crop-normalized coordinates back into the frame.
///
/// `z` is scaled with the region width so it keeps the unit of `x`.
pub fn project_landmark(rect: &RotatedRect, x: f32, y: f32, z: f32) -> Landmark {
    let (x, y) = (x - 0.5, y - 0.5);
    let (sin, cos) = rect.rotation.sin_cos();

    Landmark {
        x: (cos * x - sin * y) * rect.width + rect.x_center,
        y: (sin * x + cos * y) * rect.height + rect.y_center,
        z: z * rect.width,
    }
}
