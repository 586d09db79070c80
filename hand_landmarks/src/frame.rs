use crate::roi::RotatedRect;
use image::{
    error::ImageError, imageops, imageops::FilterType, ImageReader, Limits, RgbImage,
};
use ndarray::{Array, Ix4};
use serde::Deserialize;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Image payload is empty")]
    Empty,
    #[error("Image payload is too large: {size} bytes (max: {limit} bytes)")]
    TooLarge { size: usize, limit: usize },
    #[error("Decoded image exceeds limits: {0}")]
    ExceedsLimits(String),
    #[error("Unrecognized image format")]
    UnrecognizedFormat,
    #[error("Error decoding image: {0}")]
    Decode(String),
}

/// Channel order a model expects in its input tensor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// Bounds checked before and during decoding.
///
/// `max_bytes` caps the compressed upload. The remaining fields are handed to
/// the decoder, which refuses to allocate pixel buffers beyond them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_bytes: usize,
    pub max_width: u32,
    pub max_height: u32,
    pub max_alloc: u64,
}

impl DecodeLimits {
    fn decoder_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Where the frame landed inside a square letterboxed tensor, in fractions
/// of the tensor side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub content_width: f32,
    pub content_height: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Maps a point from letterboxed tensor space back to the frame.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x) / self.content_width,
            (y - self.pad_y) / self.content_height,
        )
    }
}

/// A decoded image, always 3-channel RGB with 8 bits per channel.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pixels: RgbImage,
}

/// Decodes raw upload bytes into an RGB frame.
///
/// The format is guessed from the leading magic bytes; any declared content
/// type is ignored. Grey, alpha and 16-bit images are normalized to RGB8.
pub fn decode_frame(bytes: &[u8], limits: &DecodeLimits) -> Result<DecodedFrame, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }

    if bytes.len() > limits.max_bytes {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            limit: limits.max_bytes,
        });
    }

    let mut image_reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| FrameError::Decode(e.to_string()))?;

    if image_reader.format().is_none() {
        return Err(FrameError::UnrecognizedFormat);
    }

    image_reader.limits(limits.decoder_limits());

    let image = image_reader.decode().map_err(|e| match e {
        ImageError::Limits(e) => FrameError::ExceedsLimits(e.to_string()),
        e => FrameError::Decode(e.to_string()),
    })?;

    Ok(DecodedFrame::from_rgb(image.into_rgb8()))
}

fn empty_tensor(width: u32, height: u32, layout: TensorLayout) -> Array<f32, Ix4> {
    let (w, h) = (width as usize, height as usize);
    match layout {
        TensorLayout::Nhwc => Array::zeros((1, h, w, 3)),
        TensorLayout::Nchw => Array::zeros((1, 3, h, w)),
    }
}

/// Writes one RGB pixel, given in `[0, 255]`, scaled to `[0, 1]`.
fn put_pixel(
    input: &mut Array<f32, Ix4>,
    x: u32,
    y: u32,
    rgb: [f32; 3],
    order: ChannelOrder,
    layout: TensorLayout,
) {
    let (x, y) = (x as usize, y as usize);
    let [r, g, b] = rgb;
    let channels = match order {
        ChannelOrder::Rgb => [r, g, b],
        ChannelOrder::Bgr => [b, g, r],
    };

    for (c, value) in channels.into_iter().enumerate() {
        let value = value / 255.;
        match layout {
            TensorLayout::Nhwc => input[[0, y, x, c]] = value,
            TensorLayout::Nchw => input[[0, c, y, x]] = value,
        }
    }
}

impl DecodedFrame {
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Fits the frame into a `side` x `side` tensor keeping its aspect
    /// ratio. The unused band is left black.
    pub fn letterbox_tensor(
        &self,
        side: u32,
        order: ChannelOrder,
        layout: TensorLayout,
    ) -> (Array<f32, Ix4>, Letterbox) {
        let (w, h) = (self.width() as f32, self.height() as f32);
        let scale = side as f32 / w.max(h);
        let new_w = ((w * scale).round() as u32).clamp(1, side);
        let new_h = ((h * scale).round() as u32).clamp(1, side);
        let pad_x = (side - new_w) / 2;
        let pad_y = (side - new_h) / 2;

        let resized = imageops::resize(&self.pixels, new_w, new_h, FilterType::CatmullRom);
        let mut input = empty_tensor(side, side, layout);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let rgb = pixel.0.map(f32::from);
            put_pixel(&mut input, x + pad_x, y + pad_y, rgb, order, layout);
        }

        let side = side as f32;
        let letterbox = Letterbox {
            content_width: new_w as f32 / side,
            content_height: new_h as f32 / side,
            pad_x: pad_x as f32 / side,
            pad_y: pad_y as f32 / side,
        };

        (input, letterbox)
    }

    /// Samples the rotated region `rect` into a `width` x `height` tensor.
    ///
    /// Output pixel `(u, v)` reads the frame at the matching point of the
    /// rectangle after rotating it by `rect.rotation` around its center.
    /// Reads past the frame edge repeat the border pixel.
    pub fn crop_tensor(
        &self,
        rect: &RotatedRect,
        width: u32,
        height: u32,
        order: ChannelOrder,
        layout: TensorLayout,
    ) -> Array<f32, Ix4> {
        let (frame_w, frame_h) = (self.width() as f32, self.height() as f32);
        let center_x = rect.x_center * frame_w;
        let center_y = rect.y_center * frame_h;
        let rect_w = rect.width * frame_w;
        let rect_h = rect.height * frame_h;
        let (sin, cos) = rect.rotation.sin_cos();

        let mut input = empty_tensor(width, height, layout);
        for v in 0..height {
            for u in 0..width {
                let local_x = ((u as f32 + 0.5) / width as f32 - 0.5) * rect_w;
                let local_y = ((v as f32 + 0.5) / height as f32 - 0.5) * rect_h;
                let src_x = center_x + local_x * cos - local_y * sin;
                let src_y = center_y + local_x * sin + local_y * cos;

                let rgb = self.sample_bilinear(src_x, src_y);
                put_pixel(&mut input, u, v, rgb, order, layout);
            }
        }

        input
    }

    /// Bilinear read at a continuous position; pixel `i` covers `[i, i + 1)`.
    fn sample_bilinear(&self, x: f32, y: f32) -> [f32; 3] {
        let max_x = self.width().saturating_sub(1) as i64;
        let max_y = self.height().saturating_sub(1) as i64;
        let (fx, fy) = (x - 0.5, y - 0.5);
        let (x0, y0) = (fx.floor(), fy.floor());
        let (tx, ty) = (fx - x0, fy - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let mut rgb = [0.; 3];
        for (dx, dy, weight) in [
            (0, 0, (1. - tx) * (1. - ty)),
            (1, 0, tx * (1. - ty)),
            (0, 1, (1. - tx) * ty),
            (1, 1, tx * ty),
        ] {
            if weight == 0. {
                continue;
            }
            let px = (x0 + dx).clamp(0, max_x) as u32;
            let py = (y0 + dy).clamp(0, max_y) as u32;
            let pixel = self.pixels.get_pixel(px, py).0;
            for (acc, value) in rgb.iter_mut().zip(pixel) {
                *acc += weight * f32::from(value);
            }
        }

        rgb
    }
}
