// SYNOID SR Tensor Codec
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Bitmap -> normalized input tensor, and engine output tensor -> bitmap.

use crate::engine::{FrameTensor, TensorShape};
use crate::error::{Result, SrError};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageOutputFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Spatial shape the model expects its input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputShape {
    /// Feed each bitmap at its own resolution.
    #[default]
    Native,
    /// Resize every bitmap to a fixed resolution first.
    Fixed { width: u32, height: u32 },
}

/// Order of the three channel values per pixel in the model's tensors.
///
/// A wrong order still yields a structurally valid image, just color-shifted,
/// so it has to be checked against the model's actual output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Converts between bitmaps and the fixed-layout tensors of one model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TensorCodec {
    input: InputShape,
    order: ChannelOrder,
}

impl TensorCodec {
    pub fn new(input: InputShape, order: ChannelOrder) -> Self {
        Self { input, order }
    }

    pub fn input(&self) -> InputShape {
        self.input
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    /// Tensor shape that a `width` x `height` bitmap decodes to.
    pub fn input_shape_for(&self, width: u32, height: u32) -> TensorShape {
        match self.input {
            InputShape::Native => TensorShape::rgb(width as usize, height as usize),
            InputShape::Fixed { width, height } => {
                TensorShape::rgb(width as usize, height as usize)
            }
        }
    }

    /// Resize (nearest-neighbor) to the model's input shape and normalize
    /// every channel to [0, 1].
    pub fn decode_for_inference(&self, bitmap: &DynamicImage) -> Result<FrameTensor> {
        let (width, height) = bitmap.dimensions();
        if width == 0 || height == 0 {
            return Err(SrError::InvalidDimensions {
                width: width as usize,
                height: height as usize,
            });
        }

        let shape = self.input_shape_for(width, height);
        let mut rgb = bitmap.to_rgb8();
        if (shape.width, shape.height) != (width as usize, height as usize) {
            debug!(
                "[CODEC] Resizing {}x{} -> {}x{} (nearest)",
                width, height, shape.width, shape.height
            );
            rgb = imageops::resize(
                &rgb,
                shape.width as u32,
                shape.height as u32,
                FilterType::Nearest,
            );
        }

        let mut data = Vec::with_capacity(shape.len());
        for px in rgb.pixels() {
            let [r, g, b] = px.0;
            let ordered = match self.order {
                ChannelOrder::Rgb => [r, g, b],
                ChannelOrder::Bgr => [b, g, r],
            };
            data.extend(ordered.iter().map(|&v| v as f32 / 255.0));
        }

        FrameTensor::new(shape, data)
    }

    /// Scale each channel back to [0, 255], truncating into 8 bits, and set
    /// full opacity.
    pub fn encode_from_inference(&self, tensor: &FrameTensor) -> Result<RgbaImage> {
        let shape = tensor.shape();
        if shape.channels != 3 {
            return Err(SrError::ShapeMismatch {
                expected: "3 channels".to_string(),
                actual: format!("{} channels", shape.channels),
            });
        }
        let (width, height) = match (u32::try_from(shape.width), u32::try_from(shape.height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(SrError::InvalidDimensions {
                    width: shape.width,
                    height: shape.height,
                })
            }
        };

        let mut buf = Vec::with_capacity(shape.width * shape.height * 4);
        for px in tensor.data().chunks_exact(3) {
            let (r, g, b) = match self.order {
                ChannelOrder::Rgb => (px[0], px[1], px[2]),
                ChannelOrder::Bgr => (px[2], px[1], px[0]),
            };
            buf.extend_from_slice(&[to_u8(r), to_u8(g), to_u8(b), 0xFF]);
        }

        RgbaImage::from_raw(width, height, buf).ok_or(SrError::InvalidDimensions {
            width: shape.width,
            height: shape.height,
        })
    }
}

// `as` saturates float -> int casts (NaN -> 0), which is the truncation we want.
fn to_u8(v: f32) -> u8 {
    (v * 255.0) as u8
}

/// Decode stored frame bytes (any format `image` can sniff).
pub fn decode_bitmap(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Encode a bitmap as PNG bytes for the Frame Store.
pub fn encode_png(bitmap: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(bitmap.clone()).write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}
