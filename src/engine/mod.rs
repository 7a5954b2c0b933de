// SYNOID SR Engine Module
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Tensor types, bitmap <-> tensor conversion, and the inference session.

pub mod codec;
pub mod espcn;
pub mod session;

use crate::error::{Result, SrError};
use std::fmt;

/// Shape of an interleaved (height, width, channels) tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    /// RGB shape for a `width` x `height` image.
    pub fn rgb(width: usize, height: usize) -> Self {
        Self {
            height,
            width,
            channels: 3,
        }
    }

    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// This shape with width and height multiplied by `factor`.
    pub fn scaled(&self, factor: usize) -> Self {
        Self {
            height: self.height * factor,
            width: self.width * factor,
            channels: self.channels,
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// A single frame as the inference engine sees it: row-major f32 values,
/// channels interleaved per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl FrameTensor {
    /// Build a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: TensorShape, data: Vec<f32>) -> Result<Self> {
        if shape.width == 0 || shape.height == 0 || shape.channels == 0 {
            return Err(SrError::InvalidDimensions {
                width: shape.width,
                height: shape.height,
            });
        }
        if data.len() != shape.len() {
            return Err(SrError::ShapeMismatch {
                expected: format!("{} values ({})", shape.len(), shape),
                actual: format!("{} values", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    /// All-zero tensor of the given shape.
    pub fn zeros(shape: TensorShape) -> Result<Self> {
        Self::new(shape, vec![0.0; shape.len()])
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Channel values of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let c = self.shape.channels;
        let start = (y * self.shape.width + x) * c;
        &self.data[start..start + c]
    }
}
