// SYNOID SR ESPCN Engine
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Sub-pixel convolution super-resolution network run with Candle:
//
//   conv1 -> tanh -> conv2 -> tanh -> conv3 -> pixel_shuffle(r) -> clamp[0,1]
//
// Layer widths and kernel sizes come from the weight shapes in the
// safetensors file, so any ESPCN-style export with `conv{1,2,3}.{weight,bias}`
// loads. The upscale factor r is implied by conv3's 3*r*r output channels.

use crate::engine::session::InferenceEngine;
use crate::engine::{FrameTensor, TensorShape};
use crate::error::{Result, SrError};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const LAYERS: [&str; 3] = ["conv1", "conv2", "conv3"];

pub struct EspcnEngine {
    layers: Vec<Conv2d>,
    scale: usize,
    device: Device,
    digest: String,
}

impl EspcnEngine {
    /// Load weights from a safetensors file onto `device`.
    pub fn load(path: &Path, device: Device) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| model_err(path, e))?;
        let digest = format!("{:x}", Sha256::digest(&bytes));
        let tensors = candle_core::safetensors::load_buffer(&bytes, &device)
            .map_err(|e| model_err(path, e))?;
        Self::from_tensors(tensors, device, digest, path)
    }

    fn from_tensors(
        tensors: HashMap<String, Tensor>,
        device: Device,
        digest: String,
        path: &Path,
    ) -> Result<Self> {
        // (out, in, k) per layer, read from the weight shapes
        let mut dims = Vec::with_capacity(LAYERS.len());
        for layer in LAYERS {
            let key = format!("{}.weight", layer);
            let weight = tensors
                .get(&key)
                .ok_or_else(|| model_err(path, format!("missing tensor {}", key)))?;
            let (out_c, in_c, kh, kw) = weight.dims4().map_err(|e| model_err(path, e))?;
            if kh != kw || kh % 2 == 0 {
                return Err(model_err(
                    path,
                    format!("{} kernel must be square and odd, got {}x{}", layer, kh, kw),
                ));
            }
            dims.push((out_c, in_c, kh));
        }

        if dims[0].1 != 3 {
            return Err(model_err(path, format!("conv1 takes {} channels, expected 3", dims[0].1)));
        }
        let scale = upscale_from_channels(dims[2].0)
            .ok_or_else(|| model_err(path, format!("conv3 has {} outputs, not 3*r*r", dims[2].0)))?;

        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let mut layers = Vec::with_capacity(LAYERS.len());
        for (name, (out_c, in_c, k)) in LAYERS.iter().zip(dims) {
            let cfg = Conv2dConfig {
                padding: k / 2,
                ..Default::default()
            };
            let conv = candle_nn::conv2d(in_c, out_c, k, cfg, vb.pp(*name))
                .map_err(|e| model_err(path, e))?;
            layers.push(conv);
        }

        info!(
            "[ESPCN] Loaded x{} model {:?} (sha256 {})",
            scale,
            path,
            &digest[..12.min(digest.len())]
        );
        Ok(Self {
            layers,
            scale,
            device,
            digest,
        })
    }

    pub fn scale(&self) -> usize {
        self.scale
    }

    fn run(&self, input: &FrameTensor) -> candle_core::Result<(Vec<f32>, usize, usize)> {
        let s = input.shape();
        // HWC -> NCHW
        let mut xs = Tensor::from_slice(
            input.data(),
            (1, s.height, s.width, s.channels),
            &self.device,
        )?
        .permute((0, 3, 1, 2))?
        .contiguous()?;

        let last = self.layers.len() - 1;
        for (i, conv) in self.layers.iter().enumerate() {
            xs = conv.forward(&xs)?;
            if i < last {
                xs = xs.tanh()?;
            }
        }

        let xs = candle_nn::ops::pixel_shuffle(&xs, self.scale)?.clamp(0f32, 1f32)?;
        let (_, _, h, w) = xs.dims4()?;
        // NCHW -> HWC
        let data = xs
            .permute((0, 2, 3, 1))?
            .contiguous()?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok((data, h, w))
    }
}

impl InferenceEngine for EspcnEngine {
    fn name(&self) -> String {
        format!("espcn-x{}:{}", self.scale, self.digest)
    }

    fn forward(&mut self, input: &FrameTensor) -> Result<FrameTensor> {
        if self.layers.is_empty() {
            return Err(SrError::SessionClosed);
        }
        let (data, h, w) = self
            .run(input)
            .map_err(|e| SrError::InferenceFault(e.to_string()))?;
        FrameTensor::new(TensorShape::rgb(w, h), data)
    }

    fn release(&mut self) {
        // Weights go now so device memory is returned before the session
        // value itself is dropped.
        self.layers.clear();
    }
}

fn upscale_from_channels(channels: usize) -> Option<usize> {
    if channels == 0 || channels % 3 != 0 {
        return None;
    }
    let sq = channels / 3;
    let r = (sq as f64).sqrt().round() as usize;
    (r >= 1 && r * r == sq).then_some(r)
}

fn model_err(path: &Path, reason: impl std::fmt::Display) -> SrError {
    SrError::ModelLoad {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}
