// SYNOID SR Single-Image Controller
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// One bitmap in, one upscaled bitmap out. No staging and no partial
// success: any failure fails the whole call.

use crate::config::SrConfig;
use crate::engine::codec::{decode_bitmap, TensorCodec};
use crate::engine::session::InferenceSession;
use crate::error::{Result, SrError};
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ImageReport {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub inference_time: Duration,
}

/// decode -> infer -> encode for one in-memory bitmap.
pub fn upscale_bitmap(
    session: &mut InferenceSession,
    codec: &TensorCodec,
    bitmap: &DynamicImage,
) -> Result<(RgbaImage, Duration)> {
    let tensor = codec.decode_for_inference(bitmap)?;
    let inference = session.infer(&tensor)?;
    let upscaled = codec.encode_from_inference(&inference.tensor)?;
    Ok((upscaled, inference.elapsed))
}

/// Upscale `input` into `output` with an already-open session.
/// The output format follows the output extension.
pub fn upscale_image(
    session: &mut InferenceSession,
    codec: &TensorCodec,
    input: &Path,
    output: &Path,
) -> Result<ImageReport> {
    let bytes = std::fs::read(input).map_err(|e| SrError::storage(input, e))?;
    let bitmap = decode_bitmap(&bytes)?;
    info!(
        "[IMAGE] 🖼️ {:?}: {}x{}",
        input,
        bitmap.width(),
        bitmap.height()
    );

    let (upscaled, inference_time) = upscale_bitmap(session, codec, &bitmap)?;
    let (width, height) = upscaled.dimensions();
    save_bitmap(upscaled, output)?;

    info!(
        "[IMAGE] ✅ Wrote {:?} ({}x{}, inference {:?})",
        output, width, height, inference_time
    );
    Ok(ImageReport {
        output: output.to_path_buf(),
        width,
        height,
        inference_time,
    })
}

/// Open a session from `config`, upscale one file, and close the session
/// whatever the outcome.
pub fn upscale_image_file(input: &Path, output: &Path, config: &SrConfig) -> Result<ImageReport> {
    let mut session = InferenceSession::open(&config.model)?;
    let result = upscale_image(&mut session, &config.model.codec(), input, output);
    session.close();
    result
}

fn save_bitmap(bitmap: RgbaImage, output: &Path) -> Result<()> {
    let ext = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    // These encoders have no alpha channel.
    if matches!(ext.as_str(), "jpg" | "jpeg" | "bmp") {
        DynamicImage::ImageRgba8(bitmap).to_rgb8().save(output)?;
    } else {
        bitmap.save(output)?;
    }
    Ok(())
}
