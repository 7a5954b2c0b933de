// SYNOID SR Configuration
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Explicit configuration objects for the session, the video pipeline, and
// the ffmpeg collaborator. Loaded from JSON, then environment, then CLI.

use crate::engine::codec::{ChannelOrder, InputShape, TensorCodec};
use crate::error::{Result, SrError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Base directory for models and staging, e.g. `~/.cache/synoid`.
pub fn base_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synoid")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SrConfig {
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub tool: ToolConfig,
}

/// Everything `InferenceSession::open` needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Safetensors weight file.
    pub path: PathBuf,
    /// Upscale factor the model was trained for.
    pub scale: u32,
    pub input: InputShape,
    /// Try CUDA/Metal before the CPU path.
    pub prefer_acceleration: bool,
    /// Fail instead of falling back when acceleration is unavailable.
    pub strict_acceleration: bool,
    pub channel_order: ChannelOrder,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: base_dir().join("models").join("espcn_x4.safetensors"),
            scale: 4,
            input: InputShape::Native,
            prefer_acceleration: false,
            strict_acceleration: false,
            channel_order: ChannelOrder::Rgb,
        }
    }
}

impl ModelConfig {
    pub fn codec(&self) -> TensorCodec {
        TensorCodec::new(self.input, self.channel_order)
    }
}

/// Video run behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Staging root holding the source/result frame directories.
    pub work_dir: PathBuf,
    /// Extraction and encoding frame rate. `None` probes the input.
    pub fps: Option<f64>,
    /// How many result frames may be missing before encoding fails.
    pub gap_tolerance: usize,
    /// Leave staged frames on disk after a successful run.
    pub keep_frames: bool,
    /// Reuse frames from an interrupted run of the same input.
    pub resume: bool,
    /// Copy the input's audio track into the output.
    pub carry_audio: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: base_dir().join("sr_staging"),
            fps: Some(15.0),
            gap_tolerance: 0,
            keep_frames: false,
            resume: false,
            carry_audio: true,
        }
    }
}

/// The external decode/encode utility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub extract_timeout_secs: u64,
    pub encode_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub encoder: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            extract_timeout_secs: 600,
            encode_timeout_secs: 600,
            probe_timeout_secs: 30,
            encoder: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 18,
        }
    }
}

impl ToolConfig {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl SrConfig {
    /// Read `path` (if any), apply `SYNOID_SR_*` environment overrides, and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let json = std::fs::read_to_string(p).map_err(|e| SrError::storage(p, e))?;
                let config: SrConfig = serde_json::from_str(&json)
                    .map_err(|e| SrError::Config(format!("{:?}: {}", p, e)))?;
                info!("[CONFIG] Loaded {:?}", p);
                config
            }
            None => SrConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("SYNOID_SR_MODEL") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("SYNOID_SR_WORKDIR") {
            self.pipeline.work_dir = PathBuf::from(dir);
        }
        if let Some(accel) = lookup("SYNOID_SR_ACCEL") {
            self.model.prefer_acceleration = matches!(
                accel.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "gpu"
            );
        }
        if let Some(fps) = lookup("SYNOID_SR_FPS") {
            self.pipeline.fps = parse_fps_setting(&fps)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.scale == 0 {
            return Err(SrError::Config("model.scale must be at least 1".into()));
        }
        if let InputShape::Fixed { width, height } = self.model.input {
            if width == 0 || height == 0 {
                return Err(SrError::Config(format!(
                    "model.input must be non-zero, got {}x{}",
                    width, height
                )));
            }
        }
        if let Some(fps) = self.pipeline.fps {
            if !(fps.is_finite() && fps > 0.0) {
                return Err(SrError::Config(format!("pipeline.fps must be positive, got {}", fps)));
            }
        }
        let t = &self.tool;
        if t.extract_timeout_secs == 0 || t.encode_timeout_secs == 0 || t.probe_timeout_secs == 0 {
            return Err(SrError::Config("tool timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// `"auto"` means probe the input; anything else must be a frame rate.
pub fn parse_fps_setting(value: &str) -> Result<Option<f64>> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    v.parse::<f64>()
        .map(Some)
        .map_err(|_| SrError::Config(format!("invalid fps '{}'", value)))
}
