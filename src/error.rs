// SYNOID SR Error Taxonomy
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Typed errors for the super-resolution core. The binary wraps these in
// `anyhow::Result`; library code returns them directly.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::frame_store::FrameRole;

/// Every failure the super-resolution core can report.
#[derive(Debug, Error)]
pub enum SrError {
    // ── Frame Store ──────────────────────────────────────────────────────
    #[error("Storage fault at {path:?}: {source}")]
    StorageFault {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt frame sequence: {0}")]
    CorruptSequence(String),

    #[error("No frames found in {0:?}")]
    EmptySequence(PathBuf),

    #[error("Missing {role} frame {index}")]
    MissingFrame { role: FrameRole, index: usize },

    // ── Tensor Codec ─────────────────────────────────────────────────────
    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Bitmap error: {0}")]
    Bitmap(#[from] image::ImageError),

    // ── Inference Session ────────────────────────────────────────────────
    #[error("Failed to load model {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("Model shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Hardware acceleration unavailable: {0}")]
    AccelerationUnavailable(String),

    #[error("Inference fault: {0}")]
    InferenceFault(String),

    #[error("Inference session is closed")]
    SessionClosed,

    // ── Decode/Encode collaborator ───────────────────────────────────────
    #[error("Frame extraction failed: {0}")]
    ExtractionFault(String),

    #[error("Frame extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),

    #[error("Encoding failed: {0}")]
    EncodingFault(String),

    #[error("Encoding timed out after {0:?}")]
    EncodingTimeout(Duration),

    #[error("Result sequence has {} missing frame(s) {:?} (tolerance {tolerance})", missing.len(), missing)]
    FrameGap { missing: Vec<usize>, tolerance: usize },

    // ── Run control ──────────────────────────────────────────────────────
    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl SrError {
    /// Wrap an I/O error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageFault {
            path: path.into(),
            source,
        }
    }

    /// Whether a video run may record this error against one frame and move on.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::InferenceFault(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SrError>;

/// Stage of a run that a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Extracting,
    Processing,
    Encoding,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Extracting => "extracting",
            Stage::Processing => "processing",
            Stage::Encoding => "encoding",
        };
        f.write_str(name)
    }
}

/// A failed run: which stage broke and why.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {cause}")]
pub struct RunFailure {
    pub stage: Stage,
    #[source]
    pub cause: SrError,
}

impl RunFailure {
    pub fn new(stage: Stage, cause: SrError) -> Self {
        Self { stage, cause }
    }

    /// Returns a closure that tags an error with `stage`, for `map_err`.
    pub fn at(stage: Stage) -> impl Fn(SrError) -> RunFailure {
        move |cause| RunFailure::new(stage, cause)
    }
}
