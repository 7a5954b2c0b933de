// SYNOID SR Library Root
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Frame-based super-resolution: upscale a still image, or split a video
// into frames, upscale each one, and re-encode at the original rate.

pub mod accel;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;

pub use config::SrConfig;
pub use engine::session::InferenceSession;
pub use error::{RunFailure, SrError, Stage};
pub use pipeline::image::ImageReport;
pub use pipeline::video::{ProgressCallback, RunReport, RunState, VideoPipeline};
pub use pipeline::{CancelFlag, MediaAsset, MediaKind};

use pipeline::media_tool::FfmpegTool;
use std::path::Path;

/// What a finished run produced.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Image(ImageReport),
    Video(RunReport),
}

/// Upscale `asset` into `output` with the settings in `config`.
pub async fn run_pipeline(
    asset: &MediaAsset,
    output: &Path,
    config: &SrConfig,
) -> Result<RunOutcome, RunFailure> {
    run_pipeline_with(asset, output, config, CancelFlag::new(), None).await
}

/// [`run_pipeline`] with a caller-held cancellation flag and an optional
/// progress observer. The session is opened here and is always closed
/// before this returns. Model loading and inference run on blocking
/// workers, never on the async executor.
pub async fn run_pipeline_with(
    asset: &MediaAsset,
    output: &Path,
    config: &SrConfig,
    cancel: CancelFlag,
    progress: Option<ProgressCallback>,
) -> Result<RunOutcome, RunFailure> {
    config.validate().map_err(RunFailure::at(Stage::Setup))?;
    let model = config.model.clone();
    let mut session = tokio::task::spawn_blocking(move || InferenceSession::open(&model))
        .await
        .map_err(|e| worker_died(Stage::Setup, "model loader", e))?
        .map_err(RunFailure::at(Stage::Setup))?;

    match asset.kind() {
        MediaKind::Image => {
            if cancel.is_cancelled() {
                session.close();
                return Err(RunFailure::new(Stage::Setup, SrError::Cancelled));
            }
            let codec = config.model.codec();
            let input = asset.path().to_path_buf();
            let target = output.to_path_buf();
            let result = tokio::task::spawn_blocking(move || {
                let result = pipeline::image::upscale_image(&mut session, &codec, &input, &target);
                session.close();
                result
            })
            .await
            .map_err(|e| worker_died(Stage::Processing, "image worker", e))?;
            result
                .map(RunOutcome::Image)
                .map_err(RunFailure::at(Stage::Processing))
        }
        MediaKind::Video => {
            let tool = FfmpegTool::new(config.tool.clone());
            let mut pipeline =
                VideoPipeline::new(config.pipeline.clone(), config.model.codec(), tool)
                    .with_cancel(cancel);
            if let Some(progress) = progress {
                pipeline = pipeline.with_progress(progress);
            }
            pipeline
                .run(asset.path(), output, session)
                .await
                .map(RunOutcome::Video)
        }
    }
}

fn worker_died(stage: Stage, what: &str, cause: tokio::task::JoinError) -> RunFailure {
    RunFailure::new(stage, SrError::Worker(format!("{} died: {}", what, cause)))
}
