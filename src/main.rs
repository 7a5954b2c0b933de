// SYNOID SR Main Entry Point
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use synoid_sr::accel;
use synoid_sr::config::{parse_fps_setting, SrConfig};
use synoid_sr::pipeline::media_tool::{FfmpegTool, MediaTool};
use synoid_sr::{
    run_pipeline_with, CancelFlag, MediaAsset, MediaKind, ProgressCallback, RunOutcome, RunState,
};

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "synoid-sr")]
#[command(about = "SYNOID Super-Resolution", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale a single image
    Image {
        /// Input image path
        input: PathBuf,

        /// Output path (defaults to <input>_sr.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Upscale every frame of a video
    Video {
        /// Input video path
        input: PathBuf,

        /// Output path (defaults to <input>_sr.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        video: VideoArgs,
    },

    /// Upscale an image or video, chosen by extension
    Upscale {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        video: VideoArgs,
    },

    /// Print the frame rate ffprobe reports for a video
    Probe { input: PathBuf },

    /// Show acceleration devices
    Devices,
}

#[derive(Args, Clone, Default)]
struct ModelArgs {
    /// Safetensors model file
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Upscale factor the model was trained for
    #[arg(long)]
    scale: Option<u32>,

    /// Prefer CUDA/Metal over the CPU path
    #[arg(long)]
    gpu: bool,

    /// Fail instead of falling back to the CPU
    #[arg(long)]
    strict_gpu: bool,

    /// Model expects BGR input/output
    #[arg(long)]
    bgr: bool,
}

#[derive(Args, Clone, Default)]
struct VideoArgs {
    /// Frame rate, or "auto" to probe the input
    #[arg(long)]
    fps: Option<String>,

    /// Missing frames tolerated before encoding fails
    #[arg(long)]
    gap_tolerance: Option<usize>,

    /// Staging directory for extracted frames
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Leave staged frames on disk
    #[arg(long)]
    keep_frames: bool,

    /// Continue an interrupted run of the same input
    #[arg(long)]
    resume: bool,

    /// Drop the input's audio track
    #[arg(long)]
    no_audio: bool,
}

impl ModelArgs {
    fn apply(&self, config: &mut SrConfig) {
        if let Some(path) = &self.model {
            config.model.path = path.clone();
        }
        if let Some(scale) = self.scale {
            config.model.scale = scale;
        }
        if self.gpu || self.strict_gpu {
            config.model.prefer_acceleration = true;
        }
        if self.strict_gpu {
            config.model.strict_acceleration = true;
        }
        if self.bgr {
            config.model.channel_order = synoid_sr::engine::codec::ChannelOrder::Bgr;
        }
    }
}

impl VideoArgs {
    fn apply(&self, config: &mut SrConfig) -> anyhow::Result<()> {
        if let Some(fps) = &self.fps {
            config.pipeline.fps = parse_fps_setting(fps)?;
        }
        if let Some(tolerance) = self.gap_tolerance {
            config.pipeline.gap_tolerance = tolerance;
        }
        if let Some(dir) = &self.work_dir {
            config.pipeline.work_dir = dir.clone();
        }
        config.pipeline.keep_frames |= self.keep_frames;
        config.pipeline.resume |= self.resume;
        if self.no_audio {
            config.pipeline.carry_audio = false;
        }
        Ok(())
    }
}

/// `clip.mp4` -> `clip_sr.mp4` next to the input.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{}_sr.{}", stem, ext.to_string_lossy()),
        None => format!("{}_sr", stem),
    };
    input.with_file_name(name)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    // Global panic handler: log panics instead of crashing silently
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("🚨 [SYNOID-SR PANIC] at {}: {}", location, message);
    }));

    let cli = Cli::parse();
    let mut config = SrConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Image { input, output, model } => {
            model.apply(&mut config);
            let asset = MediaAsset::new(&input, MediaKind::Image);
            run(asset, output, config).await?;
        }
        Commands::Video {
            input,
            output,
            model,
            video,
        } => {
            model.apply(&mut config);
            video.apply(&mut config)?;
            let asset = MediaAsset::new(&input, MediaKind::Video);
            run(asset, output, config).await?;
        }
        Commands::Upscale {
            input,
            output,
            model,
            video,
        } => {
            model.apply(&mut config);
            video.apply(&mut config)?;
            let asset = MediaAsset::from_path(&input)
                .ok_or_else(|| anyhow!("Cannot tell whether {:?} is an image or a video", input))?;
            run(asset, output, config).await?;
        }
        Commands::Probe { input } => {
            let tool = FfmpegTool::new(config.tool.clone());
            let fps = tool.probe_fps(&input).await?;
            println!("{:.3}", fps);
        }
        Commands::Devices => {
            accel::print_device_status();
        }
    }

    Ok(())
}

async fn run(asset: MediaAsset, output: Option<PathBuf>, config: SrConfig) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| default_output(asset.path()));
    info!("🚀 Upscaling {:?} -> {:?}", asset.path(), output);

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, stopping after the current frame...");
            on_signal.cancel();
        }
    });

    let progress: ProgressCallback = Arc::new(|state: &RunState| {
        if let RunState::Processing(i) = state {
            tracing::debug!("frame {}", i);
        }
    });

    match run_pipeline_with(&asset, &output, &config, cancel, Some(progress)).await {
        Ok(RunOutcome::Image(report)) => {
            info!(
                "✅ Image saved: {:?} ({}x{}, {:?})",
                report.output, report.width, report.height, report.inference_time
            );
            Ok(())
        }
        Ok(RunOutcome::Video(report)) => {
            info!(
                "✅ Video saved: {:?} ({} frames at {} fps in {:?})",
                report.output, report.source_frames, report.fps, report.elapsed
            );
            for failure in &report.failures {
                warn!("   frame {} failed: {}", failure.index, failure.reason);
            }
            Ok(())
        }
        Err(failure) => {
            error!("❌ {}", failure);
            Err(failure).context("Upscale failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_name() {
        assert_eq!(
            default_output(Path::new("/v/clip.mp4")),
            PathBuf::from("/v/clip_sr.mp4")
        );
        assert_eq!(default_output(Path::new("photo")), PathBuf::from("photo_sr"));
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "synoid-sr", "video", "in.mp4", "--fps", "auto", "--gap-tolerance", "2", "--gpu",
            "--no-audio",
        ]);
        let mut config = SrConfig::default();
        match cli.command {
            Commands::Video { model, video, .. } => {
                model.apply(&mut config);
                video.apply(&mut config).unwrap();
            }
            _ => panic!("expected the video subcommand"),
        }
        assert_eq!(config.pipeline.fps, None);
        assert_eq!(config.pipeline.gap_tolerance, 2);
        assert!(config.model.prefer_acceleration);
        assert!(!config.pipeline.carry_audio);
    }
}
