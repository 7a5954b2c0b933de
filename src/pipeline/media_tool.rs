// SYNOID SR Media Tool
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// The decode/encode collaborator: splits a video into numbered PNG frames
// and muxes numbered frames back into a video. The production backend
// shells out to ffmpeg/ffprobe; every invocation runs under a timeout and
// the child is killed if the timeout fires.

use crate::config::ToolConfig;
use crate::error::{Result, SrError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Split `input` into frames named by `frame_pattern` (a `%04d` pattern),
/// numbered from 0, sampled at `fps`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub input: PathBuf,
    pub frame_pattern: PathBuf,
    pub fps: f64,
}

/// Mux frames named by `frame_pattern`, numbered from 0, into `output` at
/// `fps`. With `audio_source`, that file's audio track (if any) is copied in.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub frame_pattern: PathBuf,
    pub output: PathBuf,
    pub fps: f64,
    pub audio_source: Option<PathBuf>,
}

/// Textual output of a successful invocation. Kept for logging only.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub log: String,
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Frame rate of the first video stream in `input`.
    async fn probe_fps(&self, input: &Path) -> Result<f64>;

    async fn extract(&self, request: &ExtractRequest) -> Result<ToolOutput>;

    async fn encode(&self, request: &EncodeRequest) -> Result<ToolOutput>;
}

/// ffmpeg/ffprobe subprocess backend.
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    config: ToolConfig,
}

impl FfmpegTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn extract_args(&self, req: &ExtractRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            safe_arg_path(&req.input),
            "-vf".into(),
            format!("fps={}", req.fps).into(),
            "-start_number".into(),
            "0".into(),
        ];
        args.push(safe_arg_path(&req.frame_pattern));
        args
    }

    pub fn encode_args(&self, req: &EncodeRequest) -> Vec<OsString> {
        let fps = req.fps.to_string();
        let mut args: Vec<OsString> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-framerate".into(),
            fps.clone().into(),
            "-start_number".into(),
            "0".into(),
            "-i".into(),
            safe_arg_path(&req.frame_pattern),
        ];

        if let Some(audio) = &req.audio_source {
            // `1:a?` keeps inputs without an audio track working.
            args.extend([
                OsString::from("-i"),
                safe_arg_path(audio),
                "-map".into(),
                "0:v:0".into(),
                "-map".into(),
                "1:a?".into(),
                "-c:a".into(),
                "copy".into(),
                "-shortest".into(),
            ]);
        }

        args.extend([
            OsString::from("-vf"),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
            "-c:v".into(),
            self.config.encoder.clone().into(),
            "-preset".into(),
            self.config.preset.clone().into(),
            "-crf".into(),
            self.config.crf.to_string().into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-r".into(),
            fps.into(),
        ]);
        args.push(safe_arg_path(&req.output));
        args
    }

    pub fn probe_args(input: &Path) -> Vec<OsString> {
        vec![
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            "v:0".into(),
            "-show_entries".into(),
            "stream=r_frame_rate".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            safe_arg_path(input),
        ]
    }
}

/// How a subprocess invocation went wrong.
enum Invocation {
    Failed(String),
    TimedOut(Duration),
}

async fn invoke(program: &str, args: &[OsString], limit: Duration) -> std::result::Result<Output, Invocation> {
    debug!("[FFMPEG] {} {:?}", program, args);
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true) // a timed-out child dies with the dropped future
        .output();

    let output = tokio::time::timeout(limit, child)
        .await
        .map_err(|_| Invocation::TimedOut(limit))?
        .map_err(|e| Invocation::Failed(format!("could not run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Invocation::Failed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            tail(&stderr, 6)
        )));
    }
    Ok(output)
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn probe_fps(&self, input: &Path) -> Result<f64> {
        let output = invoke(
            &self.config.ffprobe,
            &Self::probe_args(input),
            self.config.probe_timeout(),
        )
        .await
        .map_err(|e| match e {
            Invocation::Failed(msg) => SrError::ExtractionFault(format!("fps probe: {}", msg)),
            Invocation::TimedOut(d) => SrError::ExtractionTimeout(d),
        })?;

        let text = String::from_utf8_lossy(&output.stdout);
        let fps = text
            .lines()
            .find_map(parse_frame_rate)
            .ok_or_else(|| {
                SrError::ExtractionFault(format!(
                    "could not read a frame rate for {:?} from {:?}",
                    input,
                    text.trim()
                ))
            })?;
        info!("[FFMPEG] Probed {:?}: {} fps", input, fps);
        Ok(fps)
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<ToolOutput> {
        info!(
            "[FFMPEG] 🎞️ Extracting {:?} at {} fps",
            request.input, request.fps
        );
        let output = invoke(
            &self.config.ffmpeg,
            &self.extract_args(request),
            self.config.extract_timeout(),
        )
        .await
        .map_err(|e| match e {
            Invocation::Failed(msg) => SrError::ExtractionFault(msg),
            Invocation::TimedOut(d) => SrError::ExtractionTimeout(d),
        })?;
        Ok(ToolOutput {
            log: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<ToolOutput> {
        info!(
            "[FFMPEG] 🎬 Encoding {:?} at {} fps",
            request.output, request.fps
        );
        let output = invoke(
            &self.config.ffmpeg,
            &self.encode_args(request),
            self.config.encode_timeout(),
        )
        .await
        .map_err(|e| match e {
            Invocation::Failed(msg) => SrError::EncodingFault(msg),
            Invocation::TimedOut(d) => SrError::EncodingTimeout(d),
        })?;
        Ok(ToolOutput {
            log: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Parse `num/den` (ffprobe's r_frame_rate) or a plain decimal.
/// Zero, negative and non-finite rates are rejected.
pub fn parse_frame_rate(text: &str) -> Option<f64> {
    let text = text.trim();
    let fps = match text.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => text.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Paths that start with `-` would be read as options.
fn safe_arg_path(path: &Path) -> OsString {
    if path.to_string_lossy().starts_with('-') {
        Path::new(".").join(path).into_os_string()
    } else {
        path.as_os_str().to_owned()
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> FfmpegTool {
        FfmpegTool::new(ToolConfig::default())
    }

    fn position(args: &[OsString], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("15/1"), Some(15.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("N/A"), None);
        assert_eq!(parse_frame_rate("-5"), None);
        assert_eq!(parse_frame_rate(""), None);
    }

    #[test]
    fn test_extract_args_carry_fps_and_pattern() {
        let req = ExtractRequest {
            input: PathBuf::from("in.mp4"),
            frame_pattern: PathBuf::from("/s/frames/frame_%04d.png"),
            fps: 15.0,
        };
        let args = tool().extract_args(&req);
        assert_eq!(args[position(&args, "-vf") + 1], "fps=15");
        assert_eq!(args[position(&args, "-start_number") + 1], "0");
        assert_eq!(args.last().unwrap(), "/s/frames/frame_%04d.png");
    }

    #[test]
    fn test_encode_args_without_audio() {
        let req = EncodeRequest {
            frame_pattern: PathBuf::from("/s/sr_frames/srframe_%04d.png"),
            output: PathBuf::from("out.mp4"),
            fps: 23.976,
            audio_source: None,
        };
        let args = tool().encode_args(&req);
        assert_eq!(args[position(&args, "-framerate") + 1], "23.976");
        assert_eq!(args[position(&args, "-r") + 1], "23.976");
        assert_eq!(args[position(&args, "-c:v") + 1], "libx264");
        assert!(!args.iter().any(|a| a == "1:a?"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_encode_args_map_optional_audio() {
        let req = EncodeRequest {
            frame_pattern: PathBuf::from("p_%04d.png"),
            output: PathBuf::from("out.mp4"),
            fps: 15.0,
            audio_source: Some(PathBuf::from("in.mp4")),
        };
        let args = tool().encode_args(&req);
        assert_eq!(args[position(&args, "-c:a") + 1], "copy");
        assert!(args.iter().any(|a| a == "1:a?"));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
    }

    #[test]
    fn test_dash_paths_are_not_read_as_options() {
        assert_eq!(safe_arg_path(Path::new("-rf.mp4")), OsString::from("./-rf.mp4"));
        assert_eq!(safe_arg_path(Path::new("clip.mp4")), OsString::from("clip.mp4"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_extraction_fault() {
        let mut config = ToolConfig::default();
        config.ffmpeg = "__synoid_no_such_ffmpeg".to_string();
        let req = ExtractRequest {
            input: PathBuf::from("in.mp4"),
            frame_pattern: PathBuf::from("frame_%04d.png"),
            fps: 15.0,
        };
        let err = FfmpegTool::new(config).extract(&req).await.unwrap_err();
        assert!(matches!(err, SrError::ExtractionFault(_)), "{:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_an_encoding_fault() {
        let mut config = ToolConfig::default();
        config.ffmpeg = "false".to_string();
        let req = EncodeRequest {
            frame_pattern: PathBuf::from("p_%04d.png"),
            output: PathBuf::from("out.mp4"),
            fps: 15.0,
            audio_source: None,
        };
        let err = FfmpegTool::new(config).encode(&req).await.unwrap_err();
        assert!(matches!(err, SrError::EncodingFault(_)), "{:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_tool_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("synoid_sr_hang_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = ToolConfig::default();
        config.ffmpeg = script.to_string_lossy().into_owned();
        config.extract_timeout_secs = 1;
        let req = ExtractRequest {
            input: PathBuf::from("in.mp4"),
            frame_pattern: PathBuf::from("frame_%04d.png"),
            fps: 15.0,
        };
        let err = FfmpegTool::new(config).extract(&req).await.unwrap_err();
        assert!(matches!(err, SrError::ExtractionTimeout(_)), "{:?}", err);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
