// SYNOID SR Test Fixtures
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Fakes for the two seams of the pipeline: the media tool and the
// inference engine. No ffmpeg or model weights required.
#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use synoid_sr::accel::Acceleration;
use synoid_sr::config::PipelineConfig;
use synoid_sr::engine::codec::InputShape;
use synoid_sr::engine::session::{InferenceEngine, InferenceSession, ModelSpec};
use synoid_sr::engine::FrameTensor;
use synoid_sr::error::{Result, SrError};
use synoid_sr::pipeline::media_tool::{EncodeRequest, ExtractRequest, MediaTool, ToolOutput};

pub const FRAME_W: u32 = 8;
pub const FRAME_H: u32 = 6;

/// Solid colour of source frame `index`. Distinct per frame, never black.
pub fn frame_color(index: usize) -> [u8; 3] {
    [(20 + 10 * index) as u8, 40, 60]
}

/// Per-test scratch directory under the system temp dir.
pub fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("synoid_sr_it_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn pipeline_config(work_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        work_dir: work_dir.join("staging"),
        fps: Some(15.0),
        gap_tolerance: 0,
        keep_frames: false,
        resume: false,
        carry_audio: true,
    }
}

/// What the fake tool observed. Shared so tests can inspect it after the
/// pipeline took ownership of the tool.
#[derive(Default)]
pub struct ToolLog {
    pub probes: AtomicUsize,
    pub extracts: Mutex<Vec<ExtractRequest>>,
    pub encodes: Mutex<Vec<EncodeRequest>>,
    /// Contiguous frames found from index 0 when `encode` ran.
    pub encoded_frames: Mutex<Vec<usize>>,
}

/// Stands in for ffmpeg: "extracts" solid-colour PNGs and "encodes" by
/// counting the frames an image2 reader would pick up.
pub struct FakeTool {
    pub frames: usize,
    pub probed_fps: f64,
    pub fail_extract: bool,
    pub fail_encode: bool,
    pub log: Arc<ToolLog>,
}

impl FakeTool {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            probed_fps: 23.976,
            fail_extract: false,
            fail_encode: false,
            log: Arc::new(ToolLog::default()),
        }
    }

    pub fn sharing(frames: usize, log: Arc<ToolLog>) -> Self {
        Self {
            log,
            ..Self::new(frames)
        }
    }
}

fn render(pattern: &Path, index: usize) -> PathBuf {
    PathBuf::from(
        pattern
            .to_string_lossy()
            .replace("%04d", &format!("{:04}", index)),
    )
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn probe_fps(&self, _input: &Path) -> Result<f64> {
        self.log.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.probed_fps)
    }

    async fn extract(&self, request: &ExtractRequest) -> Result<ToolOutput> {
        self.log.extracts.lock().unwrap().push(request.clone());
        if self.fail_extract {
            return Err(SrError::ExtractionFault("fake extractor exited with 1".into()));
        }
        for i in 0..self.frames {
            RgbImage::from_pixel(FRAME_W, FRAME_H, Rgb(frame_color(i)))
                .save(render(&request.frame_pattern, i))
                .map_err(SrError::from)?;
        }
        Ok(ToolOutput::default())
    }

    async fn encode(&self, request: &EncodeRequest) -> Result<ToolOutput> {
        self.log.encodes.lock().unwrap().push(request.clone());
        if self.fail_encode {
            return Err(SrError::EncodingFault("fake encoder exited with 1".into()));
        }
        let found: Vec<usize> = (0..)
            .take_while(|i| render(&request.frame_pattern, *i).is_file())
            .collect();
        *self.log.encoded_frames.lock().unwrap() = found;
        std::fs::write(&request.output, b"fake video").map_err(|e| SrError::storage(&request.output, e))?;
        Ok(ToolOutput::default())
    }
}

/// Nearest-neighbour upsampler. Fails any frame whose first pixel is
/// `poison`, which is how tests inject a deterministic inference fault.
pub struct Repeat {
    pub factor: usize,
    pub poison: Option<[u8; 3]>,
    pub released: Arc<AtomicUsize>,
}

impl InferenceEngine for Repeat {
    fn name(&self) -> String {
        format!("repeat-x{}", self.factor)
    }

    fn forward(&mut self, input: &FrameTensor) -> Result<FrameTensor> {
        if let Some(poison) = self.poison {
            let first = input.pixel(0, 0);
            let hit = first
                .iter()
                .zip(poison)
                .all(|(v, p)| (v * 255.0 - p as f32).abs() < 0.5);
            if hit {
                return Err(SrError::InferenceFault("injected fault".into()));
            }
        }
        let out = input.shape().scaled(self.factor);
        let mut data = Vec::with_capacity(out.len());
        for y in 0..out.height {
            for x in 0..out.width {
                data.extend_from_slice(input.pixel(x / self.factor, y / self.factor));
            }
        }
        FrameTensor::new(out, data)
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A native-input session over [`Repeat`] plus its release counter.
pub fn repeat_session(factor: u32, poison: Option<[u8; 3]>) -> (InferenceSession, Arc<AtomicUsize>) {
    let released = Arc::new(AtomicUsize::new(0));
    let engine = Repeat {
        factor: factor as usize,
        poison,
        released: released.clone(),
    };
    let spec = ModelSpec {
        input: InputShape::Native,
        scale: factor,
    };
    let session = InferenceSession::with_engine(Box::new(engine), spec, Acceleration::cpu()).unwrap();
    (session, released)
}

/// Doubles the 16x16 input the session checks at open time, then returns
/// every real frame one column short.
pub struct Narrowing;

impl InferenceEngine for Narrowing {
    fn name(&self) -> String {
        "narrowing-x2".to_string()
    }

    fn forward(&mut self, input: &FrameTensor) -> Result<FrameTensor> {
        let s = input.shape();
        let mut out = s.scaled(2);
        if s.width != 16 || s.height != 16 {
            out.width -= 1;
        }
        FrameTensor::zeros(out)
    }

    fn release(&mut self) {}
}

pub fn narrowing_session() -> InferenceSession {
    let spec = ModelSpec {
        input: InputShape::Native,
        scale: 2,
    };
    InferenceSession::with_engine(Box::new(Narrowing), spec, Acceleration::cpu()).unwrap()
}

/// First pixel of result frame `index`, decoded.
pub fn result_pixel(store: &synoid_sr::pipeline::frame_store::FrameStore, index: usize) -> [u8; 3] {
    let bytes = store
        .read(synoid_sr::pipeline::frame_store::FrameRole::Result, index)
        .unwrap();
    image::load_from_memory(&bytes).unwrap().to_rgb8().get_pixel(0, 0).0
}
