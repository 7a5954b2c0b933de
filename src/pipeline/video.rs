// SYNOID SR Video Pipeline Controller
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// One run over one video:
//
//   Idle -> Extracting -> Processing(i) -> Encoding -> Done
//
// with Failed(stage, cause) reachable from anywhere. Frames are processed
// strictly in ascending index order on a single blocking worker that owns
// the inference session for the duration of the loop. A failed inference
// is recorded and the loop moves on; every other fault ends the run.

use crate::config::PipelineConfig;
use crate::engine::codec::{decode_bitmap, encode_png, TensorCodec};
use crate::engine::session::InferenceSession;
use crate::error::{Result, RunFailure, SrError, Stage};
use crate::pipeline::frame_store::{FrameRole, FrameSequence, FrameStore};
use crate::pipeline::image::upscale_bitmap;
use crate::pipeline::manifest::RunManifest;
use crate::pipeline::media_tool::{EncodeRequest, ExtractRequest, MediaTool};
use crate::pipeline::CancelFlag;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Observer invoked on every state transition, including each frame.
pub type ProgressCallback = Arc<dyn Fn(&RunState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Extracting,
    /// Working on the frame with this index.
    Processing(usize),
    Encoding,
    Done,
    Failed { stage: Stage, cause: String },
}

/// A frame whose inference failed and was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFailure {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub output: PathBuf,
    /// Rate used for both extraction and encoding.
    pub fps: f64,
    pub source_frames: usize,
    /// Frames upscaled during this run.
    pub completed: usize,
    pub failures: Vec<FrameFailure>,
    /// Gap indices filled by holding a neighbouring frame.
    pub filled: Vec<usize>,
    /// Frames reused from an interrupted run.
    pub skipped: usize,
    /// Sum of per-frame inference latency.
    pub inference_time: Duration,
    pub elapsed: Duration,
}

/// What the extraction stage hands to the rest of the run.
struct Extracted {
    fps: f64,
    sequence: FrameSequence,
    resumed: bool,
}

#[derive(Default)]
struct Processed {
    completed: Vec<usize>,
    failures: Vec<FrameFailure>,
    skipped: usize,
    inference_time: Duration,
}

pub struct VideoPipeline<T: MediaTool> {
    config: PipelineConfig,
    codec: TensorCodec,
    tool: T,
    store: FrameStore,
    state: RunState,
    cancel: CancelFlag,
    progress: Option<ProgressCallback>,
    manifest: Option<RunManifest>,
}

impl<T: MediaTool> VideoPipeline<T> {
    pub fn new(config: PipelineConfig, codec: TensorCodec, tool: T) -> Self {
        let store = FrameStore::new(config.work_dir.clone());
        Self {
            config,
            codec,
            tool,
            store,
            state: RunState::Idle,
            cancel: CancelFlag::new(),
            progress: None,
            manifest: None,
        }
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Upscale every frame of `input` into `output`.
    ///
    /// The session is consumed and is closed before this returns, on
    /// success and on every failure path.
    pub async fn run(
        &mut self,
        input: &Path,
        output: &Path,
        mut session: InferenceSession,
    ) -> std::result::Result<RunReport, RunFailure> {
        let started = Instant::now();
        self.manifest = None;
        self.transition(RunState::Idle);
        info!(
            "[PIPELINE] 🚀 {:?} -> {:?} with {}",
            input,
            output,
            session.fingerprint()
        );

        let extracted = match self.extract(input, session.fingerprint()).await {
            Ok(extracted) => extracted,
            Err(failure) => {
                session.close();
                return Err(self.fail(failure));
            }
        };

        let processed = match self.process(&extracted, session).await {
            Ok(processed) => processed,
            Err(failure) => return Err(self.fail(failure)),
        };

        let filled = match self.encode(input, output, &extracted).await {
            Ok(filled) => filled,
            Err(failure) => return Err(self.fail(failure)),
        };

        if let Err(cause) = self.finish() {
            // The output is already written; leftover staging is not fatal.
            warn!("[PIPELINE] ⚠️ Staging cleanup failed: {}", cause);
        }
        self.transition(RunState::Done);

        let report = RunReport {
            output: output.to_path_buf(),
            fps: extracted.fps,
            source_frames: extracted.sequence.len(),
            completed: processed.completed.len(),
            failures: processed.failures,
            filled,
            skipped: processed.skipped,
            inference_time: processed.inference_time,
            elapsed: started.elapsed(),
        };
        info!(
            "[PIPELINE] ✅ Done in {:?}: {} upscaled, {} reused, {} failed, {} filled",
            report.elapsed,
            report.completed,
            report.skipped,
            report.failures.len(),
            report.filled.len()
        );
        Ok(report)
    }

    // ── Extracting ───────────────────────────────────────────────────────

    async fn extract(
        &mut self,
        input: &Path,
        fingerprint: &str,
    ) -> std::result::Result<Extracted, RunFailure> {
        self.check_cancel(Stage::Setup)?;

        if self.config.resume {
            if let Some(extracted) = self
                .try_resume(input, fingerprint)
                .map_err(RunFailure::at(Stage::Setup))?
            {
                self.transition(RunState::Extracting);
                return Ok(extracted);
            }
        }

        // Stale frames from an earlier run must never enter this sequence.
        let at_setup = RunFailure::at(Stage::Setup);
        self.store.clear(FrameRole::Source).map_err(&at_setup)?;
        self.store.clear(FrameRole::Result).map_err(&at_setup)?;
        RunManifest::clear(self.store.root()).map_err(&at_setup)?;

        self.transition(RunState::Extracting);
        let at = RunFailure::at(Stage::Extracting);

        let fps = match self.config.fps {
            Some(fps) => fps,
            None => self.tool.probe_fps(input).await.map_err(&at)?,
        };
        self.check_cancel(Stage::Extracting)?;

        self.store.stage(FrameRole::Source).map_err(&at)?;
        let request = ExtractRequest {
            input: input.to_path_buf(),
            frame_pattern: self.store.pattern(FrameRole::Source),
            fps,
        };
        let output = self.tool.extract(&request).await.map_err(&at)?;
        debug!("[PIPELINE] extractor said: {}", output.log.trim());

        let sequence = self.store.enumerate(FrameRole::Source).map_err(&at)?;
        sequence.ensure_complete().map_err(&at)?;
        info!(
            "[PIPELINE] 🎞️ Extracted {} frame(s) at {} fps",
            sequence.len(),
            fps
        );

        let mut manifest = RunManifest::new(input, fps, sequence.len(), fingerprint);
        manifest.save(self.store.root()).map_err(&at)?;
        self.manifest = Some(manifest);

        Ok(Extracted {
            fps,
            sequence,
            resumed: false,
        })
    }

    /// Reuse the source frames of an interrupted run over the same input.
    fn try_resume(&mut self, input: &Path, fingerprint: &str) -> Result<Option<Extracted>> {
        let Some(mut manifest) = RunManifest::load(self.store.root()) else {
            info!("[PIPELINE] No manifest to resume from; starting fresh");
            return Ok(None);
        };
        if !manifest.matches_input(input) {
            info!(
                "[PIPELINE] Manifest belongs to {:?}; starting fresh",
                manifest.input
            );
            return Ok(None);
        }

        let sequence = match self.store.enumerate(FrameRole::Source) {
            Ok(seq) if seq.len() == manifest.source_frames && seq.ensure_complete().is_ok() => seq,
            _ => {
                warn!("[PIPELINE] ⚠️ Staged source frames do not match the manifest; starting fresh");
                return Ok(None);
            }
        };

        if manifest.engine != fingerprint {
            warn!(
                "[PIPELINE] ⚠️ Engine changed since the last run ({} -> {}); discarding its results",
                manifest.engine, fingerprint
            );
            self.store.clear(FrameRole::Result)?;
            manifest.engine = fingerprint.to_string();
            manifest.completed.clear();
        }
        manifest.failed.clear();

        // Held copies from an unfinished encode are not upscaled frames.
        for index in std::mem::take(&mut manifest.filled) {
            if self.store.remove(FrameRole::Result, index)? {
                info!("[PIPELINE] Discarding held copy at frame {}", index);
            }
            manifest.completed.retain(|&i| i != index);
        }

        info!(
            "[PIPELINE] ♻️ Resuming {:?}: {} source frame(s) at {} fps",
            input,
            sequence.len(),
            manifest.fps
        );
        let fps = manifest.fps;
        self.manifest = Some(manifest);
        Ok(Some(Extracted {
            fps,
            sequence,
            resumed: true,
        }))
    }

    // ── Processing ───────────────────────────────────────────────────────

    async fn process(
        &mut self,
        extracted: &Extracted,
        mut session: InferenceSession,
    ) -> std::result::Result<Processed, RunFailure> {
        if let Err(failure) = self.check_cancel(Stage::Processing) {
            session.close();
            return Err(failure);
        }

        let indices = extracted.sequence.indices().to_vec();
        let store = self.store.clone();
        let codec = self.codec;
        let cancel = self.cancel.clone();
        let progress = self.progress.clone();
        let resumed = extracted.resumed;
        let mut state = self.state.clone();

        // The loop and the session live on one blocking worker; the
        // session is closed there before the worker returns.
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = process_frames(
                &mut session,
                &store,
                &codec,
                &indices,
                resumed,
                &cancel,
                &mut state,
                progress.as_deref(),
            );
            session.close();
            (outcome, state)
        })
        .await;

        let outcome = match joined {
            Ok((outcome, reached)) => {
                self.state = reached;
                outcome
            }
            Err(e) => {
                return Err(RunFailure::new(
                    Stage::Processing,
                    SrError::Worker(format!("processing worker died: {}", e)),
                ))
            }
        };

        let processed = outcome.map_err(RunFailure::at(Stage::Processing))?;
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.stage = Stage::Processing.to_string();
            manifest.failed = processed.failures.iter().map(|f| f.index).collect();
            match self.store.scan(FrameRole::Result) {
                Ok(results) => manifest.completed = results.indices().to_vec(),
                Err(e) => warn!("[PIPELINE] ⚠️ Could not scan results for the manifest: {}", e),
            }
            manifest
                .save(self.store.root())
                .map_err(RunFailure::at(Stage::Processing))?;
        }
        Ok(processed)
    }

    // ── Encoding ─────────────────────────────────────────────────────────

    /// Returns the gap indices that were filled.
    async fn encode(
        &mut self,
        input: &Path,
        output: &Path,
        extracted: &Extracted,
    ) -> std::result::Result<Vec<usize>, RunFailure> {
        self.transition(RunState::Encoding);
        self.check_cancel(Stage::Encoding)?;
        let at = RunFailure::at(Stage::Encoding);

        let expected = extracted.sequence.len();
        let filled = self.settle_results(expected).map_err(&at)?;

        let request = EncodeRequest {
            frame_pattern: self.store.pattern(FrameRole::Result),
            output: output.to_path_buf(),
            fps: extracted.fps,
            audio_source: self.config.carry_audio.then(|| input.to_path_buf()),
        };
        let log = self.tool.encode(&request).await.map_err(&at)?;
        debug!("[PIPELINE] encoder said: {}", log.log.trim());
        Ok(filled)
    }

    /// Check the result sequence against the source count and fill gaps
    /// within tolerance. Indices are never renumbered. Filled indices are
    /// recorded in the manifest before any copy is written.
    fn settle_results(&mut self, expected: usize) -> Result<Vec<usize>> {
        let results = self.store.scan(FrameRole::Result)?;
        if results.is_empty() {
            return Err(SrError::EncodingFault(
                "no result frames were produced".to_string(),
            ));
        }

        let strays = results.strays(expected);
        if !strays.is_empty() {
            return Err(SrError::CorruptSequence(format!(
                "result frames {:?} have no source frame ({} source frames)",
                strays, expected
            )));
        }

        let missing = results.missing(expected);
        let tolerance = self.config.gap_tolerance;
        if missing.len() > tolerance {
            return Err(SrError::FrameGap { missing, tolerance });
        }

        if !missing.is_empty() {
            if let Some(manifest) = self.manifest.as_mut() {
                manifest.filled = missing.clone();
                manifest.save(self.store.root())?;
            }
        }
        for &index in &missing {
            let donor = hold_frame_for(&results, index).ok_or_else(|| {
                SrError::EncodingFault(format!("no neighbour to fill frame {}", index))
            })?;
            let bytes = self.store.read(FrameRole::Result, donor)?;
            self.store.write(FrameRole::Result, index, &bytes)?;
            warn!(
                "[PIPELINE] ⚠️ Filled missing frame {} by holding frame {}",
                index, donor
            );
        }
        Ok(missing)
    }

    // ── Done / Failed ────────────────────────────────────────────────────

    fn finish(&mut self) -> Result<()> {
        let root = self.store.root().to_path_buf();
        if self.config.keep_frames {
            if let Some(manifest) = self.manifest.as_mut() {
                manifest.stage = "done".to_string();
                manifest.save(&root)?;
            }
            info!("[PIPELINE] Keeping staged frames in {:?}", root);
            return Ok(());
        }
        self.store.clear(FrameRole::Source)?;
        self.store.clear(FrameRole::Result)?;
        RunManifest::clear(&root)
    }

    fn fail(&mut self, failure: RunFailure) -> RunFailure {
        error!("[PIPELINE] ❌ {}", failure);
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.stage = failure.stage.to_string();
            for index in std::mem::take(&mut manifest.filled) {
                if let Err(e) = self.store.remove(FrameRole::Result, index) {
                    warn!("[PIPELINE] ⚠️ Could not drop held copy {}: {}", index, e);
                    manifest.filled.push(index);
                }
            }
            match self.store.scan(FrameRole::Result) {
                Ok(results) => manifest.completed = results.indices().to_vec(),
                Err(e) => warn!("[PIPELINE] ⚠️ Could not scan results for the manifest: {}", e),
            }
            if let Err(e) = manifest.save(self.store.root()) {
                warn!("[PIPELINE] Could not save manifest after failure: {}", e);
            }
        }
        self.transition(RunState::Failed {
            stage: failure.stage,
            cause: failure.cause.to_string(),
        });
        failure
    }

    fn check_cancel(&self, stage: Stage) -> std::result::Result<(), RunFailure> {
        if self.cancel.is_cancelled() {
            return Err(RunFailure::new(stage, SrError::Cancelled));
        }
        Ok(())
    }

    fn transition(&mut self, state: RunState) {
        announce(&self.state, &state, self.progress.as_deref());
        self.state = state;
    }
}

/// Log a state change and hand the new state to the observer.
fn announce(from: &RunState, to: &RunState, progress: Option<&(dyn Fn(&RunState) + Send + Sync)>) {
    info!("[PIPELINE] state: {:?} -> {:?}", from, to);
    if let Some(progress) = progress {
        progress(to);
    }
}

/// The per-frame loop. Runs on a blocking worker. `state` tracks the
/// last announced state so the controller can pick it up afterwards.
#[allow(clippy::too_many_arguments)]
fn process_frames(
    session: &mut InferenceSession,
    store: &FrameStore,
    codec: &TensorCodec,
    indices: &[usize],
    resumed: bool,
    cancel: &CancelFlag,
    state: &mut RunState,
    progress: Option<&(dyn Fn(&RunState) + Send + Sync)>,
) -> Result<Processed> {
    let mut processed = Processed::default();
    let total = indices.len();

    for (n, &index) in indices.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("[PIPELINE] 🛑 Cancelled before frame {}", index);
            return Err(SrError::Cancelled);
        }
        let next = RunState::Processing(index);
        announce(state, &next, progress);
        *state = next;

        if resumed && store.contains(FrameRole::Result, index) {
            debug!("[PIPELINE] frame {} already upscaled", index);
            processed.skipped += 1;
            continue;
        }

        match upscale_frame(session, store, codec, index) {
            Ok(elapsed) => {
                processed.inference_time += elapsed;
                processed.completed.push(index);
            }
            Err(e) if e.is_frame_local() => {
                warn!("[PIPELINE] ⚠️ Frame {} failed, continuing: {}", index, e);
                processed.failures.push(FrameFailure {
                    index,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }

        if (n + 1) % 50 == 0 || n + 1 == total {
            info!("[PIPELINE] Processed {}/{} frame(s)", n + 1, total);
        }
    }
    Ok(processed)
}

/// source bytes -> bitmap -> tensor -> infer -> bitmap -> result bytes
fn upscale_frame(
    session: &mut InferenceSession,
    store: &FrameStore,
    codec: &TensorCodec,
    index: usize,
) -> Result<Duration> {
    let bytes = store.read(FrameRole::Source, index)?;
    let bitmap = decode_bitmap(&bytes)?;
    let (upscaled, elapsed) = upscale_bitmap(session, codec, &bitmap)?;
    let png = encode_png(&upscaled)?;
    store.write(FrameRole::Result, index, &png)?;
    Ok(elapsed)
}

/// Nearest existing result before `index`, or after it for a leading gap.
fn hold_frame_for(results: &FrameSequence, index: usize) -> Option<usize> {
    let indices = results.indices();
    let pos = indices.partition_point(|&i| i < index);
    if pos > 0 {
        Some(indices[pos - 1])
    } else {
        indices.get(pos).copied()
    }
}
