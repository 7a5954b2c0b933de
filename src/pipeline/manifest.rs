// SYNOID SR Run Manifest
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// JSON snapshot of a video run, written into the staging root after
// extraction, after processing and on failure. A later run with `resume`
// reads it back to reuse extracted frames and skip finished ones.

use crate::error::{Result, SrError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const MANIFEST_FILE: &str = "run_manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    /// Video the source frames were extracted from.
    pub input: PathBuf,
    /// Rate the source frames were extracted at; encoding reuses it.
    pub fps: f64,
    pub source_frames: usize,
    /// Indices with a result frame on disk.
    pub completed: Vec<usize>,
    /// Indices whose inference failed.
    pub failed: Vec<usize>,
    /// Indices holding a copy of a neighbour rather than an upscaled frame.
    #[serde(default)]
    pub filled: Vec<usize>,
    /// Fingerprint of the engine that produced the result frames.
    pub engine: String,
    /// Last stage the run reached.
    pub stage: String,
    pub timestamp: String,
}

impl RunManifest {
    pub fn new(input: &Path, fps: f64, source_frames: usize, engine: &str) -> Self {
        Self {
            input: input.to_path_buf(),
            fps,
            source_frames,
            completed: Vec::new(),
            failed: Vec::new(),
            filled: Vec::new(),
            engine: engine.to_string(),
            stage: "extracting".to_string(),
            timestamp: unix_now(),
        }
    }

    pub fn path(work_dir: &Path) -> PathBuf {
        work_dir.join(MANIFEST_FILE)
    }

    /// Whether this manifest describes a run over `input`.
    pub fn matches_input(&self, input: &Path) -> bool {
        self.input == input
    }

    /// Write to `<work_dir>/run_manifest.json`, refreshing the timestamp.
    pub fn save(&mut self, work_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(work_dir).map_err(|e| SrError::storage(work_dir, e))?;
        self.timestamp = unix_now();

        let path = Self::path(work_dir);
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            SrError::storage(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        let partial = work_dir.join(format!(".{}.partial", MANIFEST_FILE));
        fs::write(&partial, json).map_err(|e| SrError::storage(&partial, e))?;
        fs::rename(&partial, &path).map_err(|e| SrError::storage(&path, e))?;

        info!("[MANIFEST] 💾 Saved at stage '{}': {:?}", self.stage, path);
        Ok(path)
    }

    /// Read the manifest in `work_dir`. An absent or unreadable manifest is
    /// `None`; a run simply starts fresh in that case.
    pub fn load(work_dir: &Path) -> Option<Self> {
        let path = Self::path(work_dir);
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<RunManifest>(&json) {
                Ok(manifest) => {
                    info!(
                        "[MANIFEST] 📂 Found manifest for {:?}: {}/{} frame(s) done",
                        manifest.input,
                        manifest.completed.len(),
                        manifest.source_frames
                    );
                    Some(manifest)
                }
                Err(e) => {
                    error!("[MANIFEST] Failed to parse {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                error!("[MANIFEST] Failed to read {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn clear(work_dir: &Path) -> Result<()> {
        let path = Self::path(work_dir);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| SrError::storage(&path, e))?;
            info!("[MANIFEST] 🗑️ Manifest cleared");
        }
        Ok(())
    }
}

fn unix_now() -> String {
    use std::time::SystemTime;
    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("unix:{}", duration.as_secs())
}
