// SYNOID SR Frame Store
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Staging directories for source (decoded) and result (upscaled) frames.
//
// Every frame file is named `<prefix><index>.png` with the index zero-padded
// to at least four digits, which is also the `%04d` pattern handed to
// ffmpeg. Enumeration always sorts numerically, never by name.

use crate::error::{Result, SrError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const INDEX_WIDTH: usize = 4;
const EXTENSION: &str = "png";

/// Which generation of a frame a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRole {
    /// Decoded from the input video
    Source,
    /// Written after inference
    Result,
}

impl FrameRole {
    fn dir_name(self) -> &'static str {
        match self {
            FrameRole::Source => "frames",
            FrameRole::Result => "sr_frames",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            FrameRole::Source => "frame_",
            FrameRole::Result => "srframe_",
        }
    }
}

impl fmt::Display for FrameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRole::Source => f.write_str("source"),
            FrameRole::Result => f.write_str("result"),
        }
    }
}

/// Frame indices found in one role directory, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    role: FrameRole,
    indices: Vec<usize>,
}

impl FrameSequence {
    pub fn role(&self) -> FrameRole {
        self.role
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    /// Indices in `0..expected` with no frame.
    pub fn missing(&self, expected: usize) -> Vec<usize> {
        (0..expected).filter(|i| !self.contains(*i)).collect()
    }

    /// Indices at or past `expected`, which cannot belong to the run.
    pub fn strays(&self, expected: usize) -> Vec<usize> {
        self.indices.iter().copied().filter(|i| *i >= expected).collect()
    }

    /// The sequence must be exactly `0..len` with no gaps.
    pub fn ensure_complete(&self) -> Result<()> {
        for (expected, &actual) in self.indices.iter().enumerate() {
            if expected != actual {
                return Err(SrError::CorruptSequence(format!(
                    "{} frames: expected index {}, found {}",
                    self.role, expected, actual
                )));
            }
        }
        Ok(())
    }
}

/// Filesystem bookkeeping for one run's staging root.
#[derive(Debug, Clone)]
pub struct FrameStore {
    root: PathBuf,
}

impl FrameStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, role: FrameRole) -> PathBuf {
        self.root.join(role.dir_name())
    }

    /// File name for `index`, e.g. `srframe_0007.png`.
    pub fn file_name(role: FrameRole, index: usize) -> String {
        format!(
            "{}{:0width$}.{}",
            role.prefix(),
            index,
            EXTENSION,
            width = INDEX_WIDTH
        )
    }

    pub fn frame_path(&self, role: FrameRole, index: usize) -> PathBuf {
        self.dir(role).join(Self::file_name(role, index))
    }

    /// printf-style pattern for the decode/encode utility, e.g.
    /// `<root>/frames/frame_%04d.png`.
    pub fn pattern(&self, role: FrameRole) -> PathBuf {
        self.dir(role).join(format!(
            "{}%0{}d.{}",
            role.prefix(),
            INDEX_WIDTH,
            EXTENSION
        ))
    }

    /// Ensure the role directory exists. Safe to call repeatedly.
    pub fn stage(&self, role: FrameRole) -> Result<PathBuf> {
        let dir = self.dir(role);
        fs::create_dir_all(&dir).map_err(|e| SrError::storage(&dir, e))?;
        Ok(dir)
    }

    /// Remove every frame of `role`.
    pub fn clear(&self, role: FrameRole) -> Result<()> {
        let dir = self.dir(role);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| SrError::storage(&dir, e))?;
            debug!("[FRAMES] Cleared {:?}", dir);
        }
        Ok(())
    }

    /// Sorted indices of `role`, possibly empty.
    pub fn scan(&self, role: FrameRole) -> Result<FrameSequence> {
        let dir = self.dir(role);
        let mut indices = Vec::new();
        if !dir.exists() {
            return Ok(FrameSequence { role, indices });
        }

        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                SrError::storage(&dir, std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
            let name = entry.file_name().to_string_lossy();
            // In-flight writes and OS droppings are hidden files.
            if name.starts_with('.') {
                continue;
            }
            let index = parse_index(role, &name).ok_or_else(|| {
                SrError::CorruptSequence(format!("unexpected file {:?} in {:?}", name, dir))
            })?;
            indices.push(index);
        }

        indices.sort_unstable();
        if let Some(pair) = indices.windows(2).find(|w| w[0] == w[1]) {
            return Err(SrError::CorruptSequence(format!(
                "duplicate {} frame index {}",
                role, pair[0]
            )));
        }
        Ok(FrameSequence { role, indices })
    }

    /// Sorted indices of `role`; an empty directory is an error.
    pub fn enumerate(&self, role: FrameRole) -> Result<FrameSequence> {
        let seq = self.scan(role)?;
        if seq.is_empty() {
            return Err(SrError::EmptySequence(self.dir(role)));
        }
        info!("[FRAMES] {} {} frame(s) staged", seq.len(), role);
        Ok(seq)
    }

    pub fn contains(&self, role: FrameRole, index: usize) -> bool {
        self.frame_path(role, index).is_file()
    }

    /// Persist one frame, replacing any previous file for the same index.
    /// The bytes land under a hidden name first and are renamed into place.
    pub fn write(&self, role: FrameRole, index: usize, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.stage(role)?;
        let name = Self::file_name(role, index);
        let partial = dir.join(format!(".{}.partial", name));
        let path = dir.join(name);

        fs::write(&partial, bytes).map_err(|e| SrError::storage(&partial, e))?;
        fs::rename(&partial, &path).map_err(|e| SrError::storage(&path, e))?;
        Ok(path)
    }

    /// Delete one frame. Returns whether a file was there.
    pub fn remove(&self, role: FrameRole, index: usize) -> Result<bool> {
        let path = self.frame_path(role, index);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SrError::storage(&path, e)),
        }
    }

    pub fn read(&self, role: FrameRole, index: usize) -> Result<Vec<u8>> {
        let path = self.frame_path(role, index);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SrError::MissingFrame { role, index },
            _ => SrError::storage(&path, e),
        })
    }
}

fn parse_index(role: FrameRole, name: &str) -> Option<usize> {
    let digits = name
        .strip_prefix(role.prefix())?
        .strip_suffix(EXTENSION)?
        .strip_suffix('.')?;
    if digits.len() < INDEX_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
