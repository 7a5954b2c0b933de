// SYNOID SR Pipeline
// Copyright (c) 2026 Xing_The_Creator | SYNOID
//
// Run controllers for still images and videos, plus the pieces they share:
// the staging frame store, the ffmpeg collaborator, and the resume manifest.

pub mod frame_store;
pub mod image;
pub mod manifest;
pub mod media_tool;
pub mod video;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between a run and whoever may stop it.
/// Checked between stages and between frames, never mid-inference.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "m4v"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// A user-selected input. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    path: PathBuf,
    kind: MediaKind,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Classify by extension. Unknown extensions yield `None`.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let ext = path.extension()?.to_str()?.to_lowercase();
        let kind = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else {
            return None;
        };
        Some(Self { path, kind })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_kind_from_extension() {
        assert_eq!(
            MediaAsset::from_path("clip.MP4").map(|a| a.kind()),
            Some(MediaKind::Video)
        );
        assert_eq!(
            MediaAsset::from_path("/tmp/photo.jpeg").map(|a| a.kind()),
            Some(MediaKind::Image)
        );
        assert!(MediaAsset::from_path("notes.txt").is_none());
        assert!(MediaAsset::from_path("no_extension").is_none());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}
