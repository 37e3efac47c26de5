//! Periodic raw-frame capture for building training sets.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::frame::{write_jpeg, DEFAULT_JPEG_QUALITY};

/// Writes raw frames into one folder per session, named by the session start
/// time (`<base>/<YYYYMMDD_HHMMSS>/collected_<YYYYMMDD-HHMMSS>.jpg`).
pub struct ImageCollector {
    session_dir: PathBuf,
    saved: u64,
}

impl ImageCollector {
    /// Create the session folder. Called once, at loop start.
    pub fn start_session(base: &Path, started_at: DateTime<Local>) -> Result<Self> {
        let session_dir = base.join(started_at.format("%Y%m%d_%H%M%S").to_string());
        std::fs::create_dir_all(&session_dir).with_context(|| {
            format!(
                "failed to create collection folder {}",
                session_dir.display()
            )
        })?;
        log::info!("detector: collecting images into {}", session_dir.display());
        Ok(Self {
            session_dir,
            saved: 0,
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    pub fn save(&mut self, raw: &RgbImage, at: DateTime<Local>) -> Result<PathBuf> {
        let path = self.session_dir.join(format!(
            "collected_{}.jpg",
            at.format("%Y%m%d-%H%M%S")
        ));
        write_jpeg(&path, raw, DEFAULT_JPEG_QUALITY)?;
        self.saved += 1;
        Ok(path)
    }
}
