//! Local file frame source.
//!
//! This module provides `FileSource` for ingesting frames from local media:
//! - `stub://<name>`: a synthetic scene, useful for demos without a video file
//! - a directory: an image sequence (JPEG/PNG), played in file-name order
//! - any other path: a video file decoded with FFmpeg (feature: ingest-file-ffmpeg)
//!
//! The path must exist and be openable when the source is created; a missing
//! source is a fatal startup error.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::FrameSource;

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const SYNTHETIC_CYCLE_FRAMES: u64 = 150;
const SYNTHETIC_SQUARE_SIDE: u32 = 60;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local path (e.g., "videos/video.mp4"), an image directory, or "stub://scene".
    pub path: String,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Directory(ImageDirectorySource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "video source '{}' is not a local path (no URL schemes)",
                config.path
            ));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            });
        }

        let path = Path::new(&config.path);
        if !path.exists() {
            return Err(anyhow!(
                "video source not found at '{}'; place the video there or set SENTRY_VIDEO_PATH",
                config.path
            ));
        }
        if path.is_dir() {
            return Ok(Self {
                backend: FileBackend::Directory(ImageDirectorySource::open(path)?),
            });
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding '{}' requires the ingest-file-ffmpeg feature; \
                 use an image directory or stub:// source otherwise",
                config.path
            ))
        }
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(source) => format!("{} (synthetic)", source.config.path),
            FileBackend::Directory(source) => {
                format!("{} ({} images)", source.root.display(), source.files.len())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => format!("{} (ffmpeg)", source.path()),
        }
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => Ok(source.next_frame()),
            FileBackend::Directory(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => {
                source.frame_index = 0;
                Ok(())
            }
            FileBackend::Directory(source) => {
                source.position = 0;
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.rewind(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for demos and tests
// ----------------------------------------------------------------------------

/// Static gradient background; a bright square crosses the scene during the
/// last third of each cycle. The cycle then ends with end-of-stream.
struct SyntheticFileSource {
    config: FileConfig,
    frame_index: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        log::info!("FileSource: opened {} (synthetic)", config.path);
        Self {
            config,
            frame_index: 0,
        }
    }

    fn next_frame(&mut self) -> Option<RgbImage> {
        if self.frame_index >= SYNTHETIC_CYCLE_FRAMES {
            return None;
        }
        let index = self.frame_index;
        self.frame_index += 1;
        Some(synthetic_scene(index))
    }
}

fn synthetic_scene(index: u64) -> RgbImage {
    let mut image = RgbImage::from_fn(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, |x, y| {
        let shade = 40 + ((x + y) / 16) as u8;
        Rgb([shade, shade, shade.saturating_add(10)])
    });

    let moving_from = SYNTHETIC_CYCLE_FRAMES * 2 / 3;
    if index >= moving_from {
        let step = (index - moving_from) as u32;
        let left = 20 + step * 10;
        let top = SYNTHETIC_HEIGHT / 2 - SYNTHETIC_SQUARE_SIDE / 2;
        for y in top..top + SYNTHETIC_SQUARE_SIDE {
            for x in left..(left + SYNTHETIC_SQUARE_SIDE).min(SYNTHETIC_WIDTH) {
                image.put_pixel(x, y, Rgb([235, 235, 235]));
            }
        }
    }
    image
}

// ----------------------------------------------------------------------------
// Image directory source
// ----------------------------------------------------------------------------

struct ImageDirectorySource {
    root: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageDirectorySource {
    fn open(root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(root)
            .with_context(|| format!("failed to list image directory {}", root.display()))?
        {
            let path = entry?.path();
            if is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(anyhow!(
                "image directory {} contains no .jpg/.jpeg/.png files",
                root.display()
            ));
        }
        log::info!(
            "FileSource: opened {} ({} images)",
            root.display(),
            files.len()
        );
        Ok(Self {
            root: root.to_path_buf(),
            files,
            position: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        Ok(Some(image.to_rgb8()))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png"
            )
        })
        .unwrap_or(false)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_urls_and_missing_paths() {
        assert!(FileSource::open(FileConfig {
            path: "rtsp://camera/stream".into()
        })
        .is_err());
        assert!(FileSource::open(FileConfig {
            path: "/definitely/not/here.mp4".into()
        })
        .is_err());
        assert!(FileSource::open(FileConfig { path: "  ".into() }).is_err());
    }

    #[test]
    fn synthetic_scene_ends_and_rewinds() {
        let mut source = FileSource::open(FileConfig {
            path: "stub://front".into(),
        })
        .unwrap();

        let mut count = 0;
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.dimensions(), (SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT));
            count += 1;
        }
        assert_eq!(count, SYNTHETIC_CYCLE_FRAMES);

        source.rewind().unwrap();
        assert!(source.next_frame().unwrap().is_some());
    }

    #[test]
    fn synthetic_scene_is_static_before_the_square_enters() {
        assert_eq!(synthetic_scene(0), synthetic_scene(10));
        assert_ne!(synthetic_scene(0), synthetic_scene(SYNTHETIC_CYCLE_FRAMES - 1));
    }

    #[test]
    fn image_directory_plays_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10u8), ("notes.txt", 0u8)] {
            let path = dir.path().join(name);
            if name.ends_with(".png") {
                RgbImage::from_pixel(4, 4, Rgb([shade, shade, shade]))
                    .save(&path)
                    .unwrap();
            } else {
                std::fs::write(&path, b"not an image").unwrap();
            }
        }

        let mut source = FileSource::open(FileConfig {
            path: dir.path().to_string_lossy().into_owned(),
        })
        .unwrap();

        let first = source.next_frame().unwrap().unwrap();
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(first.get_pixel(0, 0)[0], 10);
        assert_eq!(second.get_pixel(0, 0)[0], 20);
        assert!(source.next_frame().unwrap().is_none());
    }
}
