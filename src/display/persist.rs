//! Snapshot and diagnostics output

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::debug;

use crate::capture::{decoder, Frame};
use crate::error::{DecodeError, PersistError};

/// Where snapshots and diagnostics end up.
pub trait Persistence {
    fn save_image(&mut self, path: &Path, image: &RgbImage) -> Result<(), PersistError>;

    /// Append `text` plus a newline, creating the file if needed.
    fn append_line(&mut self, path: &Path, text: &str) -> Result<(), PersistError>;
}

/// Writes relative paths under a root directory.
#[derive(Debug, Clone)]
pub struct FsPersistence {
    root: PathBuf,
}

impl FsPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    fn prepare(&self, path: &Path) -> Result<PathBuf, PersistError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|source| PersistError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(full)
    }
}

impl Persistence for FsPersistence {
    fn save_image(&mut self, path: &Path, image: &RgbImage) -> Result<(), PersistError> {
        let full = self.prepare(path)?;
        image.save(&full).map_err(|source| PersistError::Image {
            path: full.clone(),
            source,
        })?;
        debug!("Wrote {}", full.display());
        Ok(())
    }

    fn append_line(&mut self, path: &Path, text: &str) -> Result<(), PersistError> {
        let full = self.prepare(path)?;
        let io_err = |source| PersistError::Io {
            path: full.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .map_err(io_err)?;
        writeln!(file, "{text}").map_err(io_err)?;
        Ok(())
    }
}

/// Decodes `frames` and places them left to right on one canvas.
///
/// The canvas is as tall as the tallest frame; shorter frames are top
/// aligned over black.
pub fn compose_side_by_side(frames: &[Frame]) -> Result<RgbImage, PersistError> {
    if frames.is_empty() {
        return Err(PersistError::Empty);
    }

    let mut tiles = Vec::with_capacity(frames.len());
    for frame in frames {
        let rgb = decoder::decode_frame(frame)?;
        let expected = rgb.width as usize * rgb.height as usize * 3;
        let actual = rgb.pixels.len();
        let tile = RgbImage::from_raw(rgb.width, rgb.height, rgb.pixels)
            .ok_or(DecodeError::Truncated { expected, actual })?;
        tiles.push(tile);
    }

    let width = tiles.iter().map(|t| t.width()).sum();
    let height = tiles.iter().map(|t| t.height()).max().unwrap_or(0);
    let mut canvas = RgbImage::new(width, height);

    let mut x = 0i64;
    for tile in &tiles {
        image::imageops::replace(&mut canvas, tile, x, 0);
        x += tile.width() as i64;
    }
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat, SourceId};
    use bytes::Bytes;
    use std::time::Instant;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
        Frame::new(
            Bytes::from(data),
            FrameMetadata {
                source: SourceId(0),
                sequence: 0,
                width,
                height,
                stride: width * 3,
                format: PixelFormat::Rgb24,
                device_timestamp: None,
            },
            Instant::now(),
        )
    }

    #[test]
    fn composite_places_frames_left_to_right() {
        let frames = [solid(2, 2, [255, 0, 0]), solid(3, 1, [0, 0, 255])];
        let image = compose_side_by_side(&frames).unwrap();

        assert_eq!(image.dimensions(), (5, 2));
        assert_eq!(image.get_pixel(1, 1).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(2, 0).0, [0, 0, 255]);
        // Below the short frame stays black
        assert_eq!(image.get_pixel(4, 1).0, [0, 0, 0]);
    }

    #[test]
    fn composite_of_nothing_is_an_error() {
        assert!(matches!(compose_side_by_side(&[]), Err(PersistError::Empty)));
    }

    #[test]
    fn fs_persistence_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut persist = FsPersistence::new(dir.path());

        persist.append_line(Path::new("log.txt"), "one").unwrap();
        persist.append_line(Path::new("log.txt"), "two").unwrap();
        let text = fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(text, "one\ntwo\n");

        let image = compose_side_by_side(&[solid(4, 4, [10, 20, 30])]).unwrap();
        persist
            .save_image(Path::new("shots/combined.png"), &image)
            .unwrap();
        let reloaded = image::open(dir.path().join("shots/combined.png"))
            .unwrap()
            .to_rgb8();
        assert_eq!(reloaded.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
