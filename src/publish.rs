//! Atomic artifact publication.
//!
//! Artifacts are staged as a temporary file in the destination directory
//! and moved into place with an atomic rename, so a concurrent reader of
//! the published path never observes a partially written file. A cancelled
//! or crashed attempt leaves the previously published artifact intact.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat, RgbImage};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to stage temporary file in {dir}: {source}")]
    Stage {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to publish {path}: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Write `bytes` to `dest` atomically (temp file + rename in the same
/// directory). Creates the destination directory if needed.
pub fn publish_bytes(dest: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let stage = |source| PublishError::Stage {
        dir: dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(stage)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(stage)?;
    tmp.write_all(bytes).map_err(stage)?;
    tmp.flush().map_err(stage)?;

    tmp.persist(dest).map_err(|e| PublishError::Rename {
        path: dest.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, PublishError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Encode a grayscale image as PNG bytes.
pub fn encode_gray_png(img: &GrayImage) -> Result<Vec<u8>, PublishError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn publish_creates_directories_and_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("labeled").join("tower3_boxed.png");

        publish_bytes(&dest, b"payload").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn publish_replaces_existing_file_wholesale() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("artifact.png");

        publish_bytes(&dest, b"old artifact, quite long").unwrap();
        publish_bytes(&dest, b"new").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn publish_leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("artifact.png");

        publish_bytes(&dest, b"data").unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("artifact.png")]);
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let bytes = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.as_raw(), img.as_raw());
    }
}
