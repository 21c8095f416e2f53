//! Filesystem layout of records and derived artifacts.
//!
//! Everything lives beneath a single output root:
//!
//! ```text
//! <root>/json/<stem>_detections.json
//! <root>/labeled/<stem>_boxed.png
//! <root>/filtered/<stem>_filtered.png
//! <root>/masks/<stem>_mask.png
//! ```
//!
//! The watcher monitors only files matching `*_detections.json`.

use std::path::{Path, PathBuf};

/// Suffix that identifies a detection record file.
pub const RECORD_SUFFIX: &str = "_detections.json";

/// Maps a record stem to its record and artifact paths.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn json_dir(&self) -> PathBuf {
        self.root.join("json")
    }

    pub fn labeled_dir(&self) -> PathBuf {
        self.root.join("labeled")
    }

    pub fn filtered_dir(&self) -> PathBuf {
        self.root.join("filtered")
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.root.join("masks")
    }

    pub fn record_path(&self, stem: &str) -> PathBuf {
        self.json_dir().join(format!("{stem}{RECORD_SUFFIX}"))
    }

    pub fn labeled_path(&self, stem: &str) -> PathBuf {
        self.labeled_dir().join(format!("{stem}_boxed.png"))
    }

    pub fn filtered_path(&self, stem: &str) -> PathBuf {
        self.filtered_dir().join(format!("{stem}_filtered.png"))
    }

    pub fn mask_path(&self, stem: &str) -> PathBuf {
        self.masks_dir().join(format!("{stem}_mask.png"))
    }

    /// Create the four artifact directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.json_dir(),
            self.labeled_dir(),
            self.filtered_dir(),
            self.masks_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Whether a path names a detection record (`*_detections.json`).
pub fn is_record_path(path: &Path) -> bool {
    record_stem(path).is_some()
}

/// Extract the stem from a record path.
///
/// Returns `None` for paths that do not end in `_detections.json` or have
/// an empty stem.
pub fn record_stem(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(RECORD_SUFFIX)?;
    (!stem.is_empty()).then_some(stem)
}
