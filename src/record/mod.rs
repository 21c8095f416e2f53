//! Detection record schema.
//!
//! One JSON document per source image, edited by humans and external tools.
//! Field names and nesting are part of the external contract and must not
//! change. The record's semantic fields are never mutated here; only the
//! derived fields (`center`, `classification`) are recomputed during
//! validation.

mod validate;

pub use validate::{ValidationError, validate};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A detection record: the authoritative description of what was found in
/// one source image, plus pointers to the derived artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// File name of the source image; immutable once created.
    pub image_filename: String,

    /// Full path to the source image; immutable once created.
    pub image_path: PathBuf,

    /// Creation time, set once by the ingest step. Regeneration never
    /// rewrites it.
    pub processing_timestamp: String,

    /// Overall label, derived from the highest-confidence detection
    /// ("Normal" when the list is empty).
    pub classification: String,

    /// Declared count; must equal `detections.len()`.
    pub total_detections: usize,

    /// Paths to the derived artifacts. Written by the pipeline, read-only
    /// for editors.
    #[serde(default)]
    pub output_files: OutputFiles,

    /// Ordered detections. Order only affects rendering (overlapping boxes
    /// are drawn in list order).
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputFiles {
    #[serde(default)]
    pub labeled_image: Option<PathBuf>,
    #[serde(default)]
    pub mask_image: Option<PathBuf>,
    #[serde(default)]
    pub filtered_image: Option<PathBuf>,
}

/// One classified anomaly region within the source image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Unique within the record; display/debugging only.
    pub id: u32,

    #[serde(rename = "type")]
    pub kind: FaultKind,

    /// In [0.0, 1.0].
    pub confidence: f64,

    pub bbox: BoundingBox,

    /// Derived from `bbox`; input values are never trusted.
    #[serde(default)]
    pub center: Center,
}

/// Axis-aligned box in source-image pixel coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Center of the box, integer pixel coordinates.
    pub fn center(&self) -> Center {
        Center {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }

    /// Intersect with an image of the given dimensions.
    ///
    /// Returns `None` when the box lies entirely outside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<ClampedBox> {
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(ClampedBox {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// A bounding box clipped to image bounds; coordinates are always valid
/// pixel indices for that image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Center {
    pub x: i32,
    pub y: i32,
}

/// Closed set of fault categories. Anything else deserializes to `Unknown`
/// and renders in the fallback color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    PointOverloadFaulty,
    PointOverloadPotential,
    WireOverload,
    FullWireOverload,
    LooseJointFaulty,
    LooseJointPotential,
    Normal,
    #[serde(other)]
    Unknown,
}

impl FaultKind {
    /// Human-readable label used for classification and overlay text.
    pub fn label(&self) -> &'static str {
        match self {
            FaultKind::PointOverloadFaulty => "Point Overload (Faulty)",
            FaultKind::PointOverloadPotential => "Point Overload (Potential)",
            FaultKind::WireOverload => "Wire Overload",
            FaultKind::FullWireOverload => "Full Wire Overload",
            FaultKind::LooseJointFaulty => "Loose Joint (Faulty)",
            FaultKind::LooseJointPotential => "Loose Joint (Potential)",
            FaultKind::Normal => "Normal",
            FaultKind::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Label for a detection list: the kind of the highest-confidence entry,
/// or "Normal" when the list is empty. The first of equally confident
/// detections wins, so the result is stable under re-serialization.
pub fn classification_label(detections: &[Detection]) -> String {
    let mut best: Option<&Detection> = None;
    for det in detections {
        match best {
            Some(b) if det.confidence <= b.confidence => {}
            _ => best = Some(det),
        }
    }
    best.map(|d| d.kind.label().to_string())
        .unwrap_or_else(|| FaultKind::Normal.label().to_string())
}
