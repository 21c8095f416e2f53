//! Inference collaborator boundary and first-run ingest.
//!
//! The anomaly model itself is external: anything implementing
//! [`InferenceEngine`] can be plugged in. It is invoked exactly once per
//! new source image, outside the regeneration loop; regeneration only ever
//! re-reads the record the ingest step wrote.

use std::path::Path;

use image::{GrayImage, RgbImage};
use thiserror::Error;

use crate::layout::ArtifactLayout;
use crate::publish::{PublishError, encode_gray_png, encode_png, publish_bytes};
use crate::record::{Detection, DetectionRecord, OutputFiles, classification_label};
use crate::render::render;

/// Raw per-pixel anomaly scores in [0.0, 1.0], row-major.
#[derive(Debug, Clone)]
pub struct ScoreMap {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl ScoreMap {
    /// Build a score map; `scores.len()` must be `width * height`.
    pub fn new(width: u32, height: u32, scores: Vec<f32>) -> Result<Self, InferError> {
        if scores.len() != (width as usize) * (height as usize) {
            return Err(InferError::Backend(format!(
                "score map is {} values for {width}x{height} image",
                scores.len()
            )));
        }
        Ok(Self {
            width,
            height,
            scores,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// 8-bit grayscale heat-map, scores clamped to [0, 1].
    pub fn to_mask(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let score = self.scores[(y * self.width + x) as usize];
            image::Luma([(score.clamp(0.0, 1.0) * 255.0) as u8])
        })
    }
}

/// The pretrained anomaly-detection model, seen from this crate.
pub trait InferenceEngine: Send + Sync {
    /// Score an image and propose an initial set of detections.
    ///
    /// Detection `id` and `center` values are assigned by the ingest step;
    /// implementations may leave them zeroed.
    fn infer(&self, image: &RgbImage) -> Result<(ScoreMap, Vec<Detection>), InferError>;
}

#[derive(Error, Debug)]
pub enum InferError {
    #[error("inference backend failed: {0}")]
    Backend(String),
}

/// Errors from the ingest pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("source image missing: {path}")]
    SourceImageMissing { path: std::path::PathBuf },

    #[error("cannot decode source image {path}: {source}")]
    SourceImageUnreadable {
        path: std::path::PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Infer(#[from] InferError),

    #[error("failed to publish artifact: {0}")]
    Publish(#[from] PublishError),

    #[error("failed to serialize record: {0}")]
    RecordSerialize(#[from] serde_json::Error),
}

/// Run the engine over one new source image and publish the full artifact
/// set: mask, labeled image, filtered image, and the detection record.
///
/// `processing_timestamp` is stamped here, once; regeneration never
/// recomputes it.
pub fn ingest_image(
    engine: &dyn InferenceEngine,
    image_path: &Path,
    layout: &ArtifactLayout,
) -> Result<DetectionRecord, IngestError> {
    if !image_path.exists() {
        return Err(IngestError::SourceImageMissing {
            path: image_path.to_path_buf(),
        });
    }
    let source = image::open(image_path)
        .map_err(|source| IngestError::SourceImageUnreadable {
            path: image_path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let (scores, mut detections) = engine.infer(&source)?;
    for (i, det) in detections.iter_mut().enumerate() {
        det.id = i as u32 + 1;
        det.center = det.bbox.center();
    }

    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();
    let image_filename = image_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(&stem)
        .to_string();

    let record = DetectionRecord {
        image_filename,
        image_path: image_path.to_path_buf(),
        processing_timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        classification: classification_label(&detections),
        total_detections: detections.len(),
        output_files: OutputFiles {
            labeled_image: Some(layout.labeled_path(&stem)),
            mask_image: Some(layout.mask_path(&stem)),
            filtered_image: Some(layout.filtered_path(&stem)),
        },
        detections,
    };

    let artifacts = render(&source, &record);
    publish_bytes(&layout.mask_path(&stem), &encode_gray_png(&scores.to_mask())?)?;
    publish_bytes(&layout.labeled_path(&stem), &encode_png(&artifacts.labeled)?)?;
    publish_bytes(
        &layout.filtered_path(&stem),
        &encode_png(&artifacts.filtered)?,
    )?;
    publish_bytes(
        &layout.record_path(&stem),
        &serde_json::to_vec_pretty(&record)?,
    )?;

    crate::log_event!(
        "ingest",
        "processed",
        "{} ({} detections, {})",
        record.image_filename,
        record.total_detections,
        record.classification
    );

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{BoundingBox, Center, FaultKind};
    use image::Rgb;
    use tempfile::TempDir;

    /// Fixed-output engine for exercising the ingest path.
    struct StubEngine {
        detections: Vec<Detection>,
    }

    impl InferenceEngine for StubEngine {
        fn infer(&self, image: &RgbImage) -> Result<(ScoreMap, Vec<Detection>), InferError> {
            let (w, h) = image.dimensions();
            let scores = ScoreMap::new(w, h, vec![0.0; (w * h) as usize])?;
            Ok((scores, self.detections.clone()))
        }
    }

    #[test]
    fn ingest_publishes_full_artifact_set() {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path().join("out"));

        let image_path = dir.path().join("tower3.png");
        RgbImage::from_pixel(64, 48, Rgb([90, 90, 90]))
            .save(&image_path)
            .unwrap();

        let engine = StubEngine {
            detections: vec![Detection {
                id: 0,
                kind: FaultKind::LooseJointPotential,
                confidence: 0.6,
                bbox: BoundingBox {
                    x: 4,
                    y: 4,
                    width: 10,
                    height: 10,
                },
                center: Center::default(),
            }],
        };

        let record = ingest_image(&engine, &image_path, &layout).unwrap();

        assert_eq!(record.total_detections, 1);
        assert_eq!(record.detections[0].id, 1);
        assert_eq!(record.detections[0].center, Center { x: 9, y: 9 });
        assert_eq!(record.classification, "Loose Joint (Potential)");

        assert!(layout.record_path("tower3").exists());
        assert!(layout.labeled_path("tower3").exists());
        assert!(layout.filtered_path("tower3").exists());
        assert!(layout.mask_path("tower3").exists());

        // the published record validates and round-trips
        let raw = std::fs::read(layout.record_path("tower3")).unwrap();
        let validated = crate::record::validate(&raw).unwrap();
        assert_eq!(validated.processing_timestamp, record.processing_timestamp);
    }

    #[test]
    fn score_map_rejects_wrong_length() {
        assert!(ScoreMap::new(4, 4, vec![0.0; 15]).is_err());
    }
}
