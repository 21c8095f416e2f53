//! Schema validation for detection records.
//!
//! Pure function over raw bytes: no I/O, no clock, same input bytes always
//! yield the same result. Unknown top-level keys are tolerated (editors and
//! test harnesses inject scratch fields); the declared invariants are not.

use thiserror::Error;

use super::{DetectionRecord, classification_label};

/// Why a record was rejected.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The input is not well-formed JSON.
    #[error("record is not well-formed JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// Required fields are absent, of the wrong type, or the declared
    /// detection count disagrees with the list.
    #[error("schema violation: {reason}")]
    SchemaViolation { reason: String },

    /// A numeric field is outside its allowed range.
    #[error("detection {id}: {field} out of range ({value})")]
    OutOfRangeValue {
        id: u32,
        field: &'static str,
        value: f64,
    },
}

/// Parse and validate a detection record.
///
/// On success the returned record has `center` recomputed from `bbox` for
/// every detection and `classification` rederived from the detection list;
/// input-supplied values for either are discarded. `processing_timestamp`
/// passes through untouched.
pub fn validate(raw: &[u8]) -> Result<DetectionRecord, ValidationError> {
    let mut record: DetectionRecord = serde_json::from_slice(raw).map_err(|e| {
        use serde_json::error::Category;
        match e.classify() {
            Category::Syntax | Category::Eof => ValidationError::MalformedJson(e),
            _ => ValidationError::SchemaViolation {
                reason: e.to_string(),
            },
        }
    })?;

    if record.total_detections != record.detections.len() {
        return Err(ValidationError::SchemaViolation {
            reason: format!(
                "total_detections is {} but {} detections are listed",
                record.total_detections,
                record.detections.len()
            ),
        });
    }

    for det in &record.detections {
        if !det.confidence.is_finite() || !(0.0..=1.0).contains(&det.confidence) {
            return Err(ValidationError::OutOfRangeValue {
                id: det.id,
                field: "confidence",
                value: det.confidence,
            });
        }
        if det.bbox.width <= 0 {
            return Err(ValidationError::OutOfRangeValue {
                id: det.id,
                field: "bbox.width",
                value: det.bbox.width as f64,
            });
        }
        if det.bbox.height <= 0 {
            return Err(ValidationError::OutOfRangeValue {
                id: det.id,
                field: "bbox.height",
                value: det.bbox.height as f64,
            });
        }
    }

    for det in &mut record.detections {
        det.center = det.bbox.center();
    }
    record.classification = classification_label(&record.detections);

    Ok(record)
}
