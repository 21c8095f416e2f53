//! Overlay rendering for detection records.
//!
//! Pure with respect to the filesystem: takes a decoded source image and a
//! validated record, returns the two derived images. Writing them is the
//! orchestrator's job. Rendering the same inputs twice produces
//! byte-identical pixel buffers.

mod font;

use image::{Rgb, RgbImage};

use crate::record::{ClampedBox, Detection, DetectionRecord, FaultKind};

/// The two images derived from a record.
#[derive(Debug)]
pub struct RenderedArtifacts {
    /// Source image with one outlined, labeled box per detection.
    pub labeled: RgbImage,
    /// Black image with source pixels copied inside the union of the
    /// (clamped) boxes.
    pub filtered: RgbImage,
}

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const OUTLINE_PX: u32 = 2;
const LABEL_PAD: u32 = 2;

/// Rectangle color for a fault kind. Every enumerated kind maps to exactly
/// one color; `Unknown` is the neutral fallback.
pub fn color_for(kind: FaultKind) -> Rgb<u8> {
    match kind {
        FaultKind::PointOverloadFaulty => Rgb([214, 39, 40]),
        FaultKind::PointOverloadPotential => Rgb([255, 127, 14]),
        FaultKind::WireOverload => Rgb([227, 26, 28]),
        FaultKind::FullWireOverload => Rgb([139, 0, 0]),
        FaultKind::LooseJointFaulty => Rgb([156, 39, 176]),
        FaultKind::LooseJointPotential => Rgb([255, 193, 7]),
        FaultKind::Normal => Rgb([44, 160, 44]),
        FaultKind::Unknown => Rgb([128, 128, 128]),
    }
}

/// Render the labeled and filtered images for a validated record.
///
/// Boxes are clamped to image bounds before drawing; a box partially
/// outside the image is clipped, never dropped, and one entirely outside
/// contributes nothing. Overlapping boxes are drawn in list order and
/// unioned in the filtered output.
pub fn render(source: &RgbImage, record: &DetectionRecord) -> RenderedArtifacts {
    let (width, height) = source.dimensions();
    let mut labeled = source.clone();
    let mut filtered = RgbImage::from_pixel(width, height, BACKGROUND);

    for det in &record.detections {
        let Some(clamped) = det.bbox.clamp_to(width, height) else {
            continue;
        };
        let color = color_for(det.kind);
        draw_box_outline(&mut labeled, clamped, color);
        draw_label(&mut labeled, det, clamped, color);
        copy_region(source, &mut filtered, clamped);
    }

    if record.detections.is_empty() {
        font::draw_text(&mut labeled, &record.classification, 8, 8, TEXT_COLOR);
    }

    RenderedArtifacts { labeled, filtered }
}

fn draw_box_outline(img: &mut RgbImage, b: ClampedBox, color: Rgb<u8>) {
    let thickness = OUTLINE_PX.min(b.width).min(b.height);
    for t in 0..thickness {
        let top = b.y + t;
        let bottom = b.y + b.height - 1 - t;
        for x in b.x..b.x + b.width {
            img.put_pixel(x, top, color);
            img.put_pixel(x, bottom, color);
        }
        let left = b.x + t;
        let right = b.x + b.width - 1 - t;
        for y in b.y..b.y + b.height {
            img.put_pixel(left, y, color);
            img.put_pixel(right, y, color);
        }
    }
}

/// Tag bar in the box color above the box's top-left corner, label text
/// over it. At the top edge the bar overlaps the box instead of vanishing.
fn draw_label(img: &mut RgbImage, det: &Detection, b: ClampedBox, color: Rgb<u8>) {
    let text = format!("{} ({:.2})", det.kind.label(), det.confidence);
    let bar_w = font::text_width(&text) + 2 * LABEL_PAD;
    let bar_h = font::GLYPH_SIZE + 2 * LABEL_PAD;
    let bar_y = b.y.saturating_sub(bar_h);
    fill_rect(img, b.x, bar_y, bar_w, bar_h, color);
    font::draw_text(img, &text, b.x + LABEL_PAD, bar_y + LABEL_PAD, TEXT_COLOR);
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let (img_w, img_h) = img.dimensions();
    for py in y..(y.saturating_add(h)).min(img_h) {
        for px in x..(x.saturating_add(w)).min(img_w) {
            img.put_pixel(px, py, color);
        }
    }
}

fn copy_region(source: &RgbImage, dest: &mut RgbImage, b: ClampedBox) {
    for y in b.y..b.y + b.height {
        for x in b.x..b.x + b.width {
            dest.put_pixel(x, y, *source.get_pixel(x, y));
        }
    }
}
