//! Burns detection boxes and labels into frames.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use reefwatch_core::detection::Detection;

use crate::error::ConfigError;

/// Box outline width in pixels.
const LINE_WIDTH: u32 = 2;
/// Horizontal/vertical padding around label text.
const LABEL_PADDING: u32 = 3;
const MIN_FONT_PX: f32 = 14.0;

/// Ultralytics-like palette. A label always maps to the same color.
const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
];

pub struct Overlay {
    font: Option<FontArc>,
}

impl Overlay {
    /// Overlay that renders label text with the TTF/OTF font at `path`.
    pub fn with_font_file(path: &Path) -> Result<Self, ConfigError> {
        let font_err = |message: String| ConfigError::Font {
            path: path.to_string_lossy().to_string(),
            message,
        };
        let bytes = std::fs::read(path).map_err(|e| font_err(e.to_string()))?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| font_err(e.to_string()))?;
        Ok(Self { font: Some(font) })
    }

    /// Overlay that draws boxes and label tabs without text.
    pub fn boxes_only() -> Self {
        Self { font: None }
    }

    /// Draw every detection onto `frame` in place.
    pub fn draw(&self, frame: &mut RgbImage, detections: &[Detection]) {
        let (fw, fh) = frame.dimensions();
        let scale = PxScale::from((fh as f32 / 40.0).max(MIN_FONT_PX));

        for detection in detections {
            let color = label_color(&detection.label);
            let Some(rect) = pixel_rect(detection, fw, fh) else {
                continue;
            };

            for inset in 0..LINE_WIDTH {
                if rect.width() <= 2 * inset || rect.height() <= 2 * inset {
                    break;
                }
                let r = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32)
                    .of_size(rect.width() - 2 * inset, rect.height() - 2 * inset);
                draw_hollow_rect_mut(frame, r, color);
            }

            let text = label_text(detection);
            let (tw, th) = match &self.font {
                Some(font) => text_size(scale, font, &text),
                None => (rect.width().min(40), 6),
            };
            let tab_w = (tw + 2 * LABEL_PADDING).min(fw);
            let tab_h = (th + 2 * LABEL_PADDING).min(fh);

            // Above the box when there is room, otherwise just inside it.
            let tab_y = if rect.top() >= tab_h as i32 {
                rect.top() - tab_h as i32
            } else {
                rect.top()
            };
            let tab_x = rect.left().min(fw as i32 - tab_w as i32).max(0);
            draw_filled_rect_mut(frame, Rect::at(tab_x, tab_y).of_size(tab_w, tab_h), color);

            if let Some(font) = &self.font {
                draw_text_mut(
                    frame,
                    text_color(color),
                    tab_x + LABEL_PADDING as i32,
                    tab_y + LABEL_PADDING as i32,
                    scale,
                    font,
                    &text,
                );
            }
        }
    }
}

/// `"<label> <confidence>"` with two decimals.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {:.2}", detection.label, detection.confidence)
}

/// Stable color for a label (FNV-1a over its bytes into the palette).
pub fn label_color(label: &str) -> Rgb<u8> {
    let hash = label
        .bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
    Rgb(PALETTE[hash as usize % PALETTE.len()])
}

fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// Integer pixel rectangle for a detection, or `None` when it is empty
/// after clamping to the frame.
fn pixel_rect(detection: &Detection, fw: u32, fh: u32) -> Option<Rect> {
    let b = detection.bbox.clamp(fw as f32, fh as f32);
    let x1 = b.x1.floor() as i32;
    let y1 = b.y1.floor() as i32;
    let x2 = (b.x2.ceil() as i32).min(fw as i32);
    let y2 = (b.y2.ceil() as i32).min(fh as i32);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32))
}
