use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::slide::{DESIGN_HEIGHT, DESIGN_WIDTH};

/// An integer pixel rectangle on an output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Map a rectangle in design-canvas coordinates onto a `target_w` x `target_h` frame.
    pub fn from_design(x: f32, y: f32, width: f32, height: f32, target_w: u32, target_h: u32) -> Self {
        let sx = target_w as f32 / DESIGN_WIDTH as f32;
        let sy = target_h as f32 / DESIGN_HEIGHT as f32;
        Self {
            x: (x * sx).round() as i64,
            y: (y * sy).round() as i64,
            width: (width * sx).round().max(0.0) as u32,
            height: (height * sy).round().max(0.0) as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersect with a `w` x `h` frame; `None` when nothing is visible.
    pub fn clip_to(&self, w: u32, h: u32) -> Option<PixelRect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.width as i64).min(w as i64);
        let y1 = (self.y + self.height as i64).min(h as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
