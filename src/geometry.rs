use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in detector coordinate space (x, y is the
/// top-left corner).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Blend this box toward `target` by `factor` per coordinate:
    /// `self + factor * (target - self)`.
    pub fn lerp_toward(&self, target: &BoundingBox, factor: f32) -> BoundingBox {
        BoundingBox {
            x: lerp(self.x, target.x, factor),
            y: lerp(self.y, target.y, factor),
            w: lerp(self.w, target.w, factor),
            h: lerp(self.h, target.h, factor),
        }
    }
}

/// Pixel dimensions of a video surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// Linear interpolation between `a` and `b`.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Map a bounding box from the detector's coordinate space onto a display
/// surface. Pure scaling; callers own any letterboxing concerns.
pub fn to_display_box(
    bbox: &BoundingBox,
    source: Resolution,
    display: Resolution,
) -> BoundingBox {
    let sx = display.width as f32 / source.width as f32;
    let sy = display.height as f32 / source.height as f32;
    BoundingBox {
        x: bbox.x * sx,
        y: bbox.y * sy,
        w: bbox.w * sx,
        h: bbox.h * sy,
    }
}
