use nalgebra::Vector4;
use opencv::core::{Point2d, Rect};

use crate::EntityClass;

mod bytetracker;
mod kalman_filter;
mod strack;

pub use bytetracker::ByteTracker;
pub use strack::STrack;

/// A single detector output in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    bbox: Rect,
    class: EntityClass,
    score: f32,
}

impl Detection {
    pub fn new(bbox: Rect, class: EntityClass, score: f32) -> Self {
        Self { bbox, class, score }
    }

    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    pub fn class(&self) -> &EntityClass {
        &self.class
    }

    pub fn score(&self) -> f32 {
        self.score
    }
}

/// The center of `rect` in sub-pixel precision.
pub fn centroid(rect: Rect) -> Point2d {
    Point2d::new(
        rect.x as f64 + rect.width as f64 / 2.0,
        rect.y as f64 + rect.height as f64 / 2.0,
    )
}

fn tlwh_to_xyah(tlwh: [f32; 4]) -> Vector4<f32> {
    let cx = tlwh[0] + tlwh[2] / 2.0;
    let cy = tlwh[1] + tlwh[3] / 2.0;
    let a = tlwh[2] / tlwh[3];
    let h = tlwh[3];
    Vector4::new(cx, cy, a, h)
}
