//! Pixel-space boxes and localizer regions.
//!
//! All coordinates are pixels with the origin at the top-left corner.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Polygon or point set returned by a localizer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub points: Vec<Point>,
}

impl Region {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn from_pairs(pairs: &[(f32, f32)]) -> Self {
        Self {
            points: pairs.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        }
    }

    /// Axis-aligned bounding box of the point set, `None` when the set is empty.
    ///
    /// Width and height are `max - min` over the points, so a region whose
    /// points share one column has zero width.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let first = self.points.first()?;
        let (mut x_min, mut y_min, mut x_max, mut y_max) = (first.x, first.y, first.x, first.y);
        for p in &self.points[1..] {
            x_min = x_min.min(p.x);
            y_min = y_min.min(p.y);
            x_max = x_max.max(p.x);
            y_max = y_max.max(p.y);
        }
        Some(BoundingBox::new(x_min, y_min, x_max - x_min, y_max - y_min))
    }
}

/// `(x, y, w, h)` box with `w, h >= 0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Negative extents are clamped to zero.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            x,
            y,
            w: w.max(0.0),
            h: h.max(0.0),
        }
    }

    /// Build from corner form `(x0, y0, x1, y1)`.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Corner form `(x0, y0, x1, y1)`, the shape trackers are prompted with.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.x + self.w, self.y + self.h)
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.h / 2.0
    }

    /// Bottom edge, `y + h`.
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }
}
