//! Per-frame motion features derived from a box sequence.

use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};
use crate::geometry::BoundingBox;

/// Number of values in one feature vector.
pub const FEATURE_WIDTH: usize = 9;

/// Motion features for one tracked frame.
///
/// Positions and sizes are normalized by the frame size; displacement and
/// velocity stay in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FeatureVector {
    pub x_norm: f32,
    pub y_norm: f32,
    pub w_norm: f32,
    pub h_norm: f32,
    pub dx: f32,
    pub dy: f32,
    pub velocity: f32,
    pub aspect_ratio: f32,
    pub area_norm: f32,
}

impl FeatureVector {
    /// Values in model input order.
    pub fn to_array(&self) -> [f32; FEATURE_WIDTH] {
        [
            self.x_norm,
            self.y_norm,
            self.w_norm,
            self.h_norm,
            self.dx,
            self.dy,
            self.velocity,
            self.aspect_ratio,
            self.area_norm,
        ]
    }
}

/// Features for every box, index-aligned with `boxes`.
///
/// Displacement is taken between box origins; the first frame has none.
/// A zero frame dimension is rejected before anything else, even for an
/// empty sequence.
pub fn extract(
    boxes: &[BoundingBox],
    frame_width: u32,
    frame_height: u32,
) -> PipelineResult<Vec<FeatureVector>> {
    if frame_width == 0 || frame_height == 0 {
        return Err(PipelineError::InvalidDimensions {
            width: frame_width,
            height: frame_height,
        });
    }
    let (fw, fh) = (frame_width as f32, frame_height as f32);
    let frame_area = fw * fh;

    let mut previous: Option<&BoundingBox> = None;
    let features = boxes
        .iter()
        .map(|bbox| {
            let (dx, dy) = match previous {
                Some(prev) => (bbox.x - prev.x, bbox.y - prev.y),
                None => (0.0, 0.0),
            };
            previous = Some(bbox);
            FeatureVector {
                x_norm: bbox.x / fw,
                y_norm: bbox.y / fh,
                w_norm: bbox.w / fw,
                h_norm: bbox.h / fh,
                dx,
                dy,
                velocity: (dx * dx + dy * dy).sqrt(),
                aspect_ratio: if bbox.h == 0.0 { 0.0 } else { bbox.w / bbox.h },
                area_norm: bbox.area() / frame_area,
            }
        })
        .collect();
    Ok(features)
}
