//! In-process mask propagation by luma template matching.
//!
//! The prompt box is cut out of its frame as a luma template. On every later
//! frame the template is slid over a window around the previous position and
//! the best placement (mean absolute luma difference, with a small pull
//! towards the previous position) becomes the new box. Placements may hang
//! over the frame edge as long as a quarter of the template stays visible, so
//! an object leaving the frame keeps being tracked down to the edge. When the
//! best placement still differs by more than `max_mismatch` the object is
//! considered lost on that frame and an empty mask is emitted.
//!
//! Frames are streamed from the clip; the state holds the decoder and the
//! templates only.

use crate::clip::{open_decimated, ClipReader, ClipSource};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::geometry::BoundingBox;

use super::{Mask, MaskFrame, TrackerState, VideoPredictor};

pub const DEFAULT_SEARCH_RADIUS: u32 = 24;
/// Largest accepted search radius; each frame scans (2r+1)^2 placements.
pub const MAX_SEARCH_RADIUS: u32 = 128;
pub const DEFAULT_MAX_MISMATCH: f32 = 0.25;

const MIN_VISIBLE_FRACTION: f32 = 0.25;
const DISPLACEMENT_PENALTY: f32 = 1e-5;
// Templates are subsampled to at most this many samples per axis.
const MAX_SAMPLES_PER_AXIS: u32 = 16;

#[derive(Clone, Debug)]
pub struct TemplatePredictor {
    search_radius: u32,
    max_mismatch: f32,
}

impl TemplatePredictor {
    /// `search_radius` is capped at `MAX_SEARCH_RADIUS`.
    pub fn new(search_radius: u32, max_mismatch: f32) -> Self {
        Self {
            search_radius: search_radius.min(MAX_SEARCH_RADIUS),
            max_mismatch,
        }
    }
}

impl Default for TemplatePredictor {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_RADIUS, DEFAULT_MAX_MISMATCH)
    }
}

impl VideoPredictor for TemplatePredictor {
    fn name(&self) -> &'static str {
        "template"
    }

    fn init_state<'c>(
        &self,
        clip: &'c dyn ClipSource,
        frame_skip: usize,
    ) -> PipelineResult<Box<dyn TrackerState + 'c>> {
        let info = clip.info();
        if info.width == 0 || info.height == 0 {
            return Err(PipelineError::tracker_init(format!(
                "clip {} reports empty frame size {}x{}",
                clip.name(),
                info.width,
                info.height
            )));
        }
        let reader = open_decimated(clip, frame_skip).map_err(|e| {
            PipelineError::tracker_init(format!("open clip {}: {:#}", clip.name(), e))
        })?;
        log::debug!(
            "template tracker: state opened on {} ({}x{}, skip {})",
            clip.name(),
            info.width,
            info.height,
            frame_skip.max(1)
        );
        Ok(Box::new(TemplateState {
            reader: Some(reader),
            width: info.width,
            height: info.height,
            params: self.clone(),
            objects: Vec::new(),
            propagated: false,
        }))
    }
}

struct Template {
    width: u32,
    height: u32,
    step: u32,
    samples: u32,
    luma: Vec<f32>,
}

impl Template {
    fn cut(luma: &[f32], frame_width: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let (width, height) = (x1 - x0, y1 - y0);
        let mut cells = Vec::with_capacity((width * height) as usize);
        for row in y0..y1 {
            let start = (row * frame_width) as usize;
            cells.extend_from_slice(&luma[start + x0 as usize..start + x1 as usize]);
        }
        let step = (width.min(height) / MAX_SAMPLES_PER_AXIS).max(1);
        let samples = width.div_ceil(step) * height.div_ceil(step);
        Self {
            width,
            height,
            step,
            samples,
            luma: cells,
        }
    }

    /// Mean absolute difference with the template's top-left at `(cx, cy)`,
    /// over the visible part. `None` when too little of it is visible.
    fn mismatch(&self, luma: &[f32], frame_width: u32, frame_height: u32, cx: i32, cy: i32) -> Option<f32> {
        let mut total = 0.0f32;
        let mut count = 0u32;
        for ty in (0..self.height).step_by(self.step as usize) {
            let fy = cy + ty as i32;
            if fy < 0 || fy >= frame_height as i32 {
                continue;
            }
            let frame_row = fy as usize * frame_width as usize;
            let template_row = (ty * self.width) as usize;
            for tx in (0..self.width).step_by(self.step as usize) {
                let fx = cx + tx as i32;
                if fx < 0 || fx >= frame_width as i32 {
                    continue;
                }
                total += (luma[frame_row + fx as usize] - self.luma[template_row + tx as usize]).abs();
                count += 1;
            }
        }
        if count == 0 || (count as f32) < self.samples as f32 * MIN_VISIBLE_FRACTION {
            return None;
        }
        Some(total / count as f32)
    }
}

struct ObjectTrack {
    id: u32,
    prompt_frame: usize,
    prompt: BoundingBox,
    template: Option<Template>,
    position: (i32, i32),
}

impl ObjectTrack {
    fn start(&mut self, luma: &[f32], width: u32, height: u32) -> Mask {
        let Some((x0, y0, x1, y1)) = pixel_rect(&self.prompt, width, height) else {
            return Mask::empty(width, height);
        };
        self.template = Some(Template::cut(luma, width, x0, y0, x1, y1));
        self.position = (x0 as i32, y0 as i32);
        Mask::from_rect(width, height, x0 as i32, y0 as i32, x1 as i32, y1 as i32)
    }

    fn follow(&mut self, luma: &[f32], width: u32, height: u32, params: &TemplatePredictor) -> Mask {
        let Some(template) = &self.template else {
            return Mask::empty(width, height);
        };
        let (px, py) = self.position;
        let radius = params.search_radius.min(width.max(height)) as i32;

        let mut best: Option<(f32, f32, i32, i32)> = None;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let (cx, cy) = (px + dx, py + dy);
                let Some(raw) = template.mismatch(luma, width, height, cx, cy) else {
                    continue;
                };
                let score = raw + DISPLACEMENT_PENALTY * (dx * dx + dy * dy) as f32;
                if best.map_or(true, |(b, ..)| score < b) {
                    best = Some((score, raw, cx, cy));
                }
            }
        }

        match best {
            Some((_, raw, cx, cy)) if raw <= params.max_mismatch => {
                self.position = (cx, cy);
                Mask::from_rect(
                    width,
                    height,
                    cx,
                    cy,
                    cx + template.width as i32,
                    cy + template.height as i32,
                )
            }
            Some((_, raw, ..)) => {
                log::debug!(
                    "template tracker: object {} lost (mismatch {:.3})",
                    self.id,
                    raw
                );
                Mask::empty(width, height)
            }
            None => Mask::empty(width, height),
        }
    }
}

struct TemplateState<'c> {
    reader: Option<Box<dyn ClipReader + 'c>>,
    width: u32,
    height: u32,
    params: TemplatePredictor,
    objects: Vec<ObjectTrack>,
    propagated: bool,
}

impl TemplateState<'_> {
    fn step(&mut self, frame: &Frame) -> PipelineResult<MaskFrame> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(PipelineError::clip(format!(
                "frame {} is {}x{}, clip reports {}x{}",
                frame.index(),
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let luma = frame.luma();
        let (width, height) = (self.width, self.height);
        let mut masks = Vec::with_capacity(self.objects.len());
        for object in &mut self.objects {
            if frame.index() < object.prompt_frame {
                continue;
            }
            let mask = if frame.index() == object.prompt_frame {
                object.start(&luma, width, height)
            } else {
                object.follow(&luma, width, height, &self.params)
            };
            masks.push((object.id, mask));
        }
        Ok(MaskFrame {
            frame_index: frame.index(),
            masks,
        })
    }
}

impl TrackerState for TemplateState<'_> {
    fn add_box(
        &mut self,
        frame_index: usize,
        object_id: u32,
        bbox: BoundingBox,
    ) -> PipelineResult<()> {
        if self.reader.is_none() {
            return Err(PipelineError::tracker_init("tracker state already released"));
        }
        if self.propagated {
            return Err(PipelineError::tracker_init(
                "box prompts must be added before propagation",
            ));
        }
        if pixel_rect(&bbox, self.width, self.height).is_none() {
            return Err(PipelineError::tracker_init(format!(
                "seed box {:?} does not overlap the {}x{} frame",
                bbox, self.width, self.height
            )));
        }
        self.objects.retain(|o| o.id != object_id);
        self.objects.push(ObjectTrack {
            id: object_id,
            prompt_frame: frame_index,
            prompt: bbox,
            template: None,
            position: (0, 0),
        });
        Ok(())
    }

    fn propagate(&mut self) -> Box<dyn Iterator<Item = PipelineResult<MaskFrame>> + '_> {
        if self.propagated {
            return Box::new(std::iter::empty());
        }
        self.propagated = true;
        Box::new(Propagation { state: self })
    }

    fn release(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("template tracker: state released");
        }
        self.objects.clear();
    }
}

struct Propagation<'s, 'c> {
    state: &'s mut TemplateState<'c>,
}

impl Iterator for Propagation<'_, '_> {
    type Item = PipelineResult<MaskFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.state.reader.as_mut()?;
        match reader.next_frame() {
            Ok(Some(frame)) => Some(self.state.step(&frame)),
            Ok(None) => None,
            Err(e) => {
                self.state.reader = None;
                Some(Err(PipelineError::clip(format!("{:#}", e))))
            }
        }
    }
}

/// Integer pixel rectangle `[x0, x1) x [y0, y1)` covering `bbox`, clipped to
/// the frame. `None` when nothing of it is inside.
fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let (bx0, by0, bx1, by1) = bbox.corners();
    let x0 = bx0.floor().max(0.0);
    let y0 = by0.floor().max(0.0);
    let x1 = bx1.ceil().min(width as f32);
    let y1 = by1.ceil().min(height as f32);
    if !(x0 < x1 && y0 < y1) {
        return None;
    }
    Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{SquareMotion, SyntheticClip};
    use crate::track::{track, TrackOptions};

    fn falling() -> SyntheticClip {
        SyntheticClip::moving_square(
            "falling",
            64,
            96,
            10,
            SquareMotion {
                size: 12,
                start: (26, 10),
                step: (0, 10),
            },
        )
    }

    #[test]
    fn follows_square_down_to_frame_edge() {
        let clip = falling();
        let seed = BoundingBox::new(26.0, 10.0, 12.0, 12.0);
        let tracked = track(
            &TemplatePredictor::default(),
            &clip,
            &seed,
            &TrackOptions::default(),
            None,
        )
        .unwrap();

        // frame 9 has the square fully below the frame
        assert_eq!(tracked.frames_seen, 10);
        assert_eq!(tracked.boxes.len(), 9);
        assert_eq!(tracked.empty_frames, 1);
        for (i, bbox) in tracked.boxes.iter().take(8).enumerate() {
            assert_eq!(bbox.x, 26.0);
            assert_eq!(bbox.y, 10.0 + 10.0 * i as f32);
            assert_eq!(bbox.h, 11.0);
        }
        let last = tracked.boxes.last().unwrap();
        assert_eq!(last.y, 90.0);
        assert_eq!(last.bottom(), 95.0);
    }

    #[test]
    fn decimated_tracking_sees_fewer_frames() {
        let clip = falling();
        let seed = BoundingBox::new(26.0, 10.0, 12.0, 12.0);
        let options = TrackOptions {
            frame_skip: 2,
            deadline: None,
        };
        let tracked = track(&TemplatePredictor::default(), &clip, &seed, &options, None).unwrap();
        assert_eq!(tracked.frames_seen, 5);
        assert_eq!(tracked.boxes.len(), 5);
        assert_eq!(tracked.boxes[1].y, 30.0);
    }

    #[test]
    fn oversized_radius_is_capped() {
        let predictor = TemplatePredictor::new(u32::MAX, DEFAULT_MAX_MISMATCH);
        assert_eq!(predictor.search_radius, MAX_SEARCH_RADIUS);

        let clip = falling();
        let seed = BoundingBox::new(26.0, 10.0, 12.0, 12.0);
        let tracked = track(&predictor, &clip, &seed, &TrackOptions::default(), None).unwrap();
        assert_eq!(tracked.boxes.len(), 9);
        assert_eq!(tracked.boxes[1].y, 20.0);
    }

    #[test]
    fn stationary_object_yields_constant_boxes() {
        let clip = SyntheticClip::moving_square(
            "still",
            40,
            40,
            5,
            SquareMotion {
                size: 8,
                start: (10, 10),
                step: (0, 0),
            },
        );
        let seed = BoundingBox::new(10.0, 10.0, 8.0, 8.0);
        let tracked = track(
            &TemplatePredictor::default(),
            &clip,
            &seed,
            &TrackOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(tracked.boxes.len(), 5);
        assert!(tracked.boxes.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn seed_outside_frame_fails_init() {
        let clip = falling();
        let seed = BoundingBox::new(500.0, 500.0, 10.0, 10.0);
        let err = track(
            &TemplatePredictor::default(),
            &clip,
            &seed,
            &TrackOptions::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "tracker_init_failure");
    }

    #[test]
    fn propagation_is_single_pass() {
        let clip = falling();
        let predictor = TemplatePredictor::default();
        let mut state = predictor.init_state(&clip, 1).unwrap();
        state
            .add_box(0, 0, BoundingBox::new(26.0, 10.0, 12.0, 12.0))
            .unwrap();
        assert_eq!(state.propagate().count(), 10);
        assert_eq!(state.propagate().count(), 0);
        assert!(state
            .add_box(0, 1, BoundingBox::new(0.0, 0.0, 4.0, 4.0))
            .is_err());
        state.release();
        state.release();
    }

    #[test]
    fn released_state_rejects_prompts() {
        let clip = falling();
        let mut state = TemplatePredictor::default().init_state(&clip, 1).unwrap();
        state.release();
        assert!(state
            .add_box(0, 0, BoundingBox::new(26.0, 10.0, 12.0, 12.0))
            .is_err());
        assert_eq!(state.propagate().count(), 0);
    }
}
