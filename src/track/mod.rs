//! Temporal tracking: seed box in, one box per tracked frame out.
//!
//! The tracker itself is a `VideoPredictor`: something that, given a clip and
//! a box prompt, propagates a per-frame pixel mask through the clip. This
//! module only reduces those masks to boxes, so any mask-producing tracker can
//! be plugged in.
//!
//! Tracker state is request-scoped. `track` creates it, propagates exactly once
//! and releases it on every exit path, including errors and deadline expiry.

mod mask;
pub mod template;

use crate::clip::ClipSource;
use crate::error::PipelineResult;
use crate::geometry::BoundingBox;
use crate::pipeline::Deadline;
use crate::visualize::Visualizer;

pub use mask::Mask;
pub use template::TemplatePredictor;

/// Object id the seed box is registered under. Masks for other ids are ignored.
pub const TRACKED_OBJECT_ID: u32 = 0;

/// Masks produced for one frame.
#[derive(Clone, Debug)]
pub struct MaskFrame {
    pub frame_index: usize,
    /// `(object_id, mask)` pairs.
    pub masks: Vec<(u32, Mask)>,
}

/// Factory for request-scoped tracker state.
pub trait VideoPredictor: Send + Sync {
    /// Predictor identifier.
    fn name(&self) -> &'static str;

    /// Prepare a fresh state over `clip`, seeing every `frame_skip`-th frame.
    fn init_state<'c>(
        &self,
        clip: &'c dyn ClipSource,
        frame_skip: usize,
    ) -> PipelineResult<Box<dyn TrackerState + 'c>>;
}

/// Working memory of one tracking run.
pub trait TrackerState {
    /// Register a box prompt for `object_id` on `frame_index`.
    fn add_box(&mut self, frame_index: usize, object_id: u32, bbox: BoundingBox)
        -> PipelineResult<()>;

    /// Masks for each frame, in frame order.
    ///
    /// Single pass: a second call yields nothing.
    fn propagate(&mut self) -> Box<dyn Iterator<Item = PipelineResult<MaskFrame>> + '_>;

    /// Drop frame buffers and any other held resources. Idempotent.
    fn release(&mut self);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TrackOptions {
    pub frame_skip: usize,
    pub deadline: Option<Deadline>,
}

/// Output of one tracking run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tracked {
    /// One box per frame where the tracked mask was non-empty, in frame order.
    pub boxes: Vec<BoundingBox>,
    /// Frames yielded by the predictor.
    pub frames_seen: usize,
    /// Frames skipped because the tracked mask was empty or missing.
    pub empty_frames: usize,
}

struct StateGuard<'c> {
    state: Box<dyn TrackerState + 'c>,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.state.release();
    }
}

/// Track the object in `seed` through `clip`.
///
/// The seed is always registered on frame 0 as object `TRACKED_OBJECT_ID`.
/// When a visualizer is given it sees every propagated frame; it cannot
/// influence the returned boxes.
pub fn track(
    predictor: &dyn VideoPredictor,
    clip: &dyn ClipSource,
    seed: &BoundingBox,
    options: &TrackOptions,
    mut visualizer: Option<&mut Visualizer<'_>>,
) -> PipelineResult<Tracked> {
    let mut guard = StateGuard {
        state: predictor.init_state(clip, options.frame_skip)?,
    };
    guard.state.add_box(0, TRACKED_OBJECT_ID, *seed)?;

    let mut tracked = Tracked::default();
    for item in guard.state.propagate() {
        let mask_frame = item?;
        if let Some(deadline) = &options.deadline {
            deadline.check()?;
        }
        tracked.frames_seen += 1;

        let mask = mask_frame
            .masks
            .iter()
            .find(|(id, _)| *id == TRACKED_OBJECT_ID)
            .map(|(_, mask)| mask);
        let bbox = mask.and_then(Mask::extent);
        match bbox {
            Some(bbox) => tracked.boxes.push(bbox),
            None => tracked.empty_frames += 1,
        }

        if let Some(vis) = visualizer.as_deref_mut() {
            vis.observe(mask_frame.frame_index, mask.zip(bbox.as_ref()));
        }
    }

    log::info!(
        "{}: tracked {} of {} frames ({} empty masks skipped)",
        predictor.name(),
        tracked.boxes.len(),
        tracked.frames_seen,
        tracked.empty_frames
    );
    Ok(tracked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::SyntheticClip;
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Replays fixed masks and records release.
    struct Replay {
        frames: Vec<MaskFrame>,
        fail_at: Option<usize>,
        released: Arc<AtomicBool>,
    }

    struct ReplayState {
        frames: Vec<MaskFrame>,
        fail_at: Option<usize>,
        released: Arc<AtomicBool>,
        seeded: bool,
    }

    impl VideoPredictor for Replay {
        fn name(&self) -> &'static str {
            "replay"
        }

        fn init_state<'c>(
            &self,
            _clip: &'c dyn ClipSource,
            _frame_skip: usize,
        ) -> PipelineResult<Box<dyn TrackerState + 'c>> {
            Ok(Box::new(ReplayState {
                frames: self.frames.clone(),
                fail_at: self.fail_at,
                released: self.released.clone(),
                seeded: false,
            }))
        }
    }

    impl TrackerState for ReplayState {
        fn add_box(&mut self, _: usize, _: u32, _: BoundingBox) -> PipelineResult<()> {
            self.seeded = true;
            Ok(())
        }

        fn propagate(&mut self) -> Box<dyn Iterator<Item = PipelineResult<MaskFrame>> + '_> {
            assert!(self.seeded);
            let fail_at = self.fail_at;
            Box::new(
                std::mem::take(&mut self.frames)
                    .into_iter()
                    .enumerate()
                    .map(move |(i, frame)| {
                        if Some(i) == fail_at {
                            Err(PipelineError::clip("decode error"))
                        } else {
                            Ok(frame)
                        }
                    }),
            )
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn rect_mask(x0: i32, y0: i32, x1: i32, y1: i32) -> Mask {
        Mask::from_rect(20, 20, x0, y0, x1, y1)
    }

    fn replay(frames: Vec<MaskFrame>, fail_at: Option<usize>) -> (Replay, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        (
            Replay {
                frames,
                fail_at,
                released: released.clone(),
            },
            released,
        )
    }

    #[test]
    fn empty_masks_are_skipped_and_other_objects_ignored() {
        let frames = vec![
            MaskFrame {
                frame_index: 0,
                masks: vec![(0, rect_mask(2, 2, 6, 6)), (1, rect_mask(10, 10, 12, 12))],
            },
            MaskFrame {
                frame_index: 1,
                masks: vec![(0, Mask::empty(20, 20))],
            },
            MaskFrame {
                frame_index: 2,
                masks: vec![(1, rect_mask(0, 0, 3, 3))],
            },
            MaskFrame {
                frame_index: 3,
                masks: vec![(0, rect_mask(4, 8, 9, 10))],
            },
        ];
        let (predictor, released) = replay(frames, None);
        let clip = SyntheticClip::blank("c", 20, 20, 4);
        let seed = BoundingBox::new(2.0, 2.0, 4.0, 4.0);
        let tracked = track(&predictor, &clip, &seed, &TrackOptions::default(), None).unwrap();

        assert_eq!(
            tracked.boxes,
            vec![
                BoundingBox::new(2.0, 2.0, 3.0, 3.0),
                BoundingBox::new(4.0, 8.0, 4.0, 1.0)
            ]
        );
        assert_eq!(tracked.frames_seen, 4);
        assert_eq!(tracked.empty_frames, 2);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn state_is_released_when_propagation_fails() {
        let frames = (0..3)
            .map(|i| MaskFrame {
                frame_index: i,
                masks: vec![(0, rect_mask(1, 1, 4, 4))],
            })
            .collect();
        let (predictor, released) = replay(frames, Some(1));
        let clip = SyntheticClip::blank("c", 20, 20, 3);
        let seed = BoundingBox::new(1.0, 1.0, 3.0, 3.0);
        let err = track(&predictor, &clip, &seed, &TrackOptions::default(), None).unwrap_err();
        assert_eq!(err.code(), "clip_unreadable");
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn expired_deadline_aborts_and_releases() {
        let frames = vec![MaskFrame {
            frame_index: 0,
            masks: vec![(0, rect_mask(1, 1, 4, 4))],
        }];
        let (predictor, released) = replay(frames, None);
        let clip = SyntheticClip::blank("c", 20, 20, 1);
        let options = TrackOptions {
            frame_skip: 1,
            deadline: Some(Deadline::after(Duration::ZERO)),
        };
        let seed = BoundingBox::new(1.0, 1.0, 3.0, 3.0);
        let err = track(&predictor, &clip, &seed, &options, None).unwrap_err();
        assert!(matches!(err, PipelineError::DeadlineExceeded { .. }));
        assert!(released.load(Ordering::SeqCst));
    }
}
