//! Heuristic grab verdict over the raw box sequence.
//!
//! A grab is an object that moves down and ends near the bottom edge. The
//! smoothness signal is reported but does not take part in the verdict.

use std::fmt;

use serde::Serialize;

use crate::geometry::BoundingBox;

pub const DEFAULT_OUT_OF_FRAME_THRESHOLD: f32 = 0.9;

/// Largest relative area change between consecutive boxes still counted as
/// smooth motion.
pub const MAX_RELATIVE_AREA_CHANGE: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleVerdict {
    Grab,
    Invalid,
}

impl RuleVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleVerdict::Grab => "grab",
            RuleVerdict::Invalid => "invalid",
        }
    }
}

impl fmt::Display for RuleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MotionSignals {
    /// The last box's vertical center is below the first one's.
    pub moving_down: bool,
    /// The last box's bottom edge reached `threshold * frame_height`.
    pub out_of_frame: bool,
    /// No consecutive area change reached `MAX_RELATIVE_AREA_CHANGE`.
    pub smooth_motion: bool,
}

/// Signals for a sequence, `None` with fewer than two boxes.
pub fn motion_signals(
    boxes: &[BoundingBox],
    frame_height: u32,
    threshold: f32,
) -> Option<MotionSignals> {
    let (first, last) = match boxes {
        [first, .., last] => (first, last),
        _ => return None,
    };

    let moving_down = last.center_y() > first.center_y();
    let out_of_frame = last.bottom() >= threshold * frame_height as f32;
    let smooth_motion = boxes.windows(2).all(|pair| {
        let (before, after) = (pair[0].area(), pair[1].area());
        // a zero prior area has no defined relative change
        before > 0.0 && (after - before).abs() / before < MAX_RELATIVE_AREA_CHANGE
    });

    log::debug!(
        "rules: center_y {:.1} -> {:.1}, bottom {:.1} (limit {:.1}); down={} out={} smooth={}",
        first.center_y(),
        last.center_y(),
        last.bottom(),
        threshold * frame_height as f32,
        moving_down,
        out_of_frame,
        smooth_motion
    );

    Some(MotionSignals {
        moving_down,
        out_of_frame,
        smooth_motion,
    })
}

/// `Grab` iff the object moved down and left through the bottom edge.
pub fn classify_rule(boxes: &[BoundingBox], frame_height: u32, threshold: f32) -> RuleVerdict {
    verdict_for(motion_signals(boxes, frame_height, threshold))
}

pub(crate) fn verdict_for(signals: Option<MotionSignals>) -> RuleVerdict {
    match signals {
        Some(s) if s.moving_down && s.out_of_frame => RuleVerdict::Grab,
        _ => RuleVerdict::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(x, y, w, h)
    }

    #[test]
    fn fewer_than_two_boxes_is_invalid() {
        assert_eq!(classify_rule(&[], 100, 0.9), RuleVerdict::Invalid);
        assert_eq!(
            classify_rule(&[b(0.0, 95.0, 10.0, 5.0)], 100, 0.9),
            RuleVerdict::Invalid
        );
        assert!(motion_signals(&[b(0.0, 0.0, 1.0, 1.0)], 100, 0.9).is_none());
    }

    #[test]
    fn drop_to_bottom_edge_is_grab() {
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(0.0, 90.0, 10.0, 10.0)];
        let signals = motion_signals(&boxes, 100, 0.9).unwrap();
        assert!(signals.moving_down);
        assert!(signals.out_of_frame);
        assert_eq!(classify_rule(&boxes, 100, 0.9), RuleVerdict::Grab);
    }

    #[test]
    fn stationary_box_is_invalid() {
        let boxes = vec![b(10.0, 10.0, 20.0, 20.0); 5];
        let signals = motion_signals(&boxes, 100, 0.9).unwrap();
        assert!(!signals.moving_down);
        assert!(signals.smooth_motion);
        assert_eq!(classify_rule(&boxes, 100, 0.9), RuleVerdict::Invalid);
    }

    #[test]
    fn classification_is_repeatable() {
        let boxes = [
            b(5.0, 10.0, 10.0, 10.0),
            b(5.0, 40.0, 10.0, 12.0),
            b(5.0, 88.0, 10.0, 9.0),
        ];
        let first = classify_rule(&boxes, 100, 0.9);
        assert_eq!(classify_rule(&boxes, 100, 0.9), first);
        assert_eq!(motion_signals(&boxes, 100, 0.9), motion_signals(&boxes, 100, 0.9));
    }

    #[test]
    fn all_three_signals_are_computed() {
        // area jumps 100 -> 400 between the first two boxes
        let boxes = [
            b(0.0, 0.0, 10.0, 10.0),
            b(0.0, 40.0, 20.0, 20.0),
            b(0.0, 80.0, 20.0, 20.0),
        ];
        let signals = motion_signals(&boxes, 100, 0.9).unwrap();
        assert_eq!(
            signals,
            MotionSignals {
                moving_down: true,
                out_of_frame: true,
                smooth_motion: false,
            }
        );
        // the smoothness signal does not gate the verdict
        assert_eq!(classify_rule(&boxes, 100, 0.9), RuleVerdict::Grab);
    }

    #[test]
    fn zero_prior_area_is_not_smooth() {
        let boxes = [b(0.0, 0.0, 10.0, 0.0), b(0.0, 5.0, 10.0, 0.0)];
        let signals = motion_signals(&boxes, 100, 0.9).unwrap();
        assert!(!signals.smooth_motion);
    }

    #[test]
    fn downward_motion_that_stays_inside_is_invalid() {
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(0.0, 50.0, 10.0, 10.0)];
        let signals = motion_signals(&boxes, 100, 0.9).unwrap();
        assert!(signals.moving_down);
        assert!(!signals.out_of_frame);
        assert_eq!(classify_rule(&boxes, 100, 0.9), RuleVerdict::Invalid);
    }

    #[test]
    fn threshold_is_inclusive() {
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(0.0, 65.0, 10.0, 10.0)];
        assert_eq!(classify_rule(&boxes, 100, 0.75), RuleVerdict::Grab);
        assert_eq!(classify_rule(&boxes, 100, 0.76), RuleVerdict::Invalid);
    }

    #[test]
    fn verdict_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RuleVerdict::Grab).unwrap(),
            "\"grab\""
        );
        assert_eq!(RuleVerdict::Invalid.to_string(), "invalid");
    }
}
