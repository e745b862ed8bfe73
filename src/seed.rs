//! Seed search: localize the object in the first frames of a clip.

use crate::clip::ClipReader;
use crate::error::{PipelineError, PipelineResult};
use crate::geometry::BoundingBox;
use crate::localize::Localizer;
use crate::pipeline::Deadline;

/// Frames scanned for a seed unless configured otherwise.
pub const DEFAULT_SEED_FRAMES: usize = 5;

/// The box tracking starts from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Seed {
    /// Frame the region was found on.
    pub frame_index: usize,
    pub bbox: BoundingBox,
    /// Number of candidate regions on that frame.
    pub candidates: usize,
}

/// Scan up to `max_frames` frames from `reader` and return the first region of
/// the first frame with any region.
///
/// Consumes frames from the reader; tracking must open a fresh one. With a
/// `deadline`, it is checked before every localizer call.
pub fn find_seed(
    reader: &mut dyn ClipReader,
    localizer: &dyn Localizer,
    max_frames: usize,
    deadline: Option<&Deadline>,
) -> PipelineResult<Seed> {
    let mut scanned = 0usize;
    while scanned < max_frames {
        if let Some(deadline) = deadline {
            deadline.check()?;
        }
        let frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::warn!("clip ended after {} frames during seed search", scanned);
                break;
            }
            Err(e) => {
                return Err(PipelineError::clip(format!(
                    "failed to read frame {}: {:#}",
                    scanned + 1,
                    e
                )))
            }
        };
        scanned += 1;

        let regions = localizer
            .detect(&frame)
            .map_err(|e| PipelineError::localizer(format!("{}: {:#}", localizer.name(), e)))?;
        let Some(first) = regions.first() else {
            continue;
        };
        let bbox = first.bounding_box().ok_or_else(|| {
            PipelineError::localizer(format!(
                "{} returned a region without points on frame {}",
                localizer.name(),
                frame.index()
            ))
        })?;
        log::info!(
            "seed found on frame {} ({} candidates): {:?}",
            frame.index(),
            regions.len(),
            bbox
        );
        return Ok(Seed {
            frame_index: frame.index(),
            bbox,
            candidates: regions.len(),
        });
    }

    log::info!("no seed region in first {} frames", scanned);
    Err(PipelineError::SeedNotFound {
        frames_scanned: scanned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{ClipSource, SyntheticClip};
    use crate::geometry::Region;
    use crate::localize::StubLocalizer;
    use std::time::Duration;

    fn square(x: f32, y: f32, size: f32) -> Region {
        Region::from_pairs(&[(x, y), (x + size, y), (x + size, y + size), (x, y + size)])
    }

    #[test]
    fn returns_first_region_of_first_hit() {
        let clip = SyntheticClip::blank("c", 32, 32, 8);
        let stub = StubLocalizer::scripted(vec![
            vec![],
            vec![],
            vec![square(4.0, 6.0, 10.0), square(20.0, 20.0, 2.0)],
        ]);
        let mut reader = clip.open().unwrap();
        let seed = find_seed(reader.as_mut(), &stub, 5, None).unwrap();
        assert_eq!(seed.frame_index, 2);
        assert_eq!(seed.bbox, BoundingBox::new(4.0, 6.0, 10.0, 10.0));
        assert_eq!(seed.candidates, 2);
        assert_eq!(stub.calls(), 3);
        // the reader was advanced past the seed frame
        assert_eq!(reader.next_frame().unwrap().unwrap().index(), 3);
    }

    #[test]
    fn gives_up_after_max_frames() {
        let clip = SyntheticClip::blank("c", 16, 16, 10);
        let stub = StubLocalizer::empty();
        let mut reader = clip.open().unwrap();
        let err = find_seed(reader.as_mut(), &stub, 5, None).unwrap_err();
        assert!(matches!(err, PipelineError::SeedNotFound { frames_scanned: 5 }));
        assert_eq!(stub.calls(), 5);
    }

    #[test]
    fn short_clip_reports_frames_actually_read() {
        let clip = SyntheticClip::blank("c", 16, 16, 2);
        let stub = StubLocalizer::empty();
        let mut reader = clip.open().unwrap();
        let err = find_seed(reader.as_mut(), &stub, 5, None).unwrap_err();
        assert!(matches!(err, PipelineError::SeedNotFound { frames_scanned: 2 }));
    }

    #[test]
    fn region_beyond_budget_is_not_seen() {
        let clip = SyntheticClip::blank("c", 16, 16, 10);
        let mut script = vec![Vec::new(); 6];
        script[5] = vec![square(1.0, 1.0, 3.0)];
        let stub = StubLocalizer::scripted(script);
        let mut reader = clip.open().unwrap();
        assert!(find_seed(reader.as_mut(), &stub, 5, None).is_err());
    }

    #[test]
    fn localizer_failure_is_terminal() {
        let clip = SyntheticClip::blank("c", 16, 16, 10);
        let stub = StubLocalizer::failing("connection refused");
        let mut reader = clip.open().unwrap();
        let err = find_seed(reader.as_mut(), &stub, 5, None).unwrap_err();
        assert_eq!(err.code(), "localizer_unavailable");
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(stub.calls(), 1);
    }

    #[test]
    fn pointless_region_is_malformed() {
        let clip = SyntheticClip::blank("c", 16, 16, 3);
        let stub = StubLocalizer::fixed(vec![Region::default()]);
        let mut reader = clip.open().unwrap();
        let err = find_seed(reader.as_mut(), &stub, 5, None).unwrap_err();
        assert_eq!(err.code(), "localizer_unavailable");
    }

    #[test]
    fn expired_deadline_stops_before_the_next_frame() {
        let clip = SyntheticClip::blank("c", 16, 16, 10);
        let stub = StubLocalizer::empty();
        let mut reader = clip.open().unwrap();
        let deadline = Deadline::after(Duration::ZERO);
        let err = find_seed(reader.as_mut(), &stub, 5, Some(&deadline)).unwrap_err();
        assert_eq!(err.code(), "deadline_exceeded");
        assert_eq!(stub.calls(), 0);

        let mut reader = clip.open().unwrap();
        let deadline = Deadline::after(Duration::from_secs(600));
        let err = find_seed(reader.as_mut(), &stub, 5, Some(&deadline)).unwrap_err();
        assert!(matches!(err, PipelineError::SeedNotFound { frames_scanned: 5 }));
    }
}
