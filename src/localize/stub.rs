use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};

use super::Localizer;
use crate::frame::Frame;
use crate::geometry::Region;

/// Localizer with canned answers, keyed by frame index.
pub struct StubLocalizer {
    script: Script,
    calls: AtomicUsize,
}

enum Script {
    Always(Vec<Region>),
    PerFrame(Vec<Vec<Region>>),
    Fail(String),
}

impl StubLocalizer {
    /// Same regions for every frame.
    pub fn fixed(regions: Vec<Region>) -> Self {
        Self::with_script(Script::Always(regions))
    }

    /// Never finds anything.
    pub fn empty() -> Self {
        Self::fixed(Vec::new())
    }

    /// `per_frame[i]` is returned for frame `i`; later frames get nothing.
    pub fn scripted(per_frame: Vec<Vec<Region>>) -> Self {
        Self::with_script(Script::PerFrame(per_frame))
    }

    /// Every call fails, as an unreachable remote service would.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(message.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Localizer for StubLocalizer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Region>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Always(regions) => Ok(regions.clone()),
            Script::PerFrame(per_frame) => {
                Ok(per_frame.get(frame.index()).cloned().unwrap_or_default())
            }
            Script::Fail(message) => Err(anyhow!("{}", message)),
        }
    }
}
