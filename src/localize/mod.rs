//! Object localizers used to seed tracking.
//!
//! - `StubLocalizer`: scripted regions, no I/O (tests, demo clips)
//! - `RemoteLocalizer`: HTTP detection service (feature: localizer-remote)

#[cfg(feature = "localizer-remote")]
pub mod remote;
pub mod stub;

use anyhow::Result;

use crate::frame::Frame;
use crate::geometry::Region;

#[cfg(feature = "localizer-remote")]
pub use remote::{RemoteLocalizer, RemoteLocalizerConfig};
pub use stub::StubLocalizer;

/// Finds candidate object regions in a single frame.
///
/// Localizers are shared across concurrent requests and must not keep
/// per-request state. Errors are reported to the caller as
/// `LocalizerUnavailable`; retries are the caller's business.
pub trait Localizer: Send + Sync {
    /// Localizer identifier.
    fn name(&self) -> &'static str;

    /// Candidate regions in `frame`, best first. Empty when nothing was found.
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>>;
}
