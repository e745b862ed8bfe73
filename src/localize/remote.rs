//! HTTP localizer client.
//!
//! Each frame is JPEG-encoded and posted as JSON:
//!
//! ```text
//! POST <url>
//! {"prompt": "<prompt>", "image": "<base64 jpeg>", "width": W, "height": H}
//! ```
//!
//! The service answers `{"regions": [{"points": [[x, y], ...]}, ...]}` with
//! pixel coordinates in the submitted frame. Any transport failure, non-2xx
//! status or malformed body is an error; nothing is retried here.

use std::io::{Cursor, Read};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Deserialize;
use url::Url;

use super::Localizer;
use crate::frame::Frame;
use crate::geometry::{Point, Region};

const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

/// Configuration for a remote localizer.
#[derive(Clone, Debug)]
pub struct RemoteLocalizerConfig {
    /// Detection endpoint, http(s) only.
    pub url: String,
    /// Text prompt naming the object to localize.
    pub prompt: String,
    pub timeout: Duration,
}

impl Default for RemoteLocalizerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8600/detect".to_string(),
            prompt: "box".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct RemoteLocalizer {
    endpoint: Url,
    prompt: String,
    agent: ureq::Agent,
}

impl RemoteLocalizer {
    pub fn new(config: RemoteLocalizerConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.url).context("parse localizer url")?;
        match endpoint.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported localizer scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            endpoint,
            prompt: config.prompt,
            agent,
        })
    }

    fn encode_frame(frame: &Frame) -> Result<String> {
        let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let mut jpeg = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .context("encode frame as jpeg")?;
        Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
    }
}

impl Localizer for RemoteLocalizer {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Region>> {
        let body = serde_json::json!({
            "prompt": self.prompt,
            "image": Self::encode_frame(frame)?,
            "width": frame.width(),
            "height": frame.height(),
        });
        let response = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json")
            .send_string(&body.to_string())
            .with_context(|| format!("call localizer at {}", self.endpoint))?;

        let mut raw = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut raw)
            .context("read localizer response")?;
        let regions = parse_regions(&raw)?;
        log::debug!(
            "RemoteLocalizer: frame {} -> {} regions",
            frame.index(),
            regions.len()
        );
        Ok(regions)
    }
}

#[derive(Deserialize)]
struct RegionsResponse {
    regions: Vec<RemoteRegion>,
}

#[derive(Deserialize)]
struct RemoteRegion {
    points: Vec<[f32; 2]>,
}

/// Parse a localizer response body.
pub fn parse_regions(body: &str) -> Result<Vec<Region>> {
    let parsed: RegionsResponse =
        serde_json::from_str(body).context("malformed localizer response")?;
    parsed
        .regions
        .into_iter()
        .enumerate()
        .map(|(i, region)| {
            if region.points.is_empty() {
                return Err(anyhow!("localizer region {} has no points", i));
            }
            if region
                .points
                .iter()
                .any(|[x, y]| !x.is_finite() || !y.is_finite())
            {
                return Err(anyhow!("localizer region {} has non-finite points", i));
            }
            Ok(Region::new(
                region
                    .points
                    .into_iter()
                    .map(|[x, y]| Point::new(x, y))
                    .collect(),
            ))
        })
        .collect()
}
