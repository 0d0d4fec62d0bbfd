//! Synthetic frame stream for `stub://` addresses.
//!
//! Produces deterministic gradient frames without touching any device or network.
//! Query parameters:
//! - `frames=N`: end the stream after N frames (unbounded when absent)
//! - `width=W`, `height=H`: frame dimensions (default 320x240, at most 8192 each)

use anyhow::{anyhow, Result};
use url::Url;

use super::FrameStream;
use crate::frame::Frame;

const DEFAULT_STUB_WIDTH: u32 = 320;
const DEFAULT_STUB_HEIGHT: u32 = 240;
pub const MAX_STUB_DIMENSION: u32 = 8192;

/// Configuration for a synthetic stream.
#[derive(Clone, Debug)]
pub struct StubConfig {
    pub name: String,
    pub frame_limit: Option<u64>,
    pub width: u32,
    pub height: u32,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            name: "camera".to_string(),
            frame_limit: None,
            width: DEFAULT_STUB_WIDTH,
            height: DEFAULT_STUB_HEIGHT,
        }
    }
}

impl StubConfig {
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut config = Self {
            name: url.host_str().unwrap_or("camera").to_string(),
            ..Self::default()
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => config.frame_limit = Some(parse_query(&key, &value)?),
                "width" => config.width = parse_query(&key, &value)?,
                "height" => config.height = parse_query(&key, &value)?,
                other => log::warn!("stub stream: ignoring unknown parameter '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stub stream dimensions must be non-zero"));
        }
        if config.width > MAX_STUB_DIMENSION || config.height > MAX_STUB_DIMENSION {
            return Err(anyhow!(
                "stub stream dimensions {}x{} exceed {}",
                config.width,
                config.height,
                MAX_STUB_DIMENSION
            ));
        }
        Ok(config)
    }
}

fn parse_query<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub stream parameter '{}' is invalid: '{}'", key, value))
}

/// Synthetic stream. Always "connected".
pub struct SyntheticStream {
    config: StubConfig,
    frame_count: u64,
    closed: bool,
}

impl SyntheticStream {
    pub fn new(config: StubConfig) -> Self {
        log::info!("stub stream: connected to {} (synthetic)", config.name);
        Self {
            config,
            frame_count: 0,
            closed: false,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameStream for SyntheticStream {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                log::debug!("stub stream {}: exhausted after {} frames", self.config.name, limit);
                return None;
            }
        }
        self.frame_count += 1;
        match Frame::new(
            self.generate_pixels(),
            self.config.width,
            self.config.height,
            self.frame_count,
        ) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::warn!("stub stream {}: {}", self.config.name, e);
                None
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
