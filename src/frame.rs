//! Sampled camera frames.
//!
//! - `Frame`: one still image pulled from a stream, stored as packed RGB8.
//! - JPEG helpers: frames are decoded from JPEG (HTTP sources) and encoded to JPEG
//!   before they are handed to the detection service.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView};
use std::time::Instant;

const RGB_CHANNELS: usize = 3;

/// JPEG quality used when a frame is submitted for detection.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// One still image sampled from a video stream.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position of this frame in its stream, starting at 1.
    pub index: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB8 pixels. The buffer length must be `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = RGB_CHANNELS * width as usize * height as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer size mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
            captured_at: Instant::now(),
        })
    }

    /// Decode a JPEG image into an RGB8 frame.
    pub fn from_jpeg(bytes: &[u8], index: u64) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode jpeg")?;
        let (width, height) = image.dimensions();
        let rgb = image.into_rgb8();
        Self::new(rgb.into_raw(), width, height, index)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn age_millis(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// Compress the frame into a JPEG payload.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.data.len() / 8);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .with_context(|| format!("encode frame {} as jpeg", self.index))?;
        Ok(out)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .field("bytes", &self.data.len())
            .finish()
    }
}
