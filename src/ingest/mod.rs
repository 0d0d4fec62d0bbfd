//! Frame sources.
//!
//! This module provides the sources a presence evaluation pulls frames from:
//! - Synthetic streams (`stub://`, testing and demos)
//! - HTTP MJPEG streams and JPEG snapshot endpoints (`http://`, `https://`)
//! - RTSP streams (`rtsp://`, feature: rtsp-gstreamer)
//!
//! A stream is opened once per evaluation and wrapped in a `StreamHandle`, which
//! closes it exactly once on every exit path. End-of-stream and read failures are
//! both reported as "no frame"; backends log the underlying cause.
//!
//! Network backends honour a `ReadLimit`: no wait inside a read outlives the
//! evaluation deadline, and a cancelled read returns within `LIMIT_POLL_INTERVAL`.

pub mod http;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod stub;

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use url::Url;

use crate::cancel::CancelToken;
use crate::frame::Frame;

pub use http::HttpStream;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::GstreamerStream;
pub use stub::{StubConfig, SyntheticStream};

/// Default upper bound on receiving one whole network frame.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest single wait inside a bounded read before the limit is re-checked.
pub const LIMIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Evaluation-wide bounds handed to a stream when it is opened.
#[derive(Clone, Debug, Default)]
pub struct ReadLimit {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl ReadLimit {
    pub fn new(deadline: Option<Instant>, cancel: CancelToken) -> Self {
        Self {
            deadline,
            cancel: Some(cancel),
        }
    }

    /// No deadline and no cancellation.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is none.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// `timeout`, shortened to the time left before the deadline.
    pub fn cap(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => timeout.min(remaining),
            None => timeout,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| cancel.is_cancelled())
    }

    /// Fail if the read was cancelled or the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(anyhow!("read cancelled"));
        }
        if self.remaining().is_some_and(|remaining| remaining.is_zero()) {
            return Err(anyhow!("evaluation deadline reached"));
        }
        Ok(())
    }

    /// Length of the next wait for a frame that must arrive by `frame_deadline`.
    ///
    /// Errors once the limit is hit or the frame deadline has passed.
    pub fn next_wait(&self, frame_deadline: Instant) -> Result<Duration> {
        self.check()?;
        let left = frame_deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(anyhow!("no complete frame within the frame timeout"));
        }
        Ok(self.cap(left).min(LIMIT_POLL_INTERVAL))
    }
}

/// An open stream of sequential frames.
pub trait FrameStream {
    /// Pull the next frame. `None` means the stream ended or a read failed.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Release the underlying resources.
    fn close(&mut self);
}

impl<S: FrameStream + ?Sized> FrameStream for Box<S> {
    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Opens frame streams by camera address.
pub trait FrameSource {
    type Stream: FrameStream;

    /// Open `address`. Network backends keep `limit` and bound every later read by it.
    fn open(&self, address: &str, limit: &ReadLimit) -> Result<Self::Stream>;
}

/// Owns one open stream for the lifetime of an evaluation.
///
/// The stream is closed by `close()` or, failing that, on drop.
pub struct StreamHandle<S: FrameStream> {
    stream: S,
    address: String,
    frames_read: u64,
    closed: bool,
}

impl<S: FrameStream> StreamHandle<S> {
    pub fn open<F>(source: &F, address: &str, limit: &ReadLimit) -> Result<Self>
    where
        F: FrameSource<Stream = S>,
    {
        let stream = source.open(address, limit)?;
        log::debug!("opened frame stream {}", address);
        Ok(Self {
            stream,
            address: address.to_string(),
            frames_read: 0,
            closed: false,
        })
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }
        let frame = self.stream.next_frame()?;
        self.frames_read += 1;
        Some(frame)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.close();
        log::debug!(
            "released frame stream {} after {} frames",
            self.address,
            self.frames_read
        );
    }
}

impl<S: FrameStream> Drop for StreamHandle<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Settings shared by the concrete camera backends.
#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// Upper bound on receiving one whole frame; a timed-out frame ends the stream.
    pub frame_timeout: Duration,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

/// Frame source that picks a backend from the address scheme.
#[derive(Clone, Debug, Default)]
pub struct CameraSource {
    settings: CameraSettings,
}

impl CameraSource {
    pub fn new(settings: CameraSettings) -> Self {
        Self { settings }
    }
}

/// A stream opened by `CameraSource`.
pub enum CameraStream {
    Synthetic(SyntheticStream),
    Http(HttpStream),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(rtsp::GstreamerStream),
}

impl FrameSource for CameraSource {
    type Stream = CameraStream;

    fn open(&self, address: &str, limit: &ReadLimit) -> Result<CameraStream> {
        let url = Url::parse(address.trim())
            .with_context(|| format!("parse camera address '{}'", address))?;
        match url.scheme() {
            "stub" => Ok(CameraStream::Synthetic(SyntheticStream::new(
                StubConfig::from_url(&url)?,
            ))),
            "http" | "https" => Ok(CameraStream::Http(HttpStream::connect(
                url.as_str(),
                self.settings.frame_timeout,
                limit.clone(),
            )?)),
            "rtsp" | "rtsps" => open_rtsp(&url, &self.settings, limit),
            other => Err(anyhow!(
                "unsupported camera scheme '{}'; expected stub, http(s) or rtsp",
                other
            )),
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn open_rtsp(url: &Url, settings: &CameraSettings, limit: &ReadLimit) -> Result<CameraStream> {
    Ok(CameraStream::Gstreamer(rtsp::GstreamerStream::open(
        url.as_str(),
        settings.frame_timeout,
        limit.clone(),
    )?))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn open_rtsp(url: &Url, _settings: &CameraSettings, _limit: &ReadLimit) -> Result<CameraStream> {
    Err(anyhow!(
        "RTSP camera {} requires the rtsp-gstreamer feature",
        url
    ))
}

impl FrameStream for CameraStream {
    fn next_frame(&mut self) -> Option<Frame> {
        match self {
            CameraStream::Synthetic(stream) => stream.next_frame(),
            CameraStream::Http(stream) => stream.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraStream::Gstreamer(stream) => stream.next_frame(),
        }
    }

    fn close(&mut self) {
        match self {
            CameraStream::Synthetic(stream) => stream.close(),
            CameraStream::Http(stream) => stream.close(),
            #[cfg(feature = "rtsp-gstreamer")]
            CameraStream::Gstreamer(stream) => stream.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
