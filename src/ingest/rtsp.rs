//! RTSP frame stream using GStreamer.
//!
//! Pipeline: `rtspsrc ! decodebin ! videoconvert ! appsink` with RGB caps. The stream
//! ends when the bus reports an error or EOS, or when no sample arrives within the
//! frame timeout. Sample pulls are sliced so the read limit is honoured between slices.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::{Duration, Instant};

use super::{FrameStream, ReadLimit};
use crate::frame::Frame;

/// Frame stream backed by a GStreamer RTSP pipeline.
pub struct GstreamerStream {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_timeout: Duration,
    limit: ReadLimit,
    frame_count: u64,
    closed: bool,
}

impl GstreamerStream {
    /// Build the pipeline and wait (up to the frame timeout) for it to start playing.
    pub fn open(url: &str, frame_timeout: Duration, limit: ReadLimit) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        let mut stream = Self {
            url: url.to_string(),
            pipeline,
            appsink,
            frame_timeout,
            limit,
            frame_count: 0,
            closed: false,
        };

        if let Err(e) = stream.start() {
            stream.close();
            return Err(e);
        }
        log::info!("rtsp stream: connected to {}", url);
        Ok(stream)
    }

    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("set RTSP pipeline for {} to Playing", self.url))?;
        let (result, _, _) = self
            .pipeline
            .state(Some(clock_time(self.limit.cap(self.frame_timeout))));
        result.with_context(|| format!("RTSP pipeline for {} failed to start", self.url))?;
        self.check_bus()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        self.check_bus()?;

        let frame_deadline = Instant::now() + self.frame_timeout;
        let sample = loop {
            let wait = self
                .limit
                .next_wait(frame_deadline)
                .with_context(|| format!("no frame within {:?}", self.frame_timeout))?;
            if let Some(sample) = self.appsink.try_pull_sample(clock_time(wait)) {
                break sample;
            }
            if self.appsink.is_eos() {
                return Ok(None);
            }
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::new(pixels, width, height, self.frame_count).map(Some)
    }

    fn check_bus(&self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    return Err(anyhow!("gstreamer reached EOS"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameStream for GstreamerStream {
    fn next_frame(&mut self) -> Option<Frame> {
        match self.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("rtsp stream {}: {:#}", self.url, e);
                None
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("rtsp stream {}: failed to stop pipeline: {}", self.url, e);
        }
    }
}

impl Drop for GstreamerStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn clock_time(duration: Duration) -> gstreamer::ClockTime {
    gstreamer::ClockTime::from_mseconds(duration.as_millis() as u64)
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("RTSP buffer shorter than frame")?
            .to_vec();
        return Ok((pixels, width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
