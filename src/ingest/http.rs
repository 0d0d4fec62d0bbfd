//! HTTP camera stream.
//!
//! Supports the two shapes IP cameras commonly expose over HTTP:
//! - `multipart/x-mixed-replace` MJPEG streams, split on JPEG SOI/EOI markers
//! - single JPEG snapshot endpoints, fetched again for every frame
//!
//! The frame timeout covers a whole frame, not a single socket read. Requests run on
//! a helper thread so each wait is also bounded by the evaluation deadline and
//! returns promptly on cancellation.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, Response};
use std::io::Read;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use super::{FrameStream, ReadLimit};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CHUNK_BYTES: usize = 8192;

enum HttpMode {
    Mjpeg(MjpegReader),
    Snapshot { pending: Option<Vec<u8>> },
}

/// Frame stream backed by an HTTP camera endpoint.
pub struct HttpStream {
    url: String,
    client: Client,
    frame_timeout: Duration,
    limit: ReadLimit,
    mode: Option<HttpMode>,
    frame_count: u64,
}

impl HttpStream {
    /// Connect to the endpoint and detect whether it serves MJPEG or snapshots.
    pub fn connect(url: &str, frame_timeout: Duration, limit: ReadLimit) -> Result<Self> {
        let client = Client::builder()
            .timeout(frame_timeout)
            .build()
            .context("build camera http client")?;
        let frame_deadline = Instant::now() + frame_timeout;
        let mut pump = BodyPump::get(&client, url)?;
        let content_type = pump.head(frame_deadline, &limit)?.to_lowercase();

        let mode = if content_type.contains("multipart") {
            log::info!("http stream: connected to {} (mjpeg)", url);
            HttpMode::Mjpeg(MjpegReader::new(pump))
        } else {
            log::info!("http stream: connected to {} (snapshot)", url);
            HttpMode::Snapshot {
                pending: Some(read_body(pump, frame_deadline, &limit)?),
            }
        };

        Ok(Self {
            url: url.to_string(),
            client,
            frame_timeout,
            limit,
            mode: Some(mode),
            frame_count: 0,
        })
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(mode) = self.mode.as_mut() else {
            return Ok(None);
        };
        let frame_deadline = Instant::now() + self.frame_timeout;
        let jpeg_bytes = match mode {
            HttpMode::Mjpeg(reader) => match reader.read_next_jpeg(frame_deadline, &self.limit)? {
                Some(bytes) => bytes,
                None => return Ok(None),
            },
            HttpMode::Snapshot { pending } => match pending.take() {
                Some(bytes) => bytes,
                None => {
                    let mut pump = BodyPump::get(&self.client, &self.url)?;
                    pump.head(frame_deadline, &self.limit)?;
                    read_body(pump, frame_deadline, &self.limit)?
                }
            },
        };
        self.frame_count += 1;
        Frame::from_jpeg(&jpeg_bytes, self.frame_count).map(Some)
    }
}

impl FrameStream for HttpStream {
    fn next_frame(&mut self) -> Option<Frame> {
        match self.read_frame() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                log::info!("http stream {}: ended", self.url);
                None
            }
            Err(e) => {
                log::warn!("http stream {}: read failed: {:#}", self.url, e);
                None
            }
        }
    }

    fn close(&mut self) {
        // Dropping the pump's receiver stops its thread, which drops the connection.
        self.mode = None;
    }
}

fn fetch(client: &Client, url: &str) -> Result<Response> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("connect to camera {}", url))?;
    if !response.status().is_success() {
        return Err(anyhow!(
            "camera {} returned status {}",
            url,
            response.status()
        ));
    }
    Ok(response)
}

fn read_body(mut pump: BodyPump, frame_deadline: Instant, limit: &ReadLimit) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = pump.next_chunk(frame_deadline, limit)? {
        bytes.extend_from_slice(&chunk);
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(anyhow!("jpeg snapshot exceeded {} bytes", MAX_JPEG_BYTES));
        }
    }
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

enum BodyEvent {
    Head { content_type: String },
    Chunk(Vec<u8>),
    Failed(anyhow::Error),
}

/// Runs a request on its own thread and hands the body over a bounded channel.
///
/// The consumer never blocks longer than `ReadLimit::next_wait`; an abandoned pump
/// exits on its next send.
struct BodyPump {
    events: Receiver<BodyEvent>,
}

impl BodyPump {
    /// GET `url` and stream the response.
    fn get(client: &Client, url: &str) -> Result<Self> {
        let client = client.clone();
        let url = url.to_string();
        Self::spawn(move |tx| {
            let response = match fetch(&client, &url) {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(BodyEvent::Failed(e));
                    return;
                }
            };
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string();
            if tx.send(BodyEvent::Head { content_type }).is_ok() {
                pump_body(response, &tx);
            }
        })
    }

    /// Stream an already open body.
    #[cfg(test)]
    fn from_reader<R: Read + Send + 'static>(body: R) -> Result<Self> {
        Self::spawn(move |tx| pump_body(body, &tx))
    }

    fn spawn<F>(work: F) -> Result<Self>
    where
        F: FnOnce(SyncSender<BodyEvent>) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(4);
        thread::Builder::new()
            .name("camera-body".to_string())
            .spawn(move || work(tx))
            .context("spawn camera body reader")?;
        Ok(Self { events: rx })
    }

    fn recv(&mut self, frame_deadline: Instant, limit: &ReadLimit) -> Result<Option<BodyEvent>> {
        loop {
            let wait = limit.next_wait(frame_deadline)?;
            match self.events.recv_timeout(wait) {
                Ok(event) => return Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    /// Wait for the response head and return its content type.
    fn head(&mut self, frame_deadline: Instant, limit: &ReadLimit) -> Result<String> {
        match self.recv(frame_deadline, limit)? {
            Some(BodyEvent::Head { content_type }) => Ok(content_type),
            Some(BodyEvent::Failed(e)) => Err(e),
            Some(BodyEvent::Chunk(_)) => Err(anyhow!("camera body arrived before its head")),
            None => Err(anyhow!("camera connection closed before a response")),
        }
    }

    /// Next chunk of the body, `Ok(None)` once it has ended.
    fn next_chunk(&mut self, frame_deadline: Instant, limit: &ReadLimit) -> Result<Option<Vec<u8>>> {
        loop {
            match self.recv(frame_deadline, limit)? {
                Some(BodyEvent::Chunk(chunk)) => return Ok(Some(chunk)),
                Some(BodyEvent::Failed(e)) => return Err(e),
                Some(BodyEvent::Head { .. }) => continue,
                None => return Ok(None),
            }
        }
    }
}

fn pump_body<R: Read>(mut body: R, tx: &SyncSender<BodyEvent>) {
    loop {
        let mut chunk = vec![0u8; CHUNK_BYTES];
        match body.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => {
                chunk.truncate(read);
                if tx.send(BodyEvent::Chunk(chunk)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(BodyEvent::Failed(
                    anyhow::Error::new(e).context("read camera body"),
                ));
                break;
            }
        }
    }
}

struct MjpegReader {
    pump: BodyPump,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(pump: BodyPump) -> Self {
        Self {
            pump,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Return the next complete JPEG, or `None` once the stream has ended.
    fn read_next_jpeg(
        &mut self,
        frame_deadline: Instant,
        limit: &ReadLimit,
    ) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let Some(chunk) = self.pump.next_chunk(frame_deadline, limit)? else {
                return Ok(None);
            };
            self.buffer.extend_from_slice(&chunk);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
