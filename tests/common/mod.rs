#![allow(dead_code)]

use anyhow::Result;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camera_presence::Frame;

/// One canned answer from the fake server.
#[derive(Clone, Debug)]
pub enum Reply {
    Json(u16, String),
    Raw {
        status: u16,
        content_type: String,
        body: Vec<u8>,
    },
    /// Accept the request and answer only after the delay.
    Stall(Duration, String),
    /// Send `prefix`, then one filler byte every `interval`, up to `count` bytes.
    /// No Content-Length, so the body never looks finished early.
    Drip {
        content_type: String,
        prefix: Vec<u8>,
        interval: Duration,
        count: usize,
    },
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Json(200, body.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}:", name.to_lowercase());
        self.head
            .lines()
            .find(|line| line.to_lowercase().starts_with(&prefix))
            .map(|line| line[prefix.len()..].trim().to_string())
    }

    pub fn body_contains(&self, needle: &[u8]) -> bool {
        self.body.windows(needle.len()).any(|w| w == needle)
    }
}

/// Single-threaded HTTP/1.1 server replaying `replies` in order; the last reply repeats.
pub struct FakeServer {
    pub url: String,
    addr: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start(path: &str, replies: Vec<Reply>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?.to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = requests.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut served = 0usize;
                for stream in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(mut stream) = stream else {
                        continue;
                    };
                    let Ok(request) = read_request(&mut stream) else {
                        continue;
                    };
                    requests.lock().unwrap().push(request);
                    let reply = replies
                        .get(served)
                        .or_else(|| replies.last())
                        .cloned()
                        .unwrap_or_else(|| Reply::Json(404, String::new()));
                    served += 1;
                    let _ = write_reply(&mut stream, &reply, &stop);
                }
            })
        };

        Ok(Self {
            url: format!("http://{}{}", addr, path),
            addr,
            requests,
            stop,
            handle: Some(handle),
        })
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(&self.addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            anyhow::bail!("connection closed before headers");
        }
        data.extend_from_slice(&chunk[..read]);
    };
    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let mut body = data[head_end..].to_vec();

    let partial = CapturedRequest {
        head: head.clone(),
        body: Vec::new(),
    };
    if let Some(length) = partial.header("content-length") {
        let length: usize = length.parse()?;
        while body.len() < length {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
    } else if partial
        .header("transfer-encoding")
        .is_some_and(|value| value.contains("chunked"))
    {
        while !body.ends_with(b"0\r\n\r\n") {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
    }
    Ok(CapturedRequest { head, body })
}

fn write_reply(stream: &mut TcpStream, reply: &Reply, stop: &AtomicBool) -> Result<()> {
    let (status, content_type, body) = match reply {
        Reply::Json(status, body) => (*status, "application/json", body.as_bytes().to_vec()),
        Reply::Raw {
            status,
            content_type,
            body,
        } => (*status, content_type.as_str(), body.clone()),
        Reply::Stall(delay, body) => {
            thread::sleep(*delay);
            (200, "application/json", body.as_bytes().to_vec())
        }
        Reply::Drip {
            content_type,
            prefix,
            interval,
            count,
        } => {
            let head = format!(
                "HTTP/1.1 200 Test\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
                content_type
            );
            stream.write_all(head.as_bytes())?;
            stream.write_all(prefix)?;
            stream.flush()?;
            for _ in 0..*count {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(*interval);
                stream.write_all(&[0x00])?;
                stream.flush()?;
            }
            return Ok(());
        }
    };
    let head = format!(
        "HTTP/1.1 {} Test\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(&body)?;
    stream.flush()?;
    Ok(())
}

pub fn test_jpeg(width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels: Vec<u8> = (0..width * height)
        .flat_map(|i| [(i % 255) as u8, 64, 192])
        .collect();
    Frame::new(pixels, width, height, 0)?.encode_jpeg(85)
}

pub const PERSON: &str = r#"{"success": true, "predictions": [{"label": "person", "confidence": 0.93, "x_min": 4, "y_min": 4, "x_max": 60, "y_max": 120}]}"#;
pub const DOG: &str =
    r#"{"success": true, "predictions": [{"label": "dog", "confidence": 0.71}]}"#;
pub const NOTHING: &str = r#"{"success": true, "predictions": []}"#;
