#![cfg(feature = "rtsp-gstreamer")]

use anyhow::Result;

use camera_presence::ingest::rtsp::GstreamerStream;
use camera_presence::ingest::CameraStream;
use camera_presence::{CameraSource, FrameSource, ReadLimit};

fn into_rtsp(stream: CameraStream) -> Option<GstreamerStream> {
    match stream {
        CameraStream::Gstreamer(stream) => Some(stream),
        _ => None,
    }
}

#[test]
fn rtsp_variant_is_matchable_outside_the_crate() -> Result<()> {
    let stream = CameraSource::default().open("stub://porch?frames=1", &ReadLimit::unbounded())?;
    assert!(into_rtsp(stream).is_none());
    Ok(())
}

