mod common;

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use camera_presence::detect::{DetectionClientConfig, HttpDetectionClient};
use camera_presence::ingest::CameraStream;
use camera_presence::{
    CameraSettings, CameraSource, CancelToken, EvaluatorSettings, FrameSource, FrameStream,
    Poller, PresenceEvaluator, PresenceSensor, PresenceVerdict, ReadLimit, StopReason,
    UpdateOutcome,
};

use common::{test_jpeg, FakeServer, Reply, DOG, NOTHING, PERSON};

fn evaluator(
    camera_url: &str,
    detector: &FakeServer,
) -> Result<PresenceEvaluator<CameraSource, HttpDetectionClient>> {
    evaluator_with(
        camera_url,
        detector,
        CameraSettings::default(),
        EvaluatorSettings::default(),
    )
}

fn evaluator_with(
    camera_url: &str,
    detector: &FakeServer,
    camera: CameraSettings,
    settings: EvaluatorSettings,
) -> Result<PresenceEvaluator<CameraSource, HttpDetectionClient>> {
    let client = HttpDetectionClient::new(DetectionClientConfig {
        detect_url: detector.url.clone(),
        request_timeout: Duration::from_secs(2),
        ..DetectionClientConfig::default()
    })?;
    Ok(PresenceEvaluator::new(
        CameraSource::new(camera),
        client,
        camera_url,
        settings,
    ))
}

/// MJPEG camera that sends one frame start and then a filler byte every 50 ms.
fn trickling_camera() -> Result<FakeServer> {
    let mut prefix = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
    prefix.extend_from_slice(&[0xFF, 0xD8]);
    FakeServer::start(
        "/mjpeg",
        vec![Reply::Drip {
            content_type: "multipart/x-mixed-replace; boundary=frame".to_string(),
            prefix,
            interval: Duration::from_millis(50),
            count: 1200,
        }],
    )
}

#[test]
fn person_after_misses_is_present() -> Result<()> {
    let detector = FakeServer::start(
        "/v1/vision/detection",
        vec![Reply::ok(NOTHING), Reply::ok(DOG), Reply::ok(PERSON)],
    )?;
    let evaluation =
        evaluator("stub://hall?frames=10", &detector)?.evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Present);
    assert_eq!(evaluation.frames, 3);
    assert_eq!(detector.requests().len(), 3);
    Ok(())
}

#[test]
fn five_misses_is_absent_and_stops_sampling() -> Result<()> {
    let detector = FakeServer::start("/detect", vec![Reply::ok(NOTHING)])?;
    let evaluation =
        evaluator("stub://hall?frames=50", &detector)?.evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Absent);
    assert_eq!(evaluation.reason, StopReason::ThresholdReached);
    assert_eq!(detector.requests().len(), 5);
    Ok(())
}

#[test]
fn service_failures_do_not_count_as_misses() -> Result<()> {
    let detector = FakeServer::start(
        "/detect",
        vec![
            Reply::ok(NOTHING),
            Reply::Json(503, "busy".to_string()),
            Reply::ok(""),
            Reply::ok(NOTHING),
            Reply::ok(NOTHING),
            Reply::ok(NOTHING),
            Reply::ok(PERSON),
        ],
    )?;
    let evaluation =
        evaluator("stub://hall?frames=20", &detector)?.evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Present);
    assert_eq!(evaluation.frames, 7);
    assert_eq!(evaluation.service_errors, 1);
    assert_eq!(evaluation.inconclusive, 2);
    assert_eq!(evaluation.not_found, 4);
    Ok(())
}

#[test]
fn exhausted_stream_is_absent() -> Result<()> {
    let detector = FakeServer::start("/detect", vec![Reply::ok("[]")])?;
    let evaluation =
        evaluator("stub://hall?frames=3", &detector)?.evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Absent);
    assert_eq!(evaluation.reason, StopReason::StreamEnded);
    assert_eq!(evaluation.inconclusive, 3);
    Ok(())
}

#[test]
fn unreachable_detector_never_decides_on_its_own() -> Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let client = HttpDetectionClient::new(DetectionClientConfig {
        detect_url: format!("http://127.0.0.1:{}/detect", port),
        request_timeout: Duration::from_secs(1),
        ..DetectionClientConfig::default()
    })?;
    let evaluator = PresenceEvaluator::new(
        CameraSource::new(CameraSettings::default()),
        client,
        "stub://hall?frames=4",
        EvaluatorSettings::default(),
    );
    let evaluation = evaluator.evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Absent);
    assert_eq!(evaluation.reason, StopReason::StreamEnded);
    assert_eq!(evaluation.service_errors, 4);
    assert_eq!(evaluation.not_found, 0);
    Ok(())
}

#[test]
fn http_snapshot_camera_feeds_the_evaluator() -> Result<()> {
    let jpeg = test_jpeg(64, 48)?;
    let camera = FakeServer::start(
        "/snapshot.jpg",
        vec![Reply::Raw {
            status: 200,
            content_type: "image/jpeg".to_string(),
            body: jpeg,
        }],
    )?;
    let detector = FakeServer::start("/detect", vec![Reply::ok(DOG), Reply::ok(PERSON)])?;

    let verdict = evaluator(&camera.url, &detector)?.evaluate(&CancelToken::new())?;
    assert_eq!(verdict, PresenceVerdict::Present);
    // The connect request doubles as the first snapshot.
    assert_eq!(camera.requests().len(), 2);
    Ok(())
}

#[test]
fn mjpeg_camera_ends_when_the_body_ends() -> Result<()> {
    let jpeg = test_jpeg(32, 32)?;
    let mut body = Vec::new();
    for _ in 0..3 {
        body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(&jpeg);
        body.extend_from_slice(b"\r\n");
    }
    let camera = FakeServer::start(
        "/mjpeg",
        vec![Reply::Raw {
            status: 200,
            content_type: "multipart/x-mixed-replace; boundary=frame".to_string(),
            body,
        }],
    )?;

    let source = CameraSource::new(CameraSettings::default());
    let mut stream = source.open(&camera.url, &ReadLimit::unbounded())?;
    let mut frames = 0;
    while let Some(frame) = stream.next_frame() {
        assert_eq!((frame.width, frame.height), (32, 32));
        frames += 1;
    }
    stream.close();
    assert_eq!(frames, 3);
    Ok(())
}

#[test]
fn offline_camera_is_an_error_not_a_verdict() -> Result<()> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?.port()
    };
    let detector = FakeServer::start("/detect", vec![Reply::ok(PERSON)])?;
    let camera_url = format!("http://127.0.0.1:{}/snapshot.jpg", port);
    let err = evaluator(&camera_url, &detector)?
        .evaluate(&CancelToken::new())
        .unwrap_err();
    assert!(err.to_string().contains(&camera_url), "{}", err);
    assert!(detector.requests().is_empty());
    Ok(())
}

/// Opens normally `allowed` times, then reports the camera as offline.
struct FailsAfter {
    inner: CameraSource,
    allowed: u32,
    opens: AtomicU32,
}

impl FrameSource for FailsAfter {
    type Stream = CameraStream;

    fn open(&self, address: &str, limit: &ReadLimit) -> Result<CameraStream> {
        if self.opens.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(anyhow!("camera {} went offline", address));
        }
        self.inner.open(address, limit)
    }
}

#[test]
fn sensor_keeps_last_state_when_camera_fails() -> Result<()> {
    let detector = FakeServer::start("/detect", vec![Reply::ok(PERSON)])?;
    let client = HttpDetectionClient::new(DetectionClientConfig {
        detect_url: detector.url.clone(),
        request_timeout: Duration::from_secs(2),
        ..DetectionClientConfig::default()
    })?;
    let source = FailsAfter {
        inner: CameraSource::new(CameraSettings::default()),
        allowed: 1,
        opens: AtomicU32::new(0),
    };
    let sensor = PresenceSensor::new(
        "binary_sensor.hallway_motion",
        "Hallway presence",
        PresenceEvaluator::new(
            source,
            client,
            "stub://hall?frames=1",
            EvaluatorSettings::default(),
        ),
    );
    let cancel = CancelToken::new();
    assert!(sensor.update(&cancel).changed());
    assert!(sensor.is_on());

    for _ in 0..2 {
        let outcome = sensor.update(&cancel);
        let UpdateOutcome::Failed { error } = &outcome else {
            panic!("expected a failed update, got {:?}", outcome);
        };
        assert!(error.contains("went offline"), "{}", error);
        assert!(sensor.is_on());
    }
    assert_eq!(detector.requests().len(), 1);
    Ok(())
}

#[test]
fn trickling_camera_is_cut_off_at_the_deadline() -> Result<()> {
    let camera = trickling_camera()?;
    let detector = FakeServer::start("/detect", vec![Reply::ok(PERSON)])?;
    let settings = EvaluatorSettings {
        deadline: Duration::from_secs(1),
        ..EvaluatorSettings::default()
    };
    let evaluation = evaluator_with(&camera.url, &detector, CameraSettings::default(), settings)?
        .evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Unknown);
    assert_eq!(evaluation.reason, StopReason::DeadlineExceeded);
    assert_eq!(evaluation.frames, 0);
    assert!(evaluation.elapsed < Duration::from_secs(3), "{:?}", evaluation.elapsed);
    assert!(detector.requests().is_empty());
    Ok(())
}

#[test]
fn cancel_interrupts_a_trickling_camera() -> Result<()> {
    let camera = trickling_camera()?;
    let detector = FakeServer::start("/detect", vec![Reply::ok(PERSON)])?;
    let evaluator = evaluator(&camera.url, &detector)?;
    let cancel = CancelToken::new();
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            cancel.cancel();
        })
    };
    let evaluation = evaluator.evaluate_with_report(&cancel)?;
    canceller.join().unwrap();
    assert_eq!(evaluation.verdict, PresenceVerdict::Unknown);
    assert_eq!(evaluation.reason, StopReason::Cancelled);
    assert!(evaluation.elapsed < Duration::from_secs(2), "{:?}", evaluation.elapsed);
    Ok(())
}

#[test]
fn frame_timeout_covers_the_whole_frame() -> Result<()> {
    let camera = trickling_camera()?;
    let detector = FakeServer::start("/detect", vec![Reply::ok(PERSON)])?;
    let camera_settings = CameraSettings {
        frame_timeout: Duration::from_millis(500),
    };
    let evaluation = evaluator_with(
        &camera.url,
        &detector,
        camera_settings,
        EvaluatorSettings::default(),
    )?
    .evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Absent);
    assert_eq!(evaluation.reason, StopReason::StreamEnded);
    assert!(evaluation.elapsed < Duration::from_secs(3), "{:?}", evaluation.elapsed);
    Ok(())
}

#[test]
fn slow_detector_is_cut_off_at_the_deadline() -> Result<()> {
    let detector = FakeServer::start(
        "/detect",
        vec![Reply::Stall(Duration::from_secs(3), PERSON.to_string())],
    )?;
    let client = HttpDetectionClient::new(DetectionClientConfig {
        detect_url: detector.url.clone(),
        request_timeout: Duration::from_secs(10),
        ..DetectionClientConfig::default()
    })?;
    let settings = EvaluatorSettings {
        deadline: Duration::from_millis(800),
        ..EvaluatorSettings::default()
    };
    let evaluator = PresenceEvaluator::new(
        CameraSource::new(CameraSettings::default()),
        client,
        "stub://hall",
        settings,
    );
    let evaluation = evaluator.evaluate_with_report(&CancelToken::new())?;
    assert_eq!(evaluation.verdict, PresenceVerdict::Unknown);
    assert_eq!(evaluation.reason, StopReason::DeadlineExceeded);
    assert!(evaluation.service_errors >= 1);
    assert_eq!(evaluation.not_found, 0);
    assert!(evaluation.elapsed < Duration::from_millis(2500), "{:?}", evaluation.elapsed);
    Ok(())
}

#[test]
fn poller_reports_state_changes() -> Result<()> {
    let detector = FakeServer::start(
        "/detect",
        vec![
            Reply::ok(PERSON),
            Reply::ok(NOTHING),
            Reply::ok(NOTHING),
            Reply::ok(NOTHING),
            Reply::ok(NOTHING),
            Reply::ok(NOTHING),
        ],
    )?;
    let sensor = Arc::new(PresenceSensor::new(
        "binary_sensor.hallway_motion",
        "Hallway presence",
        evaluator("stub://hall?frames=10", &detector)?,
    ));
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    let mut poller = Poller::new(sensor.clone(), Duration::from_secs(30))
        .on_change(move |is_on| sink.lock().unwrap().push(is_on));

    let cancel = CancelToken::new();
    poller.run_once(&cancel);
    assert!(sensor.is_on());
    poller.run_once(&cancel);
    assert!(!sensor.is_on());
    poller.run_once(&cancel);
    assert_eq!(*changes.lock().unwrap(), vec![true, false]);
    Ok(())
}
