//! presenced - camera presence sensor daemon
//!
//! This daemon:
//! 1. Loads the sensor configuration (TOML file, environment, flags)
//! 2. Opens the configured camera once per polling cycle
//! 3. Classifies frames against the detection service until a verdict is reached
//! 4. Logs the sensor state and every state change
//!
//! Ctrl-C stops the poller; an in-flight cycle ends as soon as its current request returns.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use camera_presence::config::ConfigOverrides;
use camera_presence::{
    CameraSource, CancelToken, HttpDetectionClient, Poller, PresenceConfig, PresenceEvaluator,
    PresenceSensor, UpdateOutcome,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Binary presence sensor backed by camera frames and an object-detection service"
)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Paired host entity id (overrides `sensor` in the config).
    #[arg(long)]
    sensor: Option<String>,

    /// Display name of the sensor.
    #[arg(long)]
    name: Option<String>,

    /// Camera URL: stub://, http(s):// (MJPEG or snapshot) or rtsp://.
    #[arg(long)]
    camera_url: Option<String>,

    /// Detection endpoint frames are POSTed to.
    #[arg(long)]
    detect_url: Option<String>,

    /// Seconds between polling cycles.
    #[arg(long)]
    scan_interval_secs: Option<u64>,

    /// Run one polling cycle, print the state and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let overrides = ConfigOverrides {
        sensor: args.sensor,
        name: args.name,
        detect_url: args.detect_url,
        camera_url: args.camera_url,
        scan_interval_secs: args.scan_interval_secs,
    };
    let cfg = PresenceConfig::load_with(args.config.as_deref(), &overrides)
        .context("failed to load presence configuration")?;

    let client = HttpDetectionClient::new(cfg.client_config())
        .context("failed to build detection client")?;
    let evaluator = PresenceEvaluator::new(
        CameraSource::new(cfg.camera_settings()),
        client,
        &cfg.camera_url,
        cfg.evaluator_settings(),
    );
    let sensor = Arc::new(
        PresenceSensor::new(&cfg.sensor, &cfg.name, evaluator)
            .with_hold_on_unknown(cfg.evaluation.hold_on_unknown),
    );

    log::info!(
        "presenced running. sensor={} unique_id={} camera={} detect={}",
        cfg.sensor,
        sensor.unique_id(),
        cfg.camera_url,
        cfg.detect_url
    );

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received, stopping poller...");
            cancel.cancel();
        })
        .expect("error setting Ctrl-C handler");
    }

    let name = cfg.name.clone();
    let mut poller = Poller::new(sensor.clone(), cfg.scan_interval).on_change(move |is_on| {
        log::info!("{} is now {}", name, if is_on { "on" } else { "off" });
    });

    if args.once {
        let outcome = poller.run_once(&cancel);
        if let UpdateOutcome::Failed { error } = &outcome {
            log::error!("polling cycle failed: {}", error);
        }
        println!("{}", sensor.state());
        return Ok(());
    }

    let stats = poller.run(&cancel);
    log::info!(
        "presenced stopped: {} updates, {} changes, {} failures, {} missed ticks",
        stats.updates,
        stats.changes,
        stats.failures,
        stats.missed_ticks
    );
    Ok(())
}
