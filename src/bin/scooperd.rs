//! scooperd - scooper violation detection daemon
//!
//! This daemon:
//! 1. Subscribes to the frame queue (reconnecting forever)
//! 2. Runs detection on each frame at model resolution
//! 3. Flags hand detections inside the restricted half of the ROI
//! 4. Publishes the latest annotated frame and violation count
//! 5. Saves a snapshot and a CSV row for every violation

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use scooper_watch::transport::{MqttFrameQueue, MqttQueueOptions};
use scooper_watch::{
    build_backend, DetectorBackend, FileLiveState, FilesystemViolationStore, FixedBackoff,
    FrameConsumer, FramePipeline, ScooperConfig, ShutdownSignal, ViolationClassifier,
    ViolationRecorder,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scooper violation detection service")]
struct Args {
    /// JSON config file. Environment variables override its values.
    #[arg(long, env = "SCOOPER_CONFIG")]
    config: Option<PathBuf>,

    /// Skip the blank-frame model warm-up before consuming.
    #[arg(long, env = "SCOOPER_SKIP_WARM_UP")]
    skip_warm_up: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = ScooperConfig::load_from(args.config.as_deref())?;
    log::info!(
        "scooperd {} starting: broker={} topic={} backend={} label={} output={}",
        env!("CARGO_PKG_VERSION"),
        cfg.broker.addr,
        cfg.broker.topic,
        cfg.detector.backend,
        cfg.detector.violation_label,
        cfg.output.dir.display()
    );
    log::info!(
        "roi x={} y={} w={} h={} split_x={}",
        cfg.roi.x,
        cfg.roi.y,
        cfg.roi.width,
        cfg.roi.height,
        cfg.roi.split_x()
    );

    let mut detector = build_backend(&cfg.detector)?;
    if !args.skip_warm_up {
        detector
            .warm_up()
            .with_context(|| format!("detector '{}' failed to warm up", detector.name()))?;
    }

    let store = FilesystemViolationStore::open(&cfg.output.violations_dir, &cfg.output.log_path)?;
    let live = FileLiveState::new(&cfg.output.latest_frame_path, &cfg.output.count_path);
    let pipeline = FramePipeline::new(
        detector,
        ViolationClassifier::new(cfg.roi, cfg.detector.violation_label.clone()),
        ViolationRecorder::new(store),
        cfg.detector.input_width,
        cfg.detector.input_height,
    )
    .with_publisher(live);

    let queue = MqttFrameQueue::new(MqttQueueOptions::from_settings(
        &cfg.broker,
        cfg.ack_policy,
    )?);

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping after the current frame...");
        handler_signal.trigger();
    })
    .context("error setting Ctrl-C handler")?;

    let mut consumer = FrameConsumer::new(queue, pipeline, shutdown)
        .with_ack_policy(cfg.ack_policy)
        .with_backoff(FixedBackoff(cfg.reconnect_backoff));
    let stats = consumer.run();
    log::info!(
        "scooperd stopped: {} frames processed, {} violations recorded",
        stats.frames_processed,
        stats.violations_recorded
    );
    Ok(())
}
