//! Multi-camera fusion driver.
//!
//! Runs a fusion session over the cameras in a rig configuration, either
//! live or replaying previously recorded streams, and writes the final
//! reconstructed map when the session ends. The session runs until Ctrl-C
//! or an optional deadline.

use anyhow::{bail, Context, Result};
use capture_rig::install_stop_flag;
use clap::Parser;
use depthcam::align::FirstFrameAligner;
use depthcam::camera::sim::SimulatedCamera;
use depthcam::camera::InitParams;
use depthcam::config::RigConfig;
use depthcam::fusion::sim::SimulatedFusionEngine;
use depthcam::fusion::FusionSession;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fuse multiple depth cameras into one reconstruction")]
struct Args {
    /// JSON rig configuration file.
    config: PathBuf,

    /// Replay recorded streams from this directory instead of live
    /// cameras.
    #[arg(long)]
    playback_dir: Option<PathBuf>,

    /// Stop after this many seconds instead of running until Ctrl-C.
    #[arg(long)]
    duration: Option<u64>,

    /// Output path for the final reconstructed map.
    #[arg(long, default_value = "rig_map.bin")]
    output: PathBuf,

    /// Log each publisher's capture rate when the session ends.
    #[arg(long)]
    fps_report: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = RigConfig::load(&args.config).context("loading rig configuration")?;
    if let Some(dir) = &args.playback_dir {
        config = config.with_playback_inputs(dir);
        if config.cameras.is_empty() {
            bail!(
                "no recordings found in {}; run rig_capture first",
                dir.display()
            );
        }
        info!("Replaying {} recorded stream(s)", config.cameras.len());
    }

    let stop = install_stop_flag()?;
    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));

    let mut session = FusionSession::prepare(
        &config,
        SimulatedFusionEngine::new(),
        &InitParams::default(),
        |setup| SimulatedCamera::new(setup.serial),
        &FirstFrameAligner,
    )
    .context("starting fusion session")?;

    if args.fps_report {
        for (_, publisher) in session.publishers() {
            publisher.enable_fps_tracking(true);
        }
    }

    let summary = session
        .run(
            || {
                !stop.load(Ordering::SeqCst)
                    && deadline.map_or(true, |d| Instant::now() < d)
            },
            &args.output,
        )
        .context("running fusion session")?;

    if args.fps_report {
        for (serial, publisher) in session.publishers() {
            info!("camera {serial}: {:.1} fps", publisher.average_fps());
        }
    }
    info!(
        "Fusion session complete: {} frames processed, {} map refreshes, final map {} vertices",
        summary.frames_processed, summary.map_updates, summary.final_map_vertices
    );
    if summary.map_updates > 0 {
        info!("Final map written to {}", args.output.display());
    }

    Ok(())
}
