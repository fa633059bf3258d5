//! Multi-camera recording driver.
//!
//! Records one stream file per local camera for a fixed duration. Devices
//! are opened and armed first, then every grab loop starts together so
//! the skew between the cameras' first frames stays small. Ctrl-C stops
//! recording early.

use anyhow::{bail, Context, Result};
use capture_rig::{install_stop_flag, DepthModeArg, ResolutionArg};
use clap::Parser;
use depthcam::camera::sim::SimulatedCamera;
use depthcam::camera::{DeviceInput, InitParams};
use depthcam::config::{CameraSetup, CommType, RigConfig};
use depthcam::metrics::TimingRegistry;
use depthcam::recorder::StreamRecorder;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Record depth camera streams for later fusion")]
struct Args {
    /// JSON rig configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Record a single live camera by serial, without a config file.
    #[arg(long, conflicts_with = "config")]
    serial: Option<u64>,

    /// Recording duration in seconds.
    #[arg(long, default_value = "30")]
    duration: u64,

    /// Output directory for recorded streams.
    #[arg(long, default_value = "./recordings")]
    output_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = ResolutionArg::Hd1080)]
    resolution: ResolutionArg,

    #[arg(long, value_enum, default_value_t = DepthModeArg::Performance)]
    depth_mode: DepthModeArg,

    /// Only record the camera with this serial or config name.
    #[arg(long)]
    camera: Option<String>,

    /// Per-frame timing logs and anomaly snapshots.
    #[arg(long)]
    timing_logs: bool,
}

fn load_config(args: &Args) -> Result<RigConfig> {
    if let Some(serial) = args.serial {
        return Ok(RigConfig {
            cameras: vec![CameraSetup {
                serial,
                name: None,
                comm: CommType::Local,
                input: DeviceInput::Live { serial },
                pose: Default::default(),
            }],
        });
    }
    let Some(path) = &args.config else {
        bail!("either --config or --serial is required");
    };
    RigConfig::load(path).context("loading rig configuration")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let selected: Vec<&CameraSetup> = config
        .local_cameras()
        .filter(|setup| match &args.camera {
            Some(wanted) => {
                setup.serial.to_string() == *wanted
                    || setup.name.as_deref() == Some(wanted.as_str())
            }
            None => true,
        })
        .collect();
    if selected.is_empty() {
        warn!("No cameras matched the selection. Available cameras:");
        for setup in config.local_cameras() {
            warn!("  {} (SN: {})", setup.display_name(), setup.serial);
        }
        bail!("no cameras to record");
    }

    info!("Recording duration: {}s", args.duration);
    info!("Output directory: {}", args.output_dir.display());
    info!("Resolution: {}", depthcam::camera::Resolution::from(args.resolution));
    info!("Active cameras: {}", selected.len());
    for setup in &selected {
        info!("  {} (SN: {})", setup.display_name(), setup.serial);
    }

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "creating output directory {}",
            args.output_dir.display()
        )
    })?;
    let stop = install_stop_flag()?;

    let init = InitParams {
        resolution: args.resolution.into(),
        fps: 30,
        depth_mode: args.depth_mode.into(),
        realtime_playback: false,
    };
    let metrics = Arc::new(TimingRegistry::new());

    let mut recorders = Vec::new();
    let mut stream_paths = Vec::new();
    for setup in &selected {
        let mut recorder =
            StreamRecorder::new(SimulatedCamera::new(setup.serial), init.clone(), metrics.clone());
        recorder.set_camera_name(setup.display_name());
        recorder.set_timing_logs(args.timing_logs);
        stream_paths.push(
            args.output_dir
                .join(RigConfig::recording_filename(setup.serial)),
        );
        recorders.push(recorder);
    }

    // Staged start: open every device first, then arm recording, then
    // launch all grab loops back to back.
    let mut ready = vec![false; recorders.len()];
    for (i, (setup, recorder)) in selected.iter().zip(recorders.iter_mut()).enumerate() {
        info!("Opening {} (SN: {})...", setup.display_name(), setup.serial);
        ready[i] = recorder.open_camera(&setup.input, setup.serial);
    }
    for (i, (setup, recorder)) in selected.iter().zip(recorders.iter_mut()).enumerate() {
        if ready[i] {
            ready[i] = recorder.enable_recording(&stream_paths[i], setup.serial);
        }
    }
    let mut active = 0;
    for (i, recorder) in recorders.iter_mut().enumerate() {
        if ready[i] {
            recorder.start_recording_thread();
            active += 1;
        }
    }
    if active == 0 {
        bail!("no cameras started recording");
    }
    info!("Recording started on {active} camera(s). Press Ctrl-C to stop early.");

    let started = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));
        let elapsed = started.elapsed().as_secs();
        if elapsed >= args.duration {
            info!("Recording duration reached. Stopping...");
            break;
        }
        if elapsed > 0 && elapsed % 10 == 0 {
            info!("Recording progress: {elapsed}/{} seconds", args.duration);
        }
    }

    info!("Stopping recordings...");
    for recorder in &mut recorders {
        if recorder.is_recording() {
            recorder.stop_recording();
        }
    }

    info!("Recording summary:");
    for (setup, path) in selected.iter().zip(&stream_paths) {
        match std::fs::metadata(path) {
            Ok(meta) => info!(
                "  camera {}: {} ({} MB)",
                setup.serial,
                path.display(),
                meta.len() / 1024 / 1024
            ),
            Err(_) => info!("  camera {}: no stream file written", setup.serial),
        }
    }
    if args.timing_logs {
        info!("{}", metrics.report());
    }

    Ok(())
}
