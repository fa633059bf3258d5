//! Single-stream reconstruction driver.
//!
//! Replays one recorded stream through on-device spatial mapping and
//! saves the resulting map. No fusion engine is involved; this is the
//! path for re-processing a single camera's recording at full quality.

use anyhow::{bail, Context, Result};
use clap::Parser;
use depthcam::camera::sim::SimulatedCamera;
use depthcam::camera::{DepthCamera, DepthMode, DeviceInput, GrabError, InitParams, RuntimeParams};
use depthcam::fusion::MappingParams;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rebuild a spatial map from one recorded stream")]
struct Args {
    /// Recorded stream file to process.
    stream: PathBuf,

    /// Output path for the reconstructed map. Defaults to the stream path
    /// with a `.map` extension.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if !args.stream.exists() {
        bail!("recorded stream not found: {}", args.stream.display());
    }
    info!("Reconstructing from {}", args.stream.display());

    let init = InitParams {
        // Offline reprocessing can afford the best depth.
        depth_mode: DepthMode::Ultra,
        ..InitParams::default()
    };
    let mut camera = SimulatedCamera::new(0);
    camera
        .open(
            &DeviceInput::Playback {
                path: args.stream.clone(),
            },
            &init,
        )
        .context("opening recorded stream")?;
    if let Some(info) = camera.info() {
        info!("Stream resolution: {}, {} fps", info.resolution, info.fps);
    }
    let total_frames = camera.stream_frame_count();
    if let Some(total) = total_frames {
        info!("Total frames in stream: {total}");
    }

    camera
        .enable_spatial_mapping(&MappingParams::default())
        .context("enabling spatial mapping")?;

    let runtime = RuntimeParams {
        confidence_threshold: 50,
        texture_confidence_threshold: 100,
        enable_fill_mode: false,
    };
    let started = Instant::now();
    let mut processed = 0u64;
    loop {
        match camera.grab(&runtime) {
            Ok(()) => {
                processed += 1;
                if processed % 30 == 0 {
                    let elapsed = started.elapsed().as_secs_f64();
                    let fps = processed as f64 / elapsed.max(0.001);
                    match total_frames {
                        Some(total) if total > 0 => info!(
                            "Frame {processed}/{total} ({:.1}%), processing fps: {fps:.1}",
                            100.0 * processed as f64 / total as f64
                        ),
                        _ => info!("Frame {processed}, processing fps: {fps:.1}"),
                    }
                }
            }
            Err(GrabError::EndOfStream) => {
                info!("End of recorded stream reached");
                break;
            }
            Err(err) => warn!("Frame grab failed: {err}"),
        }
    }
    info!("Processed {processed} frames; extracting map...");

    let map = camera
        .extract_spatial_map()
        .context("extracting spatial map")?;
    let output = args
        .output
        .unwrap_or_else(|| args.stream.with_extension("map"));
    map.save(&output)
        .with_context(|| format!("saving map to {}", output.display()))?;
    info!(
        "Map saved to {} ({} vertices, {} triangles)",
        output.display(),
        map.vertex_count,
        map.triangle_count
    );
    camera.close();

    Ok(())
}
