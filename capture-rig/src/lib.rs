//! Shared helpers for the rig binaries.

use clap::ValueEnum;
use depthcam::camera::{DepthMode, Resolution};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Camera resolution as a command-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolutionArg {
    #[value(name = "720")]
    Hd720,
    #[value(name = "1080")]
    Hd1080,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Hd720 => Resolution::Hd720,
            ResolutionArg::Hd1080 => Resolution::Hd1080,
        }
    }
}

/// Depth quality tier as a command-line value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DepthModeArg {
    Performance,
    Quality,
    Ultra,
}

impl From<DepthModeArg> for DepthMode {
    fn from(arg: DepthModeArg) -> Self {
        match arg {
            DepthModeArg::Performance => DepthMode::Performance,
            DepthModeArg::Quality => DepthMode::Quality,
            DepthModeArg::Ultra => DepthMode::Ultra,
        }
    }
}

/// Install a Ctrl-C handler that flips a shared stop flag.
///
/// The binaries poll the flag from their wait loops; workers keep their
/// own independent stop paths.
pub fn install_stop_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt; stopping gracefully...");
        handler_flag.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_args_map_to_camera_resolutions() {
        assert_eq!(Resolution::from(ResolutionArg::Hd720), Resolution::Hd720);
        assert_eq!(Resolution::from(ResolutionArg::Hd1080), Resolution::Hd1080);
    }

    #[test]
    fn depth_mode_args_map_to_camera_modes() {
        assert_eq!(
            DepthMode::from(DepthModeArg::Performance),
            DepthMode::Performance
        );
        assert_eq!(DepthMode::from(DepthModeArg::Ultra), DepthMode::Ultra);
    }
}
