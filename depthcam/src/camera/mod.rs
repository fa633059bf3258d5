//! Depth camera capability boundary.
//!
//! Everything the rig needs from a stereo/depth sensor is expressed through
//! the [`DepthCamera`] trait: open/close, per-frame grab, image retrieval,
//! on-device recording, playback seeking, and publishing into a fusion
//! subscription. SDK-backed cameras implement this trait out of tree;
//! [`sim::SimulatedCamera`] provides a synthetic in-tree implementation.

pub mod sim;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;
use thiserror::Error;

use crate::fusion::{MappingParams, SpatialMap};

/// Error type for camera control operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// Device could not be opened (not detected, busy, bad stream file).
    #[error("failed to open device: {0}")]
    Open(String),
    /// On-device recording could not be enabled or written.
    #[error("recording error: {0}")]
    Recording(String),
    /// Image retrieval failed or no frame has been grabbed yet.
    #[error("image retrieval error: {0}")]
    Retrieve(String),
    /// Positional tracking could not be enabled.
    #[error("positional tracking error: {0}")]
    Tracking(String),
    /// Spatial mapping could not be enabled or extracted.
    #[error("spatial mapping error: {0}")]
    Mapping(String),
    /// Operation not valid in the camera's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for camera control operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Grab failure, reported separately from control errors because the
/// capture loops treat the two outcomes differently: a device failure is
/// retried, end-of-stream terminates playback processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrabError {
    /// A recorded stream has no more frames.
    #[error("end of recorded stream")]
    EndOfStream,
    /// Device or driver failure, with the SDK status string.
    #[error("grab failed: {0}")]
    Device(String),
}

/// Where a camera's frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DeviceInput {
    /// A live sensor, addressed by serial number.
    Live { serial: u64 },
    /// A previously recorded stream file.
    Playback { path: PathBuf },
}

impl DeviceInput {
    /// True for inputs backed by a recorded stream file.
    pub fn is_playback(&self) -> bool {
        matches!(self, DeviceInput::Playback { .. })
    }
}

impl fmt::Display for DeviceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceInput::Live { serial } => write!(f, "live camera {serial}"),
            DeviceInput::Playback { path } => write!(f, "recorded stream {}", path.display()),
        }
    }
}

/// Sensor resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Hd720,
    Hd1080,
}

impl Resolution {
    /// Frame dimensions as (rows, cols).
    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            Resolution::Hd720 => (720, 1280),
            Resolution::Hd1080 => (1080, 1920),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Hd720 => write!(f, "HD720 (1280x720)"),
            Resolution::Hd1080 => write!(f, "HD1080 (1920x1080)"),
        }
    }
}

/// Depth computation quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    /// Cheapest mode, suitable for recording where depth is recomputed later.
    Performance,
    Quality,
    /// Highest quality, used for fusion and reconstruction.
    Ultra,
}

/// Camera initialization parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct InitParams {
    pub resolution: Resolution,
    pub fps: u32,
    pub depth_mode: DepthMode,
    /// Pace playback inputs at their recorded frame rate instead of
    /// delivering frames as fast as they can be decoded.
    pub realtime_playback: bool,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hd1080,
            fps: 30,
            depth_mode: DepthMode::Performance,
            realtime_playback: false,
        }
    }
}

/// Per-grab runtime parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParams {
    pub confidence_threshold: u8,
    pub texture_confidence_threshold: u8,
    /// Fill holes in the depth image, improving completeness at some cost.
    pub enable_fill_mode: bool,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 50,
            texture_confidence_threshold: 100,
            enable_fill_mode: false,
        }
    }
}

/// Stream compression used by on-device recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    H264,
    H265,
}

/// On-device recording parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingParams {
    pub path: PathBuf,
    pub compression: Compression,
}

/// Image view to retrieve from a grabbed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Left,
    Right,
    Depth,
}

/// Static camera description, available once the device is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub serial: u64,
    pub model: String,
    pub resolution: Resolution,
    pub fps: u32,
}

/// A single retrieved image with its capture metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_number: u64,
    pub timestamp: SystemTime,
    pub pixels: Array2<u16>,
}

/// A depth/stereo sensor device.
///
/// One camera is owned by exactly one worker at a time. Implementations do
/// not need to be thread-safe; workers move the camera onto their capture
/// thread and all calls happen from there.
pub trait DepthCamera {
    /// Open the device for the given input.
    fn open(&mut self, input: &DeviceInput, init: &InitParams) -> CameraResult<()>;

    /// Close the device. Safe to call when not open.
    fn close(&mut self);

    fn is_opened(&self) -> bool;

    /// Grab the next frame. Blocks for up to one frame period on a live
    /// device.
    fn grab(&mut self, runtime: &RuntimeParams) -> Result<(), GrabError>;

    /// Retrieve an image view of the last grabbed frame.
    fn retrieve_image(&mut self, view: View) -> CameraResult<Frame>;

    /// Start writing grabbed frames to the stream file named in `params`.
    fn enable_recording(&mut self, params: &RecordingParams) -> CameraResult<()>;

    /// Stop writing to the stream file. Safe to call when not recording.
    fn disable_recording(&mut self);

    /// Seek a playback input to a frame index before grabbing starts.
    fn set_stream_position(&mut self, frame_index: u64) -> CameraResult<()>;

    /// Total frame count of a playback input, if known.
    fn stream_frame_count(&self) -> Option<u64>;

    /// Start streaming grabbed data to fusion subscribers.
    fn start_publishing(&mut self) -> CameraResult<()>;

    fn enable_positional_tracking(&mut self) -> CameraResult<()>;

    /// Enable on-device spatial mapping (single-camera reconstruction).
    fn enable_spatial_mapping(&mut self, params: &MappingParams) -> CameraResult<()>;

    /// Extract the accumulated spatial map.
    fn extract_spatial_map(&mut self) -> CameraResult<SpatialMap>;

    /// Camera description, for logging. None until the device is open.
    fn info(&self) -> Option<CameraInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_input_display() {
        let live = DeviceInput::Live { serial: 47797222 };
        assert_eq!(live.to_string(), "live camera 47797222");
        assert!(!live.is_playback());

        let playback = DeviceInput::Playback {
            path: PathBuf::from("/tmp/camera_1.rec"),
        };
        assert!(playback.is_playback());
        assert!(playback.to_string().contains("camera_1.rec"));
    }

    #[test]
    fn device_input_json_round_trip() {
        let input = DeviceInput::Live { serial: 42 };
        let json = serde_json::to_string(&input).unwrap();
        assert!(json.contains("\"live\""));
        let back: DeviceInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn resolution_dimensions() {
        assert_eq!(Resolution::Hd720.dimensions(), (720, 1280));
        assert_eq!(Resolution::Hd1080.dimensions(), (1080, 1920));
    }
}
