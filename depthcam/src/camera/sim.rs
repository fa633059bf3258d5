//! Simulated depth camera.
//!
//! A scripted [`DepthCamera`] implementation used by the test suite and by
//! the rig binaries when no sensor SDK backend is linked in. Grab outcomes
//! can be scripted per call, failures injected per operation, and every
//! control call is journaled so tests can assert orchestration order.

use ndarray::Array2;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use super::{
    CameraError, CameraInfo, CameraResult, DepthCamera, DeviceInput, Frame, GrabError, InitParams,
    RecordingParams, RuntimeParams, View,
};
use crate::fusion::{MappingParams, SpatialMap};

/// Outcome of a single simulated grab call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimGrab {
    Ok,
    Fail,
    EndOfStream,
}

/// Synthetic camera with scripted behavior.
///
/// Scripted outcomes are consumed first, one per grab; once the script is
/// exhausted the camera settles into its steady outcome (success unless
/// configured otherwise).
pub struct SimulatedCamera {
    serial: u64,
    opened: bool,
    recording: bool,
    recording_path: Option<PathBuf>,
    publishing: bool,
    mapping_enabled: bool,
    fail_open: bool,
    fail_recording: bool,
    fail_tracking: bool,
    grab_delay: Duration,
    script: VecDeque<SimGrab>,
    steady: SimGrab,
    playback_total: Option<u64>,
    playback_remaining: Option<u64>,
    init: InitParams,
    frame_number: u64,
    journal: Arc<Mutex<Vec<String>>>,
}

impl SimulatedCamera {
    pub fn new(serial: u64) -> Self {
        Self {
            serial,
            opened: false,
            recording: false,
            recording_path: None,
            publishing: false,
            mapping_enabled: false,
            fail_open: false,
            fail_recording: false,
            fail_tracking: false,
            grab_delay: Duration::ZERO,
            script: VecDeque::new(),
            steady: SimGrab::Ok,
            playback_total: None,
            playback_remaining: None,
            init: InitParams::default(),
            frame_number: 0,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make `open` fail as if the device were not detected.
    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make `enable_recording` fail.
    pub fn with_recording_failure(mut self) -> Self {
        self.fail_recording = true;
        self
    }

    /// Make `enable_positional_tracking` fail.
    pub fn with_tracking_failure(mut self) -> Self {
        self.fail_tracking = true;
        self
    }

    /// Sleep this long inside every grab, simulating frame pacing.
    pub fn with_grab_delay(mut self, delay: Duration) -> Self {
        self.grab_delay = delay;
        self
    }

    /// Limit playback inputs to this many frames before end-of-stream.
    pub fn with_playback_length(mut self, frames: u64) -> Self {
        self.playback_total = Some(frames);
        self
    }

    /// Queue scripted grab outcomes, consumed one per call.
    pub fn with_script(mut self, outcomes: impl IntoIterator<Item = SimGrab>) -> Self {
        self.script.extend(outcomes);
        self
    }

    /// Outcome of every grab once the script is exhausted.
    pub fn with_steady_grab(mut self, outcome: SimGrab) -> Self {
        self.steady = outcome;
        self
    }

    /// Handle to the call journal. Entries are pushed in call order and the
    /// handle stays valid after the camera is moved onto a worker thread.
    pub fn journal(&self) -> Arc<Mutex<Vec<String>>> {
        self.journal.clone()
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing
    }

    fn record(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    fn preview_dimensions(&self) -> (usize, usize) {
        // Frames are downscaled so per-grab copies stay cheap in tests.
        let (rows, cols) = self.init.resolution.dimensions();
        (rows / 16, cols / 16)
    }
}

impl DepthCamera for SimulatedCamera {
    fn open(&mut self, input: &DeviceInput, init: &InitParams) -> CameraResult<()> {
        self.record(format!("open({input})"));
        if self.fail_open {
            return Err(CameraError::Open("CAMERA_NOT_DETECTED".to_string()));
        }
        if let DeviceInput::Playback { path } = input {
            // Without an explicit length, estimate one from the file size so
            // reconstruction runs terminate.
            let total = self.playback_total.or_else(|| {
                fs::metadata(path)
                    .ok()
                    .map(|m| (m.len() / 2048).clamp(30, 10_000))
            });
            self.playback_total = total;
            self.playback_remaining = total;
        }
        self.init = init.clone();
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.record("close");
        self.opened = false;
        self.recording = false;
        self.publishing = false;
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn grab(&mut self, _runtime: &RuntimeParams) -> Result<(), GrabError> {
        if !self.opened {
            return Err(GrabError::Device("CAMERA_NOT_INITIALIZED".to_string()));
        }
        if !self.grab_delay.is_zero() {
            thread::sleep(self.grab_delay);
        }
        let outcome = self.script.pop_front().unwrap_or(self.steady);
        match outcome {
            SimGrab::Fail => return Err(GrabError::Device("CORRUPTED_FRAME".to_string())),
            SimGrab::EndOfStream => return Err(GrabError::EndOfStream),
            SimGrab::Ok => {}
        }
        if let Some(remaining) = self.playback_remaining.as_mut() {
            if *remaining == 0 {
                return Err(GrabError::EndOfStream);
            }
            *remaining -= 1;
        }
        self.frame_number += 1;
        if self.recording {
            if let Some(path) = &self.recording_path {
                // Grow the stream file so recording summaries see real sizes.
                let _ = fs::OpenOptions::new()
                    .append(true)
                    .open(path)
                    .and_then(|mut f| std::io::Write::write_all(&mut f, &[0u8; 64]));
            }
        }
        Ok(())
    }

    fn retrieve_image(&mut self, _view: View) -> CameraResult<Frame> {
        if !self.opened {
            return Err(CameraError::Retrieve("CAMERA_NOT_INITIALIZED".to_string()));
        }
        if self.frame_number == 0 {
            return Err(CameraError::Retrieve("no frame grabbed yet".to_string()));
        }
        // Every pixel carries the frame number, so consumers can verify a
        // retrieved frame is internally consistent.
        let value = (self.frame_number % 4096) as u16;
        Ok(Frame {
            frame_number: self.frame_number,
            timestamp: SystemTime::now(),
            pixels: Array2::from_elem(self.preview_dimensions(), value),
        })
    }

    fn enable_recording(&mut self, params: &RecordingParams) -> CameraResult<()> {
        self.record(format!("enable_recording({})", params.path.display()));
        if !self.opened {
            return Err(CameraError::InvalidOperation(
                "camera is not open".to_string(),
            ));
        }
        if self.fail_recording {
            return Err(CameraError::Recording("DRIVE_FULL".to_string()));
        }
        fs::write(&params.path, b"SIMREC\0")
            .map_err(|e| CameraError::Recording(e.to_string()))?;
        self.recording_path = Some(params.path.clone());
        self.recording = true;
        Ok(())
    }

    fn disable_recording(&mut self) {
        self.record("disable_recording");
        self.recording = false;
    }

    fn set_stream_position(&mut self, frame_index: u64) -> CameraResult<()> {
        self.record(format!("set_stream_position({frame_index})"));
        if !self.opened {
            return Err(CameraError::InvalidOperation(
                "camera is not open".to_string(),
            ));
        }
        if let (Some(total), Some(remaining)) = (self.playback_total, self.playback_remaining.as_mut()) {
            *remaining = total.saturating_sub(frame_index);
        }
        Ok(())
    }

    fn stream_frame_count(&self) -> Option<u64> {
        self.playback_total
    }

    fn start_publishing(&mut self) -> CameraResult<()> {
        self.record("start_publishing");
        if !self.opened {
            return Err(CameraError::InvalidOperation(
                "camera is not open".to_string(),
            ));
        }
        self.publishing = true;
        Ok(())
    }

    fn enable_positional_tracking(&mut self) -> CameraResult<()> {
        self.record("enable_positional_tracking");
        if self.fail_tracking {
            return Err(CameraError::Tracking("MOTION_SENSORS_REQUIRED".to_string()));
        }
        Ok(())
    }

    fn enable_spatial_mapping(&mut self, _params: &MappingParams) -> CameraResult<()> {
        self.record("enable_spatial_mapping");
        if !self.opened {
            return Err(CameraError::InvalidOperation(
                "camera is not open".to_string(),
            ));
        }
        self.mapping_enabled = true;
        Ok(())
    }

    fn extract_spatial_map(&mut self) -> CameraResult<SpatialMap> {
        if !self.mapping_enabled {
            return Err(CameraError::Mapping(
                "spatial mapping is not enabled".to_string(),
            ));
        }
        // Map size scales with how much of the stream was integrated.
        let vertex_count = (self.frame_number as usize) * 24;
        let triangle_count = vertex_count * 2;
        let payload = vec![0u8; vertex_count * 12];
        Ok(SpatialMap {
            vertex_count,
            triangle_count,
            payload,
        })
    }

    fn info(&self) -> Option<CameraInfo> {
        self.opened.then(|| CameraInfo {
            serial: self.serial,
            model: "SimCam".to_string(),
            resolution: self.init.resolution,
            fps: self.init.fps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_leaves_camera_closed() {
        let mut camera = SimulatedCamera::new(1).with_open_failure();
        let err = camera
            .open(&DeviceInput::Live { serial: 1 }, &InitParams::default())
            .unwrap_err();
        assert!(matches!(err, CameraError::Open(_)));
        assert!(!camera.is_opened());
        assert!(camera.info().is_none());
    }

    #[test]
    fn scripted_grabs_then_steady_outcome() {
        let mut camera = SimulatedCamera::new(1)
            .with_script([SimGrab::Ok, SimGrab::Fail, SimGrab::Ok])
            .with_steady_grab(SimGrab::Fail);
        camera
            .open(&DeviceInput::Live { serial: 1 }, &InitParams::default())
            .unwrap();

        let runtime = RuntimeParams::default();
        assert!(camera.grab(&runtime).is_ok());
        assert!(matches!(camera.grab(&runtime), Err(GrabError::Device(_))));
        assert!(camera.grab(&runtime).is_ok());
        // Script exhausted, steady outcome takes over.
        assert!(matches!(camera.grab(&runtime), Err(GrabError::Device(_))));
        assert!(matches!(camera.grab(&runtime), Err(GrabError::Device(_))));
    }

    #[test]
    fn playback_reaches_end_of_stream() {
        let mut camera = SimulatedCamera::new(1).with_playback_length(3);
        camera
            .open(
                &DeviceInput::Playback {
                    path: PathBuf::from("/nonexistent/stream.rec"),
                },
                &InitParams::default(),
            )
            .unwrap();

        let runtime = RuntimeParams::default();
        for _ in 0..3 {
            assert!(camera.grab(&runtime).is_ok());
        }
        assert_eq!(camera.grab(&runtime), Err(GrabError::EndOfStream));
        assert_eq!(camera.stream_frame_count(), Some(3));
    }

    #[test]
    fn seek_shortens_playback() {
        let mut camera = SimulatedCamera::new(1).with_playback_length(10);
        camera
            .open(
                &DeviceInput::Playback {
                    path: PathBuf::from("/nonexistent/stream.rec"),
                },
                &InitParams::default(),
            )
            .unwrap();
        camera.set_stream_position(8).unwrap();

        let runtime = RuntimeParams::default();
        assert!(camera.grab(&runtime).is_ok());
        assert!(camera.grab(&runtime).is_ok());
        assert_eq!(camera.grab(&runtime), Err(GrabError::EndOfStream));
    }

    #[test]
    fn retrieve_requires_a_grabbed_frame() {
        let mut camera = SimulatedCamera::new(1);
        camera
            .open(&DeviceInput::Live { serial: 1 }, &InitParams::default())
            .unwrap();
        assert!(camera.retrieve_image(View::Left).is_err());

        camera.grab(&RuntimeParams::default()).unwrap();
        let frame = camera.retrieve_image(View::Left).unwrap();
        assert_eq!(frame.frame_number, 1);
        assert!(frame.pixels.iter().all(|&px| px == 1));
    }

    #[test]
    fn journal_captures_call_order() {
        let mut camera = SimulatedCamera::new(1).with_playback_length(5);
        let journal = camera.journal();
        camera
            .open(
                &DeviceInput::Playback {
                    path: PathBuf::from("/nonexistent/stream.rec"),
                },
                &InitParams::default(),
            )
            .unwrap();
        camera.set_stream_position(2).unwrap();
        camera.start_publishing().unwrap();
        camera.close();

        let entries = journal.lock().unwrap();
        assert_eq!(
            entries.as_slice(),
            &[
                "open(recorded stream /nonexistent/stream.rec)".to_string(),
                "set_stream_position(2)".to_string(),
                "start_publishing".to_string(),
                "close".to_string(),
            ]
        );
    }
}
