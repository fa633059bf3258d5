//! Per-camera recording worker.
//!
//! A [`StreamRecorder`] owns one camera for its lifetime: it opens the
//! device, enables on-device recording to a stream file, and grabs frames
//! on a background thread until stopped. Instances are single-use; a
//! stopped recorder cannot be restarted.
//!
//! Besides the combined [`StreamRecorder::start_recording`], the open /
//! enable / start steps are exposed individually so a driver recording
//! several cameras can open all devices first and only then start every
//! grab loop, bounding the skew between the cameras' first frames.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::camera::{
    CameraInfo, Compression, DepthCamera, DeviceInput, InitParams, RecordingParams, RuntimeParams,
};
use crate::metrics::{ScopedTimer, TimingRegistry};
use crate::sysmon;

/// Frame intervals above this are reported as long-delay anomalies.
const LONG_DELAY_THRESHOLD: Duration = Duration::from_millis(1000);
/// Grab calls longer than this are reported as slow-grab anomalies.
const SLOW_GRAB_THRESHOLD: Duration = Duration::from_millis(100);
/// Retry delay after a failed grab. Kept at 1 ms; anomaly diagnostics
/// assume near-immediate retry.
const GRAB_RETRY_DELAY: Duration = Duration::from_millis(1);
/// Cadence of the always-on progress line.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
/// Frames between timing reports and baseline snapshots, roughly ten
/// seconds at the nominal 30 fps.
const REPORT_FRAME_INTERVAL: u64 = 300;

/// State shared between the recorder handle and its capture thread.
struct RecorderState {
    running: AtomicBool,
    frame_count: AtomicU64,
    started_at: OnceLock<Instant>,
    final_duration_ms: AtomicU64,
    timing_logs: AtomicBool,
}

/// Records one camera's stream to a file on a background thread.
pub struct StreamRecorder<D: DepthCamera> {
    camera: Option<D>,
    state: Arc<RecorderState>,
    metrics: Arc<TimingRegistry>,
    init: InitParams,
    name: String,
    serial: u64,
    info: Option<CameraInfo>,
    handle: Option<JoinHandle<()>>,
}

impl<D: DepthCamera + Send + 'static> StreamRecorder<D> {
    pub fn new(camera: D, init: InitParams, metrics: Arc<TimingRegistry>) -> Self {
        Self {
            camera: Some(camera),
            state: Arc::new(RecorderState {
                running: AtomicBool::new(false),
                frame_count: AtomicU64::new(0),
                started_at: OnceLock::new(),
                final_duration_ms: AtomicU64::new(0),
                timing_logs: AtomicBool::new(false),
            }),
            metrics,
            init,
            name: "Camera".to_string(),
            serial: 0,
            info: None,
            handle: None,
        }
    }

    /// Display name used in log lines.
    pub fn set_camera_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Enable per-frame timing logs and anomaly snapshots. Off by default
    /// to keep multi-camera output readable.
    pub fn set_timing_logs(&mut self, enabled: bool) {
        self.state.timing_logs.store(enabled, Ordering::SeqCst);
    }

    pub fn is_recording(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Frames recorded so far. Lock-free.
    pub fn frame_count(&self) -> u64 {
        self.state.frame_count.load(Ordering::SeqCst)
    }

    /// Recording duration in seconds: live while running, frozen at the
    /// final value once stopped.
    pub fn recording_duration(&self) -> f64 {
        if self.is_recording() {
            self.state
                .started_at
                .get()
                .map(|start| start.elapsed().as_secs_f64())
                .unwrap_or(0.0)
        } else {
            self.state.final_duration_ms.load(Ordering::SeqCst) as f64 / 1000.0
        }
    }

    /// Camera description captured at open time, for logging.
    pub fn info(&self) -> Option<&CameraInfo> {
        self.info.as_ref()
    }

    /// Open the camera, enable recording to `output`, and start the grab
    /// loop. Returns false and leaves the device closed on any failure.
    pub fn start_recording(&mut self, input: &DeviceInput, output: &Path, serial: u64) -> bool {
        if self.is_recording() {
            warn!("[{}] already recording", self.name);
            return false;
        }
        if !self.open_camera(input, serial) {
            return false;
        }
        if !self.enable_recording(output, serial) {
            return false;
        }
        self.start_recording_thread();
        info!(
            "Started recording camera {serial} to {}",
            output.display()
        );
        true
    }

    /// Open the camera without starting anything else.
    pub fn open_camera(&mut self, input: &DeviceInput, serial: u64) -> bool {
        if self.is_recording() {
            warn!("[{}] already recording", self.name);
            return false;
        }
        let Some(camera) = self.camera.as_mut() else {
            warn!("[{}] recorder already used; instances are single-use", self.name);
            return false;
        };
        match camera.open(input, &self.init) {
            Ok(()) => {
                self.serial = serial;
                self.info = camera.info();
                true
            }
            Err(err) => {
                error!("Failed to open camera {serial}: {err}");
                false
            }
        }
    }

    /// Enable on-device recording to `output`, creating the parent
    /// directory if needed. Closes the device on failure.
    pub fn enable_recording(&mut self, output: &Path, serial: u64) -> bool {
        if self.is_recording() {
            warn!("[{}] already recording", self.name);
            return false;
        }
        let Some(camera) = self.camera.as_mut() else {
            warn!("[{}] recorder already used; instances are single-use", self.name);
            return false;
        };
        if !camera.is_opened() {
            warn!("[{}] camera not opened; call open_camera first", self.name);
            return false;
        }
        if let Some(dir) = output.parent() {
            if !dir.as_os_str().is_empty() {
                if let Err(err) = std::fs::create_dir_all(dir) {
                    error!(
                        "Failed to create output directory {}: {err}",
                        dir.display()
                    );
                    camera.close();
                    return false;
                }
            }
        }
        let params = RecordingParams {
            path: output.to_path_buf(),
            compression: Compression::H265,
        };
        if let Err(err) = camera.enable_recording(&params) {
            error!("Failed to start recording for camera {serial}: {err}");
            camera.close();
            return false;
        }
        true
    }

    /// Launch the background grab loop. The camera must be open.
    pub fn start_recording_thread(&mut self) {
        if self.is_recording() {
            warn!("[{}] recording thread already running", self.name);
            return;
        }
        let Some(camera) = self.camera.take() else {
            warn!("[{}] recorder already used; instances are single-use", self.name);
            return;
        };
        if !camera.is_opened() {
            warn!("[{}] camera not opened; cannot start recording thread", self.name);
            self.camera = Some(camera);
            return;
        }

        self.state.frame_count.store(0, Ordering::SeqCst);
        let _ = self.state.started_at.set(Instant::now());
        self.state.running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let metrics = self.metrics.clone();
        let name = self.name.clone();
        self.handle = Some(thread::spawn(move || {
            recording_loop(camera, state, metrics, name);
        }));
    }

    /// Stop recording: flip the run flag, join the capture thread, and let
    /// it disable recording and close the device. Idempotent.
    pub fn stop_recording(&mut self) {
        let was_running = self.state.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        if was_running {
            info!(
                "[{}] recording stopped (camera {}). Total frames: {}, duration: {:.1}s",
                self.name,
                self.serial,
                self.frame_count(),
                self.recording_duration()
            );
        }
    }
}

impl<D: DepthCamera> Drop for StreamRecorder<D> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn recording_loop<D: DepthCamera>(
    mut camera: D,
    state: Arc<RecorderState>,
    metrics: Arc<TimingRegistry>,
    name: String,
) {
    let runtime = RuntimeParams {
        confidence_threshold: 50,
        texture_confidence_threshold: 100,
        // Depth must be complete enough for later spatial mapping.
        enable_fill_mode: true,
    };
    let started = state
        .started_at
        .get()
        .copied()
        .unwrap_or_else(Instant::now);
    let mut last_frame: Option<Instant> = None;
    let mut last_progress = Instant::now();

    while state.running.load(Ordering::SeqCst) {
        let _scope = ScopedTimer::new(&metrics, "recorder.grab");
        let grab_start = Instant::now();
        let grab_result = camera.grab(&runtime);
        let grab_duration = grab_start.elapsed();
        let timing_logs = state.timing_logs.load(Ordering::SeqCst);

        match grab_result {
            Ok(()) => {
                let frames = state.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
                let now = Instant::now();
                let interval = last_frame.map(|prev| now.duration_since(prev));
                last_frame = Some(now);

                if timing_logs {
                    match interval {
                        None => info!("[{name}] Frame {frames}: first frame"),
                        Some(interval) if interval > LONG_DELAY_THRESHOLD => {
                            warn!(
                                "[{name}] LONG DELAY: frame {frames} interval={}ms grab={}ms (expected ~33ms)",
                                interval.as_millis(),
                                grab_duration.as_millis()
                            );
                            sysmon::log_status(&format!("long_delay_frame_{frames}"));
                        }
                        Some(interval) => info!(
                            "[{name}] Frame {frames}: interval={}ms grab={}ms",
                            interval.as_millis(),
                            grab_duration.as_millis()
                        ),
                    }
                    if grab_duration > SLOW_GRAB_THRESHOLD {
                        warn!(
                            "[{name}] SLOW GRAB: {}ms (expected ~16-33ms)",
                            grab_duration.as_millis()
                        );
                        sysmon::log_status(&format!(
                            "slow_grab_{}ms",
                            grab_duration.as_millis()
                        ));
                    }
                }

                if frames % REPORT_FRAME_INTERVAL == 0 {
                    info!("{}", metrics.report());
                    sysmon::log_status("periodic_baseline");
                }

                if last_progress.elapsed() >= PROGRESS_INTERVAL {
                    let elapsed = started.elapsed().as_secs_f64();
                    let fps = if elapsed > 0.0 {
                        frames as f64 / elapsed
                    } else {
                        0.0
                    };
                    info!(
                        "[{name}] Recording... frames: {frames}, duration: {elapsed:.1}s, fps: {fps:.1}"
                    );
                    last_progress = Instant::now();
                }
            }
            Err(err) => {
                // Failures are always logged, even with diagnostics off.
                warn!(
                    "[{name}] GRAB FAILED: {err}, grab_duration={}ms",
                    grab_duration.as_millis()
                );
                if timing_logs {
                    sysmon::log_status(&format!("grab_failed ({err})"));
                }
                thread::sleep(GRAB_RETRY_DELAY);
            }
        }
    }

    if let Some(start) = state.started_at.get() {
        state
            .final_duration_ms
            .store(start.elapsed().as_millis() as u64, Ordering::SeqCst);
    }
    camera.disable_recording();
    camera.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::sim::{SimGrab, SimulatedCamera};

    fn live_input() -> DeviceInput {
        DeviceInput::Live { serial: 7 }
    }

    fn recorder_with(camera: SimulatedCamera) -> StreamRecorder<SimulatedCamera> {
        StreamRecorder::new(
            camera,
            InitParams::default(),
            Arc::new(TimingRegistry::new()),
        )
    }

    #[test]
    fn open_failure_never_spawns_a_thread() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_with(SimulatedCamera::new(7).with_open_failure());

        assert!(!recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        assert!(!recorder.is_recording());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(recorder.frame_count(), 0);
    }

    #[test]
    fn recording_enable_failure_closes_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SimulatedCamera::new(7).with_recording_failure();
        let journal = camera.journal();
        let mut recorder = recorder_with(camera);

        assert!(!recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        assert!(!recorder.is_recording());

        let entries = journal.lock().unwrap();
        assert!(entries.iter().any(|entry| entry == "close"));
    }

    #[test]
    fn frame_count_tracks_only_successful_grabs() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SimulatedCamera::new(7)
            .with_script([SimGrab::Ok, SimGrab::Fail, SimGrab::Ok, SimGrab::Fail, SimGrab::Ok])
            .with_steady_grab(SimGrab::Fail);
        let mut recorder = recorder_with(camera);

        assert!(recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        // The loop drains the script quickly; failed grabs sleep 1 ms each.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.frame_count(), 3);
        assert!(recorder.is_recording());

        recorder.stop_recording();
        assert_eq!(recorder.frame_count(), 3);
    }

    #[test]
    fn stop_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SimulatedCamera::new(7);
        let journal = camera.journal();
        let mut recorder = recorder_with(camera);

        assert!(recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        thread::sleep(Duration::from_millis(20));
        recorder.stop_recording();
        let closes_after_first_stop = journal
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| *entry == "close")
            .count();

        recorder.stop_recording();
        let closes_after_second_stop = journal
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| *entry == "close")
            .count();

        assert_eq!(closes_after_first_stop, 1);
        assert_eq!(closes_after_second_stop, 1);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn duration_is_frozen_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_with(SimulatedCamera::new(7));

        assert!(recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        thread::sleep(Duration::from_millis(50));
        recorder.stop_recording();

        let first = recorder.recording_duration();
        assert!(first > 0.0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(recorder.recording_duration(), first);
    }

    #[test]
    fn staged_start_sequence_runs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let camera = SimulatedCamera::new(7);
        let journal = camera.journal();
        let mut recorder = recorder_with(camera);

        assert!(recorder.open_camera(&live_input(), 7));
        assert!(!recorder.is_recording());
        assert!(recorder.enable_recording(&dir.path().join("camera_7.rec"), 7));
        assert!(!recorder.is_recording());
        recorder.start_recording_thread();
        assert!(recorder.is_recording());
        recorder.stop_recording();

        let entries = journal.lock().unwrap();
        let open_at = entries.iter().position(|e| e.starts_with("open(")).unwrap();
        let enable_at = entries
            .iter()
            .position(|e| e.starts_with("enable_recording("))
            .unwrap();
        let disable_at = entries
            .iter()
            .position(|e| e == "disable_recording")
            .unwrap();
        let close_at = entries.iter().position(|e| e == "close").unwrap();
        assert!(open_at < enable_at);
        assert!(enable_at < disable_at);
        assert!(disable_at < close_at);
    }

    #[test]
    fn thread_start_without_open_is_refused() {
        let mut recorder = recorder_with(SimulatedCamera::new(7));
        recorder.start_recording_thread();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.frame_count(), 0);
    }

    #[test]
    fn recorder_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = recorder_with(SimulatedCamera::new(7));

        assert!(recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        thread::sleep(Duration::from_millis(10));
        recorder.stop_recording();

        // The camera was consumed by the finished capture thread.
        assert!(!recorder.start_recording(&live_input(), &dir.path().join("camera_7b.rec"), 7));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn grab_timings_reach_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(TimingRegistry::new());
        let mut recorder = StreamRecorder::new(
            SimulatedCamera::new(7),
            InitParams::default(),
            metrics.clone(),
        );

        assert!(recorder.start_recording(&live_input(), &dir.path().join("camera_7.rec"), 7));
        thread::sleep(Duration::from_millis(30));
        recorder.stop_recording();

        let snapshot = metrics.snapshot();
        assert!(snapshot["recorder.grab"].count > 0);
    }
}
