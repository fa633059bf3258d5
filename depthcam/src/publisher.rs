//! Per-camera fusion feed worker.
//!
//! A [`FramePublisher`] owns one camera and grabs frames on a background
//! thread so the device keeps streaming into its fusion subscription. The
//! worker can optionally maintain a rolling capture-rate window and a
//! latest-frame cache for external consumers; both are off by default to
//! avoid copies nobody reads. Instances are single-use.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{error, warn};

use crate::camera::{
    CameraInfo, DepthCamera, DepthMode, DeviceInput, Frame, InitParams, RuntimeParams, View,
};

/// Capacity of the rolling capture timestamp window.
const FPS_WINDOW_CAPACITY: usize = 20;

/// State shared between the publisher handle and its capture thread.
struct PublisherState {
    running: AtomicBool,
    fps_tracking: AtomicBool,
    retrieve_images: AtomicBool,
    fps_window: Mutex<VecDeque<Instant>>,
    latest_frame: Mutex<Option<Frame>>,
}

/// Feeds one camera into a fusion subscription from a background thread.
pub struct FramePublisher<D: DepthCamera> {
    camera: Option<D>,
    state: Arc<PublisherState>,
    init: InitParams,
    info: Option<CameraInfo>,
    handle: Option<JoinHandle<()>>,
}

impl<D: DepthCamera + Send + 'static> FramePublisher<D> {
    pub fn new(camera: D, mut init: InitParams) -> Self {
        // Fusion reconstruction always runs the highest-quality depth.
        init.depth_mode = DepthMode::Ultra;
        Self {
            camera: Some(camera),
            state: Arc::new(PublisherState {
                running: AtomicBool::new(false),
                fps_tracking: AtomicBool::new(false),
                retrieve_images: AtomicBool::new(false),
                fps_window: Mutex::new(VecDeque::with_capacity(FPS_WINDOW_CAPACITY)),
                latest_frame: Mutex::new(None),
            }),
            init,
            info: None,
            handle: None,
        }
    }

    /// Open the camera and enable positional tracking. Returns false if
    /// the worker is already running or either step fails; on failure the
    /// device is left however the failing call left it.
    pub fn open(&mut self, input: &DeviceInput) -> bool {
        if self.is_running() || self.handle.is_some() {
            return false;
        }
        let Some(camera) = self.camera.as_mut() else {
            return false;
        };
        let mut init = self.init.clone();
        if input.is_playback() {
            // Fusion needs playback paced at the recorded frame rate.
            init.realtime_playback = true;
        }
        if let Err(err) = camera.open(input, &init) {
            error!("Failed to open {input}: {err}");
            return false;
        }
        if let Err(err) = camera.enable_positional_tracking() {
            error!("Failed to enable positional tracking on {input}: {err}");
            return false;
        }
        self.info = camera.info();
        true
    }

    /// Seek a playback input before `start`, so aligned multi-stream
    /// sessions begin at comparable instants.
    pub fn set_start_stream_position(&mut self, frame_index: u64) {
        if let Some(camera) = self.camera.as_mut() {
            if let Err(err) = camera.set_stream_position(frame_index) {
                warn!("Failed to seek stream to frame {frame_index}: {err}");
            }
        }
    }

    /// Start on-device publishing and the background grab loop.
    pub fn start(&mut self) {
        if self.is_running() || self.handle.is_some() {
            return;
        }
        let Some(mut camera) = self.camera.take() else {
            return;
        };
        if !camera.is_opened() {
            self.camera = Some(camera);
            return;
        }
        if let Err(err) = camera.start_publishing() {
            error!("Failed to start publishing: {err}");
            self.camera = Some(camera);
            return;
        }
        self.state.running.store(true, Ordering::SeqCst);
        let state = self.state.clone();
        self.handle = Some(thread::spawn(move || publish_loop(camera, state)));
    }

    /// Stop the grab loop and close the camera. Idempotent; the worker
    /// cannot be restarted afterwards.
    pub fn stop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        // A worker stopped before start still owns the camera.
        if let Some(mut camera) = self.camera.take() {
            camera.close();
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Track capture timestamps for [`FramePublisher::average_fps`].
    pub fn enable_fps_tracking(&self, enabled: bool) {
        self.state.fps_tracking.store(enabled, Ordering::SeqCst);
    }

    /// Cache the latest left image for [`FramePublisher::latest_frame`].
    pub fn enable_image_retrieval(&self, enabled: bool) {
        self.state.retrieve_images.store(enabled, Ordering::SeqCst);
    }

    /// Average capture rate over the rolling window, or 0.0 with fewer
    /// than two samples.
    pub fn average_fps(&self) -> f64 {
        let window = self.state.fps_window.lock().unwrap();
        fps_from_window(&window)
    }

    /// Copy of the most recent cached frame. None until the first frame
    /// lands in the cache. The copy is made under the cache lock, so a
    /// concurrent writer can never tear it.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.state.latest_frame.lock().unwrap().clone()
    }

    /// Camera description captured at open time, for logging.
    pub fn info(&self) -> Option<&CameraInfo> {
        self.info.as_ref()
    }
}

impl<D: DepthCamera> Drop for FramePublisher<D> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn publish_loop<D: DepthCamera>(mut camera: D, state: Arc<PublisherState>) {
    let runtime = RuntimeParams {
        // Low confidence keeps noisy points out of the fused model.
        confidence_threshold: 50,
        ..RuntimeParams::default()
    };

    while state.running.load(Ordering::SeqCst) {
        if camera.grab(&runtime).is_ok() {
            if state.fps_tracking.load(Ordering::SeqCst) {
                let mut window = state.fps_window.lock().unwrap();
                window.push_back(Instant::now());
                while window.len() > FPS_WINDOW_CAPACITY {
                    window.pop_front();
                }
            }
            if state.retrieve_images.load(Ordering::SeqCst) {
                if let Ok(frame) = camera.retrieve_image(View::Left) {
                    *state.latest_frame.lock().unwrap() = Some(frame);
                }
            }
        }
        // Failed grabs retry immediately; the device paces its own delivery.
    }
    camera.close();
}

/// Average frame rate over a capture timestamp window.
fn fps_from_window(window: &VecDeque<Instant>) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return 0.0;
    };
    let elapsed_ms = last.duration_since(*first).as_secs_f64() * 1000.0;
    if elapsed_ms <= 0.0 {
        return 0.0;
    }
    (window.len() - 1) as f64 * 1000.0 / elapsed_ms
}
