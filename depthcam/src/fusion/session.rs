//! Multi-camera fusion session driver.
//!
//! Brings up one publish worker per local camera, aligns recorded streams
//! before any worker starts, subscribes every configured camera to the
//! fusion engine, and runs the processing loop with a debounced
//! asynchronous map refresh. Per-camera failures are reported and the
//! camera is dropped; only a session with zero subscribed cameras aborts.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::align::StreamAligner;
use crate::camera::{DepthCamera, DeviceInput, InitParams};
use crate::config::{CameraSetup, CommType, RigConfig};
use crate::fusion::{FusionEngine, FusionError, MapRequestStatus, MappingParams, SpatialMap};
use crate::publisher::FramePublisher;

/// Minimum interval between successive map refresh requests. Map
/// extraction is expensive next to per-frame fusion; throttling lets map
/// computation overlap continued frame processing without starving it.
const MAP_REFRESH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Fatal session errors. Per-camera problems are logged, not returned.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("fusion engine initialization failed: {0}")]
    Init(FusionError),
    #[error("no cameras could be subscribed to the fusion engine")]
    NoSubscriptions,
    #[error("positional tracking failed: {0}")]
    Tracking(FusionError),
    #[error("spatial mapping failed: {0}")]
    Mapping(FusionError),
    #[error("failed to save spatial map to {path}: {source}")]
    SaveMap { path: PathBuf, source: io::Error },
}

/// Debounced single-outstanding-request scheduler for map refreshes.
///
/// At most one request is in flight, and a new one is issued only after
/// the debounce interval has passed since both the previous issuance and
/// the last completed update.
#[derive(Debug)]
pub struct MapScheduler {
    awaiting: bool,
    last_request: Option<Instant>,
    last_update: Option<Instant>,
    debounce: Duration,
}

impl MapScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            awaiting: false,
            last_request: None,
            last_update: None,
            debounce,
        }
    }

    pub fn awaiting(&self) -> bool {
        self.awaiting
    }

    /// Whether a new request may be issued at `now`.
    pub fn should_request(&self, now: Instant) -> bool {
        if self.awaiting {
            return false;
        }
        let debounced = |then: Option<Instant>| match then {
            Some(t) => now.duration_since(t) >= self.debounce,
            None => true,
        };
        debounced(self.last_request) && debounced(self.last_update)
    }

    pub fn on_requested(&mut self, now: Instant) {
        self.awaiting = true;
        self.last_request = Some(now);
    }

    pub fn on_completed(&mut self, now: Instant) {
        self.awaiting = false;
        self.last_update = Some(now);
    }

    /// A failed request clears the outstanding slot without resetting the
    /// update clock; the session continues with the previous map.
    pub fn on_failed(&mut self) {
        self.awaiting = false;
    }
}

/// Counters reported when a session's processing loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_processed: u64,
    pub map_updates: u64,
    pub final_map_vertices: usize,
}

/// A running multi-camera fusion session.
pub struct FusionSession<D: DepthCamera + Send + 'static, E: FusionEngine> {
    engine: E,
    publishers: Vec<(u64, FramePublisher<D>)>,
    scheduler: MapScheduler,
    latest_map: SpatialMap,
    subscribed: Vec<u64>,
}

impl<D: DepthCamera + Send + 'static, E: FusionEngine> FusionSession<D, E> {
    /// Open, align, and start the publish workers, then bring up the
    /// fusion engine and subscribe every configured camera.
    ///
    /// `camera_factory` supplies the device instance for each local
    /// camera. Cameras that fail to open are skipped with a warning; a
    /// session where no camera subscribes is a fatal startup error.
    pub fn prepare<F>(
        config: &RigConfig,
        mut engine: E,
        init: &InitParams,
        mut camera_factory: F,
        aligner: &dyn StreamAligner,
    ) -> Result<Self, SessionError>
    where
        F: FnMut(&CameraSetup) -> D,
    {
        let mut publishers: Vec<(u64, FramePublisher<D>)> = Vec::new();
        let mut playback_streams: BTreeMap<u64, PathBuf> = BTreeMap::new();

        for setup in config.cameras.iter().filter(|s| s.comm == CommType::Local) {
            info!("Opening {} ({})", setup.display_name(), setup.input);
            let mut publisher = FramePublisher::new(camera_factory(setup), init.clone());
            if !publisher.open(&setup.input) {
                warn!(
                    "Could not open camera {}; excluding it from the session",
                    setup.serial
                );
                continue;
            }
            if let DeviceInput::Playback { path } = &setup.input {
                playback_streams.insert(setup.serial, path.clone());
            }
            publishers.push((setup.serial, publisher));
        }

        // Recorded streams started blind would fuse frames captured at
        // different instants; align their start offsets first.
        if playback_streams.len() > 1 {
            info!("Aligning {} recorded streams", playback_streams.len());
            match aligner.compute_start_offsets(&playback_streams) {
                Ok(offsets) => {
                    for (serial, publisher) in &mut publishers {
                        if let Some(&frame_index) = offsets.get(serial) {
                            info!("Camera {serial} starts at frame {frame_index}");
                            publisher.set_start_stream_position(frame_index);
                        }
                    }
                }
                Err(err) => {
                    warn!("Stream alignment failed: {err}; all streams start at frame 0");
                }
            }
        }

        for (_, publisher) in &mut publishers {
            publisher.start();
        }

        if let Err(err) = engine.init() {
            Self::teardown(&mut publishers, &mut engine);
            return Err(SessionError::Init(err));
        }

        let mut subscribed = Vec::new();
        for setup in &config.cameras {
            match engine.subscribe(setup.serial, &setup.comm, &setup.pose) {
                Ok(()) => subscribed.push(setup.serial),
                Err(err) => warn!("Unable to subscribe to camera {}: {err}", setup.serial),
            }
        }
        if subscribed.is_empty() {
            Self::teardown(&mut publishers, &mut engine);
            return Err(SessionError::NoSubscriptions);
        }

        if let Err(err) = engine.enable_positional_tracking() {
            Self::teardown(&mut publishers, &mut engine);
            return Err(SessionError::Tracking(err));
        }
        if let Err(err) = engine.enable_spatial_mapping(&MappingParams::default()) {
            Self::teardown(&mut publishers, &mut engine);
            return Err(SessionError::Mapping(err));
        }

        Ok(Self {
            engine,
            publishers,
            scheduler: MapScheduler::new(MAP_REFRESH_DEBOUNCE),
            latest_map: SpatialMap::default(),
            subscribed,
        })
    }

    /// Serials that subscribed successfully.
    pub fn subscribed(&self) -> &[u64] {
        &self.subscribed
    }

    /// The publish workers, keyed by camera serial.
    pub fn publishers(&self) -> &[(u64, FramePublisher<D>)] {
        &self.publishers
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run the fusion loop until `keep_running` returns false, then save
    /// the final map to `map_output`, stop every worker, and close the
    /// engine. Workers stop before the engine closes so none publishes
    /// into a closed engine.
    pub fn run(
        &mut self,
        mut keep_running: impl FnMut() -> bool,
        map_output: &Path,
    ) -> Result<SessionSummary, SessionError> {
        info!(
            "Fusion loop starting with {} subscribed camera(s)",
            self.subscribed.len()
        );
        let mut frames_processed = 0u64;
        let mut map_updates = 0u64;

        while keep_running() {
            match self.engine.process() {
                Ok(()) => {
                    frames_processed += 1;
                    let now = Instant::now();
                    if self.scheduler.should_request(now) {
                        self.engine.request_map_async();
                        self.scheduler.on_requested(now);
                    }
                }
                Err(_) => {
                    // Transient; the next iteration retries.
                }
            }

            if self.scheduler.awaiting() {
                match self.engine.poll_map_request() {
                    MapRequestStatus::Pending => {}
                    MapRequestStatus::Ready => match self.engine.retrieve_map() {
                        Ok(map) => {
                            debug!(
                                "Map refreshed: {} vertices, {} triangles",
                                map.vertex_count, map.triangle_count
                            );
                            self.latest_map = map;
                            map_updates += 1;
                            self.scheduler.on_completed(Instant::now());
                        }
                        Err(err) => {
                            warn!("Failed to retrieve spatial map: {err}");
                            self.scheduler.on_failed();
                        }
                    },
                    MapRequestStatus::Failed => {
                        warn!("Spatial map request failed");
                        self.scheduler.on_failed();
                    }
                }
            }
        }

        info!("Fusion loop exiting after {frames_processed} processed frames");
        let save_result = if self.latest_map.is_empty() {
            warn!("No spatial map was produced during the session");
            Ok(())
        } else {
            info!(
                "Saving final map ({} vertices) to {}",
                self.latest_map.vertex_count,
                map_output.display()
            );
            self.latest_map.save(map_output).map_err(|source| {
                SessionError::SaveMap {
                    path: map_output.to_path_buf(),
                    source,
                }
            })
        };

        Self::teardown(&mut self.publishers, &mut self.engine);
        save_result?;

        Ok(SessionSummary {
            frames_processed,
            map_updates,
            final_map_vertices: self.latest_map.vertex_count,
        })
    }

    fn teardown(publishers: &mut [(u64, FramePublisher<D>)], engine: &mut E) {
        for (_, publisher) in publishers.iter_mut() {
            publisher.stop();
        }
        engine.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_issues_at_most_one_outstanding_request() {
        let mut scheduler = MapScheduler::new(Duration::from_millis(100));
        let t0 = Instant::now();

        assert!(scheduler.should_request(t0));
        scheduler.on_requested(t0);
        assert!(scheduler.awaiting());
        // Outstanding request blocks further issuance at any later time.
        assert!(!scheduler.should_request(t0 + Duration::from_millis(50)));
        assert!(!scheduler.should_request(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn scheduler_debounces_from_last_completed_update() {
        let mut scheduler = MapScheduler::new(Duration::from_millis(100));
        let t0 = Instant::now();

        scheduler.on_requested(t0);
        scheduler.on_completed(t0 + Duration::from_millis(60));

        // 40 ms after completion: still inside the debounce window.
        assert!(!scheduler.should_request(t0 + Duration::from_millis(100)));
        // 100 ms after completion: allowed.
        assert!(scheduler.should_request(t0 + Duration::from_millis(160)));
    }

    #[test]
    fn scheduler_debounces_from_issuance_after_failure() {
        let mut scheduler = MapScheduler::new(Duration::from_millis(100));
        let t0 = Instant::now();

        scheduler.on_requested(t0);
        scheduler.on_failed();
        // The failure cleared the outstanding slot, but a new request still
        // waits out the window measured from the failed issuance.
        assert!(!scheduler.should_request(t0 + Duration::from_millis(50)));
        assert!(scheduler.should_request(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn scheduler_first_request_is_immediate() {
        let scheduler = MapScheduler::new(Duration::from_millis(100));
        assert!(scheduler.should_request(Instant::now()));
    }
}
