//! Fusion engine boundary and multi-camera session orchestration.
//!
//! The [`FusionEngine`] trait is the seam to the reconstruction SDK: it
//! gathers data from every subscribed camera, fuses it, and produces a
//! spatial map on request. [`FusionSession`] drives N publish workers plus
//! an engine through a complete session.

pub mod session;
pub mod sim;

pub use session::{FusionSession, MapScheduler, SessionError, SessionSummary};

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::config::CommType;

/// Error type for fusion engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FusionError {
    #[error("fusion engine initialization failed: {0}")]
    Init(String),
    #[error("subscription failed: {0}")]
    Subscribe(String),
    /// No synchronized frame set was available to fuse this iteration.
    #[error("no new data")]
    NoNewData,
    #[error("positional tracking failed: {0}")]
    Tracking(String),
    #[error("spatial mapping failed: {0}")]
    Mapping(String),
    #[error("spatial map request failed: {0}")]
    Map(String),
}

/// World pose of a camera in the rig.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Translation in meters.
    pub translation: [f32; 3],
    /// Rotation as XYZ Euler angles in radians.
    pub rotation: [f32; 3],
}

/// Spatial mapping configuration shared by on-device and fused mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingParams {
    /// Spatial resolution of the map in meters.
    pub resolution_m: f32,
    /// Memory ceiling for map accumulation.
    pub max_memory_mb: u32,
    /// Keep texture data alongside geometry.
    pub save_texture: bool,
}

impl Default for MappingParams {
    fn default() -> Self {
        Self {
            resolution_m: 0.05,
            max_memory_mb: 2048,
            save_texture: true,
        }
    }
}

/// Completion state of an asynchronous map request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapRequestStatus {
    Pending,
    Ready,
    Failed,
}

/// A reconstructed spatial map.
///
/// The payload is opaque to the rig; only the engine and downstream
/// viewers interpret it. Vertex and triangle counts are carried for
/// logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialMap {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub payload: Vec<u8>,
}

impl SpatialMap {
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }

    /// Persist the map artifact.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, &self.payload)
    }
}

/// A multi-camera reconstruction engine.
pub trait FusionEngine {
    fn init(&mut self) -> Result<(), FusionError>;

    /// Subscribe one camera by identity, communication method, and pose.
    fn subscribe(
        &mut self,
        serial: u64,
        comm: &CommType,
        pose: &CameraPose,
    ) -> Result<(), FusionError>;

    fn enable_positional_tracking(&mut self) -> Result<(), FusionError>;

    fn enable_spatial_mapping(&mut self, params: &MappingParams) -> Result<(), FusionError>;

    /// Gather, synchronize, and fuse the subscribed cameras' latest data.
    fn process(&mut self) -> Result<(), FusionError>;

    /// Begin computing a map snapshot in the background.
    fn request_map_async(&mut self);

    /// Completion status of the outstanding map request.
    fn poll_map_request(&mut self) -> MapRequestStatus;

    /// Retrieve the completed map snapshot.
    fn retrieve_map(&mut self) -> Result<SpatialMap, FusionError>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spatial_map_save_writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.bin");
        let map = SpatialMap {
            vertex_count: 2,
            triangle_count: 1,
            payload: vec![1, 2, 3, 4],
        };
        map.save(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
        assert!(!map.is_empty());
        assert!(SpatialMap::default().is_empty());
    }
}
