//! Depth camera capture, recording, and spatial fusion orchestration.
//!
//! The crate is organized around two capability boundaries and the workers
//! that drive them:
//!
//! - [`camera`] defines the [`camera::DepthCamera`] trait that sensor SDK
//!   backends implement, plus a simulated backend for tests and
//!   hardware-free runs.
//! - [`fusion`] defines the [`fusion::FusionEngine`] boundary and the
//!   multi-camera [`fusion::FusionSession`] orchestrator.
//! - [`recorder`] and [`publisher`] each own one camera on a background
//!   thread: the recorder persists frames to a stream file, the publisher
//!   feeds a fusion subscription.
//! - [`metrics`] and [`sysmon`] provide the timing registry and host
//!   telemetry snapshots the workers report through.
//!
//! Cameras run fully independently. A camera that fails to open or enable
//! is excluded and reported; it never stops its siblings.

pub mod align;
pub mod camera;
pub mod config;
pub mod fusion;
pub mod metrics;
pub mod publisher;
pub mod recorder;
pub mod sysmon;
