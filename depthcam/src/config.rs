//! Rig configuration.
//!
//! A JSON file lists every camera in the rig with its identity, input,
//! communication method, and world pose. Configuration problems are fatal
//! and reported before any worker starts.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::camera::DeviceInput;
use crate::fusion::CameraPose;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read rig config {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse rig config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("rig config {path} lists no cameras")]
    Empty { path: PathBuf },
}

/// How a camera's data reaches the fusion engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CommType {
    /// The camera runs in this process; its worker feeds the engine
    /// directly.
    Local,
    /// The camera publishes from another host on the local network.
    Network { port: u16 },
}

/// One camera in the rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSetup {
    pub serial: u64,
    /// Optional display name; log lines fall back to `Camera-<serial>`.
    #[serde(default)]
    pub name: Option<String>,
    pub comm: CommType,
    pub input: DeviceInput,
    #[serde(default)]
    pub pose: CameraPose,
}

impl CameraSetup {
    /// Display name used in log lines and file naming.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Camera-{}", self.serial),
        }
    }
}

/// The full set of cameras in a capture or fusion session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub cameras: Vec<CameraSetup>,
}

impl RigConfig {
    /// Load a rig configuration from a JSON file.
    ///
    /// # Errors
    /// Missing files, malformed JSON, and an empty camera list all fail;
    /// none of these are recoverable mid-session.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RigConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if config.cameras.is_empty() {
            return Err(ConfigError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(config)
    }

    /// Deterministic recorded-stream file name for a camera.
    pub fn recording_filename(serial: u64) -> String {
        format!("camera_{serial}.rec")
    }

    /// Copy of this config with every camera's input replaced by its
    /// recorded stream under `dir`. Cameras without a recording are
    /// dropped with a warning.
    pub fn with_playback_inputs(&self, dir: &Path) -> Self {
        let cameras = self
            .cameras
            .iter()
            .filter_map(|setup| {
                let path = dir.join(Self::recording_filename(setup.serial));
                if path.exists() {
                    info!(
                        "Found recording for camera {}: {}",
                        setup.serial,
                        path.display()
                    );
                    Some(CameraSetup {
                        input: DeviceInput::Playback { path },
                        ..setup.clone()
                    })
                } else {
                    warn!(
                        "No recording for camera {} in {}; dropping it",
                        setup.serial,
                        dir.display()
                    );
                    None
                }
            })
            .collect();
        Self { cameras }
    }

    /// Cameras whose worker runs in this process.
    pub fn local_cameras(&self) -> impl Iterator<Item = &CameraSetup> {
        self.cameras.iter().filter(|s| s.comm == CommType::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_json() -> &'static str {
        r#"{
            "cameras": [
                {
                    "serial": 47797222,
                    "name": "front",
                    "comm": { "type": "local" },
                    "input": { "type": "live", "serial": 47797222 },
                    "pose": { "translation": [0.0, 0.0, 0.0], "rotation": [0.0, 0.0, 0.0] }
                },
                {
                    "serial": 57709210,
                    "comm": { "type": "local" },
                    "input": { "type": "live", "serial": 57709210 }
                }
            ]
        }"#
    }

    #[test]
    fn loads_a_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        fs::write(&path, sample_json()).unwrap();

        let config = RigConfig::load(&path).unwrap();
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].display_name(), "front");
        assert_eq!(config.cameras[1].display_name(), "Camera-57709210");
        assert_eq!(config.cameras[1].pose, CameraPose::default());
        assert_eq!(config.local_cameras().count(), 2);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RigConfig::load(Path::new("/nonexistent/rig.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        fs::write(&path, "{ not json").unwrap();
        let err = RigConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_camera_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        fs::write(&path, r#"{ "cameras": [] }"#).unwrap();
        let err = RigConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Empty { .. }));
    }

    #[test]
    fn playback_substitution_drops_missing_recordings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("rig.json");
        fs::write(&config_path, sample_json()).unwrap();
        let config = RigConfig::load(&config_path).unwrap();

        let recordings = tempfile::tempdir().unwrap();
        fs::write(
            recordings.path().join(RigConfig::recording_filename(47797222)),
            b"data",
        )
        .unwrap();

        let playback = config.with_playback_inputs(recordings.path());
        assert_eq!(playback.cameras.len(), 1);
        assert_eq!(playback.cameras[0].serial, 47797222);
        assert!(playback.cameras[0].input.is_playback());
    }
}
