//! Recorded-stream start alignment.
//!
//! When a fusion session replays several recordings, each stream must
//! begin playback at a frame captured at a comparable instant. The
//! alignment computation itself lives outside this crate; this module
//! defines its call contract and a first-frame default.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stream alignment failed: {0}")]
pub struct AlignError(pub String);

/// Computes, per camera serial, the frame index each recorded stream
/// should start playback from.
pub trait StreamAligner {
    fn compute_start_offsets(
        &self,
        streams: &BTreeMap<u64, PathBuf>,
    ) -> Result<BTreeMap<u64, u64>, AlignError>;
}

impl<F> StreamAligner for F
where
    F: Fn(&BTreeMap<u64, PathBuf>) -> Result<BTreeMap<u64, u64>, AlignError>,
{
    fn compute_start_offsets(
        &self,
        streams: &BTreeMap<u64, PathBuf>,
    ) -> Result<BTreeMap<u64, u64>, AlignError> {
        self(streams)
    }
}

/// Starts every stream at its first frame. Used when no external aligner
/// is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFrameAligner;

impl StreamAligner for FirstFrameAligner {
    fn compute_start_offsets(
        &self,
        streams: &BTreeMap<u64, PathBuf>,
    ) -> Result<BTreeMap<u64, u64>, AlignError> {
        Ok(streams.keys().map(|&serial| (serial, 0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_aligner_returns_zero_offsets() {
        let mut streams = BTreeMap::new();
        streams.insert(1u64, PathBuf::from("/tmp/camera_1.rec"));
        streams.insert(2u64, PathBuf::from("/tmp/camera_2.rec"));

        let offsets = FirstFrameAligner.compute_start_offsets(&streams).unwrap();
        assert_eq!(offsets.len(), 2);
        assert!(offsets.values().all(|&offset| offset == 0));
    }

    #[test]
    fn closures_implement_the_aligner_contract() {
        let aligner = |streams: &BTreeMap<u64, PathBuf>| -> Result<BTreeMap<u64, u64>, AlignError> {
            Ok(streams.keys().map(|&serial| (serial, serial * 10)).collect())
        };
        let mut streams = BTreeMap::new();
        streams.insert(3u64, PathBuf::from("/tmp/camera_3.rec"));

        let offsets = aligner.compute_start_offsets(&streams).unwrap();
        assert_eq!(offsets[&3], 30);
    }
}
