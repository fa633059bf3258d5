//! Simulated fusion engine.
//!
//! Stands in for the reconstruction SDK in tests and hardware-free runs.
//! Subscription failures can be injected per serial, and map readiness can
//! be delayed by a configurable number of polls.

use std::collections::BTreeSet;

use super::{FusionEngine, FusionError, MapRequestStatus, MappingParams, SpatialMap};
use crate::config::CommType;
use crate::fusion::CameraPose;

/// Synthetic engine that grows its map with every processed iteration.
pub struct SimulatedFusionEngine {
    initialized: bool,
    closed: bool,
    tracking_enabled: bool,
    mapping_enabled: bool,
    subscriptions: Vec<u64>,
    fail_subscribe: BTreeSet<u64>,
    processed: u64,
    request_count: u64,
    outstanding: bool,
    poll_latency: u32,
    polls_remaining: u32,
    map_version: u64,
}

impl SimulatedFusionEngine {
    pub fn new() -> Self {
        Self {
            initialized: false,
            closed: false,
            tracking_enabled: false,
            mapping_enabled: false,
            subscriptions: Vec::new(),
            fail_subscribe: BTreeSet::new(),
            processed: 0,
            request_count: 0,
            outstanding: false,
            poll_latency: 0,
            polls_remaining: 0,
            map_version: 0,
        }
    }

    /// Reject subscription attempts for this serial.
    pub fn with_subscribe_failure(mut self, serial: u64) -> Self {
        self.fail_subscribe.insert(serial);
        self
    }

    /// Report Pending for this many polls before a request completes.
    pub fn with_map_latency(mut self, polls: u32) -> Self {
        self.poll_latency = polls;
        self
    }

    pub fn subscriptions(&self) -> &[u64] {
        &self.subscriptions
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn map_version(&self) -> u64 {
        self.map_version
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Default for SimulatedFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionEngine for SimulatedFusionEngine {
    fn init(&mut self) -> Result<(), FusionError> {
        self.initialized = true;
        Ok(())
    }

    fn subscribe(
        &mut self,
        serial: u64,
        _comm: &CommType,
        _pose: &CameraPose,
    ) -> Result<(), FusionError> {
        if !self.initialized {
            return Err(FusionError::Init("engine not initialized".to_string()));
        }
        if self.fail_subscribe.contains(&serial) {
            return Err(FusionError::Subscribe("CONNECTION_TIMED_OUT".to_string()));
        }
        self.subscriptions.push(serial);
        Ok(())
    }

    fn enable_positional_tracking(&mut self) -> Result<(), FusionError> {
        self.tracking_enabled = true;
        Ok(())
    }

    fn enable_spatial_mapping(&mut self, _params: &MappingParams) -> Result<(), FusionError> {
        self.mapping_enabled = true;
        Ok(())
    }

    fn process(&mut self) -> Result<(), FusionError> {
        if !self.initialized || self.closed {
            return Err(FusionError::Init("engine not running".to_string()));
        }
        self.processed += 1;
        Ok(())
    }

    fn request_map_async(&mut self) {
        // The session must never overlap requests; catching it here makes
        // orchestration tests fail loudly.
        assert!(
            !self.outstanding,
            "map requested while a request is outstanding"
        );
        self.outstanding = true;
        self.request_count += 1;
        self.polls_remaining = self.poll_latency;
    }

    fn poll_map_request(&mut self) -> MapRequestStatus {
        if !self.outstanding {
            return MapRequestStatus::Failed;
        }
        if self.polls_remaining > 0 {
            self.polls_remaining -= 1;
            return MapRequestStatus::Pending;
        }
        MapRequestStatus::Ready
    }

    fn retrieve_map(&mut self) -> Result<SpatialMap, FusionError> {
        if !self.outstanding {
            return Err(FusionError::Map("no completed request".to_string()));
        }
        self.outstanding = false;
        self.map_version += 1;
        let vertex_count = (self.processed as usize + 1) * 16;
        Ok(SpatialMap {
            vertex_count,
            triangle_count: vertex_count * 2,
            payload: vec![0xA5; vertex_count],
        })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_failure_is_injected_per_serial() {
        let mut engine = SimulatedFusionEngine::new().with_subscribe_failure(2);
        engine.init().unwrap();
        assert!(engine
            .subscribe(1, &CommType::Local, &CameraPose::default())
            .is_ok());
        assert!(engine
            .subscribe(2, &CommType::Local, &CameraPose::default())
            .is_err());
        assert_eq!(engine.subscriptions(), &[1]);
    }

    #[test]
    fn map_request_completes_after_latency() {
        let mut engine = SimulatedFusionEngine::new().with_map_latency(2);
        engine.init().unwrap();
        engine.process().unwrap();

        engine.request_map_async();
        assert_eq!(engine.poll_map_request(), MapRequestStatus::Pending);
        assert_eq!(engine.poll_map_request(), MapRequestStatus::Pending);
        assert_eq!(engine.poll_map_request(), MapRequestStatus::Ready);

        let map = engine.retrieve_map().unwrap();
        assert!(!map.is_empty());
        assert_eq!(engine.map_version(), 1);
    }

    #[test]
    #[should_panic(expected = "outstanding")]
    fn overlapping_requests_panic() {
        let mut engine = SimulatedFusionEngine::new();
        engine.init().unwrap();
        engine.request_map_async();
        engine.request_map_async();
    }
}
