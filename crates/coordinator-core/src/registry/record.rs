//! The per-daemon record and its liveness state machine.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::capability::{ActiveJob, Capability, TelemetrySnapshot};

/// Liveness plus administrative state, folded into one enum (see DESIGN.md
/// open-question resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Connected,
    Draining,
    Unhealthy,
    Disconnected,
}

/// Canonical per-daemon state. `last_heartbeat` is a monotonic [`Instant`];
/// it is never serialized directly since it isn't meaningful across process
/// boundaries.
#[derive(Debug, Clone)]
pub struct DaemonRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub capabilities: Capability,
    pub state: DaemonState,
    pub last_heartbeat: Instant,
    pub telemetry: Option<TelemetrySnapshot>,
    pub active_jobs: usize,
    pub active_job_ids: Vec<ActiveJob>,
}

impl DaemonRecord {
    /// Builds a freshly-registered record: state `Connected`, no telemetry yet.
    #[must_use]
    pub fn new(id: String, name: String, version: String, capabilities: Capability) -> Self {
        Self {
            id,
            name,
            version,
            capabilities,
            state: DaemonState::Connected,
            last_heartbeat: Instant::now(),
            telemetry: None,
            active_jobs: 0,
            active_job_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.elapsed()
    }

    /// Eligibility: connected, has the encoder if one is
    /// required, under its declared job cap, and has an open GPU session if
    /// GPU work is required.
    #[must_use]
    pub fn is_eligible(&self, required_encoder: Option<&str>, require_gpu: bool) -> bool {
        if self.state != DaemonState::Connected {
            return false;
        }
        if let Some(encoder) = required_encoder {
            if !self.capabilities.has_encoder(encoder) {
                return false;
            }
        }
        let max_jobs = self.capabilities.max_concurrent_jobs;
        if max_jobs > 0 && self.active_jobs as u32 >= max_jobs {
            return false;
        }
        if require_gpu && !self.capabilities.has_available_gpu_session() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> Capability {
        Capability {
            video_encoders: vec!["libx264".into()],
            max_concurrent_jobs: 4,
            ..Default::default()
        }
    }

    #[test]
    fn fresh_record_is_connected_with_no_telemetry() {
        let record = DaemonRecord::new("d1".into(), "d1".into(), "1.0".into(), cap());
        assert_eq!(record.state, DaemonState::Connected);
        assert!(record.telemetry.is_none());
        assert_eq!(record.active_jobs, 0);
    }

    #[test]
    fn eligibility_requires_connected_state() {
        let mut record = DaemonRecord::new("d1".into(), "d1".into(), "1.0".into(), cap());
        assert!(record.is_eligible(Some("libx264"), false));
        record.state = DaemonState::Draining;
        assert!(!record.is_eligible(Some("libx264"), false));
    }

    #[test]
    fn eligibility_respects_declared_max_jobs() {
        let mut record = DaemonRecord::new("d1".into(), "d1".into(), "1.0".into(), cap());
        record.active_jobs = 4;
        assert!(!record.is_eligible(None, false));
        record.active_jobs = 3;
        assert!(record.is_eligible(None, false));
    }

    #[test]
    fn unlimited_max_jobs_never_blocks_eligibility() {
        let mut record = DaemonRecord::new(
            "d1".into(),
            "d1".into(),
            "1.0".into(),
            Capability {
                max_concurrent_jobs: 0,
                ..cap()
            },
        );
        record.active_jobs = 1000;
        assert!(record.is_eligible(None, false));
    }
}
