//! The daemon registry: single source of truth for daemon existence and state.
//!
//! Shared across the RPC server, the health monitor, and the service facade.
//! Backed by a [`DashMap`] so concurrent operations on distinct identifiers
//! never contend; this coarse-grained design is sufficient at expected fleet
//! sizes (see DESIGN.md).

pub mod record;

use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;

use crate::capability::{ActiveJob, Capability, TelemetrySnapshot};
pub use record::{DaemonRecord, DaemonState};

/// Failure modes specific to registry operations. Heartbeat against an
/// unknown identifier is the only one that must surface as a distinct,
/// typed error rather than an empty/false result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown daemon: {0}")]
    UnknownDaemon(String),
    #[error("daemon {0} is not draining or unhealthy, cannot activate")]
    InvalidActivation(String),
}

/// The registry itself. Cheaply cloneable (wraps an `Arc`-like `DashMap`
/// reference internally via `Arc` at the call site); constructed once per
/// coordinator and shared.
#[derive(Default)]
pub struct DaemonRegistry {
    daemons: DashMap<String, DaemonRecord>,
}

impl DaemonRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a daemon. Never fails: re-registration
    /// under an existing identifier atomically replaces the record, which
    /// resets the freshness timestamp and the state to `Connected`.
    pub fn register(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: Capability,
    ) -> DaemonRecord {
        let id = id.into();
        let record = DaemonRecord::new(id.clone(), name.into(), version.into(), capabilities);
        tracing::info!(daemon_id = %id, "daemon registered");
        self.daemons.insert(id, record.clone());
        record
    }

    /// Transitions a daemon to `Disconnected` and removes its record.
    /// Idempotent: unknown identifiers are a silent no-op.
    pub fn unregister(&self, id: &str, reason: &str) {
        if self.daemons.remove(id).is_some() {
            tracing::info!(daemon_id = %id, reason, "daemon unregistered");
        }
    }

    /// Applies a heartbeat: updates telemetry, refreshes the freshness
    /// timestamp, recomputes `active_jobs`, and restores `Connected` if the
    /// daemon was `Unhealthy`. Fails with [`RegistryError::UnknownDaemon`] if
    /// the identifier has no record, so the caller (the RPC layer) can tell
    /// the daemon to re-register.
    pub fn handle_heartbeat(
        &self,
        id: &str,
        telemetry: Option<TelemetrySnapshot>,
        active_jobs: Vec<ActiveJob>,
    ) -> Result<DaemonRecord, RegistryError> {
        let mut entry = self
            .daemons
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownDaemon(id.to_string()))?;

        if let Some(ref snapshot) = telemetry {
            for live in &snapshot.gpus {
                if let Some(declared) = entry
                    .capabilities
                    .gpus
                    .iter_mut()
                    .find(|g| g.index == live.index)
                {
                    declared.active_encode_sessions = live.active_encode_sessions;
                    declared.active_decode_sessions = live.active_decode_sessions;
                }
            }
        }

        entry.active_jobs = active_jobs.len();
        entry.active_job_ids = active_jobs;
        entry.telemetry = telemetry;
        entry.last_heartbeat = Instant::now();
        if entry.state == DaemonState::Unhealthy {
            tracing::info!(daemon_id = %id, "daemon recovered on fresh heartbeat");
            entry.state = DaemonState::Connected;
        }
        Ok(entry.clone())
    }

    /// Returns a consistent snapshot copy; callers never mutate registry state
    /// through the returned record.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<DaemonRecord> {
        self.daemons.get(id).map(|r| r.clone())
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<DaemonRecord> {
        self.daemons.iter().map(|r| r.clone()).collect()
    }

    #[must_use]
    pub fn get_active(&self) -> Vec<DaemonRecord> {
        self.get_by_state(DaemonState::Connected)
    }

    #[must_use]
    pub fn get_by_state(&self, state: DaemonState) -> Vec<DaemonRecord> {
        self.daemons
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.clone())
            .collect()
    }

    #[must_use]
    pub fn get_with_capability(&self, encoder: &str) -> Vec<DaemonRecord> {
        self.daemons
            .iter()
            .filter(|r| r.capabilities.has_encoder(encoder))
            .map(|r| r.clone())
            .collect()
    }

    #[must_use]
    pub fn get_with_available_gpu(&self) -> Vec<DaemonRecord> {
        self.daemons
            .iter()
            .filter(|r| {
                r.state == DaemonState::Connected && r.capabilities.has_available_gpu_session()
            })
            .map(|r| r.clone())
            .collect()
    }

    /// Eligible daemon possessing `encoder`, tie-broken by fewest active jobs,
    /// then by identifier for determinism. `None` means "no suitable daemon",
    /// which is a normal outcome, not an error.
    #[must_use]
    pub fn select_for_encoder(&self, encoder: &str) -> Option<DaemonRecord> {
        self.daemons
            .iter()
            .filter(|r| r.is_eligible(Some(encoder), false))
            .map(|r| r.clone())
            .min_by(|a, b| {
                a.active_jobs
                    .cmp(&b.active_jobs)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    #[must_use]
    pub fn select_least_loaded(&self) -> Option<DaemonRecord> {
        self.daemons
            .iter()
            .filter(|r| r.is_eligible(None, false))
            .map(|r| r.clone())
            .min_by(|a, b| {
                a.active_jobs
                    .cmp(&b.active_jobs)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    /// Administrative transition to `Draining`. Valid from any non-terminal
    /// state; a drained daemon stays there until an explicit `activate`
    /// (DESIGN.md open-question resolution).
    pub fn drain(&self, id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .daemons
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownDaemon(id.to_string()))?;
        tracing::info!(daemon_id = %id, "daemon drain requested");
        entry.state = DaemonState::Draining;
        Ok(())
    }

    /// Administrative transition back to `Connected`. Only valid from
    /// `Draining` or `Unhealthy`.
    pub fn activate(&self, id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .daemons
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownDaemon(id.to_string()))?;
        if !matches!(entry.state, DaemonState::Draining | DaemonState::Unhealthy) {
            return Err(RegistryError::InvalidActivation(id.to_string()));
        }
        tracing::info!(daemon_id = %id, "daemon activated");
        entry.state = DaemonState::Connected;
        Ok(())
    }

    /// Used by the health monitor: marks every `Connected` daemon whose
    /// heartbeat has gone stale as `Unhealthy`, and every `Unhealthy` daemon
    /// past `disconnect_after` as `Disconnected`. Returns the ids that
    /// changed state, for logging.
    pub fn sweep_unhealthy(
        &self,
        heartbeat_timeout: std::time::Duration,
        disconnect_after: Option<std::time::Duration>,
    ) -> Vec<(String, DaemonState)> {
        let mut transitioned = Vec::new();
        for mut entry in self.daemons.iter_mut() {
            let age = entry.heartbeat_age();
            match entry.state {
                DaemonState::Connected if age > heartbeat_timeout => {
                    entry.state = DaemonState::Unhealthy;
                    transitioned.push((entry.id.clone(), DaemonState::Unhealthy));
                }
                DaemonState::Unhealthy => {
                    if let Some(threshold) = disconnect_after {
                        if age > threshold {
                            entry.state = DaemonState::Disconnected;
                            transitioned.push((entry.id.clone(), DaemonState::Disconnected));
                        }
                    }
                }
                _ => {}
            }
        }
        transitioned
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.daemons.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.daemons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(encoders: &[&str]) -> Capability {
        Capability {
            video_encoders: encoders.iter().map(|s| s.to_string()).collect(),
            max_concurrent_jobs: 4,
            ..Default::default()
        }
    }

    #[test]
    fn register_then_get_returns_connected_record() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        let record = registry.get("d1").expect("record present");
        assert_eq!(record.state, DaemonState::Connected);
    }

    #[test]
    fn reregistration_replaces_record_in_place() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        registry.register("d1", "d1", "2.0", cap(&["libx264", "libx265"]));
        assert_eq!(registry.len(), 1);
        let record = registry.get("d1").unwrap();
        assert_eq!(record.version, "2.0");
        assert!(record.capabilities.has_encoder("libx265"));
    }

    #[test]
    fn heartbeat_against_unknown_daemon_errors() {
        let registry = DaemonRegistry::new();
        let err = registry.handle_heartbeat("ghost", None, vec![]).unwrap_err();
        assert_eq!(err, RegistryError::UnknownDaemon("ghost".into()));
    }

    #[test]
    fn heartbeat_updates_active_job_count() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        let jobs = vec![
            ActiveJob {
                job_id: "j1".into(),
                channel_name: "ch1".into(),
            },
            ActiveJob {
                job_id: "j2".into(),
                channel_name: "ch2".into(),
            },
        ];
        let record = registry.handle_heartbeat("d1", None, jobs).unwrap();
        assert_eq!(record.active_jobs, 2);
    }

    #[test]
    fn heartbeat_recovers_unhealthy_daemon() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        registry.sweep_unhealthy(std::time::Duration::from_secs(0), None);
        assert_eq!(registry.get("d1").unwrap().state, DaemonState::Unhealthy);
        registry.handle_heartbeat("d1", None, vec![]).unwrap();
        assert_eq!(registry.get("d1").unwrap().state, DaemonState::Connected);
    }

    #[test]
    fn unregister_is_idempotent_on_unknown_id() {
        let registry = DaemonRegistry::new();
        registry.unregister("ghost", "not found");
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn select_for_encoder_ties_break_on_fewest_active_jobs() {
        let registry = DaemonRegistry::new();
        registry.register("b", "b", "1.0", cap(&["libx264"]));
        registry.register("a", "a", "1.0", cap(&["libx264"]));
        registry
            .handle_heartbeat(
                "a",
                None,
                vec![ActiveJob {
                    job_id: "j".into(),
                    channel_name: "c".into(),
                }],
            )
            .unwrap();
        let selected = registry.select_for_encoder("libx264").unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn select_for_encoder_returns_none_without_match() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        assert!(registry.select_for_encoder("av1_nvenc").is_none());
    }

    #[test]
    fn drain_then_activate_round_trip() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        registry.drain("d1").unwrap();
        assert_eq!(registry.get("d1").unwrap().state, DaemonState::Draining);
        assert!(registry.select_for_encoder("libx264").is_none());
        registry.activate("d1").unwrap();
        assert_eq!(registry.get("d1").unwrap().state, DaemonState::Connected);
    }

    #[test]
    fn activate_rejects_connected_daemon() {
        let registry = DaemonRegistry::new();
        registry.register("d1", "d1", "1.0", cap(&["libx264"]));
        assert!(registry.activate("d1").is_err());
    }
}
