//! Service facade: the single entry point read/admin callers use, composing
//! the registry, the RPC connection table and the spawner behind one API so
//! callers never reach into those components directly.
//!
//! A thin struct holding `Arc`s to the components it composes, delegating
//! every method to exactly one of them.

use std::sync::Arc;

use crate::capability::Capability;
use crate::registry::{DaemonRecord, DaemonRegistry, DaemonState, RegistryError};
use crate::rpc::ConnectionRegistry;
use crate::spawner::Spawner;

/// Aggregate fleet statistics returned by [`ServiceFacade::cluster_stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterStats {
    pub total_daemons: usize,
    pub connected: usize,
    pub draining: usize,
    pub unhealthy: usize,
    pub total_active_jobs: usize,
    pub active_colocated_spawns: usize,
    pub total_gpus: usize,
    /// Averaged over daemons that have reported at least one heartbeat; `0.0`
    /// if none have.
    pub avg_cpu_percent: f32,
    pub avg_memory_percent: f32,
}

/// Thin facade over the registry, live RPC connections and the spawner.
/// Every method delegates to exactly one of those; this struct holds no
/// state of its own beyond the `Arc`s it composes.
pub struct ServiceFacade {
    registry: Arc<DaemonRegistry>,
    connections: Arc<ConnectionRegistry>,
    spawner: Arc<Spawner>,
}

impl ServiceFacade {
    #[must_use]
    pub fn new(
        registry: Arc<DaemonRegistry>,
        connections: Arc<ConnectionRegistry>,
        spawner: Arc<Spawner>,
    ) -> Self {
        Self {
            registry,
            connections,
            spawner,
        }
    }

    #[must_use]
    pub fn list_daemons(&self) -> Vec<DaemonRecord> {
        self.registry.get_all()
    }

    #[must_use]
    pub fn get_daemon(&self, id: &str) -> Option<DaemonRecord> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn daemons_with_capability(&self, encoder: &str) -> Vec<DaemonRecord> {
        self.registry.get_with_capability(encoder)
    }

    #[must_use]
    pub fn daemons_by_state(&self, state: DaemonState) -> Vec<DaemonRecord> {
        self.registry.get_by_state(state)
    }

    #[must_use]
    pub fn cluster_stats(&self) -> ClusterStats {
        let daemons = self.registry.get_all();
        let reporting: Vec<_> = daemons.iter().filter_map(|d| d.telemetry.as_ref()).collect();
        let (avg_cpu_percent, avg_memory_percent) = if reporting.is_empty() {
            (0.0, 0.0)
        } else {
            let count = reporting.len() as f32;
            let cpu_total: f32 = reporting.iter().map(|t| t.cpu_percent).sum();
            let memory_total: f32 = reporting.iter().map(|t| t.memory_percent).sum();
            (cpu_total / count, memory_total / count)
        };

        ClusterStats {
            total_daemons: daemons.len(),
            connected: daemons.iter().filter(|d| d.state == DaemonState::Connected).count(),
            draining: daemons.iter().filter(|d| d.state == DaemonState::Draining).count(),
            unhealthy: daemons.iter().filter(|d| d.state == DaemonState::Unhealthy).count(),
            total_active_jobs: daemons.iter().map(|d| d.active_jobs).sum(),
            active_colocated_spawns: self.spawner.active_spawn_count(),
            total_gpus: daemons.iter().map(|d| d.capabilities.gpus.len()).sum(),
            avg_cpu_percent,
            avg_memory_percent,
        }
    }

    pub fn drain_daemon(&self, id: &str) -> Result<(), RegistryError> {
        self.registry.drain(id)
    }

    pub fn activate_daemon(&self, id: &str) -> Result<(), RegistryError> {
        self.registry.activate(id)
    }

    #[must_use]
    pub fn is_connected(&self, id: &str) -> bool {
        self.connections.is_connected(id)
    }

    /// Convenience accessor so the admin HTTP surface doesn't need to know
    /// the wire type of declared capabilities.
    #[must_use]
    pub fn declared_capability(&self, id: &str) -> Option<Capability> {
        self.registry.get(id).map(|r| r.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade() -> ServiceFacade {
        let registry = Arc::new(DaemonRegistry::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let spawner = Arc::new(Spawner::new(
            crate::spawner::SpawnerConfig {
                binary_path: "/bin/true".into(),
                max_concurrent_spawns: 1,
                startup_timeout: std::time::Duration::from_secs(1),
                shutdown_timeout: std::time::Duration::from_secs(1),
            },
            Arc::clone(&registry),
        ));
        ServiceFacade::new(registry, connections, spawner)
    }

    #[test]
    fn cluster_stats_reflect_registered_daemons() {
        let facade = facade();
        facade.registry.register("d1", "d1", "1.0", Capability::default());
        facade.registry.register("d2", "d2", "1.0", Capability::default());
        facade.registry.drain("d2").unwrap();

        let stats = facade.cluster_stats();
        assert_eq!(stats.total_daemons, 2);
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.draining, 1);
    }

    #[test]
    fn drain_then_activate_round_trips_through_facade() {
        let facade = facade();
        facade.registry.register("d1", "d1", "1.0", Capability::default());
        facade.drain_daemon("d1").unwrap();
        assert_eq!(facade.get_daemon("d1").unwrap().state, DaemonState::Draining);
        facade.activate_daemon("d1").unwrap();
        assert_eq!(facade.get_daemon("d1").unwrap().state, DaemonState::Connected);
    }

    #[test]
    fn unknown_daemon_operations_error() {
        let facade = facade();
        assert!(facade.drain_daemon("ghost").is_err());
        assert!(facade.get_daemon("ghost").is_none());
    }

    #[test]
    fn cluster_stats_aggregate_gpus_and_telemetry_over_reporting_daemons() {
        use crate::capability::{GpuClass, GpuInfo, HostIdentity, SystemStats};

        let facade = facade();
        let gpu = GpuInfo {
            index: 0,
            name: "test-gpu".into(),
            class: GpuClass::Consumer,
            driver_version: "1.0".into(),
            max_encode_sessions: 2,
            active_encode_sessions: 0,
            max_decode_sessions: 0,
            active_decode_sessions: 0,
            memory_total_mb: 8192,
        };
        let capability = Capability {
            gpus: vec![gpu.clone(), gpu.clone()],
            ..Default::default()
        };
        facade.registry.register("d1", "d1", "1.0", capability);
        facade.registry.register("d2", "d2", "1.0", Capability { gpus: vec![gpu], ..Default::default() });

        facade
            .registry
            .handle_heartbeat(
                "d1",
                Some(SystemStats {
                    host: HostIdentity {
                        hostname: "h1".into(),
                        os: "linux".into(),
                        arch: "x86_64".into(),
                        cpu_cores: 8,
                    },
                    cpu_percent: 20.0,
                    memory_total_mb: 16384,
                    memory_used_mb: 4096,
                    memory_available_mb: 12288,
                    memory_percent: 25.0,
                    gpus: vec![],
                }),
                vec![],
            )
            .unwrap();
        // d2 never heartbeats, so it contributes no telemetry to the average.

        let stats = facade.cluster_stats();
        assert_eq!(stats.total_gpus, 3);
        assert_eq!(stats.avg_cpu_percent, 20.0);
        assert_eq!(stats.avg_memory_percent, 25.0);
    }
}
