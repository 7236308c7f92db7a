//! Bounded multi-stage shutdown sequencing.
//!
//! Shutdown runs in a fixed order: stop accepting new RPC connections,
//! cancel the health monitor, tell every open Transcode stream to stop,
//! release every colocated spawn, then let the registry drop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::DaemonRegistry;
use crate::rpc::ConnectionRegistry;
use crate::spawner::Spawner;

/// Owns the handles needed to run the shutdown sequence exactly once.
pub struct ShutdownSequence {
    accept_cancellation: CancellationToken,
    health_cancellation: CancellationToken,
    connections: Arc<ConnectionRegistry>,
    spawner: Arc<Spawner>,
    registry: Arc<DaemonRegistry>,
}

impl ShutdownSequence {
    #[must_use]
    pub fn new(
        accept_cancellation: CancellationToken,
        health_cancellation: CancellationToken,
        connections: Arc<ConnectionRegistry>,
        spawner: Arc<Spawner>,
        registry: Arc<DaemonRegistry>,
    ) -> Self {
        Self {
            accept_cancellation,
            health_cancellation,
            connections,
            spawner,
            registry,
        }
    }

    /// Runs every stage in order. Each stage is bounded: nothing here waits
    /// indefinitely on an external process or connection.
    pub async fn run(self) {
        tracing::info!("shutdown: stopping acceptance of new RPC connections");
        self.accept_cancellation.cancel();

        tracing::info!("shutdown: cancelling health monitor");
        self.health_cancellation.cancel();

        tracing::info!("shutdown: closing open daemon connections");
        self.connections.close_all();
        // Give in-flight sends a moment to flush before the spawner starts
        // killing processes those connections might still be talking to.
        tokio::time::sleep(Duration::from_millis(50)).await;

        tracing::info!("shutdown: releasing colocated spawns");
        self.spawner.stop_all().await;

        let remaining = self.registry.len();
        tracing::info!(remaining, "shutdown: registry released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawner::SpawnerConfig;

    #[tokio::test]
    async fn shutdown_sequence_cancels_both_tokens() {
        let accept = CancellationToken::new();
        let health = CancellationToken::new();
        let registry = Arc::new(DaemonRegistry::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let spawner = Arc::new(Spawner::new(
            SpawnerConfig {
                binary_path: "/bin/true".into(),
                max_concurrent_spawns: 1,
                startup_timeout: Duration::from_secs(1),
                shutdown_timeout: Duration::from_secs(1),
            },
            Arc::clone(&registry),
        ));

        let sequence = ShutdownSequence::new(
            accept.clone(),
            health.clone(),
            connections,
            spawner,
            registry,
        );
        sequence.run().await;

        assert!(accept.is_cancelled());
        assert!(health.is_cancelled());
    }
}
