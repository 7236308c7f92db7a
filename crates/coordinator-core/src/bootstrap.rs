//! Composition root: the single place every service gets instantiated and
//! wired together, in dependency order, producing a
//! `bootstrap_services`/`BootstrappedServices` pair that owns the
//! registry/health/spawner/facade/RPC graph this coordinator needs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::CoordinatorResult;
use crate::health::{self, HealthConfig};
use crate::lifecycle::ShutdownSequence;
use crate::registry::DaemonRegistry;
use crate::rpc::{ConnectionRegistry, RpcServerState, TokenAuthenticator};
use crate::service_facade::ServiceFacade;
use crate::spawner::{Spawner, SpawnerConfig};

/// Container for every wired service. Consumed by the binary crate to build
/// the axum router and to run the shutdown sequence on exit.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub registry: Arc<DaemonRegistry>,
    pub connections: Arc<ConnectionRegistry>,
    pub spawner: Arc<Spawner>,
    pub facade: Arc<ServiceFacade>,
    pub rpc_state: RpcServerState,
    accept_cancellation: CancellationToken,
    health_cancellation: CancellationToken,
}

impl BootstrappedServices {
    /// Runs the bounded shutdown sequence, in order.
    pub async fn shutdown(&self) {
        let sequence = ShutdownSequence::new(
            self.accept_cancellation.clone(),
            self.health_cancellation.clone(),
            Arc::clone(&self.connections),
            Arc::clone(&self.spawner),
            Arc::clone(&self.registry),
        );
        sequence.run().await;
    }

    /// Token callers should watch to know when to stop accepting new
    /// incoming RPC connections (distinct from the health monitor's token).
    #[must_use]
    pub fn accept_cancellation(&self) -> CancellationToken {
        self.accept_cancellation.clone()
    }
}

/// Wires the registry, connection table, spawner and service facade
/// together, builds the RPC server's shared state, and spawns the health
/// monitor as a background task.
///
/// Wiring order:
/// 1. Daemon registry (no dependencies)
/// 2. Connection registry (no dependencies)
/// 3. Spawner (depends on the registry, to poll for self-registration)
/// 4. Service facade (depends on all three above)
/// 5. RPC server state (depends on registry, connections, authenticator)
/// 6. Health monitor background task (depends on the registry)
pub fn bootstrap_services(
    config: &Config,
    coordinator_version: impl Into<String>,
) -> CoordinatorResult<BootstrappedServices> {
    config.validate()?;

    let registry = Arc::new(DaemonRegistry::new());
    let connections = Arc::new(ConnectionRegistry::new());

    let spawner = Arc::new(Spawner::new(
        SpawnerConfig {
            binary_path: config.spawner.binary_path.clone().into(),
            max_concurrent_spawns: config.spawner.max_concurrent_spawns,
            startup_timeout: std::time::Duration::from_secs(config.spawner.startup_timeout_secs),
            shutdown_timeout: std::time::Duration::from_secs(config.spawner.shutdown_timeout_secs),
        },
        Arc::clone(&registry),
    ));

    let facade = Arc::new(ServiceFacade::new(
        Arc::clone(&registry),
        Arc::clone(&connections),
        Arc::clone(&spawner),
    ));

    let rpc_state = RpcServerState {
        registry: Arc::clone(&registry),
        connections: Arc::clone(&connections),
        authenticator: TokenAuthenticator::new(config.auth_token.clone()),
        coordinator_version: coordinator_version.into(),
        heartbeat_interval: config.heartbeat_interval(),
    };

    let health_cancellation = CancellationToken::new();
    let health_config = HealthConfig {
        heartbeat_timeout: config.heartbeat_timeout(),
        scan_interval: config.cleanup_interval(),
        disconnect_after: config.disconnect_after(),
    };
    tokio::spawn(health::run(
        Arc::clone(&registry),
        health_config,
        health_cancellation.clone(),
    ));

    Ok(BootstrappedServices {
        registry,
        connections,
        spawner,
        facade,
        rpc_state,
        accept_cancellation: CancellationToken::new(),
        health_cancellation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_wires_every_service() {
        let config = Config::default();
        let services = bootstrap_services(&config, "test").unwrap();
        assert_eq!(services.registry.len(), 0);
        assert!(!services.rpc_state.authenticator.is_enabled());
        services.shutdown().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_config() {
        let config = Config {
            cleanup_interval_secs: 100,
            heartbeat_timeout_secs: 30,
            ..Config::default()
        };
        assert!(bootstrap_services(&config, "test").is_err());
    }
}
