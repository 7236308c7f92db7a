//! Background health monitor: periodically sweeps the registry for stale
//! heartbeats and transitions daemons to `Unhealthy`/`Disconnected`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::registry::{DaemonRegistry, DaemonState};

/// Heartbeat-timeout configuration consumed by the monitor.
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    /// T: a `Connected` daemon older than this becomes `Unhealthy`.
    pub heartbeat_timeout: Duration,
    /// How often the monitor scans. Must be `<= heartbeat_timeout / 2`.
    pub scan_interval: Duration,
    /// An `Unhealthy` daemon older than this becomes `Disconnected`. `None`
    /// disables the secondary transition entirely.
    pub disconnect_after: Option<Duration>,
}

impl HealthConfig {
    #[must_use]
    pub fn new(heartbeat_timeout: Duration, scan_interval: Duration) -> Self {
        Self {
            heartbeat_timeout,
            scan_interval,
            disconnect_after: Some(heartbeat_timeout * 2),
        }
    }
}

/// Runs the periodic sweep until cancelled. Intended to be spawned as a
/// background task by the bootstrap composition root.
pub async fn run(registry: Arc<DaemonRegistry>, config: HealthConfig, cancellation: CancellationToken) {
    let mut ticker = tokio::time::interval(config.scan_interval);
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                tracing::info!("health monitor stopping");
                return;
            }
            _ = ticker.tick() => {
                let transitions = registry.sweep_unhealthy(config.heartbeat_timeout, config.disconnect_after);
                for (id, state) in transitions {
                    match state {
                        DaemonState::Unhealthy => {
                            tracing::warn!(daemon_id = %id, "daemon heartbeat stale, marked unhealthy");
                        }
                        DaemonState::Disconnected => {
                            tracing::warn!(daemon_id = %id, "daemon unhealthy past disconnect_after, marked disconnected");
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    fn cap() -> Capability {
        Capability {
            video_encoders: vec!["libx264".into()],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_marks_stale_daemon_unhealthy_then_disconnected() {
        let registry = Arc::new(DaemonRegistry::new());
        registry.register("d1", "d1", "1.0", cap());

        let config = HealthConfig::new(Duration::from_secs(2), Duration::from_millis(500));
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(run(registry.clone(), config, cancellation.clone()));

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            registry.get("d1").unwrap().state,
            crate::registry::DaemonState::Unhealthy
        );

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            registry.get("d1").unwrap().state,
            crate::registry::DaemonState::Disconnected
        );

        cancellation.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_heartbeat_recovers_before_next_sweep() {
        let registry = Arc::new(DaemonRegistry::new());
        registry.register("d1", "d1", "1.0", cap());

        let config = HealthConfig::new(Duration::from_secs(2), Duration::from_millis(500));
        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(run(registry.clone(), config, cancellation.clone()));

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            registry.get("d1").unwrap().state,
            crate::registry::DaemonState::Unhealthy
        );

        registry.handle_heartbeat("d1", None, vec![]).unwrap();
        assert_eq!(
            registry.get("d1").unwrap().state,
            crate::registry::DaemonState::Connected
        );

        cancellation.cancel();
        handle.await.unwrap();
    }
}
