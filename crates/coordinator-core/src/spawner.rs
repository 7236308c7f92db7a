//! Subprocess spawner: colocated daemon fallback.
//!
//! When no already-registered daemon can take a job, the coordinator can
//! launch a local worker process and wait for it to self-register over the
//! worker protocol. Process lifecycle (spawn, stdout/stderr capture, kill,
//! try_wait) runs on `tokio::process` throughout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;

use crate::registry::DaemonRegistry;

#[derive(Debug, Clone)]
pub struct SpawnerConfig {
    pub binary_path: PathBuf,
    pub max_concurrent_spawns: usize,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum SpawnerError {
    #[error("spawner at capacity: {0} concurrent spawns already active")]
    AtCapacity(usize),
    #[error("failed to launch daemon binary: {0}")]
    Launch(#[source] std::io::Error),
    #[error("spawned daemon {daemon_id} did not self-register within {timeout:?}")]
    StartupTimeout {
        daemon_id: String,
        timeout: Duration,
    },
}

struct ActiveSpawn {
    child: Child,
    job_id: String,
}

/// Owns every subprocess the coordinator has launched. The active-spawn map
/// is guarded by a plain mutex and never held across awaits that touch the
/// daemon registry, so registry contention and spawner contention stay
/// independent critical sections.
pub struct Spawner {
    config: SpawnerConfig,
    registry: Arc<DaemonRegistry>,
    active: Mutex<HashMap<String, ActiveSpawn>>,
    permits: Semaphore,
}

impl Spawner {
    #[must_use]
    pub fn new(config: SpawnerConfig, registry: Arc<DaemonRegistry>) -> Self {
        let permits = Semaphore::new(config.max_concurrent_spawns);
        Self {
            config,
            registry,
            active: Mutex::new(HashMap::new()),
            permits,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.permits.available_permits() > 0
    }

    #[must_use]
    pub fn active_spawn_count(&self) -> usize {
        self.active.lock().len()
    }

    #[must_use]
    pub fn active_job_ids(&self) -> Vec<String> {
        self.active.lock().values().map(|s| s.job_id.clone()).collect()
    }

    /// Launches a colocated daemon for `job_id` and blocks until it
    /// self-registers under `daemon_id`, or until `startup_timeout` elapses.
    /// On timeout the process is killed and the permit released.
    pub async fn spawn_for_job(
        &self,
        daemon_id: &str,
        job_id: &str,
        extra_args: &[String],
    ) -> Result<(), SpawnerError> {
        let _permit = self
            .permits
            .try_acquire()
            .map_err(|_| SpawnerError::AtCapacity(self.config.max_concurrent_spawns))?;

        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("--daemon-id")
            .arg(daemon_id)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(SpawnerError::Launch)?;
        pump_output(&mut child, daemon_id.to_string());

        self.active.lock().insert(
            daemon_id.to_string(),
            ActiveSpawn {
                child,
                job_id: job_id.to_string(),
            },
        );

        let registry = Arc::clone(&self.registry);
        let id = daemon_id.to_string();
        let registered = tokio::time::timeout(self.config.startup_timeout, async move {
            loop {
                if registry.get(&id).is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        _permit.forget();

        if registered.is_err() {
            self.release(daemon_id).await;
            return Err(SpawnerError::StartupTimeout {
                daemon_id: daemon_id.to_string(),
                timeout: self.config.startup_timeout,
            });
        }

        Ok(())
    }

    /// Idempotent: kills the process if still present, waits up to
    /// `shutdown_timeout`, drops the tracked handle, and removes the
    /// daemon's registry entry. A daemon already released (or never spawned)
    /// is a no-op: it must not hand back a permit it never held.
    pub async fn release(&self, daemon_id: &str) {
        let spawn = self.active.lock().remove(daemon_id);
        let Some(mut spawn) = spawn else {
            return;
        };

        let _ = spawn.child.start_kill();
        let _ = tokio::time::timeout(self.config.shutdown_timeout, spawn.child.wait()).await;
        self.permits.add_permits(1);
        self.registry.unregister(daemon_id, "colocated spawn released");
        tracing::info!(daemon_id, "colocated daemon process released");
    }

    /// Used by the shutdown sequence: releases every active spawn.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.active.lock().keys().cloned().collect();
        for id in ids {
            self.release(&id).await;
        }
    }
}

fn pump_output(child: &mut Child, daemon_id: String) {
    if let Some(stdout) = child.stdout.take() {
        let id = daemon_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(daemon_id = %id, "stdout: {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(daemon_id = %daemon_id, "stderr: {line}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpawnerConfig {
        SpawnerConfig {
            binary_path: PathBuf::from("/bin/sleep"),
            max_concurrent_spawns: 1,
            startup_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn spawn_times_out_when_daemon_never_registers() {
        let registry = Arc::new(DaemonRegistry::new());
        let spawner = Spawner::new(config(), registry);
        let result = spawner.spawn_for_job("d1", "job1", &["5".to_string()]).await;
        assert!(matches!(result, Err(SpawnerError::StartupTimeout { .. })));
        assert_eq!(spawner.active_spawn_count(), 0);
        assert!(spawner.is_available());
    }

    #[tokio::test]
    async fn spawn_succeeds_once_daemon_self_registers() {
        let registry = Arc::new(DaemonRegistry::new());
        registry.register("d1", "d1", "1.0", Default::default());
        let spawner = Spawner::new(config(), registry);
        let result = spawner.spawn_for_job("d1", "job1", &["5".to_string()]).await;
        assert!(result.is_ok());
        spawner.release("d1").await;
    }

    #[tokio::test]
    async fn spawn_rejects_beyond_capacity() {
        let registry = Arc::new(DaemonRegistry::new());
        registry.register("d1", "d1", "1.0", Default::default());
        registry.register("d2", "d2", "1.0", Default::default());
        let spawner = Spawner::new(config(), registry);
        spawner.spawn_for_job("d1", "job1", &["5".to_string()]).await.unwrap();
        let second = spawner.spawn_for_job("d2", "job2", &["5".to_string()]).await;
        assert!(matches!(second, Err(SpawnerError::AtCapacity(_))));
        spawner.release("d1").await;
    }
}
