//! Typed configuration: literal defaults, YAML file, environment
//! overrides, and a validation pass that rejects an unusable configuration
//! before the rest of the service starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::CoordinatorError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_address: String,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// `None` disables the unhealthy -> disconnected transition entirely.
    pub disconnect_after_secs: Option<u64>,
    pub auth_token: Option<String>,
    pub spawner: SpawnerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpawnerSettings {
    pub binary_path: String,
    pub max_concurrent_spawns: usize,
    pub startup_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for SpawnerSettings {
    fn default() -> Self {
        Self {
            binary_path: String::new(),
            max_concurrent_spawns: 4,
            startup_timeout_secs: 15,
            shutdown_timeout_secs: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:7700".to_string(),
            heartbeat_interval_secs: 10,
            heartbeat_timeout_secs: 30,
            cleanup_interval_secs: 5,
            disconnect_after_secs: Some(60),
            auth_token: None,
            spawner: SpawnerSettings::default(),
        }
    }
}

impl Config {
    /// Loads defaults, then overlays a YAML file if present, then environment
    /// overrides. Does not validate; call [`Config::validate`] explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self, CoordinatorError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| CoordinatorError::Io(format!("reading {}: {e}", path.display())))?;
                serde_yaml::from_str(&contents)
                    .map_err(|e| CoordinatorError::Config(format!("parsing {}: {e}", path.display())))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COORDINATOR_LISTEN_ADDRESS") {
            self.listen_address = v;
        }
        if let Ok(v) = std::env::var("COORDINATOR_HEARTBEAT_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.heartbeat_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("COORDINATOR_HEARTBEAT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.heartbeat_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("COORDINATOR_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("COORDINATOR_SPAWNER_BINARY_PATH") {
            self.spawner.binary_path = v;
        }
    }

    /// Rejects configurations that would make the service silently
    /// misbehave rather than fail to start.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.cleanup_interval_secs > self.heartbeat_timeout_secs / 2 {
            return Err(CoordinatorError::Validation(format!(
                "cleanup_interval_secs ({}) must be at most half of heartbeat_timeout_secs ({})",
                self.cleanup_interval_secs, self.heartbeat_timeout_secs
            )));
        }

        if !self.spawner.binary_path.is_empty() {
            let path = PathBuf::from(&self.spawner.binary_path);
            if !path.is_file() {
                return Err(CoordinatorError::Validation(format!(
                    "spawner.binary_path {} does not exist",
                    path.display()
                )));
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let executable = std::fs::metadata(&path)
                    .map(|m| m.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false);
                if !executable {
                    return Err(CoordinatorError::Validation(format!(
                        "spawner.binary_path {} is not executable",
                        path.display()
                    )));
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    #[must_use]
    pub fn disconnect_after(&self) -> Option<Duration> {
        self.disconnect_after_secs.map(Duration::from_secs)
    }
}
