//! Centralized error type for the coordinator core library.
//!
//! Defines the structured error kinds the registry, selection, spawner and
//! admin HTTP surface raise, with a stable `code()` for log correlation and
//! an `IntoResponse` impl for the admin surface only — the worker protocol
//! never lets this type escape as a transport-level response; failures there
//! are carried in each RPC's own `error` field instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::spawner::SpawnerError;

#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum CoordinatorError {
    /// A caller-supplied value failed a structural or domain check.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced a daemon id that does not exist in the registry.
    #[error("not found: {0}")]
    NotFound(String),

    /// A worker protocol connection presented no or an incorrect auth token.
    #[error("authentication failed")]
    Unauthenticated,

    /// No eligible daemon (capability, GPU session, or concurrency slot).
    #[error("no eligible daemon: {0}")]
    Exhausted(String),

    /// The requested daemon exists but is not in a usable state right now.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A bounded wait (startup, shutdown) ran out before the expected event.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A retryable failure in an external dependency (process spawn, I/O).
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoordinatorError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::NotFound(_) => "not_found",
            Self::Unauthenticated => "unauthenticated",
            Self::Exhausted(_) => "exhausted",
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Transient(_) => "transient",
            Self::Io(_) => "io_error",
            Self::Config(_) => "config_error",
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Exhausted(_) | Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Transient(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for CoordinatorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownDaemon(id) => Self::NotFound(id),
            RegistryError::InvalidActivation(id) => Self::Unavailable(id),
        }
    }
}

impl From<SpawnerError> for CoordinatorError {
    fn from(err: SpawnerError) -> Self {
        match err {
            SpawnerError::AtCapacity(n) => Self::Exhausted(format!("spawner at capacity ({n})")),
            SpawnerError::Launch(e) => Self::Transient(e.to_string()),
            SpawnerError::StartupTimeout { daemon_id, timeout } => {
                Self::Timeout(format!("{daemon_id} after {timeout:?}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = CoordinatorError::NotFound("d1".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthenticated_maps_to_401() {
        let err = CoordinatorError::Unauthenticated;
        assert_eq!(err.code(), "unauthenticated");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn registry_error_converts_to_not_found() {
        let err: CoordinatorError = RegistryError::UnknownDaemon("ghost".into()).into();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }
}
