use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{
    dao::storage::StorageError, services::tracker_registry::RegistryError,
    state::series::SeriesIdentity,
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyActive(_) | RegistryError::Resume(_) => {
                ServiceError::InvalidState(err.to_string())
            }
            RegistryError::NotFound(_) | RegistryError::Closed(_) => {
                ServiceError::NotFound(err.to_string())
            }
        }
    }
}

impl ServiceError {
    /// No tracker, live or archived, exists for `identity`.
    pub fn unknown_series(identity: &SeriesIdentity) -> Self {
        ServiceError::NotFound(format!("no tracker for series {identity}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::series_tracker::ResumeError;

    fn status_of(err: RegistryError) -> StatusCode {
        AppError::from(ServiceError::from(err))
            .into_response()
            .status()
    }

    #[test]
    fn registry_errors_map_to_http_statuses() {
        let identity = SeriesIdentity::new("g", "c", 1);
        assert_eq!(
            status_of(RegistryError::AlreadyActive(identity.clone())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(RegistryError::NotFound(identity.clone())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RegistryError::Closed(identity)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RegistryError::Resume(ResumeError::NotPaused)),
            StatusCode::CONFLICT
        );
    }
}
