use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::credentials::CredentialError;
use crate::error::CoreError;
use crate::registry::RegistryError;

/// Body of every access-denied response, whatever the internal reason.
pub const DENIED_BODY: &str = "Authentication required\n";

const REALM: &str = "Basic realm=\"forgegate\"";

/// Application-level error type that maps onto HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    BadRequest(String),
    Internal(anyhow::Error),
}

/// The uniform 401 used for every authentication, authorization and
/// repository-lookup failure.
pub fn denied_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM)],
        DENIED_BODY,
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Core(err) if err.is_access_denied() => {
                warn!(reason = %err, "access denied");
                denied_response()
            }
            AppError::Core(
                err @ (CoreError::RemoteConfigurationFailure(_) | CoreError::TransportFailure(_)),
            ) => {
                warn!(error = %err, "remote operation failed");
                (StatusCode::BAD_GATEWAY, format!("{err}\n")).into_response()
            }
            AppError::Core(err @ CoreError::ResolutionTimeout { .. }) => {
                warn!(error = %err, "git command timed out");
                (StatusCode::GATEWAY_TIMEOUT, format!("{err}\n")).into_response()
            }
            AppError::Core(err) => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error\n").into_response()
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, format!("{msg}\n")).into_response(),
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error\n").into_response()
            }
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::Core(err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
