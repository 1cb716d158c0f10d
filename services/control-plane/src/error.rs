//! Error taxonomy for the control plane

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jobservice_client::JobServiceError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for control plane operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the control plane reports, classified by how a client should react.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credentials, or credentials that were not recognized
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authenticated, but not allowed to do this
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed input or failed validation
    #[error("{0}")]
    BadRequest(String),

    /// The addressed resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// Duplicate name, or the resource is in use
    #[error("{0}")]
    Conflict(String),

    /// The current state of the system forbids the operation
    #[error("{0}")]
    PreconditionFailed(String),

    /// A feature is switched off, or a collaborator is down
    #[error("{0}")]
    Unavailable(String),

    /// Anything unclassified
    #[error("internal error: {0}")]
    Internal(#[source] BoxError),
}

impl Error {
    /// Wrap an unclassified error
    pub fn internal<E: Into<BoxError>>(error: E) -> Self {
        Error::Internal(error.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Unauthenticated => "UNAUTHORIZED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::PreconditionFailed(_) => "PRECONDITION",
            Error::Unavailable(_) => "SERVICE_UNAVAILABLE",
            Error::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl From<JobServiceError> for Error {
    fn from(error: JobServiceError) -> Self {
        match error.status() {
            Some(StatusCode::BAD_REQUEST) => Error::BadRequest(error.to_string()),
            Some(StatusCode::NOT_FOUND) => Error::NotFound(error.to_string()),
            Some(StatusCode::CONFLICT) => Error::Conflict(error.to_string()),
            Some(StatusCode::PRECONDITION_FAILED) => Error::PreconditionFailed(error.to_string()),
            Some(StatusCode::SERVICE_UNAVAILABLE) => Error::Unavailable(error.to_string()),
            _ => Error::internal(error),
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        Error::BadRequest(rejection.body_text())
    }
}

/// Error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = match &self {
            Error::Internal(cause) => {
                tracing::error!(error = %cause, source = ?cause, "internal error");
                "internal server error".to_owned()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}
