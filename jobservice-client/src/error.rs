//! Error types for the job service client
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error occured while talking to the job service
#[derive(Debug, Error)]
pub enum JobServiceError {
    /// The job service answered with a non-success status
    #[error("job service returned HTTP {status}: {message}")]
    Status {
        /// The HTTP status code of the response
        status: StatusCode,

        /// The message body of the response
        message: String,
    },

    /// An error occured while sending the request
    #[error("sending request to job service: {0}")]
    Request(#[from] hyperdriver::client::Error),

    /// The request could not be assembled
    #[error("building job service request: {0}")]
    Build(#[from] http::Error),

    /// An error occured while recieving the response body
    #[error("reading job service response body: {0}")]
    Body(#[source] BoxError),

    /// The response body was not the expected JSON document
    #[error("decoding job service response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The job service did not answer in time
    #[error("job service did not respond within {0:?}")]
    Timeout(Duration),

    /// The configured job service URL can't address an endpoint
    #[error("invalid job service url: {0}")]
    Url(String),
}

impl JobServiceError {
    /// The error the job service reports for an unknown job UUID.
    pub fn not_found(uuid: &str) -> Self {
        JobServiceError::Status {
            status: StatusCode::NOT_FOUND,
            message: format!("job {uuid} not found"),
        }
    }

    /// The HTTP status reported by the job service, if it answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            JobServiceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the job service reported that the job does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }
}
