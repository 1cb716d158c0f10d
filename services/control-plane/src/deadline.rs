//! Caller-provided deadlines for calls which may suspend.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// The point in time by which a request must be answered.
///
/// Every call to a collaborator (job service, stores, RBAC oracle) runs under the
/// request's deadline. Running out of time is reported as an internal error.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

#[derive(Debug, thiserror::Error)]
#[error("deadline exceeded while waiting for {0}")]
struct DeadlineExceeded(&'static str);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline passes.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Run `fut`, giving up when the deadline passes.
    pub async fn run<F, T, E>(&self, what: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<Error>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                tracing::warn!(what, "deadline exceeded");
                Err(Error::internal(DeadlineExceeded(what)))
            }
        }
    }
}
