//! Client for the asynchronous job service.
//!
//! The control plane never runs replication or garbage collection work itself.
//! It hands [JobRequest]s to a job service, which assigns each one a UUID and
//! reports status changes back through a status hook. This crate provides the
//! [JobService] seam, an HTTP implementation ([HttpJobService]) and an in-process
//! implementation ([MemoryJobService]) used when no remote job service is configured
//! and in tests.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

mod auth;
mod client;
mod error;
mod memory;
pub mod models;

pub use self::auth::{Secret, SecretAuthLayer, SecretAuthService, SECRET_SCHEME};
pub use self::client::{HttpJobService, DEFAULT_TIMEOUT};
pub use self::error::JobServiceError;
pub use self::memory::MemoryJobService;
pub use self::models::{JobAction, JobKind, JobMetadata, JobRequest, JobStats, JobStatus};

/// Operations the control plane needs from a job service.
#[async_trait::async_trait]
pub trait JobService: fmt::Debug {
    /// A short name for the implementation, used in logs.
    fn name(&self) -> &'static str;

    /// Submit a job, returning the UUID the job service assigned to it.
    async fn submit(&self, job: &JobRequest) -> Result<String, JobServiceError>;

    /// Post an action to an existing job.
    async fn post_action(&self, uuid: &str, action: JobAction) -> Result<(), JobServiceError>;

    /// Fetch the log of a job.
    async fn log(&self, uuid: &str) -> Result<Bytes, JobServiceError>;

    /// Fetch the current status of a job.
    async fn status(&self, uuid: &str) -> Result<JobStats, JobServiceError>;

    /// List the executions spawned by a periodic job, newest first.
    async fn executions(&self, uuid: &str) -> Result<Vec<JobStats>, JobServiceError>;
}

/// Cheaply cloneable handle to a [JobService].
#[derive(Debug, Clone)]
pub struct JobClient {
    service: Arc<dyn JobService + Send + Sync>,
}

impl<S> From<S> for JobClient
where
    S: JobService + Send + Sync + 'static,
{
    fn from(service: S) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

impl JobClient {
    /// Name of the underlying implementation.
    pub fn name(&self) -> &'static str {
        self.service.name()
    }

    /// Submit a job.
    #[tracing::instrument(skip(self, job), fields(job = %job.name, kind = %job.metadata.kind))]
    pub async fn submit(&self, job: &JobRequest) -> Result<String, JobServiceError> {
        let uuid = self.service.submit(job).await?;
        tracing::debug!(%uuid, "submitted job");
        Ok(uuid)
    }

    /// Ask the job service to stop a job.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, uuid: &str) -> Result<(), JobServiceError> {
        self.service.post_action(uuid, JobAction::Stop).await
    }

    /// Stop a job, treating a job the job service no longer knows as already stopped.
    ///
    /// Returns `false` when the job service reported the job missing.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, uuid: &str) -> Result<bool, JobServiceError> {
        match self.service.post_action(uuid, JobAction::Stop).await {
            Ok(()) => Ok(true),
            Err(error) if error.is_not_found() => {
                tracing::debug!("job already gone from job service");
                Ok(false)
            }
            Err(error) => Err(error),
        }
    }

    /// Fetch the log of a job.
    #[tracing::instrument(skip(self))]
    pub async fn log(&self, uuid: &str) -> Result<Bytes, JobServiceError> {
        self.service.log(uuid).await
    }

    /// Fetch the status of a job.
    #[tracing::instrument(skip(self))]
    pub async fn status(&self, uuid: &str) -> Result<JobStats, JobServiceError> {
        self.service.status(uuid).await
    }

    /// List the executions of a periodic job.
    #[tracing::instrument(skip(self))]
    pub async fn executions(&self, uuid: &str) -> Result<Vec<JobStats>, JobServiceError> {
        self.service.executions(uuid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_tolerates_missing_job() {
        let client = JobClient::from(MemoryJobService::new());
        assert!(!client.cancel("nope").await.unwrap());
    }

    #[tokio::test]
    async fn cancel_stops_known_job() {
        let memory = MemoryJobService::new();
        let client = JobClient::from(memory.clone());
        let uuid = client.submit(&JobRequest::generic("IMAGE_GC")).await.unwrap();

        assert!(client.cancel(&uuid).await.unwrap());
        assert_eq!(memory.stats(&uuid).unwrap().status, JobStatus::Stopped);
    }
}
