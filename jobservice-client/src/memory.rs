//! In-process job service.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;

use crate::models::{JobAction, JobKind, JobRequest, JobStats, JobStatus};
use crate::{JobService, JobServiceError};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobStats>,
    logs: HashMap<String, Bytes>,
    executions: HashMap<String, Vec<JobStats>>,
    submitted: Vec<JobRequest>,
    fail_next: Option<StatusCode>,
    clock: i64,
}

impl Inner {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }
}

/// A [JobService] which keeps jobs in memory and never runs them.
///
/// Job status only moves when something calls [MemoryJobService::set_status] or
/// stops the job, which makes it suitable for tests and for running the control
/// plane without a job service.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobService {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJobService {
    /// Create an empty job service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next submission with the given status.
    pub fn fail_next_submit(&self, status: StatusCode) {
        self.inner.lock().fail_next = Some(status);
    }

    /// Move a job to a new status.
    pub fn set_status(&self, uuid: &str, status: JobStatus) -> Result<(), JobServiceError> {
        let mut inner = self.inner.lock();
        let now = inner.tick();
        let job = inner
            .jobs
            .get_mut(uuid)
            .ok_or_else(|| JobServiceError::not_found(uuid))?;
        job.status = status;
        job.update_time = now;
        Ok(())
    }

    /// Set the log content returned for a job.
    pub fn set_log<B: Into<Bytes>>(&self, uuid: &str, log: B) {
        self.inner.lock().logs.insert(uuid.to_owned(), log.into());
    }

    /// Record an execution of a periodic job, returning the execution UUID.
    pub fn record_execution(
        &self,
        periodic: &str,
        status: JobStatus,
    ) -> Result<String, JobServiceError> {
        let mut inner = self.inner.lock();
        let name = inner
            .jobs
            .get(periodic)
            .ok_or_else(|| JobServiceError::not_found(periodic))?
            .name
            .clone();
        let now = inner.tick();
        let id = uuid::Uuid::new_v4().to_string();
        let stats = JobStats {
            id: id.clone(),
            name,
            kind: JobKind::Generic,
            status,
            upstream_job_id: Some(periodic.to_owned()),
            update_time: now,
        };
        inner.jobs.insert(id.clone(), stats.clone());
        inner
            .executions
            .entry(periodic.to_owned())
            .or_default()
            .push(stats);
        Ok(id)
    }

    /// Every request submitted so far, in order.
    pub fn submitted(&self) -> Vec<JobRequest> {
        self.inner.lock().submitted.clone()
    }

    /// Current status of a job, if the job service knows it.
    pub fn stats(&self, uuid: &str) -> Option<JobStats> {
        self.inner.lock().jobs.get(uuid).cloned()
    }

    /// Drop a job, as if the job service had expired it.
    pub fn forget(&self, uuid: &str) {
        let mut inner = self.inner.lock();
        inner.jobs.remove(uuid);
        inner.logs.remove(uuid);
        inner.executions.remove(uuid);
    }
}

#[async_trait::async_trait]
impl JobService for MemoryJobService {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn submit(&self, job: &JobRequest) -> Result<String, JobServiceError> {
        let mut inner = self.inner.lock();
        if let Some(status) = inner.fail_next.take() {
            return Err(JobServiceError::Status {
                status,
                message: format!("job {} refused", job.name),
            });
        }

        let now = inner.tick();
        let id = uuid::Uuid::new_v4().to_string();
        let status = match job.metadata.kind {
            JobKind::Generic => JobStatus::Pending,
            JobKind::Periodic => JobStatus::Scheduled,
        };
        inner.jobs.insert(
            id.clone(),
            JobStats {
                id: id.clone(),
                name: job.name.clone(),
                kind: job.metadata.kind,
                status,
                upstream_job_id: None,
                update_time: now,
            },
        );
        inner.submitted.push(job.clone());
        Ok(id)
    }

    async fn post_action(&self, uuid: &str, action: JobAction) -> Result<(), JobServiceError> {
        let mut inner = self.inner.lock();
        let now = inner.tick();
        let job = inner
            .jobs
            .get_mut(uuid)
            .ok_or_else(|| JobServiceError::not_found(uuid))?;
        match action {
            JobAction::Stop if job.status.is_terminal() => {}
            JobAction::Stop => {
                job.status = JobStatus::Stopped;
                job.update_time = now;
            }
        }
        Ok(())
    }

    async fn log(&self, uuid: &str) -> Result<Bytes, JobServiceError> {
        let inner = self.inner.lock();
        if !inner.jobs.contains_key(uuid) {
            return Err(JobServiceError::not_found(uuid));
        }
        Ok(inner.logs.get(uuid).cloned().unwrap_or_default())
    }

    async fn status(&self, uuid: &str) -> Result<JobStats, JobServiceError> {
        self.inner
            .lock()
            .jobs
            .get(uuid)
            .cloned()
            .ok_or_else(|| JobServiceError::not_found(uuid))
    }

    async fn executions(&self, uuid: &str) -> Result<Vec<JobStats>, JobServiceError> {
        let inner = self.inner.lock();
        if !inner.jobs.contains_key(uuid) {
            return Err(JobServiceError::not_found(uuid));
        }
        let mut executions: Vec<JobStats> = inner
            .executions
            .get(uuid)
            .map(|executions| {
                executions
                    .iter()
                    .map(|execution| {
                        inner
                            .jobs
                            .get(&execution.id)
                            .cloned()
                            .unwrap_or_else(|| execution.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();
        executions.reverse();
        Ok(executions)
    }
}
