//! Admin job bookkeeping

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use jobservice_client::JobKind;
use parking_lot::Mutex;

use super::model::{AdminJob, AdminJobName, AdminJobStatus};
use crate::error::{Error, Result};

/// Number of rows returned by [AdminJobStore::top10]
pub const RECENT_JOBS: usize = 10;

/// Filters for listing admin jobs
#[derive(Debug, Clone, Copy, Default)]
pub struct AdminJobQuery {
    /// Jobs with this name
    pub name: Option<AdminJobName>,
    /// Jobs of this kind
    pub kind: Option<JobKind>,
}

/// Local records of admin jobs. Deleted rows are never returned.
#[async_trait::async_trait]
pub trait AdminJobStore: std::fmt::Debug + Send + Sync {
    /// Add a row awaiting submission.
    ///
    /// A periodic row is refused while another periodic row of the same name exists.
    async fn add(&self, name: AdminJobName, kind: JobKind, cron: String) -> Result<AdminJob>;

    /// Record the job service handle of a row
    async fn set_uuid(&self, id: i64, uuid: &str) -> Result<()>;

    /// Look up a row
    async fn get(&self, id: i64) -> Result<Option<AdminJob>>;

    /// Rows matching the query, oldest first
    async fn list(&self, query: AdminJobQuery) -> Result<Vec<AdminJob>>;

    /// The most recent rows of a job, newest first
    async fn top10(&self, name: AdminJobName) -> Result<Vec<AdminJob>>;

    /// The most recent row of a job and kind
    async fn latest(&self, name: AdminJobName, kind: JobKind) -> Result<Option<AdminJob>>;

    /// Soft delete a row
    async fn delete(&self, id: i64) -> Result<()>;

    /// Record a reported status, returning whether the row changed.
    ///
    /// One-off jobs only move forward. Periodic rows track their latest run.
    async fn update_status(&self, id: i64, status: AdminJobStatus) -> Result<bool>;
}

#[derive(Debug, Default)]
struct Rows {
    next_id: i64,
    jobs: BTreeMap<i64, AdminJob>,
}

impl Rows {
    fn live_mut(&mut self, id: i64) -> Result<&mut AdminJob> {
        self.jobs
            .get_mut(&id)
            .filter(|job| !job.deleted)
            .ok_or_else(|| Error::NotFound(format!("admin job {id} not found")))
    }
}

/// In-memory [AdminJobStore]
#[derive(Debug, Clone, Default)]
pub struct MemoryAdminJobStore {
    inner: Arc<Mutex<Rows>>,
}

impl MemoryAdminJobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AdminJobStore for MemoryAdminJobStore {
    async fn add(&self, name: AdminJobName, kind: JobKind, cron: String) -> Result<AdminJob> {
        let mut inner = self.inner.lock();
        if kind == JobKind::Periodic
            && inner
                .jobs
                .values()
                .any(|job| !job.deleted && job.name == name && job.kind == JobKind::Periodic)
        {
            return Err(Error::PreconditionFailed(format!(
                "{name} is already scheduled"
            )));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let job = AdminJob {
            id: inner.next_id,
            name,
            kind,
            cron,
            uuid: String::new(),
            status: match kind {
                JobKind::Generic => AdminJobStatus::Pending,
                JobKind::Periodic => AdminJobStatus::Scheduled,
            },
            creation_time: now,
            update_time: now,
            deleted: false,
        };
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn set_uuid(&self, id: i64, uuid: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let job = inner.live_mut(id)?;
        job.uuid = uuid.to_owned();
        job.update_time = Utc::now();
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<AdminJob>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .get(&id)
            .filter(|job| !job.deleted)
            .cloned())
    }

    async fn list(&self, query: AdminJobQuery) -> Result<Vec<AdminJob>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .values()
            .filter(|job| !job.deleted)
            .filter(|job| query.name.is_none_or(|name| job.name == name))
            .filter(|job| query.kind.is_none_or(|kind| job.kind == kind))
            .cloned()
            .collect())
    }

    async fn top10(&self, name: AdminJobName) -> Result<Vec<AdminJob>> {
        let mut jobs: Vec<AdminJob> = self
            .inner
            .lock()
            .jobs
            .values()
            .filter(|job| !job.deleted && job.name == name)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.creation_time
                .cmp(&a.creation_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        jobs.truncate(RECENT_JOBS);
        Ok(jobs)
    }

    async fn latest(&self, name: AdminJobName, kind: JobKind) -> Result<Option<AdminJob>> {
        Ok(self
            .inner
            .lock()
            .jobs
            .values()
            .rev()
            .find(|job| !job.deleted && job.name == name && job.kind == kind)
            .cloned())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        let job = inner.live_mut(id)?;
        job.deleted = true;
        job.update_time = Utc::now();
        Ok(())
    }

    async fn update_status(&self, id: i64, status: AdminJobStatus) -> Result<bool> {
        let mut inner = self.inner.lock();
        let job = inner.live_mut(id)?;
        let allowed = match job.kind {
            JobKind::Generic => job.status.can_become(status),
            JobKind::Periodic => job.status != status,
        };
        if !allowed {
            return Ok(false);
        }
        job.status = status;
        job.update_time = Utc::now();
        Ok(true)
    }
}
