//! Transitions between admin job schedules

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use jobservice_client::{JobClient, JobKind, JobRequest, JobStatus};

use super::model::{AdminJob, AdminJobName, AdminJobStatus, Schedule};
use super::store::{AdminJobQuery, AdminJobStore};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hook::StatusHooks;

/// How long a pending or running one-off job blocks the next manual run
pub const MANUAL_RUN_GUARD: Duration = Duration::from_secs(2 * 60 * 60);

/// Time allowed for undoing a failed submission
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps the admin job rows and the job service in step.
///
/// At most one periodic row exists per job name, and every row either carries
/// the handle of a job the job service accepted or is deleted before the
/// request that added it returns.
#[derive(Debug, Clone)]
pub struct ScheduleCoordinator {
    store: Arc<dyn AdminJobStore>,
    jobs: JobClient,
    hooks: StatusHooks,
}

impl ScheduleCoordinator {
    /// Create a coordinator
    pub fn new(store: Arc<dyn AdminJobStore>, jobs: JobClient, hooks: StatusHooks) -> Self {
        Self { store, jobs, hooks }
    }

    /// Create a schedule, or run the job once for a manual schedule.
    ///
    /// A `None` schedule does nothing.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn create(
        &self,
        deadline: &Deadline,
        name: AdminJobName,
        schedule: Schedule,
    ) -> Result<Option<AdminJob>> {
        match schedule {
            Schedule::None => Ok(None),
            schedule => self.submit(deadline, name, schedule).await.map(Some),
        }
    }

    /// Replace or cancel the current schedule.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn update(
        &self,
        deadline: &Deadline,
        name: AdminJobName,
        schedule: Schedule,
    ) -> Result<Option<AdminJob>> {
        if schedule == Schedule::Manual {
            return Err(Error::internal(format!(
                "a manual run of {name} cannot replace its schedule"
            )));
        }

        let current = self.current(deadline, name).await?;
        let [existing] = current.as_slice() else {
            return Err(Error::internal(format!(
                "expected one schedule of {name}, found {}",
                current.len()
            )));
        };

        if !existing.uuid.is_empty() {
            let stopped = deadline
                .run("job service", self.jobs.cancel(&existing.uuid))
                .await?;
            if !stopped {
                tracing::info!(uuid = %existing.uuid, "scheduled job already gone");
            }
        }
        deadline
            .run("admin job store", self.store.delete(existing.id))
            .await?;
        tracing::info!(id = existing.id, "removed schedule");

        match schedule {
            Schedule::None => Ok(None),
            schedule => self.submit(deadline, name, schedule).await.map(Some),
        }
    }

    async fn check_manual_run(&self, deadline: &Deadline, name: AdminJobName) -> Result<()> {
        let latest = deadline
            .run("admin job store", self.store.latest(name, JobKind::Generic))
            .await?;
        let Some(latest) = latest else {
            return Ok(());
        };

        let age = Utc::now()
            .signed_duration_since(latest.update_time)
            .to_std()
            .unwrap_or_default();
        if latest.status.is_busy() && age < MANUAL_RUN_GUARD {
            return Err(Error::BadRequest(format!(
                "{name} job {} is still {:?}",
                latest.id, latest.status
            )));
        }
        Ok(())
    }

    async fn submit(&self, deadline: &Deadline, name: AdminJobName, schedule: Schedule) -> Result<AdminJob> {
        let (kind, cron) = match &schedule {
            Schedule::Periodic(param) => (
                JobKind::Periodic,
                serde_json::to_string(param).map_err(Error::internal)?,
            ),
            Schedule::Manual => {
                self.check_manual_run(deadline, name).await?;
                (JobKind::Generic, String::new())
            }
            Schedule::None => {
                return Err(Error::internal(format!("cannot submit {name} without a schedule")));
            }
        };

        let mut job = deadline
            .run("admin job store", self.store.add(name, kind, cron))
            .await?;

        let request = match &schedule {
            Schedule::Periodic(param) => JobRequest::periodic(name.as_str(), param.cron.as_str()),
            _ => JobRequest::generic(name.as_str()),
        };
        let submitted = match self.hooks.admin_job(job.id) {
            Ok(hook) => {
                let request = request.parameter("admin_job_id", job.id).status_hook(hook);
                deadline.run("job service", self.jobs.submit(&request)).await
            }
            Err(error) => Err(error),
        };

        let recorded = match submitted {
            Ok(uuid) => deadline
                .run("admin job store", self.store.set_uuid(job.id, &uuid))
                .await
                .map(|()| uuid),
            Err(error) => Err(error),
        };

        match recorded {
            Ok(uuid) => {
                tracing::info!(id = job.id, %uuid, %kind, "submitted admin job");
                job.uuid = uuid;
                Ok(job)
            }
            Err(error) => {
                tracing::warn!(id = job.id, %error, "admin job submission failed, removing row");
                self.rollback(job.id).await;
                Err(error)
            }
        }
    }

    async fn rollback(&self, id: i64) {
        let deadline = Deadline::after(ROLLBACK_TIMEOUT);
        if let Err(error) = deadline.run("admin job store", self.store.delete(id)).await {
            tracing::error!(id, %error, "failed to remove unsubmitted admin job");
        }
    }

    /// The current schedule, as a list of at most one row
    pub async fn current(&self, deadline: &Deadline, name: AdminJobName) -> Result<Vec<AdminJob>> {
        let query = AdminJobQuery {
            name: Some(name),
            kind: Some(JobKind::Periodic),
        };
        deadline.run("admin job store", self.store.list(query)).await
    }

    /// The most recent jobs, newest first
    pub async fn recent(&self, deadline: &Deadline, name: AdminJobName) -> Result<Vec<AdminJob>> {
        deadline.run("admin job store", self.store.top10(name)).await
    }

    /// One job of the given name
    pub async fn get(&self, deadline: &Deadline, name: AdminJobName, id: i64) -> Result<AdminJob> {
        deadline
            .run("admin job store", self.store.get(id))
            .await?
            .filter(|job| job.name == name)
            .ok_or_else(|| Error::NotFound(format!("{name} job {id} not found")))
    }

    /// The job service log of a job.
    ///
    /// A periodic job has no log of its own; the log of its most recent
    /// finished run is returned instead.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn log(&self, deadline: &Deadline, name: AdminJobName, id: i64) -> Result<Bytes> {
        let job = self.get(deadline, name, id).await?;
        if job.uuid.is_empty() {
            return Err(Error::NotFound(format!("{name} job {id} has no log")));
        }

        let uuid = match job.kind {
            JobKind::Generic => job.uuid,
            JobKind::Periodic => {
                let executions = deadline
                    .run("job service", self.jobs.executions(&job.uuid))
                    .await?;
                executions
                    .into_iter()
                    .find(|run| matches!(run.status, JobStatus::Error | JobStatus::Success))
                    .map(|run| run.id)
                    .ok_or_else(|| {
                        Error::NotFound(format!("{name} job {id} has not finished a run yet"))
                    })?
            }
        };
        deadline.run("job service", self.jobs.log(&uuid)).await
    }

    /// Record a status reported by the job service
    #[tracing::instrument(skip(self, deadline))]
    pub async fn update_status(&self, deadline: &Deadline, id: i64, status: JobStatus) -> Result<()> {
        let changed = deadline
            .run(
                "admin job store",
                self.store.update_status(id, AdminJobStatus::from(status)),
            )
            .await?;
        if !changed {
            tracing::debug!("ignored stale admin job status");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use jobservice_client::MemoryJobService;

    use super::*;
    use crate::adminjob::model::{ScheduleParam, ScheduleType};
    use crate::adminjob::store::MemoryAdminJobStore;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn periodic(kind: ScheduleType, cron: &str) -> Schedule {
        Schedule::try_from(ScheduleParam {
            kind,
            cron: cron.into(),
        })
        .unwrap()
    }

    fn coordinator() -> (ScheduleCoordinator, MemoryAdminJobStore, MemoryJobService) {
        let store = MemoryAdminJobStore::new();
        let jobs = MemoryJobService::new();
        let coordinator = ScheduleCoordinator::new(
            Arc::new(store.clone()),
            JobClient::from(jobs.clone()),
            StatusHooks::new("http://core".parse().unwrap()),
        );
        (coordinator, store, jobs)
    }

    #[tokio::test]
    async fn create_then_replace_then_cancel() {
        let (coordinator, _, jobs) = coordinator();
        let gc = AdminJobName::ImageGc;

        let first = coordinator
            .create(&deadline(), gc, periodic(ScheduleType::Periodic, "0 0 3 * * *"))
            .await
            .unwrap()
            .unwrap();
        assert!(!first.uuid.is_empty());
        assert_eq!(first.cron, r#"{"Type":"Periodic","Cron":"0 0 3 * * *"}"#);

        assert!(matches!(
            coordinator
                .create(&deadline(), gc, periodic(ScheduleType::Periodic, "0 0 3 * * *"))
                .await,
            Err(Error::PreconditionFailed(_))
        ));

        let replaced = coordinator
            .update(&deadline(), gc, periodic(ScheduleType::Daily, "20 3 0 * * *"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(jobs.stats(&first.uuid).unwrap().status, JobStatus::Stopped);

        let current = coordinator.current(&deadline(), gc).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, replaced.id);
        assert_eq!(current[0].schedule().unwrap().cron, "20 3 0 * * *");

        coordinator.update(&deadline(), gc, Schedule::None).await.unwrap();
        assert!(coordinator.current(&deadline(), gc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_requires_exactly_one_schedule() {
        let (coordinator, _, _) = coordinator();
        let err = coordinator
            .update(&deadline(), AdminJobName::ImageGc, Schedule::None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        let err = coordinator
            .update(&deadline(), AdminJobName::ImageGc, Schedule::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn update_tolerates_vanished_job() {
        let (coordinator, _, jobs) = coordinator();
        let gc = AdminJobName::ImageGc;
        let first = coordinator
            .create(&deadline(), gc, periodic(ScheduleType::Weekly, ""))
            .await
            .unwrap()
            .unwrap();
        jobs.forget(&first.uuid);

        coordinator
            .update(&deadline(), gc, periodic(ScheduleType::Hourly, ""))
            .await
            .unwrap();
        assert_eq!(coordinator.current(&deadline(), gc).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_submission_leaves_no_row() {
        let (coordinator, store, jobs) = coordinator();
        jobs.fail_next_submit(axum::http::StatusCode::SERVICE_UNAVAILABLE);

        let err = coordinator
            .create(
                &deadline(),
                AdminJobName::ImageScanAll,
                periodic(ScheduleType::Daily, "0 0 1 * * *"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(store.list(AdminJobQuery::default()).await.unwrap().is_empty());

        coordinator
            .create(
                &deadline(),
                AdminJobName::ImageScanAll,
                periodic(ScheduleType::Daily, "0 0 1 * * *"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn manual_runs_are_guarded() {
        let (coordinator, _, _) = coordinator();
        let gc = AdminJobName::ImageGc;
        let run = coordinator
            .create(&deadline(), gc, Schedule::Manual)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.kind, JobKind::Generic);

        assert!(matches!(
            coordinator.create(&deadline(), gc, Schedule::Manual).await,
            Err(Error::BadRequest(_))
        ));

        coordinator
            .update_status(&deadline(), run.id, JobStatus::Success)
            .await
            .unwrap();
        coordinator
            .create(&deadline(), gc, Schedule::Manual)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn none_schedule_creates_nothing() {
        let (coordinator, store, jobs) = coordinator();
        assert!(coordinator
            .create(&deadline(), AdminJobName::ImageGc, Schedule::None)
            .await
            .unwrap()
            .is_none());
        assert!(store.list(AdminJobQuery::default()).await.unwrap().is_empty());
        assert!(jobs.submitted().is_empty());
    }

    #[tokio::test]
    async fn logs() {
        let (coordinator, _, jobs) = coordinator();
        let gc = AdminJobName::ImageGc;

        let once = coordinator
            .create(&deadline(), gc, Schedule::Manual)
            .await
            .unwrap()
            .unwrap();
        jobs.set_log(&once.uuid, "freed 3GB");
        assert_eq!(
            &coordinator.log(&deadline(), gc, once.id).await.unwrap()[..],
            b"freed 3GB"
        );
        assert!(matches!(
            coordinator
                .log(&deadline(), AdminJobName::ImageScanAll, once.id)
                .await,
            Err(Error::NotFound(_))
        ));

        let schedule = coordinator
            .create(&deadline(), gc, periodic(ScheduleType::Daily, ""))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            coordinator.log(&deadline(), gc, schedule.id).await,
            Err(Error::NotFound(_))
        ));

        let finished = jobs
            .record_execution(&schedule.uuid, JobStatus::Success)
            .unwrap();
        jobs.record_execution(&schedule.uuid, JobStatus::Running)
            .unwrap();
        jobs.set_log(&finished, "nightly run");
        assert_eq!(
            &coordinator.log(&deadline(), gc, schedule.id).await.unwrap()[..],
            b"nightly run"
        );
    }
}
