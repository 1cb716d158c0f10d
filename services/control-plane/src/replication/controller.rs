//! Starting, stopping and observing replication executions

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use jobservice_client::{JobClient, JobRequest};
use tokio::sync::Semaphore;

use super::catalog::ArtifactCatalog;
use super::model::{
    Execution, ExecutionTrigger, OnFailure, ReplicationPolicy, ReplicationSpec, Resource, Task,
    TaskStatus,
};
use super::store::{ExecutionQuery, ExecutionStore, NewTask, StopClaim, TaskQuery};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::hook::StatusHooks;
use crate::pagination::Pagination;
use crate::policy::{PolicyManager, Trigger};
use crate::registry::{Registry, RegistryStore};

/// Job name registered with the job service for replication tasks
pub const REPLICATION_JOB: &str = "REPLICATION";

/// Most task submissions in flight at once, across all executions
pub const MAX_CONCURRENT_SUBMISSIONS: usize = 10;

/// Time a background submission may take
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives executions of replication policies.
///
/// Starting an execution creates the execution and its tasks, then hands the
/// tasks to the job service in the background. Task status comes back through
/// status hooks or by polling the job service when an execution is read.
#[derive(Debug, Clone)]
pub struct ReplicationController {
    policies: PolicyManager<ReplicationSpec>,
    registries: Arc<dyn RegistryStore>,
    executions: Arc<dyn ExecutionStore>,
    catalog: Arc<dyn ArtifactCatalog>,
    jobs: JobClient,
    hooks: StatusHooks,
    permits: Arc<Semaphore>,
}

impl ReplicationController {
    /// Create a controller
    pub fn new(
        policies: PolicyManager<ReplicationSpec>,
        registries: Arc<dyn RegistryStore>,
        executions: Arc<dyn ExecutionStore>,
        catalog: Arc<dyn ArtifactCatalog>,
        jobs: JobClient,
        hooks: StatusHooks,
    ) -> Self {
        Self {
            policies,
            registries,
            executions,
            catalog,
            jobs,
            hooks,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_SUBMISSIONS)),
        }
    }

    /// The replication policies this controller runs
    pub fn policies(&self) -> &PolicyManager<ReplicationSpec> {
        &self.policies
    }

    async fn registry(&self, deadline: &Deadline, id: i64) -> Result<Option<Registry>> {
        deadline.run("registry store", self.registries.get(id)).await
    }

    /// Check the parts of a replication policy which depend on other records.
    pub async fn validate_policy(&self, deadline: &Deadline, policy: &ReplicationPolicy) -> Result<()> {
        let spec = &policy.spec;
        let Some(src) = self.registry(deadline, spec.src_registry_id).await? else {
            return Err(Error::BadRequest(format!(
                "source registry {} not found",
                spec.src_registry_id
            )));
        };
        if self.registry(deadline, spec.dest_registry_id).await?.is_none() {
            return Err(Error::BadRequest(format!(
                "destination registry {} not found",
                spec.dest_registry_id
            )));
        }
        if matches!(policy.trigger, Trigger::Event { .. }) && !src.kind.capabilities().event_trigger {
            return Err(Error::BadRequest(format!(
                "registry {} cannot trigger replication by event",
                src.name
            )));
        }
        Ok(())
    }

    /// Whether any replication policy references a registry
    pub async fn registry_in_use(&self, deadline: &Deadline, registry_id: i64) -> Result<bool> {
        let policies = deadline.run("policy store", self.policies.all(0)).await?;
        Ok(policies.iter().any(|policy| {
            policy.spec.src_registry_id == registry_id || policy.spec.dest_registry_id == registry_id
        }))
    }

    /// Executions of a policy which have not finished
    pub async fn live_executions(&self, deadline: &Deadline, policy_id: i64) -> Result<Vec<Execution>> {
        deadline
            .run("execution store", self.executions.live_executions(policy_id))
            .await
    }

    async fn materialize(&self, deadline: &Deadline, id: i64, policy: &ReplicationPolicy) -> Result<Registry> {
        self.registry(deadline, id).await?.ok_or_else(|| {
            Error::internal(format!(
                "registry {id} referenced by replication policy {} not found",
                policy.id
            ))
        })
    }

    /// Start an execution of a policy, returning it as soon as its tasks exist.
    ///
    /// With `resource` set only that resource is replicated, provided the
    /// policy filters select it. Otherwise every resource in the source registry
    /// is a candidate.
    #[tracing::instrument(skip(self, deadline, resource))]
    pub async fn start(
        &self,
        deadline: &Deadline,
        policy_id: i64,
        trigger: ExecutionTrigger,
        resource: Option<Resource>,
    ) -> Result<Execution> {
        let policy = deadline.run("policy store", self.policies.get(0, policy_id)).await?;
        if !policy.enabled {
            return Err(Error::BadRequest(format!(
                "replication policy {policy_id} is disabled"
            )));
        }

        let src = self.materialize(deadline, policy.spec.src_registry_id, &policy).await?;
        let dst = self.materialize(deadline, policy.spec.dest_registry_id, &policy).await?;

        let candidates = match resource {
            Some(resource) => vec![resource],
            None => deadline.run("artifact catalog", self.catalog.list(&src)).await?,
        };
        let supported = src.kind.capabilities().resource_types;
        let tasks: Vec<NewTask> = candidates
            .into_iter()
            .filter(|resource| supported.contains(&resource.resource_type.as_str()))
            .filter(|resource| policy.spec.selects(resource))
            .map(|resource| NewTask {
                destination: policy.spec.destination(&resource),
                resource,
            })
            .collect();

        let (execution, tasks) = deadline
            .run(
                "execution store",
                self.executions.create_execution(policy_id, trigger, tasks),
            )
            .await?;
        tracing::info!(execution_id = execution.id, tasks = tasks.len(), "started replication");

        if tasks.is_empty() {
            return Ok(execution);
        }

        let policy = Arc::new(policy);
        let src = Arc::new(src);
        let dst = Arc::new(dst);
        for task in tasks {
            let controller = self.clone();
            let permits = self.permits.clone();
            let (policy, src, dst) = (policy.clone(), src.clone(), dst.clone());
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                controller.submit_task(&policy, &src, &dst, task).await;
            });
        }

        deadline
            .run("execution store", self.executions.reconcile_execution(execution.id))
            .await
    }

    fn task_job(&self, policy: &ReplicationPolicy, src: &Registry, dst: &Registry, task: &Task) -> Result<JobRequest> {
        Ok(JobRequest::generic(REPLICATION_JOB)
            .parameter("execution_id", task.execution_id)
            .parameter("task_id", task.id)
            .parameter("policy_id", policy.id)
            .parameter("resource_type", task.resource_type.as_str())
            .parameter("src_resource", task.src_resource.as_str())
            .parameter("dst_resource", task.dst_resource.as_str())
            .parameter("override", policy.spec.override_existing)
            .parameter("deletion", policy.spec.deletion)
            .parameter("src_registry", src.job_parameter())
            .parameter("dst_registry", dst.job_parameter())
            .status_hook(self.hooks.task(task.id)?))
    }

    #[tracing::instrument(skip_all, fields(execution_id = task.execution_id, task_id = task.id))]
    async fn submit_task(&self, policy: &ReplicationPolicy, src: &Registry, dst: &Registry, task: Task) {
        let deadline = Deadline::after(SUBMIT_TIMEOUT);

        match deadline.run("execution store", self.executions.get_task(task.id)).await {
            Ok(Some(current)) if current.status.is_terminal() => {
                tracing::debug!(status = ?current.status, "task finished before submission");
                return;
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "failed to read task before submission"),
        }

        let submitted = match self.task_job(policy, src, dst, &task) {
            Ok(job) => deadline.run("job service", self.jobs.submit(&job)).await,
            Err(error) => Err(error),
        };

        let uuid = match submitted {
            Ok(uuid) => uuid,
            Err(error) => {
                tracing::warn!(%error, "failed to submit replication task");
                if let Err(error) = self.apply_task_status(&deadline, task.id, TaskStatus::Failed).await {
                    tracing::error!(%error, "failed to mark task as failed");
                }
                return;
            }
        };

        match deadline
            .run("execution store", self.executions.set_task_job(task.id, &uuid))
            .await
        {
            Ok(true) => tracing::debug!(%uuid, "task accepted by job service"),
            Ok(false) => {
                tracing::debug!(%uuid, "task stopped while submitting, cancelling job");
                if let Err(error) = deadline.run("job service", self.jobs.cancel(&uuid)).await {
                    tracing::warn!(%uuid, %error, "failed to cancel job of stopped task");
                }
            }
            Err(error) => tracing::error!(%uuid, %error, "failed to record job of task"),
        }
    }

    /// Apply a status reported for a task and reconcile its execution.
    ///
    /// Status never moves backwards, so repeated or late reports are harmless.
    /// A failed task stops the execution when the policy asks for it.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn apply_task_status(&self, deadline: &Deadline, task_id: i64, status: TaskStatus) -> Result<()> {
        let task = deadline
            .run("execution store", self.executions.get_task(task_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {task_id} not found")))?;

        let changed = deadline
            .run("execution store", self.executions.update_task_status(task_id, status))
            .await?;
        if !changed {
            return Ok(());
        }

        let execution = deadline
            .run("execution store", self.executions.reconcile_execution(task.execution_id))
            .await?;
        if status != TaskStatus::Failed || execution.status.is_terminal() {
            return Ok(());
        }

        match deadline.run("policy store", self.policies.get(0, execution.policy_id)).await {
            Ok(policy) if policy.spec.on_failure == OnFailure::Stop => {
                tracing::info!(execution_id = execution.id, "task failed, stopping execution");
                self.stop(deadline, execution.id).await.map(|_| ())
            }
            Ok(_) => Ok(()),
            Err(error) => {
                tracing::warn!(%error, policy_id = execution.policy_id, "policy of execution unavailable");
                Ok(())
            }
        }
    }

    /// Ask an execution to stop.
    ///
    /// Returns once every live task has been told to stop. Tasks which never
    /// reached the job service, or whose job is gone, stop immediately; the rest
    /// converge as the job service reports back.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn stop(&self, deadline: &Deadline, execution_id: i64) -> Result<Execution> {
        let execution = deadline
            .run("execution store", self.executions.get_execution(execution_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id} not found")))?;
        if execution.status.is_terminal() {
            return Ok(execution);
        }

        deadline
            .run("execution store", self.executions.begin_stop(execution_id))
            .await?;

        let query = TaskQuery {
            pagination: Pagination::all(),
            ..Default::default()
        };
        let (_, tasks) = deadline
            .run("execution store", self.executions.list_tasks(execution_id, &query))
            .await?;

        let mut failure = None;
        for task in tasks.iter().filter(|task| !task.status.is_terminal()) {
            let claim = deadline
                .run("execution store", self.executions.claim_stop(task.id))
                .await?;
            let StopClaim::Cancel(uuid) = claim else {
                continue;
            };
            match deadline.run("job service", self.jobs.cancel(&uuid)).await {
                Ok(true) => {}
                Ok(false) => {
                    deadline
                        .run(
                            "execution store",
                            self.executions.update_task_status(task.id, TaskStatus::Stopped),
                        )
                        .await?;
                }
                Err(error) => {
                    tracing::warn!(task_id = task.id, %uuid, %error, "failed to stop job");
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
            }
        }

        let execution = deadline
            .run("execution store", self.executions.reconcile_execution(execution_id))
            .await?;
        match failure {
            Some(error) => Err(error),
            None => Ok(execution),
        }
    }

    /// Fetch an execution, first refreshing its live tasks from the job service.
    #[tracing::instrument(skip(self, deadline))]
    pub async fn get_execution(&self, deadline: &Deadline, execution_id: i64) -> Result<Execution> {
        let execution = deadline
            .run("execution store", self.executions.get_execution(execution_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id} not found")))?;
        if execution.status.is_terminal() {
            return Ok(execution);
        }

        let query = TaskQuery {
            pagination: Pagination::all(),
            ..Default::default()
        };
        let (_, tasks) = deadline
            .run("execution store", self.executions.list_tasks(execution_id, &query))
            .await?;

        for task in tasks.iter().filter(|task| !task.status.is_terminal()) {
            let Some(uuid) = &task.job_uuid else {
                continue;
            };
            let status = match deadline.run("job service", self.jobs.status(uuid)).await {
                Ok(stats) => TaskStatus::from(stats.status),
                Err(Error::NotFound(_)) => {
                    tracing::debug!(task_id = task.id, %uuid, "job gone from job service");
                    TaskStatus::Stopped
                }
                Err(error) => {
                    tracing::warn!(task_id = task.id, %uuid, %error, "failed to refresh task");
                    continue;
                }
            };
            self.apply_task_status(deadline, task.id, status).await?;
        }

        deadline
            .run("execution store", self.executions.reconcile_execution(execution_id))
            .await
    }

    /// List executions, newest first
    pub async fn list_executions(&self, deadline: &Deadline, query: &ExecutionQuery) -> Result<(usize, Vec<Execution>)> {
        deadline
            .run("execution store", self.executions.list_executions(query))
            .await
    }

    async fn existing_execution(&self, deadline: &Deadline, execution_id: i64) -> Result<Execution> {
        deadline
            .run("execution store", self.executions.get_execution(execution_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id} not found")))
    }

    /// List the tasks of an execution
    pub async fn list_tasks(&self, deadline: &Deadline, execution_id: i64, query: &TaskQuery) -> Result<(usize, Vec<Task>)> {
        self.existing_execution(deadline, execution_id).await?;
        deadline
            .run("execution store", self.executions.list_tasks(execution_id, query))
            .await
    }

    /// Fetch a task of an execution
    pub async fn get_task(&self, deadline: &Deadline, execution_id: i64, task_id: i64) -> Result<Task> {
        self.existing_execution(deadline, execution_id).await?;
        deadline
            .run("execution store", self.executions.get_task(task_id))
            .await?
            .filter(|task| task.execution_id == execution_id)
            .ok_or_else(|| {
                Error::NotFound(format!("task {task_id} not found in execution {execution_id}"))
            })
    }

    /// Fetch the job log of a task
    #[tracing::instrument(skip(self, deadline))]
    pub async fn get_task_log(&self, deadline: &Deadline, execution_id: i64, task_id: i64) -> Result<Bytes> {
        let task = self.get_task(deadline, execution_id, task_id).await?;
        let uuid = task
            .job_uuid
            .ok_or_else(|| Error::NotFound(format!("task {task_id} has no log yet")))?;
        deadline.run("job service", self.jobs.log(&uuid)).await
    }
}

#[cfg(test)]
mod tests {
    use jobservice_client::{JobStatus, MemoryJobService};
    use serde_json::json;

    use super::*;
    use crate::auth::Principal;
    use crate::policy::MemoryPolicyStore;
    use crate::registry::MemoryRegistryStore;
    use crate::replication::catalog::MemoryCatalog;
    use crate::replication::model::{ExecutionStatus, ResourceType};
    use crate::replication::store::MemoryExecutionStore;

    struct Fixture {
        controller: ReplicationController,
        jobs: MemoryJobService,
        catalog: MemoryCatalog,
        registries: MemoryRegistryStore,
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(5))
    }

    fn admin() -> Principal {
        Principal::User {
            username: "admin".into(),
            sys_admin: true,
        }
    }

    async fn fixture() -> Fixture {
        let jobs = MemoryJobService::new();
        let catalog = MemoryCatalog::new();
        let registries = MemoryRegistryStore::new();
        for (name, kind) in [("src", "harbor"), ("dst", "docker-hub")] {
            let registry: Registry = serde_json::from_value(json!({
                "name": name,
                "type": kind,
                "url": format!("https://{name}.example.com"),
            }))
            .unwrap();
            registries.create(registry).await.unwrap();
        }

        let controller = ReplicationController::new(
            PolicyManager::new(MemoryPolicyStore::<ReplicationSpec>::new()),
            Arc::new(registries.clone()),
            Arc::new(MemoryExecutionStore::new()),
            Arc::new(catalog.clone()),
            JobClient::from(jobs.clone()),
            StatusHooks::new("http://core:8080".parse().unwrap()),
        );
        Fixture {
            controller,
            jobs,
            catalog,
            registries,
        }
    }

    async fn create_policy(fixture: &Fixture, name: &str, body: serde_json::Value) -> i64 {
        let mut value = json!({
            "name": name,
            "src_registry_id": 1,
            "dest_registry_id": 2,
        });
        if let (Some(target), Some(extra)) = (value.as_object_mut(), body.as_object()) {
            target.extend(extra.clone());
        }
        let policy: ReplicationPolicy = serde_json::from_value(value).unwrap();
        fixture
            .controller
            .policies()
            .create(&admin(), 0, policy)
            .await
            .unwrap()
    }

    async fn wait_for_jobs(fixture: &Fixture, execution_id: i64, count: usize) -> Vec<Task> {
        for _ in 0..200 {
            let (_, tasks) = fixture
                .controller
                .list_tasks(&deadline(), execution_id, &TaskQuery::default())
                .await
                .unwrap();
            let assigned = tasks.iter().filter(|t| t.job_uuid.is_some()).count();
            let settled = tasks
                .iter()
                .filter(|t| t.job_uuid.is_some() || t.status.is_terminal())
                .count();
            if assigned >= count || (settled == tasks.len() && settled >= count) {
                return tasks;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("tasks were not submitted");
    }

    #[tokio::test]
    async fn disabled_policy_creates_nothing() {
        let fixture = fixture().await;
        let id = create_policy(&fixture, "off", json!({"enabled": false})).await;

        let err = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let (total, _) = fixture
            .controller
            .list_executions(&deadline(), &ExecutionQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn unknown_policy_is_not_found() {
        let fixture = fixture().await;
        let err = fixture
            .controller
            .start(&deadline(), 42, ExecutionTrigger::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_registry_is_internal() {
        let fixture = fixture().await;
        let id = create_policy(&fixture, "orphan", json!({})).await;
        fixture.registries.delete(2).await.unwrap();

        let err = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn empty_candidate_set_succeeds_immediately() {
        let fixture = fixture().await;
        let id = create_policy(&fixture, "empty", json!({})).await;
        let execution = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.total, 0);
    }

    #[tokio::test]
    async fn tasks_follow_filters_and_job_status() {
        let fixture = fixture().await;
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/hello", "v1"));
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "other/hello", "v1"));
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Chart, "library/chart", "v1"));
        let id = create_policy(
            &fixture,
            "library",
            json!({
                "dest_namespace": "mirror",
                "filters": [{"type": "name", "value": "library/*"}]
            }),
        )
        .await;

        let execution = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::InProgress);
        assert_eq!(execution.total, 2);

        let tasks = wait_for_jobs(&fixture, execution.id, 2).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].dst_resource, "mirror/hello:v1");

        let submitted = fixture.jobs.submitted();
        assert_eq!(submitted.len(), 2);
        assert!(submitted.iter().all(|job| job.name == REPLICATION_JOB));
        assert!(submitted[0]
            .status_hook
            .as_deref()
            .unwrap()
            .starts_with("http://core:8080/service/notifications/tasks/"));

        for task in &tasks {
            fixture
                .jobs
                .set_status(task.job_uuid.as_deref().unwrap(), JobStatus::Success)
                .unwrap();
        }
        let execution = fixture
            .controller
            .get_execution(&deadline(), execution.id)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.succeed, 2);
    }

    #[tokio::test]
    async fn one_live_execution_per_trigger() {
        let fixture = fixture().await;
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/hello", "v1"));
        let id = create_policy(&fixture, "busy", json!({})).await;

        fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        let err = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Scheduled, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_converges() {
        let fixture = fixture().await;
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/a", "1"));
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/b", "1"));
        let id = create_policy(&fixture, "stoppable", json!({})).await;

        let execution = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        let tasks = wait_for_jobs(&fixture, execution.id, 2).await;

        fixture.controller.stop(&deadline(), execution.id).await.unwrap();
        fixture.controller.stop(&deadline(), execution.id).await.unwrap();

        // one job disappears from the job service before it reports back
        fixture.jobs.forget(tasks[1].job_uuid.as_deref().unwrap());

        let execution = fixture
            .controller
            .get_execution(&deadline(), execution.id)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Stopped);
        assert_eq!(execution.stopped, 2);
        assert!(execution.end_time.is_some());

        fixture.controller.stop(&deadline(), execution.id).await.unwrap();
    }

    #[tokio::test]
    async fn failed_submission_marks_task_failed() {
        let fixture = fixture().await;
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/a", "1"));
        fixture
            .jobs
            .fail_next_submit(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let id = create_policy(&fixture, "flaky", json!({})).await;

        let execution = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        let tasks = wait_for_jobs(&fixture, execution.id, 1).await;
        assert_eq!(tasks[0].status, TaskStatus::Failed);

        let execution = fixture
            .controller
            .get_execution(&deadline(), execution.id)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn failure_stops_execution_when_asked() {
        let fixture = fixture().await;
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/a", "1"));
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/b", "1"));
        let id = create_policy(&fixture, "strict", json!({"on_failure": "stop"})).await;

        let execution = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        let tasks = wait_for_jobs(&fixture, execution.id, 2).await;

        fixture
            .controller
            .apply_task_status(&deadline(), tasks[0].id, TaskStatus::Failed)
            .await
            .unwrap();
        // reported twice, as a status hook retry would
        fixture
            .controller
            .apply_task_status(&deadline(), tasks[0].id, TaskStatus::Failed)
            .await
            .unwrap();

        let other = tasks[1].job_uuid.as_deref().unwrap();
        assert_eq!(fixture.jobs.stats(other).unwrap().status, JobStatus::Stopped);

        let execution = fixture
            .controller
            .get_execution(&deadline(), execution.id)
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Stopped);
        assert_eq!((execution.failed, execution.stopped), (1, 1));
    }

    #[tokio::test]
    async fn single_resource_must_pass_filters() {
        let fixture = fixture().await;
        let id = create_policy(
            &fixture,
            "tags",
            json!({"filters": [{"type": "tag", "value": "release-*"}]}),
        )
        .await;

        let skipped = fixture
            .controller
            .start(
                &deadline(),
                id,
                ExecutionTrigger::Event,
                Some(Resource::new(ResourceType::Image, "library/a", "dev")),
            )
            .await
            .unwrap();
        assert_eq!(skipped.total, 0);

        let started = fixture
            .controller
            .start(
                &deadline(),
                id,
                ExecutionTrigger::Event,
                Some(Resource::new(ResourceType::Image, "library/a", "release-1")),
            )
            .await
            .unwrap();
        assert_eq!(started.total, 1);
    }

    #[tokio::test]
    async fn task_logs_come_from_the_job_service() {
        let fixture = fixture().await;
        fixture
            .catalog
            .add(1, Resource::new(ResourceType::Image, "library/a", "1"));
        let id = create_policy(&fixture, "logged", json!({})).await;
        let execution = fixture
            .controller
            .start(&deadline(), id, ExecutionTrigger::Manual, None)
            .await
            .unwrap();
        let tasks = wait_for_jobs(&fixture, execution.id, 1).await;
        fixture
            .jobs
            .set_log(tasks[0].job_uuid.as_deref().unwrap(), "copied 3 layers\n");

        let log = fixture
            .controller
            .get_task_log(&deadline(), execution.id, tasks[0].id)
            .await
            .unwrap();
        assert_eq!(&log[..], b"copied 3 layers\n");

        assert!(matches!(
            fixture
                .controller
                .get_task_log(&deadline(), execution.id + 1, tasks[0].id)
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn policy_references_are_checked() {
        let fixture = fixture().await;
        let mut policy: ReplicationPolicy = serde_json::from_value(json!({
            "name": "events",
            "src_registry_id": 2,
            "dest_registry_id": 1,
            "trigger": {"type": "event", "event_types": ["PUSH_ARTIFACT"]}
        }))
        .unwrap();
        // docker hub cannot send events
        assert!(matches!(
            fixture.controller.validate_policy(&deadline(), &policy).await,
            Err(Error::BadRequest(_))
        ));

        policy.spec.src_registry_id = 1;
        policy.spec.dest_registry_id = 2;
        fixture.controller.validate_policy(&deadline(), &policy).await.unwrap();

        policy.spec.dest_registry_id = 9;
        assert!(matches!(
            fixture.controller.validate_policy(&deadline(), &policy).await,
            Err(Error::BadRequest(_))
        ));

        create_policy(&fixture, "uses", json!({})).await;
        assert!(fixture.controller.registry_in_use(&deadline(), 2).await.unwrap());
        assert!(!fixture.controller.registry_in_use(&deadline(), 3).await.unwrap());
    }
}
