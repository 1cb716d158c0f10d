//! Execution and task storage

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::model::{
    Execution, ExecutionStatus, ExecutionTrigger, Resource, ResourceType, Task, TaskStatus,
};
use crate::error::{Error, Result};
use crate::pagination::Pagination;

/// Filters for listing executions
#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    /// Executions of one policy
    pub policy_id: Option<i64>,
    /// Executions in one status
    pub status: Option<ExecutionStatus>,
    /// Executions started one way
    pub trigger: Option<ExecutionTrigger>,
    /// Page to return
    pub pagination: Pagination,
}

/// Filters for listing the tasks of an execution
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Tasks in one status
    pub status: Option<TaskStatus>,
    /// Tasks of one resource type
    pub resource_type: Option<ResourceType>,
    /// Page to return
    pub pagination: Pagination,
}

/// A task to create
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Resource at the source
    pub resource: Resource,
    /// `repository:tag` at the destination
    pub destination: String,
}

/// Outcome of claiming a task for stopping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopClaim {
    /// The task never reached the job service and is now stopped
    Stopped,
    /// The task has a job which must be cancelled
    Cancel(String),
    /// The task had already finished
    AlreadyTerminal,
}

/// Storage of replication executions and their tasks.
///
/// Every method is atomic with respect to the others.
#[async_trait::async_trait]
pub trait ExecutionStore: std::fmt::Debug + Send + Sync {
    /// Create an execution together with its tasks, returning both.
    ///
    /// The execution is never visible without its tasks, and one without
    /// tasks is finished immediately. Fails with a conflict when the policy
    /// already has a live execution with the same trigger.
    async fn create_execution(
        &self,
        policy_id: i64,
        trigger: ExecutionTrigger,
        tasks: Vec<NewTask>,
    ) -> Result<(Execution, Vec<Task>)>;

    /// Look up an execution
    async fn get_execution(&self, id: i64) -> Result<Option<Execution>>;

    /// List executions, newest first
    async fn list_executions(&self, query: &ExecutionQuery) -> Result<(usize, Vec<Execution>)>;

    /// Live (in progress or stopping) executions of a policy
    async fn live_executions(&self, policy_id: i64) -> Result<Vec<Execution>>;

    /// Look up a task
    async fn get_task(&self, id: i64) -> Result<Option<Task>>;

    /// List the tasks of an execution, in creation order
    async fn list_tasks(&self, execution_id: i64, query: &TaskQuery) -> Result<(usize, Vec<Task>)>;

    /// Record the job assigned to a task, returning whether the task is still live.
    async fn set_task_job(&self, task_id: i64, uuid: &str) -> Result<bool>;

    /// Move a task forward, returning whether its status changed.
    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> Result<bool>;

    /// Claim a task for stopping.
    async fn claim_stop(&self, task_id: i64) -> Result<StopClaim>;

    /// Mark a live execution as stopping, returning its current state.
    async fn begin_stop(&self, execution_id: i64) -> Result<Execution>;

    /// Recompute an execution from its tasks, returning the result.
    async fn reconcile_execution(&self, execution_id: i64) -> Result<Execution>;
}

#[derive(Debug, Default)]
struct Tables {
    next_execution: i64,
    next_task: i64,
    executions: BTreeMap<i64, Execution>,
    tasks: BTreeMap<i64, Task>,
}

impl Tables {
    fn execution_mut(&mut self, id: i64) -> Result<&mut Execution> {
        self.executions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("execution {id} not found")))
    }

    fn task_mut(&mut self, id: i64) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("task {id} not found")))
    }

    fn reconcile(&mut self, id: i64) -> Result<Execution> {
        let Tables {
            executions, tasks, ..
        } = self;
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("execution {id} not found")))?;
        execution.reconcile(tasks.values().filter(|t| t.execution_id == id));
        Ok(execution.clone())
    }
}

/// In-memory [ExecutionStore]
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutionStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryExecutionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(status: ExecutionStatus) -> bool {
    matches!(
        status,
        ExecutionStatus::InProgress | ExecutionStatus::Stopping
    )
}

#[async_trait::async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create_execution(
        &self,
        policy_id: i64,
        trigger: ExecutionTrigger,
        tasks: Vec<NewTask>,
    ) -> Result<(Execution, Vec<Task>)> {
        let mut inner = self.inner.lock();
        if let Some(live) = inner.executions.values().find(|e| {
            e.policy_id == policy_id && e.trigger == trigger && is_live(e.status)
        }) {
            return Err(Error::Conflict(format!(
                "policy {policy_id} already has execution {} in progress",
                live.id
            )));
        }

        inner.next_execution += 1;
        let execution = Execution::new(inner.next_execution, policy_id, trigger);
        let execution_id = execution.id;
        inner.executions.insert(execution_id, execution);

        let now = chrono::Utc::now();
        let mut created = Vec::with_capacity(tasks.len());
        for new in tasks {
            inner.next_task += 1;
            let task = Task {
                id: inner.next_task,
                execution_id,
                resource_type: new.resource.resource_type,
                src_resource: new.resource.reference(),
                dst_resource: new.destination,
                status: TaskStatus::Pending,
                job_uuid: None,
                start_time: now,
                end_time: None,
            };
            inner.tasks.insert(task.id, task.clone());
            created.push(task);
        }
        let execution = inner.reconcile(execution_id)?;
        Ok((execution, created))
    }

    async fn get_execution(&self, id: i64) -> Result<Option<Execution>> {
        Ok(self.inner.lock().executions.get(&id).cloned())
    }

    async fn list_executions(&self, query: &ExecutionQuery) -> Result<(usize, Vec<Execution>)> {
        let matching: Vec<Execution> = self
            .inner
            .lock()
            .executions
            .values()
            .rev()
            .filter(|e| query.policy_id.is_none_or(|id| e.policy_id == id))
            .filter(|e| query.status.is_none_or(|status| e.status == status))
            .filter(|e| query.trigger.is_none_or(|trigger| e.trigger == trigger))
            .cloned()
            .collect();
        let total = matching.len();
        Ok((total, query.pagination.apply(matching)))
    }

    async fn live_executions(&self, policy_id: i64) -> Result<Vec<Execution>> {
        Ok(self
            .inner
            .lock()
            .executions
            .values()
            .filter(|e| e.policy_id == policy_id && is_live(e.status))
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        Ok(self.inner.lock().tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, execution_id: i64, query: &TaskQuery) -> Result<(usize, Vec<Task>)> {
        let matching: Vec<Task> = self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|t| t.execution_id == execution_id)
            .filter(|t| query.status.is_none_or(|status| t.status == status))
            .filter(|t| {
                query
                    .resource_type
                    .is_none_or(|resource_type| t.resource_type == resource_type)
            })
            .cloned()
            .collect();
        let total = matching.len();
        Ok((total, query.pagination.apply(matching)))
    }

    async fn set_task_job(&self, task_id: i64, uuid: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let task = inner.task_mut(task_id)?;
        task.job_uuid = Some(uuid.to_owned());
        Ok(!task.status.is_terminal())
    }

    async fn update_task_status(&self, task_id: i64, status: TaskStatus) -> Result<bool> {
        let mut inner = self.inner.lock();
        Ok(inner.task_mut(task_id)?.transition(status))
    }

    async fn claim_stop(&self, task_id: i64) -> Result<StopClaim> {
        let mut inner = self.inner.lock();
        let task = inner.task_mut(task_id)?;
        if task.status.is_terminal() {
            return Ok(StopClaim::AlreadyTerminal);
        }
        match &task.job_uuid {
            Some(uuid) => Ok(StopClaim::Cancel(uuid.clone())),
            None => {
                task.transition(TaskStatus::Stopped);
                Ok(StopClaim::Stopped)
            }
        }
    }

    async fn begin_stop(&self, execution_id: i64) -> Result<Execution> {
        let mut inner = self.inner.lock();
        let execution = inner.execution_mut(execution_id)?;
        if execution.status == ExecutionStatus::InProgress {
            execution.status = ExecutionStatus::Stopping;
        }
        Ok(execution.clone())
    }

    async fn reconcile_execution(&self, execution_id: i64) -> Result<Execution> {
        self.inner.lock().reconcile(execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(repository: &str) -> NewTask {
        NewTask {
            resource: Resource::new(ResourceType::Image, repository, "latest"),
            destination: format!("{repository}:latest"),
        }
    }

    #[tokio::test]
    async fn one_live_execution_per_policy_and_trigger() {
        let store = MemoryExecutionStore::new();
        let (first, tasks) = store
            .create_execution(1, ExecutionTrigger::Manual, vec![new_task("a/x")])
            .await
            .unwrap();
        assert_eq!(first.id, 1);

        assert!(matches!(
            store.create_execution(1, ExecutionTrigger::Manual, vec![new_task("a/y")]).await,
            Err(Error::Conflict(_))
        ));
        store
            .create_execution(1, ExecutionTrigger::Scheduled, vec![new_task("a/x")])
            .await
            .unwrap();
        store
            .create_execution(2, ExecutionTrigger::Manual, vec![new_task("a/x")])
            .await
            .unwrap();

        store
            .update_task_status(tasks[0].id, TaskStatus::Succeeded)
            .await
            .unwrap();
        store.reconcile_execution(first.id).await.unwrap();
        store
            .create_execution(1, ExecutionTrigger::Manual, vec![new_task("a/x")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn execution_is_created_with_its_tasks() {
        let store = MemoryExecutionStore::new();
        let (execution, tasks) = store
            .create_execution(
                1,
                ExecutionTrigger::Manual,
                vec![new_task("a/x"), new_task("a/y"), new_task("a/z")],
            )
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::InProgress);
        assert_eq!((execution.total, execution.in_progress), (3, 3));
        assert!(tasks.iter().all(|t| t.execution_id == execution.id));

        // a concurrent reader sees the execution with every task already counted
        let stored = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored, execution);
        let (total, _) = store
            .list_tasks(execution.id, &TaskQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn execution_without_tasks_finishes_immediately() {
        let store = MemoryExecutionStore::new();
        let (execution, tasks) = store
            .create_execution(1, ExecutionTrigger::Manual, Vec::new())
            .await
            .unwrap();
        assert!(tasks.is_empty());
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert!(execution.end_time.is_some());

        // nothing is left live to conflict with
        store
            .create_execution(1, ExecutionTrigger::Manual, Vec::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn executions_list_newest_first() {
        let store = MemoryExecutionStore::new();
        for policy in 1..=3 {
            store
                .create_execution(policy, ExecutionTrigger::Manual, vec![new_task("a/x")])
                .await
                .unwrap();
        }
        let (total, executions) = store
            .list_executions(&ExecutionQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(
            executions.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );

        let query = ExecutionQuery {
            policy_id: Some(2),
            ..Default::default()
        };
        assert_eq!(store.list_executions(&query).await.unwrap().0, 1);
    }

    #[tokio::test]
    async fn stop_claims() {
        let store = MemoryExecutionStore::new();
        let (execution, tasks) = store
            .create_execution(
                1,
                ExecutionTrigger::Manual,
                vec![new_task("a/x"), new_task("a/y"), new_task("a/z")],
            )
            .await
            .unwrap();

        assert!(store.set_task_job(tasks[1].id, "job-y").await.unwrap());
        store
            .update_task_status(tasks[2].id, TaskStatus::Succeeded)
            .await
            .unwrap();

        store.begin_stop(execution.id).await.unwrap();
        assert_eq!(store.claim_stop(tasks[0].id).await.unwrap(), StopClaim::Stopped);
        assert_eq!(
            store.claim_stop(tasks[1].id).await.unwrap(),
            StopClaim::Cancel("job-y".into())
        );
        assert_eq!(
            store.claim_stop(tasks[2].id).await.unwrap(),
            StopClaim::AlreadyTerminal
        );

        // a job accepted after the task was stopped is still recorded
        assert!(!store.set_task_job(tasks[0].id, "late").await.unwrap());
        assert_eq!(
            store.get_task(tasks[0].id).await.unwrap().unwrap().job_uuid.as_deref(),
            Some("late")
        );

        let execution = store.reconcile_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Stopping);

        store
            .update_task_status(tasks[1].id, TaskStatus::Stopped)
            .await
            .unwrap();
        let execution = store.reconcile_execution(execution.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Stopped);
        assert_eq!((execution.succeed, execution.stopped), (1, 2));
    }

    #[tokio::test]
    async fn task_filters() {
        let store = MemoryExecutionStore::new();
        let (execution, tasks) = store
            .create_execution(1, ExecutionTrigger::Manual, vec![new_task("a/x"), new_task("a/y")])
            .await
            .unwrap();
        store
            .update_task_status(tasks[0].id, TaskStatus::Failed)
            .await
            .unwrap();

        let query = TaskQuery {
            status: Some(TaskStatus::Failed),
            ..Default::default()
        };
        let (total, failed) = store.list_tasks(execution.id, &query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(failed[0].src_resource, "a/x:latest");

        assert!(matches!(
            store.reconcile_execution(99).await,
            Err(Error::NotFound(_))
        ));
    }
}
