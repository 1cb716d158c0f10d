//! Replication policies, executions and tasks

use std::fmt;

use chrono::{DateTime, Utc};
use jobservice_client::JobStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::{Policy, PolicySpec, Trigger};

/// What to do with the rest of an execution when one task fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Keep replicating the remaining resources
    #[default]
    Continue,
    /// Stop the execution
    Stop,
}

/// Which property of a resource a filter matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Repository name, glob pattern
    Name,
    /// Tag, glob pattern
    Tag,
    /// Resource type, exact match
    Resource,
}

/// Selects the resources a policy replicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Property matched
    #[serde(rename = "type")]
    pub kind: FilterKind,

    /// Pattern
    pub value: String,
}

/// Translate a glob into an anchored regex.
///
/// `*` matches within one path component, `**` matches across components and
/// `?` matches a single character.
pub fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

impl Filter {
    fn validate(&self) -> Result<()> {
        match self.kind {
            FilterKind::Name | FilterKind::Tag => glob_to_regex(&self.value)
                .map(|_| ())
                .map_err(|error| Error::BadRequest(format!("invalid filter {:?}: {error}", self.value))),
            FilterKind::Resource => match ResourceType::parse(&self.value) {
                Some(_) => Ok(()),
                None => Err(Error::BadRequest(format!(
                    "unknown resource type {:?}",
                    self.value
                ))),
            },
        }
    }

    fn matches(&self, resource: &Resource) -> bool {
        match self.kind {
            FilterKind::Name => glob_matches(&self.value, &resource.repository),
            FilterKind::Tag => glob_matches(&self.value, &resource.tag),
            FilterKind::Resource => {
                ResourceType::parse(&self.value) == Some(resource.resource_type)
            }
        }
    }
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    glob_to_regex(pattern).is_ok_and(|re| re.is_match(value))
}

/// Replication-specific policy fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSpec {
    /// Registry resources are pulled from
    pub src_registry_id: i64,

    /// Registry resources are pushed to
    pub dest_registry_id: i64,

    /// Namespace replacing the source namespace at the destination
    #[serde(default)]
    pub dest_namespace: String,

    /// Resource selection, all must match
    #[serde(default)]
    pub filters: Vec<Filter>,

    /// Overwrite resources which already exist at the destination
    #[serde(default, rename = "override")]
    pub override_existing: bool,

    /// Replicate deletions
    #[serde(default)]
    pub deletion: bool,

    /// Behaviour when a task fails
    #[serde(default)]
    pub on_failure: OnFailure,
}

/// A replication policy
pub type ReplicationPolicy = Policy<ReplicationSpec>;

impl PolicySpec for ReplicationSpec {
    const KIND: &'static str = "replication";

    fn validate(&mut self, _trigger: &Trigger) -> Result<()> {
        if self.src_registry_id <= 0 || self.dest_registry_id <= 0 {
            return Err(Error::BadRequest(
                "source and destination registries are required".into(),
            ));
        }
        if self.src_registry_id == self.dest_registry_id {
            return Err(Error::BadRequest(
                "source and destination registries must differ".into(),
            ));
        }
        self.dest_namespace = self.dest_namespace.trim().trim_matches('/').to_owned();
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }
}

impl ReplicationSpec {
    /// Whether every filter accepts the resource
    pub fn selects(&self, resource: &Resource) -> bool {
        self.filters.iter().all(|filter| filter.matches(resource))
    }

    /// Where a resource lands at the destination
    pub fn destination(&self, resource: &Resource) -> String {
        let repository = if self.dest_namespace.is_empty() {
            resource.repository.clone()
        } else {
            let name = resource
                .repository
                .split_once('/')
                .map_or(resource.repository.as_str(), |(_, name)| name);
            format!("{}/{}", self.dest_namespace, name)
        };
        format!("{repository}:{}", resource.tag)
    }
}

/// Kind of replicated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Container image
    Image,
    /// Helm chart
    Chart,
    /// Generic OCI artifact
    Artifact,
}

impl ResourceType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(ResourceType::Image),
            "chart" => Some(ResourceType::Chart),
            "artifact" => Some(ResourceType::Artifact),
            _ => None,
        }
    }

    /// Wire name of the resource type
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Image => "image",
            ResourceType::Chart => "chart",
            ResourceType::Artifact => "artifact",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replicable unit in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Kind of resource
    pub resource_type: ResourceType,

    /// Repository, including its namespace
    pub repository: String,

    /// Tag or version
    pub tag: String,
}

impl Resource {
    /// Create a resource
    pub fn new(resource_type: ResourceType, repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            resource_type,
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// `repository:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Why an execution was started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    /// Explicit request
    #[default]
    Manual,
    /// Cron schedule fired
    Scheduled,
    /// Registry event
    Event,
}

/// Lifecycle of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Tasks are being submitted or running
    InProgress,
    /// A stop was requested and is being propagated
    Stopping,
    /// Every task succeeded
    Succeeded,
    /// At least one task failed
    Failed,
    /// Stopped on request
    Stopped,
}

impl ExecutionStatus {
    /// Whether the execution is finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting for the job service
    Pending,
    /// Running in the job service
    InProgress,
    /// Replicated
    Succeeded,
    /// Replication failed
    Failed,
    /// Stopped on request
    Stopped,
}

impl TaskStatus {
    /// Whether the task is finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Stopped => 2,
        }
    }

    /// Whether a task in this status may move to `next`.
    ///
    /// Status only moves forward, and terminal statuses are final.
    pub fn can_become(&self, next: TaskStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl From<JobStatus> for TaskStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::Scheduled => TaskStatus::Pending,
            JobStatus::Running => TaskStatus::InProgress,
            JobStatus::Stopped => TaskStatus::Stopped,
            JobStatus::Error => TaskStatus::Failed,
            JobStatus::Success => TaskStatus::Succeeded,
        }
    }
}

/// One replication run of a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Execution {
    /// Execution id
    pub id: i64,
    /// Policy being run
    pub policy_id: i64,
    /// Why the run started
    pub trigger: ExecutionTrigger,
    /// Current status
    pub status: ExecutionStatus,
    /// When the run started
    pub start_time: DateTime<Utc>,
    /// When the run reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Number of tasks
    pub total: u32,
    /// Failed tasks
    pub failed: u32,
    /// Succeeded tasks
    pub succeed: u32,
    /// Pending or running tasks
    pub in_progress: u32,
    /// Stopped tasks
    pub stopped: u32,
}

impl Execution {
    /// A fresh execution
    pub fn new(id: i64, policy_id: i64, trigger: ExecutionTrigger) -> Self {
        Self {
            id,
            policy_id,
            trigger,
            status: ExecutionStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            total: 0,
            failed: 0,
            succeed: 0,
            in_progress: 0,
            stopped: 0,
        }
    }

    /// Recompute counters from the tasks, finishing the execution once every
    /// task is terminal.
    pub fn reconcile<'a>(&mut self, tasks: impl IntoIterator<Item = &'a Task>) {
        let (mut total, mut failed, mut succeed, mut in_progress, mut stopped) = (0, 0, 0, 0, 0);
        for task in tasks {
            total += 1;
            match task.status {
                TaskStatus::Pending | TaskStatus::InProgress => in_progress += 1,
                TaskStatus::Succeeded => succeed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Stopped => stopped += 1,
            }
        }
        self.total = total;
        self.failed = failed;
        self.succeed = succeed;
        self.in_progress = in_progress;
        self.stopped = stopped;

        if self.status.is_terminal() || in_progress > 0 {
            return;
        }

        self.status = if self.status == ExecutionStatus::Stopping {
            ExecutionStatus::Stopped
        } else if failed > 0 {
            ExecutionStatus::Failed
        } else if stopped > 0 {
            ExecutionStatus::Stopped
        } else {
            ExecutionStatus::Succeeded
        };
        self.end_time = Some(Utc::now());
    }
}

/// Replication of one resource within an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// Task id
    pub id: i64,
    /// Owning execution
    pub execution_id: i64,
    /// Kind of resource
    pub resource_type: ResourceType,
    /// `repository:tag` at the source
    pub src_resource: String,
    /// `repository:tag` at the destination
    pub dst_resource: String,
    /// Current status
    pub status: TaskStatus,
    /// Job service handle, assigned once the job is accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_uuid: Option<String>,
    /// When the task was created
    pub start_time: DateTime<Utc>,
    /// When the task reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Move to `status` if allowed, returning whether anything changed.
    pub fn transition(&mut self, status: TaskStatus) -> bool {
        if !self.status.can_become(status) {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: i64, status: TaskStatus) -> Task {
        Task {
            id,
            execution_id: 1,
            resource_type: ResourceType::Image,
            src_resource: "library/hello:1".into(),
            dst_resource: "library/hello:1".into(),
            status,
            job_uuid: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    #[test]
    fn globs() {
        let re = glob_to_regex("library/*").unwrap();
        assert!(re.is_match("library/hello"));
        assert!(!re.is_match("library/a/b"));
        assert!(glob_to_regex("**").unwrap().is_match("a/b/c"));
        assert!(glob_to_regex("v1.?").unwrap().is_match("v1.2"));
        assert!(!glob_to_regex("v1.?").unwrap().is_match("v1x2"));
    }

    #[test]
    fn filters_select_resources() {
        let spec = ReplicationSpec {
            src_registry_id: 1,
            dest_registry_id: 2,
            dest_namespace: String::new(),
            filters: vec![
                Filter {
                    kind: FilterKind::Name,
                    value: "library/**".into(),
                },
                Filter {
                    kind: FilterKind::Tag,
                    value: "v*".into(),
                },
                Filter {
                    kind: FilterKind::Resource,
                    value: "image".into(),
                },
            ],
            override_existing: false,
            deletion: false,
            on_failure: OnFailure::Continue,
        };

        assert!(spec.selects(&Resource::new(ResourceType::Image, "library/hello", "v1")));
        assert!(!spec.selects(&Resource::new(ResourceType::Image, "other/hello", "v1")));
        assert!(!spec.selects(&Resource::new(ResourceType::Image, "library/hello", "latest")));
        assert!(!spec.selects(&Resource::new(ResourceType::Chart, "library/hello", "v1")));
    }

    #[test]
    fn destination_namespace_replaces_source_namespace() {
        let mut spec: ReplicationSpec = serde_json::from_str(
            r#"{"src_registry_id":1,"dest_registry_id":2,"dest_namespace":"/mirror/"}"#,
        )
        .unwrap();
        spec.validate(&Trigger::Manual).unwrap();

        let resource = Resource::new(ResourceType::Image, "library/hello", "1.0");
        assert_eq!(spec.destination(&resource), "mirror/hello:1.0");

        spec.dest_namespace.clear();
        assert_eq!(spec.destination(&resource), "library/hello:1.0");
    }

    #[test]
    fn spec_validation() {
        let mut same: ReplicationSpec =
            serde_json::from_str(r#"{"src_registry_id":1,"dest_registry_id":1}"#).unwrap();
        assert!(same.validate(&Trigger::Manual).is_err());

        let mut bad_filter: ReplicationSpec = serde_json::from_str(
            r#"{"src_registry_id":1,"dest_registry_id":2,"filters":[{"type":"resource","value":"vm"}]}"#,
        )
        .unwrap();
        assert!(bad_filter.validate(&Trigger::Manual).is_err());

        let spec: ReplicationSpec =
            serde_json::from_str(r#"{"src_registry_id":1,"dest_registry_id":2,"on_failure":"stop","override":true}"#)
                .unwrap();
        assert_eq!(spec.on_failure, OnFailure::Stop);
        assert!(spec.override_existing);
    }

    #[test]
    fn task_transitions_are_monotonic() {
        let mut t = task(1, TaskStatus::Pending);
        assert!(t.transition(TaskStatus::InProgress));
        assert!(!t.transition(TaskStatus::InProgress));
        assert!(!t.transition(TaskStatus::Pending));
        assert!(t.transition(TaskStatus::Succeeded));
        assert!(t.end_time.is_some());
        assert!(!t.transition(TaskStatus::Failed));
        assert!(!t.transition(TaskStatus::InProgress));
        assert_eq!(t.status, TaskStatus::Succeeded);
    }

    #[test]
    fn reconcile_outcomes() {
        let mut execution = Execution::new(1, 1, ExecutionTrigger::Manual);
        execution.reconcile(&[task(1, TaskStatus::Succeeded), task(2, TaskStatus::InProgress)]);
        assert_eq!(execution.status, ExecutionStatus::InProgress);
        assert_eq!(execution.in_progress, 1);

        execution.reconcile(&[task(1, TaskStatus::Succeeded), task(2, TaskStatus::Failed)]);
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!((execution.total, execution.succeed, execution.failed), (2, 1, 1));

        let mut stopping = Execution::new(2, 1, ExecutionTrigger::Manual);
        stopping.status = ExecutionStatus::Stopping;
        stopping.reconcile(&[task(3, TaskStatus::Failed), task(4, TaskStatus::Stopped)]);
        assert_eq!(stopping.status, ExecutionStatus::Stopped);

        let mut empty = Execution::new(3, 1, ExecutionTrigger::Manual);
        empty.reconcile(&[]);
        assert_eq!(empty.status, ExecutionStatus::Succeeded);
    }

    #[test]
    fn job_statuses_map_to_tasks() {
        assert_eq!(TaskStatus::from(JobStatus::Scheduled), TaskStatus::Pending);
        assert_eq!(TaskStatus::from(JobStatus::Running), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from(JobStatus::Error), TaskStatus::Failed);
        assert_eq!(TaskStatus::from(JobStatus::Success), TaskStatus::Succeeded);
        assert_eq!(TaskStatus::from(JobStatus::Stopped), TaskStatus::Stopped);
    }
}
