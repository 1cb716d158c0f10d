//! Wire models for the job service API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How the job service should run a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Run once, as soon as a worker is free.
    Generic,

    /// Run repeatedly according to a cron specification.
    Periodic,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Generic => f.write_str("Generic"),
            JobKind::Periodic => f.write_str("Periodic"),
        }
    }
}

/// Scheduling metadata attached to a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// The kind of job.
    pub kind: JobKind,

    /// Cron specification, only meaningful for periodic jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_spec: Option<String>,

    /// Ask the job service to reject duplicates of this job.
    #[serde(default)]
    pub is_unique: bool,
}

/// A unit of work submitted to the job service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Registered job name, e.g. `IMAGE_GC`.
    pub name: String,

    /// Free-form parameters handed to the job implementation.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Scheduling metadata.
    pub metadata: JobMetadata,

    /// URL the job service calls back with status changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hook: Option<String>,
}

impl JobRequest {
    /// A job which runs once.
    pub fn generic<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            metadata: JobMetadata {
                kind: JobKind::Generic,
                cron_spec: None,
                is_unique: false,
            },
            status_hook: None,
        }
    }

    /// A job which runs on the given cron specification.
    pub fn periodic<N: Into<String>, C: Into<String>>(name: N, cron: C) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            metadata: JobMetadata {
                kind: JobKind::Periodic,
                cron_spec: Some(cron.into()),
                is_unique: false,
            },
            status_hook: None,
        }
    }

    /// Add a parameter to the job.
    pub fn parameter<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the status hook for the job.
    pub fn status_hook<U: Into<String>>(mut self, url: U) -> Self {
        self.status_hook = Some(url.into());
        self
    }

    /// Mark the job as unique.
    pub fn unique(mut self) -> Self {
        self.metadata.is_unique = true;
        self
    }
}

/// Lifecycle state of a job, as reported by the job service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting in the queue.
    Pending,

    /// Waiting for its scheduled time.
    Scheduled,

    /// Running on a worker.
    Running,

    /// Stopped on request.
    Stopped,

    /// Finished with an error.
    Error,

    /// Finished successfully.
    Success,
}

impl JobStatus {
    /// Whether the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::Error | JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "Pending",
            JobStatus::Scheduled => "Scheduled",
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Error => "Error",
            JobStatus::Success => "Success",
        };
        f.write_str(name)
    }
}

/// Actions which can be posted to a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    /// Stop the job.
    Stop,
}

/// Status snapshot of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Job service UUID of the job.
    pub id: String,

    /// Registered job name.
    pub name: String,

    /// The kind of job.
    pub kind: JobKind,

    /// Current status.
    pub status: JobStatus,

    /// For executions of a periodic job, the UUID of the periodic parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_job_id: Option<String>,

    /// Last status change, in seconds since the unix epoch.
    #[serde(default)]
    pub update_time: i64,
}

/// The job service wraps single jobs in a `{"job": ...}` envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) job: T,
}

#[derive(Debug, Serialize)]
pub(crate) struct ActionRequest {
    pub(crate) action: JobAction,
}
