//! Admin job records and schedules

use std::fmt;

use chrono::{DateTime, Utc};
use jobservice_client::{JobKind, JobStatus};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::validate_cron;

/// System-wide jobs an administrator can run or schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdminJobName {
    /// Garbage collection
    #[serde(rename = "IMAGE_GC")]
    ImageGc,
    /// Vulnerability scan of every artifact
    #[serde(rename = "IMAGE_SCAN_ALL")]
    ImageScanAll,
}

impl AdminJobName {
    /// Job name registered with the job service
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminJobName::ImageGc => "IMAGE_GC",
            AdminJobName::ImageScanAll => "IMAGE_SCAN_ALL",
        }
    }
}

impl fmt::Display for AdminJobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an admin job, mirrored from the job service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminJobStatus {
    /// Queued
    Pending,
    /// Waiting for its schedule
    Scheduled,
    /// Running
    Running,
    /// Stopped on request
    Stopped,
    /// Failed
    Error,
    /// Finished
    Success,
}

impl AdminJobStatus {
    /// Whether the job has finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdminJobStatus::Stopped | AdminJobStatus::Error | AdminJobStatus::Success
        )
    }

    /// Whether a job in this status keeps a manual run from starting
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AdminJobStatus::Pending | AdminJobStatus::Scheduled | AdminJobStatus::Running
        )
    }

    fn rank(&self) -> u8 {
        match self {
            AdminJobStatus::Pending | AdminJobStatus::Scheduled => 0,
            AdminJobStatus::Running => 1,
            AdminJobStatus::Stopped | AdminJobStatus::Error | AdminJobStatus::Success => 2,
        }
    }

    /// Whether a one-off job in this status may move to `next`
    pub fn can_become(&self, next: AdminJobStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl From<JobStatus> for AdminJobStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => AdminJobStatus::Pending,
            JobStatus::Scheduled => AdminJobStatus::Scheduled,
            JobStatus::Running => AdminJobStatus::Running,
            JobStatus::Stopped => AdminJobStatus::Stopped,
            JobStatus::Error => AdminJobStatus::Error,
            JobStatus::Success => AdminJobStatus::Success,
        }
    }
}

/// Schedule types accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleType {
    /// Every hour
    #[serde(alias = "hourly")]
    Hourly,
    /// Every day
    #[serde(alias = "daily")]
    Daily,
    /// Every week
    #[serde(alias = "weekly")]
    Weekly,
    /// User supplied cron
    #[serde(alias = "custom")]
    Custom,
    /// Generic periodic schedule
    #[serde(alias = "periodic")]
    Periodic,
    /// Run once, now
    #[serde(alias = "manual")]
    Manual,
    /// No schedule
    #[serde(alias = "none")]
    None,
}

impl ScheduleType {
    fn default_cron(&self) -> Option<&'static str> {
        match self {
            ScheduleType::Hourly => Some("0 0 * * * *"),
            ScheduleType::Daily => Some("0 0 0 * * *"),
            ScheduleType::Weekly => Some("0 0 0 * * 0"),
            _ => None,
        }
    }
}

/// A schedule as clients send it, and as it is stored on periodic rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleParam {
    /// Schedule type
    #[serde(rename = "Type", alias = "type")]
    pub kind: ScheduleType,

    /// 6-field cron, for periodic types
    #[serde(rename = "Cron", alias = "cron", default)]
    pub cron: String,
}

/// Request body of the schedule endpoints.
///
/// Both `{"schedule": {...}}` and the bare schedule object are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScheduleRequest {
    /// `{"schedule": {"type": ..., "cron": ...}}`
    Wrapped {
        /// The schedule
        schedule: ScheduleParam,
    },
    /// `{"type": ..., "cron": ...}`
    Bare(ScheduleParam),
}

impl ScheduleRequest {
    /// The requested schedule
    pub fn into_param(self) -> ScheduleParam {
        match self {
            ScheduleRequest::Wrapped { schedule } => schedule,
            ScheduleRequest::Bare(schedule) => schedule,
        }
    }
}

/// A validated schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Cancel any schedule
    None,
    /// Run once, now
    Manual,
    /// Run on a cron schedule
    Periodic(ScheduleParam),
}

impl TryFrom<ScheduleParam> for Schedule {
    type Error = Error;

    fn try_from(mut param: ScheduleParam) -> Result<Self> {
        match param.kind {
            ScheduleType::None => Ok(Schedule::None),
            ScheduleType::Manual => Ok(Schedule::Manual),
            kind => {
                param.cron = param.cron.trim().to_owned();
                if param.cron.is_empty() {
                    match kind.default_cron() {
                        Some(cron) => param.cron = cron.to_owned(),
                        None => {
                            return Err(Error::BadRequest(format!(
                                "a cron is required for {kind:?} schedules"
                            )));
                        }
                    }
                }
                validate_cron(&param.cron)?;
                Ok(Schedule::Periodic(param))
            }
        }
    }
}

/// Local record of a submitted admin job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminJob {
    /// Local id, the stable external handle
    pub id: i64,
    /// Which job
    pub name: AdminJobName,
    /// One-off or periodic
    pub kind: JobKind,
    /// JSON encoded [ScheduleParam] for periodic jobs, empty otherwise
    pub cron: String,
    /// Job service handle, empty until the job service accepted the job
    pub uuid: String,
    /// Last reported status
    pub status: AdminJobStatus,
    /// When the row was added
    pub creation_time: DateTime<Utc>,
    /// Last change
    pub update_time: DateTime<Utc>,
    /// Soft deletion marker
    pub deleted: bool,
}

/// An admin job as rendered to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminJobView {
    /// Local id
    pub id: i64,
    /// Which job
    pub job_name: AdminJobName,
    /// One-off or periodic
    pub job_kind: JobKind,
    /// Schedule of a periodic job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleParam>,
    /// Last reported status
    pub job_status: AdminJobStatus,
    /// Soft deletion marker
    pub deleted: bool,
    /// When the job was added
    pub creation_time: DateTime<Utc>,
    /// Last change
    pub update_time: DateTime<Utc>,
}

impl AdminJob {
    /// Stored schedule of a periodic job
    pub fn schedule(&self) -> Option<ScheduleParam> {
        if self.cron.is_empty() {
            return None;
        }
        match serde_json::from_str(&self.cron) {
            Ok(schedule) => Some(schedule),
            Err(error) => {
                tracing::warn!(id = self.id, %error, "unreadable admin job schedule");
                None
            }
        }
    }

    /// Render for clients
    pub fn view(&self) -> AdminJobView {
        AdminJobView {
            id: self.id,
            job_name: self.name,
            job_kind: self.kind,
            schedule: self.schedule(),
            job_status: self.status,
            deleted: self.deleted,
            creation_time: self.creation_time,
            update_time: self.update_time,
        }
    }
}
