//! Best-effort audit log.
//!
//! Records are pushed onto a bounded queue and written by a single background
//! consumer, so a slow or failing sink never delays or fails the request that
//! produced the record. When the queue is full the record is dropped.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What happened to the audited resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// The resource was created
    Create,
    /// The resource was deleted
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Delete => f.write_str("delete"),
        }
    }
}

/// One audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    /// Project the resource belongs to
    pub project_id: i64,
    /// Kind of resource, e.g. `project`
    pub resource_type: &'static str,
    /// Name of the resource
    pub resource: String,
    /// What happened
    pub operation: Operation,
    /// Who did it
    pub username: String,
    /// When it happened
    pub time: DateTime<Utc>,
}

impl AuditRecord {
    /// A record stamped with the current time
    pub fn now(
        project_id: i64,
        resource_type: &'static str,
        resource: impl Into<String>,
        operation: Operation,
        username: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            resource_type,
            resource: resource.into(),
            operation,
            username: username.into(),
            time: Utc::now(),
        }
    }
}

/// Destination for audit records
#[async_trait::async_trait]
pub trait AuditSink: fmt::Debug + Send + Sync {
    /// Persist a record
    async fn write(&self, record: AuditRecord) -> Result<(), BoxError>;
}

/// Writes audit records as structured log events under the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait::async_trait]
impl AuditSink for TracingSink {
    async fn write(&self, record: AuditRecord) -> Result<(), BoxError> {
        tracing::info!(
            target: "audit",
            project_id = record.project_id,
            resource_type = record.resource_type,
            resource = %record.resource,
            operation = %record.operation,
            username = %record.username,
            time = %record.time,
            "audit"
        );
        Ok(())
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemorySink {
    async fn write(&self, record: AuditRecord) -> Result<(), BoxError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Handle for submitting audit records to the background writer.
#[derive(Debug, Clone)]
pub struct AuditLog {
    sender: mpsc::Sender<AuditRecord>,
}

impl AuditLog {
    /// Start the background writer. Must be called within a tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, queue_size: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AuditRecord>(queue_size.max(1));

        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(error) = sink.write(record).await {
                    tracing::warn!(%error, "failed to write audit record");
                }
            }
            tracing::debug!("audit writer stopped");
        });

        Self { sender }
    }

    /// Queue a record without waiting. Dropped with a warning if the queue is full.
    pub fn record(&self, record: AuditRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                tracing::warn!(
                    resource = %record.resource,
                    operation = %record.operation,
                    "audit queue full, dropping record"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("audit writer is gone, dropping record");
            }
        }
    }
}
