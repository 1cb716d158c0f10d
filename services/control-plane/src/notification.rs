//! Notification (webhook) policies

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::{Policy, PolicySpec, Target, Trigger};

/// Events a notification policy can subscribe to
pub const SUPPORTED_EVENT_TYPES: &[&str] = &[
    "PUSH_ARTIFACT",
    "PULL_ARTIFACT",
    "DELETE_ARTIFACT",
    "SCANNING_COMPLETED",
    "SCANNING_FAILED",
    "QUOTA_EXCEED",
    "QUOTA_WARNING",
    "REPLICATION",
    "TAG_RETENTION",
];

/// Delivery channels a notification target can use
pub const SUPPORTED_TARGET_TYPES: &[&str] = &["http", "slack"];

/// Notification-specific policy fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSpec {
    /// Where notifications are delivered
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// A notification policy
pub type NotificationPolicy = Policy<NotificationSpec>;

impl PolicySpec for NotificationSpec {
    const KIND: &'static str = "notification";

    fn validate(&mut self, trigger: &Trigger) -> Result<()> {
        match trigger {
            Trigger::Event { event_types } if !event_types.is_empty() => {
                if let Some(unknown) = event_types
                    .iter()
                    .find(|event| !SUPPORTED_EVENT_TYPES.contains(&event.as_str()))
                {
                    return Err(Error::BadRequest(format!(
                        "unsupported event type {unknown:?}"
                    )));
                }
            }
            Trigger::Event { .. } => {
                return Err(Error::BadRequest("at least one event type is required".into()));
            }
            _ => {
                return Err(Error::BadRequest(
                    "notification policies are triggered by events".into(),
                ));
            }
        }

        if self.targets.is_empty() {
            return Err(Error::BadRequest("at least one target is required".into()));
        }
        for target in &mut self.targets {
            target.validate(SUPPORTED_TARGET_TYPES)?;
        }
        Ok(())
    }
}

/// Checks whether a target can be reached.
#[async_trait::async_trait]
pub trait TargetProber: std::fmt::Debug + Send + Sync {
    /// Probe a single target, describing the failure if it is unreachable.
    async fn probe(&self, target: &Target) -> std::result::Result<(), String>;
}

/// Probes targets by opening a TCP connection to their host.
#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    /// Create a prober which waits up to `timeout` per target
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait::async_trait]
impl TargetProber for TcpProber {
    async fn probe(&self, target: &Target) -> std::result::Result<(), String> {
        let url = target.url().map_err(|error| error.to_string())?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("{} has no host", target.address))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("{} has no port", target.address))?;

        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect((host.as_str(), port)))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(format!("{}: {error}", target.address)),
            Err(_) => Err(format!("{}: timed out", target.address)),
        }
    }
}

/// Exercise every target of a policy, failing on the first unreachable one.
#[tracing::instrument(skip_all, fields(name = %policy.name))]
pub async fn test_policy(prober: &dyn TargetProber, policy: &NotificationPolicy) -> Result<()> {
    for target in &policy.spec.targets {
        if let Err(reason) = prober.probe(target).await {
            tracing::info!(address = %target.address, %reason, "notification target unreachable");
            return Err(Error::BadRequest(format!("target unreachable: {reason}")));
        }
    }
    Ok(())
}
