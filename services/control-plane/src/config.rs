//! Server configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use jobservice_client::Secret;
use serde::{Deserialize, Serialize};
use url::Url;

/// Optional components of the deployment.
///
/// Built once at startup. Requests which need a disabled component are answered
/// with `503` before any authorization check runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Helm chart repository
    pub charts: bool,

    /// Vulnerability scanner
    pub scanner: bool,

    /// Admiral project management
    pub admiral: bool,
}

/// Connection to a remote job service.
#[derive(Debug, Clone, Deserialize)]
pub struct JobServiceConfig {
    /// Base URL of the job service
    pub url: Url,

    /// Shared secret sent with every request
    pub secret: Secret,

    /// Per-request timeout, in seconds
    #[serde(default = "default_job_service_timeout")]
    pub timeout: u64,
}

fn default_job_service_timeout() -> u64 {
    10
}

/// Audit log queue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records buffered before new ones are dropped
    pub queue_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { queue_size: 256 }
    }
}

/// A user recognized by bearer token
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    pub token: Secret,

    /// Username
    pub username: String,

    /// Whether the user is a system administrator
    #[serde(default)]
    pub sys_admin: bool,
}

/// Complete server configuration, usually read from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen: SocketAddr,

    /// Deadline for a single request, in seconds
    pub request_timeout: u64,

    /// Optional components
    pub features: FeatureFlags,

    /// Remote job service. Jobs are kept in memory when absent.
    pub job_service: Option<JobServiceConfig>,

    /// Audit log queue
    pub audit: AuditConfig,

    /// Externally reachable URL of this server, used to build status hook URLs
    pub core_url: Url,

    /// Users recognized by bearer token
    pub users: Vec<UserConfig>,

    /// Secret presented by internal solution users, including the job service
    pub solution_secret: Option<Secret>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            request_timeout: 30,
            features: FeatureFlags::default(),
            job_service: None,
            audit: AuditConfig::default(),
            core_url: default_core_url(),
            users: Vec::new(),
            solution_secret: None,
        }
    }
}

pub(crate) fn default_core_url() -> Url {
    Url::parse("http://localhost:8080/").expect("default core url is valid")
}

/// An error occured while loading the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("reading {path}: {source}")]
    Io {
        /// Path of the configuration file
        path: String,

        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration
    #[error("parsing {path}: {source}")]
    Parse {
        /// Path of the configuration file
        path: String,

        /// Underlying error
        #[source]
        source: toml_edit::de::Error,
    },
}

impl ServerConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(text)
    }

    /// Read configuration from a TOML file
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: display.clone(),
                source,
            })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// The per-request deadline
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.request_deadline(), Duration::from_secs(30));
        assert_eq!(config.audit.queue_size, 256);
        assert!(config.job_service.is_none());
        assert_eq!(config.features, FeatureFlags::default());
        assert_eq!(config.core_url.as_str(), "http://localhost:8080/");
    }

    #[test]
    fn full_config() {
        let config = ServerConfig::from_toml(
            r#"
            listen = "0.0.0.0:9000"
            request_timeout = 5
            core_url = "http://core:8080/"
            solution_secret = "internal"

            [features]
            scanner = true

            [job_service]
            url = "http://jobservice:8080/"
            secret = "js-secret"

            [audit]
            queue_size = 8

            [[users]]
            token = "admin-token"
            username = "admin"
            sys_admin = true

            [[users]]
            token = "dev-token"
            username = "dev"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert!(config.features.scanner);
        assert!(!config.features.charts);
        let job_service = config.job_service.unwrap();
        assert_eq!(job_service.timeout, 10);
        assert_eq!(job_service.secret.revealed(), "js-secret");
        assert_eq!(config.users.len(), 2);
        assert!(!config.users[1].sys_admin);
        assert_eq!(config.audit.queue_size, 8);
        assert_eq!(config.solution_secret.unwrap().revealed(), "internal");
    }

    #[test]
    fn secrets_are_redacted() {
        let config = ServerConfig::from_toml(
            r#"
            [[users]]
            token = "very-secret"
            username = "admin"
            "#,
        )
        .unwrap();
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
