//! Registry endpoints referenced by replication policies

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobservice_client::Secret;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::policy::normalize_address;

/// Kind of remote registry, which decides what replication can do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryType {
    /// Another Harbor instance
    Harbor,
    /// Docker Hub
    DockerHub,
    /// Plain distribution registry
    DockerRegistry,
    /// Alibaba Cloud Container Registry
    AliAcr,
    /// Amazon Elastic Container Registry
    AwsEcr,
    /// Google Container Registry
    GoogleGcr,
    /// Quay
    Quay,
    /// GitLab container registry
    Gitlab,
}

/// What an adapter for a registry type supports.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Resource types which can be replicated
    pub resource_types: &'static [&'static str],

    /// Whether event-based replication can be triggered from this registry
    pub event_trigger: bool,
}

impl RegistryType {
    /// Capabilities of the adapter for this registry type
    pub fn capabilities(&self) -> Capabilities {
        match self {
            RegistryType::Harbor => Capabilities {
                resource_types: &["image", "chart", "artifact"],
                event_trigger: true,
            },
            RegistryType::DockerHub
            | RegistryType::DockerRegistry
            | RegistryType::AliAcr
            | RegistryType::AwsEcr
            | RegistryType::GoogleGcr
            | RegistryType::Quay
            | RegistryType::Gitlab => Capabilities {
                resource_types: &["image"],
                event_trigger: false,
            },
        }
    }
}

/// How credentials are presented to a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// Username and password
    #[default]
    Basic,
    /// OAuth token
    Oauth,
    /// Shared secret
    Secret,
}

/// Registry credentials. The secret half is accepted on input but never rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// How the credential is presented
    #[serde(rename = "type", default)]
    pub kind: CredentialType,

    /// Access key or username
    pub access_key: String,

    /// Access secret or password
    #[serde(skip_serializing)]
    pub access_secret: Secret,
}

/// A registry endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// Registry id
    #[serde(default)]
    pub id: i64,

    /// Unique name
    pub name: String,

    /// Registry type
    #[serde(rename = "type")]
    pub kind: RegistryType,

    /// Normalized URL
    pub url: String,

    /// Credentials, if the registry needs them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,

    /// Allow plain HTTP and unverified TLS
    #[serde(default)]
    pub insecure: bool,

    /// When the registry was added
    #[serde(default)]
    pub creation_time: DateTime<Utc>,

    /// Last modification
    #[serde(default)]
    pub update_time: DateTime<Utc>,
}

impl Registry {
    /// Validate and normalize a registry before storing it.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::BadRequest("registry name is required".into()));
        }
        self.url = normalize_address(&self.url)?;
        Ok(())
    }

    /// The registry as handed to a replication job, credentials included.
    pub fn job_parameter(&self) -> serde_json::Value {
        let credential = self.credential.as_ref().map(|credential| {
            json!({
                "type": credential.kind,
                "access_key": credential.access_key,
                "access_secret": credential.access_secret.revealed(),
            })
        });
        json!({
            "id": self.id,
            "name": self.name,
            "type": self.kind,
            "url": self.url,
            "insecure": self.insecure,
            "credential": credential,
        })
    }
}

/// Storage of registry endpoints
#[async_trait::async_trait]
pub trait RegistryStore: fmt::Debug + Send + Sync {
    /// Store a registry, returning its id
    async fn create(&self, registry: Registry) -> Result<i64>;

    /// Look up a registry
    async fn get(&self, id: i64) -> Result<Option<Registry>>;

    /// All registries, ordered by id
    async fn list(&self) -> Result<Vec<Registry>>;

    /// Delete a registry
    async fn delete(&self, id: i64) -> Result<()>;
}

#[derive(Debug, Default)]
struct Registries {
    next_id: i64,
    registries: BTreeMap<i64, Registry>,
}

/// In-memory [RegistryStore]
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistryStore {
    inner: Arc<RwLock<Registries>>,
}

impl MemoryRegistryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn create(&self, mut registry: Registry) -> Result<i64> {
        let mut inner = self.inner.write();
        if inner.registries.values().any(|r| r.name == registry.name) {
            return Err(Error::Conflict(format!(
                "registry {} already exists",
                registry.name
            )));
        }
        inner.next_id += 1;
        let now = Utc::now();
        registry.id = inner.next_id;
        registry.creation_time = now;
        registry.update_time = now;
        inner.registries.insert(registry.id, registry);
        Ok(inner.next_id)
    }

    async fn get(&self, id: i64) -> Result<Option<Registry>> {
        Ok(self.inner.read().registries.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Registry>> {
        Ok(self.inner.read().registries.values().cloned().collect())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.inner
            .write()
            .registries
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("registry {id} not found")))
    }
}
