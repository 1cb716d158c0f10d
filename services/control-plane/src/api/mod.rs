//! Control API builder and router

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::response::Json;
use axum::routing::get;
use jobservice_client::{HttpJobService, JobClient, MemoryJobService, Secret};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::adminjob::{AdminJobStore, MemoryAdminJobStore, ScheduleCoordinator};
use crate::audit::{AuditLog, AuditSink, TracingSink};
use crate::auth::{Principal, TokenAuthenticator};
use crate::config::{FeatureFlags, ServerConfig, UserConfig, default_core_url};
use crate::deadline::Deadline;
use crate::error::Result;
use crate::hook::StatusHooks;
use crate::notification::{NotificationSpec, TargetProber, TcpProber};
use crate::policy::{MemoryPolicyStore, PolicyManager};
use crate::project::{MemoryProjectStore, ProjectManager};
use crate::rbac::{self, Action, RbacOracle, Resource, RoleOracle, Scope};
use crate::registry::{MemoryRegistryStore, RegistryStore};
use crate::replication::{
    ArtifactCatalog, ExecutionStore, MemoryCatalog, MemoryExecutionStore, ReplicationController,
    ReplicationSpec,
};

mod adminjob;
mod extract;
mod hook;
mod project;
mod registry;
mod replication;
mod webhook;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    features: FeatureFlags,
    timeout: Duration,
    authenticator: Arc<TokenAuthenticator>,
    rbac: Arc<dyn RbacOracle>,
    projects: ProjectManager,
    registries: Arc<dyn RegistryStore>,
    notifications: PolicyManager<NotificationSpec>,
    replication: ReplicationController,
    schedules: ScheduleCoordinator,
    prober: Arc<dyn TargetProber>,
    audit: AuditLog,
}

impl AppState {
    async fn require(
        &self,
        deadline: &Deadline,
        principal: &Principal,
        scope: Scope,
        resource: Resource,
        action: Action,
    ) -> Result<()> {
        rbac::require(self.rbac.as_ref(), deadline, principal, scope, resource, action).await
    }
}

/// Builder for the control plane API
#[derive(Debug)]
pub struct ControlPlaneBuilder {
    features: FeatureFlags,
    request_timeout: Duration,
    jobs: Option<JobClient>,
    authenticator: TokenAuthenticator,
    core_url: Url,
    projects: Option<ProjectManager>,
    registries: Option<Arc<dyn RegistryStore>>,
    replication_policies: Option<PolicyManager<ReplicationSpec>>,
    notification_policies: Option<PolicyManager<NotificationSpec>>,
    executions: Option<Arc<dyn ExecutionStore>>,
    admin_jobs: Option<Arc<dyn AdminJobStore>>,
    catalog: Option<Arc<dyn ArtifactCatalog>>,
    prober: Option<Arc<dyn TargetProber>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    audit_queue_size: usize,
}

impl Default for ControlPlaneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlaneBuilder {
    /// Create a builder with in-memory stores and no known users
    pub fn new() -> Self {
        Self {
            features: FeatureFlags::default(),
            request_timeout: Duration::from_secs(30),
            jobs: None,
            authenticator: TokenAuthenticator::new(),
            core_url: default_core_url(),
            projects: None,
            registries: None,
            replication_policies: None,
            notification_policies: None,
            executions: None,
            admin_jobs: None,
            catalog: None,
            prober: None,
            audit_sink: None,
            audit_queue_size: 256,
        }
    }

    /// Configure a builder from server configuration.
    ///
    /// Without a `job_service` section jobs are kept by an in-process job
    /// service which never runs them.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut builder = Self::new()
            .features(config.features)
            .request_timeout(config.request_deadline())
            .core_url(config.core_url.clone())
            .users(&config.users)
            .audit_queue_size(config.audit.queue_size);

        if let Some(secret) = &config.solution_secret {
            builder = builder.solution_secret(secret.clone());
        }

        match &config.job_service {
            Some(job_service) => {
                let client = HttpJobService::new(job_service.url.clone(), job_service.secret.clone())
                    .with_timeout(Duration::from_secs(job_service.timeout));
                builder.job_client(client.into())
            }
            None => {
                tracing::warn!("no job service configured, jobs will never run");
                builder
            }
        }
    }

    /// Set the feature flags
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Set the per-request deadline
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the job service
    pub fn job_client(mut self, jobs: JobClient) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Recognize a bearer token
    pub fn user(mut self, token: &str, username: &str, sys_admin: bool) -> Self {
        self.authenticator = self.authenticator.user(token, username, sys_admin);
        self
    }

    /// Recognize the configured users
    pub fn users<'a>(mut self, users: impl IntoIterator<Item = &'a UserConfig>) -> Self {
        self.authenticator = self.authenticator.users(users);
        self
    }

    /// Accept a secret from solution users, such as the job service reporting status
    pub fn solution_secret(mut self, secret: Secret) -> Self {
        self.authenticator = self.authenticator.solution_secret(secret);
        self
    }

    /// Externally reachable URL of this server, used for status hooks
    pub fn core_url(mut self, url: Url) -> Self {
        self.core_url = url;
        self
    }

    /// Set the project store
    pub fn projects(mut self, projects: ProjectManager) -> Self {
        self.projects = Some(projects);
        self
    }

    /// Set the registry store
    pub fn registries<S: RegistryStore + 'static>(mut self, store: S) -> Self {
        self.registries = Some(Arc::new(store));
        self
    }

    /// Set the replication policy store
    pub fn replication_policies(mut self, policies: PolicyManager<ReplicationSpec>) -> Self {
        self.replication_policies = Some(policies);
        self
    }

    /// Set the notification policy store
    pub fn notification_policies(mut self, policies: PolicyManager<NotificationSpec>) -> Self {
        self.notification_policies = Some(policies);
        self
    }

    /// Set the execution store
    pub fn executions<S: ExecutionStore + 'static>(mut self, store: S) -> Self {
        self.executions = Some(Arc::new(store));
        self
    }

    /// Set the admin job store
    pub fn admin_jobs<S: AdminJobStore + 'static>(mut self, store: S) -> Self {
        self.admin_jobs = Some(Arc::new(store));
        self
    }

    /// Set the catalog replication draws candidate resources from
    pub fn catalog<C: ArtifactCatalog + 'static>(mut self, catalog: C) -> Self {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    /// Set how notification targets are tested
    pub fn prober<P: TargetProber + 'static>(mut self, prober: P) -> Self {
        self.prober = Some(Arc::new(prober));
        self
    }

    /// Set where audit records go
    pub fn audit_sink<A: AuditSink + 'static>(mut self, sink: A) -> Self {
        self.audit_sink = Some(Arc::new(sink));
        self
    }

    /// Set how many audit records may wait for the writer
    pub fn audit_queue_size(mut self, size: usize) -> Self {
        self.audit_queue_size = size;
        self
    }

    /// Build the control plane service
    ///
    /// Returns a Router that can be served with any tower-compatible server.
    /// Must be called within a tokio runtime, which runs the audit writer.
    pub fn build(self) -> Router {
        let jobs = self
            .jobs
            .unwrap_or_else(|| JobClient::from(MemoryJobService::new()));
        let hooks = StatusHooks::new(self.core_url);
        let projects = self
            .projects
            .unwrap_or_else(|| ProjectManager::from(MemoryProjectStore::new()));
        let registries = self
            .registries
            .unwrap_or_else(|| Arc::new(MemoryRegistryStore::new()));

        let replication = ReplicationController::new(
            self.replication_policies
                .unwrap_or_else(|| PolicyManager::new(MemoryPolicyStore::<ReplicationSpec>::new())),
            registries.clone(),
            self.executions
                .unwrap_or_else(|| Arc::new(MemoryExecutionStore::new())),
            self.catalog.unwrap_or_else(|| Arc::new(MemoryCatalog::new())),
            jobs.clone(),
            hooks.clone(),
        );
        let schedules = ScheduleCoordinator::new(
            self.admin_jobs
                .unwrap_or_else(|| Arc::new(MemoryAdminJobStore::new())),
            jobs.clone(),
            hooks,
        );
        let audit = AuditLog::spawn(
            self.audit_sink.unwrap_or_else(|| Arc::new(TracingSink)),
            self.audit_queue_size,
        );

        tracing::info!(jobs = jobs.name(), features = ?self.features, "building control plane");

        let state = AppState {
            features: self.features,
            timeout: self.request_timeout,
            authenticator: Arc::new(self.authenticator),
            rbac: Arc::new(RoleOracle::new(projects.clone())),
            projects,
            registries,
            notifications: self
                .notification_policies
                .unwrap_or_else(|| PolicyManager::new(MemoryPolicyStore::<NotificationSpec>::new())),
            replication,
            schedules,
            prober: self.prober.unwrap_or_else(|| Arc::new(TcpProber::default())),
            audit,
        };

        Router::new()
            .route("/api/systeminfo", get(system_info))
            .merge(project::router())
            .merge(webhook::router())
            .merge(registry::router())
            .merge(replication::router())
            .merge(adminjob::router())
            .merge(hook::router())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Public information about this deployment
async fn system_info(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Value> {
    Json(json!({
        "with_chartmuseum": state.features.charts,
        "with_clair": state.features.scanner,
        "with_admiral": state.features.admiral,
    }))
}
