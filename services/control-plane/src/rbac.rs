//! Authorization decisions

use std::fmt;

use crate::auth::Principal;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::project::{ProjectManager, Role};

/// Where a permission is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// System-wide resources (`project_id = 0`)
    System,
    /// Resources owned by a project
    Project(i64),
}

impl Scope {
    /// The scope for a policy `project_id`
    pub fn for_project(project_id: i64) -> Self {
        if project_id == 0 {
            Scope::System
        } else {
            Scope::Project(project_id)
        }
    }
}

/// Things a permission can be granted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Starting, stopping and observing replication executions
    Replication,
    /// Replication policies
    ReplicationPolicy,
    /// Registry endpoints
    Registry,
    /// Garbage collection and scan-all jobs
    AdminJob,
    /// Notification policies
    WebhookPolicy,
    /// Projects themselves
    Project,
    /// Project memberships
    Member,
    /// Status callbacks from the job service
    JobHook,
}

/// What is being done to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read or list
    Read,
    /// Create or start
    Create,
    /// Update or stop
    Update,
    /// Delete
    Delete,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Decides whether a principal may act on a resource.
#[async_trait::async_trait]
pub trait RbacOracle: fmt::Debug + Send + Sync {
    /// Whether `principal` may perform `action` on `resource` within `scope`.
    async fn allowed(
        &self,
        principal: &Principal,
        scope: Scope,
        resource: Resource,
        action: Action,
    ) -> Result<bool>;
}

/// An oracle backed by system-admin flags and project membership roles.
#[derive(Debug, Clone)]
pub struct RoleOracle {
    projects: ProjectManager,
}

impl RoleOracle {
    /// Create an oracle resolving memberships through `projects`
    pub fn new(projects: ProjectManager) -> Self {
        Self { projects }
    }
}

fn minimum_role(resource: Resource, action: Action) -> Option<Role> {
    match (resource, action) {
        (Resource::Project, Action::Read) => Some(Role::Guest),
        (Resource::Project, Action::Delete) => Some(Role::ProjectAdmin),
        (Resource::Member, Action::Read) => Some(Role::Guest),
        (Resource::Member, _) => Some(Role::ProjectAdmin),
        (Resource::WebhookPolicy, Action::Read) => Some(Role::Guest),
        (Resource::WebhookPolicy, _) => Some(Role::Developer),
        _ => None,
    }
}

#[async_trait::async_trait]
impl RbacOracle for RoleOracle {
    async fn allowed(
        &self,
        principal: &Principal,
        scope: Scope,
        resource: Resource,
        action: Action,
    ) -> Result<bool> {
        let username = match principal {
            Principal::Anonymous => return Ok(false),
            Principal::User { sys_admin: true, .. } => return Ok(true),
            Principal::Solution => {
                return Ok(scope == Scope::System
                    && matches!(resource, Resource::Replication | Resource::JobHook));
            }
            Principal::User { username, .. } => username,
        };

        match scope {
            Scope::System => Ok(resource == Resource::Project && action == Action::Create),
            Scope::Project(project_id) => {
                let Some(required) = minimum_role(resource, action) else {
                    return Ok(false);
                };
                let role = self.projects.role_of(project_id, username).await?;
                Ok(role.is_some_and(|role| role >= required))
            }
        }
    }
}

/// Fail unless the principal may perform the action.
///
/// Anonymous principals get `401`, everyone else who is refused gets `403`.
pub async fn require(
    oracle: &dyn RbacOracle,
    deadline: &Deadline,
    principal: &Principal,
    scope: Scope,
    resource: Resource,
    action: Action,
) -> Result<()> {
    if principal.is_anonymous() {
        return Err(Error::Unauthenticated);
    }

    let allowed = deadline
        .run(
            "rbac",
            oracle.allowed(principal, scope, resource, action),
        )
        .await?;

    if allowed {
        Ok(())
    } else {
        tracing::debug!(%principal, ?scope, %resource, %action, "permission denied");
        Err(Error::Forbidden(format!(
            "{principal} may not {action} {resource}"
        )))
    }
}
