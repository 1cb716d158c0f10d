//! Projects and project membership

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static PROJECT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("project name pattern is valid")
});

/// Validate a project name: 2 to 255 characters, lowercase alphanumeric
/// components separated by `.`, `_` or `-`.
pub fn validate_name(name: &str) -> Result<()> {
    if !(2..=255).contains(&name.len()) {
        return Err(Error::BadRequest(format!(
            "project name must be between 2 and 255 characters, got {}",
            name.len()
        )));
    }
    if !PROJECT_NAME.is_match(name) {
        return Err(Error::BadRequest(format!("invalid project name {name:?}")));
    }
    Ok(())
}

/// Membership role within a project, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access
    Guest,
    /// Push and pull
    Developer,
    /// Developer plus policy management
    Maintainer,
    /// Full control of the project
    ProjectAdmin,
}

/// A project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project id
    pub project_id: i64,

    /// Unique project name
    pub name: String,

    /// User who created the project
    pub owner: String,

    /// Whether anonymous users may read the project
    pub public: bool,

    /// When the project was created
    pub creation_time: DateTime<Utc>,

    /// Last modification
    pub update_time: DateTime<Utc>,
}

/// Storage of projects and their members.
#[async_trait::async_trait]
pub trait ProjectStore: std::fmt::Debug + Send + Sync {
    /// Create a project, making `owner` its project admin
    async fn create(&self, name: &str, owner: &str, public: bool) -> Result<Project>;

    /// Look up a project by id
    async fn get(&self, project_id: i64) -> Result<Option<Project>>;

    /// Delete a project and its memberships
    async fn delete(&self, project_id: i64) -> Result<()>;

    /// Role of `username` within the project
    async fn role_of(&self, project_id: i64, username: &str) -> Result<Option<Role>>;

    /// Add or replace a membership
    async fn set_member(&self, project_id: i64, username: &str, role: Role) -> Result<()>;
}

#[derive(Debug, Default)]
struct Projects {
    next_id: i64,
    projects: BTreeMap<i64, Project>,
    members: HashMap<(i64, String), Role>,
}

/// In-memory [ProjectStore]
#[derive(Debug, Clone, Default)]
pub struct MemoryProjectStore {
    inner: Arc<RwLock<Projects>>,
}

impl MemoryProjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn create(&self, name: &str, owner: &str, public: bool) -> Result<Project> {
        let mut inner = self.inner.write();
        if inner.projects.values().any(|p| p.name == name) {
            return Err(Error::Conflict(format!("project {name} already exists")));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let project = Project {
            project_id: inner.next_id,
            name: name.to_owned(),
            owner: owner.to_owned(),
            public,
            creation_time: now,
            update_time: now,
        };
        inner.projects.insert(project.project_id, project.clone());
        inner
            .members
            .insert((project.project_id, owner.to_owned()), Role::ProjectAdmin);
        Ok(project)
    }

    async fn get(&self, project_id: i64) -> Result<Option<Project>> {
        Ok(self.inner.read().projects.get(&project_id).cloned())
    }

    async fn delete(&self, project_id: i64) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .projects
            .remove(&project_id)
            .ok_or_else(|| Error::NotFound(format!("project {project_id} not found")))?;
        inner.members.retain(|(pid, _), _| *pid != project_id);
        Ok(())
    }

    async fn role_of(&self, project_id: i64, username: &str) -> Result<Option<Role>> {
        Ok(self
            .inner
            .read()
            .members
            .get(&(project_id, username.to_owned()))
            .copied())
    }

    async fn set_member(&self, project_id: i64, username: &str, role: Role) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.projects.contains_key(&project_id) {
            return Err(Error::NotFound(format!("project {project_id} not found")));
        }
        inner.members.insert((project_id, username.to_owned()), role);
        Ok(())
    }
}

/// Project lookups with the validation rules callers rely on.
#[derive(Debug, Clone)]
pub struct ProjectManager {
    store: Arc<dyn ProjectStore>,
}

impl<S> From<S> for ProjectManager
where
    S: ProjectStore + 'static,
{
    fn from(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

impl ProjectManager {
    /// Create a project after validating its name
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, name: &str, owner: &str, public: bool) -> Result<Project> {
        validate_name(name)?;
        self.store.create(name, owner, public).await
    }

    /// Resolve the project a scoped request addresses.
    ///
    /// Ids below 1 are malformed; unknown ids are not found.
    pub async fn resolve(&self, project_id: i64) -> Result<Project> {
        if project_id <= 0 {
            return Err(Error::BadRequest(format!("invalid project id {project_id}")));
        }
        self.store
            .get(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_id} not found")))
    }

    /// Delete a project
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, project_id: i64) -> Result<()> {
        self.store.delete(project_id).await
    }

    /// Role of a user within a project
    pub async fn role_of(&self, project_id: i64, username: &str) -> Result<Option<Role>> {
        self.store.role_of(project_id, username).await
    }

    /// Add or replace a membership
    #[tracing::instrument(skip(self))]
    pub async fn set_member(&self, project_id: i64, username: &str, role: Role) -> Result<()> {
        self.store.set_member(project_id, username, role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules() {
        assert!(validate_name("library").is_ok());
        assert!(validate_name("my-team.images_2").is_ok());
        assert!(validate_name("ab").is_ok());

        assert!(validate_name("a").is_err());
        assert!(validate_name(&"a".repeat(256)).is_err());
        assert!(validate_name("Library").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("double--dash").is_err());
        assert!(validate_name("trailing.").is_err());
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Guest < Role::Developer);
        assert!(Role::Developer < Role::Maintainer);
        assert!(Role::Maintainer < Role::ProjectAdmin);
    }

    #[tokio::test]
    async fn owner_is_project_admin() {
        let projects = ProjectManager::from(MemoryProjectStore::new());
        let project = projects.create("library", "alice", false).await.unwrap();

        assert_eq!(
            projects.role_of(project.project_id, "alice").await.unwrap(),
            Some(Role::ProjectAdmin)
        );
        assert_eq!(projects.role_of(project.project_id, "bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let projects = ProjectManager::from(MemoryProjectStore::new());
        projects.create("library", "alice", false).await.unwrap();
        let err = projects.create("library", "bob", true).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn resolve_rejects_bad_ids() {
        let projects = ProjectManager::from(MemoryProjectStore::new());
        assert!(matches!(projects.resolve(0).await, Err(Error::BadRequest(_))));
        assert!(matches!(projects.resolve(-3).await, Err(Error::BadRequest(_))));
        assert!(matches!(projects.resolve(9).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_drops_memberships() {
        let store = MemoryProjectStore::new();
        let projects = ProjectManager::from(store.clone());
        let project = projects.create("library", "alice", false).await.unwrap();
        projects.delete(project.project_id).await.unwrap();

        assert!(store.get(project.project_id).await.unwrap().is_none());
        assert_eq!(store.role_of(project.project_id, "alice").await.unwrap(), None);
    }
}
