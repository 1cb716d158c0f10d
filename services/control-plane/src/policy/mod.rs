//! Policies: persistent declarations of what to do, when, and where.
//!
//! Replication and notification policies share one record shape, [Policy], and
//! differ only in their [PolicySpec]. The [PolicyManager] enforces the rules
//! every policy kind follows: names are unique within a scope, the creator comes
//! from the calling principal, and a policy can only be reached through the
//! scope it was stored under.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::pagination::Pagination;

mod store;
mod target;

pub use self::store::{MemoryPolicyStore, PolicyStore};
pub use self::target::{Target, normalize_address};

/// What fires a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Only on explicit request
    #[default]
    Manual,

    /// On a 6-field cron schedule
    Scheduled {
        /// Cron specification, seconds first
        cron: String,
    },

    /// When one of the listed events happens
    Event {
        /// Event types
        #[serde(default)]
        event_types: Vec<String>,
    },
}

/// Validate a 6-field cron specification (seconds, minutes, hours, day of
/// month, month, day of week).
pub fn validate_cron(cron: &str) -> Result<()> {
    if cron.split_whitespace().count() != 6 {
        return Err(Error::BadRequest(format!(
            "cron {cron:?} must have 6 fields"
        )));
    }
    Cron::new(cron)
        .with_seconds_required()
        .parse()
        .map(|_| ())
        .map_err(|error| Error::BadRequest(format!("invalid cron {cron:?}: {error}")))
}

/// The kind-specific part of a policy.
pub trait PolicySpec:
    fmt::Debug + Clone + PartialEq + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    /// Human readable kind, used in messages
    const KIND: &'static str;

    /// Validate and normalize the spec together with the policy trigger.
    fn validate(&mut self, trigger: &Trigger) -> Result<()>;
}

/// A policy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "S: PolicySpec")]
pub struct Policy<S> {
    /// Stable id, assigned by the store
    #[serde(default)]
    pub id: i64,

    /// Owning project; `0` is the system scope
    #[serde(default)]
    pub project_id: i64,

    /// Name, unique within the owning scope
    pub name: String,

    /// Free text description
    #[serde(default)]
    pub description: String,

    /// Disabled policies are kept but never run
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Who created the policy
    #[serde(default)]
    pub creator: String,

    /// When the policy was created
    #[serde(default)]
    pub creation_time: DateTime<Utc>,

    /// Last modification
    #[serde(default)]
    pub update_time: DateTime<Utc>,

    /// What fires the policy
    #[serde(default)]
    pub trigger: Trigger,

    /// Kind-specific fields
    #[serde(flatten)]
    pub spec: S,
}

fn enabled_by_default() -> bool {
    true
}

impl<S: PolicySpec> Policy<S> {
    fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::BadRequest(format!("{} policy name is required", S::KIND)));
        }
        if let Trigger::Scheduled { cron } = &self.trigger {
            validate_cron(cron)?;
        }
        self.spec.validate(&self.trigger)
    }
}

/// Filters for listing policies
#[derive(Debug, Clone, Default)]
pub struct PolicyQuery {
    /// Owning scope
    pub project_id: Option<i64>,

    /// Substring of the policy name
    pub name: Option<String>,

    /// Page to return
    pub pagination: Pagination,
}

/// Enforces the contracts shared by all policy kinds on top of a [PolicyStore].
#[derive(Debug)]
pub struct PolicyManager<S: PolicySpec> {
    store: Arc<dyn PolicyStore<S>>,
}

impl<S: PolicySpec> Clone for PolicyManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: PolicySpec> PolicyManager<S> {
    /// Manage the policies held by `store`
    pub fn new<T: PolicyStore<S> + 'static>(store: T) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Validate a policy as it would be stored in `scope`, without storing it.
    pub fn prepare(&self, scope: i64, mut policy: Policy<S>) -> Result<Policy<S>> {
        policy.project_id = scope;
        policy.validate()?;
        Ok(policy)
    }

    /// Create a policy in `scope`, returning its id.
    #[tracing::instrument(skip(self, policy), fields(kind = S::KIND, name = %policy.name))]
    pub async fn create(
        &self,
        principal: &Principal,
        scope: i64,
        policy: Policy<S>,
    ) -> Result<i64> {
        if policy.id != 0 {
            return Err(Error::BadRequest(format!(
                "{} policy id must not be set on create",
                S::KIND
            )));
        }

        let mut policy = self.prepare(scope, policy)?;
        if self.store.get_by_name(scope, &policy.name).await?.is_some() {
            return Err(Error::Conflict(format!(
                "{} policy {} already exists",
                S::KIND,
                policy.name
            )));
        }

        let now = Utc::now();
        policy.creator = principal.name().to_owned();
        policy.creation_time = now;
        policy.update_time = now;

        let id = self.store.create(policy).await?;
        tracing::debug!(id, "created policy");
        Ok(id)
    }

    /// Fetch a policy through `scope`.
    ///
    /// A system policy is invisible through a project scope, and a policy of
    /// another project is reported as a malformed request.
    pub async fn get(&self, scope: i64, id: i64) -> Result<Policy<S>> {
        let policy = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} policy {id} not found", S::KIND)))?;

        if scope != 0 && policy.project_id == 0 {
            return Err(Error::NotFound(format!("{} policy {id} not found", S::KIND)));
        }
        if policy.project_id != scope {
            tracing::warn!(
                id,
                scope,
                owner = policy.project_id,
                "policy addressed through the wrong scope"
            );
            return Err(Error::BadRequest(format!(
                "{} policy {id} does not belong to project {scope}",
                S::KIND
            )));
        }
        Ok(policy)
    }

    /// List policies in `scope`.
    pub async fn list(&self, scope: i64, mut query: PolicyQuery) -> Result<(usize, Vec<Policy<S>>)> {
        query.project_id = Some(scope);
        self.store.list(&query).await
    }

    /// Count the policies in `scope`.
    pub async fn count(&self, scope: i64) -> Result<usize> {
        let query = PolicyQuery {
            project_id: Some(scope),
            name: None,
            pagination: Pagination::all(),
        };
        Ok(self.store.list(&query).await?.0)
    }

    /// Every policy in `scope`.
    pub async fn all(&self, scope: i64) -> Result<Vec<Policy<S>>> {
        let query = PolicyQuery {
            project_id: Some(scope),
            name: None,
            pagination: Pagination::all(),
        };
        Ok(self.store.list(&query).await?.1)
    }

    /// Replace a policy. Server-assigned fields are kept from the stored record.
    #[tracing::instrument(skip(self, policy), fields(kind = S::KIND))]
    pub async fn update(&self, scope: i64, id: i64, policy: Policy<S>) -> Result<Policy<S>> {
        let existing = self.get(scope, id).await?;

        let mut policy = self.prepare(existing.project_id, policy)?;
        policy.id = id;
        policy.creator = existing.creator;
        policy.creation_time = existing.creation_time;
        policy.update_time = Utc::now();

        if policy.name != existing.name {
            if let Some(other) = self.store.get_by_name(scope, &policy.name).await? {
                if other.id != id {
                    return Err(Error::Conflict(format!(
                        "{} policy {} already exists",
                        S::KIND,
                        policy.name
                    )));
                }
            }
        }

        self.store.update(policy.clone()).await?;
        Ok(policy)
    }

    /// Delete a policy, returning the removed record.
    #[tracing::instrument(skip(self), fields(kind = S::KIND))]
    pub async fn delete(&self, scope: i64, id: i64) -> Result<Policy<S>> {
        let policy = self.get(scope, id).await?;
        self.store.delete(id).await?;
        Ok(policy)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct TestSpec {
        #[serde(default)]
        pub(crate) targets: Vec<Target>,
    }

    impl PolicySpec for TestSpec {
        const KIND: &'static str = "test";

        fn validate(&mut self, _trigger: &Trigger) -> Result<()> {
            for target in &mut self.targets {
                target.validate(&["http"])?;
            }
            Ok(())
        }
    }

    fn policy(name: &str) -> Policy<TestSpec> {
        Policy {
            id: 0,
            project_id: 0,
            name: name.to_owned(),
            description: String::new(),
            enabled: true,
            creator: String::new(),
            creation_time: DateTime::<Utc>::default(),
            update_time: DateTime::<Utc>::default(),
            trigger: Trigger::Manual,
            spec: TestSpec {
                targets: vec![Target {
                    kind: "http".into(),
                    address: "http://hooks.example.com/in?x=1".into(),
                    credential_ref: None,
                    insecure: false,
                    skip_verify: false,
                }],
            },
        }
    }

    fn alice() -> Principal {
        Principal::User {
            username: "alice".into(),
            sys_admin: false,
        }
    }

    fn manager() -> PolicyManager<TestSpec> {
        PolicyManager::new(MemoryPolicyStore::<TestSpec>::new())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let manager = manager();
        let input = policy("hook");
        let id = manager.create(&alice(), 3, input.clone()).await.unwrap();

        let stored = manager.get(3, id).await.unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.project_id, 3);
        assert_eq!(stored.creator, "alice");
        assert_eq!(stored.name, input.name);
        assert_eq!(stored.trigger, input.trigger);
        assert_eq!(
            stored.spec.targets[0].address,
            "http://hooks.example.com/in"
        );
    }

    #[tokio::test]
    async fn create_rejects_preset_id_and_duplicates() {
        let manager = manager();
        let mut preset = policy("hook");
        preset.id = 9;
        assert!(matches!(
            manager.create(&alice(), 3, preset).await,
            Err(Error::BadRequest(_))
        ));

        manager.create(&alice(), 3, policy("hook")).await.unwrap();
        assert!(matches!(
            manager.create(&alice(), 3, policy("hook")).await,
            Err(Error::Conflict(_))
        ));
        // names are unique per scope only
        manager.create(&alice(), 4, policy("hook")).await.unwrap();
    }

    #[tokio::test]
    async fn managers_over_one_store_share_policies() {
        let store = MemoryPolicyStore::<TestSpec>::new();
        let writer = PolicyManager::new(store.clone());
        let reader = PolicyManager::new(store);

        let id = writer.create(&alice(), 3, policy("hook")).await.unwrap();
        assert_eq!(reader.get(3, id).await.unwrap().name, "hook");
    }

    #[tokio::test]
    async fn scope_is_enforced() {
        let manager = manager();
        let project = manager.create(&alice(), 222, policy("hook")).await.unwrap();
        let system = manager.create(&alice(), 0, policy("sys")).await.unwrap();

        assert!(matches!(
            manager.update(1, project, policy("hook")).await,
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(manager.get(1, system).await, Err(Error::NotFound(_))));
        assert!(matches!(manager.get(1, 999).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn update_keeps_server_fields_and_checks_names() {
        let manager = manager();
        let first = manager.create(&alice(), 3, policy("first")).await.unwrap();
        manager.create(&alice(), 3, policy("second")).await.unwrap();

        let mut renamed = policy("second");
        renamed.creator = "mallory".into();
        assert!(matches!(
            manager.update(3, first, renamed.clone()).await,
            Err(Error::Conflict(_))
        ));

        renamed.name = "third".into();
        renamed.enabled = false;
        let updated = manager.update(3, first, renamed).await.unwrap();
        assert_eq!(updated.creator, "alice");
        assert!(!updated.enabled);
        assert_eq!(manager.get(3, first).await.unwrap().name, "third");
    }

    #[tokio::test]
    async fn scheduled_trigger_needs_valid_cron() {
        let manager = manager();
        let mut scheduled = policy("nightly");
        scheduled.trigger = Trigger::Scheduled {
            cron: "not a cron".into(),
        };
        assert!(matches!(
            manager.create(&alice(), 3, scheduled.clone()).await,
            Err(Error::BadRequest(_))
        ));

        scheduled.trigger = Trigger::Scheduled {
            cron: "0 0 3 * * *".into(),
        };
        manager.create(&alice(), 3, scheduled).await.unwrap();
    }

    #[test]
    fn cron_field_count() {
        assert!(validate_cron("0 0 3 * * *").is_ok());
        assert!(validate_cron("20 3 0 * * *").is_ok());
        assert!(validate_cron("0 3 * * *").is_err());
        assert!(validate_cron("0 0 25 * * *").is_err());
    }

    #[test]
    fn trigger_wire_format() {
        let trigger: Trigger =
            serde_json::from_str(r#"{"type":"event","event_types":["PUSH_ARTIFACT"]}"#).unwrap();
        assert_eq!(
            trigger,
            Trigger::Event {
                event_types: vec!["PUSH_ARTIFACT".into()]
            }
        );
        let value = serde_json::to_value(Trigger::Scheduled {
            cron: "0 0 * * * *".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "scheduled");
    }
}
