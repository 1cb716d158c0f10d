//! Policy storage

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Policy, PolicyQuery, PolicySpec};
use crate::error::{Error, Result};

/// Persistent storage of policies of one kind.
#[async_trait::async_trait]
pub trait PolicyStore<S: PolicySpec>: std::fmt::Debug + Send + Sync {
    /// Store a new policy, returning its id
    async fn create(&self, policy: Policy<S>) -> Result<i64>;

    /// Look up a policy by id
    async fn get(&self, id: i64) -> Result<Option<Policy<S>>>;

    /// Look up a policy by name within a scope
    async fn get_by_name(&self, project_id: i64, name: &str) -> Result<Option<Policy<S>>>;

    /// List policies, returning the total number of matches and the requested page
    async fn list(&self, query: &PolicyQuery) -> Result<(usize, Vec<Policy<S>>)>;

    /// Replace a stored policy
    async fn update(&self, policy: Policy<S>) -> Result<()>;

    /// Delete a policy
    async fn delete(&self, id: i64) -> Result<()>;
}

#[derive(Debug)]
struct Policies<S> {
    next_id: i64,
    policies: BTreeMap<i64, Policy<S>>,
}

/// In-memory [PolicyStore]
#[derive(Debug)]
pub struct MemoryPolicyStore<S> {
    inner: Arc<RwLock<Policies<S>>>,
}

impl<S> Clone for MemoryPolicyStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Default for MemoryPolicyStore<S> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Policies {
                next_id: 0,
                policies: BTreeMap::new(),
            })),
        }
    }
}

impl<S> MemoryPolicyStore<S> {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl<S: PolicySpec> PolicyStore<S> for MemoryPolicyStore<S> {
    async fn create(&self, mut policy: Policy<S>) -> Result<i64> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        policy.id = inner.next_id;
        inner.policies.insert(policy.id, policy);
        Ok(inner.next_id)
    }

    async fn get(&self, id: i64) -> Result<Option<Policy<S>>> {
        Ok(self.inner.read().policies.get(&id).cloned())
    }

    async fn get_by_name(&self, project_id: i64, name: &str) -> Result<Option<Policy<S>>> {
        Ok(self
            .inner
            .read()
            .policies
            .values()
            .find(|p| p.project_id == project_id && p.name == name)
            .cloned())
    }

    async fn list(&self, query: &PolicyQuery) -> Result<(usize, Vec<Policy<S>>)> {
        let matching: Vec<Policy<S>> = self
            .inner
            .read()
            .policies
            .values()
            .filter(|p| query.project_id.is_none_or(|pid| p.project_id == pid))
            .filter(|p| {
                query
                    .name
                    .as_deref()
                    .is_none_or(|name| p.name.contains(name))
            })
            .cloned()
            .collect();

        let total = matching.len();
        Ok((total, query.pagination.apply(matching)))
    }

    async fn update(&self, policy: Policy<S>) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.policies.get_mut(&policy.id) {
            Some(slot) => {
                *slot = policy;
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "{} policy {} not found",
                S::KIND,
                policy.id
            ))),
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.inner
            .write()
            .policies
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("{} policy {id} not found", S::KIND)))
    }
}
