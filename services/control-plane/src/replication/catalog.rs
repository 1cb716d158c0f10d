//! Discovery of replicable resources in a registry

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::model::Resource;
use crate::error::Result;
use crate::registry::Registry;

/// Lists the resources a registry holds.
#[async_trait::async_trait]
pub trait ArtifactCatalog: std::fmt::Debug + Send + Sync {
    /// Every resource in the registry
    async fn list(&self, registry: &Registry) -> Result<Vec<Resource>>;
}

/// An [ArtifactCatalog] populated by hand.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    resources: Arc<RwLock<HashMap<i64, Vec<Resource>>>>,
}

impl MemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource to a registry
    pub fn add(&self, registry_id: i64, resource: Resource) {
        self.resources
            .write()
            .entry(registry_id)
            .or_default()
            .push(resource);
    }
}

#[async_trait::async_trait]
impl ArtifactCatalog for MemoryCatalog {
    async fn list(&self, registry: &Registry) -> Result<Vec<Resource>> {
        Ok(self
            .resources
            .read()
            .get(&registry.id)
            .cloned()
            .unwrap_or_default())
    }
}
