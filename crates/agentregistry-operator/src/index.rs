//! Field-index registration.
//!
//! The store's `list` can select on a named index; the index must have been
//! registered here before the first reconciliation, mirroring the contract
//! the reconcilers rely on for cross-catalog scans.

use crate::error::{Error, Result};
use agentregistry_api::catalog::CatalogRecord;
use agentregistry_api::deployment::AgentDeployment;
use std::collections::HashMap;

/// Well-known index names.
pub mod fields {
    pub const SPEC_NAME: &str = "spec.name";
    pub const RESOURCE_NAME: &str = "spec.resourceName";
    pub const RESOURCE_TYPE: &str = "spec.resourceType";
    pub const RUNTIME: &str = "spec.runtime";
    pub const PUBLISHED: &str = "status.published";
    pub const IS_LATEST: &str = "status.isLatest";
}

type Extractor<K> = Box<dyn Fn(&K) -> Option<String> + Send + Sync>;

/// Named field extractors for one kind.
pub struct FieldIndexes<K> {
    extractors: HashMap<String, Extractor<K>>,
}

impl<K> Default for FieldIndexes<K> {
    fn default() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }
}

impl<K> FieldIndexes<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, extractor: F)
    where
        F: Fn(&K) -> Option<String> + Send + Sync + 'static,
    {
        self.extractors.insert(name.to_string(), Box::new(extractor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extractors.contains_key(name)
    }

    /// Project an object through a registered index.
    pub fn extract(&self, name: &str, obj: &K) -> Result<Option<String>> {
        let extractor = self
            .extractors
            .get(name)
            .ok_or_else(|| Error::UnknownIndex(name.to_string()))?;
        Ok(extractor(obj))
    }
}

/// The index set every catalog kind registers.
pub fn catalog_indexes<K: CatalogRecord>() -> FieldIndexes<K> {
    let mut indexes = FieldIndexes::new();
    indexes.register(fields::SPEC_NAME, |obj: &K| Some(obj.logical_name().to_string()));
    indexes.register(fields::PUBLISHED, |obj: &K| {
        Some(
            obj.catalog_status()
                .and_then(|s| s.published)
                .unwrap_or(false)
                .to_string(),
        )
    });
    indexes.register(fields::IS_LATEST, |obj: &K| {
        Some(
            obj.catalog_status()
                .and_then(|s| s.is_latest)
                .unwrap_or(false)
                .to_string(),
        )
    });
    indexes
}

/// The index set the deployment reconciler requires.
pub fn deployment_indexes() -> FieldIndexes<AgentDeployment> {
    let mut indexes = FieldIndexes::new();
    indexes.register(fields::RESOURCE_NAME, |obj: &AgentDeployment| {
        Some(obj.spec.resource_name.clone())
    });
    indexes.register(fields::RESOURCE_TYPE, |obj: &AgentDeployment| {
        serde_json::to_value(obj.spec.resource_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    });
    indexes.register(fields::RUNTIME, |obj: &AgentDeployment| {
        serde_json::to_value(obj.spec.runtime)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    });
    indexes
}
