//! Process-wide discovery cache: the most recently observed copy of every
//! shadowed remote object, keyed by (kind, namespace, name).

use agentregistry_api::catalog::TransportType;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Normalized copy of a remote runtime object. Watcher callbacks construct
/// these; readers always receive independent clones.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteObject {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub image: Option<String>,
    pub transport: Option<TransportType>,
    /// Model-config fields, present only for `ModelConfig` observations.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub ready: bool,
    pub message: Option<String>,
}

type CacheKey = (String, String, String);

/// Read-mostly shared map; writers only in the discovery watchers.
#[derive(Default)]
pub struct DiscoveryCache {
    inner: RwLock<HashMap<CacheKey, RemoteObject>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, obj: RemoteObject) {
        let key = (obj.kind.clone(), obj.namespace.clone(), obj.name.clone());
        self.inner.write().insert(key, obj);
    }

    pub fn remove(&self, kind: &str, namespace: &str, name: &str) {
        self.inner
            .write()
            .remove(&(kind.to_string(), namespace.to_string(), name.to_string()));
    }

    /// Independent deep copy; consumers cannot mutate the cache.
    pub fn get(&self, kind: &str, namespace: &str, name: &str) -> Option<RemoteObject> {
        self.inner
            .read()
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
