//! Typed store abstraction over the cluster's resource store.
//!
//! Reconciler logic is written against [`ObjectStore`]; production uses
//! [`KubeStore`] over `kube::Api`, tests use [`MemStore`], which mimics the
//! apiserver's optimistic concurrency, generation bumping and
//! finalizer-gated deletion.

use crate::error::{Error, Result};
use crate::index::FieldIndexes;
use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Bounds shared by every record kind the stores handle.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> StoredObject for T where
    T: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// List filter: label equality plus an optional registered field index.
#[derive(Clone, Debug, Default)]
pub struct ListSelector {
    pub labels: BTreeMap<String, String>,
    pub index: Option<(String, String)>,
}

impl ListSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_index(name: &str, value: impl Into<String>) -> Self {
        Self {
            labels: BTreeMap::new(),
            index: Some((name.to_string(), value.into())),
        }
    }

    pub fn by_label(key: &str, value: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(key.to_string(), value.into());
        Self {
            labels,
            index: None,
        }
    }
}

/// Typed get/list/update over one record kind.
#[async_trait]
pub trait ObjectStore<K: StoredObject>: Send + Sync {
    /// `None` when the object does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List, optionally restricted to one namespace.
    async fn list(&self, namespace: Option<&str>, selector: &ListSelector) -> Result<Vec<K>>;

    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace spec and metadata; conflicts on a stale resourceVersion.
    async fn update(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource; conflicts on a stale resourceVersion.
    async fn update_status(&self, obj: &K) -> Result<K>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Replace the finalizer list.
    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<()>;
}

fn index_filter<K: StoredObject>(
    indexes: &FieldIndexes<K>,
    items: Vec<K>,
    selector: &ListSelector,
) -> Result<Vec<K>> {
    match &selector.index {
        None => Ok(items),
        Some((name, value)) => {
            let mut matched = Vec::new();
            for item in items {
                if indexes.extract(name, &item)?.as_deref() == Some(value.as_str()) {
                    matched.push(item);
                }
            }
            Ok(matched)
        }
    }
}

fn matches_labels<K: StoredObject>(obj: &K, labels: &BTreeMap<String, String>) -> bool {
    labels
        .iter()
        .all(|(k, v)| obj.labels().get(k).map(String::as_str) == Some(v.as_str()))
}

/// Store backed by the cluster through `kube::Api`.
pub struct KubeStore<K: StoredObject> {
    client: Client,
    indexes: Arc<FieldIndexes<K>>,
}

impl<K: StoredObject> KubeStore<K> {
    pub fn new(client: Client, indexes: Arc<FieldIndexes<K>>) -> Self {
        Self { client, indexes }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn label_selector(labels: &BTreeMap<String, String>) -> Option<String> {
        if labels.is_empty() {
            None
        } else {
            Some(
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        match self.api(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, namespace: Option<&str>, selector: &ListSelector) -> Result<Vec<K>> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(labels) = Self::label_selector(&selector.labels) {
            params = params.labels(&labels);
        }
        let items = api.list(&params).await?.items;
        index_filter(&self.indexes, items, selector)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::Validation("object has no namespace".to_string()))?;
        Ok(self.api(&namespace).create(&PostParams::default(), obj).await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::Validation("object has no namespace".to_string()))?;
        let name = obj.name_any();
        self.api(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(map_conflict)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::Validation("object has no namespace".to_string()))?;
        let name = obj.name_any();
        let data = serde_json::to_vec(obj)?;
        self.api(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(map_conflict)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(Error::NotFound(format!("{namespace}/{name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<()> {
        let patch = serde_json::json!({"metadata": {"finalizers": finalizers}});
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(map_conflict)?;
        Ok(())
    }
}

fn map_conflict(err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(response) if response.code == 409 && response.reason == "Conflict" => Error::Conflict,
        _ => err.into(),
    }
}

/// In-memory store mimicking apiserver semantics: optimistic concurrency on
/// resourceVersion, generation bump on spec change, deletion gated on an
/// empty finalizer list.
pub struct MemStore<K: StoredObject> {
    objects: Mutex<HashMap<(String, String), K>>,
    indexes: Arc<FieldIndexes<K>>,
    next_rv: Mutex<u64>,
}

impl<K: StoredObject> MemStore<K> {
    pub fn new(indexes: Arc<FieldIndexes<K>>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            indexes,
            next_rv: Mutex::new(1),
        }
    }

    fn bump_rv(&self) -> String {
        let mut rv = self.next_rv.lock();
        *rv += 1;
        (*rv).to_string()
    }

    fn key(obj: &K) -> Result<(String, String)> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::Validation("object has no namespace".to_string()))?;
        let name = obj.meta().name.clone().ok_or_else(|| {
            Error::Validation("object has no name".to_string())
        })?;
        Ok((namespace, name))
    }

    fn spec_of(obj: &K) -> Value {
        serde_json::to_value(obj)
            .ok()
            .and_then(|mut v| v.get_mut("spec").map(Value::take))
            .unwrap_or(Value::Null)
    }

    fn status_of(obj: &K) -> Value {
        serde_json::to_value(obj)
            .ok()
            .and_then(|mut v| v.get_mut("status").map(Value::take))
            .unwrap_or(Value::Null)
    }

    fn check_rv(existing: &K, incoming: &K) -> Result<()> {
        let existing_rv = existing.resource_version();
        let incoming_rv = incoming.resource_version();
        match incoming_rv {
            Some(rv) if existing_rv.as_deref() != Some(rv.as_str()) => Err(Error::Conflict),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<K: StoredObject> ObjectStore<K> for MemStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self
            .objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: Option<&str>, selector: &ListSelector) -> Result<Vec<K>> {
        let items: Vec<K> = {
            let objects = self.objects.lock();
            objects
                .iter()
                .filter(|((ns, _), _)| namespace.map_or(true, |n| n == ns))
                .map(|(_, obj)| obj.clone())
                .filter(|obj| matches_labels(obj, &selector.labels))
                .collect()
        };
        index_filter(&self.indexes, items, selector)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        let mut objects = self.objects.lock();
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        let mut stored = obj.clone();
        {
            let meta = stored.meta_mut();
            meta.resource_version = Some(self.bump_rv());
            meta.generation = Some(1);
            meta.creation_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                Utc::now(),
            ));
        }
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        let mut objects = self.objects.lock();
        let existing = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", key.0, key.1)))?;
        Self::check_rv(existing, obj)?;

        let spec_changed = Self::spec_of(existing) != Self::spec_of(obj);
        let previous_generation = existing.meta().generation.unwrap_or(1);
        let preserved_status = Self::status_of(existing);

        // Replace through the main resource never touches status.
        let mut value = serde_json::to_value(obj)?;
        if let Some(map) = value.as_object_mut() {
            if preserved_status.is_null() {
                map.remove("status");
            } else {
                map.insert("status".to_string(), preserved_status);
            }
        }
        let mut stored: K = serde_json::from_value(value)?;
        {
            let meta = stored.meta_mut();
            meta.resource_version = Some(self.bump_rv());
            meta.generation = Some(if spec_changed {
                previous_generation + 1
            } else {
                previous_generation
            });
        }
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = Self::key(obj)?;
        let mut objects = self.objects.lock();
        let existing = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", key.0, key.1)))?;
        Self::check_rv(existing, obj)?;

        let mut value = serde_json::to_value(existing)?;
        let status = Self::status_of(obj);
        if let Some(map) = value.as_object_mut() {
            if status.is_null() {
                map.remove("status");
            } else {
                map.insert("status".to_string(), status);
            }
        }
        let mut stored: K = serde_json::from_value(value)?;
        stored.meta_mut().resource_version = Some(self.bump_rv());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock();
        let remove_now = {
            let existing = objects
                .get_mut(&key)
                .ok_or_else(|| Error::NotFound(format!("{namespace}/{name}")))?;
            if existing.finalizers().is_empty() {
                true
            } else {
                // Finalizers block physical removal.
                let rv = self.bump_rv();
                let meta = existing.meta_mut();
                if meta.deletion_timestamp.is_none() {
                    meta.deletion_timestamp = Some(
                        k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()),
                    );
                    meta.resource_version = Some(rv);
                }
                false
            }
        };
        if remove_now {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn set_finalizers(&self, namespace: &str, name: &str, finalizers: Vec<String>) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.objects.lock();
        let gone = {
            let rv = self.bump_rv();
            let existing = objects
                .get_mut(&key)
                .ok_or_else(|| Error::NotFound(format!("{namespace}/{name}")))?;
            let meta = existing.meta_mut();
            meta.finalizers = if finalizers.is_empty() {
                None
            } else {
                Some(finalizers)
            };
            meta.resource_version = Some(rv);
            // Deletion completes once the last finalizer is gone.
            meta.deletion_timestamp.is_some() && meta.finalizers.is_none()
        };
        if gone {
            objects.remove(&key);
        }
        Ok(())
    }
}
