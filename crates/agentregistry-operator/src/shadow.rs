//! Shadow-write handlers: turn observed remote objects into catalog records
//! with `managementType = external`.

use crate::cache::{DiscoveryCache, RemoteObject};
use crate::error::Result;
use crate::retry::{spawn_with_retry, ErrorTracker};
use crate::store::ObjectStore;
use agentregistry_api::catalog::{
    Agent, AgentSpec, CatalogRecord, DeploymentBackRef, ManagementType, McpServer, McpServerSpec,
    Model, ModelSpec, PackageSpec, PackageTransport, RegistryType, SourceRef,
};
use agentregistry_api::names::{resource_identity, sanitize_name, shadow_name};
use agentregistry_api::{annotations, labels};
use agentregistry_api::discovery::EnvironmentSpec;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Writes shadow catalog records from watcher observations. One instance is
/// shared by every watcher.
pub struct ShadowWriter {
    pub cache: Arc<DiscoveryCache>,
    pub servers: Arc<dyn ObjectStore<McpServer>>,
    pub agents: Arc<dyn ObjectStore<Agent>>,
    pub models: Arc<dyn ObjectStore<Model>>,
    pub tracker: Arc<ErrorTracker>,
    pub controller_namespace: String,
}

impl ShadowWriter {
    /// Record an add/update observation: the cache entry is written
    /// synchronously, the catalog write runs behind the retry helper.
    pub fn observe(self: &Arc<Self>, env: &EnvironmentSpec, remote: RemoteObject) -> JoinHandle<()> {
        self.cache.upsert(remote.clone());
        let identity = resource_identity(&remote.kind, &remote.namespace, &remote.name);
        let writer = self.clone();
        let env = env.clone();
        spawn_with_retry(self.tracker.clone(), identity, move || {
            let writer = writer.clone();
            let env = env.clone();
            let remote = remote.clone();
            async move { writer.write_shadow(&env, &remote).await }
        })
    }

    /// Record a delete observation. The cache entry is evicted; the shadow
    /// catalog record is deliberately preserved and flips to
    /// `ready = false` on its next reconcile.
    pub fn observe_delete(&self, kind: &str, namespace: &str, name: &str) {
        self.cache.remove(kind, namespace, name);
        debug!(kind, namespace, name, "remote object gone, cache entry evicted");
    }

    async fn write_shadow(&self, env: &EnvironmentSpec, remote: &RemoteObject) -> Result<()> {
        match remote.kind.as_str() {
            "MCPServer" => self.write_server_shadow(env, remote).await,
            "Agent" => self.write_agent_shadow(env, remote).await,
            "ModelConfig" => self.write_model_shadow(env, remote).await,
            other => {
                debug!(kind = other, "ignoring observation of unhandled kind");
                Ok(())
            }
        }
    }

    fn shadow_labels(&self, env: &EnvironmentSpec, remote: &RemoteObject) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = env.labels.clone();
        out.insert(labels::DISCOVERED.to_string(), "true".to_string());
        out.insert(labels::SOURCE_KIND.to_string(), remote.kind.clone());
        out.insert(labels::SOURCE_NAME.to_string(), remote.name.clone());
        out.insert(labels::SOURCE_NAMESPACE.to_string(), remote.namespace.clone());
        out.insert(labels::ENVIRONMENT.to_string(), env.name.clone());
        out.insert(labels::CLUSTER.to_string(), env.cluster.clone());
        out
    }

    fn source_ref(&self, env: &EnvironmentSpec, remote: &RemoteObject) -> SourceRef {
        SourceRef {
            environment: env.name.clone(),
            cluster: env.cluster.clone(),
            namespace: remote.namespace.clone(),
            name: remote.name.clone(),
        }
    }

    fn version_of(remote: &RemoteObject) -> String {
        remote
            .labels
            .get(labels::APP_VERSION)
            .or_else(|| remote.labels.get(labels::VERSION))
            .cloned()
            .unwrap_or_else(|| "latest".to_string())
    }

    fn title_of(remote: &RemoteObject) -> Option<String> {
        remote.annotations.get(annotations::TITLE).cloned()
    }

    fn description_of(remote: &RemoteObject) -> Option<String> {
        remote.annotations.get(annotations::DESCRIPTION).cloned()
    }

    fn initial_status<K: CatalogRecord>(record: &mut K, remote: &RemoteObject) {
        let status = record.catalog_status_mut();
        status.management_type = Some(ManagementType::External);
        status.published = Some(true);
        status.published_at = Some(Utc::now());
        status.deployment = Some(DeploymentBackRef {
            name: Some(remote.name.clone()),
            namespace: Some(remote.namespace.clone()),
            image: remote.image.clone(),
            ready: remote.ready,
            message: remote.message.clone(),
        });
    }

    async fn write_server_shadow(&self, env: &EnvironmentSpec, remote: &RemoteObject) -> Result<()> {
        let name = shadow_name(&remote.namespace, &remote.name);
        let spec = McpServerSpec {
            name: sanitize_name(&remote.name),
            version: Self::version_of(remote),
            title: Self::title_of(remote),
            description: Self::description_of(remote),
            packages: vec![PackageSpec {
                registry_type: RegistryType::Oci,
                identifier: remote.image.clone().unwrap_or_default(),
                version: None,
                runtime_hint: None,
                transport: PackageTransport {
                    type_: remote.transport.unwrap_or_default(),
                    url: None,
                },
                runtime_arguments: Vec::new(),
                package_arguments: Vec::new(),
                environment_variables: Vec::new(),
            }],
            remotes: Vec::new(),
            meta: None,
            source_ref: Some(self.source_ref(env, remote)),
        };

        match self.servers.get(&self.controller_namespace, &name).await? {
            None => {
                let mut record = McpServer::new(&name, spec);
                record.metadata.namespace = Some(self.controller_namespace.clone());
                record.metadata.labels = Some(self.shadow_labels(env, remote));
                let mut created = self.servers.create(&record).await?;
                Self::initial_status(&mut created, remote);
                self.servers.update_status(&created).await?;
                info!(record = %name, env = %env.name, "shadow server record created");
            }
            Some(mut existing) => {
                existing.spec = spec;
                existing
                    .metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(self.shadow_labels(env, remote));
                // Management type and the rest of the status are preserved.
                self.servers.update(&existing).await?;
                debug!(record = %name, env = %env.name, "shadow server record updated");
            }
        }
        Ok(())
    }

    async fn write_agent_shadow(&self, env: &EnvironmentSpec, remote: &RemoteObject) -> Result<()> {
        let name = shadow_name(&remote.namespace, &remote.name);
        let spec = AgentSpec {
            name: sanitize_name(&remote.name),
            version: Self::version_of(remote),
            title: Self::title_of(remote),
            description: Self::description_of(remote),
            image: remote.image.clone(),
            framework: None,
            model_ref: None,
            mcp_servers: Vec::new(),
            a2a_url: None,
            meta: None,
            source_ref: Some(self.source_ref(env, remote)),
        };

        match self.agents.get(&self.controller_namespace, &name).await? {
            None => {
                let mut record = Agent::new(&name, spec);
                record.metadata.namespace = Some(self.controller_namespace.clone());
                record.metadata.labels = Some(self.shadow_labels(env, remote));
                let mut created = self.agents.create(&record).await?;
                Self::initial_status(&mut created, remote);
                self.agents.update_status(&created).await?;
                info!(record = %name, env = %env.name, "shadow agent record created");
            }
            Some(mut existing) => {
                existing.spec = spec;
                existing
                    .metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(self.shadow_labels(env, remote));
                self.agents.update(&existing).await?;
            }
        }
        Ok(())
    }

    async fn write_model_shadow(&self, env: &EnvironmentSpec, remote: &RemoteObject) -> Result<()> {
        let name = shadow_name(&remote.namespace, &remote.name);
        let spec = ModelSpec {
            name: sanitize_name(&remote.name),
            version: Self::version_of(remote),
            title: Self::title_of(remote),
            description: Self::description_of(remote),
            provider: remote.provider.clone(),
            model: remote.model.clone(),
            base_url: remote.base_url.clone(),
            api_key_secret_ref: None,
            meta: None,
            source_ref: Some(self.source_ref(env, remote)),
        };

        match self.models.get(&self.controller_namespace, &name).await? {
            None => {
                let mut record = Model::new(&name, spec);
                record.metadata.namespace = Some(self.controller_namespace.clone());
                record.metadata.labels = Some(self.shadow_labels(env, remote));
                let mut created = self.models.create(&record).await?;
                Self::initial_status(&mut created, remote);
                self.models.update_status(&created).await?;
                info!(record = %name, env = %env.name, "shadow model record created");
            }
            Some(mut existing) => {
                existing.spec = spec;
                existing
                    .metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(self.shadow_labels(env, remote));
                self.models.update(&existing).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::catalog_indexes;
    use crate::store::MemStore;
    use agentregistry_api::catalog::TransportType;

    fn writer() -> Arc<ShadowWriter> {
        Arc::new(ShadowWriter {
            cache: Arc::new(DiscoveryCache::new()),
            servers: Arc::new(MemStore::new(Arc::new(catalog_indexes::<McpServer>()))),
            agents: Arc::new(MemStore::new(Arc::new(catalog_indexes::<Agent>()))),
            models: Arc::new(MemStore::new(Arc::new(catalog_indexes::<Model>()))),
            tracker: Arc::new(ErrorTracker::new()),
            controller_namespace: "agentregistry-system".to_string(),
        })
    }

    fn dev_env() -> EnvironmentSpec {
        serde_json::from_value(serde_json::json!({
            "name": "dev",
            "cluster": "dev-cluster",
            "namespaces": ["ns1", "ns2"],
            "resourceTypes": ["MCPServer"],
            "labels": {"team": "platform"}
        }))
        .unwrap()
    }

    fn remote_server() -> RemoteObject {
        RemoteObject {
            kind: "MCPServer".to_string(),
            namespace: "ns1".to_string(),
            name: "alpha".to_string(),
            labels: BTreeMap::from([(
                "app.kubernetes.io/version".to_string(),
                "1.2.3".to_string(),
            )]),
            annotations: BTreeMap::from([(
                "agentregistry.dev/title".to_string(),
                "Alpha".to_string(),
            )]),
            image: Some("ghcr.io/example/alpha:1.2.3".to_string()),
            transport: Some(TransportType::StreamableHttp),
            provider: None,
            model: None,
            base_url: None,
            ready: true,
            message: None,
        }
    }

    #[tokio::test]
    async fn shadow_server_record_is_created() {
        let writer = writer();
        writer.observe(&dev_env(), remote_server()).await.unwrap();

        let record = writer
            .servers
            .get("agentregistry-system", "ns1-alpha")
            .await
            .unwrap()
            .expect("shadow record missing");
        assert_eq!(record.spec.version, "1.2.3");
        assert_eq!(record.spec.title.as_deref(), Some("Alpha"));
        assert_eq!(record.spec.packages.len(), 1);
        assert_eq!(record.spec.packages[0].identifier, "ghcr.io/example/alpha:1.2.3");
        assert_eq!(record.spec.packages[0].registry_type, RegistryType::Oci);

        let record_labels = record.metadata.labels.as_ref().unwrap();
        assert_eq!(record_labels.get(labels::DISCOVERED).unwrap(), "true");
        assert_eq!(record_labels.get(labels::ENVIRONMENT).unwrap(), "dev");
        assert_eq!(record_labels.get(labels::CLUSTER).unwrap(), "dev-cluster");
        assert_eq!(record_labels.get("team").unwrap(), "platform");

        let status = record.status.unwrap();
        assert_eq!(status.management_type, Some(ManagementType::External));
        assert_eq!(status.published, Some(true));

        // The cache observed the same object.
        assert!(writer.cache.get("MCPServer", "ns1", "alpha").is_some());
        assert!(writer.tracker.is_empty());
    }

    #[tokio::test]
    async fn updates_preserve_management_type() {
        let writer = writer();
        writer.observe(&dev_env(), remote_server()).await.unwrap();

        let mut newer = remote_server();
        newer.image = Some("ghcr.io/example/alpha:1.3.0".to_string());
        newer.labels.insert(
            "app.kubernetes.io/version".to_string(),
            "1.3.0".to_string(),
        );
        writer.observe(&dev_env(), newer).await.unwrap();

        let record = writer
            .servers
            .get("agentregistry-system", "ns1-alpha")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.spec.version, "1.3.0");
        assert_eq!(
            record.status.unwrap().management_type,
            Some(ManagementType::External)
        );
    }

    #[tokio::test]
    async fn delete_evicts_cache_but_preserves_record() {
        let writer = writer();
        writer.observe(&dev_env(), remote_server()).await.unwrap();
        writer.observe_delete("MCPServer", "ns1", "alpha");

        assert!(writer.cache.get("MCPServer", "ns1", "alpha").is_none());
        assert!(writer
            .servers
            .get("agentregistry-system", "ns1-alpha")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn model_shadow_carries_endpoint_fields() {
        let writer = writer();
        let remote = RemoteObject {
            kind: "ModelConfig".to_string(),
            namespace: "ns1".to_string(),
            name: "ops_model".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            image: None,
            transport: None,
            provider: Some("openai".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            base_url: Some("http://llm.ns1.svc:8000".to_string()),
            ready: true,
            message: None,
        };
        writer.observe(&dev_env(), remote).await.unwrap();

        let record = writer
            .models
            .get("agentregistry-system", "ns1-ops-model")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.spec.name, "ops-model");
        assert_eq!(record.spec.base_url.as_deref(), Some("http://llm.ns1.svc:8000"));
    }
}
