//! Deployment reconciler: translate catalog + deployment records into
//! runtime objects, apply them to the resolved target, track readiness,
//! and garbage-collect on deletion through the finalizer.

pub mod target;
pub mod toolserver;
pub mod translate;

use crate::catalog::Outcome;
use crate::error::{Error, Result};
use crate::index::fields;
use crate::store::{ListSelector, ObjectStore};
use agentregistry_api::catalog::{Agent, CatalogRecord, ManagementType, McpServer};
use agentregistry_api::deployment::{
    AgentDeployment, AgentDeploymentStatus, DeployResourceType, DeploymentPhase, ManagedResource,
};
use agentregistry_api::discovery::{DiscoveryConfig, EnvironmentSpec};
use agentregistry_api::finalizers;
use chrono::Utc;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use target::{DeployTarget, DeployTargetFactory, Readiness};
use tracing::{debug, error, info, warn};
use translate::{translate, CatalogEntry};

const ORG_VERIFIED_FLAG: &str = "org_is_verified";
const JWT_VERIFIED_FLAG: &str = "publisher_identity_verified_by_jwt";

/// Result of one successful deploy pass.
struct DeployResult {
    managed: Vec<ManagedResource>,
    phase: DeploymentPhase,
    message: Option<String>,
}

pub struct DeploymentReconciler {
    pub deployments: Arc<dyn ObjectStore<AgentDeployment>>,
    pub servers: Arc<dyn ObjectStore<McpServer>>,
    pub agents: Arc<dyn ObjectStore<Agent>>,
    pub configs: Arc<dyn ObjectStore<DiscoveryConfig>>,
    pub factory: Arc<dyn DeployTargetFactory>,
}

impl DeploymentReconciler {
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(obj) = self.deployments.get(namespace, name).await? else {
            return Ok(Outcome::Done);
        };

        if obj.metadata.deletion_timestamp.is_some() {
            return self.finalize(&obj).await;
        }

        if !obj.finalizers().iter().any(|f| f == finalizers::DEPLOYMENT) {
            let mut all: Vec<String> = obj.finalizers().to_vec();
            all.push(finalizers::DEPLOYMENT.to_string());
            self.deployments.set_finalizers(namespace, name, all).await?;
            return Ok(Outcome::Requeue);
        }

        match self.deploy(&obj).await {
            Ok(result) => {
                let outcome = match result.phase {
                    // Keep probing until every managed object reports ready.
                    DeploymentPhase::Pending => {
                        Outcome::RequeueAfter(std::time::Duration::from_secs(15))
                    }
                    _ => Outcome::Done,
                };
                self.write_status(&obj, result.phase, result.message, Some(result.managed))
                    .await?;
                Ok(outcome)
            }
            Err(e) if e.is_conflict() => Ok(Outcome::Requeue),
            Err(e) => {
                let message = e.to_string();
                let retryable = !matches!(e, Error::Validation(_));
                self.write_status(&obj, DeploymentPhase::Failed, Some(message), None)
                    .await?;
                if retryable {
                    Err(e)
                } else {
                    // Config and validation failures sit in status until the
                    // spec changes.
                    Ok(Outcome::Done)
                }
            }
        }
    }

    async fn deploy(&self, obj: &AgentDeployment) -> Result<DeployResult> {
        let target = self.resolve_target(obj.spec.environment.as_deref()).await?;
        let entry = self.lookup_catalog(obj).await?;

        validate_publisher_identity(entry.meta_payload()).map_err(Error::Validation)?;

        let objects = translate(&entry, obj)?;

        let cluster = target.cluster();
        let mut managed = Vec::with_capacity(objects.len());
        for object in &objects {
            target.apply(object).await?;
            managed.push(object.managed_resource(cluster.clone()));
        }
        info!(
            deployment = %obj.name_any(),
            objects = managed.len(),
            cluster = cluster.as_deref().unwrap_or("local"),
            "runtime objects applied"
        );

        self.mark_catalog_managed(&entry).await?;

        let mut phase = DeploymentPhase::Running;
        let mut message = None;
        for resource in &managed {
            match target.readiness(resource).await? {
                Readiness::Ready => {}
                Readiness::NotReady(why) => {
                    phase = DeploymentPhase::Pending;
                    message = Some(format!("{}/{} not ready: {}", resource.kind, resource.name, why));
                    break;
                }
                Readiness::Missing => {
                    phase = DeploymentPhase::Pending;
                    message = Some(format!("waiting for {}/{}", resource.kind, resource.name));
                    break;
                }
            }
        }

        Ok(DeployResult {
            managed,
            phase,
            message,
        })
    }

    async fn resolve_target(&self, environment: Option<&str>) -> Result<Arc<dyn DeployTarget>> {
        let Some(environment) = environment.filter(|e| !e.is_empty()) else {
            return self.factory.local().await;
        };

        let env = self.find_environment(environment).await?.ok_or_else(|| {
            Error::Validation(format!("environment '{environment}' not found"))
        })?;
        if !env.deploy_enabled {
            return Err(Error::Validation(format!(
                "deployment disallowed for environment '{environment}'"
            )));
        }
        if let Some(url) = &env.tool_server_url {
            return self.factory.tool_server(url, Some(env.cluster.clone())).await;
        }
        self.factory.remote(&env).await
    }

    async fn find_environment(&self, name: &str) -> Result<Option<EnvironmentSpec>> {
        let configs = self.configs.list(None, &ListSelector::all()).await?;
        for config in configs {
            if let Some(env) = config.spec.environments.iter().find(|e| e.name == name) {
                return Ok(Some(env.clone()));
            }
        }
        Ok(None)
    }

    async fn lookup_catalog(&self, obj: &AgentDeployment) -> Result<CatalogEntry> {
        let spec = &obj.spec;
        let selector = ListSelector::by_index(fields::SPEC_NAME, &spec.resource_name);
        match spec.resource_type {
            DeployResourceType::Mcp => {
                let matches = self.servers.list(None, &selector).await?;
                matches
                    .into_iter()
                    .find(|s| s.spec.version == spec.version)
                    .map(CatalogEntry::Server)
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "catalog entry not found: MCP {}@{}",
                            spec.resource_name, spec.version
                        ))
                    })
            }
            DeployResourceType::Agent => {
                let matches = self.agents.list(None, &selector).await?;
                matches
                    .into_iter()
                    .find(|a| a.spec.version == spec.version)
                    .map(CatalogEntry::Agent)
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "catalog entry not found: Agent {}@{}",
                            spec.resource_name, spec.version
                        ))
                    })
            }
        }
    }

    /// Flip the catalog entry to `managed` on the first successful
    /// translation; later reconciles leave it alone.
    async fn mark_catalog_managed(&self, entry: &CatalogEntry) -> Result<()> {
        match entry {
            CatalogEntry::Server(server) => {
                if server.status.as_ref().and_then(|s| s.management_type)
                    == Some(ManagementType::Managed)
                {
                    return Ok(());
                }
                let namespace = server.namespace().unwrap_or_default();
                if let Some(mut fresh) = self.servers.get(&namespace, &server.name_any()).await? {
                    fresh.catalog_status_mut().management_type = Some(ManagementType::Managed);
                    self.servers.update_status(&fresh).await?;
                }
            }
            CatalogEntry::Agent(agent) => {
                if agent.status.as_ref().and_then(|s| s.management_type)
                    == Some(ManagementType::Managed)
                {
                    return Ok(());
                }
                let namespace = agent.namespace().unwrap_or_default();
                if let Some(mut fresh) = self.agents.get(&namespace, &agent.name_any()).await? {
                    fresh.catalog_status_mut().management_type = Some(ManagementType::Managed);
                    self.agents.update_status(&fresh).await?;
                }
            }
        }
        Ok(())
    }

    /// Deletion: remove every managed object through the same channel, then
    /// release the finalizer. Delete failures are logged and the finalizer
    /// is still removed; an orphan beats a record stuck forever.
    async fn finalize(&self, obj: &AgentDeployment) -> Result<Outcome> {
        if !obj.finalizers().iter().any(|f| f == finalizers::DEPLOYMENT) {
            return Ok(Outcome::Done);
        }

        let target = match self.resolve_target(obj.spec.environment.as_deref()).await {
            Ok(target) => target,
            Err(e) => {
                warn!(deployment = %obj.name_any(), error = %e, "target resolution failed during delete, using local store");
                self.factory.local().await?
            }
        };

        let managed = obj
            .status
            .as_ref()
            .map(|s| s.managed_resources.clone())
            .unwrap_or_default();
        let mut orphans = Vec::new();
        for resource in &managed {
            match target.delete(resource).await {
                Ok(()) => {
                    debug!(kind = %resource.kind, name = %resource.name, "managed object deleted");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!(kind = %resource.kind, name = %resource.name, error = %e, "managed object delete failed");
                    orphans.push(format!("{}/{}", resource.kind, resource.name));
                }
            }
        }
        if !orphans.is_empty() {
            error!(deployment = %obj.name_any(), orphans = %orphans.join(", "), "orphaned managed objects left behind");
        }

        let namespace = obj.namespace().unwrap_or_default();
        let remaining: Vec<String> = obj
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizers::DEPLOYMENT)
            .cloned()
            .collect();
        self.deployments
            .set_finalizers(&namespace, &obj.name_any(), remaining)
            .await?;
        info!(deployment = %obj.name_any(), "deployment finalized");
        Ok(Outcome::Done)
    }

    async fn write_status(
        &self,
        obj: &AgentDeployment,
        phase: DeploymentPhase,
        message: Option<String>,
        managed: Option<Vec<ManagedResource>>,
    ) -> Result<()> {
        let namespace = obj.namespace().unwrap_or_default();
        let Some(mut fresh) = self.deployments.get(&namespace, &obj.name_any()).await? else {
            return Ok(());
        };
        let now = Utc::now();
        let previous = fresh.status.clone().unwrap_or_default();
        let managed_resources = managed.unwrap_or_else(|| previous.managed_resources.clone());
        let mut status = AgentDeploymentStatus {
            phase: Some(phase),
            message,
            deployed_at: previous
                .deployed_at
                .or_else(|| (!managed_resources.is_empty()).then_some(now)),
            managed_resources,
            updated_at: previous.updated_at,
            observed_generation: fresh.meta().generation,
        };
        if fresh.status.as_ref() == Some(&status) {
            return Ok(());
        }
        status.updated_at = Some(now);
        fresh.status = Some(status);
        match self.deployments.update_status(&fresh).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(Error::Conflict),
            Err(e) => Err(e),
        }
    }
}

/// Publisher-identity gate: the catalog entry's opaque metadata must carry a
/// nested attestation object declaring both verification flags true.
pub fn validate_publisher_identity(
    meta: Option<&serde_json::Value>,
) -> std::result::Result<(), String> {
    let Some(meta) = meta else {
        return Err("catalog entry carries no publisher metadata".to_string());
    };
    let Some(attestation) = find_attestation(meta) else {
        return Err("publisher identity attestation not found in metadata".to_string());
    };
    if attestation.get(ORG_VERIFIED_FLAG).and_then(serde_json::Value::as_bool) != Some(true) {
        return Err(format!("publisher identity check failed: {ORG_VERIFIED_FLAG} is not true"));
    }
    if attestation.get(JWT_VERIFIED_FLAG).and_then(serde_json::Value::as_bool) != Some(true) {
        return Err(format!("publisher identity check failed: {JWT_VERIFIED_FLAG} is not true"));
    }
    Ok(())
}

/// Depth-first search for the nested object declaring either flag.
fn find_attestation(value: &serde_json::Value) -> Option<&serde_json::Map<String, serde_json::Value>> {
    let obj = value.as_object()?;
    if obj.contains_key(ORG_VERIFIED_FLAG) || obj.contains_key(JWT_VERIFIED_FLAG) {
        return Some(obj);
    }
    obj.values().find_map(find_attestation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{catalog_indexes, deployment_indexes, FieldIndexes};
    use crate::store::MemStore;
    use agentregistry_api::catalog::{McpServerSpec, PackageSpec, PackageTransport, RegistryType};
    use agentregistry_api::deployment::AgentDeploymentSpec;
    use agentregistry_api::runtime::RuntimeObject;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    type ObjectKey = (String, String, String);

    /// In-memory target recording applies and simulating readiness.
    #[derive(Default)]
    struct MemTarget {
        applied: Mutex<HashMap<ObjectKey, RuntimeObject>>,
        ready: Mutex<HashSet<ObjectKey>>,
        fail_deletes: Mutex<HashSet<String>>,
    }

    impl MemTarget {
        fn mark_all_ready(&self) {
            let applied = self.applied.lock();
            let mut ready = self.ready.lock();
            for key in applied.keys() {
                ready.insert(key.clone());
            }
        }

        fn len(&self) -> usize {
            self.applied.lock().len()
        }
    }

    fn key_of(resource: &ManagedResource) -> ObjectKey {
        (resource.kind.clone(), resource.namespace.clone(), resource.name.clone())
    }

    #[async_trait]
    impl DeployTarget for MemTarget {
        fn cluster(&self) -> Option<String> {
            Some("test-cluster".to_string())
        }

        async fn apply(&self, obj: &RuntimeObject) -> Result<()> {
            self.applied
                .lock()
                .insert((obj.kind(), obj.namespace(), obj.name()), obj.clone());
            Ok(())
        }

        async fn delete(&self, resource: &ManagedResource) -> Result<()> {
            if self.fail_deletes.lock().contains(&resource.name) {
                return Err(Error::Validation("delete refused".to_string()));
            }
            self.applied.lock().remove(&key_of(resource));
            Ok(())
        }

        async fn readiness(&self, resource: &ManagedResource) -> Result<Readiness> {
            let key = key_of(resource);
            if !self.applied.lock().contains_key(&key) {
                return Ok(Readiness::Missing);
            }
            if resource.kind == "ConfigMap" || self.ready.lock().contains(&key) {
                Ok(Readiness::Ready)
            } else {
                Ok(Readiness::NotReady("Ready condition not True".to_string()))
            }
        }
    }

    struct MemFactory {
        target: Arc<MemTarget>,
    }

    #[async_trait]
    impl DeployTargetFactory for MemFactory {
        async fn local(&self) -> Result<Arc<dyn DeployTarget>> {
            Ok(self.target.clone())
        }

        async fn remote(&self, _env: &EnvironmentSpec) -> Result<Arc<dyn DeployTarget>> {
            Ok(self.target.clone())
        }

        async fn tool_server(
            &self,
            _url: &str,
            _cluster: Option<String>,
        ) -> Result<Arc<dyn DeployTarget>> {
            Ok(self.target.clone())
        }
    }

    fn verified_meta() -> serde_json::Value {
        json!({
            "io.modelcontextprotocol.registry/official": {
                "org_is_verified": true,
                "publisher_identity_verified_by_jwt": true
            }
        })
    }

    fn npm_catalog() -> McpServer {
        let mut obj = McpServer::new(
            "srv-1-0-0",
            McpServerSpec {
                name: "srv".to_string(),
                version: "1.0.0".to_string(),
                title: None,
                description: None,
                packages: vec![PackageSpec {
                    registry_type: RegistryType::Npm,
                    identifier: "@example/server".to_string(),
                    version: Some("1.0".to_string()),
                    runtime_hint: None,
                    transport: PackageTransport::default(),
                    runtime_arguments: Vec::new(),
                    package_arguments: Vec::new(),
                    environment_variables: Vec::new(),
                }],
                remotes: Vec::new(),
                meta: Some(verified_meta()),
                source_ref: None,
            },
        );
        obj.metadata.namespace = Some("agentregistry-system".to_string());
        obj
    }

    fn mcp_deployment(name: &str, environment: Option<&str>) -> AgentDeployment {
        let mut obj = AgentDeployment::new(
            name,
            AgentDeploymentSpec {
                resource_name: "srv".to_string(),
                version: "1.0.0".to_string(),
                resource_type: DeployResourceType::Mcp,
                runtime: Default::default(),
                environment: environment.map(str::to_string),
                namespace: Some("default".to_string()),
                config: Default::default(),
                prefer_remote: false,
            },
        );
        obj.metadata.namespace = Some("agentregistry-system".to_string());
        obj
    }

    struct Fixture {
        reconciler: DeploymentReconciler,
        deployments: Arc<MemStore<AgentDeployment>>,
        servers: Arc<MemStore<McpServer>>,
        configs: Arc<MemStore<DiscoveryConfig>>,
        target: Arc<MemTarget>,
    }

    fn fixture() -> Fixture {
        let deployments: Arc<MemStore<AgentDeployment>> =
            Arc::new(MemStore::new(Arc::new(deployment_indexes())));
        let servers: Arc<MemStore<McpServer>> =
            Arc::new(MemStore::new(Arc::new(catalog_indexes::<McpServer>())));
        let agents: Arc<MemStore<Agent>> =
            Arc::new(MemStore::new(Arc::new(catalog_indexes::<Agent>())));
        let configs: Arc<MemStore<DiscoveryConfig>> =
            Arc::new(MemStore::new(Arc::new(FieldIndexes::new())));
        let target = Arc::new(MemTarget::default());
        let reconciler = DeploymentReconciler {
            deployments: deployments.clone(),
            servers: servers.clone(),
            agents,
            configs: configs.clone(),
            factory: Arc::new(MemFactory { target: target.clone() }),
        };
        Fixture {
            reconciler,
            deployments,
            servers,
            configs,
            target,
        }
    }

    async fn reconcile_until_settled(fixture: &Fixture, name: &str) -> Outcome {
        for _ in 0..6 {
            match fixture
                .reconciler
                .reconcile("agentregistry-system", name)
                .await
                .unwrap()
            {
                Outcome::Requeue => continue,
                other => return other,
            }
        }
        panic!("deployment reconcile did not settle");
    }

    #[tokio::test]
    async fn deployment_lifecycle_reaches_running_and_garbage_collects() {
        let fixture = fixture();
        fixture.servers.create(&npm_catalog()).await.unwrap();
        fixture
            .deployments
            .create(&mcp_deployment("srv-deploy", None))
            .await
            .unwrap();

        // First pass applies the objects and waits for readiness.
        let outcome = reconcile_until_settled(&fixture, "srv-deploy").await;
        assert!(matches!(outcome, Outcome::RequeueAfter(_)));
        let record = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        let status = record.status.as_ref().unwrap();
        assert_eq!(status.phase, Some(DeploymentPhase::Pending));
        assert_eq!(status.managed_resources.len(), 1);
        assert_eq!(status.managed_resources[0].kind, "MCPServer");
        assert_eq!(status.managed_resources[0].cluster.as_deref(), Some("test-cluster"));
        assert_eq!(fixture.target.len(), 1);

        // The catalog entry flipped to managed on the first translation.
        let catalog = fixture
            .servers
            .get("agentregistry-system", "srv-1-0-0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            catalog.status.unwrap().management_type,
            Some(ManagementType::Managed)
        );

        // Readiness turns the phase Running.
        fixture.target.mark_all_ready();
        reconcile_until_settled(&fixture, "srv-deploy").await;
        let record = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status.as_ref().unwrap().phase, Some(DeploymentPhase::Running));

        // Deleting the record removes every managed object and releases the
        // finalizer.
        fixture
            .deployments
            .delete("agentregistry-system", "srv-deploy")
            .await
            .unwrap();
        reconcile_until_settled(&fixture, "srv-deploy").await;
        assert_eq!(fixture.target.len(), 0);
        assert!(fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_publisher_identity_blocks_deployment() {
        let fixture = fixture();
        let mut unverified = npm_catalog();
        unverified.spec.meta = Some(json!({
            "io.modelcontextprotocol.registry/official": {
                "org_is_verified": true
            }
        }));
        fixture.servers.create(&unverified).await.unwrap();
        fixture
            .deployments
            .create(&mcp_deployment("srv-deploy", None))
            .await
            .unwrap();

        let outcome = reconcile_until_settled(&fixture, "srv-deploy").await;
        assert_eq!(outcome, Outcome::Done);
        let record = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        let status = record.status.unwrap();
        assert_eq!(status.phase, Some(DeploymentPhase::Failed));
        assert!(status
            .message
            .unwrap()
            .contains("publisher_identity_verified_by_jwt"));
        assert_eq!(fixture.target.len(), 0);
    }

    #[tokio::test]
    async fn unknown_environment_fails_without_retry() {
        let fixture = fixture();
        fixture.servers.create(&npm_catalog()).await.unwrap();
        fixture
            .deployments
            .create(&mcp_deployment("srv-deploy", Some("staging")))
            .await
            .unwrap();

        let outcome = reconcile_until_settled(&fixture, "srv-deploy").await;
        assert_eq!(outcome, Outcome::Done);
        let record = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        let status = record.status.unwrap();
        assert_eq!(status.phase, Some(DeploymentPhase::Failed));
        assert!(status.message.unwrap().contains("staging"));
    }

    #[tokio::test]
    async fn disabled_environment_refuses_deployment() {
        let fixture = fixture();
        fixture.servers.create(&npm_catalog()).await.unwrap();
        let mut config = DiscoveryConfig::new(
            "main",
            serde_json::from_value(json!({
                "environments": [{
                    "name": "prod",
                    "cluster": "prod-cluster",
                    "deployEnabled": false
                }]
            }))
            .unwrap(),
        );
        config.metadata.namespace = Some("agentregistry-system".to_string());
        fixture.configs.create(&config).await.unwrap();
        fixture
            .deployments
            .create(&mcp_deployment("srv-deploy", Some("prod")))
            .await
            .unwrap();

        reconcile_until_settled(&fixture, "srv-deploy").await;
        let record = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        assert!(record
            .status
            .unwrap()
            .message
            .unwrap()
            .contains("disallowed"));
    }

    #[tokio::test]
    async fn delete_failures_do_not_block_the_finalizer() {
        let fixture = fixture();
        fixture.servers.create(&npm_catalog()).await.unwrap();
        fixture
            .deployments
            .create(&mcp_deployment("srv-deploy", None))
            .await
            .unwrap();
        reconcile_until_settled(&fixture, "srv-deploy").await;

        fixture.target.fail_deletes.lock().insert("srv".to_string());
        fixture
            .deployments
            .delete("agentregistry-system", "srv-deploy")
            .await
            .unwrap();
        reconcile_until_settled(&fixture, "srv-deploy").await;

        // The orphan stays behind but the record is gone.
        assert_eq!(fixture.target.len(), 1);
        assert!(fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn repeated_reconciles_do_not_churn_status() {
        let fixture = fixture();
        fixture.servers.create(&npm_catalog()).await.unwrap();
        fixture
            .deployments
            .create(&mcp_deployment("srv-deploy", None))
            .await
            .unwrap();
        reconcile_until_settled(&fixture, "srv-deploy").await;
        fixture.target.mark_all_ready();
        reconcile_until_settled(&fixture, "srv-deploy").await;

        let before = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        let managed_before = before.status.as_ref().unwrap().managed_resources.clone();

        reconcile_until_settled(&fixture, "srv-deploy").await;
        let after = fixture
            .deployments
            .get("agentregistry-system", "srv-deploy")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status.as_ref().unwrap().managed_resources, managed_before);
        assert_eq!(after.status.as_ref().unwrap().phase, Some(DeploymentPhase::Running));
    }

    #[test]
    fn publisher_identity_messages_name_the_missing_flag() {
        assert!(validate_publisher_identity(None).is_err());
        let err = validate_publisher_identity(Some(&json!({"unrelated": 1}))).unwrap_err();
        assert!(err.contains("attestation not found"));

        let err = validate_publisher_identity(Some(&json!({
            "official": {"publisher_identity_verified_by_jwt": true}
        })))
        .unwrap_err();
        assert!(err.contains(ORG_VERIFIED_FLAG));

        let err = validate_publisher_identity(Some(&json!({
            "official": {"org_is_verified": true, "publisher_identity_verified_by_jwt": false}
        })))
        .unwrap_err();
        assert!(err.contains(JWT_VERIFIED_FLAG));

        assert!(validate_publisher_identity(Some(&verified_meta())).is_ok());
    }
}
