//! Apply/delete/readiness channels into a target cluster.
//!
//! The translator is pure; this is the sole I/O boundary, dispatched by a
//! one-of switch on target kind: direct store (server-side apply) or the
//! delegated tool-server.

use crate::error::{Error, Result};
use agentregistry_api::deployment::ManagedResource;
use agentregistry_api::runtime::{self, RuntimeObject};
use agentregistry_api::FIELD_OWNER;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::sync::Arc;

/// Observed state of one managed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
    Missing,
}

/// One write channel into a target cluster.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Cluster name recorded on managed resources, when known.
    fn cluster(&self) -> Option<String>;

    async fn apply(&self, obj: &RuntimeObject) -> Result<()>;

    /// Delete tolerates objects that are already gone.
    async fn delete(&self, resource: &ManagedResource) -> Result<()>;

    async fn readiness(&self, resource: &ManagedResource) -> Result<Readiness>;
}

/// Builds targets for the three channel kinds.
#[async_trait]
pub trait DeployTargetFactory: Send + Sync {
    async fn local(&self) -> Result<Arc<dyn DeployTarget>>;
    async fn remote(
        &self,
        env: &agentregistry_api::discovery::EnvironmentSpec,
    ) -> Result<Arc<dyn DeployTarget>>;
    async fn tool_server(&self, url: &str, cluster: Option<String>) -> Result<Arc<dyn DeployTarget>>;
}

/// Direct store channel: server-side apply with force ownership under the
/// fixed field owner.
pub struct KubeTarget {
    client: Client,
    cluster: Option<String>,
}

impl KubeTarget {
    pub fn new(client: Client, cluster: Option<String>) -> Self {
        Self { client, cluster }
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_OWNER).force()
    }
}

#[async_trait]
impl DeployTarget for KubeTarget {
    fn cluster(&self) -> Option<String> {
        self.cluster.clone()
    }

    async fn apply(&self, obj: &RuntimeObject) -> Result<()> {
        let namespace = obj.namespace();
        let name = obj.name();
        // The serialized form carries apiVersion/kind, as server-side
        // apply requires.
        let payload = obj.to_json()?;
        match obj {
            RuntimeObject::Server(_) => {
                let api: Api<runtime::MCPServer> = Api::namespaced(self.client.clone(), &namespace);
                api.patch(&name, &Self::apply_params(), &Patch::Apply(&payload)).await?;
            }
            RuntimeObject::Remote(_) => {
                let api: Api<runtime::RemoteMCPServer> =
                    Api::namespaced(self.client.clone(), &namespace);
                api.patch(&name, &Self::apply_params(), &Patch::Apply(&payload)).await?;
            }
            RuntimeObject::Agent(_) => {
                let api: Api<runtime::Agent> = Api::namespaced(self.client.clone(), &namespace);
                api.patch(&name, &Self::apply_params(), &Patch::Apply(&payload)).await?;
            }
            RuntimeObject::ConfigMap(_) => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &namespace);
                api.patch(&name, &Self::apply_params(), &Patch::Apply(&payload)).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, resource: &ManagedResource) -> Result<()> {
        let result = match resource.kind.as_str() {
            "MCPServer" => {
                let api: Api<runtime::MCPServer> =
                    Api::namespaced(self.client.clone(), &resource.namespace);
                api.delete(&resource.name, &Default::default()).await.map(|_| ())
            }
            "RemoteMCPServer" => {
                let api: Api<runtime::RemoteMCPServer> =
                    Api::namespaced(self.client.clone(), &resource.namespace);
                api.delete(&resource.name, &Default::default()).await.map(|_| ())
            }
            "Agent" => {
                let api: Api<runtime::Agent> =
                    Api::namespaced(self.client.clone(), &resource.namespace);
                api.delete(&resource.name, &Default::default()).await.map(|_| ())
            }
            "ConfigMap" => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &resource.namespace);
                api.delete(&resource.name, &Default::default()).await.map(|_| ())
            }
            other => {
                return Err(Error::Validation(format!("unmanageable kind: {other}")));
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn readiness(&self, resource: &ManagedResource) -> Result<Readiness> {
        match resource.kind.as_str() {
            "MCPServer" => {
                let api: Api<runtime::MCPServer> =
                    Api::namespaced(self.client.clone(), &resource.namespace);
                Ok(runtime_readiness(api.get_opt(&resource.name).await?.map(|o| o.status)))
            }
            "RemoteMCPServer" => {
                let api: Api<runtime::RemoteMCPServer> =
                    Api::namespaced(self.client.clone(), &resource.namespace);
                Ok(runtime_readiness(api.get_opt(&resource.name).await?.map(|o| o.status)))
            }
            "Agent" => {
                let api: Api<runtime::Agent> =
                    Api::namespaced(self.client.clone(), &resource.namespace);
                Ok(runtime_readiness(api.get_opt(&resource.name).await?.map(|o| o.status)))
            }
            // ConfigMap-like kinds are ready iff present.
            "ConfigMap" => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &resource.namespace);
                Ok(match api.get_opt(&resource.name).await? {
                    Some(_) => Readiness::Ready,
                    None => Readiness::Missing,
                })
            }
            other => Err(Error::Validation(format!("unmanageable kind: {other}"))),
        }
    }
}

fn runtime_readiness(status: Option<Option<runtime::RuntimeStatus>>) -> Readiness {
    match status {
        None => Readiness::Missing,
        Some(status) => {
            let status = status.unwrap_or_default();
            if status.is_ready() {
                Readiness::Ready
            } else {
                Readiness::NotReady(
                    status
                        .not_ready_message()
                        .unwrap_or_else(|| "Ready condition not True".to_string()),
                )
            }
        }
    }
}

/// Factory over the discovery plane's remote-client builder.
pub struct KubeDeployTargetFactory {
    pub local: Client,
    pub clients: Arc<dyn crate::discovery::RemoteClusterClients>,
}

#[async_trait]
impl DeployTargetFactory for KubeDeployTargetFactory {
    async fn local(&self) -> Result<Arc<dyn DeployTarget>> {
        Ok(Arc::new(KubeTarget::new(self.local.clone(), None)))
    }

    async fn remote(
        &self,
        env: &agentregistry_api::discovery::EnvironmentSpec,
    ) -> Result<Arc<dyn DeployTarget>> {
        let client = self.clients.client_for(env).await?;
        Ok(Arc::new(KubeTarget::new(client, Some(env.cluster.clone()))))
    }

    async fn tool_server(&self, url: &str, cluster: Option<String>) -> Result<Arc<dyn DeployTarget>> {
        let target = super::toolserver::ToolServerTarget::connect(url, cluster).await?;
        Ok(Arc::new(target))
    }
}
