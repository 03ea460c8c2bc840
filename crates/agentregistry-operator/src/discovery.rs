//! Discovery-config reconciler: materializes the set of active remote
//! watchers from the config spec and routes observations into the shadow
//! writer.

use crate::cache::RemoteObject;
use crate::catalog::Outcome;
use crate::error::{Error, Result};
use crate::shadow::ShadowWriter;
use crate::store::{ObjectStore, StoredObject};
use agentregistry_api::conditions::{upsert, Condition};
use agentregistry_api::discovery::{DiscoveryConfig, DiscoveryConfigStatus, EnvironmentSpec};
use agentregistry_api::runtime;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identity of one active watcher: (config, environment, namespace, kind).
pub type WatcherKey = (String, String, String, String);

/// Handle to a running watcher task.
pub struct WatcherHandle {
    cancel: CancellationToken,
    synced: Arc<AtomicBool>,
}

impl WatcherHandle {
    /// Whether the initial list-sync completed.
    pub fn is_healthy(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }
}

/// Starts the long-lived watch task for one key. Production uses
/// [`KubeWatcherSpawner`]; tests record the keys instead.
#[async_trait]
pub trait WatcherSpawner: Send + Sync {
    async fn spawn(
        &self,
        key: WatcherKey,
        env: EnvironmentSpec,
        writer: Arc<ShadowWriter>,
        cancel: CancellationToken,
        synced: Arc<AtomicBool>,
    ) -> Result<()>;
}

/// Builds clients for the clusters environments point at.
#[async_trait]
pub trait RemoteClusterClients: Send + Sync {
    async fn client_for(&self, env: &EnvironmentSpec) -> Result<Client>;
}

/// Reconciler owning the watcher map. The map's lock and the error
/// tracker's lock are never held at once.
pub struct DiscoveryReconciler {
    pub configs: Arc<dyn ObjectStore<DiscoveryConfig>>,
    pub writer: Arc<ShadowWriter>,
    pub spawner: Arc<dyn WatcherSpawner>,
    watchers: Mutex<HashMap<WatcherKey, WatcherHandle>>,
}

impl DiscoveryReconciler {
    pub fn new(
        configs: Arc<dyn ObjectStore<DiscoveryConfig>>,
        writer: Arc<ShadowWriter>,
        spawner: Arc<dyn WatcherSpawner>,
    ) -> Self {
        Self {
            configs,
            writer,
            spawner,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(config) = self.configs.get(namespace, name).await? else {
            self.teardown_config(name);
            return Ok(Outcome::Done);
        };
        if config.metadata.deletion_timestamp.is_some() {
            self.teardown_config(name);
            return Ok(Outcome::Done);
        }

        let mut desired: HashMap<WatcherKey, EnvironmentSpec> = HashMap::new();
        for env in &config.spec.environments {
            for ns in &env.namespaces {
                for resource_type in env.effective_resource_types() {
                    let key = (
                        name.to_string(),
                        env.name.clone(),
                        ns.clone(),
                        resource_type.kind().to_string(),
                    );
                    desired.insert(key, env.clone());
                }
            }
        }

        // Stop watchers this config no longer implies; leave active ones
        // alone.
        let to_start: Vec<(WatcherKey, EnvironmentSpec)> = {
            let mut watchers = self.watchers.lock();
            let stale: Vec<WatcherKey> = watchers
                .keys()
                .filter(|key| key.0 == name && !desired.contains_key(*key))
                .cloned()
                .collect();
            for key in stale {
                if let Some(handle) = watchers.remove(&key) {
                    handle.cancel.cancel();
                    info!(?key, "watcher stopped");
                }
            }
            desired
                .into_iter()
                .filter(|(key, _)| !watchers.contains_key(key))
                .collect()
        };

        for (key, env) in to_start {
            let cancel = CancellationToken::new();
            let synced = Arc::new(AtomicBool::new(false));
            self.spawner
                .spawn(
                    key.clone(),
                    env,
                    self.writer.clone(),
                    cancel.clone(),
                    synced.clone(),
                )
                .await?;
            info!(?key, "watcher started");
            self.watchers
                .lock()
                .insert(key, WatcherHandle { cancel, synced });
        }

        // Surface sync state on the record.
        let mut updated = config.clone();
        let mut status = updated.status.clone().unwrap_or(DiscoveryConfigStatus {
            last_sync_time: None,
            conditions: Vec::new(),
        });
        status.last_sync_time = Some(Utc::now());
        upsert(&mut status.conditions, Condition::ready(Utc::now()));
        updated.status = Some(status);
        match self.configs.update_status(&updated).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => return Ok(Outcome::Requeue),
            Err(e) => return Err(e),
        }

        Ok(Outcome::Done)
    }

    /// Drop every watcher belonging to a config.
    pub fn teardown_config(&self, config_name: &str) {
        let mut watchers = self.watchers.lock();
        let keys: Vec<WatcherKey> = watchers
            .keys()
            .filter(|key| key.0 == config_name)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = watchers.remove(&key) {
                handle.cancel.cancel();
                info!(?key, "watcher stopped");
            }
        }
    }

    /// Drop every watcher; used on operator shutdown.
    pub fn teardown_all(&self) {
        let mut watchers = self.watchers.lock();
        for (key, handle) in watchers.drain() {
            handle.cancel.cancel();
            debug!(?key, "watcher stopped");
        }
    }

    pub fn active_keys(&self) -> Vec<WatcherKey> {
        self.watchers.lock().keys().cloned().collect()
    }

    pub fn healthy_keys(&self) -> Vec<WatcherKey> {
        self.watchers
            .lock()
            .iter()
            .filter(|(_, handle)| handle.is_healthy())
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Production spawner: one list+watch task per key against the environment's
/// cluster.
pub struct KubeWatcherSpawner {
    pub clients: Arc<dyn RemoteClusterClients>,
}

#[async_trait]
impl WatcherSpawner for KubeWatcherSpawner {
    async fn spawn(
        &self,
        key: WatcherKey,
        env: EnvironmentSpec,
        writer: Arc<ShadowWriter>,
        cancel: CancellationToken,
        synced: Arc<AtomicBool>,
    ) -> Result<()> {
        let client = self.clients.client_for(&env).await?;
        let (_, _, namespace, kind) = key.clone();
        match kind.as_str() {
            "MCPServer" => {
                let api: Api<runtime::MCPServer> = Api::namespaced(client, &namespace);
                tokio::spawn(run_watch(api, env, writer, cancel, synced, convert_server));
            }
            "Agent" => {
                let api: Api<runtime::Agent> = Api::namespaced(client, &namespace);
                tokio::spawn(run_watch(api, env, writer, cancel, synced, convert_agent));
            }
            "ModelConfig" => {
                let api: Api<runtime::ModelConfig> = Api::namespaced(client, &namespace);
                tokio::spawn(run_watch(api, env, writer, cancel, synced, convert_model));
            }
            other => {
                return Err(Error::Validation(format!("unwatchable resource type: {other}")));
            }
        }
        Ok(())
    }
}

async fn run_watch<R, F>(
    api: Api<R>,
    env: EnvironmentSpec,
    writer: Arc<ShadowWriter>,
    cancel: CancellationToken,
    synced: Arc<AtomicBool>,
    convert: F,
) where
    R: StoredObject,
    F: Fn(&R) -> RemoteObject + Send + Sync + 'static,
{
    let stream = watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(env = %env.name, "watch cancelled");
                return;
            }
            item = stream.next() => match item {
                Some(Ok(watcher::Event::Init)) => {}
                Some(Ok(watcher::Event::InitDone)) => {
                    synced.store(true, Ordering::Relaxed);
                }
                Some(Ok(watcher::Event::InitApply(obj))) | Some(Ok(watcher::Event::Apply(obj))) => {
                    writer.observe(&env, convert(&obj));
                }
                Some(Ok(watcher::Event::Delete(obj))) => {
                    let remote = convert(&obj);
                    writer.observe_delete(&remote.kind, &remote.namespace, &remote.name);
                }
                Some(Err(e)) => {
                    // The watcher stream restarts itself; failures here are
                    // transient remote errors.
                    warn!(env = %env.name, error = %e, "watch error");
                }
                None => {
                    warn!(env = %env.name, "watch stream ended");
                    return;
                }
            }
        }
    }
}

fn base_remote<R: StoredObject>(kind: &str, obj: &R) -> RemoteObject {
    RemoteObject {
        kind: kind.to_string(),
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
        labels: obj.labels().clone(),
        annotations: obj.annotations().clone(),
        image: None,
        transport: None,
        provider: None,
        model: None,
        base_url: None,
        ready: false,
        message: None,
    }
}

fn convert_server(obj: &runtime::MCPServer) -> RemoteObject {
    let mut remote = base_remote("MCPServer", obj);
    remote.image = Some(obj.spec.deployment.image.clone());
    remote.transport = Some(obj.spec.transport);
    remote.ready = obj.status.as_ref().map(|s| s.is_ready()).unwrap_or(false);
    remote.message = obj.status.as_ref().and_then(|s| s.not_ready_message());
    remote
}

fn convert_agent(obj: &runtime::Agent) -> RemoteObject {
    let mut remote = base_remote("Agent", obj);
    remote.image = Some(obj.spec.image.clone());
    remote.ready = obj.status.as_ref().map(|s| s.is_ready()).unwrap_or(false);
    remote.message = obj.status.as_ref().and_then(|s| s.not_ready_message());
    remote
}

fn convert_model(obj: &runtime::ModelConfig) -> RemoteObject {
    let mut remote = base_remote("ModelConfig", obj);
    remote.provider = obj.spec.provider.clone();
    remote.model = Some(obj.spec.model.clone());
    remote.base_url = obj.spec.base_url.clone();
    remote.ready = obj.status.as_ref().map(|s| s.is_ready()).unwrap_or(true);
    remote
}

/// Client factory over kubeconfigs stored in secrets; environments without
/// a secret use the local cluster.
pub struct KubeRemoteClients {
    pub local: Client,
    pub controller_namespace: String,
}

#[async_trait]
impl RemoteClusterClients for KubeRemoteClients {
    async fn client_for(&self, env: &EnvironmentSpec) -> Result<Client> {
        let Some(secret_name) = &env.kubeconfig_secret_ref else {
            return Ok(self.local.clone());
        };
        let secrets: Api<k8s_openapi::api::core::v1::Secret> =
            Api::namespaced(self.local.clone(), &self.controller_namespace);
        let secret = secrets.get(secret_name).await?;
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get("kubeconfig"))
            .ok_or_else(|| {
                Error::TargetResolution(format!(
                    "secret '{secret_name}' has no 'kubeconfig' key"
                ))
            })?;
        let raw = String::from_utf8(data.0.clone()).map_err(|_| {
            Error::TargetResolution(format!("secret '{secret_name}' kubeconfig is not UTF-8"))
        })?;
        let kubeconfig = kube::config::Kubeconfig::from_yaml(&raw)
            .map_err(|e| Error::TargetResolution(format!("invalid kubeconfig: {e}")))?;
        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &kube::config::KubeConfigOptions::default(),
        )
        .await
        .map_err(|e| Error::TargetResolution(format!("kubeconfig for '{}': {e}", env.name)))?;
        Client::try_from(config)
            .map_err(|e| Error::TargetResolution(format!("client for '{}': {e}", env.name)))
    }
}
