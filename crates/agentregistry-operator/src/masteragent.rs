//! Master-agent reconciler: owns the event hub, world state and pipeline,
//! keyed on the resolved model identity, and flushes world-state snapshots
//! into the config record's status.

use crate::catalog::Outcome;
use crate::error::{Error, Result};
use crate::index::fields;
use crate::store::{ListSelector, ObjectStore};
use agentregistry_agent::a2a::A2aClient;
use agentregistry_agent::events::EventHub;
use agentregistry_agent::llm::{ChatModel, LlmConfig, OpenAiChatModel};
use agentregistry_agent::mcp::{register_endpoint_tools, McpEndpointClient};
use agentregistry_agent::pipeline::{MasterAgentPipeline, PipelineConfig, SchedulingMode};
use agentregistry_agent::tools::{register_builtin_tools, ToolRegistry};
use agentregistry_agent::world::WorldState;
use agentregistry_api::catalog::{Agent, Model};
use agentregistry_api::conditions::{upsert, Condition};
use agentregistry_api::masteragent::{
    default_a2a_port, IncidentStatus, MasterAgentConfig, MasterAgentStatus,
};
use agentregistry_api::version::{find_latest, Candidate};
use chrono::Utc;
use kube::ResourceExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cadence of the status flush into the config record.
pub const STATUS_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Builds the chat model for a resolved endpoint; tests substitute stubs.
pub trait ChatModelFactory: Send + Sync {
    fn build(&self, config: LlmConfig) -> Arc<dyn ChatModel>;
}

/// Production factory over the OpenAI-compatible client.
pub struct OpenAiModelFactory;

impl ChatModelFactory for OpenAiModelFactory {
    fn build(&self, config: LlmConfig) -> Arc<dyn ChatModel> {
        Arc::new(OpenAiChatModel::new(config))
    }
}

/// Accessors handed to the external REST handler.
#[derive(Clone)]
pub struct MasterAgentHandles {
    pub hub: Arc<EventHub>,
    pub world: Arc<WorldState>,
}

struct RunningAgent {
    identity: String,
    hub: Arc<EventHub>,
    world: Arc<WorldState>,
    pipeline: Arc<MasterAgentPipeline>,
    cancel: CancellationToken,
}

impl Drop for RunningAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct MasterAgentReconciler {
    pub configs: Arc<dyn ObjectStore<MasterAgentConfig>>,
    pub models: Arc<dyn ObjectStore<Model>>,
    pub agents: Arc<dyn ObjectStore<Agent>>,
    pub model_factory: Arc<dyn ChatModelFactory>,
    /// Host advertised for the embedded A2A endpoint.
    pub advertise_host: String,
    running: Mutex<Option<RunningAgent>>,
}

impl MasterAgentReconciler {
    pub fn new(
        configs: Arc<dyn ObjectStore<MasterAgentConfig>>,
        models: Arc<dyn ObjectStore<Model>>,
        agents: Arc<dyn ObjectStore<Agent>>,
        model_factory: Arc<dyn ChatModelFactory>,
        advertise_host: String,
    ) -> Self {
        Self {
            configs,
            models,
            agents,
            model_factory,
            advertise_host,
            running: Mutex::new(None),
        }
    }

    /// Handles for the REST façade; `None` while the agent is disabled.
    pub fn handles(&self) -> Option<MasterAgentHandles> {
        self.running.lock().as_ref().map(|running| MasterAgentHandles {
            hub: running.hub.clone(),
            world: running.world.clone(),
        })
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(config) = self.configs.get(namespace, name).await? else {
            self.teardown();
            return Ok(Outcome::Done);
        };
        if config.metadata.deletion_timestamp.is_some() || !config.spec.enabled {
            self.teardown();
            return Ok(Outcome::Done);
        }

        let model = match self.resolve_model(namespace, &config.spec.model_ref).await? {
            Ok(model) => model,
            Err(reason) => {
                self.teardown();
                self.write_failure_status(&config, &reason).await?;
                return Ok(Outcome::Done);
            }
        };

        let identity = format!(
            "{}#{}",
            model.spec.base_url.as_deref().unwrap_or_default(),
            model.spec.model.as_deref().unwrap_or(&model.spec.name)
        );
        let needs_restart = {
            let running = self.running.lock();
            !matches!(running.as_ref(), Some(r) if r.identity == identity)
        };
        if needs_restart {
            self.teardown();
            self.start(&config, &model, identity, namespace, name).await?;
        }

        match self.flush_status(&config).await {
            Ok(()) => Ok(Outcome::RequeueAfter(STATUS_FLUSH_INTERVAL)),
            Err(e) if e.is_conflict() => Ok(Outcome::Requeue),
            Err(e) => Err(e),
        }
    }

    /// Resolve the default model by logical name; the inner result carries
    /// the user-visible failure reason.
    async fn resolve_model(
        &self,
        namespace: &str,
        model_ref: &str,
    ) -> Result<std::result::Result<Model, String>> {
        let candidates = self
            .models
            .list(Some(namespace), &ListSelector::by_index(fields::SPEC_NAME, model_ref))
            .await?;
        if candidates.is_empty() {
            return Ok(Err(format!("model '{model_ref}' not found in catalog")));
        }
        let keys: Vec<Candidate<'_>> = candidates
            .iter()
            .map(|m| Candidate {
                version: m.spec.version.as_str(),
                published_at: m.status.as_ref().and_then(|s| s.published_at),
            })
            .collect();
        let winner = find_latest(&keys).map(|idx| candidates[idx].clone());
        let Some(model) = winner else {
            return Ok(Err(format!("model '{model_ref}' not found in catalog")));
        };
        if model.spec.base_url.as_deref().unwrap_or_default().is_empty() {
            return Ok(Err(format!("model '{model_ref}' has no base URL")));
        }
        Ok(Ok(model))
    }

    async fn start(
        &self,
        config: &MasterAgentConfig,
        model: &Model,
        identity: String,
        namespace: &str,
        name: &str,
    ) -> Result<()> {
        let hub = Arc::new(EventHub::default());
        let world = Arc::new(WorldState::new());

        // A2A directory: every agent catalog entry that advertises an
        // endpoint, snapshotted at start.
        let mut directory: HashMap<String, String> = HashMap::new();
        for agent in self.agents.list(Some(namespace), &ListSelector::all()).await? {
            if let Some(url) = &agent.spec.a2a_url {
                directory.insert(agent.spec.name.clone(), url.clone());
            }
        }

        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, world.clone(), A2aClient::new(), Arc::new(directory));

        // MCP endpoints contribute auto-discovered tools; an unreachable
        // endpoint is skipped, not fatal.
        for endpoint in &config.spec.mcp_endpoints {
            match McpEndpointClient::connect(&endpoint.name, &endpoint.url).await {
                Ok(client) => register_endpoint_tools(&mut registry, Arc::new(client)),
                Err(e) => {
                    warn!(endpoint = %endpoint.name, error = %e, "MCP endpoint unavailable, skipping");
                }
            }
        }

        let llm_config = LlmConfig::new(
            model.spec.base_url.clone().unwrap_or_default(),
            model
                .spec
                .model
                .clone()
                .unwrap_or_else(|| model.spec.name.clone()),
        );
        if let Some(secret) = &model.spec.api_key_secret_ref {
            debug!(secret = %secret, "model API key is supplied by the runtime environment");
        }
        let chat_model = self.model_factory.build(llm_config);

        let mode = match &config.spec.batch_triage {
            Some(triage) if triage.enabled => SchedulingMode::BatchTriage {
                queue_threshold: triage.queue_threshold.max(1),
                window: Duration::from_secs(triage.window_seconds.max(1)),
            },
            _ => SchedulingMode::PerEvent {
                workers: config.spec.max_concurrent_events.max(1),
            },
        };
        let pipeline = Arc::new(MasterAgentPipeline::new(
            hub.clone(),
            world.clone(),
            chat_model,
            Arc::new(registry),
            PipelineConfig {
                mode,
                system_prompt: config.spec.system_prompt.clone(),
            },
        ));

        let cancel = CancellationToken::new();
        tokio::spawn(pipeline.clone().run(cancel.child_token()));

        // Periodic flush keeps the status live between reconciles.
        {
            let configs = self.configs.clone();
            let hub = hub.clone();
            let world = world.clone();
            let pipeline = pipeline.clone();
            let namespace = namespace.to_string();
            let name = name.to_string();
            let flush_cancel = cancel.child_token();
            let a2a_endpoint = self.a2a_endpoint(config);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(STATUS_FLUSH_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = flush_cancel.cancelled() => return,
                        _ = ticker.tick() => {}
                    }
                    let Ok(Some(mut fresh)) = configs.get(&namespace, &name).await else {
                        continue;
                    };
                    let mut status = fresh.status.clone().unwrap_or_default();
                    apply_snapshot(&mut status, &hub, &world, pipeline.llm_available());
                    status.a2a_endpoint = a2a_endpoint.clone();
                    upsert(&mut status.conditions, Condition::ready(Utc::now()));
                    fresh.status = Some(status);
                    if let Err(e) = configs.update_status(&fresh).await {
                        if !e.is_conflict() {
                            warn!(error = %e, "status flush failed");
                        }
                    }
                }
            });
        }

        info!(identity = %identity, "master agent started");
        *self.running.lock() = Some(RunningAgent {
            identity,
            hub,
            world,
            pipeline,
            cancel,
        });
        Ok(())
    }

    /// Stop the running instance, if any. Workers finish their current tool
    /// loop and exit.
    pub fn teardown(&self) {
        if let Some(running) = self.running.lock().take() {
            info!(identity = %running.identity, "master agent stopped");
            // Cancellation happens in Drop.
            drop(running);
        }
    }

    fn a2a_endpoint(&self, config: &MasterAgentConfig) -> Option<String> {
        let a2a = config.spec.a2a.as_ref()?;
        if !a2a.enabled {
            return None;
        }
        let port = if a2a.port == 0 { default_a2a_port() } else { a2a.port };
        Some(format!("http://{}:{}", self.advertise_host, port))
    }

    async fn flush_status(&self, config: &MasterAgentConfig) -> Result<()> {
        let namespace = config.namespace().unwrap_or_default();
        let Some(mut fresh) = self.configs.get(&namespace, &config.name_any()).await? else {
            return Ok(());
        };
        let mut status = fresh.status.clone().unwrap_or_default();
        if let Some(running) = self.running.lock().as_ref() {
            apply_snapshot(
                &mut status,
                &running.hub,
                &running.world,
                running.pipeline.llm_available(),
            );
        }
        status.a2a_endpoint = self.a2a_endpoint(config);
        upsert(&mut status.conditions, Condition::ready(Utc::now()));
        fresh.status = Some(status);
        match self.configs.update_status(&fresh).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(Error::Conflict),
            Err(e) => Err(e),
        }
    }

    async fn write_failure_status(&self, config: &MasterAgentConfig, reason: &str) -> Result<()> {
        let namespace = config.namespace().unwrap_or_default();
        let Some(mut fresh) = self.configs.get(&namespace, &config.name_any()).await? else {
            return Ok(());
        };
        let mut status = fresh.status.clone().unwrap_or_default();
        status.llm_available = false;
        upsert(
            &mut status.conditions,
            Condition::not_ready("ModelUnavailable", reason, Utc::now()),
        );
        fresh.status = Some(status);
        match self.configs.update_status(&fresh).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn apply_snapshot(
    status: &mut MasterAgentStatus,
    hub: &EventHub,
    world: &WorldState,
    llm_available: bool,
) {
    let snapshot = world.to_status(hub.queue_depth());
    status.world_summary = Some(snapshot.summary);
    status.queue_depth = snapshot.pending_events;
    status.events_processed = snapshot.events_processed;
    status.llm_available = llm_available;
    status.last_updated = snapshot.last_updated;
    status.incidents = snapshot
        .incidents
        .into_iter()
        .map(|incident| IncidentStatus {
            id: incident.id,
            severity: incident.severity.to_string(),
            source: incident.source,
            summary: incident.summary,
            status: incident.status.to_string(),
            first_seen: incident.first_seen,
            last_seen: incident.last_seen,
            actions: incident.actions,
        })
        .collect();
}
