//! Operator binary: wires the reconcile cores into `kube::runtime`
//! controllers and runs them until shutdown.

use agentregistry_api::catalog::{Agent, CatalogRecord, McpServer, Model, Skill};
use agentregistry_api::deployment::AgentDeployment;
use agentregistry_api::discovery::DiscoveryConfig;
use agentregistry_api::masteragent::MasterAgentConfig;
use agentregistry_operator::cache::DiscoveryCache;
use agentregistry_operator::catalog::{
    reconcile_catalog, AgentHooks, CatalogContext, CatalogHooks, NoHooks, Outcome,
};
use agentregistry_operator::deploy::target::KubeDeployTargetFactory;
use agentregistry_operator::deploy::DeploymentReconciler;
use agentregistry_operator::discovery::{
    DiscoveryReconciler, KubeRemoteClients, KubeWatcherSpawner, RemoteClusterClients,
};
use agentregistry_operator::error::Error;
use agentregistry_operator::index::{catalog_indexes, deployment_indexes, FieldIndexes};
use agentregistry_operator::masteragent::{MasterAgentReconciler, OpenAiModelFactory};
use agentregistry_operator::retry::ErrorTracker;
use agentregistry_operator::shadow::ShadowWriter;
use agentregistry_operator::store::{KubeStore, StoredObject};
use clap::Parser;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "agentregistry-operator", about = "Control plane for agentic-infrastructure catalogs")]
struct Args {
    /// Namespace where shadow catalog records are written.
    #[arg(long, env = "CONTROLLER_NAMESPACE", default_value = "agentregistry-system")]
    controller_namespace: String,

    /// Host advertised for the embedded A2A endpoint.
    #[arg(long, env = "A2A_ADVERTISE_HOST", default_value = "localhost")]
    a2a_advertise_host: String,

    /// Skip starting the discovery-config controller.
    #[arg(long, env = "DISABLE_DISCOVERY")]
    disable_discovery: bool,

    /// Skip starting the master-agent controller.
    #[arg(long, env = "DISABLE_MASTER_AGENT")]
    disable_master_agent: bool,
}

fn to_action(outcome: Outcome) -> Action {
    match outcome {
        // Periodic resync picks up cross-record drift the watches miss.
        Outcome::Done => {
            let jitter = rand::thread_rng().gen_range(0..60);
            Action::requeue(Duration::from_secs(300 + jitter))
        }
        Outcome::Requeue => Action::requeue(Duration::from_millis(100)),
        Outcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

struct CatalogCtx<K: StoredObject> {
    ctx: CatalogContext<K>,
    hooks: Box<dyn CatalogHooks<K>>,
}

async fn reconcile_catalog_kind<K>(obj: Arc<K>, ctx: Arc<CatalogCtx<K>>) -> Result<Action, Error>
where
    K: CatalogRecord + StoredObject,
{
    let namespace = obj.namespace().unwrap_or_default();
    let outcome = reconcile_catalog(&ctx.ctx, ctx.hooks.as_ref(), &namespace, &obj.name_any()).await?;
    Ok(to_action(outcome))
}

fn catalog_error_policy<K>(obj: Arc<K>, error: &Error, _ctx: Arc<CatalogCtx<K>>) -> Action
where
    K: CatalogRecord + StoredObject,
{
    if error.is_conflict() {
        return Action::requeue(Duration::from_millis(200));
    }
    warn!(kind = K::KIND_TAG, name = %obj.name_any(), error = %error, "reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

async fn run_catalog_controller<K>(client: Client, ctx: Arc<CatalogCtx<K>>)
where
    K: CatalogRecord + StoredObject,
{
    Controller::new(Api::<K>::all(client), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_catalog_kind::<K>, catalog_error_policy::<K>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((reference, _)) => debug!(object = %reference, "reconciled"),
                Err(e) => debug!(error = %e, "controller event error"),
            }
        })
        .await;
}

async fn reconcile_deployment(
    obj: Arc<AgentDeployment>,
    ctx: Arc<DeploymentReconciler>,
) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let outcome = ctx.reconcile(&namespace, &obj.name_any()).await?;
    Ok(to_action(outcome))
}

fn deployment_error_policy(
    obj: Arc<AgentDeployment>,
    error: &Error,
    _ctx: Arc<DeploymentReconciler>,
) -> Action {
    if error.is_conflict() {
        return Action::requeue(Duration::from_millis(200));
    }
    warn!(deployment = %obj.name_any(), error = %error, "deployment reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

async fn reconcile_discovery(
    obj: Arc<DiscoveryConfig>,
    ctx: Arc<DiscoveryReconciler>,
) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let outcome = ctx.reconcile(&namespace, &obj.name_any()).await?;
    Ok(to_action(outcome))
}

fn discovery_error_policy(
    obj: Arc<DiscoveryConfig>,
    error: &Error,
    _ctx: Arc<DiscoveryReconciler>,
) -> Action {
    warn!(config = %obj.name_any(), error = %error, "discovery reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

async fn reconcile_master_agent(
    obj: Arc<MasterAgentConfig>,
    ctx: Arc<MasterAgentReconciler>,
) -> Result<Action, Error> {
    let namespace = obj.namespace().unwrap_or_default();
    let outcome = ctx.reconcile(&namespace, &obj.name_any()).await?;
    Ok(to_action(outcome))
}

fn master_agent_error_policy(
    obj: Arc<MasterAgentConfig>,
    error: &Error,
    _ctx: Arc<MasterAgentReconciler>,
) -> Action {
    warn!(config = %obj.name_any(), error = %error, "master-agent reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agentregistry_operator=debug")),
        )
        .init();

    let args = Args::parse();
    info!(
        controller_namespace = %args.controller_namespace,
        "starting agentregistry operator"
    );

    let client = Client::try_default().await?;

    // Field indexes must exist before the first reconciliation.
    let server_indexes = Arc::new(catalog_indexes::<McpServer>());
    let agent_indexes = Arc::new(catalog_indexes::<Agent>());
    let skill_indexes = Arc::new(catalog_indexes::<Skill>());
    let model_indexes = Arc::new(catalog_indexes::<Model>());
    let deploy_indexes = Arc::new(deployment_indexes());

    let servers = Arc::new(KubeStore::<McpServer>::new(client.clone(), server_indexes));
    let agents = Arc::new(KubeStore::<Agent>::new(client.clone(), agent_indexes));
    let skills = Arc::new(KubeStore::<Skill>::new(client.clone(), skill_indexes));
    let models = Arc::new(KubeStore::<Model>::new(client.clone(), model_indexes));
    let deployments = Arc::new(KubeStore::<AgentDeployment>::new(client.clone(), deploy_indexes));
    let discovery_configs = Arc::new(KubeStore::<DiscoveryConfig>::new(
        client.clone(),
        Arc::new(FieldIndexes::new()),
    ));
    let master_configs = Arc::new(KubeStore::<MasterAgentConfig>::new(
        client.clone(),
        Arc::new(FieldIndexes::new()),
    ));

    let cache = Arc::new(DiscoveryCache::new());
    let tracker = Arc::new(ErrorTracker::new());
    let remote_clients: Arc<dyn RemoteClusterClients> = Arc::new(KubeRemoteClients {
        local: client.clone(),
        controller_namespace: args.controller_namespace.clone(),
    });

    let writer = Arc::new(ShadowWriter {
        cache: cache.clone(),
        servers: servers.clone(),
        agents: agents.clone(),
        models: models.clone(),
        tracker: tracker.clone(),
        controller_namespace: args.controller_namespace.clone(),
    });

    let discovery = Arc::new(DiscoveryReconciler::new(
        discovery_configs.clone(),
        writer,
        Arc::new(KubeWatcherSpawner {
            clients: remote_clients.clone(),
        }),
    ));

    let deployment_reconciler = Arc::new(DeploymentReconciler {
        deployments: deployments.clone(),
        servers: servers.clone(),
        agents: agents.clone(),
        configs: discovery_configs.clone(),
        factory: Arc::new(KubeDeployTargetFactory {
            local: client.clone(),
            clients: remote_clients,
        }),
    });

    let master_agent = Arc::new(MasterAgentReconciler::new(
        master_configs,
        models.clone(),
        agents.clone(),
        Arc::new(OpenAiModelFactory),
        args.a2a_advertise_host.clone(),
    ));

    let server_controller = run_catalog_controller::<McpServer>(
        client.clone(),
        Arc::new(CatalogCtx {
            ctx: CatalogContext {
                store: servers.clone(),
                cache: cache.clone(),
            },
            hooks: Box::new(NoHooks),
        }),
    );
    let agent_controller = run_catalog_controller::<Agent>(
        client.clone(),
        Arc::new(CatalogCtx {
            ctx: CatalogContext {
                store: agents.clone(),
                cache: cache.clone(),
            },
            hooks: Box::new(AgentHooks {
                servers: servers.clone(),
            }),
        }),
    );
    let skill_controller = run_catalog_controller::<Skill>(
        client.clone(),
        Arc::new(CatalogCtx {
            ctx: CatalogContext {
                store: skills,
                cache: cache.clone(),
            },
            hooks: Box::new(NoHooks),
        }),
    );
    let model_controller = run_catalog_controller::<Model>(
        client.clone(),
        Arc::new(CatalogCtx {
            ctx: CatalogContext {
                store: models,
                cache: cache.clone(),
            },
            hooks: Box::new(NoHooks),
        }),
    );

    let deployment_controller = Controller::new(
        Api::<AgentDeployment>::all(client.clone()),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(reconcile_deployment, deployment_error_policy, deployment_reconciler)
    .for_each(|result| async move {
        if let Err(e) = result {
            debug!(error = %e, "controller event error");
        }
    });

    let discovery_controller = {
        let discovery = discovery.clone();
        let client = client.clone();
        let disabled = args.disable_discovery;
        async move {
            if disabled {
                info!("discovery controller disabled");
                return;
            }
            Controller::new(Api::<DiscoveryConfig>::all(client), watcher::Config::default())
                .shutdown_on_signal()
                .run(reconcile_discovery, discovery_error_policy, discovery)
                .for_each(|result| async move {
                    if let Err(e) = result {
                        debug!(error = %e, "controller event error");
                    }
                })
                .await;
        }
    };

    let master_controller = {
        let master_agent = master_agent.clone();
        let client = client.clone();
        let disabled = args.disable_master_agent;
        async move {
            if disabled {
                info!("master-agent controller disabled");
                return;
            }
            Controller::new(Api::<MasterAgentConfig>::all(client), watcher::Config::default())
                .shutdown_on_signal()
                .run(reconcile_master_agent, master_agent_error_policy, master_agent)
                .for_each(|result| async move {
                    if let Err(e) = result {
                        debug!(error = %e, "controller event error");
                    }
                })
                .await;
        }
    };

    tokio::join!(
        server_controller,
        agent_controller,
        skill_controller,
        model_controller,
        deployment_controller,
        discovery_controller,
        master_controller,
    );

    discovery.teardown_all();
    master_agent.teardown();
    info!("operator stopped");
    Ok(())
}
