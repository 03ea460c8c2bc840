//! End-to-end flow across the discovery plane and the catalog reconcilers:
//! a remote MCPServer is shadowed into the catalog, competes in the
//! latest-version election with a declarative record, and tracks the
//! liveness of its remote source.

use agentregistry_api::catalog::{CatalogStatus, ManagementType, McpServer, McpServerSpec};
use agentregistry_api::labels;
use agentregistry_operator::cache::{DiscoveryCache, RemoteObject};
use agentregistry_operator::catalog::{reconcile_catalog, CatalogContext, NoHooks, Outcome};
use agentregistry_operator::index::catalog_indexes;
use agentregistry_operator::retry::ErrorTracker;
use agentregistry_operator::shadow::ShadowWriter;
use agentregistry_operator::store::{ListSelector, MemStore, ObjectStore};
use agentregistry_api::catalog::{Agent, Model};
use agentregistry_api::discovery::EnvironmentSpec;
use std::collections::BTreeMap;
use std::sync::Arc;

const CONTROLLER_NS: &str = "agentregistry-system";

fn env() -> EnvironmentSpec {
    serde_json::from_value(serde_json::json!({
        "name": "dev",
        "cluster": "dev-cluster",
        "namespaces": ["ns1"],
        "resourceTypes": ["MCPServer"]
    }))
    .unwrap()
}

fn remote(version: &str, ready: bool) -> RemoteObject {
    RemoteObject {
        kind: "MCPServer".to_string(),
        namespace: "ns1".to_string(),
        name: "alpha".to_string(),
        labels: BTreeMap::from([("app.kubernetes.io/version".to_string(), version.to_string())]),
        annotations: BTreeMap::new(),
        image: Some(format!("ghcr.io/example/alpha:{version}")),
        transport: None,
        provider: None,
        model: None,
        base_url: None,
        ready,
        message: (!ready).then(|| "CrashLoopBackOff".to_string()),
    }
}

struct World {
    writer: Arc<ShadowWriter>,
    servers: Arc<MemStore<McpServer>>,
    ctx: CatalogContext<McpServer>,
}

fn world() -> World {
    let cache = Arc::new(DiscoveryCache::new());
    let servers: Arc<MemStore<McpServer>> =
        Arc::new(MemStore::new(Arc::new(catalog_indexes::<McpServer>())));
    let writer = Arc::new(ShadowWriter {
        cache: cache.clone(),
        servers: servers.clone(),
        agents: Arc::new(MemStore::new(Arc::new(catalog_indexes::<Agent>()))),
        models: Arc::new(MemStore::new(Arc::new(catalog_indexes::<Model>()))),
        tracker: Arc::new(ErrorTracker::new()),
        controller_namespace: CONTROLLER_NS.to_string(),
    });
    let ctx = CatalogContext {
        store: servers.clone(),
        cache,
    };
    World {
        writer,
        servers,
        ctx,
    }
}

async fn settle(world: &World, name: &str) -> Outcome {
    for _ in 0..5 {
        match reconcile_catalog(&world.ctx, &NoHooks, CONTROLLER_NS, name)
            .await
            .unwrap()
        {
            Outcome::Requeue => continue,
            other => return other,
        }
    }
    panic!("reconcile did not settle for {name}");
}

#[tokio::test]
async fn shadowed_record_joins_the_catalog_and_election() {
    let world = world();

    // A remote MCPServer appears in the dev environment.
    world.writer.observe(&env(), remote("1.2.3", true)).await.unwrap();

    let shadow = world
        .servers
        .get(CONTROLLER_NS, "ns1-alpha")
        .await
        .unwrap()
        .expect("shadow record missing");
    assert_eq!(shadow.spec.version, "1.2.3");
    assert_eq!(
        shadow.metadata.labels.as_ref().unwrap().get(labels::DISCOVERED).unwrap(),
        "true"
    );

    // Reconciling the shadow record elects it latest and keeps it on the
    // external resync cadence.
    let outcome = settle(&world, "ns1-alpha").await;
    assert!(matches!(outcome, Outcome::RequeueAfter(_)));
    let shadow = world.servers.get(CONTROLLER_NS, "ns1-alpha").await.unwrap().unwrap();
    let status = shadow.status.clone().unwrap();
    assert_eq!(status.management_type, Some(ManagementType::External));
    assert_eq!(status.is_latest, Some(true));
    assert_eq!(status.deployment.as_ref().unwrap().ready, true);

    // A declarative record with a higher version takes the election over.
    let mut curated = McpServer::new(
        "alpha-2-0-0",
        McpServerSpec {
            name: "alpha".to_string(),
            version: "2.0.0".to_string(),
            title: None,
            description: None,
            packages: Vec::new(),
            remotes: Vec::new(),
            meta: None,
            source_ref: None,
        },
    );
    curated.metadata.namespace = Some(CONTROLLER_NS.to_string());
    world.servers.create(&curated).await.unwrap();
    settle(&world, "alpha-2-0-0").await;

    let cohort = world
        .servers
        .list(Some(CONTROLLER_NS), &ListSelector::by_index("spec.name", "alpha"))
        .await
        .unwrap();
    let latest: Vec<&McpServer> = cohort
        .iter()
        .filter(|r| {
            r.status
                .as_ref()
                .and_then(|s: &CatalogStatus| s.is_latest)
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].spec.version, "2.0.0");

    // The remote source disappears: the cache entry is evicted, the shadow
    // record is preserved and flips to not-ready on its next reconcile.
    world.writer.observe_delete("MCPServer", "ns1", "alpha");
    settle(&world, "ns1-alpha").await;
    let shadow = world.servers.get(CONTROLLER_NS, "ns1-alpha").await.unwrap().unwrap();
    let deployment = shadow.status.unwrap().deployment.unwrap();
    assert!(!deployment.ready);
    assert_eq!(deployment.message.as_deref(), Some("Source not found"));
}

#[tokio::test]
async fn unready_source_liveness_flows_into_the_record() {
    let world = world();
    world.writer.observe(&env(), remote("1.0.0", false)).await.unwrap();
    settle(&world, "ns1-alpha").await;

    let shadow = world.servers.get(CONTROLLER_NS, "ns1-alpha").await.unwrap().unwrap();
    let deployment = shadow.status.unwrap().deployment.unwrap();
    assert!(!deployment.ready);
    assert_eq!(deployment.message.as_deref(), Some("CrashLoopBackOff"));
}
