//! Catalog reconcilers: one per kind, all sharing the same generic core.
//!
//! The core maintains `observedGeneration`, publish defaulting, the
//! latest-version election, and the external-source deployment back-ref.
//! The agent kind adds `usedBy` symmetry on server records through its
//! hooks.

use crate::cache::DiscoveryCache;
use crate::error::{Error, Result};
use crate::index::fields;
use crate::store::{ListSelector, ObjectStore, StoredObject};
use agentregistry_api::catalog::{
    Agent, CatalogRecord, DeploymentBackRef, ManagementType, McpServer, Reference,
};
use agentregistry_api::version::{find_latest, Candidate};
use async_trait::async_trait;
use chrono::Utc;
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// External-source records are re-reconciled on this cadence to refresh
/// deployment liveness.
pub const EXTERNAL_RESYNC: Duration = Duration::from_secs(30);

/// What the surrounding framework should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Wait for the next change.
    Done,
    /// Requeue immediately (conflict lost, or a fresh read is needed).
    Requeue,
    /// Requeue after the given delay.
    RequeueAfter(Duration),
}

/// Kind-specific work layered on the generic core.
#[async_trait]
pub trait CatalogHooks<K: StoredObject>: Send + Sync {
    /// Maintain cross-catalog references implied by the record's spec.
    async fn reconcile_refs(&self, _obj: &K) -> Result<()> {
        Ok(())
    }

    /// Cleanup before the finalizer is released.
    async fn cleanup(&self, _obj: &K) -> Result<()> {
        Ok(())
    }
}

/// Hooks for kinds with no cross-catalog references.
pub struct NoHooks;

#[async_trait]
impl<K: StoredObject> CatalogHooks<K> for NoHooks {}

/// Shared state of one catalog reconciler.
pub struct CatalogContext<K: StoredObject> {
    pub store: Arc<dyn ObjectStore<K>>,
    pub cache: Arc<DiscoveryCache>,
}

/// Reconcile one catalog record.
pub async fn reconcile_catalog<K>(
    ctx: &CatalogContext<K>,
    hooks: &dyn CatalogHooks<K>,
    namespace: &str,
    name: &str,
) -> Result<Outcome>
where
    K: CatalogRecord + StoredObject,
{
    let Some(mut obj) = ctx.store.get(namespace, name).await? else {
        return Ok(Outcome::Done);
    };

    if obj.meta().deletion_timestamp.is_some() {
        return finalize_catalog(ctx, hooks, &obj).await;
    }

    // Attach the finalizer on first sight, then work from a fresh read.
    if !obj.finalizers().iter().any(|f| f == K::FINALIZER) {
        let mut finalizers: Vec<String> = obj.finalizers().to_vec();
        finalizers.push(K::FINALIZER.to_string());
        ctx.store.set_finalizers(namespace, name, finalizers).await?;
        return Ok(Outcome::Requeue);
    }

    let original_status = obj.catalog_status().cloned();

    // Shadowed records track the liveness of their remote source.
    refresh_external_source(ctx, &mut obj);

    // Declarative records become published on first processing so the
    // election tiebreak has a timestamp to work with.
    {
        let status = obj.catalog_status_mut();
        if status.published.is_none() {
            status.published = Some(true);
        }
        if status.published_at.is_none() {
            status.published_at = Some(Utc::now());
        }
    }

    elect_latest(ctx, &mut obj).await?;

    hooks.reconcile_refs(&obj).await?;

    let generation = obj.meta().generation;
    obj.catalog_status_mut().observed_generation = generation;

    if obj.catalog_status() != original_status.as_ref() {
        match ctx.store.update_status(&obj).await {
            Ok(_) => {
                debug!(kind = K::KIND_TAG, name, "status updated");
            }
            Err(e) if e.is_conflict() => {
                debug!(kind = K::KIND_TAG, name, "status conflict, requeueing");
                return Ok(Outcome::Requeue);
            }
            Err(e) => return Err(e),
        }
    }

    if obj.source_ref().is_some() {
        Ok(Outcome::RequeueAfter(EXTERNAL_RESYNC))
    } else {
        Ok(Outcome::Done)
    }
}

async fn finalize_catalog<K>(
    ctx: &CatalogContext<K>,
    hooks: &dyn CatalogHooks<K>,
    obj: &K,
) -> Result<Outcome>
where
    K: CatalogRecord + StoredObject,
{
    if !obj.finalizers().iter().any(|f| f == K::FINALIZER) {
        return Ok(Outcome::Done);
    }
    match hooks.cleanup(obj).await {
        Ok(()) => {}
        Err(e) if e.is_conflict() => return Ok(Outcome::Requeue),
        Err(e) => return Err(e),
    }
    let remaining: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != K::FINALIZER)
        .cloned()
        .collect();
    let namespace = obj.namespace().unwrap_or_default();
    ctx.store.set_finalizers(&namespace, &obj.name_any(), remaining).await?;
    info!(kind = K::KIND_TAG, name = %obj.name_any(), "finalizer released");
    Ok(Outcome::Done)
}

/// Refresh `status.deployment` from the discovery cache for records that
/// shadow a remote source. A missing source is recorded, not failed.
fn refresh_external_source<K>(ctx: &CatalogContext<K>, obj: &mut K)
where
    K: CatalogRecord + StoredObject,
{
    let Some(source_kind) = K::SOURCE_KIND else { return };
    let Some(source) = obj.source_ref().cloned() else { return };
    if obj.catalog_status().and_then(|s| s.management_type) != Some(ManagementType::External) {
        return;
    }

    let back_ref = match ctx.cache.get(source_kind, &source.namespace, &source.name) {
        Some(remote) => DeploymentBackRef {
            name: Some(remote.name),
            namespace: Some(remote.namespace),
            image: remote.image,
            ready: remote.ready,
            message: remote.message,
        },
        None => DeploymentBackRef {
            name: Some(source.name.clone()),
            namespace: Some(source.namespace.clone()),
            image: None,
            ready: false,
            message: Some("Source not found".to_string()),
        },
    };
    obj.catalog_status_mut().deployment = Some(back_ref);
}

/// Latest-version election over the (kind, `spec.name`) cohort. At most one
/// record ends up with `isLatest = true`; peers that disagree are updated
/// directly.
async fn elect_latest<K>(ctx: &CatalogContext<K>, obj: &mut K) -> Result<()>
where
    K: CatalogRecord + StoredObject,
{
    let namespace = obj.namespace().unwrap_or_default();
    let mut cohort = ctx
        .store
        .list(
            Some(&namespace),
            &ListSelector::by_index(fields::SPEC_NAME, obj.logical_name()),
        )
        .await?;

    // The in-flight copy carries status changes not yet visible in the
    // store's listing.
    for record in &mut cohort {
        if record.name_any() == obj.name_any() {
            *record = obj.clone();
        }
    }

    let candidates: Vec<Candidate<'_>> = cohort
        .iter()
        .map(|record| Candidate {
            version: record.version(),
            published_at: record.catalog_status().and_then(|s| s.published_at),
        })
        .collect();
    let winner = find_latest(&candidates).map(|idx| cohort[idx].name_any());

    for record in &mut cohort {
        let desired = winner.as_deref() == Some(record.name_any().as_str());
        let current = record.catalog_status().and_then(|s| s.is_latest).unwrap_or(false);
        if record.name_any() == obj.name_any() {
            if obj.catalog_status().and_then(|s| s.is_latest) != Some(desired) {
                obj.catalog_status_mut().is_latest = Some(desired);
            }
            continue;
        }
        if current != desired || record.catalog_status().and_then(|s| s.is_latest).is_none() {
            record.catalog_status_mut().is_latest = Some(desired);
            match ctx.store.update_status(record).await {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    // The peer's own reconcile will converge; ours retries.
                    return Err(Error::Conflict);
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Agent-kind hooks: keep server `usedBy` back-references symmetric with
/// the agent's `mcpServers` list.
pub struct AgentHooks {
    pub servers: Arc<dyn ObjectStore<McpServer>>,
}

impl AgentHooks {
    fn reference_for(agent: &Agent) -> Reference {
        Reference {
            kind: "Agent".to_string(),
            name: agent.name_any(),
            namespace: agent.namespace(),
        }
    }

    fn same_agent(reference: &Reference, agent_ref: &Reference) -> bool {
        reference.kind == agent_ref.kind
            && reference.name == agent_ref.name
            && reference.namespace == agent_ref.namespace
    }

    async fn write_server_status(&self, server: &McpServer) -> Result<()> {
        match self.servers.update_status(server).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => Err(Error::Conflict),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CatalogHooks<Agent> for AgentHooks {
    async fn reconcile_refs(&self, obj: &Agent) -> Result<()> {
        let referenced: BTreeSet<&str> = obj.spec.mcp_servers.iter().map(String::as_str).collect();
        let agent_ref = Self::reference_for(obj);
        let namespace = obj.namespace().unwrap_or_default();

        let servers = self.servers.list(Some(&namespace), &ListSelector::all()).await?;
        for mut server in servers {
            let should_reference = referenced.contains(server.spec.name.as_str());
            let used_by = &server.status.as_ref().map(|s| s.used_by.clone()).unwrap_or_default();
            let occurrences = used_by.iter().filter(|r| Self::same_agent(r, &agent_ref)).count();

            if should_reference && occurrences == 1 {
                continue;
            }
            if !should_reference && occurrences == 0 {
                continue;
            }

            let status = server.catalog_status_mut();
            status.used_by.retain(|r| !Self::same_agent(r, &agent_ref));
            if should_reference {
                status.used_by.push(agent_ref.clone());
            }
            self.write_server_status(&server).await?;
            debug!(
                server = %server.name_any(),
                agent = %agent_ref.name,
                referenced = should_reference,
                "usedBy updated"
            );
        }
        Ok(())
    }

    async fn cleanup(&self, obj: &Agent) -> Result<()> {
        let agent_ref = Self::reference_for(obj);
        let namespace = obj.namespace().unwrap_or_default();
        let servers = self.servers.list(Some(&namespace), &ListSelector::all()).await?;
        for mut server in servers {
            let has = server
                .status
                .as_ref()
                .map(|s| s.used_by.iter().any(|r| Self::same_agent(r, &agent_ref)))
                .unwrap_or(false);
            if !has {
                continue;
            }
            server
                .catalog_status_mut()
                .used_by
                .retain(|r| !Self::same_agent(r, &agent_ref));
            self.write_server_status(&server).await?;
        }
        warn!(agent = %agent_ref.name, "removed usedBy back-references on deletion");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::catalog_indexes;
    use crate::store::MemStore;
    use agentregistry_api::catalog::{AgentSpec, McpServerSpec, SourceRef};
    use agentregistry_api::finalizers;
    use chrono::TimeZone;

    fn server(name: &str, logical: &str, version: &str) -> McpServer {
        let mut obj = McpServer::new(
            name,
            McpServerSpec {
                name: logical.to_string(),
                version: version.to_string(),
                title: None,
                description: None,
                packages: Vec::new(),
                remotes: Vec::new(),
                meta: None,
                source_ref: None,
            },
        );
        obj.metadata.namespace = Some("default".to_string());
        obj
    }

    fn agent(name: &str, logical: &str, servers: &[&str]) -> Agent {
        let mut obj = Agent::new(
            name,
            AgentSpec {
                name: logical.to_string(),
                version: "1.0.0".to_string(),
                title: None,
                description: None,
                image: None,
                framework: None,
                model_ref: None,
                mcp_servers: servers.iter().map(|s| s.to_string()).collect(),
                a2a_url: None,
                meta: None,
                source_ref: None,
            },
        );
        obj.metadata.namespace = Some("default".to_string());
        obj
    }

    fn server_ctx() -> CatalogContext<McpServer> {
        CatalogContext {
            store: Arc::new(MemStore::new(Arc::new(catalog_indexes::<McpServer>()))),
            cache: Arc::new(DiscoveryCache::new()),
        }
    }

    async fn reconcile_until_done<K: CatalogRecord + StoredObject>(
        ctx: &CatalogContext<K>,
        hooks: &dyn CatalogHooks<K>,
        name: &str,
    ) -> Outcome {
        for _ in 0..5 {
            match reconcile_catalog(ctx, hooks, "default", name).await.unwrap() {
                Outcome::Requeue => continue,
                other => return other,
            }
        }
        panic!("reconcile did not settle for {name}");
    }

    #[tokio::test]
    async fn latest_election_prefers_highest_version() {
        let ctx = server_ctx();
        ctx.store.create(&server("srv-1-0-0", "srv", "1.0.0")).await.unwrap();
        ctx.store.create(&server("srv-2-0-0", "srv", "2.0.0")).await.unwrap();

        reconcile_until_done(&ctx, &NoHooks, "srv-1-0-0").await;
        reconcile_until_done(&ctx, &NoHooks, "srv-2-0-0").await;

        let v1 = ctx.store.get("default", "srv-1-0-0").await.unwrap().unwrap();
        let v2 = ctx.store.get("default", "srv-2-0-0").await.unwrap().unwrap();
        assert_eq!(v1.status.unwrap().is_latest, Some(false));
        assert_eq!(v2.status.unwrap().is_latest, Some(true));

        // A newer patch release flips the election.
        ctx.store.create(&server("srv-2-0-1", "srv", "v2.0.1")).await.unwrap();
        reconcile_until_done(&ctx, &NoHooks, "srv-2-0-1").await;

        let v2 = ctx.store.get("default", "srv-2-0-0").await.unwrap().unwrap();
        let v201 = ctx.store.get("default", "srv-2-0-1").await.unwrap().unwrap();
        assert_eq!(v2.status.unwrap().is_latest, Some(false));
        assert_eq!(v201.status.unwrap().is_latest, Some(true));
    }

    #[tokio::test]
    async fn at_most_one_latest_per_cohort() {
        let ctx = server_ctx();
        for (name, version) in [("a", "1.0.0"), ("b", "3.0.0"), ("c", "2.0.0")] {
            ctx.store.create(&server(name, "srv", version)).await.unwrap();
        }
        for name in ["a", "b", "c"] {
            reconcile_until_done(&ctx, &NoHooks, name).await;
        }
        let cohort = ctx
            .store
            .list(Some("default"), &ListSelector::by_index(fields::SPEC_NAME, "srv"))
            .await
            .unwrap();
        let latest: Vec<String> = cohort
            .iter()
            .filter(|r| r.status.as_ref().and_then(|s| s.is_latest) == Some(true))
            .map(|r| r.name_any())
            .collect();
        assert_eq!(latest, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn second_reconcile_is_a_no_op() {
        let ctx = server_ctx();
        ctx.store.create(&server("srv-1", "srv", "1.0.0")).await.unwrap();
        reconcile_until_done(&ctx, &NoHooks, "srv-1").await;

        let settled = ctx.store.get("default", "srv-1").await.unwrap().unwrap();
        let rv_before = settled.metadata.resource_version.clone();
        assert_eq!(
            settled.status.as_ref().unwrap().observed_generation,
            settled.metadata.generation
        );

        let outcome = reconcile_catalog(&ctx, &NoHooks, "default", "srv-1").await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        let after = ctx.store.get("default", "srv-1").await.unwrap().unwrap();
        assert_eq!(after.metadata.resource_version, rv_before);
    }

    #[tokio::test]
    async fn missing_record_is_a_no_op() {
        let ctx = server_ctx();
        let outcome = reconcile_catalog(&ctx, &NoHooks, "default", "ghost").await.unwrap();
        assert_eq!(outcome, Outcome::Done);
    }

    #[tokio::test]
    async fn external_source_refreshes_deployment_liveness() {
        let ctx = server_ctx();
        let mut shadowed = server("ns1-alpha", "alpha", "1.2.3");
        shadowed.spec.source_ref = Some(SourceRef {
            environment: "dev".to_string(),
            cluster: "dev-cluster".to_string(),
            namespace: "ns1".to_string(),
            name: "alpha".to_string(),
        });
        shadowed.status = Some(agentregistry_api::catalog::CatalogStatus {
            management_type: Some(ManagementType::External),
            published: Some(true),
            ..Default::default()
        });
        let created = ctx.store.create(&shadowed).await.unwrap();
        ctx.store.update_status(&created).await.unwrap();

        // Source absent: recorded, not failed.
        let outcome = reconcile_until_done(&ctx, &NoHooks, "ns1-alpha").await;
        assert_eq!(outcome, Outcome::RequeueAfter(EXTERNAL_RESYNC));
        let record = ctx.store.get("default", "ns1-alpha").await.unwrap().unwrap();
        let deployment = record.status.unwrap().deployment.unwrap();
        assert!(!deployment.ready);
        assert_eq!(deployment.message.as_deref(), Some("Source not found"));

        // Source observed: liveness flows through.
        ctx.cache.upsert(crate::cache::RemoteObject {
            kind: "MCPServer".to_string(),
            namespace: "ns1".to_string(),
            name: "alpha".to_string(),
            labels: Default::default(),
            annotations: Default::default(),
            image: Some("ghcr.io/example/alpha:1.2.3".to_string()),
            transport: None,
            provider: None,
            model: None,
            base_url: None,
            ready: true,
            message: None,
        });
        reconcile_until_done(&ctx, &NoHooks, "ns1-alpha").await;
        let record = ctx.store.get("default", "ns1-alpha").await.unwrap().unwrap();
        let deployment = record.status.unwrap().deployment.unwrap();
        assert!(deployment.ready);
        assert_eq!(deployment.image.as_deref(), Some("ghcr.io/example/alpha:1.2.3"));
    }

    #[tokio::test]
    async fn used_by_follows_agent_references() {
        let servers: Arc<MemStore<McpServer>> =
            Arc::new(MemStore::new(Arc::new(catalog_indexes::<McpServer>())));
        let agents: Arc<MemStore<Agent>> = Arc::new(MemStore::new(Arc::new(catalog_indexes::<Agent>())));
        servers.create(&server("s-1", "s", "1.0.0")).await.unwrap();
        servers.create(&server("t-1", "t", "1.0.0")).await.unwrap();
        agents.create(&agent("a", "a", &["s"])).await.unwrap();

        let ctx = CatalogContext::<Agent> {
            store: agents.clone(),
            cache: Arc::new(DiscoveryCache::new()),
        };
        let hooks = AgentHooks { servers: servers.clone() };

        reconcile_until_done(&ctx, &hooks, "a").await;
        let s = servers.get("default", "s-1").await.unwrap().unwrap();
        let t = servers.get("default", "t-1").await.unwrap().unwrap();
        assert_eq!(s.status.unwrap().used_by.len(), 1);
        assert!(t.status.map(|st| st.used_by.is_empty()).unwrap_or(true));

        // Repointing the agent moves the back-reference.
        let mut repointed = agents.get("default", "a").await.unwrap().unwrap();
        repointed.spec.mcp_servers = vec!["t".to_string()];
        agents.update(&repointed).await.unwrap();
        reconcile_until_done(&ctx, &hooks, "a").await;

        let s = servers.get("default", "s-1").await.unwrap().unwrap();
        let t = servers.get("default", "t-1").await.unwrap().unwrap();
        assert!(s.status.unwrap().used_by.is_empty());
        assert_eq!(t.status.unwrap().used_by.len(), 1);

        // Deleting the agent clears the remaining reference and the
        // finalizer.
        agents.delete("default", "a").await.unwrap();
        reconcile_until_done(&ctx, &hooks, "a").await;
        let t = servers.get("default", "t-1").await.unwrap().unwrap();
        assert!(t.status.unwrap().used_by.is_empty());
        assert!(agents.get("default", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalizer_attached_on_first_sight() {
        let ctx = server_ctx();
        ctx.store.create(&server("srv-1", "srv", "1.0.0")).await.unwrap();
        let outcome = reconcile_catalog(&ctx, &NoHooks, "default", "srv-1").await.unwrap();
        assert_eq!(outcome, Outcome::Requeue);
        let obj = ctx.store.get("default", "srv-1").await.unwrap().unwrap();
        assert!(obj.finalizers().iter().any(|f| f == finalizers::MCP_SERVER));
    }
}
