//! # Statistics
//!
//! Record counts computed on demand from the creation-order index. Each call
//! reads one snapshot; nothing is cached between calls.

use crate::client::Ctx;
use crate::enumeration::EnumerationOrder;
use crate::storage::{RecordKind, Snapshot, StoreRead};
use crate::traversal::{SubgraphRequest, SubgraphStatistics, subgraph_statistics};
use crate::types::{Graph, LoomError, Tenant};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Counts for one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStatistics {
    pub graphs: usize,
    pub nodes: usize,
    pub edges: usize,
    pub labels: usize,
    pub tags: usize,
    pub vectors: usize,
    pub users: usize,
    pub credentials: usize,
}

/// Counts for one graph. Subordinate counts include those owned by the
/// graph itself as well as by its nodes and edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub nodes: usize,
    pub edges: usize,
    pub labels: usize,
    pub tags: usize,
    pub vectors: usize,
}

pub struct StatisticsMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> StatisticsMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn tenant(&self, tenant: Uuid) -> Result<TenantStatistics, LoomError> {
        let snapshot = self.ctx.snapshot()?;
        if snapshot.get_raw::<Tenant>(Uuid::nil(), tenant)?.is_none() {
            return Err(LoomError::not_found("tenant", tenant));
        }
        tenant_counts(&snapshot, tenant)
    }

    pub fn graph(&self, tenant: Uuid, graph: Uuid) -> Result<GraphStatistics, LoomError> {
        let snapshot = self.ctx.snapshot()?;
        if snapshot.get_raw::<Graph>(tenant, graph)?.is_none() {
            return Err(LoomError::not_found("graph", graph));
        }
        let count = |kind| snapshot.count(kind, tenant, Some(graph));
        Ok(GraphStatistics {
            nodes: count(RecordKind::Node)?,
            edges: count(RecordKind::Edge)?,
            labels: count(RecordKind::Label)?,
            tags: count(RecordKind::Tag)?,
            vectors: count(RecordKind::Vector)?,
        })
    }

    /// Counts for every tenant, keyed by tenant GUID.
    pub fn all_tenants(&self) -> Result<BTreeMap<Uuid, TenantStatistics>, LoomError> {
        let snapshot = self.ctx.snapshot()?;
        let tenants = snapshot.ordered_keys(
            RecordKind::Tenant,
            Uuid::nil(),
            Uuid::nil(),
            EnumerationOrder::CreatedAscending,
            None,
            usize::MAX,
        )?;
        let mut all = BTreeMap::new();
        for key in tenants {
            self.ctx.check()?;
            all.insert(key.guid, tenant_counts(&snapshot, key.guid)?);
        }
        tracing::debug!(tenants = all.len(), "collected tenant statistics");
        Ok(all)
    }

    /// Same as [`TraversalMethods::subgraph_statistics`](crate::TraversalMethods::subgraph_statistics).
    pub fn subgraph(&self, request: &SubgraphRequest) -> Result<SubgraphStatistics, LoomError> {
        subgraph_statistics(&self.ctx, request)
    }
}

fn tenant_counts(snapshot: &Snapshot, tenant: Uuid) -> Result<TenantStatistics, LoomError> {
    let tenant_level = |kind| snapshot.count(kind, tenant, Some(Uuid::nil()));
    let graph_level = |kind| snapshot.count(kind, tenant, None);
    Ok(TenantStatistics {
        graphs: tenant_level(RecordKind::Graph)?,
        nodes: graph_level(RecordKind::Node)?,
        edges: graph_level(RecordKind::Edge)?,
        labels: graph_level(RecordKind::Label)?,
        tags: graph_level(RecordKind::Tag)?,
        vectors: graph_level(RecordKind::Vector)?,
        users: tenant_level(RecordKind::User)?,
        credentials: tenant_level(RecordKind::Credential)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{Credential, Edge, Node, User};
    use crate::{EngineSettings, LoomClient};

    #[test]
    fn counts_per_tenant_and_graph() {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        let other = client.tenants().create(Tenant::new("other")).unwrap().guid;
        let g = client.graphs().create(Graph::new(t, "g")).unwrap().guid;
        client.graphs().create(Graph::new(t, "empty")).unwrap();

        let a = client
            .nodes()
            .create(Node::new(t, g, "a").with_label("x").with_tag("k", "v"))
            .unwrap();
        let b = client
            .nodes()
            .create(Node::new(t, g, "b").with_vector("m", vec![1.0, 2.0]))
            .unwrap();
        client
            .edges()
            .create(Edge::new(t, g, a.guid, b.guid, "ab", 1.0))
            .unwrap();
        let user = client
            .users()
            .create(User::new(t, "Ada", "Lovelace", "ada@example.com", "pw"))
            .unwrap();
        client
            .credentials()
            .create(Credential::new(t, user.guid, "cli", "token"))
            .unwrap();

        let stats = client.statistics();
        assert_eq!(
            stats.tenant(t).unwrap(),
            TenantStatistics {
                graphs: 2,
                nodes: 2,
                edges: 1,
                labels: 1,
                tags: 1,
                vectors: 1,
                users: 1,
                credentials: 1,
            }
        );
        assert_eq!(
            stats.graph(t, g).unwrap(),
            GraphStatistics {
                nodes: 2,
                edges: 1,
                labels: 1,
                tags: 1,
                vectors: 1,
            }
        );

        let all = stats.all_tenants().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&other], TenantStatistics::default());
    }

    #[test]
    fn unknown_scope_is_not_found() {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let stats = client.statistics();
        assert!(matches!(stats.tenant(Uuid::new_v4()), Err(LoomError::NotFound(_))));
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        assert!(matches!(stats.graph(t, Uuid::new_v4()), Err(LoomError::NotFound(_))));
    }
}
