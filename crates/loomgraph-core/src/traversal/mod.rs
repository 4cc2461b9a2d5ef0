//! # Traversal
//!
//! Graph-scoped reads that follow the adjacency indexes:
//!
//! - adjacency lookups (`edges_from`, `edges_to`, `edges_between`,
//!   `parents`, `children`, `neighbors`), filtered and paged like any
//!   enumeration
//! - route discovery between two nodes ([`RouteIter`])
//! - bounded subgraph extraction ([`SearchResult`])
//! - connectivity ranking ([`RankedNode`])
//!
//! Every operation reads from a single snapshot.

mod routes;
mod subgraph;

pub use routes::{RouteDetail, RouteIter, RouteRequest, SearchMode};
pub use subgraph::{SearchResult, SubgraphRequest, SubgraphStatistics};
pub(crate) use subgraph::statistics as subgraph_statistics;

use crate::client::Ctx;
use crate::enumeration::{
    Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope, paginate, resolve_token,
};
use crate::filter::Filter;
use crate::primitives;
use crate::storage::{Direction, Record, Snapshot, StoreRead};
use crate::types::{Edge, Graph, LoomError, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A node with its degree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub node: Node,
    pub edges_in: usize,
    pub edges_out: usize,
    pub total_edges: usize,
}

/// Traversal and structural queries over one graph.
pub struct TraversalMethods<'a> {
    pub(crate) ctx: Ctx<'a>,
}

impl<'a> TraversalMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    // =========================================================================
    // ADJACENCY
    // =========================================================================

    /// Edges leaving `node`.
    pub fn edges_from(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Edge>, LoomError> {
        self.adjacent_edges(tenant, graph, node, query, |snapshot| {
            edge_guids(snapshot, tenant, node, &[Direction::Outbound])
        })
    }

    /// Edges arriving at `node`.
    pub fn edges_to(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Edge>, LoomError> {
        self.adjacent_edges(tenant, graph, node, query, |snapshot| {
            edge_guids(snapshot, tenant, node, &[Direction::Inbound])
        })
    }

    /// Edges from `from` to `to`.
    pub fn edges_between(
        &self,
        tenant: Uuid,
        graph: Uuid,
        from: Uuid,
        to: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Edge>, LoomError> {
        self.adjacent_edges(tenant, graph, from, query, |snapshot| {
            require_node(snapshot, tenant, graph, to)?;
            Ok(snapshot
                .adjacent(Direction::Outbound, tenant, from)?
                .into_iter()
                .filter(|adjacent| adjacent.node == to)
                .map(|adjacent| adjacent.edge)
                .collect())
        })
    }

    /// Nodes with an edge into `node`.
    pub fn parents(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Node>, LoomError> {
        self.adjacent_nodes(tenant, graph, node, query, &[Direction::Inbound])
    }

    /// Nodes that `node` has an edge to.
    pub fn children(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Node>, LoomError> {
        self.adjacent_nodes(tenant, graph, node, query, &[Direction::Outbound])
    }

    /// Parents and children of `node`, each once. A self-loop does not make
    /// a node its own neighbor.
    pub fn neighbors(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Node>, LoomError> {
        self.adjacent_nodes(
            tenant,
            graph,
            node,
            query,
            &[Direction::Outbound, Direction::Inbound],
        )
    }

    fn adjacent_edges(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
        guids: impl FnOnce(&Snapshot) -> Result<Vec<Uuid>, LoomError>,
    ) -> Result<EnumerationResult<Edge>, LoomError> {
        query.validate()?;
        let snapshot = self.ctx.snapshot()?;
        require_node(&snapshot, tenant, graph, node)?;
        let marker = marker::<Edge>(&snapshot, tenant, graph, query)?;

        let mut edges = Vec::new();
        for guid in guids(&snapshot)? {
            self.ctx.check()?;
            if let Some(edge) = snapshot.get::<Edge>(tenant, guid)?
                && edge.graph_guid == graph
            {
                edges.push(edge);
            }
        }
        Ok(paginate(edges, query, marker, &self.ctx.settings().enumeration))
    }

    fn adjacent_nodes(
        &self,
        tenant: Uuid,
        graph: Uuid,
        node: Uuid,
        query: &EnumerationQuery,
        directions: &[Direction],
    ) -> Result<EnumerationResult<Node>, LoomError> {
        query.validate()?;
        let snapshot = self.ctx.snapshot()?;
        require_node(&snapshot, tenant, graph, node)?;
        let marker = marker::<Node>(&snapshot, tenant, graph, query)?;

        let mut seen = BTreeSet::new();
        let mut nodes = Vec::new();
        for direction in directions {
            for adjacent in snapshot.adjacent(*direction, tenant, node)? {
                self.ctx.check()?;
                if adjacent.node == node && directions.len() > 1 {
                    continue;
                }
                if !seen.insert(adjacent.node) {
                    continue;
                }
                if let Some(other) = snapshot.get::<Node>(tenant, adjacent.node)?
                    && other.graph_guid == graph
                {
                    nodes.push(other);
                }
            }
        }
        Ok(paginate(nodes, query, marker, &self.ctx.settings().enumeration))
    }

    // =========================================================================
    // ROUTES AND SUBGRAPHS
    // =========================================================================

    /// Lazily enumerate routes from `request.from` to `request.to`.
    pub fn routes(&self, request: &RouteRequest) -> Result<RouteIter, LoomError> {
        RouteIter::start(&self.ctx, request)
    }

    /// Collect the neighborhood of a node, breadth first in both directions.
    pub fn subgraph(&self, request: &SubgraphRequest) -> Result<SearchResult, LoomError> {
        subgraph::extract(&self.ctx, request)
    }

    /// Size of the neighborhood `subgraph` would return, without reading
    /// node or edge records.
    pub fn subgraph_statistics(
        &self,
        request: &SubgraphRequest,
    ) -> Result<SubgraphStatistics, LoomError> {
        subgraph::statistics(&self.ctx, request)
    }

    // =========================================================================
    // RANKING
    // =========================================================================

    /// Nodes with the highest total degree first.
    pub fn most_connected(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: &Filter,
        max_results: usize,
    ) -> Result<Vec<RankedNode>, LoomError> {
        self.rank(tenant, graph, filter, max_results, true)
    }

    /// Nodes with the lowest total degree first.
    pub fn least_connected(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: &Filter,
        max_results: usize,
    ) -> Result<Vec<RankedNode>, LoomError> {
        self.rank(tenant, graph, filter, max_results, false)
    }

    fn rank(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: &Filter,
        max_results: usize,
        descending: bool,
    ) -> Result<Vec<RankedNode>, LoomError> {
        if max_results == 0 || max_results > primitives::MAX_RESULTS {
            return Err(LoomError::bad_request(format!(
                "max_results must be in 1..={}, got {max_results}",
                primitives::MAX_RESULTS
            )));
        }
        filter.validate()?;
        let snapshot = self.ctx.snapshot()?;
        if snapshot.get_raw::<Graph>(tenant, graph)?.is_none() {
            return Err(LoomError::not_found("graph", graph));
        }

        let cursor = Cursor::<Node>::new(
            Arc::clone(&snapshot),
            Scope::graph(tenant, graph),
            EnumerationOrder::CreatedAscending,
            filter.clone(),
            None,
            self.ctx.cancel.clone(),
            self.ctx.batch_size(),
        );
        let mut ranked = Vec::new();
        for node in cursor {
            let node = node?;
            let edges_in = snapshot.adjacent(Direction::Inbound, tenant, node.guid)?.len();
            let edges_out = snapshot.adjacent(Direction::Outbound, tenant, node.guid)?.len();
            ranked.push(RankedNode {
                node,
                edges_in,
                edges_out,
                total_edges: edges_in + edges_out,
            });
        }

        // The cursor already yields creation order, so a stable sort on
        // degree keeps (created, guid) as the tie-break.
        if descending {
            ranked.sort_by(|a, b| b.total_edges.cmp(&a.total_edges));
        } else {
            ranked.sort_by_key(|ranked| ranked.total_edges);
        }
        ranked.truncate(max_results);
        tracing::debug!(graph = %graph, returned = ranked.len(), descending, "connectivity ranking");
        Ok(ranked)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Load a node that an operation starts from, or fail with `NotFound`.
pub(crate) fn require_node(
    snapshot: &Snapshot,
    tenant: Uuid,
    graph: Uuid,
    node: Uuid,
) -> Result<Node, LoomError> {
    snapshot
        .get_raw::<Node>(tenant, node)?
        .filter(|found| found.graph_guid == graph)
        .ok_or_else(|| LoomError::not_found("node", node))
}

fn marker<R: Record>(
    snapshot: &Snapshot,
    tenant: Uuid,
    graph: Uuid,
    query: &EnumerationQuery,
) -> Result<Option<crate::storage::OrderKey>, LoomError> {
    query
        .continuation_token
        .map(|token| {
            resolve_token::<R>(snapshot, Scope::graph(tenant, graph), token, query.ordering)
        })
        .transpose()
}

fn edge_guids(
    snapshot: &Snapshot,
    tenant: Uuid,
    node: Uuid,
    directions: &[Direction],
) -> Result<Vec<Uuid>, LoomError> {
    let mut guids = Vec::new();
    for direction in directions {
        guids.extend(
            snapshot
                .adjacent(*direction, tenant, node)?
                .into_iter()
                .map(|adjacent| adjacent.edge),
        );
    }
    Ok(guids)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{EngineSettings, LoomClient, Tenant};

    struct Fixture {
        client: LoomClient,
        t: Uuid,
        g: Uuid,
        nodes: Vec<Uuid>,
    }

    /// hub -> a, hub -> b, a -> b, b -> hub
    fn fixture() -> Fixture {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        let g = client.graphs().create(Graph::new(t, "g")).unwrap().guid;
        let mut nodes = Vec::new();
        for name in ["hub", "a", "b", "lonely"] {
            nodes.push(client.nodes().create(Node::new(t, g, name)).unwrap().guid);
        }
        for (from, to) in [(0, 1), (0, 2), (1, 2), (2, 0)] {
            client
                .edges()
                .create(Edge::new(t, g, nodes[from], nodes[to], "e", 1.0))
                .unwrap();
        }
        Fixture { client, t, g, nodes }
    }

    fn names(result: EnumerationResult<Node>) -> Vec<String> {
        result.objects.into_iter().map(|node| node.name).collect()
    }

    #[test]
    fn parents_children_and_neighbors() {
        let f = fixture();
        let traversal = f.client.traversal();
        let q = EnumerationQuery::new();
        let hub = f.nodes[0];
        assert_eq!(names(traversal.children(f.t, f.g, hub, &q).unwrap()), vec!["a", "b"]);
        assert_eq!(names(traversal.parents(f.t, f.g, hub, &q).unwrap()), vec!["b"]);
        assert_eq!(
            names(traversal.neighbors(f.t, f.g, hub, &q).unwrap()),
            vec!["a", "b"]
        );
        assert!(
            traversal
                .neighbors(f.t, f.g, f.nodes[3], &q)
                .unwrap()
                .objects
                .is_empty()
        );
    }

    #[test]
    fn edges_between_is_directed() {
        let f = fixture();
        let traversal = f.client.traversal();
        let q = EnumerationQuery::new();
        let (a, b) = (f.nodes[1], f.nodes[2]);
        assert_eq!(traversal.edges_between(f.t, f.g, a, b, &q).unwrap().objects.len(), 1);
        assert!(traversal.edges_between(f.t, f.g, b, a, &q).unwrap().objects.is_empty());
    }

    #[test]
    fn adjacency_pages_with_tokens() {
        let f = fixture();
        let traversal = f.client.traversal();
        let first = traversal
            .edges_from(f.t, f.g, f.nodes[0], &EnumerationQuery::new().with_max_results(1))
            .unwrap();
        assert!(first.has_more);
        let second = traversal
            .edges_from(
                f.t,
                f.g,
                f.nodes[0],
                &EnumerationQuery::new()
                    .with_max_results(1)
                    .with_continuation(first.continuation_token),
            )
            .unwrap();
        assert!(!second.has_more);
        assert_ne!(first.objects[0].guid, second.objects[0].guid);
    }

    #[test]
    fn unknown_node_and_token() {
        let f = fixture();
        let traversal = f.client.traversal();
        assert!(matches!(
            traversal.children(f.t, f.g, Uuid::new_v4(), &EnumerationQuery::new()),
            Err(LoomError::NotFound(_))
        ));
        let q = EnumerationQuery::new().with_continuation(Some(Uuid::new_v4()));
        assert!(matches!(
            traversal.children(f.t, f.g, f.nodes[0], &q),
            Err(LoomError::BadRequest(_))
        ));
    }

    #[test]
    fn ranking_by_degree() {
        let f = fixture();
        let traversal = f.client.traversal();
        let most = traversal.most_connected(f.t, f.g, &Filter::new(), 2).unwrap();
        assert_eq!(most[0].node.name, "hub");
        assert_eq!((most[0].edges_in, most[0].edges_out, most[0].total_edges), (1, 2, 3));
        assert_eq!(most[1].node.name, "b");

        let least = traversal.least_connected(f.t, f.g, &Filter::new(), 10).unwrap();
        let order: Vec<&str> = least.iter().map(|r| r.node.name.as_str()).collect();
        assert_eq!(order, vec!["lonely", "a", "hub", "b"]);
        assert_eq!(least[0].total_edges, 0);

        assert!(matches!(
            traversal.most_connected(f.t, f.g, &Filter::new(), 0),
            Err(LoomError::BadRequest(_))
        ));
    }
}
