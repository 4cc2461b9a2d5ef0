//! Bounded subgraph extraction.
//!
//! The walk is breadth first from the start node and follows edges in both
//! directions. It stops at the first bound hit; an edge is only taken when
//! both of its ends are in the result. Nodes at the depth limit are not
//! expanded, but edges among them are kept.

use super::require_node;
use crate::client::Ctx;
use crate::primitives;
use crate::storage::{Direction, Record, Snapshot, StoreRead};
use crate::types::{Edge, Graph, LoomError, Node};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphRequest {
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub node_guid: Uuid,
    /// 0 returns the start node alone.
    #[serde(default = "default_depth")]
    pub max_depth: usize,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_nodes: usize,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_edges: usize,
    #[serde(default = "enabled")]
    pub include_data: bool,
    #[serde(default = "enabled")]
    pub include_subordinates: bool,
}

fn default_depth() -> usize {
    2
}

fn enabled() -> bool {
    true
}

impl SubgraphRequest {
    #[must_use]
    pub fn new(tenant_guid: Uuid, graph_guid: Uuid, node_guid: Uuid) -> Self {
        Self {
            tenant_guid,
            graph_guid,
            node_guid,
            max_depth: default_depth(),
            max_nodes: 0,
            max_edges: 0,
            include_data: true,
            include_subordinates: true,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    #[must_use]
    pub fn with_max_edges(mut self, max_edges: usize) -> Self {
        self.max_edges = max_edges;
        self
    }

    #[must_use]
    pub fn with_data(mut self, include_data: bool) -> Self {
        self.include_data = include_data;
        self
    }

    #[must_use]
    pub fn with_subordinates(mut self, include_subordinates: bool) -> Self {
        self.include_subordinates = include_subordinates;
        self
    }
}

/// An extracted subgraph. Nodes are in visit order, start node first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub graph: Graph,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    /// Deepest level that contributed a node.
    pub depth_reached: usize,
}

struct Walk {
    nodes: Vec<Uuid>,
    edges: Vec<Uuid>,
    depth_reached: usize,
}

fn walk(ctx: &Ctx<'_>, snapshot: &Snapshot, request: &SubgraphRequest) -> Result<Walk, LoomError> {
    if request.max_depth > primitives::MAX_TRAVERSAL_DEPTH {
        return Err(LoomError::bad_request(format!(
            "max_depth must be at most {}, got {}",
            primitives::MAX_TRAVERSAL_DEPTH,
            request.max_depth
        )));
    }
    let (tenant, start) = (request.tenant_guid, request.node_guid);
    require_node(snapshot, tenant, request.graph_guid, start)?;

    let node_room = |count: usize| request.max_nodes == 0 || count < request.max_nodes;
    let edge_room = |count: usize| request.max_edges == 0 || count < request.max_edges;

    let mut nodes = vec![start];
    let mut seen_nodes = BTreeSet::from([start]);
    let mut edges = Vec::new();
    let mut seen_edges = BTreeSet::new();
    let mut depth_reached = 0;
    let mut queue = VecDeque::from([(start, 0usize)]);

    'walk: while let Some((current, depth)) = queue.pop_front() {
        ctx.check()?;
        let frontier = depth >= request.max_depth;
        for direction in [Direction::Outbound, Direction::Inbound] {
            for adjacent in snapshot.adjacent(direction, tenant, current)? {
                if seen_edges.contains(&adjacent.edge)
                    || (frontier && !seen_nodes.contains(&adjacent.node))
                {
                    continue;
                }
                if !edge_room(edges.len()) {
                    break 'walk;
                }
                if !seen_nodes.contains(&adjacent.node) {
                    if !node_room(nodes.len()) {
                        break 'walk;
                    }
                    seen_nodes.insert(adjacent.node);
                    nodes.push(adjacent.node);
                    depth_reached = depth_reached.max(depth + 1);
                    queue.push_back((adjacent.node, depth + 1));
                }
                seen_edges.insert(adjacent.edge);
                edges.push(adjacent.edge);
            }
        }
    }

    Ok(Walk {
        nodes,
        edges,
        depth_reached,
    })
}

pub(crate) fn statistics(
    ctx: &Ctx<'_>,
    request: &SubgraphRequest,
) -> Result<SubgraphStatistics, LoomError> {
    let snapshot = ctx.snapshot()?;
    let walk = walk(ctx, &snapshot, request)?;
    Ok(SubgraphStatistics {
        node_count: walk.nodes.len(),
        edge_count: walk.edges.len(),
        depth_reached: walk.depth_reached,
    })
}

pub(crate) fn extract(ctx: &Ctx<'_>, request: &SubgraphRequest) -> Result<SearchResult, LoomError> {
    let snapshot = ctx.snapshot()?;
    let tenant = request.tenant_guid;
    let mut graph = load::<Graph>(&snapshot, tenant, request.graph_guid, request)?
        .ok_or_else(|| LoomError::not_found("graph", request.graph_guid))?;
    let walk = walk(ctx, &snapshot, request)?;

    let mut nodes = Vec::with_capacity(walk.nodes.len());
    for guid in &walk.nodes {
        ctx.check()?;
        if let Some(mut node) = load::<Node>(&snapshot, tenant, *guid, request)? {
            strip_data(&mut node.data, request);
            nodes.push(node);
        }
    }
    let mut edges = Vec::with_capacity(walk.edges.len());
    for guid in &walk.edges {
        ctx.check()?;
        if let Some(mut edge) = load::<Edge>(&snapshot, tenant, *guid, request)? {
            strip_data(&mut edge.data, request);
            edges.push(edge);
        }
    }
    strip_data(&mut graph.data, request);

    tracing::debug!(
        graph = %request.graph_guid,
        nodes = nodes.len(),
        edges = edges.len(),
        depth = walk.depth_reached,
        "subgraph extracted"
    );
    Ok(SearchResult {
        graph,
        nodes,
        edges,
    })
}

/// Without subordinates the records are left unhydrated.
fn load<R: Record>(
    snapshot: &Snapshot,
    tenant: Uuid,
    guid: Uuid,
    request: &SubgraphRequest,
) -> Result<Option<R>, LoomError> {
    if request.include_subordinates {
        snapshot.get::<R>(tenant, guid)
    } else {
        snapshot.get_raw::<R>(tenant, guid)
    }
}

fn strip_data(data: &mut Option<serde_json::Value>, request: &SubgraphRequest) {
    if !request.include_data {
        *data = None;
    }
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
        chain: Vec<Uuid>,
    }

    /// c0 -> c1 -> c2 -> c3, with c1 also pointing back at c0.
    fn chain() -> Fixture {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        let g = client.graphs().create(Graph::new(t, "g")).unwrap().guid;
        let mut chain = Vec::new();
        for i in 0..4 {
            let node = Node::new(t, g, format!("c{i}"))
                .with_label("link")
                .with_data(serde_json::json!({"i": i}));
            chain.push(client.nodes().create(node).unwrap().guid);
        }
        for (from, to) in [(0, 1), (1, 2), (2, 3), (1, 0)] {
            client
                .edges()
                .create(Edge::new(t, g, chain[from], chain[to], "next", 1.0))
                .unwrap();
        }
        Fixture { client, t, g, chain }
    }

    #[test]
    fn depth_bounds_the_walk() {
        let f = chain();
        let traversal = f.client.traversal();
        let only_start = traversal
            .subgraph(&SubgraphRequest::new(f.t, f.g, f.chain[0]).with_max_depth(0))
            .unwrap();
        assert_eq!(only_start.nodes.len(), 1);
        assert!(only_start.edges.is_empty());

        let two = traversal
            .subgraph(&SubgraphRequest::new(f.t, f.g, f.chain[0]).with_max_depth(2))
            .unwrap();
        let names: Vec<&str> = two.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["c0", "c1", "c2"]);
        assert_eq!(two.edges.len(), 3);
        assert_eq!(two.graph.guid, f.g);
    }

    #[test]
    fn edges_between_frontier_nodes_are_kept() {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        let g = client.graphs().create(Graph::new(t, "g")).unwrap().guid;
        let [r, a, b, far] = ["r", "a", "b", "far"]
            .map(|name| client.nodes().create(Node::new(t, g, name)).unwrap().guid);
        for (from, to) in [(r, a), (r, b), (a, b), (b, far)] {
            client
                .edges()
                .create(Edge::new(t, g, from, to, "e", 1.0))
                .unwrap();
        }

        let request = SubgraphRequest::new(t, g, r).with_max_depth(1);
        let result = client.traversal().subgraph(&request).unwrap();
        let nodes: BTreeSet<Uuid> = result.nodes.iter().map(|n| n.guid).collect();
        assert_eq!(nodes, BTreeSet::from([r, a, b]));
        assert_eq!(result.edges.len(), 3);
        assert!(result.edges.iter().any(|e| e.from == a && e.to == b));

        let stats = client.traversal().subgraph_statistics(&request).unwrap();
        assert_eq!((stats.node_count, stats.edge_count, stats.depth_reached), (3, 3, 1));

        let capped = client
            .traversal()
            .subgraph(&request.clone().with_max_edges(2))
            .unwrap();
        assert_eq!(capped.edges.len(), 2);
    }

    #[test]
    fn every_edge_joins_result_nodes() {
        let f = chain();
        for max_edges in 1..=4 {
            let request = SubgraphRequest::new(f.t, f.g, f.chain[1])
                .with_max_depth(5)
                .with_max_edges(max_edges);
            let result = f.client.traversal().subgraph(&request).unwrap();
            assert!(result.edges.len() <= max_edges);
            let nodes: BTreeSet<Uuid> = result.nodes.iter().map(|n| n.guid).collect();
            for edge in &result.edges {
                assert!(nodes.contains(&edge.from) && nodes.contains(&edge.to));
            }
        }
    }

    #[test]
    fn node_bound_stops_expansion() {
        let f = chain();
        let request = SubgraphRequest::new(f.t, f.g, f.chain[0])
            .with_max_depth(10)
            .with_max_nodes(2);
        let stats = f.client.traversal().subgraph_statistics(&request).unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.depth_reached, 1);
    }

    #[test]
    fn data_and_subordinates_can_be_stripped() {
        let f = chain();
        let request = SubgraphRequest::new(f.t, f.g, f.chain[0])
            .with_data(false)
            .with_subordinates(false);
        let result = f.client.traversal().subgraph(&request).unwrap();
        assert!(result.nodes.iter().all(|n| n.data.is_none() && n.labels.is_empty()));

        let full = f
            .client
            .traversal()
            .subgraph(&SubgraphRequest::new(f.t, f.g, f.chain[0]))
            .unwrap();
        assert!(full.nodes.iter().all(|n| n.data.is_some() && n.labels == vec!["link"]));
    }

    #[test]
    fn statistics_match_extraction() {
        let f = chain();
        let request = SubgraphRequest::new(f.t, f.g, f.chain[0]).with_max_depth(3);
        let result = f.client.traversal().subgraph(&request).unwrap();
        let stats = f.client.traversal().subgraph_statistics(&request).unwrap();
        assert_eq!(stats.node_count, result.nodes.len());
        assert_eq!(stats.edge_count, result.edges.len());
        assert_eq!(stats.depth_reached, 3);
    }

    #[test]
    fn depth_over_limit_rejected() {
        let f = chain();
        let request = SubgraphRequest::new(f.t, f.g, f.chain[0]).with_max_depth(101);
        assert!(matches!(
            f.client.traversal().subgraph(&request),
            Err(LoomError::BadRequest(_))
        ));
    }
}
