//! Route discovery.
//!
//! Routes follow edge direction and never repeat a node. Each partial route
//! carries its own visited set, so a node reached along one branch stays
//! available to the others. Both search modes share one frontier: depth
//! first pops from the back, breadth first from the front.

use super::require_node;
use crate::client::Ctx;
use crate::filter::Filter;
use crate::storage::{Direction, Snapshot, StoreRead};
use crate::types::{Edge, LoomError, Node};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Frontier discipline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Every simple path, in adjacency-index order.
    #[default]
    DepthFirst,
    /// Paths in non-decreasing hop count.
    BreadthFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    #[serde(default)]
    pub mode: SearchMode,
    /// Applied to every edge of a route.
    #[serde(default)]
    pub edge_filter: Filter,
    /// Applied to intermediate nodes only.
    #[serde(default)]
    pub node_filter: Filter,
    /// Lowers `routes.max_hops` for this request.
    #[serde(default)]
    pub max_hops: Option<usize>,
}

impl RouteRequest {
    #[must_use]
    pub fn new(tenant_guid: Uuid, graph_guid: Uuid, from: Uuid, to: Uuid) -> Self {
        Self {
            tenant_guid,
            graph_guid,
            from,
            to,
            mode: SearchMode::default(),
            edge_filter: Filter::default(),
            node_filter: Filter::default(),
            max_hops: None,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_edge_filter(mut self, filter: Filter) -> Self {
        self.edge_filter = filter;
        self
    }

    #[must_use]
    pub fn with_node_filter(mut self, filter: Filter) -> Self {
        self.node_filter = filter;
        self
    }

    #[must_use]
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = Some(max_hops);
        self
    }
}

/// One route: its edges in order and the sum of their costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDetail {
    pub edges: Vec<Edge>,
    pub total_cost: f64,
}

impl RouteDetail {
    /// Nodes along the route, `from` first.
    #[must_use]
    pub fn nodes(&self) -> Vec<Uuid> {
        let mut nodes: Vec<Uuid> = self.edges.first().map(|e| e.from).into_iter().collect();
        nodes.extend(self.edges.iter().map(|e| e.to));
        nodes
    }
}

#[derive(Debug, Clone)]
struct PartialRoute {
    at: Uuid,
    edges: Vec<Edge>,
    visited: BTreeSet<Uuid>,
    cost: f64,
}

/// Lazy sequence of routes. Holds one snapshot until dropped.
pub struct RouteIter {
    snapshot: Arc<Snapshot>,
    tenant: Uuid,
    graph: Uuid,
    to: Uuid,
    mode: SearchMode,
    edge_filter: Filter,
    node_filter: Filter,
    max_hops: usize,
    max_routes: usize,
    cancel: CancellationToken,
    frontier: VecDeque<PartialRoute>,
    edges: HashMap<Uuid, Option<Edge>>,
    passable: HashMap<Uuid, bool>,
    yielded: usize,
    finished: bool,
}

impl std::fmt::Debug for RouteIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteIter")
            .field("mode", &self.mode)
            .field("frontier", &self.frontier.len())
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}

impl RouteIter {
    pub(crate) fn start(ctx: &Ctx<'_>, request: &RouteRequest) -> Result<Self, LoomError> {
        let settings = &ctx.settings().routes;
        let max_hops = match request.max_hops {
            Some(0) => return Err(LoomError::bad_request("max_hops must be at least 1")),
            Some(hops) => hops.min(settings.max_hops),
            None => settings.max_hops,
        };
        request.edge_filter.validate()?;
        request.node_filter.validate()?;

        let (tenant, graph) = (request.tenant_guid, request.graph_guid);
        let snapshot = ctx.snapshot()?;
        require_node(&snapshot, tenant, graph, request.from)?;
        require_node(&snapshot, tenant, graph, request.to)?;

        let mut frontier = VecDeque::new();
        if request.from != request.to {
            frontier.push_back(PartialRoute {
                at: request.from,
                edges: Vec::new(),
                visited: BTreeSet::from([request.from]),
                cost: 0.0,
            });
        }
        tracing::debug!(
            graph = %graph,
            from = %request.from,
            to = %request.to,
            mode = ?request.mode,
            max_hops,
            "route search"
        );

        Ok(Self {
            snapshot,
            tenant,
            graph,
            to: request.to,
            mode: request.mode,
            edge_filter: request.edge_filter.clone(),
            node_filter: request.node_filter.clone(),
            max_hops,
            max_routes: settings.max_routes,
            cancel: ctx.cancel.clone(),
            frontier,
            edges: HashMap::new(),
            passable: HashMap::new(),
            yielded: 0,
            finished: false,
        })
    }

    fn pop(&mut self) -> Option<PartialRoute> {
        match self.mode {
            SearchMode::DepthFirst => self.frontier.pop_back(),
            SearchMode::BreadthFirst => self.frontier.pop_front(),
        }
    }

    fn edge(&mut self, guid: Uuid) -> Result<Option<Edge>, LoomError> {
        if let Some(cached) = self.edges.get(&guid) {
            return Ok(cached.clone());
        }
        let edge = self
            .snapshot
            .get::<Edge>(self.tenant, guid)?
            .filter(|edge| edge.graph_guid == self.graph && self.edge_filter.matches(edge));
        self.edges.insert(guid, edge.clone());
        Ok(edge)
    }

    fn can_pass(&mut self, node: Uuid) -> Result<bool, LoomError> {
        if node == self.to {
            return Ok(true);
        }
        if let Some(passable) = self.passable.get(&node) {
            return Ok(*passable);
        }
        let passable = if self.node_filter.is_empty() {
            self.snapshot
                .get_raw::<Node>(self.tenant, node)?
                .is_some_and(|found| found.graph_guid == self.graph)
        } else {
            self.snapshot
                .get::<Node>(self.tenant, node)?
                .is_some_and(|found| found.graph_guid == self.graph && self.node_filter.matches(&found))
        };
        self.passable.insert(node, passable);
        Ok(passable)
    }

    /// Extensions of `route` by one edge, in adjacency-index order.
    fn expand(&mut self, route: &PartialRoute) -> Result<Vec<PartialRoute>, LoomError> {
        let mut next = Vec::new();
        for adjacent in self.snapshot.adjacent(Direction::Outbound, self.tenant, route.at)? {
            if route.visited.contains(&adjacent.node) || !self.can_pass(adjacent.node)? {
                continue;
            }
            let Some(edge) = self.edge(adjacent.edge)? else {
                continue;
            };
            let mut extended = route.clone();
            extended.at = adjacent.node;
            extended.visited.insert(adjacent.node);
            extended.cost += edge.cost;
            extended.edges.push(edge);
            next.push(extended);
        }
        Ok(next)
    }

    fn fail(&mut self, e: LoomError) -> Option<Result<RouteDetail, LoomError>> {
        self.finished = true;
        self.frontier.clear();
        Some(Err(e))
    }
}

impl Iterator for RouteIter {
    type Item = Result<RouteDetail, LoomError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.yielded >= self.max_routes {
                self.finished = true;
                return None;
            }
            if self.cancel.is_cancelled() {
                return self.fail(LoomError::Cancelled);
            }
            let Some(route) = self.pop() else {
                self.finished = true;
                return None;
            };
            if route.at == self.to {
                self.yielded += 1;
                return Some(Ok(RouteDetail {
                    edges: route.edges,
                    total_cost: route.cost,
                }));
            }
            if route.edges.len() >= self.max_hops {
                continue;
            }
            let extensions = match self.expand(&route) {
                Ok(extensions) => extensions,
                Err(e) => return self.fail(e),
            };
            match self.mode {
                SearchMode::DepthFirst => self.frontier.extend(extensions.into_iter().rev()),
                SearchMode::BreadthFirst => self.frontier.extend(extensions),
            }
        }
        None
    }
}
