//! # CLI Command Implementations
//!
//! Each `cmd_*` returns a serializable report; [`emit`] prints it as JSON or
//! as text.

use loomgraph_core::{
    EngineSettings, Filter, Graph, GraphStatistics, LoomClient, LoomError, MatchedEntity,
    RankedNode, RouteDetail, RouteRequest, SearchMode, SearchResult, SearchType,
    SubgraphRequest, SubgraphStatistics, Tenant, TenantStatistics, VectorDomain,
    VectorIndexConfig, VectorIndexStatistics, VectorSearchRequest, VectorSearchResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a settings file (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// SETTINGS
// =============================================================================

/// Read engine settings from an optional TOML file; `database` overrides
/// `storage.path`.
pub fn load_settings(
    config: Option<&Path>,
    database: Option<&Path>,
) -> Result<EngineSettings, LoomError> {
    let mut settings = match config {
        Some(path) => {
            let metadata = std::fs::metadata(path).map_err(|e| {
                LoomError::BadRequest(format!("cannot read config {}: {e}", path.display()))
            })?;
            if metadata.len() > MAX_CONFIG_FILE_SIZE {
                return Err(LoomError::BadRequest(format!(
                    "config file size {} bytes exceeds maximum allowed {} bytes",
                    metadata.len(),
                    MAX_CONFIG_FILE_SIZE
                )));
            }
            let text = std::fs::read_to_string(path)?;
            toml::from_str::<EngineSettings>(&text).map_err(|e| {
                LoomError::BadRequest(format!("invalid config {}: {e}", path.display()))
            })?
        }
        None => EngineSettings::default(),
    };
    if let Some(path) = database {
        settings.storage.path = path.to_path_buf();
    }
    settings.validate()?;
    tracing::debug!(path = %settings.storage.path.display(), "settings loaded");
    Ok(settings)
}

/// Open an existing store. Commands other than `init` never create one.
pub fn open_client(settings: EngineSettings) -> Result<LoomClient, LoomError> {
    if !settings.storage.path.exists() {
        return Err(LoomError::NotFound(format!(
            "store {} (run `loomgraph init` first)",
            settings.storage.path.display()
        )));
    }
    LoomClient::open(settings)
}

// =============================================================================
// OUTPUT
// =============================================================================

/// A command result with a human-readable rendering.
pub trait Report: Serialize {
    fn render_text(&self) -> String;
}

/// Print `report` to stdout.
pub fn emit<R: Report>(report: &R, json: bool) -> Result<(), LoomError> {
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| LoomError::Internal(format!("encode output: {e}")))?;
        println!("{text}");
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub database: PathBuf,
    pub tenant: Option<Tenant>,
    pub graph: Option<Graph>,
}

impl Report for InitReport {
    fn render_text(&self) -> String {
        let mut out = format!("Initialized store at {}\n", self.database.display());
        if let Some(tenant) = &self.tenant {
            let _ = writeln!(out, "Tenant: {} ({})", tenant.guid, tenant.name);
        }
        if let Some(graph) = &self.graph {
            let _ = writeln!(out, "Graph:  {} ({})", graph.guid, graph.name);
        }
        out
    }
}

/// Create the store file and optionally a first tenant and graph.
pub fn cmd_init(
    settings: EngineSettings,
    tenant: Option<&str>,
    graph: Option<&str>,
    force: bool,
) -> Result<InitReport, LoomError> {
    let database = settings.storage.path.clone();
    if database.exists() {
        if !force {
            return Err(LoomError::Conflict(format!(
                "store {} already exists. Use --force to overwrite.",
                database.display()
            )));
        }
        std::fs::remove_file(&database)?;
        tracing::info!(path = %database.display(), "removed existing store");
    }

    let client = LoomClient::open(settings)?;
    let tenant = tenant
        .map(|name| client.tenants().create(Tenant::new(name)))
        .transpose()?;
    let graph = match (&tenant, graph) {
        (Some(tenant), Some(name)) => Some(client.graphs().create(Graph::new(tenant.guid, name))?),
        _ => None,
    };
    Ok(InitReport {
        database,
        tenant,
        graph,
    })
}

// =============================================================================
// STATS COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StatsReport {
    All(BTreeMap<Uuid, TenantStatistics>),
    Tenant(TenantStatistics),
    Graph(GraphStatistics),
}

fn tenant_lines(out: &mut String, stats: &TenantStatistics, indent: &str) {
    let _ = writeln!(out, "{indent}Graphs:       {}", stats.graphs);
    let _ = writeln!(out, "{indent}Nodes:        {}", stats.nodes);
    let _ = writeln!(out, "{indent}Edges:        {}", stats.edges);
    let _ = writeln!(out, "{indent}Labels:       {}", stats.labels);
    let _ = writeln!(out, "{indent}Tags:         {}", stats.tags);
    let _ = writeln!(out, "{indent}Vectors:      {}", stats.vectors);
    let _ = writeln!(out, "{indent}Users:        {}", stats.users);
    let _ = writeln!(out, "{indent}Credentials:  {}", stats.credentials);
}

impl Report for StatsReport {
    fn render_text(&self) -> String {
        let mut out = String::new();
        match self {
            Self::All(all) => {
                let _ = writeln!(out, "LoomGraph Statistics");
                let _ = writeln!(out, "====================");
                let _ = writeln!(out, "Tenants: {}", all.len());
                for (guid, stats) in all {
                    let _ = writeln!(out, "\nTenant {guid}");
                    tenant_lines(&mut out, stats, "  ");
                }
            }
            Self::Tenant(stats) => tenant_lines(&mut out, stats, ""),
            Self::Graph(stats) => {
                let _ = writeln!(out, "Nodes:    {}", stats.nodes);
                let _ = writeln!(out, "Edges:    {}", stats.edges);
                let _ = writeln!(out, "Labels:   {}", stats.labels);
                let _ = writeln!(out, "Tags:     {}", stats.tags);
                let _ = writeln!(out, "Vectors:  {}", stats.vectors);
            }
        }
        out
    }
}

pub fn cmd_stats(
    client: &LoomClient,
    tenant: Option<Uuid>,
    graph: Option<Uuid>,
) -> Result<StatsReport, LoomError> {
    let stats = client.statistics();
    match (tenant, graph) {
        (Some(tenant), Some(graph)) => Ok(StatsReport::Graph(stats.graph(tenant, graph)?)),
        (Some(tenant), None) => Ok(StatsReport::Tenant(stats.tenant(tenant)?)),
        (None, Some(_)) => Err(LoomError::BadRequest(
            "--graph requires --tenant".to_string(),
        )),
        (None, None) => Ok(StatsReport::All(stats.all_tenants()?)),
    }
}

// =============================================================================
// ROUTE COMMAND
// =============================================================================

#[derive(Debug, Clone)]
pub struct RouteArgs {
    pub tenant: Uuid,
    pub graph: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub mode: SearchMode,
    pub max_hops: Option<usize>,
}

impl Report for Vec<RouteDetail> {
    fn render_text(&self) -> String {
        if self.is_empty() {
            return "No route found\n".to_string();
        }
        let mut out = String::new();
        for (i, route) in self.iter().enumerate() {
            let path: Vec<String> = route.nodes().iter().map(Uuid::to_string).collect();
            let _ = writeln!(
                out,
                "Route {} ({} hops, cost {}):",
                i + 1,
                route.edges.len(),
                route.total_cost
            );
            let _ = writeln!(out, "  {}", path.join(" -> "));
        }
        out
    }
}

/// Enumerate every route the engine yields for the request.
pub fn cmd_route(client: &LoomClient, args: &RouteArgs) -> Result<Vec<RouteDetail>, LoomError> {
    let mut request =
        RouteRequest::new(args.tenant, args.graph, args.from, args.to).with_mode(args.mode);
    if let Some(max_hops) = args.max_hops {
        request = request.with_max_hops(max_hops);
    }
    client.traversal().routes(&request)?.collect()
}

// =============================================================================
// SUBGRAPH COMMAND
// =============================================================================

#[derive(Debug, Clone)]
pub struct SubgraphArgs {
    pub tenant: Uuid,
    pub graph: Uuid,
    pub node: Uuid,
    pub depth: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
}

impl SubgraphArgs {
    fn request(&self) -> SubgraphRequest {
        SubgraphRequest::new(self.tenant, self.graph, self.node)
            .with_max_depth(self.depth)
            .with_max_nodes(self.max_nodes)
            .with_max_edges(self.max_edges)
    }
}

impl Report for SearchResult {
    fn render_text(&self) -> String {
        let mut out = format!("Graph {} ({})\n", self.graph.guid, self.graph.name);
        let _ = writeln!(out, "Nodes ({}):", self.nodes.len());
        for node in &self.nodes {
            let _ = writeln!(out, "  {} {}", node.guid, node.name);
        }
        let _ = writeln!(out, "Edges ({}):", self.edges.len());
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "  {} {} -> {} [{}, cost {}]",
                edge.guid, edge.from, edge.to, edge.name, edge.cost
            );
        }
        out
    }
}

impl Report for SubgraphStatistics {
    fn render_text(&self) -> String {
        format!(
            "Nodes:          {}\nEdges:          {}\nDepth reached:  {}\n",
            self.node_count, self.edge_count, self.depth_reached
        )
    }
}

pub fn cmd_subgraph(client: &LoomClient, args: &SubgraphArgs) -> Result<SearchResult, LoomError> {
    client.traversal().subgraph(&args.request())
}

pub fn cmd_subgraph_counts(
    client: &LoomClient,
    args: &SubgraphArgs,
) -> Result<SubgraphStatistics, LoomError> {
    client.statistics().subgraph(&args.request())
}

// =============================================================================
// RANKING COMMAND
// =============================================================================

impl Report for Vec<RankedNode> {
    fn render_text(&self) -> String {
        let mut out = String::new();
        for (i, ranked) in self.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {} {} (in {}, out {}, total {})",
                i + 1,
                ranked.node.guid,
                ranked.node.name,
                ranked.edges_in,
                ranked.edges_out,
                ranked.total_edges
            );
        }
        out
    }
}

pub fn cmd_ranking(
    client: &LoomClient,
    tenant: Uuid,
    graph: Uuid,
    least: bool,
    limit: usize,
) -> Result<Vec<RankedNode>, LoomError> {
    let traversal = client.traversal();
    let filter = Filter::new();
    if least {
        traversal.least_connected(tenant, graph, &filter, limit)
    } else {
        traversal.most_connected(tenant, graph, &filter, limit)
    }
}

// =============================================================================
// REINDEX COMMAND
// =============================================================================

impl Report for VectorIndexStatistics {
    fn render_text(&self) -> String {
        let domains: Vec<&str> = self.domains.iter().map(|d| d.name()).collect();
        let mut out = String::new();
        let _ = writeln!(out, "Vectors:         {}", self.vector_count);
        let _ = writeln!(out, "Dimensionality:  {}", self.dimensionality);
        let _ = writeln!(out, "Domains:         {}", domains.join(", "));
        let _ = writeln!(out, "Last build:      {}", self.last_build_utc);
        if let Some(path) = &self.index_file {
            let _ = writeln!(out, "Index file:      {}", path.display());
        }
        out
    }
}

/// Rebuild the graph's index, enabling one first when `dimensions` is given
/// and none is configured.
pub fn cmd_reindex(
    client: &LoomClient,
    tenant: Uuid,
    graph: Uuid,
    dimensions: Option<usize>,
) -> Result<VectorIndexStatistics, LoomError> {
    let indexes = client.vector_index();
    match (indexes.get_configuration(tenant, graph)?, dimensions) {
        (Some(_), _) => indexes.rebuild(tenant, graph),
        (None, Some(dimensionality)) => {
            indexes.enable(tenant, graph, VectorIndexConfig::new(dimensionality))
        }
        (None, None) => Err(LoomError::NotFound(format!(
            "vector index of graph {graph} (pass --dimensions to enable one)"
        ))),
    }
}

// =============================================================================
// SEARCH COMMAND
// =============================================================================

#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub tenant: Uuid,
    pub graph: Uuid,
    pub vector: Vec<f32>,
    pub search_type: SearchType,
    pub domain: VectorDomain,
    pub top_k: Option<usize>,
}

fn entity_name(entity: &MatchedEntity) -> &str {
    match entity {
        MatchedEntity::Graph(graph) => &graph.name,
        MatchedEntity::Node(node) => &node.name,
        MatchedEntity::Edge(edge) => &edge.name,
    }
}

impl Report for Vec<VectorSearchResult> {
    fn render_text(&self) -> String {
        if self.is_empty() {
            return "No matches\n".to_string();
        }
        let mut out = String::new();
        for (i, hit) in self.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {} {} score={:.6} distance={:.6} inner_product={:.6}",
                i + 1,
                hit.entity.guid(),
                entity_name(&hit.entity),
                hit.score,
                hit.distance,
                hit.inner_product
            );
        }
        out
    }
}

pub fn cmd_search(
    client: &LoomClient,
    args: &SearchArgs,
) -> Result<Vec<VectorSearchResult>, LoomError> {
    let mut request =
        VectorSearchRequest::new(args.tenant, args.graph, args.domain, args.vector.clone())
            .with_search_type(args.search_type);
    if let Some(top_k) = args.top_k {
        request = request.with_top_k(top_k);
    }
    client.vectors().search(&request)?.collect()
}
