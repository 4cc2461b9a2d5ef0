//! # Validation Tier Tests (T0-T5)
//!
//! If ANY tier fails, the engine is INVALID.
//!
//! ## Tiers
//! - T0: Entity Integrity
//! - T1: Cascading Deletes
//! - T2: Enumeration and Filters
//! - T3: Traversal
//! - T4: Vector Search
//! - T5: Durability

use loomgraph_core::{
    Edge, EngineSettings, EnumerationOrder, EnumerationQuery, Filter, Graph, LoomClient,
    LoomError, Node, Owner, RouteRequest, SearchMode, SearchType, SubgraphRequest, Tenant,
    VectorDomain, VectorIndexConfig, VectorMetadata, VectorSearchRequest,
};
use std::collections::BTreeSet;
use uuid::Uuid;

struct Fixture {
    client: LoomClient,
    tenant: Uuid,
    graph: Uuid,
}

fn fixture() -> Fixture {
    let client = LoomClient::in_memory(EngineSettings::default()).expect("open");
    let tenant = client.tenants().create(Tenant::new("tier")).expect("tenant").guid;
    let graph = client
        .graphs()
        .create(Graph::new(tenant, "tier-graph"))
        .expect("graph")
        .guid;
    Fixture {
        client,
        tenant,
        graph,
    }
}

impl Fixture {
    fn node(&self, name: &str) -> Node {
        self.client
            .nodes()
            .create(Node::new(self.tenant, self.graph, name))
            .expect("node")
    }

    fn edge(&self, from: Uuid, to: Uuid, cost: f64) -> Edge {
        self.client
            .edges()
            .create(Edge::new(self.tenant, self.graph, from, to, "link", cost))
            .expect("edge")
    }
}

// =============================================================================
// TIER T0: ENTITY INTEGRITY
// =============================================================================

mod t0_entity_integrity {
    use super::*;

    /// T0.1: A created record reads back unchanged.
    #[test]
    fn created_reads_back_equal() {
        let f = fixture();
        let node = f
            .client
            .nodes()
            .create(
                Node::new(f.tenant, f.graph, "alice")
                    .with_label("person")
                    .with_tag("team", "core")
                    .with_data(serde_json::json!({"age": 36, "langs": ["rust", "go"]})),
            )
            .expect("create");
        let read = f
            .client
            .nodes()
            .read_by_guid(f.tenant, f.graph, node.guid)
            .expect("read");
        assert_eq!(read, Some(node));
    }

    /// T0.2: A vector whose length disagrees with its dimensionality is rejected.
    #[test]
    fn dimensionality_mismatch_rejected() {
        let f = fixture();
        let node = f.node("n");
        let mut vector =
            VectorMetadata::new(f.tenant, f.graph, "m", vec![0.1, 0.2, 0.3, 0.4]).for_node(node.guid);
        vector.dimensionality = 3;
        assert!(matches!(
            f.client.vectors().create(vector),
            Err(LoomError::BadRequest(_))
        ));
    }

    /// T0.3: Reusing a GUID is a conflict.
    #[test]
    fn guid_collision_conflicts() {
        let f = fixture();
        let node = f.node("n");
        let mut again = Node::new(f.tenant, f.graph, "again");
        again.guid = node.guid;
        assert!(matches!(
            f.client.nodes().create(again),
            Err(LoomError::Conflict(_))
        ));
    }

    /// T0.4: Records are invisible outside their tenant.
    #[test]
    fn tenants_are_isolated() {
        let f = fixture();
        let node = f.node("n");
        let other = f.client.tenants().create(Tenant::new("other")).expect("tenant");
        assert_eq!(
            f.client
                .nodes()
                .read_by_guid(other.guid, f.graph, node.guid)
                .expect("read"),
            None
        );
    }

    /// T0.5: A failing batch leaves nothing behind.
    #[test]
    fn create_many_is_all_or_nothing() {
        let f = fixture();
        let batch = vec![
            Node::new(f.tenant, f.graph, "ok"),
            Node::new(f.tenant, f.graph, ""),
        ];
        assert!(f.client.nodes().create_many(f.tenant, f.graph, batch).is_err());
        let page = f
            .client
            .nodes()
            .enumerate(f.tenant, f.graph, &EnumerationQuery::new())
            .expect("enumerate");
        assert!(page.objects.is_empty());
    }
}

// =============================================================================
// TIER T1: CASCADING DELETES
// =============================================================================

mod t1_cascades {
    use super::*;

    /// T1.1: A non-empty graph needs `force`; forced deletion removes every
    /// descendant.
    #[test]
    fn forced_graph_delete_removes_descendants() {
        let f = fixture();
        let a = f
            .client
            .nodes()
            .create(
                Node::new(f.tenant, f.graph, "a")
                    .with_label("x")
                    .with_tag("k", "v")
                    .with_vector("m", vec![1.0, 0.0]),
            )
            .expect("node");
        let b = f.node("b");
        let edge = f.edge(a.guid, b.guid, 1.0);
        let labels = f
            .client
            .labels()
            .read_for_owner(f.tenant, f.graph, Owner::Node(a.guid))
            .expect("labels");
        let tags = f
            .client
            .tags()
            .read_for_owner(f.tenant, f.graph, Owner::Node(a.guid))
            .expect("tags");
        assert_eq!((labels.len(), tags.len(), a.vectors.len()), (1, 1, 1));

        assert!(matches!(
            f.client.graphs().delete_by_guid(f.tenant, f.graph, false),
            Err(LoomError::Conflict(_))
        ));
        f.client
            .graphs()
            .delete_by_guid(f.tenant, f.graph, true)
            .expect("forced delete");

        assert!(!f.client.graphs().exists_by_guid(f.tenant, f.graph).expect("graph"));
        for node in [a.guid, b.guid] {
            assert!(!f.client.nodes().exists_by_guid(f.tenant, f.graph, node).expect("node"));
        }
        assert!(!f.client.edges().exists_by_guid(f.tenant, f.graph, edge.guid).expect("edge"));
        assert!(!f.client.labels().exists_by_guid(f.tenant, f.graph, labels[0].guid).expect("label"));
        assert!(!f.client.tags().exists_by_guid(f.tenant, f.graph, tags[0].guid).expect("tag"));
        assert!(
            !f.client
                .vectors()
                .exists_by_guid(f.tenant, f.graph, a.vectors[0].guid)
                .expect("vector")
        );
    }

    /// T1.2: Deleting a tenant removes its graphs.
    #[test]
    fn tenant_delete_cascades() {
        let f = fixture();
        f.node("n");
        f.client.tenants().delete_by_guid(f.tenant).expect("delete");
        assert!(!f.client.graphs().exists_by_guid(f.tenant, f.graph).expect("exists"));
        let stats = f.client.statistics().all_tenants().expect("stats");
        assert!(stats.is_empty());
    }

    /// T1.3: Deleting an edge leaves its endpoints.
    #[test]
    fn edge_delete_keeps_nodes() {
        let f = fixture();
        let (a, b) = (f.node("a"), f.node("b"));
        let edge = f.edge(a.guid, b.guid, 1.0);
        f.client
            .edges()
            .delete_by_guid(f.tenant, f.graph, edge.guid)
            .expect("delete");
        assert!(f.client.nodes().exists_by_guid(f.tenant, f.graph, a.guid).expect("a"));
        assert!(f.client.nodes().exists_by_guid(f.tenant, f.graph, b.guid).expect("b"));
    }
}

// =============================================================================
// TIER T2: ENUMERATION AND FILTERS
// =============================================================================

mod t2_enumeration {
    use super::*;

    /// T2.1: Eight alternating nodes; label filters select the even ones and
    /// the best-connected node ranks first.
    #[test]
    fn odd_even_scenario() {
        let f = fixture();
        let mut nodes = Vec::new();
        for i in 1..=8 {
            let parity = if i % 2 == 0 { "even" } else { "odd" };
            let node = Node::new(f.tenant, f.graph, format!("N{i}"))
                .with_label("node")
                .with_label(parity);
            nodes.push(f.client.nodes().create(node).expect("node"));
        }
        for window in nodes.windows(2) {
            f.edge(window[0].guid, window[1].guid, 1.0);
        }
        for other in &nodes[2..] {
            f.edge(nodes[0].guid, other.guid, 1.0);
        }

        let evens: Vec<String> = f
            .client
            .nodes()
            .read_many(
                f.tenant,
                f.graph,
                Filter::new().with_label("even").with_label("node"),
                EnumerationOrder::CreatedAscending,
            )
            .expect("cursor")
            .map(|node| node.expect("node").name)
            .collect();
        assert_eq!(evens, vec!["N2", "N4", "N6", "N8"]);

        let ranked = f
            .client
            .traversal()
            .most_connected(f.tenant, f.graph, &Filter::new(), 3)
            .expect("ranking");
        assert_eq!(ranked[0].node.name, "N1");
        assert_eq!(ranked[0].total_edges, 7);
        assert!(ranked.windows(2).all(|w| w[0].total_edges >= w[1].total_edges));
    }

    /// T2.2: Pages joined by continuation tokens cover every record once,
    /// even with inserts between page fetches.
    #[test]
    fn continuation_pages_are_stable() {
        let f = fixture();
        let created: Vec<Uuid> = (0..25).map(|i| f.node(&format!("n{i}")).guid).collect();

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = f
                .client
                .nodes()
                .enumerate(
                    f.tenant,
                    f.graph,
                    &EnumerationQuery::new()
                        .with_max_results(7)
                        .with_continuation(token),
                )
                .expect("page");
            seen.extend(page.objects.iter().map(|node| node.guid));
            f.client
                .nodes()
                .create(Node::new(f.tenant, f.graph, "late").with_label("late"))
                .expect("late insert");
            if !page.has_more {
                break;
            }
            token = page.continuation_token;
        }
        let unique: BTreeSet<Uuid> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len());
        let expected: BTreeSet<Uuid> = created.into_iter().collect();
        assert!(expected.is_subset(&unique));
    }

    /// T2.3: JSON path predicates select on data.
    #[test]
    fn expression_filter() {
        let f = fixture();
        for age in [20, 30, 40] {
            f.client
                .nodes()
                .create(
                    Node::new(f.tenant, f.graph, format!("p{age}"))
                        .with_data(serde_json::json!({"person": {"age": age}})),
                )
                .expect("node");
        }
        let expr = loomgraph_core::Expr::compare(
            "person.age",
            loomgraph_core::Operator::GreaterThanOrEqualTo,
            30,
        )
        .expect("expr");
        let page = f
            .client
            .nodes()
            .enumerate(
                f.tenant,
                f.graph,
                &EnumerationQuery::new()
                    .with_filter(Filter::new().with_expr(expr))
                    .with_count(),
            )
            .expect("page");
        assert_eq!(page.total_records, Some(2));
    }

    /// T2.4: Out-of-range page sizes are rejected.
    #[test]
    fn max_results_bounds() {
        let f = fixture();
        for bad in [0, 1001] {
            assert!(matches!(
                f.client.nodes().enumerate(
                    f.tenant,
                    f.graph,
                    &EnumerationQuery::new().with_max_results(bad)
                ),
                Err(LoomError::BadRequest(_))
            ));
        }
    }
}

// =============================================================================
// TIER T3: TRAVERSAL
// =============================================================================

mod t3_traversal {
    use super::*;

    /// A -> B (1), B -> C (1), A -> C (5)
    fn triangle(f: &Fixture) -> (Node, Node, Node) {
        let (a, b, c) = (f.node("A"), f.node("B"), f.node("C"));
        f.edge(a.guid, b.guid, 1.0);
        f.edge(b.guid, c.guid, 1.0);
        f.edge(a.guid, c.guid, 5.0);
        (a, b, c)
    }

    /// T3.1: Breadth first yields the direct edge before the two-hop path.
    #[test]
    fn breadth_first_hop_minimal_first() {
        let f = fixture();
        let (a, _, c) = triangle(&f);
        let request =
            RouteRequest::new(f.tenant, f.graph, a.guid, c.guid).with_mode(SearchMode::BreadthFirst);
        let routes: Vec<_> = f
            .client
            .traversal()
            .routes(&request)
            .expect("routes")
            .map(|r| r.expect("route"))
            .collect();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].edges.len(), 1);
        assert_eq!(routes[0].total_cost, 5.0);
        assert_eq!(routes[1].edges.len(), 2);
        assert_eq!(routes[1].total_cost, 2.0);
    }

    /// T3.2: Depth first yields both routes; costs are edge sums.
    #[test]
    fn depth_first_yields_all() {
        let f = fixture();
        let (a, _, c) = triangle(&f);
        let routes: Vec<_> = f
            .client
            .traversal()
            .routes(&RouteRequest::new(f.tenant, f.graph, a.guid, c.guid))
            .expect("routes")
            .map(|r| r.expect("route"))
            .collect();
        assert_eq!(routes.len(), 2);
        for route in routes {
            let sum: f64 = route.edges.iter().map(|e| e.cost).sum();
            assert_eq!(route.total_cost, sum);
        }
    }

    /// T3.3: Back edges neither loop nor block other paths.
    #[test]
    fn cycles_terminate() {
        let f = fixture();
        let (a, b, c) = triangle(&f);
        f.edge(c.guid, a.guid, 1.0);
        f.edge(b.guid, a.guid, 1.0);
        let count = f
            .client
            .traversal()
            .routes(&RouteRequest::new(f.tenant, f.graph, a.guid, c.guid))
            .expect("routes")
            .count();
        assert_eq!(count, 2);
    }

    /// T3.4: Depth one returns the root and its direct neighbors only.
    #[test]
    fn subgraph_depth_one() {
        let f = fixture();
        let (a, b, c) = triangle(&f);
        let far = f.node("far");
        f.edge(c.guid, far.guid, 1.0);

        let result = f
            .client
            .traversal()
            .subgraph(&SubgraphRequest::new(f.tenant, f.graph, b.guid).with_max_depth(1))
            .expect("subgraph");
        let nodes: BTreeSet<Uuid> = result.nodes.iter().map(|n| n.guid).collect();
        assert_eq!(nodes, BTreeSet::from([a.guid, b.guid, c.guid]));
        for edge in &result.edges {
            assert!(nodes.contains(&edge.from) && nodes.contains(&edge.to));
        }
    }
}

// =============================================================================
// TIER T4: VECTOR SEARCH
// =============================================================================

mod t4_vectors {
    use super::*;

    fn seeded() -> Fixture {
        let f = fixture();
        for i in 0..10 {
            let angle = i as f32 * 0.15;
            f.client
                .nodes()
                .create(
                    Node::new(f.tenant, f.graph, format!("v{i}"))
                        .with_vector("m", vec![angle.cos(), angle.sin(), 0.5]),
                )
                .expect("node");
        }
        f
    }

    fn search(f: &Fixture, search_type: SearchType) -> Vec<loomgraph_core::VectorSearchResult> {
        let request = VectorSearchRequest::new(f.tenant, f.graph, VectorDomain::Node, vec![1.0, 0.0, 0.5])
            .with_search_type(search_type)
            .with_top_k(3);
        f.client
            .vectors()
            .search(&request)
            .expect("search")
            .map(|r| r.expect("result"))
            .collect()
    }

    /// T4.1: Similarity descends, distance ascends, top_k caps the results.
    #[test]
    fn ordering_and_top_k() {
        let f = seeded();
        let similar = search(&f, SearchType::CosineSimilarity);
        assert_eq!(similar.len(), 3);
        assert!(similar.windows(2).all(|w| w[0].score >= w[1].score));

        for distance_type in [SearchType::CosineDistance, SearchType::EuclideanDistance] {
            let near = search(&f, distance_type);
            assert!(near.len() <= 3);
            assert!(near.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    /// T4.2: The index returns what a scan returns.
    #[test]
    fn index_matches_scan() {
        let f = seeded();
        let scanned: Vec<Uuid> = search(&f, SearchType::DotProduct)
            .iter()
            .map(|r| r.entity.guid())
            .collect();
        f.client
            .vector_index()
            .enable(f.tenant, f.graph, VectorIndexConfig::new(3))
            .expect("enable");
        let indexed: Vec<Uuid> = search(&f, SearchType::DotProduct)
            .iter()
            .map(|r| r.entity.guid())
            .collect();
        assert_eq!(scanned, indexed);
    }
}

// =============================================================================
// TIER T5: DURABILITY
// =============================================================================

mod t5_durability {
    use super::*;
    use loomgraph_core::StorageSettings;
    use tempfile::tempdir;

    /// T5.1: Everything survives a close and reopen.
    #[test]
    fn reopen_preserves_records() {
        let dir = tempdir().expect("tempdir");
        let settings = EngineSettings {
            storage: StorageSettings {
                path: dir.path().join("loom.redb"),
            },
            ..EngineSettings::default()
        };

        let (tenant, graph, node) = {
            let client = LoomClient::open(settings.clone()).expect("open");
            let tenant = client.tenants().create(Tenant::new("durable")).expect("tenant");
            let graph = client
                .graphs()
                .create(Graph::new(tenant.guid, "g"))
                .expect("graph");
            let node = client
                .nodes()
                .create(Node::new(tenant.guid, graph.guid, "n").with_label("kept"))
                .expect("node");
            (tenant.guid, graph.guid, node)
        };

        let client = LoomClient::open(settings).expect("reopen");
        let read = client
            .nodes()
            .read_by_guid(tenant, graph, node.guid)
            .expect("read");
        assert_eq!(read, Some(node));
    }
}
