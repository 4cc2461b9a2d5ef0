//! # Graph Benchmarks
//!
//! Performance benchmarks for loomgraph-core writes, traversal and vector
//! search over in-memory stores.
//!
//! Run with: `cargo bench -p loomgraph-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use loomgraph_core::{
    Edge, EngineSettings, Graph, LoomClient, Node, RouteRequest, SearchMode, SubgraphRequest,
    Tenant, VectorDomain, VectorIndexConfig, VectorSearchRequest,
};
use std::hint::black_box;
use uuid::Uuid;

struct Bench {
    client: LoomClient,
    tenant: Uuid,
    graph: Uuid,
    nodes: Vec<Uuid>,
}

fn empty_graph() -> Bench {
    let client = LoomClient::in_memory(EngineSettings::default()).expect("open");
    let tenant = client.tenants().create(Tenant::new("bench")).expect("tenant").guid;
    let graph = client.graphs().create(Graph::new(tenant, "bench")).expect("graph").guid;
    Bench {
        client,
        tenant,
        graph,
        nodes: Vec::new(),
    }
}

/// A grid of `side * side` nodes with edges right and down, so the number
/// of corner-to-corner routes grows combinatorially.
fn create_grid_graph(side: usize) -> Bench {
    let mut bench = empty_graph();
    let nodes: Vec<Node> = (0..side * side)
        .map(|i| Node::new(bench.tenant, bench.graph, format!("n{i}")))
        .collect();
    bench.nodes = bench
        .client
        .nodes()
        .create_many(bench.tenant, bench.graph, nodes)
        .expect("nodes")
        .into_iter()
        .map(|n| n.guid)
        .collect();

    let mut edges = Vec::new();
    for row in 0..side {
        for col in 0..side {
            let at = row * side + col;
            if col + 1 < side {
                edges.push(Edge::new(bench.tenant, bench.graph, bench.nodes[at], bench.nodes[at + 1], "right", 1.0));
            }
            if row + 1 < side {
                edges.push(Edge::new(bench.tenant, bench.graph, bench.nodes[at], bench.nodes[at + side], "down", 1.0));
            }
        }
    }
    bench
        .client
        .edges()
        .create_many(bench.tenant, bench.graph, edges)
        .expect("edges");
    bench
}

/// `size` nodes, each with one embedding of `dims` values.
fn create_vector_graph(size: usize, dims: usize) -> Bench {
    let bench = empty_graph();
    let nodes: Vec<Node> = (0..size)
        .map(|i| {
            let values = (0..dims).map(|d| ((i * 31 + d * 7) % 97) as f32 / 97.0).collect();
            Node::new(bench.tenant, bench.graph, format!("v{i}")).with_vector("bench", values)
        })
        .collect();
    bench
        .client
        .nodes()
        .create_many(bench.tenant, bench.graph, nodes)
        .expect("nodes");
    bench
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_node_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_insertion");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let bench = empty_graph();
                let nodes: Vec<Node> = (0..size)
                    .map(|i| Node::new(bench.tenant, bench.graph, format!("n{i}")))
                    .collect();
                black_box(
                    bench
                        .client
                        .nodes()
                        .create_many(bench.tenant, bench.graph, nodes)
                        .expect("nodes"),
                )
            });
        });
    }

    group.finish();
}

fn bench_routes(c: &mut Criterion) {
    let mut group = c.benchmark_group("routes");

    for side in [3, 4, 5].iter() {
        let bench = create_grid_graph(*side);
        let (from, to) = (bench.nodes[0], bench.nodes[bench.nodes.len() - 1]);
        for mode in [SearchMode::DepthFirst, SearchMode::BreadthFirst] {
            let request = RouteRequest::new(bench.tenant, bench.graph, from, to).with_mode(mode);
            group.bench_with_input(
                BenchmarkId::new(format!("{mode:?}"), side),
                &request,
                |b, request| {
                    b.iter(|| {
                        let count = bench
                            .client
                            .traversal()
                            .routes(black_box(request))
                            .expect("routes")
                            .count();
                        black_box(count)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_subgraph(c: &mut Criterion) {
    let mut group = c.benchmark_group("subgraph");
    let bench = create_grid_graph(10);

    for depth in [1, 3, 6].iter() {
        let request = SubgraphRequest::new(bench.tenant, bench.graph, bench.nodes[0]).with_max_depth(*depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &request, |b, request| {
            b.iter(|| black_box(bench.client.traversal().subgraph(black_box(request)).expect("subgraph")));
        });
    }

    group.finish();
}

fn bench_vector_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_search");
    let query: Vec<f32> = (0..64).map(|d| d as f32 / 64.0).collect();

    for size in [100, 1000].iter() {
        let bench = create_vector_graph(*size, 64);
        let request = VectorSearchRequest::new(bench.tenant, bench.graph, VectorDomain::Node, query.clone())
            .with_top_k(10);
        group.bench_with_input(BenchmarkId::new("scan", size), &request, |b, request| {
            b.iter(|| {
                let hits: Vec<_> = bench
                    .client
                    .vectors()
                    .search(black_box(request))
                    .expect("search")
                    .collect();
                black_box(hits)
            });
        });

        bench
            .client
            .vector_index()
            .enable(bench.tenant, bench.graph, VectorIndexConfig::new(64))
            .expect("enable");
        group.bench_with_input(BenchmarkId::new("indexed", size), &request, |b, request| {
            b.iter(|| {
                let hits: Vec<_> = bench
                    .client
                    .vectors()
                    .search(black_box(request))
                    .expect("search")
                    .collect();
                black_box(hits)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_node_insertion,
    bench_routes,
    bench_subgraph,
    bench_vector_search,
);

criterion_main!(benches);
