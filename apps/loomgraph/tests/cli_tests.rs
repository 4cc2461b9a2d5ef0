//! # CLI Tests
//!
//! Argument parsing, settings loading and command behavior against a store
//! in a temporary directory.

#![allow(clippy::panic)]

use clap::Parser;
use loomgraph::cli::{
    Cli, Commands, RouteArgs, RouteMode, SearchArgs, StatsReport, SubgraphArgs, cmd_init,
    cmd_ranking, cmd_reindex, cmd_route, cmd_search, cmd_stats, cmd_subgraph, cmd_subgraph_counts,
    execute, load_settings, open_client,
};
use loomgraph_core::{
    Edge, EngineSettings, ErrorKind, LoomClient, Node, SearchMode, SearchType, VectorDomain,
};
use std::path::Path;
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

struct Fixture {
    _dir: TempDir,
    settings: EngineSettings,
    tenant: Uuid,
    graph: Uuid,
}

/// A store with one tenant and graph, created through `init`.
fn fixture() -> Fixture {
    let dir = tempdir().expect("tempdir");
    let settings = load_settings(None, Some(dir.path().join("graph.redb").as_path())).expect("settings");
    let report = cmd_init(settings.clone(), Some("acme"), Some("social"), false).expect("init");
    Fixture {
        _dir: dir,
        settings,
        tenant: report.tenant.expect("tenant").guid,
        graph: report.graph.expect("graph").guid,
    }
}

fn client(fixture: &Fixture) -> LoomClient {
    open_client(fixture.settings.clone()).expect("open")
}

/// a -> b -> c, plus a direct a -> c.
fn triangle(client: &LoomClient, fixture: &Fixture) -> [Uuid; 3] {
    let (t, g) = (fixture.tenant, fixture.graph);
    let ids = ["a", "b", "c"].map(|name| {
        client
            .nodes()
            .create(Node::new(t, g, name).with_vector("emb", vec![name.len() as f32, 1.0]))
            .expect("node")
            .guid
    });
    for (from, to, cost) in [(0, 1, 1.0), (1, 2, 1.0), (0, 2, 5.0)] {
        client
            .edges()
            .create(Edge::new(t, g, ids[from], ids[to], "e", cost))
            .expect("edge");
    }
    ids
}

// =============================================================================
// PARSING
// =============================================================================

#[test]
fn parses_global_flags_after_subcommand() {
    let tenant = Uuid::new_v4();
    let cli = Cli::try_parse_from([
        "loomgraph",
        "stats",
        "--tenant",
        &tenant.to_string(),
        "--json",
        "-D",
        "x.redb",
    ])
    .expect("parse");
    assert!(cli.json);
    assert_eq!(cli.database.as_deref(), Some(Path::new("x.redb")));
    match cli.command {
        Some(Commands::Stats { tenant: t, graph }) => {
            assert_eq!(t, Some(tenant));
            assert_eq!(graph, None);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn parses_route_mode_and_vector() {
    let id = Uuid::new_v4().to_string();
    let cli = Cli::try_parse_from([
        "loomgraph", "route", "--tenant", &id, "--graph", &id, "--from", &id, "--to", &id,
        "--mode", "breadth", "--max-hops", "3",
    ])
    .expect("parse");
    match cli.command {
        Some(Commands::Route { mode, max_hops, .. }) => {
            assert_eq!(mode, RouteMode::Breadth);
            assert_eq!(SearchMode::from(mode), SearchMode::BreadthFirst);
            assert_eq!(max_hops, Some(3));
        }
        other => panic!("unexpected command {other:?}"),
    }

    let cli = Cli::try_parse_from([
        "loomgraph", "search", "--tenant", &id, "--graph", &id, "--vector", "0.5,-1,2",
    ])
    .expect("parse");
    match cli.command {
        Some(Commands::Search {
            vector,
            search_type,
            domain,
            ..
        }) => {
            assert_eq!(vector, vec![0.5, -1.0, 2.0]);
            assert_eq!(search_type, "cosine_similarity");
            assert_eq!(domain, "node");
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn rejects_malformed_arguments() {
    assert!(Cli::try_parse_from(["loomgraph", "stats", "--tenant", "not-a-guid"]).is_err());
    assert!(Cli::try_parse_from(["loomgraph", "stats", "--graph", &Uuid::new_v4().to_string()]).is_err());
    assert!(Cli::try_parse_from(["loomgraph", "init", "--graph", "g"]).is_err());
}

// =============================================================================
// SETTINGS
// =============================================================================

#[test]
fn toml_settings_fill_defaults_and_database_overrides() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("loomgraph.toml");
    std::fs::write(
        &config,
        "[storage]\npath = \"from-config.redb\"\n\n[routes]\nmax_hops = 4\n",
    )
    .expect("write config");

    let settings = load_settings(Some(config.as_path()), None).expect("settings");
    assert_eq!(settings.routes.max_hops, 4);
    assert_eq!(settings.enumeration, EngineSettings::default().enumeration);
    assert_eq!(settings.storage.path, Path::new("from-config.redb"));

    let overridden = load_settings(Some(config.as_path()), Some(Path::new("flag.redb"))).expect("settings");
    assert_eq!(overridden.storage.path, Path::new("flag.redb"));
}

#[test]
fn invalid_settings_are_bad_requests() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("bad.toml");

    std::fs::write(&config, "[routes]\nmax_hops = \"many\"\n").expect("write");
    let err = load_settings(Some(config.as_path()), None).expect_err("type error");
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    std::fs::write(&config, "[enumeration]\ndefault_max_results = 0\n").expect("write");
    let err = load_settings(Some(config.as_path()), None).expect_err("out of range");
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let err = load_settings(Some(dir.path().join("missing.toml").as_path()), None).expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn init_refuses_to_overwrite_without_force() {
    let fixture = fixture();
    let err = cmd_init(fixture.settings.clone(), None, None, false).expect_err("exists");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let report = cmd_init(fixture.settings.clone(), None, None, true).expect("force");
    assert!(report.tenant.is_none());
    match cmd_stats(&client(&fixture), None, None).expect("stats") {
        StatsReport::All(all) => assert!(all.is_empty()),
        other => panic!("unexpected report {other:?}"),
    }
}

#[test]
fn commands_other_than_init_need_an_existing_store() {
    let dir = tempdir().expect("tempdir");
    let settings = load_settings(None, Some(dir.path().join("absent.redb").as_path())).expect("settings");
    let err = open_client(settings).expect_err("absent");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!dir.path().join("absent.redb").exists());
}

#[test]
fn stats_scopes() {
    let fixture = fixture();
    let client = client(&fixture);
    triangle(&client, &fixture);

    match cmd_stats(&client, Some(fixture.tenant), Some(fixture.graph)).expect("graph") {
        StatsReport::Graph(stats) => {
            assert_eq!(stats.nodes, 3);
            assert_eq!(stats.edges, 3);
            assert_eq!(stats.vectors, 3);
        }
        other => panic!("unexpected report {other:?}"),
    }
    match cmd_stats(&client, Some(fixture.tenant), None).expect("tenant") {
        StatsReport::Tenant(stats) => assert_eq!(stats.graphs, 1),
        other => panic!("unexpected report {other:?}"),
    }
    let err = cmd_stats(&client, Some(Uuid::new_v4()), None).expect_err("unknown tenant");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn route_and_subgraph_commands() {
    let fixture = fixture();
    let client = client(&fixture);
    let [a, b, c] = triangle(&client, &fixture);

    let args = RouteArgs {
        tenant: fixture.tenant,
        graph: fixture.graph,
        from: a,
        to: c,
        mode: SearchMode::BreadthFirst,
        max_hops: None,
    };
    let routes = cmd_route(&client, &args).expect("routes");
    let costs: Vec<f64> = routes.iter().map(|r| r.total_cost).collect();
    assert_eq!(costs, vec![5.0, 2.0]);

    let limited = cmd_route(&client, &RouteArgs { max_hops: Some(1), ..args.clone() }).expect("routes");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].nodes(), vec![a, c]);

    let sub = SubgraphArgs {
        tenant: fixture.tenant,
        graph: fixture.graph,
        node: b,
        depth: 1,
        max_nodes: 0,
        max_edges: 0,
    };
    let result = cmd_subgraph(&client, &sub).expect("subgraph");
    assert_eq!(result.nodes.len(), 3);
    assert_eq!(result.nodes[0].guid, b);
    let counts = cmd_subgraph_counts(&client, &sub).expect("counts");
    assert_eq!(counts.node_count, result.nodes.len());
    assert_eq!(counts.edge_count, result.edges.len());
}

#[test]
fn ranking_command_orders_by_degree() {
    let fixture = fixture();
    let client = client(&fixture);
    let [a, _, _] = triangle(&client, &fixture);

    let most = cmd_ranking(&client, fixture.tenant, fixture.graph, false, 2).expect("most");
    assert_eq!(most.len(), 2);
    assert_eq!(most[0].total_edges, 2);

    let least = cmd_ranking(&client, fixture.tenant, fixture.graph, true, 3).expect("least");
    assert!(least.iter().all(|r| r.total_edges == 2));
    assert_eq!(least[0].node.guid, a);

    let err = cmd_ranking(&client, fixture.tenant, fixture.graph, false, 0).expect_err("zero");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn reindex_and_search_commands() {
    let fixture = fixture();
    let client = client(&fixture);
    triangle(&client, &fixture);
    let (t, g) = (fixture.tenant, fixture.graph);

    let err = cmd_reindex(&client, t, g, None).expect_err("no index");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let enabled = cmd_reindex(&client, t, g, Some(2)).expect("enable");
    assert_eq!(enabled.vector_count, 3);
    let rebuilt = cmd_reindex(&client, t, g, None).expect("rebuild");
    assert_eq!(rebuilt.vector_count, 3);

    let args = SearchArgs {
        tenant: t,
        graph: g,
        vector: vec![1.0, 1.0],
        search_type: SearchType::CosineSimilarity,
        domain: VectorDomain::Node,
        top_k: Some(2),
    };
    let hits = cmd_search(&client, &args).expect("search");
    assert_eq!(hits.len(), 2);
    assert!(hits[0].score >= hits[1].score);

    let err = cmd_search(&client, &SearchArgs { vector: vec![1.0, 1.0, 1.0], ..args }).expect_err("dims");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn execute_runs_parsed_commands() {
    let dir = tempdir().expect("tempdir");
    let db = dir.path().join("exec.redb");
    let db = db.to_str().expect("utf-8 path");

    execute(Cli::try_parse_from(["loomgraph", "-D", db, "init", "--tenant", "t"]).expect("parse"))
        .expect("init");
    execute(Cli::try_parse_from(["loomgraph", "-D", db, "--json"]).expect("parse")).expect("stats");

    let err = execute(
        Cli::try_parse_from([
            "loomgraph", "-D", db, "search", "--tenant", &Uuid::new_v4().to_string(),
            "--graph", &Uuid::new_v4().to_string(), "--vector", "1", "--type", "manhattan",
        ])
        .expect("parse"),
    )
    .expect_err("unknown search type");
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}
