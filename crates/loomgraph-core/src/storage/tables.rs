//! redb table layout.
//!
//! All GUIDs are stored as `u128`; timestamps as microseconds since epoch.

use redb::TableDefinition;

/// Entity tables: (tenant, guid) -> postcard-encoded record.
///
/// Tenants key on (guid, guid) so the layout stays uniform.
pub(crate) type EntityTable = TableDefinition<'static, (u128, u128), &'static [u8]>;

pub(crate) const TENANTS: EntityTable = TableDefinition::new("tenants");
pub(crate) const USERS: EntityTable = TableDefinition::new("users");
pub(crate) const CREDENTIALS: EntityTable = TableDefinition::new("credentials");
pub(crate) const GRAPHS: EntityTable = TableDefinition::new("graphs");
pub(crate) const NODES: EntityTable = TableDefinition::new("nodes");
pub(crate) const EDGES: EntityTable = TableDefinition::new("edges");
pub(crate) const LABELS: EntityTable = TableDefinition::new("labels");
pub(crate) const TAGS: EntityTable = TableDefinition::new("tags");
pub(crate) const VECTORS: EntityTable = TableDefinition::new("vectors");

/// Creation-order index: (kind, tenant, scope, created_micros, guid).
///
/// `scope` is the graph for graph content, nil otherwise.
pub(crate) type OrderTuple = (u8, u128, u128, i64, u128);
pub(crate) const CREATION_ORDER: TableDefinition<OrderTuple, ()> =
    TableDefinition::new("creation_order");

/// Adjacency: (tenant, node, edge) -> the edge's other endpoint.
pub(crate) type AdjacencyTable = TableDefinition<'static, (u128, u128, u128), u128>;
pub(crate) const EDGES_OUT: AdjacencyTable = TableDefinition::new("edges_out");
pub(crate) const EDGES_IN: AdjacencyTable = TableDefinition::new("edges_in");

/// Ownership of subordinate records: (tenant, owner, kind, guid).
pub(crate) const OWNED: TableDefinition<(u128, u128, u8, u128), ()> =
    TableDefinition::new("owned");

/// Persisted vector index configuration: (tenant, graph) -> postcard bytes.
pub(crate) const INDEX_CONFIGS: TableDefinition<(u128, u128), &[u8]> =
    TableDefinition::new("vector_index_configs");

/// Vector-relevant mutation counter per (tenant, graph).
///
/// An index artifact is only trusted when its recorded generation matches.
pub(crate) const INDEX_GENERATIONS: TableDefinition<(u128, u128), u64> =
    TableDefinition::new("vector_index_generations");

/// Table for metadata: key string -> value u64
pub(crate) const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

pub(crate) const SCHEMA_VERSION_KEY: &str = "schema_version";
