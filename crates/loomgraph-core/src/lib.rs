//! # loomgraph-core
//!
//! An embedded, multi-tenant property-graph engine.
//!
//! Tenants own users, credentials and graphs; graphs hold nodes and
//! directed, weighted edges; graphs, nodes and edges carry labels, tags,
//! free-form JSON data and embedding vectors. Everything is persisted in a
//! single redb file.
//!
//! ## Layers
//!
//! - `storage`: primitive store over redb tables, with cascading deletes
//! - `client`: the validating [`LoomClient`] and its method groups
//! - `filter` / `expr`: the predicate language shared by every read path
//! - `enumeration`: ordered, filtered, paged reads and lazy cursors
//! - `traversal`: adjacency, routes, subgraphs and connectivity ranking
//! - `vector`: per-graph vector indexes and similarity search
//! - `stats`: on-demand record counts
//!
//! ## Constraints
//!
//! - No async runtime and no network dependencies
//! - Deterministic ordering wherever order is observable
//! - One writer, many snapshot readers
//! - No global state: settings and the store are passed in explicitly

// =============================================================================
// MODULES
// =============================================================================

pub mod client;
pub mod enumeration;
pub mod expr;
pub mod filter;
pub mod primitives;
pub mod settings;
pub mod stats;
pub mod storage;
pub mod traversal;
pub mod types;
pub mod vector;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Credential, Edge, ErrorKind, Graph, Label, LoomError, Node, Owner, Tag, Tags, Tenant, User,
    VectorMetadata,
};

// =============================================================================
// RE-EXPORTS: Client and Method Groups
// =============================================================================

pub use client::{
    CredentialMethods, EdgeMethods, GraphMethods, LabelMethods, LoomClient, NodeMethods,
    SubordinateMethods, TagMethods, TenantMethods, UserMethods, VectorMethods,
};
pub use settings::{
    EngineSettings, EnumerationSettings, RouteSettings, StorageSettings, VectorIndexSettings,
};
pub use stats::{GraphStatistics, StatisticsMethods, TenantStatistics};

// =============================================================================
// RE-EXPORTS: Reads
// =============================================================================

pub use enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult};
pub use expr::{Expr, Operator, PathSegment, PropertyPath};
pub use filter::{Facets, Filter, Filterable};
pub use traversal::{
    RankedNode, RouteDetail, RouteIter, RouteRequest, SearchMode, SearchResult, SubgraphRequest,
    SubgraphStatistics, TraversalMethods,
};

// =============================================================================
// RE-EXPORTS: Vectors
// =============================================================================

pub use vector::{
    MatchedEntity, Measures, SearchType, VectorDomain, VectorIndexConfig, VectorIndexMethods,
    VectorIndexStatistics, VectorSearchRequest, VectorSearchResult, VectorSearchResults,
};
