//! Persisted entities.
//!
//! Every entity is tenant-scoped. Graph, Node and Edge carry hydrated
//! collections (`labels`, `tags`, `vectors`) that the store keeps as
//! separate subordinate records and fills in on read.

use super::timestamp_now;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Key/value annotations of a Graph, Node or Edge.
pub type Tags = BTreeMap<String, String>;

// =============================================================================
// OWNERSHIP
// =============================================================================

/// The single owner of a Label, Tag or Vector record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Owner {
    Graph(Uuid),
    Node(Uuid),
    Edge(Uuid),
}

impl Owner {
    /// Resolve ownership the way subordinate records store it: the edge if
    /// set, else the node if set, else the graph.
    #[must_use]
    pub fn resolve(graph: Uuid, node: Option<Uuid>, edge: Option<Uuid>) -> Self {
        match (edge, node) {
            (Some(edge), _) => Self::Edge(edge),
            (None, Some(node)) => Self::Node(node),
            (None, None) => Self::Graph(graph),
        }
    }

    /// The GUID of the owning record.
    #[must_use]
    pub fn guid(&self) -> Uuid {
        match self {
            Self::Graph(guid) | Self::Node(guid) | Self::Edge(guid) => *guid,
        }
    }
}

// =============================================================================
// TENANCY AND IDENTITY
// =============================================================================

/// Top-level isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub guid: Uuid,
    pub name: String,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Tenant {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            name: name.into(),
            active: true,
            created_utc: now,
            last_update_utc: now,
        }
    }
}

/// A user account within a tenant. The password is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(
        tenant_guid: Uuid,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            password: password.into(),
            active: true,
            created_utc: now,
            last_update_utc: now,
        }
    }
}

/// A bearer credential issued to a user. The token is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub user_guid: Uuid,
    pub name: String,
    pub bearer_token: String,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Credential {
    #[must_use]
    pub fn new(
        tenant_guid: Uuid,
        user_guid: Uuid,
        name: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            user_guid,
            name: name.into(),
            bearer_token: bearer_token.into(),
            active: true,
            created_utc: now,
            last_update_utc: now,
        }
    }
}

// =============================================================================
// GRAPH CONTENT
// =============================================================================

/// Named container of nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub vectors: Vec<VectorMetadata>,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Graph {
    #[must_use]
    pub fn new(tenant_guid: Uuid, name: impl Into<String>) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            name: name.into(),
            labels: Vec::new(),
            tags: Tags::new(),
            data: None,
            vectors: Vec::new(),
            created_utc: now,
            last_update_utc: now,
        }
    }
}

/// A vertex of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub vectors: Vec<VectorMetadata>,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Node {
    #[must_use]
    pub fn new(tenant_guid: Uuid, graph_guid: Uuid, name: impl Into<String>) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            graph_guid,
            name: name.into(),
            labels: Vec::new(),
            tags: Tags::new(),
            data: None,
            vectors: Vec::new(),
            created_utc: now,
            last_update_utc: now,
        }
    }

    /// Attach a label (normalized on write).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach an embedding. Scope fields are filled in by the store.
    #[must_use]
    pub fn with_vector(mut self, model: impl Into<String>, vectors: Vec<f32>) -> Self {
        let vector = VectorMetadata::new(self.tenant_guid, self.graph_guid, model, vectors)
            .for_node(self.guid);
        self.vectors.push(vector);
        self
    }
}

/// A directed, weighted connection between two nodes of the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub name: String,
    pub cost: f64,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub vectors: Vec<VectorMetadata>,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Edge {
    #[must_use]
    pub fn new(
        tenant_guid: Uuid,
        graph_guid: Uuid,
        from: Uuid,
        to: Uuid,
        name: impl Into<String>,
        cost: f64,
    ) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            graph_guid,
            from,
            to,
            name: name.into(),
            cost,
            labels: Vec::new(),
            tags: Tags::new(),
            data: None,
            vectors: Vec::new(),
            created_utc: now,
            last_update_utc: now,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// =============================================================================
// SUBORDINATE RECORDS
// =============================================================================

/// A single label owned by a graph, node or edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub node_guid: Option<Uuid>,
    pub edge_guid: Option<Uuid>,
    pub label: String,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Label {
    #[must_use]
    pub fn new(tenant_guid: Uuid, graph_guid: Uuid, owner: Owner, label: impl Into<String>) -> Self {
        let now = timestamp_now();
        let (node_guid, edge_guid) = owner_columns(owner);
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            graph_guid,
            node_guid,
            edge_guid,
            label: label.into(),
            created_utc: now,
            last_update_utc: now,
        }
    }

    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner::resolve(self.graph_guid, self.node_guid, self.edge_guid)
    }
}

/// A single key/value pair owned by a graph, node or edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub node_guid: Option<Uuid>,
    pub edge_guid: Option<Uuid>,
    pub key: String,
    pub value: String,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl Tag {
    #[must_use]
    pub fn new(
        tenant_guid: Uuid,
        graph_guid: Uuid,
        owner: Owner,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let now = timestamp_now();
        let (node_guid, edge_guid) = owner_columns(owner);
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            graph_guid,
            node_guid,
            edge_guid,
            key: key.into(),
            value: value.into(),
            created_utc: now,
            last_update_utc: now,
        }
    }

    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner::resolve(self.graph_guid, self.node_guid, self.edge_guid)
    }
}

/// An embedding owned by a graph, node or edge.
///
/// `dimensionality` always equals `vectors.len()` and is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub node_guid: Option<Uuid>,
    pub edge_guid: Option<Uuid>,
    pub model: String,
    pub dimensionality: usize,
    pub content: String,
    pub vectors: Vec<f32>,
    pub created_utc: DateTime<Utc>,
    pub last_update_utc: DateTime<Utc>,
}

impl VectorMetadata {
    /// A graph-level embedding; use [`Self::for_node`] or [`Self::for_edge`]
    /// to reassign ownership.
    #[must_use]
    pub fn new(
        tenant_guid: Uuid,
        graph_guid: Uuid,
        model: impl Into<String>,
        vectors: Vec<f32>,
    ) -> Self {
        let now = timestamp_now();
        Self {
            guid: Uuid::new_v4(),
            tenant_guid,
            graph_guid,
            node_guid: None,
            edge_guid: None,
            model: model.into(),
            dimensionality: vectors.len(),
            content: String::new(),
            vectors,
            created_utc: now,
            last_update_utc: now,
        }
    }

    #[must_use]
    pub fn for_node(self, node_guid: Uuid) -> Self {
        self.owned_by(Owner::Node(node_guid))
    }

    #[must_use]
    pub fn for_edge(self, edge_guid: Uuid) -> Self {
        self.owned_by(Owner::Edge(edge_guid))
    }

    /// Reassign ownership; a graph owner also sets `graph_guid`.
    #[must_use]
    pub fn owned_by(mut self, owner: Owner) -> Self {
        if let Owner::Graph(graph) = owner {
            self.graph_guid = graph;
        }
        (self.node_guid, self.edge_guid) = owner_columns(owner);
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner::resolve(self.graph_guid, self.node_guid, self.edge_guid)
    }
}

fn owner_columns(owner: Owner) -> (Option<Uuid>, Option<Uuid>) {
    match owner {
        Owner::Graph(_) => (None, None),
        Owner::Node(node) => (Some(node), None),
        Owner::Edge(edge) => (None, Some(edge)),
    }
}
