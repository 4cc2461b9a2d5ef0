//! Record encoding.
//!
//! Each entity is stored as a postcard tuple of its own columns. Hydrated
//! collections are not part of the row; JSON data is stored as compact JSON
//! text because postcard is not self-describing.

use super::{Record, RecordKind, StoreRead};
use crate::types::{
    Credential, Edge, Graph, Label, LoomError, Node, Tag, Tags, Tenant, User, VectorMetadata,
    timestamp_from_micros,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// COLUMN HELPERS
// =============================================================================

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn json_text(data: Option<&Value>) -> Result<Option<String>, LoomError> {
    data.map(serde_json::to_string)
        .transpose()
        .map_err(|e| LoomError::Internal(format!("encode json data: {e}")))
}

fn json_value(text: Option<String>) -> Result<Option<Value>, LoomError> {
    text.map(|t| serde_json::from_str(&t))
        .transpose()
        .map_err(|e| LoomError::Internal(format!("decode json data: {e}")))
}

fn opt_guid(guid: Option<Uuid>) -> Option<u128> {
    guid.map(|g| g.as_u128())
}

fn from_opt(raw: Option<u128>) -> Option<Uuid> {
    raw.map(Uuid::from_u128)
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Subordinate collections of a graph, node or edge.
#[derive(Debug, Default)]
pub(crate) struct Attachments {
    pub labels: Vec<String>,
    pub tags: Tags,
    pub vectors: Vec<VectorMetadata>,
}

/// Load the labels, tags and vectors owned by `owner`.
///
/// Labels come back sorted and deduplicated; vectors in creation order.
pub(crate) fn load_attachments<S: StoreRead>(
    store: &S,
    tenant: Uuid,
    owner: Uuid,
) -> Result<Attachments, LoomError> {
    let mut attachments = Attachments::default();

    for guid in store.owned(tenant, owner, RecordKind::Label)? {
        if let Some(label) = store.get_raw::<Label>(tenant, guid)? {
            attachments.labels.push(label.label);
        }
    }
    attachments.labels.sort();
    attachments.labels.dedup();

    for guid in store.owned(tenant, owner, RecordKind::Tag)? {
        if let Some(tag) = store.get_raw::<Tag>(tenant, guid)? {
            attachments.tags.insert(tag.key, tag.value);
        }
    }

    for guid in store.owned(tenant, owner, RecordKind::Vector)? {
        if let Some(vector) = store.get_raw::<VectorMetadata>(tenant, guid)? {
            attachments.vectors.push(vector);
        }
    }
    attachments.vectors.sort_by_key(Record::order_key);

    Ok(attachments)
}

// =============================================================================
// TENANCY
// =============================================================================

type TenantRow = (u128, String, bool, i64, i64);

impl Record for Tenant {
    const KIND: RecordKind = RecordKind::Tenant;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.guid
    }
    fn scope_guid(&self) -> Uuid {
        Uuid::nil()
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }
    fn order_tenant(&self) -> Uuid {
        Uuid::nil()
    }
    fn primary_key(_tenant: Uuid, guid: Uuid) -> (u128, u128) {
        (guid.as_u128(), guid.as_u128())
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            &self.name,
            self.active,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, name, active, created, updated): TenantRow = postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            name,
            active,
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }
}

type UserRow = (u128, u128, String, String, String, String, bool, i64, i64);

impl Record for User {
    const KIND: RecordKind = RecordKind::User;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        Uuid::nil()
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.password,
            self.active,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, first_name, last_name, email, password, active, created, updated): UserRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            first_name,
            last_name,
            email,
            password,
            active,
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }
}

type CredentialRow = (u128, u128, u128, String, String, bool, i64, i64);

impl Record for Credential {
    const KIND: RecordKind = RecordKind::Credential;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        Uuid::nil()
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            self.user_guid.as_u128(),
            &self.name,
            &self.bearer_token,
            self.active,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, user, name, bearer_token, active, created, updated): CredentialRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            user_guid: Uuid::from_u128(user),
            name,
            bearer_token,
            active,
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }
}

// =============================================================================
// GRAPH CONTENT
// =============================================================================

type GraphRow = (u128, u128, String, Option<String>, i64, i64);

impl Record for Graph {
    const KIND: RecordKind = RecordKind::Graph;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        Uuid::nil()
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            &self.name,
            json_text(self.data.as_ref())?,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, name, data, created, updated): GraphRow = postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            name,
            labels: Vec::new(),
            tags: Tags::new(),
            data: json_value(data)?,
            vectors: Vec::new(),
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }

    fn hydrate<S: StoreRead>(&mut self, store: &S) -> Result<(), LoomError> {
        let attachments = load_attachments(store, self.tenant_guid, self.guid)?;
        self.labels = attachments.labels;
        self.tags = attachments.tags;
        self.vectors = attachments.vectors;
        Ok(())
    }
}

type NodeRow = (u128, u128, u128, String, Option<String>, i64, i64);

impl Record for Node {
    const KIND: RecordKind = RecordKind::Node;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        self.graph_guid
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            self.graph_guid.as_u128(),
            &self.name,
            json_text(self.data.as_ref())?,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, graph, name, data, created, updated): NodeRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            graph_guid: Uuid::from_u128(graph),
            name,
            labels: Vec::new(),
            tags: Tags::new(),
            data: json_value(data)?,
            vectors: Vec::new(),
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }

    fn hydrate<S: StoreRead>(&mut self, store: &S) -> Result<(), LoomError> {
        let attachments = load_attachments(store, self.tenant_guid, self.guid)?;
        self.labels = attachments.labels;
        self.tags = attachments.tags;
        self.vectors = attachments.vectors;
        Ok(())
    }
}

type EdgeRow = (
    u128,
    u128,
    u128,
    u128,
    u128,
    String,
    f64,
    Option<String>,
    i64,
    i64,
);

impl Record for Edge {
    const KIND: RecordKind = RecordKind::Edge;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        self.graph_guid
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            self.graph_guid.as_u128(),
            self.from.as_u128(),
            self.to.as_u128(),
            &self.name,
            self.cost,
            json_text(self.data.as_ref())?,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, graph, from, to, name, cost, data, created, updated): EdgeRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            graph_guid: Uuid::from_u128(graph),
            from: Uuid::from_u128(from),
            to: Uuid::from_u128(to),
            name,
            cost,
            labels: Vec::new(),
            tags: Tags::new(),
            data: json_value(data)?,
            vectors: Vec::new(),
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }

    fn hydrate<S: StoreRead>(&mut self, store: &S) -> Result<(), LoomError> {
        let attachments = load_attachments(store, self.tenant_guid, self.guid)?;
        self.labels = attachments.labels;
        self.tags = attachments.tags;
        self.vectors = attachments.vectors;
        Ok(())
    }
}

// =============================================================================
// SUBORDINATE RECORDS
// =============================================================================

type LabelRow = (u128, u128, u128, Option<u128>, Option<u128>, String, i64, i64);

impl Record for Label {
    const KIND: RecordKind = RecordKind::Label;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        self.graph_guid
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            self.graph_guid.as_u128(),
            opt_guid(self.node_guid),
            opt_guid(self.edge_guid),
            &self.label,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, graph, node, edge, label, created, updated): LabelRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            graph_guid: Uuid::from_u128(graph),
            node_guid: from_opt(node),
            edge_guid: from_opt(edge),
            label,
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }
}

type TagRow = (
    u128,
    u128,
    u128,
    Option<u128>,
    Option<u128>,
    String,
    String,
    i64,
    i64,
);

impl Record for Tag {
    const KIND: RecordKind = RecordKind::Tag;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        self.graph_guid
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            self.graph_guid.as_u128(),
            opt_guid(self.node_guid),
            opt_guid(self.edge_guid),
            &self.key,
            &self.value,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, graph, node, edge, key, value, created, updated): TagRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            graph_guid: Uuid::from_u128(graph),
            node_guid: from_opt(node),
            edge_guid: from_opt(edge),
            key,
            value,
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }
}

type VectorRow = (
    u128,
    u128,
    u128,
    Option<u128>,
    Option<u128>,
    String,
    String,
    Vec<f32>,
    i64,
    i64,
);

impl Record for VectorMetadata {
    const KIND: RecordKind = RecordKind::Vector;

    fn guid(&self) -> Uuid {
        self.guid
    }
    fn tenant_guid(&self) -> Uuid {
        self.tenant_guid
    }
    fn scope_guid(&self) -> Uuid {
        self.graph_guid
    }
    fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    fn encode(&self) -> Result<Vec<u8>, LoomError> {
        Ok(postcard::to_allocvec(&(
            self.guid.as_u128(),
            self.tenant_guid.as_u128(),
            self.graph_guid.as_u128(),
            opt_guid(self.node_guid),
            opt_guid(self.edge_guid),
            &self.model,
            &self.content,
            &self.vectors,
            micros(self.created_utc),
            micros(self.last_update_utc),
        ))?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, LoomError> {
        let (guid, tenant, graph, node, edge, model, content, vectors, created, updated): VectorRow =
            postcard::from_bytes(bytes)?;
        Ok(Self {
            guid: Uuid::from_u128(guid),
            tenant_guid: Uuid::from_u128(tenant),
            graph_guid: Uuid::from_u128(graph),
            node_guid: from_opt(node),
            edge_guid: from_opt(edge),
            model,
            dimensionality: vectors.len(),
            content,
            vectors,
            created_utc: timestamp_from_micros(created)?,
            last_update_utc: timestamp_from_micros(updated)?,
        })
    }
}
