//! Edge operations.
//!
//! Both endpoints must be nodes of the edge's graph. Cost must be finite and
//! non-negative. The adjacency indexes are kept in step on every write.

use super::{AttachmentSet, Ctx, assign_guid, require, require_guid, require_name, reread};
use crate::enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope};
use crate::filter::Filter;
use crate::storage::{Cascade, RecordKind, WriteBatch};
use crate::types::{Edge, Graph, LoomError, Node, Owner, timestamp_now};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations on [`Edge`] records of one graph.
pub struct EdgeMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> EdgeMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn create(&self, edge: Edge) -> Result<Edge, LoomError> {
        let created = self
            .ctx
            .mutate(edge.tenant_guid, |cascade| insert(cascade, edge))?;
        tracing::debug!(
            graph = %created.graph_guid,
            edge = %created.guid,
            from = %created.from,
            to = %created.to,
            "edge created"
        );
        Ok(created)
    }

    /// Create every edge or none. Each edge is moved into `(tenant, graph)`.
    pub fn create_many(
        &self,
        tenant: Uuid,
        graph: Uuid,
        edges: Vec<Edge>,
    ) -> Result<Vec<Edge>, LoomError> {
        let created: Vec<Edge> = self.ctx.mutate(tenant, |cascade| {
            edges
                .into_iter()
                .map(|mut edge| {
                    edge.tenant_guid = tenant;
                    edge.graph_guid = graph;
                    insert(cascade, edge)
                })
                .collect()
        })?;
        tracing::debug!(graph = %graph, count = created.len(), "edges created");
        Ok(created)
    }

    pub fn read_by_guid(
        &self,
        tenant: Uuid,
        graph: Uuid,
        guid: Uuid,
    ) -> Result<Option<Edge>, LoomError> {
        self.ctx.read(Scope::graph(tenant, graph), guid)
    }

    pub fn read_by_guids(
        &self,
        tenant: Uuid,
        graph: Uuid,
        guids: &[Uuid],
    ) -> Result<Vec<Edge>, LoomError> {
        self.ctx.read_guids(Scope::graph(tenant, graph), guids)
    }

    pub fn read_many(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<Edge>, LoomError> {
        self.ctx.cursor(Scope::graph(tenant, graph), filter, ordering)
    }

    pub fn read_first(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<Edge>, LoomError> {
        self.ctx.first(Scope::graph(tenant, graph), filter, ordering)
    }

    pub fn enumerate(
        &self,
        tenant: Uuid,
        graph: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Edge>, LoomError> {
        self.ctx.enumerate(Scope::graph(tenant, graph), query)
    }

    pub fn exists_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<Edge>(Scope::graph(tenant, graph), guid)
    }

    /// Replace an edge. Changed endpoints move its adjacency entries; its
    /// labels, tags and vectors are replaced by the collections on `edge`.
    pub fn update(&self, edge: Edge) -> Result<Edge, LoomError> {
        let updated: Edge = self.ctx.mutate(edge.tenant_guid, |cascade| {
            validate(&edge)?;
            let attachments = AttachmentSet::validate(&edge.labels, &edge.tags, &edge.vectors)?;
            let batch = cascade.batch();
            let scope = Scope::graph(edge.tenant_guid, edge.graph_guid);
            let existing: Edge = require(batch, scope, edge.guid)?;
            require_endpoints(batch, &edge)?;

            let now = timestamp_now();
            let mut row = edge.clone();
            row.created_utc = existing.created_utc;
            row.last_update_utc = now;
            batch.replace(&row)?;
            if (existing.from, existing.to) != (row.from, row.to) {
                batch.unlink_edge(&existing)?;
                batch.link_edge(&row)?;
            }

            let owner = Owner::Edge(row.guid);
            attachments.replace(cascade, row.tenant_guid, row.graph_guid, owner, now)?;
            cascade.touch(row.graph_guid, owner);
            reread(batch, row.tenant_guid, row.guid)
        })?;
        tracing::debug!(graph = %updated.graph_guid, edge = %updated.guid, "edge updated");
        Ok(updated)
    }

    /// Delete an edge with its subordinate records.
    pub fn delete_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<(), LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Edge>(cascade.batch(), Scope::graph(tenant, graph), guid)?;
            cascade.edge(guid)
        })?;
        tracing::debug!(graph = %graph, edge = %guid, "edge deleted");
        Ok(())
    }

    pub fn delete_all_in_graph(&self, tenant: Uuid, graph: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Graph>(cascade.batch(), Scope::tenant(tenant), graph)?;
            delete_in_graph(cascade, graph)
        })
    }

    pub fn delete_all_in_tenant(&self, tenant: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            let mut removed = 0;
            for graph in cascade.keys(RecordKind::Graph, Uuid::nil())? {
                removed += delete_in_graph(cascade, graph)?;
            }
            Ok(removed)
        })
    }
}

fn validate(edge: &Edge) -> Result<(), LoomError> {
    require_guid(edge.tenant_guid, "tenant")?;
    require_guid(edge.graph_guid, "graph")?;
    require_guid(edge.from, "from node")?;
    require_guid(edge.to, "to node")?;
    require_name(&edge.name, "edge name")?;
    if !edge.cost.is_finite() || edge.cost < 0.0 {
        return Err(LoomError::bad_request(format!(
            "edge cost must be finite and non-negative, got {}",
            edge.cost
        )));
    }
    Ok(())
}

fn require_endpoints(batch: &WriteBatch, edge: &Edge) -> Result<(), LoomError> {
    let scope = Scope::graph(edge.tenant_guid, edge.graph_guid);
    require::<Node>(batch, scope, edge.from)?;
    require::<Node>(batch, scope, edge.to)?;
    Ok(())
}

fn insert(cascade: &mut Cascade<'_>, mut edge: Edge) -> Result<Edge, LoomError> {
    validate(&edge)?;
    let attachments = AttachmentSet::validate(&edge.labels, &edge.tags, &edge.vectors)?;
    assign_guid(&mut edge.guid);

    let batch = cascade.batch();
    require::<Graph>(batch, Scope::tenant(edge.tenant_guid), edge.graph_guid)?;
    require_endpoints(batch, &edge)?;
    let now = timestamp_now();
    (edge.created_utc, edge.last_update_utc) = (now, now);
    batch.insert(&edge)?;
    batch.link_edge(&edge)?;

    let owner = Owner::Edge(edge.guid);
    attachments.write(cascade, edge.tenant_guid, edge.graph_guid, owner, now)?;
    cascade.touch(edge.graph_guid, owner);
    reread(batch, edge.tenant_guid, edge.guid)
}

fn delete_in_graph(cascade: &mut Cascade<'_>, graph: Uuid) -> Result<usize, LoomError> {
    let mut removed = 0;
    for guid in cascade.keys(RecordKind::Edge, graph)? {
        removed += usize::from(cascade.edge(guid)?.is_some());
    }
    Ok(removed)
}
