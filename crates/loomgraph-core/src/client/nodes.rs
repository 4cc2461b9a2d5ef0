//! Node operations.

use super::{AttachmentSet, Ctx, assign_guid, require, require_guid, require_name, reread};
use crate::enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope};
use crate::filter::Filter;
use crate::storage::{Cascade, RecordKind};
use crate::types::{Graph, LoomError, Node, Owner, timestamp_now};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations on [`Node`] records of one graph.
pub struct NodeMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> NodeMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn create(&self, node: Node) -> Result<Node, LoomError> {
        let created = self
            .ctx
            .mutate(node.tenant_guid, |cascade| insert(cascade, node))?;
        tracing::debug!(graph = %created.graph_guid, node = %created.guid, "node created");
        Ok(created)
    }

    /// Create every node or none. Each node is moved into `(tenant, graph)`.
    pub fn create_many(
        &self,
        tenant: Uuid,
        graph: Uuid,
        nodes: Vec<Node>,
    ) -> Result<Vec<Node>, LoomError> {
        let created: Vec<Node> = self.ctx.mutate(tenant, |cascade| {
            nodes
                .into_iter()
                .map(|mut node| {
                    node.tenant_guid = tenant;
                    node.graph_guid = graph;
                    insert(cascade, node)
                })
                .collect()
        })?;
        tracing::debug!(graph = %graph, count = created.len(), "nodes created");
        Ok(created)
    }

    pub fn read_by_guid(
        &self,
        tenant: Uuid,
        graph: Uuid,
        guid: Uuid,
    ) -> Result<Option<Node>, LoomError> {
        self.ctx.read(Scope::graph(tenant, graph), guid)
    }

    pub fn read_by_guids(
        &self,
        tenant: Uuid,
        graph: Uuid,
        guids: &[Uuid],
    ) -> Result<Vec<Node>, LoomError> {
        self.ctx.read_guids(Scope::graph(tenant, graph), guids)
    }

    /// Lazily read the graph's nodes that match `filter`.
    pub fn read_many(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<Node>, LoomError> {
        self.ctx.cursor(Scope::graph(tenant, graph), filter, ordering)
    }

    pub fn read_first(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<Node>, LoomError> {
        self.ctx.first(Scope::graph(tenant, graph), filter, ordering)
    }

    pub fn enumerate(
        &self,
        tenant: Uuid,
        graph: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Node>, LoomError> {
        self.ctx.enumerate(Scope::graph(tenant, graph), query)
    }

    pub fn exists_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<Node>(Scope::graph(tenant, graph), guid)
    }

    /// Replace a node. Its labels, tags and vectors are replaced by the
    /// collections on `node`.
    pub fn update(&self, node: Node) -> Result<Node, LoomError> {
        let updated: Node = self.ctx.mutate(node.tenant_guid, |cascade| {
            validate(&node)?;
            let attachments = AttachmentSet::validate(&node.labels, &node.tags, &node.vectors)?;
            let batch = cascade.batch();
            let scope = Scope::graph(node.tenant_guid, node.graph_guid);
            let existing: Node = require(batch, scope, node.guid)?;
            let now = timestamp_now();
            let mut row = node.clone();
            row.created_utc = existing.created_utc;
            row.last_update_utc = now;
            batch.replace(&row)?;

            let owner = Owner::Node(row.guid);
            attachments.replace(cascade, row.tenant_guid, row.graph_guid, owner, now)?;
            cascade.touch(row.graph_guid, owner);
            reread(batch, row.tenant_guid, row.guid)
        })?;
        tracing::debug!(graph = %updated.graph_guid, node = %updated.guid, "node updated");
        Ok(updated)
    }

    /// Delete a node; without `force`, incident edges or subordinate
    /// records are a conflict. With `force` they are deleted too.
    pub fn delete_by_guid(
        &self,
        tenant: Uuid,
        graph: Uuid,
        guid: Uuid,
        force: bool,
    ) -> Result<(), LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Node>(cascade.batch(), Scope::graph(tenant, graph), guid)?;
            cascade.node(guid, force)
        })?;
        tracing::debug!(graph = %graph, node = %guid, force, "node deleted");
        Ok(())
    }

    /// Delete every node of a graph with its edges and subordinates.
    pub fn delete_all_in_graph(&self, tenant: Uuid, graph: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Graph>(cascade.batch(), Scope::tenant(tenant), graph)?;
            delete_in_graph(cascade, graph)
        })
    }

    /// Delete every node of every graph of the tenant.
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

fn validate(node: &Node) -> Result<(), LoomError> {
    require_guid(node.tenant_guid, "tenant")?;
    require_guid(node.graph_guid, "graph")?;
    require_name(&node.name, "node name")
}

fn insert(cascade: &mut Cascade<'_>, mut node: Node) -> Result<Node, LoomError> {
    validate(&node)?;
    let attachments = AttachmentSet::validate(&node.labels, &node.tags, &node.vectors)?;
    assign_guid(&mut node.guid);

    let batch = cascade.batch();
    require::<Graph>(batch, Scope::tenant(node.tenant_guid), node.graph_guid)?;
    let now = timestamp_now();
    (node.created_utc, node.last_update_utc) = (now, now);
    batch.insert(&node)?;

    let owner = Owner::Node(node.guid);
    attachments.write(cascade, node.tenant_guid, node.graph_guid, owner, now)?;
    cascade.touch(node.graph_guid, owner);
    reread(batch, node.tenant_guid, node.guid)
}

fn delete_in_graph(cascade: &mut Cascade<'_>, graph: Uuid) -> Result<usize, LoomError> {
    let mut removed = 0;
    for guid in cascade.keys(RecordKind::Node, graph)? {
        removed += usize::from(cascade.node(guid, true)?.is_some());
    }
    Ok(removed)
}
