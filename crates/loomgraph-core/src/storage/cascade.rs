//! Cascading mutations.
//!
//! A [`Cascade`] runs inside one write batch, polls cancellation between
//! records and remembers which graph content it touched so the caller can
//! invalidate vector indexes after commit. Deletes cascade to everything the
//! record owns; inserts of subordinate records maintain the ownership index.

use super::{Record, RecordKind, StoreRead, WriteBatch};
use crate::enumeration::EnumerationOrder;
use crate::types::{
    Credential, Edge, Graph, Label, LoomError, Node, Owner, Tag, Tenant, User, VectorMetadata,
};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Records owned by a graph, node or edge.
pub trait Subordinate: Record {
    fn owner(&self) -> Owner;
    fn graph_guid(&self) -> Uuid;
}

impl Subordinate for Label {
    fn owner(&self) -> Owner {
        Label::owner(self)
    }
    fn graph_guid(&self) -> Uuid {
        self.graph_guid
    }
}

impl Subordinate for Tag {
    fn owner(&self) -> Owner {
        Tag::owner(self)
    }
    fn graph_guid(&self) -> Uuid {
        self.graph_guid
    }
}

impl Subordinate for VectorMetadata {
    fn owner(&self) -> Owner {
        VectorMetadata::owner(self)
    }
    fn graph_guid(&self) -> Uuid {
        self.graph_guid
    }
}

/// What a finished cascade changed, for post-commit index maintenance.
#[derive(Debug, Default)]
pub(crate) struct CascadeEffects {
    /// (graph, owner) pairs whose vectors may have changed.
    pub touched: BTreeSet<(Uuid, Owner)>,
    /// Graphs removed entirely.
    pub dropped_graphs: BTreeSet<Uuid>,
}

pub(crate) struct Cascade<'a> {
    batch: &'a WriteBatch,
    tenant: Uuid,
    cancel: &'a CancellationToken,
    effects: CascadeEffects,
}

impl<'a> Cascade<'a> {
    pub(crate) fn new(batch: &'a WriteBatch, tenant: Uuid, cancel: &'a CancellationToken) -> Self {
        Self {
            batch,
            tenant,
            cancel,
            effects: CascadeEffects::default(),
        }
    }

    pub(crate) fn batch(&self) -> &'a WriteBatch {
        self.batch
    }

    pub(crate) fn check(&self) -> Result<(), LoomError> {
        if self.cancel.is_cancelled() {
            return Err(LoomError::Cancelled);
        }
        Ok(())
    }

    /// Record that vectors of `owner` in `graph` may have changed.
    pub(crate) fn touch(&mut self, graph: Uuid, owner: Owner) {
        self.effects.touched.insert((graph, owner));
    }

    /// Bump the generation of every touched graph that still exists and
    /// hand the effects back to the caller.
    pub(crate) fn finish(self) -> Result<CascadeEffects, LoomError> {
        let graphs: BTreeSet<Uuid> = self.effects.touched.iter().map(|(g, _)| *g).collect();
        for graph in graphs.difference(&self.effects.dropped_graphs) {
            self.batch.bump_generation(self.tenant, *graph)?;
        }
        Ok(self.effects)
    }

    // -------------------------------------------------------------------------
    // Subordinates
    // -------------------------------------------------------------------------

    /// Insert a label, tag or vector and link it to its owner.
    pub(crate) fn attach<R: Subordinate>(&mut self, record: &R) -> Result<(), LoomError> {
        self.check()?;
        self.batch.insert(record)?;
        let owner = record.owner();
        self.batch
            .link_owned(self.tenant, owner.guid(), R::KIND, record.guid())?;
        if R::KIND == RecordKind::Vector {
            self.touch(record.graph_guid(), owner);
        }
        Ok(())
    }

    /// Delete one label, tag or vector and its ownership link.
    pub(crate) fn subordinate<R: Subordinate>(&mut self, guid: Uuid) -> Result<Option<R>, LoomError> {
        let Some(record) = self.batch.remove::<R>(self.tenant, guid)? else {
            return Ok(None);
        };
        let owner = record.owner();
        self.batch
            .unlink_owned(self.tenant, owner.guid(), R::KIND, guid)?;
        if R::KIND == RecordKind::Vector {
            self.touch(record.graph_guid(), owner);
        }
        Ok(Some(record))
    }

    /// Delete every `R` owned by `owner`.
    pub(crate) fn owned_by<R: Subordinate>(&mut self, owner: Uuid) -> Result<usize, LoomError> {
        let mut removed = 0;
        for guid in self.batch.owned(self.tenant, owner, R::KIND)? {
            self.check()?;
            removed += usize::from(self.subordinate::<R>(guid)?.is_some());
        }
        Ok(removed)
    }

    /// Delete every `R` in a graph, whatever its owner.
    pub(crate) fn all_in_graph<R: Subordinate>(&mut self, graph: Uuid) -> Result<usize, LoomError> {
        let mut removed = 0;
        for guid in self.keys(R::KIND, graph)? {
            self.check()?;
            removed += usize::from(self.subordinate::<R>(guid)?.is_some());
        }
        Ok(removed)
    }

    /// Delete every label, tag and vector owned by `owner`.
    pub(crate) fn attachments(&mut self, owner: Uuid) -> Result<(), LoomError> {
        self.owned_by::<Label>(owner)?;
        self.owned_by::<Tag>(owner)?;
        self.owned_by::<VectorMetadata>(owner)?;
        Ok(())
    }

    fn has_attachments(&self, owner: Uuid) -> Result<bool, LoomError> {
        for kind in [RecordKind::Label, RecordKind::Tag, RecordKind::Vector] {
            if !self.batch.owned(self.tenant, owner, kind)?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -------------------------------------------------------------------------
    // Graph content
    // -------------------------------------------------------------------------

    /// Delete an edge with its adjacency entries and subordinates.
    pub(crate) fn edge(&mut self, guid: Uuid) -> Result<Option<Edge>, LoomError> {
        self.check()?;
        let Some(edge) = self.batch.remove::<Edge>(self.tenant, guid)? else {
            return Ok(None);
        };
        self.batch.unlink_edge(&edge)?;
        self.attachments(guid)?;
        self.touch(edge.graph_guid, Owner::Edge(guid));
        Ok(Some(edge))
    }

    /// Delete a node; without `force`, incident edges or subordinates are
    /// a conflict.
    pub(crate) fn node(&mut self, guid: Uuid, force: bool) -> Result<Option<Node>, LoomError> {
        self.check()?;
        let Some(node) = self.batch.get_raw::<Node>(self.tenant, guid)? else {
            return Ok(None);
        };

        let mut incident = self
            .batch
            .adjacent(super::Direction::Outbound, self.tenant, guid)?;
        incident.extend(
            self.batch
                .adjacent(super::Direction::Inbound, self.tenant, guid)?,
        );
        if !force && (!incident.is_empty() || self.has_attachments(guid)?) {
            return Err(LoomError::conflict(format!(
                "node {guid} has edges or subordinate records; delete with force"
            )));
        }

        for adjacent in incident {
            self.edge(adjacent.edge)?;
        }
        self.attachments(guid)?;
        self.batch.remove::<Node>(self.tenant, guid)?;
        self.touch(node.graph_guid, Owner::Node(guid));
        Ok(Some(node))
    }

    /// Delete a graph; without `force`, any content is a conflict.
    pub(crate) fn graph(&mut self, guid: Uuid, force: bool) -> Result<Option<Graph>, LoomError> {
        self.check()?;
        let Some(graph) = self.batch.get_raw::<Graph>(self.tenant, guid)? else {
            return Ok(None);
        };

        if !force {
            for kind in [
                RecordKind::Node,
                RecordKind::Edge,
                RecordKind::Label,
                RecordKind::Tag,
                RecordKind::Vector,
            ] {
                if self.batch.count(kind, self.tenant, Some(guid))? > 0 {
                    return Err(LoomError::conflict(format!(
                        "graph {guid} is not empty; delete with force"
                    )));
                }
            }
        }

        for key in self.keys(RecordKind::Edge, guid)? {
            self.edge(key)?;
        }
        for key in self.keys(RecordKind::Node, guid)? {
            self.node(key, true)?;
        }
        self.attachments(guid)?;
        self.batch.remove_index_config(self.tenant, guid)?;
        self.batch.remove::<Graph>(self.tenant, guid)?;
        self.effects.dropped_graphs.insert(guid);
        Ok(Some(graph))
    }

    /// GUIDs of every `kind` record in `scope`, oldest first.
    pub(crate) fn keys(&self, kind: RecordKind, scope: Uuid) -> Result<Vec<Uuid>, LoomError> {
        Ok(self
            .batch
            .ordered_keys(
                kind,
                self.tenant,
                scope,
                EnumerationOrder::CreatedAscending,
                None,
                usize::MAX,
            )?
            .into_iter()
            .map(|k| k.guid)
            .collect())
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    pub(crate) fn credential(&mut self, guid: Uuid) -> Result<Option<Credential>, LoomError> {
        self.check()?;
        let Some(credential) = self.batch.remove::<Credential>(self.tenant, guid)? else {
            return Ok(None);
        };
        self.batch.unlink_owned(
            self.tenant,
            credential.user_guid,
            RecordKind::Credential,
            guid,
        )?;
        Ok(Some(credential))
    }

    /// Delete a user; without `force`, referencing credentials are a
    /// conflict.
    pub(crate) fn user(&mut self, guid: Uuid, force: bool) -> Result<Option<User>, LoomError> {
        self.check()?;
        if !self.batch.contains::<User>(self.tenant, guid)? {
            return Ok(None);
        }
        let credentials = self
            .batch
            .owned(self.tenant, guid, RecordKind::Credential)?;
        if !force && !credentials.is_empty() {
            return Err(LoomError::conflict(format!(
                "user {guid} is referenced by {} credential(s); delete with force",
                credentials.len()
            )));
        }
        for credential in credentials {
            self.credential(credential)?;
        }
        self.batch.remove::<User>(self.tenant, guid)
    }

    /// Delete the tenant and everything it owns.
    pub(crate) fn tenant(&mut self) -> Result<Option<Tenant>, LoomError> {
        self.check()?;
        if !self.batch.contains::<Tenant>(self.tenant, self.tenant)? {
            return Ok(None);
        }
        for graph in self.keys(RecordKind::Graph, Uuid::nil())? {
            self.graph(graph, true)?;
        }
        for user in self.keys(RecordKind::User, Uuid::nil())? {
            self.user(user, true)?;
        }
        for credential in self.keys(RecordKind::Credential, Uuid::nil())? {
            self.credential(credential)?;
        }
        self.batch.remove::<Tenant>(self.tenant, self.tenant)
    }
}
