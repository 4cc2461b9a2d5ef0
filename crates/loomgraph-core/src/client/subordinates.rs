//! Label, tag and vector operations.
//!
//! The three subordinate record types share reads and deletes; creation and
//! update differ per type:
//!
//! - labels: trimmed, non-empty; a duplicate label on the same owner returns
//!   the existing record
//! - tags: non-empty key; writing a key the owner already has replaces the
//!   old tag
//! - vectors: dimensionality equals the vector length and never changes

use super::{Ctx, assign_guid, require, require_guid, require_name, validate_vector};
use crate::enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope};
use crate::filter::Filter;
use crate::storage::{Cascade, Record, RecordKind, StoreRead, Subordinate, WriteBatch};
use crate::types::{Edge, Graph, Label, LoomError, Node, Owner, Tag, VectorMetadata, timestamp_now};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations on one subordinate record type.
pub struct SubordinateMethods<'a, R> {
    pub(crate) ctx: Ctx<'a>,
    _record: PhantomData<fn() -> R>,
}

pub type LabelMethods<'a> = SubordinateMethods<'a, Label>;
pub type TagMethods<'a> = SubordinateMethods<'a, Tag>;
pub type VectorMethods<'a> = SubordinateMethods<'a, VectorMetadata>;

// =============================================================================
// SHARED OPERATIONS
// =============================================================================

impl<'a, R: Subordinate> SubordinateMethods<'a, R> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self {
            ctx,
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn read_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<Option<R>, LoomError> {
        self.ctx.read(Scope::graph(tenant, graph), guid)
    }

    pub fn read_by_guids(
        &self,
        tenant: Uuid,
        graph: Uuid,
        guids: &[Uuid],
    ) -> Result<Vec<R>, LoomError> {
        self.ctx.read_guids(Scope::graph(tenant, graph), guids)
    }

    /// Every record owned by `owner`, oldest first.
    pub fn read_for_owner(&self, tenant: Uuid, graph: Uuid, owner: Owner) -> Result<Vec<R>, LoomError> {
        let guids = self.ctx.snapshot()?.owned(tenant, owner.guid(), R::KIND)?;
        let mut records = self.ctx.read_guids::<R>(Scope::graph(tenant, graph), &guids)?;
        records.sort_by_key(Record::order_key);
        Ok(records)
    }

    pub fn read_many(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<R>, LoomError> {
        self.ctx.cursor(Scope::graph(tenant, graph), filter, ordering)
    }

    pub fn read_first(
        &self,
        tenant: Uuid,
        graph: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<R>, LoomError> {
        self.ctx.first(Scope::graph(tenant, graph), filter, ordering)
    }

    pub fn enumerate(
        &self,
        tenant: Uuid,
        graph: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<R>, LoomError> {
        self.ctx.enumerate(Scope::graph(tenant, graph), query)
    }

    pub fn exists_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<R>(Scope::graph(tenant, graph), guid)
    }

    pub fn delete_by_guid(&self, tenant: Uuid, graph: Uuid, guid: Uuid) -> Result<(), LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<R>(cascade.batch(), Scope::graph(tenant, graph), guid)?;
            cascade.subordinate::<R>(guid)
        })?;
        tracing::debug!(graph = %graph, guid = %guid, kind = R::KIND.name(), "subordinate deleted");
        Ok(())
    }

    /// Delete the graph-level records only; node and edge records stay.
    pub fn delete_for_graph(&self, tenant: Uuid, graph: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Graph>(cascade.batch(), Scope::tenant(tenant), graph)?;
            cascade.owned_by::<R>(graph)
        })
    }

    pub fn delete_for_node(&self, tenant: Uuid, graph: Uuid, node: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Node>(cascade.batch(), Scope::graph(tenant, graph), node)?;
            cascade.owned_by::<R>(node)
        })
    }

    pub fn delete_for_edge(&self, tenant: Uuid, graph: Uuid, edge: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Edge>(cascade.batch(), Scope::graph(tenant, graph), edge)?;
            cascade.owned_by::<R>(edge)
        })
    }

    /// Delete every record of the graph, whatever its owner.
    pub fn delete_all_in_graph(&self, tenant: Uuid, graph: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            require::<Graph>(cascade.batch(), Scope::tenant(tenant), graph)?;
            cascade.all_in_graph::<R>(graph)
        })
    }

    pub fn delete_all_in_tenant(&self, tenant: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            let mut removed = 0;
            for graph in cascade.keys(RecordKind::Graph, Uuid::nil())? {
                removed += cascade.all_in_graph::<R>(graph)?;
            }
            Ok(removed)
        })
    }

    fn create_with(
        &self,
        record: R,
        insert: fn(&mut Cascade<'_>, R) -> Result<R, LoomError>,
    ) -> Result<R, LoomError> {
        let created = self
            .ctx
            .mutate(record.tenant_guid(), |cascade| insert(cascade, record))?;
        tracing::debug!(
            graph = %created.graph_guid(),
            guid = %created.guid(),
            kind = R::KIND.name(),
            "subordinate created"
        );
        Ok(created)
    }

    fn create_many_with(
        &self,
        tenant: Uuid,
        records: Vec<R>,
        insert: fn(&mut Cascade<'_>, R) -> Result<R, LoomError>,
    ) -> Result<Vec<R>, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            records
                .into_iter()
                .map(|record| {
                    if record.tenant_guid() != tenant {
                        return Err(LoomError::bad_request(format!(
                            "{} {} belongs to another tenant",
                            R::KIND.name(),
                            record.guid()
                        )));
                    }
                    insert(cascade, record)
                })
                .collect()
        })
    }

    fn update_with(
        &self,
        record: R,
        replace: fn(&mut Cascade<'_>, R, R) -> Result<R, LoomError>,
    ) -> Result<R, LoomError> {
        self.ctx.mutate(record.tenant_guid(), |cascade| {
            let scope = Scope::graph(record.tenant_guid(), record.graph_guid());
            let existing: R = require(cascade.batch(), scope, record.guid())?;
            if existing.owner() != record.owner() {
                return Err(LoomError::bad_request(format!(
                    "the owner of {} {} cannot change",
                    R::KIND.name(),
                    record.guid()
                )));
            }
            replace(cascade, existing, record)
        })
    }
}

/// Scope checks shared by every subordinate insert.
fn check_scope<R: Subordinate>(batch: &WriteBatch, record: &R) -> Result<(), LoomError> {
    let (tenant, graph) = (record.tenant_guid(), record.graph_guid());
    require_guid(tenant, "tenant")?;
    require_guid(graph, "graph")?;
    match record.owner() {
        Owner::Graph(guid) => require::<Graph>(batch, Scope::tenant(tenant), guid).map(drop),
        Owner::Node(guid) => require::<Node>(batch, Scope::graph(tenant, graph), guid).map(drop),
        Owner::Edge(guid) => require::<Edge>(batch, Scope::graph(tenant, graph), guid).map(drop),
    }
}

/// Records of the same type already held by `owner`.
fn siblings<R: Subordinate>(batch: &WriteBatch, tenant: Uuid, owner: Owner) -> Result<Vec<R>, LoomError> {
    let mut records = Vec::new();
    for guid in batch.owned(tenant, owner.guid(), R::KIND)? {
        if let Some(record) = batch.get_raw::<R>(tenant, guid)? {
            records.push(record);
        }
    }
    Ok(records)
}

// =============================================================================
// LABELS
// =============================================================================

impl SubordinateMethods<'_, Label> {
    /// Attach a label to its owner.
    pub fn create(&self, label: Label) -> Result<Label, LoomError> {
        self.create_with(label, insert_label)
    }

    pub fn create_many(&self, tenant: Uuid, labels: Vec<Label>) -> Result<Vec<Label>, LoomError> {
        self.create_many_with(tenant, labels, insert_label)
    }

    /// Change the text of a label. The owner cannot change.
    pub fn update(&self, label: Label) -> Result<Label, LoomError> {
        self.update_with(label, replace_label)
    }
}

fn normalize_label(label: &mut Label) -> Result<(), LoomError> {
    require_name(&label.label, "label")?;
    label.label = label.label.trim().to_string();
    Ok(())
}

fn insert_label(cascade: &mut Cascade<'_>, mut label: Label) -> Result<Label, LoomError> {
    normalize_label(&mut label)?;
    assign_guid(&mut label.guid);
    let batch = cascade.batch();
    check_scope(batch, &label)?;
    if let Some(existing) = siblings::<Label>(batch, label.tenant_guid, label.owner())?
        .into_iter()
        .find(|other| other.label == label.label)
    {
        return Ok(existing);
    }
    let now = timestamp_now();
    (label.created_utc, label.last_update_utc) = (now, now);
    cascade.attach(&label)?;
    Ok(label)
}

fn replace_label(cascade: &mut Cascade<'_>, existing: Label, mut label: Label) -> Result<Label, LoomError> {
    normalize_label(&mut label)?;
    let batch = cascade.batch();
    if siblings::<Label>(batch, label.tenant_guid, label.owner())?
        .iter()
        .any(|other| other.guid != label.guid && other.label == label.label)
    {
        return Err(LoomError::conflict(format!(
            "owner {} already has label {:?}",
            label.owner().guid(),
            label.label
        )));
    }
    label.created_utc = existing.created_utc;
    label.last_update_utc = timestamp_now();
    batch.replace(&label)?;
    Ok(label)
}

// =============================================================================
// TAGS
// =============================================================================

impl SubordinateMethods<'_, Tag> {
    /// Set a tag on its owner, replacing any tag with the same key.
    pub fn create(&self, tag: Tag) -> Result<Tag, LoomError> {
        self.create_with(tag, insert_tag)
    }

    pub fn create_many(&self, tenant: Uuid, tags: Vec<Tag>) -> Result<Vec<Tag>, LoomError> {
        self.create_many_with(tenant, tags, insert_tag)
    }

    /// Change the key or value of a tag. The owner cannot change.
    pub fn update(&self, tag: Tag) -> Result<Tag, LoomError> {
        self.update_with(tag, replace_tag)
    }
}

/// Drop the owner's other tags with the same key.
fn evict_key(cascade: &mut Cascade<'_>, tag: &Tag) -> Result<(), LoomError> {
    let holders: Vec<Uuid> = siblings::<Tag>(cascade.batch(), tag.tenant_guid, tag.owner())?
        .into_iter()
        .filter(|other| other.guid != tag.guid && other.key == tag.key)
        .map(|other| other.guid)
        .collect();
    for guid in holders {
        cascade.subordinate::<Tag>(guid)?;
    }
    Ok(())
}

fn insert_tag(cascade: &mut Cascade<'_>, mut tag: Tag) -> Result<Tag, LoomError> {
    require_name(&tag.key, "tag key")?;
    assign_guid(&mut tag.guid);
    check_scope(cascade.batch(), &tag)?;
    evict_key(cascade, &tag)?;
    let now = timestamp_now();
    (tag.created_utc, tag.last_update_utc) = (now, now);
    cascade.attach(&tag)?;
    Ok(tag)
}

fn replace_tag(cascade: &mut Cascade<'_>, existing: Tag, mut tag: Tag) -> Result<Tag, LoomError> {
    require_name(&tag.key, "tag key")?;
    evict_key(cascade, &tag)?;
    tag.created_utc = existing.created_utc;
    tag.last_update_utc = timestamp_now();
    cascade.batch().replace(&tag)?;
    Ok(tag)
}

// =============================================================================
// VECTORS
// =============================================================================

impl SubordinateMethods<'_, VectorMetadata> {
    /// Store an embedding for its owner.
    pub fn create(&self, vector: VectorMetadata) -> Result<VectorMetadata, LoomError> {
        self.create_with(vector, insert_vector)
    }

    pub fn create_many(
        &self,
        tenant: Uuid,
        vectors: Vec<VectorMetadata>,
    ) -> Result<Vec<VectorMetadata>, LoomError> {
        self.create_many_with(tenant, vectors, insert_vector)
    }

    /// Replace the values, model or content of a vector. Owner and
    /// dimensionality cannot change.
    pub fn update(&self, vector: VectorMetadata) -> Result<VectorMetadata, LoomError> {
        self.update_with(vector, replace_vector)
    }
}

fn insert_vector(
    cascade: &mut Cascade<'_>,
    mut vector: VectorMetadata,
) -> Result<VectorMetadata, LoomError> {
    validate_vector(&vector)?;
    assign_guid(&mut vector.guid);
    check_scope(cascade.batch(), &vector)?;
    let now = timestamp_now();
    (vector.created_utc, vector.last_update_utc) = (now, now);
    cascade.attach(&vector)?;
    Ok(vector)
}

fn replace_vector(
    cascade: &mut Cascade<'_>,
    existing: VectorMetadata,
    mut vector: VectorMetadata,
) -> Result<VectorMetadata, LoomError> {
    validate_vector(&vector)?;
    if vector.dimensionality != existing.dimensionality {
        return Err(LoomError::bad_request(format!(
            "vector {} has dimensionality {}; it cannot change to {}",
            vector.guid, existing.dimensionality, vector.dimensionality
        )));
    }
    vector.created_utc = existing.created_utc;
    vector.last_update_utc = timestamp_now();
    cascade.batch().replace(&vector)?;
    cascade.touch(vector.graph_guid, vector.owner());
    Ok(vector)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use crate::{
        EngineSettings, Graph, Label, LoomClient, LoomError, Node, Owner, Tag, Tenant,
        VectorMetadata,
    };
    use uuid::Uuid;

    fn setup() -> (LoomClient, Uuid, Uuid, Uuid) {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        let g = client.graphs().create(Graph::new(t, "g")).unwrap().guid;
        let n = client.nodes().create(Node::new(t, g, "n")).unwrap().guid;
        (client, t, g, n)
    }

    #[test]
    fn labels_attach_to_nodes_and_collapse_duplicates() {
        let (client, t, g, n) = setup();
        let first = client
            .labels()
            .create(Label::new(t, g, Owner::Node(n), "person"))
            .unwrap();
        let again = client
            .labels()
            .create(Label::new(t, g, Owner::Node(n), " person "))
            .unwrap();
        assert_eq!(first.guid, again.guid);

        let node = client.nodes().read_by_guid(t, g, n).unwrap().unwrap();
        assert_eq!(node.labels, vec!["person"]);
    }

    #[test]
    fn tag_keys_are_unique_per_owner() {
        let (client, t, g, n) = setup();
        client
            .tags()
            .create(Tag::new(t, g, Owner::Node(n), "color", "red"))
            .unwrap();
        client
            .tags()
            .create(Tag::new(t, g, Owner::Node(n), "color", "blue"))
            .unwrap();
        let tags = client.tags().read_for_owner(t, g, Owner::Node(n)).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value, "blue");
    }

    #[test]
    fn subordinate_requires_owner() {
        let (client, t, g, _) = setup();
        assert!(matches!(
            client
                .labels()
                .create(Label::new(t, g, Owner::Node(Uuid::new_v4()), "x")),
            Err(LoomError::NotFound(_))
        ));
    }

    #[test]
    fn vector_dimensionality_is_checked() {
        let (client, t, g, n) = setup();
        let mut vector = VectorMetadata::new(t, g, "m", vec![0.1, 0.2, 0.3, 0.4]).for_node(n);
        vector.dimensionality = 3;
        assert!(matches!(
            client.vectors().create(vector),
            Err(LoomError::BadRequest(_))
        ));

        let created = client
            .vectors()
            .create(VectorMetadata::new(t, g, "m", vec![0.1, 0.2, 0.3]).for_node(n))
            .unwrap();
        let mut grown = created.clone();
        grown.vectors.push(0.4);
        grown.dimensionality = 4;
        assert!(matches!(
            client.vectors().update(grown),
            Err(LoomError::BadRequest(_))
        ));
    }

    #[test]
    fn deletes_scope_to_their_owner_kind() {
        let (client, t, g, n) = setup();
        let labels = client.labels();
        labels.create(Label::new(t, g, Owner::Graph(g), "graph-level")).unwrap();
        labels.create(Label::new(t, g, Owner::Node(n), "node-level")).unwrap();

        assert_eq!(labels.delete_for_graph(t, g).unwrap(), 1);
        assert_eq!(labels.read_for_owner(t, g, Owner::Node(n)).unwrap().len(), 1);
        assert_eq!(labels.delete_all_in_graph(t, g).unwrap(), 1);
    }

    #[test]
    fn owner_cannot_change_on_update() {
        let (client, t, g, n) = setup();
        let mut label = client
            .labels()
            .create(Label::new(t, g, Owner::Node(n), "a"))
            .unwrap();
        label.node_guid = None;
        assert!(matches!(
            client.labels().update(label),
            Err(LoomError::BadRequest(_))
        ));
    }
}
