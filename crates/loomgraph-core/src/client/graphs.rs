//! Graph operations.

use super::{AttachmentSet, Ctx, assign_guid, require, require_guid, require_name, reread};
use crate::enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope};
use crate::filter::Filter;
use crate::storage::{Cascade, RecordKind};
use crate::types::{Graph, LoomError, Owner, Tenant, timestamp_now};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations on [`Graph`] records.
pub struct GraphMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> GraphMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// Create a graph with its labels, tags and vectors.
    pub fn create(&self, graph: Graph) -> Result<Graph, LoomError> {
        let created = self
            .ctx
            .mutate(graph.tenant_guid, |cascade| insert(cascade, graph))?;
        tracing::debug!(tenant = %created.tenant_guid, graph = %created.guid, "graph created");
        Ok(created)
    }

    /// Create every graph or none. Each graph is moved into `tenant`.
    pub fn create_many(&self, tenant: Uuid, graphs: Vec<Graph>) -> Result<Vec<Graph>, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            graphs
                .into_iter()
                .map(|mut graph| {
                    graph.tenant_guid = tenant;
                    insert(cascade, graph)
                })
                .collect()
        })
    }

    pub fn read_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<Option<Graph>, LoomError> {
        self.ctx.read(Scope::tenant(tenant), guid)
    }

    pub fn read_by_guids(&self, tenant: Uuid, guids: &[Uuid]) -> Result<Vec<Graph>, LoomError> {
        self.ctx.read_guids(Scope::tenant(tenant), guids)
    }

    pub fn read_many(
        &self,
        tenant: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<Graph>, LoomError> {
        self.ctx.cursor(Scope::tenant(tenant), filter, ordering)
    }

    pub fn read_first(
        &self,
        tenant: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<Graph>, LoomError> {
        self.ctx.first(Scope::tenant(tenant), filter, ordering)
    }

    pub fn enumerate(
        &self,
        tenant: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Graph>, LoomError> {
        self.ctx.enumerate(Scope::tenant(tenant), query)
    }

    pub fn exists_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<Graph>(Scope::tenant(tenant), guid)
    }

    /// Replace a graph. Its labels, tags and vectors are replaced by the
    /// collections on `graph`.
    pub fn update(&self, graph: Graph) -> Result<Graph, LoomError> {
        require_guid(graph.tenant_guid, "tenant")?;
        require_name(&graph.name, "graph name")?;
        let updated: Graph = self.ctx.mutate(graph.tenant_guid, |cascade| {
            let attachments = AttachmentSet::validate(&graph.labels, &graph.tags, &graph.vectors)?;
            let batch = cascade.batch();
            let existing: Graph = require(batch, Scope::tenant(graph.tenant_guid), graph.guid)?;
            let now = timestamp_now();
            let mut row = graph.clone();
            row.created_utc = existing.created_utc;
            row.last_update_utc = now;
            batch.replace(&row)?;

            let owner = Owner::Graph(row.guid);
            attachments.replace(cascade, row.tenant_guid, row.guid, owner, now)?;
            cascade.touch(row.guid, owner);
            reread(batch, row.tenant_guid, row.guid)
        })?;
        tracing::debug!(tenant = %updated.tenant_guid, graph = %updated.guid, "graph updated");
        Ok(updated)
    }

    /// Delete a graph; without `force`, a graph with any content is a
    /// conflict. With `force` all of its nodes, edges, subordinate records
    /// and vector-index configuration go too.
    pub fn delete_by_guid(&self, tenant: Uuid, guid: Uuid, force: bool) -> Result<(), LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            cascade
                .graph(guid, force)?
                .ok_or_else(|| LoomError::not_found("graph", guid))
        })?;
        tracing::info!(tenant = %tenant, graph = %guid, force, "graph deleted");
        Ok(())
    }

    /// Delete every graph of the tenant with all of its content.
    pub fn delete_all_in_tenant(&self, tenant: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            let mut removed = 0;
            for guid in cascade.keys(RecordKind::Graph, Uuid::nil())? {
                removed += usize::from(cascade.graph(guid, true)?.is_some());
            }
            Ok(removed)
        })
    }
}

fn insert(cascade: &mut Cascade<'_>, mut graph: Graph) -> Result<Graph, LoomError> {
    require_guid(graph.tenant_guid, "tenant")?;
    require_name(&graph.name, "graph name")?;
    let attachments = AttachmentSet::validate(&graph.labels, &graph.tags, &graph.vectors)?;
    assign_guid(&mut graph.guid);

    let batch = cascade.batch();
    require::<Tenant>(batch, Scope::TENANTS, graph.tenant_guid)?;
    let now = timestamp_now();
    (graph.created_utc, graph.last_update_utc) = (now, now);
    batch.insert(&graph)?;

    let owner = Owner::Graph(graph.guid);
    attachments.write(cascade, graph.tenant_guid, graph.guid, owner, now)?;
    cascade.touch(graph.guid, owner);
    reread(batch, graph.tenant_guid, graph.guid)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use crate::{EngineSettings, Graph, LoomClient, LoomError, Node, Tenant};
    use serde_json::json;

    fn setup() -> (LoomClient, Tenant) {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let tenant = client.tenants().create(Tenant::new("t")).unwrap();
        (client, tenant)
    }

    #[test]
    fn graph_round_trips_with_collections() {
        let (client, tenant) = setup();
        let mut graph = Graph::new(tenant.guid, "g");
        graph.labels = vec!["prod".into(), "prod".into(), " core ".into()];
        graph.tags.insert("owner".into(), "ops".into());
        graph.data = Some(json!({"region": "eu"}));

        let created = client.graphs().create(graph).unwrap();
        assert_eq!(created.labels, vec!["core", "prod"]);
        assert_eq!(created.tags.get("owner").map(String::as_str), Some("ops"));
        assert_eq!(
            client.graphs().read_by_guid(tenant.guid, created.guid).unwrap(),
            Some(created)
        );
    }

    #[test]
    fn update_replaces_collections() {
        let (client, tenant) = setup();
        let mut graph = Graph::new(tenant.guid, "g");
        graph.labels = vec!["old".into()];
        let mut created = client.graphs().create(graph).unwrap();

        created.labels = vec!["new".into()];
        created.name = "renamed".into();
        let updated = client.graphs().update(created.clone()).unwrap();
        assert_eq!(updated.labels, vec!["new"]);
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.created_utc, created.created_utc);
    }

    #[test]
    fn graph_requires_tenant() {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        assert!(matches!(
            client.graphs().create(Graph::new(uuid::Uuid::new_v4(), "g")),
            Err(LoomError::NotFound(_))
        ));
    }

    #[test]
    fn non_empty_graph_needs_force() {
        let (client, tenant) = setup();
        let graph = client.graphs().create(Graph::new(tenant.guid, "g")).unwrap();
        let node = client
            .nodes()
            .create(Node::new(tenant.guid, graph.guid, "n"))
            .unwrap();

        assert!(matches!(
            client.graphs().delete_by_guid(tenant.guid, graph.guid, false),
            Err(LoomError::Conflict(_))
        ));
        client
            .graphs()
            .delete_by_guid(tenant.guid, graph.guid, true)
            .unwrap();
        assert!(
            !client
                .nodes()
                .exists_by_guid(tenant.guid, graph.guid, node.guid)
                .unwrap()
        );
    }

    #[test]
    fn graphs_are_tenant_isolated() {
        let (client, tenant) = setup();
        let other = client.tenants().create(Tenant::new("other")).unwrap();
        let graph = client.graphs().create(Graph::new(tenant.guid, "g")).unwrap();
        assert!(client.graphs().read_by_guid(other.guid, graph.guid).unwrap().is_none());
    }
}
