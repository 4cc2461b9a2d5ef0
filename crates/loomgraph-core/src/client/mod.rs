//! # Validating Client
//!
//! [`LoomClient`] is the programmatic surface of the engine. It owns the
//! store, the settings and the in-memory vector indexes, and hands out one
//! borrowed method group per entity type:
//!
//! ```no_run
//! use loomgraph_core::{EngineSettings, Graph, LoomClient, Node, Tenant};
//!
//! let client = LoomClient::in_memory(EngineSettings::default())?;
//! let tenant = client.tenants().create(Tenant::new("acme"))?;
//! let graph = client.graphs().create(Graph::new(tenant.guid, "social"))?;
//! let node = client
//!     .nodes()
//!     .create(Node::new(tenant.guid, graph.guid, "alice").with_label("person"))?;
//! # let _ = node;
//! # Ok::<(), loomgraph_core::LoomError>(())
//! ```
//!
//! Every group checks its arguments, defaults GUIDs and timestamps, runs the
//! primitive operations in one write transaction and invalidates vector
//! indexes after commit. Groups can be bound to a
//! [`CancellationToken`] with `with_cancellation`.

mod edges;
mod graphs;
mod nodes;
mod subordinates;
mod tenants;
mod users;

pub use edges::EdgeMethods;
pub use graphs::GraphMethods;
pub use nodes::NodeMethods;
pub use subordinates::{LabelMethods, SubordinateMethods, TagMethods, VectorMethods};
pub use tenants::TenantMethods;
pub use users::{CredentialMethods, UserMethods};

use crate::enumeration::{
    Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope, enumerate,
};
use crate::filter::Filter;
use crate::settings::EngineSettings;
use crate::stats::StatisticsMethods;
use crate::storage::{Cascade, RecordKind, RedbStore, Record, Snapshot, StoreRead, WriteBatch};
use crate::traversal::TraversalMethods;
use crate::types::{Label, LoomError, Owner, Tag, Tags, VectorMetadata};
use crate::vector::{VectorIndexMethods, VectorIndexRegistry};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// CLIENT
// =============================================================================

/// An open LoomGraph store. `Send + Sync`; share it behind an `Arc`.
pub struct LoomClient {
    store: RedbStore,
    settings: EngineSettings,
    indexes: VectorIndexRegistry,
}

impl std::fmt::Debug for LoomClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoomClient")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LoomClient {
    /// Open (or create) the store at `settings.storage.path`.
    pub fn open(settings: EngineSettings) -> Result<Self, LoomError> {
        settings.validate()?;
        let store = RedbStore::open(&settings.storage.path)?;
        tracing::info!(path = %settings.storage.path.display(), "store opened");
        Ok(Self::with_store(store, settings))
    }

    /// An ephemeral store; `settings.storage` is ignored.
    pub fn in_memory(settings: EngineSettings) -> Result<Self, LoomError> {
        settings.validate()?;
        let store = RedbStore::in_memory()?;
        tracing::debug!("in-memory store opened");
        Ok(Self::with_store(store, settings))
    }

    fn with_store(store: RedbStore, settings: EngineSettings) -> Self {
        Self {
            store,
            settings,
            indexes: VectorIndexRegistry::default(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Reclaim free space in the database file. Returns whether any was
    /// reclaimed; always `false` for an in-memory store.
    pub fn compact(&mut self) -> Result<bool, LoomError> {
        if self.store.is_in_memory() {
            tracing::debug!("in-memory store; nothing to compact");
            return Ok(false);
        }
        let compacted = self.store.compact()?;
        tracing::info!(compacted, "store compacted");
        Ok(compacted)
    }

    #[must_use]
    pub fn tenants(&self) -> TenantMethods<'_> {
        TenantMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn users(&self) -> UserMethods<'_> {
        UserMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn credentials(&self) -> CredentialMethods<'_> {
        CredentialMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn graphs(&self) -> GraphMethods<'_> {
        GraphMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn nodes(&self) -> NodeMethods<'_> {
        NodeMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn edges(&self) -> EdgeMethods<'_> {
        EdgeMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn labels(&self) -> LabelMethods<'_> {
        SubordinateMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn tags(&self) -> TagMethods<'_> {
        SubordinateMethods::new(Ctx::new(self))
    }

    /// Vector records and similarity search.
    #[must_use]
    pub fn vectors(&self) -> VectorMethods<'_> {
        SubordinateMethods::new(Ctx::new(self))
    }

    /// Per-graph vector index lifecycle.
    #[must_use]
    pub fn vector_index(&self) -> VectorIndexMethods<'_> {
        VectorIndexMethods::new(Ctx::new(self))
    }

    /// Adjacency lookups, routes, subgraphs and connectivity ranking.
    #[must_use]
    pub fn traversal(&self) -> TraversalMethods<'_> {
        TraversalMethods::new(Ctx::new(self))
    }

    #[must_use]
    pub fn statistics(&self) -> StatisticsMethods<'_> {
        StatisticsMethods::new(Ctx::new(self))
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// What every method group carries: the client and a cancellation token.
#[derive(Clone)]
pub(crate) struct Ctx<'a> {
    pub(crate) client: &'a LoomClient,
    pub(crate) cancel: CancellationToken,
}

impl<'a> Ctx<'a> {
    fn new(client: &'a LoomClient) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn check(&self) -> Result<(), LoomError> {
        if self.cancel.is_cancelled() {
            return Err(LoomError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn settings(&self) -> &'a EngineSettings {
        &self.client.settings
    }

    pub(crate) fn indexes(&self) -> &'a VectorIndexRegistry {
        &self.client.indexes
    }

    pub(crate) fn batch_size(&self) -> usize {
        self.client.settings.enumeration.cursor_batch_size
    }

    pub(crate) fn snapshot(&self) -> Result<Arc<Snapshot>, LoomError> {
        self.check()?;
        Ok(Arc::new(self.client.store.snapshot()?))
    }

    /// Run one mutation of `tenant` in a single write transaction.
    ///
    /// The transaction aborts if `apply` fails or cancellation fires before
    /// commit. Vector indexes are invalidated only after a commit.
    pub(crate) fn mutate<T>(
        &self,
        tenant: Uuid,
        apply: impl FnOnce(&mut Cascade<'_>) -> Result<T, LoomError>,
    ) -> Result<T, LoomError> {
        self.check()?;
        let (value, effects) = self.client.store.write(|batch| {
            let mut cascade = Cascade::new(batch, tenant, &self.cancel);
            let value = apply(&mut cascade)?;
            let effects = cascade.finish()?;
            self.check()?;
            Ok((value, effects))
        })?;
        self.client.indexes.invalidate(tenant, &effects);
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Generic reads
    // -------------------------------------------------------------------------

    pub(crate) fn read<R: Record>(&self, scope: Scope, guid: Uuid) -> Result<Option<R>, LoomError> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .get::<R>(scope.tenant, guid)?
            .filter(|record| in_scope(record, scope)))
    }

    /// Records for `guids` in request order; unknown GUIDs are skipped.
    pub(crate) fn read_guids<R: Record>(
        &self,
        scope: Scope,
        guids: &[Uuid],
    ) -> Result<Vec<R>, LoomError> {
        let snapshot = self.snapshot()?;
        let mut records = Vec::with_capacity(guids.len());
        for guid in guids {
            self.check()?;
            if let Some(record) = snapshot.get::<R>(scope.tenant, *guid)?
                && in_scope(&record, scope)
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub(crate) fn exists<R: Record>(&self, scope: Scope, guid: Uuid) -> Result<bool, LoomError> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .get_raw::<R>(scope.tenant, guid)?
            .is_some_and(|record| in_scope(&record, scope)))
    }

    pub(crate) fn cursor<R: Record>(
        &self,
        scope: Scope,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<R>, LoomError> {
        filter.validate()?;
        Ok(Cursor::new(
            self.snapshot()?,
            scope,
            ordering,
            filter,
            None,
            self.cancel.clone(),
            self.batch_size(),
        ))
    }

    pub(crate) fn first<R: Record>(
        &self,
        scope: Scope,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<R>, LoomError> {
        self.cursor::<R>(scope, filter, ordering)?.next().transpose()
    }

    pub(crate) fn enumerate<R: Record>(
        &self,
        scope: Scope,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<R>, LoomError> {
        enumerate::<R>(
            self.snapshot()?,
            scope,
            query,
            &self.cancel,
            &self.settings().enumeration,
        )
    }
}

fn in_scope<R: Record>(record: &R, scope: Scope) -> bool {
    record.scope_guid() == scope.scope
}

/// Load a record that a mutation depends on, or fail with `NotFound`.
pub(crate) fn require<R: Record>(
    batch: &WriteBatch,
    scope: Scope,
    guid: Uuid,
) -> Result<R, LoomError> {
    batch
        .get_raw::<R>(scope.tenant, guid)?
        .filter(|record| in_scope(record, scope))
        .ok_or_else(|| LoomError::not_found(R::KIND.name(), guid))
}

/// Re-read a record inside the transaction that wrote it, hydrated.
pub(crate) fn reread<R: Record>(batch: &WriteBatch, tenant: Uuid, guid: Uuid) -> Result<R, LoomError> {
    batch
        .get::<R>(tenant, guid)?
        .ok_or_else(|| LoomError::Internal(format!("{} {guid} vanished mid-write", R::KIND.name())))
}

// =============================================================================
// ARGUMENT CHECKS
// =============================================================================

pub(crate) fn require_guid(guid: Uuid, what: &str) -> Result<(), LoomError> {
    if guid.is_nil() {
        return Err(LoomError::bad_request(format!("{what} GUID must not be nil")));
    }
    Ok(())
}

pub(crate) fn require_name(value: &str, what: &str) -> Result<(), LoomError> {
    if value.trim().is_empty() {
        return Err(LoomError::bad_request(format!("{what} must not be empty")));
    }
    Ok(())
}

/// A nil GUID means "assign one".
pub(crate) fn assign_guid(guid: &mut Uuid) {
    if guid.is_nil() {
        *guid = Uuid::new_v4();
    }
}

/// Trim, reject empty and deduplicate labels. Order is preserved.
pub(crate) fn normalize_labels(labels: &[String]) -> Result<Vec<String>, LoomError> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if label.is_empty() {
            return Err(LoomError::bad_request("labels must not be empty"));
        }
        if seen.insert(label) {
            normalized.push(label.to_string());
        }
    }
    Ok(normalized)
}

pub(crate) fn validate_tags(tags: &Tags) -> Result<(), LoomError> {
    if tags.keys().any(|key| key.trim().is_empty()) {
        return Err(LoomError::bad_request("tag keys must not be empty"));
    }
    Ok(())
}

/// Dimensionality must be positive and equal the vector length; every
/// component must be finite.
pub(crate) fn validate_vector(vector: &VectorMetadata) -> Result<(), LoomError> {
    if vector.dimensionality == 0 {
        return Err(LoomError::bad_request("vector dimensionality must be positive"));
    }
    if vector.vectors.len() != vector.dimensionality {
        return Err(LoomError::bad_request(format!(
            "vector has {} values but dimensionality {}",
            vector.vectors.len(),
            vector.dimensionality
        )));
    }
    if vector.vectors.iter().any(|v| !v.is_finite()) {
        return Err(LoomError::bad_request("vector values must be finite"));
    }
    Ok(())
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// The hydrated collections of a Graph, Node or Edge, already validated.
pub(crate) struct AttachmentSet<'r> {
    pub labels: Vec<String>,
    pub tags: &'r Tags,
    pub vectors: &'r [VectorMetadata],
}

impl<'r> AttachmentSet<'r> {
    pub(crate) fn validate(
        labels: &[String],
        tags: &'r Tags,
        vectors: &'r [VectorMetadata],
    ) -> Result<Self, LoomError> {
        validate_tags(tags)?;
        vectors.iter().try_for_each(validate_vector)?;
        Ok(Self {
            labels: normalize_labels(labels)?,
            tags,
            vectors,
        })
    }

    /// Persist every collection as subordinate records of `owner`.
    pub(crate) fn write(
        &self,
        cascade: &mut Cascade<'_>,
        tenant: Uuid,
        graph: Uuid,
        owner: Owner,
        now: DateTime<Utc>,
    ) -> Result<(), LoomError> {
        self.write_over(cascade, tenant, graph, owner, now, &BTreeMap::new())
    }

    /// Swap the owner's stored collections for these. A vector keeping the
    /// GUID of a stored one keeps its dimensionality and creation time.
    pub(crate) fn replace(
        &self,
        cascade: &mut Cascade<'_>,
        tenant: Uuid,
        graph: Uuid,
        owner: Owner,
        now: DateTime<Utc>,
    ) -> Result<(), LoomError> {
        let batch = cascade.batch();
        let mut stored = BTreeMap::new();
        for guid in batch.owned(tenant, owner.guid(), RecordKind::Vector)? {
            if let Some(vector) = batch.get_raw::<VectorMetadata>(tenant, guid)? {
                stored.insert(guid, vector);
            }
        }
        for vector in self.vectors {
            let Some(existing) = stored.get(&vector.guid) else {
                continue;
            };
            if existing.dimensionality != vector.dimensionality {
                return Err(LoomError::bad_request(format!(
                    "vector {} has dimensionality {}; it cannot change to {}",
                    vector.guid, existing.dimensionality, vector.dimensionality
                )));
            }
        }

        cascade.attachments(owner.guid())?;
        self.write_over(cascade, tenant, graph, owner, now, &stored)
    }

    fn write_over(
        &self,
        cascade: &mut Cascade<'_>,
        tenant: Uuid,
        graph: Uuid,
        owner: Owner,
        now: DateTime<Utc>,
        stored: &BTreeMap<Uuid, VectorMetadata>,
    ) -> Result<(), LoomError> {
        for label in &self.labels {
            let mut record = Label::new(tenant, graph, owner, label.as_str());
            (record.created_utc, record.last_update_utc) = (now, now);
            cascade.attach(&record)?;
        }
        for (key, value) in self.tags {
            let mut record = Tag::new(tenant, graph, owner, key.as_str(), value.as_str());
            (record.created_utc, record.last_update_utc) = (now, now);
            cascade.attach(&record)?;
        }
        for vector in self.vectors {
            let mut record = vector.clone().owned_by(owner);
            assign_guid(&mut record.guid);
            record.tenant_guid = tenant;
            record.graph_guid = graph;
            record.created_utc = stored.get(&record.guid).map_or(now, |v| v.created_utc);
            record.last_update_utc = now;
            cascade.attach(&record)?;
        }
        Ok(())
    }
}
