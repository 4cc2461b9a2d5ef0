//! # Vector Index
//!
//! One optional index per (tenant, graph), configured by
//! [`VectorIndexConfig`] and persisted alongside the graph.
//!
//! ## Lifecycle
//!
//! - `enable` persists the configuration and builds the index
//! - indexes are loaded lazily on first use after a restart: a configured
//!   artifact is trusted only when its generation equals the store's
//!   generation counter for the graph, otherwise the index is rebuilt
//! - mutations mark owners stale after commit; stale owners are re-read and
//!   published before the next search
//! - `disable` drops the configuration, the in-memory index and optionally
//!   the artifact
//!
//! ## Concurrency
//!
//! The published [`IndexSnapshot`] lives behind an [`ArcSwap`]: searches see
//! the old or the new snapshot, never a partial one. The registry and the
//! stale sets use `parking_lot` locks; an atomic flag keeps rebuilds of one
//! index exclusive.

mod artifact;
mod metrics;
mod search;

pub use artifact::MAX_ARTIFACT_SIZE;
pub use metrics::{Measures, SearchType};
pub use search::{MatchedEntity, VectorSearchRequest, VectorSearchResult, VectorSearchResults};

use crate::client::{Ctx, require};
use crate::enumeration::{EnumerationOrder, Scope};
use crate::storage::{CascadeEffects, Record, RecordKind, Snapshot, StoreRead};
use crate::types::{Graph, LoomError, Owner, VectorMetadata, timestamp_from_micros, timestamp_now};
use arc_swap::ArcSwap;
use artifact::IndexArtifact;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// The kind of entity a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorDomain {
    Graph,
    Node,
    Edge,
}

impl VectorDomain {
    #[must_use]
    pub fn of(owner: Owner) -> Self {
        match owner {
            Owner::Graph(_) => Self::Graph,
            Owner::Node(_) => Self::Node,
            Owner::Edge(_) => Self::Edge,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Graph => "graph",
            Self::Node => "node",
            Self::Edge => "edge",
        }
    }
}

impl FromStr for VectorDomain {
    type Err = LoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graph" => Ok(Self::Graph),
            "node" => Ok(Self::Node),
            "edge" => Ok(Self::Edge),
            _ => Err(LoomError::bad_request(format!("unknown vector domain {s:?}"))),
        }
    }
}

/// Configuration of one graph's vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    pub dimensionality: usize,
    pub domains: BTreeSet<VectorDomain>,
    /// Where to persist the index; `None` keeps it in memory only.
    #[serde(default)]
    pub index_file: Option<PathBuf>,
}

impl VectorIndexConfig {
    /// An in-memory index over node vectors.
    #[must_use]
    pub fn new(dimensionality: usize) -> Self {
        Self {
            dimensionality,
            domains: BTreeSet::from([VectorDomain::Node]),
            index_file: None,
        }
    }

    #[must_use]
    pub fn with_domains(mut self, domains: impl IntoIterator<Item = VectorDomain>) -> Self {
        self.domains = domains.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), LoomError> {
        if self.dimensionality == 0 {
            return Err(LoomError::bad_request(
                "vector index dimensionality must be positive",
            ));
        }
        if self.domains.is_empty() {
            return Err(LoomError::bad_request(
                "vector index needs at least one domain",
            ));
        }
        Ok(())
    }

    fn accepts(&self, vector: &VectorMetadata) -> bool {
        self.domains.contains(&VectorDomain::of(vector.owner()))
            && vector.vectors.len() == self.dimensionality
    }
}

/// Observed state of a loaded index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexStatistics {
    pub vector_count: usize,
    pub dimensionality: usize,
    pub domains: BTreeSet<VectorDomain>,
    pub last_build_utc: DateTime<Utc>,
    /// Owners marked stale and not yet refreshed.
    pub pending_invalidations: usize,
    pub index_file: Option<PathBuf>,
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// One indexed embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct IndexedVector {
    pub guid: Uuid,
    pub values: Vec<f32>,
}

/// An immutable published state of an index.
#[derive(Debug)]
pub(crate) struct IndexSnapshot {
    pub entries: BTreeMap<Owner, Vec<IndexedVector>>,
    pub built_utc: DateTime<Utc>,
}

impl IndexSnapshot {
    fn vector_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// The in-memory index of one graph.
pub(crate) struct GraphVectorIndex {
    tenant: Uuid,
    graph: Uuid,
    config: VectorIndexConfig,
    published: ArcSwap<IndexSnapshot>,
    stale: Mutex<BTreeSet<Owner>>,
    /// Held from draining `stale` until the result is published.
    publishing: Mutex<()>,
    rebuilding: AtomicBool,
}

impl std::fmt::Debug for GraphVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphVectorIndex")
            .field("tenant", &self.tenant)
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Clears the rebuild flag when the rebuild ends, however it ends.
struct RebuildGuard<'a>(&'a AtomicBool);

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GraphVectorIndex {
    fn new(tenant: Uuid, graph: Uuid, config: VectorIndexConfig, snapshot: IndexSnapshot) -> Self {
        Self {
            tenant,
            graph,
            config,
            published: ArcSwap::from_pointee(snapshot),
            stale: Mutex::new(BTreeSet::new()),
            publishing: Mutex::new(()),
            rebuilding: AtomicBool::new(false),
        }
    }

    pub(crate) fn config(&self) -> &VectorIndexConfig {
        &self.config
    }

    pub(crate) fn current(&self) -> Arc<IndexSnapshot> {
        self.published.load_full()
    }

    fn mark_stale(&self, owner: Owner) {
        self.stale.lock().insert(owner);
    }

    fn statistics(&self) -> VectorIndexStatistics {
        let current = self.current();
        VectorIndexStatistics {
            vector_count: current.vector_count(),
            dimensionality: self.config.dimensionality,
            domains: self.config.domains.clone(),
            last_build_utc: current.built_utc,
            pending_invalidations: self.stale.lock().len(),
            index_file: self.config.index_file.clone(),
        }
    }

    /// Full scan of the graph's vectors in `snapshot`.
    fn scan(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<Owner, Vec<IndexedVector>>, LoomError> {
        let keys = snapshot.ordered_keys(
            RecordKind::Vector,
            self.tenant,
            self.graph,
            EnumerationOrder::CreatedAscending,
            None,
            usize::MAX,
        )?;
        let mut entries: BTreeMap<Owner, Vec<IndexedVector>> = BTreeMap::new();
        for key in keys {
            if cancel.is_cancelled() {
                return Err(LoomError::Cancelled);
            }
            if let Some(vector) = snapshot.get_raw::<VectorMetadata>(self.tenant, key.guid)?
                && self.config.accepts(&vector)
            {
                entries.entry(vector.owner()).or_default().push(IndexedVector {
                    guid: vector.guid,
                    values: vector.vectors,
                });
            }
        }
        Ok(entries)
    }

    /// The vectors `owner` currently holds in `snapshot`.
    fn scan_owner(&self, snapshot: &Snapshot, owner: Owner) -> Result<Vec<IndexedVector>, LoomError> {
        let mut vectors = Vec::new();
        for guid in snapshot.owned(self.tenant, owner.guid(), RecordKind::Vector)? {
            if let Some(vector) = snapshot.get_raw::<VectorMetadata>(self.tenant, guid)?
                && vector.graph_guid == self.graph
                && self.config.accepts(&vector)
            {
                vectors.push((vector.order_key(), vector));
            }
        }
        vectors.sort_by_key(|(key, _)| *key);
        Ok(vectors
            .into_iter()
            .map(|(_, vector)| IndexedVector {
                guid: vector.guid,
                values: vector.vectors,
            })
            .collect())
    }

    /// Re-read stale owners and publish the result.
    pub(crate) fn refresh(&self, ctx: &Ctx<'_>) -> Result<usize, LoomError> {
        let _publishing = self.publishing.lock();
        let drained = std::mem::take(&mut *self.stale.lock());
        if drained.is_empty() {
            return Ok(0);
        }
        let updates = ctx.snapshot().and_then(|snapshot| {
            let mut updates = Vec::with_capacity(drained.len());
            for owner in &drained {
                ctx.check()?;
                updates.push((*owner, self.scan_owner(&snapshot, *owner)?));
            }
            Ok(updates)
        });
        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                self.stale.lock().extend(drained);
                return Err(e);
            }
        };

        self.published.rcu(|current| {
            let mut entries = current.entries.clone();
            for (owner, vectors) in &updates {
                if vectors.is_empty() {
                    entries.remove(owner);
                } else {
                    entries.insert(*owner, vectors.clone());
                }
            }
            IndexSnapshot {
                entries,
                built_utc: current.built_utc,
            }
        });
        tracing::debug!(graph = %self.graph, owners = updates.len(), "vector index refreshed");
        Ok(updates.len())
    }

    /// Full re-scan published with one pointer swap.
    pub(crate) fn rebuild(&self, ctx: &Ctx<'_>) -> Result<(), LoomError> {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoomError::conflict(format!(
                "vector index of graph {} is already rebuilding",
                self.graph
            )));
        }
        let _guard = RebuildGuard(&self.rebuilding);
        let _publishing = self.publishing.lock();

        let drained = std::mem::take(&mut *self.stale.lock());
        match self.build(ctx) {
            Ok(snapshot) => {
                self.published.store(Arc::new(snapshot));
                Ok(())
            }
            Err(e) => {
                self.stale.lock().extend(drained);
                Err(e)
            }
        }
    }

    fn build(&self, ctx: &Ctx<'_>) -> Result<IndexSnapshot, LoomError> {
        let snapshot = ctx.snapshot()?;
        let generation = snapshot.index_generation(self.tenant, self.graph)?;
        let entries = self.scan(&snapshot, &ctx.cancel)?;
        let built = IndexSnapshot {
            entries,
            built_utc: timestamp_now(),
        };
        tracing::info!(
            graph = %self.graph,
            vectors = built.vector_count(),
            generation,
            "vector index built"
        );
        if let Some(path) = &self.config.index_file {
            artifact::write(path, &self.artifact(&built, generation))?;
        }
        Ok(built)
    }

    fn artifact(&self, snapshot: &IndexSnapshot, generation: u64) -> IndexArtifact {
        IndexArtifact {
            tenant: self.tenant,
            graph: self.graph,
            dimensionality: self.config.dimensionality,
            domains: self.config.domains.clone(),
            generation,
            built_micros: snapshot.built_utc.timestamp_micros(),
            entries: snapshot
                .entries
                .iter()
                .map(|(owner, vectors)| (*owner, vectors.clone()))
                .collect(),
        }
    }

    /// Restore from the configured artifact when it can be trusted.
    fn restore(&self, generation: u64) -> Option<IndexSnapshot> {
        let path = self.config.index_file.as_ref()?;
        if !path.exists() {
            return None;
        }
        let loaded = match artifact::read(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable vector index artifact; rebuilding");
                return None;
            }
        };
        let matches = loaded.tenant == self.tenant
            && loaded.graph == self.graph
            && loaded.dimensionality == self.config.dimensionality
            && loaded.domains == self.config.domains
            && loaded.generation == generation;
        if !matches {
            tracing::info!(path = %path.display(), "vector index artifact is out of date; rebuilding");
            return None;
        }
        let built_utc = timestamp_from_micros(loaded.built_micros).ok()?;
        Some(IndexSnapshot {
            entries: loaded.entries.into_iter().collect(),
            built_utc,
        })
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Loaded indexes of one client, keyed by (tenant, graph).
#[derive(Debug, Default)]
pub(crate) struct VectorIndexRegistry {
    indexes: RwLock<BTreeMap<(Uuid, Uuid), Arc<GraphVectorIndex>>>,
}

impl VectorIndexRegistry {
    /// Apply the effects of a committed mutation of `tenant`.
    pub(crate) fn invalidate(&self, tenant: Uuid, effects: &CascadeEffects) {
        if effects.touched.is_empty() && effects.dropped_graphs.is_empty() {
            return;
        }
        let mut indexes = self.indexes.write();
        for graph in &effects.dropped_graphs {
            indexes.remove(&(tenant, *graph));
        }
        for (graph, owner) in &effects.touched {
            if let Some(index) = indexes.get(&(tenant, *graph)) {
                index.mark_stale(*owner);
            }
        }
    }

    /// The index of a graph, loading or building it if it is configured but
    /// not yet in memory.
    ///
    /// The registry lock is held while loading so that invalidations
    /// committed meanwhile land on the loaded index.
    pub(crate) fn load(
        &self,
        ctx: &Ctx<'_>,
        tenant: Uuid,
        graph: Uuid,
    ) -> Result<Option<Arc<GraphVectorIndex>>, LoomError> {
        if let Some(index) = self.indexes.read().get(&(tenant, graph)) {
            return Ok(Some(Arc::clone(index)));
        }
        let mut indexes = self.indexes.write();
        if let Some(index) = indexes.get(&(tenant, graph)) {
            return Ok(Some(Arc::clone(index)));
        }

        let snapshot = ctx.snapshot()?;
        let Some(bytes) = snapshot.index_config_bytes(tenant, graph)? else {
            return Ok(None);
        };
        let config: VectorIndexConfig = postcard::from_bytes(&bytes)?;
        let generation = snapshot.index_generation(tenant, graph)?;
        drop(snapshot);

        let placeholder = IndexSnapshot {
            entries: BTreeMap::new(),
            built_utc: timestamp_now(),
        };
        let index = GraphVectorIndex::new(tenant, graph, config, placeholder);
        match index.restore(generation) {
            Some(restored) => {
                tracing::info!(graph = %graph, vectors = restored.vector_count(), "vector index restored from artifact");
                index.published.store(Arc::new(restored));
            }
            None => index.published.store(Arc::new(index.build(ctx)?)),
        }

        let index = Arc::new(index);
        indexes.insert((tenant, graph), Arc::clone(&index));
        Ok(Some(index))
    }

    fn remove(&self, tenant: Uuid, graph: Uuid) {
        self.indexes.write().remove(&(tenant, graph));
    }
}

// =============================================================================
// METHOD GROUP
// =============================================================================

/// Lifecycle of per-graph vector indexes.
pub struct VectorIndexMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> VectorIndexMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// The persisted configuration, if an index is enabled.
    pub fn get_configuration(
        &self,
        tenant: Uuid,
        graph: Uuid,
    ) -> Result<Option<VectorIndexConfig>, LoomError> {
        let snapshot = self.ctx.snapshot()?;
        snapshot
            .index_config_bytes(tenant, graph)?
            .map(|bytes| Ok(postcard::from_bytes(&bytes)?))
            .transpose()
    }

    /// Persist `config`, build the index and write its artifact if one is
    /// configured.
    pub fn enable(
        &self,
        tenant: Uuid,
        graph: Uuid,
        config: VectorIndexConfig,
    ) -> Result<VectorIndexStatistics, LoomError> {
        config.validate()?;
        let bytes = postcard::to_stdvec(&config)?;
        self.ctx.mutate(tenant, |cascade| {
            let batch = cascade.batch();
            require::<Graph>(batch, Scope::tenant(tenant), graph)?;
            if batch.index_config_bytes(tenant, graph)?.is_some() {
                return Err(LoomError::conflict(format!(
                    "graph {graph} already has a vector index"
                )));
            }
            batch.put_index_config(tenant, graph, &bytes)
        })?;

        let index = match self.ctx.indexes().load(&self.ctx, tenant, graph) {
            Ok(Some(index)) => index,
            Ok(None) => return Err(LoomError::not_found("vector index of graph", graph)),
            Err(e) => {
                self.ctx.mutate(tenant, |cascade| {
                    cascade.batch().remove_index_config(tenant, graph)
                })?;
                return Err(e);
            }
        };
        tracing::info!(
            tenant = %tenant,
            graph = %graph,
            dimensionality = config.dimensionality,
            "vector index enabled"
        );
        Ok(index.statistics())
    }

    /// Re-scan the graph and publish a fresh index.
    pub fn rebuild(&self, tenant: Uuid, graph: Uuid) -> Result<VectorIndexStatistics, LoomError> {
        let index = self.require_index(tenant, graph)?;
        index.rebuild(&self.ctx)?;
        Ok(index.statistics())
    }

    /// Drop the index and its configuration; optionally delete the artifact.
    pub fn disable(&self, tenant: Uuid, graph: Uuid, delete_file: bool) -> Result<(), LoomError> {
        let config = self
            .get_configuration(tenant, graph)?
            .ok_or_else(|| LoomError::not_found("vector index of graph", graph))?;
        self.ctx.mutate(tenant, |cascade| {
            cascade.batch().remove_index_config(tenant, graph)
        })?;
        self.ctx.indexes().remove(tenant, graph);

        if delete_file && let Some(path) = &config.index_file {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(tenant = %tenant, graph = %graph, delete_file, "vector index disabled");
        Ok(())
    }

    pub fn get_statistics(
        &self,
        tenant: Uuid,
        graph: Uuid,
    ) -> Result<VectorIndexStatistics, LoomError> {
        Ok(self.require_index(tenant, graph)?.statistics())
    }

    fn require_index(&self, tenant: Uuid, graph: Uuid) -> Result<Arc<GraphVectorIndex>, LoomError> {
        self.ctx
            .indexes()
            .load(&self.ctx, tenant, graph)?
            .ok_or_else(|| LoomError::not_found("vector index of graph", graph))
    }
}
