//! Similarity search over stored embeddings.
//!
//! With an enabled index covering the requested domain, candidates come from
//! the published index snapshot after stale owners are refreshed. Otherwise
//! the graph's vector records are scanned from the store.

use super::metrics::Thresholds;
use super::{Measures, SearchType, VectorDomain};
use crate::client::{Ctx, VectorMethods};
use crate::enumeration::EnumerationOrder;
use crate::filter::{Facets, Filter, Filterable};
use crate::primitives;
use crate::storage::{RecordKind, Snapshot, StoreRead};
use crate::types::{Edge, Graph, LoomError, Node, Owner, VectorMetadata};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// REQUEST AND RESULTS
// =============================================================================

/// A similarity query against one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchRequest {
    pub tenant_guid: Uuid,
    pub graph_guid: Uuid,
    pub domain: VectorDomain,
    #[serde(default)]
    pub search_type: SearchType,
    pub embedding: Vec<f32>,
    /// Only vectors owned by matching entities are scored.
    #[serde(default)]
    pub filter: Filter,
    /// Defaults to `vector_index.default_top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub max_distance: Option<f64>,
    #[serde(default)]
    pub min_inner_product: Option<f64>,
}

impl VectorSearchRequest {
    #[must_use]
    pub fn new(tenant_guid: Uuid, graph_guid: Uuid, domain: VectorDomain, embedding: Vec<f32>) -> Self {
        Self {
            tenant_guid,
            graph_guid,
            domain,
            search_type: SearchType::default(),
            embedding,
            filter: Filter::default(),
            top_k: None,
            min_score: None,
            max_distance: None,
            min_inner_product: None,
        }
    }

    #[must_use]
    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[must_use]
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    #[must_use]
    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    #[must_use]
    pub fn with_min_inner_product(mut self, min_inner_product: f64) -> Self {
        self.min_inner_product = Some(min_inner_product);
        self
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_score: self.min_score,
            max_distance: self.max_distance,
            min_inner_product: self.min_inner_product,
        }
    }
}

/// The entity that owns a matching vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedEntity {
    Graph(Graph),
    Node(Node),
    Edge(Edge),
}

impl MatchedEntity {
    #[must_use]
    pub fn guid(&self) -> Uuid {
        match self {
            Self::Graph(graph) => graph.guid,
            Self::Node(node) => node.guid,
            Self::Edge(edge) => edge.guid,
        }
    }

    fn load(snapshot: &Snapshot, tenant: Uuid, owner: Owner) -> Result<Option<Self>, LoomError> {
        Ok(match owner {
            Owner::Graph(guid) => snapshot.get::<Graph>(tenant, guid)?.map(Self::Graph),
            Owner::Node(guid) => snapshot.get::<Node>(tenant, guid)?.map(Self::Node),
            Owner::Edge(guid) => snapshot.get::<Edge>(tenant, guid)?.map(Self::Edge),
        })
    }
}

impl Filterable for MatchedEntity {
    fn facets(&self) -> Facets<'_> {
        match self {
            Self::Graph(graph) => graph.facets(),
            Self::Node(node) => node.facets(),
            Self::Edge(edge) => edge.facets(),
        }
    }
}

/// One ranked match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSearchResult {
    pub score: f64,
    pub distance: f64,
    pub inner_product: f64,
    pub entity: MatchedEntity,
}

#[derive(Debug, Clone, Copy)]
struct Hit {
    owner: Owner,
    measures: Measures,
}

/// Ranked matches, best first. Entities are read from the search snapshot
/// as the sequence is consumed.
pub struct VectorSearchResults {
    snapshot: Arc<Snapshot>,
    tenant: Uuid,
    hits: VecDeque<Hit>,
    cancel: CancellationToken,
    finished: bool,
}

impl std::fmt::Debug for VectorSearchResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSearchResults")
            .field("remaining", &self.hits.len())
            .finish_non_exhaustive()
    }
}

impl VectorSearchResults {
    /// Matches not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.hits.len()
    }
}

impl Iterator for VectorSearchResults {
    type Item = Result<VectorSearchResult, LoomError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.cancel.is_cancelled() {
                self.finished = true;
                return Some(Err(LoomError::Cancelled));
            }
            let hit = self.hits.pop_front()?;
            match MatchedEntity::load(&self.snapshot, self.tenant, hit.owner) {
                Ok(Some(entity)) => {
                    return Some(Ok(VectorSearchResult {
                        score: hit.measures.score,
                        distance: hit.measures.distance,
                        inner_product: hit.measures.inner_product,
                        entity,
                    }));
                }
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

// =============================================================================
// SCORING
// =============================================================================

/// Keeps the best measure per owner among candidates that pass the filter
/// and thresholds.
struct Scorer<'s> {
    request: &'s VectorSearchRequest,
    snapshot: &'s Snapshot,
    cancel: &'s CancellationToken,
    thresholds: Thresholds,
    admitted: BTreeMap<Owner, bool>,
    best: BTreeMap<Owner, Measures>,
}

impl<'s> Scorer<'s> {
    fn new(request: &'s VectorSearchRequest, snapshot: &'s Snapshot, cancel: &'s CancellationToken) -> Self {
        Self {
            request,
            snapshot,
            cancel,
            thresholds: request.thresholds(),
            admitted: BTreeMap::new(),
            best: BTreeMap::new(),
        }
    }

    fn admits(&mut self, owner: Owner) -> Result<bool, LoomError> {
        if self.request.filter.is_empty() {
            return Ok(true);
        }
        if let Some(admitted) = self.admitted.get(&owner) {
            return Ok(*admitted);
        }
        let admitted = MatchedEntity::load(self.snapshot, self.request.tenant_guid, owner)?
            .is_some_and(|entity| self.request.filter.matches(&entity));
        self.admitted.insert(owner, admitted);
        Ok(admitted)
    }

    fn offer(&mut self, owner: Owner, values: &[f32]) -> Result<(), LoomError> {
        if self.cancel.is_cancelled() {
            return Err(LoomError::Cancelled);
        }
        if !self.admits(owner)? {
            return Ok(());
        }
        let search_type = self.request.search_type;
        let measures = search_type.measure(&self.request.embedding, values);
        if !search_type.passes(&measures, &self.thresholds) {
            return Ok(());
        }
        let better = self
            .best
            .get(&owner)
            .is_none_or(|held| search_type.rank(&measures) > search_type.rank(held));
        if better {
            self.best.insert(owner, measures);
        }
        Ok(())
    }

    /// Best first, ties broken by owner GUID; at most `top_k`.
    fn ranked(self, top_k: usize) -> VecDeque<Hit> {
        let search_type = self.request.search_type;
        let mut hits: Vec<Hit> = self
            .best
            .into_iter()
            .map(|(owner, measures)| Hit { owner, measures })
            .collect();
        hits.sort_by(|a, b| {
            search_type
                .rank(&b.measures)
                .total_cmp(&search_type.rank(&a.measures))
                .then_with(|| a.owner.guid().cmp(&b.owner.guid()))
        });
        hits.truncate(top_k);
        hits.into()
    }
}

// =============================================================================
// SEARCH
// =============================================================================

impl VectorMethods<'_> {
    /// Rank the graph's vectors in `request.domain` against the query.
    pub fn search(&self, request: &VectorSearchRequest) -> Result<VectorSearchResults, LoomError> {
        let ctx = &self.ctx;
        let top_k = validate(ctx, request)?;
        let (tenant, graph) = (request.tenant_guid, request.graph_guid);

        let index = ctx
            .indexes()
            .load(ctx, tenant, graph)?
            .filter(|index| index.config().domains.contains(&request.domain));
        if let Some(index) = &index {
            if request.embedding.len() != index.config().dimensionality {
                return Err(LoomError::bad_request(format!(
                    "query has {} values but the index dimensionality is {}",
                    request.embedding.len(),
                    index.config().dimensionality
                )));
            }
            index.refresh(ctx)?;
        }

        let snapshot = ctx.snapshot()?;
        if snapshot.get_raw::<Graph>(tenant, graph)?.is_none() {
            return Err(LoomError::not_found("graph", graph));
        }

        let mut scorer = Scorer::new(request, &snapshot, &ctx.cancel);
        match &index {
            Some(index) => {
                let published = index.current();
                for (owner, vectors) in &published.entries {
                    if VectorDomain::of(*owner) != request.domain {
                        continue;
                    }
                    for vector in vectors {
                        scorer.offer(*owner, &vector.values)?;
                    }
                }
            }
            None => scan_store(&mut scorer, &snapshot, request)?,
        }
        let hits = scorer.ranked(top_k);
        tracing::debug!(
            graph = %graph,
            indexed = index.is_some(),
            hits = hits.len(),
            search_type = %request.search_type,
            "vector search"
        );

        Ok(VectorSearchResults {
            snapshot,
            tenant,
            hits,
            cancel: ctx.cancel.clone(),
            finished: false,
        })
    }
}

fn validate(ctx: &Ctx<'_>, request: &VectorSearchRequest) -> Result<usize, LoomError> {
    if request.embedding.is_empty() {
        return Err(LoomError::bad_request("search embedding must not be empty"));
    }
    if request.embedding.iter().any(|v| !v.is_finite()) {
        return Err(LoomError::bad_request("search embedding values must be finite"));
    }
    let top_k = request
        .top_k
        .unwrap_or(ctx.settings().vector_index.default_top_k);
    if top_k == 0 || top_k > primitives::MAX_TOP_K {
        return Err(LoomError::bad_request(format!(
            "top_k must be in 1..={}, got {top_k}",
            primitives::MAX_TOP_K
        )));
    }
    request.filter.validate()?;
    Ok(top_k)
}

/// Score every stored vector of the domain whose length matches the query.
fn scan_store(
    scorer: &mut Scorer<'_>,
    snapshot: &Snapshot,
    request: &VectorSearchRequest,
) -> Result<(), LoomError> {
    let keys = snapshot.ordered_keys(
        RecordKind::Vector,
        request.tenant_guid,
        request.graph_guid,
        EnumerationOrder::CreatedAscending,
        None,
        usize::MAX,
    )?;
    for key in keys {
        let Some(vector) = snapshot.get_raw::<VectorMetadata>(request.tenant_guid, key.guid)? else {
            continue;
        };
        let owner = vector.owner();
        if VectorDomain::of(owner) != request.domain
            || vector.vectors.len() != request.embedding.len()
        {
            continue;
        }
        scorer.offer(owner, &vector.vectors)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::vector::VectorIndexConfig;
    use crate::{EngineSettings, LoomClient, Tenant};

    fn setup() -> (LoomClient, Uuid, Uuid) {
        let client = LoomClient::in_memory(EngineSettings::default()).unwrap();
        let t = client.tenants().create(Tenant::new("t")).unwrap().guid;
        let g = client.graphs().create(Graph::new(t, "g")).unwrap().guid;
        for (name, values) in [
            ("east", vec![1.0, 0.0]),
            ("north", vec![0.0, 1.0]),
            ("northeast", vec![0.7, 0.7]),
        ] {
            client
                .nodes()
                .create(Node::new(t, g, name).with_label(name).with_vector("m", values))
                .unwrap();
        }
        (client, t, g)
    }

    fn names(results: VectorSearchResults) -> Vec<String> {
        results
            .map(|r| match r.unwrap().entity {
                MatchedEntity::Node(node) => node.name,
                other => panic!("unexpected entity {other:?}"),
            })
            .collect()
    }

    #[test]
    fn cosine_ranks_best_first() {
        let (client, t, g) = setup();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.1]);
        let results = client.vectors().search(&request).unwrap();
        assert_eq!(names(results), vec!["east", "northeast", "north"]);
    }

    #[test]
    fn index_and_scan_agree() {
        let (client, t, g) = setup();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![0.2, 1.0])
            .with_search_type(SearchType::EuclideanDistance)
            .with_top_k(2);
        let scanned = names(client.vectors().search(&request).unwrap());

        client
            .vector_index()
            .enable(t, g, VectorIndexConfig::new(2))
            .unwrap();
        let indexed = names(client.vectors().search(&request).unwrap());
        assert_eq!(scanned, indexed);
        assert_eq!(indexed, vec!["north", "northeast"]);
    }

    #[test]
    fn index_sees_later_writes() {
        let (client, t, g) = setup();
        client
            .vector_index()
            .enable(t, g, VectorIndexConfig::new(2))
            .unwrap();
        client
            .nodes()
            .create(Node::new(t, g, "west").with_vector("m", vec![-1.0, 0.0]))
            .unwrap();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![-1.0, 0.0]).with_top_k(1);
        assert_eq!(names(client.vectors().search(&request).unwrap()), vec!["west"]);
    }

    #[test]
    fn filter_and_threshold_narrow_results() {
        let (client, t, g) = setup();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.0])
            .with_filter(Filter::new().with_label("north"));
        assert_eq!(names(client.vectors().search(&request).unwrap()), vec!["north"]);

        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.0])
            .with_min_score(0.5);
        assert_eq!(
            names(client.vectors().search(&request).unwrap()),
            vec!["east", "northeast"]
        );
    }

    #[test]
    fn cancelled_search_fails() {
        let (client, t, g) = setup();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.0]);
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            client.vectors().with_cancellation(token.clone()).search(&request),
            Err(LoomError::Cancelled)
        ));

        client
            .vector_index()
            .enable(t, g, VectorIndexConfig::new(2))
            .unwrap();
        assert!(matches!(
            client.vectors().with_cancellation(token).search(&request),
            Err(LoomError::Cancelled)
        ));
    }

    #[test]
    fn query_must_match_index_dimensionality() {
        let (client, t, g) = setup();
        client
            .vector_index()
            .enable(t, g, VectorIndexConfig::new(2))
            .unwrap();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.0, 0.0]);
        assert!(matches!(
            client.vectors().search(&request),
            Err(LoomError::BadRequest(_))
        ));
    }

    #[test]
    fn bad_requests() {
        let (client, t, g) = setup();
        let empty = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![]);
        assert!(matches!(
            client.vectors().search(&empty),
            Err(LoomError::BadRequest(_))
        ));
        let too_many = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.0]).with_top_k(1001);
        assert!(matches!(
            client.vectors().search(&too_many),
            Err(LoomError::BadRequest(_))
        ));
    }

    #[test]
    fn one_result_per_entity() {
        let (client, t, g) = setup();
        client
            .nodes()
            .create(
                Node::new(t, g, "twice")
                    .with_vector("a", vec![1.0, 0.0])
                    .with_vector("b", vec![0.9, 0.1]),
            )
            .unwrap();
        let request = VectorSearchRequest::new(t, g, VectorDomain::Node, vec![1.0, 0.0]);
        let found = names(client.vectors().search(&request).unwrap());
        assert_eq!(found.iter().filter(|name| *name == "twice").count(), 1);
    }
}
