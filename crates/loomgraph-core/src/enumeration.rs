//! # Enumeration Engine
//!
//! Stable-ordered paging over the creation-order index.
//!
//! - Ordering is strict: `(created_micros, guid)`.
//! - A continuation token replaces `skip` when present. It is a version 8
//!   GUID carrying the order position of the last record of the previous
//!   page, so paging resumes even if that record is deleted in between.
//! - Without `max_results` a page holds `enumeration.default_max_results`
//!   records.
//! - [`Cursor`] reads index keys in batches from one snapshot, hydrates and
//!   filters one record at a time, and polls cancellation per record.

use crate::filter::Filter;
use crate::primitives::MAX_RESULTS;
use crate::settings::EnumerationSettings;
use crate::storage::{OrderKey, Record, Snapshot, StoreRead};
use crate::types::LoomError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// QUERY AND RESULT
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumerationOrder {
    #[default]
    CreatedAscending,
    CreatedDescending,
}

/// One page request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationQuery {
    pub ordering: EnumerationOrder,
    /// Page size, `1..=1000`; `None` takes the configured default.
    pub max_results: Option<usize>,
    /// Records to skip; ignored when a continuation token is present.
    pub skip: usize,
    pub continuation_token: Option<Uuid>,
    pub include_count: bool,
    pub filter: Filter,
}

impl Default for EnumerationQuery {
    fn default() -> Self {
        Self {
            ordering: EnumerationOrder::CreatedAscending,
            max_results: None,
            skip: 0,
            continuation_token: None,
            include_count: false,
            filter: Filter::default(),
        }
    }
}

impl EnumerationQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ordering(mut self, ordering: EnumerationOrder) -> Self {
        self.ordering = ordering;
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    #[must_use]
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn with_continuation(mut self, token: Option<Uuid>) -> Self {
        self.continuation_token = token;
        self
    }

    #[must_use]
    pub fn with_count(mut self) -> Self {
        self.include_count = true;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn validate(&self) -> Result<(), LoomError> {
        if let Some(max_results) = self.max_results
            && (max_results == 0 || max_results > MAX_RESULTS)
        {
            return Err(LoomError::bad_request(format!(
                "max_results must be in 1..={MAX_RESULTS}, got {max_results}"
            )));
        }
        self.filter.validate()
    }

    pub(crate) fn page_size(&self, settings: &EnumerationSettings) -> usize {
        self.max_results.unwrap_or(settings.default_max_results)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerationResult<T> {
    pub objects: Vec<T>,
    /// At least one further filtered record exists.
    pub has_more: bool,
    /// Resumes after the last returned record, `None` when exhausted.
    pub continuation_token: Option<Uuid>,
    /// Filtered total, when `include_count` was set.
    pub total_records: Option<usize>,
}

// =============================================================================
// CURSOR
// =============================================================================

/// Where a cursor reads: `(tenant, scope)` of the ordering index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scope {
    pub tenant: Uuid,
    pub scope: Uuid,
}

impl Scope {
    /// Tenants themselves live outside any tenant.
    pub(crate) const TENANTS: Self = Self {
        tenant: Uuid::nil(),
        scope: Uuid::nil(),
    };

    /// Tenant-level records: users, credentials and graphs.
    pub(crate) const fn tenant(tenant: Uuid) -> Self {
        Self {
            tenant,
            scope: Uuid::nil(),
        }
    }

    /// Graph content: nodes, edges and subordinate records.
    pub(crate) const fn graph(tenant: Uuid, graph: Uuid) -> Self {
        Self {
            tenant,
            scope: graph,
        }
    }
}

/// A lazy, filtered, ordered sequence of records.
///
/// Owns its read snapshot; dropping the cursor releases it.
pub struct Cursor<R> {
    snapshot: Arc<Snapshot>,
    scope: Scope,
    ordering: EnumerationOrder,
    filter: Filter,
    cancel: CancellationToken,
    batch_size: usize,
    after: Option<OrderKey>,
    pending: VecDeque<OrderKey>,
    exhausted: bool,
    finished: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R> std::fmt::Debug for Cursor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("ordering", &self.ordering)
            .field("pending", &self.pending.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<R: Record> Cursor<R> {
    pub(crate) fn new(
        snapshot: Arc<Snapshot>,
        scope: Scope,
        ordering: EnumerationOrder,
        filter: Filter,
        after: Option<OrderKey>,
        cancel: CancellationToken,
        batch_size: usize,
    ) -> Self {
        Self {
            snapshot,
            scope,
            ordering,
            filter,
            cancel,
            batch_size: batch_size.max(1),
            after,
            pending: VecDeque::new(),
            exhausted: false,
            finished: false,
            _record: PhantomData,
        }
    }

    fn refill(&mut self) -> Result<(), LoomError> {
        let keys = self.snapshot.ordered_keys(
            R::KIND,
            self.scope.tenant,
            self.scope.scope,
            self.ordering,
            self.after,
            self.batch_size,
        )?;
        if keys.len() < self.batch_size {
            self.exhausted = true;
        }
        self.after = keys.last().copied().or(self.after);
        self.pending.extend(keys);
        Ok(())
    }

    fn fail(&mut self, e: LoomError) -> Option<Result<R, LoomError>> {
        self.finished = true;
        Some(Err(e))
    }
}

impl<R: Record> Iterator for Cursor<R> {
    type Item = Result<R, LoomError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                return self.fail(LoomError::Cancelled);
            }
            let Some(key) = self.pending.pop_front() else {
                if self.exhausted {
                    self.finished = true;
                    return None;
                }
                if let Err(e) = self.refill() {
                    return self.fail(e);
                }
                continue;
            };
            match self.snapshot.get::<R>(self.scope.tenant, key.guid) {
                Ok(Some(record)) if self.filter.matches(&record) => return Some(Ok(record)),
                Ok(_) => {}
                Err(e) => return self.fail(e),
            }
        }
    }
}

// =============================================================================
// PAGING
// =============================================================================

const TOKEN_VERSION: u128 = 8;
/// Low bits of the record GUID that do not fit in a token.
const DROPPED_GUID_BITS: u32 = 70;
const GUID_PREFIX_BITS: u32 = 128 - DROPPED_GUID_BITS;
const LOW_FIELD_BITS: u32 = 62;

/// Mint the continuation token for a record at `key`.
///
/// The 122 free bits of a version 8 GUID hold the creation time followed by
/// the top 58 bits of the record GUID.
pub(crate) fn mint_token(key: OrderKey) -> Uuid {
    let payload = (u128::from(key.created_micros as u64) << GUID_PREFIX_BITS)
        | (key.guid.as_u128() >> DROPPED_GUID_BITS);
    let high = payload >> LOW_FIELD_BITS;
    let low = payload & ((1 << LOW_FIELD_BITS) - 1);
    Uuid::from_u128(
        ((high >> 12) << 80) | (TOKEN_VERSION << 76) | ((high & 0xFFF) << 64) | (0b10 << 62) | low,
    )
}

/// `(created_micros, guid prefix)` of a minted token.
fn decode_token(token: Uuid) -> Option<(i64, u128)> {
    if token.get_version_num() != TOKEN_VERSION as usize {
        return None;
    }
    let raw = token.as_u128();
    let high = ((raw >> 80) << 12) | ((raw >> 64) & 0xFFF);
    let payload = (high << LOW_FIELD_BITS) | (raw & ((1 << LOW_FIELD_BITS) - 1));
    let created_micros = (payload >> GUID_PREFIX_BITS) as u64 as i64;
    Some((created_micros, payload & ((1 << GUID_PREFIX_BITS) - 1)))
}

/// Resolve a continuation token to the exclusive bound the next page starts
/// after.
///
/// The GUID of a record in scope is also accepted and resumes after it.
pub(crate) fn resolve_token<R: Record>(
    snapshot: &Snapshot,
    scope: Scope,
    token: Uuid,
    ordering: EnumerationOrder,
) -> Result<OrderKey, LoomError> {
    if let Some(record) = snapshot.get_raw::<R>(scope.tenant, token)?
        && record.scope_guid() == scope.scope
    {
        return Ok(record.order_key());
    }
    token_bound(token, ordering).ok_or_else(|| {
        LoomError::bad_request(format!(
            "continuation token {token} does not identify a {} in this scope",
            R::KIND.name()
        ))
    })
}

fn token_bound(token: Uuid, ordering: EnumerationOrder) -> Option<OrderKey> {
    let (created_micros, prefix) = decode_token(token)?;
    // Every GUID sharing the prefix sorts on the already-returned side.
    let rest: u128 = match ordering {
        EnumerationOrder::CreatedAscending => (1 << DROPPED_GUID_BITS) - 1,
        EnumerationOrder::CreatedDescending => 0,
    };
    Some(OrderKey {
        created_micros,
        guid: Uuid::from_u128((prefix << DROPPED_GUID_BITS) | rest),
    })
}

fn next_token<R: Record>(objects: &[R], has_more: bool) -> Option<Uuid> {
    if !has_more {
        return None;
    }
    objects.last().map(|record| mint_token(record.order_key()))
}

/// Page through the ordering index.
pub(crate) fn enumerate<R: Record>(
    snapshot: Arc<Snapshot>,
    scope: Scope,
    query: &EnumerationQuery,
    cancel: &CancellationToken,
    settings: &EnumerationSettings,
) -> Result<EnumerationResult<R>, LoomError> {
    query.validate()?;
    let (page_size, batch_size) = (query.page_size(settings), settings.cursor_batch_size);
    let after = query
        .continuation_token
        .map(|token| resolve_token::<R>(&snapshot, scope, token, query.ordering))
        .transpose()?;

    let total_records = if query.include_count {
        Some(count_matching::<R>(&snapshot, scope, query, cancel, batch_size)?)
    } else {
        None
    };

    let mut cursor = Cursor::<R>::new(
        snapshot,
        scope,
        query.ordering,
        query.filter.clone(),
        after,
        cancel.clone(),
        batch_size,
    );
    if after.is_none() {
        for _ in 0..query.skip {
            if cursor.next().transpose()?.is_none() {
                break;
            }
        }
    }

    let mut objects = Vec::with_capacity(page_size.min(batch_size));
    while objects.len() < page_size {
        match cursor.next().transpose()? {
            Some(record) => objects.push(record),
            None => break,
        }
    }
    let has_more = cursor.next().transpose()?.is_some();

    Ok(EnumerationResult {
        continuation_token: next_token(&objects, has_more),
        objects,
        has_more,
        total_records,
    })
}

fn count_matching<R: Record>(
    snapshot: &Arc<Snapshot>,
    scope: Scope,
    query: &EnumerationQuery,
    cancel: &CancellationToken,
    batch_size: usize,
) -> Result<usize, LoomError> {
    if query.filter.is_empty() {
        return snapshot.count(R::KIND, scope.tenant, Some(scope.scope));
    }
    let cursor = Cursor::<R>::new(
        Arc::clone(snapshot),
        scope,
        query.ordering,
        query.filter.clone(),
        None,
        cancel.clone(),
        batch_size,
    );
    let mut total = 0;
    for record in cursor {
        record?;
        total += 1;
    }
    Ok(total)
}

/// Page an already-materialized candidate list (adjacency results).
///
/// `marker` is the resolved continuation token, if any.
pub(crate) fn paginate<R: Record>(
    mut candidates: Vec<R>,
    query: &EnumerationQuery,
    marker: Option<OrderKey>,
    settings: &EnumerationSettings,
) -> EnumerationResult<R> {
    candidates.retain(|record| query.filter.matches(record));
    match query.ordering {
        EnumerationOrder::CreatedAscending => candidates.sort_by_key(Record::order_key),
        EnumerationOrder::CreatedDescending => {
            candidates.sort_by_key(|record| std::cmp::Reverse(record.order_key()));
        }
    }
    let total_records = query.include_count.then_some(candidates.len());

    let start = match marker {
        Some(marker) => candidates
            .iter()
            .position(|record| match query.ordering {
                EnumerationOrder::CreatedAscending => record.order_key() > marker,
                EnumerationOrder::CreatedDescending => record.order_key() < marker,
            })
            .unwrap_or(candidates.len()),
        None => query.skip.min(candidates.len()),
    };
    let end = start.saturating_add(query.page_size(settings)).min(candidates.len());
    let has_more = end < candidates.len();
    let objects: Vec<R> = candidates.drain(start..end).collect();

    EnumerationResult {
        continuation_token: next_token(&objects, has_more),
        objects,
        has_more,
        total_records,
    }
}

// =============================================================================
// TESTS
// =============================================================================
