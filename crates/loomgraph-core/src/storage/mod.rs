//! # Primitive Storage Layer
//!
//! A single redb database holds every entity table plus the secondary
//! indexes the query engines scan:
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | entity tables | `(tenant, guid)` | postcard record |
//! | `creation_order` | `(kind, tenant, scope, created_micros, guid)` | `()` |
//! | `edges_out` / `edges_in` | `(tenant, node, edge)` | other endpoint |
//! | `owned` | `(tenant, owner, kind, guid)` | `()` |
//! | `vector_index_configs` | `(tenant, graph)` | postcard config |
//!
//! Write transactions are the unit of atomicity; read transactions give
//! snapshot isolation. Every read method returns owned values so tables are
//! never held open across calls.

mod cascade;
mod codec;
mod redb_store;
mod tables;

pub(crate) use cascade::{Cascade, CascadeEffects};
pub use cascade::Subordinate;
pub(crate) use redb_store::WriteBatch;
pub use redb_store::{RedbStore, Snapshot};

use crate::enumeration::EnumerationOrder;
use crate::filter::Filterable;
use crate::types::LoomError;
use chrono::{DateTime, Utc};
use redb::{AccessGuard, Key, ReadableTable, StorageError, TableDefinition, Value};
use std::ops::Bound;
use tables::{
    AdjacencyTable, CREATION_ORDER, EDGES_IN, EDGES_OUT, EntityTable, INDEX_CONFIGS,
    INDEX_GENERATIONS, OWNED, OrderTuple,
};
use uuid::Uuid;

// =============================================================================
// RECORD KINDS
// =============================================================================

/// Discriminant of each entity table, as stored in secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RecordKind {
    Tenant = 1,
    User = 2,
    Credential = 3,
    Graph = 4,
    Node = 5,
    Edge = 6,
    Label = 7,
    Tag = 8,
    Vector = 9,
}

impl RecordKind {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::User => "user",
            Self::Credential => "credential",
            Self::Graph => "graph",
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Label => "label",
            Self::Tag => "tag",
            Self::Vector => "vector",
        }
    }

    pub(crate) const fn table(self) -> EntityTable {
        match self {
            Self::Tenant => tables::TENANTS,
            Self::User => tables::USERS,
            Self::Credential => tables::CREDENTIALS,
            Self::Graph => tables::GRAPHS,
            Self::Node => tables::NODES,
            Self::Edge => tables::EDGES,
            Self::Label => tables::LABELS,
            Self::Tag => tables::TAGS,
            Self::Vector => tables::VECTORS,
        }
    }
}

// =============================================================================
// ORDERING AND ADJACENCY KEYS
// =============================================================================

/// Strict total order of enumerations: creation time, then GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey {
    pub created_micros: i64,
    pub guid: Uuid,
}

/// Which adjacency index to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Edges whose `from` is the node.
    Outbound,
    /// Edges whose `to` is the node.
    Inbound,
}

/// One adjacency entry: the edge and the node at its other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Adjacent {
    pub edge: Uuid,
    pub node: Uuid,
}

// =============================================================================
// RECORDS
// =============================================================================

/// A persisted entity type.
///
/// Implemented for every entity in [`crate::types`]; not meant to be
/// implemented outside this crate.
pub trait Record: Filterable + Clone + Sized {
    const KIND: RecordKind;

    fn guid(&self) -> Uuid;
    fn tenant_guid(&self) -> Uuid;
    /// Scope within the tenant used by the ordering index: the graph for
    /// graph content, nil otherwise.
    fn scope_guid(&self) -> Uuid;
    fn created_utc(&self) -> DateTime<Utc>;

    fn encode(&self) -> Result<Vec<u8>, LoomError>;
    fn decode(bytes: &[u8]) -> Result<Self, LoomError>;

    /// Fill in collections held as subordinate records.
    fn hydrate<S: StoreRead>(&mut self, _store: &S) -> Result<(), LoomError> {
        Ok(())
    }

    /// Tenant component of the ordering-index key.
    fn order_tenant(&self) -> Uuid {
        self.tenant_guid()
    }

    /// Key of the record in its entity table.
    fn primary_key(tenant: Uuid, guid: Uuid) -> (u128, u128) {
        (tenant.as_u128(), guid.as_u128())
    }

    fn order_key(&self) -> OrderKey {
        OrderKey {
            created_micros: self.created_utc().timestamp_micros(),
            guid: self.guid(),
        }
    }
}

pub(crate) fn order_tuple<R: Record>(record: &R) -> OrderTuple {
    let key = record.order_key();
    (
        R::KIND.code(),
        record.order_tenant().as_u128(),
        record.scope_guid().as_u128(),
        key.created_micros,
        key.guid.as_u128(),
    )
}

// =============================================================================
// READ INTERFACE
// =============================================================================

/// Anything that can open redb tables for reading.
pub(crate) trait TableSource {
    fn open<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<'static, K, V>,
    ) -> Result<impl ReadableTable<K, V>, LoomError>;
}

/// Reads shared by snapshots and write batches.
pub trait StoreRead {
    fn record_bytes(&self, kind: RecordKind, key: (u128, u128))
    -> Result<Option<Vec<u8>>, LoomError>;

    /// Keys of `kind` records in `(tenant, scope)`, strictly after `after`
    /// in the requested ordering.
    fn ordered_keys(
        &self,
        kind: RecordKind,
        tenant: Uuid,
        scope: Uuid,
        ordering: EnumerationOrder,
        after: Option<OrderKey>,
        limit: usize,
    ) -> Result<Vec<OrderKey>, LoomError>;

    /// Number of `kind` records in the tenant, optionally within one scope.
    fn count(&self, kind: RecordKind, tenant: Uuid, scope: Option<Uuid>)
    -> Result<usize, LoomError>;

    /// GUIDs of `kind` subordinate records owned by `owner`.
    fn owned(&self, tenant: Uuid, owner: Uuid, kind: RecordKind) -> Result<Vec<Uuid>, LoomError>;

    fn adjacent(
        &self,
        direction: Direction,
        tenant: Uuid,
        node: Uuid,
    ) -> Result<Vec<Adjacent>, LoomError>;

    fn index_config_bytes(&self, tenant: Uuid, graph: Uuid)
    -> Result<Option<Vec<u8>>, LoomError>;

    fn index_generation(&self, tenant: Uuid, graph: Uuid) -> Result<u64, LoomError>;

    /// Decode a record without hydrating its subordinate collections.
    fn get_raw<R: Record>(&self, tenant: Uuid, guid: Uuid) -> Result<Option<R>, LoomError>
    where
        Self: Sized,
    {
        self.record_bytes(R::KIND, R::primary_key(tenant, guid))?
            .map(|bytes| R::decode(&bytes))
            .transpose()
    }

    fn get<R: Record>(&self, tenant: Uuid, guid: Uuid) -> Result<Option<R>, LoomError>
    where
        Self: Sized,
    {
        match self.get_raw::<R>(tenant, guid)? {
            Some(mut record) => {
                record.hydrate(self)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn contains<R: Record>(&self, tenant: Uuid, guid: Uuid) -> Result<bool, LoomError>
    where
        Self: Sized,
    {
        Ok(self
            .record_bytes(R::KIND, R::primary_key(tenant, guid))?
            .is_some())
    }
}

impl<T: TableSource> StoreRead for T {
    fn record_bytes(
        &self,
        kind: RecordKind,
        key: (u128, u128),
    ) -> Result<Option<Vec<u8>>, LoomError> {
        let table = self.open(kind.table())?;
        let bytes = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(bytes)
    }

    fn ordered_keys(
        &self,
        kind: RecordKind,
        tenant: Uuid,
        scope: Uuid,
        ordering: EnumerationOrder,
        after: Option<OrderKey>,
        limit: usize,
    ) -> Result<Vec<OrderKey>, LoomError> {
        let table = self.open(CREATION_ORDER)?;
        let (k, t, s) = (kind.code(), tenant.as_u128(), scope.as_u128());
        let lo: OrderTuple = (k, t, s, i64::MIN, 0);
        let hi: OrderTuple = (k, t, s, i64::MAX, u128::MAX);
        let marker = after.map(|a| (k, t, s, a.created_micros, a.guid.as_u128()));

        let bounds = match (ordering, marker) {
            (EnumerationOrder::CreatedAscending, Some(m)) => {
                (Bound::Excluded(m), Bound::Included(hi))
            }
            (EnumerationOrder::CreatedDescending, Some(m)) => {
                (Bound::Included(lo), Bound::Excluded(m))
            }
            (_, None) => (Bound::Included(lo), Bound::Included(hi)),
        };

        let range = table.range(bounds)?;
        match ordering {
            EnumerationOrder::CreatedAscending => collect_order_keys(range, limit),
            EnumerationOrder::CreatedDescending => collect_order_keys(range.rev(), limit),
        }
    }

    fn count(
        &self,
        kind: RecordKind,
        tenant: Uuid,
        scope: Option<Uuid>,
    ) -> Result<usize, LoomError> {
        let table = self.open(CREATION_ORDER)?;
        let (k, t) = (kind.code(), tenant.as_u128());
        let (s_lo, s_hi) = match scope {
            Some(s) => (s.as_u128(), s.as_u128()),
            None => (0, u128::MAX),
        };
        let mut n = 0;
        for entry in table.range((k, t, s_lo, i64::MIN, 0u128)..=(k, t, s_hi, i64::MAX, u128::MAX))? {
            entry?;
            n += 1;
        }
        Ok(n)
    }

    fn owned(&self, tenant: Uuid, owner: Uuid, kind: RecordKind) -> Result<Vec<Uuid>, LoomError> {
        let table = self.open(OWNED)?;
        let (t, o, k) = (tenant.as_u128(), owner.as_u128(), kind.code());
        let mut guids = Vec::new();
        for entry in table.range((t, o, k, 0u128)..=(t, o, k, u128::MAX))? {
            let (key, _) = entry?;
            guids.push(Uuid::from_u128(key.value().3));
        }
        Ok(guids)
    }

    fn adjacent(
        &self,
        direction: Direction,
        tenant: Uuid,
        node: Uuid,
    ) -> Result<Vec<Adjacent>, LoomError> {
        let definition: AdjacencyTable = match direction {
            Direction::Outbound => EDGES_OUT,
            Direction::Inbound => EDGES_IN,
        };
        let table = self.open(definition)?;
        let (t, n) = (tenant.as_u128(), node.as_u128());
        let mut adjacent = Vec::new();
        for entry in table.range((t, n, 0u128)..=(t, n, u128::MAX))? {
            let (key, other) = entry?;
            adjacent.push(Adjacent {
                edge: Uuid::from_u128(key.value().2),
                node: Uuid::from_u128(other.value()),
            });
        }
        Ok(adjacent)
    }

    fn index_config_bytes(
        &self,
        tenant: Uuid,
        graph: Uuid,
    ) -> Result<Option<Vec<u8>>, LoomError> {
        let table = self.open(INDEX_CONFIGS)?;
        let bytes = table
            .get((tenant.as_u128(), graph.as_u128()))?
            .map(|guard| guard.value().to_vec());
        Ok(bytes)
    }

    fn index_generation(&self, tenant: Uuid, graph: Uuid) -> Result<u64, LoomError> {
        let table = self.open(INDEX_GENERATIONS)?;
        let generation = table
            .get((tenant.as_u128(), graph.as_u128()))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        Ok(generation)
    }
}

type OrderEntry<'a> = Result<(AccessGuard<'a, OrderTuple>, AccessGuard<'a, ()>), StorageError>;

fn collect_order_keys<'a>(
    entries: impl Iterator<Item = OrderEntry<'a>>,
    limit: usize,
) -> Result<Vec<OrderKey>, LoomError> {
    let mut keys = Vec::new();
    for entry in entries.take(limit) {
        let (key, _) = entry?;
        let (_, _, _, created_micros, guid) = key.value();
        keys.push(OrderKey {
            created_micros,
            guid: Uuid::from_u128(guid),
        });
    }
    Ok(keys)
}
