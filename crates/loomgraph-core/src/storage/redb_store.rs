//! # redb-backed Entity Store
//!
//! A disk- or memory-backed store using the redb embedded database,
//! providing:
//! - ACID transactions (one write transaction per mutation)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent snapshot readers, single writer)

use super::tables::{
    CREATION_ORDER, EDGES_IN, EDGES_OUT, INDEX_CONFIGS, INDEX_GENERATIONS, METADATA, OWNED,
    SCHEMA_VERSION_KEY,
};
use super::{Record, RecordKind, TableSource, order_tuple};
use crate::primitives::SCHEMA_VERSION;
use crate::types::{Edge, LoomError};
use redb::backends::InMemoryBackend;
use redb::{
    Database, Key, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, Value,
    WriteTransaction,
};
use std::path::Path;
use uuid::Uuid;

const ENTITY_KINDS: [RecordKind; 9] = [
    RecordKind::Tenant,
    RecordKind::User,
    RecordKind::Credential,
    RecordKind::Graph,
    RecordKind::Node,
    RecordKind::Edge,
    RecordKind::Label,
    RecordKind::Tag,
    RecordKind::Vector,
];

// =============================================================================
// STORE
// =============================================================================

/// The redb database handle.
pub struct RedbStore {
    db: Database,
    in_memory: bool,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("in_memory", &self.in_memory)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoomError> {
        let db = Database::create(path.as_ref())?;
        Self::initialize(db, false)
    }

    /// Create an ephemeral store that lives only as long as this handle.
    pub fn in_memory() -> Result<Self, LoomError> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::initialize(db, true)
    }

    fn initialize(db: Database, in_memory: bool) -> Result<Self, LoomError> {
        let write_txn = db.begin_write()?;
        {
            for kind in ENTITY_KINDS {
                let _ = write_txn.open_table(kind.table())?;
            }
            let _ = write_txn.open_table(CREATION_ORDER)?;
            let _ = write_txn.open_table(EDGES_OUT)?;
            let _ = write_txn.open_table(EDGES_IN)?;
            let _ = write_txn.open_table(OWNED)?;
            let _ = write_txn.open_table(INDEX_CONFIGS)?;
            let _ = write_txn.open_table(INDEX_GENERATIONS)?;

            let mut metadata = write_txn.open_table(METADATA)?;
            let stored = metadata.get(SCHEMA_VERSION_KEY)?.map(|v| v.value());
            match stored {
                None => {
                    metadata.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
                }
                Some(version) if version == SCHEMA_VERSION => {}
                Some(version) => {
                    return Err(LoomError::Internal(format!(
                        "unsupported schema version {version} (expected {SCHEMA_VERSION})"
                    )));
                }
            }
        }
        write_txn.commit()?;

        Ok(Self { db, in_memory })
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Open a read snapshot.
    pub fn snapshot(&self) -> Result<Snapshot, LoomError> {
        Ok(Snapshot {
            txn: self.db.begin_read()?,
        })
    }

    /// Run `apply` in one write transaction: commit on `Ok`, abort on `Err`.
    pub(crate) fn write<T>(
        &self,
        apply: impl FnOnce(&WriteBatch) -> Result<T, LoomError>,
    ) -> Result<T, LoomError> {
        let batch = WriteBatch {
            txn: self.db.begin_write()?,
        };
        match apply(&batch) {
            Ok(value) => {
                batch.txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                batch.txn.abort()?;
                Err(e)
            }
        }
    }

    /// Compact the database file. Returns whether any space was reclaimed.
    pub fn compact(&mut self) -> Result<bool, LoomError> {
        Ok(self.db.compact()?)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A consistent read view; released when dropped.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").finish_non_exhaustive()
    }
}

impl TableSource for Snapshot {
    fn open<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<'static, K, V>,
    ) -> Result<impl ReadableTable<K, V>, LoomError> {
        Ok(self.txn.open_table(definition)?)
    }
}

// =============================================================================
// WRITE BATCH
// =============================================================================

/// The open write transaction of one mutation.
pub(crate) struct WriteBatch {
    txn: WriteTransaction,
}

impl TableSource for WriteBatch {
    fn open<K: Key + 'static, V: Value + 'static>(
        &self,
        definition: TableDefinition<'static, K, V>,
    ) -> Result<impl ReadableTable<K, V>, LoomError> {
        Ok(self.txn.open_table(definition)?)
    }
}

impl WriteBatch {
    /// Insert a new record and its ordering-index entry.
    pub(crate) fn insert<R: Record>(&self, record: &R) -> Result<(), LoomError> {
        let key = R::primary_key(record.tenant_guid(), record.guid());
        let bytes = record.encode()?;
        {
            let mut table = self.txn.open_table(R::KIND.table())?;
            if table.get(key)?.is_some() {
                return Err(LoomError::conflict(format!(
                    "{} {} already exists",
                    R::KIND.name(),
                    record.guid()
                )));
            }
            table.insert(key, bytes.as_slice())?;
        }
        let mut order = self.txn.open_table(CREATION_ORDER)?;
        order.insert(order_tuple(record), ())?;
        Ok(())
    }

    /// Overwrite an existing row. Creation time is immutable, so the
    /// ordering-index entry is unchanged.
    pub(crate) fn replace<R: Record>(&self, record: &R) -> Result<(), LoomError> {
        let key = R::primary_key(record.tenant_guid(), record.guid());
        let bytes = record.encode()?;
        let mut table = self.txn.open_table(R::KIND.table())?;
        if table.insert(key, bytes.as_slice())?.is_none() {
            return Err(LoomError::not_found(R::KIND.name(), record.guid()));
        }
        Ok(())
    }

    /// Remove a row and its ordering-index entry, returning the old record.
    pub(crate) fn remove<R: Record>(&self, tenant: Uuid, guid: Uuid) -> Result<Option<R>, LoomError> {
        let removed = self
            .txn
            .open_table(R::KIND.table())?
            .remove(R::primary_key(tenant, guid))?
            .map(|guard| guard.value().to_vec());
        let Some(bytes) = removed else {
            return Ok(None);
        };
        let record = R::decode(&bytes)?;
        let mut order = self.txn.open_table(CREATION_ORDER)?;
        order.remove(order_tuple(&record))?;
        Ok(Some(record))
    }

    pub(crate) fn link_owned(
        &self,
        tenant: Uuid,
        owner: Uuid,
        kind: RecordKind,
        guid: Uuid,
    ) -> Result<(), LoomError> {
        let mut table = self.txn.open_table(OWNED)?;
        table.insert(
            (tenant.as_u128(), owner.as_u128(), kind.code(), guid.as_u128()),
            (),
        )?;
        Ok(())
    }

    pub(crate) fn unlink_owned(
        &self,
        tenant: Uuid,
        owner: Uuid,
        kind: RecordKind,
        guid: Uuid,
    ) -> Result<(), LoomError> {
        let mut table = self.txn.open_table(OWNED)?;
        table.remove((tenant.as_u128(), owner.as_u128(), kind.code(), guid.as_u128()))?;
        Ok(())
    }

    /// Record an edge in both adjacency indexes.
    pub(crate) fn link_edge(&self, edge: &Edge) -> Result<(), LoomError> {
        let (t, e) = (edge.tenant_guid.as_u128(), edge.guid.as_u128());
        let (from, to) = (edge.from.as_u128(), edge.to.as_u128());
        self.txn.open_table(EDGES_OUT)?.insert((t, from, e), to)?;
        self.txn.open_table(EDGES_IN)?.insert((t, to, e), from)?;
        Ok(())
    }

    pub(crate) fn unlink_edge(&self, edge: &Edge) -> Result<(), LoomError> {
        let (t, e) = (edge.tenant_guid.as_u128(), edge.guid.as_u128());
        let (from, to) = (edge.from.as_u128(), edge.to.as_u128());
        self.txn.open_table(EDGES_OUT)?.remove((t, from, e))?;
        self.txn.open_table(EDGES_IN)?.remove((t, to, e))?;
        Ok(())
    }

    pub(crate) fn put_index_config(
        &self,
        tenant: Uuid,
        graph: Uuid,
        bytes: &[u8],
    ) -> Result<(), LoomError> {
        let mut table = self.txn.open_table(INDEX_CONFIGS)?;
        table.insert((tenant.as_u128(), graph.as_u128()), bytes)?;
        Ok(())
    }

    /// Drop the persisted index configuration; true when one existed.
    pub(crate) fn remove_index_config(&self, tenant: Uuid, graph: Uuid) -> Result<bool, LoomError> {
        let key = (tenant.as_u128(), graph.as_u128());
        let existed = self.txn.open_table(INDEX_CONFIGS)?.remove(key)?.is_some();
        self.txn.open_table(INDEX_GENERATIONS)?.remove(key)?;
        Ok(existed)
    }

    /// Advance the vector-relevant mutation counter of a graph.
    pub(crate) fn bump_generation(&self, tenant: Uuid, graph: Uuid) -> Result<u64, LoomError> {
        let key = (tenant.as_u128(), graph.as_u128());
        let mut table = self.txn.open_table(INDEX_GENERATIONS)?;
        let current = table.get(key)?.map(|v| v.value()).unwrap_or(0);
        let next = current.wrapping_add(1);
        table.insert(key, next)?;
        Ok(next)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::enumeration::EnumerationOrder;
    use crate::storage::{Direction, StoreRead};
    use crate::types::{Graph, Label, Node, Owner, Tenant};
    use tempfile::tempdir;

    fn store_with_graph() -> (RedbStore, Tenant, Graph) {
        let store = RedbStore::in_memory().expect("in-memory store");
        let tenant = Tenant::new("t");
        let graph = Graph::new(tenant.guid, "g");
        store
            .write(|batch| {
                batch.insert(&tenant)?;
                batch.insert(&graph)
            })
            .expect("seed");
        (store, tenant, graph)
    }

    #[test]
    fn open_creates_and_reopens() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.redb");
        let tenant = Tenant::new("persisted");
        {
            let store = RedbStore::open(&path).expect("open");
            store.write(|batch| batch.insert(&tenant)).expect("insert");
        }
        let store = RedbStore::open(&path).expect("reopen");
        let snap = store.snapshot().expect("snapshot");
        let loaded: Tenant = snap.get(tenant.guid, tenant.guid).unwrap().unwrap();
        assert_eq!(loaded, tenant);
    }

    #[test]
    fn failed_write_is_rolled_back() {
        let (store, tenant, graph) = store_with_graph();
        let node = Node::new(tenant.guid, graph.guid, "n");
        let result: Result<(), LoomError> = store.write(|batch| {
            batch.insert(&node)?;
            Err(LoomError::Cancelled)
        });
        assert!(matches!(result, Err(LoomError::Cancelled)));
        let snap = store.snapshot().unwrap();
        assert!(!snap.contains::<Node>(tenant.guid, node.guid).unwrap());
        assert_eq!(snap.count(RecordKind::Node, tenant.guid, None).unwrap(), 0);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let (store, tenant, _) = store_with_graph();
        let err = store.write(|batch| batch.insert(&tenant)).unwrap_err();
        assert!(matches!(err, LoomError::Conflict(_)));
    }

    #[test]
    fn ordered_keys_follow_creation_order() {
        let (store, tenant, graph) = store_with_graph();
        let mut nodes = Vec::new();
        for i in 0..5 {
            let mut node = Node::new(tenant.guid, graph.guid, format!("n{i}"));
            node.created_utc += chrono::Duration::microseconds(i);
            nodes.push(node);
        }
        store
            .write(|batch| nodes.iter().try_for_each(|n| batch.insert(n)))
            .unwrap();

        let snap = store.snapshot().unwrap();
        let asc = snap
            .ordered_keys(
                RecordKind::Node,
                tenant.guid,
                graph.guid,
                EnumerationOrder::CreatedAscending,
                None,
                10,
            )
            .unwrap();
        let expected: Vec<_> = nodes.iter().map(|n| n.guid).collect();
        assert_eq!(asc.iter().map(|k| k.guid).collect::<Vec<_>>(), expected);

        let after_second = snap
            .ordered_keys(
                RecordKind::Node,
                tenant.guid,
                graph.guid,
                EnumerationOrder::CreatedDescending,
                Some(asc[2]),
                10,
            )
            .unwrap();
        assert_eq!(
            after_second.iter().map(|k| k.guid).collect::<Vec<_>>(),
            vec![nodes[1].guid, nodes[0].guid]
        );
    }

    #[test]
    fn adjacency_tracks_both_directions() {
        let (store, tenant, graph) = store_with_graph();
        let a = Node::new(tenant.guid, graph.guid, "a");
        let b = Node::new(tenant.guid, graph.guid, "b");
        let edge = Edge::new(tenant.guid, graph.guid, a.guid, b.guid, "ab", 1.0);
        store
            .write(|batch| {
                batch.insert(&a)?;
                batch.insert(&b)?;
                batch.insert(&edge)?;
                batch.link_edge(&edge)
            })
            .unwrap();

        let snap = store.snapshot().unwrap();
        let out = snap.adjacent(Direction::Outbound, tenant.guid, a.guid).unwrap();
        let inbound = snap.adjacent(Direction::Inbound, tenant.guid, b.guid).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node, b.guid);
        assert_eq!(inbound[0].node, a.guid);
        assert_eq!(inbound[0].edge, edge.guid);
        drop(snap);

        store.write(|batch| batch.unlink_edge(&edge)).unwrap();
        let snap = store.snapshot().unwrap();
        assert!(snap.adjacent(Direction::Outbound, tenant.guid, a.guid).unwrap().is_empty());
    }

    #[test]
    fn hydration_reads_owned_labels() {
        let (store, tenant, graph) = store_with_graph();
        let node = Node::new(tenant.guid, graph.guid, "n");
        let zeta = Label::new(tenant.guid, graph.guid, Owner::Node(node.guid), "zeta");
        let alpha = Label::new(tenant.guid, graph.guid, Owner::Node(node.guid), "alpha");
        store
            .write(|batch| {
                batch.insert(&node)?;
                for label in [&zeta, &alpha] {
                    batch.insert(label)?;
                    batch.link_owned(tenant.guid, node.guid, RecordKind::Label, label.guid)?;
                }
                Ok(())
            })
            .unwrap();

        let snap = store.snapshot().unwrap();
        let loaded: Node = snap.get(tenant.guid, node.guid).unwrap().unwrap();
        assert_eq!(loaded.labels, vec!["alpha".to_string(), "zeta".to_string()]);
        let raw: Node = snap.get_raw(tenant.guid, node.guid).unwrap().unwrap();
        assert!(raw.labels.is_empty());
    }

    #[test]
    fn generation_counter_advances() {
        let (store, tenant, graph) = store_with_graph();
        store
            .write(|batch| batch.bump_generation(tenant.guid, graph.guid))
            .unwrap();
        let next = store
            .write(|batch| batch.bump_generation(tenant.guid, graph.guid))
            .unwrap();
        assert_eq!(next, 2);
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.index_generation(tenant.guid, graph.guid).unwrap(), 2);
    }
}
