//! The graph store: nodes, relationships, property chains, adjacency lists,
//! secondary indices, and the MVCC visibility walk that ties them together.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{PoseidonError, Result};
use crate::graph::index::{IndexKey, PropertyIndex};
use crate::graph::model::{Mvcc, NodeRecord, PropValue, PropertyItem, RshipRecord};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::buffered_vector::BufferedVector;
use crate::storage::dictionary::Dictionary;
use crate::txn::{self, RollbackHook, Transaction, TransactionManager, TxId};
use crate::types::{DictCode, NodeId, PropId, RecordId, RshipId, Timestamp, UNKNOWN_DICT_CODE, UNKNOWN_RECORD};

const NODES_FILE: u8 = 0;
const RSHIPS_FILE: u8 = 1;
const PROPS_FILE: u8 = 2;
const DICT_FILE: u8 = 3;
const INDEX_FILE_START: u8 = 4;

const FTYPE_NODES: u8 = 20;
const FTYPE_RSHIPS: u8 = 21;
const FTYPE_PROPS: u8 = 22;
const FTYPE_DICT: u8 = 23;
const FTYPE_INDEX_TREE: u8 = 24;
const FTYPE_INDEX_ENTRIES: u8 = 25;

#[derive(Debug, Clone, Copy)]
enum WriteSetEntry {
    NodeCreated(NodeId),
    NodeUpdated { id: NodeId, old: RecordId },
    RshipCreated(RshipId),
    RshipUpdated { id: RshipId, old: RecordId },
}

/// A single property graph: nodes, relationships, their property chains, and
/// any secondary indices registered over them.
pub struct GraphStore {
    dir: PathBuf,
    pool: Arc<BufferPool>,
    dict: Dictionary,
    nodes: BufferedVector<NodeRecord>,
    rships: BufferedVector<RshipRecord>,
    props: BufferedVector<PropertyItem>,
    indices: parking_lot::RwLock<FxHashMap<(DictCode, DictCode), PropertyIndex>>,
    next_index_file: AtomicU8,
    write_sets: Mutex<FxHashMap<TxId, Vec<WriteSetEntry>>>,
    #[cfg(feature = "degree-cache")]
    degrees: parking_lot::RwLock<FxHashMap<NodeId, (u32, u32)>>,
}

impl GraphStore {
    /// Opens (or creates) a graph's backing files under `dir`, sharing `pool`
    /// with any sibling graphs in the same pool.
    pub fn open(dir: impl AsRef<Path>, pool: Arc<BufferPool>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let nodes = BufferedVector::open(&pool, dir.join("nodes.dat"), NODES_FILE, FTYPE_NODES)?;
        let rships = BufferedVector::open(&pool, dir.join("rships.dat"), RSHIPS_FILE, FTYPE_RSHIPS)?;
        let props = BufferedVector::open(&pool, dir.join("props.dat"), PROPS_FILE, FTYPE_PROPS)?;
        let dict = Dictionary::open(&pool, dir.join("dict.dat"), DICT_FILE, FTYPE_DICT)?;
        Ok(Self {
            dir,
            pool,
            dict,
            nodes,
            rships,
            props,
            indices: parking_lot::RwLock::new(FxHashMap::default()),
            next_index_file: AtomicU8::new(INDEX_FILE_START),
            write_sets: Mutex::new(FxHashMap::default()),
            #[cfg(feature = "degree-cache")]
            degrees: parking_lot::RwLock::new(FxHashMap::default()),
        })
    }

    /// Out-degree (`Direction::Outgoing`) or in-degree (`Direction::Incoming`)
    /// of `node`, served from an in-memory cache maintained incrementally by
    /// [`Self::add_relationship`] and [`Self::remove_relationship`] rather
    /// than by walking the adjacency chain. Only available with the
    /// `degree-cache` feature; the on-disk [`NodeRecord`] layout is
    /// unaffected either way.
    #[cfg(feature = "degree-cache")]
    pub fn degree(&self, node: NodeId, direction: crate::graph::traversal::Direction) -> u32 {
        let degrees = self.degrees.read();
        let Some((out, inc)) = degrees.get(&node) else { return 0 };
        match direction {
            crate::graph::traversal::Direction::Outgoing => *out,
            crate::graph::traversal::Direction::Incoming => *inc,
            crate::graph::traversal::Direction::Both => out + inc,
        }
    }

    #[cfg(feature = "degree-cache")]
    fn bump_degree(&self, node: NodeId, direction: crate::graph::traversal::Direction, delta: i32) {
        let mut degrees = self.degrees.write();
        let entry = degrees.entry(node).or_insert((0, 0));
        match direction {
            crate::graph::traversal::Direction::Outgoing => entry.0 = entry.0.saturating_add_signed(delta),
            crate::graph::traversal::Direction::Incoming => entry.1 = entry.1.saturating_add_signed(delta),
            crate::graph::traversal::Direction::Both => {
                entry.0 = entry.0.saturating_add_signed(delta);
                entry.1 = entry.1.saturating_add_signed(delta);
            }
        }
    }

    /// The buffer pool backing this graph's paged files.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn raw_node(&self, id: NodeId) -> Result<NodeRecord> {
        self.nodes.get(&self.pool, id)
    }

    fn raw_rship(&self, id: RshipId) -> Result<RshipRecord> {
        self.rships.get(&self.pool, id)
    }

    /// Walks the version chain of node `id`, returning the version visible to
    /// `txid`, or `None` if no version is visible or the node is tombstoned.
    pub fn get_node(&self, txid: TxId, id: NodeId) -> Result<Option<NodeRecord>> {
        let mut cur = id;
        loop {
            let Ok(r) = self.raw_node(cur) else { return Ok(None) };
            if txn::is_visible(r.mvcc.bts, r.mvcc.cts, txid) {
                return Ok(if r.deleted { None } else { Some(r) });
            }
            if r.mvcc.prior == UNKNOWN_RECORD {
                return Ok(None);
            }
            cur = r.mvcc.prior;
        }
    }

    /// Walks the version chain of relationship `id`, as [`Self::get_node`] does for nodes.
    pub fn get_rship(&self, txid: TxId, id: RshipId) -> Result<Option<RshipRecord>> {
        let mut cur = id;
        loop {
            let Ok(r) = self.raw_rship(cur) else { return Ok(None) };
            if txn::is_visible(r.mvcc.bts, r.mvcc.cts, txid) {
                return Ok(if r.deleted { None } else { Some(r) });
            }
            if r.mvcc.prior == UNKNOWN_RECORD {
                return Ok(None);
            }
            cur = r.mvcc.prior;
        }
    }

    fn record_write(&self, txid: TxId, entry: WriteSetEntry) {
        self.write_sets.lock().entry(txid).or_default().push(entry);
    }

    fn mutate_node(&self, txn: &Transaction<'_>, id: NodeId, f: impl FnOnce(&mut NodeRecord)) -> Result<()> {
        let old = self.raw_node(id)?;
        let old_version = self.nodes.insert(&self.pool, &old)?;
        let mut new = old;
        f(&mut new);
        new.mvcc = Mvcc { bts: txn.id(), cts: crate::types::TS_INFINITY, prior: old_version };
        self.nodes.update(&self.pool, id, &new)?;
        self.record_write(txn.id(), WriteSetEntry::NodeUpdated { id, old: old_version });
        Ok(())
    }

    fn mutate_rship(&self, txn: &Transaction<'_>, id: RshipId, f: impl FnOnce(&mut RshipRecord)) -> Result<()> {
        let old = self.raw_rship(id)?;
        let old_version = self.rships.insert(&self.pool, &old)?;
        let mut new = old;
        f(&mut new);
        new.mvcc = Mvcc { bts: txn.id(), cts: crate::types::TS_INFINITY, prior: old_version };
        self.rships.update(&self.pool, id, &new)?;
        self.record_write(txn.id(), WriteSetEntry::RshipUpdated { id, old: old_version });
        Ok(())
    }

    fn build_property_chain(&self, props: &[(String, PropValue)]) -> Result<PropId> {
        let mut head = UNKNOWN_RECORD;
        for (k, v) in props {
            let key_code = self.dict.lookup_or_insert(&self.pool, k)?;
            let str_code = match v {
                PropValue::Str(s) => self.dict.lookup_or_insert(&self.pool, s)?,
                _ => UNKNOWN_DICT_CODE,
            };
            let item = PropertyItem::new(key_code, v, str_code, head);
            head = self.props.insert(&self.pool, &item)?;
        }
        Ok(head)
    }

    fn walk_property_chain(&self, head: PropId, key: &str) -> Result<Option<PropValue>> {
        let Some(key_code) = self.dict.lookup(key) else {
            return Ok(None);
        };
        let mut cur = head;
        while cur != UNKNOWN_RECORD {
            let item = self.props.get(&self.pool, cur)?;
            if item.key_code == key_code {
                return Ok(Some(item.value(|code| self.dict.resolve(&self.pool, code).ok())));
            }
            cur = item.next;
        }
        Ok(None)
    }

    /// All properties attached to a property chain, in most-recently-set-first order.
    pub fn all_properties(&self, head: PropId) -> Result<Vec<(String, PropValue)>> {
        let mut out = Vec::new();
        let mut cur = head;
        while cur != UNKNOWN_RECORD {
            let item = self.props.get(&self.pool, cur)?;
            let key = self.dict.resolve(&self.pool, item.key_code)?;
            let value = item.value(|code| self.dict.resolve(&self.pool, code).ok());
            out.push((key, value));
            cur = item.next;
        }
        Ok(out)
    }

    /// The value of property `key` on node `id`, if set and visible.
    pub fn node_property(&self, txid: TxId, id: NodeId, key: &str) -> Result<Option<PropValue>> {
        match self.get_node(txid, id)? {
            Some(n) => self.walk_property_chain(n.property_head, key),
            None => Ok(None),
        }
    }

    /// The value of property `key` on relationship `id`, if set and visible.
    pub fn rship_property(&self, txid: TxId, id: RshipId, key: &str) -> Result<Option<PropValue>> {
        match self.get_rship(txid, id)? {
            Some(r) => self.walk_property_chain(r.property_head, key),
            None => Ok(None),
        }
    }

    /// Resolves a label or property-key dictionary code back to its string.
    pub fn resolve_label(&self, code: DictCode) -> Result<String> {
        self.dict.resolve(&self.pool, code)
    }

    /// Interns (or looks up) a label/property-key string, without requiring a transaction.
    pub fn intern(&self, s: &str) -> Result<DictCode> {
        self.dict.lookup_or_insert(&self.pool, s)
    }

    /// Creates a node labelled `label` with the given properties (in
    /// insertion order; later lookups by key prefer the most recently set value).
    pub fn add_node(&self, txn: &Transaction<'_>, label: &str, props: &[(String, PropValue)]) -> Result<NodeId> {
        let label_code = self.dict.lookup_or_insert(&self.pool, label)?;
        let property_head = self.build_property_chain(props)?;
        let mut node = NodeRecord::new(label_code, txn.id());
        node.property_head = property_head;
        let nid = self.nodes.insert(&self.pool, &node)?;
        self.record_write(txn.id(), WriteSetEntry::NodeCreated(nid));
        for (k, v) in props {
            self.maintain_index_on_insert(label_code, k, v, nid)?;
        }
        Ok(nid)
    }

    /// Creates a relationship from `src` to `dst`, threading it onto both
    /// endpoints' adjacency lists.
    pub fn add_relationship(
        &self,
        txn: &Transaction<'_>,
        src: NodeId,
        dst: NodeId,
        label: &str,
        props: &[(String, PropValue)],
    ) -> Result<RshipId> {
        let label_code = self.dict.lookup_or_insert(&self.pool, label)?;
        let property_head = self.build_property_chain(props)?;
        let src_node = self.get_node(txn.id(), src)?.ok_or(PoseidonError::UnknownId(src))?;
        let dst_node = self.get_node(txn.id(), dst)?.ok_or(PoseidonError::UnknownId(dst))?;

        let mut rship = RshipRecord::new(label_code, src, dst, txn.id());
        rship.property_head = property_head;
        rship.next_src_rship = src_node.from_rship_head;
        rship.next_dest_rship = dst_node.to_rship_head;
        let rid = self.rships.insert(&self.pool, &rship)?;
        self.record_write(txn.id(), WriteSetEntry::RshipCreated(rid));

        self.mutate_node(txn, src, |n| n.from_rship_head = rid)?;
        self.mutate_node(txn, dst, |n| n.to_rship_head = rid)?;
        #[cfg(feature = "degree-cache")]
        {
            self.bump_degree(src, crate::graph::traversal::Direction::Outgoing, 1);
            self.bump_degree(dst, crate::graph::traversal::Direction::Incoming, 1);
        }
        Ok(rid)
    }

    /// Sets (or overwrites) property `key` on node `id`.
    pub fn set_node_property(&self, txn: &Transaction<'_>, id: NodeId, key: &str, value: PropValue) -> Result<()> {
        let current = self.get_node(txn.id(), id)?.ok_or(PoseidonError::UnknownId(id))?;
        let key_code = self.dict.lookup_or_insert(&self.pool, key)?;
        let str_code = match &value {
            PropValue::Str(s) => self.dict.lookup_or_insert(&self.pool, s)?,
            _ => UNKNOWN_DICT_CODE,
        };
        let item = PropertyItem::new(key_code, &value, str_code, current.property_head);
        let new_head = self.props.insert(&self.pool, &item)?;
        self.mutate_node(txn, id, |n| n.property_head = new_head)?;
        self.maintain_index_on_insert(current.label_code, key, &value, id)?;
        Ok(())
    }

    /// Deletes node `id`. Fails with [`PoseidonError::NodeHasRelationships`]
    /// if it still has any relationship attached; use [`Self::detach_node`] to
    /// force-delete along with its relationships.
    pub fn remove_node(&self, txn: &Transaction<'_>, id: NodeId) -> Result<()> {
        let n = self.get_node(txn.id(), id)?.ok_or(PoseidonError::UnknownId(id))?;
        if n.from_rship_head != UNKNOWN_RECORD || n.to_rship_head != UNKNOWN_RECORD {
            return Err(PoseidonError::NodeHasRelationships(id));
        }
        self.mutate_node(txn, id, |nd| nd.deleted = true)
    }

    /// Deletes node `id` along with every relationship attached to it.
    pub fn detach_node(&self, txn: &Transaction<'_>, id: NodeId) -> Result<()> {
        loop {
            let n = self.get_node(txn.id(), id)?.ok_or(PoseidonError::UnknownId(id))?;
            if n.from_rship_head == UNKNOWN_RECORD && n.to_rship_head == UNKNOWN_RECORD {
                break;
            }
            let victim = if n.from_rship_head != UNKNOWN_RECORD { n.from_rship_head } else { n.to_rship_head };
            self.remove_relationship(txn, victim)?;
        }
        self.mutate_node(txn, id, |nd| nd.deleted = true)
    }

    /// Deletes relationship `id`, unlinking it from both endpoints' adjacency lists.
    pub fn remove_relationship(&self, txn: &Transaction<'_>, id: RshipId) -> Result<()> {
        let r = self.get_rship(txn.id(), id)?.ok_or(PoseidonError::UnknownId(id))?;
        self.unlink_outgoing(txn, r.src_node_id, id)?;
        self.unlink_incoming(txn, r.dest_node_id, id)?;
        #[cfg(feature = "degree-cache")]
        {
            self.bump_degree(r.src_node_id, crate::graph::traversal::Direction::Outgoing, -1);
            self.bump_degree(r.dest_node_id, crate::graph::traversal::Direction::Incoming, -1);
        }
        self.mutate_rship(txn, id, |rr| rr.deleted = true)
    }

    fn unlink_outgoing(&self, txn: &Transaction<'_>, node_id: NodeId, rid: RshipId) -> Result<()> {
        let node = self.get_node(txn.id(), node_id)?.ok_or(PoseidonError::UnknownId(node_id))?;
        if node.from_rship_head == rid {
            let next = self.get_rship(txn.id(), rid)?.ok_or(PoseidonError::UnknownId(rid))?.next_src_rship;
            return self.mutate_node(txn, node_id, |n| n.from_rship_head = next);
        }
        let mut cur = node.from_rship_head;
        while cur != UNKNOWN_RECORD {
            let r = self.get_rship(txn.id(), cur)?.ok_or(PoseidonError::UnknownId(cur))?;
            if r.next_src_rship == rid {
                let skip_to = self.get_rship(txn.id(), rid)?.ok_or(PoseidonError::UnknownId(rid))?.next_src_rship;
                return self.mutate_rship(txn, cur, |rr| rr.next_src_rship = skip_to);
            }
            cur = r.next_src_rship;
        }
        Ok(())
    }

    fn unlink_incoming(&self, txn: &Transaction<'_>, node_id: NodeId, rid: RshipId) -> Result<()> {
        let node = self.get_node(txn.id(), node_id)?.ok_or(PoseidonError::UnknownId(node_id))?;
        if node.to_rship_head == rid {
            let next = self.get_rship(txn.id(), rid)?.ok_or(PoseidonError::UnknownId(rid))?.next_dest_rship;
            return self.mutate_node(txn, node_id, |n| n.to_rship_head = next);
        }
        let mut cur = node.to_rship_head;
        while cur != UNKNOWN_RECORD {
            let r = self.get_rship(txn.id(), cur)?.ok_or(PoseidonError::UnknownId(cur))?;
            if r.next_dest_rship == rid {
                let skip_to = self.get_rship(txn.id(), rid)?.ok_or(PoseidonError::UnknownId(rid))?.next_dest_rship;
                return self.mutate_rship(txn, cur, |rr| rr.next_dest_rship = skip_to);
            }
            cur = r.next_dest_rship;
        }
        Ok(())
    }

    /// Iterates every visible node, optionally filtered to `label`.
    pub fn nodes(&self, txid: TxId, label: Option<&str>, mut consumer: impl FnMut(NodeId, &NodeRecord)) -> Result<()> {
        let label_code = label.map(|l| self.dict.lookup(l));
        if matches!(label_code, Some(None)) {
            return Ok(());
        }
        let label_code = label_code.flatten();
        for (id, _raw) in self.nodes.scan(&self.pool)? {
            if let Some(n) = self.get_node(txid, id)? {
                if label_code.is_none() || label_code == Some(n.label_code) {
                    consumer(id, &n);
                }
            }
        }
        Ok(())
    }

    /// Like [`Self::nodes`], but partitions the underlying chunk scan across
    /// `partitions` scoped threads before handing visible results to `consumer`
    /// in partition order.
    pub fn parallel_nodes(&self, txid: TxId, partitions: usize, mut consumer: impl FnMut(NodeId, &NodeRecord)) -> Result<()> {
        let all = self.nodes.scan(&self.pool)?;
        if all.is_empty() {
            return Ok(());
        }
        let chunk_size = all.len().div_ceil(partitions.max(1));
        let results: Vec<Vec<(NodeId, NodeRecord)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = all
                .chunks(chunk_size.max(1))
                .map(|part| {
                    scope.spawn(move || {
                        let mut local = Vec::new();
                        for (id, _raw) in part {
                            if let Ok(Some(n)) = self.get_node(txid, *id) {
                                local.push((*id, n));
                            }
                        }
                        local
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("scan partition thread panicked")).collect()
        });
        for part in results {
            for (id, n) in part {
                consumer(id, &n);
            }
        }
        Ok(())
    }

    /// Registers a secondary index over `(label, property)`, backfilling it
    /// from every currently visible node with that label.
    pub fn create_index(&self, txid: TxId, label: &str, property: &str) -> Result<()> {
        let label_code = self.dict.lookup_or_insert(&self.pool, label)?;
        let prop_code = self.dict.lookup_or_insert(&self.pool, property)?;
        {
            let indices = self.indices.read();
            if indices.contains_key(&(label_code, prop_code)) {
                return Ok(());
            }
        }
        let tree_file = self.next_index_file.fetch_add(2, Ordering::SeqCst);
        let entries_file = tree_file + 1;
        if entries_file as usize >= crate::types::MAX_PAGED_FILES as usize {
            return Err(PoseidonError::QueryProcessingError("no free paged-file slots left for a new index".into()));
        }
        let idx = PropertyIndex::open(
            &self.pool,
            self.dir.join(format!("idx_{tree_file}_tree.dat")),
            tree_file,
            self.dir.join(format!("idx_{tree_file}_entries.dat")),
            entries_file,
        )?;
        self.indices.write().insert((label_code, prop_code), idx);

        let mut to_index = Vec::new();
        self.nodes(txid, Some(label), |id, n| to_index.push((id, n.property_head)))?;
        for (id, prop_head) in to_index {
            if let Some(value) = self.walk_property_chain(prop_head, property)? {
                self.index_insert(label_code, prop_code, &value, id)?;
            }
        }
        Ok(())
    }

    fn maintain_index_on_insert(&self, label_code: DictCode, key: &str, value: &PropValue, node_id: NodeId) -> Result<()> {
        let Some(prop_code) = self.dict.lookup(key) else { return Ok(()) };
        self.index_insert(label_code, prop_code, value, node_id)
    }

    fn index_insert(&self, label_code: DictCode, prop_code: DictCode, value: &PropValue, node_id: NodeId) -> Result<()> {
        let indices = self.indices.read();
        let Some(idx) = indices.get(&(label_code, prop_code)) else {
            return Ok(());
        };
        let str_code = match value {
            PropValue::Str(s) => self.dict.lookup(s),
            _ => None,
        };
        idx.insert(&self.pool, IndexKey::from_value(value, str_code), node_id)
    }

    /// Returns every visible node id whose `(label, property)` equals `value`,
    /// via a registered index.
    pub fn index_lookup(&self, txid: TxId, label: &str, property: &str, value: &PropValue) -> Result<Vec<NodeId>> {
        let Some(label_code) = self.dict.lookup(label) else { return Ok(Vec::new()) };
        let Some(prop_code) = self.dict.lookup(property) else { return Ok(Vec::new()) };
        let indices = self.indices.read();
        let Some(idx) = indices.get(&(label_code, prop_code)) else {
            return Err(PoseidonError::UnknownIndex(format!("{label}.{property}")));
        };
        let str_code = match value {
            PropValue::Str(s) => self.dict.lookup(s),
            _ => None,
        };
        let key = IndexKey::from_value(value, str_code);
        let mut out = Vec::new();
        idx.lookup(&self.pool, &key, |nid| out.push(nid))?;
        drop(indices);
        Ok(out.into_iter().filter(|nid| self.get_node(txid, *nid).ok().flatten().is_some()).collect())
    }

    /// Commits `txn`, stamping every version it superseded with the fresh commit timestamp.
    pub fn commit(&self, txn: Transaction<'_>) -> Result<Timestamp> {
        let txid = txn.id();
        let entries = self.write_sets.lock().remove(&txid).unwrap_or_default();
        let cts = txn.commit()?;
        for entry in entries {
            match entry {
                WriteSetEntry::NodeCreated(_) | WriteSetEntry::RshipCreated(_) => {}
                WriteSetEntry::NodeUpdated { old, .. } => {
                    let mut r = self.raw_node(old)?;
                    r.mvcc.cts = cts;
                    self.nodes.update(&self.pool, old, &r)?;
                }
                WriteSetEntry::RshipUpdated { old, .. } => {
                    let mut r = self.raw_rship(old)?;
                    r.mvcc.cts = cts;
                    self.rships.update(&self.pool, old, &r)?;
                }
            }
        }
        Ok(cts)
    }

    /// Aborts `txn`, rolling back every record it touched so later readers
    /// never observe its writes.
    pub fn abort(&self, txn: Transaction<'_>) -> Result<()> {
        self.rollback_writes(txn.id())?;
        txn.abort();
        Ok(())
    }

    /// Undoes every in-place write `txid` made, per its recorded write set.
    /// Idempotent: a `txid` with no (or already-drained) write set is a no-op,
    /// so this is safe to call both from an explicit [`Self::abort`] and,
    /// through the [`RollbackHook`] impl below, from a [`Transaction`] that
    /// was dropped or aborted without ever reaching `GraphStore::abort`.
    fn rollback_writes(&self, txid: TxId) -> Result<()> {
        let entries = self.write_sets.lock().remove(&txid).unwrap_or_default();
        for entry in entries {
            match entry {
                WriteSetEntry::NodeCreated(id) => {
                    let mut r = self.raw_node(id)?;
                    r.deleted = true;
                    self.nodes.update(&self.pool, id, &r)?;
                }
                WriteSetEntry::RshipCreated(id) => {
                    let mut r = self.raw_rship(id)?;
                    r.deleted = true;
                    self.rships.update(&self.pool, id, &r)?;
                }
                WriteSetEntry::NodeUpdated { id, old } => {
                    let pre_image = self.raw_node(old)?;
                    self.nodes.update(&self.pool, id, &pre_image)?;
                }
                WriteSetEntry::RshipUpdated { id, old } => {
                    let pre_image = self.raw_rship(old)?;
                    self.rships.update(&self.pool, id, &pre_image)?;
                }
            }
        }
        Ok(())
    }

    /// Begins a transaction hooked up so that rolling it back - whether via
    /// an explicit `txn.abort()` or simply dropping it, such as on an early
    /// `?`-propagated error - undoes any in-place writes it already made,
    /// even if the caller never reaches [`Self::abort`]. This is the
    /// sanctioned way to start a transaction that will write through this
    /// store; [`TransactionManager::begin`] alone leaves that rollback step
    /// to the caller.
    pub fn begin_transaction<'a>(&'a self, mgr: &'a TransactionManager) -> Transaction<'a> {
        mgr.begin_with_hook(Some(self))
    }
}

impl RollbackHook for GraphStore {
    fn rollback(&self, txid: TxId) {
        if let Err(err) = self.rollback_writes(txid) {
            tracing::error!(txid, error = %err, "failed to roll back transaction's write set on drop/abort");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::traversal::Direction;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempdir().unwrap();
        let pool = Arc::new(BufferPool::new(1000));
        let store = GraphStore::open(dir.path().join("g"), pool).unwrap();
        (dir, store)
    }

    #[test]
    fn commit_makes_writes_visible_to_later_transactions() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let nid = store.add_node(&txn, "Person", &[("name".into(), PropValue::Str("Ada".into()))]).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let node = store.get_node(reader.id(), nid).unwrap().unwrap();
        assert_eq!(store.node_property(reader.id(), nid, "name").unwrap(), Some(PropValue::Str("Ada".into())));
        assert_eq!(store.resolve_label(node.label_code).unwrap(), "Person");
    }

    #[test]
    fn abort_rolls_back_created_node() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let nid = store.add_node(&txn, "Person", &[]).unwrap();
        store.abort(txn).unwrap();

        let reader = mgr.begin();
        assert!(store.get_node(reader.id(), nid).unwrap().is_none());
    }

    #[test]
    fn dropping_transaction_without_explicit_abort_still_rolls_back() {
        // Regression test: a transaction that writes through the store and is
        // then simply dropped (no `txn.abort()`, no `GraphStore::abort`) must
        // not leave its writes visible - nothing else flips `is_visible`'s
        // notion of commit/abort state.
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let nid = {
            let txn = store.begin_transaction(&mgr);
            store.add_node(&txn, "Person", &[]).unwrap()
        };

        let reader = mgr.begin();
        assert!(store.get_node(reader.id(), nid).unwrap().is_none());
    }

    #[test]
    fn bare_abort_without_graph_store_abort_still_rolls_back() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let nid = store.add_node(&txn, "Person", &[]).unwrap();
        txn.abort(); // not `GraphStore::abort(txn)` - exercises the hook directly

        let reader = mgr.begin();
        assert!(store.get_node(reader.id(), nid).unwrap().is_none());
    }

    #[test]
    fn remove_node_with_relationship_fails_until_detached() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "Person", &[]).unwrap();
        let b = store.add_node(&txn, "Person", &[]).unwrap();
        store.add_relationship(&txn, a, b, "knows", &[]).unwrap();

        assert!(matches!(store.remove_node(&txn, a), Err(PoseidonError::NodeHasRelationships(_))));
        store.detach_node(&txn, a).unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        assert!(store.get_node(reader.id(), a).unwrap().is_none());
        assert!(store.get_node(reader.id(), b).unwrap().is_some());
    }

    #[test]
    fn index_lookup_finds_matching_nodes_only() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "Person", &[("age".into(), PropValue::Int(30))]).unwrap();
        let _b = store.add_node(&txn, "Person", &[("age".into(), PropValue::Int(40))]).unwrap();
        store.create_index(txn.id(), "Person", "age").unwrap();
        store.commit(txn).unwrap();

        let reader = mgr.begin();
        let found = store.index_lookup(reader.id(), "Person", "age", &PropValue::Int(30)).unwrap();
        assert_eq!(found, vec![a]);
    }

    #[cfg(feature = "degree-cache")]
    #[test]
    fn degree_cache_tracks_both_direction_as_sum() {
        let (_dir, store) = open_store();
        let mgr = TransactionManager::new();
        let txn = store.begin_transaction(&mgr);
        let a = store.add_node(&txn, "Person", &[]).unwrap();
        let b = store.add_node(&txn, "Person", &[]).unwrap();
        let c = store.add_node(&txn, "Person", &[]).unwrap();
        store.add_relationship(&txn, a, b, "knows", &[]).unwrap();
        store.add_relationship(&txn, c, a, "knows", &[]).unwrap();

        assert_eq!(store.degree(a, Direction::Outgoing), 1);
        assert_eq!(store.degree(a, Direction::Incoming), 1);
        assert_eq!(store.degree(a, Direction::Both), 2);
    }
}
