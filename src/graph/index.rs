//! Secondary indices over `(label, property)` pairs.
//!
//! Each index is a B+-tree keyed by an order-preserving encoding of the
//! property value, mapping to the head of a singly-linked chain of matching
//! node ids - the same "chain threaded through a record vector" idiom the
//! adjacency lists and property lists use.

use std::path::Path;

use crate::error::Result;
use crate::graph::model::PropValue;
use crate::storage::btree::{BPlusTree, Key as BKey};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::buffered_vector::{BufferedVector, Record};
use crate::types::{NodeId, RecordId, UNKNOWN_RECORD};

/// An order-preserving, fixed-size encoding of a [`PropValue`] suitable for
/// use as a B+-tree key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey {
    tag: u8,
    order: i64,
}

impl IndexKey {
    /// Builds an index key from a property value. String values are keyed by
    /// dictionary code (insertion order, not lexicographic order).
    pub fn from_value(value: &PropValue, str_code: Option<u32>) -> Self {
        let (tag, order) = match value {
            PropValue::Null => (0u8, i64::MIN),
            PropValue::Bool(b) => (1, *b as i64),
            PropValue::Int(i) => (2, *i),
            PropValue::UInt(u) => (3, *u as i64),
            PropValue::Double(d) => (4, order_preserving_f64(*d)),
            PropValue::Str(_) => (5, str_code.unwrap_or(0) as i64),
            PropValue::Timestamp(t) => (6, *t),
        };
        Self { tag, order }
    }
}

fn order_preserving_f64(d: f64) -> i64 {
    let bits = d.to_bits() as i64;
    if bits >= 0 {
        bits
    } else {
        bits ^ i64::MAX
    }
}

impl BKey for IndexKey {
    const ENCODED_SIZE: usize = 9;
    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.tag;
        buf[1..9].copy_from_slice(&self.order.to_le_bytes());
    }
    fn decode(buf: &[u8]) -> Self {
        Self { tag: buf[0], order: i64::from_le_bytes(buf[1..9].try_into().unwrap()) }
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    node_id: NodeId,
    next: RecordId,
}

impl Record for IndexEntry {
    const ENCODED_SIZE: usize = 16;
    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.node_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.next.to_le_bytes());
    }
    fn decode(buf: &[u8]) -> Self {
        Self {
            node_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            next: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// A single `(label, property)` secondary index.
pub struct PropertyIndex {
    tree: BPlusTree<IndexKey, RecordId>,
    entries: BufferedVector<IndexEntry>,
    tree_file_id: u8,
    entries_file_id: u8,
}

impl PropertyIndex {
    /// Opens (or creates) the two paged files backing this index.
    pub fn open(
        pool: &BufferPool,
        tree_path: impl AsRef<Path>,
        tree_file_id: u8,
        entries_path: impl AsRef<Path>,
        entries_file_id: u8,
    ) -> Result<Self> {
        let tree = BPlusTree::open(pool, tree_path, tree_file_id, 10)?;
        let entries = BufferedVector::open(pool, entries_path, entries_file_id, 11)?;
        Ok(Self { tree, entries, tree_file_id, entries_file_id })
    }

    /// Records that `node_id` now has `value` for this index's property.
    pub fn insert(&self, pool: &BufferPool, key: IndexKey, node_id: NodeId) -> Result<()> {
        let existing_head = self.tree.get(pool, &key)?.unwrap_or(UNKNOWN_RECORD);
        let entry_id = self.entries.insert(pool, &IndexEntry { node_id, next: existing_head })?;
        self.tree.insert(pool, key, entry_id)
    }

    /// Calls `consumer` with every node id chained under `key`. The caller is
    /// responsible for MVCC-filtering the yielded ids against the current
    /// transaction.
    pub fn lookup(&self, pool: &BufferPool, key: &IndexKey, mut consumer: impl FnMut(NodeId)) -> Result<()> {
        let Some(mut cur) = self.tree.get(pool, key)? else {
            return Ok(());
        };
        while cur != UNKNOWN_RECORD {
            let entry = self.entries.get(pool, cur)?;
            consumer(entry.node_id);
            cur = entry.next;
        }
        Ok(())
    }

    /// Closes both backing files.
    pub fn close(self, pool: &BufferPool) -> Result<()> {
        self.tree.close(pool)?;
        self.entries.close(pool)
    }

    /// File ids used by this index, so the owning [`crate::graph::store::GraphStore`]
    /// can recycle them.
    pub fn file_ids(&self) -> (u8, u8) {
        (self.tree_file_id, self.entries_file_id)
    }
}
