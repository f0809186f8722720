//! On-disk record shapes for nodes, relationships, and property items.

use crate::storage::buffered_vector::Record;
use crate::types::{DictCode, NodeId, PropId, RshipId, Timestamp, RecordId, TS_INFINITY, UNKNOWN_DICT_CODE, UNKNOWN_RECORD};

/// Begin/commit timestamp pair plus a link to the version this one superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mvcc {
    /// Timestamp of the transaction that created this version.
    pub bts: Timestamp,
    /// Timestamp this version stopped being current, or [`TS_INFINITY`] if still live.
    pub cts: Timestamp,
    /// Id of the version this one superseded, or [`UNKNOWN_RECORD`].
    pub prior: RecordId,
}

impl Mvcc {
    /// A freshly created, still-live version stamped by `txid`.
    pub fn new(txid: Timestamp) -> Self {
        Self { bts: txid, cts: TS_INFINITY, prior: UNKNOWN_RECORD }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.bts.to_le_bytes());
        buf[8..16].copy_from_slice(&self.cts.to_le_bytes());
        buf[16..24].copy_from_slice(&self.prior.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            bts: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            cts: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            prior: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }

    const ENCODED_SIZE: usize = 24;
}

/// A node record: label, adjacency list heads, property chain head, and MVCC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    /// Dictionary code of this node's label.
    pub label_code: DictCode,
    /// Head of the singly-linked list of outgoing relationships.
    pub from_rship_head: RshipId,
    /// Head of the singly-linked list of incoming relationships.
    pub to_rship_head: RshipId,
    /// Head of this node's property chain.
    pub property_head: PropId,
    /// MVCC header for this version.
    pub mvcc: Mvcc,
    /// True once this node has been deleted; the head version is kept as a
    /// permanent tombstone so later transactions see it as absent.
    pub deleted: bool,
}

impl NodeRecord {
    /// Builds a fresh node with no relationships or properties yet.
    pub fn new(label_code: DictCode, txid: Timestamp) -> Self {
        Self {
            label_code,
            from_rship_head: UNKNOWN_RECORD,
            to_rship_head: UNKNOWN_RECORD,
            property_head: UNKNOWN_RECORD,
            mvcc: Mvcc::new(txid),
            deleted: false,
        }
    }
}

impl Record for NodeRecord {
    const ENCODED_SIZE: usize = 4 + 8 + 8 + 8 + Mvcc::ENCODED_SIZE + 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.label_code.to_le_bytes());
        buf[4..12].copy_from_slice(&self.from_rship_head.to_le_bytes());
        buf[12..20].copy_from_slice(&self.to_rship_head.to_le_bytes());
        buf[20..28].copy_from_slice(&self.property_head.to_le_bytes());
        self.mvcc.encode(&mut buf[28..28 + Mvcc::ENCODED_SIZE]);
        buf[28 + Mvcc::ENCODED_SIZE] = self.deleted as u8;
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            label_code: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            from_rship_head: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            to_rship_head: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            property_head: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            mvcc: Mvcc::decode(&buf[28..28 + Mvcc::ENCODED_SIZE]),
            deleted: buf[28 + Mvcc::ENCODED_SIZE] != 0,
        }
    }
}

/// A relationship record, threaded into both endpoints' adjacency lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RshipRecord {
    /// Dictionary code of this relationship's label.
    pub label_code: DictCode,
    /// Source (from) node id.
    pub src_node_id: NodeId,
    /// Destination (to) node id.
    pub dest_node_id: NodeId,
    /// Next relationship in the source node's `from_rship_head` chain.
    pub next_src_rship: RshipId,
    /// Next relationship in the destination node's `to_rship_head` chain.
    pub next_dest_rship: RshipId,
    /// Head of this relationship's property chain.
    pub property_head: PropId,
    /// MVCC header for this version.
    pub mvcc: Mvcc,
    /// Tombstone flag, as on [`NodeRecord`].
    pub deleted: bool,
}

impl RshipRecord {
    /// Builds a fresh, unlinked relationship record.
    pub fn new(label_code: DictCode, src: NodeId, dest: NodeId, txid: Timestamp) -> Self {
        Self {
            label_code,
            src_node_id: src,
            dest_node_id: dest,
            next_src_rship: UNKNOWN_RECORD,
            next_dest_rship: UNKNOWN_RECORD,
            property_head: UNKNOWN_RECORD,
            mvcc: Mvcc::new(txid),
            deleted: false,
        }
    }
}

impl Record for RshipRecord {
    const ENCODED_SIZE: usize = 4 + 8 + 8 + 8 + 8 + 8 + Mvcc::ENCODED_SIZE + 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.label_code.to_le_bytes());
        buf[4..12].copy_from_slice(&self.src_node_id.to_le_bytes());
        buf[12..20].copy_from_slice(&self.dest_node_id.to_le_bytes());
        buf[20..28].copy_from_slice(&self.next_src_rship.to_le_bytes());
        buf[28..36].copy_from_slice(&self.next_dest_rship.to_le_bytes());
        buf[36..44].copy_from_slice(&self.property_head.to_le_bytes());
        self.mvcc.encode(&mut buf[44..44 + Mvcc::ENCODED_SIZE]);
        buf[44 + Mvcc::ENCODED_SIZE] = self.deleted as u8;
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            label_code: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            src_node_id: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            dest_node_id: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            next_src_rship: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            next_dest_rship: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
            property_head: u64::from_le_bytes(buf[36..44].try_into().unwrap()),
            mvcc: Mvcc::decode(&buf[44..44 + Mvcc::ENCODED_SIZE]),
            deleted: buf[44 + Mvcc::ENCODED_SIZE] != 0,
        }
    }
}

/// The scalar shape a property value can hold. String values are interned
/// through the shared [`crate::storage::dictionary::Dictionary`] and stored
/// as a [`DictCode`], never as a hash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropTag {
    Null = 0,
    Bool = 1,
    Int = 2,
    UInt = 3,
    Double = 4,
    Str = 5,
    Timestamp = 6,
}

impl PropTag {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PropTag::Null,
            1 => PropTag::Bool,
            2 => PropTag::Int,
            3 => PropTag::UInt,
            4 => PropTag::Double,
            5 => PropTag::Str,
            6 => PropTag::Timestamp,
            _ => PropTag::Null,
        }
    }
}

/// A typed property value, as handed to and returned from the graph store's
/// public API.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Double(f64),
    /// Interned string.
    Str(String),
    /// Unix-epoch-ish timestamp.
    Timestamp(i64),
}

/// One link in a node's or relationship's property chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyItem {
    /// Dictionary code of the property's key name.
    pub key_code: DictCode,
    tag: u8,
    raw: [u8; 8],
    /// Next property item in the chain, or [`UNKNOWN_RECORD`].
    pub next: PropId,
}

impl PropertyItem {
    /// Builds a property item encoding `value` under `key_code`, chained
    /// before `next`. String values must already have been interned into
    /// `str_code`.
    pub fn new(key_code: DictCode, value: &PropValue, str_code: DictCode, next: PropId) -> Self {
        let (tag, raw) = match value {
            PropValue::Null => (PropTag::Null, [0u8; 8]),
            PropValue::Bool(b) => (PropTag::Bool, pack_u64(*b as u64)),
            PropValue::Int(i) => (PropTag::Int, pack_u64(*i as u64)),
            PropValue::UInt(u) => (PropTag::UInt, pack_u64(*u)),
            PropValue::Double(d) => (PropTag::Double, pack_u64(d.to_bits())),
            PropValue::Str(_) => (PropTag::Str, pack_u64(str_code as u64)),
            PropValue::Timestamp(t) => (PropTag::Timestamp, pack_u64(*t as u64)),
        };
        Self { key_code, tag: tag as u8, raw, next }
    }

    /// Reconstructs the typed value, resolving string codes via `resolve_str`.
    pub fn value(&self, resolve_str: impl FnOnce(DictCode) -> Option<String>) -> PropValue {
        let bits = u64::from_le_bytes(self.raw);
        match PropTag::from_u8(self.tag) {
            PropTag::Null => PropValue::Null,
            PropTag::Bool => PropValue::Bool(bits != 0),
            PropTag::Int => PropValue::Int(bits as i64),
            PropTag::UInt => PropValue::UInt(bits),
            PropTag::Double => PropValue::Double(f64::from_bits(bits)),
            PropTag::Str => PropValue::Str(resolve_str(bits as DictCode).unwrap_or_default()),
            PropTag::Timestamp => PropValue::Timestamp(bits as i64),
        }
    }

    /// The raw dictionary code stored for [`PropTag::Str`] values, or
    /// [`UNKNOWN_DICT_CODE`] for any other tag.
    pub fn str_code(&self) -> DictCode {
        if self.tag == PropTag::Str as u8 {
            u64::from_le_bytes(self.raw) as DictCode
        } else {
            UNKNOWN_DICT_CODE
        }
    }
}

fn pack_u64(v: u64) -> [u8; 8] {
    v.to_le_bytes()
}

impl Record for PropertyItem {
    const ENCODED_SIZE: usize = 4 + 1 + 8 + 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.key_code.to_le_bytes());
        buf[4] = self.tag;
        buf[5..13].copy_from_slice(&self.raw);
        buf[13..21].copy_from_slice(&self.next.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            key_code: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            tag: buf[4],
            raw: buf[5..13].try_into().unwrap(),
            next: u64::from_le_bytes(buf[13..21].try_into().unwrap()),
        }
    }
}
