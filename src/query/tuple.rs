//! The heterogeneous cell and tuple types flowing through the operator pipeline.

use smallvec::SmallVec;

use crate::types::{NodeId, RshipId};

/// One cell of a [`Tuple`]. A tagged sum rather than a boxed `dyn Any`, so
/// tuples stay allocation-free for the common case (inline via [`Tuple`]'s
/// small-vector storage).
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Absent value; the result of a missing property or an outer-join miss.
    Null,
    /// A node id, with no label attached.
    Node(NodeId),
    /// A relationship id, with no label attached.
    Rship(RshipId),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    UInt(u64),
    /// A floating-point number.
    Double(f64),
    /// A boolean.
    Bool(bool),
    /// A UTF-8 string.
    Str(String),
    /// A unix-epoch-ish timestamp.
    Timestamp(i64),
    /// A node id paired with its resolved label, for projection-friendly display.
    NodeDesc(NodeId, String),
    /// A relationship id paired with its resolved label.
    RshipDesc(RshipId, String),
    /// An array of raw record ids, e.g. a collected path or id list.
    IdArray(SmallVec<[u64; 4]>),
}

impl Cell {
    /// Truthiness used by `filter_tuple`: `Null` and `Bool(false)` are falsy,
    /// everything else (including `0`) is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Cell::Null | Cell::Bool(false))
    }

    /// A byte-comparable encoding used for hashing (join build sides,
    /// `distinct_tuples`) and ordering (`order_by`). Numeric variants are
    /// compared by value, not by tag, so `Int(2)` and `Double(2.0)` collide -
    /// acceptable for the join-key and group-key use sites this serves.
    pub fn sort_key(&self) -> Vec<u8> {
        match self {
            Cell::Null => vec![0],
            Cell::Bool(b) => vec![1, *b as u8],
            Cell::Int(i) => numeric_key(2, *i as f64),
            Cell::UInt(u) => numeric_key(2, *u as f64),
            Cell::Double(d) => numeric_key(2, *d),
            Cell::Timestamp(t) => numeric_key(2, *t as f64),
            Cell::Str(s) => {
                let mut k = vec![3];
                k.extend_from_slice(s.as_bytes());
                k
            }
            Cell::Node(id) => tagged_u64(4, *id),
            Cell::Rship(id) => tagged_u64(5, *id),
            Cell::NodeDesc(id, _) => tagged_u64(4, *id),
            Cell::RshipDesc(id, _) => tagged_u64(5, *id),
            Cell::IdArray(v) => {
                let mut k = vec![6];
                for id in v {
                    k.extend_from_slice(&id.to_le_bytes());
                }
                k
            }
        }
    }
}

fn numeric_key(tag: u8, v: f64) -> Vec<u8> {
    let bits = v.to_bits() as i64;
    let order = if bits >= 0 { bits } else { bits ^ i64::MAX };
    let mut k = vec![tag];
    k.extend_from_slice(&order.to_le_bytes());
    k
}

fn tagged_u64(tag: u8, v: u64) -> Vec<u8> {
    let mut k = vec![tag];
    k.extend_from_slice(&v.to_le_bytes());
    k
}

/// A row flowing between operators: a small, heap-free-for-the-common-case
/// vector of [`Cell`]s.
pub type Tuple = SmallVec<[Cell; 8]>;
