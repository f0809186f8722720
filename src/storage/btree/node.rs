//! Byte-level encoding of branch and leaf node pages.

use crate::storage::btree::{Key, Value};
use crate::types::PAGE_SIZE;

pub const TAG_LEAF: u8 = 0;
pub const TAG_BRANCH: u8 = 1;

const LEAF_HEADER: usize = 1 + 4 + 8 + 8; // tag, count, prev, next
const BRANCH_HEADER: usize = 1 + 4; // tag, count

pub fn leaf_fanout<K: Key, V: Value>() -> usize {
    (PAGE_SIZE - LEAF_HEADER) / (K::ENCODED_SIZE + V::ENCODED_SIZE)
}

pub fn branch_fanout<K: Key>() -> usize {
    // count keys + (count + 1) child pointers (8 bytes each) must fit.
    (PAGE_SIZE - BRANCH_HEADER - 8) / (K::ENCODED_SIZE + 8)
}

pub fn tag_of(page: &[u8]) -> u8 {
    page[0]
}

pub struct LeafView<K, V> {
    _marker: std::marker::PhantomData<(K, V)>,
}

impl<K: Key, V: Value> LeafView<K, V> {
    pub fn init(page: &mut [u8], prev: u64, next: u64) {
        page[0] = TAG_LEAF;
        page[1..5].copy_from_slice(&0u32.to_le_bytes());
        page[5..13].copy_from_slice(&prev.to_le_bytes());
        page[13..21].copy_from_slice(&next.to_le_bytes());
    }

    pub fn count(page: &[u8]) -> usize {
        u32::from_le_bytes(page[1..5].try_into().unwrap()) as usize
    }

    fn set_count(page: &mut [u8], n: usize) {
        page[1..5].copy_from_slice(&(n as u32).to_le_bytes());
    }

    pub fn prev(page: &[u8]) -> u64 {
        u64::from_le_bytes(page[5..13].try_into().unwrap())
    }

    pub fn set_prev(page: &mut [u8], v: u64) {
        page[5..13].copy_from_slice(&v.to_le_bytes());
    }

    pub fn next(page: &[u8]) -> u64 {
        u64::from_le_bytes(page[13..21].try_into().unwrap())
    }

    pub fn set_next(page: &mut [u8], v: u64) {
        page[13..21].copy_from_slice(&v.to_le_bytes());
    }

    fn entry_offset(i: usize) -> usize {
        LEAF_HEADER + i * (K::ENCODED_SIZE + V::ENCODED_SIZE)
    }

    pub fn key_at(page: &[u8], i: usize) -> K {
        let off = Self::entry_offset(i);
        K::decode(&page[off..off + K::ENCODED_SIZE])
    }

    pub fn value_at(page: &[u8], i: usize) -> V {
        let off = Self::entry_offset(i) + K::ENCODED_SIZE;
        V::decode(&page[off..off + V::ENCODED_SIZE])
    }

    pub fn entries(page: &[u8]) -> Vec<(K, V)> {
        (0..Self::count(page)).map(|i| (Self::key_at(page, i), Self::value_at(page, i))).collect()
    }

    /// Overwrites the full entry list (already sorted by key) and updates count.
    pub fn set_entries(page: &mut [u8], entries: &[(K, V)]) {
        Self::set_count(page, entries.len());
        for (i, (k, v)) in entries.iter().enumerate() {
            let off = Self::entry_offset(i);
            k.encode(&mut page[off..off + K::ENCODED_SIZE]);
            v.encode(&mut page[off + K::ENCODED_SIZE..off + K::ENCODED_SIZE + V::ENCODED_SIZE]);
        }
    }

    /// Binary search for `key`, returning `Ok(index)` on an exact match or
    /// `Err(index)` for the insertion point that keeps entries sorted.
    pub fn search(page: &[u8], key: &K) -> Result<usize, usize> {
        let n = Self::count(page);
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match Self::key_at(page, mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }
}

pub struct BranchView<K> {
    _marker: std::marker::PhantomData<K>,
}

impl<K: Key> BranchView<K> {
    pub fn init(page: &mut [u8]) {
        page[0] = TAG_BRANCH;
        page[1..5].copy_from_slice(&0u32.to_le_bytes());
    }

    pub fn count(page: &[u8]) -> usize {
        u32::from_le_bytes(page[1..5].try_into().unwrap()) as usize
    }

    fn key_offset(i: usize) -> usize {
        BRANCH_HEADER + i * K::ENCODED_SIZE
    }

    fn child_offset(count: usize, i: usize) -> usize {
        BRANCH_HEADER + count * K::ENCODED_SIZE + i * 8
    }

    pub fn key_at(page: &[u8], i: usize) -> K {
        let off = Self::key_offset(i);
        K::decode(&page[off..off + K::ENCODED_SIZE])
    }

    pub fn child_at(page: &[u8], i: usize) -> u64 {
        let n = Self::count(page);
        let off = Self::child_offset(n, i);
        u64::from_le_bytes(page[off..off + 8].try_into().unwrap())
    }

    pub fn keys_and_children(page: &[u8]) -> (Vec<K>, Vec<u64>) {
        let n = Self::count(page);
        let keys = (0..n).map(|i| Self::key_at(page, i)).collect();
        let children = (0..=n).map(|i| Self::child_at(page, i)).collect();
        (keys, children)
    }

    pub fn set_keys_and_children(page: &mut [u8], keys: &[K], children: &[u64]) {
        debug_assert_eq!(children.len(), keys.len() + 1);
        page[1..5].copy_from_slice(&(keys.len() as u32).to_le_bytes());
        for (i, k) in keys.iter().enumerate() {
            let off = Self::key_offset(i);
            k.encode(&mut page[off..off + K::ENCODED_SIZE]);
        }
        let n = keys.len();
        for (i, c) in children.iter().enumerate() {
            let off = Self::child_offset(n, i);
            page[off..off + 8].copy_from_slice(&c.to_le_bytes());
        }
    }

    /// Finds the index of the child to descend into when searching for `key`:
    /// the first key greater than `key`, or `count` if none.
    pub fn child_index_for(page: &[u8], key: &K) -> usize {
        let n = Self::count(page);
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if &Self::key_at(page, mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}
