//! B+-tree insert/lookup/remove/range logic over paged branch and leaf nodes.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::btree::node::{branch_fanout, leaf_fanout, tag_of, BranchView, LeafView, TAG_LEAF};
use crate::storage::btree::{Key, Value};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::paged_file::HeaderMode;
use crate::types::PageId;

/// An on-disk B+-tree mapping `K` to `V`. Branch and leaf nodes each occupy a
/// single page; leaves are linked for ordered range scans.
pub struct BPlusTree<K, V> {
    file_id: u8,
    root: AtomicU64,
    write_lock: Mutex<()>,
    _marker: PhantomData<(K, V)>,
}

enum Effect<K> {
    /// No structural change above this level.
    Absorbed,
    /// This level split; `key` is the separator, `right` the new right sibling page.
    Split { key: K, right: u64 },
}

impl<K: Key, V: Value> BPlusTree<K, V> {
    /// Opens or creates the backing paged file at `path`.
    pub fn open(pool: &BufferPool, path: impl AsRef<Path>, file_id: u8, file_type: u8) -> Result<Self> {
        let mut root = 0u64;
        pool.register_file(
            path,
            file_id,
            file_type,
            Box::new(|mode, payload| {
                if mode == HeaderMode::Read {
                    root = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                }
            }),
        )?;
        Ok(Self {
            file_id,
            root: AtomicU64::new(root),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Persists the root pointer and closes the file.
    pub fn close(self, pool: &BufferPool) -> Result<()> {
        let root = self.root.load(Ordering::Relaxed);
        pool.close_file(
            self.file_id,
            Box::new(move |mode, payload| {
                if mode == HeaderMode::Write {
                    payload[0..8].copy_from_slice(&root.to_le_bytes());
                }
            }),
        )
    }

    fn root_pid(&self) -> Option<PageId> {
        let raw = self.root.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(PageId::from_raw(raw))
        }
    }

    /// Looks up `key`, returning its value if present.
    pub fn get(&self, pool: &BufferPool, key: &K) -> Result<Option<V>> {
        let Some(mut pid) = self.root_pid() else {
            return Ok(None);
        };
        loop {
            let is_leaf = pool.with_page(pid, |buf| tag_of(buf) == TAG_LEAF)?;
            if is_leaf {
                return pool.with_page(pid, |buf| match LeafView::<K, V>::search(buf, key) {
                    Ok(i) => Some(LeafView::<K, V>::value_at(buf, i)),
                    Err(_) => None,
                });
            }
            let child = pool.with_page(pid, |buf| {
                let idx = BranchView::<K>::child_index_for(buf, key);
                BranchView::<K>::child_at(buf, idx)
            })?;
            pid = PageId::from_raw(child);
        }
    }

    /// Inserts or overwrites the value for `key`.
    pub fn insert(&self, pool: &BufferPool, key: K, value: V) -> Result<()> {
        let _guard = self.write_lock.lock();
        let Some(root) = self.root_pid() else {
            let pid = pool.allocate_page(self.file_id)?;
            pool.with_page_mut(pid, |buf| {
                LeafView::<K, V>::init(buf, 0, 0);
                LeafView::<K, V>::set_entries(buf, &[(key.clone(), value.clone())]);
            })?;
            self.root.store(pid.raw(), Ordering::Relaxed);
            return Ok(());
        };

        let mut path = Vec::new();
        let mut pid = root;
        loop {
            let tag = pool.with_page(pid, |buf| tag_of(buf))?;
            if tag == TAG_LEAF {
                break;
            }
            let idx = pool.with_page(pid, |buf| BranchView::<K>::child_index_for(buf, &key))?;
            let child = pool.with_page(pid, |buf| BranchView::<K>::child_at(buf, idx))?;
            path.push((pid, idx));
            pid = PageId::from_raw(child);
        }

        let mut effect = self.insert_into_leaf(pool, pid, &key, &value)?;

        while let Effect::Split { key: sep, right } = effect {
            match path.pop() {
                Some((parent_pid, child_idx)) => {
                    effect = self.insert_into_branch(pool, parent_pid, child_idx, sep, right)?;
                }
                None => {
                    let new_root = pool.allocate_page(self.file_id)?;
                    pool.with_page_mut(new_root, |buf| {
                        BranchView::<K>::init(buf);
                        BranchView::<K>::set_keys_and_children(buf, &[sep], &[root.raw(), right]);
                    })?;
                    self.root.store(new_root.raw(), Ordering::Relaxed);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn insert_into_leaf(&self, pool: &BufferPool, pid: PageId, key: &K, value: &V) -> Result<Effect<K>> {
        let mut entries = pool.with_page(pid, |buf| LeafView::<K, V>::entries(buf))?;
        match entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(i) => entries[i].1 = value.clone(),
            Err(i) => entries.insert(i, (key.clone(), value.clone())),
        }

        let fanout = leaf_fanout::<K, V>();
        if entries.len() <= fanout {
            pool.with_page_mut(pid, |buf| LeafView::<K, V>::set_entries(buf, &entries))?;
            return Ok(Effect::Absorbed);
        }

        let mid = entries.len() / 2;
        let right_entries = entries.split_off(mid);
        let old_next = pool.with_page(pid, |buf| LeafView::<K, V>::next(buf))?;
        let right_pid = pool.allocate_page(self.file_id)?;
        pool.with_page_mut(right_pid, |buf| {
            LeafView::<K, V>::init(buf, pid.raw(), old_next);
            LeafView::<K, V>::set_entries(buf, &right_entries);
        })?;
        if old_next != 0 {
            pool.with_page_mut(PageId::from_raw(old_next), |buf| {
                LeafView::<K, V>::set_prev(buf, right_pid.raw());
            })?;
        }
        pool.with_page_mut(pid, |buf| {
            LeafView::<K, V>::set_entries(buf, &entries);
            LeafView::<K, V>::set_next(buf, right_pid.raw());
        })?;

        let sep = right_entries[0].0.clone();
        Ok(Effect::Split { key: sep, right: right_pid.raw() })
    }

    fn insert_into_branch(
        &self,
        pool: &BufferPool,
        pid: PageId,
        child_idx: usize,
        sep: K,
        right_child: u64,
    ) -> Result<Effect<K>> {
        let (mut keys, mut children) = pool.with_page(pid, |buf| BranchView::<K>::keys_and_children(buf))?;
        keys.insert(child_idx, sep);
        children.insert(child_idx + 1, right_child);

        let fanout = branch_fanout::<K>();
        if keys.len() <= fanout {
            pool.with_page_mut(pid, |buf| BranchView::<K>::set_keys_and_children(buf, &keys, &children))?;
            return Ok(Effect::Absorbed);
        }

        let mid = keys.len() / 2;
        let up_key = keys[mid].clone();
        let right_keys = keys.split_off(mid + 1);
        keys.truncate(mid);
        let right_children = children.split_off(mid + 1);

        let right_pid = pool.allocate_page(self.file_id)?;
        pool.with_page_mut(right_pid, |buf| {
            BranchView::<K>::init(buf);
            BranchView::<K>::set_keys_and_children(buf, &right_keys, &right_children);
        })?;
        pool.with_page_mut(pid, |buf| {
            BranchView::<K>::set_keys_and_children(buf, &keys, &children);
        })?;

        Ok(Effect::Split { key: up_key, right: right_pid.raw() })
    }

    /// Removes `key`, returning whether it was present. Does not rebalance
    /// underfull nodes after removal.
    pub fn remove(&self, pool: &BufferPool, key: &K) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let Some(root) = self.root_pid() else {
            return Ok(false);
        };
        let mut pid = root;
        loop {
            let tag = pool.with_page(pid, |buf| tag_of(buf))?;
            if tag == TAG_LEAF {
                break;
            }
            let child = pool.with_page(pid, |buf| {
                let idx = BranchView::<K>::child_index_for(buf, key);
                BranchView::<K>::child_at(buf, idx)
            })?;
            pid = PageId::from_raw(child);
        }
        let mut entries = pool.with_page(pid, |buf| LeafView::<K, V>::entries(buf))?;
        let Ok(i) = entries.binary_search_by(|(k, _)| k.cmp(key)) else {
            return Ok(false);
        };
        entries.remove(i);
        pool.with_page_mut(pid, |buf| LeafView::<K, V>::set_entries(buf, &entries))?;
        Ok(true)
    }

    /// Collects every `(key, value)` with `lo <= key <= hi` (either bound may be
    /// omitted), walking leaf pages via their forward links.
    pub fn range(&self, pool: &BufferPool, lo: Option<&K>, hi: Option<&K>) -> Result<Vec<(K, V)>> {
        let Some(root) = self.root_pid() else {
            return Ok(Vec::new());
        };
        let mut pid = root;
        loop {
            let tag = pool.with_page(pid, |buf| tag_of(buf))?;
            if tag == TAG_LEAF {
                break;
            }
            let child = pool.with_page(pid, |buf| {
                let idx = match lo {
                    Some(k) => BranchView::<K>::child_index_for(buf, k),
                    None => 0,
                };
                BranchView::<K>::child_at(buf, idx)
            })?;
            pid = PageId::from_raw(child);
        }

        let mut out = Vec::new();
        let mut cur = Some(pid);
        'outer: while let Some(p) = cur {
            let (entries, next) = pool.with_page(p, |buf| (LeafView::<K, V>::entries(buf), LeafView::<K, V>::next(buf)))?;
            for (k, v) in entries {
                if let Some(lo) = lo {
                    if &k < lo {
                        continue;
                    }
                }
                if let Some(hi) = hi {
                    if &k > hi {
                        break 'outer;
                    }
                }
                out.push((k, v));
            }
            cur = if next == 0 { None } else { Some(PageId::from_raw(next)) };
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn insert_and_get_across_many_splits() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(500);
        let tree = BPlusTree::<u64, u64>::open(&pool, dir.path().join("t.dat"), 0, 1).unwrap();
        for i in 0..5000u64 {
            tree.insert(&pool, i, i * 10).unwrap();
        }
        for i in 0..5000u64 {
            assert_eq!(tree.get(&pool, &i).unwrap(), Some(i * 10));
        }
        assert_eq!(tree.get(&pool, &5000).unwrap(), None);
    }

    #[test]
    fn range_scan_respects_bounds_via_leaf_links() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(500);
        let tree = BPlusTree::<u64, u64>::open(&pool, dir.path().join("t.dat"), 0, 1).unwrap();
        for i in 0..2000u64 {
            tree.insert(&pool, i, i).unwrap();
        }
        let rows = tree.range(&pool, Some(&100), Some(&110)).unwrap();
        assert_eq!(rows, (100..=110).map(|i| (i, i)).collect::<Vec<_>>());
    }

    #[test]
    fn remove_then_lookup_misses() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(500);
        let tree = BPlusTree::<u64, u64>::open(&pool, dir.path().join("t.dat"), 0, 1).unwrap();
        for i in 0..100u64 {
            tree.insert(&pool, i, i).unwrap();
        }
        assert!(tree.remove(&pool, &50).unwrap());
        assert_eq!(tree.get(&pool, &50).unwrap(), None);
        assert!(!tree.remove(&pool, &50).unwrap());
    }

    #[test]
    fn reinsert_overwrites_value() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(500);
        let tree = BPlusTree::<u64, u64>::open(&pool, dir.path().join("t.dat"), 0, 1).unwrap();
        tree.insert(&pool, 1, 10).unwrap();
        tree.insert(&pool, 1, 20).unwrap();
        assert_eq!(tree.get(&pool, &1).unwrap(), Some(20));
    }
}
