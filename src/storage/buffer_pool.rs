//! Shared cache of page frames, backed by an LRU eviction list.
//!
//! Grounded on the original `bufferpool`: a fixed-capacity pool of page
//! frames shared by up to [`crate::types::MAX_PAGED_FILES`] registered paged
//! files, with dirty tracking and write-back on eviction or flush.

use std::collections::HashMap;
use std::path::Path;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{PoseidonError, Result};
use crate::storage::paged_file::{HeaderCallback, PagedFile};
use crate::types::{PageId, MAX_PAGED_FILES, PAGE_SIZE};

/// Default number of page frames held by a buffer pool, matching the original
/// `DEFAULT_BUFFER_SIZE`.
pub const DEFAULT_BUFFER_CAPACITY: usize = 5000;

struct Frame {
    bytes: Box<[u8; PAGE_SIZE]>,
    dirty: bool,
}

struct Inner {
    capacity: usize,
    files: [Option<PagedFile>; MAX_PAGED_FILES as usize],
    frames: HashMap<PageId, Frame>,
    lru: LruCache<PageId, ()>,
    /// Total `with_page`/`with_page_mut` calls, hit or miss.
    logical_reads: u64,
    /// Calls that required an actual disk read via `fetch`.
    physical_reads: u64,
}

/// A shared cache of fixed-size page frames. Every paged file used by a graph
/// must be registered here before its pages can be fetched.
pub struct BufferPool {
    inner: Mutex<Inner>,
}

impl BufferPool {
    /// Creates an empty buffer pool with room for `capacity` resident pages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                files: Default::default(),
                frames: HashMap::new(),
                lru: LruCache::unbounded(),
                logical_reads: 0,
                physical_reads: 0,
            }),
        }
    }

    /// Registers a paged file under `file_id`, opening or creating it at `path`.
    /// Returns an error if the slot is already occupied.
    pub fn register_file(
        &self,
        path: impl AsRef<Path>,
        file_id: u8,
        file_type: u8,
        header_cb: HeaderCallback<'_>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = file_id as usize;
        if idx >= MAX_PAGED_FILES as usize {
            return Err(PoseidonError::InvalidPageId(file_id as u64));
        }
        if inner.files[idx].is_some() {
            return Err(PoseidonError::QueryProcessingError(format!(
                "file id {file_id} is already registered"
            )));
        }
        let pf = PagedFile::open(path, file_id, file_type, header_cb)?;
        inner.files[idx] = Some(pf);
        Ok(())
    }

    /// Unregisters and drops the paged file at `file_id`, flushing its header
    /// via `header_cb` first. Any of its pages still resident in the pool are
    /// evicted without write-back (the caller is expected to have flushed).
    pub fn close_file(&self, file_id: u8, header_cb: HeaderCallback<'_>) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = file_id as usize;
        let pf = inner.files[idx]
            .take()
            .ok_or(PoseidonError::InvalidPageId(file_id as u64))?;
        inner.frames.retain(|pid, _| pid.file_id() != file_id);
        pf.close(header_cb)
    }

    fn with_file<T>(inner: &mut Inner, file_id: u8, f: impl FnOnce(&mut PagedFile) -> Result<T>) -> Result<T> {
        let pf = inner.files[file_id as usize]
            .as_mut()
            .ok_or(PoseidonError::InvalidPageId(file_id as u64))?;
        f(pf)
    }

    /// Allocates a fresh page in the file registered as `file_id` and returns
    /// its id; the frame is inserted into the pool zeroed and marked dirty.
    pub fn allocate_page(&self, file_id: u8) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let pid = Self::with_file(&mut inner, file_id, |pf| pf.allocate_page())?;
        self.evict_if_needed(&mut inner)?;
        inner.frames.insert(
            pid,
            Frame {
                bytes: Box::new([0u8; PAGE_SIZE]),
                dirty: true,
            },
        );
        inner.lru.put(pid, ());
        Ok(pid)
    }

    /// Frees the page at `pid` in its owning file and drops any resident frame
    /// for it without write-back.
    pub fn free_page(&self, pid: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::with_file(&mut inner, pid.file_id(), |pf| pf.free_page(pid))?;
        inner.frames.remove(&pid);
        inner.lru.pop(&pid);
        Ok(())
    }

    fn evict_if_needed(&self, inner: &mut Inner) -> Result<()> {
        while inner.frames.len() >= inner.capacity {
            let Some((victim, ())) = inner.lru.pop_lru() else {
                return Err(PoseidonError::NoFreeFrame);
            };
            if let Some(frame) = inner.frames.remove(&victim) {
                if frame.dirty {
                    Self::with_file(inner, victim.file_id(), |pf| pf.write_page(victim, &frame.bytes[..]))?;
                }
            }
        }
        Ok(())
    }

    /// Runs `f` with a read-only view of the page at `pid`, fetching it from
    /// disk into the pool first if it isn't already resident.
    pub fn with_page<T>(&self, pid: PageId, f: impl FnOnce(&[u8; PAGE_SIZE]) -> T) -> Result<T> {
        self.fetch(pid)?;
        let mut inner = self.inner.lock();
        inner.lru.get(&pid);
        inner.logical_reads += 1;
        let frame = inner.frames.get(&pid).expect("just fetched");
        Ok(f(&frame.bytes))
    }

    /// Runs `f` with a mutable view of the page at `pid`, marking it dirty.
    /// Fetches it from disk first if it isn't already resident.
    pub fn with_page_mut<T>(&self, pid: PageId, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> T) -> Result<T> {
        self.fetch(pid)?;
        let mut inner = self.inner.lock();
        inner.lru.get(&pid);
        inner.logical_reads += 1;
        let frame = inner.frames.get_mut(&pid).expect("just fetched");
        frame.dirty = true;
        Ok(f(&mut frame.bytes))
    }

    fn fetch(&self, pid: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.frames.contains_key(&pid) {
            return Ok(());
        }
        inner.physical_reads += 1;
        if !Self::with_file(&mut inner, pid.file_id(), |pf| Ok(pf.is_valid(pid)))? {
            return Err(PoseidonError::InvalidPageId(pid.raw()));
        }
        self.evict_if_needed(&mut inner)?;
        let mut bytes = Box::new([0u8; PAGE_SIZE]);
        Self::with_file(&mut inner, pid.file_id(), |pf| pf.read_page(pid, &mut bytes[..]))?;
        inner.frames.insert(pid, Frame { bytes, dirty: false });
        inner.lru.put(pid, ());
        trace!(page = %pid, "fetched page into buffer pool");
        Ok(())
    }

    /// Sets the dirty flag on the frame at `pid`, fetching it first if it
    /// isn't already resident.
    pub fn mark_dirty(&self, pid: PageId) -> Result<()> {
        self.fetch(pid)?;
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(&pid) {
            frame.dirty = true;
        }
        Ok(())
    }

    /// Invokes `callback` with every valid page of `file_id`, in ascending
    /// page-id order, read through a single reused scratch buffer rather than
    /// the pool's frame table - so scanning an entire file (e.g. a full table
    /// scan) never evicts anything or perturbs the LRU. Pages already
    /// resident in the pool are served from there instead, so a scan never
    /// observes stale bytes for a page with in-flight writes.
    pub fn scan_file(
        &self,
        file_id: u8,
        mut callback: impl FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let ids = Self::with_file(&mut inner, file_id, |pf| Ok(pf.valid_page_ids()))?;
        let mut scratch = Box::new([0u8; PAGE_SIZE]);
        for pid in ids {
            if let Some(frame) = inner.frames.get(&pid) {
                callback(pid, &frame.bytes)?;
            } else {
                Self::with_file(&mut inner, file_id, |pf| pf.read_page(pid, &mut scratch[..]))?;
                callback(pid, &scratch)?;
            }
        }
        Ok(())
    }

    /// Writes every dirty frame belonging to `file_id` back to disk, leaving
    /// them resident in the pool.
    pub fn flush_file(&self, file_id: u8) -> Result<()> {
        let mut inner = self.inner.lock();
        let dirty: Vec<PageId> = inner
            .frames
            .iter()
            .filter(|(pid, frame)| pid.file_id() == file_id && frame.dirty)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in dirty {
            let bytes = inner.frames.get(&pid).expect("collected above").bytes.clone();
            Self::with_file(&mut inner, file_id, |pf| pf.write_page(pid, &bytes[..]))?;
            inner.frames.get_mut(&pid).expect("collected above").dirty = false;
        }
        Ok(())
    }

    /// Writes back every dirty frame across every registered file.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let dirty: Vec<PageId> = inner
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in dirty {
            let bytes = inner.frames.get(&pid).expect("collected above").bytes.clone();
            Self::with_file(&mut inner, pid.file_id(), |pf| pf.write_page(pid, &bytes[..]))?;
            inner.frames.get_mut(&pid).expect("collected above").dirty = false;
        }
        Ok(())
    }

    /// Fraction of logical reads satisfied without a physical disk read,
    /// since pool creation: `(logical_reads - physical_reads) / logical_reads`.
    pub fn hit_ratio(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.logical_reads == 0 {
            1.0
        } else {
            (inner.logical_reads - inner.physical_reads) as f64 / inner.logical_reads as f64
        }
    }

    /// Number of frames currently resident.
    pub fn resident_count(&self) -> usize {
        self.inner.lock().frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn noop_cb<'a>() -> HeaderCallback<'a> {
        Box::new(|_, _| {})
    }

    #[test]
    fn fetch_after_evict_reads_back_same_bytes() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(2);
        pool.register_file(dir.path().join("f.dat"), 0, 1, noop_cb()).unwrap();

        let pids: Vec<_> = (0..4).map(|_| pool.allocate_page(0).unwrap()).collect();
        for (i, pid) in pids.iter().enumerate() {
            pool.with_page_mut(*pid, |buf| buf[0] = i as u8).unwrap();
        }
        // capacity 2 forces eviction of earlier pages; fetching them again must
        // read back the write-back bytes rather than zeros.
        for (i, pid) in pids.iter().enumerate() {
            let val = pool.with_page(*pid, |buf| buf[0]).unwrap();
            assert_eq!(val, i as u8);
        }
    }

    #[test]
    fn hit_ratio_reflects_repeated_access() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        pool.register_file(dir.path().join("f.dat"), 0, 1, noop_cb()).unwrap();
        let pid = pool.allocate_page(0).unwrap();
        pool.with_page(pid, |_| ()).unwrap();
        pool.with_page(pid, |_| ()).unwrap();
        assert!(pool.hit_ratio() > 0.5);
    }

    #[test]
    fn hit_ratio_is_logical_minus_physical_over_logical() {
        let dir = tempdir().unwrap();
        // Capacity 1 so allocating the second page evicts the first.
        let pool = BufferPool::new(1);
        pool.register_file(dir.path().join("f.dat"), 0, 1, noop_cb()).unwrap();
        let p1 = pool.allocate_page(0).unwrap();
        pool.with_page(p1, |_| ()).unwrap(); // logical=1, already resident: no physical read
        let _p2 = pool.allocate_page(0).unwrap(); // evicts p1
        pool.with_page(p1, |_| ()).unwrap(); // logical=2, evicted: one physical read
        assert_eq!(pool.hit_ratio(), 0.5);
    }

    #[test]
    fn mark_dirty_survives_flush_and_reread() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        pool.register_file(dir.path().join("f.dat"), 0, 1, noop_cb()).unwrap();
        let pid = pool.allocate_page(0).unwrap();
        pool.with_page_mut(pid, |buf| buf[0] = 7).unwrap();
        // Redundant with with_page_mut's own dirty-marking, but mark_dirty
        // must still be safe to call directly (the paged-file test scenario
        // drives fetch/mark_dirty/flush_all as separate steps).
        pool.mark_dirty(pid).unwrap();
        pool.flush_all().unwrap();
        let val = pool.with_page(pid, |buf| buf[0]).unwrap();
        assert_eq!(val, 7);
    }

    #[test]
    fn scan_file_visits_every_valid_page_without_touching_lru() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(2);
        pool.register_file(dir.path().join("f.dat"), 0, 1, noop_cb()).unwrap();
        let pids: Vec<_> = (0..3).map(|i| {
            let pid = pool.allocate_page(0).unwrap();
            pool.with_page_mut(pid, |buf| buf[0] = i as u8).unwrap();
            pid
        }).collect();

        let mut seen = Vec::new();
        pool.scan_file(0, |pid, buf| {
            seen.push((pid, buf[0]));
            Ok(())
        }).unwrap();

        assert_eq!(seen.len(), 3);
        for (pid, byte) in &seen {
            let expected = pids.iter().position(|p| p == pid).unwrap() as u8;
            assert_eq!(*byte, expected);
        }
        // capacity is 2 but all 3 pages were visited, so scan_file didn't
        // have to resize the pool's resident set to do it.
        assert!(pool.resident_count() <= 2);
    }

    #[test]
    fn free_page_removes_resident_frame() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        pool.register_file(dir.path().join("f.dat"), 0, 1, noop_cb()).unwrap();
        let pid = pool.allocate_page(0).unwrap();
        pool.free_page(pid).unwrap();
        assert_eq!(pool.resident_count(), 0);
        assert!(pool.with_page(pid, |_| ()).is_err());
    }
}
