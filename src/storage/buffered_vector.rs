//! A typed, slotted container built on top of a single paged file.
//!
//! Each page is a "chunk" holding a fixed number of fixed-size records plus a
//! slot bitset and a "first available" hint, mirroring the original
//! `buffered_vec`/`bchunk` layout. Record ids are `chunk_index * records_per_chunk
//! + slot_index`.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{PoseidonError, Result};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::paged_file::HeaderMode;
use crate::types::{PageId, RecordId, PAGE_SIZE};

/// A fixed-size, byte-encodable record stored in a [`BufferedVector`].
pub trait Record: Sized {
    /// Encoded size in bytes. Must be constant for a given type.
    const ENCODED_SIZE: usize;

    /// Serializes `self` into `buf`, which is exactly [`Self::ENCODED_SIZE`] bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Deserializes a value from `buf`, which is exactly [`Self::ENCODED_SIZE`] bytes.
    fn decode(buf: &[u8]) -> Self;
}

fn bit(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (1 << (i % 8)) != 0
}

fn set_bit(bitmap: &mut [u8], i: usize, value: bool) {
    if value {
        bitmap[i / 8] |= 1 << (i % 8);
    } else {
        bitmap[i / 8] &= !(1 << (i % 8));
    }
}

/// A slotted container of fixed-size records, paged through a [`BufferPool`].
pub struct BufferedVector<T: Record> {
    file_id: u8,
    records_per_chunk: usize,
    bitmap_bytes: usize,
    hint_chunk: AtomicU32,
    /// Count of currently-clear (unused) slots across every allocated chunk.
    /// Persisted in the header payload alongside the scan hint; see
    /// [`Self::available_slots`].
    available_slots: AtomicU64,
    insert_lock: Mutex<()>,
    _marker: PhantomData<T>,
}

impl<T: Record> BufferedVector<T> {
    fn layout(records_per_chunk: usize) -> (usize, usize) {
        let bitmap_bytes = records_per_chunk.div_ceil(8);
        (records_per_chunk, bitmap_bytes)
    }

    fn records_per_chunk_for() -> usize {
        // records * SIZE + ceil(records/8) + 4 (first_available hint) <= PAGE_SIZE
        let mut n = PAGE_SIZE / T::ENCODED_SIZE;
        while n * T::ENCODED_SIZE + n.div_ceil(8) + 4 > PAGE_SIZE {
            n -= 1;
        }
        n.max(1)
    }

    /// Opens or creates the backing paged file at `path`, registering it with
    /// `pool` under `file_id`.
    pub fn open(pool: &BufferPool, path: impl AsRef<Path>, file_id: u8, file_type: u8) -> Result<Self> {
        let records_per_chunk = Self::records_per_chunk_for();
        let (records_per_chunk, bitmap_bytes) = Self::layout(records_per_chunk);
        let mut stored_available = 0u64;
        let mut stored_hint = 0u32;
        pool.register_file(
            path,
            file_id,
            file_type,
            Box::new(|mode, payload| {
                if mode == HeaderMode::Read {
                    stored_available = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                    stored_hint = u32::from_le_bytes(payload[8..12].try_into().unwrap());
                }
            }),
        )?;
        Ok(Self {
            file_id,
            records_per_chunk,
            bitmap_bytes,
            hint_chunk: AtomicU32::new(stored_hint),
            available_slots: AtomicU64::new(stored_available),
            insert_lock: Mutex::new(()),
            _marker: PhantomData,
        })
    }

    /// Persists the scan hint and available-slot count into the file header
    /// and closes the file.
    pub fn close(self, pool: &BufferPool) -> Result<()> {
        let hint = self.hint_chunk.load(Ordering::Relaxed);
        let available = self.available_slots.load(Ordering::Relaxed);
        pool.close_file(
            self.file_id,
            Box::new(move |mode, payload| {
                if mode == HeaderMode::Write {
                    payload[0..8].copy_from_slice(&available.to_le_bytes());
                    payload[8..12].copy_from_slice(&hint.to_le_bytes());
                }
            }),
        )
    }

    /// Count of currently-clear (unused) slots across every allocated chunk,
    /// maintained incrementally by [`Self::insert`]/[`Self::remove`] and
    /// persisted across a close/reopen cycle.
    pub fn available_slots(&self) -> u64 {
        self.available_slots.load(Ordering::Relaxed)
    }

    fn chunk_offsets(&self) -> (usize, usize) {
        let records_area = self.records_per_chunk * T::ENCODED_SIZE;
        (records_area, records_area + self.bitmap_bytes)
    }

    fn decode_id(&self, id: RecordId) -> (u32, usize) {
        let chunk = (id / self.records_per_chunk as u64) as u32;
        let slot = (id % self.records_per_chunk as u64) as usize;
        (chunk, slot)
    }

    fn page_id_for_chunk(&self, chunk: u32) -> PageId {
        PageId::new(self.file_id, chunk as u64 + 1)
    }

    /// Inserts `record`, returning the id it was stored under.
    pub fn insert(&self, pool: &BufferPool, record: &T) -> Result<RecordId> {
        let _guard = self.insert_lock.lock();
        let (records_area, hint_off) = self.chunk_offsets();
        let mut chunk = self.hint_chunk.load(Ordering::Relaxed);
        let last_chunk = match pool_last_chunk(pool, self.file_id)? {
            Some(c) => c,
            None => {
                let pid = pool.allocate_page(self.file_id)?;
                self.available_slots.fetch_add(self.records_per_chunk as u64, Ordering::Relaxed);
                pid.index() as u32 - 1
            }
        };

        loop {
            let pid = self.page_id_for_chunk(chunk);
            let found = pool.with_page(pid, |buf| {
                let bitmap = &buf[records_area..hint_off];
                (0..self.records_per_chunk).find(|&i| !bit(bitmap, i))
            });
            match found {
                Ok(Some(slot)) => {
                    pool.with_page_mut(pid, |buf| {
                        let mut tmp = vec![0u8; T::ENCODED_SIZE];
                        record.encode(&mut tmp);
                        buf[slot * T::ENCODED_SIZE..(slot + 1) * T::ENCODED_SIZE].copy_from_slice(&tmp);
                        let bitmap = &mut buf[records_area..hint_off];
                        set_bit(bitmap, slot, true);
                    })?;
                    let next_hint = if slot + 1 < self.records_per_chunk { chunk } else { chunk + 1 };
                    self.hint_chunk.store(next_hint, Ordering::Relaxed);
                    self.available_slots.fetch_sub(1, Ordering::Relaxed);
                    return Ok(chunk as u64 * self.records_per_chunk as u64 + slot as u64);
                }
                Ok(None) => {
                    if chunk >= last_chunk {
                        let pid = pool.allocate_page(self.file_id)?;
                        self.available_slots.fetch_add(self.records_per_chunk as u64, Ordering::Relaxed);
                        chunk = pid.index() as u32 - 1;
                        continue;
                    }
                    chunk += 1;
                }
                Err(_) => {
                    let pid = pool.allocate_page(self.file_id)?;
                    self.available_slots.fetch_add(self.records_per_chunk as u64, Ordering::Relaxed);
                    chunk = pid.index() as u32 - 1;
                }
            }
        }
    }

    /// Reads the record stored at `id`.
    pub fn get(&self, pool: &BufferPool, id: RecordId) -> Result<T> {
        let (chunk, slot) = self.decode_id(id);
        let (records_area, hint_off) = self.chunk_offsets();
        let pid = self.page_id_for_chunk(chunk);
        pool.with_page(pid, |buf| {
            let bitmap = &buf[records_area..hint_off];
            if !bit(bitmap, slot) {
                return None;
            }
            Some(T::decode(&buf[slot * T::ENCODED_SIZE..(slot + 1) * T::ENCODED_SIZE]))
        })?
        .ok_or(PoseidonError::UnknownId(id))
    }

    /// Overwrites the record at `id` in place. Fails if the slot is unused.
    pub fn update(&self, pool: &BufferPool, id: RecordId, record: &T) -> Result<()> {
        let (chunk, slot) = self.decode_id(id);
        let (records_area, hint_off) = self.chunk_offsets();
        let pid = self.page_id_for_chunk(chunk);
        let existed = pool.with_page(pid, |buf| bit(&buf[records_area..hint_off], slot))?;
        if !existed {
            return Err(PoseidonError::UnknownId(id));
        }
        pool.with_page_mut(pid, |buf| {
            let mut tmp = vec![0u8; T::ENCODED_SIZE];
            record.encode(&mut tmp);
            buf[slot * T::ENCODED_SIZE..(slot + 1) * T::ENCODED_SIZE].copy_from_slice(&tmp);
        })
    }

    /// Clears the slot at `id`, making it available for reuse.
    pub fn remove(&self, pool: &BufferPool, id: RecordId) -> Result<()> {
        let (chunk, slot) = self.decode_id(id);
        let (records_area, hint_off) = self.chunk_offsets();
        let pid = self.page_id_for_chunk(chunk);
        let was_set = pool.with_page_mut(pid, |buf| {
            let bitmap = &mut buf[records_area..hint_off];
            let was_set = bit(bitmap, slot);
            set_bit(bitmap, slot, false);
            was_set
        })?;
        if was_set {
            self.available_slots.fetch_add(1, Ordering::Relaxed);
        }
        if self.hint_chunk.load(Ordering::Relaxed) > chunk {
            self.hint_chunk.store(chunk, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Iterates every used record id and value, in id order. Used by table
    /// scans; callers wanting a parallel scan should partition on chunk
    /// boundaries (`records_per_chunk`).
    pub fn scan(&self, pool: &BufferPool) -> Result<Vec<(RecordId, T)>> {
        let (records_area, hint_off) = self.chunk_offsets();
        let mut out = Vec::new();
        let last_chunk = match pool_last_chunk(pool, self.file_id)? {
            Some(c) => c,
            None => return Ok(out),
        };
        for chunk in 0..=last_chunk {
            let pid = self.page_id_for_chunk(chunk);
            if !pool_page_valid(pool, pid) {
                continue;
            }
            let rows = pool.with_page(pid, |buf| {
                let bitmap = &buf[records_area..hint_off];
                (0..self.records_per_chunk)
                    .filter(|&i| bit(bitmap, i))
                    .map(|i| {
                        let id = chunk as u64 * self.records_per_chunk as u64 + i as u64;
                        (id, T::decode(&buf[i * T::ENCODED_SIZE..(i + 1) * T::ENCODED_SIZE]))
                    })
                    .collect::<Vec<_>>()
            })?;
            out.extend(rows);
        }
        Ok(out)
    }

    /// Number of records per chunk page, exposed so callers can partition scans.
    pub fn records_per_chunk(&self) -> usize {
        self.records_per_chunk
    }
}

fn pool_last_chunk(pool: &BufferPool, file_id: u8) -> Result<Option<u32>> {
    // Probe page 1; if invalid there are no chunks yet.
    let probe = PageId::new(file_id, 1);
    if !pool_page_valid(pool, probe) {
        return Ok(None);
    }
    let mut last = 0u32;
    loop {
        let pid = PageId::new(file_id, last as u64 + 2);
        if !pool_page_valid(pool, pid) {
            break;
        }
        last += 1;
    }
    Ok(Some(last))
}

fn pool_page_valid(pool: &BufferPool, pid: PageId) -> bool {
    pool.with_page(pid, |_| ()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer_pool::BufferPool;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    struct Fixed(u64);

    impl Record for Fixed {
        const ENCODED_SIZE: usize = 8;
        fn encode(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0.to_le_bytes());
        }
        fn decode(buf: &[u8]) -> Self {
            Fixed(u64::from_le_bytes(buf.try_into().unwrap()))
        }
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(100);
        let vec = BufferedVector::<Fixed>::open(&pool, dir.path().join("v.dat"), 0, 1).unwrap();
        let id1 = vec.insert(&pool, &Fixed(10)).unwrap();
        let id2 = vec.insert(&pool, &Fixed(20)).unwrap();
        assert_eq!(vec.get(&pool, id1).unwrap(), Fixed(10));
        assert_eq!(vec.get(&pool, id2).unwrap(), Fixed(20));
        vec.remove(&pool, id1).unwrap();
        assert!(vec.get(&pool, id1).is_err());
        let id3 = vec.insert(&pool, &Fixed(30)).unwrap();
        assert_eq!(id3, id1, "freed slot should be reused via the scan hint");
    }

    #[test]
    fn available_slots_equals_clear_slot_count() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(100);
        let path = dir.path().join("v.dat");
        let vec = BufferedVector::<Fixed>::open(&pool, &path, 0, 1).unwrap();
        let per_chunk = vec.records_per_chunk() as u64;
        assert_eq!(vec.available_slots(), 0, "no chunk allocated yet");

        let ids: Vec<_> = (0..5).map(|i| vec.insert(&pool, &Fixed(i)).unwrap()).collect();
        assert_eq!(vec.available_slots(), per_chunk - 5);

        vec.remove(&pool, ids[2]).unwrap();
        assert_eq!(vec.available_slots(), per_chunk - 4);

        vec.close(&pool).unwrap();
        let reopened = BufferedVector::<Fixed>::open(&pool, &path, 0, 1).unwrap();
        assert_eq!(reopened.available_slots(), per_chunk - 4, "persisted across close/reopen");
    }

    #[test]
    fn scan_returns_only_live_records() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(100);
        let vec = BufferedVector::<Fixed>::open(&pool, dir.path().join("v.dat"), 0, 1).unwrap();
        let ids: Vec<_> = (0..10).map(|i| vec.insert(&pool, &Fixed(i)).unwrap()).collect();
        vec.remove(&pool, ids[3]).unwrap();
        let rows = vec.scan(&pool).unwrap();
        assert_eq!(rows.len(), 9);
        assert!(rows.iter().all(|(id, _)| *id != ids[3]));
    }

    #[test]
    fn spans_multiple_chunks() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(100);
        let vec = BufferedVector::<Fixed>::open(&pool, dir.path().join("v.dat"), 0, 1).unwrap();
        let n = vec.records_per_chunk() * 2 + 5;
        let ids: Vec<_> = (0..n as u64).map(|i| vec.insert(&pool, &Fixed(i)).unwrap()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(vec.get(&pool, *id).unwrap(), Fixed(i as u64));
        }
    }
}
