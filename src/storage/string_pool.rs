//! An append-only heap of null-terminated strings.
//!
//! Strings are packed into pages; the first four bytes of the current (last)
//! page hold the next write offset within that page. A string never spans a
//! page boundary — if it doesn't fit in the remaining space, a fresh page is
//! started.

use std::path::Path;

use parking_lot::Mutex;

use crate::error::{PoseidonError, Result};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::paged_file::HeaderMode;
use crate::types::{PageId, RecordId, PAGE_SIZE};

const CURSOR_LEN: usize = 4;

struct Cursor {
    page: u32,
    offset: u32,
}

/// An append-only, null-terminated string heap backed by a single paged file.
pub struct StringPool {
    file_id: u8,
    cursor: Mutex<Cursor>,
}

impl StringPool {
    /// Opens or creates the backing paged file at `path`.
    pub fn open(pool: &BufferPool, path: impl AsRef<Path>, file_id: u8, file_type: u8) -> Result<Self> {
        let mut last_page = 0u32;
        pool.register_file(
            path,
            file_id,
            file_type,
            Box::new(|mode, payload| {
                if mode == HeaderMode::Read {
                    last_page = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                }
            }),
        )?;
        let offset = if last_page == 0 {
            0
        } else {
            let pid = PageId::new(file_id, last_page as u64);
            pool.with_page(pid, |buf| u32::from_le_bytes(buf[0..4].try_into().unwrap()))?
        };
        Ok(Self {
            file_id,
            cursor: Mutex::new(Cursor { page: last_page, offset }),
        })
    }

    /// Persists the last-page marker and closes the file.
    pub fn close(self, pool: &BufferPool) -> Result<()> {
        let last_page = self.cursor.lock().page;
        pool.close_file(
            self.file_id,
            Box::new(move |mode, payload| {
                if mode == HeaderMode::Write {
                    payload[0..4].copy_from_slice(&last_page.to_le_bytes());
                }
            }),
        )
    }

    /// Appends `s` (which must not contain a NUL byte) and returns its id.
    pub fn append(&self, pool: &BufferPool, s: &str) -> Result<RecordId> {
        if s.as_bytes().contains(&0) {
            return Err(PoseidonError::QueryProcessingError(
                "strings stored in the string pool may not contain a NUL byte".into(),
            ));
        }
        let needed = s.len() + 1;
        let mut cursor = self.cursor.lock();

        if cursor.page == 0 || cursor.offset as usize + needed > PAGE_SIZE {
            let pid = pool.allocate_page(self.file_id)?;
            cursor.page = pid.index() as u32;
            cursor.offset = CURSOR_LEN as u32;
        }

        let pid = PageId::new(self.file_id, cursor.page as u64);
        let offset = cursor.offset as usize;
        pool.with_page_mut(pid, |buf| {
            buf[offset..offset + s.len()].copy_from_slice(s.as_bytes());
            buf[offset + s.len()] = 0;
            buf[0..4].copy_from_slice(&(offset as u32 + needed as u32).to_le_bytes());
        })?;
        cursor.offset += needed as u32;

        Ok(id_of(cursor.page, offset as u32))
    }

    /// Reads the string stored at `id`.
    pub fn read(&self, pool: &BufferPool, id: RecordId) -> Result<String> {
        let (page, offset) = split_id(id);
        let pid = PageId::new(self.file_id, page as u64);
        pool.with_page(pid, |buf| {
            let start = offset as usize;
            let end = buf[start..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| start + p)
                .ok_or(PoseidonError::UnknownId(id))?;
            std::str::from_utf8(&buf[start..end])
                .map(str::to_owned)
                .map_err(|_| PoseidonError::UnknownId(id))
        })?
    }

    /// Iterates every string in append order, yielding `(id, value)` pairs.
    /// Used to rebuild a [`crate::storage::dictionary::Dictionary`] on open.
    pub fn scan(&self, pool: &BufferPool) -> Result<Vec<(RecordId, String)>> {
        let cursor = self.cursor.lock();
        let mut out = Vec::new();
        if cursor.page == 0 {
            return Ok(out);
        }
        for page in 1..=cursor.page {
            let pid = PageId::new(self.file_id, page as u64);
            let write_end = pool.with_page(pid, |buf| u32::from_le_bytes(buf[0..4].try_into().unwrap()))?;
            let mut offset = CURSOR_LEN as u32;
            while offset < write_end {
                let start = offset;
                let s = self.read(pool, id_of(page, start))?;
                offset += s.len() as u32 + 1;
                out.push((id_of(page, start), s));
            }
        }
        Ok(out)
    }
}

fn id_of(page: u32, offset: u32) -> RecordId {
    ((page as u64) << 32) | offset as u64
}

fn split_id(id: RecordId) -> (u32, u32) {
    ((id >> 32) as u32, id as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(50);
        let sp = StringPool::open(&pool, dir.path().join("s.dat"), 0, 1).unwrap();
        let id1 = sp.append(&pool, "hello").unwrap();
        let id2 = sp.append(&pool, "world").unwrap();
        assert_eq!(sp.read(&pool, id1).unwrap(), "hello");
        assert_eq!(sp.read(&pool, id2).unwrap(), "world");
    }

    #[test]
    fn scan_visits_in_append_order() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(50);
        let sp = StringPool::open(&pool, dir.path().join("s.dat"), 0, 1).unwrap();
        let words = ["alpha", "beta", "gamma"];
        for w in &words {
            sp.append(&pool, w).unwrap();
        }
        let scanned = sp.scan(&pool).unwrap();
        let values: Vec<_> = scanned.iter().map(|(_, s)| s.as_str()).collect();
        assert_eq!(values, words);
    }

    #[test]
    fn large_strings_roll_onto_fresh_pages() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(50);
        let sp = StringPool::open(&pool, dir.path().join("s.dat"), 0, 1).unwrap();
        let big = "x".repeat(PAGE_SIZE - 100);
        let id1 = sp.append(&pool, &big).unwrap();
        let id2 = sp.append(&pool, "short").unwrap();
        assert_eq!(sp.read(&pool, id1).unwrap(), big);
        assert_eq!(sp.read(&pool, id2).unwrap(), "short");
    }
}
