//! String interning on top of the [`StringPool`](crate::storage::string_pool::StringPool).
//!
//! Codes are assigned densely in append order (the code is the string's
//! position in the scan order), and the full string is always kept as the
//! lookup key — never a hash alone — so two distinct strings can never alias
//! to the same code.

use std::path::Path;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{PoseidonError, Result};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::string_pool::StringPool;
use crate::types::{DictCode, RecordId};

struct Inner {
    by_string: FxHashMap<String, DictCode>,
    by_code: Vec<RecordId>,
}

/// Bidirectional string <-> [`DictCode`] mapping, used to intern node/relationship
/// labels and property keys (and optionally string-valued properties).
pub struct Dictionary {
    pool_file_id: u8,
    strings: StringPool,
    inner: RwLock<Inner>,
}

impl Dictionary {
    /// Opens the backing string pool and rebuilds the in-memory maps by
    /// scanning it in append order.
    pub fn open(pool: &BufferPool, path: impl AsRef<Path>, file_id: u8, file_type: u8) -> Result<Self> {
        let strings = StringPool::open(pool, path, file_id, file_type)?;
        let scanned = strings.scan(pool)?;
        let mut by_string = FxHashMap::default();
        let mut by_code = Vec::with_capacity(scanned.len());
        for (rid, s) in scanned {
            let code = by_code.len() as DictCode;
            by_code.push(rid);
            by_string.insert(s, code);
        }
        Ok(Self {
            pool_file_id: file_id,
            strings,
            inner: RwLock::new(Inner { by_string, by_code }),
        })
    }

    /// Closes the backing string pool.
    pub fn close(self, pool: &BufferPool) -> Result<()> {
        self.strings.close(pool)
    }

    /// Returns the existing code for `s`, or interns it and returns a fresh one.
    pub fn lookup_or_insert(&self, pool: &BufferPool, s: &str) -> Result<DictCode> {
        if let Some(code) = self.inner.read().by_string.get(s) {
            return Ok(*code);
        }
        let mut inner = self.inner.write();
        if let Some(code) = inner.by_string.get(s) {
            return Ok(*code);
        }
        let rid = self.strings.append(pool, s)?;
        let code = inner.by_code.len() as DictCode;
        inner.by_code.push(rid);
        inner.by_string.insert(s.to_owned(), code);
        Ok(code)
    }

    /// Returns the code for `s` if it has already been interned.
    pub fn lookup(&self, s: &str) -> Option<DictCode> {
        self.inner.read().by_string.get(s).copied()
    }

    /// Resolves a code back to its string.
    pub fn resolve(&self, pool: &BufferPool, code: DictCode) -> Result<String> {
        let rid = *self
            .inner
            .read()
            .by_code
            .get(code as usize)
            .ok_or(PoseidonError::UnknownId(code as u64))?;
        self.strings.read(pool, rid)
    }

    /// The file id backing this dictionary's string pool.
    pub fn file_id(&self) -> u8 {
        self.pool_file_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer_pool::BufferPool;
    use tempfile::tempdir;

    #[test]
    fn interning_is_idempotent_and_collision_free() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(50);
        let dict = Dictionary::open(&pool, dir.path().join("d.dat"), 0, 1).unwrap();
        let a = dict.lookup_or_insert(&pool, "Person").unwrap();
        let b = dict.lookup_or_insert(&pool, "Person").unwrap();
        let c = dict.lookup_or_insert(&pool, "Company").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(dict.resolve(&pool, a).unwrap(), "Person");
        assert_eq!(dict.resolve(&pool, c).unwrap(), "Company");
    }

    #[test]
    fn rebuild_on_reopen_preserves_codes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.dat");
        let code_person;
        {
            let pool = BufferPool::new(50);
            let dict = Dictionary::open(&pool, &path, 0, 1).unwrap();
            code_person = dict.lookup_or_insert(&pool, "Person").unwrap();
            dict.lookup_or_insert(&pool, "Company").unwrap();
            dict.close(&pool).unwrap();
        }
        let pool = BufferPool::new(50);
        let dict = Dictionary::open(&pool, &path, 0, 1).unwrap();
        assert_eq!(dict.lookup("Person"), Some(code_person));
    }
}
