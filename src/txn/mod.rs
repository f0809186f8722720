//! Timestamp allocation and transaction state tracking.
//!
//! Visibility itself is evaluated by the graph store against the `(bts, cts)`
//! pair carried on each record version; this module only hands out the
//! monotonic counter values and tracks the active/committed/aborted state
//! machine. Per the explicit-context redesign, callers thread a [`Transaction`]
//! handle through every storage and query call instead of relying on a
//! thread-local "current transaction".

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{PoseidonError, Result};
use crate::types::{Timestamp, TS_INFINITY};

/// Identifies a transaction; also serves as its begin-timestamp and, for the
/// records it creates, their `bts`.
pub type TxId = u64;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Still running; may read and write.
    Active,
    /// Committed at a recorded timestamp.
    Committed,
    /// Rolled back; its writes must not be considered by anyone.
    Aborted,
}

/// Lets the store that issued a transaction undo its in-place writes if the
/// transaction is rolled back without going through the store's own commit
/// path - an explicit `abort()`, a `?`-propagated early return, or any other
/// drop of a live [`Transaction`].
pub trait RollbackHook {
    /// Undoes every write `txid` made. Must be safe to call more than once
    /// (a store that already rolled back explicitly will see a no-op here).
    fn rollback(&self, txid: TxId);
}

/// Allocates transaction ids/commit timestamps from a single monotonic
/// counter and tracks each transaction's lifecycle state.
pub struct TransactionManager {
    next_ts: AtomicU64,
    states: RwLock<FxHashMap<TxId, TxState>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Creates a manager whose counter starts at 1 (0 is reserved as "no timestamp").
    pub fn new() -> Self {
        Self {
            next_ts: AtomicU64::new(1),
            states: RwLock::new(FxHashMap::default()),
        }
    }

    fn next(&self) -> Timestamp {
        self.next_ts.fetch_add(1, Ordering::SeqCst)
    }

    /// Begins a new transaction and returns a scoped handle that aborts on
    /// drop unless explicitly committed or aborted. Intended for read-only
    /// transactions; a transaction that writes through a [`GraphStore`] should
    /// be started with [`Self::begin_with_hook`] (or, equivalently,
    /// `GraphStore::begin_transaction`) so an unrouted drop or explicit
    /// `abort()` still rolls back its writes.
    ///
    /// [`GraphStore`]: crate::graph::store::GraphStore
    pub fn begin(&self) -> Transaction<'_> {
        self.begin_with_hook(None)
    }

    /// Begins a new transaction whose rollback (on `abort()` or drop without
    /// commit) invokes `hook`, letting the owning store undo in-place writes
    /// regardless of which code path ends the transaction.
    pub fn begin_with_hook<'a>(&'a self, hook: Option<&'a dyn RollbackHook>) -> Transaction<'a> {
        let id = self.next();
        self.states.write().insert(id, TxState::Active);
        debug!(txid = id, "transaction begin");
        Transaction { mgr: self, hook, id, finished: false }
    }

    /// Current state of `txid`, or `None` if it was never allocated.
    pub fn state(&self, txid: TxId) -> Option<TxState> {
        self.states.read().get(&txid).copied()
    }

    fn commit(&self, txid: TxId) -> Result<Timestamp> {
        let mut states = self.states.write();
        match states.get(&txid) {
            Some(TxState::Active) => {}
            Some(other) => {
                return Err(PoseidonError::QueryProcessingError(format!(
                    "transaction {txid} cannot commit from state {other:?}"
                )))
            }
            None => return Err(PoseidonError::UnknownId(txid)),
        }
        let cts = self.next();
        states.insert(txid, TxState::Committed);
        debug!(txid, cts, "transaction commit");
        Ok(cts)
    }

    fn abort(&self, txid: TxId) {
        self.states.write().insert(txid, TxState::Aborted);
        debug!(txid, "transaction abort");
    }
}

/// A scoped handle to an active transaction. Must be consumed by
/// [`Transaction::commit`] or [`Transaction::abort`]; if dropped without
/// either, the transaction is aborted automatically so every exit path -
/// including `?`-propagated errors - leaves no transaction stuck active.
pub struct Transaction<'a> {
    mgr: &'a TransactionManager,
    hook: Option<&'a dyn RollbackHook>,
    id: TxId,
    finished: bool,
}

impl<'a> Transaction<'a> {
    /// The transaction's id, also used as the `bts` stamped on records it creates.
    pub fn id(&self) -> TxId {
        self.id
    }

    /// The transaction's logical "now", used both as its write timestamp and
    /// as the snapshot point for visibility checks it performs.
    pub fn snapshot_ts(&self) -> Timestamp {
        self.id
    }

    /// Commits, returning the fresh commit timestamp to stamp onto any
    /// version this transaction superseded.
    pub fn commit(mut self) -> Result<Timestamp> {
        let cts = self.mgr.commit(self.id)?;
        self.finished = true;
        Ok(cts)
    }

    /// Explicitly aborts the transaction, rolling back its writes through the
    /// hook it was started with (if any) before flipping its state.
    pub fn abort(mut self) {
        if let Some(hook) = self.hook {
            hook.rollback(self.id);
        }
        self.mgr.abort(self.id);
        self.finished = true;
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(hook) = self.hook {
                hook.rollback(self.id);
            }
            self.mgr.abort(self.id);
        }
    }
}

/// Evaluates the MVCC visibility rule for a single version: visible to
/// `txid` iff `txid` falls in `[bts, cts)`.
pub fn is_visible(bts: Timestamp, cts: Timestamp, txid: TxId) -> bool {
    txid >= bts && txid < cts
}

/// The "still live" sentinel commit timestamp, exported for record
/// construction sites outside this module.
pub const LIVE: Timestamp = TS_INFINITY;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_assigns_increasing_timestamps() {
        let mgr = TransactionManager::new();
        let t1 = mgr.begin();
        let id1 = t1.id();
        let cts1 = t1.commit().unwrap();
        let t2 = mgr.begin();
        assert!(t2.id() > id1);
        assert!(cts1 > id1);
    }

    #[test]
    fn drop_without_commit_aborts() {
        let mgr = TransactionManager::new();
        let id = {
            let t = mgr.begin();
            t.id()
        };
        assert_eq!(mgr.state(id), Some(TxState::Aborted));
    }

    #[test]
    fn visibility_window_is_half_open() {
        assert!(is_visible(5, 10, 5));
        assert!(is_visible(5, 10, 9));
        assert!(!is_visible(5, 10, 10));
        assert!(!is_visible(5, 10, 4));
        assert!(is_visible(5, LIVE, 1_000_000));
    }
}
