//! The graph pool: a root directory holding a set of named graphs, all
//! sharing one buffer pool and one transaction manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::config::Config;
use crate::error::{PoseidonError, Result};
use crate::graph::GraphStore;
use crate::storage::buffer_pool::BufferPool;
use crate::txn::{Transaction, TransactionManager};

/// Owns every graph living under a root directory, plus the buffer pool and
/// transaction manager they all share.
pub struct GraphPool {
    root: PathBuf,
    pool: Arc<BufferPool>,
    txns: TransactionManager,
    graphs: RwLock<FxHashMap<String, Arc<GraphStore>>>,
    scan_thread_pool_size: usize,
}

impl GraphPool {
    /// Creates (or reopens) a graph pool rooted at `path`, with a shared
    /// buffer pool sized per `config`.
    pub fn create(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let pool = Arc::new(BufferPool::new(config.buffer_pool_capacity));
        info!(root = %root.display(), capacity = config.buffer_pool_capacity, "graph pool opened");
        Ok(Self {
            root,
            pool,
            txns: TransactionManager::new(),
            graphs: RwLock::new(FxHashMap::default()),
            scan_thread_pool_size: config.scan_thread_pool_size,
        })
    }

    /// Number of worker threads a parallel scan should fan out across by
    /// default, per this pool's [`Config`].
    pub fn scan_thread_pool_size(&self) -> usize {
        self.scan_thread_pool_size
    }

    /// Begins a read-only transaction to be used across one or more graphs in
    /// this pool. A transaction that writes through a single graph should use
    /// [`Self::begin_write_transaction`] instead, so an unrouted drop or
    /// explicit `abort()` still rolls back its writes against that graph.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        self.txns.begin()
    }

    /// Begins a transaction hooked to `store`'s own write-set rollback, so it
    /// is safe to write through `store` and then abort - or simply drop the
    /// transaction on an early `?`-return - without routing through
    /// `GraphStore::abort` by hand.
    pub fn begin_write_transaction<'a>(&'a self, store: &'a GraphStore) -> Transaction<'a> {
        store.begin_transaction(&self.txns)
    }

    /// Runs `body` inside a fresh transaction against `store`, committing if
    /// it returns `Ok(true)` and aborting otherwise (including on `Err`).
    pub fn run_transaction<F>(&self, store: &GraphStore, body: F) -> Result<()>
    where
        F: FnOnce(&Transaction<'_>) -> Result<bool>,
    {
        let txn = self.begin_write_transaction(store);
        match body(&txn) {
            Ok(true) => {
                store.commit(txn)?;
                Ok(())
            }
            Ok(false) => store.abort(txn),
            Err(err) => {
                store.abort(txn)?;
                Err(err)
            }
        }
    }

    /// Creates a new graph named `name`, failing if one already exists.
    pub fn create_graph(&self, name: &str) -> Result<Arc<GraphStore>> {
        {
            let graphs = self.graphs.read();
            if graphs.contains_key(name) {
                return Err(PoseidonError::QueryProcessingError(format!("graph '{name}' already exists")));
            }
        }
        let store = Arc::new(GraphStore::open(self.root.join(name), Arc::clone(&self.pool))?);
        self.graphs.write().insert(name.to_string(), Arc::clone(&store));
        info!(graph = name, "graph created");
        Ok(store)
    }

    /// Opens an already-created graph, creating it transparently if this is
    /// the first time it's been seen in this process (its files may already
    /// exist on disk from a prior run).
    pub fn open_graph(&self, name: &str) -> Result<Arc<GraphStore>> {
        if let Some(store) = self.graphs.read().get(name) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(GraphStore::open(self.root.join(name), Arc::clone(&self.pool))?);
        self.graphs.write().insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Drops graph `name` from this pool's in-memory registry. Its files are
    /// left on disk; use [`Self::destroy`] to remove a whole pool's storage.
    pub fn drop_graph(&self, name: &str) -> Result<()> {
        self.graphs.write().remove(name).ok_or_else(|| PoseidonError::UnknownIndex(name.to_string()))?;
        info!(graph = name, "graph dropped");
        Ok(())
    }

    /// Flushes every graph's dirty pages, then removes the pool's entire root
    /// directory from disk. Consumes the pool.
    pub fn destroy(self) -> Result<()> {
        self.pool.flush_all()?;
        drop(self.graphs);
        std::fs::remove_dir_all(&self.root)?;
        Ok(())
    }

    /// The shared buffer pool backing every graph in this pool.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_graph_rejects_duplicate_name() {
        let dir = tempdir().unwrap();
        let pool = GraphPool::create(dir.path(), Config::default()).unwrap();
        pool.create_graph("people").unwrap();
        let err = pool.create_graph("people").unwrap_err();
        assert!(matches!(err, PoseidonError::QueryProcessingError(_)));
    }

    #[test]
    fn open_graph_reuses_the_registered_store() {
        let dir = tempdir().unwrap();
        let pool = GraphPool::create(dir.path(), Config::default()).unwrap();
        let created = pool.create_graph("people").unwrap();
        let reopened = pool.open_graph("people").unwrap();
        assert!(Arc::ptr_eq(&created, &reopened));
    }

    #[test]
    fn drop_graph_removes_registry_entry_but_leaves_files_on_disk() {
        let dir = tempdir().unwrap();
        let pool = GraphPool::create(dir.path(), Config::default()).unwrap();
        pool.create_graph("people").unwrap();
        pool.drop_graph("people").unwrap();
        assert!(pool.drop_graph("people").is_err(), "already removed from the registry");

        // Reopening transparently recreates the registry entry from the files
        // `drop_graph` left behind.
        pool.open_graph("people").unwrap();
    }

    #[test]
    fn run_transaction_commits_on_true_and_rolls_back_on_false() {
        let dir = tempdir().unwrap();
        let pool = GraphPool::create(dir.path(), Config::default()).unwrap();
        let store = pool.create_graph("people").unwrap();

        pool.run_transaction(&store, |txn| {
            store.add_node(txn, "Person", &[]).unwrap();
            Ok(true)
        })
        .unwrap();

        pool.run_transaction(&store, |txn| {
            store.add_node(txn, "Person", &[]).unwrap();
            Ok(false)
        })
        .unwrap();

        let reader = pool.begin_transaction();
        let mut count = 0;
        store.nodes(reader.id(), Some("Person"), |_, _| count += 1).unwrap();
        assert_eq!(count, 1, "the committed node survives, the rolled-back one does not");
    }

    #[test]
    fn run_transaction_rolls_back_on_body_error() {
        let dir = tempdir().unwrap();
        let pool = GraphPool::create(dir.path(), Config::default()).unwrap();
        let store = pool.create_graph("people").unwrap();

        let result = pool.run_transaction(&store, |txn| {
            store.add_node(txn, "Person", &[]).unwrap();
            Err(PoseidonError::QueryProcessingError("boom".into()))
        });
        assert!(result.is_err());

        let reader = pool.begin_transaction();
        let mut count = 0;
        store.nodes(reader.id(), Some("Person"), |_, _| count += 1).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn destroy_removes_the_pool_root_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("pool");
        let pool = GraphPool::create(&root, Config::default()).unwrap();
        pool.create_graph("people").unwrap();
        assert!(root.exists());
        pool.destroy().unwrap();
        assert!(!root.exists());
    }
}
