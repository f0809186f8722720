//! Runtime configuration for a graph pool / buffer pool.

use serde::{Deserialize, Serialize};

use crate::storage::buffer_pool::DEFAULT_BUFFER_CAPACITY;

/// Tuning knobs for the storage layer. Constructed once when a [`crate::pool::GraphPool`]
/// is opened and shared by every graph within it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of page frames held by the shared buffer pool (default 5000, per
    /// the original design's `DEFAULT_BUFFER_SIZE`).
    pub buffer_pool_capacity: usize,
    /// Number of worker threads used for parallel node scans.
    pub scan_thread_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_pool_capacity: DEFAULT_BUFFER_CAPACITY,
            scan_thread_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_documented_buffer_capacity() {
        let config = Config::default();
        assert_eq!(config.buffer_pool_capacity, DEFAULT_BUFFER_CAPACITY);
        assert!(config.scan_thread_pool_size >= 1);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config { buffer_pool_capacity: 42, scan_thread_pool_size: 3 };
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.buffer_pool_capacity, 42);
        assert_eq!(back.scan_thread_pool_size, 3);
    }
}
