//! Error kinds shared across the storage, transaction, and query layers.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoseidonError>;

/// Unified error type for Poseidon's storage and query subsystems.
///
/// Storage-layer variants ([`PoseidonError::Io`], [`PoseidonError::InvalidPageId`],
/// [`PoseidonError::NoFreeFrame`]) are treated as fatal by callers and abort the
/// current transaction. Per-record variants such as [`PoseidonError::VersionConflict`]
/// are recoverable: the visibility walk that produced them simply treats the record
/// as absent and iteration continues.
#[derive(Debug, Error)]
pub enum PoseidonError {
    /// Underlying file I/O failed.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] io::Error),
    /// A page id was out of range, double-freed, or referred to a clear slot.
    #[error("invalid page id {0}")]
    InvalidPageId(u64),
    /// The buffer pool could not find a free frame after eviction.
    #[error("no free frame available in buffer pool")]
    NoFreeFrame,
    /// A buffered-vector or graph-store lookup hit a cleared/missing slot.
    #[error("unknown id {0}")]
    UnknownId(u64),
    /// A property name has no dictionary code.
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    /// A label has no dictionary code.
    #[error("unknown label: {0}")]
    UnknownLabel(String),
    /// An index name did not resolve to a registered index.
    #[error("unknown index: {0}")]
    UnknownIndex(String),
    /// Attempted to delete a node that still has live relationships.
    #[error("node {0} still has live relationships")]
    NodeHasRelationships(u64),
    /// The MVCC visibility walk found no version visible to the current transaction.
    #[error("no version of record {0} is visible to this transaction")]
    VersionConflict(u64),
    /// A query-time failure not covered by a more specific variant.
    #[error("query processing error: {0}")]
    QueryProcessingError(String),
    /// A function call referenced an unregistered user-defined function.
    #[error("unknown function: {0}")]
    UdfNotFound(String),
}

impl PoseidonError {
    /// True for errors that a pipeline should surface as a query failure rather
    /// than silently convert to a null/false value.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PoseidonError::IoFailure(_) | PoseidonError::InvalidPageId(_) | PoseidonError::NoFreeFrame
        )
    }
}
