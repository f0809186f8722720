//! Shared identifier types used across the storage, graph, and query layers.

use std::fmt;

/// Size in bytes of a single page. Every paged file on disk uses this page size.
pub const PAGE_SIZE: usize = 1024 * 1024;

/// Number of bits reserved for the slot bitmap in a file header (one bit per page).
pub const SLOT_BITMAP_BITS: usize = 65_536;

/// Size in bytes of the application-defined payload area in a file header.
pub const HEADER_PAYLOAD_SIZE: usize = 9_216;

/// Four-byte magic identifying a Poseidon paged file: ASCII `P`, `S`, `D`, `N`.
pub const FILE_MAGIC: [u8; 4] = *b"PSDN";

/// Maximum number of paged files a single buffer pool can register (4-bit selector).
pub const MAX_PAGED_FILES: u8 = 15;

/// A 64-bit page identifier: the top 4 bits encode a file id (0-14), the
/// remaining bits a 1-based page index within that file. Zero means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(u64);

const FILE_ID_SHIFT: u32 = 60;

impl PageId {
    /// The sentinel "unknown"/absent page id.
    pub const UNKNOWN: PageId = PageId(0);

    /// Builds a page id from a file id (0-14) and a 1-based page index.
    ///
    /// Panics if `file_id` does not fit in 4 bits or `index` is zero / overflows
    /// the remaining 60 bits.
    pub fn new(file_id: u8, index: u64) -> Self {
        assert!(file_id < MAX_PAGED_FILES + 1, "file id out of range");
        assert!(index != 0, "page index is 1-based and must be non-zero");
        assert!(index < (1u64 << FILE_ID_SHIFT), "page index overflows id space");
        PageId(((file_id as u64) << FILE_ID_SHIFT) | index)
    }

    /// Wraps a raw encoded value (used when reading ids back from disk).
    pub fn from_raw(raw: u64) -> Self {
        PageId(raw)
    }

    /// Returns the raw encoded 64-bit value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True if this is the sentinel "unknown" id.
    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }

    /// The file id encoded in the top 4 bits.
    pub fn file_id(self) -> u8 {
        (self.0 >> FILE_ID_SHIFT) as u8
    }

    /// The 1-based page index within the owning file.
    pub fn index(self) -> u64 {
        self.0 & ((1u64 << FILE_ID_SHIFT) - 1)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "page(unknown)")
        } else {
            write!(f, "page(file={}, idx={})", self.file_id(), self.index())
        }
    }
}

/// 32-bit identifier for an interned string (label name, property name, or
/// string-valued property content).
pub type DictCode = u32;

/// Sentinel meaning "no dictionary code" / the code is not present.
pub const UNKNOWN_DICT_CODE: DictCode = u32::MAX;

/// Record id within a buffered-vector container: `chunk_index * N + slot_index`.
pub type RecordId = u64;

/// Sentinel meaning "no record" (used for adjacency-list heads/tails, property
/// chain terminators, and absent node/relationship references).
pub const UNKNOWN_RECORD: RecordId = u64::MAX;

/// Identifier of a node record (a [`RecordId`] into the node container).
pub type NodeId = RecordId;

/// Identifier of a relationship record (a [`RecordId`] into the relationship container).
pub type RshipId = RecordId;

/// Identifier of a property-item record (a [`RecordId`] into the property container).
pub type PropId = RecordId;

/// Monotonically increasing transaction timestamp.
pub type Timestamp = u64;

/// Sentinel "commit timestamp" meaning the version is still live (not yet committed
/// to a fixed interval, or committed with no newer version shadowing it).
pub const TS_INFINITY: Timestamp = u64::MAX;
