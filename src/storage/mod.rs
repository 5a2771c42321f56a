//! Storage Module
//!
//! Pack containers: the files that hold raw record bytes.
//!
//! ## Responsibilities
//! - Append length-prefixed, CRC-checked records
//! - Hash every byte written (the hash becomes the pack name)
//! - Batch small writes through a threshold-flushed buffer
//! - Scatter reads of arbitrary records by position
//!
//! ## File Format (V1)
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Header                                 │
//! │ ┌──────────┬──────────┐                │
//! │ │Magic (4) │Version(2)│                │
//! │ └──────────┴──────────┘                │
//! ├────────────────────────────────────────┤
//! │ Records                                │
//! │ ┌────────┬────────┬─────────────────┐  │
//! │ │Len (4) │CRC (4) │     Payload     │  │
//! │ └────────┴────────┴─────────────────┘  │
//! │ ... (repeated for each record)        │
//! ├────────────────────────────────────────┤
//! │ End marker "PEND" (4)                  │
//! └────────────────────────────────────────┘
//! ```
//!
//! A record's position is `(offset, length)` of the whole framed record, so
//! compaction can copy records verbatim without decoding them.

mod buffer;
mod container;

pub use buffer::BufferedSink;
pub use container::{ContainerReader, ContainerWriter, FinishedContainer, Position};
pub(crate) use container::parse_record;

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Magic bytes identifying a pack container
pub(crate) const MAGIC: &[u8; 4] = b"PACK";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const HEADER_SIZE: u64 = 6;

/// Record prefix: PayloadLen (4) + CRC32 (4) = 8 bytes
pub(crate) const RECORD_PREFIX_SIZE: u64 = 8;

/// Written after the last record of a finished container
pub(crate) const END_MARKER: &[u8; 4] = b"PEND";
