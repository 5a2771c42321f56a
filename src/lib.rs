//! # packstore
//!
//! A content-addressed pack store with:
//! - Immutable packs named by the BLAKE3 hash of their bytes
//! - Four sorted graph indices per pack (revisions, inventories, texts, signatures)
//! - A write group transaction for staging new records
//! - Bounded incremental compaction (autopack)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PackRepository                         │
//! │            (write lock, single state mutex)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────────┐
//!   │ WriteGroup  │─────────►│  PackCollection  │
//!   │  (staging)  │ publish  │ (manifest, cache)│
//!   └──────┬──────┘          └────────┬─────────┘
//!          │                          │
//!          ▼                          ▼
//!   ┌─────────────┐          ┌──────────────────┐
//!   │ MemoryIndex │─────────►│  CombinedIndex   │
//!   │  (per kind) │  front   │ (per kind, CoW)  │
//!   └─────────────┘          └────────┬─────────┘
//!                                     │
//!                    ┌────────────────┴────────────────┐
//!                    ▼                                 ▼
//!            ┌──────────────┐                  ┌──────────────┐
//!            │ SortedIndex  │                  │  Container   │
//!            │ (.rix .iix   │                  │   (.pack)    │
//!            │  .tix .six)  │                  │              │
//!            └──────────────┘                  └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod index;
pub mod storage;
pub mod pack;
pub mod lock;
pub mod write_group;
pub mod repository;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorCategory, PackError, Result};
pub use config::{Config, SyncStrategy};
pub use index::Key;
pub use pack::IndexKind;
pub use repository::PackRepository;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of packstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
