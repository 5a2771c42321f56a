//! Error types for packstore
//!
//! Provides a unified error type for all operations, grouped into the four
//! failure categories callers care about (see [`ErrorCategory`]).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using PackError
pub type Result<T> = std::result::Result<T, PackError>;

/// Broad classification of a [`PackError`].
///
/// None of these are retried inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Duplicate keys, duplicate pack names, malformed index input
    StructuralConflict,
    /// Write group / write lock misuse
    ConcurrencyViolation,
    /// Data expected on disk is missing or damaged
    ConsistencyError,
    /// I/O, encoding, or configuration failures
    ResourceError,
}

/// Unified error type for packstore operations
#[derive(Debug, Error)]
pub enum PackError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Structural Conflicts
    // -------------------------------------------------------------------------
    #[error("Duplicate key in index: {0}")]
    DuplicateKey(String),

    #[error("Pack already registered in manifest: {0}")]
    DuplicatePack(String),

    #[error("Pack name collision: {name} exists on disk with different content")]
    NameCollision { name: String },

    #[error("Invalid key {key}: expected {expected} elements")]
    InvalidKey { key: String, expected: usize },

    #[error("Bad reference lists for {key}: expected {expected}, got {actual}")]
    BadReferenceLists {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("Index builder already finished")]
    BuilderFinished,

    // -------------------------------------------------------------------------
    // Concurrency Violations
    // -------------------------------------------------------------------------
    #[error("A write group is already open")]
    WriteGroupAlreadyOpen,

    #[error("No write group is open")]
    NoWriteGroup,

    #[error("Repository is not write locked")]
    NotWriteLocked,

    #[error("Repository busy: {0}")]
    Busy(String),

    #[error("Write lock held by another process: {0}")]
    LockContention(PathBuf),

    // -------------------------------------------------------------------------
    // Consistency Errors
    // -------------------------------------------------------------------------
    #[error("Record {key} missing from {kind} index of every source pack")]
    MissingRecord { kind: String, key: String },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    #[error("Pack not in manifest: {0}")]
    UnknownPack(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PackError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            PackError::DuplicateKey(_)
            | PackError::DuplicatePack(_)
            | PackError::NameCollision { .. }
            | PackError::InvalidKey { .. }
            | PackError::BadReferenceLists { .. }
            | PackError::BuilderFinished => ErrorCategory::StructuralConflict,

            PackError::WriteGroupAlreadyOpen
            | PackError::NoWriteGroup
            | PackError::NotWriteLocked
            | PackError::Busy(_)
            | PackError::LockContention(_) => ErrorCategory::ConcurrencyViolation,

            PackError::MissingRecord { .. }
            | PackError::Corruption(_)
            | PackError::ChecksumMismatch { .. }
            | PackError::UnknownPack(_) => ErrorCategory::ConsistencyError,

            PackError::Io(_) | PackError::Serialization(_) | PackError::Config(_) => {
                ErrorCategory::ResourceError
            }
        }
    }
}

impl From<bincode::Error> for PackError {
    fn from(e: bincode::Error) -> Self {
        PackError::Serialization(e.to_string())
    }
}
