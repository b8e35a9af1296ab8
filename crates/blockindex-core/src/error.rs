//! Error types for the blockindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing and querying.
///
/// "Not found" is never an error: lookups return `Ok(None)` when nothing
/// exists, so callers can tell an empty answer from a failed one.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Chain read failed (timeout, dropped connection, node error).
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Caller supplied an invalid argument. Raised before any I/O.
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A required block field could not be extracted.
    #[error("Extraction failed for block {block_number}: {reason}")]
    Extraction { block_number: u64, reason: String },

    /// The block number is already stored under a different hash.
    #[error("Hash conflict at block {block_number}: stored {stored}, incoming {incoming}")]
    HashConflict {
        block_number: u64,
        stored: String,
        incoming: String,
    },

    /// A record handed to a batch write belongs to a different block.
    #[error("Record for block {found} passed to a write for block {expected}")]
    BlockMismatch { expected: u64, found: u64 },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Build a validation error for `field`.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Returns `true` if the caller supplied bad input.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_))
    }

    /// Returns `true` if the error is a persisted hash conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::HashConflict { .. })
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {err}"))
    }
}
