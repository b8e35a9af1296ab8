//! Store adapter: indexing policy on top of a [`Store`].
//!
//! Adds what the raw store does not know about:
//! - hash conflicts on re-ingested block numbers (keep-first, recorded)
//! - per-block batch validation
//! - monotonic progress that only moves after a block's writes all succeed

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::IndexerError;
use crate::store::Store;
use crate::types::{AddressAssociation, Block, BlockConflict, Event, StoreStats, Transaction};

/// Result of [`StoreAdapter::upsert_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockWrite {
    Inserted,
    /// Same number and hash already stored; nothing written.
    Unchanged,
}

/// Indexer-facing wrapper around a shared [`Store`].
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn Store>,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert `block` or confirm it is already stored.
    ///
    /// If the number is stored under another hash, the stored block is kept,
    /// the conflict is recorded, and [`IndexerError::HashConflict`] is returned.
    pub async fn upsert_block(&self, block: &Block) -> Result<BlockWrite, IndexerError> {
        if let Some(existing) = self.store.block_by_number(block.number).await? {
            if existing.hash == block.hash {
                return Ok(BlockWrite::Unchanged);
            }
            let conflict = BlockConflict {
                block_number: block.number,
                stored_hash: existing.hash.clone(),
                incoming_hash: block.hash.clone(),
                detected_at: chrono::Utc::now().timestamp_millis(),
            };
            if self.store.record_conflict(&conflict).await? {
                warn!(
                    block = block.number,
                    stored = %conflict.stored_hash,
                    incoming = %conflict.incoming_hash,
                    "block hash conflict, keeping stored block"
                );
            } else {
                debug!(block = block.number, incoming = %conflict.incoming_hash, "known hash conflict redelivered");
            }
            return Err(IndexerError::HashConflict {
                block_number: block.number,
                stored: conflict.stored_hash,
                incoming: conflict.incoming_hash,
            });
        }

        if self.store.insert_block(block).await? {
            debug!(block = block.number, hash = %block.hash, "block stored");
            Ok(BlockWrite::Inserted)
        } else {
            Ok(BlockWrite::Unchanged)
        }
    }

    pub async fn upsert_transactions(
        &self,
        block_number: u64,
        transactions: &[Transaction],
    ) -> Result<u64, IndexerError> {
        check_block(block_number, transactions.iter().map(|t| t.block_number))?;
        let inserted = self.store.insert_transactions(transactions).await?;
        debug!(block = block_number, inserted, total = transactions.len(), "transactions stored");
        Ok(inserted)
    }

    pub async fn upsert_events(&self, block_number: u64, events: &[Event]) -> Result<u64, IndexerError> {
        check_block(block_number, events.iter().map(|e| e.block_number))?;
        let inserted = self.store.insert_events(events).await?;
        debug!(block = block_number, inserted, total = events.len(), "events stored");
        Ok(inserted)
    }

    pub async fn upsert_address_associations(
        &self,
        block_number: u64,
        associations: &[AddressAssociation],
    ) -> Result<u64, IndexerError> {
        check_block(block_number, associations.iter().map(|a| a.block_number))?;
        let inserted = self.store.insert_associations(associations).await?;
        debug!(block = block_number, inserted, total = associations.len(), "associations stored");
        Ok(inserted)
    }

    /// Record `block_number` as fully indexed.
    ///
    /// Call only after every write for the block succeeded. Progress never
    /// moves backward; returns `false` when `block_number` is below it.
    pub async fn advance_progress(&self, block_number: u64) -> Result<bool, IndexerError> {
        let advanced = self.store.mark_indexed(block_number).await?;
        if !advanced {
            debug!(block = block_number, "block indexed below current progress");
        }
        Ok(advanced)
    }

    pub async fn block_exists(&self, number: u64) -> Result<bool, IndexerError> {
        Ok(self.store.block_by_number(number).await?.is_some())
    }

    /// `true` once the block's records were written and progress recorded.
    pub async fn is_block_complete(&self, number: u64) -> Result<bool, IndexerError> {
        self.store.is_indexed(number).await
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, IndexerError> {
        self.store.block_by_number(number).await
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        self.store.block_by_hash(hash).await
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, IndexerError> {
        self.store.transaction_by_hash(hash).await
    }

    /// Ordered by block number ascending, then block index.
    pub async fn get_address_transactions(&self, address: &str) -> Result<Vec<Transaction>, IndexerError> {
        self.store.transactions_for_address(address).await
    }

    pub async fn get_block_transactions(&self, number: u64) -> Result<Vec<Transaction>, IndexerError> {
        self.store.block_transactions(number).await
    }

    pub async fn get_block_events(&self, number: u64) -> Result<Vec<Event>, IndexerError> {
        self.store.block_events(number).await
    }

    /// Highest block number fully indexed, regardless of gaps below it.
    pub async fn get_last_indexed_block(&self) -> Result<Option<u64>, IndexerError> {
        self.store.progress().await
    }

    /// Top of the gap-free run starting at the lowest indexed block.
    pub async fn highest_contiguous_block(&self) -> Result<Option<u64>, IndexerError> {
        self.store.highest_contiguous_indexed().await
    }

    pub async fn conflicts(&self) -> Result<Vec<BlockConflict>, IndexerError> {
        self.store.conflicts().await
    }

    pub async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, IndexerError> {
        self.store.recent_blocks(limit).await
    }

    pub async fn stats(&self) -> Result<StoreStats, IndexerError> {
        self.store.stats().await
    }

    /// Drop all cached data. The indexer rebuilds it from new blocks.
    pub async fn clear(&self) -> Result<(), IndexerError> {
        warn!("clearing block index");
        self.store.clear().await
    }
}

fn check_block(expected: u64, found: impl IntoIterator<Item = u64>) -> Result<(), IndexerError> {
    match found.into_iter().find(|&n| n != expected) {
        Some(found) => Err(IndexerError::BlockMismatch { expected, found }),
        None => Ok(()),
    }
}
