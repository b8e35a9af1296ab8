//! The persistence capability and an in-memory implementation.
//!
//! A [`Store`] owns the storage mechanics: unique keys, batch atomicity, and
//! ordered reads. Indexing policy (conflicts, monotonic progress) lives in
//! [`StoreAdapter`](crate::adapter::StoreAdapter).
//!
//! Unique keys:
//! - blocks: `number` (and `hash`)
//! - transactions: `hash`
//! - events: `(block_number, index)`
//! - associations: `(address, tx hash)` / `(address, block_number, event index)`

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{
    AddressAssociation, AssociationTarget, Block, BlockConflict, Event, StoreStats, Transaction,
};

/// Transactional persistence for indexed records.
///
/// Every batch insert is atomic and ignores rows whose unique key already
/// exists, returning the number of rows actually inserted. Reads must not
/// block behind writes for longer than one batch.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a block unless its number is already present. Returns `true` if inserted.
    async fn insert_block(&self, block: &Block) -> Result<bool, IndexerError>;

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, IndexerError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError>;

    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<u64, IndexerError>;

    async fn insert_events(&self, events: &[Event]) -> Result<u64, IndexerError>;

    async fn insert_associations(
        &self,
        associations: &[AddressAssociation],
    ) -> Result<u64, IndexerError>;

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, IndexerError>;

    /// Transactions associated with `address`, ordered by block number then block index.
    async fn transactions_for_address(&self, address: &str) -> Result<Vec<Transaction>, IndexerError>;

    /// Transactions of one block in block-index order.
    async fn block_transactions(&self, number: u64) -> Result<Vec<Transaction>, IndexerError>;

    /// Events of one block in index order.
    async fn block_events(&self, number: u64) -> Result<Vec<Event>, IndexerError>;

    /// Mark `number` fully indexed and raise progress to it if higher, atomically.
    /// Returns `true` if progress moved.
    async fn mark_indexed(&self, number: u64) -> Result<bool, IndexerError>;

    async fn is_indexed(&self, number: u64) -> Result<bool, IndexerError>;

    /// Highest indexed block of the run that starts at the lowest indexed block.
    async fn highest_contiguous_indexed(&self) -> Result<Option<u64>, IndexerError>;

    /// Highest fully indexed block number.
    async fn progress(&self) -> Result<Option<u64>, IndexerError>;

    /// Record a conflict once per `(block_number, stored_hash, incoming_hash)`.
    /// Returns `false` if the same conflict was already recorded.
    async fn record_conflict(&self, conflict: &BlockConflict) -> Result<bool, IndexerError>;

    async fn conflicts(&self) -> Result<Vec<BlockConflict>, IndexerError>;

    /// Up to `limit` stored blocks, highest number first.
    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, IndexerError>;

    async fn stats(&self) -> Result<StoreStats, IndexerError>;

    /// Delete every record, including progress and conflicts.
    async fn clear(&self) -> Result<(), IndexerError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, Block>,
    block_numbers_by_hash: HashMap<String, u64>,
    indexed: BTreeSet<u64>,
    transactions: HashMap<String, Transaction>,
    /// (block_number, block_index) → tx hash
    transaction_order: BTreeMap<(u64, u32), String>,
    events: BTreeMap<(u64, u32), Event>,
    associations: BTreeSet<AddressAssociation>,
    progress: Option<u64>,
    conflicts: Vec<BlockConflict>,
}

/// In-memory store for tests and ephemeral indexers.
///
/// A single `RwLock` guards all tables, so each batch is atomic and readers
/// proceed in parallel between writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, IndexerError> {
        self.inner
            .read()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, IndexerError> {
        self.inner
            .write()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_block(&self, block: &Block) -> Result<bool, IndexerError> {
        let mut inner = self.write()?;
        if inner.blocks.contains_key(&block.number) {
            return Ok(false);
        }
        inner
            .block_numbers_by_hash
            .insert(block.hash.clone(), block.number);
        inner.blocks.insert(block.number, block.clone());
        Ok(true)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, IndexerError> {
        Ok(self.read()?.blocks.get(&number).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        let inner = self.read()?;
        Ok(inner
            .block_numbers_by_hash
            .get(hash)
            .and_then(|n| inner.blocks.get(n))
            .cloned())
    }

    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<u64, IndexerError> {
        let mut inner = self.write()?;
        let mut inserted = 0;
        for tx in transactions {
            if inner.transactions.contains_key(&tx.hash) {
                continue;
            }
            inner
                .transaction_order
                .insert((tx.block_number, tx.block_index), tx.hash.clone());
            inner.transactions.insert(tx.hash.clone(), tx.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_events(&self, events: &[Event]) -> Result<u64, IndexerError> {
        let mut inner = self.write()?;
        let mut inserted = 0;
        for event in events {
            let key = (event.block_number, event.index);
            if !inner.events.contains_key(&key) {
                inner.events.insert(key, event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_associations(
        &self,
        associations: &[AddressAssociation],
    ) -> Result<u64, IndexerError> {
        let mut inner = self.write()?;
        let mut inserted = 0;
        for assoc in associations {
            if inner.associations.insert(assoc.clone()) {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, IndexerError> {
        Ok(self.read()?.transactions.get(hash).cloned())
    }

    async fn transactions_for_address(&self, address: &str) -> Result<Vec<Transaction>, IndexerError> {
        let inner = self.read()?;
        let mut txs: Vec<Transaction> = inner
            .associations
            .iter()
            .filter(|a| a.address == address)
            .filter_map(|a| match &a.target {
                AssociationTarget::Transaction { hash } => inner.transactions.get(hash).cloned(),
                AssociationTarget::Event { .. } => None,
            })
            .collect();
        txs.sort_by_key(|tx| (tx.block_number, tx.block_index));
        Ok(txs)
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<Transaction>, IndexerError> {
        let inner = self.read()?;
        Ok(inner
            .transaction_order
            .range((number, 0)..=(number, u32::MAX))
            .filter_map(|(_, hash)| inner.transactions.get(hash).cloned())
            .collect())
    }

    async fn block_events(&self, number: u64) -> Result<Vec<Event>, IndexerError> {
        let inner = self.read()?;
        Ok(inner
            .events
            .range((number, 0)..=(number, u32::MAX))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn mark_indexed(&self, number: u64) -> Result<bool, IndexerError> {
        let mut inner = self.write()?;
        inner.indexed.insert(number);
        if inner.progress.map_or(true, |p| number > p) {
            inner.progress = Some(number);
            return Ok(true);
        }
        Ok(false)
    }

    async fn is_indexed(&self, number: u64) -> Result<bool, IndexerError> {
        Ok(self.read()?.indexed.contains(&number))
    }

    async fn highest_contiguous_indexed(&self) -> Result<Option<u64>, IndexerError> {
        let inner = self.read()?;
        let mut iter = inner.indexed.iter();
        let Some(&first) = iter.next() else {
            return Ok(None);
        };
        let mut last = first;
        for &n in iter {
            if n != last + 1 {
                break;
            }
            last = n;
        }
        Ok(Some(last))
    }

    async fn progress(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.read()?.progress)
    }

    async fn record_conflict(&self, conflict: &BlockConflict) -> Result<bool, IndexerError> {
        let mut inner = self.write()?;
        let seen = inner.conflicts.iter().any(|c| {
            c.block_number == conflict.block_number
                && c.stored_hash == conflict.stored_hash
                && c.incoming_hash == conflict.incoming_hash
        });
        if seen {
            return Ok(false);
        }
        inner.conflicts.push(conflict.clone());
        Ok(true)
    }

    async fn conflicts(&self) -> Result<Vec<BlockConflict>, IndexerError> {
        Ok(self.read()?.conflicts.clone())
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, IndexerError> {
        Ok(self
            .read()?
            .blocks
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, IndexerError> {
        let inner = self.read()?;
        Ok(StoreStats {
            blocks: inner.blocks.len() as u64,
            complete_blocks: inner.indexed.len() as u64,
            transactions: inner.transactions.len() as u64,
            events: inner.events.len() as u64,
            associations: inner.associations.len() as u64,
            conflicts: inner.conflicts.len() as u64,
        })
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        *self.write()? = Inner::default();
        Ok(())
    }
}
