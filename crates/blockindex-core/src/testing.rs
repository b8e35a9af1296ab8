//! Test doubles: a scripted chain, a fault-injecting store, and block fixtures.
//!
//! Used by this crate's tests and by downstream crates that test code built
//! on [`ChainReader`] or [`Store`]. Outside this crate's own tests the module
//! needs the `testing` feature.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chain::{ChainReader, DecodedBlock, DecodedEvent, DecodedExtrinsic, DecodedHeader, EventPhase};
use crate::error::IndexerError;
use crate::store::{MemoryStore, Store};
use crate::types::{AddressAssociation, Block, BlockConflict, Event, StoreStats, Transaction, Value};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

/// Canonical hash of block `number` in fixtures.
pub fn block_hash(number: u64) -> String {
    format!("0x{number:064x}")
}

/// A competing hash for block `number`, distinct from [`block_hash`].
pub fn fork_hash(number: u64) -> String {
    format!("0xf0{number:062x}")
}

/// Hash of the extrinsic at `index` in fixture block `number`.
pub fn tx_hash(number: u64, index: u32) -> String {
    format!("0x{number:056x}{:08x}", index + 1)
}

fn event(phase: EventPhase, section: &str, method: &str, data: Vec<Value>) -> DecodedEvent {
    DecodedEvent {
        phase,
        section: Some(section.into()),
        method: Some(method.into()),
        data,
    }
}

/// A block with a `timestamp.set` inherent and no other extrinsics.
pub fn empty_block(number: u64) -> DecodedBlock {
    DecodedBlock {
        header: DecodedHeader {
            number,
            hash: Some(block_hash(number)),
            parent_hash: Some(block_hash(number.saturating_sub(1))),
            state_root: Some(format!("0x{:064x}", number + 0x1000)),
            extrinsics_root: Some(format!("0x{:064x}", number + 0x2000)),
            timestamp: None,
        },
        extrinsics: vec![DecodedExtrinsic {
            hash: Some(tx_hash(number, 0)),
            section: Some("timestamp".into()),
            method: Some("set".into()),
            args: vec![Value::number(1_700_000_000_000 + number as u128 * 6_000)],
            ..Default::default()
        }],
        events: vec![event(EventPhase::ApplyExtrinsic(0), "system", "ExtrinsicSuccess", vec![])],
    }
}

/// [`empty_block`] plus a `balances.transfer` from `from` to `to` at index 1.
pub fn transfer_block(number: u64, from: &str, to: &str) -> DecodedBlock {
    let mut block = empty_block(number);
    block.extrinsics.push(DecodedExtrinsic {
        hash: Some(tx_hash(number, 1)),
        section: Some("balances".into()),
        method: Some("transfer".into()),
        signer: Some(from.into()),
        nonce: Some(number),
        args: vec![Value::text(to), Value::number(1_000_000_000_000)],
        ..Default::default()
    });
    block.events.push(event(
        EventPhase::ApplyExtrinsic(1),
        "balances",
        "Transfer",
        vec![Value::text(from), Value::text(to), Value::number(1_000_000_000_000)],
    ));
    block.events.push(event(EventPhase::ApplyExtrinsic(1), "system", "ExtrinsicSuccess", vec![]));
    block
}

/// `block` re-hashed to [`fork_hash`], as a competing fork would deliver it.
pub fn forked(mut block: DecodedBlock) -> DecodedBlock {
    block.header.hash = Some(fork_hash(block.header.number));
    block
}

// ─── MockChain ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, DecodedBlock>,
    latest: Option<u64>,
    failing: HashSet<u64>,
}

/// A scripted [`ChainReader`] that counts every call.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
    number_reads: AtomicUsize,
    hash_reads: AtomicUsize,
    head_reads: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: impl IntoIterator<Item = DecodedBlock>) -> Self {
        let chain = Self::new();
        for block in blocks {
            chain.insert(block);
        }
        chain
    }

    /// Add or replace the block at its header number.
    pub fn insert(&self, block: DecodedBlock) {
        self.lock().blocks.insert(block.header.number, block);
    }

    /// Pin the reported head. Defaults to the highest inserted block.
    pub fn set_latest(&self, number: u64) {
        self.lock().latest = Some(number);
    }

    /// Make reads of block `number` fail until [`MockChain::heal`].
    pub fn fail_reads(&self, number: u64) {
        self.lock().failing.insert(number);
    }

    pub fn heal(&self, number: u64) {
        self.lock().failing.remove(&number);
    }

    pub fn number_reads(&self) -> usize {
        self.number_reads.load(Ordering::SeqCst)
    }

    pub fn hash_reads(&self) -> usize {
        self.hash_reads.load(Ordering::SeqCst)
    }

    /// Every call made against this reader.
    pub fn calls(&self) -> usize {
        self.number_reads() + self.hash_reads() + self.head_reads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self, number: u64) -> Result<Option<DecodedBlock>, IndexerError> {
        let state = self.lock();
        if state.failing.contains(&number) {
            return Err(IndexerError::Rpc(format!("mock read of block {number} failed")));
        }
        Ok(state.blocks.get(&number).cloned())
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_by_number(&self, number: u64) -> Result<Option<DecodedBlock>, IndexerError> {
        self.number_reads.fetch_add(1, Ordering::SeqCst);
        self.read(number)
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<DecodedBlock>, IndexerError> {
        self.hash_reads.fetch_add(1, Ordering::SeqCst);
        let number = self
            .lock()
            .blocks
            .values()
            .find(|b| b.header.hash.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(hash)))
            .map(|b| b.header.number);
        match number {
            Some(n) => self.read(n),
            None => Ok(None),
        }
    }

    async fn latest_block_number(&self) -> Result<u64, IndexerError> {
        self.head_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        Ok(state
            .latest
            .or_else(|| state.blocks.keys().next_back().copied())
            .unwrap_or(0))
    }
}

// ─── FaultyStore ──────────────────────────────────────────────────────────────

/// A write step that [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Block,
    Transactions,
    Events,
    Associations,
    Progress,
}

/// A [`MemoryStore`] whose writes can be made to fail once each.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    armed: Mutex<HashSet<FailPoint>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write at `point`.
    pub fn fail_once(&self, point: FailPoint) {
        self.lock().insert(point);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<FailPoint>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn trip(&self, point: FailPoint) -> Result<(), IndexerError> {
        if self.lock().remove(&point) {
            return Err(IndexerError::Storage(format!("injected {point:?} write failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_block(&self, block: &Block) -> Result<bool, IndexerError> {
        self.trip(FailPoint::Block)?;
        self.inner.insert_block(block).await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, IndexerError> {
        self.inner.block_by_number(number).await
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        self.inner.block_by_hash(hash).await
    }

    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<u64, IndexerError> {
        self.trip(FailPoint::Transactions)?;
        self.inner.insert_transactions(transactions).await
    }

    async fn insert_events(&self, events: &[Event]) -> Result<u64, IndexerError> {
        self.trip(FailPoint::Events)?;
        self.inner.insert_events(events).await
    }

    async fn insert_associations(
        &self,
        associations: &[AddressAssociation],
    ) -> Result<u64, IndexerError> {
        self.trip(FailPoint::Associations)?;
        self.inner.insert_associations(associations).await
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, IndexerError> {
        self.inner.transaction_by_hash(hash).await
    }

    async fn transactions_for_address(&self, address: &str) -> Result<Vec<Transaction>, IndexerError> {
        self.inner.transactions_for_address(address).await
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<Transaction>, IndexerError> {
        self.inner.block_transactions(number).await
    }

    async fn block_events(&self, number: u64) -> Result<Vec<Event>, IndexerError> {
        self.inner.block_events(number).await
    }

    async fn mark_indexed(&self, number: u64) -> Result<bool, IndexerError> {
        self.trip(FailPoint::Progress)?;
        self.inner.mark_indexed(number).await
    }

    async fn is_indexed(&self, number: u64) -> Result<bool, IndexerError> {
        self.inner.is_indexed(number).await
    }

    async fn highest_contiguous_indexed(&self) -> Result<Option<u64>, IndexerError> {
        self.inner.highest_contiguous_indexed().await
    }

    async fn progress(&self) -> Result<Option<u64>, IndexerError> {
        self.inner.progress().await
    }

    async fn record_conflict(&self, conflict: &BlockConflict) -> Result<bool, IndexerError> {
        self.inner.record_conflict(conflict).await
    }

    async fn conflicts(&self) -> Result<Vec<BlockConflict>, IndexerError> {
        self.inner.conflicts().await
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, IndexerError> {
        self.inner.recent_blocks(limit).await
    }

    async fn stats(&self) -> Result<StoreStats, IndexerError> {
        self.inner.stats().await
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        self.inner.clear().await
    }
}
