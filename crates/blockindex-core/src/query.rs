//! Cache-first query service.
//!
//! Every lookup reads the store first. On a miss it falls back to the chain:
//! a single direct read for blocks, a windowed [`BatchScanner`] scan for
//! addresses and transaction hashes. Fallback results are never written back;
//! the indexer is the only writer.
//!
//! Stored rows of a block count as a hit only once that block is complete.
//! A block whose writes were interrupted is read from the chain instead, so a
//! block with transactions but no events is never served.
//!
//! Caller errors are rejected before any store or chain I/O. Not-found is
//! `Ok(None)` (or an empty result), never an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::adapter::StoreAdapter;
use crate::chain::ChainReader;
use crate::config::{IndexerConfig, QueryConfig};
use crate::error::IndexerError;
use crate::extractor::Extractor;
use crate::format::{validate_hash, AddressFormat, BlockRef};
use crate::indexer::IndexerStatus;
use crate::scanner::{BatchScanner, FoundTransaction, ScanReport, ScanWindow};
use crate::store::Store;
use crate::types::{Block, Event, Source, Transaction};

// ─── Result shapes ────────────────────────────────────────────────────────────

/// Transactions associated with an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSearchResult {
    pub address: String,
    /// Ordered by block number then block index.
    pub transactions: Vec<TransactionInfo>,
    pub total: usize,
    /// Zero when served from the store.
    pub blocks_scanned: u64,
    pub source: Source,
    /// Present when the chain was scanned.
    pub scan: Option<ScanReport>,
}

/// A block with its transactions and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub events: Vec<Event>,
    pub source: Source,
}

/// A transaction and, when known, the block containing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub transaction: Transaction,
    pub block: Option<Block>,
    pub source: Source,
}

impl TransactionInfo {
    fn from_chain(found: FoundTransaction) -> Self {
        Self {
            transaction: found.transaction,
            block: Some(found.block),
            source: Source::Chain,
        }
    }
}

/// Indexing progress as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Highest fully indexed block.
    pub last_indexed_block: Option<u64>,
    /// Top of the gap-free run of indexed blocks.
    pub highest_contiguous_block: Option<u64>,
    pub blocks_indexed_count: u64,
    pub is_indexing: bool,
}

// ─── QueryService ─────────────────────────────────────────────────────────────

/// Read-only lookups over the store with chain fallback.
#[derive(Clone)]
pub struct QueryService {
    config: QueryConfig,
    format: AddressFormat,
    reader: Arc<dyn ChainReader>,
    adapter: StoreAdapter,
    extractor: Extractor,
    scanner: BatchScanner,
    status: Option<watch::Receiver<IndexerStatus>>,
}

impl QueryService {
    pub fn new(config: &IndexerConfig, reader: Arc<dyn ChainReader>, store: Arc<dyn Store>) -> Self {
        let extractor = Extractor::new(config.address_format);
        Self {
            config: config.query.clone(),
            format: config.address_format,
            scanner: BatchScanner::new(reader.clone(), extractor),
            adapter: StoreAdapter::new(store),
            extractor,
            reader,
            status: None,
        }
    }

    /// Report `is_indexing` from a running indexer's status channel.
    pub fn with_status(mut self, status: watch::Receiver<IndexerStatus>) -> Self {
        self.status = Some(status);
        self
    }

    /// Transactions associated with `address`.
    ///
    /// Served from the store when it has any; otherwise the most recent
    /// `blocks_to_scan` blocks are scanned in batches of `batch_size`.
    pub async fn search(
        &self,
        address: &str,
        blocks_to_scan: i64,
        batch_size: i64,
    ) -> Result<AddressSearchResult, IndexerError> {
        self.format.validate(address)?;
        let window = ScanWindow::new(blocks_to_scan, batch_size, &self.config)?;

        let cached = self.adapter.get_address_transactions(address).await?;
        if !cached.is_empty() {
            let transactions = self.resolve_cached(address, cached).await?;
            if !transactions.is_empty() {
                debug!(address, total = transactions.len(), "address served from cache");
                let source = if transactions.iter().any(|t| t.source == Source::Cache) {
                    Source::Cache
                } else {
                    Source::Chain
                };
                return Ok(AddressSearchResult {
                    address: address.to_string(),
                    total: transactions.len(),
                    transactions,
                    blocks_scanned: 0,
                    source,
                    scan: None,
                });
            }
        }

        let scan = self.scanner.scan_for_address(address, window).await?;
        let transactions: Vec<TransactionInfo> =
            scan.transactions.into_iter().map(TransactionInfo::from_chain).collect();
        Ok(AddressSearchResult {
            address: address.to_string(),
            total: transactions.len(),
            transactions,
            blocks_scanned: scan.report.blocks_scanned,
            source: Source::Chain,
            scan: Some(scan.report),
        })
    }

    /// [`search`](Self::search) with the configured default window.
    pub async fn search_default(&self, address: &str) -> Result<AddressSearchResult, IndexerError> {
        let window = ScanWindow::default_for(&self.config);
        self.search(address, window.blocks_to_scan as i64, window.batch_size as i64)
            .await
    }

    /// Block by decimal number or `0x` hash.
    pub async fn get_block(&self, number_or_hash: &str) -> Result<Option<BlockInfo>, IndexerError> {
        let block_ref = BlockRef::parse(number_or_hash)?;
        self.get_block_by_ref(&block_ref).await
    }

    pub async fn get_block_by_ref(&self, block_ref: &BlockRef) -> Result<Option<BlockInfo>, IndexerError> {
        let cached = match block_ref {
            BlockRef::Number(n) => self.adapter.get_block_by_number(*n).await?,
            BlockRef::Hash(h) => self.adapter.get_block_by_hash(h).await?,
        };
        if let Some(block) = cached {
            if !self.adapter.is_block_complete(block.number).await? {
                debug!(block = block.number, "stored block is incomplete, reading chain");
                return self.read_block(block_ref).await;
            }
            let transactions = self.adapter.get_block_transactions(block.number).await?;
            let events = self.adapter.get_block_events(block.number).await?;
            return Ok(Some(BlockInfo {
                block,
                transactions,
                events,
                source: Source::Cache,
            }));
        }
        self.read_block(block_ref).await
    }

    async fn read_block(&self, block_ref: &BlockRef) -> Result<Option<BlockInfo>, IndexerError> {
        let decoded = match block_ref {
            BlockRef::Number(n) => self.reader.block_by_number(*n).await?,
            BlockRef::Hash(h) => self.reader.block_by_hash(h).await?,
        };
        let Some(decoded) = decoded else {
            debug!(block = ?block_ref, "block not found on chain");
            return Ok(None);
        };
        let extracted = self.extractor.extract(&decoded)?;
        Ok(Some(BlockInfo {
            block: extracted.block,
            transactions: extracted.transactions,
            events: extracted.events,
            source: Source::Chain,
        }))
    }

    /// Transaction by hash, scanning the default window on a cache miss.
    pub async fn get_transaction(&self, hash: &str) -> Result<Option<TransactionInfo>, IndexerError> {
        let window = ScanWindow::default_for(&self.config);
        self.get_transaction_in_window(hash, window.blocks_to_scan as i64, window.batch_size as i64)
            .await
    }

    /// Transaction by hash, scanning the given window on a cache miss.
    pub async fn get_transaction_in_window(
        &self,
        hash: &str,
        blocks_to_scan: i64,
        batch_size: i64,
    ) -> Result<Option<TransactionInfo>, IndexerError> {
        let hash = validate_hash("hash", hash)?;
        let window = ScanWindow::new(blocks_to_scan, batch_size, &self.config)?;

        if let Some(transaction) = self.adapter.get_transaction_by_hash(&hash).await? {
            let number = transaction.block_number;
            if let Some(block) = self.complete_block(number).await? {
                return Ok(Some(TransactionInfo {
                    transaction,
                    block: Some(block),
                    source: Source::Cache,
                }));
            }
            debug!(block = number, hash = %hash, "transaction belongs to an incomplete block, reading chain");
            if let Some(decoded) = self.reader.block_by_number(number).await? {
                let extracted = self.extractor.extract(&decoded)?;
                if let Some(transaction) = extracted.transaction(&hash) {
                    return Ok(Some(TransactionInfo {
                        transaction: transaction.clone(),
                        block: Some(extracted.block.clone()),
                        source: Source::Chain,
                    }));
                }
            }
        }

        let scan = self.scanner.scan_for_transaction(&hash, window).await?;
        Ok(scan.found.map(TransactionInfo::from_chain))
    }

    pub async fn get_indexer_status(&self) -> Result<StatusReport, IndexerError> {
        let last_indexed_block = self.adapter.get_last_indexed_block().await?;
        let highest_contiguous_block = self.adapter.highest_contiguous_block().await?;
        let blocks_indexed_count = self.adapter.stats().await?.complete_blocks;
        let is_indexing = self
            .status
            .as_ref()
            .map(|rx| rx.borrow().is_indexing)
            .unwrap_or(false);
        Ok(StatusReport {
            last_indexed_block,
            highest_contiguous_block,
            blocks_indexed_count,
            is_indexing,
        })
    }

    /// The stored block `number`, if all of its records have been written.
    async fn complete_block(&self, number: u64) -> Result<Option<Block>, IndexerError> {
        if !self.adapter.is_block_complete(number).await? {
            return Ok(None);
        }
        self.adapter.get_block_by_number(number).await
    }

    /// Attach owning blocks to cached address rows. Rows of an incomplete
    /// block are replaced by that block's transactions as read from the chain.
    async fn resolve_cached(
        &self,
        address: &str,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<TransactionInfo>, IndexerError> {
        let mut by_block: BTreeMap<u64, Vec<Transaction>> = BTreeMap::new();
        for transaction in transactions {
            by_block.entry(transaction.block_number).or_default().push(transaction);
        }

        let mut out = Vec::new();
        for (number, transactions) in by_block {
            if let Some(block) = self.complete_block(number).await? {
                out.extend(transactions.into_iter().map(|transaction| TransactionInfo {
                    transaction,
                    block: Some(block.clone()),
                    source: Source::Cache,
                }));
                continue;
            }

            debug!(block = number, address, "cached rows belong to an incomplete block, reading chain");
            let Some(decoded) = self.reader.block_by_number(number).await? else {
                continue;
            };
            let extracted = self.extractor.extract(&decoded)?;
            out.extend(
                extracted
                    .transactions_for(address)
                    .into_iter()
                    .map(|transaction| TransactionInfo {
                        transaction: transaction.clone(),
                        block: Some(extracted.block.clone()),
                        source: Source::Chain,
                    }),
            );
        }
        Ok(out)
    }
}
