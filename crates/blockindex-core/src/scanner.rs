//! Batched chain scanner, the fallback path for cache misses.
//!
//! Scans the `blocks_to_scan` most recent blocks, newest batch first. Reads
//! inside a batch run concurrently; batches run one after another. A hash
//! search stops after the batch that contains the match. An address search
//! always covers the whole window.
//!
//! Blocks that cannot be read (missing, transient failure, undecodable) are
//! skipped and listed in [`ScanReport::skipped`].
//!
//! Dropping a scan future cancels every read still in flight. The scanner
//! never writes to the store.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::ChainReader;
use crate::config::QueryConfig;
use crate::error::IndexerError;
use crate::extractor::{ExtractedBlock, Extractor};
use crate::types::{Block, Transaction};

// ─── ScanWindow ───────────────────────────────────────────────────────────────

/// A validated scan window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub blocks_to_scan: u64,
    pub batch_size: u64,
}

impl ScanWindow {
    /// Validate caller-supplied window parameters against `limits`.
    pub fn new(blocks_to_scan: i64, batch_size: i64, limits: &QueryConfig) -> Result<Self, IndexerError> {
        if blocks_to_scan <= 0 {
            return Err(IndexerError::invalid("blocks_to_scan", "must be greater than 0"));
        }
        if blocks_to_scan as u64 > limits.max_blocks_to_scan {
            return Err(IndexerError::invalid(
                "blocks_to_scan",
                format!("must be at most {}", limits.max_blocks_to_scan),
            ));
        }
        if batch_size <= 0 {
            return Err(IndexerError::invalid("batch_size", "must be greater than 0"));
        }
        if batch_size as u64 > limits.max_batch_size {
            return Err(IndexerError::invalid(
                "batch_size",
                format!("must be at most {}", limits.max_batch_size),
            ));
        }
        Ok(Self {
            blocks_to_scan: blocks_to_scan as u64,
            batch_size: batch_size as u64,
        })
    }

    /// The configured default window.
    pub fn default_for(limits: &QueryConfig) -> Self {
        Self {
            blocks_to_scan: limits.default_blocks_to_scan.max(1),
            batch_size: limits.default_batch_size.max(1),
        }
    }

    /// Inclusive `(from, to)` range ending at `latest`, clamped at block 0.
    pub fn range(&self, latest: u64) -> (u64, u64) {
        (latest.saturating_sub(self.blocks_to_scan - 1), latest)
    }

    /// Inclusive batch ranges, newest first. The last batch may be short.
    pub fn batches(&self, latest: u64) -> Vec<(u64, u64)> {
        let (from, to) = self.range(latest);
        let mut batches = Vec::new();
        let mut end = to;
        loop {
            let start = end.saturating_sub(self.batch_size - 1).max(from);
            batches.push((start, end));
            if start == from {
                break;
            }
            end = start - 1;
        }
        batches
    }
}

// ─── Results ──────────────────────────────────────────────────────────────────

/// What a scan covered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Blocks in the window.
    pub blocks_requested: u64,
    /// Blocks read and examined before the scan finished.
    pub blocks_scanned: u64,
    /// Blocks in the examined batches that could not be read.
    pub skipped: Vec<u64>,
}

/// A transaction together with the block that contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundTransaction {
    pub transaction: Transaction,
    pub block: Block,
}

#[derive(Debug, Clone)]
pub struct AddressScan {
    /// Ordered by block number then block index.
    pub transactions: Vec<FoundTransaction>,
    pub report: ScanReport,
}

#[derive(Debug, Clone)]
pub struct HashScan {
    pub found: Option<FoundTransaction>,
    pub report: ScanReport,
}

// ─── BatchScanner ─────────────────────────────────────────────────────────────

/// Read-only window scanner over a [`ChainReader`].
#[derive(Clone)]
pub struct BatchScanner {
    reader: Arc<dyn ChainReader>,
    extractor: Extractor,
}

impl BatchScanner {
    pub fn new(reader: Arc<dyn ChainReader>, extractor: Extractor) -> Self {
        Self { reader, extractor }
    }

    /// Every transaction in the window associated with `address`.
    pub async fn scan_for_address(&self, address: &str, window: ScanWindow) -> Result<AddressScan, IndexerError> {
        let mut transactions = Vec::new();
        let report = self
            .scan(window, |extracted| {
                for tx in extracted.transactions_for(address) {
                    transactions.push(FoundTransaction {
                        transaction: tx.clone(),
                        block: extracted.block.clone(),
                    });
                }
                ControlFlow::Continue(())
            })
            .await?;
        transactions.sort_by_key(|f| (f.transaction.block_number, f.transaction.block_index));
        debug!(address, found = transactions.len(), scanned = report.blocks_scanned, "address scan done");
        Ok(AddressScan { transactions, report })
    }

    /// The transaction with `hash`, stopping at the first batch that holds it.
    pub async fn scan_for_transaction(&self, hash: &str, window: ScanWindow) -> Result<HashScan, IndexerError> {
        let mut found = None;
        let report = self
            .scan(window, |extracted| match extracted.transaction(hash) {
                Some(tx) => {
                    found = Some(FoundTransaction {
                        transaction: tx.clone(),
                        block: extracted.block.clone(),
                    });
                    ControlFlow::Break(())
                }
                None => ControlFlow::Continue(()),
            })
            .await?;
        debug!(hash, found = found.is_some(), scanned = report.blocks_scanned, "hash scan done");
        Ok(HashScan { found, report })
    }

    async fn scan<F>(&self, window: ScanWindow, mut visit: F) -> Result<ScanReport, IndexerError>
    where
        F: FnMut(&ExtractedBlock) -> ControlFlow<()>,
    {
        let latest = self.reader.latest_block_number().await?;
        let (from, to) = window.range(latest);
        let mut report = ScanReport {
            from_block: from,
            to_block: to,
            blocks_requested: to - from + 1,
            ..Default::default()
        };

        for (start, end) in window.batches(latest) {
            let numbers: Vec<u64> = (start..=end).rev().collect();
            let reads = join_all(numbers.iter().map(|&n| self.reader.block_by_number(n))).await;

            let mut done = false;
            for (number, read) in numbers.into_iter().zip(reads) {
                let decoded = match read {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => {
                        debug!(block = number, "block missing during scan");
                        report.skipped.push(number);
                        continue;
                    }
                    Err(e) => {
                        warn!(block = number, error = %e, "block read failed during scan, skipping");
                        report.skipped.push(number);
                        continue;
                    }
                };
                let extracted = match self.extractor.extract(&decoded) {
                    Ok(extracted) => extracted,
                    Err(e) => {
                        warn!(block = number, error = %e, "undecodable block during scan, skipping");
                        report.skipped.push(number);
                        continue;
                    }
                };
                report.blocks_scanned += 1;
                if !done && visit(&extracted).is_break() {
                    done = true;
                }
            }

            debug!(start, end, scanned = report.blocks_scanned, "scan batch complete");
            if done {
                break;
            }
        }

        Ok(report)
    }
}
