//! The indexer. Consumes the block feed and persists every delivered block.
//!
//! Each block moves through `Received → Extracted → Persisted → Progressed`.
//! Progress is advanced only after every write for the block succeeded, so a
//! block that fails at any stage is simply re-run when the feed delivers it
//! again. A failing block never stops the loop.
//!
//! Ordering and duplicates are tolerated: a block already complete under the
//! same hash is skipped, and every write ignores rows that already exist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapter::StoreAdapter;
use crate::chain::{BlockFeed, BlockNotification, ChainReader, DecodedBlock};
use crate::config::{GapFillPolicy, IndexerConfig, IndexerState};
use crate::error::IndexerError;
use crate::extractor::{ExtractedBlock, Extractor};
use crate::format::is_hash;
use crate::store::Store;

/// Lifecycle stage of a block inside the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Extracted,
    Persisted,
    Progressed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Extracted => write!(f, "extracted"),
            Self::Persisted => write!(f, "persisted"),
            Self::Progressed => write!(f, "progressed"),
        }
    }
}

/// What happened to one delivered block.
#[derive(Debug)]
pub enum BlockOutcome {
    /// All records written and progress recorded.
    Indexed { number: u64, warnings: usize },
    /// Already complete under the same hash.
    Skipped { number: u64 },
    /// `stage` is the last stage the block completed before `error`.
    Failed {
        number: u64,
        stage: Stage,
        error: IndexerError,
    },
}

impl BlockOutcome {
    pub fn number(&self) -> u64 {
        match self {
            Self::Indexed { number, .. } | Self::Skipped { number } | Self::Failed { number, .. } => *number,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }
}

/// Result of [`Indexer::backfill`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub indexed: u64,
    pub skipped: u64,
    pub failed: Vec<u64>,
}

/// Live indexer status, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub state: IndexerState,
    pub last_indexed_block: Option<u64>,
    /// Blocks fully indexed in the store.
    pub blocks_indexed_count: u64,
    /// `true` while a block is being processed.
    pub is_indexing: bool,
}

impl Default for IndexerStatus {
    fn default() -> Self {
        Self {
            state: IndexerState::Idle,
            last_indexed_block: None,
            blocks_indexed_count: 0,
            is_indexing: false,
        }
    }
}

/// Feed-driven block indexer.
pub struct Indexer {
    config: IndexerConfig,
    reader: Arc<dyn ChainReader>,
    adapter: StoreAdapter,
    extractor: Extractor,
    status: watch::Sender<IndexerStatus>,
    running: AtomicBool,
}

impl Indexer {
    pub fn new(config: IndexerConfig, reader: Arc<dyn ChainReader>, store: Arc<dyn Store>) -> Self {
        let (status, _) = watch::channel(IndexerStatus::default());
        Self {
            extractor: Extractor::new(config.address_format),
            adapter: StoreAdapter::new(store),
            reader,
            status,
            running: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &StoreAdapter {
        &self.adapter
    }

    /// Receive status updates as blocks are processed.
    pub fn subscribe(&self) -> watch::Receiver<IndexerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> IndexerStatus {
        self.status.borrow().clone()
    }

    /// Consume `feed` until it closes.
    ///
    /// Only one `run` may be active per indexer. Block failures are logged and
    /// reported on the status channel; they never end the loop.
    pub async fn run<F: BlockFeed>(&self, mut feed: F) -> Result<(), IndexerError> {
        let _writer = self.claim()?;

        let result = self.consume(&mut feed).await;

        self.status.send_modify(|s| {
            s.state = IndexerState::Stopped;
            s.is_indexing = false;
        });
        info!(indexer = %self.config.id, "block feed closed, indexer stopped");
        result
    }

    async fn consume<F: BlockFeed>(&self, feed: &mut F) -> Result<(), IndexerError> {
        let last = self.adapter.get_last_indexed_block().await?;
        let complete = self.adapter.stats().await?.complete_blocks;
        self.status.send_modify(|s| {
            s.state = IndexerState::Running;
            s.last_indexed_block = last;
            s.blocks_indexed_count = complete;
        });
        info!(
            indexer = %self.config.id,
            chain = %self.config.chain,
            last_indexed = ?last,
            "indexer started"
        );

        while let Some(notification) = feed.next_block().await {
            self.fill_gap(notification.number).await;
            self.process_one(&notification).await;
        }
        Ok(())
    }

    /// Index one delivered block outside of [`run`](Self::run).
    ///
    /// Fails at `Received` with `Aborted` while a feed is being consumed.
    pub async fn process(&self, notification: &BlockNotification) -> BlockOutcome {
        let _writer = match self.claim() {
            Ok(guard) => guard,
            Err(error) => {
                return BlockOutcome::Failed {
                    number: notification.number,
                    stage: Stage::Received,
                    error,
                }
            }
        };
        self.process_one(notification).await
    }

    async fn process_one(&self, notification: &BlockNotification) -> BlockOutcome {
        self.status.send_modify(|s| s.is_indexing = true);
        let outcome = self.process_notification(notification).await;
        self.record(&outcome);
        outcome
    }

    /// Index every block in `from..=to` by number, in ascending order.
    ///
    /// Rejected with `Aborted` while a feed is being consumed.
    pub async fn backfill(&self, from: u64, to: u64) -> Result<BackfillReport, IndexerError> {
        if from > to {
            return Err(IndexerError::invalid(
                "from",
                format!("backfill start {from} is after end {to}"),
            ));
        }
        let _writer = self.claim()?;
        self.backfill_range(from, to).await
    }

    async fn backfill_range(&self, from: u64, to: u64) -> Result<BackfillReport, IndexerError> {
        info!(from, to, "starting backfill");

        let mut report = BackfillReport::default();
        for number in from..=to {
            self.status.send_modify(|s| s.is_indexing = true);
            let outcome = self.backfill_block(number).await;
            self.record(&outcome);
            match outcome {
                BlockOutcome::Indexed { .. } => report.indexed += 1,
                BlockOutcome::Skipped { .. } => report.skipped += 1,
                BlockOutcome::Failed { number, .. } => report.failed.push(number),
            }
        }

        info!(from, to, indexed = report.indexed, failed = report.failed.len(), "backfill complete");
        Ok(report)
    }

    /// Become the only writer until the guard drops.
    fn claim(&self) -> Result<WriterGuard<'_>, IndexerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(IndexerError::Aborted {
                reason: "indexer is already writing".into(),
            });
        }
        Ok(WriterGuard(&self.running))
    }

    async fn fill_gap(&self, incoming: u64) {
        let GapFillPolicy::Backfill { max_gap } = self.config.gap_fill else {
            return;
        };
        let contiguous = match self.adapter.highest_contiguous_block().await {
            Ok(Some(top)) => top,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "could not read contiguous progress, skipping gap fill");
                return;
            }
        };
        if incoming <= contiguous + 1 {
            return;
        }
        let gap = incoming - contiguous - 1;
        if gap > max_gap {
            warn!(contiguous, incoming, gap, max_gap, "gap too large to backfill");
            return;
        }
        if let Err(e) = self.backfill_range(contiguous + 1, incoming - 1).await {
            warn!(error = %e, "gap backfill failed");
        }
    }

    async fn process_notification(&self, notification: &BlockNotification) -> BlockOutcome {
        let number = notification.number;
        let failed = |stage, error| BlockOutcome::Failed { number, stage, error };

        if !is_hash(&notification.hash) {
            return failed(
                Stage::Received,
                IndexerError::invalid("hash", format!("malformed block hash {:?}", notification.hash)),
            );
        }
        let hash = notification.hash.to_ascii_lowercase();

        match self.already_indexed(number, &hash).await {
            Ok(true) => return BlockOutcome::Skipped { number },
            Ok(false) => {}
            Err(e) => return failed(Stage::Received, e),
        }

        let decoded = match self.reader.block_by_hash(&hash).await {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return failed(Stage::Received, IndexerError::Rpc(format!("block {hash} not found"))),
            Err(e) => return failed(Stage::Received, e),
        };

        self.ingest(number, &decoded).await
    }

    async fn backfill_block(&self, number: u64) -> BlockOutcome {
        match self.adapter.is_block_complete(number).await {
            Ok(true) => return BlockOutcome::Skipped { number },
            Ok(false) => {}
            Err(e) => {
                return BlockOutcome::Failed {
                    number,
                    stage: Stage::Received,
                    error: e,
                }
            }
        }
        match self.reader.block_by_number(number).await {
            Ok(Some(decoded)) => self.ingest(number, &decoded).await,
            Ok(None) => BlockOutcome::Failed {
                number,
                stage: Stage::Received,
                error: IndexerError::Rpc(format!("block {number} not found")),
            },
            Err(e) => BlockOutcome::Failed {
                number,
                stage: Stage::Received,
                error: e,
            },
        }
    }

    async fn already_indexed(&self, number: u64, hash: &str) -> Result<bool, IndexerError> {
        match self.adapter.get_block_by_number(number).await? {
            Some(block) if block.hash == hash => self.adapter.is_block_complete(number).await,
            _ => Ok(false),
        }
    }

    /// Extract, persist, and advance progress for a fetched block.
    async fn ingest(&self, number: u64, decoded: &DecodedBlock) -> BlockOutcome {
        let failed = |stage, error| BlockOutcome::Failed { number, stage, error };

        if decoded.header.number != number {
            return failed(
                Stage::Received,
                IndexerError::BlockMismatch {
                    expected: number,
                    found: decoded.header.number,
                },
            );
        }

        let extracted = match self.extractor.extract(decoded) {
            Ok(extracted) => extracted,
            Err(e) => return failed(Stage::Received, e),
        };
        for w in &extracted.warnings {
            warn!(
                block = number,
                extrinsic = ?w.extrinsic_index,
                event = ?w.event_index,
                "extraction warning: {}",
                w.message
            );
        }

        if let Err(e) = self.persist(number, &extracted).await {
            return failed(Stage::Extracted, e);
        }
        if let Err(e) = self.adapter.advance_progress(number).await {
            return failed(Stage::Persisted, e);
        }

        BlockOutcome::Indexed {
            number,
            warnings: extracted.warnings.len(),
        }
    }

    async fn persist(&self, number: u64, extracted: &ExtractedBlock) -> Result<(), IndexerError> {
        self.adapter.upsert_block(&extracted.block).await?;
        self.adapter.upsert_transactions(number, &extracted.transactions).await?;
        self.adapter.upsert_events(number, &extracted.events).await?;
        self.adapter
            .upsert_address_associations(number, &extracted.associations)
            .await?;
        debug!(
            block = number,
            transactions = extracted.transactions.len(),
            events = extracted.events.len(),
            associations = extracted.associations.len(),
            "block persisted"
        );
        Ok(())
    }

    fn record(&self, outcome: &BlockOutcome) {
        match outcome {
            BlockOutcome::Indexed { number, warnings } => {
                info!(block = number, warnings, "block indexed");
                let number = *number;
                self.status.send_modify(|s| {
                    s.last_indexed_block = Some(s.last_indexed_block.map_or(number, |l| l.max(number)));
                    s.blocks_indexed_count += 1;
                    s.is_indexing = false;
                });
            }
            BlockOutcome::Skipped { number } => {
                debug!(block = number, "block already indexed, skipping");
                self.status.send_modify(|s| s.is_indexing = false);
            }
            BlockOutcome::Failed { number, stage, error } => {
                if error.is_transient() {
                    warn!(block = number, %stage, error = %error, "block failed, will retry on redelivery");
                } else {
                    error!(block = number, %stage, error = %error, "block failed");
                }
                self.status.send_modify(|s| s.is_indexing = false);
            }
        }
    }
}

/// Releases the single-writer flag on drop, including when a future is cancelled.
struct WriterGuard<'a>(&'a AtomicBool);

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
