//! Chain-side capabilities: decoded block shapes, the block reader, and the
//! new-block feed.
//!
//! The RPC client and its decoding live outside this crate. Implement
//! [`ChainReader`] over whatever client you use and push notifications into a
//! [`ChannelFeed`] (or implement [`BlockFeed`] directly).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::IndexerError;
use crate::types::Value;

// ─── Decoded block ────────────────────────────────────────────────────────────

/// Header fields as delivered by the decoder. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedHeader {
    pub number: u64,
    pub hash: Option<String>,
    pub parent_hash: Option<String>,
    pub state_root: Option<String>,
    pub extrinsics_root: Option<String>,
    /// Milliseconds since the Unix epoch, when the decoder provides it.
    pub timestamp: Option<i64>,
}

/// When an event was emitted relative to extrinsic execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    /// Emitted while applying the extrinsic at this block index.
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

/// A decoded runtime event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub phase: EventPhase,
    pub section: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// A decoded extrinsic together with the events it emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedExtrinsic {
    pub hash: Option<String>,
    pub section: Option<String>,
    pub method: Option<String>,
    pub signer: Option<String>,
    pub nonce: Option<u64>,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Dispatch outcome, when the decoder resolved it.
    pub success: Option<bool>,
    #[serde(default)]
    pub events: Vec<DecodedEvent>,
}

/// A full decoded block: header, extrinsics, and the block's event list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedBlock {
    pub header: DecodedHeader,
    #[serde(default)]
    pub extrinsics: Vec<DecodedExtrinsic>,
    #[serde(default)]
    pub events: Vec<DecodedEvent>,
}

// ─── ChainReader ──────────────────────────────────────────────────────────────

/// Read access to the live chain.
///
/// `Ok(None)` means the node has no such block. `Err` means the read failed
/// and may succeed later. Timeouts are the implementation's concern.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_by_number(&self, number: u64) -> Result<Option<DecodedBlock>, IndexerError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<DecodedBlock>, IndexerError>;

    async fn latest_block_number(&self) -> Result<u64, IndexerError>;
}

// ─── BlockFeed ────────────────────────────────────────────────────────────────

/// A new-block notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockNotification {
    pub number: u64,
    pub hash: String,
}

impl BlockNotification {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }
}

/// Source of new-block notifications.
///
/// Delivery is at-least-once with best-effort ordering. `None` means the feed
/// is closed and the consumer should stop.
#[async_trait]
pub trait BlockFeed: Send {
    async fn next_block(&mut self) -> Option<BlockNotification>;
}

/// A [`BlockFeed`] backed by a bounded tokio channel.
///
/// The transport task pushes into the [`FeedSender`]; the indexer drains the
/// receiving end on a single task.
pub struct ChannelFeed {
    rx: mpsc::Receiver<BlockNotification>,
}

/// Sending half of a [`ChannelFeed`].
#[derive(Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<BlockNotification>,
}

impl ChannelFeed {
    /// Create a feed whose channel holds up to `capacity` pending blocks.
    pub fn channel(capacity: usize) -> (FeedSender, ChannelFeed) {
        let (tx, rx) = mpsc::channel(capacity);
        (FeedSender { tx }, ChannelFeed { rx })
    }
}

impl FeedSender {
    /// Queue a notification. Waits while the channel is full.
    pub async fn send(&self, notification: BlockNotification) -> Result<(), IndexerError> {
        self.tx.send(notification).await.map_err(|e| IndexerError::Aborted {
            reason: format!("block feed closed before block {}", e.0.number),
        })
    }
}

#[async_trait]
impl BlockFeed for ChannelFeed {
    async fn next_block(&mut self) -> Option<BlockNotification> {
        self.rx.recv().await
    }
}
