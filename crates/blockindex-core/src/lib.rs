//! blockindex-core — block indexing and cache-first queries for Substrate-style chains.
//!
//! # Architecture
//!
//! ```text
//! BlockFeed ──► Indexer ──► Extractor ──► StoreAdapter ──► Store (memory / SQLite)
//!                                                              ▲
//! caller ──► QueryService ─────── hit ─────────────────────────┘
//!                 └────── miss ──► BatchScanner ──► ChainReader
//! ```
//!
//! The indexer is the only writer. Queries read the store first and fall
//! back to a bounded, read-only chain scan.

pub mod adapter;
pub mod chain;
pub mod config;
pub mod error;
pub mod extractor;
pub mod format;
pub mod indexer;
pub mod query;
pub mod scanner;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use adapter::{BlockWrite, StoreAdapter};
pub use chain::{
    BlockFeed, BlockNotification, ChainReader, ChannelFeed, DecodedBlock, DecodedEvent, DecodedExtrinsic,
    DecodedHeader, EventPhase, FeedSender,
};
pub use config::{GapFillPolicy, IndexerBuilder, IndexerConfig, IndexerState, QueryConfig};
pub use error::IndexerError;
pub use extractor::{ExtractedBlock, ExtractionWarning, Extractor};
pub use format::{AddressFormat, BlockRef};
pub use indexer::{BackfillReport, BlockOutcome, Indexer, IndexerStatus, Stage};
pub use query::{AddressSearchResult, BlockInfo, QueryService, StatusReport, TransactionInfo};
pub use scanner::{BatchScanner, ScanReport, ScanWindow};
pub use store::{MemoryStore, Store};
pub use types::{
    AddressAssociation, AssociationTarget, Block, BlockConflict, Event, Source, StoreStats, Transaction, Value,
};
