//! Indexer and query configuration, plus a fluent builder.
//!
//! # Example
//!
//! ```rust
//! use blockindex_core::config::{GapFillPolicy, IndexerBuilder};
//!
//! let config = IndexerBuilder::new()
//!     .chain("polkadot")
//!     .gap_fill(GapFillPolicy::Backfill { max_gap: 16 })
//!     .max_blocks_to_scan(5_000)
//!     .default_window(200, 20)
//!     .build_config();
//! assert_eq!(config.query.max_blocks_to_scan, 5_000);
//! ```

use serde::{Deserialize, Serialize};

use crate::format::AddressFormat;

/// What the indexer does when a delivered block skips numbers above progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum GapFillPolicy {
    /// Index only what the feed delivers.
    Disabled,
    /// Read and index the missing numbers first, if the gap is at most `max_gap`.
    Backfill { max_gap: u64 },
}

impl Default for GapFillPolicy {
    fn default() -> Self {
        Self::Disabled
    }
}

/// Limits and defaults for fallback chain scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Hard cap on `blocks_to_scan`.
    pub max_blocks_to_scan: u64,
    /// Hard cap on `batch_size` (reads in flight per batch).
    pub max_batch_size: u64,
    /// Window used when a caller does not supply one.
    pub default_blocks_to_scan: u64,
    pub default_batch_size: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_blocks_to_scan: 10_000,
            max_batch_size: 100,
            default_blocks_to_scan: 100,
            default_batch_size: 10,
        }
    }
}

/// Configuration for an indexer instance and its query service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used in logs).
    pub id: String,
    /// Chain being indexed (e.g. `"polkadot"`).
    pub chain: String,
    #[serde(default)]
    pub address_format: AddressFormat,
    #[serde(default)]
    pub gap_fill: GapFillPolicy,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            chain: "polkadot".into(),
            address_format: AddressFormat::default(),
            gap_fill: GapFillPolicy::default(),
            query: QueryConfig::default(),
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Consuming the block feed.
    Running,
    /// Feed closed; no more blocks will be processed.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Fluent builder for [`IndexerConfig`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Accepted address length range (encoded characters, inclusive).
    pub fn address_len(mut self, min_len: usize, max_len: usize) -> Self {
        self.config.address_format = AddressFormat { min_len, max_len };
        self
    }

    pub fn gap_fill(mut self, policy: GapFillPolicy) -> Self {
        self.config.gap_fill = policy;
        self
    }

    pub fn max_blocks_to_scan(mut self, max: u64) -> Self {
        self.config.query.max_blocks_to_scan = max;
        self
    }

    pub fn max_batch_size(mut self, max: u64) -> Self {
        self.config.query.max_batch_size = max;
        self
    }

    /// Window used by lookups that do not pass one explicitly.
    pub fn default_window(mut self, blocks_to_scan: u64, batch_size: u64) -> Self {
        self.config.query.default_blocks_to_scan = blocks_to_scan;
        self.config.query.default_batch_size = batch_size;
        self
    }

    pub fn build_config(self) -> IndexerConfig {
        self.config
    }
}
