//! Persistable records produced by the extractor and served by queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── Value ────────────────────────────────────────────────────────────────────

/// An opaque argument or event payload value.
///
/// Chain payloads are loosely typed; this closed set covers what decoders emit
/// and `Raw` carries anything else through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    /// Decimal text, so `u128` balances survive without loss.
    Number(String),
    Text(String),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Raw(serde_json::Value),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn number(n: u128) -> Self {
        Self::Number(n.to_string())
    }

    /// Returns the value as a string slice if it is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Visit every string reachable from this value (map keys included).
    pub fn for_each_str<'a, F: FnMut(&'a str)>(&'a self, f: &mut F) {
        match self {
            Self::Text(s) => f(s),
            Self::Seq(items) => {
                for v in items {
                    v.for_each_str(f);
                }
            }
            Self::Map(entries) => {
                for (k, v) in entries {
                    f(k);
                    v.for_each_str(f);
                }
            }
            Self::Raw(json) => json_strings(json, f),
            Self::Null | Self::Bool(_) | Self::Number(_) => {}
        }
    }
}

fn json_strings<'a, F: FnMut(&'a str)>(json: &'a serde_json::Value, f: &mut F) {
    match json {
        serde_json::Value::String(s) => f(s),
        serde_json::Value::Array(items) => {
            for v in items {
                json_strings(v, f);
            }
        }
        serde_json::Value::Object(entries) => {
            for (k, v) in entries {
                f(k);
                json_strings(v, f);
            }
        }
        _ => {}
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.to_string()),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::Seq(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => {
                Self::Map(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A stored block header plus record counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    /// Block hash (`0x` + 64 hex chars).
    pub hash: String,
    pub parent_hash: String,
    pub state_root: String,
    pub extrinsics_root: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Number of transaction records extracted for this block.
    pub transaction_count: u32,
    /// Number of event records extracted for this block.
    pub event_count: u32,
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A stored extrinsic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    /// Position within the block.
    pub block_index: u32,
    /// Pallet name, e.g. `"balances"`.
    pub section: String,
    /// Call name, e.g. `"transfer"`.
    pub method: String,
    /// `None` for unsigned extrinsics (inherents).
    pub signer: Option<String>,
    pub nonce: Option<u64>,
    pub args: Vec<Value>,
    pub success: bool,
}

// ─── Event ────────────────────────────────────────────────────────────────────

/// A stored runtime event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub block_number: u64,
    pub block_hash: String,
    /// Position within the block's event list.
    pub index: u32,
    pub section: String,
    pub method: String,
    pub data: Vec<Value>,
    /// Block index of the extrinsic that emitted this event, if any.
    pub extrinsic_index: Option<u32>,
}

// ─── AddressAssociation ───────────────────────────────────────────────────────

/// What an address association points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssociationTarget {
    Transaction { hash: String },
    Event { index: u32 },
}

/// Links an address to a transaction or event that references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressAssociation {
    pub address: String,
    pub block_number: u64,
    pub target: AssociationTarget,
}

impl AddressAssociation {
    pub fn transaction(address: impl Into<String>, block_number: u64, hash: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            block_number,
            target: AssociationTarget::Transaction { hash: hash.into() },
        }
    }

    pub fn event(address: impl Into<String>, block_number: u64, index: u32) -> Self {
        Self {
            address: address.into(),
            block_number,
            target: AssociationTarget::Event { index },
        }
    }
}

// ─── BlockConflict ────────────────────────────────────────────────────────────

/// A block number that reappeared with a different hash.
///
/// The stored block is kept; both hashes are recorded for operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConflict {
    pub block_number: u64,
    pub stored_hash: String,
    pub incoming_hash: String,
    /// Unix timestamp (milliseconds) when the conflict was seen.
    pub detected_at: i64,
}

// ─── StoreStats ───────────────────────────────────────────────────────────────

/// Row counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub blocks: u64,
    /// Blocks whose child records were all written and progress recorded.
    pub complete_blocks: u64,
    pub transactions: u64,
    pub events: u64,
    pub associations: u64,
    pub conflicts: u64,
}

// ─── Source ───────────────────────────────────────────────────────────────────

/// Where a query answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Served from the local store.
    Cache,
    /// Read live from the chain.
    Chain,
}
