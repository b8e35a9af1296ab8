//! Shape checks for addresses and hashes.
//!
//! These are syntactic tests only. An SS58 address is recognised by length
//! and base58 alphabet; checksum and network prefix are not verified, so a
//! random base58 string of the right length is accepted.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Accepted address shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFormat {
    /// Minimum encoded length (inclusive).
    pub min_len: usize,
    /// Maximum encoded length (inclusive).
    pub max_len: usize,
}

impl Default for AddressFormat {
    /// SS58 addresses for 32-byte account ids: 47 chars (Polkadot, prefix 0)
    /// or 48 chars (generic Substrate, prefix 42).
    fn default() -> Self {
        Self {
            min_len: 47,
            max_len: 48,
        }
    }
}

impl AddressFormat {
    /// Returns `true` if `s` is shaped like an address.
    pub fn matches(&self, s: &str) -> bool {
        (self.min_len..=self.max_len).contains(&s.len())
            && s.bytes().all(|b| BASE58_ALPHABET.contains(&b))
    }

    /// Validate a caller-supplied address.
    pub fn validate(&self, address: &str) -> Result<(), IndexerError> {
        if self.matches(address) {
            Ok(())
        } else {
            Err(IndexerError::invalid(
                "address",
                format!(
                    "expected {}-{} base58 characters, got {address:?}",
                    self.min_len, self.max_len
                ),
            ))
        }
    }
}

/// Returns `true` if `s` is a `0x`-prefixed 32-byte hex hash.
pub fn is_hash(s: &str) -> bool {
    s.len() == 66
        && s.starts_with("0x")
        && s.bytes().skip(2).all(|b| b.is_ascii_hexdigit())
}

/// Validate a caller-supplied hash and return it lowercased.
pub fn validate_hash(field: &'static str, s: &str) -> Result<String, IndexerError> {
    if is_hash(s) {
        Ok(s.to_ascii_lowercase())
    } else {
        Err(IndexerError::invalid(
            field,
            format!("expected 0x followed by 64 hex characters, got {s:?}"),
        ))
    }
}

/// A block lookup key: a height or a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(String),
}

impl BlockRef {
    /// Parse `"1234"` as a number and `"0x…"` as a hash.
    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        let s = s.trim();
        if s.starts_with("0x") {
            return validate_hash("block", s).map(Self::Hash);
        }
        s.parse::<u64>().map(Self::Number).map_err(|_| {
            IndexerError::invalid("block", format!("expected a block number or hash, got {s:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const POLKADOT: &str = "15oF4uVJwmo4TdGW7VfQxNLavjCXviqxT9S1MgbjMNHr6Sp5";

    #[test]
    fn accepts_ss58_shapes() {
        let fmt = AddressFormat::default();
        assert!(fmt.matches(ALICE));
        assert!(fmt.matches(POLKADOT));
    }

    #[test]
    fn rejects_non_addresses() {
        let fmt = AddressFormat::default();
        assert!(!fmt.matches("transfer"));
        assert!(!fmt.matches(&format!("0x{}", "ab".repeat(23)))); // leading '0' is not base58
        assert!(!fmt.matches(&ALICE.replace('G', "0"))); // '0' not base58
        assert!(!fmt.matches(&ALICE[2..])); // 46 chars
        assert!(fmt.validate("nope").unwrap_err().is_validation());
    }

    #[test]
    fn hash_checks() {
        let h = format!("0x{}", "AB".repeat(32));
        assert!(is_hash(&h));
        assert_eq!(validate_hash("hash", &h).unwrap(), h.to_ascii_lowercase());
        assert!(!is_hash("0xdead"));
        assert!(validate_hash("hash", "dead").is_err());
    }

    #[test]
    fn block_ref_parse() {
        assert_eq!(BlockRef::parse("100").unwrap(), BlockRef::Number(100));
        let h = format!("0x{}", "1".repeat(64));
        assert_eq!(BlockRef::parse(&h).unwrap(), BlockRef::Hash(h.clone()));
        assert!(BlockRef::parse("-5").unwrap_err().is_validation());
        assert!(BlockRef::parse("0x12").unwrap_err().is_validation());
    }
}
