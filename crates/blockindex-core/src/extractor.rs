//! Record extractor: turns a decoded block into persistable records.
//!
//! Pure and synchronous. Only a missing or malformed block hash fails the
//! whole block; every other defect is reported as an [`ExtractionWarning`]
//! and the remaining records are still produced.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::chain::{DecodedBlock, DecodedEvent, DecodedExtrinsic, EventPhase};
use crate::error::IndexerError;
use crate::format::{is_hash, AddressFormat};
use crate::types::{AddressAssociation, AssociationTarget, Block, Event, Transaction, Value};

const UNKNOWN: &str = "unknown";

/// A non-fatal problem found while extracting one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionWarning {
    pub block_number: u64,
    /// Block index of the offending extrinsic, if the warning concerns one.
    pub extrinsic_index: Option<u32>,
    /// Index of the offending event, if the warning concerns one.
    pub event_index: Option<u32>,
    pub message: String,
}

/// Everything extracted from one block.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedBlock {
    pub block: Block,
    /// Ordered by block index.
    pub transactions: Vec<Transaction>,
    /// Ordered by event index.
    pub events: Vec<Event>,
    /// Unique address ↔ record pairs.
    pub associations: Vec<AddressAssociation>,
    pub warnings: Vec<ExtractionWarning>,
}

impl ExtractedBlock {
    /// Transactions associated with `address`, in block order.
    pub fn transactions_for(&self, address: &str) -> Vec<&Transaction> {
        let hashes: HashSet<&str> = self
            .associations
            .iter()
            .filter(|a| a.address == address)
            .filter_map(|a| match &a.target {
                AssociationTarget::Transaction { hash } => Some(hash.as_str()),
                AssociationTarget::Event { .. } => None,
            })
            .collect();
        self.transactions
            .iter()
            .filter(|tx| hashes.contains(tx.hash.as_str()))
            .collect()
    }

    /// The transaction with `hash`, if this block contains it.
    pub fn transaction(&self, hash: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.hash == hash)
    }
}

/// Extracts records from decoded blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor {
    format: AddressFormat,
}

impl Extractor {
    pub fn new(format: AddressFormat) -> Self {
        Self { format }
    }

    pub fn address_format(&self) -> &AddressFormat {
        &self.format
    }

    /// Extract all records from `decoded`.
    pub fn extract(&self, decoded: &DecodedBlock) -> Result<ExtractedBlock, IndexerError> {
        let header = &decoded.header;
        let number = header.number;

        let hash = match header.hash.as_deref() {
            Some(h) if is_hash(h) => h.to_ascii_lowercase(),
            Some(h) => {
                return Err(IndexerError::Extraction {
                    block_number: number,
                    reason: format!("malformed block hash {h:?}"),
                })
            }
            None => {
                return Err(IndexerError::Extraction {
                    block_number: number,
                    reason: "missing block hash".into(),
                })
            }
        };

        let mut warnings = Warnings::new(number);

        let mut header_field = |name: &str, value: &Option<String>| match value {
            Some(v) => v.to_ascii_lowercase(),
            None => {
                warnings.block(format!("missing {name}"));
                String::new()
            }
        };
        let parent_hash = header_field("parent hash", &header.parent_hash);
        let state_root = header_field("state root", &header.state_root);
        let extrinsics_root = header_field("extrinsics root", &header.extrinsics_root);

        let timestamp = match header.timestamp.or_else(|| timestamp_from_inherent(decoded)) {
            Some(ts) => ts,
            None => {
                warnings.block("no timestamp in header or timestamp.set extrinsic".into());
                0
            }
        };

        let events = self.events(decoded, &hash, &mut warnings);

        let mut transactions = Vec::with_capacity(decoded.extrinsics.len());
        let mut associations = Vec::new();
        let mut seen = HashSet::new();

        for (i, ext) in decoded.extrinsics.iter().enumerate() {
            let index = i as u32;
            let Some(tx_hash) = ext.hash.as_deref().filter(|h| is_hash(h)) else {
                warnings.extrinsic(index, format!("missing or malformed hash {:?}", ext.hash));
                continue;
            };
            let tx_hash = tx_hash.to_ascii_lowercase();

            let section = name_or_unknown(&ext.section, || {
                warnings.extrinsic(index, "missing section".into())
            });
            let method = name_or_unknown(&ext.method, || {
                warnings.extrinsic(index, "missing method".into())
            });

            let own_events: Vec<&DecodedEvent> = ext
                .events
                .iter()
                .chain(
                    decoded
                        .events
                        .iter()
                        .filter(|e| e.phase == EventPhase::ApplyExtrinsic(index)),
                )
                .collect();

            let success = ext.success.unwrap_or_else(|| !own_events.iter().any(|e| is_failure(e)));

            for address in self.transaction_addresses(ext, &own_events) {
                let assoc = AddressAssociation::transaction(address, number, tx_hash.clone());
                if seen.insert(assoc.clone()) {
                    associations.push(assoc);
                }
            }

            transactions.push(Transaction {
                hash: tx_hash,
                block_number: number,
                block_index: index,
                section,
                method,
                signer: ext.signer.clone(),
                nonce: ext.nonce,
                args: ext.args.clone(),
                success,
            });
        }

        for event in &events {
            let mut addresses = Vec::new();
            self.collect_addresses(&event.data, &mut addresses);
            for address in addresses {
                let assoc = AddressAssociation::event(address, number, event.index);
                if seen.insert(assoc.clone()) {
                    associations.push(assoc);
                }
            }
        }

        let block = Block {
            number,
            hash,
            parent_hash,
            state_root,
            extrinsics_root,
            timestamp,
            transaction_count: transactions.len() as u32,
            event_count: events.len() as u32,
        };

        Ok(ExtractedBlock {
            block,
            transactions,
            events,
            associations,
            warnings: warnings.into_inner(),
        })
    }

    fn events(&self, decoded: &DecodedBlock, block_hash: &str, warnings: &mut Warnings) -> Vec<Event> {
        let extrinsic_count = decoded.extrinsics.len();
        decoded
            .events
            .iter()
            .enumerate()
            .map(|(i, ev)| {
                let index = i as u32;
                let extrinsic_index = match ev.phase {
                    EventPhase::ApplyExtrinsic(n) if (n as usize) < extrinsic_count => Some(n),
                    EventPhase::ApplyExtrinsic(n) => {
                        warnings.event(
                            index,
                            format!("phase references extrinsic {n} of {extrinsic_count}"),
                        );
                        None
                    }
                    EventPhase::Finalization | EventPhase::Initialization => None,
                };
                let section = name_or_unknown(&ev.section, || {
                    warnings.event(index, "missing section".into())
                });
                let method = name_or_unknown(&ev.method, || {
                    warnings.event(index, "missing method".into())
                });
                Event {
                    block_number: decoded.header.number,
                    block_hash: block_hash.to_string(),
                    index,
                    section,
                    method,
                    data: ev.data.clone(),
                    extrinsic_index,
                }
            })
            .collect()
    }

    /// Signer first, then address-shaped strings from args and event data.
    fn transaction_addresses(&self, ext: &DecodedExtrinsic, events: &[&DecodedEvent]) -> Vec<String> {
        let mut found = Vec::new();
        if let Some(signer) = &ext.signer {
            found.push(signer.clone());
        }
        self.collect_addresses(&ext.args, &mut found);
        for event in events {
            self.collect_addresses(&event.data, &mut found);
        }
        let mut unique = HashSet::new();
        found.retain(|a| unique.insert(a.clone()));
        found
    }

    fn collect_addresses(&self, values: &[Value], out: &mut Vec<String>) {
        for value in values {
            value.for_each_str(&mut |s: &str| {
                if self.format.matches(s) {
                    out.push(s.to_string());
                }
            });
        }
    }
}

fn name_or_unknown(value: &Option<String>, on_missing: impl FnOnce()) -> String {
    match value {
        Some(v) if !v.is_empty() => v.clone(),
        _ => {
            on_missing();
            UNKNOWN.to_string()
        }
    }
}

fn is_failure(event: &DecodedEvent) -> bool {
    event.section.as_deref() == Some("system") && event.method.as_deref() == Some("ExtrinsicFailed")
}

/// The `now` argument of the block's `timestamp.set` inherent.
fn timestamp_from_inherent(decoded: &DecodedBlock) -> Option<i64> {
    decoded
        .extrinsics
        .iter()
        .find(|e| e.section.as_deref() == Some("timestamp") && e.method.as_deref() == Some("set"))
        .and_then(|e| e.args.first())
        .and_then(|arg| match arg {
            Value::Number(n) | Value::Text(n) => n.parse().ok(),
            _ => None,
        })
}

struct Warnings {
    block_number: u64,
    items: Vec<ExtractionWarning>,
}

impl Warnings {
    fn new(block_number: u64) -> Self {
        Self {
            block_number,
            items: Vec::new(),
        }
    }

    fn push(&mut self, extrinsic_index: Option<u32>, event_index: Option<u32>, message: String) {
        self.items.push(ExtractionWarning {
            block_number: self.block_number,
            extrinsic_index,
            event_index,
            message,
        });
    }

    fn block(&mut self, message: String) {
        self.push(None, None, message);
    }

    fn extrinsic(&mut self, index: u32, message: String) {
        self.push(Some(index), None, message);
    }

    fn event(&mut self, index: u32, message: String) {
        self.push(None, Some(index), message);
    }

    fn into_inner(self) -> Vec<ExtractionWarning> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::DecodedHeader;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";
    const CHARLIE: &str = "5FLSigC9HGRKVhB9FiEo4Y3koPsNmBmLJbpXg2mp1hXcS59Y";

    fn h(byte: u8) -> String {
        format!("0x{}", format!("{byte:02x}").repeat(32))
    }

    fn event(phase: EventPhase, section: &str, method: &str, data: Vec<Value>) -> DecodedEvent {
        DecodedEvent {
            phase,
            section: Some(section.into()),
            method: Some(method.into()),
            data,
        }
    }

    fn transfer_block() -> DecodedBlock {
        DecodedBlock {
            header: DecodedHeader {
                number: 100,
                hash: Some(h(0xaa)),
                parent_hash: Some(h(0x99)),
                state_root: Some(h(0x01)),
                extrinsics_root: Some(h(0x02)),
                timestamp: None,
            },
            extrinsics: vec![
                DecodedExtrinsic {
                    hash: Some(h(0x10)),
                    section: Some("timestamp".into()),
                    method: Some("set".into()),
                    args: vec![Value::number(1_700_000_000_000)],
                    ..Default::default()
                },
                DecodedExtrinsic {
                    hash: Some(h(0x11)),
                    section: Some("balances".into()),
                    method: Some("transfer".into()),
                    signer: Some(ALICE.into()),
                    nonce: Some(4),
                    args: vec![Value::text(BOB), Value::number(10)],
                    ..Default::default()
                },
            ],
            events: vec![
                event(EventPhase::ApplyExtrinsic(0), "system", "ExtrinsicSuccess", vec![]),
                event(
                    EventPhase::ApplyExtrinsic(1),
                    "balances",
                    "Transfer",
                    vec![Value::text(ALICE), Value::text(BOB), Value::number(10)],
                ),
                event(EventPhase::ApplyExtrinsic(1), "system", "ExtrinsicSuccess", vec![]),
                event(EventPhase::Finalization, "treasury", "Deposit", vec![Value::text(CHARLIE)]),
            ],
        }
    }

    #[test]
    fn extracts_block_transactions_and_events() {
        let out = Extractor::default().extract(&transfer_block()).unwrap();

        assert_eq!(out.block.number, 100);
        assert_eq!(out.block.hash, h(0xaa));
        assert_eq!(out.block.timestamp, 1_700_000_000_000);
        assert_eq!(out.block.transaction_count, 2);
        assert_eq!(out.block.event_count, 4);
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);

        let transfer = &out.transactions[1];
        assert_eq!(transfer.block_index, 1);
        assert_eq!(transfer.section, "balances");
        assert_eq!(transfer.signer.as_deref(), Some(ALICE));
        assert!(transfer.success);

        assert_eq!(out.events[1].extrinsic_index, Some(1));
        assert_eq!(out.events[3].extrinsic_index, None);
    }

    #[test]
    fn signer_and_argument_addresses_are_associated_once() {
        let out = Extractor::default().extract(&transfer_block()).unwrap();
        let tx_hash = h(0x11);

        let alice_tx: Vec<_> = out
            .associations
            .iter()
            .filter(|a| a.address == ALICE && a.target == AssociationTarget::Transaction { hash: tx_hash.clone() })
            .collect();
        // ALICE is both signer and in the Transfer event data.
        assert_eq!(alice_tx.len(), 1);

        assert_eq!(out.transactions_for(BOB).len(), 1);
        assert_eq!(out.transactions_for(BOB)[0].hash, tx_hash);
        // Block-level event addresses link to the event, not a transaction.
        assert!(out.transactions_for(CHARLIE).is_empty());
        assert!(out
            .associations
            .contains(&AddressAssociation::event(CHARLIE, 100, 3)));
    }

    #[test]
    fn missing_block_hash_fails() {
        let mut block = transfer_block();
        block.header.hash = None;
        let err = Extractor::default().extract(&block).unwrap_err();
        assert!(matches!(err, IndexerError::Extraction { block_number: 100, .. }));

        block.header.hash = Some("0x1234".into());
        assert!(Extractor::default().extract(&block).is_err());
    }

    #[test]
    fn malformed_extrinsic_is_skipped_with_warning() {
        let mut block = transfer_block();
        block.extrinsics[0].hash = None;
        let out = Extractor::default().extract(&block).unwrap();

        assert_eq!(out.transactions.len(), 1);
        assert_eq!(out.block.transaction_count, 1);
        assert_eq!(out.transactions[0].block_index, 1);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].extrinsic_index, Some(0));
    }

    #[test]
    fn failure_is_inferred_from_events() {
        let mut block = transfer_block();
        block.events[2] = event(EventPhase::ApplyExtrinsic(1), "system", "ExtrinsicFailed", vec![]);
        let out = Extractor::default().extract(&block).unwrap();
        assert!(!out.transactions[1].success);
        assert!(out.transactions[0].success);
    }

    #[test]
    fn out_of_range_phase_is_unlinked() {
        let mut block = transfer_block();
        block.events.push(event(EventPhase::ApplyExtrinsic(9), "system", "Remarked", vec![]));
        let out = Extractor::default().extract(&block).unwrap();
        assert_eq!(out.events[4].extrinsic_index, None);
        assert_eq!(out.warnings[0].event_index, Some(4));
    }

    #[test]
    fn missing_names_default_to_unknown() {
        let mut block = transfer_block();
        block.extrinsics[1].method = None;
        let out = Extractor::default().extract(&block).unwrap();
        assert_eq!(out.transactions[1].method, "unknown");
        assert_eq!(out.warnings.len(), 1);
    }
}
