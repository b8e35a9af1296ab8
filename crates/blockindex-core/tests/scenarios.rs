//! End-to-end scenarios: feed → indexer → store → query service.
//!
//! Every test runs against the in-memory store and a scripted chain that
//! counts reads, so cache hits can be told apart from chain fallbacks.

use std::sync::Arc;

use blockindex_core::chain::{BlockNotification, ChannelFeed, DecodedExtrinsic};
use blockindex_core::config::IndexerBuilder;
use blockindex_core::indexer::{BlockOutcome, Indexer};
use blockindex_core::query::{AddressSearchResult, QueryService};
use blockindex_core::scanner::{BatchScanner, ScanWindow};
use blockindex_core::store::{MemoryStore, Store};
use blockindex_core::testing::{block_hash, empty_block, transfer_block, tx_hash, FailPoint, FaultyStore, MockChain};
use blockindex_core::types::{Source, StoreStats};
use blockindex_core::{Extractor, IndexerConfig};

const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";
const CHARLIE: &str = "5FLSigC9HGRKVhB9FiEo4Y3koPsNmBmLJbpXg2mp1hXcS59Y";

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> IndexerConfig {
    IndexerBuilder::new().id("scenarios").build_config()
}

fn note(number: u64) -> BlockNotification {
    BlockNotification::new(number, block_hash(number))
}

struct Harness {
    chain: Arc<MockChain>,
    store: Arc<dyn Store>,
    indexer: Indexer,
    query: QueryService,
}

fn harness(chain: MockChain, store: Arc<dyn Store>) -> Harness {
    let chain = Arc::new(chain);
    let indexer = Indexer::new(config(), chain.clone(), store.clone());
    let query = QueryService::new(&config(), chain.clone(), store.clone()).with_status(indexer.subscribe());
    Harness {
        chain,
        store,
        indexer,
        query,
    }
}

async fn index_once(chain: MockChain, number: u64) -> StoreStats {
    let h = harness(chain, Arc::new(MemoryStore::new()));
    assert!(h.indexer.process(&note(number)).await.is_indexed());
    h.store.stats().await.unwrap()
}

// ─── Ingestion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn block_100_transfer_is_indexed_for_both_parties() {
    let h = harness(
        MockChain::with_blocks([transfer_block(100, ALICE, BOB)]),
        Arc::new(MemoryStore::new()),
    );
    assert!(h.indexer.process(&note(100)).await.is_indexed());

    let adapter = h.indexer.adapter();
    for address in [ALICE, BOB] {
        let txs = adapter.get_address_transactions(address).await.unwrap();
        assert_eq!(txs.len(), 1, "{address}");
        assert_eq!(txs[0].hash, tx_hash(100, 1));
        assert_eq!(txs[0].block_number, 100);
        assert_eq!(txs[0].section, "balances");
        assert_eq!(txs[0].method, "transfer");
    }
    assert_eq!(adapter.get_last_indexed_block().await.unwrap(), Some(100));
}

#[tokio::test]
async fn signer_in_event_data_is_associated_once() {
    let stats = index_once(MockChain::with_blocks([transfer_block(100, ALICE, BOB)]), 100).await;
    // ALICE and BOB on the transfer, ALICE and BOB on its Transfer event.
    assert_eq!(stats.associations, 4);
    assert_eq!(stats.transactions, 2);
    assert_eq!(stats.events, 4);
}

#[tokio::test]
async fn double_ingest_of_block_77_matches_single_ingest() {
    let single = index_once(MockChain::with_blocks([transfer_block(77, ALICE, BOB)]), 77).await;

    let h = harness(
        MockChain::with_blocks([transfer_block(77, ALICE, BOB)]),
        Arc::new(MemoryStore::new()),
    );
    assert!(h.indexer.process(&note(77)).await.is_indexed());
    assert!(matches!(h.indexer.process(&note(77)).await, BlockOutcome::Skipped { number: 77 }));

    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats, single);
    assert_eq!(stats.blocks, 1);
    assert_eq!(h.indexer.adapter().get_last_indexed_block().await.unwrap(), Some(77));
}

#[tokio::test]
async fn rewriting_an_incomplete_block_adds_no_rows() {
    let single = index_once(MockChain::with_blocks([transfer_block(30, ALICE, BOB)]), 30).await;

    let store = Arc::new(FaultyStore::new());
    store.fail_once(FailPoint::Progress);
    let h = harness(MockChain::with_blocks([transfer_block(30, ALICE, BOB)]), store.clone());

    assert!(!h.indexer.process(&note(30)).await.is_indexed());
    assert!(h.indexer.process(&note(30)).await.is_indexed());
    assert_eq!(store.stats().await.unwrap(), single);
}

#[tokio::test]
async fn failed_event_write_holds_progress_until_redelivery() {
    let store = Arc::new(FaultyStore::new());
    let h = harness(
        MockChain::with_blocks([transfer_block(11, ALICE, BOB), transfer_block(12, ALICE, CHARLIE)]),
        store.clone(),
    );
    assert!(h.indexer.process(&note(11)).await.is_indexed());

    store.fail_once(FailPoint::Events);
    assert!(!h.indexer.process(&note(12)).await.is_indexed());

    let adapter = h.indexer.adapter();
    assert!(adapter.block_exists(12).await.unwrap());
    assert!(!adapter.is_block_complete(12).await.unwrap());
    assert_eq!(adapter.get_last_indexed_block().await.unwrap(), Some(11));

    assert!(h.indexer.process(&note(12)).await.is_indexed());
    assert_eq!(adapter.get_last_indexed_block().await.unwrap(), Some(12));
    assert_eq!(adapter.get_block_events(12).await.unwrap().len(), 4);
    assert_eq!(adapter.get_address_transactions(CHARLIE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn half_written_block_below_progress_is_read_from_chain() {
    let store = Arc::new(FaultyStore::new());
    let h = harness(
        MockChain::with_blocks([transfer_block(50, ALICE, BOB), transfer_block(60, ALICE, CHARLIE)]),
        store.clone(),
    );
    assert!(h.indexer.process(&note(60)).await.is_indexed());
    store.fail_once(FailPoint::Events);
    assert!(!h.indexer.process(&note(50)).await.is_indexed());

    let adapter = h.indexer.adapter();
    assert_eq!(adapter.get_last_indexed_block().await.unwrap(), Some(60));
    assert_eq!(adapter.get_block_transactions(50).await.unwrap().len(), 2);
    assert!(adapter.get_block_events(50).await.unwrap().is_empty());

    let block = h.query.get_block("50").await.unwrap().unwrap();
    assert_eq!(block.source, Source::Chain);
    assert_eq!(block.transactions.len(), 2);
    assert_eq!(block.events.len(), 4);
    let by_hash = h.query.get_block(&block_hash(50)).await.unwrap().unwrap();
    assert_eq!(by_hash.source, Source::Chain);

    let tx = h.query.get_transaction(&tx_hash(50, 1)).await.unwrap().unwrap();
    assert_eq!(tx.source, Source::Chain);
    assert_eq!(tx.block.unwrap().hash, block_hash(50));

    let rows = |found: AddressSearchResult| -> Vec<(u64, Source)> {
        found
            .transactions
            .iter()
            .map(|t| (t.transaction.block_number, t.source))
            .collect()
    };
    let found = h.query.search(ALICE, 10, 5).await.unwrap();
    assert_eq!(found.source, Source::Cache);
    assert_eq!(rows(found), [(60, Source::Cache)]);

    // All rows written, completion mark missing.
    store.fail_once(FailPoint::Progress);
    assert!(!h.indexer.process(&note(50)).await.is_indexed());
    let found = h.query.search(ALICE, 10, 5).await.unwrap();
    assert_eq!(found.source, Source::Cache);
    assert_eq!(rows(found), [(50, Source::Chain), (60, Source::Cache)]);

    assert!(h.indexer.process(&note(50)).await.is_indexed());
    let reads = h.chain.calls();
    let block = h.query.get_block("50").await.unwrap().unwrap();
    assert_eq!(block.source, Source::Cache);
    assert_eq!(block.events.len(), 4);
    assert_eq!(h.chain.calls(), reads);
}

#[tokio::test]
async fn out_of_order_delivery_tracks_both_progress_views() {
    let h = harness(
        MockChain::with_blocks((1..=5).map(empty_block)),
        Arc::new(MemoryStore::new()),
    );
    for n in [1, 2, 5, 3] {
        assert!(h.indexer.process(&note(n)).await.is_indexed());
    }

    let status = h.query.get_indexer_status().await.unwrap();
    assert_eq!(status.last_indexed_block, Some(5));
    assert_eq!(status.highest_contiguous_block, Some(3));
    assert_eq!(status.blocks_indexed_count, 4);
}

#[tokio::test]
async fn feed_driven_indexer_runs_beside_queries() {
    let h = harness(
        MockChain::with_blocks((1..=3).map(|n| transfer_block(n, ALICE, BOB))),
        Arc::new(MemoryStore::new()),
    );
    let indexer = Arc::new(h.indexer);
    let (tx, feed) = ChannelFeed::channel(4);

    let runner = {
        let indexer = indexer.clone();
        tokio::spawn(async move { indexer.run(feed).await })
    };
    for n in 1..=3 {
        tx.send(note(n)).await.unwrap();
    }
    drop(tx);
    runner.await.unwrap().unwrap();

    let found = h.query.search(BOB, 10, 5).await.unwrap();
    assert_eq!(found.source, Source::Cache);
    assert_eq!(found.total, 3);
    let status = h.query.get_indexer_status().await.unwrap();
    assert_eq!(status.last_indexed_block, Some(3));
    assert!(!status.is_indexing);
}

// ─── Queries ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cached_address_is_served_without_chain_calls() {
    let h = harness(
        MockChain::with_blocks([transfer_block(100, ALICE, BOB)]),
        Arc::new(MemoryStore::new()),
    );
    h.indexer.process(&note(100)).await;
    let before = h.chain.calls();

    let result = h.query.search(ALICE, 50, 10).await.unwrap();
    assert_eq!(result.source, Source::Cache);
    assert_eq!(result.total, 1);
    assert_eq!(result.blocks_scanned, 0);
    let tx = &result.transactions[0];
    assert_eq!(tx.transaction.hash, tx_hash(100, 1));
    assert_eq!(tx.block.as_ref().unwrap().number, 100);

    let by_hash = h.query.get_transaction(&tx_hash(100, 1)).await.unwrap().unwrap();
    assert_eq!(by_hash.source, Source::Cache);
    let block = h.query.get_block("100").await.unwrap().unwrap();
    assert_eq!(block.source, Source::Cache);
    assert_eq!(block.transactions.len(), 2);

    assert_eq!(h.chain.calls(), before);
}

#[tokio::test]
async fn unindexed_address_is_found_by_scanning_the_full_window() {
    let chain = MockChain::with_blocks((1..=20).map(empty_block));
    chain.insert(transfer_block(17, ALICE, CHARLIE));
    let h = harness(chain, Arc::new(MemoryStore::new()));

    let result = h.query.search(CHARLIE, 10, 5).await.unwrap();
    assert_eq!(result.source, Source::Chain);
    assert_eq!(result.total, 1);
    assert_eq!(result.transactions[0].transaction.hash, tx_hash(17, 1));
    assert_eq!(result.blocks_scanned, 10);
    assert_eq!(h.chain.number_reads(), 10);
    assert_eq!(h.store.stats().await.unwrap(), StoreStats::default());
}

#[tokio::test]
async fn hash_scan_stops_after_the_matching_batch() {
    let chain = Arc::new(MockChain::with_blocks((1..=40).map(empty_block)));
    let scanner = BatchScanner::new(chain.clone(), Extractor::default());
    let window = ScanWindow::new(20, 5, &config().query).unwrap();

    let scan = scanner.scan_for_transaction(&tx_hash(34, 0), window).await.unwrap();
    assert_eq!(scan.found.unwrap().block.number, 34);
    // Batches 36..=40 and 31..=35.
    assert_eq!(scan.report.blocks_scanned, 10);
    assert_eq!(scan.report.blocks_requested, 20);
    assert_eq!(chain.number_reads(), 10);
}

#[tokio::test]
async fn unreadable_blocks_are_skipped_and_reported() {
    let chain = Arc::new(MockChain::with_blocks((1..=10).map(|n| transfer_block(n, ALICE, BOB))));
    chain.fail_reads(8);
    let query = QueryService::new(&config(), chain.clone(), Arc::new(MemoryStore::new()));

    let result = query.search(BOB, 10, 3).await.unwrap();
    assert_eq!(result.total, 9);
    assert_eq!(result.blocks_scanned, 9);
    assert_eq!(result.scan.unwrap().skipped, vec![8]);
    let numbers: Vec<u64> = result.transactions.iter().map(|t| t.transaction.block_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6, 7, 9, 10]);
}

#[tokio::test]
async fn hash_only_in_block_50_is_outside_the_window() {
    let chain = MockChain::with_blocks((150..=200).map(empty_block));
    let dead = format!("0xdead{}", "0".repeat(60));
    let mut block_50 = empty_block(50);
    block_50.extrinsics.push(DecodedExtrinsic {
        hash: Some(dead.clone()),
        section: Some("system".into()),
        method: Some("remark".into()),
        signer: Some(ALICE.into()),
        ..Default::default()
    });
    chain.insert(block_50);
    chain.set_latest(200);
    let h = harness(chain, Arc::new(MemoryStore::new()));

    let found = h.query.get_transaction_in_window(&dead, 10, 5).await.unwrap();
    assert!(found.is_none());
    assert_eq!(h.chain.number_reads(), 10);
}

#[tokio::test]
async fn window_bounds_are_rejected_before_io() {
    let h = harness(
        MockChain::with_blocks([empty_block(1)]),
        Arc::new(MemoryStore::new()),
    );
    let max = config().query.max_blocks_to_scan as i64;
    for (blocks, batch) in [(0, 5), (-1, 5), (max + 1, 5), (10, 0), (10, -5)] {
        let err = h.query.search(ALICE, blocks, batch).await.unwrap_err();
        assert!(err.is_validation(), "{blocks}/{batch}: {err}");
    }
    assert_eq!(h.chain.calls(), 0);
}
