//! blockindex CLI: inspect and manage a SQLite block index.
//!
//! Usage:
//! ```bash
//! blockindex info
//! blockindex --db ./index.db status
//! blockindex blocks --limit 20
//! blockindex block 100
//! blockindex tx 0x…
//! blockindex address 5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY
//! blockindex conflicts
//! blockindex reset --yes
//! ```
//!
//! Every command reads the local index only; no chain client is involved.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use blockindex_core::adapter::StoreAdapter;
use blockindex_core::config::IndexerConfig;
use blockindex_core::format::{validate_hash, AddressFormat, BlockRef};
use blockindex_core::types::{Block, Transaction};
use blockindex_storage::SqliteStore;

mod logging;

use logging::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "blockindex",
    about = "Inspect and manage a BlockIndex SQLite database",
    long_about = "
BlockIndex CLI: read blocks, transactions, address history and indexer
progress from a local index built by the BlockIndex indexer.

ENVIRONMENT VARIABLES:
  BLOCKINDEX_DB   Path to the SQLite database (same as --db)
  RUST_LOG        Log filter; overrides --log-level
",
    version
)]
struct Cli {
    /// SQLite database path or URL
    #[arg(long, global = true, env = "BLOCKINDEX_DB", default_value = "./blockindex.db")]
    db: String,

    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show build info and default configuration
    Info,

    /// Show indexing progress and record counts
    Status,

    /// List the most recent stored blocks
    Blocks {
        /// Number of blocks to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show one block by number or 0x hash
    Block {
        /// Block number or hash
        id: String,
    },

    /// Show one transaction by hash
    Tx {
        /// Transaction hash (0x + 64 hex)
        hash: String,
    },

    /// List indexed transactions associated with an address
    Address {
        /// SS58 address
        address: String,
    },

    /// List recorded block hash conflicts
    Conflicts,

    /// Delete all indexed data
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
        ..Default::default()
    });

    match &cli.command {
        Commands::Info => cmd_info(&cli),
        command => {
            let store = SqliteStore::open(&cli.db)
                .await
                .with_context(|| format!("open index '{}'", cli.db))?;
            let adapter = StoreAdapter::new(std::sync::Arc::new(store));
            run(&cli, command, &adapter).await
        }
    }
}

async fn run(cli: &Cli, command: &Commands, adapter: &StoreAdapter) -> Result<()> {
    match command {
        Commands::Info => cmd_info(cli),
        Commands::Status => cmd_status(cli, adapter).await,
        Commands::Blocks { limit } => cmd_blocks(cli, adapter, *limit).await,
        Commands::Block { id } => cmd_block(cli, adapter, id).await,
        Commands::Tx { hash } => cmd_tx(cli, adapter, hash).await,
        Commands::Address { address } => cmd_address(cli, adapter, address).await,
        Commands::Conflicts => cmd_conflicts(cli, adapter).await,
        Commands::Reset { yes } => cmd_reset(cli, adapter, *yes).await,
    }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

fn cmd_info(cli: &Cli) -> Result<()> {
    let config = IndexerConfig::default();
    if cli.json {
        return print_json(&config);
    }
    println!("BlockIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Database:             {}", cli.db);
    println!("  Default chain:        {}", config.chain);
    println!(
        "  Address format:       {}-{} base58 chars (SS58)",
        config.address_format.min_len, config.address_format.max_len
    );
    println!("  Gap fill:             {:?}", config.gap_fill);
    println!(
        "  Fallback scan:        {} blocks (max {}), batches of {} (max {})",
        config.query.default_blocks_to_scan,
        config.query.max_blocks_to_scan,
        config.query.default_batch_size,
        config.query.max_batch_size
    );
    println!("  Storage backends:     memory, SQLite (feature: sqlite)");
    Ok(())
}

#[derive(Serialize)]
struct StatusView {
    last_indexed_block: Option<u64>,
    highest_contiguous_block: Option<u64>,
    #[serde(flatten)]
    stats: blockindex_core::types::StoreStats,
}

async fn cmd_status(cli: &Cli, adapter: &StoreAdapter) -> Result<()> {
    let view = StatusView {
        last_indexed_block: adapter.get_last_indexed_block().await?,
        highest_contiguous_block: adapter.highest_contiguous_block().await?,
        stats: adapter.stats().await?,
    };
    if cli.json {
        return print_json(&view);
    }
    println!("Last indexed block:   {}", opt(view.last_indexed_block));
    println!("Highest contiguous:   {}", opt(view.highest_contiguous_block));
    println!("Blocks:               {} ({} complete)", view.stats.blocks, view.stats.complete_blocks);
    println!("Transactions:         {}", view.stats.transactions);
    println!("Events:               {}", view.stats.events);
    println!("Address associations: {}", view.stats.associations);
    println!("Hash conflicts:       {}", view.stats.conflicts);
    Ok(())
}

async fn cmd_blocks(cli: &Cli, adapter: &StoreAdapter, limit: usize) -> Result<()> {
    let blocks = adapter.recent_blocks(limit).await?;
    if cli.json {
        return print_json(&blocks);
    }
    if blocks.is_empty() {
        println!("No blocks indexed.");
    }
    for block in &blocks {
        print_block_line(block);
    }
    Ok(())
}

async fn cmd_block(cli: &Cli, adapter: &StoreAdapter, id: &str) -> Result<()> {
    let block = match BlockRef::parse(id)? {
        BlockRef::Number(n) => adapter.get_block_by_number(n).await?,
        BlockRef::Hash(h) => adapter.get_block_by_hash(&h).await?,
    };
    let Some(block) = block else {
        bail!("block {id} is not in the index");
    };
    let transactions = adapter.get_block_transactions(block.number).await?;
    let events = adapter.get_block_events(block.number).await?;

    if cli.json {
        return print_json(&serde_json::json!({
            "block": block,
            "transactions": transactions,
            "events": events,
        }));
    }
    println!("Block #{}", block.number);
    println!("  Hash:            {}", block.hash);
    println!("  Parent:          {}", block.parent_hash);
    println!("  State root:      {}", block.state_root);
    println!("  Extrinsics root: {}", block.extrinsics_root);
    println!("  Time:            {}", time(block.timestamp));
    println!("  Complete:        {}", adapter.is_block_complete(block.number).await?);
    println!("  Transactions ({}):", transactions.len());
    for tx in &transactions {
        print_tx_line(tx);
    }
    println!("  Events ({}):", events.len());
    for event in &events {
        let phase = match event.extrinsic_index {
            Some(i) => format!("extrinsic {i}"),
            None => "block".to_string(),
        };
        println!("    [{}] {}.{} ({})", event.index, event.section, event.method, phase);
    }
    Ok(())
}

async fn cmd_tx(cli: &Cli, adapter: &StoreAdapter, hash: &str) -> Result<()> {
    let hash = validate_hash("hash", hash)?;
    let Some(tx) = adapter.get_transaction_by_hash(&hash).await? else {
        bail!("transaction {hash} is not in the index");
    };
    let block = adapter.get_block_by_number(tx.block_number).await?;

    if cli.json {
        return print_json(&serde_json::json!({ "transaction": tx, "block": block }));
    }
    println!("Transaction {}", tx.hash);
    println!("  Block:   #{} index {}", tx.block_number, tx.block_index);
    println!("  Call:    {}.{}", tx.section, tx.method);
    println!("  Signer:  {}", tx.signer.as_deref().unwrap_or("(unsigned)"));
    println!("  Nonce:   {}", opt(tx.nonce));
    println!("  Success: {}", tx.success);
    if let Some(block) = block {
        println!("  Time:    {}", time(block.timestamp));
    }
    println!("  Args:    {}", serde_json::to_string(&tx.args)?);
    Ok(())
}

async fn cmd_address(cli: &Cli, adapter: &StoreAdapter, address: &str) -> Result<()> {
    AddressFormat::default().validate(address)?;
    let transactions = adapter.get_address_transactions(address).await?;
    if cli.json {
        return print_json(&serde_json::json!({
            "address": address,
            "total": transactions.len(),
            "transactions": transactions,
        }));
    }
    println!("{} indexed transaction(s) for {address}", transactions.len());
    for tx in &transactions {
        print_tx_line(tx);
    }
    Ok(())
}

async fn cmd_conflicts(cli: &Cli, adapter: &StoreAdapter) -> Result<()> {
    let conflicts = adapter.conflicts().await?;
    if cli.json {
        return print_json(&conflicts);
    }
    if conflicts.is_empty() {
        println!("No hash conflicts recorded.");
    }
    for c in &conflicts {
        println!("Block #{} at {}", c.block_number, time(c.detected_at));
        println!("  kept:     {}", c.stored_hash);
        println!("  incoming: {}", c.incoming_hash);
    }
    Ok(())
}

async fn cmd_reset(cli: &Cli, adapter: &StoreAdapter, yes: bool) -> Result<()> {
    if !yes {
        bail!("reset deletes every indexed record in '{}'; pass --yes to confirm", cli.db);
    }
    let before = adapter.stats().await?;
    adapter.clear().await?;
    info!(db = %cli.db, blocks = before.blocks, "index reset");
    println!("Cleared {} blocks and {} transactions.", before.blocks, before.transactions);
    Ok(())
}

// ─── Output helpers ───────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_block_line(block: &Block) {
    println!(
        "#{:<10} {}  {} tx  {} events  {}",
        block.number,
        block.hash,
        block.transaction_count,
        block.event_count,
        time(block.timestamp)
    );
}

fn print_tx_line(tx: &Transaction) {
    let status = if tx.success { "ok" } else { "failed" };
    println!(
        "    #{}-{} {} {}.{} [{status}]",
        tx.block_number, tx.block_index, tx.hash, tx.section, tx.method
    );
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn time(millis: i64) -> String {
    if millis == 0 {
        return "unknown".into();
    }
    Utc.timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |t| t.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["blockindex", "blocks", "--limit", "3", "--db", "x.db", "--json"]).unwrap();
        assert_eq!(cli.db, "x.db");
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Blocks { limit: 3 }));
    }

    #[test]
    fn reset_requires_subcommand_args() {
        let cli = Cli::try_parse_from(["blockindex", "reset"]).unwrap();
        assert!(matches!(cli.command, Commands::Reset { yes: false }));
        assert!(Cli::try_parse_from(["blockindex", "block"]).is_err());
    }

    #[test]
    fn time_formatting() {
        assert_eq!(time(0), "unknown");
        assert_eq!(time(1_700_000_000_000), "2023-11-14T22:13:20+00:00");
        assert_eq!(opt::<u64>(None), "-");
    }
}
