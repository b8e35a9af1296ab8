//! SQLite storage backend for BlockIndex.
//!
//! Persists blocks, transactions, events, address associations, progress and
//! hash conflicts to a single SQLite file. Uses `sqlx` with WAL mode so
//! queries keep reading while the indexer writes.
//!
//! # Usage
//! ```rust,no_run
//! use blockindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./index.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use blockindex_core::error::IndexerError;
use blockindex_core::store::Store;
use blockindex_core::types::{
    AddressAssociation, AssociationTarget, Block, BlockConflict, Event, StoreStats, Transaction, Value,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blocks (
        number            INTEGER PRIMARY KEY,
        hash              TEXT    NOT NULL,
        parent_hash       TEXT    NOT NULL,
        state_root        TEXT    NOT NULL,
        extrinsics_root   TEXT    NOT NULL,
        timestamp         INTEGER NOT NULL,
        transaction_count INTEGER NOT NULL,
        event_count       INTEGER NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks (hash);",
    "CREATE TABLE IF NOT EXISTS transactions (
        hash         TEXT    PRIMARY KEY,
        block_number INTEGER NOT NULL REFERENCES blocks (number),
        block_index  INTEGER NOT NULL,
        section      TEXT    NOT NULL,
        method       TEXT    NOT NULL,
        signer       TEXT,
        nonce        INTEGER,
        args_json    TEXT    NOT NULL,
        success      INTEGER NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions (block_number, block_index);",
    "CREATE TABLE IF NOT EXISTS events (
        block_number    INTEGER NOT NULL REFERENCES blocks (number),
        event_index     INTEGER NOT NULL,
        block_hash      TEXT    NOT NULL,
        section         TEXT    NOT NULL,
        method          TEXT    NOT NULL,
        data_json       TEXT    NOT NULL,
        extrinsic_index INTEGER,
        PRIMARY KEY (block_number, event_index)
    );",
    "CREATE TABLE IF NOT EXISTS address_associations (
        address      TEXT    NOT NULL,
        block_number INTEGER NOT NULL REFERENCES blocks (number),
        tx_hash      TEXT,
        event_index  INTEGER
    );",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_assoc_tx ON address_associations (address, tx_hash);",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_assoc_event
        ON address_associations (address, block_number, event_index);",
    "CREATE TABLE IF NOT EXISTS indexed_blocks (
        number INTEGER PRIMARY KEY
    );",
    "CREATE TABLE IF NOT EXISTS indexer_progress (
        id                 INTEGER PRIMARY KEY CHECK (id = 0),
        last_indexed_block INTEGER NOT NULL,
        updated_at         INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS block_conflicts (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        block_number  INTEGER NOT NULL,
        stored_hash   TEXT    NOT NULL,
        incoming_hash TEXT    NOT NULL,
        detected_at   INTEGER NOT NULL
    );",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_conflict
        ON block_conflicts (block_number, stored_hash, incoming_hash);",
];

const TABLES: &[&str] = &[
    "address_associations",
    "events",
    "transactions",
    "blocks",
    "indexed_blocks",
    "indexer_progress",
    "block_conflicts",
];

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        debug!(path, "sqlite store opened");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection, since every connection to `:memory:` sees
    /// its own database. All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn block_from_row(row: &SqliteRow) -> Block {
    Block {
        number: row.get::<i64, _>("number") as u64,
        hash: row.get("hash"),
        parent_hash: row.get("parent_hash"),
        state_root: row.get("state_root"),
        extrinsics_root: row.get("extrinsics_root"),
        timestamp: row.get("timestamp"),
        transaction_count: row.get::<i64, _>("transaction_count") as u32,
        event_count: row.get::<i64, _>("event_count") as u32,
    }
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, IndexerError> {
    let args_json: String = row.get("args_json");
    let args: Vec<Value> = serde_json::from_str(&args_json)?;
    Ok(Transaction {
        hash: row.get("hash"),
        block_number: row.get::<i64, _>("block_number") as u64,
        block_index: row.get::<i64, _>("block_index") as u32,
        section: row.get("section"),
        method: row.get("method"),
        signer: row.get("signer"),
        nonce: row.get::<Option<i64>, _>("nonce").map(|n| n as u64),
        args,
        success: row.get("success"),
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event, IndexerError> {
    let data_json: String = row.get("data_json");
    let data: Vec<Value> = serde_json::from_str(&data_json)?;
    Ok(Event {
        block_number: row.get::<i64, _>("block_number") as u64,
        block_hash: row.get("block_hash"),
        index: row.get::<i64, _>("event_index") as u32,
        section: row.get("section"),
        method: row.get("method"),
        data,
        extrinsic_index: row.get::<Option<i64>, _>("extrinsic_index").map(|i| i as u32),
    })
}

const TRANSACTION_COLUMNS: &str =
    "t.hash, t.block_number, t.block_index, t.section, t.method, t.signer, t.nonce, t.args_json, t.success";

// ─── Store impl ───────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn insert_block(&self, block: &Block) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO blocks
             (number, hash, parent_hash, state_root, extrinsics_root, timestamp, transaction_count, event_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(block.number as i64)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(&block.state_root)
        .bind(&block.extrinsics_root)
        .bind(block.timestamp)
        .bind(block.transaction_count as i64)
        .bind(block.event_count as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>, IndexerError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE number = ?")
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(block_from_row))
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, IndexerError> {
        let row = sqlx::query("SELECT * FROM blocks WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.as_ref().map(block_from_row))
    }

    async fn insert_transactions(&self, transactions: &[Transaction]) -> Result<u64, IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let mut inserted = 0;
        for t in transactions {
            let args = serde_json::to_string(&t.args)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO transactions
                 (hash, block_number, block_index, section, method, signer, nonce, args_json, success)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&t.hash)
            .bind(t.block_number as i64)
            .bind(t.block_index as i64)
            .bind(&t.section)
            .bind(&t.method)
            .bind(&t.signer)
            .bind(t.nonce.map(|n| n as i64))
            .bind(&args)
            .bind(t.success)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(inserted)
    }

    async fn insert_events(&self, events: &[Event]) -> Result<u64, IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let mut inserted = 0;
        for event in events {
            let data = serde_json::to_string(&event.data)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO events
                 (block_number, event_index, block_hash, section, method, data_json, extrinsic_index)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(event.block_number as i64)
            .bind(event.index as i64)
            .bind(&event.block_hash)
            .bind(&event.section)
            .bind(&event.method)
            .bind(&data)
            .bind(event.extrinsic_index.map(|i| i as i64))
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(inserted)
    }

    async fn insert_associations(
        &self,
        associations: &[AddressAssociation],
    ) -> Result<u64, IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let mut inserted = 0;
        for assoc in associations {
            let (tx_hash, event_index) = match &assoc.target {
                AssociationTarget::Transaction { hash } => (Some(hash.as_str()), None),
                AssociationTarget::Event { index } => (None, Some(*index as i64)),
            };
            let result = sqlx::query(
                "INSERT OR IGNORE INTO address_associations (address, block_number, tx_hash, event_index)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&assoc.address)
            .bind(assoc.block_number as i64)
            .bind(tx_hash)
            .bind(event_index)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(inserted)
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>, IndexerError> {
        let row = sqlx::query(&format!("SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.hash = ?"))
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transactions_for_address(&self, address: &str) -> Result<Vec<Transaction>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM address_associations a
             JOIN transactions t ON t.hash = a.tx_hash
             WHERE a.address = ?
             ORDER BY t.block_number, t.block_index"
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<Transaction>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t
             WHERE t.block_number = ? ORDER BY t.block_index"
        ))
        .bind(number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn block_events(&self, number: u64) -> Result<Vec<Event>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM events WHERE block_number = ? ORDER BY event_index")
            .bind(number as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn mark_indexed(&self, number: u64) -> Result<bool, IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query("INSERT OR IGNORE INTO indexed_blocks (number) VALUES (?)")
            .bind(number as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        // The upsert only touches the row when progress moves forward.
        let result = sqlx::query(
            "INSERT INTO indexer_progress (id, last_indexed_block, updated_at) VALUES (0, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 last_indexed_block = excluded.last_indexed_block,
                 updated_at = excluded.updated_at
             WHERE excluded.last_indexed_block > indexer_progress.last_indexed_block",
        )
        .bind(number as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let advanced = result.rows_affected() == 1;
        if advanced {
            debug!(block = number, "progress advanced");
        }
        Ok(advanced)
    }

    async fn is_indexed(&self, number: u64) -> Result<bool, IndexerError> {
        let row = sqlx::query("SELECT 1 FROM indexed_blocks WHERE number = ?")
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn highest_contiguous_indexed(&self) -> Result<Option<u64>, IndexerError> {
        // The lowest indexed block whose successor is missing tops the first run.
        let row = sqlx::query(
            "SELECT MIN(i.number) AS top FROM indexed_blocks i
             WHERE NOT EXISTS (SELECT 1 FROM indexed_blocks j WHERE j.number = i.number + 1)",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.get::<Option<i64>, _>("top").map(|n| n as u64))
    }

    async fn progress(&self) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT last_indexed_block FROM indexer_progress WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.map(|r| r.get::<i64, _>("last_indexed_block") as u64))
    }

    async fn record_conflict(&self, conflict: &BlockConflict) -> Result<bool, IndexerError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO block_conflicts (block_number, stored_hash, incoming_hash, detected_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(conflict.block_number as i64)
        .bind(&conflict.stored_hash)
        .bind(&conflict.incoming_hash)
        .bind(conflict.detected_at)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn conflicts(&self) -> Result<Vec<BlockConflict>, IndexerError> {
        let rows = sqlx::query(
            "SELECT block_number, stored_hash, incoming_hash, detected_at
             FROM block_conflicts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| BlockConflict {
                block_number: r.get::<i64, _>("block_number") as u64,
                stored_hash: r.get("stored_hash"),
                incoming_hash: r.get("incoming_hash"),
                detected_at: r.get("detected_at"),
            })
            .collect())
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<Block>, IndexerError> {
        let rows = sqlx::query("SELECT * FROM blocks ORDER BY number DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(rows.iter().map(block_from_row).collect())
    }

    async fn stats(&self) -> Result<StoreStats, IndexerError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM blocks)               AS blocks,
                (SELECT COUNT(*) FROM indexed_blocks)       AS complete_blocks,
                (SELECT COUNT(*) FROM transactions)         AS transactions,
                (SELECT COUNT(*) FROM events)               AS events,
                (SELECT COUNT(*) FROM address_associations) AS associations,
                (SELECT COUNT(*) FROM block_conflicts)      AS conflicts",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let count = |name: &str| row.get::<i64, _>(name) as u64;
        Ok(StoreStats {
            blocks: count("blocks"),
            complete_blocks: count("complete_blocks"),
            transactions: count("transactions"),
            events: count("events"),
            associations: count("associations"),
            conflicts: count("conflicts"),
        })
    }

    async fn clear(&self) -> Result<(), IndexerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        for table in TABLES {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        debug!("sqlite store cleared");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blockindex_core::chain::BlockNotification;
    use blockindex_core::config::IndexerBuilder;
    use blockindex_core::indexer::Indexer;
    use blockindex_core::testing::{block_hash, fork_hash, forked, transfer_block, tx_hash, MockChain};

    use super::*;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";

    fn block(number: u64) -> Block {
        Block {
            number,
            hash: block_hash(number),
            parent_hash: block_hash(number.saturating_sub(1)),
            state_root: String::new(),
            extrinsics_root: String::new(),
            timestamp: 1_700_000_000_000,
            transaction_count: 1,
            event_count: 0,
        }
    }

    fn tx(number: u64, index: u32) -> Transaction {
        Transaction {
            hash: tx_hash(number, index),
            block_number: number,
            block_index: index,
            section: "balances".into(),
            method: "transfer".into(),
            signer: Some(ALICE.into()),
            nonce: Some(7),
            args: vec![Value::text(BOB), Value::number(10)],
            success: true,
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn block_insert_is_first_write_wins() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.insert_block(&block(5)).await.unwrap());

        let mut other = block(5);
        other.hash = fork_hash(5);
        assert!(!store.insert_block(&other).await.unwrap());

        assert_eq!(store.block_by_number(5).await.unwrap().unwrap(), block(5));
        assert_eq!(store.block_by_hash(&block_hash(5)).await.unwrap().unwrap().number, 5);
        assert!(store.block_by_hash(&fork_hash(5)).await.unwrap().is_none());
        assert!(store.block_by_number(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_blocks_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        for n in [3, 1, 2] {
            store.insert_block(&block(n)).await.unwrap();
        }
        let numbers: Vec<u64> = store.recent_blocks(2).await.unwrap().iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![3, 2]);
    }

    // ── Records ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transaction_roundtrip_keeps_args() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_block(&block(9)).await.unwrap();
        assert_eq!(store.insert_transactions(&[tx(9, 0), tx(9, 1)]).await.unwrap(), 2);
        assert_eq!(store.insert_transactions(&[tx(9, 0)]).await.unwrap(), 0);

        let loaded = store.transaction_by_hash(&tx_hash(9, 1)).await.unwrap().unwrap();
        assert_eq!(loaded, tx(9, 1));
        assert_eq!(store.block_transactions(9).await.unwrap().len(), 2);
        assert!(store.transaction_by_hash(&tx_hash(9, 5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn associations_are_unique_and_ordered() {
        let store = SqliteStore::in_memory().await.unwrap();
        for n in [4, 2] {
            store.insert_block(&block(n)).await.unwrap();
            store.insert_transactions(&[tx(n, 1), tx(n, 0)]).await.unwrap();
        }
        let assocs = vec![
            AddressAssociation::transaction(BOB, 4, tx_hash(4, 0)),
            AddressAssociation::transaction(BOB, 2, tx_hash(2, 1)),
            AddressAssociation::transaction(BOB, 2, tx_hash(2, 0)),
            AddressAssociation::transaction(BOB, 2, tx_hash(2, 0)),
            AddressAssociation::event(BOB, 2, 0),
            AddressAssociation::event(BOB, 2, 0),
        ];
        assert_eq!(store.insert_associations(&assocs).await.unwrap(), 4);

        let hashes: Vec<String> = store
            .transactions_for_address(BOB)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.hash)
            .collect();
        assert_eq!(hashes, vec![tx_hash(2, 0), tx_hash(2, 1), tx_hash(4, 0)]);
    }

    // ── Progress ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn progress_is_monotonic_and_contiguity_is_tracked() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.progress().await.unwrap().is_none());
        assert!(store.highest_contiguous_indexed().await.unwrap().is_none());

        assert!(store.mark_indexed(10).await.unwrap());
        assert!(store.mark_indexed(12).await.unwrap());
        assert!(!store.mark_indexed(11).await.unwrap());
        assert_eq!(store.progress().await.unwrap(), Some(12));
        assert_eq!(store.highest_contiguous_indexed().await.unwrap(), Some(12));

        assert!(store.mark_indexed(20).await.unwrap());
        assert_eq!(store.highest_contiguous_indexed().await.unwrap(), Some(12));
        assert!(store.is_indexed(11).await.unwrap());
        assert!(!store.is_indexed(13).await.unwrap());
    }

    #[tokio::test]
    async fn conflicts_and_clear() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_block(&block(1)).await.unwrap();
        store.mark_indexed(1).await.unwrap();
        let conflict = BlockConflict {
            block_number: 1,
            stored_hash: block_hash(1),
            incoming_hash: fork_hash(1),
            detected_at: 42,
        };
        assert!(store.record_conflict(&conflict).await.unwrap());
        let again = BlockConflict {
            detected_at: 43,
            ..conflict.clone()
        };
        assert!(!store.record_conflict(&again).await.unwrap());
        let conflicts = store.conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].incoming_hash, fork_hash(1));
        assert_eq!(conflicts[0].detected_at, 42);

        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
        assert!(store.progress().await.unwrap().is_none());
    }

    // ── With the indexer ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn indexer_writes_through_sqlite() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let chain = Arc::new(MockChain::with_blocks([transfer_block(100, ALICE, BOB)]));
        let indexer = Indexer::new(IndexerBuilder::new().build_config(), chain.clone(), store.clone());

        let note = BlockNotification::new(100, block_hash(100));
        assert!(indexer.process(&note).await.is_indexed());
        let once = store.stats().await.unwrap();
        assert!(!indexer.process(&note).await.is_indexed());
        assert_eq!(store.stats().await.unwrap(), once);

        assert_eq!(once.blocks, 1);
        assert_eq!(once.complete_blocks, 1);
        assert_eq!(once.transactions, 2);
        assert_eq!(once.events, 4);
        assert_eq!(once.associations, 4);
        assert_eq!(store.transactions_for_address(BOB).await.unwrap()[0].hash, tx_hash(100, 1));
        assert_eq!(store.block_events(100).await.unwrap()[1].extrinsic_index, Some(1));

        chain.insert(forked(transfer_block(100, ALICE, BOB)));
        let forked_note = BlockNotification::new(100, fork_hash(100));
        assert!(!indexer.process(&forked_note).await.is_indexed());
        assert!(!indexer.process(&forked_note).await.is_indexed());
        assert_eq!(store.conflicts().await.unwrap().len(), 1);
        assert_eq!(store.block_by_number(100).await.unwrap().unwrap().hash, block_hash(100));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "blockindex-{}-{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path_str = path.to_string_lossy().to_string();

        let store = SqliteStore::open(&path_str).await.unwrap();
        store.insert_block(&block(3)).await.unwrap();
        store.mark_indexed(3).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&path_str).await.unwrap();
        assert_eq!(reopened.progress().await.unwrap(), Some(3));
        assert!(reopened.block_by_number(3).await.unwrap().is_some());
        reopened.close().await;

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
        }
    }
}
