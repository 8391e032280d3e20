//! Durable local store for the eigen keeper.
//!
//! A single-file SQLite database in WAL mode holds everything the keeper
//! must remember across restarts: eigen configs, positions, trades,
//! sub-wallet metadata, imported (encrypted) wallets, price snapshots, and
//! AI evaluation records.
//!
//! # Write Discipline
//!
//! Every mutation goes through a bound-parameter prepared statement. Config
//! updates go through [`eigens::EigenUpdate`], a typed struct whose fields
//! ARE the whitelist - a non-whitelisted column cannot be expressed, so
//! field injection is structurally impossible.
//!
//! # Concurrency
//!
//! One process-wide pool; SQLite serializes writes internally and WAL keeps
//! readers off the write lock.

// ═══════════════════════════════════════════════════════════════════════════════
// MODULES
// ═══════════════════════════════════════════════════════════════════════════════

pub mod eigens;
pub mod error;
pub mod positions;
pub mod schema;
pub mod snapshots;
pub mod trades;
pub mod wallets;

pub use eigens::EigenUpdate;
pub use error::{Result, StoreError};

use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle to the keeper's local database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` in WAL mode and
    /// apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema fails to
    /// apply.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        schema::apply(&pool).await?;

        info!(path = %path.display(), "Store opened");
        Ok(Self { pool })
    }

    /// Open an in-memory database (tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema fails to apply.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;

        // One connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        schema::apply(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROW CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) mod convert {
    //! Shared text encodings for chain types.
    //!
    //! Addresses and hashes are stored as lowercase 0x-hex; U256 amounts as
    //! decimal strings (SQLite has no 256-bit integer).

    use alloy::primitives::{Address, B256, TxHash, U256};

    use crate::error::{Result, StoreError};

    pub fn address_to_text(address: Address) -> String {
        format!("{address:#x}")
    }

    pub fn text_to_address(text: &str) -> Result<Address> {
        text.parse()
            .map_err(|e| StoreError::corrupt(format!("bad address {text:?}: {e}")))
    }

    pub fn u256_to_text(value: U256) -> String {
        value.to_string()
    }

    pub fn text_to_u256(text: &str) -> Result<U256> {
        U256::from_str_radix(text, 10)
            .map_err(|e| StoreError::corrupt(format!("bad amount {text:?}: {e}")))
    }

    pub fn b256_to_text(value: B256) -> String {
        format!("{value:#x}")
    }

    pub fn text_to_b256(text: &str) -> Result<B256> {
        text.parse()
            .map_err(|e| StoreError::corrupt(format!("bad hash {text:?}: {e}")))
    }

    pub fn text_to_tx_hash(text: &str) -> Result<TxHash> {
        text_to_b256(text)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    #[tokio::test]
    async fn open_in_memory_applies_schema() {
        let store = Store::open_in_memory().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM eigens")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn open_file_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.db");

        let store = Store::open(&path).await.unwrap();
        drop(store);

        assert!(path.exists());
    }

    #[test]
    fn address_text_round_trip() {
        let address = Address::repeat_byte(0xab);
        let text = convert::address_to_text(address);
        assert!(text.starts_with("0x"));
        assert_eq!(convert::text_to_address(&text).unwrap(), address);

        assert!(convert::text_to_address("garbage").is_err());
    }

    #[test]
    fn u256_text_round_trip() {
        let value = U256::from(123_456_789_000_000_000_000_u128);
        let text = convert::u256_to_text(value);
        assert_eq!(convert::text_to_u256(&text).unwrap(), value);

        assert!(convert::text_to_u256("not-a-number").is_err());
    }
}
