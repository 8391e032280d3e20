//! Sub-wallet metadata persistence.
//!
//! Derived sub-wallets store only `(eigen, index, address)` plus trade
//! metadata - their keys are rederived on demand and never touch disk.
//! Imported wallets additionally carry an authenticated-encrypted private
//! key blob; the store treats it as opaque bytes.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::instrument;

use crate::Store;
use crate::convert;
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Stored metadata for one sub-wallet (derived or imported).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletMeta {
    /// Owning eigen.
    pub eigen_id: String,

    /// Index within the eigen.
    pub wallet_index: u32,

    /// Wallet address.
    pub address: Address,

    /// When this wallet last executed a trade.
    pub last_trade_at: Option<DateTime<Utc>>,

    /// Number of trades executed by this wallet.
    pub trade_count: u32,
}

/// An imported wallet: metadata plus the encrypted key blob.
#[derive(Debug, Clone)]
pub struct ImportedWallet {
    /// Shared metadata.
    pub meta: WalletMeta,

    /// AEAD blob: nonce ∥ ciphertext ∥ tag. Never logged.
    pub encrypted_key: Vec<u8>,
}

#[derive(Debug, FromRow)]
struct WalletRow {
    eigen_id: String,
    wallet_index: i64,
    address: String,
    last_trade_at: Option<String>,
    trade_count: i64,
}

impl TryFrom<WalletRow> for WalletMeta {
    type Error = crate::error::StoreError;

    fn try_from(row: WalletRow) -> Result<Self> {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        Ok(WalletMeta {
            eigen_id: row.eigen_id,
            wallet_index: row.wallet_index as u32,
            address: convert::text_to_address(&row.address)?,
            last_trade_at: row
                .last_trade_at
                .map(|t| {
                    DateTime::parse_from_rfc3339(&t)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| {
                            crate::error::StoreError::corrupt(format!("bad last_trade_at: {e}"))
                        })
                })
                .transpose()?,
            trade_count: row.trade_count as u32,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE METHODS
// ═══════════════════════════════════════════════════════════════════════════════

impl Store {
    /// Insert a derived sub-wallet row if it does not exist yet.
    ///
    /// Idempotent: `(eigen, index)` is the primary key and re-inserts are
    /// ignored, so derivation can run every cycle.
    #[instrument(skip(self), fields(eigen = eigen_id, wallet = wallet_index))]
    pub async fn ensure_sub_wallet(
        &self,
        eigen_id: &str,
        wallet_index: u32,
        address: Address,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sub_wallets (eigen_id, wallet_index, address)
            VALUES (?, ?, ?)
            ON CONFLICT (eigen_id, wallet_index) DO NOTHING
            "#,
        )
        .bind(eigen_id)
        .bind(i64::from(wallet_index))
        .bind(convert::address_to_text(address))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// The first `count` derived sub-wallets for an eigen, by index.
    pub async fn sub_wallets(&self, eigen_id: &str, count: u32) -> Result<Vec<WalletMeta>> {
        let rows = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT eigen_id, wallet_index, address, last_trade_at, trade_count
            FROM sub_wallets
            WHERE eigen_id = ?
            ORDER BY wallet_index
            LIMIT ?
            "#,
        )
        .bind(eigen_id)
        .bind(i64::from(count))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Record a trade against a derived sub-wallet.
    pub async fn record_sub_wallet_trade(&self, eigen_id: &str, wallet_index: u32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sub_wallets
            SET last_trade_at = ?, trade_count = trade_count + 1
            WHERE eigen_id = ? AND wallet_index = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(eigen_id)
        .bind(i64::from(wallet_index))
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Insert an imported wallet with its encrypted key blob.
    #[instrument(skip(self, encrypted_key), fields(eigen = eigen_id, wallet = wallet_index))]
    pub async fn insert_imported_wallet(
        &self,
        eigen_id: &str,
        wallet_index: u32,
        address: Address,
        encrypted_key: &[u8],
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO imported_wallets (eigen_id, wallet_index, address, encrypted_key)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (eigen_id, wallet_index) DO UPDATE SET
                address = excluded.address,
                encrypted_key = excluded.encrypted_key
            "#,
        )
        .bind(eigen_id)
        .bind(i64::from(wallet_index))
        .bind(convert::address_to_text(address))
        .bind(encrypted_key)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// All imported wallets for an eigen, by index.
    pub async fn imported_wallets(&self, eigen_id: &str) -> Result<Vec<ImportedWallet>> {
        let rows: Vec<(String, i64, String, Vec<u8>, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT eigen_id, wallet_index, address, encrypted_key, last_trade_at, trade_count
            FROM imported_wallets
            WHERE eigen_id = ?
            ORDER BY wallet_index
            "#,
        )
        .bind(eigen_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(
                |(eigen_id, wallet_index, address, encrypted_key, last_trade_at, trade_count)| {
                    let meta = WalletMeta::try_from(WalletRow {
                        eigen_id,
                        wallet_index,
                        address,
                        last_trade_at,
                        trade_count,
                    })?;
                    Ok(ImportedWallet {
                        meta,
                        encrypted_key,
                    })
                },
            )
            .collect()
    }

    /// Record a trade against an imported wallet.
    pub async fn record_imported_wallet_trade(
        &self,
        eigen_id: &str,
        wallet_index: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE imported_wallets
            SET last_trade_at = ?, trade_count = trade_count + 1
            WHERE eigen_id = ? AND wallet_index = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(eigen_id)
        .bind(i64::from(wallet_index))
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
